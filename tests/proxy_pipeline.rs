//! End-to-end tests: real listener, real origin, in-memory stores.

use axum::http::StatusCode;
use reqwest::Method;
use serde_json::{json, Value};

mod common;

use common::{catalog, start_hello_origin, start_origin, start_proxy, start_proxy_with, MockResponse};

#[tokio::test]
async fn test_forwards_path_query_and_secrets() {
    let origin = start_hello_origin().await;
    let proxy = start_proxy(&catalog(
        &format!("{}/v1", origin.url()),
        r#"
        query_params = [["key", "{{KEY}}"]]
        headers = [["x-api-key", "{{ KEY }}"]]
        "#,
    ))
    .await;

    let res = proxy
        .client
        .get(proxy.url("/api/v1/r1/users/7?page=2"))
        .header("x-caller", "1")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert!(res.headers().contains_key("x-request-id"));
    assert_eq!(res.headers()["access-control-allow-origin"], "*");
    assert_eq!(res.text().await.unwrap(), "hello");

    let seen = origin.last_request().unwrap();
    assert_eq!(seen.method, "GET");
    assert_eq!(seen.target, "/v1/users/7?key=s3cr3t&page=2");
    assert_eq!(seen.header("x-api-key"), Some("s3cr3t"));
    assert_eq!(seen.header("x-caller"), Some("1"));
}

#[tokio::test]
async fn test_forward_request_data_disabled() {
    let origin = start_hello_origin().await;
    let proxy = start_proxy(&catalog(
        &format!("{}/v1?fixed=1", origin.url()),
        "forward_request_data = false",
    ))
    .await;

    let res = proxy
        .client
        .get(proxy.url("/api/v1/r1?page=2"))
        .header("x-caller", "1")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let seen = origin.last_request().unwrap();
    assert_eq!(seen.target, "/v1?fixed=1");
    assert_eq!(seen.header("x-caller"), None);
}

#[tokio::test]
async fn test_request_body_is_forwarded_on_post_routes() {
    let origin = start_origin(|req| MockResponse::ok("application/octet-stream", req.body.clone())).await;
    let text = catalog(&origin.url(), "").replace(r#"method = "GET""#, r#"method = "POST""#);
    let proxy = start_proxy(&text).await;

    let res = proxy
        .client
        .post(proxy.url("/api/v1/r1"))
        .body("payload")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.text().await.unwrap(), "payload");
    assert_eq!(origin.last_request().unwrap().method, "POST");
}

#[tokio::test]
async fn test_resolution_errors() {
    let origin = start_hello_origin().await;
    let proxy = start_proxy(&catalog(&origin.url(), "")).await;

    let res = proxy.get("/api/v1/nope").await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert_eq!(res.text().await.unwrap(), "Invalid endpoint");

    let res = proxy.get("/api/v1/").await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert_eq!(res.text().await.unwrap(), "API id is missing");

    let res = proxy.client.delete(proxy.url("/api/v1/r1")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::METHOD_NOT_ALLOWED);

    assert_eq!(origin.calls(), 0);
}

#[tokio::test]
async fn test_origin_errors_are_relayed() {
    let origin = start_origin(|_| MockResponse::text(404, "no such user")).await;
    let proxy = start_proxy(&catalog(&origin.url(), "")).await;

    let res = proxy.get("/api/v1/r1/users/9").await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    assert_eq!(res.text().await.unwrap(), "no such user");

    // any response from the origin counts as a success
    let stats = proxy.state.routes.summary("r1").await.unwrap().unwrap().stats;
    assert_eq!((stats.success_count, stats.fail_count), (1, 0));
}

#[tokio::test]
async fn test_unreachable_origin_counts_as_failure() {
    // nothing listens on the discard port
    let proxy = start_proxy(&catalog("http://127.0.0.1:9/v1?key={{KEY}}", "")).await;

    let res = proxy.get("/api/v1/r1").await;
    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    // the rendered URL never reaches the caller
    assert!(!res.text().await.unwrap().contains("s3cr3t"));

    let stats = proxy.state.routes.summary("r1").await.unwrap().unwrap().stats;
    assert_eq!((stats.success_count, stats.fail_count), (0, 1));
}

#[tokio::test]
async fn test_cache_disabled_calls_origin_every_time() {
    let origin = start_hello_origin().await;
    let proxy = start_proxy(&catalog(&origin.url(), "")).await;

    for _ in 0..2 {
        assert_eq!(proxy.get("/api/v1/r1?q=1").await.status(), StatusCode::OK);
    }
    assert_eq!(origin.calls(), 2);
}

#[tokio::test]
async fn test_cache_enabled_serves_repeat_from_store() {
    let origin = start_hello_origin().await;
    let proxy = start_proxy(&catalog(
        &origin.url(),
        r#"
        [routes.caching]
        enabled = true
        duration = 60
        "#,
    ))
    .await;

    let first = proxy.get("/api/v1/r1?q=1").await;
    assert_eq!(first.headers()["cache-control"], "max-age=60");
    assert_eq!(first.text().await.unwrap(), "hello");

    let second = proxy.get("/api/v1/r1?q=1").await;
    assert_eq!(second.status(), StatusCode::OK);
    assert!(second.headers()["cache-control"]
        .to_str()
        .unwrap()
        .starts_with("max-age="));
    assert_eq!(second.text().await.unwrap(), "hello");
    assert_eq!(origin.calls(), 1);

    proxy.get("/api/v1/r1?q=2").await;
    assert_eq!(origin.calls(), 2);
}

#[tokio::test]
async fn test_rate_limit_rejects_after_max_requests() {
    let origin = start_hello_origin().await;
    let proxy = start_proxy(&catalog(
        &origin.url(),
        r#"
        [routes.rate_limiting]
        enabled = true
        window_size = 60
        max_requests = 2
        "#,
    ))
    .await;

    assert_eq!(proxy.get("/api/v1/r1").await.status(), StatusCode::OK);
    assert_eq!(proxy.get("/api/v1/r1").await.status(), StatusCode::OK);
    let limited = proxy.get("/api/v1/r1").await;
    assert_eq!(limited.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(limited.text().await.unwrap(), "Too many requests made");
    assert_eq!(origin.calls(), 2);
}

#[tokio::test]
async fn test_rate_limit_status_is_configurable() {
    let origin = start_hello_origin().await;
    let proxy = start_proxy_with(
        &catalog(
            &origin.url(),
            r#"
            [routes.rate_limiting]
            enabled = true
            window_size = 60
            max_requests = 1
            "#,
        ),
        |config| config.proxy.rate_limit_status = 429,
    )
    .await;

    proxy.get("/api/v1/r1").await;
    assert_eq!(proxy.get("/api/v1/r1").await.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_ip_restriction_blocks_before_origin() {
    let origin = start_hello_origin().await;
    let proxy = start_proxy(&catalog(
        &origin.url(),
        r#"
        [routes.restriction]
        type = "ip"
        allowed_ips = ["10.0.0.0/8"]
        "#,
    ))
    .await;

    let res = proxy.get("/api/v1/r1").await;
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    assert_eq!(res.text().await.unwrap(), "Access denied to IP address: 127.0.0.1");
    assert_eq!(origin.calls(), 0);
}

#[tokio::test]
async fn test_ip_restriction_allows_listed_client() {
    let origin = start_hello_origin().await;
    let proxy = start_proxy(&catalog(
        &origin.url(),
        r#"
        [routes.restriction]
        type = "ip"
        allowed_ips = ["127.0.0.*"]
        "#,
    ))
    .await;

    assert_eq!(proxy.get("/api/v1/r1").await.status(), StatusCode::OK);
    assert_eq!(origin.calls(), 1);
}

#[tokio::test]
async fn test_http_restriction_cors() {
    let origin = start_hello_origin().await;
    let proxy = start_proxy(&catalog(
        &origin.url(),
        r#"
        [routes.restriction]
        type = "http"
        allowed_origins = ["https://app.example"]
        "#,
    ))
    .await;

    let listed = proxy
        .client
        .get(proxy.url("/api/v1/r1"))
        .header("origin", "https://app.example")
        .send()
        .await
        .unwrap();
    assert_eq!(listed.headers()["access-control-allow-origin"], "https://app.example");

    let unlisted = proxy
        .client
        .get(proxy.url("/api/v1/r1"))
        .header("origin", "https://evil.example")
        .send()
        .await
        .unwrap();
    assert_eq!(unlisted.status(), StatusCode::OK);
    assert!(unlisted.headers().get("access-control-allow-origin").is_none());

    let preflight = proxy
        .client
        .request(Method::OPTIONS, proxy.url("/api/v1/r1"))
        .header("origin", "https://app.example")
        .header("access-control-request-method", "GET")
        .send()
        .await
        .unwrap();
    assert_eq!(preflight.status(), StatusCode::NO_CONTENT);
    assert_eq!(preflight.headers()["access-control-allow-methods"], "GET");

    assert_eq!(origin.calls(), 2);
}

#[tokio::test]
async fn test_partial_query_filters_json() {
    let origin = start_origin(|_| {
        MockResponse::ok("application/json", r#"{"a":1,"b":{"c":2,"d":3},"e":[1]}"#)
    })
    .await;
    let proxy = start_proxy(&catalog(
        &origin.url(),
        r#"
        [routes.partial_query]
        enabled = true
        default_filter = "e"
        "#,
    ))
    .await;

    let res = proxy.get("/api/v1/r1?diode-filter=a,b.c&x=1").await;
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body, json!({"a": 1, "b": {"c": 2}}));
    assert_eq!(origin.last_request().unwrap().target, "/?x=1");

    let res = proxy.get("/api/v1/r1").await;
    let body: Value = res.json().await.unwrap();
    assert_eq!(body, json!({"e": [1]}));
}

#[tokio::test]
async fn test_admin_requires_api_key() {
    let origin = start_hello_origin().await;
    let proxy = start_proxy(&catalog(&origin.url(), "")).await;

    let res = proxy.get("/admin/status").await;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = proxy
        .client
        .get(proxy.url("/admin/status"))
        .bearer_auth("wrong")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = proxy.admin(Method::GET, "/admin/status").await;
    assert_eq!(res.status(), StatusCode::OK);
    let status: Value = res.json().await.unwrap();
    assert_eq!(status["routes"], 1);
}

#[tokio::test]
async fn test_admin_route_stats_duplicate_and_delete() {
    let origin = start_hello_origin().await;
    let proxy = start_proxy(&catalog(&origin.url(), "")).await;

    proxy.get("/api/v1/r1").await;
    proxy.get("/api/v1/r1").await;

    let route: Value = proxy.admin(Method::GET, "/admin/routes/r1").await.json().await.unwrap();
    assert_eq!(route["successCount"], 2);
    assert_eq!(route["failCount"], 0);
    assert_eq!(route["method"], "GET");

    let res = proxy.admin(Method::POST, "/admin/routes/r1/duplicate").await;
    assert_eq!(res.status(), StatusCode::CREATED);
    let copy: Value = res.json().await.unwrap();
    let copy_id = copy["id"].as_str().unwrap().to_string();

    let copied: Value = proxy
        .admin(Method::GET, &format!("/admin/routes/{copy_id}"))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(copied["successCount"], 0);
    assert_eq!(proxy.get(&format!("/api/v1/{copy_id}")).await.status(), StatusCode::OK);

    let res = proxy.admin(Method::DELETE, "/admin/routes/r1").await;
    assert_eq!(res.status(), StatusCode::NO_CONTENT);
    assert_eq!(proxy.get("/api/v1/r1").await.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        proxy.admin(Method::GET, "/admin/routes/r1").await.status(),
        StatusCode::NOT_FOUND
    );
}

#[tokio::test]
async fn test_admin_disabled_is_not_mounted() {
    let origin = start_hello_origin().await;
    let proxy = start_proxy_with(&catalog(&origin.url(), ""), |config| {
        config.admin.enabled = false;
    })
    .await;

    let res = proxy.admin(Method::GET, "/admin/status").await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_rate_limit_under_concurrency() {
    let origin = start_hello_origin().await;
    let proxy = start_proxy(&catalog(
        &origin.url(),
        r#"
        [routes.rate_limiting]
        enabled = true
        window_size = 60
        max_requests = 3
        "#,
    ))
    .await;

    let requests = (0..10).map(|_| proxy.get("/api/v1/r1"));
    let statuses: Vec<_> = futures_util::future::join_all(requests)
        .await
        .into_iter()
        .map(|res| res.status())
        .collect();

    let allowed = statuses.iter().filter(|s| **s == StatusCode::OK).count();
    assert_eq!(allowed, 3);
    assert_eq!(origin.calls(), 3);
}

fn png(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbaImage::from_pixel(width, height, image::Rgba([200, 40, 40, 255]));
    let mut out = std::io::Cursor::new(Vec::new());
    image::DynamicImage::ImageRgba8(img)
        .write_to(&mut out, image::ImageFormat::Png)
        .unwrap();
    out.into_inner()
}

#[tokio::test]
async fn test_image_route_transforms_without_forwarding_params() {
    let source = png(40, 20);
    let origin = start_origin(move |_| MockResponse::ok("image/png", source.clone())).await;
    let proxy = start_proxy(&catalog(
        &origin.url(),
        r#"
        [routes.image_transformation]
        enabled = true
        "#,
    ))
    .await;

    let res = proxy.get("/api/v1/r1/logo.png?w=10&size=big&fm=jpg&q=60").await;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers()["content-type"], "image/jpeg");
    let body = res.bytes().await.unwrap();
    let decoded = image::load_from_memory(&body).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (10, 5));

    let seen = origin.last_request().unwrap();
    assert_eq!(seen.target, "/logo.png?size=big");
}

#[tokio::test]
async fn test_image_route_invalid_params_are_not_cached() {
    let source = png(8, 8);
    let origin = start_origin(move |_| MockResponse::ok("image/png", source.clone())).await;
    let proxy = start_proxy(&catalog(
        &origin.url(),
        r#"
        [routes.image_transformation]
        enabled = true

        [routes.caching]
        enabled = true
        duration = 60
        "#,
    ))
    .await;

    for _ in 0..2 {
        let res = proxy.get("/api/v1/r1?w=wide").await;
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
    assert_eq!(origin.calls(), 2);

    let ok = proxy.get("/api/v1/r1?w=4").await;
    assert_eq!(ok.status(), StatusCode::OK);
    assert_eq!(ok.headers()["content-type"], "image/png");
    assert_eq!(origin.calls(), 3);
}
