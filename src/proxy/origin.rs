//! Origin calls.
//!
//! # Design Decisions
//! - Two pooled clients: a raw one that relays bodies byte-for-byte
//!   (compression included) and a decoding one used only when a stage must
//!   read the body
//! - Any HTTP response is an origin success; only transport failures count
//!   as failures
//! - No retries: non-idempotent routes would be unsafe to replay

use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use tracing::{debug, warn};

use crate::http::response::strip_cors_headers;
use crate::middleware::{Flow, Stage};
use crate::proxy::builder::{build_request, UpstreamRequest};
use crate::proxy::context::{OriginOutcome, ProxyResult, RequestContext, ResultBody};
use crate::proxy::error::ProxyError;

#[derive(Clone)]
pub struct OriginClient {
    raw: reqwest::Client,
    decoding: reqwest::Client,
}

impl OriginClient {
    pub fn new(connect_timeout: Duration, request_timeout: Duration) -> Result<Self, reqwest::Error> {
        let raw = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(request_timeout)
            .no_gzip()
            .no_brotli()
            .no_deflate()
            .build()?;
        let decoding = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(request_timeout)
            .build()?;
        Ok(Self { raw, decoding })
    }

    /// The decoding client, shared with uptime probes.
    pub fn probe_client(&self) -> reqwest::Client {
        self.decoding.clone()
    }

    pub async fn send(
        &self,
        upstream: UpstreamRequest,
        decode: bool,
    ) -> Result<reqwest::Response, reqwest::Error> {
        let client = if decode { &self.decoding } else { &self.raw };
        let mut request = client
            .request(upstream.method, upstream.url)
            .headers(upstream.headers);
        if let Some(body) = upstream.body {
            request = request.body(body);
        }
        request.send().await
    }
}

pub struct OriginStage {
    client: OriginClient,
}

impl OriginStage {
    pub fn new(client: OriginClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Stage for OriginStage {
    fn name(&self) -> &'static str {
        "origin"
    }

    async fn run(&self, ctx: &mut RequestContext) -> Result<Flow, ProxyError> {
        let decode = ctx.rewrites_body();
        let upstream = build_request(ctx, decode)?;
        debug!(
            route = %ctx.route.id,
            method = %upstream.method,
            host = upstream.url.host_str().unwrap_or(""),
            decode,
            "Calling origin"
        );

        let response = match self.client.send(upstream, decode).await {
            Ok(response) => response,
            Err(e) => {
                ctx.outcome = Some(OriginOutcome::Failure);
                // reqwest errors embed the URL, which may carry secrets
                let e = e.without_url();
                warn!(route = %ctx.route.id, error = %e, "Origin request failed");
                return Err(ProxyError::Transport(e));
            }
        };

        let elapsed_ms = ctx.elapsed_ms();
        ctx.outcome = Some(OriginOutcome::Success { elapsed_ms });

        let status = response.status();
        let mut headers = response.headers().clone();
        strip_cors_headers(&mut headers);
        if decode {
            // body is decompressed, so these no longer describe it
            headers.remove(axum::http::header::CONTENT_ENCODING);
            headers.remove(axum::http::header::CONTENT_LENGTH);
        }
        debug!(route = %ctx.route.id, status = status.as_u16(), elapsed_ms, "Origin responded");

        ctx.result = Some(ProxyResult {
            status,
            headers,
            body: ResultBody::Stream(Body::from_stream(response.bytes_stream())),
        });
        Ok(Flow::Next)
    }
}
