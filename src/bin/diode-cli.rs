use std::path::PathBuf;

use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Method, StatusCode};
use serde_json::Value;

use diode_proxy::catalog::load_catalog;
use diode_proxy::config::load_config;

#[derive(Parser)]
#[command(name = "diode-cli")]
#[command(about = "Management CLI for the diode proxy", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8080")]
    url: String,

    #[arg(short, long, default_value = "")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check proxy status
    Status,
    /// List routes with their counters
    Routes,
    /// Show one route
    Route { id: String },
    /// Clone a route's configuration under a new id
    Duplicate { id: String },
    /// Delete a route
    Delete { id: String },
    /// Show recent probe results of a monitor
    Logs { id: String },
    /// Reschedule a monitor from the current catalog
    RestartMonitor { id: String },
    /// Validate a config file and/or a catalog file offline
    Check {
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        catalog: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let (method, path) = match cli.command {
        Commands::Check { config, catalog } => return check(config, catalog),
        Commands::Status => (Method::GET, "/admin/status".to_string()),
        Commands::Routes => (Method::GET, "/admin/routes".to_string()),
        Commands::Route { id } => (Method::GET, format!("/admin/routes/{id}")),
        Commands::Duplicate { id } => (Method::POST, format!("/admin/routes/{id}/duplicate")),
        Commands::Delete { id } => (Method::DELETE, format!("/admin/routes/{id}")),
        Commands::Logs { id } => (Method::GET, format!("/admin/monitors/{id}/logs")),
        Commands::RestartMonitor { id } => (Method::POST, format!("/admin/monitors/{id}/restart")),
    };

    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", cli.key))?,
    );

    let client = reqwest::Client::new();
    let res = client
        .request(method, format!("{}{}", cli.url.trim_end_matches('/'), path))
        .headers(headers)
        .send()
        .await?;
    print_response(res).await
}

fn check(
    config: Option<PathBuf>,
    catalog: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    if config.is_none() && catalog.is_none() {
        return Err("nothing to check: pass --config and/or --catalog".into());
    }
    if let Some(path) = config {
        load_config(&path)?;
        println!("{}: ok", path.display());
    }
    if let Some(path) = catalog {
        let catalog = load_catalog(&path)?;
        println!(
            "{}: ok ({} projects, {} routes, {} monitors)",
            path.display(),
            catalog.projects.len(),
            catalog.routes.len(),
            catalog.monitors.len()
        );
    }
    Ok(())
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: Admin API returned status {}", status);
        if let Ok(text) = res.text().await {
            if !text.is_empty() {
                eprintln!("Response: {}", text);
            }
        }
        std::process::exit(1);
    }
    if status == StatusCode::NO_CONTENT {
        println!("ok");
        return Ok(());
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
