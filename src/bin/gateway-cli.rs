use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Method, Url};
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "gateway-cli")]
#[command(about = "Management CLI for the traffic gateway", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8081")]
    url: String,

    #[arg(short, long, default_value = "CHANGE_ME_IN_PRODUCTION")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check gateway status
    Status,
    /// List endpoints with instance health and connections
    Endpoints,
    /// Attach an instance to an endpoint (id is "METHOD version path")
    AddInstance {
        endpoint: String,
        id: String,
        instance_url: String,
        #[arg(short, long, default_value_t = 1)]
        weight: u32,
    },
    /// Detach an instance from an endpoint
    RemoveInstance { endpoint: String, id: String },
    /// List stored circuit breakers
    Circuits,
    /// Reset a circuit breaker to CLOSED
    ResetCircuit { service: String },
    /// Show recent health probe results
    History {
        #[arg(short, long)]
        service: Option<String>,
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
}

/// Admin URL from path segments, each percent-encoded on its own.
fn admin_url(base: &str, segments: &[&str]) -> Result<Url, Box<dyn std::error::Error>> {
    let mut url = Url::parse(base)?;
    url.path_segments_mut()
        .map_err(|_| "admin url cannot be a base")?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", cli.key))?,
    );

    let (method, url, body) = match &cli.command {
        Commands::Status => (Method::GET, admin_url(&cli.url, &["admin", "status"])?, None),
        Commands::Endpoints => (Method::GET, admin_url(&cli.url, &["admin", "endpoints"])?, None),
        Commands::AddInstance {
            endpoint,
            id,
            instance_url,
            weight,
        } => (
            Method::POST,
            admin_url(&cli.url, &["admin", "endpoints", endpoint.as_str(), "instances"])?,
            Some(json!({ "id": id, "url": instance_url, "weight": weight })),
        ),
        Commands::RemoveInstance { endpoint, id } => (
            Method::DELETE,
            admin_url(&cli.url, &["admin", "endpoints", endpoint.as_str(), "instances", id.as_str()])?,
            None,
        ),
        Commands::Circuits => (
            Method::GET,
            admin_url(&cli.url, &["admin", "circuit-breakers"])?,
            None,
        ),
        Commands::ResetCircuit { service } => (
            Method::DELETE,
            admin_url(&cli.url, &["admin", "circuit-breakers", service.as_str()])?,
            None,
        ),
        Commands::History { service, limit } => {
            let mut url = admin_url(&cli.url, &["admin", "health-history"])?;
            url.query_pairs_mut().append_pair("limit", &limit.to_string());
            if let Some(service) = service {
                url.query_pairs_mut().append_pair("service", service);
            }
            (Method::GET, url, None)
        }
    };

    let mut request = client.request(method, url).headers(headers);
    if let Some(body) = body {
        request = request.json(&body);
    }
    print_response(request.send().await?).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: Admin API returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        return Ok(());
    }
    if status == reqwest::StatusCode::NO_CONTENT {
        println!("OK");
        return Ok(());
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
