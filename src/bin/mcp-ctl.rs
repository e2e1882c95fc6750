use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::Value;

#[derive(Parser)]
#[command(name = "mcp-ctl")]
#[command(about = "Control CLI for the Bitbucket MCP server", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://127.0.0.1:3000")]
    url: String,

    /// Bearer token for protected routes
    #[arg(short, long, env = "MCP_TOKEN")]
    token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show upstream connectivity and degraded state
    Health,
    /// Ask the server to shut down gracefully
    Shutdown,
    /// List MCP tools
    Tools,
    /// Follow an SSE topic
    Tail {
        #[arg(default_value = "upstream")]
        topic: String,
    },
    /// Follow a newline-delimited JSON resource stream
    Stream { resource_id: String },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    let mut headers = HeaderMap::new();
    if let Some(token) = &cli.token {
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}"))?,
        );
    }

    match cli.command {
        Commands::Health => {
            let res = client.get(format!("{}/health", cli.url)).send().await?;
            print_response(res).await?;
        }
        Commands::Shutdown => {
            let res = client.post(format!("{}/shutdown", cli.url)).send().await?;
            print_response(res).await?;
        }
        Commands::Tools => {
            let res = client
                .post(format!("{}/mcp", cli.url))
                .headers(headers)
                .json(&serde_json::json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list"}))
                .send()
                .await?;
            print_response(res).await?;
        }
        Commands::Tail { topic } => {
            let res = client
                .get(format!("{}/transports/sse", cli.url))
                .query(&[("topic", topic)])
                .send()
                .await?;
            follow(res).await?;
        }
        Commands::Stream { resource_id } => {
            let res = client
                .get(format!("{}/transports/http-stream", cli.url))
                .query(&[("resourceId", resource_id)])
                .send()
                .await?;
            follow(res).await?;
        }
    }

    Ok(())
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: server returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        return Ok(());
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}

/// Print chunks as they arrive until the server closes the stream.
async fn follow(mut res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    if !res.status().is_success() {
        return print_response(res).await;
    }
    while let Some(chunk) = res.chunk().await? {
        print!("{}", String::from_utf8_lossy(&chunk));
    }
    Ok(())
}
