use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde_json::Value;

use sxg_packager::signer::{decode, DecodedExchange};

#[derive(Parser)]
#[command(name = "sxg-cli")]
#[command(about = "Diagnostics CLI for the signed exchange packager", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8080")]
    url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show signing mode and certificate health
    Health,
    /// Ask the packager to sign a URL and summarize the exchange
    Sign {
        /// Absolute URL to sign
        target: String,
    },
    /// Summarize a signed exchange stored on disk
    Inspect {
        /// Path to an application/signed-exchange;v=b3 file
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    match cli.command {
        Commands::Health => {
            let res = client.get(format!("{}/healthz", cli.url)).send().await?;
            let status = res.status();
            let body: Value = res.json().await?;
            println!("HTTP {}", status);
            println!("{}", serde_json::to_string_pretty(&body)?);
        }
        Commands::Sign { target } => {
            let res = client
                .get(format!("{}/priv/doc/{}", cli.url, target))
                .send()
                .await?;
            let status = res.status();
            let mode = res
                .headers()
                .get("x-sxg-signing-mode")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let body = res.bytes().await?;
            if !status.is_success() {
                eprintln!("Error: packager returned status {}", status);
                eprintln!("{}", String::from_utf8_lossy(&body));
                std::process::exit(1);
            }
            if let Some(mode) = mode {
                println!("WARNING: signed in {} mode", mode);
            }
            print_exchange(&decode(&body)?);
        }
        Commands::Inspect { file } => {
            let bytes = std::fs::read(&file)?;
            print_exchange(&decode(&bytes)?);
        }
    }

    Ok(())
}

fn print_exchange(exchange: &DecodedExchange) {
    let params = &exchange.signature.params;
    println!("URL:          {}", exchange.url);
    println!("cert-url:     {}", params.cert_url);
    println!("validity-url: {}", params.validity_url);
    println!("date:         {}", params.date);
    println!("expires:      {} (+{}s)", params.expires, params.expires.saturating_sub(params.date));
    println!("headers:");
    for (name, value) in &exchange.headers {
        println!("  {}: {}", name, value);
    }
    match exchange.body() {
        Ok(body) => println!("payload:      {} bytes, integrity ok", body.len()),
        Err(e) => println!("payload:      integrity check failed: {}", e),
    }
}
