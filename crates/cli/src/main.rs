use std::io::Write;

use clap::{Parser, Subcommand};
use serde::Serialize;

#[derive(Parser)]
#[command(name = "attachvaultctl")]
#[command(about = "attachvault operator CLI", long_about = None)]
struct Cli {
    /// Base URL of a running attachvaultd instance.
    #[arg(long, env = "ATTACHVAULT_URL", default_value = "http://127.0.0.1:3000")]
    url: String,

    /// Shared secret, if the server was started with API_SECRET set.
    #[arg(long, env = "API_SECRET")]
    secret: Option<String>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Query /api/system/health.
    Health,
    /// Query /api/system/stats.
    Stats,
    /// Trigger a metadata-index backup via /api/system/backup.
    Backup,
}

#[derive(Debug, Serialize)]
struct CliError {
    code: &'static str,
    message: String,
}

impl CliError {
    fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let code = match run(cli).await {
        Ok(()) => 0,
        Err(e) => {
            emit_error(&e);
            1
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let path = match cli.cmd {
        Command::Health => "system/health",
        Command::Stats => "system/stats",
        Command::Backup => "system/backup",
    };
    let method = match cli.cmd {
        Command::Backup => reqwest::Method::POST,
        _ => reqwest::Method::GET,
    };

    let client = reqwest::Client::new();
    let mut req = client.request(method, format!("{}/api/{path}", cli.url.trim_end_matches('/')));
    if let Some(secret) = &cli.secret {
        req = req.bearer_auth(secret);
    }

    let res = req
        .send()
        .await
        .map_err(|e| CliError::new("request.failed", e.to_string()))?;
    let status = res.status();
    let body: serde_json::Value = res
        .json()
        .await
        .map_err(|e| CliError::new("response.invalid", e.to_string()))?;

    if !status.is_success() {
        let message = body
            .get("error")
            .and_then(|v| v.as_str())
            .unwrap_or("request failed")
            .to_string();
        return Err(CliError::new("server.error", message));
    }

    println!("{}", serde_json::to_string_pretty(&body).unwrap());
    Ok(())
}

fn emit_error(e: &CliError) {
    let json = serde_json::to_string(e)
        .unwrap_or_else(|_| "{\"code\":\"unknown\",\"message\":\"json encode failed\"}".to_string());
    let _ = writeln!(std::io::stderr(), "{json}");
}
