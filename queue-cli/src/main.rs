//! Thin HTTP client over the queue management API: every subcommand is
//! a single request against `/api/v1/queue/*`, printing the response
//! envelope as JSON. No direct backend access - this binary never
//! touches a `QueueBackend` itself.

use clap::{Parser, Subcommand};
use serde_json::Value;

#[derive(Parser)]
#[command(name = "queue")]
#[command(about = "Command-line client for the queue management API")]
#[command(version)]
struct Cli {
    /// Base URL of the running management API, e.g. http://localhost:8080
    #[arg(long, env = "QUEUE_API_URL", default_value = "http://localhost:8080")]
    api_url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show queue stats: counts by status and by job type.
    Stats,

    /// Job operations.
    Jobs {
        #[command(subcommand)]
        command: JobsCommands,
    },

    /// Retry a failed job.
    Retry { job_id: String },

    /// Cancel a job.
    Cancel { job_id: String },

    /// Reset a non-terminal job back to pending.
    Reset { job_id: String },

    /// Pause the worker pool: no new jobs are dequeued.
    Pause,

    /// Resume the worker pool.
    Resume,

    /// Delete every terminal job in the given status.
    Clear {
        #[arg(long)]
        status: String,
    },
}

#[derive(Subcommand)]
enum JobsCommands {
    /// List jobs, optionally filtered.
    List {
        #[arg(long)]
        status: Option<String>,
        #[arg(long = "type")]
        job_type: Option<String>,
        #[arg(long)]
        limit: Option<u32>,
        #[arg(long)]
        offset: Option<u32>,
    },
    /// Get one job by id.
    Get { job_id: String },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let client = reqwest::Client::new();
    let base = format!("{}/api/v1/queue", cli.api_url.trim_end_matches('/'));

    let result = match cli.command {
        Commands::Stats => get(&client, &format!("{base}/stats")).await,
        Commands::Jobs { command } => match command {
            JobsCommands::List { status, job_type, limit, offset } => {
                let mut query = Vec::new();
                if let Some(s) = &status {
                    query.push(("status", s.clone()));
                }
                if let Some(t) = &job_type {
                    query.push(("type", t.clone()));
                }
                if let Some(l) = limit {
                    query.push(("limit", l.to_string()));
                }
                if let Some(o) = offset {
                    query.push(("offset", o.to_string()));
                }
                get_with_query(&client, &format!("{base}/jobs"), &query).await
            }
            JobsCommands::Get { job_id } => get(&client, &format!("{base}/jobs/{job_id}")).await,
        },
        Commands::Retry { job_id } => post(&client, &format!("{base}/jobs/{job_id}/retry")).await,
        Commands::Cancel { job_id } => post(&client, &format!("{base}/jobs/{job_id}/cancel")).await,
        Commands::Reset { job_id } => post(&client, &format!("{base}/jobs/{job_id}/reset")).await,
        Commands::Pause => post(&client, &format!("{base}/pause")).await,
        Commands::Resume => post(&client, &format!("{base}/resume")).await,
        Commands::Clear { status } => {
            post_with_query(&client, &format!("{base}/clear"), &[("status", status)]).await
        }
    };

    match result {
        Ok(body) => {
            let pretty = serde_json::to_string_pretty(&body).unwrap_or_else(|_| body.to_string());
            let is_success = body.get("success").and_then(Value::as_bool).unwrap_or(false);
            if is_success {
                println!("{pretty}");
                std::process::exit(0);
            } else {
                eprintln!("{pretty}");
                std::process::exit(2);
            }
        }
        Err(err) => {
            eprintln!("request failed: {err}");
            std::process::exit(1);
        }
    }
}

async fn get(client: &reqwest::Client, url: &str) -> anyhow::Result<Value> {
    get_with_query(client, url, &[]).await
}

async fn get_with_query(client: &reqwest::Client, url: &str, query: &[(&str, String)]) -> anyhow::Result<Value> {
    let response = client.get(url).query(query).send().await?;
    Ok(response.json::<Value>().await?)
}

async fn post(client: &reqwest::Client, url: &str) -> anyhow::Result<Value> {
    post_with_query(client, url, &[]).await
}

async fn post_with_query(client: &reqwest::Client, url: &str, query: &[(&str, String)]) -> anyhow::Result<Value> {
    let response = client.post(url).query(query).send().await?;
    Ok(response.json::<Value>().await?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_jobs_list_with_filters() {
        let cli = Cli::parse_from([
            "queue",
            "jobs",
            "list",
            "--status",
            "failed",
            "--type",
            "feed_fetch",
            "--limit",
            "10",
        ]);
        match cli.command {
            Commands::Jobs { command: JobsCommands::List { status, job_type, limit, .. } } => {
                assert_eq!(status.as_deref(), Some("failed"));
                assert_eq!(job_type.as_deref(), Some("feed_fetch"));
                assert_eq!(limit, Some(10));
            }
            _ => panic!("expected Jobs::List"),
        }
    }

    #[test]
    fn defaults_api_url_to_localhost() {
        let cli = Cli::parse_from(["queue", "stats"]);
        assert_eq!(cli.api_url, "http://localhost:8080");
    }
}
