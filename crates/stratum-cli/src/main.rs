//! `stratum` command line client
//!
//! Runs single calls through the full failover stack, and inspects the
//! topology, credentials and node health described by a client
//! configuration file.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use stratum_client::{
    CallRequest, ClientConfig, Method, StratumClient, Transport, init_logging,
};
use tracing::debug;

#[derive(Parser, Debug)]
#[command(name = "stratum", version, about = "Call Stratum services across datacenters")]
struct Cli {
    /// Client configuration file (TOML, YAML or JSON)
    #[arg(short = 'c', long = "config", env = "STRATUM_CONFIG", default_value = "conf/stratum.toml")]
    config: PathBuf,
    #[arg(short = 't', long = "transport", value_enum, default_value_t = TransportKind::Http)]
    transport: TransportKind,
    /// Used when RUST_LOG is not set
    #[arg(long = "log-level", default_value = "warn")]
    log_level: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum TransportKind {
    Http,
    Rpc,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Command {
    /// Perform one logical call and print the response body
    Call {
        /// HTTP verb, or the RPC method name with `--transport rpc`
        method: String,
        /// Path (HTTP) or call target (RPC)
        target: String,
        /// Request body
        #[arg(short = 'd', long = "data")]
        data: Option<String>,
        /// Treat a 404 as "not found" instead of an error
        #[arg(long = "optional")]
        optional: bool,
    },
    /// Print datacenter and node availability
    Snapshot,
    /// Print the current datacenter's bearer token
    Token,
    /// Probe every node's health endpoint once
    Health,
}

fn parse_method(name: &str, transport: TransportKind) -> anyhow::Result<Method> {
    if transport == TransportKind::Rpc {
        return Ok(Method::Rpc(name.to_string()));
    }
    Ok(match name.to_ascii_uppercase().as_str() {
        "GET" => Method::Get,
        "POST" => Method::Post,
        "PUT" => Method::Put,
        "PATCH" => Method::Patch,
        "DELETE" => Method::Delete,
        "HEAD" => Method::Head,
        other => anyhow::bail!("unsupported http method: {}", other),
    })
}

async fn run<T: Transport>(
    client: StratumClient<T>,
    transport: TransportKind,
    command: Command,
) -> anyhow::Result<()> {
    match command {
        Command::Call {
            method,
            target,
            data,
            optional,
        } => {
            let mut request =
                CallRequest::new(parse_method(&method, transport)?, target).mandatory(!optional);
            if let Some(data) = data {
                request = request.with_body(data);
            }

            match client.execute(&request).await? {
                Some(response) => {
                    debug!(
                        status = response.status,
                        node = %response.node,
                        datacenter = %response.datacenter,
                        "Call succeeded"
                    );
                    println!("{}", response.text());
                }
                None => eprintln!("not found"),
            }
        }
        Command::Snapshot => {
            let snapshot = client.snapshot();
            for dc in &snapshot.datacenters {
                let marker = if dc.is_current { "*" } else { " " };
                println!(
                    "{} {} {}/{} nodes available",
                    marker, dc.name, dc.available_nodes, dc.total_nodes
                );
                if let Some(datacenter) = client.topology().datacenter(&dc.name) {
                    for node in datacenter.nodes() {
                        let state = if node.is_available() { "up" } else { "down" };
                        println!("    {} {} {}", node.id(), node.endpoint(), state);
                    }
                }
            }
        }
        Command::Token => {
            println!("{}", client.lookup_token().await?);
        }
        Command::Health => {
            let report = client.check_health().await?;
            let summary = serde_json::json!({
                "checked": report.checked,
                "healthy": report.healthy,
                "restored": report.restored,
                "removed": report.removed,
            });
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    let config = ClientConfig::load(&cli.config)
        .with_context(|| format!("failed to load configuration from {}", cli.config.display()))?;

    match cli.transport {
        TransportKind::Http => run(StratumClient::http(&config)?, cli.transport, cli.command).await,
        TransportKind::Rpc => run(StratumClient::rpc(&config)?, cli.transport, cli.command).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_call() {
        let cli = Cli::try_parse_from([
            "stratum", "-c", "dc.toml", "call", "post", "/v1/items", "-d", "{}", "--optional",
        ])
        .unwrap();
        assert_eq!(cli.config, PathBuf::from("dc.toml"));
        assert_eq!(cli.transport, TransportKind::Http);
        assert_eq!(
            cli.command,
            Command::Call {
                method: "post".to_string(),
                target: "/v1/items".to_string(),
                data: Some("{}".to_string()),
                optional: true,
            }
        );
    }

    #[test]
    fn test_parse_transport() {
        let cli = Cli::try_parse_from(["stratum", "--transport", "rpc", "snapshot"]).unwrap();
        assert_eq!(cli.transport, TransportKind::Rpc);
        assert_eq!(cli.command, Command::Snapshot);

        assert!(Cli::try_parse_from(["stratum", "--transport", "udp", "token"]).is_err());
    }

    #[test]
    fn test_parse_method() {
        assert_eq!(parse_method("get", TransportKind::Http).unwrap(), Method::Get);
        assert_eq!(parse_method("DELETE", TransportKind::Http).unwrap(), Method::Delete);
        assert!(parse_method("QueryDocs", TransportKind::Http).is_err());
        assert_eq!(
            parse_method("QueryDocs", TransportKind::Rpc).unwrap(),
            Method::Rpc("QueryDocs".to_string())
        );
    }
}
