//! # toolmesh CLI Entry Point
//!
//! ## Usage
//!
//! ```bash
//! # Run the coordinator
//! toolmesh serve -c /etc/toolmesh/toolmesh.toml
//!
//! # Same, with the path from the environment and a different port
//! TOOLMESH_CONFIG=/etc/toolmesh/toolmesh.toml toolmesh serve -b 127.0.0.1:9090
//!
//! # Make one tool call (raw JSON envelope on stdout)
//! toolmesh call http://127.0.0.1:8080 store_memory -a '{"text": "buy milk"}'
//!
//! # Backend status, for piping into jq
//! toolmesh status http://127.0.0.1:8080 | jq '.backends[] | {name, status}'
//!
//! # Validate a config file
//! toolmesh check-config -c toolmesh.toml
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use argh::FromArgs;
use toolmesh_cli::{load_config, resolve_config_path, validate_http_url};
use toolmesh_client::GatewayClient;
use toolmesh_common::config::CONFIG_ENV_VAR;
use toolmesh_common::ToolCallRequest;
use toolmesh_gateway::{Gateway, HttpServer};

#[derive(FromArgs)]
/// toolmesh - tool-call coordinator
struct Cli {
    #[argh(subcommand)]
    command: Commands,
}

#[derive(FromArgs)]
#[argh(subcommand)]
enum Commands {
    Serve(ServeArgs),
    Call(CallArgs),
    Status(StatusArgs),
    CheckConfig(CheckConfigArgs),
}

/// Arguments for running the coordinator.
///
/// ```bash
/// toolmesh serve -c toolmesh.toml -b 0.0.0.0:8080 --disable-health-check
/// ```
#[derive(FromArgs)]
#[argh(subcommand, name = "serve")]
/// run the toolmesh coordinator
struct ServeArgs {
    /// path to the TOML config file
    ///
    /// Falls back to the TOOLMESH_CONFIG environment variable.
    #[argh(option, short = 'c')]
    config: Option<String>,

    /// address to bind the HTTP server to, overriding `server.bind`
    #[argh(option, short = 'b')]
    bind: Option<String>,

    /// disable background health checking
    ///
    /// Every backend stays `unknown` and is always tried.
    #[argh(switch, long = "disable-health-check")]
    disable_health_check: bool,
}

/// Arguments for a single tool call.
///
/// Prints the response envelope as raw JSON to stdout and exits non-zero
/// when the call failed.
#[derive(FromArgs)]
#[argh(subcommand, name = "call")]
/// call a tool through a coordinator
struct CallArgs {
    /// coordinator address, e.g. http://127.0.0.1:8080
    #[argh(positional)]
    gateway: String,

    /// tool name
    #[argh(positional)]
    tool: String,

    /// JSON object with the tool arguments, defaults to {}
    #[argh(option, short = 'a', long = "args", default = "\"{}\".into()")]
    args: String,

    /// bearer token
    #[argh(option, short = 't')]
    token: Option<String>,

    /// request id to send instead of a generated one
    #[argh(option, long = "request-id")]
    request_id: Option<String>,
}

#[derive(FromArgs)]
#[argh(subcommand, name = "status")]
/// print backend status from a coordinator
struct StatusArgs {
    /// coordinator address, e.g. http://127.0.0.1:8080
    #[argh(positional)]
    gateway: String,
}

#[derive(FromArgs)]
#[argh(subcommand, name = "check-config")]
/// validate a config file and print the routing table
struct CheckConfigArgs {
    /// path to the TOML config file
    ///
    /// Falls back to the TOOLMESH_CONFIG environment variable.
    #[argh(option, short = 'c')]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli: Cli = argh::from_env();

    // call and status write JSON to stdout for piping; keep logs out of it.
    if !matches!(cli.command, Commands::Call(_) | Commands::Status(_)) {
        let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    match cli.command {
        Commands::Serve(args) => run_serve(args).await,
        Commands::Call(args) => run_call(args).await,
        Commands::Status(args) => run_status(args).await,
        Commands::CheckConfig(args) => run_check_config(args),
    }
}

async fn run_serve(args: ServeArgs) -> Result<()> {
    let path = resolve_config_path(args.config, std::env::var(CONFIG_ENV_VAR).ok())?;
    let config = load_config(&path, args.bind, args.disable_health_check)?;

    let addr: SocketAddr = config
        .server
        .bind
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid bind address {}: {}", config.server.bind, e))?;

    tracing::info!("Starting toolmesh {}", env!("CARGO_PKG_VERSION"));
    let gateway = Gateway::new(config).await?;
    HttpServer::new(Arc::new(gateway)).run(addr).await?;
    Ok(())
}

async fn run_call(args: CallArgs) -> Result<()> {
    validate_http_url(&args.gateway)?;

    let arguments: serde_json::Value = serde_json::from_str(&args.args)
        .map_err(|e| anyhow::anyhow!("Invalid JSON in args: {}", e))?;
    if !arguments.is_object() {
        anyhow::bail!("Tool arguments must be a JSON object");
    }

    let mut request = ToolCallRequest::new(args.tool, arguments);
    if let Some(id) = args.request_id {
        request = request.with_request_id(id);
    }

    let mut client = GatewayClient::new(args.gateway)?;
    if let Some(token) = args.token {
        client = client.with_token(token);
    }
    let envelope = client.call(&request).await?;

    println!("{}", serde_json::to_string(&envelope)?);

    match envelope.error {
        Some(error) if !envelope.success => {
            anyhow::bail!("{}: {}", error.code, error.message)
        }
        _ => Ok(()),
    }
}

async fn run_status(args: StatusArgs) -> Result<()> {
    validate_http_url(&args.gateway)?;
    let status = GatewayClient::new(args.gateway)?.status().await?;
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}

fn run_check_config(args: CheckConfigArgs) -> Result<()> {
    let path = resolve_config_path(args.config, std::env::var(CONFIG_ENV_VAR).ok())?;
    let config = load_config(&path, None, false)?;
    let registry = toolmesh_gateway::ServiceRegistry::from_config(&config)?;

    println!(
        "{}: {} backends, {} tools",
        path.display(),
        registry.backend_count(),
        registry.tool_count()
    );
    for tool in registry.tools() {
        println!(
            "  {} -> {}{}",
            tool.name,
            tool.backend,
            if tool.idempotent { " (idempotent)" } else { "" }
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_serve() {
        let args: Cli = Cli::from_args(&["toolmesh"], &["serve", "-c", "toolmesh.toml"]).unwrap();
        match args.command {
            Commands::Serve(ServeArgs {
                config,
                bind,
                disable_health_check,
            }) => {
                assert_eq!(config.as_deref(), Some("toolmesh.toml"));
                assert!(bind.is_none());
                assert!(!disable_health_check);
            }
            _ => panic!("Expected Serve command"),
        }
    }

    #[test]
    fn test_cli_parse_serve_overrides() {
        let args: Cli = Cli::from_args(
            &["toolmesh"],
            &["serve", "--bind", "127.0.0.1:9090", "--disable-health-check"],
        )
        .unwrap();
        match args.command {
            Commands::Serve(ServeArgs {
                config,
                bind,
                disable_health_check,
            }) => {
                assert!(config.is_none());
                assert_eq!(bind.as_deref(), Some("127.0.0.1:9090"));
                assert!(disable_health_check);
            }
            _ => panic!("Expected Serve command"),
        }
    }

    #[test]
    fn test_cli_parse_call() {
        let args: Cli = Cli::from_args(
            &["toolmesh"],
            &[
                "call",
                "http://127.0.0.1:8080",
                "store_memory",
                "-a",
                "{\"text\":\"hi\"}",
                "-t",
                "s3cret",
            ],
        )
        .unwrap();
        match args.command {
            Commands::Call(CallArgs {
                gateway,
                tool,
                args,
                token,
                request_id,
            }) => {
                assert_eq!(gateway, "http://127.0.0.1:8080");
                assert_eq!(tool, "store_memory");
                assert_eq!(args, "{\"text\":\"hi\"}");
                assert_eq!(token.as_deref(), Some("s3cret"));
                assert!(request_id.is_none());
            }
            _ => panic!("Expected Call command"),
        }
    }

    #[test]
    fn test_cli_parse_call_defaults() {
        let args: Cli =
            Cli::from_args(&["toolmesh"], &["call", "http://127.0.0.1:8080", "git_status"]).unwrap();
        match args.command {
            Commands::Call(CallArgs { args, token, .. }) => {
                assert_eq!(args, "{}");
                assert!(token.is_none());
            }
            _ => panic!("Expected Call command"),
        }
    }

    #[test]
    fn test_cli_parse_status_and_check_config() {
        let args: Cli = Cli::from_args(&["toolmesh"], &["status", "http://127.0.0.1:8080"]).unwrap();
        assert!(matches!(args.command, Commands::Status(StatusArgs { gateway }) if gateway == "http://127.0.0.1:8080"));

        let args: Cli = Cli::from_args(&["toolmesh"], &["check-config", "-c", "a.toml"]).unwrap();
        assert!(matches!(args.command, Commands::CheckConfig(CheckConfigArgs { config: Some(c) }) if c == "a.toml"));
    }

    #[test]
    fn test_cli_call_requires_tool() {
        assert!(Cli::from_args(&["toolmesh"], &["call", "http://127.0.0.1:8080"]).is_err());
    }
}
