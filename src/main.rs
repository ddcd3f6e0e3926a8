//! `mcp-hub`: manage a registry of MCP servers and call into them.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;

use mcp_hub::mcp_client::config::default_config_path;
use mcp_hub::mcp_client::{McpClient, ServerConfig, ServerStatusInfo};

#[derive(Debug, Parser)]
#[command(name = "mcp-hub", version, about = "Connect to MCP servers and route calls across them")]
struct Cli {
    /// Server registry file (.json, .yaml or .yml)
    #[arg(long, env = "MCP_HUB_CONFIG")]
    config: Option<PathBuf>,

    /// Write logs to this file (rotated on start) instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,

    /// Per-request timeout in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List configured servers and their status
    Servers {
        /// Connect to each enabled server and report what it says about itself
        #[arg(long)]
        check: bool,
    },
    /// Register a server
    Add {
        name: String,
        /// Executable for a stdio server
        #[arg(long, conflicts_with = "http")]
        command: Option<String>,
        /// Argument passed to the executable (repeatable)
        #[arg(long = "arg", allow_hyphen_values = true)]
        args: Vec<String>,
        /// Environment variable KEY=VALUE (repeatable)
        #[arg(long = "env", value_parser = parse_env_pair)]
        env: Vec<(String, String)>,
        /// Endpoint of an HTTP server
        #[arg(long)]
        http: Option<String>,
        /// Register without enabling
        #[arg(long)]
        disabled: bool,
    },
    /// Remove a server
    Remove { name: String },
    /// Enable a server
    Enable { name: String },
    /// Disable a server
    Disable { name: String },
    /// Print the OpenAI tool definitions of every enabled server
    Tools,
    /// List resources of every enabled server
    Resources,
    /// List prompts of every enabled server
    Prompts,
    /// Call a tool (raw or `server__tool` name)
    Call {
        tool: String,
        /// Arguments as a JSON object
        #[arg(long, default_value = "{}")]
        args: String,
    },
    /// Read a resource
    Read { uri: String },
    /// Render a prompt
    Prompt {
        name: String,
        /// Arguments as a JSON object
        #[arg(long, default_value = "{}")]
        args: String,
    },
}

fn parse_env_pair(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{raw}'"))?;
    if key.is_empty() {
        return Err(format!("empty key in '{raw}'"));
    }
    Ok((key.to_string(), value.to_string()))
}

fn parse_json_args(raw: &str) -> Result<Value> {
    let value: Value = serde_json::from_str(raw).context("--args is not valid JSON")?;
    if !value.is_object() {
        bail!("--args must be a JSON object");
    }
    Ok(value)
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    mcp_hub::init_tracing(cli.log_file.as_deref(), cli.log_json)
        .context("failed to open log file")?;

    let config_path = cli.config.unwrap_or_else(default_config_path);
    let mut client = McpClient::new();
    client.set_request_timeout(cli.timeout_ms.map(Duration::from_millis));
    client.set_status_sink(|name, status| tracing::info!(server = name, %status, "status"));

    if config_path.exists() {
        client.load_config(&config_path)?;
    } else {
        tracing::debug!(path = %config_path.display(), "no config file yet");
    }

    match cli.command {
        Command::Servers { check } => {
            if check {
                connect(&mut client).await;
            }
            for status in client.server_statuses() {
                let mut line = format!(
                    "{:<20} {:<6} {:<8}",
                    status.name,
                    status.transport.to_string(),
                    if status.enabled { "enabled" } else { "disabled" }
                );
                if check {
                    line.push_str(&health_summary(&status));
                }
                println!("{}", line.trim_end());
            }
        }
        Command::Add {
            name,
            command,
            args,
            env,
            http,
            disabled,
        } => {
            let mut config = match (command, http) {
                (_, Some(url)) => ServerConfig::http(&name, &url),
                (Some(command), None) => {
                    let args: Vec<&str> = args.iter().map(String::as_str).collect();
                    ServerConfig::stdio(&name, &command, &args)
                }
                (None, None) => bail!("either --command or --http is required"),
            };
            config.env.extend(env);
            config.enabled = !disabled;
            client.add_server(config)?;
            client.save_config(&config_path)?;
            println!("added {name}");
        }
        Command::Remove { name } => {
            client.remove_server(&name)?;
            client.save_config(&config_path)?;
            println!("removed {name}");
        }
        Command::Enable { name } => {
            client.enable_server(&name)?;
            client.save_config(&config_path)?;
            println!("enabled {name}");
        }
        Command::Disable { name } => {
            client.disable_server(&name)?;
            client.save_config(&config_path)?;
            println!("disabled {name}");
        }
        Command::Tools => {
            connect(&mut client).await;
            print_json(&client.generate_tool_definitions())?;
        }
        Command::Resources => {
            connect(&mut client).await;
            print_json(&client.all_resources().await)?;
        }
        Command::Prompts => {
            connect(&mut client).await;
            print_json(&client.all_prompts().await)?;
        }
        Command::Call { tool, args } => {
            let arguments = parse_json_args(&args)?;
            connect(&mut client).await;
            let result = client.call_tool(&tool, arguments).await;
            print_json(&result)?;
            if result.is_error {
                client.disconnect_all();
                std::process::exit(1);
            }
        }
        Command::Read { uri } => {
            connect(&mut client).await;
            println!("{}", client.read_resource(&uri).await?);
        }
        Command::Prompt { name, args } => {
            let arguments = parse_json_args(&args)?;
            connect(&mut client).await;
            println!("{}", client.get_prompt(&name, arguments).await?);
        }
    }

    client.disconnect_all();
    Ok(())
}

fn health_summary(status: &ServerStatusInfo) -> String {
    if !status.connected {
        return " unreachable".to_string();
    }
    let identity = status
        .server_info
        .as_ref()
        .map(|info| {
            let name = info.get("name").and_then(Value::as_str).unwrap_or("?");
            match info.get("version").and_then(Value::as_str) {
                Some(version) => format!("{name} {version}"),
                None => name.to_string(),
            }
        })
        .unwrap_or_else(|| "-".to_string());
    format!(" {} tools, {identity}", status.tool_count)
}

/// Connect every enabled server; failures are logged and skipped.
async fn connect(client: &mut McpClient) {
    for (name, err) in client.connect_all().await {
        tracing::warn!(server = %name, error = %err, "server unavailable");
    }
}
