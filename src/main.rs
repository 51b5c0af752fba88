use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};

use databrain::agent_core::{Attachment, EventSink, UiEvent};
use databrain::commands::{chat, files, mcp, session, settings};
use databrain::mcp_client::ServerConfig;
use databrain::AppState;

/// Terminal client for DataBrain: chat with hosted models that can call MCP tools.
#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Data directory holding the store, logs and gateway.yaml
    #[arg(long, env = "DATABRAIN_DATA_DIR", global = true)]
    data_dir: Option<PathBuf>,

    /// Model to use instead of the configured default
    #[arg(short, long, global = true)]
    model: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive chat. `/attach <path>` queues a file, `/quit` or Ctrl-C exits
    Chat {
        /// Continue an existing chat instead of starting a new one
        #[arg(long)]
        chat: Option<i64>,
    },
    /// One-shot question, nothing stored
    Ask { prompt: String },
    /// List chats, most recent first
    Chats,
    /// Print a chat's messages
    Show { chat_id: i64 },
    /// Rename a chat
    Rename { chat_id: i64, title: String },
    /// Delete a chat and its messages
    Rm { chat_id: i64 },
    /// Export a chat (json, markdown, txt, chatgpt)
    Export {
        chat_id: i64,
        #[arg(short, long, default_value = "json")]
        format: String,
        /// Write into this directory instead of stdout
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Import a transcript file
    Import { path: PathBuf },
    /// Show how a file would be attached
    Inspect { path: PathBuf },
    /// Manage MCP tool providers
    Mcp {
        #[command(subcommand)]
        action: McpCommands,
    },
    /// Read or change settings
    Settings {
        #[command(subcommand)]
        action: SettingsCommands,
    },
}

#[derive(Subcommand)]
enum McpCommands {
    /// Connect a provider and save it
    Add {
        name: String,
        command: String,
        /// Arguments passed to the provider command
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
        /// Environment variables as KEY=VALUE (repeatable)
        #[arg(long = "env", value_name = "KEY=VALUE")]
        env: Vec<String>,
    },
    /// Disconnect a provider and disable auto-connect
    Disable { name: String },
    /// Disconnect a provider and forget it
    Rm { name: String },
    /// Saved providers and their live state
    List,
    /// Tools offered by every live provider
    Tools,
    /// Call a tool directly
    Call {
        provider: String,
        tool: String,
        /// Arguments as a JSON object
        #[arg(default_value = "{}")]
        arguments: String,
    },
}

#[derive(Subcommand)]
enum SettingsCommands {
    /// Print all settings as JSON
    Get,
    /// Set one key; the value is parsed as JSON when possible
    Set { key: String, value: String },
}

/// Prints streamed text as it arrives.
struct StdoutSink;

impl EventSink for StdoutSink {
    fn emit(&self, event: UiEvent) {
        let mut out = std::io::stdout().lock();
        match event {
            UiEvent::StreamChunk(text) => {
                let _ = write!(out, "{text}");
            }
            UiEvent::StreamEnd => {
                let _ = writeln!(out);
            }
            UiEvent::StreamError(message) => {
                let _ = writeln!(out);
                eprintln!("error: {message}");
            }
        }
        let _ = out.flush();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let data_dir = cli.data_dir.clone().unwrap_or_else(databrain::data_dir);

    databrain::init_tracing(&data_dir);
    let state = AppState::open(&data_dir);

    let outcome = run(&state, cli).await;
    state.shutdown().await;
    outcome
}

async fn run(state: &AppState, cli: Cli) -> Result<()> {
    let model = cli.model;
    match cli.command {
        Commands::Chat { chat } => {
            connect_saved(state).await;
            repl(state, chat, model).await
        }
        Commands::Ask { prompt } => {
            let text = chat::ask_once(state, &prompt, model).await.map_err(|e| anyhow!(e))?;
            println!("{text}");
            Ok(())
        }
        Commands::Chats => {
            for summary in session::list_chats(state) {
                println!(
                    "{:>4}  {}  {:>3} msgs  {}",
                    summary.chat.id,
                    summary.chat.updated_at.format("%Y-%m-%d %H:%M"),
                    summary.message_count,
                    summary.chat.title
                );
            }
            Ok(())
        }
        Commands::Show { chat_id } => {
            for message in session::get_messages(state, chat_id).map_err(|e| anyhow!(e))? {
                println!("[{:?}] {}", message.role, message.content);
                for att in message.attachments() {
                    println!("    (attached {} {:?})", att.name, att.kind);
                }
            }
            Ok(())
        }
        Commands::Rename { chat_id, title } => {
            session::rename_chat(state, chat_id, &title).map_err(|e| anyhow!(e))
        }
        Commands::Rm { chat_id } => session::delete_chat(state, chat_id).map_err(|e| anyhow!(e)),
        Commands::Export {
            chat_id,
            format,
            out,
        } => {
            let exported = session::export_chat(state, chat_id, &format).map_err(|e| anyhow!(e))?;
            match out {
                Some(dir) => {
                    let path = dir.join(&exported.filename);
                    std::fs::write(&path, &exported.content)
                        .with_context(|| format!("failed to write {}", path.display()))?;
                    println!("{}", path.display());
                }
                None => println!("{}", exported.content),
            }
            Ok(())
        }
        Commands::Import { path } => {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            let filename = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let chat_id = session::import_chat(state, &filename, &content).map_err(|e| anyhow!(e))?;
            println!("imported as chat {chat_id}");
            Ok(())
        }
        Commands::Inspect { path } => {
            let attachment = files::upload_file(path).await.map_err(|e| anyhow!(e))?;
            println!("{}", serde_json::to_string_pretty(&attachment)?);
            Ok(())
        }
        Commands::Mcp { action } => run_mcp(state, action).await,
        Commands::Settings { action } => match action {
            SettingsCommands::Get => {
                println!("{}", serde_json::to_string_pretty(&settings::get_settings(state))?);
                Ok(())
            }
            SettingsCommands::Set { key, value } => {
                settings::set_setting(state, &key, &value).map_err(|e| anyhow!(e))
            }
        },
    }
}

async fn run_mcp(state: &AppState, action: McpCommands) -> Result<()> {
    match action {
        McpCommands::Add {
            name,
            command,
            args,
            env,
        } => {
            let config = ServerConfig {
                command,
                args,
                env: parse_env_pairs(&env)?,
                enabled: None,
            };
            let info = mcp::connect_server(state, &name, config)
                .await
                .map_err(|e| anyhow!(e))?;
            println!(
                "connected {} ({} tools, {} resources)",
                info.name, info.tool_count, info.resource_count
            );
            Ok(())
        }
        McpCommands::Disable { name } => mcp::disconnect_server(state, &name).await.map_err(|e| anyhow!(e)),
        McpCommands::Rm { name } => mcp::remove_server(state, &name).await.map_err(|e| anyhow!(e)),
        McpCommands::List => {
            connect_saved(state).await;
            let live = mcp::list_servers(state).await;
            for (name, config) in mcp::saved_servers(&settings::get_settings(state)) {
                let status = match live.iter().find(|info| info.name == name) {
                    Some(info) => format!("connected, {} tools", info.tool_count),
                    None if config.enabled == Some(false) => "disabled".to_string(),
                    None => "not connected".to_string(),
                };
                println!("{name:<16} {status:<24} {} {}", config.command, config.args.join(" "));
            }
            Ok(())
        }
        McpCommands::Tools => {
            connect_saved(state).await;
            for tool in mcp::list_tools(state).await {
                println!(
                    "{:<40} {}",
                    tool.fully_qualified_name,
                    tool.description.as_deref().unwrap_or("")
                );
            }
            Ok(())
        }
        McpCommands::Call {
            provider,
            tool,
            arguments,
        } => {
            connect_saved(state).await;
            let arguments: serde_json::Value =
                serde_json::from_str(&arguments).context("arguments must be JSON")?;
            let result = mcp::call_tool(state, &provider, &tool, arguments)
                .await
                .map_err(|e| anyhow!(e))?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
    }
}

async fn connect_saved(state: &AppState) {
    for (name, error) in mcp::connect_saved_servers(state).await {
        eprintln!("warning: MCP server {name} failed to start: {error}");
    }
}

async fn repl(state: &AppState, chat_id: Option<i64>, model: Option<String>) -> Result<()> {
    let chat_id = match chat_id {
        Some(id) => session::get_chat(state, id).map_err(|e| anyhow!(e))?.id,
        None => session::create_chat(state, None),
    };
    println!("chat {chat_id}. /attach <path> to add a file, /quit to exit.");

    let mut pending: Vec<Attachment> = Vec::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                println!();
                None
            }
        };
        let Some(line) = line else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "/quit" {
            break;
        }
        if let Some(path) = line.strip_prefix("/attach ") {
            match files::upload_file(path.trim()).await {
                Ok(att) => {
                    match (&att.error, &att.message) {
                        (Some(err), _) => println!("attached {} ({err})", att.name),
                        (None, Some(note)) => println!("attached {} ({note})", att.name),
                        (None, None) => println!("attached {}", att.name),
                    }
                    pending.push(att);
                }
                Err(e) => eprintln!("error: {e}"),
            }
            continue;
        }

        let attachments = (!pending.is_empty()).then(|| std::mem::take(&mut pending));
        let turn = chat::send_turn(state, chat_id, line, attachments, model.clone(), &StdoutSink);
        tokio::select! {
            // Errors were already reported through the sink
            _ = turn => {}
            _ = tokio::signal::ctrl_c() => {
                println!();
                break;
            }
        }
    }
    Ok(())
}

fn parse_env_pairs(pairs: &[String]) -> Result<HashMap<String, String>> {
    pairs
        .iter()
        .map(|pair| match pair.split_once('=') {
            Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
            _ => bail!("invalid --env '{pair}', expected KEY=VALUE"),
        })
        .collect()
}
