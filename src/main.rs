//! LurchHome - Smart butler for Home Assistant
//!
//! Talks to Home Assistant over its MCP server integration and its WebSocket
//! event API, and answers household members from the terminal.

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use lurchhome::{
    brain::{AgentStep, Lurch, OpenAiCompatibleModel},
    bridge::McpBridge,
    config::LurchConfig,
    events::{ChannelSink, EventListener, JsonlEventSink},
    storage::UsageStore,
    tools::ToolBox,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::task::{JoinError, JoinHandle};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

#[derive(Parser)]
#[command(name = "lurchhome")]
#[command(version)]
#[command(about = "Smart butler for Home Assistant")]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "LURCH_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Logging level (error, warning, info, debug, trace)
    #[arg(long, default_value = "warning", global = true)]
    log: String,

    /// Enable verbose logging (same as --log debug)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Talk to the butler (default)
    Chat,

    /// List the tools exposed by Home Assistant
    Tools,

    /// Print Home Assistant events as they arrive
    Watch,

    /// Show configuration
    Config {
        /// Show default configuration
        #[arg(long)]
        default: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose {
        "debug".to_string()
    } else {
        level_directive(&cli.log)
    };
    // stdout belongs to the conversation
    let fmt_layer = if cli.log_json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .boxed()
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("lurchhome={}", log_level).into()),
        )
        .with(fmt_layer)
        .init();

    let config = LurchConfig::load(cli.config.as_deref())?;

    match cli.command.unwrap_or(Commands::Chat) {
        Commands::Chat => run_chat(config).await?,
        Commands::Tools => list_tools(config).await?,
        Commands::Watch => watch_events(config).await?,
        Commands::Config { default } => {
            show_config(if default { None } else { Some(&config) })?;
        }
    }

    Ok(())
}

/// Accept the level names people type (`WARNING`, `critical`) as filter directives
fn level_directive(level: &str) -> String {
    match level.to_ascii_lowercase().as_str() {
        "warning" => "warn".to_string(),
        "critical" | "fatal" => "error".to_string(),
        other => other.to_string(),
    }
}

async fn run_chat(config: LurchConfig) -> Result<()> {
    config.validate()?;
    print_banner();

    let bridge = Arc::new(McpBridge::from_config(&config.home_assistant)?);
    let sink = Arc::new(JsonlEventSink::new(&config.storage.base_dir).await?);
    let listener = EventListener::from_config(&config.home_assistant, sink)?;
    let usage = Arc::new(UsageStore::new(&config.storage.base_dir).await?);

    let mut bridge_task = spawn_bridge(&bridge);
    let mut listener_task = tokio::spawn(async move { listener.listen().await });

    let result = tokio::select! {
        exit = &mut bridge_task => Err(task_exit("MCP bridge", exit)),
        exit = &mut listener_task => Err(task_exit("Event listener", exit)),
        result = chat_loop(&config, bridge.clone(), usage) => result,
        _ = tokio::signal::ctrl_c() => Ok(()),
    };

    tracing::info!("Shutting down...");
    let _ = bridge.shutdown();
    bridge_task.abort();
    listener_task.abort();

    result
}

async fn chat_loop(config: &LurchConfig, bridge: Arc<McpBridge>, usage: Arc<UsageStore>) -> Result<()> {
    let tools = ToolBox::build(bridge.as_ref(), bridge.clone()).await?;
    let model = Arc::new(OpenAiCompatibleModel::from_config(&config.model));
    let lurch = Lurch::new(model, tools)
        .with_live_status(bridge.clone(), config.home_assistant.live_status_tool.clone())
        .with_usage_store(usage)
        .with_max_steps(config.model.max_steps);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        stdout.write_all(b"$ ").await?;
        stdout.flush().await?;

        // EOF ends the session like "bye"
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let input = line.trim();
        if input.eq_ignore_ascii_case("bye") {
            break;
        }
        if input.is_empty() {
            continue;
        }

        let turn = lurch
            .talk_with(input, |step| match step {
                AgentStep::Working => println!("| working"),
                AgentStep::Reply(text) => println!("> {}", text),
            })
            .await;
        if let Err(e) = turn {
            tracing::error!("Turn failed: {}", e);
            println!("! {}", e);
        }
    }

    Ok(())
}

async fn list_tools(config: LurchConfig) -> Result<()> {
    config.validate()?;

    let bridge = Arc::new(McpBridge::from_config(&config.home_assistant)?);
    let mut bridge_task = spawn_bridge(&bridge);

    let result = tokio::select! {
        exit = &mut bridge_task => Err(task_exit("MCP bridge", exit)),
        tools = bridge.get_tool_list() => tools.map_err(anyhow::Error::from),
    };

    let _ = bridge.shutdown();
    bridge_task.abort();

    for tool in result? {
        println!("{}", tool.name);
        if !tool.description.is_empty() {
            println!("    {}", tool.description.trim());
        }
    }
    Ok(())
}

async fn watch_events(config: LurchConfig) -> Result<()> {
    config.validate()?;

    let (tx, mut rx) = tokio::sync::mpsc::channel(256);
    let listener = EventListener::from_config(&config.home_assistant, Arc::new(ChannelSink::new(tx)))?;

    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{}", line),
                Err(e) => tracing::warn!("Failed to encode event: {}", e),
            }
        }
    });

    let result = tokio::select! {
        result = listener.listen() => result.map_err(anyhow::Error::from),
        _ = tokio::signal::ctrl_c() => Ok(()),
    };

    printer.abort();
    result
}

fn spawn_bridge(bridge: &Arc<McpBridge>) -> JoinHandle<lurchhome::Result<()>> {
    let bridge = Arc::clone(bridge);
    tokio::spawn(async move { bridge.connect_and_run().await })
}

/// A connector task never ends on its own while the session is alive
fn task_exit(name: &str, exit: std::result::Result<lurchhome::Result<()>, JoinError>) -> anyhow::Error {
    match exit {
        Ok(Ok(())) => anyhow!("{} stopped", name),
        Ok(Err(e)) => anyhow!("{} failed: {}", name, e),
        Err(e) => anyhow!("{} task aborted: {}", name, e),
    }
}

fn show_config(config: Option<&LurchConfig>) -> Result<()> {
    let mut config = config.cloned().unwrap_or_default();
    if !config.home_assistant.api_token.is_empty() {
        config.home_assistant.api_token = "********".to_string();
    }
    let toml = toml::to_string_pretty(&config)?;
    println!("{}", toml);
    Ok(())
}

fn print_banner() {
    println!();
    println!("  L   U   U RRRR   CCCC H  H H  H  OOO  M   M EEEE");
    println!("  L   U   U R   R C     H  H H  H O   O MM MM E   ");
    println!("  L   U   U RRRR  C     HHHH HHHH O   O M M M EEE ");
    println!("  L   U   U R R   C     H  H H  H O   O M   M E   ");
    println!("  LLL  UUU  R  R   CCCC H  H H  H  OOO  M   M EEEE");
    println!();
    println!("  LurchHome {}  Smart butler for Home Assistant", env!("CARGO_PKG_VERSION"));
    println!("  Type \"bye\" to leave.");
    println!();
}
