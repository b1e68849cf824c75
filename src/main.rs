//! SNet realtime CLI - listens for chat messages and shows notifications.
//!
//! This is the main binary entry point. See the `snet_realtime` library
//! for the core functionality.

use std::io::Read;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mimalloc::MiMalloc;
use snet_realtime::notify::terminal::TerminalPlatform;
use snet_realtime::notify::NotificationPlatform;
use snet_realtime::{
    BackgroundDelivery, ChatEvent, ChatService, Config, ConnectionState, NotificationPresenter,
    Session, SharedToken,
};

/// Global allocator configured per M-MIMALLOC-APPS guideline.
/// mimalloc provides better multi-threaded performance than the system allocator.
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "snet")]
#[command(version = VERSION)]
#[command(about = "Realtime chat and notification client for SNet")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Stay connected and print incoming messages and notifications
    Listen {
        /// Treat the terminal as focused (notifications are suppressed)
        #[arg(long)]
        focused: bool,
        /// Ring the terminal bell on notifications
        #[arg(long)]
        bell: bool,
    },
    /// Send one chat message
    Send {
        /// Recipient user id
        #[arg(long, conflicts_with = "group", required_unless_present = "group")]
        to: Option<i64>,
        /// Target group id
        #[arg(long)]
        group: Option<i64>,
        /// Already uploaded file to attach
        #[arg(long)]
        file: Option<i64>,
        /// Message text
        content: String,
    },
    /// Present a background push payload (JSON argument, or `-` for stdin)
    Push {
        /// Push payload JSON
        payload: String,
    },
    /// Show the configuration
    Config {
        /// Write the current configuration to the config file
        #[arg(long)]
        init: bool,
    },
}

fn main() -> Result<()> {
    let environment = snet_realtime::env::Environment::current();
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(environment.default_log_filter()),
    )
    .format_timestamp_millis()
    .init();

    let cli = Cli::parse();
    let config = Config::load()?;
    log::debug!("snet v{} ({})", VERSION, environment);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    match cli.command {
        Commands::Listen { focused, bell } => runtime.block_on(listen(config, focused, bell)),
        Commands::Send {
            to,
            group,
            file,
            content,
        } => runtime.block_on(send(config, to, group, file, &content)),
        Commands::Push { payload } => runtime.block_on(async { push(&config, &payload) }),
        Commands::Config { init } => show_config(&config, init),
    }
}

fn session_for(config: &Config) -> Result<Session> {
    if !config.has_token() {
        anyhow::bail!("No token. Set SNET_TOKEN to a valid access token.");
    }
    let token = SharedToken::new(Some(config.token.clone()));
    Ok(Session::new(config.session_config(), Arc::new(token)))
}

async fn listen(config: Config, focused: bool, bell: bool) -> Result<()> {
    let session = session_for(&config)?;
    let platform = Arc::new(TerminalPlatform::new(bell));
    platform.set_focus(focused);
    let presenter = NotificationPresenter::new(
        Arc::clone(&platform) as Arc<dyn NotificationPlatform>,
        config.presenter_config(),
    );

    let mut chat = ChatService::new(
        session.clone(),
        presenter,
        config.identity(),
        config.topics(),
    );
    chat.start();
    let mut events = chat.events();
    let mut transitions = session.transitions();

    println!("Connecting to {}...", config.endpoint());
    session.connect().await?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("Shutting down...");
                break;
            }
            Ok(state) = transitions.recv() => {
                println!("* {state}");
                if state == ConnectionState::Failed {
                    if let Some(error) = session.last_error() {
                        eprintln!("{error}");
                    }
                    break;
                }
            }
            Ok(event) = events.recv() => match event {
                ChatEvent::Message(message) => println!(
                    "<{}> {}",
                    message
                        .sender_name
                        .unwrap_or_else(|| format!("User {}", message.sender_id)),
                    message.content
                ),
                ChatEvent::Presence(users) => println!("* {} online", users.len()),
            },
        }
    }

    chat.stop();
    session.disconnect();
    Ok(())
}

async fn send(
    config: Config,
    to: Option<i64>,
    group: Option<i64>,
    file: Option<i64>,
    content: &str,
) -> Result<()> {
    let session = session_for(&config)?;
    let presenter = NotificationPresenter::new(
        Arc::new(TerminalPlatform::new(false)),
        config.presenter_config(),
    );
    let chat = ChatService::new(
        session.clone(),
        presenter,
        config.identity(),
        config.topics(),
    );

    session.connect().await?;
    let state = tokio::time::timeout(
        config.session_config().handshake_timeout,
        session.wait_for(ConnectionState::is_connected),
    )
    .await
    .context("Timed out waiting for the connection")?;
    log::debug!("Sending while {}", state);

    match (to, group) {
        (Some(receiver), _) => chat.send_message(receiver, content, file)?,
        (None, Some(group)) => chat.send_group_message(group, content, file)?,
        (None, None) => anyhow::bail!("Either --to or --group is required"),
    }

    session.close().await;
    println!("Sent.");
    Ok(())
}

fn push(config: &Config, payload: &str) -> Result<()> {
    let raw = if payload == "-" {
        let mut buf = Vec::new();
        std::io::stdin()
            .read_to_end(&mut buf)
            .context("Failed to read payload from stdin")?;
        buf
    } else {
        payload.as_bytes().to_vec()
    };

    let presenter = NotificationPresenter::new(
        Arc::new(TerminalPlatform::new(false)),
        config.presenter_config(),
    );
    let delivery = BackgroundDelivery::new(presenter);
    let outcome = delivery.handle(&raw);
    log::debug!("Push outcome: {:?}", outcome);
    Ok(())
}

fn show_config(config: &Config, init: bool) -> Result<()> {
    if init {
        config.save()?;
        println!("Wrote {}", Config::path()?.display());
    }
    println!("# {}", Config::path()?.display());
    println!("{}", serde_json::to_string_pretty(config)?);
    println!("# token: {}", if config.has_token() { "set" } else { "not set" });
    Ok(())
}
