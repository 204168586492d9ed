//! # Simple Queue Demo
//!
//! Console application showing how a process wires simple-queue together:
//! load configuration, initialise logging, register a consumer for a demo
//! message type, publish a message and run until Ctrl-C.

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use simple_queue::{
    BackendSettings, ConsumerRegistry, EventKind, Message, MessageHandler, MessageQueue, Publisher,
    QueueError, QueueFactory,
};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;

// ============================================================================
// CLI Structure
// ============================================================================

/// Simple Queue demo - publish and consume test messages
#[derive(Parser)]
#[command(name = "simple-queue-demo")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Publish and consume test messages through a configurable queue backend")]
pub struct Cli {
    /// Configuration file path, loaded after config/simple-queue.yaml
    #[arg(short, long, env = "SQ_CONFIG_FILE")]
    pub config: Option<PathBuf>,

    /// Default log level when RUST_LOG is not set
    #[arg(short, long, default_value = "info")]
    pub log_level: String,

    /// Enable JSON logging
    #[arg(long)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available demo commands
#[derive(Subcommand)]
pub enum Commands {
    /// Register the test consumer, publish one message and run until Ctrl-C
    Run {
        /// Text of the message published on startup, overrides demo.greeting
        #[arg(short, long)]
        text: Option<String>,
    },

    /// Publish a single message and exit
    Publish {
        /// Event kind: added, updated or deleted
        #[arg(short, long, default_value = "added")]
        kind: EventKind,

        /// Message text
        #[arg(short, long)]
        text: String,
    },

    /// Print the resolved configuration
    ShowConfig,
}

// ============================================================================
// Configuration
// ============================================================================

/// Resolved demo configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DemoConfig {
    #[serde(default)]
    pub backend: BackendSettings,

    #[serde(default)]
    pub demo: DemoOptions,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DemoOptions {
    /// Text of the message published by `run`
    #[serde(default = "DemoOptions::default_greeting")]
    pub greeting: String,
}

impl DemoOptions {
    fn default_greeting() -> String {
        "hello".to_string()
    }
}

impl Default for DemoOptions {
    fn default() -> Self {
        Self {
            greeting: Self::default_greeting(),
        }
    }
}

/// Demo errors
#[derive(Debug, thiserror::Error)]
pub enum DemoError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] config::ConfigError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Logging initialisation failed: {message}")]
    Logging { message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DemoError {
    /// Process exit code for the error
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Configuration(_) => 1,
            Self::Queue(QueueError::ConfigurationError(_)) => 1,
            Self::Queue(_) => 2,
            Self::Logging { .. } => 3,
            Self::Io(_) => 4,
        }
    }
}

/// Load configuration
///
/// Sources, later ones overriding earlier ones:
///  1. `config/simple-queue.yaml`, if present
///  2. `explicit_path`, which must exist when given
///  3. Environment variables prefixed `SQ__`, e.g. `SQ__BACKEND__TYPE=kafka`
pub fn load_configuration(explicit_path: Option<&Path>) -> Result<DemoConfig, DemoError> {
    let mut builder = config::Config::builder().add_source(
        config::File::with_name("config/simple-queue")
            .required(false)
            .format(config::FileFormat::Yaml),
    );

    if let Some(path) = explicit_path {
        info!(path = %path.display(), "Loading configuration from explicit path");
        builder = builder.add_source(config::File::from(path).required(true));
    }

    let config = builder
        .add_source(
            config::Environment::with_prefix("SQ")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    let demo_config: DemoConfig = config.try_deserialize()?;
    demo_config
        .backend
        .validate()
        .map_err(QueueError::from)?;

    Ok(demo_config)
}

/// Initialise the global tracing subscriber
pub fn initialize_logging(level: &str, json: bool) -> Result<(), DemoError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "simple_queue={level},simple_queue_demo={level}"
        ))
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(tracing_subscriber::fmt::layer))
        .try_init()
        .map_err(|e| DemoError::Logging {
            message: e.to_string(),
        })
}

// ============================================================================
// Demo Message
// ============================================================================

/// Message type served by the demo consumer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TestMessage {
    #[serde(rename = "EventType", default)]
    pub event_kind: EventKind,
    pub text: String,
}

impl TestMessage {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            event_kind: EventKind::Added,
            text: text.into(),
        }
    }
}

impl Message for TestMessage {
    fn event_kind(&self) -> EventKind {
        self.event_kind
    }

    fn set_event_kind(&mut self, kind: EventKind) {
        self.event_kind = kind;
    }
}

/// Logs every test message it receives
#[derive(Debug, Default)]
pub struct TestMessageConsumer;

#[async_trait::async_trait]
impl MessageHandler<TestMessage> for TestMessageConsumer {
    async fn handle_added(&self, message: TestMessage) -> anyhow::Result<()> {
        info!(text = %message.text, "Received message");
        Ok(())
    }

    async fn handle_updated(&self, message: TestMessage) -> anyhow::Result<()> {
        debug!(text = %message.text, "Received update");
        Ok(())
    }

    async fn handle_deleted(&self, message: TestMessage) -> anyhow::Result<()> {
        debug!(text = %message.text, "Received deletion");
        Ok(())
    }
}

// ============================================================================
// Commands
// ============================================================================

/// Run the demo CLI
pub async fn run_cli(cli: Cli) -> Result<(), DemoError> {
    let config = load_configuration(cli.config.as_deref())?;

    match cli.command {
        Commands::Run { text } => {
            let text = text.unwrap_or_else(|| config.demo.greeting.clone());
            run_consumer(&config, &text, Arc::new(TestMessageConsumer), async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::warn!(error = %e, "Ctrl-C handler unavailable, shutting down");
                }
            })
            .await
        }
        Commands::Publish { kind, text } => publish_once(&config, kind, &text).await,
        Commands::ShowConfig => {
            let rendered = serde_json::to_string_pretty(&config).map_err(std::io::Error::from)?;
            println!("{rendered}");
            Ok(())
        }
    }
}

/// Register `handler`, publish one message and serve until `shutdown` resolves
pub async fn run_consumer<H, F>(
    config: &DemoConfig,
    text: &str,
    handler: Arc<H>,
    shutdown: F,
) -> Result<(), DemoError>
where
    H: MessageHandler<TestMessage>,
    F: Future<Output = ()>,
{
    let queue = QueueFactory::create::<TestMessage>(&config.backend).await?;

    let mut registry = ConsumerRegistry::new();
    registry.register(Arc::clone(&queue), handler);
    registry.start_all().await?;

    let publisher = Publisher::new(queue);
    if let Err(e) = publisher.add_async(&mut TestMessage::new(text)).await {
        registry.stop_all().await?;
        return Err(e.into());
    }
    info!(text, "Published test message, press Ctrl-C to stop");

    shutdown.await;
    info!("Shutting down");

    registry.stop_all().await?;
    Ok(())
}

/// Publish a single message with the given kind
pub async fn publish_once(
    config: &DemoConfig,
    kind: EventKind,
    text: &str,
) -> Result<(), DemoError> {
    let queue = QueueFactory::create::<TestMessage>(&config.backend).await?;

    let mut message = TestMessage::new(text);
    let sent = queue.send_async(&mut message, kind).await;
    let closed = queue.close_connection().await;
    sent?;
    closed?;

    info!(kind = %kind, text, "Message published");
    Ok(())
}
