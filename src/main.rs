//! townpass-bridge CLI entry point.
//!
//! Provides `normalize`, `simulate`, and `exchange` subcommands for checking
//! host payloads, running a full identity request against an in-memory
//! host, and exchanging an identity with the backend.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing::info;

use townpass_bridge::config::{load_config, load_default_config, BridgeConfig};
use townpass_bridge::correlator::{Correlator, EngineOptions};
use townpass_bridge::host::memory::{HostCall, MemoryHost};
use townpass_bridge::host::RawInbound;
use townpass_bridge::identity::{classify, normalize_value};
use townpass_bridge::session::{SessionClient, SessionExchange};
use townpass_bridge::transport::Channel;

/// Identity bridge between a host webview and the backend session endpoint.
#[derive(Parser)]
#[command(name = "townpass-bridge", version, about)]
struct Cli {
    /// Path to a TOML config file (defaults to ~/.townpass-bridge/config.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit protocol diagnostics.
    #[arg(long, global = true)]
    debug: bool,

    /// Also write daily-rotated JSON logs into this directory.
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

/// Available CLI subcommands.
#[derive(Subcommand)]
enum Command {
    /// Normalize a host payload and print the identity record.
    Normalize {
        /// Payload text; read from stdin when omitted.
        payload: Option<String>,
    },
    /// Run an identity request against an in-memory host.
    Simulate {
        /// What the host answers with; the host stays silent when omitted.
        #[arg(long)]
        reply: Option<String>,
        /// Channel the host answers on.
        #[arg(long, default_value = "structured-bridge")]
        channel: Channel,
    },
    /// Exchange an identity for a backend session.
    Exchange {
        /// Identity payload in any recognized host shape.
        identity: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => {
            let mut config = load_config(path)
                .with_context(|| format!("failed to load {}", path.display()))?;
            config.apply_env()?;
            config
        }
        None => load_default_config().context("failed to load default config")?,
    };
    config.debug |= cli.debug;
    let _log_guard = match &cli.log_dir {
        Some(dir) => Some(townpass_bridge::logging::init_production(dir, config.debug)?),
        None => {
            townpass_bridge::logging::init_cli(config.debug);
            None
        }
    };

    match cli.command {
        Command::Normalize { payload } => handle_normalize(payload, &config),
        Command::Simulate { reply, channel } => handle_simulate(reply, channel, &config).await,
        Command::Exchange { identity } => handle_exchange(&identity, &config).await,
    }
}

/// Normalize one payload; fail when it is not recognized.
fn handle_normalize(payload: Option<String>, config: &BridgeConfig) -> anyhow::Result<()> {
    let payload = match payload {
        Some(payload) => payload,
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("failed to read payload from stdin")?;
            buf
        }
    };

    let (shape, record) = classify(&RawInbound::Text(payload.trim().to_owned()))
        .ok_or_else(|| anyhow::anyhow!("payload not recognized as an identity"))?;
    if config.debug {
        info!(?shape, user = record.id(), "payload recognized");
    }
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}

/// Build an in-memory host that answers on `channel`.
fn simulated_host(reply: Option<String>, channel: Channel) -> MemoryHost {
    let Some(reply) = reply else {
        return MemoryHost::full();
    };
    match channel {
        Channel::Accessor => {
            let user = serde_json::from_str(&reply).unwrap_or(Value::String(reply));
            MemoryHost::full().with_user(user)
        }
        Channel::SecondaryBridge => MemoryHost::new()
            .with_channel(Channel::SecondaryBridge)
            .with_channel(Channel::WindowBroadcast)
            .with_channel(Channel::GlobalCallback)
            .reply_on(Channel::SecondaryBridge, RawInbound::Text(reply)),
        Channel::GlobalCallback => MemoryHost::full().answer(
            Channel::NativeMessageHandler,
            Channel::GlobalCallback,
            RawInbound::Text(reply),
        ),
        other => MemoryHost::full().reply_on(other, RawInbound::Text(reply)),
    }
}

/// Run one full request and print the outcome.
async fn handle_simulate(
    reply: Option<String>,
    channel: Channel,
    config: &BridgeConfig,
) -> anyhow::Result<()> {
    let host = simulated_host(reply, channel);
    let engine = Correlator::new(Arc::new(host.clone()), EngineOptions::from(config));

    let outcome = engine.request_identity().await;
    let leftover = host.total_listeners();
    let probes = host
        .log()
        .iter()
        .filter(|call| matches!(call, HostCall::Probe { .. }))
        .count();
    info!(probes, leftover_listeners = leftover, "simulation finished");

    let record = outcome.context("identity request failed")?;
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}

/// Normalize an identity and exchange it with the configured backend.
async fn handle_exchange(identity: &str, config: &BridgeConfig) -> anyhow::Result<()> {
    let value: Value = serde_json::from_str(identity).context("identity must be JSON")?;
    let record = normalize_value(&value)
        .ok_or_else(|| anyhow::anyhow!("identity payload not recognized"))?;

    let client = SessionClient::from_config(config)?;
    info!(endpoint = %client.endpoint(), user = record.id(), "exchanging identity");
    let session = client.exchange(&record).await?;

    println!("{}", serde_json::to_string_pretty(&session.body)?);
    Ok(())
}
