//! Core application runner for `swap-bridge`.
//!
//! Kept apart from CLI parsing and process exit codes so the whole pipeline
//! can be driven in tests through an injected [`Transport`](crate::bridge::Transport).

use crate::bridge::{Bridge, BridgeError, BrokerAddress, Credentials};
use crate::mote::Mote;
use crate::packet::decode_frame;
use crate::router::Router;
use crate::schema::{SchemaError, load_motes};
use clap::Parser;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Configuration for the bridge process.
#[derive(Parser, Debug, Clone)]
#[command(author, about, version)]
pub struct Options {
    /// Client name; a unique suffix is appended for the connection identity
    #[arg(long, env = "HUB_PACK", default_value = "swap")]
    pub name: String,

    /// Broker address, tcp://host:port or tcps://host:port
    #[arg(long, env = "HUB_MQTT", default_value = "tcp://localhost:1883")]
    pub broker: String,

    /// Topic the gateway publishes raw frames on
    #[arg(long, default_value = "logger")]
    pub topic: String,

    /// Directory holding one TOML file per mote
    #[arg(long, default_value = "swap_motes")]
    pub motes: PathBuf,

    /// Client certificate for tcps:// brokers
    #[arg(long, default_value = "client.crt")]
    pub cert: PathBuf,

    /// Client private key for tcps:// brokers
    #[arg(long, default_value = "client.key")]
    pub key: PathBuf,

    /// CA certificate for tcps:// brokers
    #[arg(long, default_value = "ca.crt")]
    pub ca: PathBuf,

    /// Publish readings and presence without the retain flag
    #[arg(long)]
    pub no_retain: bool,

    /// Verbose output, log frames that fail to decode
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,
}

impl Options {
    pub fn retain(&self) -> bool {
        !self.no_retain
    }
}

/// Errors returned by the run loop.
#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error(transparent)]
    Bridge(#[from] BridgeError),
    #[error("failed to read {path}: {source}")]
    Credentials {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

fn read_pem(path: &Path) -> Result<Vec<u8>, RunError> {
    fs::read(path).map_err(|source| RunError::Credentials {
        path: path.to_path_buf(),
        source,
    })
}

/// Read the client certificate, key and CA from disk.
pub fn load_credentials(cert: &Path, key: &Path, ca: &Path) -> Result<Credentials, RunError> {
    Ok(Credentials {
        client_cert: read_pem(cert)?,
        client_key: read_pem(key)?,
        ca: read_pem(ca)?,
    })
}

/// Subscribe to the frame topic and route every decodable frame.
///
/// - Frames that fail to decode are logged (at `warn` when `options.verbose`,
///   `debug` otherwise) and dropped.
/// - Returns once the subscription ends.
pub async fn run_with_transport(
    options: &Options,
    motes: Vec<Mote>,
    bridge: &Bridge,
) -> Result<(), RunError> {
    let router = Router::new(motes);
    let retain = options.retain();

    let mut events = bridge.subscribe(&options.topic).await?;
    info!(topic = %options.topic, motes = router.motes().len(), "listening for frames");

    while let Some(event) = events.recv().await {
        match decode_frame(&event.payload) {
            Ok(packet) => {
                debug!(
                    address = packet.register_address,
                    register = packet.register_id,
                    function = %packet.function,
                    "frame"
                );
                router.dispatch(bridge, &packet, retain).await;
            }
            Err(error) => {
                if options.verbose {
                    warn!(topic = %event.topic, %error, "dropping frame");
                } else {
                    debug!(topic = %event.topic, %error, "dropping frame");
                }
            }
        }
    }

    info!(topic = %options.topic, "subscription closed");
    Ok(())
}

/// Load motes, connect to the broker and run until the subscription ends.
///
/// # Errors
/// Schema, credential and connection failures during startup.
pub async fn run(options: Options) -> Result<(), RunError> {
    let motes = load_motes(&options.motes)?;

    let broker: BrokerAddress = options.broker.parse()?;
    let credentials = if broker.secure {
        Some(load_credentials(&options.cert, &options.key, &options.ca)?)
    } else {
        None
    };

    let bridge = Bridge::connect(&options.name, &options.broker, options.retain(), credentials).await?;
    run_with_transport(&options, motes, &bridge).await
}
