//! Message bus bridge.
//!
//! A [`Bridge`] owns one connection to the bus and presents it as plain
//! async calls and channels: publish a payload, subscribe to a topic filter
//! and receive [`Event`]s, or get a [`notifier`](Bridge::notifier) sender whose
//! items are published in order by a background task.
//!
//! The wire protocol sits behind the [`Transport`] trait. [`Bridge::connect`]
//! uses the MQTT implementation in [`mqtt`]; tests plug in their own.

pub mod mqtt;
mod weak;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use url::Url;

/// Buffer size of every subscription channel. Inbound messages beyond it are
/// dropped until the consumer catches up.
pub const EVENT_CHANNEL_BUFFER_SIZE: usize = 100;

/// Buffer size of every notifier channel. Producers wait when it is full.
pub const OUTBOUND_CHANNEL_BUFFER_SIZE: usize = 100;

/// Keepalive interval negotiated with the broker.
pub const KEEP_ALIVE: Duration = Duration::from_secs(10);

/// Prefix of the per-connection presence topic.
pub const PRESENCE_PREFIX: &str = "jet";

/// Error type for bridge operations.
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("invalid broker address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },
    #[error("secure broker address requires client credentials")]
    MissingCredentials,
    /// TLS requested but the `tls` feature is not compiled in
    #[error("TLS support not available (not compiled in)")]
    TlsUnavailable,
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("request failed: {0}")]
    Request(String),
    #[error("not acknowledged: {0}")]
    NotAcknowledged(String),
}

/// Boxed future returned by [`Transport`] methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Wire protocol abstraction so the bridge can run without a live broker.
pub trait Transport: Send + Sync {
    /// Send a payload and resolve once the broker acknowledged it.
    fn publish(
        &self,
        topic: String,
        payload: Vec<u8>,
        retain: bool,
    ) -> BoxFuture<'_, Result<(), BridgeError>>;

    /// Subscribe to a topic filter, delivering every matching message.
    fn subscribe(&self, filter: String)
    -> BoxFuture<'_, Result<mpsc::Receiver<Event>, BridgeError>>;
}

/// One inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub topic: String,
    pub payload: Vec<u8>,
    pub retained: bool,
}

impl Event {
    /// Parse the payload as JSON and decode it leniently into `T`.
    ///
    /// Numeric strings are accepted for number fields, numbers for string
    /// fields and so on. Parse or shape errors are logged and yield `None`.
    pub fn decode<T: DeserializeOwned>(&self) -> Option<T> {
        let value: Value = match serde_json::from_slice(&self.payload) {
            Ok(value) => value,
            Err(error) => {
                warn!(topic = %self.topic, %error, "json decode error");
                return None;
            }
        };
        match T::deserialize(weak::WeakValue(value)) {
            Ok(decoded) => Some(decoded),
            Err(error) => {
                warn!(topic = %self.topic, %error, "decode error");
                None
            }
        }
    }
}

/// Outbound message body.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Sent unmodified
    Raw(Vec<u8>),
    /// Serialized to JSON before sending
    Json(Value),
}

impl Payload {
    /// Capture any serializable value as a JSON payload.
    ///
    /// Object keys of the captured value are sorted; use
    /// [`Bridge::publish_json`] where field order matters.
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self, serde_json::Error> {
        serde_json::to_value(value).map(Payload::Json)
    }

    fn into_bytes(self) -> Result<Vec<u8>, serde_json::Error> {
        match self {
            Payload::Raw(bytes) => Ok(bytes),
            Payload::Json(value) => serde_json::to_vec(&value),
        }
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Payload::Raw(bytes)
    }
}

impl From<&[u8]> for Payload {
    fn from(bytes: &[u8]) -> Self {
        Payload::Raw(bytes.to_vec())
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Payload::Json(value)
    }
}

/// PEM encoded material for a `tcps://` connection.
#[derive(Clone, Default)]
pub struct Credentials {
    pub ca: Vec<u8>,
    pub client_cert: Vec<u8>,
    pub client_key: Vec<u8>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("ca", &format_args!("{} bytes", self.ca.len()))
            .field("client_cert", &format_args!("{} bytes", self.client_cert.len()))
            .field("client_key", &"<redacted>")
            .finish()
    }
}

/// Parsed `tcp://host:port` or `tcps://host:port` broker address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerAddress {
    pub host: String,
    pub port: u16,
    pub secure: bool,
}

impl FromStr for BrokerAddress {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| BridgeError::InvalidAddress {
            address: s.to_string(),
            reason: reason.to_string(),
        };

        let url = Url::parse(s).map_err(|e| invalid(&e.to_string()))?;
        let secure = match url.scheme() {
            "tcp" | "mqtt" => false,
            "tcps" | "ssl" | "mqtts" => true,
            other => return Err(invalid(&format!("unsupported scheme '{other}'"))),
        };
        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| invalid("missing host"))?;
        let port = url.port().unwrap_or(if secure { 8883 } else { 1883 });

        Ok(BrokerAddress {
            host: host.to_string(),
            port,
            secure,
        })
    }
}

/// Unique connection identity: `name` plus a 6-digit suffix taken from the
/// current time.
pub fn client_identity(name: &str) -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    identity_with_nanos(name, nanos)
}

fn identity_with_nanos(name: &str, nanos: u128) -> String {
    format!("{}/{:06}", name, nanos % 1_000_000)
}

/// Presence topic for a connection identity.
pub fn presence_topic(identity: &str) -> String {
    format!("{PRESENCE_PREFIX}/{identity}")
}

/// MQTT topic filter matching with `+` and `#` wildcards.
///
/// Topics starting with `$` are never matched by a leading wildcard.
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    if topic.starts_with('$') && (filter.starts_with('+') || filter.starts_with('#')) {
        return false;
    }

    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');
    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

async fn send(transport: &dyn Transport, topic: &str, payload: Payload, retain: bool) {
    let data = match payload.into_bytes() {
        Ok(data) => data,
        Err(error) => {
            warn!(%topic, %error, "json conversion failed");
            return;
        }
    };
    if let Err(error) = transport.publish(topic.to_string(), data, retain).await {
        warn!(%topic, %error, "publish failed");
    }
}

/// Handle to the message bus. Cheap to clone; clones share the connection.
#[derive(Clone)]
pub struct Bridge {
    transport: Arc<dyn Transport>,
    identity: String,
    presence: Option<mpsc::Sender<Payload>>,
}

impl fmt::Debug for Bridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bridge")
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}

impl Bridge {
    /// Wrap an existing transport. No presence announcement is made.
    pub fn new(transport: Arc<dyn Transport>, identity: impl Into<String>) -> Self {
        Self {
            transport,
            identity: identity.into(),
            presence: None,
        }
    }

    /// Connect to an MQTT broker and announce presence.
    ///
    /// The connection registers an empty last will on `jet/{identity}` and,
    /// once the broker accepted it, publishes `0` to the same topic.
    ///
    /// # Errors
    /// Any failure before the broker accepted the connection.
    pub async fn connect(
        name: &str,
        address: &str,
        retain: bool,
        credentials: Option<Credentials>,
    ) -> Result<Self, BridgeError> {
        let identity = client_identity(name);
        let broker: BrokerAddress = address.parse()?;
        let transport = mqtt::MqttTransport::connect(&identity, &broker, retain, credentials).await?;

        info!("connected as {} to {}", identity, address);

        let mut bridge = Self::new(Arc::new(transport), identity);
        bridge.announce(retain).await;
        Ok(bridge)
    }

    /// Publish `0` on the presence topic and keep the notifier for later
    /// status updates.
    pub async fn announce(&mut self, retain: bool) {
        let presence = self.notifier(presence_topic(&self.identity), retain);
        if presence.send(Payload::Json(Value::from(0))).await.is_err() {
            warn!(identity = %self.identity, "presence notifier closed");
        }
        self.presence = Some(presence);
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Notifier for the presence topic, set by [`Bridge::announce`].
    pub fn presence(&self) -> Option<&mpsc::Sender<Payload>> {
        self.presence.as_ref()
    }

    /// Publish and wait for the broker's acknowledgement.
    ///
    /// Serialization and delivery failures are logged, never returned.
    pub async fn publish(&self, topic: &str, payload: impl Into<Payload>, retain: bool) {
        send(self.transport.as_ref(), topic, payload.into(), retain).await;
    }

    /// Serialize `value` as JSON and publish it. Struct fields keep their
    /// declaration order.
    pub async fn publish_json<T: Serialize + ?Sized>(&self, topic: &str, value: &T, retain: bool) {
        match serde_json::to_vec(value) {
            Ok(bytes) => self.publish(topic, Payload::Raw(bytes), retain).await,
            Err(error) => warn!(%topic, %error, "json conversion failed"),
        }
    }

    /// Subscribe to a topic filter.
    ///
    /// The receiver is bounded by [`EVENT_CHANNEL_BUFFER_SIZE`]; dropping it
    /// ends the subscription.
    pub async fn subscribe(&self, filter: &str) -> Result<mpsc::Receiver<Event>, BridgeError> {
        debug!(%filter, "subscribing");
        self.transport.subscribe(filter.to_string()).await
    }

    /// Sender whose items are published to `topic` in submission order.
    ///
    /// The background task ends once every clone of the sender is dropped.
    pub fn notifier(&self, topic: impl Into<String>, retain: bool) -> mpsc::Sender<Payload> {
        let (tx, mut rx) = mpsc::channel::<Payload>(OUTBOUND_CHANNEL_BUFFER_SIZE);
        let transport = Arc::clone(&self.transport);
        let topic = topic.into();

        tokio::spawn(async move {
            while let Some(payload) = rx.recv().await {
                send(transport.as_ref(), &topic, payload, retain).await;
            }
            debug!(%topic, "notifier closed");
        });

        tx
    }
}
