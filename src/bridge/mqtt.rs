//! MQTT transport built on `rumqttc`.
//!
//! One background task drives the `rumqttc` event loop. It routes inbound
//! publishes to the matching subscriptions, resolves publish waiters when the
//! broker's PUBACK arrives, and restores subscriptions after a reconnect.
//!
//! Publishes are sent with QoS 1. `rumqttc` assigns packet ids inside the
//! event loop, so waiters are queued in submission order and bound to a
//! packet id when the matching outgoing publish is reported. A waiter stays
//! bound across reconnects: `rumqttc` resends unacknowledged publishes under
//! their original packet id, and only the PUBACK for that id resolves it.

use super::{
    BoxFuture, BridgeError, BrokerAddress, Credentials, EVENT_CHANNEL_BUFFER_SIZE, Event,
    KEEP_ALIVE, Transport, presence_topic, topic_matches,
};
use rumqttc::{
    AsyncClient, ClientError, ConnectionError, EventLoop, LastWill, MqttOptions, Outgoing, Packet,
    QoS, SubscribeReasonCode,
};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

/// Capacity of the request channel between `AsyncClient` and the event loop.
const REQUEST_CHANNEL_CAPACITY: usize = 100;

/// Pause between reconnect attempts after the connection dropped.
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

type AckSender = oneshot::Sender<Result<(), BridgeError>>;

impl From<ClientError> for BridgeError {
    fn from(err: ClientError) -> Self {
        BridgeError::Request(err.to_string())
    }
}

impl From<ConnectionError> for BridgeError {
    fn from(err: ConnectionError) -> Self {
        BridgeError::Connect(err.to_string())
    }
}

#[derive(Default)]
struct Acks {
    /// Waiters whose publish has not been handed a packet id yet
    queued: VecDeque<AckSender>,
    /// Waiters keyed by packet id, pending PUBACK
    in_flight: HashMap<u16, AckSender>,
}

struct Subscriber {
    filter: String,
    tx: mpsc::Sender<Event>,
}

#[derive(Default)]
struct Shared {
    acks: Mutex<Acks>,
    subscribers: Mutex<Vec<Subscriber>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Shared {
    fn handle(&self, event: rumqttc::Event, client: &AsyncClient, reconnect: &mut bool) {
        match event {
            rumqttc::Event::Incoming(Packet::Publish(publish)) => self.route(
                Event {
                    topic: publish.topic,
                    payload: publish.payload.to_vec(),
                    retained: publish.retain,
                },
                client,
            ),
            rumqttc::Event::Incoming(Packet::PubAck(ack)) => {
                if let Some(waiter) = lock(&self.acks).in_flight.remove(&ack.pkid) {
                    let _ = waiter.send(Ok(()));
                }
            }
            rumqttc::Event::Incoming(Packet::SubAck(ack)) => {
                for code in ack.return_codes {
                    if code == SubscribeReasonCode::Failure {
                        warn!(pkid = ack.pkid, "subscription rejected by broker");
                    }
                }
            }
            rumqttc::Event::Incoming(Packet::ConnAck(_)) => {
                if std::mem::take(reconnect) {
                    info!("reconnected");
                    self.resubscribe(client);
                }
            }
            rumqttc::Event::Outgoing(Outgoing::Publish(pkid)) => {
                let mut acks = lock(&self.acks);
                // retransmissions reuse an id that is already bound
                if !acks.in_flight.contains_key(&pkid) {
                    if let Some(waiter) = acks.queued.pop_front() {
                        acks.in_flight.insert(pkid, waiter);
                    }
                }
            }
            _ => {}
        }
    }

    fn route(&self, event: Event, client: &AsyncClient) {
        let mut closed = Vec::new();
        let mut subscribers = lock(&self.subscribers);

        subscribers.retain(|sub| {
            if !topic_matches(&sub.filter, &event.topic) {
                return true;
            }
            match sub.tx.try_send(event.clone()) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    warn!(filter = %sub.filter, topic = %event.topic, "subscriber lagging, dropping event");
                    true
                }
                Err(TrySendError::Closed(_)) => {
                    closed.push(sub.filter.clone());
                    false
                }
            }
        });

        for filter in closed {
            if subscribers.iter().any(|sub| sub.filter == filter) {
                continue;
            }
            debug!(%filter, "unsubscribing");
            if let Err(error) = client.try_unsubscribe(filter.as_str()) {
                warn!(%filter, %error, "unsubscribe failed");
            }
        }
    }

    fn resubscribe(&self, client: &AsyncClient) {
        let mut filters: Vec<String> = lock(&self.subscribers)
            .iter()
            .map(|sub| sub.filter.clone())
            .collect();
        filters.sort();
        filters.dedup();

        for filter in filters {
            if let Err(error) = client.try_subscribe(filter.as_str(), QoS::AtMostOnce) {
                warn!(%filter, %error, "resubscribe failed");
            }
        }
    }

    /// Fail every waiter once the event loop stops for good.
    fn fail_pending(&self, reason: &str) {
        let mut guard = lock(&self.acks);
        let acks = &mut *guard;
        let waiters = acks
            .queued
            .drain(..)
            .chain(acks.in_flight.drain().map(|(_, waiter)| waiter))
            .collect::<Vec<_>>();
        drop(guard);

        for waiter in waiters {
            let _ = waiter.send(Err(BridgeError::NotAcknowledged(reason.to_string())));
        }
    }
}

async fn drive(mut eventloop: EventLoop, shared: Arc<Shared>, client: AsyncClient) {
    let mut reconnect = false;
    loop {
        match eventloop.poll().await {
            Ok(event) => shared.handle(event, &client, &mut reconnect),
            Err(ConnectionError::RequestsDone) => {
                debug!("all clients dropped, stopping event loop");
                shared.fail_pending("event loop stopped");
                break;
            }
            Err(err) => {
                // unacknowledged publishes are resent after reconnecting
                error!(error = %err, "connection lost");
                reconnect = true;
                tokio::time::sleep(RECONNECT_DELAY).await;
            }
        }
    }
}

#[cfg(feature = "tls")]
fn tls_transport(credentials: Option<Credentials>) -> Result<rumqttc::Transport, BridgeError> {
    use rumqttc::TlsConfiguration;

    let credentials = credentials.ok_or(BridgeError::MissingCredentials)?;
    Ok(rumqttc::Transport::tls_with_config(
        TlsConfiguration::Simple {
            ca: credentials.ca,
            alpn: None,
            client_auth: Some((credentials.client_cert, credentials.client_key)),
        },
    ))
}

#[cfg(not(feature = "tls"))]
fn tls_transport(_credentials: Option<Credentials>) -> Result<rumqttc::Transport, BridgeError> {
    Err(BridgeError::TlsUnavailable)
}

/// Build client options: keepalive, an empty last will on the presence topic
/// and TLS for secure addresses. The broker host doubles as the TLS server
/// name.
fn options(
    identity: &str,
    broker: &BrokerAddress,
    retain: bool,
    credentials: Option<Credentials>,
) -> Result<MqttOptions, BridgeError> {
    let mut options = MqttOptions::new(identity, &broker.host, broker.port);
    options.set_keep_alive(KEEP_ALIVE);
    options.set_last_will(LastWill::new(
        presence_topic(identity),
        Vec::new(),
        QoS::AtLeastOnce,
        retain,
    ));

    if broker.secure {
        options.set_transport(tls_transport(credentials)?);
    }
    Ok(options)
}

/// MQTT implementation of [`Transport`].
pub struct MqttTransport {
    client: AsyncClient,
    shared: Arc<Shared>,
    /// Keeps waiter order identical to request order
    submit: tokio::sync::Mutex<()>,
}

impl MqttTransport {
    /// Connect and wait for the broker to accept the session.
    ///
    /// Only after CONNACK is the event loop handed to a background task,
    /// which from then on reconnects by itself.
    pub async fn connect(
        identity: &str,
        broker: &BrokerAddress,
        retain: bool,
        credentials: Option<Credentials>,
    ) -> Result<Self, BridgeError> {
        let options = options(identity, broker, retain, credentials)?;
        let (client, mut eventloop) = AsyncClient::new(options, REQUEST_CHANNEL_CAPACITY);

        loop {
            match eventloop.poll().await? {
                rumqttc::Event::Incoming(Packet::ConnAck(_)) => break,
                other => debug!(event = ?other, "waiting for connack"),
            }
        }

        let shared = Arc::new(Shared::default());
        tokio::spawn(drive(eventloop, Arc::clone(&shared), client.clone()));

        Ok(Self {
            client,
            shared,
            submit: tokio::sync::Mutex::new(()),
        })
    }
}

impl Transport for MqttTransport {
    fn publish(
        &self,
        topic: String,
        payload: Vec<u8>,
        retain: bool,
    ) -> BoxFuture<'_, Result<(), BridgeError>> {
        Box::pin(async move {
            let (tx, rx) = oneshot::channel();
            {
                let _submit = self.submit.lock().await;
                lock(&self.shared.acks).queued.push_back(tx);
                if let Err(err) = self
                    .client
                    .publish(topic, QoS::AtLeastOnce, retain, payload)
                    .await
                {
                    lock(&self.shared.acks).queued.pop_back();
                    return Err(err.into());
                }
            }
            rx.await
                .map_err(|_| BridgeError::NotAcknowledged("event loop stopped".into()))?
        })
    }

    fn subscribe(
        &self,
        filter: String,
    ) -> BoxFuture<'_, Result<mpsc::Receiver<Event>, BridgeError>> {
        Box::pin(async move {
            let (tx, rx) = mpsc::channel(EVENT_CHANNEL_BUFFER_SIZE);
            lock(&self.shared.subscribers).push(Subscriber {
                filter: filter.clone(),
                tx,
            });
            if let Err(err) = self.client.subscribe(filter.as_str(), QoS::AtMostOnce).await {
                drop(rx);
                lock(&self.shared.subscribers).retain(|sub| !sub.tx.is_closed());
                return Err(err.into());
            }
            Ok(rx)
        })
    }
}
