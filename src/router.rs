//! Turning decoded packets into topic updates.

use crate::bridge::Bridge;
use crate::mote::Mote;
use crate::packet::Packet;
use std::time::{SystemTime, UNIX_EPOCH};

/// Root of every sensor topic.
pub const TOPIC_ROOT: &str = "SWAP";

/// One topic update produced from a packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reading {
    pub topic: String,
    pub value: String,
}

impl Reading {
    fn new(topic: String, value: impl ToString) -> Self {
        Self {
            topic,
            value: value.to_string(),
        }
    }
}

/// Mote table, matched against each packet's register address.
#[derive(Debug, Clone, Default)]
pub struct Router {
    motes: Vec<Mote>,
}

impl Router {
    pub fn new(motes: Vec<Mote>) -> Self {
        Self { motes }
    }

    pub fn motes(&self) -> &[Mote] {
        &self.motes
    }

    /// Readings for every mote answering on the packet's register address.
    ///
    /// Each mote contributes its rendered values followed by `Timestamp`
    /// (Unix seconds of `now`), `CC_RSSI` and `LQI`. Packets for unknown
    /// addresses produce nothing.
    pub fn readings(&self, packet: &Packet, now: SystemTime) -> Vec<Reading> {
        let timestamp = now
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();

        let mut readings = Vec::new();
        for mote in self
            .motes
            .iter()
            .filter(|m| m.address == packet.register_address)
        {
            readings.extend(
                mote.update_values(packet)
                    .into_iter()
                    .map(|(key, value)| Reading::new(format!("{TOPIC_ROOT}/{key}"), value)),
            );

            let prefix = format!("{TOPIC_ROOT}/{}", mote.location);
            readings.push(Reading::new(format!("{prefix}/Timestamp"), timestamp));
            readings.push(Reading::new(format!("{prefix}/CC_RSSI"), packet.rssi));
            readings.push(Reading::new(format!("{prefix}/LQI"), packet.lqi));
        }
        readings
    }

    /// Publish the packet's readings one by one, in order.
    pub async fn dispatch(&self, bridge: &Bridge, packet: &Packet, retain: bool) {
        for reading in self.readings(packet, SystemTime::now()) {
            bridge
                .publish(&reading.topic, reading.value.into_bytes(), retain)
                .await;
        }
    }
}
