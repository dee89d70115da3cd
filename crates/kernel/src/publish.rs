//! Publish contract and the in-process bus.

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use crossbeam_channel::{Receiver, Sender};
use fleetsim_common::Observation;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("topic '{0}' was not advertised")]
    NotAdvertised(String),
    #[error("cannot serialize observation: {0}")]
    Serialize(String),
    #[error("transport failure on '{topic}': {message}")]
    Transport { topic: String, message: String },
}

/// Topic-based publish capability consumed by the dispatch workers.
///
/// Each topic must be advertised once before it is published to.
pub trait Publisher: Send + Sync {
    fn advertise(&self, topic: &str) -> Result<(), PublishError>;
    fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), PublishError>;
}

/// Wire message for a published observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishedObservation {
    /// Wall-clock time of publication, seconds since the Unix epoch.
    pub unix_timestamp: f64,
    /// Name of the entity that owns the sensor.
    pub source_object_id: String,
    pub observation: Observation,
}

impl PublishedObservation {
    pub fn new(observation: Observation) -> Self {
        let unix_timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or_default();
        Self {
            unix_timestamp,
            source_object_id: observation.source.name.clone(),
            observation,
        }
    }

    pub fn to_json(&self) -> Result<Vec<u8>, PublishError> {
        serde_json::to_vec(self).map_err(|e| PublishError::Serialize(e.to_string()))
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self, PublishError> {
        serde_json::from_slice(bytes).map_err(|e| PublishError::Serialize(e.to_string()))
    }
}

#[derive(Debug, Default)]
struct Topic {
    advertised: bool,
    published: u64,
    subscribers: Vec<Sender<Vec<u8>>>,
}

/// Publisher delivering payloads to in-process subscribers.
///
/// Subscribing does not advertise; a subscriber may attach before or after
/// the topic is advertised. Disconnected subscribers are pruned on publish.
#[derive(Debug, Default)]
pub struct InProcessBus {
    topics: Mutex<BTreeMap<String, Topic>>,
}

impl InProcessBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, topic: &str) -> Receiver<Vec<u8>> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.topics
            .lock()
            .entry(topic.to_string())
            .or_default()
            .subscribers
            .push(tx);
        rx
    }

    pub fn is_advertised(&self, topic: &str) -> bool {
        self.topics.lock().get(topic).is_some_and(|t| t.advertised)
    }

    /// Payloads published on `topic` so far.
    pub fn published_count(&self, topic: &str) -> u64 {
        self.topics.lock().get(topic).map_or(0, |t| t.published)
    }

    pub fn advertised_topics(&self) -> Vec<String> {
        self.topics
            .lock()
            .iter()
            .filter(|(_, t)| t.advertised)
            .map(|(name, _)| name.clone())
            .collect()
    }
}

impl Publisher for InProcessBus {
    fn advertise(&self, topic: &str) -> Result<(), PublishError> {
        let mut topics = self.topics.lock();
        let entry = topics.entry(topic.to_string()).or_default();
        if !entry.advertised {
            entry.advertised = true;
            tracing::debug!(topic, "topic advertised");
        }
        Ok(())
    }

    fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), PublishError> {
        let mut topics = self.topics.lock();
        let entry = topics
            .get_mut(topic)
            .filter(|t| t.advertised)
            .ok_or_else(|| PublishError::NotAdvertised(topic.to_string()))?;
        entry
            .subscribers
            .retain(|tx| tx.send(payload.to_vec()).is_ok());
        entry.published += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetsim_common::{EntityHandle, ObservationPayload, ObservationSource, Pose, Twist};

    fn obs() -> Observation {
        Observation {
            timestamp: 1.0,
            source: ObservationSource {
                handle: EntityHandle::new(2, 0),
                name: "r2".into(),
            },
            sensor: "pose1".into(),
            sequence: 0,
            owner_pose: Pose::default(),
            payload: ObservationPayload::Odometry {
                pose: Pose::default(),
                twist: Twist::default(),
            },
        }
    }

    #[test]
    fn publish_requires_advertise() {
        let bus = InProcessBus::new();
        assert!(matches!(
            bus.publish("/odom", b"x"),
            Err(PublishError::NotAdvertised(_))
        ));
        bus.advertise("/odom").unwrap();
        bus.publish("/odom", b"x").unwrap();
        assert_eq!(bus.published_count("/odom"), 1);
    }

    #[test]
    fn subscriber_before_advertise_receives() {
        let bus = InProcessBus::new();
        let rx = bus.subscribe("/odom");
        assert!(!bus.is_advertised("/odom"));
        bus.advertise("/odom").unwrap();
        bus.publish("/odom", b"hello").unwrap();
        assert_eq!(rx.try_recv().unwrap(), b"hello".to_vec());
        assert_eq!(bus.advertised_topics(), vec!["/odom".to_string()]);
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let bus = InProcessBus::new();
        bus.advertise("/t").unwrap();
        drop(bus.subscribe("/t"));
        let live = bus.subscribe("/t");
        bus.publish("/t", b"1").unwrap();
        assert_eq!(live.len(), 1);
        assert_eq!(bus.topics.lock()["/t"].subscribers.len(), 1);
    }

    #[test]
    fn wire_message_carries_source_id() {
        let msg = PublishedObservation::new(obs());
        assert_eq!(msg.source_object_id, "r2");
        assert!(msg.unix_timestamp > 0.0);
        let back = PublishedObservation::from_json(&msg.to_json().unwrap()).unwrap();
        assert_eq!(back.observation, obs());
    }
}
