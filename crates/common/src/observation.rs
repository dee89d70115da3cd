use serde::{Deserialize, Serialize};

use crate::types::{EntityHandle, Pose, Twist};

/// Identity of the entity that produced an observation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservationSource {
    pub handle: EntityHandle,
    pub name: String,
}

/// Sensor-specific content of an observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ObservationPayload {
    /// Ground-truth pose and velocity of the owner.
    Odometry { pose: Pose, twist: Twist },
    /// Planar range scan, rays ordered by increasing angle.
    RangeScan {
        angle_min: f64,
        angle_increment: f64,
        max_range: f32,
        ranges: Vec<f32>,
        valid: Vec<bool>,
    },
    /// Opaque payload for sensor models outside this workspace.
    Raw { encoding: String, data: Vec<u8> },
}

impl ObservationPayload {
    /// Short label used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Odometry { .. } => "odometry",
            Self::RangeScan { .. } => "range_scan",
            Self::Raw { .. } => "raw",
        }
    }
}

/// Timestamped record produced by one sensor sample.
///
/// Built once by the stepping thread and then shared read-only with every
/// sink, so nothing downstream can mutate it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// Simulation time of the sample, in seconds.
    pub timestamp: f64,
    pub source: ObservationSource,
    pub sensor: String,
    /// Per-sensor sample counter, starting at 0.
    pub sequence: u64,
    /// Owner pose recorded by the sampling gate.
    pub owner_pose: Pose,
    pub payload: ObservationPayload,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Observation {
        Observation {
            timestamp: 0.5,
            source: ObservationSource {
                handle: EntityHandle::new(0, 0),
                name: "r1".into(),
            },
            sensor: "pose1".into(),
            sequence: 3,
            owner_pose: Pose::new(1.0, 2.0, 0.0),
            payload: ObservationPayload::Odometry {
                pose: Pose::new(1.0, 2.0, 0.0),
                twist: Twist::default(),
            },
        }
    }

    #[test]
    fn payload_kind_labels() {
        assert_eq!(sample().payload.kind(), "odometry");
        let raw = ObservationPayload::Raw {
            encoding: "bytes".into(),
            data: vec![1, 2],
        };
        assert_eq!(raw.kind(), "raw");
    }

    #[test]
    fn observation_serializes_with_source_identity() {
        let json = serde_json::to_value(sample()).unwrap();
        assert_eq!(json["source"]["name"], "r1");
        assert_eq!(json["sensor"], "pose1");
        assert_eq!(json["sequence"], 3);
    }
}
