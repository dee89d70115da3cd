use glam::DVec2;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable, generation-checked reference to an entity owned by a world.
///
/// A handle is only meaningful for the world that issued it. Once the entity
/// is despawned (or the world cleared) the slot generation moves on and the
/// old handle no longer resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityHandle {
    pub index: u32,
    pub generation: u32,
}

impl EntityHandle {
    pub fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Pack into a single integer, generation in the high half.
    pub fn to_bits(self) -> u64 {
        (u64::from(self.generation) << 32) | u64::from(self.index)
    }

    pub fn from_bits(bits: u64) -> Self {
        Self {
            index: bits as u32,
            generation: (bits >> 32) as u32,
        }
    }
}

impl fmt::Display for EntityHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}v{}", self.index, self.generation)
    }
}

/// The three registries an entity can live in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityKind {
    Vehicle,
    Block,
    Element,
}

impl EntityKind {
    /// XML tag used for this kind in scene descriptions.
    pub fn tag(self) -> &'static str {
        match self {
            Self::Vehicle => "vehicle",
            Self::Block => "block",
            Self::Element => "element",
        }
    }

    /// Prefix used when a name has to be generated.
    pub fn name_prefix(self) -> &'static str {
        match self {
            Self::Vehicle => "veh",
            Self::Block => "block",
            Self::Element => "element",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Planar pose: position in meters, heading in radians.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Pose {
    pub position: DVec2,
    pub yaw: f64,
}

impl Pose {
    pub fn new(x: f64, y: f64, yaw: f64) -> Self {
        Self {
            position: DVec2::new(x, y),
            yaw,
        }
    }

    /// Unit vector pointing along the heading.
    pub fn heading(&self) -> DVec2 {
        DVec2::from_angle(self.yaw)
    }

    /// Express `local` (given in this pose's frame) in the parent frame.
    pub fn compose(&self, local: &Pose) -> Pose {
        Pose {
            position: self.position + self.heading().rotate(local.position),
            yaw: wrap_angle(self.yaw + local.yaw),
        }
    }
}

/// Planar velocity: linear in m/s, angular in rad/s.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Twist {
    pub linear: DVec2,
    pub angular: f64,
}

impl Twist {
    pub fn new(vx: f64, vy: f64, angular: f64) -> Self {
        Self {
            linear: DVec2::new(vx, vy),
            angular,
        }
    }
}

/// Wrap an angle into `(-pi, pi]`.
pub fn wrap_angle(a: f64) -> f64 {
    let mut a = a % std::f64::consts::TAU;
    if a <= -std::f64::consts::PI {
        a += std::f64::consts::TAU;
    } else if a > std::f64::consts::PI {
        a -= std::f64::consts::TAU;
    }
    a
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::{FRAC_PI_2, PI};

    #[test]
    fn handle_bits_round_trip() {
        let h = EntityHandle::new(7, 3);
        assert_eq!(EntityHandle::from_bits(h.to_bits()), h);
        assert_eq!(h.to_string(), "#7v3");
    }

    #[test]
    fn handles_differ_by_generation() {
        assert_ne!(EntityHandle::new(0, 0), EntityHandle::new(0, 1));
    }

    #[test]
    fn pose_default_is_origin() {
        let p = Pose::default();
        assert_eq!(p.position, DVec2::ZERO);
        assert_eq!(p.yaw, 0.0);
    }

    #[test]
    fn compose_rotates_local_offset() {
        let base = Pose::new(1.0, 0.0, FRAC_PI_2);
        let out = base.compose(&Pose::new(1.0, 0.0, 0.0));
        assert!((out.position.x - 1.0).abs() < 1e-12);
        assert!((out.position.y - 1.0).abs() < 1e-12);
        assert!((out.yaw - FRAC_PI_2).abs() < 1e-12);
    }

    #[test]
    fn wrap_angle_stays_in_range() {
        assert!((wrap_angle(PI + 0.5) - (-PI + 0.5)).abs() < 1e-12);
        assert!((wrap_angle(-PI - 0.5) - (PI - 0.5)).abs() < 1e-12);
        assert!((wrap_angle(4.0 * PI + 0.25) - 0.25).abs() < 1e-12);
        assert_eq!(wrap_angle(0.5), 0.5);
    }

    #[test]
    fn kind_tags() {
        assert_eq!(EntityKind::Vehicle.tag(), "vehicle");
        assert_eq!(EntityKind::Block.name_prefix(), "block");
        assert_eq!(EntityKind::Element.to_string(), "element");
    }
}
