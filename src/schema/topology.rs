//! Topology description of a constraint-based launcher.
//!
//! A topology is a set of point masses joined by kinematic constraints, plus
//! the role indices that tell the evaluator which particle is the pivot, which
//! one is thrown and which one marks the arm tip.

use serde::{Deserialize, Serialize};

fn default_axleheight() -> f64 {
    8.0
}

fn default_timestep() -> f64 {
    0.3
}

fn default_duration() -> f64 {
    35.0
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// A point mass in screen coordinates (y grows downward).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Particle {
    pub x: f64,
    pub y: f64,
    pub mass: f64,
}

/// A 2D direction, used for slider normals.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Direction {
    pub x: f64,
    pub y: f64,
}

impl Default for Direction {
    fn default() -> Self {
        Self { x: 0.0, y: 1.0 }
    }
}

impl Direction {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Unit vector at `angle` radians from the +x axis.
    pub fn from_angle(angle: f64) -> Self {
        Self {
            x: angle.cos(),
            y: angle.sin(),
        }
    }

    pub fn length(&self) -> f64 {
        self.x.hypot(self.y)
    }

    /// Unit-length copy, or `None` for the zero vector.
    pub fn normalized(&self) -> Option<Self> {
        let len = self.length();
        if len > 0.0 && len.is_finite() {
            Some(Self::new(self.x / len, self.y / len))
        } else {
            None
        }
    }
}

/// Fixed-length link between two particles.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rod {
    pub p1: usize,
    pub p2: usize,
    /// One-way rods only resist compression.
    #[serde(default, skip_serializing_if = "is_false")]
    pub oneway: bool,
}

impl Rod {
    /// Whether this rod joins `a` and `b` in either order.
    pub fn joins(&self, a: usize, b: usize) -> bool {
        (self.p1 == a && self.p2 == b) || (self.p1 == b && self.p2 == a)
    }
}

/// Restricts a particle to a line through its start position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Slider {
    pub p: usize,
    pub normal: Direction,
    /// One-way sliders release once the particle pulls away from the track.
    #[serde(default, skip_serializing_if = "is_false")]
    pub oneway: bool,
}

/// Fixes a particle in place.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pin {
    pub p: usize,
}

/// Keeps `slider` on the line through `reference` and `base`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Colinear {
    pub reference: usize,
    pub slider: usize,
    pub base: usize,
    #[serde(default, skip_serializing_if = "is_false")]
    pub oneway: bool,
}

/// Floating-arm coupling between three particles.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct F2k {
    pub reference: usize,
    pub slider: usize,
    pub base: usize,
}

/// Winding direction of a rope around a pulley.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Wrapping {
    Cw,
    Ccw,
    /// Engages once the rope drops onto the pulley.
    CwDrop,
    CcwDrop,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pulley {
    pub idx: usize,
    pub wrapping: Wrapping,
}

/// A rope from `p1` over a chain of pulleys to `p3`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rope {
    pub p1: usize,
    #[serde(default)]
    pub pulleys: Vec<Pulley>,
    pub p3: usize,
}

/// All constraint sets of a topology. Missing sets deserialize as empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Constraints {
    #[serde(default)]
    pub rod: Vec<Rod>,
    #[serde(default)]
    pub slider: Vec<Slider>,
    #[serde(default)]
    pub pin: Vec<Pin>,
    #[serde(default)]
    pub colinear: Vec<Colinear>,
    #[serde(default)]
    pub f2k: Vec<F2k>,
    #[serde(default)]
    pub rope: Vec<Rope>,
}

/// Complete launcher topology with simulation parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopologyConfig {
    pub particles: Vec<Particle>,
    #[serde(default)]
    pub constraints: Constraints,
    /// Pivot particle; kept at the highest pinned or sliding particle.
    #[serde(default)]
    pub mainaxle: usize,
    /// Particle whose flight is measured.
    pub projectile: usize,
    /// Particle marking the end of the throwing arm.
    pub armtip: usize,
    /// Scale applied to the normalized range.
    #[serde(default = "default_axleheight")]
    pub axleheight: f64,
    /// Interval between recorded trajectory samples.
    #[serde(default = "default_timestep")]
    pub timestep: f64,
    /// Simulated time span.
    #[serde(default = "default_duration")]
    pub duration: f64,
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            particles: Vec::new(),
            constraints: Constraints::default(),
            mainaxle: 0,
            projectile: 0,
            armtip: 0,
            axleheight: default_axleheight(),
            timestep: default_timestep(),
            duration: default_duration(),
        }
    }
}

impl TopologyConfig {
    #[inline]
    pub fn num_particles(&self) -> usize {
        self.particles.len()
    }

    /// Number of rod, slider and pin constraints.
    pub fn num_constraints(&self) -> usize {
        self.constraints.rod.len() + self.constraints.slider.len() + self.constraints.pin.len()
    }

    /// Whether `idx` is the mainaxle, projectile or armtip.
    pub fn is_role(&self, idx: usize) -> bool {
        idx == self.mainaxle || idx == self.projectile || idx == self.armtip
    }

    pub fn has_rod(&self, a: usize, b: usize) -> bool {
        self.constraints.rod.iter().any(|rod| rod.joins(a, b))
    }

    /// Particle the mainaxle should point at.
    ///
    /// Picks the highest-`y` particle referenced by a pin or slider (pins
    /// first, earliest wins ties), or 0 when no particle is anchored.
    pub fn mainaxle_candidate(&self) -> usize {
        let mut seen = vec![false; self.particles.len()];
        let mut best: Option<(usize, f64)> = None;

        let anchored = self
            .constraints
            .pin
            .iter()
            .map(|pin| pin.p)
            .chain(self.constraints.slider.iter().map(|slider| slider.p));

        for idx in anchored {
            if idx >= self.particles.len() || seen[idx] {
                continue;
            }
            seen[idx] = true;
            let y = self.particles[idx].y;
            if best.is_none_or(|(_, best_y)| y > best_y) {
                best = Some((idx, y));
            }
        }

        best.map_or(0, |(idx, _)| idx)
    }

    /// Re-establish the mainaxle invariant.
    pub fn update_mainaxle(&mut self) {
        self.mainaxle = self.mainaxle_candidate();
    }

    /// Merge doubled sliders into pins.
    ///
    /// Two or more two-way sliders on one particle pin it in place, so every
    /// slider on that particle is dropped and a pin is added instead.
    pub fn normalize_constraints(&mut self) {
        let mut slider_counts = vec![0usize; self.particles.len()];
        for slider in &self.constraints.slider {
            if !slider.oneway && slider.p < slider_counts.len() {
                slider_counts[slider.p] += 1;
            }
        }

        self.constraints
            .slider
            .retain(|slider| slider_counts.get(slider.p).is_none_or(|&count| count < 2));

        self.constraints.pin.extend(
            slider_counts
                .iter()
                .enumerate()
                .filter(|(_, count)| **count > 1)
                .map(|(p, _)| Pin { p }),
        );
    }

    /// Remove a particle and re-index every remaining reference.
    ///
    /// Returns `false` and leaves the config untouched when `idx` is out of
    /// range or is one of the role particles.
    pub fn remove_particle(&mut self, idx: usize) -> bool {
        if idx >= self.particles.len() || self.is_role(idx) {
            return false;
        }

        let shift = |p: usize| if p > idx { p - 1 } else { p };

        self.particles.remove(idx);

        let c = &mut self.constraints;
        c.rod.retain(|rod| rod.p1 != idx && rod.p2 != idx);
        for rod in &mut c.rod {
            rod.p1 = shift(rod.p1);
            rod.p2 = shift(rod.p2);
        }

        c.slider.retain(|slider| slider.p != idx);
        for slider in &mut c.slider {
            slider.p = shift(slider.p);
        }

        c.pin.retain(|pin| pin.p != idx);
        for pin in &mut c.pin {
            pin.p = shift(pin.p);
        }

        c.colinear
            .retain(|col| col.reference != idx && col.slider != idx && col.base != idx);
        for col in &mut c.colinear {
            col.reference = shift(col.reference);
            col.slider = shift(col.slider);
            col.base = shift(col.base);
        }

        c.f2k
            .retain(|f| f.reference != idx && f.slider != idx && f.base != idx);
        for f in &mut c.f2k {
            f.reference = shift(f.reference);
            f.slider = shift(f.slider);
            f.base = shift(f.base);
        }

        c.rope.retain(|rope| {
            rope.p1 != idx && rope.p3 != idx && rope.pulleys.iter().all(|p| p.idx != idx)
        });
        for rope in &mut c.rope {
            rope.p1 = shift(rope.p1);
            rope.p3 = shift(rope.p3);
            for pulley in &mut rope.pulleys {
                pulley.idx = shift(pulley.idx);
            }
        }

        self.mainaxle = shift(self.mainaxle);
        self.projectile = shift(self.projectile);
        self.armtip = shift(self.armtip);
        true
    }

    /// Check that every role and constraint reference is in range.
    pub fn validate(&self) -> Result<(), TopologyError> {
        let len = self.particles.len();
        if len == 0 {
            return Err(TopologyError::NoParticles);
        }
        if !(self.timestep > 0.0) {
            return Err(TopologyError::InvalidTimestep(self.timestep));
        }
        if !(self.duration > 0.0) {
            return Err(TopologyError::InvalidDuration(self.duration));
        }
        if let Some((index, particle)) = self
            .particles
            .iter()
            .enumerate()
            .find(|(_, p)| !(p.mass > 0.0) || !p.x.is_finite() || !p.y.is_finite())
        {
            return Err(TopologyError::InvalidParticle {
                index,
                mass: particle.mass,
            });
        }

        for (role, index) in [
            ("mainaxle", self.mainaxle),
            ("projectile", self.projectile),
            ("armtip", self.armtip),
        ] {
            if index >= len {
                return Err(TopologyError::RoleOutOfRange { role, index, len });
            }
        }

        let check = |kind: &'static str, index: usize| {
            if index >= len {
                Err(TopologyError::ConstraintOutOfRange { kind, index, len })
            } else {
                Ok(())
            }
        };

        let c = &self.constraints;
        for rod in &c.rod {
            check("rod", rod.p1)?;
            check("rod", rod.p2)?;
        }
        for slider in &c.slider {
            check("slider", slider.p)?;
        }
        for pin in &c.pin {
            check("pin", pin.p)?;
        }
        for col in &c.colinear {
            check("colinear", col.reference)?;
            check("colinear", col.slider)?;
            check("colinear", col.base)?;
        }
        for f in &c.f2k {
            check("f2k", f.reference)?;
            check("f2k", f.slider)?;
            check("f2k", f.base)?;
        }
        for rope in &c.rope {
            check("rope", rope.p1)?;
            check("rope", rope.p3)?;
            for pulley in &rope.pulleys {
                check("rope", pulley.idx)?;
            }
        }
        Ok(())
    }
}

/// Topology validation errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TopologyError {
    #[error("Topology has no particles")]
    NoParticles,
    #[error("Timestep must be positive, got {0}")]
    InvalidTimestep(f64),
    #[error("Duration must be positive, got {0}")]
    InvalidDuration(f64),
    #[error("Particle {index} needs a finite position and positive mass (mass {mass})")]
    InvalidParticle { index: usize, mass: f64 },
    #[error("Role {role} points at particle {index} but only {len} exist")]
    RoleOutOfRange {
        role: &'static str,
        index: usize,
        len: usize,
    },
    #[error("A {kind} constraint references particle {index} but only {len} exist")]
    ConstraintOutOfRange {
        kind: &'static str,
        index: usize,
        len: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn particle(x: f64, y: f64) -> Particle {
        Particle { x, y, mass: 1.0 }
    }

    fn sample_config() -> TopologyConfig {
        TopologyConfig {
            particles: vec![
                particle(500.0, 500.0),
                particle(520.0, 450.0),
                particle(480.0, 560.0),
                particle(540.0, 520.0),
                particle(500.0, 600.0),
            ],
            constraints: Constraints {
                rod: vec![
                    Rod { p1: 0, p2: 1, oneway: false },
                    Rod { p1: 2, p2: 4, oneway: false },
                    Rod { p1: 3, p2: 4, oneway: true },
                ],
                slider: vec![Slider {
                    p: 4,
                    normal: Direction::default(),
                    oneway: false,
                }],
                pin: vec![Pin { p: 0 }],
                ..Default::default()
            },
            mainaxle: 4,
            projectile: 3,
            armtip: 1,
            ..Default::default()
        }
    }

    #[test]
    fn test_mainaxle_picks_highest_anchored() {
        let mut config = sample_config();
        config.mainaxle = 0;
        config.update_mainaxle();
        assert_eq!(config.mainaxle, 4);
    }

    #[test]
    fn test_mainaxle_defaults_to_zero() {
        let mut config = sample_config();
        config.constraints.pin.clear();
        config.constraints.slider.clear();
        config.mainaxle = 3;
        config.update_mainaxle();
        assert_eq!(config.mainaxle, 0);
    }

    #[test]
    fn test_mainaxle_tie_keeps_first() {
        let mut config = sample_config();
        config.particles[0].y = 600.0;
        config.update_mainaxle();
        // Pin on 0 is visited before the slider on 4.
        assert_eq!(config.mainaxle, 0);
    }

    #[test]
    fn test_remove_particle_reindexes() {
        let mut config = sample_config();
        assert!(config.remove_particle(2));

        assert_eq!(config.particles.len(), 4);
        assert_eq!(
            config.constraints.rod,
            vec![
                Rod { p1: 0, p2: 1, oneway: false },
                Rod { p1: 2, p2: 3, oneway: true },
            ]
        );
        assert_eq!(config.constraints.slider[0].p, 3);
        assert_eq!(config.constraints.pin[0].p, 0);
        assert_eq!(config.mainaxle, 3);
        assert_eq!(config.projectile, 2);
        assert_eq!(config.armtip, 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_remove_role_is_noop() {
        let mut config = sample_config();
        let before = config.clone();
        for role in [config.mainaxle, config.projectile, config.armtip] {
            assert!(!config.remove_particle(role));
        }
        assert!(!config.remove_particle(99));
        assert_eq!(config, before);
    }

    #[test]
    fn test_normalize_turns_double_slider_into_pin() {
        let mut config = sample_config();
        config.constraints.pin.clear();
        config.constraints.slider = vec![
            Slider { p: 2, normal: Direction::new(0.0, 1.0), oneway: false },
            Slider { p: 2, normal: Direction::new(1.0, 0.0), oneway: false },
            Slider { p: 2, normal: Direction::new(1.0, 1.0), oneway: true },
            Slider { p: 4, normal: Direction::new(0.0, 1.0), oneway: false },
        ];

        config.normalize_constraints();

        assert_eq!(config.constraints.pin, vec![Pin { p: 2 }]);
        assert_eq!(config.constraints.slider.len(), 1);
        assert_eq!(config.constraints.slider[0].p, 4);
    }

    #[test]
    fn test_validate_rejects_bad_indices() {
        let mut config = sample_config();
        config.constraints.rod.push(Rod { p1: 0, p2: 7, oneway: false });
        assert!(matches!(
            config.validate(),
            Err(TopologyError::ConstraintOutOfRange { kind: "rod", index: 7, .. })
        ));

        let mut config = sample_config();
        config.projectile = 5;
        assert!(matches!(
            config.validate(),
            Err(TopologyError::RoleOutOfRange { role: "projectile", .. })
        ));
    }

    #[test]
    fn test_missing_constraint_sets_deserialize_empty() {
        let json = r#"{
            "particles": [{"x": 1, "y": 2, "mass": 3}, {"x": 4, "y": 5, "mass": 6}],
            "constraints": {"rod": [{"p1": 0, "p2": 1}]},
            "projectile": 1,
            "armtip": 0
        }"#;
        let config: TopologyConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.constraints.rod.len(), 1);
        assert!(!config.constraints.rod[0].oneway);
        assert!(config.constraints.slider.is_empty());
        assert!(config.constraints.rope.is_empty());
        assert_eq!(config.timestep, 0.3);
        assert_eq!(config.duration, 35.0);
        assert_eq!(config.axleheight, 8.0);
    }

    #[test]
    fn test_oneway_skipped_when_false() {
        let rod = Rod { p1: 0, p2: 1, oneway: false };
        let json = serde_json::to_string(&rod).unwrap();
        assert!(!json.contains("oneway"));
    }

    #[test]
    fn test_direction_normalized() {
        let d = Direction::new(3.0, 4.0).normalized().unwrap();
        assert!((d.x - 0.6).abs() < 1e-12);
        assert!((d.y - 0.8).abs() < 1e-12);
        assert!(Direction::new(0.0, 0.0).normalized().is_none());
    }
}
