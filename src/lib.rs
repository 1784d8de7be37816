// Copyright 2024 The sylvan authors
//
// Licensed under the Apache license, version 2.0 (the "license");
// you may not use this file except in compliance with the license.
// You may obtain a copy of the license at
//
//     http://www.apache.org/licenses/license-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the license is distributed on an "as is" basis,
// without warranties or conditions of any kind, either express or implied.
// See the license for the specific language governing permissions and
// limitations under the license.

//! # Metropolis Monte Carlo for molecular systems
//!
//! This crate implements a Markov-chain Monte Carlo engine for particle
//! simulation in the canonical (NVT), isobaric (NPT), isochoric,
//! grand-canonical (µVT), and semi-grand (titration) ensembles.
//! Its centre piece is the *move framework* in [`montecarlo`]: a family of
//! trial-move operators sharing a single driver and acceptance accounting
//! path, from single-particle translation to rejection-free cluster moves,
//! grand-canonical insertion/deletion, implicit titration, and parallel
//! tempering.
//!
//! All energies are expressed in units of the thermal energy, _kT_.
//! Lengths are in ångström, angles in radians.

use crate::topology::AtomKind;
use serde::{Deserialize, Serialize};

pub mod cell;
mod change;
pub use self::change::Change;
pub mod chemistry;
pub mod energy;
pub mod group;
pub mod montecarlo;
mod random;
pub use self::random::MoveRng;
pub mod space;
mod timer;
pub use self::timer::Timer;
pub mod topology;
pub mod transform;

/// 3D position or direction vector.
pub type Point = nalgebra::Vector3<f64>;
/// Unit quaternion used for rotations.
pub type UnitQuaternion = nalgebra::UnitQuaternion<f64>;
/// Vector of positions.
pub type PositionVec = Vec<Point>;
/// Vector of particles.
pub type ParticleVec = Vec<Particle>;

pub use physical_constants::AVOGADRO_CONSTANT;

/// Convert a molar concentration or activity (mol/l) to a number density (1/Å³).
pub const MOLAR_TO_PER_ANGSTROM3: f64 = AVOGADRO_CONSTANT * 1e-27;

/// A single simulation particle.
///
/// Static per-kind properties (displacement parameters, activities, etc.) live in
/// [`topology::AtomKind`]; the particle carries only the per-instance state that
/// moves mutate: position, charge, identity, and the induced dipole.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Particle {
    /// Atom kind id (index into the topology's atom list).
    pub id: usize,
    /// Position (Å).
    pub pos: Point,
    /// Charge (elementary charges).
    pub charge: f64,
    /// Radius (Å).
    pub radius: f64,
    /// Mass (g/mol).
    pub mass: f64,
    /// Current total dipole moment (eÅ). Equals `permanent_dipole` unless polarised.
    pub dipole: Point,
    /// Permanent dipole moment (eÅ).
    pub permanent_dipole: Point,
    /// Scalar polarisability (Å³).
    pub polarisability: f64,
    /// Hydrophobicity flag.
    pub hydrophobic: bool,
}

impl Particle {
    /// Create a particle of a given kind at a position.
    pub fn from_kind(kind: &AtomKind, pos: Point) -> Self {
        Self {
            id: kind.id,
            pos,
            charge: kind.charge,
            radius: kind.radius,
            mass: kind.mass,
            dipole: kind.dipole,
            permanent_dipole: kind.dipole,
            polarisability: kind.polarisability,
            hydrophobic: kind.hydrophobic,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn particle_from_kind() {
        let kind = AtomKind {
            charge: 1.0,
            radius: 2.0,
            ..AtomKind::new("Na")
        };
        let p = Particle::from_kind(&kind, Point::new(1.0, 2.0, 3.0));
        assert_eq!(p.id, 0);
        assert_eq!(p.charge, 1.0);
        assert_eq!(p.radius, 2.0);
        assert_eq!(p.pos, Point::new(1.0, 2.0, 3.0));
        assert_eq!(p.dipole, p.permanent_dipole);
    }
}
