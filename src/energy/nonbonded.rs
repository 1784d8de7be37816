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

use crate::cell::{BoundaryConditions, Cell};
use crate::{Particle, Point};
use serde::{Deserialize, Serialize};

/// Isotropic pair potentials evaluated from per-particle properties.
///
/// Contact distances come from the particle radii (`σᵢⱼ = rᵢ + rⱼ`) and
/// electrostatics from the particle charges, so no per-kind parameter
/// matrix is needed. Energies are in kT.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub enum PairPotential {
    /// Infinite on overlap, zero otherwise.
    HardSphere,
    /// 12-6 potential with `σᵢⱼ = rᵢ + rⱼ` and a common well depth (kT).
    LennardJones { epsilon: f64 },
    /// Unscreened Coulomb, `u = λ_B zᵢ zⱼ / r`, with the Bjerrum length in Å.
    Coulomb { bjerrum: f64 },
}

impl PairPotential {
    /// Energy (kT) for a squared separation `r2`.
    #[inline]
    pub fn energy(&self, r2: f64, a: &Particle, b: &Particle) -> f64 {
        match *self {
            Self::HardSphere => {
                let contact = a.radius + b.radius;
                if r2 < contact * contact {
                    f64::INFINITY
                } else {
                    0.0
                }
            }
            Self::LennardJones { epsilon } => {
                let sigma = a.radius + b.radius;
                let x = (sigma * sigma / r2).powi(3);
                4.0 * epsilon * (x * x - x)
            }
            Self::Coulomb { bjerrum } => bjerrum * a.charge * b.charge / r2.sqrt(),
        }
    }
}

/// Non-bonded energy term: a stack of pair potentials applied to all pairs.
#[derive(Clone, Debug, Default)]
pub struct Nonbonded {
    potentials: Vec<PairPotential>,
}

impl Nonbonded {
    pub fn new(potentials: Vec<PairPotential>) -> Self {
        Self { potentials }
    }

    /// Summed pair energy for a squared separation.
    #[inline]
    pub fn pair_energy(&self, r2: f64, a: &Particle, b: &Particle) -> f64 {
        self.potentials.iter().map(|p| p.energy(r2, a, b)).sum()
    }

    /// Bjerrum length of the Coulomb potential, if present.
    pub fn bjerrum_length(&self) -> Option<f64> {
        self.potentials.iter().find_map(|p| match p {
            PairPotential::Coulomb { bjerrum } => Some(*bjerrum),
            _ => None,
        })
    }

    /// Add the electric field from all charges and dipoles onto `field`.
    ///
    /// Monopoles contribute `λ_B qⱼ r̂/r²` and dipoles
    /// `λ_B (3(µⱼ·r̂)r̂ - µⱼ)/r³`, in kT/(e·Å). The dipolar term couples the
    /// induced moments, making the self-consistent field iteration
    /// non-trivial.
    pub fn accumulate_field(&self, particles: &[Particle], cell: &Cell, field: &mut [Point]) {
        let Some(bjerrum) = self.bjerrum_length() else {
            return;
        };
        for (i, pi) in particles.iter().enumerate() {
            for (j, pj) in particles.iter().enumerate() {
                if i == j {
                    continue;
                }
                let rij = cell.distance(&pi.pos, &pj.pos);
                let r2 = rij.norm_squared();
                let r = r2.sqrt();
                if pj.charge != 0.0 {
                    field[i] += bjerrum * pj.charge * rij / (r2 * r);
                }
                if pj.dipole != Point::zeros() {
                    let rhat = rij / r;
                    field[i] +=
                        bjerrum * (3.0 * pj.dipole.dot(&rhat) * rhat - pj.dipole) / (r2 * r);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::assert_approx_eq;

    fn particle(charge: f64, radius: f64) -> Particle {
        Particle {
            id: 0,
            pos: Point::zeros(),
            charge,
            radius,
            mass: 1.0,
            dipole: Point::zeros(),
            permanent_dipole: Point::zeros(),
            polarisability: 0.0,
            hydrophobic: false,
        }
    }

    #[test]
    fn lennard_jones_minimum() {
        let a = particle(0.0, 1.0);
        let b = particle(0.0, 1.0);
        let lj = PairPotential::LennardJones { epsilon: 1.0 };
        // at r = 2^(1/6) σ the potential is -ε
        let rmin = 2.0_f64.powf(1.0 / 6.0) * 2.0;
        assert_approx_eq!(f64, lj.energy(rmin * rmin, &a, &b), -1.0, epsilon = 1e-12);
        // zero crossing at r = σ
        assert_approx_eq!(f64, lj.energy(4.0, &a, &b), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn hard_sphere_contact() {
        let a = particle(0.0, 1.5);
        let b = particle(0.0, 1.5);
        let hs = PairPotential::HardSphere;
        assert!(hs.energy(8.9, &a, &b).is_infinite());
        assert_eq!(hs.energy(9.1, &a, &b), 0.0);
    }

    #[test]
    fn coulomb_scales_with_bjerrum() {
        let a = particle(2.0, 1.0);
        let b = particle(-1.0, 1.0);
        let c = PairPotential::Coulomb { bjerrum: 7.0 };
        assert_approx_eq!(f64, c.energy(49.0, &a, &b), -2.0, epsilon = 1e-12);
    }

    #[test]
    fn potentials_stack() {
        let a = particle(1.0, 1.0);
        let b = particle(-1.0, 1.0);
        let nb = Nonbonded::new(vec![
            PairPotential::HardSphere,
            PairPotential::Coulomb { bjerrum: 7.0 },
        ]);
        assert!(nb.pair_energy(1.0, &a, &b).is_infinite());
        assert_approx_eq!(f64, nb.pair_energy(49.0, &a, &b), -1.0, epsilon = 1e-12);
    }
}
