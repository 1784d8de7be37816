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

//! # Equilibrium processes for titration moves
//!
//! A process describes two interconvertible atom kinds,
//! `bound ⇌ unbound + H⁺`, with an equilibrium constant given as pK.
//! Applying the process in the bound → unbound direction carries the
//! intrinsic free energy `ln 10 · (pH − pK)` in units of kT.

use crate::topology::Topology;
use crate::{MoveRng, Particle};
use serde::{Deserialize, Serialize};
use std::f64::consts::LN_10;

/// A single acid/base equilibrium between two atom kinds.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EquilibriumProcess {
    /// Name of the protonated (bound) atom kind.
    pub bound: String,
    /// Name of the deprotonated (unbound) atom kind.
    pub unbound: String,
    /// Negative log of the equilibrium constant.
    #[serde(rename = "pK", alias = "pk")]
    pub pk: f64,
    /// Solution pH.
    #[serde(rename = "pH", alias = "ph")]
    pub ph: f64,
    #[serde(skip)]
    bound_id: usize,
    #[serde(skip)]
    unbound_id: usize,
}

impl EquilibriumProcess {
    pub fn new(bound: &str, unbound: &str, pk: f64, ph: f64) -> Self {
        Self {
            bound: bound.to_string(),
            unbound: unbound.to_string(),
            pk,
            ph,
            bound_id: 0,
            unbound_id: 0,
        }
    }

    pub fn bound_id(&self) -> usize {
        self.bound_id
    }

    pub fn unbound_id(&self) -> usize {
        self.unbound_id
    }

    /// Intrinsic free energy change (kT) for the bound → unbound direction.
    pub fn free_energy(&self) -> f64 {
        LN_10 * (self.ph - self.pk)
    }

    /// True if `id` is one of the two endpoints.
    pub fn involves(&self, id: usize) -> bool {
        id == self.bound_id || id == self.unbound_id
    }

    /// True if `id` is the protonated endpoint.
    pub fn is_bound(&self, id: usize) -> bool {
        id == self.bound_id
    }

    /// Swap a particle to the opposite endpoint of the process.
    ///
    /// Replaces identity, charge, and radius by those of the new atom kind
    /// and returns the intrinsic energy change in kT.
    pub fn apply(&self, particle: &mut Particle, topology: &Topology) -> f64 {
        debug_assert!(self.involves(particle.id));
        let (target, du) = if self.is_bound(particle.id) {
            (self.unbound_id, self.free_energy())
        } else {
            (self.bound_id, -self.free_energy())
        };
        let kind = topology.atom(target);
        particle.id = kind.id;
        particle.charge = kind.charge;
        particle.radius = kind.radius;
        du
    }

    fn resolve(&mut self, topology: &Topology) -> anyhow::Result<()> {
        self.bound_id = topology
            .find_atom(&self.bound)
            .ok_or_else(|| anyhow::anyhow!("unknown bound species '{}'", self.bound))?;
        self.unbound_id = topology
            .find_atom(&self.unbound)
            .ok_or_else(|| anyhow::anyhow!("unknown unbound species '{}'", self.unbound))?;
        anyhow::ensure!(
            self.bound_id != self.unbound_id,
            "process endpoints must differ ('{}')",
            self.bound
        );
        Ok(())
    }
}

/// A set of equilibrium processes and the titratable sites they act on.
#[derive(Clone, Debug, Default, Serialize)]
pub struct EquilibriumReactions {
    processes: Vec<EquilibriumProcess>,
    /// Absolute particle indices whose current identity is a process endpoint.
    #[serde(skip)]
    sites: Vec<usize>,
}

impl EquilibriumReactions {
    /// Build from a config process list, resolving species names.
    pub fn from_config(
        processes: &serde_json::Value,
        topology: &Topology,
    ) -> anyhow::Result<Self> {
        let mut processes: Vec<EquilibriumProcess> = serde_json::from_value(processes.clone())
            .map_err(|e| anyhow::anyhow!("invalid process list: {}", e))?;
        for process in processes.iter_mut() {
            process.resolve(topology)?;
        }
        Ok(Self {
            processes,
            sites: Vec::new(),
        })
    }

    pub fn processes(&self) -> &[EquilibriumProcess] {
        &self.processes
    }

    pub fn sites(&self) -> &[usize] {
        &self.sites
    }

    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }

    /// Scan the particle vector for titratable sites; discards earlier results.
    pub fn find_sites(&mut self, particles: &[Particle]) -> usize {
        self.sites = particles
            .iter()
            .enumerate()
            .filter(|(_, p)| self.processes.iter().any(|proc| proc.involves(p.id)))
            .map(|(i, _)| i)
            .collect();
        self.sites.len()
    }

    /// Uniformly pick a titratable site.
    pub fn random_site(&self, rng: &mut MoveRng) -> Option<usize> {
        rng.element(&self.sites).copied()
    }

    /// Uniformly pick a process for which `id` is an endpoint.
    pub fn random_process(&self, id: usize, rng: &mut MoveRng) -> Option<&EquilibriumProcess> {
        let matching: Vec<&EquilibriumProcess> =
            self.processes.iter().filter(|p| p.involves(id)).collect();
        rng.element(&matching).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::AtomKind;
    use crate::Point;
    use float_cmp::assert_approx_eq;

    fn test_topology() -> Topology {
        let ha = AtomKind {
            charge: 0.0,
            ..AtomKind::new("HA")
        };
        let a = AtomKind {
            charge: -1.0,
            ..AtomKind::new("A")
        };
        Topology::new(vec![ha, a], vec![]).unwrap()
    }

    #[test]
    fn free_energy_sign() {
        let process = EquilibriumProcess::new("HA", "A", 4.8, 7.0);
        assert_approx_eq!(f64, process.free_energy(), LN_10 * 2.2, epsilon = 1e-12);
    }

    #[test]
    fn apply_swaps_identity_and_charge() {
        let topology = test_topology();
        let config = serde_json::json!([{"bound": "HA", "unbound": "A", "pK": 4.8, "pH": 7.0}]);
        let reactions = EquilibriumReactions::from_config(&config, &topology).unwrap();
        let process = &reactions.processes()[0];

        let mut particle = Particle::from_kind(topology.atom(0), Point::zeros());
        let du = process.apply(&mut particle, &topology);
        assert_eq!(particle.id, 1);
        assert_eq!(particle.charge, -1.0);
        assert_approx_eq!(f64, du, process.free_energy(), epsilon = 1e-12);

        // reverse direction flips the sign
        let du_back = process.apply(&mut particle, &topology);
        assert_eq!(particle.id, 0);
        assert_approx_eq!(f64, du_back, -process.free_energy(), epsilon = 1e-12);
    }

    #[test]
    fn site_scan() {
        let topology = test_topology();
        let config = serde_json::json!([{"bound": "HA", "unbound": "A", "pK": 4.8, "pH": 7.0}]);
        let mut reactions = EquilibriumReactions::from_config(&config, &topology).unwrap();

        let particles = vec![
            Particle::from_kind(topology.atom(0), Point::zeros()),
            Particle::from_kind(topology.atom(1), Point::zeros()),
        ];
        assert_eq!(reactions.find_sites(&particles), 2);
        assert_eq!(reactions.sites(), &[0, 1]);
    }

    #[test]
    fn unknown_species_rejected() {
        let topology = test_topology();
        let config = serde_json::json!([{"bound": "HA", "unbound": "Xx", "pK": 4.8, "pH": 7.0}]);
        assert!(EquilibriumReactions::from_config(&config, &topology).is_err());
    }
}
