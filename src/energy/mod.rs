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

//! # Energy calculation and Hamiltonian
//!
//! The [`Hamiltonian`] is a collection of [`EnergyTerm`]s that together
//! evaluate the potential energy of the system in units of kT. The move
//! framework treats it as a collaborator: moves hand it a [`Change`]
//! describing what the trial altered and receive the incremental energy.
//! Fine-grained operations (particle↔particle, group↔group, slices of
//! not-yet-inserted particles) support the grand-canonical moves.

mod external_pressure;
mod nonbonded;

pub use external_pressure::ExternalPressure;
pub use nonbonded::{Nonbonded, PairPotential};

use crate::cell::{BoundaryConditions, Cell, Shape};
use crate::space::{Space, State};
use crate::{Change, Particle, Point};

/// A single term of the Hamiltonian.
#[derive(Clone, Debug)]
pub enum EnergyTerm {
    /// Non-bonded pair interactions.
    Nonbonded(Nonbonded),
    /// Isobaric-ensemble pressure contribution.
    ExternalPressure(ExternalPressure),
}

impl EnergyTerm {
    /// Pair energy between two explicit particles at minimum-image distance.
    #[inline]
    fn pair_energy(&self, cell: &Cell, a: &Particle, b: &Particle) -> f64 {
        match self {
            Self::Nonbonded(nb) => nb.pair_energy(cell.distance_squared(&a.pos, &b.pos), a, b),
            Self::ExternalPressure(_) => 0.0,
        }
    }

    /// External (one-body) energy of a particle. Hook for wall and field
    /// potentials; zero for the current terms.
    #[inline]
    fn particle_external(&self, _cell: &Cell, _particle: &Particle) -> f64 {
        0.0
    }

    /// Volume-dependent contribution for `n` independently translatable entities.
    #[inline]
    fn volume_energy(&self, volume: f64, n: usize) -> f64 {
        match self {
            Self::Nonbonded(_) => 0.0,
            Self::ExternalPressure(ep) => ep.energy(volume, n),
        }
    }
}

impl From<Nonbonded> for EnergyTerm {
    fn from(nb: Nonbonded) -> Self {
        Self::Nonbonded(nb)
    }
}

impl From<ExternalPressure> for EnergyTerm {
    fn from(ep: ExternalPressure) -> Self {
        Self::ExternalPressure(ep)
    }
}

/// Collection of energy terms.
#[derive(Clone, Debug, Default)]
pub struct Hamiltonian {
    terms: Vec<EnergyTerm>,
}

impl Hamiltonian {
    pub fn new(terms: Vec<EnergyTerm>) -> Self {
        Self { terms }
    }

    /// Hamiltonian without any energy terms (ideal system).
    pub fn ideal() -> Self {
        Self::default()
    }

    /// Append an energy term.
    pub fn push(&mut self, term: EnergyTerm) {
        self.terms.push(term);
    }

    pub fn terms(&self) -> &[EnergyTerm] {
        &self.terms
    }

    /// Set the pressure on the isobaric term; errors if the Hamiltonian has none.
    pub fn set_pressure(&mut self, pressure: f64) -> anyhow::Result<()> {
        for term in self.terms.iter_mut() {
            if let EnergyTerm::ExternalPressure(ep) = term {
                ep.set_pressure(pressure);
                return Ok(());
            }
        }
        anyhow::bail!("pressure term required in the Hamiltonian")
    }

    /// Pair energy between two explicit particles using a given cell.
    #[inline]
    pub fn pair_particles(&self, cell: &Cell, a: &Particle, b: &Particle) -> f64 {
        self.terms.iter().map(|t| t.pair_energy(cell, a, b)).sum()
    }

    /// Pair energy between particles `i` and `j` of the requested state.
    #[inline]
    pub fn pair(&self, space: &Space, state: State, i: usize, j: usize) -> f64 {
        let particles = space.particles(state);
        self.pair_particles(space.cell_of(state), &particles[i], &particles[j])
    }

    /// Sum of pair energies between particle `i` and all other particles.
    pub fn particle_pairs(&self, space: &Space, state: State, i: usize) -> f64 {
        let particles = space.particles(state);
        let cell = space.cell_of(state);
        particles
            .iter()
            .enumerate()
            .filter(|(j, _)| *j != i)
            .map(|(_, other)| self.pair_particles(cell, &particles[i], other))
            .sum()
    }

    /// External (one-body) energy of particle `i`.
    pub fn particle_external(&self, space: &Space, state: State, i: usize) -> f64 {
        let particle = &space.particles(state)[i];
        let cell = space.cell_of(state);
        self.terms
            .iter()
            .map(|t| t.particle_external(cell, particle))
            .sum()
    }

    /// Full energy of particle `i`: pair sum plus external.
    pub fn particle_total(&self, space: &Space, state: State, i: usize) -> f64 {
        self.particle_pairs(space, state, i) + self.particle_external(space, state, i)
    }

    /// Pair energy between two groups.
    pub fn group_group(&self, space: &Space, state: State, gi: usize, gj: usize) -> f64 {
        debug_assert_ne!(gi, gj);
        let particles = space.particles(state);
        let cell = space.cell_of(state);
        let mut sum = 0.0;
        for i in space.group(gi).iter() {
            for j in space.group(gj).iter() {
                sum += self.pair_particles(cell, &particles[i], &particles[j]);
                if sum.is_infinite() {
                    return sum;
                }
            }
        }
        sum
    }

    /// External energy of a whole group.
    pub fn group_external(&self, space: &Space, state: State, gi: usize) -> f64 {
        space
            .group(gi)
            .iter()
            .map(|i| self.particle_external(space, state, i))
            .sum()
    }

    /// Internal (within-group) pair energy of a group.
    pub fn group_internal(&self, space: &Space, state: State, gi: usize) -> f64 {
        let particles = space.particles(state);
        let cell = space.cell_of(state);
        let range = space.group(gi).range();
        let mut sum = 0.0;
        for i in range.clone() {
            for j in (i + 1)..range.end {
                sum += self.pair_particles(cell, &particles[i], &particles[j]);
            }
        }
        sum
    }

    /// Pair energy between every system particle and a slice of external
    /// particles (e.g. a proposed grand-canonical insertion).
    pub fn system_with_slice(&self, space: &Space, state: State, others: &[Particle]) -> f64 {
        let particles = space.particles(state);
        let cell = space.cell_of(state);
        let mut sum = 0.0;
        for p in particles {
            for q in others {
                sum += self.pair_particles(cell, p, q);
                if sum.is_infinite() {
                    return sum;
                }
            }
        }
        sum
    }

    /// Pair energy between two slices of external particles.
    pub fn slice_with_slice(&self, cell: &Cell, a: &[Particle], b: &[Particle]) -> f64 {
        let mut sum = 0.0;
        for p in a {
            for q in b {
                sum += self.pair_particles(cell, p, q);
                if sum.is_infinite() {
                    return sum;
                }
            }
        }
        sum
    }

    /// Internal pair energy of a slice of external particles.
    pub fn slice_internal(&self, cell: &Cell, others: &[Particle]) -> f64 {
        use itertools::Itertools;
        others
            .iter()
            .tuple_combinations()
            .map(|(p, q)| self.pair_particles(cell, p, q))
            .sum()
    }

    /// External energy of a slice of external particles.
    pub fn slice_external(&self, cell: &Cell, others: &[Particle]) -> f64 {
        others
            .iter()
            .map(|p| {
                self.terms
                    .iter()
                    .map(|t| t.particle_external(cell, p))
                    .sum::<f64>()
            })
            .sum()
    }

    /// Number of independently translatable entities for the isobaric term:
    /// every particle of an atomic group, one per molecular group.
    pub fn count_entities(space: &Space) -> usize {
        space
            .groups()
            .iter()
            .filter(|g| !g.is_empty())
            .map(|g| if g.is_atomic() { g.len() } else { 1 })
            .sum()
    }

    /// Total system energy of the requested state.
    pub fn system_energy(&self, space: &Space, state: State) -> f64 {
        let particles = space.particles(state);
        let cell = space.cell_of(state);
        let mut sum = 0.0;
        for (i, p) in particles.iter().enumerate() {
            for q in &particles[i + 1..] {
                sum += self.pair_particles(cell, p, q);
                if sum.is_infinite() {
                    return sum;
                }
            }
            sum += self
                .terms
                .iter()
                .map(|t| t.particle_external(cell, p))
                .sum::<f64>();
        }
        let n = Self::count_entities(space);
        sum + self
            .terms
            .iter()
            .map(|t| t.volume_energy(cell.volume(), n))
            .sum::<f64>()
    }

    /// Incremental energy `U(trial) - U(committed)` for a change descriptor.
    ///
    /// Rigidly moved groups contribute no internal energy; partially moved
    /// groups contribute the pairs between touched particles and everything
    /// else. A trial particle colliding with a hard cell boundary yields
    /// `+∞`, i.e. deterministic rejection. Geometry changes fall back to a
    /// full new-minus-old system energy, which includes the isobaric
    /// `βPV - (N+1)·ln V` term through [`ExternalPressure`].
    pub fn energy_change(&self, space: &Space, change: &Change) -> f64 {
        if change.is_empty() {
            return 0.0;
        }
        if change.geometry_change {
            return self.system_energy(space, State::Trial)
                - self.system_energy(space, State::Committed);
        }

        let n = space.len();
        // membership: moved flag plus the rigid group id, if any
        let mut moved_flag = vec![false; n];
        let mut rigid_group = vec![usize::MAX; n];
        let mut moved: Vec<usize> = Vec::new();
        for (&gi, indices) in change.moved_groups() {
            if indices.is_empty() {
                for i in space.group(gi).iter() {
                    moved_flag[i] = true;
                    rigid_group[i] = gi;
                    moved.push(i);
                }
            } else {
                for &i in indices {
                    debug_assert!(space.group(gi).contains(i));
                    if !moved_flag[i] {
                        moved_flag[i] = true;
                        moved.push(i);
                    }
                }
            }
        }
        moved.sort_unstable();

        let trial = space.particles(State::Trial);
        let trial_cell = space.cell_of(State::Trial);
        for &i in &moved {
            if trial_cell.collision(&trial[i].pos, trial[i].radius) {
                return f64::INFINITY;
            }
        }

        let mut unew = 0.0;
        let mut uold = 0.0;
        // moved × static
        for &i in &moved {
            for j in (0..n).filter(|&j| !moved_flag[j]) {
                unew += self.pair(space, State::Trial, i, j);
                if unew.is_infinite() {
                    return f64::INFINITY;
                }
                uold += self.pair(space, State::Committed, i, j);
            }
            unew += self.particle_external(space, State::Trial, i);
            uold += self.particle_external(space, State::Committed, i);
        }
        // moved × moved, skipping pairs inside the same rigidly moved group
        for (a, &i) in moved.iter().enumerate() {
            for &j in &moved[a + 1..] {
                if rigid_group[i] != usize::MAX && rigid_group[i] == rigid_group[j] {
                    continue;
                }
                unew += self.pair(space, State::Trial, i, j);
                if unew.is_infinite() {
                    return f64::INFINITY;
                }
                uold += self.pair(space, State::Committed, i, j);
            }
        }
        unew - uold
    }

    /// Accumulate the electric field on every particle of the given state.
    ///
    /// `field` must have one entry per particle; entries are overwritten.
    /// Units: kT/(e·Å). Only monopole (charge) sources contribute.
    pub fn electric_field(&self, space: &Space, state: State, field: &mut [Point]) {
        assert_eq!(field.len(), space.len(), "field buffer size mismatch");
        field.iter_mut().for_each(|e| *e = Point::zeros());
        for term in &self.terms {
            if let EnergyTerm::Nonbonded(nb) = term {
                nb.accumulate_field(space.particles(state), space.cell_of(state), field);
            }
        }
    }

    /// Notify stateful terms of an upcoming trial described by `change`.
    pub fn notify_change(&mut self, _space: &Space, _change: &Change) -> anyhow::Result<()> {
        Ok(())
    }

    /// Let stateful terms finish the trial; the returned energy (normally
    /// zero) is added to the move's reported energy change.
    pub fn finish_trial(&mut self, _space: &Space, _accepted: bool) -> f64 {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::Cell;
    use crate::topology::{AtomKind, MoleculeKind, Topology};
    use float_cmp::assert_approx_eq;
    use std::rc::Rc;

    fn two_ion_space() -> Space {
        let na = AtomKind {
            charge: 1.0,
            radius: 1.0,
            ..AtomKind::new("Na")
        };
        let cl = AtomKind {
            charge: -1.0,
            radius: 1.0,
            ..AtomKind::new("Cl")
        };
        let mut salt = MoleculeKind::new("salt", &["Na", "Cl"]);
        salt.atomic = true;
        let topology = Rc::new(Topology::new(vec![na, cl], vec![salt]).unwrap());
        let mut space = Space::new(topology, Cell::cubic(100.0));
        let a = Particle::from_kind(space.topology().atom(0), Point::new(0.0, 0.0, 0.0));
        let b = Particle::from_kind(space.topology().atom(1), Point::new(7.0, 0.0, 0.0));
        space.add_group(0, vec![a, b]).unwrap();
        space
    }

    #[test]
    fn coulomb_pair_energy() {
        let space = two_ion_space();
        let hamiltonian = Hamiltonian::new(vec![Nonbonded::new(vec![PairPotential::Coulomb {
            bjerrum: 7.0,
        }])
        .into()]);
        let u = hamiltonian.pair(&space, State::Committed, 0, 1);
        assert_approx_eq!(f64, u, -1.0, epsilon = 1e-12); // λB z₁z₂ / r = 7·(−1)/7
        assert_approx_eq!(
            f64,
            hamiltonian.system_energy(&space, State::Committed),
            -1.0,
            epsilon = 1e-12
        );
    }

    #[test]
    fn hard_sphere_overlap_is_infinite() {
        let mut space = two_ion_space();
        let hamiltonian = Hamiltonian::new(vec![Nonbonded::new(vec![
            PairPotential::HardSphere,
        ])
        .into()]);
        assert_eq!(hamiltonian.pair(&space, State::Committed, 0, 1), 0.0);
        space.trial_particle_mut(1).pos = Point::new(1.5, 0.0, 0.0);
        assert!(hamiltonian.pair(&space, State::Trial, 0, 1).is_infinite());
    }

    #[test]
    fn incremental_matches_total_difference() {
        let mut space = two_ion_space();
        let hamiltonian = Hamiltonian::new(vec![Nonbonded::new(vec![PairPotential::Coulomb {
            bjerrum: 7.0,
        }])
        .into()]);
        space.translate_trial_particle(1, &Point::new(3.0, 0.0, 0.0));
        let mut change = Change::default();
        change.register_particle(0, 1);

        let expected = hamiltonian.system_energy(&space, State::Trial)
            - hamiltonian.system_energy(&space, State::Committed);
        let incremental = hamiltonian.energy_change(&space, &change);
        assert_approx_eq!(f64, incremental, expected, epsilon = 1e-12);
    }

    #[test]
    fn rigid_group_has_no_internal_contribution() {
        let space = two_ion_space();
        let hamiltonian = Hamiltonian::new(vec![Nonbonded::new(vec![PairPotential::Coulomb {
            bjerrum: 7.0,
        }])
        .into()]);
        let mut change = Change::default();
        change.register_rigid_group(0);
        // whole system is one group; a rigid move costs nothing
        assert_eq!(hamiltonian.energy_change(&space, &change), 0.0);
    }

    #[test]
    fn field_on_two_charges() {
        let space = two_ion_space();
        let hamiltonian = Hamiltonian::new(vec![Nonbonded::new(vec![PairPotential::Coulomb {
            bjerrum: 7.0,
        }])
        .into()]);
        let mut field = vec![Point::zeros(); 2];
        hamiltonian.electric_field(&space, State::Committed, &mut field);
        // field on the cation from the anion points towards the anion
        assert!(field[0].x > 0.0);
        assert!(field[1].x > 0.0);
        assert_approx_eq!(f64, field[0].x, -7.0 * (-1.0) / 49.0, epsilon = 1e-12);
    }
}
