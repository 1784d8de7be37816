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

//! # Simulation state
//!
//! [`Space`] owns the shared mutable state of a simulation: the committed
//! and trial particle vectors, the group list, the simulation cell (also in
//! committed and trial versions), and auxiliary index trackers. All moves
//! borrow it mutably, strictly serially.

use crate::cell::{BoundaryConditions, Cell, Shape};
use crate::group::{Group, GroupKind};
use crate::topology::Topology;
use crate::transform::{mass_center, rotate_about};
use crate::{MoveRng, Particle, ParticleVec, Point, UnitQuaternion};
use std::ops::Range;
use std::rc::Rc;

/// Selects the committed or the trial side of the state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    Committed,
    Trial,
}

/// Dense index from atom kind id to the positions in the committed particle
/// vector where particles of that kind reside.
///
/// Required by grand-canonical moves that must sample a random particle of a
/// given kind in O(1). The tracker reflects the committed vector at every
/// idle boundary; it may be transiently stale with respect to the trial
/// vector during a trial.
#[derive(Clone, Debug, Default)]
pub struct ParticleTracker {
    by_id: Vec<Vec<usize>>,
}

impl ParticleTracker {
    fn new(num_kinds: usize) -> Self {
        Self {
            by_id: vec![Vec::new(); num_kinds],
        }
    }

    fn rebuild(&mut self, particles: &[Particle]) {
        for list in self.by_id.iter_mut() {
            list.clear();
        }
        for (i, particle) in particles.iter().enumerate() {
            self.by_id[particle.id].push(i);
        }
    }

    /// Number of committed particles of a kind.
    pub fn count(&self, id: usize) -> usize {
        self.by_id.get(id).map_or(0, Vec::len)
    }

    /// All committed indices of a kind.
    pub fn indices(&self, id: usize) -> &[usize] {
        self.by_id.get(id).map_or(&[], Vec::as_slice)
    }

    /// Uniformly pick `n` distinct committed indices of a kind.
    pub fn sample(&self, id: usize, n: usize, rng: &mut MoveRng) -> Option<Vec<usize>> {
        rng.sample(self.indices(id), n)
    }

    fn insert(&mut self, id: usize, index: usize) {
        self.by_id[id].push(index);
    }

    fn remove(&mut self, id: usize, index: usize) {
        let list = &mut self.by_id[id];
        let pos = list
            .iter()
            .position(|&i| i == index)
            .expect("tracker out of sync with particle vector");
        list.swap_remove(pos);
    }

    /// Shift all indices at or above `from` by a signed offset.
    fn shift_from(&mut self, from: usize, offset: isize) {
        for list in self.by_id.iter_mut() {
            for index in list.iter_mut() {
                if *index >= from {
                    *index = (*index as isize + offset) as usize;
                }
            }
        }
    }

    /// True if the tracker lists exactly the indices of `particles`, each once.
    pub fn is_consistent_with(&self, particles: &[Particle]) -> bool {
        let total: usize = self.by_id.iter().map(Vec::len).sum();
        total == particles.len()
            && self.by_id.iter().enumerate().all(|(id, list)| {
                list.iter()
                    .all(|&i| i < particles.len() && particles[i].id == id)
            })
    }
}

/// Index from molecule kind id to the group indices of that kind.
#[derive(Clone, Debug, Default)]
pub struct MoleculeTracker {
    by_mol: Vec<Vec<usize>>,
}

impl MoleculeTracker {
    fn new(num_kinds: usize) -> Self {
        Self {
            by_mol: vec![Vec::new(); num_kinds],
        }
    }

    fn rebuild(&mut self, groups: &[Group]) {
        for list in self.by_mol.iter_mut() {
            list.clear();
        }
        for (i, group) in groups.iter().enumerate() {
            self.by_mol[group.molecule()].push(i);
        }
    }

    /// Group indices of a molecule kind.
    pub fn groups_of(&self, molecule: usize) -> &[usize] {
        self.by_mol.get(molecule).map_or(&[], Vec::as_slice)
    }
}

/// Owner of the full simulation state.
#[derive(Clone, Debug)]
pub struct Space {
    topology: Rc<Topology>,
    committed: ParticleVec,
    trial: ParticleVec,
    groups: Vec<Group>,
    /// Committed simulation cell.
    pub cell: Cell,
    /// Trial simulation cell; differs from `cell` only during volume trials.
    pub trial_cell: Cell,
    tracker: ParticleTracker,
    mol_tracker: MoleculeTracker,
}

impl Space {
    /// New, empty space. Groups are added with [`Space::add_group`].
    pub fn new(topology: Rc<Topology>, cell: Cell) -> Self {
        let tracker = ParticleTracker::new(topology.atoms().len());
        let mol_tracker = MoleculeTracker::new(topology.molecules().len());
        Self {
            topology,
            committed: Vec::new(),
            trial: Vec::new(),
            groups: Vec::new(),
            trial_cell: cell.clone(),
            cell,
            tracker,
            mol_tracker,
        }
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn topology_rc(&self) -> Rc<Topology> {
        Rc::clone(&self.topology)
    }

    /// Total number of particles.
    pub fn len(&self) -> usize {
        self.committed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.committed.is_empty()
    }

    pub fn committed(&self) -> &[Particle] {
        &self.committed
    }

    pub fn trial(&self) -> &[Particle] {
        &self.trial
    }

    /// Particle vector for the requested state.
    pub fn particles(&self, state: State) -> &[Particle] {
        match state {
            State::Committed => &self.committed,
            State::Trial => &self.trial,
        }
    }

    /// Simulation cell for the requested state.
    pub fn cell_of(&self, state: State) -> &Cell {
        match state {
            State::Committed => &self.cell,
            State::Trial => &self.trial_cell,
        }
    }

    pub fn trial_particle_mut(&mut self, index: usize) -> &mut Particle {
        &mut self.trial[index]
    }

    pub fn groups(&self) -> &[Group] {
        &self.groups
    }

    pub fn group(&self, index: usize) -> &Group {
        &self.groups[index]
    }

    pub fn tracker(&self) -> &ParticleTracker {
        &self.tracker
    }

    /// Group indices of a molecule kind.
    pub fn groups_of(&self, molecule: usize) -> &[usize] {
        self.mol_tracker.groups_of(molecule)
    }

    /// Number of molecules (groups) of a kind.
    pub fn num_molecules(&self, molecule: usize) -> usize {
        self.mol_tracker.groups_of(molecule).len()
    }

    /// Uniformly pick a group of a molecule kind.
    pub fn random_group(&self, molecule: usize, rng: &mut MoveRng) -> Option<usize> {
        rng.element(self.mol_tracker.groups_of(molecule)).copied()
    }

    /// Group index owning an absolute particle index.
    pub fn group_of_particle(&self, index: usize) -> Option<usize> {
        self.groups.iter().position(|g| g.contains(index))
    }

    /// Append a new group holding `particles` of molecule kind `molecule`.
    ///
    /// The group kind (atomic/molecular) follows the molecule kind. Both
    /// particle vectors, the trackers, and mass centres are updated.
    pub fn add_group(&mut self, molecule: usize, particles: Vec<Particle>) -> anyhow::Result<usize> {
        anyhow::ensure!(
            molecule < self.topology.molecules().len(),
            "unknown molecule kind id {}",
            molecule
        );
        let (name, atomic) = {
            let kind_info = self.topology.molecule(molecule);
            (kind_info.name.clone(), kind_info.atomic)
        };
        let kind = if atomic {
            GroupKind::Atomic
        } else {
            GroupKind::Molecular
        };
        let start = self.committed.len();
        let range = start..start + particles.len();
        for (offset, particle) in particles.iter().enumerate() {
            self.tracker.insert(particle.id, start + offset);
        }
        self.committed.extend(particles.iter().cloned());
        self.trial.extend(particles);
        let mut group = Group::new(&name, molecule, kind, range);
        if group.is_molecular() && !group.is_empty() {
            let cm = self.mass_center_of(State::Committed, group.range());
            group.set_mass_center(cm);
            group.set_trial_mass_center(cm);
        }
        self.groups.push(group);
        let index = self.groups.len() - 1;
        self.mol_tracker.rebuild(&self.groups);
        Ok(index)
    }

    /// Mass centre of an index range in the requested state.
    pub fn mass_center_of(&self, state: State, range: Range<usize>) -> Point {
        let particles = self.particles(state);
        let cell = self.cell_of(state);
        mass_center(cell, range.map(|i| (&particles[i].pos, particles[i].mass)))
    }

    /// Recompute a molecular group's trial mass centre from scratch.
    pub fn update_trial_mass_center(&mut self, group_index: usize) {
        let group = &self.groups[group_index];
        if !group.is_molecular() || group.is_empty() {
            return;
        }
        let cm = self.mass_center_of(State::Trial, group.range());
        self.groups[group_index].set_trial_mass_center(cm);
    }

    /// Overwrite a trial particle position, applying periodic boundaries.
    pub fn set_trial_position(&mut self, index: usize, mut pos: Point) {
        self.trial_cell.boundary(&mut pos);
        self.trial[index].pos = pos;
    }

    /// Translate a single trial particle, applying periodic boundaries.
    pub fn translate_trial_particle(&mut self, index: usize, displacement: &Point) {
        let pos = &mut self.trial[index].pos;
        *pos += displacement;
        self.trial_cell.boundary(pos);
    }

    /// Rigidly translate a whole group's trial state, mass centre included.
    pub fn translate_trial_group(&mut self, group_index: usize, displacement: &Point) {
        let range = self.groups[group_index].range();
        for i in range {
            self.translate_trial_particle(i, displacement);
        }
        let group = &mut self.groups[group_index];
        if let Some(mut cm) = group.trial_mass_center() {
            cm += displacement;
            self.trial_cell.boundary(&mut cm);
            group.set_trial_mass_center(cm);
        }
    }

    /// Rotate a whole group's trial state about a pivot point.
    ///
    /// The trial mass centre is recomputed from scratch afterwards; for an
    /// off-centre pivot it shifts along with the particles.
    pub fn rotate_trial_group(
        &mut self,
        group_index: usize,
        rotation: &UnitQuaternion,
        pivot: &Point,
    ) {
        let range = self.groups[group_index].range();
        for i in range {
            let rotated = rotate_about(&self.trial[i].pos, pivot, rotation, &self.trial_cell);
            self.trial[i].pos = rotated;
            self.trial_cell.boundary(&mut self.trial[i].pos);
            let dipole = &mut self.trial[i].dipole;
            *dipole = rotation * *dipole;
        }
        self.update_trial_mass_center(group_index);
    }

    /// Rescale the trial cell and all trial coordinates by per-axis factors.
    ///
    /// Atomic groups scale every particle position; molecular groups scale
    /// only the mass centre and translate their particles rigidly by the
    /// same vector.
    pub fn scale_trial_volume(&mut self, factors: &Point) -> anyhow::Result<()> {
        use crate::cell::VolumeScale;
        self.trial_cell.scale_lengths(factors)?;
        for group_index in 0..self.groups.len() {
            let range = self.groups[group_index].range();
            if range.is_empty() {
                continue;
            }
            if self.groups[group_index].is_atomic() {
                for i in range {
                    let pos = &mut self.trial[i].pos;
                    pos.component_mul_assign(factors);
                    self.trial_cell.boundary(pos);
                }
            } else {
                let cm = self
                    .groups[group_index]
                    .trial_mass_center()
                    .unwrap_or_else(|| {
                        self.mass_center_of(State::Trial, self.groups[group_index].range())
                    });
                let shift = cm.component_mul(factors) - cm;
                self.translate_trial_group(group_index, &shift);
            }
        }
        Ok(())
    }

    /// Copy a single trial particle into the committed vector.
    pub fn accept_particle(&mut self, index: usize) {
        self.committed[index] = self.trial[index].clone();
    }

    /// Restore a single trial particle from the committed vector.
    pub fn undo_particle(&mut self, index: usize) {
        self.trial[index] = self.committed[index].clone();
    }

    /// Commit a whole group (particles and mass centre).
    pub fn accept_group(&mut self, group_index: usize) {
        let range = self.groups[group_index].range();
        for i in range {
            self.committed[i] = self.trial[i].clone();
        }
        self.groups[group_index].accept_mass_center();
    }

    /// Roll a whole group back (particles and mass centre).
    pub fn undo_group(&mut self, group_index: usize) {
        let range = self.groups[group_index].range();
        for i in range {
            self.trial[i] = self.committed[i].clone();
        }
        self.groups[group_index].undo_mass_center();
    }

    /// Commit mass centre only (used when a single particle of a molecular
    /// group moved and has already been committed individually).
    pub fn accept_group_mass_center(&mut self, group_index: usize) {
        self.groups[group_index].accept_mass_center();
    }

    pub fn undo_group_mass_center(&mut self, group_index: usize) {
        self.groups[group_index].undo_mass_center();
    }

    /// Commit everything: particles, mass centres, and the cell.
    pub fn accept_all(&mut self) {
        self.committed.clone_from(&self.trial);
        self.cell = self.trial_cell.clone();
        for group in self.groups.iter_mut() {
            group.accept_mass_center();
        }
    }

    /// Roll everything back: particles, mass centres, and the cell.
    pub fn reset_trial(&mut self) {
        self.trial.clone_from(&self.committed);
        self.trial_cell = self.cell.clone();
        for group in self.groups.iter_mut() {
            group.undo_mass_center();
        }
    }

    /// Replace the whole trial particle vector (replica exchange).
    ///
    /// The committed vector is untouched; sizes must match.
    pub fn set_trial_particles(&mut self, particles: ParticleVec) -> anyhow::Result<()> {
        anyhow::ensure!(
            particles.len() == self.trial.len(),
            "trial particle vector size mismatch"
        );
        self.trial = particles;
        Ok(())
    }

    /// Re-index one committed particle in the tracker after an identity change.
    pub fn retrack_particle(&mut self, index: usize, old_id: usize) {
        let new_id = self.committed[index].id;
        if new_id != old_id {
            self.tracker.remove(old_id, index);
            self.tracker.insert(new_id, index);
        }
    }

    /// Insert particles at the end of a group, in both state vectors.
    ///
    /// All subsequent group ranges and tracker entries are shifted.
    pub fn insert_particles(
        &mut self,
        group_index: usize,
        particles: &[Particle],
    ) -> anyhow::Result<()> {
        anyhow::ensure!(group_index < self.groups.len(), "no such group");
        let at = self.groups[group_index].end();
        let n = particles.len();
        self.tracker.shift_from(at, n as isize);
        for (offset, particle) in particles.iter().enumerate() {
            self.committed.insert(at + offset, particle.clone());
            self.trial.insert(at + offset, particle.clone());
            self.tracker.insert(particle.id, at + offset);
        }
        self.groups[group_index].expand(n);
        for group in self.groups.iter_mut().skip(group_index + 1) {
            group.shift(n as isize);
        }
        Ok(())
    }

    /// Erase one particle from both state vectors.
    ///
    /// The owning group shrinks; subsequent ranges and tracker entries shift.
    pub fn erase_particle(&mut self, index: usize) -> anyhow::Result<()> {
        anyhow::ensure!(index < self.committed.len(), "particle index out of range");
        let owner = self
            .group_of_particle(index)
            .ok_or_else(|| anyhow::anyhow!("particle {} belongs to no group", index))?;
        let id = self.committed[index].id;
        self.tracker.remove(id, index);
        self.tracker.shift_from(index + 1, -1);
        self.committed.remove(index);
        self.trial.remove(index);
        self.groups[owner].shrink(1);
        // shrink removes from the range end; re-anchor the range start for
        // deletions in the middle by shifting only groups after the owner
        for group in self.groups.iter_mut().skip(owner + 1) {
            group.shift(-1);
        }
        Ok(())
    }

    /// Remove a whole group and its particles from the system.
    pub fn erase_group(&mut self, group_index: usize) -> anyhow::Result<()> {
        anyhow::ensure!(group_index < self.groups.len(), "no such group");
        let range = self.groups[group_index].range();
        let n = range.len();
        self.committed.drain(range.clone());
        self.trial.drain(range);
        self.groups.remove(group_index);
        for group in self.groups.iter_mut().skip(group_index) {
            group.shift(-(n as isize));
        }
        self.tracker.rebuild(&self.committed);
        self.mol_tracker.rebuild(&self.groups);
        Ok(())
    }

    /// Net charge of the requested state.
    pub fn net_charge(&self, state: State) -> f64 {
        self.particles(state).iter().map(|p| p.charge).sum()
    }

    /// Current cell volume of the requested state.
    pub fn volume(&self, state: State) -> f64 {
        self.cell_of(state).volume()
    }

    /// Panic (in debug builds) unless committed and trial states are identical.
    pub fn assert_synchronized(&self) {
        debug_assert_eq!(
            self.committed.len(),
            self.trial.len(),
            "committed/trial size mismatch"
        );
        debug_assert!(
            self.committed == self.trial,
            "trial particle vector out of sync"
        );
        debug_assert_eq!(self.cell, self.trial_cell, "trial cell out of sync");
    }

    /// Exhaustive consistency check used by tests: group contiguity, tracker
    /// completeness, and mass-centre accuracy within 1e-6 per component.
    pub fn check_invariants(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.committed.len() == self.trial.len(),
            "state vectors differ in length"
        );
        let mut expected_start = 0;
        for group in &self.groups {
            anyhow::ensure!(
                group.front() == expected_start,
                "group ranges are not contiguous"
            );
            expected_start = group.end();
        }
        anyhow::ensure!(
            expected_start == self.committed.len(),
            "groups do not partition the particle vector"
        );
        anyhow::ensure!(
            self.tracker.is_consistent_with(&self.committed),
            "particle tracker out of sync"
        );
        for group in &self.groups {
            if group.is_molecular() && !group.is_empty() {
                if let Some(cm) = group.mass_center() {
                    let fresh = self.mass_center_of(State::Committed, group.range());
                    let delta = self.cell.distance(&cm, &fresh);
                    anyhow::ensure!(
                        delta.amax() < 1e-6,
                        "mass centre drift in group '{}'",
                        group.name()
                    );
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::{AtomKind, MoleculeKind};

    fn salt_space() -> Space {
        let na = AtomKind {
            charge: 1.0,
            ..AtomKind::new("Na")
        };
        let cl = AtomKind {
            charge: -1.0,
            ..AtomKind::new("Cl")
        };
        let mut salt = MoleculeKind::new("salt", &["Na", "Cl"]);
        salt.atomic = true;
        let topology = Rc::new(Topology::new(vec![na, cl], vec![salt]).unwrap());
        Space::new(topology, Cell::cubic(20.0))
    }

    fn ion(space: &Space, id: usize, x: f64) -> Particle {
        Particle::from_kind(space.topology().atom(id), Point::new(x, 0.0, 0.0))
    }

    #[test]
    fn add_group_and_track() {
        let mut space = salt_space();
        let particles = vec![ion(&space, 0, 1.0), ion(&space, 1, 2.0)];
        let gi = space.add_group(0, particles).unwrap();
        assert_eq!(space.len(), 2);
        assert_eq!(space.group(gi).len(), 2);
        assert_eq!(space.tracker().count(0), 1);
        assert_eq!(space.tracker().count(1), 1);
        assert_eq!(space.num_molecules(0), 1);
        space.check_invariants().unwrap();
    }

    #[test]
    fn insert_and_erase_particles() {
        let mut space = salt_space();
        let particles = vec![ion(&space, 0, 1.0), ion(&space, 1, 2.0)];
        space.add_group(0, particles).unwrap();

        space
            .insert_particles(0, &[ion(&space, 0, 3.0), ion(&space, 1, 4.0)])
            .unwrap();
        assert_eq!(space.len(), 4);
        assert_eq!(space.group(0).len(), 4);
        assert_eq!(space.tracker().count(0), 2);
        space.check_invariants().unwrap();
        space.assert_synchronized();

        // erase the first sodium; tracker indices shift down
        let victim = space.tracker().indices(0)[0];
        space.erase_particle(victim).unwrap();
        assert_eq!(space.len(), 3);
        assert_eq!(space.tracker().count(0), 1);
        space.check_invariants().unwrap();
        space.assert_synchronized();
    }

    #[test]
    fn group_translate_and_undo() {
        let mut space = salt_space();
        let particles = vec![ion(&space, 0, 1.0), ion(&space, 1, 2.0)];
        space.add_group(0, particles).unwrap();

        let before = space.trial()[0].pos;
        space.translate_trial_group(0, &Point::new(1.0, 0.0, 0.0));
        assert!((space.trial()[0].pos.x - before.x - 1.0).abs() < 1e-12);
        // committed untouched
        assert_eq!(space.committed()[0].pos, before);

        space.undo_group(0);
        space.assert_synchronized();
    }

    #[test]
    fn erase_group_shifts_ranges() {
        let mut space = salt_space();
        space
            .add_group(0, vec![ion(&space, 0, 1.0), ion(&space, 1, 2.0)])
            .unwrap();
        space
            .add_group(0, vec![ion(&space, 0, 3.0), ion(&space, 1, 4.0)])
            .unwrap();
        space.erase_group(0).unwrap();
        assert_eq!(space.groups().len(), 1);
        assert_eq!(space.group(0).range(), 0..2);
        space.check_invariants().unwrap();
    }

    #[test]
    fn charge_is_summed() {
        let mut space = salt_space();
        space
            .add_group(0, vec![ion(&space, 0, 1.0), ion(&space, 1, 2.0)])
            .unwrap();
        assert_eq!(space.net_charge(State::Committed), 0.0);
    }
}
