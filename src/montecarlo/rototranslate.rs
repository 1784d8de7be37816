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

//! Rigid-body translation and rotation of whole molecules.

use super::{AcceptanceMap, Move, MoveBase, MoveList, MIN_DISPLACEMENT};
use crate::cell::BoundaryConditions;
use crate::energy::Hamiltonian;
use crate::space::{Space, State};
use crate::topology::Topology;
use crate::transform::{quaternion_about, random_unit_vector};
use crate::{MoveRng, Point};
use average::{Estimate, Mean};
use serde_json::json;
use std::collections::BTreeMap;
use std::rc::Rc;

/// Rotation cap; there is no point in rotating beyond ±2π.
const MAX_ROTATION: f64 = 4.0 * std::f64::consts::PI;

fn read_f64(
    extras: &serde_json::Map<String, serde_json::Value>,
    key: &str,
    default: f64,
) -> anyhow::Result<f64> {
    match extras.get(key) {
        None => Ok(default),
        Some(value) => value
            .as_f64()
            .ok_or_else(|| anyhow::anyhow!("'{}' must be a number", key)),
    }
}

/// Parse per-molecule `dp`/`dprot` displacement parameters into the list.
fn fill_displacements(
    mollist: &mut MoveList,
    extras: &BTreeMap<usize, serde_json::Map<String, serde_json::Value>>,
) -> anyhow::Result<()> {
    for (&id, extra) in extras {
        let dp = read_f64(extra, "dp", 0.0)?;
        let dprot = read_f64(extra, "dprot", 0.0)?.min(MAX_ROTATION);
        mollist.set_displacements(id, dp, dprot);
    }
    Ok(())
}

/// Combined rigid-body rotation and translation of a random molecule.
///
/// Rotation is about a random axis through the molecular mass centre;
/// translation along the configured direction mask. Acceptance and
/// mean-square displacements are collected per molecule name.
#[derive(Clone, Debug)]
pub struct TranslateRotate {
    base: MoveBase,
    group: Option<usize>,
    dp_trans: f64,
    dp_rot: f64,
    dir: Point,
    angle: f64,
    accmap: AcceptanceMap<String>,
    rotation_msd: BTreeMap<String, Mean>,
}

impl TranslateRotate {
    pub fn from_config(config: &serde_json::Value, space: &Space) -> anyhow::Result<Self> {
        let mut base = MoveBase::new("Group Rotation/Translation");
        let (mut mollist, extras) = MoveList::from_config(config, space.topology())?;
        fill_displacements(&mut mollist, &extras)?;
        base.mollist = mollist;
        Ok(Self {
            base,
            group: None,
            dp_trans: 0.0,
            dp_rot: 0.0,
            dir: Point::new(1.0, 1.0, 1.0),
            angle: 0.0,
            accmap: AcceptanceMap::default(),
            rotation_msd: BTreeMap::new(),
        })
    }

    /// Rotate and translate one group's trial state; returns the rotation angle.
    fn displace_group(
        space: &mut Space,
        group: usize,
        dp_trans: f64,
        dp_rot: f64,
        dir: &Point,
        rng: &mut MoveRng,
    ) -> f64 {
        let mut angle = 0.0;
        if dp_rot > MIN_DISPLACEMENT {
            let axis = random_unit_vector(rng);
            angle = dp_rot * rng.half();
            let rotation = quaternion_about(&axis, angle);
            let pivot = space
                .group(group)
                .trial_mass_center()
                .unwrap_or_else(|| space.mass_center_of(State::Trial, space.group(group).range()));
            space.rotate_trial_group(group, &rotation, &pivot);
        }
        if dp_trans > MIN_DISPLACEMENT {
            let displacement = Point::new(
                dir.x * dp_trans * rng.half(),
                dir.y * dp_trans * rng.half(),
                dir.z * dp_trans * rng.half(),
            );
            space.translate_trial_group(group, &displacement);
        }
        angle
    }
}

impl Move for TranslateRotate {
    fn base(&self) -> &MoveBase {
        &self.base
    }
    fn base_mut(&mut self) -> &mut MoveBase {
        &mut self.base
    }

    fn propose(
        &mut self,
        space: &mut Space,
        _hamiltonian: &Hamiltonian,
        rng: &mut MoveRng,
    ) -> anyhow::Result<()> {
        self.group = None;
        let Some(molecule) = self.base.current_molecule else {
            return Ok(());
        };
        let Some(group) = space.random_group(molecule, rng) else {
            return Ok(());
        };
        if space.group(group).is_empty() {
            return Ok(());
        }
        if let Some(entry) = self.base.mollist.entry(molecule) {
            self.dp_trans = entry.dp1;
            self.dp_rot = entry.dp2;
            self.dir = entry.dir;
        }
        self.group = Some(group);

        #[cfg(debug_assertions)]
        let reference = intra_distance_sample(space, group);

        self.angle = Self::displace_group(space, group, self.dp_trans, self.dp_rot, &self.dir, rng);

        #[cfg(debug_assertions)]
        if self.dp_rot > MIN_DISPLACEMENT {
            // a rigid transform must preserve internal distances
            if let (Some(before), Some(after)) = (reference, intra_distance_sample(space, group)) {
                debug_assert!(
                    (before - after).abs() < 1e-7,
                    "rigid-body rotation distorted internal geometry"
                );
            }
        }

        self.base.change.register_rigid_group(group);
        Ok(())
    }

    fn energy_change(&mut self, space: &Space, hamiltonian: &Hamiltonian) -> f64 {
        if self.dp_rot < MIN_DISPLACEMENT && self.dp_trans < MIN_DISPLACEMENT {
            return 0.0;
        }
        hamiltonian.energy_change(space, &self.base.change)
    }

    fn accept(&mut self, space: &mut Space) {
        let Some(group) = self.group else { return };
        let name = space.group(group).name().to_string();
        let r2 = match (
            space.group(group).mass_center(),
            space.group(group).trial_mass_center(),
        ) {
            (Some(cm), Some(cm_trial)) => space.cell.distance_squared(&cm, &cm_trial),
            _ => 0.0,
        };
        self.accmap.accept(name.clone(), r2);
        let degrees = self.angle.to_degrees();
        self.rotation_msd
            .entry(name)
            .or_insert_with(Mean::new)
            .add(degrees * degrees);
        space.accept_group(group);
    }

    fn reject(&mut self, space: &mut Space) {
        let Some(group) = self.group else { return };
        let name = space.group(group).name().to_string();
        self.accmap.reject(name.clone());
        self.rotation_msd.entry(name).or_insert_with(Mean::new).add(0.0);
        space.undo_group(group);
    }

    fn payload(&self) -> serde_json::Value {
        let mut rotation = serde_json::Map::new();
        for (name, msd) in &self.rotation_msd {
            rotation.insert(name.clone(), json!(msd.mean().sqrt()));
        }
        json!({
            "max translation": self.dp_trans / 2.0,
            "max rotation": (self.dp_rot / 2.0).to_degrees(),
            "groups": self.accmap.to_json(|name| name.clone()),
            "mean rotation": rotation,
        })
    }
}

/// One intra-group distance used to verify rigidity (trial state).
fn intra_distance_sample(space: &Space, group: usize) -> Option<f64> {
    let group = space.group(group);
    if group.len() < 2 {
        return None;
    }
    let particles = space.trial();
    Some(
        space
            .trial_cell
            .distance(
                &particles[group.front()].pos,
                &particles[group.back()].pos,
            )
            .norm(),
    )
}

/// Independent rigid-body displacement of *every* configured molecule in one trial.
///
/// The energy change sums external terms for each moved group, moved×static
/// pairs, and the moved×moved upper triangle.
#[derive(Clone, Debug)]
pub struct TranslateRotateNbody {
    base: MoveBase,
    /// Groups moved in the current trial with their rotation angles.
    moved: Vec<(usize, f64)>,
    accmap: AcceptanceMap<String>,
    rotation_msd: BTreeMap<String, Mean>,
}

impl TranslateRotateNbody {
    pub fn from_config(config: &serde_json::Value, space: &Space) -> anyhow::Result<Self> {
        let mut base = MoveBase::new("Group Rotation/Translation (N-body)");
        let (mut mollist, extras) = MoveList::from_config(config, space.topology())?;
        fill_displacements(&mut mollist, &extras)?;
        base.mollist = mollist;
        Ok(Self {
            base,
            moved: Vec::new(),
            accmap: AcceptanceMap::default(),
            rotation_msd: BTreeMap::new(),
        })
    }
}

impl Move for TranslateRotateNbody {
    fn base(&self) -> &MoveBase {
        &self.base
    }
    fn base_mut(&mut self) -> &mut MoveBase {
        &mut self.base
    }

    fn propose(
        &mut self,
        space: &mut Space,
        _hamiltonian: &Hamiltonian,
        rng: &mut MoveRng,
    ) -> anyhow::Result<()> {
        self.moved.clear();
        for group in 0..space.groups().len() {
            if !space.group(group).is_molecular() || space.group(group).is_empty() {
                continue;
            }
            let molecule = space.group(group).molecule();
            let Some(entry) = self.base.mollist.entry(molecule) else {
                continue;
            };
            let (dp_trans, dp_rot, dir) = (entry.dp1, entry.dp2, entry.dir);

            let mut angle = 0.0;
            if dp_rot > MIN_DISPLACEMENT {
                let axis = random_unit_vector(rng);
                angle = dp_rot * rng.half();
                let rotation = quaternion_about(&axis, angle);
                let pivot = space.group(group).trial_mass_center().unwrap_or_else(|| {
                    space.mass_center_of(State::Trial, space.group(group).range())
                });
                space.rotate_trial_group(group, &rotation, &pivot);
            }
            if dp_trans > MIN_DISPLACEMENT {
                let direction = random_unit_vector(rng);
                let displacement = dp_trans * direction.component_mul(&dir);
                space.translate_trial_group(group, &displacement);
            }
            self.moved.push((group, angle));
            self.base.change.register_rigid_group(group);
        }
        Ok(())
    }

    fn energy_change(&mut self, space: &Space, hamiltonian: &Hamiltonian) -> f64 {
        hamiltonian.energy_change(space, &self.base.change)
    }

    fn accept(&mut self, space: &mut Space) {
        for &(group, angle) in &self.moved {
            let name = space.group(group).name().to_string();
            let r2 = match (
                space.group(group).mass_center(),
                space.group(group).trial_mass_center(),
            ) {
                (Some(cm), Some(cm_trial)) => space.cell.distance_squared(&cm, &cm_trial),
                _ => 0.0,
            };
            self.accmap.accept(name.clone(), r2);
            let degrees = angle.to_degrees();
            self.rotation_msd
                .entry(name)
                .or_insert_with(Mean::new)
                .add(degrees * degrees);
            space.accept_group(group);
        }
    }

    fn reject(&mut self, space: &mut Space) {
        for &(group, _) in &self.moved {
            let name = space.group(group).name().to_string();
            self.accmap.reject(name.clone());
            self.rotation_msd.entry(name).or_insert_with(Mean::new).add(0.0);
            space.undo_group(group);
        }
    }

    fn payload(&self) -> serde_json::Value {
        json!({
            "groups": self.accmap.to_json(|name| name.clone()),
        })
    }
}

/// Symmetric two-body move: two molecules displace along their
/// centre-to-centre vector, in opposite directions, and may rotate.
///
/// The smaller of the two per-molecule `dp` values governs the translation.
#[derive(Clone, Debug)]
pub struct TranslateRotateTwobody {
    base: MoveBase,
    molecules: [usize; 2],
    dp_trans: f64,
    moved: Vec<(usize, f64)>,
    accmap: AcceptanceMap<String>,
}

impl TranslateRotateTwobody {
    pub fn from_config(config: &serde_json::Value, space: &Space) -> anyhow::Result<Self> {
        let mut base = MoveBase::new("Group Rotation/Translation (2-body, symmetric)");
        let (mut mollist, extras) = MoveList::from_config(config, space.topology())?;
        fill_displacements(&mut mollist, &extras)?;
        anyhow::ensure!(
            mollist.len() == 2,
            "symmetric two-body move requires exactly two molecules"
        );
        let ids = mollist.molecules();
        let molecules = [ids[0], ids[1]];
        for &id in &molecules {
            anyhow::ensure!(
                !space.groups_of(id).is_empty(),
                "no molecule of kind '{}' in the system",
                space.topology().molecule(id).name
            );
        }
        let dp_trans = molecules
            .iter()
            .filter_map(|&id| mollist.entry(id))
            .map(|e| e.dp1)
            .fold(f64::INFINITY, f64::min);
        base.mollist = mollist;
        Ok(Self {
            base,
            molecules,
            dp_trans,
            moved: Vec::new(),
            accmap: AcceptanceMap::default(),
        })
    }
}

impl Move for TranslateRotateTwobody {
    fn base(&self) -> &MoveBase {
        &self.base
    }
    fn base_mut(&mut self) -> &mut MoveBase {
        &mut self.base
    }

    fn propose(
        &mut self,
        space: &mut Space,
        _hamiltonian: &Hamiltonian,
        rng: &mut MoveRng,
    ) -> anyhow::Result<()> {
        self.moved.clear();
        let g0 = space.groups_of(self.molecules[0]).first().copied();
        let g1 = space.groups_of(self.molecules[1]).first().copied();
        let (Some(g0), Some(g1)) = (g0, g1) else {
            return Ok(());
        };
        let (Some(cm0), Some(cm1)) = (
            space.group(g0).trial_mass_center(),
            space.group(g1).trial_mass_center(),
        ) else {
            return Ok(());
        };

        let mut axis = space.trial_cell.distance(&cm0, &cm1);
        if axis.norm() < MIN_DISPLACEMENT {
            axis = random_unit_vector(rng);
        }
        axis.normalize_mut();
        let shift = axis * self.dp_trans * rng.half();

        for (i, &group) in [g0, g1].iter().enumerate() {
            let molecule = space.group(group).molecule();
            let dp_rot = self.base.mollist.entry(molecule).map_or(0.0, |e| e.dp2);
            let mut angle = 0.0;
            if dp_rot > MIN_DISPLACEMENT {
                let rotation_axis = random_unit_vector(rng);
                angle = dp_rot * rng.half();
                let rotation = quaternion_about(&rotation_axis, angle);
                let pivot = space.group(group).trial_mass_center().unwrap_or_else(|| {
                    space.mass_center_of(State::Trial, space.group(group).range())
                });
                space.rotate_trial_group(group, &rotation, &pivot);
            }
            if self.dp_trans > MIN_DISPLACEMENT {
                let displacement = if i == 0 { shift } else { -shift };
                space.translate_trial_group(group, &displacement);
            }
            self.moved.push((group, angle));
            self.base.change.register_rigid_group(group);
        }
        Ok(())
    }

    fn energy_change(&mut self, space: &Space, hamiltonian: &Hamiltonian) -> f64 {
        hamiltonian.energy_change(space, &self.base.change)
    }

    fn accept(&mut self, space: &mut Space) {
        for &(group, _) in &self.moved {
            let name = space.group(group).name().to_string();
            let r2 = match (
                space.group(group).mass_center(),
                space.group(group).trial_mass_center(),
            ) {
                (Some(cm), Some(cm_trial)) => space.cell.distance_squared(&cm, &cm_trial),
                _ => 0.0,
            };
            self.accmap.accept(name, r2);
            space.accept_group(group);
        }
    }

    fn reject(&mut self, space: &mut Space) {
        for &(group, _) in &self.moved {
            self.accmap.reject(space.group(group).name().to_string());
            space.undo_group(group);
        }
    }

    fn payload(&self) -> serde_json::Value {
        json!({
            "max translation": self.dp_trans / 2.0,
            "groups": self.accmap.to_json(|name| name.clone()),
        })
    }
}

/// Replace a molecule by a random conformation from its library.
///
/// The new conformation is randomly oriented and centred on the existing
/// mass centre, which therefore must not drift. The internal energy
/// difference between old and new conformations enters the *reported*
/// energy only; the library is assumed to be Boltzmann weighted.
#[derive(Clone, Debug)]
pub struct ConformationSwap {
    base: MoveBase,
    topology: Rc<Topology>,
    group: Option<usize>,
    accmap: AcceptanceMap<String>,
}

impl ConformationSwap {
    pub fn from_config(config: &serde_json::Value, space: &Space) -> anyhow::Result<Self> {
        let mut base = MoveBase::new("Conformation Swap");
        let (mollist, _extras) = MoveList::from_config(config, space.topology())?;
        for id in mollist.molecules() {
            anyhow::ensure!(
                !space.topology().molecule(id).conformations.is_empty(),
                "molecule '{}' has no conformation library",
                space.topology().molecule(id).name
            );
        }
        base.mollist = mollist;
        Ok(Self {
            base,
            topology: space.topology_rc(),
            group: None,
            accmap: AcceptanceMap::default(),
        })
    }
}

impl Move for ConformationSwap {
    fn base(&self) -> &MoveBase {
        &self.base
    }
    fn base_mut(&mut self) -> &mut MoveBase {
        &mut self.base
    }

    fn propose(
        &mut self,
        space: &mut Space,
        _hamiltonian: &Hamiltonian,
        rng: &mut MoveRng,
    ) -> anyhow::Result<()> {
        self.group = None;
        let Some(molecule) = self.base.current_molecule else {
            return Ok(());
        };
        let Some(group) = space.random_group(molecule, rng) else {
            return Ok(());
        };
        if space.group(group).is_empty() {
            return Ok(());
        }
        self.group = Some(group);

        let kind = self.topology.molecule(molecule);
        let conformation = kind
            .random_conformation(rng)
            .ok_or_else(|| anyhow::anyhow!("empty conformation library"))?
            .clone();
        anyhow::ensure!(
            conformation.len() == space.group(group).len(),
            "conformation atom count mismatch"
        );

        let masses: Vec<f64> = kind
            .atom_ids()
            .iter()
            .map(|&id| self.topology.atom(id).mass)
            .collect();
        let conformation_cm =
            crate::topology::conformation_mass_center(&conformation, &masses);

        let target_cm = space
            .group(group)
            .trial_mass_center()
            .unwrap_or_else(|| space.mass_center_of(State::Trial, space.group(group).range()));
        let rotation = quaternion_about(
            &random_unit_vector(rng),
            rng.uniform() * 2.0 * std::f64::consts::PI,
        );

        let front = space.group(group).front();
        for (offset, pos) in conformation.iter().enumerate() {
            let mut new = target_cm + rotation * (pos - conformation_cm);
            space.trial_cell.boundary(&mut new);
            space.trial_particle_mut(front + offset).pos = new;
        }
        space.update_trial_mass_center(group);

        // this move must not displace the mass centre
        let new_cm = space
            .group(group)
            .trial_mass_center()
            .expect("molecular group has a trial mass centre");
        anyhow::ensure!(
            space.trial_cell.distance(&new_cm, &target_cm).norm() < 1e-6,
            "unexpected mass centre movement in conformation swap"
        );

        self.base.change.register_rigid_group(group);
        Ok(())
    }

    fn energy_change(&mut self, space: &Space, hamiltonian: &Hamiltonian) -> f64 {
        let du = hamiltonian.energy_change(space, &self.base.change);
        if let Some(group) = self.group {
            let internal = hamiltonian.group_internal(space, State::Trial, group)
                - hamiltonian.group_internal(space, State::Committed, group);
            self.base.alternate_energy = Some(du + internal);
        }
        du
    }

    fn accept(&mut self, space: &mut Space) {
        let Some(group) = self.group else { return };
        self.accmap.accept(space.group(group).name().to_string(), 0.0);
        space.accept_group(group);
    }

    fn reject(&mut self, space: &mut Space) {
        let Some(group) = self.group else { return };
        self.accmap.reject(space.group(group).name().to_string());
        space.undo_group(group);
    }

    fn payload(&self) -> serde_json::Value {
        json!({
            "groups": self.accmap.to_json(|name| name.clone()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::Cell;
    use crate::topology::{AtomKind, MoleculeKind, Topology};
    use crate::Particle;

    fn dimer_space(dp: f64, dprot: f64) -> (Space, serde_json::Value) {
        let kind = AtomKind::new("A");
        let dimer = MoleculeKind::new("dimer", &["A", "A"]);
        let topology = Rc::new(Topology::new(vec![kind], vec![dimer]).unwrap());
        let mut space = Space::new(topology, Cell::cubic(30.0));
        for i in 0..3 {
            let x = i as f64 * 5.0;
            let a = Particle::from_kind(space.topology().atom(0), Point::new(x, 0.0, 0.0));
            let b = Particle::from_kind(space.topology().atom(0), Point::new(x, 1.5, 0.0));
            space.add_group(0, vec![a, b]).unwrap();
        }
        let config = serde_json::json!({"dimer": {"dp": dp, "dprot": dprot, "permol": true}});
        (space, config)
    }

    #[test]
    fn ideal_move_always_accepts_and_keeps_invariants() {
        let (mut space, config) = dimer_space(1.0, 0.8);
        let mut hamiltonian = Hamiltonian::ideal();
        let mut rng = MoveRng::seeded(7);
        let mut mv = TranslateRotate::from_config(&config, &space).unwrap();
        for _ in 0..200 {
            mv.step(&mut space, &mut hamiltonian, &mut rng, 1).unwrap();
        }
        assert_eq!(
            mv.base().statistics.num_accepted,
            mv.base().statistics.num_trials
        );
        space.check_invariants().unwrap();
    }

    #[test]
    fn zero_displacement_reports_zero_energy() {
        let (mut space, config) = dimer_space(0.0, 0.0);
        let mut hamiltonian = Hamiltonian::ideal();
        let mut rng = MoveRng::seeded(7);
        let mut mv = TranslateRotate::from_config(&config, &space).unwrap();
        let du = mv.step(&mut space, &mut hamiltonian, &mut rng, 1).unwrap();
        assert_eq!(du, 0.0);
    }

    #[test]
    fn rotation_preserves_bond_length() {
        let (mut space, config) = dimer_space(0.0, 1.5);
        let hamiltonian = Hamiltonian::ideal();
        let mut rng = MoveRng::seeded(19);
        let mut mv = TranslateRotate::from_config(&config, &space).unwrap();
        mv.base_mut().current_molecule = Some(0);
        for _ in 0..50 {
            mv.propose(&mut space, &hamiltonian, &mut rng).unwrap();
            let bond = space
                .trial_cell
                .distance(&space.trial()[0].pos, &space.trial()[1].pos)
                .norm();
            mv.reject(&mut space);
            mv.base_mut().change.clear();
            assert!((bond - 1.5).abs() < 1e-7);
        }
        space.assert_synchronized();
    }

    #[test]
    fn nbody_moves_every_group() {
        let (mut space, config) = dimer_space(1.0, 0.5);
        let mut hamiltonian = Hamiltonian::ideal();
        let mut rng = MoveRng::seeded(29);
        let mut mv = TranslateRotateNbody::from_config(&config, &space).unwrap();
        mv.step(&mut space, &mut hamiltonian, &mut rng, 1).unwrap();
        assert_eq!(mv.moved.len(), 3);
        space.check_invariants().unwrap();
    }

    #[test]
    fn conformation_swap_keeps_mass_center() {
        let kind = AtomKind::new("A");
        let mut dimer = MoleculeKind::new("dimer", &["A", "A"]);
        dimer.conformations = vec![
            vec![Point::new(0.0, 0.0, 0.0), Point::new(2.0, 0.0, 0.0)],
            vec![Point::new(0.0, 0.0, 0.0), Point::new(0.0, 3.0, 0.0)],
        ];
        let topology = Rc::new(Topology::new(vec![kind], vec![dimer]).unwrap());
        let mut space = Space::new(topology, Cell::cubic(30.0));
        let a = Particle::from_kind(space.topology().atom(0), Point::new(1.0, 1.0, 1.0));
        let b = Particle::from_kind(space.topology().atom(0), Point::new(3.0, 1.0, 1.0));
        space.add_group(0, vec![a, b]).unwrap();
        let cm_before = space.group(0).mass_center().unwrap();

        let config = serde_json::json!({"dimer": {}});
        let mut hamiltonian = Hamiltonian::ideal();
        let mut rng = MoveRng::seeded(31);
        let mut mv = ConformationSwap::from_config(&config, &space).unwrap();
        for _ in 0..20 {
            mv.step(&mut space, &mut hamiltonian, &mut rng, 1).unwrap();
        }
        let cm_after = space.group(0).mass_center().unwrap();
        assert!(space.cell.distance(&cm_before, &cm_after).norm() < 1e-6);
        space.check_invariants().unwrap();
    }
}
