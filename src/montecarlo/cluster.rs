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

//! Cluster moves: collective displacement of a seed molecule together with
//! its geometric neighbourhood.
//!
//! The probabilistic link criterion makes the proposal distribution depend
//! on the current configuration, so detailed balance requires the cluster
//! bias correction `Π (1 - P_new(l)) / (1 - P_old(l))` over all mobile
//! particles *not* recruited into the cluster (Frenkel & Smit, 2nd ed.,
//! p. 405). The Metropolis energy therefore becomes `ΔU - ln(bias)`.

use super::{AcceptanceMap, Move, MoveBase, MoveList, MIN_CLUSTER_BIAS, MIN_DISPLACEMENT};
use crate::cell::{BoundaryConditions, Cell, Shape};
use crate::energy::Hamiltonian;
use crate::space::{Space, State};
use crate::transform::{mass_center, quaternion_about, random_unit_vector, rotate_about};
use crate::{MoveRng, Point};
use average::{Estimate, Mean};
use serde_json::json;
use std::collections::BTreeMap;

/// Step-function link criterion: 1 if particle `index` lies within
/// `threshold` of any particle of `seed` (surface-to-surface), else 0.
fn link_probability(
    space: &Space,
    state: State,
    seed: usize,
    index: usize,
    threshold: f64,
) -> f64 {
    let particles = space.particles(state);
    let cell = space.cell_of(state);
    let p = &particles[index];
    for j in space.group(seed).iter() {
        if j == index {
            continue;
        }
        let q = &particles[j];
        let contact = threshold + p.radius + q.radius;
        if cell.distance_squared(&p.pos, &q.pos) < contact * contact {
            return 1.0;
        }
    }
    0.0
}

/// Rigid displacement of one macromolecule together with nearby particles
/// from a mobile atomic pool.
///
/// Mobile particles are recruited by the link criterion before the move and
/// follow the seed's rotation and translation. Acceptance is corrected by
/// the cluster bias; a bias below 10⁻⁷ rejects without an energy evaluation.
#[derive(Clone, Debug)]
pub struct TranslateRotateCluster {
    base: MoveBase,
    /// Molecule kind of the mobile atomic pool.
    mobile_molecule: usize,
    threshold: f64,
    group: Option<usize>,
    /// Absolute indices of recruited mobile particles.
    cluster: Vec<usize>,
    dp_trans: f64,
    dp_rot: f64,
    dir: Point,
    angle: f64,
    average_size: Mean,
    average_bias: Mean,
    accmap: AcceptanceMap<String>,
}

impl TranslateRotateCluster {
    pub fn from_config(config: &serde_json::Value, space: &Space) -> anyhow::Result<Self> {
        let mut base = MoveBase::new("Cluster Group Rotation/Translation");
        base.cite = Some("doi:10/cj9gnn");
        let (mut mollist, extras) = MoveList::from_config(config, space.topology())?;
        anyhow::ensure!(
            mollist.len() == 1,
            "only one cluster seed molecule is allowed"
        );
        let seed = mollist.molecules()[0];
        let extra = &extras[&seed];
        let threshold = extra
            .get("threshold")
            .and_then(|v| v.as_f64())
            .ok_or_else(|| anyhow::anyhow!("cluster move requires 'threshold'"))?;
        let dp = extra.get("dp").and_then(|v| v.as_f64()).unwrap_or(0.0);
        let dprot = extra.get("dprot").and_then(|v| v.as_f64()).unwrap_or(0.0);
        mollist.set_displacements(seed, dp, dprot);

        let mobile_name = extra
            .get("clustergroup")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("cluster move requires 'clustergroup'"))?;
        let mobile_molecule =
            super::find_molecule_id(space.topology(), mobile_name, "cluster move")?;
        anyhow::ensure!(
            space.topology().molecule(mobile_molecule).atomic,
            "cluster group '{}' must be atomic",
            mobile_name
        );
        anyhow::ensure!(
            space.groups_of(mobile_molecule).len() == 1,
            "cluster group '{}' is ill defined",
            mobile_name
        );

        base.mollist = mollist;
        Ok(Self {
            base,
            mobile_molecule,
            threshold,
            group: None,
            cluster: Vec::new(),
            dp_trans: 0.0,
            dp_rot: 0.0,
            dir: Point::new(1.0, 1.0, 1.0),
            angle: 0.0,
            average_size: Mean::new(),
            average_bias: Mean::new(),
            accmap: AcceptanceMap::default(),
        })
    }

    fn mobile_group(&self, space: &Space) -> Option<usize> {
        space.groups_of(self.mobile_molecule).first().copied()
    }
}

impl Move for TranslateRotateCluster {
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
        self.cluster.clear();
        let Some(molecule) = self.base.current_molecule else {
            return Ok(());
        };
        let Some(group) = space.random_group(molecule, rng) else {
            return Ok(());
        };
        let Some(mobile) = self.mobile_group(space) else {
            return Ok(());
        };
        if let Some(entry) = self.base.mollist.entry(molecule) {
            self.dp_trans = entry.dp1;
            self.dp_rot = entry.dp2;
            self.dir = entry.dir;
        }
        self.group = Some(group);

        // recruit mobile particles around the seed
        for i in space.group(mobile).iter() {
            if link_probability(space, State::Committed, group, i, self.threshold) > rng.uniform()
            {
                self.cluster.push(i);
            }
        }

        self.angle = 0.0;
        if self.dp_rot > MIN_DISPLACEMENT {
            self.angle = self.dp_rot * rng.half();
            let axis = random_unit_vector(rng);
            let rotation = quaternion_about(&axis, self.angle);
            let pivot = space
                .group(group)
                .trial_mass_center()
                .unwrap_or_else(|| space.mass_center_of(State::Trial, space.group(group).range()));
            space.rotate_trial_group(group, &rotation, &pivot);
            for &i in &self.cluster {
                let pivoted =
                    rotate_about(&space.trial()[i].pos, &pivot, &rotation, &space.trial_cell);
                space.set_trial_position(i, pivoted);
            }
        }
        if self.dp_trans > MIN_DISPLACEMENT {
            let displacement = Point::new(
                self.dir.x * self.dp_trans * rng.half(),
                self.dir.y * self.dp_trans * rng.half(),
                self.dir.z * self.dp_trans * rng.half(),
            );
            space.translate_trial_group(group, &displacement);
            for &i in &self.cluster {
                space.translate_trial_particle(i, &displacement);
            }
        }

        self.base.change.register_rigid_group(group);
        for &i in &self.cluster {
            self.base.change.register_particle(mobile, i);
        }
        Ok(())
    }

    fn energy_change(&mut self, space: &Space, hamiltonian: &Hamiltonian) -> f64 {
        let Some(group) = self.group else { return 0.0 };
        let Some(mobile) = self.mobile_group(space) else {
            return 0.0;
        };

        let mut numerator = 1.0;
        let mut denominator = 1.0;
        for l in space.group(mobile).iter() {
            if self.cluster.contains(&l) {
                continue;
            }
            numerator *= 1.0 - link_probability(space, State::Trial, group, l, self.threshold);
            denominator *= 1.0 - link_probability(space, State::Committed, group, l, self.threshold);
        }
        if denominator == 0.0 {
            return f64::INFINITY;
        }
        let bias = numerator / denominator;
        self.average_bias.add(bias);
        if bias < MIN_CLUSTER_BIAS {
            return f64::INFINITY;
        }

        if self.dp_rot < MIN_DISPLACEMENT && self.dp_trans < MIN_DISPLACEMENT {
            return 0.0;
        }

        let du = hamiltonian.energy_change(space, &self.base.change);
        if du.is_infinite() {
            return du;
        }
        // the bias enters the Metropolis test only, not the reported energy
        self.base.alternate_energy = Some(du);
        du - bias.ln()
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
        self.accmap.accept(name, r2);
        space.accept_group(group);
        for &i in &self.cluster {
            space.accept_particle(i);
        }
        self.average_size.add(self.cluster.len() as f64);
    }

    fn reject(&mut self, space: &mut Space) {
        let Some(group) = self.group else { return };
        self.accmap.reject(space.group(group).name().to_string());
        space.undo_group(group);
        for &i in &self.cluster {
            space.undo_particle(i);
        }
    }

    fn payload(&self) -> serde_json::Value {
        let mut value = json!({
            "threshold": self.threshold,
            "groups": self.accmap.to_json(|name| name.clone()),
        });
        if !self.average_size.is_empty() {
            value["average cluster size"] = json!(self.average_size.mean());
        }
        if !self.average_bias.is_empty() {
            value["average bias"] = json!(self.average_bias.mean());
        }
        value
    }
}

/// Collective move of whole molecules recruited recursively around a seed.
///
/// Starting from a random seed molecule, other molecules join the cluster
/// through the link criterion, and the recruitment recurses through every
/// newly added member. Per-seed lists of *static* molecule kinds can never
/// be recruited, allowing segregated phases. If the cluster's extent
/// exceeds half of any periodic box side, rotation is suppressed and only a
/// translation is attempted, since a rotation would alias across the
/// periodic image and invalidate the bias.
#[derive(Clone, Debug)]
pub struct ClusterMove {
    base: MoveBase,
    /// Per seed-molecule-kind link threshold.
    thresholds: BTreeMap<usize, f64>,
    /// Per seed-molecule-kind list of unrecruitable molecule kinds.
    static_kinds: BTreeMap<usize, Vec<usize>>,
    /// Group indices of the current cluster; the seed comes first.
    cluster: Vec<usize>,
    angle: f64,
    rotation_suppressed: usize,
    average_size: Mean,
    average_bias: Mean,
    accmap: AcceptanceMap<String>,
}

impl ClusterMove {
    pub fn from_config(config: &serde_json::Value, space: &Space) -> anyhow::Result<Self> {
        let mut base = MoveBase::new("Cluster Molecule Rotation/Translation");
        base.cite = Some("doi:10/cj9gnn");
        let (mut mollist, extras) = MoveList::from_config(config, space.topology())?;
        let mut thresholds = BTreeMap::new();
        let mut static_kinds = BTreeMap::new();
        for (&id, extra) in &extras {
            let threshold = extra
                .get("threshold")
                .and_then(|v| v.as_f64())
                .ok_or_else(|| anyhow::anyhow!("cluster move requires 'threshold'"))?;
            thresholds.insert(id, threshold);
            let dp = extra.get("dp").and_then(|v| v.as_f64()).unwrap_or(0.0);
            let dprot = extra.get("dprot").and_then(|v| v.as_f64()).unwrap_or(0.0);
            mollist.set_displacements(id, dp, dprot);

            let mut statics = Vec::new();
            if let Some(names) = extra.get("staticmol").and_then(|v| v.as_array()) {
                for name in names {
                    let name = name
                        .as_str()
                        .ok_or_else(|| anyhow::anyhow!("'staticmol' must list molecule names"))?;
                    let id = space
                        .topology()
                        .find_molecule(name)
                        .ok_or_else(|| anyhow::anyhow!("unknown static molecule '{}'", name))?;
                    statics.push(id);
                }
            }
            static_kinds.insert(id, statics);
        }
        base.mollist = mollist;
        Ok(Self {
            base,
            thresholds,
            static_kinds,
            cluster: Vec::new(),
            angle: 0.0,
            rotation_suppressed: 0,
            average_size: Mean::new(),
            average_bias: Mean::new(),
            accmap: AcceptanceMap::default(),
        })
    }

    fn threshold_of(&self, molecule: usize) -> f64 {
        self.thresholds.get(&molecule).copied().unwrap_or(0.0)
    }

    fn is_static_for(&self, seed_molecule: usize, other_molecule: usize) -> bool {
        self.static_kinds
            .get(&seed_molecule)
            .is_some_and(|list| list.contains(&other_molecule))
    }

    /// Recursively grow the cluster around every member.
    fn grow(&mut self, space: &Space, rng: &mut MoveRng) {
        let mut stack: Vec<usize> = self.cluster.clone();
        while let Some(member) = stack.pop() {
            let member_molecule = space.group(member).molecule();
            let threshold = self.threshold_of(member_molecule);
            for candidate in 0..space.groups().len() {
                if self.cluster.contains(&candidate) {
                    continue;
                }
                let candidate_molecule = space.group(candidate).molecule();
                if self.is_static_for(member_molecule, candidate_molecule) {
                    continue;
                }
                for t in space.group(candidate).iter() {
                    if link_probability(space, State::Committed, member, t, threshold)
                        > rng.uniform()
                    {
                        self.cluster.push(candidate);
                        stack.push(candidate);
                        break;
                    }
                }
            }
        }
    }

    /// Longest extent of the cluster: maximum distance from the cluster mass
    /// centre plus the maximum internal molecule span.
    fn cluster_extent(&self, space: &Space) -> f64 {
        let particles = space.trial();
        let cell = &space.trial_cell;
        let mut span: f64 = 0.0;
        for &g in &self.cluster {
            let range = space.group(g).range();
            for i in range.clone() {
                for j in (i + 1)..range.end {
                    span = span.max(cell.distance(&particles[i].pos, &particles[j].pos).norm());
                }
            }
        }
        let cm = self.cluster_mass_center(space);
        let mut radial: f64 = 0.0;
        for &g in &self.cluster {
            for i in space.group(g).iter() {
                radial = radial.max(cell.distance(&cm, &particles[i].pos).norm());
            }
        }
        radial + span
    }

    fn cluster_mass_center(&self, space: &Space) -> Point {
        let particles = space.trial();
        mass_center(
            &space.trial_cell,
            self.cluster
                .iter()
                .flat_map(|&g| space.group(g).iter())
                .map(|i| (&particles[i].pos, particles[i].mass)),
        )
    }

    /// Pairwise "any atom recruited" probability between a cluster member and
    /// an outside group, `1 - Π_t (1 - P(t))`.
    fn recruit_probability(&self, space: &Space, state: State, member: usize, other: usize) -> f64 {
        let threshold = self.threshold_of(space.group(member).molecule());
        let mut none = 1.0;
        for t in space.group(other).iter() {
            none *= 1.0 - link_probability(space, state, member, t, threshold);
            if none == 0.0 {
                break;
            }
        }
        1.0 - none
    }
}

impl Move for ClusterMove {
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
        self.cluster.clear();
        let Some(molecule) = self.base.current_molecule else {
            return Ok(());
        };
        let Some(seed) = space.random_group(molecule, rng) else {
            return Ok(());
        };
        self.cluster.push(seed);
        self.grow(space, rng);

        let (dp_trans, dp_rot) = self
            .base
            .mollist
            .entry(molecule)
            .map_or((0.0, 0.0), |e| (e.dp1, e.dp2));

        self.angle = 0.0;
        let mut rotate = dp_rot > MIN_DISPLACEMENT;
        if rotate {
            if let Cell::Cuboid(cuboid) = &space.cell {
                if self.cluster_extent(space) > 0.5 * cuboid.min_side() {
                    rotate = false;
                    self.rotation_suppressed += 1;
                }
            }
        }

        if rotate {
            self.angle = dp_rot * rng.half();
            let axis = random_unit_vector(rng);
            let rotation = quaternion_about(&axis, self.angle);
            let pivot = self.cluster_mass_center(space);
            for &g in &self.cluster {
                space.rotate_trial_group(g, &rotation, &pivot);
            }
        } else if dp_trans > MIN_DISPLACEMENT {
            let displacement = random_unit_vector(rng) * dp_trans * 0.5;
            for &g in &self.cluster {
                space.translate_trial_group(g, &displacement);
            }
        }

        for &g in &self.cluster {
            self.base.change.register_rigid_group(g);
        }
        Ok(())
    }

    fn energy_change(&mut self, space: &Space, hamiltonian: &Hamiltonian) -> f64 {
        if self.cluster.is_empty() {
            return 0.0;
        }
        let molecule = self.base.current_molecule.expect("seed molecule selected");

        let mut bias = 1.0;
        for &member in &self.cluster {
            let member_molecule = space.group(member).molecule();
            for other in 0..space.groups().len() {
                if self.cluster.contains(&other) {
                    continue;
                }
                if self.is_static_for(member_molecule, space.group(other).molecule()) {
                    continue;
                }
                let a = self.recruit_probability(space, State::Trial, member, other);
                let b = self.recruit_probability(space, State::Committed, member, other);
                let in_new = (a - 1.0).abs() < 1e-9;
                let in_old = (b - 1.0).abs() < 1e-9;
                if in_new && in_old {
                    continue;
                }
                // moving in or out of certain recruitment breaks reversibility
                if in_new != in_old && (a.min(b)) < 1e-9 {
                    return f64::INFINITY;
                }
                if a < 1e-9 && b < 1e-9 {
                    continue;
                }
                bias *= (1.0 - a) / (1.0 - b);
            }
        }
        assert!(bias >= 0.0, "negative cluster bias");
        self.average_bias.add(bias);
        if bias < MIN_CLUSTER_BIAS {
            return f64::INFINITY;
        }

        let (dp_trans, dp_rot) = self
            .base
            .mollist
            .entry(molecule)
            .map_or((0.0, 0.0), |e| (e.dp1, e.dp2));
        if dp_rot < MIN_DISPLACEMENT && dp_trans < MIN_DISPLACEMENT {
            return 0.0;
        }

        // hard wall collisions reject deterministically
        for &g in &self.cluster {
            for i in space.group(g).iter() {
                let p = &space.trial()[i];
                if space.trial_cell.collision(&p.pos, p.radius) {
                    return f64::INFINITY;
                }
            }
        }

        // external terms plus cluster × non-cluster pairs; internal cluster
        // distances are preserved by the rigid displacement
        let mut unew = 0.0;
        let mut uold = 0.0;
        for &g in &self.cluster {
            unew += hamiltonian.group_external(space, State::Trial, g);
            uold += hamiltonian.group_external(space, State::Committed, g);
            for other in 0..space.groups().len() {
                if self.cluster.contains(&other) {
                    continue;
                }
                unew += hamiltonian.group_group(space, State::Trial, g, other);
                if unew.is_infinite() {
                    return f64::INFINITY;
                }
                uold += hamiltonian.group_group(space, State::Committed, g, other);
            }
        }
        let du = unew - uold;
        self.base.alternate_energy = Some(du);
        du - bias.ln()
    }

    fn accept(&mut self, space: &mut Space) {
        for &g in &self.cluster {
            space.accept_group(g);
        }
        if let Some(&seed) = self.cluster.first() {
            self.accmap.accept(space.group(seed).name().to_string(), 0.0);
        }
        self.average_size.add(self.cluster.len() as f64);
    }

    fn reject(&mut self, space: &mut Space) {
        for &g in &self.cluster {
            space.undo_group(g);
        }
        if let Some(&seed) = self.cluster.first() {
            self.accmap.reject(space.group(seed).name().to_string());
        }
    }

    fn payload(&self) -> serde_json::Value {
        let mut value = json!({
            "groups": self.accmap.to_json(|name| name.clone()),
            "suppressed rotations": self.rotation_suppressed,
        });
        if !self.average_size.is_empty() {
            value["average cluster size"] = json!(self.average_size.mean());
        }
        if !self.average_bias.is_empty() {
            value["average bias"] = json!(self.average_bias.mean());
        }
        value
    }
}

/// Rejection-free cluster translation for symmetric pair potentials in
/// purely molecular systems.
///
/// One seed group is translated; every other group joins the moving set
/// with probability `1 - exp(-ΔU_ij)` as the displacement sweeps through
/// the system. All translations commit immediately and the move is never
/// rejected. The reported energy is the full before/after difference, or
/// zero when `skipenergy` is set (faster, at the cost of an apparent drift
/// flagged by the propagator audit).
#[derive(Clone, Debug)]
pub struct ClusterTranslateNr {
    base: MoveBase,
    dp: f64,
    skip_energy: bool,
    move_fraction: Mean,
}

impl ClusterTranslateNr {
    pub fn from_config(config: &serde_json::Value, space: &Space) -> anyhow::Result<Self> {
        let mut base = MoveBase::new("Rejection Free Cluster Translation");
        base.cite = Some("doi:10/fthw8k");
        let dp = config
            .get("dp")
            .and_then(|v| v.as_f64())
            .ok_or_else(|| anyhow::anyhow!("rejection-free cluster move requires 'dp'"))?;
        let skip_energy = config
            .get("skipenergy")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        base.runfraction = config.get("prob").and_then(|v| v.as_f64()).unwrap_or(1.0);
        if dp < MIN_DISPLACEMENT {
            base.runfraction = 0.0;
        }
        anyhow::ensure!(
            space.groups().iter().all(|g| g.is_molecular()),
            "rejection-free cluster translation requires a purely molecular system"
        );
        Ok(Self {
            base,
            dp,
            skip_energy,
            move_fraction: Mean::new(),
        })
    }

    fn total_group_energy(space: &Space, hamiltonian: &Hamiltonian) -> f64 {
        use itertools::Itertools;
        (0..space.groups().len())
            .tuple_combinations()
            .map(|(i, j)| hamiltonian.group_group(space, State::Committed, i, j))
            .sum()
    }
}

impl Move for ClusterTranslateNr {
    fn base(&self) -> &MoveBase {
        &self.base
    }
    fn base_mut(&mut self) -> &mut MoveBase {
        &mut self.base
    }

    fn propose(
        &mut self,
        space: &mut Space,
        hamiltonian: &Hamiltonian,
        rng: &mut MoveRng,
    ) -> anyhow::Result<()> {
        let n = space.groups().len();
        if n == 0 {
            return Ok(());
        }
        let mut du = 0.0;
        if !self.skip_energy {
            du -= Self::total_group_energy(space, hamiltonian);
        }

        let displacement = Point::new(
            self.dp * rng.half(),
            self.dp * rng.half(),
            self.dp * rng.half(),
        );

        let mut remaining: Vec<usize> = (0..n).collect();
        let first = remaining.remove(rng.range(n));
        let mut moved = vec![first];

        let mut i = 0;
        while i < moved.len() {
            let mover = moved[i];
            space.translate_trial_group(mover, &displacement);
            let mut j = 0;
            while j < remaining.len() {
                let candidate = remaining[j];
                let uold = hamiltonian.group_group(space, State::Committed, mover, candidate);
                let unew = hamiltonian.group_group(space, State::Trial, mover, candidate);
                let udiff = unew - uold;
                if rng.uniform() < 1.0 - (-udiff).exp() {
                    moved.push(remaining.swap_remove(j));
                } else {
                    j += 1;
                }
            }
            // propagation is rejection free: commit immediately
            space.accept_group(mover);
            self.base.change.register_rigid_group(mover);
            i += 1;
        }

        if !self.skip_energy {
            du += Self::total_group_energy(space, hamiltonian);
        }
        self.base.alternate_energy = Some(du);
        self.move_fraction.add(moved.len() as f64 / n as f64);
        debug_assert_eq!(moved.len() + remaining.len(), n);
        Ok(())
    }

    fn energy_change(&mut self, _space: &Space, _hamiltonian: &Hamiltonian) -> f64 {
        0.0 // already committed; zero always accepts
    }

    fn accept(&mut self, _space: &mut Space) {}

    fn reject(&mut self, _space: &mut Space) {
        unreachable!("rejection-free move was rejected");
    }

    fn payload(&self) -> serde_json::Value {
        let mut value = json!({
            "dp": self.dp,
            "skip energy update": self.skip_energy,
        });
        if !self.move_fraction.is_empty() {
            value["move fraction"] = json!(self.move_fraction.mean());
        }
        value
    }
}
