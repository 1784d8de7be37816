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

//! Internal moves for linear polymers: crankshaft, pivot and reptation.

use super::{AcceptanceMap, Move, MoveBase, MoveList};
use crate::cell::BoundaryConditions;
use crate::energy::Hamiltonian;
use crate::space::Space;
use crate::transform::{quaternion_about, random_unit_vector, rotate_about};
use crate::{MoveRng, Point};
use serde_json::json;
use std::collections::BTreeMap;

/// Upper bound on axis-drawing attempts before giving up on a chain whose
/// length cannot satisfy the configured segment window.
const MAX_AXIS_DRAWS: usize = 1000;

/// Per-molecule segment length window.
fn fill_segment_windows(
    mollist: &mut MoveList,
    extras: &BTreeMap<usize, serde_json::Map<String, serde_json::Value>>,
    minmax: &mut BTreeMap<usize, (usize, usize)>,
    default_min: usize,
) -> anyhow::Result<()> {
    for (&id, extra) in extras {
        let dp = extra
            .get("dp")
            .and_then(|v| v.as_f64())
            .ok_or_else(|| anyhow::anyhow!("polymer move requires 'dp'"))?;
        mollist.set_displacements(id, dp, 0.0);
        let minlen = extra
            .get("minlen")
            .and_then(|v| v.as_u64())
            .map_or(default_min, |v| v as usize);
        let maxlen = extra
            .get("maxlen")
            .and_then(|v| v.as_u64())
            .map_or(4, |v| v as usize);
        anyhow::ensure!(minlen <= maxlen, "'minlen' exceeds 'maxlen'");
        minmax.insert(id, (minlen, maxlen));
    }
    Ok(())
}

/// Crankshaft rotation of a chain segment.
///
/// Two monomers are picked at random; the monomers strictly between them
/// rotate about the connecting axis by a uniform angle in `±dp/2`. The
/// segment length window is set with `minlen` and `maxlen`.
#[derive(Clone, Debug)]
pub struct Crankshaft {
    base: MoveBase,
    minmax: BTreeMap<usize, (usize, usize)>,
    group: Option<usize>,
    /// Absolute indices of the rotated monomers.
    rotated: Vec<usize>,
    accmap: AcceptanceMap<String>,
}

impl Crankshaft {
    pub fn from_config(config: &serde_json::Value, space: &Space) -> anyhow::Result<Self> {
        let mut base = MoveBase::new("CrankShaft");
        let (mut mollist, extras) = MoveList::from_config(config, space.topology())?;
        let mut minmax = BTreeMap::new();
        fill_segment_windows(&mut mollist, &extras, &mut minmax, 1)?;
        base.mollist = mollist;
        Ok(Self {
            base,
            minmax,
            group: None,
            rotated: Vec::new(),
            accmap: AcceptanceMap::default(),
        })
    }
}

impl Move for Crankshaft {
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
        self.rotated.clear();
        let Some(molecule) = self.base.current_molecule else {
            return Ok(());
        };
        let Some(group) = space.random_group(molecule, rng) else {
            return Ok(());
        };
        if space.group(group).len() < 3 {
            return Ok(());
        }
        let dp = self.base.mollist.entry(molecule).map_or(0.0, |e| e.dp1);
        let &(minlen, maxlen) = self.minmax.get(&molecule).expect("configured molecule");

        let (mut beg, mut end) = (0, 0);
        let mut found = false;
        for _ in 0..MAX_AXIS_DRAWS {
            beg = space.group(group).random_particle(rng).expect("non-empty");
            end = space.group(group).random_particle(rng).expect("non-empty");
            let len = beg.abs_diff(end).saturating_sub(1);
            if (minlen..=maxlen).contains(&len) && len > 0 {
                found = true;
                break;
            }
        }
        anyhow::ensure!(
            found,
            "no chain segment of length {}..={} in molecule '{}'",
            minlen,
            maxlen,
            space.topology().molecule(molecule).name
        );
        if beg > end {
            std::mem::swap(&mut beg, &mut end);
        }

        let angle = dp * rng.half();
        let committed = space.committed();
        let a = committed[beg].pos;
        let b = committed[end].pos;
        let axis = space.cell.distance(&b, &a);
        let rotation = quaternion_about(&axis, angle);

        self.group = Some(group);
        self.rotated = ((beg + 1)..end).collect();
        for &i in &self.rotated {
            let rotated = rotate_about(&space.committed()[i].pos, &a, &rotation, &space.cell);
            space.set_trial_position(i, rotated);
            self.base.change.register_particle(group, i);
        }
        space.update_trial_mass_center(group);
        Ok(())
    }

    fn energy_change(&mut self, space: &Space, hamiltonian: &Hamiltonian) -> f64 {
        hamiltonian.energy_change(space, &self.base.change)
    }

    fn accept(&mut self, space: &mut Space) {
        let Some(group) = self.group else { return };
        let mut msq = 0.0;
        for &i in &self.rotated {
            msq += space
                .cell
                .distance_squared(&space.committed()[i].pos, &space.trial()[i].pos);
            space.accept_particle(i);
        }
        self.accmap.accept(space.group(group).name().to_string(), msq);
        space.accept_group_mass_center(group);
    }

    fn reject(&mut self, space: &mut Space) {
        let Some(group) = self.group else { return };
        self.accmap.reject(space.group(group).name().to_string());
        for &i in &self.rotated {
            space.undo_particle(i);
        }
        space.undo_group_mass_center(group);
    }

    fn payload(&self) -> serde_json::Value {
        json!({
            "groups": self.accmap.to_json(|name| name.clone()),
        })
    }
}

/// Pivot rotation of a chain tail.
///
/// An axis is drawn between two monomers spanning `minlen..=maxlen` bonds;
/// all monomers past the axis' far end, or before its near end (50/50),
/// rotate about it.
#[derive(Clone, Debug)]
pub struct Pivot {
    base: MoveBase,
    minmax: BTreeMap<usize, (usize, usize)>,
    group: Option<usize>,
    rotated: Vec<usize>,
    accmap: AcceptanceMap<String>,
}

impl Pivot {
    pub fn from_config(config: &serde_json::Value, space: &Space) -> anyhow::Result<Self> {
        let mut base = MoveBase::new("Polymer Pivot Move");
        let (mut mollist, extras) = MoveList::from_config(config, space.topology())?;
        let mut minmax = BTreeMap::new();
        fill_segment_windows(&mut mollist, &extras, &mut minmax, 1)?;
        base.mollist = mollist;
        Ok(Self {
            base,
            minmax,
            group: None,
            rotated: Vec::new(),
            accmap: AcceptanceMap::default(),
        })
    }
}

impl Move for Pivot {
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
        self.rotated.clear();
        let Some(molecule) = self.base.current_molecule else {
            return Ok(());
        };
        let Some(group) = space.random_group(molecule, rng) else {
            return Ok(());
        };
        if space.group(group).len() < 2 {
            return Ok(());
        }
        let dp = self.base.mollist.entry(molecule).map_or(0.0, |e| e.dp1);
        let &(minlen, maxlen) = self.minmax.get(&molecule).expect("configured molecule");

        let front = space.group(group).front();
        let back = space.group(group).back();
        let mut draws = 0;
        while self.rotated.is_empty() {
            let (mut beg, mut end);
            loop {
                beg = space.group(group).random_particle(rng).expect("non-empty");
                end = space.group(group).random_particle(rng).expect("non-empty");
                let len = beg.abs_diff(end);
                if (minlen..=maxlen).contains(&len) {
                    break;
                }
                draws += 1;
                anyhow::ensure!(
                    draws < MAX_AXIS_DRAWS,
                    "no pivot axis of length {}..={} in molecule '{}'",
                    minlen,
                    maxlen,
                    space.topology().molecule(molecule).name
                );
            }
            if beg > end {
                std::mem::swap(&mut beg, &mut end);
            }
            if rng.half() > 0.0 {
                self.rotated = ((end + 1)..=back).collect();
            } else {
                self.rotated = (front..beg).collect();
            }
            if self.rotated.is_empty() {
                continue;
            }

            let angle = dp * rng.half();
            let committed = space.committed();
            let a = committed[beg].pos;
            let b = committed[end].pos;
            let axis = space.cell.distance(&b, &a);
            let rotation = quaternion_about(&axis, angle);
            for i in self.rotated.clone() {
                let rotated = rotate_about(&space.committed()[i].pos, &a, &rotation, &space.cell);
                space.set_trial_position(i, rotated);
                self.base.change.register_particle(group, i);
            }
        }
        self.group = Some(group);
        space.update_trial_mass_center(group);
        Ok(())
    }

    fn energy_change(&mut self, space: &Space, hamiltonian: &Hamiltonian) -> f64 {
        hamiltonian.energy_change(space, &self.base.change)
    }

    fn accept(&mut self, space: &mut Space) {
        let Some(group) = self.group else { return };
        let mut msq = 0.0;
        for &i in &self.rotated {
            msq += space
                .cell
                .distance_squared(&space.committed()[i].pos, &space.trial()[i].pos);
            space.accept_particle(i);
        }
        self.accmap.accept(space.group(group).name().to_string(), msq);
        space.accept_group_mass_center(group);
    }

    fn reject(&mut self, space: &mut Space) {
        let Some(group) = self.group else { return };
        self.accmap.reject(space.group(group).name().to_string());
        for &i in &self.rotated {
            space.undo_particle(i);
        }
        space.undo_group_mass_center(group);
    }

    fn payload(&self) -> serde_json::Value {
        json!({
            "groups": self.accmap.to_json(|name| name.clone()),
        })
    }
}

/// Reptation of a linear chain.
///
/// The chain slithers one index towards its head or tail (50/50): monomers
/// shift by one position, the vacated terminal is re-grown at the existing
/// terminal bond length (or a configured `bondlength`) in a uniformly
/// random direction.
#[derive(Clone, Debug)]
pub struct Reptation {
    base: MoveBase,
    /// Configured bond length per molecule; negative means "use existing".
    bondlengths: BTreeMap<usize, f64>,
    group: Option<usize>,
    accmap: AcceptanceMap<String>,
}

impl Reptation {
    pub fn from_config(config: &serde_json::Value, space: &Space) -> anyhow::Result<Self> {
        let mut base = MoveBase::new("Linear Polymer Reptation");
        let (mollist, extras) = MoveList::from_config(config, space.topology())?;
        let mut bondlengths = BTreeMap::new();
        for (&id, extra) in &extras {
            let bond = extra
                .get("bondlength")
                .and_then(|v| v.as_f64())
                .unwrap_or(-1.0);
            bondlengths.insert(id, bond);
        }
        base.mollist = mollist;
        Ok(Self {
            base,
            bondlengths,
            group: None,
            accmap: AcceptanceMap::default(),
        })
    }
}

impl Move for Reptation {
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
        anyhow::ensure!(
            space.group(group).len() >= 2,
            "molecule '{}' too short for reptation",
            space.topology().molecule(molecule).name
        );
        self.group = Some(group);

        let front = space.group(group).front();
        let back = space.group(group).back();
        let head_first = rng.half() > 0.0;
        let (terminal, neighbour) = if head_first {
            (front, front + 1)
        } else {
            (back, back - 1)
        };

        let configured = self.bondlengths.get(&molecule).copied().unwrap_or(-1.0);
        let bond = if configured > 0.0 {
            configured
        } else {
            space
                .cell
                .distance(
                    &space.committed()[terminal].pos,
                    &space.committed()[neighbour].pos,
                )
                .norm()
        };

        // slither: shift all monomers one index away from the leading end
        if head_first {
            for i in (front..back).rev() {
                let pos = space.committed()[i].pos;
                space.set_trial_position(i + 1, pos);
            }
        } else {
            for i in front..back {
                let pos = space.committed()[i + 1].pos;
                space.set_trial_position(i, pos);
            }
        }
        // regrow the leading terminal a bond length away from its old position
        let direction = random_unit_vector(rng);
        let regrown = space.committed()[terminal].pos + direction * bond;
        space.set_trial_position(terminal, regrown);
        debug_assert!(
            (space
                .cell
                .distance(
                    &space.committed()[terminal].pos,
                    &space.trial()[terminal].pos
                )
                .norm()
                - bond)
                .abs()
                < 1e-7
        );

        space.update_trial_mass_center(group);
        for i in space.group(group).iter() {
            self.base.change.register_particle(group, i);
        }
        Ok(())
    }

    fn energy_change(&mut self, space: &Space, hamiltonian: &Hamiltonian) -> f64 {
        hamiltonian.energy_change(space, &self.base.change)
    }

    fn accept(&mut self, space: &mut Space) {
        let Some(group) = self.group else { return };
        let r2 = match (
            space.group(group).mass_center(),
            space.group(group).trial_mass_center(),
        ) {
            (Some(cm), Some(cm_trial)) => space.cell.distance_squared(&cm, &cm_trial),
            _ => 0.0,
        };
        self.accmap.accept(space.group(group).name().to_string(), r2);
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
    use std::rc::Rc;

    fn chain_space(n: usize) -> Space {
        let kind = AtomKind::new("M");
        let names: Vec<&str> = std::iter::repeat("M").take(n).collect();
        let chain = MoleculeKind::new("chain", &names);
        let topology = Rc::new(Topology::new(vec![kind], vec![chain]).unwrap());
        let mut space = Space::new(topology, Cell::cubic(50.0));
        let particles: Vec<Particle> = (0..n)
            .map(|i| {
                Particle::from_kind(
                    space.topology().atom(0),
                    Point::new(i as f64 * 1.5, 0.0, 0.0),
                )
            })
            .collect();
        space.add_group(0, particles).unwrap();
        space
    }

    #[test]
    fn crankshaft_rotates_interior_only() {
        let mut space = chain_space(8);
        let hamiltonian = Hamiltonian::ideal();
        let mut rng = MoveRng::seeded(2);
        let config = serde_json::json!({"chain": {"dp": 1.0, "minlen": 1, "maxlen": 4}});
        let mut mv = Crankshaft::from_config(&config, &space).unwrap();
        mv.base_mut().current_molecule = Some(0);
        mv.propose(&mut space, &hamiltonian, &mut rng).unwrap();
        assert!(!mv.rotated.is_empty());
        // end points are axis members, never rotated
        assert!(!mv.rotated.contains(&0) || !mv.rotated.contains(&7));
        mv.reject(&mut space);
        mv.base_mut().change.clear();
        space.assert_synchronized();
    }

    #[test]
    fn crankshaft_preserves_axis_bond_distance() {
        let mut space = chain_space(6);
        let mut hamiltonian = Hamiltonian::ideal();
        let mut rng = MoveRng::seeded(12);
        let config = serde_json::json!({"chain": {"dp": 2.0, "minlen": 1, "maxlen": 3}});
        let mut mv = Crankshaft::from_config(&config, &space).unwrap();
        for _ in 0..100 {
            mv.step(&mut space, &mut hamiltonian, &mut rng, 1).unwrap();
        }
        space.check_invariants().unwrap();
    }

    #[test]
    fn pivot_rotates_a_tail() {
        let mut space = chain_space(8);
        let hamiltonian = Hamiltonian::ideal();
        let mut rng = MoveRng::seeded(4);
        let config = serde_json::json!({"chain": {"dp": 1.0, "minlen": 1, "maxlen": 5}});
        let mut mv = Pivot::from_config(&config, &space).unwrap();
        mv.base_mut().current_molecule = Some(0);
        mv.propose(&mut space, &hamiltonian, &mut rng).unwrap();
        assert!(!mv.rotated.is_empty());
        // the rotated set is a prefix or a suffix of the chain
        let min = *mv.rotated.iter().min().unwrap();
        let max = *mv.rotated.iter().max().unwrap();
        assert!(min == 0 || max == 7);
        mv.reject(&mut space);
        mv.base_mut().change.clear();
        space.assert_synchronized();
    }

    #[test]
    fn reptation_conserves_chain_length_statistics() {
        let mut space = chain_space(5);
        let mut hamiltonian = Hamiltonian::ideal();
        let mut rng = MoveRng::seeded(6);
        let config = serde_json::json!({"chain": {"bondlength": -1.0}});
        let mut mv = Reptation::from_config(&config, &space).unwrap();
        for _ in 0..50 {
            mv.step(&mut space, &mut hamiltonian, &mut rng, 1).unwrap();
        }
        // every trial is accepted in an ideal system and bonds stay intact
        assert_eq!(
            mv.base().statistics.num_accepted,
            mv.base().statistics.num_trials
        );
        for i in 0..4 {
            let bond = space
                .cell
                .distance(&space.committed()[i].pos, &space.committed()[i + 1].pos)
                .norm();
            assert!((bond - 1.5).abs() < 1e-9, "bond {} broken: {}", i, bond);
        }
        space.check_invariants().unwrap();
    }
}
