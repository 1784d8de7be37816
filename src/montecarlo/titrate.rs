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

//! Titration moves: implicit proton exchange by atom-kind swapping, and the
//! combined grand-canonical titration that couples every swap to a
//! counter-ion insertion or deletion so the system charge is preserved.

use super::grandcanonical::{SaltPool, SaltTrial};
use super::{Move, MoveBase};
use crate::cell::Shape;
use crate::chemistry::EquilibriumReactions;
use crate::energy::Hamiltonian;
use crate::space::{Space, State};
use crate::topology::Topology;
use crate::{MoveRng, Particle};
use average::{Estimate, Mean};
use serde_json::json;
use std::collections::BTreeMap;
use std::rc::Rc;

/// Running average of per-site charges, keyed by (molecule kind, relative index).
#[derive(Clone, Debug, Default)]
struct SiteChargeMap {
    charges: BTreeMap<(usize, usize), Mean>,
}

impl SiteChargeMap {
    fn sample(&mut self, space: &Space, site: usize) {
        if let Some(group_index) = space.group_of_particle(site) {
            let group = space.group(group_index);
            let key = (group.molecule(), site - group.front());
            self.charges
                .entry(key)
                .or_insert_with(Mean::new)
                .add(space.committed()[site].charge);
        }
    }

    fn to_json(&self, topology: &Topology) -> serde_json::Value {
        let mut by_molecule: BTreeMap<usize, serde_json::Map<String, serde_json::Value>> =
            BTreeMap::new();
        for (&(molecule, index), mean) in &self.charges {
            by_molecule
                .entry(molecule)
                .or_default()
                .insert(index.to_string(), json!(mean.mean()));
        }
        let mut value = serde_json::Map::new();
        for (molecule, sites) in by_molecule {
            value.insert(
                topology.molecule(molecule).name.clone(),
                serde_json::Value::Object(sites),
            );
        }
        serde_json::Value::Object(value)
    }
}

/// Implicit titration by swapping particle identity between the two
/// endpoints of an equilibrium process.
///
/// Each trial picks a titratable site uniformly and a process for which the
/// site's current kind is an endpoint, swaps to the other endpoint, and
/// adds the intrinsic free energy `±ln 10·(pH - pK)` to the interaction
/// energy change.
#[derive(Clone, Debug)]
pub struct SwapMove {
    base: MoveBase,
    topology: Rc<Topology>,
    reactions: EquilibriumReactions,
    site: Option<usize>,
    intrinsic: f64,
    save_charge: bool,
    site_acceptance: BTreeMap<usize, Mean>,
    site_charges: SiteChargeMap,
}

impl SwapMove {
    pub fn from_config(config: &serde_json::Value, space: &Space) -> anyhow::Result<Self> {
        let mut base = MoveBase::new("Site Titration - Swap Move");
        base.runfraction = config.get("prob").and_then(|v| v.as_f64()).unwrap_or(1.0);
        let processes = config
            .get("processes")
            .ok_or_else(|| anyhow::anyhow!("titration move requires 'processes'"))?;
        let mut reactions = EquilibriumReactions::from_config(processes, space.topology())?;
        let num_sites = reactions.find_sites(space.committed());
        if num_sites == 0 {
            log::warn!("no titratable sites found for the swap move");
        }
        Ok(Self {
            base,
            topology: space.topology_rc(),
            reactions,
            site: None,
            intrinsic: 0.0,
            save_charge: config
                .get("savecharge")
                .and_then(|v| v.as_bool())
                .unwrap_or(false),
            site_acceptance: BTreeMap::new(),
            site_charges: SiteChargeMap::default(),
        })
    }
}

impl Move for SwapMove {
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
        self.site = None;
        let Some(site) = self.reactions.random_site(rng) else {
            return Ok(());
        };
        let current = space.trial()[site].id;
        let process = self
            .reactions
            .random_process(current, rng)
            .ok_or_else(|| anyhow::anyhow!("no process matches a registered site"))?
            .clone();
        self.intrinsic = process.apply(space.trial_particle_mut(site), &self.topology);
        self.site = Some(site);

        let group = space
            .group_of_particle(site)
            .ok_or_else(|| anyhow::anyhow!("titratable site belongs to no group"))?;
        self.base.change.register_particle(group, site);
        Ok(())
    }

    fn energy_change(&mut self, space: &Space, hamiltonian: &Hamiltonian) -> f64 {
        if self.site.is_none() {
            return 0.0;
        }
        hamiltonian.energy_change(space, &self.base.change) + self.intrinsic
    }

    fn accept(&mut self, space: &mut Space) {
        let Some(site) = self.site else { return };
        let old_id = space.committed()[site].id;
        space.accept_particle(site);
        space.retrack_particle(site, old_id);
        self.site_acceptance.entry(site).or_insert_with(Mean::new).add(1.0);
        self.site_charges.sample(space, site);
    }

    fn reject(&mut self, space: &mut Space) {
        let Some(site) = self.site else { return };
        space.undo_particle(site);
        self.site_acceptance.entry(site).or_insert_with(Mean::new).add(0.0);
        self.site_charges.sample(space, site);
    }

    fn payload(&self) -> serde_json::Value {
        let mut sites = serde_json::Map::new();
        for (site, acceptance) in &self.site_acceptance {
            sites.insert(site.to_string(), json!(acceptance.mean()));
        }
        let mut value = json!({
            "sites": self.reactions.sites().len(),
            "site acceptance": sites,
        });
        if self.save_charge {
            value["average charges"] = self.site_charges.to_json(&self.topology);
        }
        value
    }
}

/// Which sub-move a combined grand-canonical titration trial performed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Branch {
    Salt,
    Swap,
}

/// The coupled ion action of a swap branch trial.
#[derive(Clone, Debug)]
enum IonAction {
    Insert(Particle),
    Delete(usize),
    /// Deletion was requested but no ion of the kind exists.
    None,
}

/// Combined grand-canonical titration.
///
/// Alternates, with equal probability, between (i) a classic neutral
/// salt-pair insertion/deletion and (ii) a charge-coupled swap: one site
/// changes protonation state while a counter-ion of appropriate sign is
/// simultaneously inserted or deleted, so the total charge is conserved.
/// Only monovalent coupled ions are supported; construction fails
/// otherwise.
#[derive(Clone, Debug)]
pub struct GrandCanonicalTitration {
    base: MoveBase,
    topology: Rc<Topology>,
    pool: SaltPool,
    reactions: EquilibriumReactions,
    branch: Branch,
    salt_trial: SaltTrial,
    site: Option<usize>,
    ion_kind: usize,
    ion_action: IonAction,
    intrinsic: f64,
    salt_trials: usize,
    swap_trials: usize,
    salt_accepted: usize,
    swap_accepted: usize,
    site_acceptance: BTreeMap<usize, Mean>,
    site_charges: SiteChargeMap,
}

impl GrandCanonicalTitration {
    pub fn from_config(config: &serde_json::Value, space: &mut Space) -> anyhow::Result<Self> {
        let mut base = MoveBase::new("Grand Canonical Salt Titration");
        base.runfraction = config.get("prob").and_then(|v| v.as_f64()).unwrap_or(1.0);
        let name = config
            .get("molecule")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("grand-canonical titration requires 'molecule'"))?;
        let pool = SaltPool::from_config(name, space)?;
        for (&id, ion) in &pool.ions {
            anyhow::ensure!(
                (ion.charge.abs() - 1.0).abs() < 1e-9,
                "titration-coupled ion '{}' must be monovalent",
                space.topology().atom(id).name
            );
        }
        let processes = config
            .get("processes")
            .ok_or_else(|| anyhow::anyhow!("grand-canonical titration requires 'processes'"))?;
        let mut reactions = EquilibriumReactions::from_config(processes, space.topology())?;
        reactions.find_sites(space.committed());

        let mut this = Self {
            base,
            topology: space.topology_rc(),
            pool,
            reactions,
            branch: Branch::Salt,
            salt_trial: SaltTrial::default(),
            site: None,
            ion_kind: 0,
            ion_action: IonAction::None,
            intrinsic: 0.0,
            salt_trials: 0,
            swap_trials: 0,
            salt_accepted: 0,
            swap_accepted: 0,
            site_acceptance: BTreeMap::new(),
            site_charges: SiteChargeMap::default(),
        };

        if config
            .get("neutralize")
            .and_then(|v| v.as_bool())
            .unwrap_or(true)
        {
            this.neutralize(space)?;
        }
        Ok(this)
    }

    /// Cancel any initial net charge by inserting GC counter ions.
    fn neutralize(&mut self, space: &mut Space) -> anyhow::Result<()> {
        let net = space.net_charge(State::Committed);
        if net.abs() < 1e-9 {
            return Ok(());
        }
        let kind = self
            .pool
            .ions
            .iter()
            .find(|(_, ion)| net * ion.charge < 0.0)
            .map(|(&id, _)| id)
            .ok_or_else(|| anyhow::anyhow!("no ion kind can neutralize charge {}", net))?;
        let count = net.abs().round() as usize;
        log::info!(
            "neutralizing net charge {} with {} '{}' ions",
            net,
            count,
            self.topology.atom(kind).name
        );
        let mut rng = MoveRng::from_entropy();
        let particles: Vec<Particle> = (0..count)
            .map(|_| Particle::from_kind(self.topology.atom(kind), space.cell.random_point(&mut rng)))
            .collect();
        let group = self.pool.group(space);
        space.insert_particles(group, &particles)?;
        let remaining = space.net_charge(State::Committed);
        anyhow::ensure!(
            remaining.abs() < 1e-9,
            "system charge {} could not be neutralized",
            remaining
        );
        Ok(())
    }

    fn propose_swap(&mut self, space: &mut Space, rng: &mut MoveRng) -> anyhow::Result<()> {
        let Some(site) = self.reactions.random_site(rng) else {
            return Ok(());
        };
        let current = space.trial()[site].id;
        let process = self
            .reactions
            .random_process(current, rng)
            .ok_or_else(|| anyhow::anyhow!("no process matches a registered site"))?
            .clone();
        self.intrinsic = process.apply(space.trial_particle_mut(site), &self.topology);
        let protonation = process.is_bound(space.trial()[site].id);

        // monovalent only: the charge step of the site is exactly ∓1
        self.ion_kind = self.pool.random_ion(rng);
        let cationic = self.pool.ions[&self.ion_kind].charge > 0.0;
        let delete = protonation == cationic;
        self.ion_action = if delete {
            match space.tracker().sample(self.ion_kind, 1, rng) {
                Some(indices) => IonAction::Delete(indices[0]),
                None => {
                    // insufficient inventory: roll the site back, no-op trial
                    space.undo_particle(site);
                    return Ok(());
                }
            }
        } else {
            let pos = space.cell.random_point(rng);
            IonAction::Insert(Particle::from_kind(self.topology.atom(self.ion_kind), pos))
        };
        self.site = Some(site);

        let group = space
            .group_of_particle(site)
            .ok_or_else(|| anyhow::anyhow!("titratable site belongs to no group"))?;
        self.base.change.register_particle(group, site);
        Ok(())
    }

    fn swap_energy(&mut self, space: &Space, hamiltonian: &Hamiltonian) -> f64 {
        let Some(site) = self.site else {
            self.base.alternate_energy = Some(0.0);
            return 0.0;
        };
        let volume = space.volume(State::Committed);
        let count = space.tracker().count(self.ion_kind);
        let mu = self.pool.ions[&self.ion_kind].chemical_potential;

        let site_new = hamiltonian.particle_pairs(space, State::Trial, site)
            + hamiltonian.particle_external(space, State::Trial, site);
        let site_old = hamiltonian.particle_pairs(space, State::Committed, site)
            + hamiltonian.particle_external(space, State::Committed, site);

        let (ideal, ion_new, ion_old, correction) = match &self.ion_action {
            IonAction::Insert(particle) => {
                let ideal = ((count + 1) as f64 / volume).ln() - mu;
                let cell = space.cell_of(State::Committed);
                let ion_new = hamiltonian.system_with_slice(
                    space,
                    State::Trial,
                    std::slice::from_ref(particle),
                ) + hamiltonian.slice_external(cell, std::slice::from_ref(particle));
                (ideal, ion_new, 0.0, 0.0)
            }
            IonAction::Delete(index) => {
                let ideal = (volume / count as f64).ln() + mu;
                let ion_old = hamiltonian.particle_total(space, State::Committed, *index);
                // the site↔ion pair appears in both the site and the ion sums;
                // the ion is absent from the new state altogether
                let correction = hamiltonian.pair(space, State::Trial, *index, site)
                    - hamiltonian.pair(space, State::Committed, *index, site);
                (ideal, 0.0, ion_old, correction)
            }
            IonAction::None => (0.0, 0.0, 0.0, 0.0),
        };

        let interaction = (site_new + ion_new) - (site_old + ion_old) - correction;
        self.base.alternate_energy = Some(interaction + self.intrinsic);
        interaction + self.intrinsic + ideal
    }

    fn accept_swap(&mut self, space: &mut Space) {
        let Some(site) = self.site else { return };
        let old_id = space.committed()[site].id;
        space.accept_particle(site);
        space.retrack_particle(site, old_id);
        match std::mem::replace(&mut self.ion_action, IonAction::None) {
            IonAction::Insert(particle) => {
                let group = self.pool.group(space);
                space
                    .insert_particles(group, &[particle])
                    .expect("counter-ion insertion");
            }
            IonAction::Delete(index) => {
                space.erase_particle(index).expect("counter-ion deletion");
            }
            IonAction::None => {}
        }
        self.swap_accepted += 1;
        self.site_acceptance.entry(site).or_insert_with(Mean::new).add(1.0);
        self.site_charges.sample(space, site);
        let ion_kind = self.ion_kind;
        self.pool.sample_density(space, &[ion_kind]);
    }

    fn reject_swap(&mut self, space: &mut Space) {
        let Some(site) = self.site else { return };
        space.undo_particle(site);
        self.site_acceptance.entry(site).or_insert_with(Mean::new).add(0.0);
        self.site_charges.sample(space, site);
        let ion_kind = self.ion_kind;
        self.pool.sample_density(space, &[ion_kind]);
    }
}

impl Move for GrandCanonicalTitration {
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
        self.site = None;
        self.ion_action = IonAction::None;
        self.salt_trial = SaltTrial::default();

        self.branch = if self.reactions.sites().is_empty() || rng.flip() {
            Branch::Salt
        } else {
            Branch::Swap
        };
        match self.branch {
            Branch::Salt => {
                self.salt_trials += 1;
                self.salt_trial = self.pool.propose_trial(space, &self.topology, rng);
                Ok(())
            }
            Branch::Swap => {
                self.swap_trials += 1;
                self.propose_swap(space, rng)
            }
        }
    }

    fn energy_change(&mut self, space: &Space, hamiltonian: &Hamiltonian) -> f64 {
        match self.branch {
            Branch::Salt => {
                let (du, potential) = self.pool.trial_energy(space, hamiltonian, &self.salt_trial);
                self.base.alternate_energy = Some(potential);
                du
            }
            Branch::Swap => self.swap_energy(space, hamiltonian),
        }
    }

    fn accept(&mut self, space: &mut Space) {
        match self.branch {
            Branch::Salt => {
                self.salt_accepted += 1;
                let mut trial = std::mem::take(&mut self.salt_trial);
                self.pool.commit_trial(space, &mut trial);
            }
            Branch::Swap => self.accept_swap(space),
        }
    }

    fn reject(&mut self, space: &mut Space) {
        match self.branch {
            Branch::Salt => {
                let (cation, anion) = (self.salt_trial.cation, self.salt_trial.anion);
                self.pool.sample_density(space, &[cation, anion]);
            }
            Branch::Swap => self.reject_swap(space),
        }
    }

    fn payload(&self) -> serde_json::Value {
        let mut sites = serde_json::Map::new();
        for (site, acceptance) in &self.site_acceptance {
            sites.insert(site.to_string(), json!(acceptance.mean()));
        }
        json!({
            "atoms": self.pool.to_json(&self.topology),
            "salt trials": self.salt_trials,
            "salt acceptance": self.salt_accepted as f64 / self.salt_trials.max(1) as f64,
            "titration trials": self.swap_trials,
            "titration acceptance": self.swap_accepted as f64 / self.swap_trials.max(1) as f64,
            "site acceptance": sites,
            "average charges": self.site_charges.to_json(&self.topology),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::Cell;
    use crate::topology::{AtomKind, MoleculeKind, Topology};
    use crate::Point;

    fn titration_space(ph_sites: usize) -> Space {
        let ha = AtomKind::new("HA");
        let a = AtomKind {
            charge: -1.0,
            ..AtomKind::new("A")
        };
        let na = AtomKind {
            charge: 1.0,
            activity: 0.1,
            ..AtomKind::new("Na")
        };
        let cl = AtomKind {
            charge: -1.0,
            activity: 0.1,
            ..AtomKind::new("Cl")
        };
        let acid_names: Vec<&str> = std::iter::repeat("HA").take(ph_sites).collect();
        let mut acid = MoleculeKind::new("acid", &acid_names);
        acid.atomic = true;
        let mut salt = MoleculeKind::new("salt", &["Na", "Cl"]);
        salt.atomic = true;
        let topology =
            Rc::new(Topology::new(vec![ha, a, na, cl], vec![acid, salt]).unwrap());
        let mut space = Space::new(topology, Cell::cubic(30.0));
        let mut rng = MoveRng::seeded(77);
        let sites: Vec<Particle> = (0..ph_sites)
            .map(|_| {
                Particle::from_kind(space.topology().atom(0), space.cell.random_point(&mut rng))
            })
            .collect();
        space.add_group(0, sites).unwrap();
        space.add_group(1, Vec::new()).unwrap();
        space
    }

    fn processes() -> serde_json::Value {
        serde_json::json!([{"bound": "HA", "unbound": "A", "pK": 4.8, "pH": 7.0}])
    }

    #[test]
    fn swap_move_changes_identity() {
        let mut space = titration_space(4);
        let mut hamiltonian = Hamiltonian::ideal();
        let mut rng = MoveRng::seeded(5);
        let config = serde_json::json!({"processes": processes(), "savecharge": true});
        let mut mv = SwapMove::from_config(&config, &space).unwrap();
        for _ in 0..2000 {
            mv.step(&mut space, &mut hamiltonian, &mut rng, 1).unwrap();
        }
        space.check_invariants().unwrap();
        // the intrinsic weight 10^(pK-pH) ≈ 6e-3 keeps nearly all sites bound
        let unbound = space.tracker().count(1);
        assert!(unbound <= 1, "{} of 4 sites unbound", unbound);
        // identities did change during sampling
        assert!(mv.base().statistics.num_accepted > 0);
    }

    #[test]
    fn swap_move_keeps_tracker_in_sync() {
        let mut space = titration_space(2);
        let mut hamiltonian = Hamiltonian::ideal();
        let mut rng = MoveRng::seeded(50);
        let config = serde_json::json!({"processes": processes()});
        let mut mv = SwapMove::from_config(&config, &space).unwrap();
        for _ in 0..100 {
            mv.step(&mut space, &mut hamiltonian, &mut rng, 1).unwrap();
            space.check_invariants().unwrap();
        }
    }

    #[test]
    fn gctit_preserves_charge() {
        let mut space = titration_space(3);
        let mut hamiltonian = Hamiltonian::ideal();
        let mut rng = MoveRng::seeded(23);
        let config = serde_json::json!({
            "molecule": "salt",
            "processes": processes(),
            "neutralize": true,
        });
        let mut mv = GrandCanonicalTitration::from_config(&config, &mut space).unwrap();
        assert_eq!(space.net_charge(State::Committed), 0.0);
        for _ in 0..500 {
            mv.step(&mut space, &mut hamiltonian, &mut rng, 1).unwrap();
            assert!(
                space.net_charge(State::Committed).abs() < 1e-9,
                "charge drifted"
            );
        }
        space.check_invariants().unwrap();
        assert!(mv.swap_trials + mv.salt_trials > 0);
    }

    #[test]
    fn gctit_rejects_multivalent_ions() {
        let ha = AtomKind::new("HA");
        let a = AtomKind {
            charge: -1.0,
            ..AtomKind::new("A")
        };
        let ca = AtomKind {
            charge: 2.0,
            activity: 0.1,
            ..AtomKind::new("Ca")
        };
        let cl = AtomKind {
            charge: -1.0,
            activity: 0.1,
            ..AtomKind::new("Cl")
        };
        let mut acid = MoleculeKind::new("acid", &["HA"]);
        acid.atomic = true;
        let mut salt = MoleculeKind::new("salt", &["Ca", "Cl"]);
        salt.atomic = true;
        let topology =
            Rc::new(Topology::new(vec![ha, a, ca, cl], vec![acid, salt]).unwrap());
        let mut space = Space::new(topology, Cell::cubic(30.0));
        let site = Particle::from_kind(space.topology().atom(0), Point::zeros());
        space.add_group(0, vec![site]).unwrap();
        space.add_group(1, Vec::new()).unwrap();

        let config = serde_json::json!({
            "molecule": "salt",
            "processes": [{"bound": "HA", "unbound": "A", "pK": 4.8, "pH": 7.0}],
        });
        assert!(GrandCanonicalTitration::from_config(&config, &mut space).is_err());
    }
}
