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

//! # Monte Carlo moves
//!
//! Every trial move implements the [`Move`] trait: *propose*, *evaluate*,
//! *accept*, *reject*, *report*. The provided [`Move::step`] driver runs one
//! Markov step of up to `n` inner repeats, applying the Metropolis criterion
//! and keeping the acceptance bookkeeping in one place. Do not override it.
//!
//! Moves draw randomness exclusively from the dedicated [`crate::MoveRng`]
//! handed in by the [`propagator::Propagator`], never from a global source.

pub mod cluster;
pub mod grandcanonical;
pub mod polarize;
pub mod polymer;
pub mod propagator;
pub mod rototranslate;
pub mod tempering;
pub mod titrate;
pub mod translate;
pub mod volume;

pub use cluster::{ClusterMove, ClusterTranslateNr, TranslateRotateCluster};
pub use grandcanonical::{GrandCanonicalSalt, GreenGC};
pub use polarize::PolarizeMove;
pub use polymer::{Crankshaft, Pivot, Reptation};
pub use propagator::Propagator;
pub use rototranslate::{
    ConformationSwap, TranslateRotate, TranslateRotateNbody, TranslateRotateTwobody,
};
pub use tempering::{ChannelLink, ParallelTempering, ReplicaLink};
pub use titrate::{GrandCanonicalTitration, SwapMove};
pub use translate::{AtomicTranslate, AtomicTranslate2D, AtomicRotate};
pub use volume::{Isobaric, Isochoric};

use crate::energy::Hamiltonian;
use crate::space::Space;
use crate::topology::Topology;
use crate::{Change, MoveRng, Point, Timer};
use average::{Estimate, Mean};
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeMap;

/// Displacement parameters below this value are treated as zero.
pub(crate) const MIN_DISPLACEMENT: f64 = 1e-6;

/// Cluster bias factors below this value trigger rejection without an
/// energy evaluation.
pub(crate) const MIN_CLUSTER_BIAS: f64 = 1e-7;

/// Metropolis criterion: accept with probability `min(1, exp(-ΔU))`.
///
/// Exactly one random variate is drawn regardless of the sign of `ΔU`, so
/// lock-stepped replicas stay in sync (see [`tempering`]).
#[inline]
pub(crate) fn metropolis(du: f64, rng: &mut MoveRng) -> bool {
    !(rng.uniform() > (-du).exp())
}

/// Counters of attempted and accepted trials, the summed energy change, and
/// the relative time spent in the move.
#[derive(Clone, Debug, Default)]
pub struct MoveStatistics {
    pub num_trials: usize,
    pub num_accepted: usize,
    pub energy_change_sum: f64,
    pub timer: Timer,
}

impl MoveStatistics {
    /// Acceptance ratio in [0, 1]; zero before the first trial.
    pub fn acceptance(&self) -> f64 {
        if self.num_trials == 0 {
            0.0
        } else {
            self.num_accepted as f64 / self.num_trials as f64
        }
    }
}

/// Keyed running means of acceptance and mean-square displacement.
///
/// Keys are atom kind ids, molecule names, or process labels. Rejections
/// contribute zero-valued samples to both means, so the stored displacement
/// is a per-trial average.
#[derive(Clone, Debug, Default)]
pub struct AcceptanceMap<K: Ord> {
    acceptance: BTreeMap<K, Mean>,
    squared_displacement: BTreeMap<K, Mean>,
}

impl<K: Ord + Clone> AcceptanceMap<K> {
    pub fn accept(&mut self, key: K, squared_displacement: f64) {
        self.acceptance.entry(key.clone()).or_insert_with(Mean::new).add(1.0);
        self.squared_displacement
            .entry(key)
            .or_insert_with(Mean::new)
            .add(squared_displacement);
    }

    pub fn reject(&mut self, key: K) {
        self.acceptance.entry(key.clone()).or_insert_with(Mean::new).add(0.0);
        self.squared_displacement.entry(key).or_insert_with(Mean::new).add(0.0);
    }

    /// Iterate `(key, mean acceptance, mean squared displacement)`.
    pub fn iter(&self) -> impl Iterator<Item = (&K, f64, f64)> {
        self.acceptance.iter().map(|(key, acc)| {
            let msd = self
                .squared_displacement
                .get(key)
                .map_or(0.0, |m| m.mean());
            (key, acc.mean(), msd)
        })
    }

    pub fn is_empty(&self) -> bool {
        self.acceptance.is_empty()
    }

    /// JSON object keyed by `label(key)` with acceptance and √⟨d²⟩ entries.
    pub fn to_json(&self, label: impl Fn(&K) -> String) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        for (key, acceptance, msd) in self.iter() {
            map.insert(
                label(key),
                json!({"acceptance": acceptance, "mean displacement": msd.sqrt()}),
            );
        }
        serde_json::Value::Object(map)
    }
}

fn default_prob() -> f64 {
    1.0
}

fn default_dir() -> [f64; 3] {
    [1.0, 1.0, 1.0]
}

#[derive(Debug, Deserialize)]
struct RawMoveListEntry {
    #[serde(default = "default_prob")]
    prob: f64,
    #[serde(default = "default_dir")]
    dir: [f64; 3],
    #[serde(default)]
    permol: bool,
    #[serde(default)]
    peratom: bool,
    /// Move-specific keys (dp, dprot, threshold, ...), consumed by the move.
    #[serde(flatten)]
    extra: serde_json::Map<String, serde_json::Value>,
}

/// Per-(move, molecule) configuration.
#[derive(Clone, Debug)]
pub struct MoveListEntry {
    /// Probability that a driver call actually proposes a trial.
    pub prob: f64,
    /// Move direction mask, e.g. `(0,0,1)` to restrict to the z-axis.
    pub dir: Point,
    /// First displacement parameter; meaning is defined by the move.
    pub dp1: f64,
    /// Second displacement parameter; meaning is defined by the move.
    pub dp2: f64,
    /// Repeat the move for every particle of the molecule.
    pub per_atom: bool,
    /// Repeat the move for every molecule of the kind.
    pub per_mol: bool,
    /// Total number of inner repeats; recomputed at trial time.
    pub repeat: usize,
}

/// Per-molecule configuration table of a move.
#[derive(Clone, Debug, Default)]
pub struct MoveList {
    entries: BTreeMap<usize, MoveListEntry>,
}

impl MoveList {
    /// Parse the common per-molecule keys (`prob`, `dir`, `permol`,
    /// `peratom`) from a config object keyed by molecule name.
    ///
    /// Returns the list plus the remaining move-specific keys for each
    /// molecule, to be consumed by the concrete move (`dp`, `dprot`, ...).
    /// An unknown molecule name is a fatal configuration error.
    pub fn from_config(
        config: &serde_json::Value,
        topology: &Topology,
    ) -> anyhow::Result<(Self, BTreeMap<usize, serde_json::Map<String, serde_json::Value>>)> {
        let object = config
            .as_object()
            .ok_or_else(|| anyhow::anyhow!("per-molecule move section must be an object"))?;
        let mut entries = BTreeMap::new();
        let mut extras = BTreeMap::new();
        for (name, value) in object {
            let id = topology
                .find_molecule(name)
                .ok_or_else(|| anyhow::anyhow!("unknown molecule '{}'", name))?;
            let raw: RawMoveListEntry = serde_json::from_value(value.clone())
                .map_err(|e| anyhow::anyhow!("molecule '{}': {}", name, e))?;
            entries.insert(
                id,
                MoveListEntry {
                    prob: raw.prob,
                    dir: Point::from_row_slice(&raw.dir),
                    dp1: 0.0,
                    dp2: 0.0,
                    per_atom: raw.peratom,
                    per_mol: raw.permol,
                    repeat: 1,
                },
            );
            extras.insert(id, raw.extra);
        }
        anyhow::ensure!(!entries.is_empty(), "empty per-molecule move section");
        Ok((Self { entries }, extras))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn entry(&self, molecule: usize) -> Option<&MoveListEntry> {
        self.entries.get(&molecule)
    }

    pub fn entry_mut(&mut self, molecule: usize) -> Option<&mut MoveListEntry> {
        self.entries.get_mut(&molecule)
    }

    /// Molecule ids in the list.
    pub fn molecules(&self) -> Vec<usize> {
        self.entries.keys().copied().collect()
    }

    /// Store the displacement parameters of one entry.
    pub fn set_displacements(&mut self, molecule: usize, dp1: f64, dp2: f64) {
        if let Some(entry) = self.entries.get_mut(&molecule) {
            entry.dp1 = dp1;
            entry.dp2 = dp2;
        }
    }

    /// Uniformly pick a molecule id and refresh its `repeat` multiplier,
    /// `1 · (peratom ? group size : 1) · (permol ? n molecules : 1)`.
    pub fn random_molecule(&mut self, space: &Space, rng: &mut MoveRng) -> Option<usize> {
        if self.entries.is_empty() {
            return None;
        }
        let keys: Vec<usize> = self.entries.keys().copied().collect();
        let id = *rng.element(&keys)?;
        let entry = self.entries.get_mut(&id).expect("entry exists");
        let mut repeat = 1;
        if entry.per_mol {
            repeat *= space.num_molecules(id).max(1);
        }
        if entry.per_atom {
            let group_size = space
                .groups_of(id)
                .first()
                .map(|&g| space.group(g).len())
                .unwrap_or(0);
            repeat *= group_size;
        }
        entry.repeat = repeat;
        Some(id)
    }
}

/// Bookkeeping shared by every move.
#[derive(Clone, Debug)]
pub struct MoveBase {
    /// Human-readable move title (mandatory).
    pub title: String,
    /// Reference (DOI or similar), if any.
    pub cite: Option<&'static str>,
    pub statistics: MoveStatistics,
    /// Fraction of driver calls that actually propose a trial.
    pub runfraction: f64,
    /// Per-molecule configuration; may be empty for system-wide moves.
    pub mollist: MoveList,
    /// Molecule id the current trial acts upon.
    pub current_molecule: Option<usize>,
    /// Description of what the current trial altered.
    pub change: Change,
    /// When set, this energy is reported instead of the Metropolis energy
    /// (used by moves whose acceptance includes non-potential terms).
    pub alternate_energy: Option<f64>,
}

impl MoveBase {
    pub fn new(title: &str) -> Self {
        Self {
            title: title.to_string(),
            cite: None,
            statistics: MoveStatistics::default(),
            runfraction: 1.0,
            mollist: MoveList::default(),
            current_molecule: None,
            change: Change::default(),
            alternate_energy: None,
        }
    }

    /// Common part of every move report.
    pub fn report_header(&self) -> serde_json::Value {
        json!({
            "trials": self.statistics.num_trials,
            "acceptance": self.statistics.acceptance(),
            "runfraction": self.runfraction,
            "relative time": self.statistics.timer.relative(),
            "energy change": self.statistics.energy_change_sum,
        })
    }

    /// Current move-list entry, if a molecule is selected.
    pub fn current_entry(&self) -> Option<&MoveListEntry> {
        self.mollist.entry(self.current_molecule?)
    }
}

/// Polymorphic unit of the move framework.
///
/// Concrete moves implement the five narrow operations and inherit the
/// [`Move::step`] driver. A move is *idle* between driver calls and
/// *in-trial* inside them; `step` drives idle → propose → evaluate →
/// commit/rollback → idle as one atomic unit from the caller's view.
pub trait Move {
    fn base(&self) -> &MoveBase;
    fn base_mut(&mut self) -> &mut MoveBase;

    /// Build the trial state and register it in the base's [`Change`].
    ///
    /// Leaving the change empty makes the trial a no-op (used for
    /// insufficient-inventory situations, which still count as attempts).
    /// Errors are reserved for invariant breaches and abort the simulation.
    fn propose(
        &mut self,
        space: &mut Space,
        hamiltonian: &Hamiltonian,
        rng: &mut MoveRng,
    ) -> anyhow::Result<()>;

    /// Energy difference (kT) entering the Metropolis criterion.
    fn energy_change(&mut self, space: &Space, hamiltonian: &Hamiltonian) -> f64;

    /// Commit the trial: copy trial → committed for the touched state.
    fn accept(&mut self, space: &mut Space);

    /// Roll back the trial: copy committed → trial for the touched state.
    fn reject(&mut self, space: &mut Space);

    /// Move-specific statistics payload merged into [`Move::report`].
    fn payload(&self) -> serde_json::Value {
        serde_json::Value::Null
    }

    /// Hook invoked once at the start of every driver call.
    fn begin_step(&mut self, _space: &Space) {}

    /// Structured statistics report.
    fn report(&self) -> serde_json::Value {
        let mut value = self.base().report_header();
        if let Some(cite) = self.base().cite {
            value["reference"] = json!(cite);
        }
        let payload = self.payload();
        if let (Some(object), Some(extra)) = (value.as_object_mut(), payload.as_object()) {
            for (key, entry) in extra {
                object.insert(key.clone(), entry.clone());
            }
        }
        let mut outer = serde_json::Map::new();
        outer.insert(self.base().title.clone(), value);
        serde_json::Value::Object(outer)
    }

    /// Execute one Markov step of up to `n` inner repeats and return the
    /// summed energy change of the accepted trials.
    ///
    /// Do not override; the driver is shared by all moves.
    fn step(
        &mut self,
        space: &mut Space,
        hamiltonian: &mut Hamiltonian,
        rng: &mut MoveRng,
        n: usize,
    ) -> anyhow::Result<f64> {
        self.base_mut().statistics.timer.start();
        self.begin_step(space);

        let mut repeats = n;
        if !self.base().mollist.is_empty() {
            let selected = self.base_mut().mollist.random_molecule(space, rng);
            let base = self.base_mut();
            base.current_molecule = selected;
            if let Some(id) = selected {
                if let Some(entry) = base.mollist.entry(id) {
                    let (entry_repeat, entry_prob) = (entry.repeat, entry.prob);
                    repeats = entry_repeat;
                    base.runfraction = entry_prob;
                }
            }
            // nothing to act on
            if selected.map_or(true, |id| space.num_molecules(id) == 0) {
                self.base_mut().statistics.timer.stop();
                return Ok(0.0);
            }
        }

        // One draw gates the whole call; 0 = never run, 1 = always.
        if rng.uniform() > self.base().runfraction {
            self.base_mut().statistics.timer.stop();
            return Ok(0.0);
        }

        let mut total = 0.0;
        for _ in 0..repeats {
            debug_assert!(self.base().change.is_empty(), "stale change descriptor");
            self.base_mut().statistics.num_trials += 1;

            self.propose(space, hamiltonian, rng)?;
            let change = self.base().change.clone();
            hamiltonian.notify_change(space, &change)?;

            let du = self.energy_change(space, hamiltonian);
            if du.is_nan() {
                log::warn!("{}: energy change is not-a-number", self.base().title);
            }

            let accepted = metropolis(du, rng);
            if accepted {
                self.base_mut().statistics.num_accepted += 1;
                self.accept(space);
                let reported = self.base().alternate_energy.unwrap_or(du);
                self.base_mut().statistics.energy_change_sum += reported;
                total += reported;
            } else {
                self.reject(space);
            }
            total += hamiltonian.finish_trial(space, accepted);

            let base = self.base_mut();
            base.change.clear();
            base.alternate_energy = None;
        }

        space.assert_synchronized();
        self.base_mut().statistics.timer.stop();
        Ok(total)
    }
}

/// Resolve a molecule name to its id, with a move-specific error message.
pub(crate) fn find_molecule_id(
    topology: &Topology,
    name: &str,
    title: &str,
) -> anyhow::Result<usize> {
    topology
        .find_molecule(name)
        .ok_or_else(|| anyhow::anyhow!("{}: unknown molecule '{}'", title, name))
}
