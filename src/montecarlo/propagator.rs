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

//! The move dispatcher.
//!
//! A [`Propagator`] owns a heterogeneous collection of moves built from the
//! `moves` section of a JSON configuration document. Each outer step picks
//! one move uniformly with a dedicated Markov-chain generator, runs its
//! driver, and tracks the cumulative energy change for the drift audit.

use super::polarize::PolarizeMove;
use super::tempering::ReplicaLink;
use super::{Move, MoveBase, MoveRng};
use crate::energy::Hamiltonian;
use crate::space::{Space, State};
use average::{Estimate, Mean};
use serde_json::json;
use std::path::PathBuf;

/// Largest tolerated relative energy drift before the audit logs an error.
const MAX_RELATIVE_DRIFT: f64 = 1e-3;

/// Forwarding so boxed moves can be decorated like any other move.
impl Move for Box<dyn Move> {
    fn base(&self) -> &MoveBase {
        (**self).base()
    }
    fn base_mut(&mut self) -> &mut MoveBase {
        (**self).base_mut()
    }
    fn propose(
        &mut self,
        space: &mut Space,
        hamiltonian: &Hamiltonian,
        rng: &mut MoveRng,
    ) -> anyhow::Result<()> {
        (**self).propose(space, hamiltonian, rng)
    }
    fn energy_change(&mut self, space: &Space, hamiltonian: &Hamiltonian) -> f64 {
        (**self).energy_change(space, hamiltonian)
    }
    fn accept(&mut self, space: &mut Space) {
        (**self).accept(space)
    }
    fn reject(&mut self, space: &mut Space) {
        (**self).reject(space)
    }
    fn payload(&self) -> serde_json::Value {
        (**self).payload()
    }
    fn begin_step(&mut self, space: &Space) {
        (**self).begin_step(space)
    }
    fn report(&self) -> serde_json::Value {
        (**self).report()
    }
}

/// Dispatcher owning the move collection and the energy bookkeeping.
pub struct Propagator {
    moves: Vec<Box<dyn Move>>,
    /// Dedicated Markov-chain generator; seeded from the user generator so
    /// trajectories are independent of RNG consumers in the Hamiltonian.
    rng: MoveRng,
    /// User-level generator, available to non-move consumers.
    user_rng: MoveRng,
    json_file: Option<PathBuf>,
    initial_energy: Option<f64>,
    energy_change_sum: f64,
    mean_energy: Mean,
}

impl std::fmt::Debug for Propagator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Propagator")
            .field("moves", &self.moves.len())
            .field("energy_change_sum", &self.energy_change_sum)
            .finish()
    }
}

impl Propagator {
    /// Build the move collection from the `moves` section of a configuration
    /// document.
    ///
    /// Unknown move keys, unknown molecules, and missing required
    /// parameters fail loudly here. A `temper` entry requires a
    /// [`ReplicaLink`]. An optional top-level `polarize` object wraps every
    /// move in the induced-dipole decorator.
    pub fn from_json(
        config: &serde_json::Value,
        space: &mut Space,
        hamiltonian: &mut Hamiltonian,
        mut link: Option<Box<dyn ReplicaLink>>,
    ) -> anyhow::Result<Self> {
        let section = config
            .get("moves")
            .and_then(|v| v.as_object())
            .ok_or_else(|| anyhow::anyhow!("configuration needs a 'moves' object"))?;

        let mut user_rng = MoveRng::from_entropy();
        let mut rng = MoveRng::seed_from(&mut user_rng);
        let mut json_file = Some(PathBuf::from("move_out.json"));
        let polarize = section.get("polarize").cloned();

        let mut moves: Vec<Box<dyn Move>> = Vec::new();
        for (key, value) in section {
            let mv: Box<dyn Move> = match key.as_str() {
                "random" => {
                    if let Some(seed) = value.get("seed").and_then(|v| v.as_u64()) {
                        rng = MoveRng::seeded(seed);
                    } else if value.get("hardware").and_then(|v| v.as_bool()) == Some(true) {
                        rng = MoveRng::from_entropy();
                    }
                    continue;
                }
                "_jsonfile" => {
                    json_file = match value.as_str() {
                        Some("") => None,
                        Some(name) => Some(PathBuf::from(name)),
                        None => anyhow::bail!("'_jsonfile' must be a string"),
                    };
                    continue;
                }
                "polarize" => continue, // handled below
                "atomtranslate" => {
                    Box::new(super::AtomicTranslate::from_config(value, space)?)
                }
                "atomrotate" => Box::new(super::AtomicRotate::from_config(value, space)?),
                "atomtranslate2D" => {
                    Box::new(super::AtomicTranslate2D::from_config(value, space)?)
                }
                "moltransrot" => Box::new(super::TranslateRotate::from_config(value, space)?),
                "moltransrotnbody" => {
                    Box::new(super::TranslateRotateNbody::from_config(value, space)?)
                }
                "moltransrot2body" => {
                    Box::new(super::TranslateRotateTwobody::from_config(value, space)?)
                }
                "moltransrotcluster" => {
                    Box::new(super::TranslateRotateCluster::from_config(value, space)?)
                }
                "ClusterMove" => Box::new(super::ClusterMove::from_config(value, space)?),
                "ctransnr" => Box::new(super::ClusterTranslateNr::from_config(value, space)?),
                "crankshaft" => Box::new(super::Crankshaft::from_config(value, space)?),
                "pivot" => Box::new(super::Pivot::from_config(value, space)?),
                "reptate" => Box::new(super::Reptation::from_config(value, space)?),
                "isobaric" => Box::new(super::Isobaric::from_config(value, space, hamiltonian)?),
                "isochoric" => Box::new(super::Isochoric::from_config(value, space)?),
                "atomgc" => Box::new(super::GrandCanonicalSalt::from_config(value, space)?),
                "gc" => Box::new(super::GreenGC::from_config(value, space)?),
                "titrate" => Box::new(super::SwapMove::from_config(value, space)?),
                "gctit" => Box::new(super::GrandCanonicalTitration::from_config(value, space)?),
                "conformationswap" => {
                    Box::new(super::ConformationSwap::from_config(value, space)?)
                }
                "temper" => {
                    let link = link
                        .take()
                        .ok_or_else(|| anyhow::anyhow!("'temper' requires a replica link"))?;
                    Box::new(super::ParallelTempering::from_config(value, link)?)
                }
                unknown => anyhow::bail!("unknown move '{}'", unknown),
            };
            moves.push(match &polarize {
                Some(options) => Box::new(PolarizeMove::from_config(options, mv)),
                None => mv,
            });
        }
        anyhow::ensure!(!moves.is_empty(), "no moves defined");

        Ok(Self {
            moves,
            rng,
            user_rng,
            json_file,
            initial_energy: None,
            energy_change_sum: 0.0,
            mean_energy: Mean::new(),
        })
    }

    /// Propagator with a preassembled move list (mainly for tests).
    pub fn new(moves: Vec<Box<dyn Move>>, rng: MoveRng) -> Self {
        let user_rng = MoveRng::from_entropy();
        Self {
            moves,
            rng,
            user_rng,
            json_file: None,
            initial_energy: None,
            energy_change_sum: 0.0,
            mean_energy: Mean::new(),
        }
    }

    pub fn moves(&self) -> &[Box<dyn Move>] {
        &self.moves
    }

    /// The user-level random number generator.
    pub fn user_rng(&mut self) -> &mut MoveRng {
        &mut self.user_rng
    }

    /// Perform one outer Markov step: select one move uniformly and drive it.
    ///
    /// Returns the energy change of the step.
    pub fn step(&mut self, space: &mut Space, hamiltonian: &mut Hamiltonian) -> anyhow::Result<f64> {
        if self.initial_energy.is_none() {
            self.initial_energy = Some(hamiltonian.system_energy(space, State::Committed));
        }
        let index = self.rng.range(self.moves.len());
        let du = self.moves[index].step(space, hamiltonian, &mut self.rng, 1)?;
        self.energy_change_sum += du;
        self.mean_energy
            .add(self.initial_energy.unwrap_or(0.0) + self.energy_change_sum);
        Ok(du)
    }

    /// Sum of all accepted energy changes so far.
    pub fn energy_change_sum(&self) -> f64 {
        self.energy_change_sum
    }

    /// Absolute energy drift: `U(current) - (U(initial) + ΣΔU)`.
    pub fn drift(&self, space: &Space, hamiltonian: &Hamiltonian) -> f64 {
        let current = hamiltonian.system_energy(space, State::Committed);
        current - (self.initial_energy.unwrap_or(current) + self.energy_change_sum)
    }

    /// Structured report over all moves plus the energy audit.
    pub fn report(&self, space: &Space, hamiltonian: &Hamiltonian) -> serde_json::Value {
        let current = hamiltonian.system_energy(space, State::Committed);
        let drift = self.drift(space, hamiltonian);
        let mut moves = serde_json::Map::new();
        for mv in &self.moves {
            if let Some(object) = mv.report().as_object() {
                for (key, value) in object {
                    moves.insert(key.clone(), value.clone());
                }
            }
        }
        json!({
            "moves": moves,
            "energy": {
                "initial": self.initial_energy,
                "current": current,
                "change": self.energy_change_sum,
                "average": self.mean_energy.mean(),
                "absolute drift": drift,
                "relative drift": drift / current.abs().max(f64::MIN_POSITIVE),
            },
        })
    }

    /// Run the drift audit and write the JSON summary, if configured.
    pub fn finish(
        &self,
        space: &Space,
        hamiltonian: &Hamiltonian,
    ) -> anyhow::Result<serde_json::Value> {
        let report = self.report(space, hamiltonian);
        let current = hamiltonian.system_energy(space, State::Committed);
        let relative = (self.drift(space, hamiltonian) / current.abs().max(f64::MIN_POSITIVE)).abs();
        if relative > MAX_RELATIVE_DRIFT {
            log::error!("relative energy drift {relative:.3e} exceeds {MAX_RELATIVE_DRIFT:.0e}");
        }
        if let Some(path) = &self.json_file {
            std::fs::write(path, serde_json::to_string_pretty(&report)?)?;
        }
        Ok(report)
    }
}
