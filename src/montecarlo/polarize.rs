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

//! Self-consistent induced-dipole decoration of arbitrary moves.

use super::{Move, MoveBase};
use crate::energy::Hamiltonian;
use crate::space::{Space, State};
use crate::{MoveRng, Point};
use average::{Estimate, Mean};
use serde_json::json;

/// Decorator adding an induced-dipole iteration to any move.
///
/// After the wrapped proposal, the electric field is evaluated on every
/// particle and the dipoles are updated, `µ = α·E + µ_permanent`, until the
/// largest dipole change falls below the threshold. Since any dipole may
/// change, the energy becomes a *full-system* difference and accept/reject
/// synchronise the complete particle vector. Exceeding the iteration bound
/// is a fatal error: continuing would corrupt the acceptance.
///
/// For moves that repeat within one driver call, the dipoles are updated
/// only on the last repeat.
#[derive(Clone, Debug)]
pub struct PolarizeMove<M: Move> {
    inner: M,
    threshold: f64,
    max_iterations: usize,
    iterations: Mean,
    field: Vec<Point>,
    update_dipoles: bool,
    trials_in_step: usize,
}

impl<M: Move> PolarizeMove<M> {
    pub fn new(inner: M, threshold: f64, max_iterations: usize) -> Self {
        Self {
            inner,
            threshold,
            max_iterations,
            iterations: Mean::new(),
            field: Vec::new(),
            update_dipoles: false,
            trials_in_step: 0,
        }
    }

    /// Wrap a move, reading `pol_threshold` and `max_iterations` from the
    /// move's configuration section.
    pub fn from_config(config: &serde_json::Value, inner: M) -> Self {
        let threshold = config
            .get("pol_threshold")
            .and_then(|v| v.as_f64())
            .unwrap_or(1e-3);
        let max_iterations = config
            .get("max_iterations")
            .and_then(|v| v.as_u64())
            .unwrap_or(40) as usize;
        Self::new(inner, threshold, max_iterations)
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    /// Iterate the induced dipoles on the trial state to self-consistency.
    fn induce_dipoles(&mut self, space: &mut Space, hamiltonian: &Hamiltonian) -> anyhow::Result<()> {
        self.field.resize(space.len(), Point::zeros());
        let mut count = 0;
        loop {
            count += 1;
            hamiltonian.electric_field(space, State::Trial, &mut self.field);
            let mut max_error: f64 = 0.0;
            for i in 0..space.len() {
                let particle = space.trial_particle_mut(i);
                let induced = particle.polarisability * self.field[i] + particle.permanent_dipole;
                max_error = max_error.max((induced - particle.dipole).norm());
                particle.dipole = induced;
            }
            if max_error <= self.threshold {
                break;
            }
            anyhow::ensure!(
                count <= self.max_iterations,
                "field induction reached the maximum of {} iterations",
                self.max_iterations
            );
        }
        self.iterations.add(count as f64);
        Ok(())
    }

    /// Mean number of induction iterations per updated trial.
    pub fn mean_iterations(&self) -> f64 {
        self.iterations.mean()
    }
}

impl<M: Move> Move for PolarizeMove<M> {
    fn base(&self) -> &MoveBase {
        self.inner.base()
    }
    fn base_mut(&mut self) -> &mut MoveBase {
        self.inner.base_mut()
    }

    fn begin_step(&mut self, space: &Space) {
        self.trials_in_step = 0;
        self.inner.begin_step(space);
    }

    fn propose(
        &mut self,
        space: &mut Space,
        hamiltonian: &Hamiltonian,
        rng: &mut MoveRng,
    ) -> anyhow::Result<()> {
        self.inner.propose(space, hamiltonian, rng)?;
        self.trials_in_step += 1;

        // for repeated moves, update only after the last inner repeat
        let update_at = self
            .inner
            .base()
            .current_entry()
            .map_or(1, |entry| entry.repeat);
        self.update_dipoles = self.trials_in_step == update_at;
        if self.update_dipoles {
            self.induce_dipoles(space, hamiltonian)?;
        }
        Ok(())
    }

    fn energy_change(&mut self, space: &Space, hamiltonian: &Hamiltonian) -> f64 {
        if self.update_dipoles {
            // any dipole may have changed: full system difference
            hamiltonian.system_energy(space, State::Trial)
                - hamiltonian.system_energy(space, State::Committed)
        } else {
            self.inner.energy_change(space, hamiltonian)
        }
    }

    fn accept(&mut self, space: &mut Space) {
        self.inner.accept(space);
        if self.update_dipoles {
            space.accept_all();
        }
    }

    fn reject(&mut self, space: &mut Space) {
        self.inner.reject(space);
        if self.update_dipoles {
            space.reset_trial();
        }
    }

    fn payload(&self) -> serde_json::Value {
        let mut value = self.inner.payload();
        let polarisation = json!({
            "threshold": self.threshold,
            "max iterations": self.max_iterations,
            "mean iterations": self.iterations.mean(),
        });
        if let Some(object) = value.as_object_mut() {
            object.insert("polarisation".to_string(), polarisation);
            value
        } else {
            json!({ "polarisation": polarisation })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::Cell;
    use crate::energy::{Nonbonded, PairPotential};
    use crate::montecarlo::translate::AtomicTranslate;
    use crate::topology::{AtomKind, MoleculeKind, Topology};
    use crate::Particle;
    use std::rc::Rc;

    fn polar_space(polarisability: f64) -> Space {
        let plus = AtomKind {
            charge: 1.0,
            dp: 0.5,
            polarisability,
            ..AtomKind::new("plus")
        };
        let minus = AtomKind {
            charge: -1.0,
            dp: 0.5,
            polarisability,
            ..AtomKind::new("minus")
        };
        let mut pool = MoleculeKind::new("pool", &["plus", "minus"]);
        pool.atomic = true;
        let topology = Rc::new(Topology::new(vec![plus, minus], vec![pool]).unwrap());
        let mut space = Space::new(topology, Cell::cubic(30.0));
        let a = Particle::from_kind(space.topology().atom(0), crate::Point::new(-4.0, 0.0, 0.0));
        let b = Particle::from_kind(space.topology().atom(1), crate::Point::new(4.0, 0.0, 0.0));
        space.add_group(0, vec![a, b]).unwrap();
        space
    }

    fn coulomb() -> Hamiltonian {
        Hamiltonian::new(vec![Nonbonded::new(vec![PairPotential::Coulomb {
            bjerrum: 7.0,
        }])
        .into()])
    }

    #[test]
    fn zero_polarisability_converges_first_iteration() {
        let mut space = polar_space(0.0);
        let mut hamiltonian = coulomb();
        let mut rng = MoveRng::seeded(3);
        let config = serde_json::json!({"pool": {"peratom": false}});
        let inner = AtomicTranslate::from_config(&config, &space).unwrap();
        let mut mv = PolarizeMove::new(inner, 1e-6, 40);
        for _ in 0..20 {
            mv.step(&mut space, &mut hamiltonian, &mut rng, 1).unwrap();
        }
        assert!((mv.mean_iterations() - 1.0).abs() < 1e-12);
        space.check_invariants().unwrap();
    }

    #[test]
    fn induced_dipoles_follow_the_field() {
        let mut space = polar_space(2.0);
        let mut hamiltonian = coulomb();
        let mut rng = MoveRng::seeded(9);
        let config = serde_json::json!({"pool": {"peratom": false}});
        let inner = AtomicTranslate::from_config(&config, &space).unwrap();
        let mut mv = PolarizeMove::new(inner, 1e-9, 100);
        for _ in 0..20 {
            mv.step(&mut space, &mut hamiltonian, &mut rng, 1).unwrap();
        }
        assert!(mv.mean_iterations() > 1.0);
        // dipoles must be self-consistent with the committed field
        let mut field = vec![crate::Point::zeros(); space.len()];
        hamiltonian.electric_field(&space, State::Committed, &mut field);
        for (i, p) in space.committed().iter().enumerate() {
            let expected = p.polarisability * field[i] + p.permanent_dipole;
            assert!((expected - p.dipole).norm() < 1e-6);
        }
        space.assert_synchronized();
    }

    #[test]
    fn tighter_threshold_needs_more_iterations() {
        let mut counts = Vec::new();
        for threshold in [1e-3, 1e-6, 1e-9] {
            let mut space = polar_space(3.0);
            let mut hamiltonian = coulomb();
            let mut rng = MoveRng::seeded(6);
            let config = serde_json::json!({"pool": {"peratom": false}});
            let inner = AtomicTranslate::from_config(&config, &space).unwrap();
            let mut mv = PolarizeMove::new(inner, threshold, 200);
            for _ in 0..20 {
                mv.step(&mut space, &mut hamiltonian, &mut rng, 1).unwrap();
            }
            counts.push(mv.mean_iterations());
        }
        assert!(counts[0] <= counts[1]);
        assert!(counts[1] <= counts[2]);
        assert!(counts[2] > counts[0]);
    }

    #[test]
    fn iteration_bound_is_fatal() {
        let mut space = polar_space(1e9); // absurd polarisability: diverges
        let mut hamiltonian = coulomb();
        let mut rng = MoveRng::seeded(4);
        let config = serde_json::json!({"pool": {"peratom": false}});
        let inner = AtomicTranslate::from_config(&config, &space).unwrap();
        let mut mv = PolarizeMove::new(inner, 1e-9, 5);
        let result = mv.step(&mut space, &mut hamiltonian, &mut rng, 1);
        assert!(result.is_err());
    }
}
