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

//! End-to-end: isobaric scaling of a non-interacting pair.
//!
//! Two particles in a 30 Å cube at 100 mM pressure. The sampled mean
//! volume must match the ideal-gas expectation `⟨V⟩ = (N+1)/βP` and the
//! energy bookkeeping must be drift free.

use std::rc::Rc;
use sylvan::cell::{Cell, Shape};
use sylvan::energy::{ExternalPressure, Hamiltonian};
use sylvan::montecarlo::Propagator;
use sylvan::space::{Space, State};
use sylvan::topology::{AtomKind, MoleculeKind, Topology};
use sylvan::{Particle, Point, MOLAR_TO_PER_ANGSTROM3};

#[test]
fn isobaric_pair_reaches_ideal_gas_volume() {
    let kind = AtomKind::new("A");
    let mut pool = MoleculeKind::new("pool", &["A"]);
    pool.atomic = true;
    let topology = Rc::new(Topology::new(vec![kind], vec![pool]).unwrap());
    let mut space = Space::new(topology, Cell::cubic(30.0));
    let a = Particle::from_kind(space.topology().atom(0), Point::new(-5.0, -5.0, -5.0));
    let b = Particle::from_kind(space.topology().atom(0), Point::new(5.0, -5.0, -5.0));
    space.add_group(0, vec![a, b]).unwrap();

    let mut hamiltonian = Hamiltonian::new(vec![ExternalPressure::new(0.0).into()]);
    let config = serde_json::json!({
        "moves": {
            "isobaric": {"dp": 0.5, "pressure": 100.0},
            "random": {"seed": 3},
            "_jsonfile": "",
        }
    });
    let mut propagator =
        Propagator::from_json(&config, &mut space, &mut hamiltonian, None).unwrap();

    let initial_energy = hamiltonian.system_energy(&space, State::Committed);
    let mut volume_sum = 0.0;
    let trials = 40_000;
    for _ in 0..trials {
        propagator.step(&mut space, &mut hamiltonian).unwrap();
        volume_sum += space.volume(State::Committed);
    }
    space.check_invariants().unwrap();

    // P = 100 mM in kT/Å³; two atomic entities → ⟨V⟩ = 3/βP
    let pressure = 100.0 * 1e-3 * MOLAR_TO_PER_ANGSTROM3;
    let expected = 3.0 / pressure;
    let observed = volume_sum / trials as f64;
    assert!(
        ((observed - expected) / expected).abs() < 0.03,
        "⟨V⟩ = {observed:.0} Å³, expected {expected:.0} Å³"
    );

    // net energy drift below 1e-6·|U_initial|
    let drift = propagator.drift(&space, &hamiltonian).abs();
    assert!(
        drift < 1e-6 * initial_energy.abs(),
        "energy drift {drift:e} (U₀ = {initial_energy})"
    );
}

#[test]
fn zero_dp_volume_move_is_a_noop() {
    let kind = AtomKind::new("A");
    let mut pool = MoleculeKind::new("pool", &["A"]);
    pool.atomic = true;
    let topology = Rc::new(Topology::new(vec![kind], vec![pool]).unwrap());
    let mut space = Space::new(topology, Cell::cubic(30.0));
    let a = Particle::from_kind(space.topology().atom(0), Point::zeros());
    space.add_group(0, vec![a]).unwrap();

    let mut hamiltonian = Hamiltonian::new(vec![ExternalPressure::new(0.0).into()]);
    let config = serde_json::json!({
        "moves": {
            "isobaric": {"dp": 0.0, "pressure": 100.0},
            "_jsonfile": "",
        }
    });
    let mut propagator =
        Propagator::from_json(&config, &mut space, &mut hamiltonian, None).unwrap();
    for _ in 0..100 {
        let du = propagator.step(&mut space, &mut hamiltonian).unwrap();
        assert_eq!(du, 0.0);
    }
    assert_eq!(space.cell.volume(), 27_000.0);
}
