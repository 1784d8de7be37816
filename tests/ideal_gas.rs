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

//! End-to-end: atomic translation of a non-interacting gas.
//!
//! 100 free particles in a 50 Å cube with dp = 1 Å. Every trial must be
//! accepted, the mean-squared displacement per trial is dp²/12 per mobile
//! axis, and neither particle count nor net charge may change.

use std::rc::Rc;
use sylvan::cell::{Cell, Shape};
use sylvan::energy::Hamiltonian;
use sylvan::montecarlo::Propagator;
use sylvan::space::{Space, State};
use sylvan::topology::{AtomKind, MoleculeKind, Topology};
use sylvan::{MoveRng, Particle};

fn build_space() -> Space {
    let gas = AtomKind {
        dp: 1.0,
        charge: 0.0,
        ..AtomKind::new("gas")
    };
    let mut pool = MoleculeKind::new("pool", &["gas"]);
    pool.atomic = true;
    let topology = Rc::new(Topology::new(vec![gas], vec![pool]).unwrap());
    let mut space = Space::new(topology, Cell::cubic(50.0));
    let mut rng = MoveRng::seeded(2024);
    let particles: Vec<Particle> = (0..100)
        .map(|_| Particle::from_kind(space.topology().atom(0), space.cell.random_point(&mut rng)))
        .collect();
    space.add_group(0, particles).unwrap();
    space
}

#[test]
fn ideal_gas_translation() {
    let mut space = build_space();
    let mut hamiltonian = Hamiltonian::ideal();
    let config = serde_json::json!({
        "moves": {
            "atomtranslate": {"pool": {"peratom": true}},
            "random": {"seed": 7},
            "_jsonfile": "",
        }
    });
    let mut propagator =
        Propagator::from_json(&config, &mut space, &mut hamiltonian, None).unwrap();

    // peratom repeats 100 inner trials per outer step
    for _ in 0..2000 {
        propagator.step(&mut space, &mut hamiltonian).unwrap();
    }

    space.check_invariants().unwrap();
    assert_eq!(space.len(), 100);
    assert_eq!(space.net_charge(State::Committed), 0.0);

    let report = propagator.report(&space, &hamiltonian);
    let entry = &report["moves"]["Single Particle Translation"];
    let trials = entry["trials"].as_u64().unwrap();
    assert!(trials >= 100_000, "only {trials} trials performed");

    // without interactions, every trial is accepted
    let acceptance = entry["acceptance"].as_f64().unwrap();
    assert_eq!(acceptance, 1.0);

    // ⟨r²⟩ per trial = 3·dp²/12
    let mean_displacement = entry["atoms"]["gas"]["mean displacement"]
        .as_f64()
        .unwrap();
    let msd = mean_displacement * mean_displacement;
    let expected = 3.0 / 12.0;
    assert!(
        ((msd - expected) / expected).abs() < 0.02,
        "⟨r²⟩ = {msd}, expected {expected}"
    );

    // an ideal system cannot drift
    assert_eq!(propagator.drift(&space, &hamiltonian), 0.0);
}

#[test]
fn hard_sphere_rejections_round_trip() {
    // dense hard spheres on a lattice: rejected trials must restore the
    // trial vector verbatim and the bookkeeping must stay exact
    let sphere = AtomKind {
        dp: 2.0,
        radius: 5.0,
        ..AtomKind::new("sphere")
    };
    let mut pool = MoleculeKind::new("pool", &["sphere"]);
    pool.atomic = true;
    let topology = Rc::new(Topology::new(vec![sphere], vec![pool]).unwrap());
    let mut space = Space::new(topology, Cell::cubic(50.0));
    let mut particles = Vec::new();
    for i in 0..4 {
        for j in 0..4 {
            for k in 0..4 {
                let pos = sylvan::Point::new(
                    -18.75 + 12.5 * i as f64,
                    -18.75 + 12.5 * j as f64,
                    -18.75 + 12.5 * k as f64,
                );
                particles.push(Particle::from_kind(space.topology().atom(0), pos));
            }
        }
    }
    space.add_group(0, particles).unwrap();

    let mut hamiltonian = Hamiltonian::new(vec![sylvan::energy::Nonbonded::new(vec![
        sylvan::energy::PairPotential::HardSphere,
    ])
    .into()]);
    let config = serde_json::json!({
        "moves": {
            "atomtranslate": {"pool": {"peratom": true}},
            "random": {"seed": 13},
            "_jsonfile": "",
        }
    });
    let mut propagator =
        Propagator::from_json(&config, &mut space, &mut hamiltonian, None).unwrap();
    for _ in 0..200 {
        propagator.step(&mut space, &mut hamiltonian).unwrap();
    }
    space.check_invariants().unwrap();

    let report = propagator.report(&space, &hamiltonian);
    let acceptance = report["moves"]["Single Particle Translation"]["acceptance"]
        .as_f64()
        .unwrap();
    assert!(acceptance < 1.0, "no rejections in a dense system");
    assert!(acceptance > 0.0);
    // hard spheres carry no finite energy: the drift is exactly zero
    assert_eq!(propagator.drift(&space, &hamiltonian), 0.0);
}
