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

//! End-to-end: grand-canonical salt equilibration from an empty box.
//!
//! 100 Å cube at 0.1 M salt activity. The steady state must show equal
//! cation and anion numbers, an activity coefficient γ = a/c near one for
//! the ideal system, and an insertion/deletion flux ratio near one.

use std::rc::Rc;
use sylvan::cell::Cell;
use sylvan::energy::Hamiltonian;
use sylvan::montecarlo::Propagator;
use sylvan::space::{Space, State};
use sylvan::topology::{AtomKind, MoleculeKind, Topology};
use sylvan::MOLAR_TO_PER_ANGSTROM3;

fn empty_salt_space() -> Space {
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
    let mut salt = MoleculeKind::new("salt", &["Na", "Cl"]);
    salt.atomic = true;
    let topology = Rc::new(Topology::new(vec![na, cl], vec![salt]).unwrap());
    let mut space = Space::new(topology, Cell::cubic(100.0));
    space.add_group(0, Vec::new()).unwrap();
    space
}

#[test]
fn salt_equilibration() {
    let _ = pretty_env_logger::try_init();
    let mut space = empty_salt_space();
    let mut hamiltonian = Hamiltonian::ideal();
    let config = serde_json::json!({
        "moves": {
            "atomgc": {"molecule": "salt"},
            "random": {"seed": 2718},
            "_jsonfile": "",
        }
    });
    let mut propagator =
        Propagator::from_json(&config, &mut space, &mut hamiltonian, None).unwrap();

    let trials = 300_000;
    let burn_in = 20_000;
    let mut cation_sum = 0.0;
    let mut anion_sum = 0.0;
    let mut samples = 0usize;
    for step in 0..trials {
        propagator.step(&mut space, &mut hamiltonian).unwrap();
        if step >= burn_in {
            cation_sum += space.tracker().count(0) as f64;
            anion_sum += space.tracker().count(1) as f64;
            samples += 1;
        }
    }
    space.check_invariants().unwrap();

    // 1:1 electrolyte: pairwise insertion keeps the counts identical
    assert_eq!(space.tracker().count(0), space.tracker().count(1));
    assert_eq!(space.net_charge(State::Committed), 0.0);

    // ⟨N⟩/V should reproduce the activity for an ideal system (γ → 1)
    let volume = space.volume(State::Committed);
    let expected = 0.1 * MOLAR_TO_PER_ANGSTROM3 * volume; // ≈ 60 ions
    let mean_cations = cation_sum / samples as f64;
    let mean_anions = anion_sum / samples as f64;
    for mean in [mean_cations, mean_anions] {
        let gamma = expected / mean;
        assert!(
            (gamma - 1.0).abs() < 0.05,
            "activity coefficient {gamma} deviates from 1 (⟨N⟩ = {mean})"
        );
    }

    // steady-state flux: insertions balance deletions
    let report = propagator.report(&space, &hamiltonian);
    let entry = &report["moves"]["Grand Canonical Salt"];
    let flux = entry["flux"].as_f64().unwrap();
    assert!((flux - 1.0).abs() < 0.05, "flux = {flux}");

    // the density accumulator agrees with the direct average
    let molarity = entry["atoms"]["Na"]["molarity"].as_f64().unwrap();
    assert!(
        (molarity - 0.1).abs() / 0.1 < 0.05,
        "accumulated density {molarity} M"
    );

    // ideal system: the reported potential-energy change is zero → no drift
    assert_eq!(propagator.drift(&space, &hamiltonian), 0.0);
}
