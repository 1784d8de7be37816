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

//! Volume fluctuation moves for the isobaric and isochoric ensembles.

use super::{Move, MoveBase, MIN_DISPLACEMENT};
use crate::cell::{Cell, Shape, VolumeScale, VolumeScalePolicy};
use crate::energy::Hamiltonian;
use crate::space::Space;
use crate::{MoveRng, Point, MOLAR_TO_PER_ANGSTROM3};
use average::{Estimate, Mean};
use serde_json::json;

/// Isobaric (NPT) volume move.
///
/// New volumes are sampled logarithmically,
/// `V' = exp(ln V + δ·dp)` with `δ ∈ [-0.5, 0.5)`. Atomic groups scale
/// every particle; molecular groups scale their mass centre and translate
/// rigidly. The `βPV - (N+1)·ln V` term is supplied by the Hamiltonian's
/// pressure term, not by the move.
#[derive(Clone, Debug)]
pub struct Isobaric {
    base: MoveBase,
    dp: f64,
    /// Pressure in kT/Å³ (configured in millimolar).
    pressure: f64,
    old_volume: f64,
    new_volume: f64,
    volume: Mean,
    inverse_volume: Mean,
    squared_displacement: Mean,
}

impl Isobaric {
    pub fn from_config(
        config: &serde_json::Value,
        space: &Space,
        hamiltonian: &mut Hamiltonian,
    ) -> anyhow::Result<Self> {
        let mut base = MoveBase::new("Isobaric Volume Fluctuations");
        let dp = config
            .get("dp")
            .and_then(|v| v.as_f64())
            .ok_or_else(|| anyhow::anyhow!("isobaric move requires 'dp'"))?;
        let millimolar = config
            .get("pressure")
            .and_then(|v| v.as_f64())
            .ok_or_else(|| anyhow::anyhow!("isobaric move requires 'pressure' (mM)"))?;
        let pressure = millimolar * 1e-3 * MOLAR_TO_PER_ANGSTROM3;
        base.runfraction = config.get("prob").and_then(|v| v.as_f64()).unwrap_or(1.0);
        if dp < MIN_DISPLACEMENT {
            base.runfraction = 0.0;
        }
        anyhow::ensure!(
            matches!(space.cell, Cell::Cuboid(_)),
            "volume moves require a cuboidal cell"
        );
        anyhow::ensure!(
            !space.groups().is_empty(),
            "cannot run volume moves on an empty system"
        );
        hamiltonian.set_pressure(pressure)?;
        Ok(Self {
            base,
            dp,
            pressure,
            old_volume: 0.0,
            new_volume: 0.0,
            volume: Mean::new(),
            inverse_volume: Mean::new(),
            squared_displacement: Mean::new(),
        })
    }
}

impl Move for Isobaric {
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
        self.old_volume = space.cell.volume();
        self.new_volume = (self.old_volume.ln() + rng.half() * self.dp).exp();
        let factors = space
            .cell
            .scale_factors(self.new_volume, VolumeScalePolicy::Isotropic)?;
        space.scale_trial_volume(&factors)?;

        self.base
            .change
            .register_volume_change(self.new_volume - self.old_volume);
        for (index, group) in space.groups().iter().enumerate() {
            if group.is_atomic() {
                for i in group.range() {
                    self.base.change.register_particle(index, i);
                }
            } else {
                self.base.change.register_rigid_group(index);
            }
        }
        Ok(())
    }

    fn energy_change(&mut self, space: &Space, hamiltonian: &Hamiltonian) -> f64 {
        hamiltonian.energy_change(space, &self.base.change)
    }

    fn accept(&mut self, space: &mut Space) {
        self.volume.add(self.new_volume);
        self.inverse_volume.add(1.0 / self.new_volume);
        self.squared_displacement
            .add((self.new_volume - self.old_volume).powi(2));
        space.accept_all();
    }

    fn reject(&mut self, space: &mut Space) {
        self.volume.add(self.old_volume);
        self.inverse_volume.add(1.0 / self.old_volume);
        self.squared_displacement.add(0.0);
        space.reset_trial();
    }

    fn payload(&self) -> serde_json::Value {
        let mut value = json!({
            "dp": self.dp,
            "pressure/mM": self.pressure / (1e-3 * MOLAR_TO_PER_ANGSTROM3),
        });
        if !self.volume.is_empty() {
            value["<V>"] = json!(self.volume.mean());
            value["cbrt <V>"] = json!(self.volume.mean().cbrt());
            value["<1/V>"] = json!(self.inverse_volume.mean());
            value["mean displacement"] =
                json!(self.squared_displacement.mean().powf(1.0 / 6.0));
        }
        value
    }
}

/// Isochoric shape fluctuation in a cuboid: the z-axis stretches by a
/// log-sampled factor while the xy-plane contracts to keep the volume
/// fixed (`s_xy = 1/√s_z`). The registered geometry change carries dV = 0.
#[derive(Clone, Debug)]
pub struct Isochoric {
    base: MoveBase,
    dp: f64,
    old_length: f64,
    new_length: f64,
    length: Mean,
    squared_displacement: Mean,
}

impl Isochoric {
    pub fn from_config(config: &serde_json::Value, space: &Space) -> anyhow::Result<Self> {
        let mut base = MoveBase::new("Isochoric Side Length Fluctuations");
        let dp = config
            .get("dp")
            .and_then(|v| v.as_f64())
            .ok_or_else(|| anyhow::anyhow!("isochoric move requires 'dp'"))?;
        base.runfraction = config.get("prob").and_then(|v| v.as_f64()).unwrap_or(1.0);
        if dp < MIN_DISPLACEMENT {
            base.runfraction = 0.0;
        }
        anyhow::ensure!(
            matches!(space.cell, Cell::Cuboid(_)),
            "isochoric moves require a cuboidal cell"
        );
        Ok(Self {
            base,
            dp,
            old_length: 0.0,
            new_length: 0.0,
            length: Mean::new(),
            squared_displacement: Mean::new(),
        })
    }
}

impl Move for Isochoric {
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
        let lengths = space
            .cell
            .lengths()
            .ok_or_else(|| anyhow::anyhow!("isochoric move requires a cuboidal cell"))?;
        self.old_length = lengths.z;
        self.new_length = (self.old_length.ln() + rng.half() * self.dp).exp();
        let sz = self.new_length / self.old_length;
        let sxy = 1.0 / sz.sqrt();
        space.scale_trial_volume(&Point::new(sxy, sxy, sz))?;

        self.base.change.register_volume_change(0.0);
        for (index, group) in space.groups().iter().enumerate() {
            if group.is_atomic() {
                for i in group.range() {
                    self.base.change.register_particle(index, i);
                }
            } else {
                self.base.change.register_rigid_group(index);
            }
        }
        Ok(())
    }

    fn energy_change(&mut self, space: &Space, hamiltonian: &Hamiltonian) -> f64 {
        hamiltonian.energy_change(space, &self.base.change)
    }

    fn accept(&mut self, space: &mut Space) {
        self.length.add(self.new_length);
        self.squared_displacement
            .add((self.new_length - self.old_length).powi(2));
        space.accept_all();
    }

    fn reject(&mut self, space: &mut Space) {
        self.length.add(self.old_length);
        self.squared_displacement.add(0.0);
        space.reset_trial();
    }

    fn payload(&self) -> serde_json::Value {
        let mut value = json!({ "dp": self.dp });
        if !self.length.is_empty() {
            value["<Lz>"] = json!(self.length.mean());
            value["mean displacement"] = json!(self.squared_displacement.mean().sqrt());
        }
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::energy::ExternalPressure;
    use crate::topology::{AtomKind, MoleculeKind, Topology};
    use crate::Particle;
    use float_cmp::assert_approx_eq;
    use std::rc::Rc;

    fn gas_space(n: usize, side: f64) -> Space {
        let kind = AtomKind::new("G");
        let mut gas = MoleculeKind::new("gas", &["G"]);
        gas.atomic = true;
        let topology = Rc::new(Topology::new(vec![kind], vec![gas]).unwrap());
        let mut space = Space::new(topology, Cell::cubic(side));
        let mut rng = MoveRng::seeded(55);
        let particles: Vec<Particle> = (0..n)
            .map(|_| Particle::from_kind(space.topology().atom(0), space.cell.random_point(&mut rng)))
            .collect();
        space.add_group(0, particles).unwrap();
        space
    }

    #[test]
    fn requires_pressure_term() {
        let space = gas_space(2, 30.0);
        let mut hamiltonian = Hamiltonian::ideal();
        let config = serde_json::json!({"dp": 0.1, "pressure": 100.0});
        assert!(Isobaric::from_config(&config, &space, &mut hamiltonian).is_err());
    }

    #[test]
    fn zero_dp_never_runs() {
        let space = gas_space(2, 30.0);
        let mut hamiltonian = Hamiltonian::new(vec![ExternalPressure::new(0.0).into()]);
        let config = serde_json::json!({"dp": 0.0, "pressure": 100.0});
        let mut mv = Isobaric::from_config(&config, &space, &mut hamiltonian).unwrap();
        let mut space = gas_space(2, 30.0);
        let mut rng = MoveRng::seeded(1);
        for _ in 0..10 {
            let du = mv.step(&mut space, &mut hamiltonian, &mut rng, 1).unwrap();
            assert_eq!(du, 0.0);
        }
        assert_eq!(mv.base().statistics.num_trials, 0);
        assert_approx_eq!(f64, space.cell.volume(), 27000.0, epsilon = 1e-9);
    }

    #[test]
    fn volume_samples_ideal_gas_distribution() {
        let mut space = gas_space(2, 30.0);
        let mut hamiltonian = Hamiltonian::new(vec![ExternalPressure::new(0.0).into()]);
        let config = serde_json::json!({"dp": 0.5, "pressure": 100.0});
        let mut mv = Isobaric::from_config(&config, &space, &mut hamiltonian).unwrap();
        let mut rng = MoveRng::seeded(10);
        for _ in 0..50_000 {
            mv.step(&mut space, &mut hamiltonian, &mut rng, 1).unwrap();
        }
        // <V> = (N+1)/βP with N = 2 translatable entities
        let expected = 3.0 / (100.0 * 1e-3 * MOLAR_TO_PER_ANGSTROM3);
        let observed = mv.volume.mean();
        assert!(
            (observed - expected).abs() / expected < 0.05,
            "<V> = {observed}, expected {expected}"
        );
        space.check_invariants().unwrap();
    }

    #[test]
    fn isochoric_keeps_volume() {
        let mut space = gas_space(5, 20.0);
        let mut hamiltonian = Hamiltonian::ideal();
        let config = serde_json::json!({"dp": 0.1});
        let mut mv = Isochoric::from_config(&config, &space).unwrap();
        let mut rng = MoveRng::seeded(21);
        let v0 = space.cell.volume();
        for _ in 0..200 {
            mv.step(&mut space, &mut hamiltonian, &mut rng, 1).unwrap();
        }
        assert_approx_eq!(f64, space.cell.volume(), v0, epsilon = 1e-6 * v0);
        space.check_invariants().unwrap();
    }
}
