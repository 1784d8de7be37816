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

//! Translation and rotation of single particles.

use super::{AcceptanceMap, Move, MoveBase, MIN_DISPLACEMENT};
use crate::cell::{BoundaryConditions, Cell};
use crate::energy::Hamiltonian;
use crate::space::{Space, State};
use crate::topology::Topology;
use crate::transform::{quaternion_about, random_unit_vector};
use crate::{MoveRng, Point};
use average::{Estimate, Mean};
use serde_json::json;
use std::rc::Rc;

/// Shared particle-selection state of the atomic moves.
#[derive(Clone, Copy, Debug)]
struct Selection {
    group: usize,
    particle: usize,
}

/// Translation of a single randomly picked particle.
///
/// The particle is drawn uniformly from a random group of the configured
/// molecule kind. The displacement parameter comes from the particle's atom
/// kind; a generic fallback applies when the per-kind value is zero. Move
/// directions can be restricted with the per-molecule `dir` mask.
#[derive(Clone, Debug)]
pub struct AtomicTranslate {
    base: MoveBase,
    topology: Rc<Topology>,
    /// Fallback displacement when the atom kind defines none.
    generic_dp: f64,
    selection: Option<Selection>,
    dir: Point,
    accmap: AcceptanceMap<usize>,
    group_size: Mean,
}

impl AtomicTranslate {
    pub fn from_config(config: &serde_json::Value, space: &Space) -> anyhow::Result<Self> {
        let mut base = MoveBase::new("Single Particle Translation");
        let (mollist, _extras) = super::MoveList::from_config(config, space.topology())?;
        base.mollist = mollist;
        Ok(Self {
            base,
            topology: space.topology_rc(),
            generic_dp: 0.0,
            selection: None,
            dir: Point::new(1.0, 1.0, 1.0),
            accmap: AcceptanceMap::default(),
            group_size: Mean::new(),
        })
    }

    /// Set a single displacement used for atom kinds without their own.
    pub fn set_generic_displacement(&mut self, dp: f64) {
        self.generic_dp = dp;
    }

    fn displacement_parameter(&self, id: usize) -> f64 {
        let dp = self.topology.atom(id).dp;
        if dp < MIN_DISPLACEMENT {
            self.generic_dp
        } else {
            dp
        }
    }

    fn select(&mut self, space: &Space, rng: &mut MoveRng) -> Option<Selection> {
        let molecule = self.base.current_molecule?;
        let group = space.random_group(molecule, rng)?;
        let particle = space.group(group).random_particle(rng)?;
        self.group_size.add(space.group(group).len() as f64);
        if let Some(entry) = self.base.mollist.entry(molecule) {
            self.dir = entry.dir;
        }
        Some(Selection { group, particle })
    }
}

impl Move for AtomicTranslate {
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
        self.selection = self.select(space, rng);
        let Some(Selection { group, particle }) = self.selection else {
            return Ok(()); // empty group: no-op trial
        };
        let dp = self.displacement_parameter(space.trial()[particle].id);
        let displacement = Point::new(
            self.dir.x * dp * rng.half(),
            self.dir.y * dp * rng.half(),
            self.dir.z * dp * rng.half(),
        );
        space.translate_trial_particle(particle, &displacement);
        // certain energy evaluations rely on up-to-date mass centres
        if space.group(group).is_molecular() {
            space.update_trial_mass_center(group);
        }
        self.base.change.register_particle(group, particle);
        Ok(())
    }

    fn energy_change(&mut self, space: &Space, hamiltonian: &Hamiltonian) -> f64 {
        hamiltonian.energy_change(space, &self.base.change)
    }

    fn accept(&mut self, space: &mut Space) {
        let Some(Selection { group, particle }) = self.selection else {
            return;
        };
        let r2 = space.cell.distance_squared(
            &space.committed()[particle].pos,
            &space.trial()[particle].pos,
        );
        self.accmap.accept(space.committed()[particle].id, r2);
        space.accept_particle(particle);
        if space.group(group).is_molecular() {
            space.accept_group_mass_center(group);
        }
    }

    fn reject(&mut self, space: &mut Space) {
        let Some(Selection { group, particle }) = self.selection else {
            return;
        };
        self.accmap.reject(space.committed()[particle].id);
        space.undo_particle(particle);
        if space.group(group).is_molecular() {
            space.undo_group_mass_center(group);
        }
    }

    fn payload(&self) -> serde_json::Value {
        let mut value = json!({
            "dir": [self.dir.x, self.dir.y, self.dir.z],
            "atoms": self.accmap.to_json(|id| self.topology.atom(*id).name.clone()),
        });
        if !self.group_size.is_empty() && self.group_size.mean() > 0.0 {
            value["moves/particle"] =
                json!(self.base.statistics.num_trials as f64 / self.group_size.mean());
        }
        if self.generic_dp > MIN_DISPLACEMENT {
            value["genericdp"] = json!(self.generic_dp);
        }
        value
    }
}

/// Rotation of a single particle's orientation (its dipole vector).
///
/// Has no effect on isotropic particles. The angular displacement comes
/// from the atom kind's `dprot`, with the same generic fallback mechanism
/// as [`AtomicTranslate`].
#[derive(Clone, Debug)]
pub struct AtomicRotate {
    base: MoveBase,
    topology: Rc<Topology>,
    generic_dp: f64,
    selection: Option<Selection>,
    angle: f64,
    accmap: AcceptanceMap<usize>,
}

impl AtomicRotate {
    pub fn from_config(config: &serde_json::Value, space: &Space) -> anyhow::Result<Self> {
        let mut base = MoveBase::new("Single Particle Rotation");
        let (mollist, _extras) = super::MoveList::from_config(config, space.topology())?;
        base.mollist = mollist;
        Ok(Self {
            base,
            topology: space.topology_rc(),
            generic_dp: 0.0,
            selection: None,
            angle: 0.0,
            accmap: AcceptanceMap::default(),
        })
    }

    pub fn set_generic_displacement(&mut self, dp: f64) {
        self.generic_dp = dp;
    }
}

impl Move for AtomicRotate {
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
        self.selection = None;
        let Some(molecule) = self.base.current_molecule else {
            return Ok(());
        };
        let Some(group) = space.random_group(molecule, rng) else {
            return Ok(());
        };
        let Some(particle) = space.group(group).random_particle(rng) else {
            return Ok(());
        };
        self.selection = Some(Selection { group, particle });

        let mut dprot = self.topology.atom(space.trial()[particle].id).dprot;
        if dprot < MIN_DISPLACEMENT {
            dprot = self.generic_dp;
        }
        let axis = random_unit_vector(rng);
        self.angle = dprot * rng.half();
        let rotation = quaternion_about(&axis, self.angle);
        let dipole = &mut space.trial_particle_mut(particle).dipole;
        *dipole = rotation * *dipole;

        self.base.change.register_particle(group, particle);
        Ok(())
    }

    fn energy_change(&mut self, space: &Space, hamiltonian: &Hamiltonian) -> f64 {
        hamiltonian.energy_change(space, &self.base.change)
    }

    fn accept(&mut self, space: &mut Space) {
        let Some(Selection { particle, .. }) = self.selection else {
            return;
        };
        let degrees = self.angle.to_degrees();
        self.accmap
            .accept(space.committed()[particle].id, degrees * degrees);
        space.accept_particle(particle);
    }

    fn reject(&mut self, space: &mut Space) {
        let Some(Selection { particle, .. }) = self.selection else {
            return;
        };
        self.accmap.reject(space.committed()[particle].id);
        space.undo_particle(particle);
    }

    fn payload(&self) -> serde_json::Value {
        json!({
            "atoms": self.accmap.to_json(|id| self.topology.atom(*id).name.clone()),
        })
    }
}

/// Translation of single particles constrained to a spherical surface.
///
/// The displacement is decomposed into tangential moves along the local
/// azimuthal and polar directions, scaled by the surface metric (`R·sinθ`
/// and `R` respectively), and the result is renormalised back onto the
/// sphere of radius `R`.
#[derive(Clone, Debug)]
pub struct AtomicTranslate2D {
    base: MoveBase,
    topology: Rc<Topology>,
    generic_dp: f64,
    radius: f64,
    selection: Option<Selection>,
    angle: f64,
    accmap: AcceptanceMap<usize>,
}

impl AtomicTranslate2D {
    pub fn from_config(config: &serde_json::Value, space: &Space) -> anyhow::Result<Self> {
        let Cell::Sphere(sphere) = &space.cell else {
            anyhow::bail!("surface translation requires a spherical cell");
        };
        let mut base = MoveBase::new("Single Particle Translation 2D sphere");
        let (mollist, _extras) = super::MoveList::from_config(config, space.topology())?;
        base.mollist = mollist;
        Ok(Self {
            base,
            topology: space.topology_rc(),
            generic_dp: 0.0,
            radius: sphere.radius(),
            selection: None,
            angle: 0.0,
            accmap: AcceptanceMap::default(),
        })
    }

    pub fn set_generic_displacement(&mut self, dp: f64) {
        self.generic_dp = dp;
    }
}

impl Move for AtomicTranslate2D {
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
        self.selection = None;
        let Some(molecule) = self.base.current_molecule else {
            return Ok(());
        };
        let Some(group) = space.random_group(molecule, rng) else {
            return Ok(());
        };
        let Some(particle) = space.group(group).random_particle(rng) else {
            return Ok(());
        };
        self.selection = Some(Selection { group, particle });

        let mut dp = self.topology.atom(space.trial()[particle].id).dp;
        if dp < MIN_DISPLACEMENT {
            dp = self.generic_dp;
        }

        let old = space.trial()[particle].pos;
        let r = old.norm();
        let phi = old.y.atan2(old.x);
        let theta = (old.z / r).acos();

        let phi_dir = Point::new(-phi.sin(), phi.cos(), 0.0);
        let theta_dir = Point::new(
            phi.cos() * theta.cos(),
            phi.sin() * theta.cos(),
            -theta.sin(),
        );
        let step = phi_dir * (self.radius * theta.sin()) * (dp * rng.half())
            + theta_dir * self.radius * (dp * rng.half());
        let moved = old + step;
        let new = moved * (self.radius / moved.norm());
        debug_assert!(
            ((new.norm() - self.radius) / self.radius).abs() < 1e-9,
            "trial particle left the sphere surface"
        );
        self.angle = (old.dot(&new) / (self.radius * self.radius))
            .clamp(-1.0, 1.0)
            .acos();
        space.trial_particle_mut(particle).pos = new;

        self.base.change.register_particle(group, particle);
        Ok(())
    }

    fn energy_change(&mut self, space: &Space, hamiltonian: &Hamiltonian) -> f64 {
        // on-surface moves never collide with the spherical wall
        let Some(Selection { particle, .. }) = self.selection else {
            return 0.0;
        };
        let mut du = 0.0;
        for j in (0..space.len()).filter(|&j| j != particle) {
            du += hamiltonian.pair(space, State::Trial, particle, j)
                - hamiltonian.pair(space, State::Committed, particle, j);
        }
        du
    }

    fn accept(&mut self, space: &mut Space) {
        let Some(Selection { particle, .. }) = self.selection else {
            return;
        };
        let degrees = self.angle.to_degrees();
        self.accmap
            .accept(space.committed()[particle].id, degrees * degrees);
        space.accept_particle(particle);
    }

    fn reject(&mut self, space: &mut Space) {
        let Some(Selection { particle, .. }) = self.selection else {
            return;
        };
        self.accmap.reject(space.committed()[particle].id);
        space.undo_particle(particle);
    }

    fn payload(&self) -> serde_json::Value {
        json!({
            "radius": self.radius,
            "atoms": self.accmap.to_json(|id| self.topology.atom(*id).name.clone()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::Shape;
    use crate::topology::{AtomKind, MoleculeKind};
    use crate::Particle;

    fn ion_space(n: usize, side: f64, dp: f64) -> Space {
        let kind = AtomKind {
            dp,
            ..AtomKind::new("M")
        };
        let mut pool = MoleculeKind::new("pool", &["M"]);
        pool.atomic = true;
        let topology = Rc::new(Topology::new(vec![kind], vec![pool]).unwrap());
        let mut space = Space::new(topology, Cell::cubic(side));
        let mut rng = MoveRng::seeded(9);
        let particles: Vec<Particle> = (0..n)
            .map(|_| {
                let pos = space.cell.random_point(&mut rng);
                Particle::from_kind(space.topology().atom(0), pos)
            })
            .collect();
        space.add_group(0, particles).unwrap();
        space
    }

    fn translate_config() -> serde_json::Value {
        serde_json::json!({"pool": {"peratom": true}})
    }

    #[test]
    fn ideal_translation_always_accepts() {
        let mut space = ion_space(10, 20.0, 0.5);
        let mut hamiltonian = Hamiltonian::ideal();
        let mut rng = MoveRng::seeded(17);
        let mut mv = AtomicTranslate::from_config(&translate_config(), &space).unwrap();

        for _ in 0..50 {
            mv.step(&mut space, &mut hamiltonian, &mut rng, 1).unwrap();
        }
        assert!(mv.base().statistics.num_trials > 0);
        assert_eq!(
            mv.base().statistics.num_accepted,
            mv.base().statistics.num_trials
        );
        space.check_invariants().unwrap();
    }

    #[test]
    fn zero_displacement_is_identity() {
        let mut space = ion_space(5, 20.0, 0.0);
        let before: Vec<_> = space.committed().iter().map(|p| p.pos).collect();
        let mut hamiltonian = Hamiltonian::ideal();
        let mut rng = MoveRng::seeded(3);
        let mut mv = AtomicTranslate::from_config(&translate_config(), &space).unwrap();
        for _ in 0..20 {
            mv.step(&mut space, &mut hamiltonian, &mut rng, 1).unwrap();
        }
        for (p, before) in space.committed().iter().zip(&before) {
            assert_eq!(&p.pos, before);
        }
    }

    #[test]
    fn reject_restores_trial_state() {
        let mut space = ion_space(4, 20.0, 1.0);
        let hamiltonian = Hamiltonian::ideal();
        let mut rng = MoveRng::seeded(5);
        let mut mv = AtomicTranslate::from_config(&translate_config(), &space).unwrap();
        mv.base_mut().current_molecule = Some(0);

        mv.propose(&mut space, &hamiltonian, &mut rng).unwrap();
        mv.reject(&mut space);
        mv.base_mut().change.clear();
        space.assert_synchronized();
    }

    #[test]
    fn surface_move_stays_on_sphere() {
        let kind = AtomKind {
            dp: 0.4,
            ..AtomKind::new("M")
        };
        let mut pool = MoleculeKind::new("pool", &["M"]);
        pool.atomic = true;
        let topology = Rc::new(Topology::new(vec![kind], vec![pool]).unwrap());
        let mut space = Space::new(topology, Cell::Sphere(crate::cell::Sphere::new(10.0)));
        let mut rng = MoveRng::seeded(23);
        let particles: Vec<Particle> = (0..6)
            .map(|_| {
                let dir = crate::transform::random_unit_vector(&mut rng);
                Particle::from_kind(space.topology().atom(0), dir * 10.0)
            })
            .collect();
        space.add_group(0, particles).unwrap();

        let mut hamiltonian = Hamiltonian::ideal();
        let mut mv = AtomicTranslate2D::from_config(&translate_config(), &space).unwrap();
        for _ in 0..100 {
            mv.step(&mut space, &mut hamiltonian, &mut rng, 1).unwrap();
        }
        for p in space.committed() {
            assert!((p.pos.norm() - 10.0).abs() < 1e-9);
        }
    }
}
