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

use super::AtomKind;
use crate::{MoveRng, Point, PositionVec, MOLAR_TO_PER_ANGSTROM3};
use serde::{Deserialize, Serialize};

/// Static properties of a molecule kind.
///
/// A *molecular* kind is a rigid or flexible macromolecule whose mass centre
/// is tracked; an *atomic* kind is a pool of free particles (e.g. a salt
/// reservoir) where the mass centre is irrelevant and the particle count may
/// fluctuate in grand-canonical sampling.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MoleculeKind {
    /// Unique name.
    pub name: String,
    /// Unique id; assigned when inserted into a [`super::Topology`].
    #[serde(skip_deserializing)]
    pub id: usize,
    /// Names of the member atom kinds, in order.
    pub atoms: Vec<String>,
    /// True for a pool of free particles; false for a tracked macromolecule.
    #[serde(default)]
    pub atomic: bool,
    /// Activity for grand-canonical sampling (mol/l). Zero disables.
    #[serde(default)]
    pub activity: f64,
    /// Library of internal conformations (positions relative to an arbitrary origin).
    #[serde(default)]
    pub conformations: Vec<PositionVec>,
    /// Resolved member atom kind ids; filled by `Topology::new`.
    #[serde(skip)]
    atom_ids: Vec<usize>,
}

impl MoleculeKind {
    /// New molecule kind referencing atom kinds by name.
    pub fn new(name: &str, atoms: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            atoms: atoms.iter().map(|a| a.to_string()).collect(),
            ..Default::default()
        }
    }

    /// Resolved member atom kind ids.
    pub fn atom_ids(&self) -> &[usize] {
        &self.atom_ids
    }

    /// Number of atoms per molecule.
    pub fn len(&self) -> usize {
        self.atoms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.atoms.is_empty()
    }

    /// Dimensionless chemical potential `ln(a·N_A·10⁻²⁷)` from the activity in mol/l.
    pub fn chemical_potential(&self) -> f64 {
        (self.activity * MOLAR_TO_PER_ANGSTROM3).ln()
    }

    /// Pick a random conformation from the library, if any.
    pub fn random_conformation(&self, rng: &mut MoveRng) -> Option<&PositionVec> {
        rng.element(&self.conformations)
    }

    pub(super) fn resolve_atoms(&mut self, atoms: &[AtomKind]) -> anyhow::Result<()> {
        self.atom_ids = self
            .atoms
            .iter()
            .map(|name| {
                atoms
                    .iter()
                    .position(|a| &a.name == name)
                    .ok_or_else(|| {
                        anyhow::anyhow!("molecule '{}': unknown atom kind '{}'", self.name, name)
                    })
            })
            .collect::<anyhow::Result<_>>()?;
        for conformation in &self.conformations {
            anyhow::ensure!(
                conformation.len() == self.atoms.len(),
                "molecule '{}': conformation atom count mismatch",
                self.name
            );
        }
        Ok(())
    }
}

/// Mass centre of a conformation using per-atom masses.
pub fn conformation_mass_center(positions: &[Point], masses: &[f64]) -> Point {
    let total: f64 = masses.iter().sum();
    positions
        .iter()
        .zip(masses)
        .map(|(p, m)| p * *m)
        .sum::<Point>()
        / total
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conformation_length_checked() {
        let atoms = vec![AtomKind::new("A"), AtomKind::new("B")];
        let mut kind = MoleculeKind::new("dimer", &["A", "B"]);
        kind.conformations = vec![vec![Point::zeros()]]; // wrong length
        assert!(kind.resolve_atoms(&atoms).is_err());
    }

    #[test]
    fn mass_center_weighted() {
        let positions = [Point::new(0.0, 0.0, 0.0), Point::new(2.0, 0.0, 0.0)];
        let cm = conformation_mass_center(&positions, &[3.0, 1.0]);
        assert!((cm.x - 0.5).abs() < 1e-12);
    }
}
