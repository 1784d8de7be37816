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

//! # Atom and molecule databases
//!
//! Static per-kind parameters used to template particles and groups.
//! The topology is built once at simulation construction and then shared
//! immutably (`Rc<Topology>`) with the space and all moves; it is passed
//! by reference, never accessed through globals.

mod atom;
mod molecule;

pub use atom::AtomKind;
pub use molecule::{conformation_mass_center, MoleculeKind};

use anyhow::Context as _;
use serde::{Deserialize, Serialize};

/// Immutable database of atom and molecule kinds.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Topology {
    atoms: Vec<AtomKind>,
    molecules: Vec<MoleculeKind>,
}

impl Topology {
    /// Assemble and validate a topology.
    ///
    /// Assigns sequential ids, checks name uniqueness, and resolves the
    /// atom names referenced by each molecule kind.
    pub fn new(atoms: Vec<AtomKind>, molecules: Vec<MoleculeKind>) -> anyhow::Result<Self> {
        let mut topology = Self { atoms, molecules };
        topology.finalize()?;
        Ok(topology)
    }

    /// Read a topology from a JSON document with `atoms` and `molecules` lists.
    pub fn from_json(value: &serde_json::Value) -> anyhow::Result<Self> {
        let mut topology: Self =
            serde_json::from_value(value.clone()).context("invalid topology section")?;
        topology.finalize()?;
        Ok(topology)
    }

    fn finalize(&mut self) -> anyhow::Result<()> {
        for (id, atom) in self.atoms.iter_mut().enumerate() {
            atom.id = id;
        }
        for (id, molecule) in self.molecules.iter_mut().enumerate() {
            molecule.id = id;
        }
        let unique: std::collections::HashSet<_> = self.atoms.iter().map(|a| &a.name).collect();
        anyhow::ensure!(unique.len() == self.atoms.len(), "duplicate atom kind names");
        let unique: std::collections::HashSet<_> = self.molecules.iter().map(|m| &m.name).collect();
        anyhow::ensure!(
            unique.len() == self.molecules.len(),
            "duplicate molecule kind names"
        );

        let atoms = self.atoms.clone();
        for molecule in self.molecules.iter_mut() {
            molecule.resolve_atoms(&atoms)?;
        }
        Ok(())
    }

    pub fn atoms(&self) -> &[AtomKind] {
        &self.atoms
    }

    pub fn molecules(&self) -> &[MoleculeKind] {
        &self.molecules
    }

    pub fn atom(&self, id: usize) -> &AtomKind {
        &self.atoms[id]
    }

    pub fn molecule(&self, id: usize) -> &MoleculeKind {
        &self.molecules[id]
    }

    /// Look up an atom kind id by name.
    pub fn find_atom(&self, name: &str) -> Option<usize> {
        self.atoms.iter().position(|a| a.name == name)
    }

    /// Look up a molecule kind id by name.
    pub fn find_molecule(&self, name: &str) -> Option<usize> {
        self.molecules.iter().position(|m| m.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finalize_assigns_ids_and_resolves_names() {
        let atoms = vec![AtomKind::new("Na"), AtomKind::new("Cl")];
        let mut salt = MoleculeKind::new("salt", &["Na", "Cl"]);
        salt.atomic = true;
        let topology = Topology::new(atoms, vec![salt]).unwrap();

        assert_eq!(topology.atom(1).name, "Cl");
        assert_eq!(topology.find_atom("Na"), Some(0));
        assert_eq!(topology.find_molecule("salt"), Some(0));
        assert_eq!(topology.molecule(0).atom_ids(), &[0, 1]);
    }

    #[test]
    fn duplicate_names_rejected() {
        let atoms = vec![AtomKind::new("Na"), AtomKind::new("Na")];
        assert!(Topology::new(atoms, vec![]).is_err());
    }

    #[test]
    fn unknown_atom_in_molecule_rejected() {
        let atoms = vec![AtomKind::new("Na")];
        let molecule = MoleculeKind::new("salt", &["Na", "Xx"]);
        assert!(Topology::new(atoms, vec![molecule]).is_err());
    }

    #[test]
    fn from_json_document() {
        let doc = serde_json::json!({
            "atoms": [
                {"name": "Na", "charge": 1.0, "radius": 1.8, "dp": 0.5, "activity": 0.1},
                {"name": "Cl", "charge": -1.0, "radius": 2.2, "dp": 0.5, "activity": 0.1}
            ],
            "molecules": [
                {"name": "salt", "atoms": ["Na", "Cl"], "atomic": true}
            ]
        });
        let topology = Topology::from_json(&doc).unwrap();
        assert_eq!(topology.atoms().len(), 2);
        assert_eq!(topology.atom(0).charge, 1.0);
        assert!(topology.molecule(0).atomic);
    }
}
