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

use crate::{Point, MOLAR_TO_PER_ANGSTROM3};
use serde::{Deserialize, Serialize};

fn default_mass() -> f64 {
    1.0
}

/// Static properties of an atom kind.
///
/// Atoms need not be chemical elements; any interaction site with its own
/// displacement parameters and activity qualifies. This does *not* include
/// positions or indices, but is used for templating particles.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AtomKind {
    /// Unique name.
    pub name: String,
    /// Unique id; assigned when inserted into a [`super::Topology`].
    #[serde(skip_deserializing)]
    pub id: usize,
    /// Charge (elementary charges).
    #[serde(default)]
    pub charge: f64,
    /// Radius (Å).
    #[serde(default)]
    pub radius: f64,
    /// Mass (g/mol).
    #[serde(default = "default_mass")]
    pub mass: f64,
    /// Translational displacement parameter (Å).
    #[serde(default)]
    pub dp: f64,
    /// Rotational displacement parameter (radians).
    #[serde(default)]
    pub dprot: f64,
    /// Activity for grand-canonical sampling (mol/l). Zero disables.
    #[serde(default)]
    pub activity: f64,
    /// Scalar polarisability (Å³).
    #[serde(default)]
    pub polarisability: f64,
    /// Permanent dipole moment (eÅ).
    #[serde(default)]
    pub dipole: Point,
    /// Hydrophobicity flag.
    #[serde(default)]
    pub hydrophobic: bool,
}

impl AtomKind {
    /// New atom kind with the given name and otherwise default values.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            mass: default_mass(),
            ..Default::default()
        }
    }

    /// Dimensionless chemical potential `ln(a·N_A·10⁻²⁷)` from the activity in mol/l.
    ///
    /// Matches a number density expressed in 1/Å³.
    pub fn chemical_potential(&self) -> f64 {
        (self.activity * MOLAR_TO_PER_ANGSTROM3).ln()
    }
}
