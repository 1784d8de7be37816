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

use crate::MOLAR_TO_PER_ANGSTROM3;
use serde::{Deserialize, Serialize};

/// Isobaric-ensemble pressure contribution, `βPV - (N + 1)·ln V`, in kT.
///
/// `N` is the number of independently translatable entities: individual
/// particles for atomic groups, one per molecular group. Volume moves rely
/// on this term being part of the Hamiltonian; the moves themselves add no
/// ideal-gas correction.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct ExternalPressure {
    /// Pressure in kT/Å³.
    pressure: f64,
}

impl ExternalPressure {
    /// From a pressure in kT/Å³.
    pub fn new(pressure: f64) -> Self {
        Self { pressure }
    }

    /// From a pressure in millimolar (ideal-gas conversion, `βP = ρ`).
    pub fn from_millimolar(millimolar: f64) -> Self {
        Self::new(millimolar * 1e-3 * MOLAR_TO_PER_ANGSTROM3)
    }

    pub fn pressure(&self) -> f64 {
        self.pressure
    }

    pub fn set_pressure(&mut self, pressure: f64) {
        self.pressure = pressure;
    }

    /// Energy (kT) for a volume (Å³) and `n` translatable entities.
    pub fn energy(&self, volume: f64, n: usize) -> f64 {
        self.pressure * volume - (n as f64 + 1.0) * volume.ln()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::assert_approx_eq;

    #[test]
    fn millimolar_conversion() {
        let ep = ExternalPressure::from_millimolar(1.0);
        // 1 mM = 6.02214076×10⁻⁷ Å⁻³
        assert_approx_eq!(f64, ep.pressure(), 6.02214076e-7, epsilon = 1e-15);
    }

    #[test]
    fn minimum_at_ideal_gas_volume() {
        // d/dV (PV - (N+1) ln V) = 0 at V = (N+1)/P
        let ep = ExternalPressure::new(0.01);
        let n = 9;
        let vstar = (n as f64 + 1.0) / 0.01;
        let u0 = ep.energy(vstar, n);
        assert!(ep.energy(vstar * 1.1, n) > u0);
        assert!(ep.energy(vstar * 0.9, n) > u0);
    }
}
