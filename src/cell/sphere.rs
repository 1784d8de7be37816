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

use super::{BoundaryConditions, Shape, VolumeScale, VolumeScalePolicy};
use crate::{MoveRng, Point};
use serde::{Deserialize, Serialize};

/// Spherical cell with a hard boundary and no periodicity.
///
/// Also serves as the configuration space for surface moves where
/// particles are constrained to the sphere of radius `radius`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Sphere {
    radius: f64,
}

impl Sphere {
    pub fn new(radius: f64) -> Self {
        assert!(radius > 0.0, "sphere radius must be positive");
        Self { radius }
    }

    pub fn radius(&self) -> f64 {
        self.radius
    }
}

impl Shape for Sphere {
    #[inline]
    fn volume(&self) -> f64 {
        4.0 / 3.0 * std::f64::consts::PI * self.radius.powi(3)
    }

    fn random_point(&self, rng: &mut MoveRng) -> Point {
        loop {
            let p = Point::new(rng.half(), rng.half(), rng.half()) * 2.0 * self.radius;
            if p.norm_squared() <= self.radius * self.radius {
                return p;
            }
        }
    }

    #[inline]
    fn collision(&self, point: &Point, radius: f64) -> bool {
        point.norm() + radius > self.radius
    }
}

impl BoundaryConditions for Sphere {
    #[inline]
    fn boundary(&self, _point: &mut Point) {}

    #[inline]
    fn distance(&self, a: &Point, b: &Point) -> Point {
        a - b
    }
}

impl VolumeScale for Sphere {
    fn scale_factors(&self, _new_volume: f64, _policy: VolumeScalePolicy) -> anyhow::Result<Point> {
        anyhow::bail!("volume scaling is not supported for spherical cells")
    }

    fn scale_lengths(&mut self, _factors: &Point) -> anyhow::Result<()> {
        anyhow::bail!("volume scaling is not supported for spherical cells")
    }
}
