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

/// Orthorhombic box with full periodic boundary conditions.
///
/// The box is centred at the origin; coordinates are wrapped into
/// `[-L/2, L/2)` along each axis.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Cuboid {
    lengths: Point,
}

impl Cuboid {
    pub fn new(lengths: Point) -> Self {
        assert!(
            lengths.iter().all(|&l| l > 0.0),
            "box side lengths must be positive"
        );
        Self { lengths }
    }

    pub fn cubic(side: f64) -> Self {
        Self::new(Point::new(side, side, side))
    }

    pub fn lengths(&self) -> Point {
        self.lengths
    }

    /// Shortest box side.
    pub fn min_side(&self) -> f64 {
        self.lengths.min()
    }
}

impl Shape for Cuboid {
    #[inline]
    fn volume(&self) -> f64 {
        self.lengths.x * self.lengths.y * self.lengths.z
    }

    fn random_point(&self, rng: &mut MoveRng) -> Point {
        Point::new(
            self.lengths.x * rng.half(),
            self.lengths.y * rng.half(),
            self.lengths.z * rng.half(),
        )
    }

    /// Fully periodic box: there are no hard walls to collide with.
    #[inline]
    fn collision(&self, _point: &Point, _radius: f64) -> bool {
        false
    }
}

impl BoundaryConditions for Cuboid {
    #[inline]
    fn boundary(&self, point: &mut Point) {
        for i in 0..3 {
            let l = self.lengths[i];
            point[i] -= l * (point[i] / l).round();
        }
    }

    #[inline]
    fn distance(&self, a: &Point, b: &Point) -> Point {
        let mut d = a - b;
        self.boundary(&mut d);
        d
    }
}

impl VolumeScale for Cuboid {
    fn scale_factors(&self, new_volume: f64, policy: VolumeScalePolicy) -> anyhow::Result<Point> {
        anyhow::ensure!(new_volume > 0.0, "new volume must be positive");
        match policy {
            VolumeScalePolicy::Isotropic => {
                let s = (new_volume / self.volume()).cbrt();
                Ok(Point::new(s, s, s))
            }
            VolumeScalePolicy::IsochoricZ => {
                anyhow::bail!("isochoric scaling requires an explicit z-factor")
            }
        }
    }

    fn scale_lengths(&mut self, factors: &Point) -> anyhow::Result<()> {
        anyhow::ensure!(
            factors.iter().all(|&s| s > 0.0),
            "scale factors must be positive"
        );
        self.lengths.component_mul_assign(factors);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::assert_approx_eq;

    #[test]
    fn wrap_and_minimum_image() {
        let cell = Cuboid::cubic(10.0);
        let mut p = Point::new(6.0, -7.0, 0.0);
        cell.boundary(&mut p);
        assert_approx_eq!(f64, p.x, -4.0, epsilon = 1e-12);
        assert_approx_eq!(f64, p.y, 3.0, epsilon = 1e-12);

        let a = Point::new(4.5, 0.0, 0.0);
        let b = Point::new(-4.5, 0.0, 0.0);
        let d = cell.distance(&a, &b);
        assert_approx_eq!(f64, d.norm(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn isotropic_scaling_reaches_target_volume() {
        let mut cell = Cuboid::cubic(10.0);
        let factors = cell.scale_factors(2000.0, VolumeScalePolicy::Isotropic).unwrap();
        cell.scale_lengths(&factors).unwrap();
        assert_approx_eq!(f64, cell.volume(), 2000.0, epsilon = 1e-9);
    }

    #[test]
    fn random_points_inside() {
        let cell = Cuboid::cubic(12.0);
        let mut rng = MoveRng::seeded(4);
        for _ in 0..100 {
            let p = cell.random_point(&mut rng);
            assert!(p.iter().all(|&x| (-6.0..6.0).contains(&x)));
        }
    }
}
