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

//! Geometric helpers shared by the Monte Carlo moves.

use crate::cell::BoundaryConditions;
use crate::{MoveRng, Point, UnitQuaternion};
use nalgebra::UnitVector3;

/// Generate a random unit vector by rejection sampling on the embedded ball.
pub fn random_unit_vector(rng: &mut MoveRng) -> Point {
    const RADIUS_SQUARED: f64 = 0.5 * 0.5;
    loop {
        let p = Point::new(rng.half(), rng.half(), rng.half());
        let norm_squared = p.norm_squared();
        if norm_squared <= RADIUS_SQUARED && norm_squared > 1e-12 {
            return p / norm_squared.sqrt();
        }
    }
}

/// Quaternion for rotation by `angle` about the (not necessarily unit) `axis`.
pub fn quaternion_about(axis: &Point, angle: f64) -> UnitQuaternion {
    UnitQuaternion::from_axis_angle(&UnitVector3::new_normalize(*axis), angle)
}

/// Rotate a point about a pivot, using the minimum-image separation.
///
/// Working on the minimum image keeps groups that straddle a periodic
/// boundary rigid under rotation.
#[inline]
pub fn rotate_about(
    point: &Point,
    pivot: &Point,
    rotation: &UnitQuaternion,
    cell: &impl BoundaryConditions,
) -> Point {
    rotation * cell.distance(point, pivot) + pivot
}

/// Mass centre of a set of (position, mass) pairs under periodic boundaries.
///
/// Positions are unfolded relative to the first entry via the minimum-image
/// convention before averaging, then the result is wrapped back into the cell.
pub fn mass_center<'a>(
    cell: &impl BoundaryConditions,
    entries: impl IntoIterator<Item = (&'a Point, f64)>,
) -> Point {
    let mut iter = entries.into_iter();
    let (first, first_mass) = iter.next().expect("mass centre of an empty set");
    let mut total_mass = first_mass;
    let mut weighted = Point::zeros();
    for (pos, mass) in iter {
        weighted += cell.distance(pos, first) * mass;
        total_mass += mass;
    }
    let mut cm = first + weighted / total_mass;
    cell.boundary(&mut cm);
    cm
}
