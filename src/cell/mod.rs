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

//! # Simulation cells
//!
//! Geometry primitives for the move framework: a [`Shape`] with
//! [`BoundaryConditions`] that can optionally be rescaled through
//! [`VolumeScale`] for constant-pressure sampling.
//!
//! | Cell | PBC | Description |
//! |------|-----|-------------|
//! | [`Cuboid`] | XYZ | Orthorhombic box with minimum-image convention |
//! | [`Sphere`] | None | Spherical surface/volume with hard boundary |

mod cuboid;
mod sphere;

pub use cuboid::Cuboid;
pub use sphere::Sphere;

use crate::{MoveRng, Point};
use serde::{Deserialize, Serialize};

/// Geometric shape like a cube or sphere.
pub trait Shape {
    /// Cell volume (Å³).
    fn volume(&self) -> f64;
    /// Generate a random point inside the boundaries.
    fn random_point(&self, rng: &mut MoveRng) -> Point;
    /// True if a sphere of `radius` centred at `point` collides with a hard boundary.
    fn collision(&self, point: &Point, radius: f64) -> bool;
}

/// Periodic boundary conditions and minimum-image distances.
pub trait BoundaryConditions {
    /// Wrap a point to fit within the boundaries, if appropriate.
    fn boundary(&self, point: &mut Point);
    /// Minimum-image distance vector between two points.
    fn distance(&self, a: &Point, b: &Point) -> Point;
    /// Minimum-image squared distance.
    #[inline]
    fn distance_squared(&self, a: &Point, b: &Point) -> f64 {
        self.distance(a, b).norm_squared()
    }
}

/// Policies for rescaling the cell volume.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum VolumeScalePolicy {
    /// Equal scaling in all directions.
    #[default]
    Isotropic,
    /// Expand along z, contract the xy-plane at constant volume.
    IsochoricZ,
}

/// Rescaling of cell dimensions for volume moves.
pub trait VolumeScale {
    /// Per-axis scale factors taking the cell from its current volume to `new_volume`.
    ///
    /// Errors if the policy is unsupported by this cell type.
    fn scale_factors(&self, new_volume: f64, policy: VolumeScalePolicy) -> anyhow::Result<Point>;
    /// Apply per-axis scale factors to the cell dimensions.
    fn scale_lengths(&mut self, factors: &Point) -> anyhow::Result<()>;
}

/// Supported simulation cells.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub enum Cell {
    Cuboid(Cuboid),
    Sphere(Sphere),
}

impl Cell {
    /// Cubic box with the given side length.
    pub fn cubic(side: f64) -> Self {
        Self::Cuboid(Cuboid::cubic(side))
    }

    /// Radius for spherical cells; `None` otherwise.
    pub fn radius(&self) -> Option<f64> {
        match self {
            Self::Sphere(s) => Some(s.radius()),
            Self::Cuboid(_) => None,
        }
    }

    /// Side lengths for cuboidal cells; `None` otherwise.
    pub fn lengths(&self) -> Option<Point> {
        match self {
            Self::Cuboid(c) => Some(c.lengths()),
            Self::Sphere(_) => None,
        }
    }
}

impl Shape for Cell {
    #[inline]
    fn volume(&self) -> f64 {
        match self {
            Self::Cuboid(c) => c.volume(),
            Self::Sphere(s) => s.volume(),
        }
    }
    fn random_point(&self, rng: &mut MoveRng) -> Point {
        match self {
            Self::Cuboid(c) => c.random_point(rng),
            Self::Sphere(s) => s.random_point(rng),
        }
    }
    #[inline]
    fn collision(&self, point: &Point, radius: f64) -> bool {
        match self {
            Self::Cuboid(c) => c.collision(point, radius),
            Self::Sphere(s) => s.collision(point, radius),
        }
    }
}

impl BoundaryConditions for Cell {
    #[inline]
    fn boundary(&self, point: &mut Point) {
        match self {
            Self::Cuboid(c) => c.boundary(point),
            Self::Sphere(s) => s.boundary(point),
        }
    }
    #[inline]
    fn distance(&self, a: &Point, b: &Point) -> Point {
        match self {
            Self::Cuboid(c) => c.distance(a, b),
            Self::Sphere(s) => s.distance(a, b),
        }
    }
}

impl VolumeScale for Cell {
    fn scale_factors(&self, new_volume: f64, policy: VolumeScalePolicy) -> anyhow::Result<Point> {
        match self {
            Self::Cuboid(c) => c.scale_factors(new_volume, policy),
            Self::Sphere(s) => s.scale_factors(new_volume, policy),
        }
    }
    fn scale_lengths(&mut self, factors: &Point) -> anyhow::Result<()> {
        match self {
            Self::Cuboid(c) => c.scale_lengths(factors),
            Self::Sphere(s) => s.scale_lengths(factors),
        }
    }
}
