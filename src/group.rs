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

//! Groups of particles.
//!
//! A group is a contiguous half-open range of indices into the global
//! particle vectors, representing one molecule or one pool of free ions.
//! Groups hold semantic ranges, never particle ownership.

use crate::{MoveRng, Point};
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Distinguishes macromolecules from pools of free particles.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum GroupKind {
    /// Pool of free particles; the mass centre is irrelevant and the
    /// particle count may fluctuate.
    Atomic,
    /// Rigid or flexible macromolecule with a tracked mass centre.
    Molecular,
}

/// A contiguous set of particles forming one molecule or ion pool.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Group {
    /// Display name, normally the molecule kind name.
    name: String,
    /// Molecule kind id.
    molecule: usize,
    kind: GroupKind,
    /// Absolute indices in the global particle vectors.
    range: Range<usize>,
    /// Committed mass centre (molecular groups only).
    mass_center: Option<Point>,
    /// Trial mass centre (molecular groups only).
    trial_mass_center: Option<Point>,
}

impl Group {
    pub fn new(name: &str, molecule: usize, kind: GroupKind, range: Range<usize>) -> Self {
        Self {
            name: name.to_string(),
            molecule,
            kind,
            range,
            mass_center: None,
            trial_mass_center: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn molecule(&self) -> usize {
        self.molecule
    }

    pub fn kind(&self) -> GroupKind {
        self.kind
    }

    pub fn is_molecular(&self) -> bool {
        self.kind == GroupKind::Molecular
    }

    pub fn is_atomic(&self) -> bool {
        self.kind == GroupKind::Atomic
    }

    /// Absolute index range in the global particle vectors.
    pub fn range(&self) -> Range<usize> {
        self.range.clone()
    }

    /// Iterator over the absolute particle indices.
    pub fn iter(&self) -> Range<usize> {
        self.range.clone()
    }

    /// First absolute index.
    pub fn front(&self) -> usize {
        self.range.start
    }

    /// One past the last absolute index.
    pub fn end(&self) -> usize {
        self.range.end
    }

    /// Last absolute index; panics on an empty group.
    pub fn back(&self) -> usize {
        assert!(!self.is_empty());
        self.range.end - 1
    }

    pub fn len(&self) -> usize {
        self.range.len()
    }

    pub fn is_empty(&self) -> bool {
        self.range.is_empty()
    }

    pub fn contains(&self, index: usize) -> bool {
        self.range.contains(&index)
    }

    /// Uniformly pick an absolute particle index from the group.
    pub fn random_particle(&self, rng: &mut MoveRng) -> Option<usize> {
        if self.is_empty() {
            None
        } else {
            Some(self.range.start + rng.range(self.len()))
        }
    }

    pub fn mass_center(&self) -> Option<Point> {
        self.mass_center
    }

    pub fn trial_mass_center(&self) -> Option<Point> {
        self.trial_mass_center
    }

    pub fn set_mass_center(&mut self, cm: Point) {
        self.mass_center = Some(cm);
    }

    pub fn set_trial_mass_center(&mut self, cm: Point) {
        self.trial_mass_center = Some(cm);
    }

    /// Copy the trial mass centre into the committed slot.
    pub fn accept_mass_center(&mut self) {
        self.mass_center = self.trial_mass_center;
    }

    /// Restore the trial mass centre from the committed slot.
    pub fn undo_mass_center(&mut self) {
        self.trial_mass_center = self.mass_center;
    }

    /// Shift the whole range by a signed offset (particle insertion/deletion upstream).
    pub(crate) fn shift(&mut self, offset: isize) {
        self.range = ((self.range.start as isize + offset) as usize)
            ..((self.range.end as isize + offset) as usize);
    }

    /// Grow the range by `n` particles at its end.
    pub(crate) fn expand(&mut self, n: usize) {
        self.range = self.range.start..self.range.end + n;
    }

    /// Shrink the range by `n` particles from its end.
    pub(crate) fn shrink(&mut self, n: usize) {
        assert!(self.len() >= n, "cannot shrink group below zero size");
        self.range = self.range.start..self.range.end - n;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ranges_and_picking() {
        let mut group = Group::new("water", 0, GroupKind::Molecular, 20..23);
        assert_eq!(group.len(), 3);
        assert_eq!(group.front(), 20);
        assert_eq!(group.back(), 22);
        assert!(group.contains(21));
        assert!(!group.contains(23));

        let mut rng = MoveRng::seeded(0);
        for _ in 0..50 {
            let i = group.random_particle(&mut rng).unwrap();
            assert!(group.contains(i));
        }

        group.shift(5);
        assert_eq!(group.range(), 25..28);
        group.expand(2);
        assert_eq!(group.len(), 5);
        group.shrink(4);
        assert_eq!(group.range(), 25..26);
    }

    #[test]
    fn mass_center_bookkeeping() {
        let mut group = Group::new("protein", 1, GroupKind::Molecular, 0..2);
        group.set_mass_center(Point::new(1.0, 0.0, 0.0));
        group.set_trial_mass_center(Point::new(2.0, 0.0, 0.0));
        group.undo_mass_center();
        assert_eq!(group.trial_mass_center(), group.mass_center());

        group.set_trial_mass_center(Point::new(3.0, 0.0, 0.0));
        group.accept_mass_center();
        assert_eq!(group.mass_center().unwrap().x, 3.0);
    }
}
