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

use serde::Serialize;
use std::collections::BTreeMap;

/// Description of what the current trial move altered.
///
/// Maps each touched group (by index) to the absolute particle indices that
/// moved within it. An *empty* index list means the whole group moved as a
/// rigid body and no internal energy needs to be evaluated. A geometry
/// change flags that the simulation cell itself was perturbed.
///
/// A trial finishes by either committing the change (trial state is copied
/// to the committed state) or rejecting it (committed state is restored into
/// the trial state); in both cases the change is cleared afterwards.
#[derive(Clone, Debug, Default, Serialize)]
pub struct Change {
    /// Touched groups; values are absolute particle indices, empty = rigid body.
    moved: BTreeMap<usize, Vec<usize>>,
    /// True if the simulation cell changed.
    pub geometry_change: bool,
    /// Volume difference `V_new - V_old` when the geometry changed.
    pub volume_change: f64,
}

impl Change {
    /// Register a single moved particle belonging to `group`.
    pub fn register_particle(&mut self, group: usize, index: usize) {
        self.moved.entry(group).or_default().push(index);
    }

    /// Register a whole group as rigidly moved (empty particle list).
    ///
    /// A rigid registration overrides earlier per-particle registrations
    /// for the same group.
    pub fn register_rigid_group(&mut self, group: usize) {
        self.moved.insert(group, Vec::new());
    }

    /// Register a cell change with volume difference `dv`.
    pub fn register_volume_change(&mut self, dv: f64) {
        self.geometry_change = true;
        self.volume_change = dv;
    }

    /// Touched groups and their moved particle indices.
    pub fn moved_groups(&self) -> &BTreeMap<usize, Vec<usize>> {
        &self.moved
    }

    /// True if nothing has been registered.
    pub fn is_empty(&self) -> bool {
        self.moved.is_empty() && !self.geometry_change
    }

    /// Reset to the pristine state.
    pub fn clear(&mut self) {
        self.moved.clear();
        self.geometry_change = false;
        self.volume_change = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_clear() {
        let mut change = Change::default();
        assert!(change.is_empty());

        change.register_particle(2, 17);
        change.register_particle(2, 18);
        assert_eq!(change.moved_groups()[&2], vec![17, 18]);
        assert!(!change.is_empty());

        change.register_rigid_group(2);
        assert!(change.moved_groups()[&2].is_empty());

        change.register_volume_change(-12.5);
        assert!(change.geometry_change);
        assert_eq!(change.volume_change, -12.5);

        change.clear();
        assert!(change.is_empty());
        assert_eq!(change.volume_change, 0.0);
    }
}
