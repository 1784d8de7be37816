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

use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};

/// Pseudo-random source driving the Markov chain.
///
/// Moves draw exclusively from a dedicated `MoveRng` instance owned by the
/// propagator, seeded from the user-level generator at construction. This
/// keeps Monte Carlo trajectories deterministic regardless of any RNG
/// consumers inside the Hamiltonian.
#[derive(Clone, Debug)]
pub struct MoveRng(StdRng);

impl MoveRng {
    /// Non-deterministic generator seeded from the operating system.
    pub fn from_entropy() -> Self {
        Self(StdRng::from_entropy())
    }

    /// Deterministic generator from a fixed seed.
    pub fn seeded(seed: u64) -> Self {
        Self(StdRng::seed_from_u64(seed))
    }

    /// New generator seeded from another random source.
    pub fn seed_from(source: &mut impl RngCore) -> Self {
        Self(StdRng::seed_from_u64(source.next_u64()))
    }

    /// Uniform variate in the half-open unit interval [0, 1).
    #[inline]
    pub fn uniform(&mut self) -> f64 {
        self.0.gen::<f64>()
    }

    /// Uniform variate in [-0.5, 0.5).
    #[inline]
    pub fn half(&mut self) -> f64 {
        self.0.gen::<f64>() - 0.5
    }

    /// Uniform integer in `0..n`. Panics if `n == 0`.
    #[inline]
    pub fn range(&mut self, n: usize) -> usize {
        self.0.gen_range(0..n)
    }

    /// Fair coin flip.
    #[inline]
    pub fn flip(&mut self) -> bool {
        self.0.gen::<bool>()
    }

    /// Uniformly pick a slice element.
    pub fn element<'a, T>(&mut self, items: &'a [T]) -> Option<&'a T> {
        if items.is_empty() {
            None
        } else {
            Some(&items[self.range(items.len())])
        }
    }

    /// Uniformly pick `n` *distinct* slice elements, or `None` if too few.
    pub fn sample<T: Copy>(&mut self, items: &[T], n: usize) -> Option<Vec<T>> {
        if items.len() < n {
            return None;
        }
        let picked = rand::seq::index::sample(&mut self.0, items.len(), n);
        Some(picked.iter().map(|i| items[i]).collect())
    }
}

impl RngCore for MoveRng {
    fn next_u32(&mut self) -> u32 {
        self.0.next_u32()
    }
    fn next_u64(&mut self) -> u64 {
        self.0.next_u64()
    }
    fn fill_bytes(&mut self, dest: &mut [u8]) {
        self.0.fill_bytes(dest)
    }
    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
        self.0.try_fill_bytes(dest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic_with_fixed_seed() {
        let mut a = MoveRng::seeded(7);
        let mut b = MoveRng::seeded(7);
        for _ in 0..100 {
            assert_eq!(a.uniform(), b.uniform());
        }
    }

    #[test]
    fn half_interval() {
        let mut rng = MoveRng::seeded(1);
        for _ in 0..1000 {
            let x = rng.half();
            assert!((-0.5..0.5).contains(&x));
        }
    }

    #[test]
    fn sample_without_replacement() {
        let mut rng = MoveRng::seeded(3);
        let items = [10, 20, 30, 40];
        let picked = rng.sample(&items, 3).unwrap();
        assert_eq!(picked.len(), 3);
        let mut sorted = picked.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), 3);
        assert!(rng.sample(&items, 5).is_none());
    }
}
