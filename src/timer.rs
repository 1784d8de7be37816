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

use std::time::{Duration, Instant};

/// Accumulating timer reporting time spent relative to its total lifetime.
///
/// Used by moves to report the "relative time" entry of their statistics:
/// the fraction of wall-clock time since construction that was spent
/// between `start()` and `stop()` calls.
#[derive(Clone, Debug)]
pub struct Timer {
    spent: Duration,
    started: Option<Instant>,
    created: Instant,
}

impl Default for Timer {
    fn default() -> Self {
        Self {
            spent: Duration::ZERO,
            started: None,
            created: Instant::now(),
        }
    }
}

impl Timer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&mut self) {
        self.started = Some(Instant::now());
    }

    pub fn stop(&mut self) {
        if let Some(started) = self.started.take() {
            self.spent += started.elapsed();
        }
    }

    /// Fraction of total lifetime spent inside start/stop intervals, in [0, 1].
    pub fn relative(&self) -> f64 {
        let total = self.created.elapsed();
        if total.is_zero() {
            return 0.0;
        }
        self.spent.as_secs_f64() / total.as_secs_f64()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_time_is_bounded() {
        let mut timer = Timer::new();
        timer.start();
        std::thread::sleep(Duration::from_millis(2));
        timer.stop();
        let fraction = timer.relative();
        assert!(fraction > 0.0);
        assert!(fraction <= 1.0);
    }

    #[test]
    fn stop_without_start_is_noop() {
        let mut timer = Timer::new();
        timer.stop();
        assert_eq!(timer.spent, Duration::ZERO);
    }
}
