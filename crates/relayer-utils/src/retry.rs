// Copyright 2022 Webb Technologies Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Retry logic for async calls

use std::time::Duration;

use backoff::backoff::Backoff;

/// Constant with Max Retry Count is a backoff policy which always returns
/// a constant duration, until it exceeds the maximum retry count.
#[derive(Debug)]
pub struct ConstantWithMaxRetryCount {
    interval: Duration,
    max_retry_count: usize,
    count: usize,
}

impl ConstantWithMaxRetryCount {
    /// Creates a new Constant backoff with `interval` and `max_retry_count`.
    /// `interval` is the duration to wait between retries, and `max_retry_count` is the maximum
    /// number of retries, after which we return `None` to indicate that we should stop retrying.
    pub fn new(interval: Duration, max_retry_count: usize) -> Self {
        Self {
            interval,
            max_retry_count,
            count: 0,
        }
    }
}

impl Backoff for ConstantWithMaxRetryCount {
    fn next_backoff(&mut self) -> Option<Duration> {
        (self.count < self.max_retry_count).then(|| {
            self.count += 1;
            self.interval
        })
    }

    fn reset(&mut self) {
        self.count = 0;
    }
}

/// Doubling backoff capped at `base * 2^max_exponent`, without jitter.
///
/// The block-range getter uses this to back off from a flaky RPC endpoint:
/// the wait doubles on every consecutive failure and stays at the cap
/// afterwards, it never gives up on its own.
#[derive(Debug)]
pub struct CappedExponential {
    base: Duration,
    max_exponent: u32,
    failures: u32,
}

impl CappedExponential {
    /// Creates a new capped doubling backoff starting at `base`.
    pub fn new(base: Duration, max_exponent: u32) -> Self {
        Self {
            base,
            max_exponent,
            failures: 0,
        }
    }

    /// The wait before the next retry, doubling up to the cap.
    pub fn next_wait(&mut self) -> Duration {
        let exp = self.failures.min(self.max_exponent);
        if self.failures < u32::MAX {
            self.failures += 1;
        }
        self.base * 2u32.pow(exp)
    }

    /// Resets the failure streak after a successful call.
    pub fn reset(&mut self) {
        self.failures = 0;
    }
}

impl Backoff for CappedExponential {
    fn next_backoff(&mut self) -> Option<Duration> {
        Some(self.next_wait())
    }

    fn reset(&mut self) {
        CappedExponential::reset(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_until_the_cap() {
        let mut backoff = CappedExponential::new(Duration::from_secs(2), 5);
        let waits: Vec<u64> =
            (0..8).map(|_| backoff.next_wait().as_secs()).collect();
        assert_eq!(waits, vec![2, 4, 8, 16, 32, 64, 64, 64]);
    }

    #[test]
    fn reset_restarts_the_streak() {
        let mut backoff = CappedExponential::new(Duration::from_secs(1), 3);
        backoff.next_wait();
        backoff.next_wait();
        backoff.reset();
        assert_eq!(backoff.next_wait(), Duration::from_secs(1));
    }

    #[test]
    fn constant_stops_after_max_retries() {
        let mut backoff =
            ConstantWithMaxRetryCount::new(Duration::from_millis(100), 2);
        assert!(backoff.next_backoff().is_some());
        assert!(backoff.next_backoff().is_some());
        assert!(backoff.next_backoff().is_none());
    }
}
