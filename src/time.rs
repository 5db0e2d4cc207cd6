// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2025.

//! Peripheral clock input and the software countdown timer built on it.
//!
//! [`SwTimer`] is the per-channel countdown service the PIT runs on. It is
//! deterministic and entirely passive: the host advances it by elapsed
//! virtual nanoseconds and it reports how many times the counter expired.
//! Its reload behavior is fixed to what the PIT requires:
//!
//! - expiries occur every `limit` ticks exactly; the counter reloads at the
//!   period boundary and reads 0 until the next tick lands;
//! - programming the limit or the count never synthesizes an expiry;
//! - a limit written while the counter is running takes effect at the next
//!   wrap, never immediately;
//! - sub-period remainders of `advance` are carried, never discarded.
//!
//! A timer with a zero limit holds itself stopped: the counter reads 0 and
//! nothing expires until a non-zero limit arrives and `run` is called again.
//!
//! Reconfiguration (`run`, `stop`, `set_limit`, `set_period_ns`) must happen
//! inside a `begin`/`commit` transaction so a sequence of changes lands as
//! one transition. Nesting transactions is a host programming error; it is
//! logged and the inner `begin` is ignored.

use log::warn;

/// A connected clock source. `period_ns` of 0 means no source is connected.
pub trait Clock {
    fn period_ns(&self) -> u64;
}

pub struct SwTimer {
    period_ns: u64,
    limit: u32,
    count: u32,
    running: bool,
    rem_ns: u64,
    in_txn: bool,
}

impl SwTimer {
    pub fn new() -> SwTimer {
        SwTimer {
            period_ns: 0,
            limit: 0,
            count: 0,
            running: false,
            rem_ns: 0,
            in_txn: false,
        }
    }

    pub fn begin(&mut self) {
        if self.in_txn {
            warn!("software timer: nested transaction begin ignored");
            return;
        }
        self.in_txn = true;
    }

    pub fn commit(&mut self) {
        debug_assert!(self.in_txn, "software timer: commit without begin");
        self.in_txn = false;
    }

    fn check_txn(&self, op: &str) {
        debug_assert!(self.in_txn, "software timer: {} outside a transaction", op);
    }

    pub fn set_period_ns(&mut self, period_ns: u64) {
        self.check_txn("set_period_ns");
        self.period_ns = period_ns;
    }

    /// Program a new reload value. With `reload` false the running counter is
    /// untouched and the new limit applies from the next wrap.
    pub fn set_limit(&mut self, limit: u32, reload: bool) {
        self.check_txn("set_limit");
        self.limit = limit;
        if reload {
            self.count = limit;
            self.rem_ns = 0;
        }
    }

    /// Start counting. A timer that is already running keeps its counter.
    pub fn run(&mut self) {
        self.check_txn("run");
        if self.running {
            return;
        }
        if self.count == 0 {
            if self.limit == 0 {
                // Held stopped until a non-zero limit is programmed.
                return;
            }
            self.count = self.limit;
        }
        self.rem_ns = 0;
        self.running = true;
    }

    /// Stop counting; the counter keeps its value.
    pub fn stop(&mut self) {
        self.check_txn("stop");
        self.running = false;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    /// Consume `ns` of virtual time, returning the number of expiries.
    pub fn advance(&mut self, ns: u64) -> u32 {
        if !self.running || self.period_ns == 0 {
            return 0;
        }
        let total = self.rem_ns + ns;
        let mut ticks = total / self.period_ns;
        self.rem_ns = total % self.period_ns;

        let mut expiries = 0;
        while ticks > 0 {
            if self.count == 0 {
                if self.limit == 0 {
                    self.running = false;
                    break;
                }
                self.count = self.limit;
            }
            let step = u64::min(ticks, u64::from(self.count)) as u32;
            self.count -= step;
            ticks -= u64::from(step);
            if self.count == 0 {
                expiries += 1;
            }
        }
        expiries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn running_timer(period_ns: u64, limit: u32) -> SwTimer {
        let mut t = SwTimer::new();
        t.begin();
        t.set_period_ns(period_ns);
        t.set_limit(limit, false);
        t.run();
        t.commit();
        t
    }

    #[test]
    fn expires_every_limit_ticks() {
        let mut t = running_timer(10, 1000);
        assert_eq!(t.advance(9_990), 0);
        assert_eq!(t.count(), 1);
        assert_eq!(t.advance(10), 1);
        assert_eq!(t.count(), 0);
        // The next full limit's worth of time expires again: the wrap at the
        // boundary does not consume a tick.
        assert_eq!(t.advance(10_000), 1);
    }

    #[test]
    fn one_advance_can_cover_many_periods() {
        let mut t = running_timer(10, 100);
        assert_eq!(t.advance(3_000), 3);
    }

    #[test]
    fn subperiod_remainders_accumulate() {
        let mut t = running_timer(10, 1);
        assert_eq!(t.advance(5), 0);
        assert_eq!(t.advance(5), 1);
    }

    #[test]
    fn limit_change_waits_for_wrap() {
        let mut t = running_timer(10, 1000);
        assert_eq!(t.advance(3_000), 0);
        assert_eq!(t.count(), 700);

        t.begin();
        t.set_limit(50, false);
        t.commit();

        // The in-flight period still runs to the old expiry point...
        assert_eq!(t.count(), 700);
        assert_eq!(t.advance(6_990), 0);
        assert_eq!(t.count(), 1);
        assert_eq!(t.advance(10), 1);
        // ...and only then does the new limit take over.
        assert_eq!(t.advance(500), 1);
    }

    #[test]
    fn zero_limit_holds_stopped() {
        let mut t = SwTimer::new();
        t.begin();
        t.set_period_ns(10);
        t.run();
        t.commit();
        assert!(!t.is_running());
        assert_eq!(t.count(), 0);
        assert_eq!(t.advance(1_000), 0);

        t.begin();
        t.set_limit(5, false);
        t.run();
        t.commit();
        assert!(t.is_running());
        assert_eq!(t.advance(50), 1);
    }

    #[test]
    fn stop_keeps_the_counter() {
        let mut t = running_timer(10, 100);
        t.advance(400);
        t.begin();
        t.stop();
        t.commit();
        assert_eq!(t.count(), 60);
        assert_eq!(t.advance(1_000), 0);
        assert_eq!(t.count(), 60);

        // Restarting resumes from the held counter.
        t.begin();
        t.run();
        t.commit();
        assert_eq!(t.advance(600), 1);
    }

    #[test]
    fn run_while_running_does_not_reset() {
        let mut t = running_timer(10, 100);
        t.advance(300);
        t.begin();
        t.run();
        t.commit();
        assert_eq!(t.count(), 70);
    }

    #[test]
    fn nested_begin_is_ignored() {
        let mut t = SwTimer::new();
        t.begin();
        t.begin();
        t.set_period_ns(10);
        t.set_limit(4, true);
        t.run();
        t.commit();
        assert!(t.is_running());
        assert_eq!(t.advance(40), 1);
    }
}
