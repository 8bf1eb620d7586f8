//! Clock & scheduler utilities (C2, SPEC_FULL.md §4.5).
//!
//! Wall-clock formatting, duration-window checks, and the adaptive sleep
//! ladder that governs `CreateOrder` retry pacing. Pulled out of the FSM
//! into a standalone module so it is independently testable (Testable
//! Property 3), mirroring how the `internal_transfer` FSM keeps its
//! timestamp/CAS helpers in `transfer::db` rather than inline in the
//! coordinator.

use std::time::{SystemTime, UNIX_EPOCH};

pub fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_secs() as i64
}

/// `true` when fewer than `duration` seconds have elapsed since `timestamp`.
/// Mirrors `original_source`'s `Data.TimestampCheck`.
pub fn within_window(timestamp: i64, duration_secs: f64, now: i64) -> bool {
    ((now - timestamp) as f64) < duration_secs
}

/// One rung of the `availableLadder` (SPEC_FULL.md §3 "Schedule").
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LadderStep {
    pub window_seconds: f64,
    pub sleep_seconds: f64,
}

/// Timing tables governing `CreateOrder` retry pacing (§4.5).
#[derive(Debug, Clone)]
pub struct Schedule {
    /// Baseline request spacing when no stock has been seen recently.
    pub default_sleep: f64,
    /// Piecewise schedule mapping "time since last stock sighting" to the
    /// next sleep duration. `ladder[0].window_seconds` must be `0.0`.
    pub available_ladder: Vec<LadderStep>,
    /// Seconds between forced "create anyway" attempts from `WaitForStock`.
    pub refresh_interval: f64,
    /// Vendor code `3` ("ERR 3") back-off: sleep this long while active.
    pub err3_sleep: f64,
    /// Minutes-denominated window during which ERR3 back-off stays active
    /// after the last ERR3 sighting, despite the field's name
    /// (`original_source`'s `err3Interval = 1.5` is minutes, confirmed by
    /// its `/60`-formatted log message — see SPEC_FULL.md §4.3).
    pub err3_interval_minutes: f64,

    pub last_create_attempt_at: i64,
    pub last_stock_seen_at: i64,
    pub err3_seen_at: Option<i64>,
}

impl Schedule {
    pub fn new(default_sleep: f64, refresh_interval: f64) -> Self {
        Schedule {
            default_sleep,
            available_ladder: vec![
                LadderStep { window_seconds: 0.0, sleep_seconds: 0.0 },
                LadderStep { window_seconds: 1.25, sleep_seconds: default_sleep / 1.5 },
                LadderStep { window_seconds: 5.0, sleep_seconds: default_sleep },
                LadderStep { window_seconds: 8.0, sleep_seconds: default_sleep * 1.5 },
                LadderStep { window_seconds: 10.5, sleep_seconds: default_sleep / 1.5 },
            ],
            refresh_interval,
            err3_sleep: 4.96,
            err3_interval_minutes: 1.5,
            last_create_attempt_at: 0,
            last_stock_seen_at: 0,
            err3_seen_at: None,
        }
    }

    pub fn mark_stock_seen(&mut self, now: i64) {
        self.last_stock_seen_at = now;
    }

    pub fn mark_create_attempt(&mut self, now: i64) {
        self.last_create_attempt_at = now;
    }

    pub fn mark_err3(&mut self, now: i64) {
        self.err3_seen_at = Some(now);
    }

    fn stale_window(&self) -> f64 {
        self.available_ladder
            .last()
            .map(|s| s.window_seconds)
            .unwrap_or(0.0)
    }

    /// `true` while stock was seen recently enough to still be inside the
    /// ladder's outer window (the `availableLadder[-1][0]` check the
    /// distilled spec's `CreateOrder → CreateOrder` guard references).
    pub fn within_available_window(&self, now: i64) -> bool {
        within_window(self.last_stock_seen_at, self.stale_window(), now)
    }

    /// `true` when the last forced create attempt is still within
    /// `refresh_interval` — i.e. a liveness probe is not yet due.
    pub fn within_refresh_interval(&self, now: i64) -> bool {
        within_window(self.last_create_attempt_at, self.refresh_interval, now)
    }

    /// Adaptive sleep duration for the next `CreateOrder` retry (§4.5
    /// "Semantics"). ERR3 back-off overrides the ladder while active; after
    /// the vendor's observed window passes, `reset_err3` clears it and the
    /// ladder resumes.
    pub fn next_create_sleep(&mut self, now: i64) -> f64 {
        if let Some(seen_at) = self.err3_seen_at {
            if within_window(seen_at, self.err3_interval_minutes * 60.0, now) {
                return self.err3_sleep;
            }
            self.err3_seen_at = None;
        }

        if !self.within_available_window(now) {
            return self.default_sleep;
        }

        let elapsed = (now - self.last_stock_seen_at) as f64;
        for window in self.available_ladder.windows(2) {
            let (start, end) = (window[0], window[1]);
            if elapsed >= start.window_seconds && elapsed < end.window_seconds {
                return end.sleep_seconds;
            }
        }
        self.default_sleep
    }
}

/// Coarse countdown tier used by `WaitForSale` (SPEC_FULL.md §4.3).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CountdownTier {
    /// `>= 3600s` remaining: nap 600s.
    Hours,
    /// `[600, 3600)s` remaining: nap 60s.
    TensOfMinutes,
    /// `(60, 600)s` remaining: nap 5s.
    Minutes,
    /// Exactly the pre-warm instant.
    PreWarm,
    /// `(1, 60)s` remaining: nap 1s.
    FinalMinute,
    /// `<= 1s` remaining: sleep the exact remainder plus a clock-skew pad.
    Sliver,
}

/// Clock-skew pad added to the final sliver sleep (Design Note "Timing
/// precision" — must never be dropped even if an implementation adds an NTP
/// query at startup).
pub const CLOCK_SKEW_PAD_SECONDS: f64 = 0.003;

/// `WaitForStock`'s forced "create anyway" liveness-probe interval.
/// `original_source` hardcodes this as `refreshInterval = 2.1` rather than
/// exposing it as a config knob; kept as a constant here for the same
/// reason — it tunes the FSM's own retry cadence, not the network layer.
pub const DEFAULT_REFRESH_INTERVAL_SECONDS: f64 = 2.1;

pub fn classify_countdown(countdown: i64) -> CountdownTier {
    match countdown {
        c if c >= 3600 => CountdownTier::Hours,
        c if c >= 600 => CountdownTier::TensOfMinutes,
        c if c > 60 => CountdownTier::Minutes,
        30 => CountdownTier::PreWarm,
        c if c > 1 => CountdownTier::FinalMinute,
        _ => CountdownTier::Sliver,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn within_window_true_just_inside() {
        assert!(within_window(100, 10.0, 105));
    }

    #[test]
    fn within_window_false_once_elapsed() {
        assert!(!within_window(100, 10.0, 111));
    }

    #[test]
    fn ladder_hammers_hardest_in_first_second() {
        let mut sched = Schedule::new(0.8, 2.1);
        sched.mark_stock_seen(1000);
        // elapsed 0.x falls in [0, 1.25) bucket -> sleep_seconds of rung 1
        assert_eq!(sched.next_create_sleep(1000), 0.8 / 1.5);
    }

    #[test]
    fn ladder_relaxes_then_reaccelerates() {
        let mut sched = Schedule::new(0.8, 2.1);
        sched.mark_stock_seen(1000);
        // elapsed 6s falls into [5, 8) -> rung sleep 1.2
        assert_eq!(sched.next_create_sleep(1006), 0.8 * 1.5);
        // elapsed 9s falls into [8, 10.5) -> rung sleep 0.8/1.5
        assert_eq!(sched.next_create_sleep(1009), 0.8 / 1.5);
    }

    #[test]
    fn ladder_reverts_to_default_once_stale() {
        let mut sched = Schedule::new(0.8, 2.1);
        sched.mark_stock_seen(1000);
        assert_eq!(sched.next_create_sleep(1011), 0.8);
    }

    #[test]
    fn err3_backoff_overrides_ladder_while_active() {
        let mut sched = Schedule::new(0.8, 2.1);
        sched.mark_stock_seen(1000);
        sched.mark_err3(1000);
        assert_eq!(sched.next_create_sleep(1000), sched.err3_sleep);
    }

    #[test]
    fn err3_backoff_expires_after_window() {
        let mut sched = Schedule::new(0.8, 2.1);
        sched.mark_err3(1000);
        // 1.5 minutes = 90s
        assert_eq!(sched.next_create_sleep(1100), sched.default_sleep);
        assert!(sched.err3_seen_at.is_none());
    }

    #[test]
    fn countdown_tiers_classify_boundaries() {
        assert_eq!(classify_countdown(3600), CountdownTier::Hours);
        assert_eq!(classify_countdown(600), CountdownTier::TensOfMinutes);
        assert_eq!(classify_countdown(599), CountdownTier::Minutes);
        assert_eq!(classify_countdown(30), CountdownTier::PreWarm);
        assert_eq!(classify_countdown(59), CountdownTier::FinalMinute);
        assert_eq!(classify_countdown(1), CountdownTier::Sliver);
        assert_eq!(classify_countdown(0), CountdownTier::Sliver);
        assert_eq!(classify_countdown(-5), CountdownTier::Sliver);
    }
}
