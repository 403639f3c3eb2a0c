//! Pure scheduling decisions. Given the current epoch second and the dirty
//! queue depth, say which jobs fire. All state lives in explicit markers so a
//! synthetic clock can drive it in tests.

use crate::config::{
    refresh_cadence, CLEANUP_EVERY_MINUTES, CLEANUP_OFFSET_MINUTE, LIVE_POLL_EVERY_SECS,
    POLL_SETTLE_SECS,
};
use crate::scheduler::JobKind;
use crate::types::Granularity;

/// Seconds between canonical refreshes for a given dirty-queue depth. Zero
/// means "every tick".
pub fn canonical_cadence(depth: i64) -> i64 {
    use refresh_cadence::*;
    if depth <= 0 {
        IDLE_SECS
    } else if depth <= LIGHT_MAX_DEPTH {
        LIGHT_SECS
    } else if depth <= HEAVY_MAX_DEPTH {
        HEAVY_SECS
    } else {
        0
    }
}

/// UTC wall-clock fields of an epoch second.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Clock {
    second: i64,
    minute: i64,
    hour: i64,
    epoch_minute: i64,
}

impl Clock {
    fn at(now: i64) -> Self {
        Self {
            second: now.rem_euclid(60),
            minute: now.div_euclid(60).rem_euclid(60),
            hour: now.div_euclid(3_600).rem_euclid(24),
            epoch_minute: now.div_euclid(60),
        }
    }
}

fn poll_minute(g: Granularity, c: Clock) -> bool {
    match g {
        Granularity::FiveMinutes => c.minute % 5 == 0,
        Granularity::OneHour => c.minute == 0,
        Granularity::SixHours => c.minute == 0 && c.hour % 6 == 0,
        Granularity::OneDay => c.minute == 0 && c.hour == 2,
    }
}

fn backfill_minute(g: Granularity, c: Clock) -> bool {
    match g {
        Granularity::FiveMinutes => c.minute % 5 == 2,
        Granularity::OneHour => c.minute == 2,
        Granularity::SixHours => c.minute == 3 && c.hour % 6 == 0,
        Granularity::OneDay => c.minute == 5 && c.hour == 2,
    }
}

/// Last boundary key each branch fired for.
#[derive(Debug, Default, Clone)]
pub struct Scheduler {
    last_live_second: Option<i64>,
    last_canonical: Option<i64>,
    last_poll_minute: [Option<i64>; 4],
    last_backfill_minute: [Option<i64>; 4],
    last_cleanup_minute: Option<i64>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Jobs due at `now`, marking each as fired. Calling again within the
    /// same boundary returns nothing for that branch.
    pub fn decide(&mut self, now: i64, dirty_depth: i64) -> Vec<JobKind> {
        let c = Clock::at(now);
        let mut due = Vec::new();

        if c.second % LIVE_POLL_EVERY_SECS == 0 && self.last_live_second != Some(now) {
            self.last_live_second = Some(now);
            due.push(JobKind::LivePoll);
        }

        let cadence = canonical_cadence(dirty_depth);
        let canonical_due = match self.last_canonical {
            None => true,
            Some(last) if last == now => false,
            Some(_) if cadence == 0 => true,
            Some(last) => now - last >= cadence,
        };
        if canonical_due {
            self.last_canonical = Some(now);
            due.push(JobKind::CanonicalRefresh);
        }

        for g in Granularity::ALL {
            let i = g.index();
            if c.second >= POLL_SETTLE_SECS
                && poll_minute(g, c)
                && self.last_poll_minute[i] != Some(c.epoch_minute)
            {
                self.last_poll_minute[i] = Some(c.epoch_minute);
                due.push(JobKind::Poll(g));
            }
        }

        for g in Granularity::ALL {
            let i = g.index();
            if backfill_minute(g, c) && self.last_backfill_minute[i] != Some(c.epoch_minute) {
                self.last_backfill_minute[i] = Some(c.epoch_minute);
                due.push(JobKind::Backfill(g));
            }
        }

        if c.minute % CLEANUP_EVERY_MINUTES == CLEANUP_OFFSET_MINUTE
            && self.last_cleanup_minute != Some(c.epoch_minute)
        {
            self.last_cleanup_minute = Some(c.epoch_minute);
            due.push(JobKind::Cleanup);
        }

        due
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // 2024-01-01T00:00:00Z
    const MIDNIGHT: i64 = 1_704_067_200;

    fn at(h: i64, m: i64, s: i64) -> i64 {
        MIDNIGHT + h * 3_600 + m * 60 + s
    }

    /// Run `decide` once per second over `[from, to]`, collecting every kind fired.
    fn run(s: &mut Scheduler, from: i64, to: i64, depth: i64) -> Vec<(i64, JobKind)> {
        (from..=to)
            .flat_map(|t| s.decide(t, depth).into_iter().map(move |k| (t, k)))
            .collect()
    }

    #[test]
    fn cadence_steps_with_depth() {
        assert_eq!(canonical_cadence(0), 60);
        assert_eq!(canonical_cadence(1), 30);
        assert_eq!(canonical_cadence(200), 30);
        assert_eq!(canonical_cadence(201), 15);
        assert_eq!(canonical_cadence(1_000), 15);
        assert_eq!(canonical_cadence(1_001), 0);
    }

    #[test]
    fn live_poll_fires_once_per_quarter_minute() {
        let mut s = Scheduler::new();
        let t = at(10, 1, 15);
        assert!(s.decide(t, 0).contains(&JobKind::LivePoll));
        // Same second twice: the marker holds.
        assert!(!s.decide(t, 0).contains(&JobKind::LivePoll));
        assert!(!s.decide(t + 1, 0).contains(&JobKind::LivePoll));

        let live: Vec<i64> = run(&mut s, at(10, 2, 0), at(10, 2, 59), 0)
            .into_iter()
            .filter(|(_, k)| *k == JobKind::LivePoll)
            .map(|(t, _)| t - at(10, 2, 0))
            .collect();
        assert_eq!(live, vec![0, 15, 30, 45]);
    }

    #[test]
    fn canonical_fires_first_tick_then_by_cadence() {
        let mut s = Scheduler::new();
        let t0 = at(10, 1, 1);
        assert!(s.decide(t0, 0).contains(&JobKind::CanonicalRefresh));
        assert!(!s.decide(t0 + 59, 0).contains(&JobKind::CanonicalRefresh));
        assert!(s.decide(t0 + 60, 0).contains(&JobKind::CanonicalRefresh));
    }

    #[test]
    fn backlog_surge_moves_cadence_to_every_tick() {
        let mut s = Scheduler::new();
        let t0 = at(10, 1, 1);
        assert!(s.decide(t0, 0).contains(&JobKind::CanonicalRefresh));
        // Idle cadence would wait 60s; a 1500-deep queue fires on the next tick.
        assert!(s.decide(t0 + 1, 1_500).contains(&JobKind::CanonicalRefresh));
        assert!(s.decide(t0 + 2, 1_500).contains(&JobKind::CanonicalRefresh));
        // But never twice in the same second.
        assert!(!s.decide(t0 + 2, 1_500).contains(&JobKind::CanonicalRefresh));

        // Light backlog: 30s.
        assert!(!s.decide(t0 + 31, 50).contains(&JobKind::CanonicalRefresh));
        assert!(s.decide(t0 + 32, 50).contains(&JobKind::CanonicalRefresh));
    }

    #[test]
    fn polls_wait_for_the_settle_second_and_fire_once_per_minute() {
        let mut s = Scheduler::new();
        let fired = run(&mut s, at(2, 0, 0), at(2, 0, 59), 0);
        let polls: Vec<(i64, JobKind)> = fired
            .into_iter()
            .filter(|(_, k)| matches!(k, JobKind::Poll(_)))
            .collect();
        // 02:00 is the daily poll minute; 6h polls only on multiples of six.
        let settle = at(2, 0, 30);
        assert_eq!(
            polls,
            vec![
                (settle, JobKind::Poll(Granularity::FiveMinutes)),
                (settle, JobKind::Poll(Granularity::OneHour)),
                (settle, JobKind::Poll(Granularity::OneDay)),
            ]
        );
    }

    #[test]
    fn poll_minutes_per_granularity() {
        let polls_at = |h, m| {
            let mut s = Scheduler::new();
            s.decide(at(h, m, 45), 0)
                .into_iter()
                .filter_map(|k| match k {
                    JobKind::Poll(g) => Some(g),
                    _ => None,
                })
                .collect::<Vec<_>>()
        };
        assert_eq!(polls_at(10, 5), vec![Granularity::FiveMinutes]);
        assert_eq!(polls_at(10, 0), vec![Granularity::FiveMinutes, Granularity::OneHour]);
        assert_eq!(
            polls_at(12, 0),
            vec![Granularity::FiveMinutes, Granularity::OneHour, Granularity::SixHours]
        );
        assert_eq!(polls_at(10, 3), Vec::<Granularity>::new());
    }

    #[test]
    fn backfills_are_offset_from_polls() {
        let backfills_at = |h, m| {
            let mut s = Scheduler::new();
            s.decide(at(h, m, 0), 0)
                .into_iter()
                .filter_map(|k| match k {
                    JobKind::Backfill(g) => Some(g),
                    _ => None,
                })
                .collect::<Vec<_>>()
        };
        assert_eq!(backfills_at(10, 7), vec![Granularity::FiveMinutes]);
        assert_eq!(backfills_at(10, 2), vec![Granularity::FiveMinutes, Granularity::OneHour]);
        assert_eq!(backfills_at(6, 3), vec![Granularity::SixHours]);
        assert_eq!(backfills_at(7, 3), Vec::<Granularity>::new());
        assert_eq!(backfills_at(2, 5), vec![Granularity::OneDay]);
        assert_eq!(backfills_at(3, 5), Vec::<Granularity>::new());
    }

    #[test]
    fn backfill_fires_once_across_its_minute() {
        let mut s = Scheduler::new();
        let n = run(&mut s, at(10, 2, 0), at(10, 2, 59), 0)
            .into_iter()
            .filter(|(_, k)| *k == JobKind::Backfill(Granularity::OneHour))
            .count();
        assert_eq!(n, 1);
    }

    #[test]
    fn cleanup_every_ten_minutes_at_offset_seven() {
        let mut s = Scheduler::new();
        let minutes: Vec<i64> = run(&mut s, at(10, 0, 0), at(10, 59, 59), 0)
            .into_iter()
            .filter(|(_, k)| *k == JobKind::Cleanup)
            .map(|(t, _)| (t - at(10, 0, 0)) / 60)
            .collect();
        assert_eq!(minutes, vec![7, 17, 27, 37, 47, 57]);
    }

    #[test]
    fn one_hour_of_ticks_fires_expected_counts() {
        let mut s = Scheduler::new();
        let fired = run(&mut s, at(10, 0, 0), at(10, 59, 59), 0);
        let count = |k: JobKind| fired.iter().filter(|(_, f)| *f == k).count();
        assert_eq!(count(JobKind::LivePoll), 240);
        assert_eq!(count(JobKind::CanonicalRefresh), 60);
        assert_eq!(count(JobKind::Poll(Granularity::FiveMinutes)), 12);
        assert_eq!(count(JobKind::Poll(Granularity::OneHour)), 1);
        assert_eq!(count(JobKind::Poll(Granularity::SixHours)), 0);
        assert_eq!(count(JobKind::Backfill(Granularity::FiveMinutes)), 12);
    }
}
