// src/engine/timing.rs

//! Timing Tracker. Pure bookkeeping over an `Attempt`; callers persist the result.

use chrono::{DateTime, Utc};

use crate::models::attempt::{Attempt, SectionRecord, SectionTiming, TimingSnapshot};

/// Whole seconds from `from` to `to`, never negative.
pub fn seconds_between(from: DateTime<Utc>, to: DateTime<Utc>) -> i64 {
    (to - from).num_seconds().max(0)
}

/// Folds time the student was away into `total_paused_seconds`.
///
/// A gap since the last recorded activity longer than `threshold_seconds` counts
/// as paused time. Shorter gaps count as active. Either way the activity mark
/// moves to `now`. Explicitly paused or finished attempts are left alone.
/// Returns the seconds folded.
pub fn reconcile_activity(attempt: &mut Attempt, now: DateTime<Utc>, threshold_seconds: i64) -> i64 {
    if attempt.status.is_terminal() {
        return 0;
    }
    let Some(last_active) = attempt.last_active_at else {
        return 0;
    };

    let gap = seconds_between(last_active, now);
    let folded = if gap > threshold_seconds { gap } else { 0 };
    attempt.total_paused_seconds += folded;
    attempt.last_active_at = Some(now);
    folded
}

/// Explicit pause. Any gap since the last activity is paused time.
/// Returns false if the attempt was already paused.
pub fn pause(attempt: &mut Attempt, now: DateTime<Utc>) -> bool {
    if attempt.is_paused() {
        return false;
    }
    reconcile_activity(attempt, now, 0);
    attempt.last_active_at = None;
    attempt.paused_at = Some(now);
    if let Some(section) = attempt.current_section_mut() {
        freeze_section(section, now);
    }
    true
}

/// Explicit resume.
///
/// From a pause, the whole pause window is paused time. Without a prior pause
/// the whole gap since the last activity is folded instead.
/// Returns the seconds folded.
pub fn resume(attempt: &mut Attempt, now: DateTime<Utc>) -> i64 {
    if !attempt.is_paused() {
        return reconcile_activity(attempt, now, 0);
    }

    let since = attempt.paused_at.unwrap_or(now);
    let gap = seconds_between(since, now);
    attempt.total_paused_seconds += gap;
    attempt.paused_at = None;
    attempt.last_active_at = Some(now);
    if let Some(section) = attempt.current_section_mut() {
        thaw_section(section, now);
    }
    gap
}

/// Records activity from a mutating call. A paused attempt is resumed first.
pub fn mark_active(attempt: &mut Attempt, now: DateTime<Utc>) {
    if attempt.is_paused() {
        resume(attempt, now);
    } else {
        attempt.last_active_at = Some(now);
    }
}

/// Wall-clock seconds the section has been running, excluding pauses.
pub fn section_elapsed(section: &SectionRecord, now: DateTime<Utc>) -> i64 {
    match &section.timing {
        SectionTiming::NotStarted => 0,
        SectionTiming::InProgress {
            banked_seconds,
            running_since,
            ..
        } => banked_seconds + running_since.map_or(0, |since| seconds_between(since, now)),
        SectionTiming::Completed { .. } => section.time_spent_seconds,
    }
}

pub fn start_section(section: &mut SectionRecord, now: DateTime<Utc>) {
    section.timing = SectionTiming::InProgress {
        started_at: now,
        banked_seconds: 0,
        running_since: Some(now),
    };
}

/// Closes a running section. The measured wall-clock time replaces whatever
/// the client reported through increments. Returns that time.
pub fn complete_section(section: &mut SectionRecord, now: DateTime<Utc>) -> i64 {
    let elapsed = section_elapsed(section, now);
    if let SectionTiming::InProgress { started_at, .. } = section.timing {
        section.time_spent_seconds = elapsed;
        section.timing = SectionTiming::Completed {
            started_at,
            ended_at: now,
        };
    }
    elapsed
}

/// Stops a running section's clock, keeping what it has accumulated.
pub fn freeze_section(section: &mut SectionRecord, now: DateTime<Utc>) {
    let elapsed = section_elapsed(section, now);
    if let SectionTiming::InProgress {
        banked_seconds,
        running_since,
        ..
    } = &mut section.timing
    {
        *banked_seconds = elapsed;
        *running_since = None;
        section.time_spent_seconds = section.time_spent_seconds.max(elapsed);
    }
}

fn thaw_section(section: &mut SectionRecord, now: DateTime<Utc>) {
    if let SectionTiming::InProgress { running_since, .. } = &mut section.timing {
        if running_since.is_none() {
            *running_since = Some(now);
        }
    }
}

/// Attempt-level clock readings. Does not mutate; an open pause window is
/// counted as paused without being folded.
pub fn snapshot(attempt: &Attempt, duration_minutes: i32, now: DateTime<Utc>) -> TimingSnapshot {
    let end = attempt.ended_at.unwrap_or(now);
    let open_pause = match (attempt.status.is_terminal(), attempt.paused_at) {
        (false, Some(since)) => seconds_between(since, now),
        _ => 0,
    };
    let paused = attempt.total_paused_seconds + open_pause;
    let elapsed = (seconds_between(attempt.started_at, end) - paused).max(0);
    let remaining = (i64::from(duration_minutes) * 60 - elapsed).max(0);

    TimingSnapshot {
        elapsed_seconds: elapsed,
        remaining_seconds: remaining,
        total_paused_seconds: paused,
        is_paused: attempt.is_paused() && !attempt.status.is_terminal(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::models::attempt::AttemptStatus;
    use chrono::Duration;

    fn attempt_at(now: DateTime<Utc>) -> Attempt {
        let mut first = SectionRecord::not_started(1);
        start_section(&mut first, now);
        Attempt {
            id: 1,
            user_id: 1,
            category_id: 1,
            test_id: 1,
            status: AttemptStatus::InProgress,
            started_at: now,
            ended_at: None,
            last_active_at: Some(now),
            paused_at: None,
            total_paused_seconds: 0,
            current_section_id: Some(1),
            sections: vec![first, SectionRecord::not_started(2)],
            answers: vec![],
            result: None,
            version: 1,
        }
    }

    #[test]
    fn short_gaps_are_not_paused_time() {
        let clock = ManualClock::default();
        let mut attempt = attempt_at(clock.now());

        clock.advance_secs(2);
        assert_eq!(reconcile_activity(&mut attempt, clock.now(), 5), 0);
        assert_eq!(attempt.total_paused_seconds, 0);
        assert_eq!(attempt.last_active_at, Some(clock.now()));
    }

    #[test]
    fn long_gaps_are_folded() {
        let clock = ManualClock::default();
        let mut attempt = attempt_at(clock.now());

        clock.advance_secs(30);
        assert_eq!(reconcile_activity(&mut attempt, clock.now(), 5), 30);
        assert_eq!(attempt.total_paused_seconds, 30);
    }

    #[test]
    fn pause_freezes_section_clock() {
        let clock = ManualClock::default();
        let mut attempt = attempt_at(clock.now());

        clock.advance_secs(3);
        assert!(pause(&mut attempt, clock.now()));
        assert!(!pause(&mut attempt, clock.now()));

        clock.advance_secs(100);
        let section = &attempt.sections[0];
        assert_eq!(section_elapsed(section, clock.now()), 3);
        assert_eq!(section.time_spent_seconds, 3);

        assert_eq!(resume(&mut attempt, clock.now()), 100);
        // The 3s before the pause are paused time as well.
        assert_eq!(attempt.total_paused_seconds, 103);

        clock.advance_secs(4);
        assert_eq!(section_elapsed(&attempt.sections[0], clock.now()), 7);
    }

    #[test]
    fn completing_section_uses_wall_clock() {
        let clock = ManualClock::default();
        let mut attempt = attempt_at(clock.now());
        attempt.sections[0].time_spent_seconds = 999;

        clock.advance(Duration::seconds(42));
        let spent = complete_section(&mut attempt.sections[0], clock.now());

        assert_eq!(spent, 42);
        assert_eq!(attempt.sections[0].time_spent_seconds, 42);
        assert!(matches!(attempt.sections[0].timing, SectionTiming::Completed { .. }));
    }

    #[test]
    fn snapshot_excludes_paused_time() {
        let clock = ManualClock::default();
        let mut attempt = attempt_at(clock.now());

        clock.advance_secs(60);
        pause(&mut attempt, clock.now());
        clock.advance_secs(40);

        let snap = snapshot(&attempt, 10, clock.now());
        // The 60s before the pause had no activity, so it was folded too.
        assert_eq!(snap.total_paused_seconds, 100);
        assert_eq!(snap.elapsed_seconds, 0);
        assert_eq!(snap.remaining_seconds, 600);
        assert!(snap.is_paused);
    }

    #[test]
    fn short_gap_before_pause_is_still_folded() {
        let clock = ManualClock::default();
        let mut attempt = attempt_at(clock.now());

        clock.advance_secs(3);
        pause(&mut attempt, clock.now());
        assert_eq!(attempt.total_paused_seconds, 3);
    }

    #[test]
    fn resume_without_pause_folds_whole_gap() {
        let clock = ManualClock::default();
        let mut attempt = attempt_at(clock.now());

        clock.advance_secs(4);
        assert_eq!(resume(&mut attempt, clock.now()), 4);
        assert_eq!(attempt.total_paused_seconds, 4);
        assert_eq!(attempt.last_active_at, Some(clock.now()));
    }

    #[test]
    fn mark_active_resumes_paused_attempt() {
        let clock = ManualClock::default();
        let mut attempt = attempt_at(clock.now());
        pause(&mut attempt, clock.now());

        clock.advance_secs(10);
        mark_active(&mut attempt, clock.now());

        assert!(!attempt.is_paused());
        assert_eq!(attempt.total_paused_seconds, 10);
    }
}
