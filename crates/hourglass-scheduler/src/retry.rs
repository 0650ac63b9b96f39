use chrono::{DateTime, Duration, Utc};

use crate::types::Task;

/// What the retry policy did with a failed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// `next_run` was pulled in to `at`; this is attempt `attempt` of `max`.
    Scheduled {
        attempt: u32,
        max: u32,
        at: DateTime<Utc>,
    },
    /// No attempts left. `current_retry` is back to 0 and `next_run` keeps
    /// the task's normal schedule.
    Exhausted { max: u32 },
}

/// Apply the retry policy to `task` after a failed run that finished at `now`.
pub fn on_failure(task: &mut Task, now: DateTime<Utc>) -> RetryDecision {
    if task.current_retry < task.max_retries {
        task.current_retry += 1;
        task.next_run = i64::try_from(task.retry_delay)
            .ok()
            .and_then(Duration::try_seconds)
            .and_then(|delay| now.checked_add_signed(delay))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        RetryDecision::Scheduled {
            attempt: task.current_retry,
            max: task.max_retries,
            at: task.next_run,
        }
    } else {
        task.current_retry = 0;
        RetryDecision::Exhausted {
            max: task.max_retries,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{StoredTask, TaskDefaults};
    use chrono::TimeZone;

    fn task(max_retries: u32, retry_delay: u64) -> Task {
        let stored: StoredTask = serde_json::from_value(serde_json::json!({
            "name": "sync",
            "path": "/opt/jobs/sync.sh",
            "start_time": "2025-01-01T00:00:00Z",
            "end_time": "2026-01-01T00:00:00Z",
            "frequency": "daily",
            "max_retries": max_retries,
            "retry_delay": retry_delay,
        }))
        .unwrap();
        stored.materialize(&TaskDefaults::default())
    }

    #[test]
    fn schedules_until_exhausted() {
        let now = Utc.with_ymd_and_hms(2025, 2, 1, 10, 0, 0).unwrap();
        let mut t = task(2, 60);
        let natural = now + Duration::days(1);
        t.next_run = natural;

        assert_eq!(
            on_failure(&mut t, now),
            RetryDecision::Scheduled {
                attempt: 1,
                max: 2,
                at: now + Duration::seconds(60)
            }
        );
        assert!(matches!(
            on_failure(&mut t, now),
            RetryDecision::Scheduled { attempt: 2, .. }
        ));
        assert_eq!(t.current_retry, 2);

        t.next_run = natural;
        assert_eq!(on_failure(&mut t, now), RetryDecision::Exhausted { max: 2 });
        assert_eq!(t.current_retry, 0);
        // exhausted retries leave the normal schedule alone
        assert_eq!(t.next_run, natural);
    }

    #[test]
    fn zero_retries_is_immediately_exhausted() {
        let now = Utc.with_ymd_and_hms(2025, 2, 1, 10, 0, 0).unwrap();
        let mut t = task(0, 60);
        assert_eq!(on_failure(&mut t, now), RetryDecision::Exhausted { max: 0 });
        assert_eq!(t.current_retry, 0);
    }
}
