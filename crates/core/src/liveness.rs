#![forbid(unsafe_code)]

use crate::model::TaskState;
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};

/// Raw executor columns of a task, as read for staleness checks.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutorLiveness {
    pub task_id: String,
    pub state_status: TaskState,
    pub pid: u32,
    pub hostname: String,
    #[serde(with = "time::serde::rfc3339::option")]
    pub started_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_heartbeat: Option<OffsetDateTime>,
}

impl ExecutorLiveness {
    /// A running task whose heartbeat is older than `threshold` (strictly),
    /// or that never recorded one.
    pub fn is_stale(&self, now: OffsetDateTime, threshold: Duration) -> bool {
        if self.state_status != TaskState::Running {
            return false;
        }
        match self.last_heartbeat {
            Some(beat) => now - beat > threshold,
            None => true,
        }
    }

    /// Time since the last heartbeat, if any was recorded.
    pub fn heartbeat_age(&self, now: OffsetDateTime) -> Option<Duration> {
        self.last_heartbeat.map(|beat| now - beat)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn running(last_heartbeat: Option<OffsetDateTime>) -> ExecutorLiveness {
        ExecutorLiveness {
            task_id: "TASK-001".to_string(),
            state_status: TaskState::Running,
            pid: 4242,
            hostname: "worker-a".to_string(),
            started_at: last_heartbeat,
            last_heartbeat,
        }
    }

    #[test]
    fn staleness_boundary_is_strict() {
        let beat = datetime!(2026-03-01 12:00 UTC);
        let threshold = Duration::minutes(5);
        let live = running(Some(beat));
        assert!(!live.is_stale(beat + threshold - Duration::seconds(1), threshold));
        assert!(!live.is_stale(beat + threshold, threshold));
        assert!(live.is_stale(beat + threshold + Duration::seconds(1), threshold));
    }

    #[test]
    fn only_running_tasks_go_stale() {
        let beat = datetime!(2026-03-01 12:00 UTC);
        let mut paused = running(Some(beat));
        paused.state_status = TaskState::Paused;
        assert!(!paused.is_stale(beat + Duration::hours(1), Duration::minutes(5)));

        let never = running(None);
        assert!(never.is_stale(beat, Duration::minutes(5)));
    }
}
