use k8s_openapi::jiff::{SignedDuration, Timestamp};
use kubernaut_types::*;
use std::time::Duration;

/// Returns how long a new execution against `target_resource` must
/// still wait, based on the most recent terminal execution for the
/// same target. Derived from observed completion times rather than an
/// in-memory timer, so it survives controller restarts.
pub fn cooldown_remaining(
    candidates: &[WorkflowExecution],
    target_resource: &str,
    own_uid: Option<&str>,
    cooldown: Duration,
    now: Timestamp,
) -> Option<Duration> {
    let cool = SignedDuration::try_from(cooldown).ok()?;
    let latest = candidates
        .iter()
        .filter(|w| w.spec.target_resource == target_resource)
        .filter(|w| own_uid.is_none() || w.metadata.uid.as_deref() != own_uid)
        .filter_map(|w| {
            let status = w.status.as_ref()?;
            if !status.phase.is_terminal() {
                return None;
            }
            status.completion_time.as_ref().map(|t| t.0)
        })
        .max()?;
    let until = latest.checked_add(cool).ok()?;
    if until > now {
        until.duration_since(now).try_into().ok()
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;

    const TARGET: &str = "ns-a/deployment/app";
    const COOLDOWN: Duration = Duration::from_secs(300);

    fn terminal_wfe(
        name: &str,
        target: &str,
        phase: WorkflowExecutionPhase,
        completed: Timestamp,
    ) -> WorkflowExecution {
        let mut wfe = WorkflowExecution::new(
            name,
            WorkflowExecutionSpec {
                target_resource: target.into(),
                ..Default::default()
            },
        );
        wfe.metadata.uid = Some(format!("uid-{}", name));
        wfe.status = Some(WorkflowExecutionStatus {
            phase,
            completion_time: Some(Time::from(completed)),
            ..Default::default()
        });
        wfe
    }

    #[test]
    fn recent_completion_blocks_the_target() {
        let now = Timestamp::now();
        let a_minute_ago = now.checked_sub(Duration::from_secs(60)).unwrap();
        let candidates = vec![terminal_wfe(
            "w1",
            TARGET,
            WorkflowExecutionPhase::Completed,
            a_minute_ago,
        )];
        let remaining = cooldown_remaining(&candidates, TARGET, None, COOLDOWN, now).unwrap();
        // Completed 60s into a 300s window: roughly 240s left.
        assert!(remaining <= Duration::from_secs(240));
        assert!(remaining > Duration::from_secs(230));
    }

    #[test]
    fn expired_window_does_not_block() {
        let now = Timestamp::now();
        let long_ago = now.checked_sub(Duration::from_secs(600)).unwrap();
        let candidates = vec![terminal_wfe(
            "w1",
            TARGET,
            WorkflowExecutionPhase::Failed,
            long_ago,
        )];
        assert_eq!(
            cooldown_remaining(&candidates, TARGET, None, COOLDOWN, now),
            None
        );
    }

    #[test]
    fn unrelated_targets_proceed_independently() {
        let now = Timestamp::now();
        let just_now = now.checked_sub(Duration::from_secs(5)).unwrap();
        let candidates = vec![terminal_wfe(
            "w1",
            "ns-b/deployment/other",
            WorkflowExecutionPhase::Completed,
            just_now,
        )];
        assert_eq!(
            cooldown_remaining(&candidates, TARGET, None, COOLDOWN, now),
            None
        );
    }

    #[test]
    fn non_terminal_executions_are_ignored() {
        let now = Timestamp::now();
        let mut running = terminal_wfe("w1", TARGET, WorkflowExecutionPhase::Running, now);
        running.status.as_mut().unwrap().completion_time = None;
        assert_eq!(
            cooldown_remaining(&[running], TARGET, None, COOLDOWN, now),
            None
        );
    }

    #[test]
    fn own_record_is_excluded() {
        let now = Timestamp::now();
        let just_now = now.checked_sub(Duration::from_secs(5)).unwrap();
        let own = terminal_wfe("w1", TARGET, WorkflowExecutionPhase::Completed, just_now);
        assert_eq!(
            cooldown_remaining(&[own], TARGET, Some("uid-w1"), COOLDOWN, now),
            None
        );
    }

    #[test]
    fn latest_completion_wins() {
        let now = Timestamp::now();
        let older = now.checked_sub(Duration::from_secs(280)).unwrap();
        let newer = now.checked_sub(Duration::from_secs(30)).unwrap();
        let candidates = vec![
            terminal_wfe("w1", TARGET, WorkflowExecutionPhase::Completed, older),
            terminal_wfe("w2", TARGET, WorkflowExecutionPhase::Failed, newer),
        ];
        let remaining = cooldown_remaining(&candidates, TARGET, None, COOLDOWN, now).unwrap();
        assert!(remaining > Duration::from_secs(240));
    }
}
