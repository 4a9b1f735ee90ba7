use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, Time};
use k8s_openapi::jiff::Timestamp;

/// The backend execution resource exists, created or adopted.
pub const EXECUTION_CREATED: &str = "ExecutionCreated";

/// The backend reports a running/active state.
pub const EXECUTION_RUNNING: &str = "ExecutionRunning";

/// The backend reached terminal success (False on terminal failure).
pub const EXECUTION_COMPLETE: &str = "ExecutionComplete";

/// The most recent audit flush reached the collector.
pub const AUDIT_RECORDED: &str = "AuditRecorded";

/// Adds or updates a condition. `lastTransitionTime` only moves when
/// the boolean status actually changes, per the usual condition
/// semantics.
pub fn set_condition(
    conditions: &mut Vec<Condition>,
    type_: &str,
    status: bool,
    reason: &str,
    message: &str,
    observed_generation: Option<i64>,
) {
    let status_str = if status { "True" } else { "False" };
    match conditions.iter_mut().find(|c| c.type_ == type_) {
        Some(existing) => {
            if existing.status != status_str {
                existing.last_transition_time = Time::from(Timestamp::now());
            }
            existing.status = status_str.to_owned();
            existing.reason = reason.to_owned();
            existing.message = message.to_owned();
            existing.observed_generation = observed_generation;
        }
        None => conditions.push(Condition {
            last_transition_time: Time::from(Timestamp::now()),
            message: message.to_owned(),
            observed_generation,
            reason: reason.to_owned(),
            status: status_str.to_owned(),
            type_: type_.to_owned(),
        }),
    }
}

pub fn is_true(conditions: &[Condition], type_: &str) -> bool {
    conditions
        .iter()
        .any(|c| c.type_ == type_ && c.status == "True")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upsert_adds_then_updates() {
        let mut conditions = Vec::new();
        set_condition(
            &mut conditions,
            EXECUTION_CREATED,
            true,
            "Created",
            "backend created",
            Some(1),
        );
        assert_eq!(conditions.len(), 1);
        assert!(is_true(&conditions, EXECUTION_CREATED));

        set_condition(
            &mut conditions,
            EXECUTION_CREATED,
            true,
            "Adopted",
            "backend adopted",
            Some(2),
        );
        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].reason, "Adopted");
        assert_eq!(conditions[0].observed_generation, Some(2));
    }

    #[test]
    fn transition_time_moves_only_on_status_flips() {
        let mut conditions = Vec::new();
        set_condition(&mut conditions, AUDIT_RECORDED, true, "Flushed", "", None);
        let first = conditions[0].last_transition_time.clone();

        set_condition(&mut conditions, AUDIT_RECORDED, true, "Flushed", "", None);
        assert_eq!(conditions[0].last_transition_time, first);

        set_condition(
            &mut conditions,
            AUDIT_RECORDED,
            false,
            "FlushFailed",
            "collector unavailable",
            None,
        );
        assert!(!is_true(&conditions, AUDIT_RECORDED));
        assert!(conditions[0].last_transition_time.0 >= first.0);
    }

    #[test]
    fn conditions_are_additive() {
        let mut conditions = Vec::new();
        set_condition(&mut conditions, EXECUTION_CREATED, true, "Created", "", None);
        set_condition(&mut conditions, EXECUTION_RUNNING, false, "Completed", "", None);
        set_condition(&mut conditions, EXECUTION_COMPLETE, true, "Succeeded", "", None);
        set_condition(&mut conditions, AUDIT_RECORDED, true, "Flushed", "", None);
        assert_eq!(conditions.len(), 4);
    }
}
