use crate::executor::BackendState;
use crate::util::messages;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kubernaut_types::*;

/// Maps a backend failure reason onto the closed [`FailureReason`] set.
/// Total: anything unrecognized lands on `Unknown` (or `TaskFailed`
/// when the workflow container is known to have started).
pub fn classify(reason: &str, message: &str, started: bool) -> FailureReason {
    let text = format!("{} {}", reason, message);
    let lower = text.to_lowercase();
    if text.contains("OOMKilled") {
        FailureReason::OomKilled
    } else if text.contains("Timeout") || text.contains("DeadlineExceeded") {
        FailureReason::DeadlineExceeded
    } else if lower.contains("forbidden") {
        FailureReason::Forbidden
    } else if text.contains("ImagePull") {
        FailureReason::ImagePullBackOff
    } else if lower.contains("quota") || text.contains("CreateFailed") {
        FailureReason::ResourceExhausted
    } else if text.contains("ValidationFailed") || lower.contains("invalid") {
        FailureReason::ConfigurationError
    } else if started {
        FailureReason::TaskFailed
    } else {
        FailureReason::Unknown
    }
}

/// Builds the structured failure record for a backend that reported
/// terminal failure. Returns `None` for any other backend state.
pub fn from_backend(state: &BackendState) -> Option<FailureDetails> {
    let BackendState::Failed {
        reason,
        message,
        exit_code,
        started_at,
        completed_at,
        failed_task_name,
        failed_task_index,
    } = state
    else {
        return None;
    };
    let classified = classify(reason, message, started_at.is_some());
    let mut details = FailureDetails {
        reason: classified,
        message: if message.is_empty() {
            reason.clone()
        } else {
            message.clone()
        },
        summary: None,
        was_execution_failure: classified.was_execution_failure(),
        exit_code: *exit_code,
        failed_task_name: failed_task_name.clone(),
        failed_task_index: *failed_task_index,
    };
    details.summary = Some(summarize(
        &details,
        elapsed_secs(started_at.as_ref(), completed_at.as_ref()),
    ));
    Some(details)
}

/// Terminal configuration error raised before any backend exists.
pub fn configuration_error(message: impl Into<String>) -> FailureDetails {
    let mut details = FailureDetails {
        reason: FailureReason::ConfigurationError,
        message: message.into(),
        summary: None,
        was_execution_failure: false,
        exit_code: None,
        failed_task_name: None,
        failed_task_index: None,
    };
    details.summary = Some(summarize(&details, None));
    details
}

/// The losing side of a target-resource lock conflict. The winning
/// execution is unaffected.
pub fn lock_conflict(backend_name: &str) -> FailureDetails {
    let mut details = FailureDetails {
        reason: FailureReason::Unknown,
        message: format!("{} ('{}')", messages::LOCK_CONFLICT, backend_name),
        summary: None,
        was_execution_failure: false,
        exit_code: None,
        failed_task_name: None,
        failed_task_index: None,
    };
    details.summary = Some(summarize(&details, None));
    details
}

/// A backend the controller created vanished out from under it.
pub fn externally_deleted(backend_name: &str) -> FailureDetails {
    let mut details = FailureDetails {
        reason: FailureReason::Unknown,
        message: format!("{} ('{}')", messages::EXTERNALLY_DELETED, backend_name),
        summary: None,
        was_execution_failure: false,
        exit_code: None,
        failed_task_name: None,
        failed_task_index: None,
    };
    details.summary = Some(summarize(&details, None));
    details
}

/// One-sentence failure description for notification and LLM consumers.
pub fn summarize(details: &FailureDetails, elapsed_secs: Option<i64>) -> String {
    let mut summary = match &details.failed_task_name {
        Some(task) => format!(
            "Workflow task '{}' failed with reason {}",
            task, details.reason
        ),
        None => format!("Workflow failed with reason {}", details.reason),
    };
    if let Some(secs) = elapsed_secs {
        summary.push_str(&format!(" after {}s", secs));
    }
    if !details.message.is_empty() {
        summary.push_str(&format!(": {}", details.message));
    }
    summary
}

pub fn elapsed_secs(start: Option<&Time>, end: Option<&Time>) -> Option<i64> {
    let (start, end) = (start?, end?);
    Some(end.0.duration_since(start.0).as_secs())
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::jiff::Timestamp;

    #[test]
    fn known_reasons_classify_as_execution_failures() {
        assert_eq!(
            classify("OOMKilled", "", true),
            FailureReason::OomKilled
        );
        assert_eq!(
            classify("DeadlineExceeded", "Job was active longer than specified deadline", true),
            FailureReason::DeadlineExceeded
        );
        assert_eq!(
            classify("PipelineRunTimeout", "failed to finish within timeout", true),
            FailureReason::DeadlineExceeded
        );
        assert_eq!(
            classify("", "pods is forbidden: User cannot create resource", true),
            FailureReason::Forbidden
        );
    }

    #[test]
    fn known_reasons_classify_as_infrastructure_failures() {
        assert_eq!(
            classify("ImagePullBackOff", "", false),
            FailureReason::ImagePullBackOff
        );
        assert_eq!(
            classify("ErrImagePull", "", false),
            FailureReason::ImagePullBackOff
        );
        assert_eq!(
            classify("", "exceeded quota: compute-resources", false),
            FailureReason::ResourceExhausted
        );
        assert_eq!(
            classify("CreateFailed", "", false),
            FailureReason::ResourceExhausted
        );
        assert_eq!(
            classify("ValidationFailed", "", false),
            FailureReason::ConfigurationError
        );
    }

    #[test]
    fn started_fallback_is_task_failed() {
        assert_eq!(classify("Failed", "", true), FailureReason::TaskFailed);
        assert_eq!(
            classify("BackoffLimitExceeded", "", true),
            FailureReason::TaskFailed
        );
    }

    #[test]
    fn unstarted_fallback_is_unknown() {
        assert_eq!(classify("Failed", "", false), FailureReason::Unknown);
        assert_eq!(classify("", "", false), FailureReason::Unknown);
    }

    #[test]
    fn specific_patterns_win_over_the_started_fallback() {
        // Started executions still classify by pattern when one matches.
        assert_eq!(
            classify("BackoffLimitExceeded", "container OOMKilled", true),
            FailureReason::OomKilled
        );
    }

    #[test]
    fn classifier_flag_agrees_with_reason() {
        // Every path through the classifier must satisfy the flag
        // partition, including the fallbacks.
        for (reason, message, started) in [
            ("OOMKilled", "", true),
            ("DeadlineExceeded", "", true),
            ("", "forbidden", true),
            ("ImagePullBackOff", "", false),
            ("", "quota", false),
            ("ValidationFailed", "", false),
            ("anything", "", true),
            ("anything", "", false),
        ] {
            let classified = classify(reason, message, started);
            match classified {
                FailureReason::OomKilled
                | FailureReason::DeadlineExceeded
                | FailureReason::Forbidden
                | FailureReason::TaskFailed => assert!(classified.was_execution_failure()),
                _ => assert!(!classified.was_execution_failure()),
            }
        }
    }

    #[test]
    fn from_backend_builds_a_full_record() {
        let now = Timestamp::now();
        let earlier = now.checked_sub(std::time::Duration::from_secs(73)).unwrap();
        let state = BackendState::Failed {
            reason: "Failed".into(),
            message: "task run failed".into(),
            exit_code: Some(1),
            started_at: Some(Time::from(earlier)),
            completed_at: Some(Time::from(now)),
            failed_task_name: Some("workflow".into()),
            failed_task_index: Some(0),
        };
        let details = from_backend(&state).unwrap();
        assert_eq!(details.reason, FailureReason::TaskFailed);
        assert!(details.was_execution_failure);
        assert_eq!(details.exit_code, Some(1));
        let summary = details.summary.unwrap();
        assert!(summary.contains("workflow"), "summary was: {summary}");
        assert!(summary.contains("after 73s"), "summary was: {summary}");
    }

    #[test]
    fn from_backend_ignores_non_failure_states() {
        assert_eq!(from_backend(&BackendState::Pending), None);
        assert_eq!(
            from_backend(&BackendState::Running { started_at: None }),
            None
        );
    }

    #[test]
    fn constructors_flag_no_execution() {
        assert!(!configuration_error("bad spec").was_execution_failure);
        let conflict = lock_conflict("wfe-0011223344556677");
        assert_eq!(conflict.reason, FailureReason::Unknown);
        assert!(conflict.message.contains("already exists"));
        let deleted = externally_deleted("wfe-0011223344556677");
        assert!(deleted.message.contains("not found"));
    }
}
