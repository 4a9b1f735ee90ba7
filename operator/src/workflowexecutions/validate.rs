use kubernaut_types::*;

/// Structural and semantic validation of a WorkflowExecution spec.
/// Failures are terminal configuration errors; the message is surfaced
/// verbatim in `status.failureDetails`.
pub fn validate(wfe: &WorkflowExecution) -> Result<(), String> {
    let spec = &wfe.spec;

    if spec.parent_ref.name.is_empty() {
        return Err("spec.parentRef.name must be set".to_owned());
    }

    if spec.target_resource.is_empty() {
        return Err("spec.targetResource must be set".to_owned());
    }
    spec.target_resource.parse::<TargetResource>()?;

    let image = &spec.workflow_ref.container_image;
    if image.is_empty() {
        return Err("spec.workflowRef.containerImage must be set".to_owned());
    }
    let digest_pinned = image.contains("@sha256:")
        || spec
            .workflow_ref
            .container_digest
            .as_deref()
            .is_some_and(|d| !d.is_empty());
    if !digest_pinned {
        return Err(format!(
            "containerImage '{}' must be pinned to an immutable digest",
            image
        ));
    }

    for key in spec.parameters.keys() {
        if !is_valid_parameter_key(key) {
            return Err(format!(
                "parameter key '{}' must match [A-Z][A-Z0-9_]*",
                key
            ));
        }
    }

    Ok(())
}

fn is_valid_parameter_key(key: &str) -> bool {
    let mut chars = key.chars();
    matches!(chars.next(), Some('A'..='Z'))
        && chars.all(|c| matches!(c, 'A'..='Z' | '0'..='9' | '_'))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_wfe() -> WorkflowExecution {
        WorkflowExecution::new(
            "run-app-restart",
            WorkflowExecutionSpec {
                parent_ref: ParentRef {
                    name: "remediation-abc".into(),
                    namespace: "kubernaut-system".into(),
                },
                workflow_ref: WorkflowRef {
                    workflow_id: "restart-deployment".into(),
                    version: "1.2.0".into(),
                    container_image: "ghcr.io/kubernaut/restart@sha256:abc".into(),
                    container_digest: None,
                },
                target_resource: "ns-a/deployment/app".into(),
                parameters: [("REMEDIATION_TYPE".to_string(), "restart".to_string())].into(),
                ..Default::default()
            },
        )
    }

    #[test]
    fn accepts_a_well_formed_spec() {
        assert_eq!(validate(&valid_wfe()), Ok(()));
    }

    #[test]
    fn rejects_empty_container_image() {
        let mut wfe = valid_wfe();
        wfe.spec.workflow_ref.container_image = String::new();
        assert!(validate(&wfe).unwrap_err().contains("containerImage"));
    }

    #[test]
    fn rejects_floating_tags() {
        let mut wfe = valid_wfe();
        wfe.spec.workflow_ref.container_image = "ghcr.io/kubernaut/restart:latest".into();
        assert!(validate(&wfe).unwrap_err().contains("immutable digest"));
    }

    #[test]
    fn digest_field_counts_as_pinned() {
        let mut wfe = valid_wfe();
        wfe.spec.workflow_ref.container_image = "ghcr.io/kubernaut/restart:1.2.0".into();
        wfe.spec.workflow_ref.container_digest = Some("sha256:abc".into());
        assert_eq!(validate(&wfe), Ok(()));

        wfe.spec.workflow_ref.container_digest = Some(String::new());
        assert!(validate(&wfe).is_err());
    }

    #[test]
    fn rejects_malformed_target() {
        let mut wfe = valid_wfe();
        wfe.spec.target_resource = "just-a-name".into();
        assert!(validate(&wfe).is_err());

        wfe.spec.target_resource = String::new();
        assert!(validate(&wfe).unwrap_err().contains("targetResource"));
    }

    #[test]
    fn rejects_bad_parameter_keys() {
        for bad in ["lower_case", "1STARTS_WITH_DIGIT", "HAS-DASH", "HAS SPACE", ""] {
            let mut wfe = valid_wfe();
            wfe.spec
                .parameters
                .insert(bad.to_string(), "value".to_string());
            assert!(validate(&wfe).is_err(), "key '{bad}' should be rejected");
        }
    }

    #[test]
    fn accepts_upper_snake_parameter_keys() {
        let mut wfe = valid_wfe();
        for good in ["TIMEOUT", "A", "RETRY_LIMIT_2"] {
            wfe.spec
                .parameters
                .insert(good.to_string(), "value".to_string());
        }
        assert_eq!(validate(&wfe), Ok(()));
    }

    #[test]
    fn rejects_missing_parent_ref() {
        let mut wfe = valid_wfe();
        wfe.spec.parent_ref.name = String::new();
        assert!(validate(&wfe).unwrap_err().contains("parentRef"));
    }
}
