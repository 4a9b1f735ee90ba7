use crate::util::Error;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::{Api, Client};
use kubernaut_common::args::CatalogArgs;
use serde::Deserialize;
use std::time::Duration;

pub const SECRET_MOUNT_ROOT: &str = "/run/kubernaut/secrets";
pub const CONFIG_MAP_MOUNT_ROOT: &str = "/run/kubernaut/configmaps";

/// Dependencies declared by the workflow catalog for a given
/// `workflowId@version`. An empty response is legal and means the
/// workflow mounts nothing.
#[derive(Deserialize, Clone, Debug, Default, PartialEq)]
pub struct DependencyList {
    #[serde(default)]
    pub secrets: Vec<DependencyRef>,

    #[serde(default, rename = "configMaps")]
    pub config_maps: Vec<DependencyRef>,
}

impl DependencyList {
    pub fn is_empty(&self) -> bool {
        self.secrets.is_empty() && self.config_maps.is_empty()
    }
}

#[derive(Deserialize, Clone, Debug, Default, PartialEq)]
pub struct DependencyRef {
    pub name: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DependencyKind {
    Secret,
    ConfigMap,
}

/// A declared dependency that has been confirmed to exist (non-empty)
/// in the execution namespace, together with where the workflow
/// container will see it.
#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedDependency {
    pub kind: DependencyKind,

    pub name: String,

    pub mount_path: String,
}

impl ResolvedDependency {
    pub fn secret(name: &str) -> Self {
        ResolvedDependency {
            kind: DependencyKind::Secret,
            name: name.to_owned(),
            mount_path: format!("{}/{}", SECRET_MOUNT_ROOT, name),
        }
    }

    pub fn config_map(name: &str) -> Self {
        ResolvedDependency {
            kind: DependencyKind::ConfigMap,
            name: name.to_owned(),
            mount_path: format!("{}/{}", CONFIG_MAP_MOUNT_ROOT, name),
        }
    }

    /// Volume name unique within the backend pod spec.
    pub fn volume_name(&self) -> String {
        match self.kind {
            DependencyKind::Secret => format!("secret-{}", self.name),
            DependencyKind::ConfigMap => format!("configmap-{}", self.name),
        }
    }
}

/// Outcome of resolving declared dependencies against the execution
/// namespace. A missing or empty object is a configuration error and
/// terminal for the resource; transport errors surface as [`Error`]
/// and are retried.
#[derive(Clone, Debug, PartialEq)]
pub enum Resolution {
    Resolved(Vec<ResolvedDependency>),

    Missing(String),
}

/// Thin client for the workflow catalog endpoint.
#[derive(Clone)]
pub struct CatalogClient {
    http: reqwest::Client,
    base_url: String,
}

impl CatalogClient {
    pub fn new(args: &CatalogArgs) -> Result<Self, Error> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(args.catalog_timeout_secs))
            .build()
            .map_err(|source| Error::Catalog { source })?;
        Ok(CatalogClient {
            http,
            base_url: args.catalog_url.trim_end_matches('/').to_owned(),
        })
    }

    /// Fetches the declared dependencies for `workflow_id@version`.
    /// A 404 means the catalog knows nothing extra about the workflow,
    /// which is treated the same as an empty declaration.
    pub async fn dependencies(
        &self,
        workflow_id: &str,
        version: &str,
    ) -> Result<DependencyList, Error> {
        let url = format!(
            "{}/workflows/{}/{}/dependencies",
            self.base_url, workflow_id, version
        );
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|source| Error::Catalog { source })?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(DependencyList::default());
        }
        let response = response
            .error_for_status()
            .map_err(|source| Error::Catalog { source })?;
        response
            .json()
            .await
            .map_err(|source| Error::Catalog { source })
    }
}

/// Verifies each declared secret/configMap exists with non-empty data
/// in the execution namespace and builds the mount descriptors.
pub async fn resolve(
    client: Client,
    namespace: &str,
    deps: &DependencyList,
) -> Result<Resolution, Error> {
    let mut resolved = Vec::with_capacity(deps.secrets.len() + deps.config_maps.len());

    let secrets: Api<Secret> = Api::namespaced(client.clone(), namespace);
    for dep in &deps.secrets {
        match secrets.get(&dep.name).await {
            Ok(secret) => {
                if secret.data.as_ref().is_none_or(|d| d.is_empty())
                    && secret.string_data.as_ref().is_none_or(|d| d.is_empty())
                {
                    return Ok(Resolution::Missing(format!(
                        "secret '{}' in namespace '{}' has no data",
                        dep.name, namespace
                    )));
                }
                resolved.push(ResolvedDependency::secret(&dep.name));
            }
            Err(kube::Error::Api(ae)) if ae.code == 404 => {
                return Ok(Resolution::Missing(format!(
                    "secret '{}' not found in namespace '{}'",
                    dep.name, namespace
                )));
            }
            Err(e) => return Err(e.into()),
        }
    }

    let config_maps: Api<ConfigMap> = Api::namespaced(client, namespace);
    for dep in &deps.config_maps {
        match config_maps.get(&dep.name).await {
            Ok(cm) => {
                if cm.data.as_ref().is_none_or(|d| d.is_empty())
                    && cm.binary_data.as_ref().is_none_or(|d| d.is_empty())
                {
                    return Ok(Resolution::Missing(format!(
                        "configMap '{}' in namespace '{}' has no data",
                        dep.name, namespace
                    )));
                }
                resolved.push(ResolvedDependency::config_map(&dep.name));
            }
            Err(kube::Error::Api(ae)) if ae.code == 404 => {
                return Ok(Resolution::Missing(format!(
                    "configMap '{}' not found in namespace '{}'",
                    dep.name, namespace
                )));
            }
            Err(e) => return Err(e.into()),
        }
    }

    Ok(Resolution::Resolved(resolved))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dependency_list_tolerates_missing_fields() {
        let parsed: DependencyList = serde_json::from_str("{}").unwrap();
        assert!(parsed.is_empty());

        let parsed: DependencyList = serde_json::from_str(
            r#"{"secrets":[{"name":"creds"}],"configMaps":[{"name":"settings"}]}"#,
        )
        .unwrap();
        assert_eq!(parsed.secrets[0].name, "creds");
        assert_eq!(parsed.config_maps[0].name, "settings");
        assert!(!parsed.is_empty());
    }

    #[test]
    fn mount_paths_follow_convention() {
        let secret = ResolvedDependency::secret("creds");
        assert_eq!(secret.mount_path, "/run/kubernaut/secrets/creds");
        assert_eq!(secret.volume_name(), "secret-creds");

        let cm = ResolvedDependency::config_map("settings");
        assert_eq!(cm.mount_path, "/run/kubernaut/configmaps/settings");
        assert_eq!(cm.volume_name(), "configmap-settings");
    }
}
