pub mod finalizer;
pub mod patch;

pub(crate) mod colors;
pub(crate) mod messages;

#[cfg(feature = "metrics")]
pub mod metrics;

mod error;

pub use error::*;

/// Name of the kubernetes resource manager.
pub(crate) const MANAGER_NAME: &str = "kubernaut-operator";

pub fn hash_spec<T: serde::Serialize>(spec: &T) -> String {
    use sha2::{Digest, Sha256};
    let spec_bytes = serde_json::to_vec(spec).unwrap();
    let mut hasher = Sha256::new();
    hasher.update(&spec_bytes);
    let result = hasher.finalize();
    hex::encode(result)
}
