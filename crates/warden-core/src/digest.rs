//! Parameter digests used to detect configuration drift.

use crate::cib::AttrMap;
use sha2::{Digest, Sha256};

/// Digest over every effective parameter.
///
/// Parameters are hashed in key order so the result does not depend on how
/// the map was built.
pub fn calculate_digest(params: &AttrMap) -> String {
    let mut hasher = Sha256::new();
    for (key, value) in params {
        hasher.update(key.as_bytes());
        hasher.update(b"=");
        hasher.update(value.as_bytes());
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize())
}

/// Digest of raw document content, used to notice input changes
pub fn content_digest(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Keep only the parameters whose change requires a restart
pub fn restart_params<S: AsRef<str>>(params: &AttrMap, restart_list: &[S]) -> AttrMap {
    params
        .iter()
        .filter(|(key, _)| restart_list.iter().any(|r| r.as_ref() == key.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Digest over the restart subset of `params`
pub fn calculate_restart_digest<S: AsRef<str>>(params: &AttrMap, restart_list: &[S]) -> String {
    calculate_digest(&restart_params(params, restart_list))
}
