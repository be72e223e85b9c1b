//! Warden Core - Shared types for the Warden cluster policy engine
//!
//! This crate provides:
//! - Saturating score arithmetic
//! - Roles, task names and operation keys
//! - The declarative cluster document (configuration plus runtime state)
//! - Parameter digests for drift detection
//! - Error types with miette diagnostics
//! - Serialization helpers

pub mod cib;
pub mod digest;
pub mod error;
pub mod score;
pub mod types;

// Re-export commonly used types
pub use cib::{AttrMap, ClusterDocument, ClusterOptions, OpHistory, ResourceConfig, ScoreValue};
pub use error::{Result, WardenError};
pub use score::{merge_weights, parse_score, score_to_string, INFINITY};
pub use types::{op_key, notify_key, parse_interval_ms, task, Role};

/// Serialize a value to JSON
pub fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| {
        WardenError::serialization_error(
            format!("Failed to serialize to JSON: {}", e),
            Some(Box::new(e)),
        )
    })
}

/// Serialize a value to pretty JSON
pub fn to_json_pretty<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value).map_err(|e| {
        WardenError::serialization_error(
            format!("Failed to serialize to JSON: {}", e),
            Some(Box::new(e)),
        )
    })
}

/// Deserialize a value from JSON
pub fn from_json<T: for<'de> serde::Deserialize<'de>>(data: &str) -> Result<T> {
    serde_json::from_str(data).map_err(|e| {
        WardenError::serialization_error(
            format!("Failed to deserialize from JSON: {}", e),
            Some(Box::new(e)),
        )
    })
}

/// Serialize a value to YAML
pub fn to_yaml<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_yaml::to_string(value).map_err(|e| {
        WardenError::serialization_error(
            format!("Failed to serialize to YAML: {}", e),
            Some(Box::new(e)),
        )
    })
}

/// Deserialize a value from YAML
pub fn from_yaml<T: for<'de> serde::Deserialize<'de>>(data: &str) -> Result<T> {
    serde_yaml::from_str(data).map_err(|e| {
        WardenError::serialization_error(
            format!("Failed to deserialize from YAML: {}", e),
            Some(Box::new(e)),
        )
    })
}

/// Parse a cluster document, picking the format from a file name.
///
/// `.yaml`/`.yml` files are read as YAML, everything else as JSON.
pub fn parse_document(file_name: &str, data: &str) -> Result<ClusterDocument> {
    let lower = file_name.to_ascii_lowercase();
    if lower.ends_with(".yaml") || lower.ends_with(".yml") {
        from_yaml(data)
    } else {
        from_json(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_serialization() {
        let mut doc = ClusterDocument::default();
        doc.dc_uuid = Some("node1".to_string());

        let json = to_json(&doc).unwrap();
        assert!(json.contains("node1"));

        let deserialized: ClusterDocument = from_json(&json).unwrap();
        assert_eq!(deserialized, doc);
    }

    #[test]
    fn test_yaml_serialization() {
        let mut doc = ClusterDocument::default();
        doc.options.stonith_enabled = false;

        let yaml = to_yaml(&doc).unwrap();
        assert!(yaml.contains("stonith-enabled: false"));

        let deserialized: ClusterDocument = from_yaml(&yaml).unwrap();
        assert!(!deserialized.options.stonith_enabled);
    }

    #[test]
    fn test_parse_document_by_extension() {
        let yaml = "have-quorum: false\n";
        assert!(!parse_document("cluster.YML", yaml).unwrap().have_quorum);
        assert!(parse_document("cluster.json", yaml).is_err());
        assert!(parse_document("cluster.json", "{}").unwrap().have_quorum);
    }
}
