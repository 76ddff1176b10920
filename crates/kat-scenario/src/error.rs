//! Error types for scenario loading and validation

use std::path::PathBuf;

/// Scenario loading or validation error
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    /// Scenario file or directory could not be read
    #[error("reading scenario {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Scenario document is not well-formed
    #[error("parsing scenario {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// Scenario parsed but violates a model invariant
    #[error("scenario {name}: {reason}")]
    Invalid { name: String, reason: String },
}

impl LoadError {
    /// Create an invalid-scenario error
    #[inline]
    pub fn invalid(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

/// Failure to derive a resource reference from a raw document
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DocumentError {
    /// Document is not a mapping
    #[error("resource document is not a mapping")]
    NotAMapping,

    /// Required identifying field missing or not a string
    #[error("resource document is missing {0}")]
    MissingField(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_display_names_scenario() {
        let err = LoadError::invalid("s1", "at least one agent is required");
        assert_eq!(err.to_string(), "scenario s1: at least one agent is required");
    }

    #[test]
    fn missing_field_display() {
        assert_eq!(
            DocumentError::MissingField("metadata.name").to_string(),
            "resource document is missing metadata.name"
        );
    }
}
