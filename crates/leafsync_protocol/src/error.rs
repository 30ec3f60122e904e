//! Error types for protocol decoding.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors that can occur while decoding remote payloads.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Payload is not valid JSON or does not match the expected shape.
    #[error("malformed payload: {0}")]
    Json(#[from] serde_json::Error),

    /// A diff fragment must carry exactly one of the `u`, `i`, `d` tags.
    #[error("diff fragment carries {tags} kind tags, expected exactly one")]
    AmbiguousFragment {
        /// Number of kind tags found on the fragment.
        tags: usize,
    },

    /// A field required by the entry's shape is missing.
    #[error("missing field `{field}` in {context}")]
    MissingField {
        /// Name of the missing field.
        field: &'static str,
        /// What was being decoded.
        context: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = ProtocolError::AmbiguousFragment { tags: 2 };
        assert_eq!(
            err.to_string(),
            "diff fragment carries 2 kind tags, expected exactly one"
        );

        let err = ProtocolError::MissingField {
            field: "newPathname",
            context: "renamed entry `a.tex`".into(),
        };
        assert!(err.to_string().contains("newPathname"));
        assert!(err.to_string().contains("a.tex"));
    }
}
