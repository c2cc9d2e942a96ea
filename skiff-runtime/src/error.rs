//! Host error envelope

use serde::{Deserialize, Serialize};

use crate::handler::{HandlerError, LoadError};

/// Error envelope posted to the Runtime API error endpoints
///
/// Built fresh per failure, never reused.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorReport {
    pub error_type: String,
    pub error_message: String,
    pub stack_trace: Vec<String>,
}

impl ErrorReport {
    pub fn new(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error_type: error_type.into(),
            error_message: message.into(),
            stack_trace: Vec::new(),
        }
    }

    pub fn with_stack_trace(mut self, stack_trace: Vec<String>) -> Self {
        self.stack_trace = stack_trace;
        self
    }
}

impl From<&HandlerError> for ErrorReport {
    fn from(err: &HandlerError) -> Self {
        Self {
            error_type: err.error_type.clone(),
            error_message: err.message.clone(),
            stack_trace: err.stack_trace.clone(),
        }
    }
}

impl From<&LoadError> for ErrorReport {
    fn from(err: &LoadError) -> Self {
        Self::new("Runtime.HandlerNotFound", err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_serializes_camel_case() {
        let report = ErrorReport::new("Error", "boom")
            .with_stack_trace(vec!["at handler".to_string(), "at loop".to_string()]);

        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains(r#""errorType":"Error""#));
        assert!(json.contains(r#""errorMessage":"boom""#));
        assert!(json.contains(r#""stackTrace":["at handler","at loop"]"#));
    }

    #[test]
    fn test_report_from_handler_error() {
        let err = HandlerError::new("boom").with_stack_trace(vec!["frame 0".to_string()]);

        let report = ErrorReport::from(&err);
        assert_eq!(report.error_type, "Error");
        let typed = HandlerError::new("nope").with_type("TypeError");
        assert_eq!(ErrorReport::from(&typed).error_type, "TypeError");
        assert_eq!(report.error_message, "boom");
        assert_eq!(report.stack_trace, vec!["frame 0".to_string()]);
    }

    #[test]
    fn test_report_from_load_error() {
        let err = LoadError::HandlerNotFound {
            export: "handler".to_string(),
        };

        let report = ErrorReport::from(&err);
        assert_eq!(report.error_type, "Runtime.HandlerNotFound");
        assert!(report.stack_trace.is_empty());
    }
}
