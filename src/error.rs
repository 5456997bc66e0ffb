use std::fmt;

use thiserror::Error;

use crate::alarm::model::AlarmId;

/// A single settings field that failed its domain constraint.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("validation failed: {}", join_field_errors(.0))]
    Validation(Vec<FieldError>),

    #[error("{op} failed: {detail}")]
    Transport { op: &'static str, detail: String },

    #[error("alarm {id} no longer exists on the backend")]
    NotFound { id: AlarmId },

    #[error("{op} returned an unreadable response: {detail}")]
    Decode { op: &'static str, detail: String },
}

impl ControlError {
    pub fn transport(op: &'static str, detail: impl Into<String>) -> Self {
        ControlError::Transport {
            op,
            detail: detail.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ControlError::NotFound { .. })
    }

    pub fn field_errors(&self) -> &[FieldError] {
        match self {
            ControlError::Validation(errors) => errors,
            _ => &[],
        }
    }
}

fn join_field_errors(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_message_lists_every_field() {
        let err = ControlError::Validation(vec![
            FieldError {
                field: "sampling_rate",
                message: "must be between 0.01 and 10".to_string(),
            },
            FieldError {
                field: "w_size",
                message: "must be greater than 0".to_string(),
            },
        ]);
        let text = err.to_string();
        assert!(text.contains("sampling_rate: must be between 0.01 and 10"));
        assert!(text.contains("w_size: must be greater than 0"));
        assert_eq!(err.field_errors().len(), 2);
    }

    #[test]
    fn not_found_is_distinguishable_from_transport() {
        let missing = ControlError::NotFound {
            id: AlarmId::from("7"),
        };
        let offline = ControlError::transport("list alarms", "connection refused");
        assert!(missing.is_not_found());
        assert!(!offline.is_not_found());
        assert!(offline.field_errors().is_empty());
        assert_eq!(offline.to_string(), "list alarms failed: connection refused");
    }
}
