//! Command outcome reporting shared by the CLI.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use pydeb_domain::ConversionError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub status: CommandStatus,
    pub message: String,
    #[serde(default)]
    pub details: Value,
}

impl ExecutionOutcome {
    pub fn success(message: impl Into<String>, details: Value) -> Self {
        Self {
            status: CommandStatus::Ok,
            message: message.into(),
            details,
        }
    }

    pub fn failure(message: impl Into<String>, details: Value) -> Self {
        Self {
            status: CommandStatus::Failure,
            message: message.into(),
            details,
        }
    }

    pub fn user_error(message: impl Into<String>, details: Value) -> Self {
        Self {
            status: CommandStatus::UserError,
            message: message.into(),
            details,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum CommandStatus {
    Ok,
    UserError,
    Failure,
}

/// Classify an error into an outcome. Problems in the operator's input
/// (bad names, bad constraints, unsatisfiable requirements) are user
/// errors; failed builds and everything unexpected are failures.
pub fn outcome_for_error(error: &anyhow::Error) -> ExecutionOutcome {
    let details = serde_json::json!({ "error": format!("{error:#}") });
    match error.downcast_ref::<ConversionError>() {
        Some(ConversionError::BuildFailure { .. }) | None => {
            ExecutionOutcome::failure(error.to_string(), details)
        }
        Some(_) => ExecutionOutcome::user_error(error.to_string(), details),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversion_errors_are_user_errors() {
        let error = anyhow::Error::new(ConversionError::InvalidName {
            name: "--".to_string(),
        });
        assert_eq!(outcome_for_error(&error).status, CommandStatus::UserError);
    }

    #[test]
    fn build_failures_are_failures() {
        let error = anyhow::Error::new(ConversionError::BuildFailure {
            package: "python3-foo".to_string(),
            reason: "pip exited with 1".to_string(),
        });
        assert_eq!(outcome_for_error(&error).status, CommandStatus::Failure);
    }

    #[test]
    fn unknown_errors_are_failures() {
        let error = anyhow::anyhow!("disk on fire");
        assert_eq!(outcome_for_error(&error).status, CommandStatus::Failure);
    }
}
