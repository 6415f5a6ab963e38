use thiserror::Error;

use crate::domain::conversation::ConversationState;
use crate::domain::tool::ToolErrorKind;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("invalid conversation transition from {from:?} to {to:?}")]
    InvalidStateTransition { from: ConversationState, to: ConversationState },
    #[error("conversation {conversation_id} is {state:?} and accepts no new turns")]
    ConversationClosed { conversation_id: String, state: ConversationState },
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

/// Failure classes a dialogue turn can run into. None of these reach the
/// user as an error; they are recorded on the turn trace and in logs.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DialogueError {
    #[error("ambiguous input: {0}")]
    ExtractionAmbiguity(String),
    #[error("missing slot `{0}`")]
    MissingSlot(String),
    #[error("tool `{tool}` unavailable ({kind})")]
    ToolUnavailable { tool: String, kind: ToolErrorKind },
    #[error("tool `{tool}` timed out")]
    ToolTimeout { tool: String },
    #[error("unsafe input rejected for tool `{tool}`")]
    UnsafeInput { tool: String },
    #[error("persistence failure: {0}")]
    PersistenceFailure(String),
}

impl DialogueError {
    pub fn error_class(&self) -> &'static str {
        match self {
            Self::ExtractionAmbiguity(_) => "extraction_ambiguity",
            Self::MissingSlot(_) => "missing_slot",
            Self::ToolUnavailable { .. } => "tool_unavailable",
            Self::ToolTimeout { .. } => "tool_timeout",
            Self::UnsafeInput { .. } => "unsafe_input",
            Self::PersistenceFailure(_) => "persistence_failure",
        }
    }

    /// Classifies a failed tool call.
    pub fn from_tool_error(tool: impl Into<String>, kind: ToolErrorKind) -> Self {
        let tool = tool.into();
        match kind {
            ToolErrorKind::Timeout => Self::ToolTimeout { tool },
            ToolErrorKind::UnsafeInput => Self::UnsafeInput { tool },
            kind => Self::ToolUnavailable { tool, kind },
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("not found: {message}")]
    NotFound { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "The request could not be processed. Check inputs and try again."
            }
            Self::NotFound { .. } => "The requested conversation does not exist.",
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::BadRequest { correlation_id, .. }
            | Self::NotFound { correlation_id, .. }
            | Self::ServiceUnavailable { correlation_id, .. }
            | Self::Internal { correlation_id, .. } => correlation_id,
        }
    }
}

impl ApplicationError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::NotFound { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        match value {
            ApplicationError::Domain(_) => Self::BadRequest {
                message: "domain validation failed".to_owned(),
                correlation_id: "unassigned".to_owned(),
            },
            ApplicationError::Persistence(message) => {
                Self::ServiceUnavailable { message, correlation_id: "unassigned".to_owned() }
            }
            ApplicationError::Configuration(message) => {
                Self::Internal { message, correlation_id: "unassigned".to_owned() }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::domain::conversation::ConversationState;
    use crate::domain::tool::ToolErrorKind;
    use crate::errors::{ApplicationError, DialogueError, DomainError, InterfaceError};

    #[test]
    fn closed_conversation_maps_to_bad_request_with_correlation_id() {
        let interface = ApplicationError::from(DomainError::ConversationClosed {
            conversation_id: "c-1".to_owned(),
            state: ConversationState::Completed,
        })
        .into_interface("req-1");

        assert!(matches!(interface, InterfaceError::BadRequest { .. }));
        assert_eq!(interface.correlation_id(), "req-1");
        assert_eq!(
            interface.user_message(),
            "The request could not be processed. Check inputs and try again."
        );
    }

    #[test]
    fn persistence_error_maps_to_service_unavailable() {
        let interface =
            ApplicationError::Persistence("database is locked".to_owned()).into_interface("req-2");

        assert!(matches!(interface, InterfaceError::ServiceUnavailable { .. }));
        assert_eq!(
            interface.user_message(),
            "The service is temporarily unavailable. Please retry shortly."
        );
    }

    #[test]
    fn configuration_error_maps_to_internal() {
        let interface =
            ApplicationError::Configuration("bad threshold".to_owned()).into_interface("req-3");

        assert!(matches!(interface, InterfaceError::Internal { .. }));
        assert_eq!(interface.user_message(), "An unexpected internal error occurred.");
    }

    #[test]
    fn tool_error_kinds_land_in_the_matching_class() {
        let timeout = DialogueError::from_tool_error("calculator", ToolErrorKind::Timeout);
        let unsafe_input = DialogueError::from_tool_error("outlet_search", ToolErrorKind::UnsafeInput);
        let upstream =
            DialogueError::from_tool_error("product_search", ToolErrorKind::UpstreamUnavailable);

        assert_eq!(timeout.error_class(), "tool_timeout");
        assert_eq!(unsafe_input.error_class(), "unsafe_input");
        assert_eq!(upstream.error_class(), "tool_unavailable");
    }
}
