//! Errors raised by object and metadata storage backends.

use std::fmt;

pub type StoreResult<T> = Result<T, StoreError>;

/// Where a storage error happened.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorContext {
    /// e.g. "upload", "acquire_lease", "upsert_rollup_tiles"
    pub operation: Option<String>,
    pub target: Option<String>,
    pub entity: Option<String>,
}

impl ErrorContext {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: Some(operation.into()),
            ..Default::default()
        }
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn with_entity(mut self, entity: impl ToString) -> Self {
        self.entity = Some(entity.to_string());
        self
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if let Some(ref op) = self.operation {
            parts.push(format!("operation={}", op));
        }
        if let Some(ref target) = self.target {
            parts.push(format!("target={}", target));
        }
        if let Some(ref entity) = self.entity {
            parts.push(format!("entity={}", entity));
        }
        write!(f, "[{}]", parts.join(", "))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("not found: {message} {context}")]
    NotFound { message: String, context: ErrorContext },

    /// Lease held by somebody else, or a conditional write lost its race.
    #[error("conflict: {message} {context}")]
    Conflict { message: String, context: ErrorContext },

    #[error("throttled: {message} {context}")]
    Throttled { message: String, context: ErrorContext },

    #[error("connection error: {message} {context}")]
    Connection { message: String, context: ErrorContext },

    #[error("timeout: {message} {context}")]
    Timeout { message: String, context: ErrorContext },

    #[error("validation error: {message} {context}")]
    Validation { message: String, context: ErrorContext },

    #[error("internal error: {message} {context}")]
    Internal { message: String, context: ErrorContext },
}

impl StoreError {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
            context: ErrorContext::default(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
            context: ErrorContext::default(),
        }
    }

    pub fn throttled(message: impl Into<String>) -> Self {
        Self::Throttled {
            message: message.into(),
            context: ErrorContext::default(),
        }
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            context: ErrorContext::default(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout {
            message: message.into(),
            context: ErrorContext::default(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            context: ErrorContext::default(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
            context: ErrorContext::default(),
        }
    }

    /// Transient failures worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Throttled { .. } | Self::Connection { .. } | Self::Timeout { .. }
        )
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn context(&self) -> &ErrorContext {
        match self {
            Self::NotFound { context, .. }
            | Self::Conflict { context, .. }
            | Self::Throttled { context, .. }
            | Self::Connection { context, .. }
            | Self::Timeout { context, .. }
            | Self::Validation { context, .. }
            | Self::Internal { context, .. } => context,
        }
    }

    fn context_mut(&mut self) -> &mut ErrorContext {
        match self {
            Self::NotFound { context, .. }
            | Self::Conflict { context, .. }
            | Self::Throttled { context, .. }
            | Self::Connection { context, .. }
            | Self::Timeout { context, .. }
            | Self::Validation { context, .. }
            | Self::Internal { context, .. } => context,
        }
    }

    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.context_mut().operation = Some(operation.into());
        self
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.context_mut().target = Some(target.into());
        self
    }

    pub fn with_entity(mut self, entity: impl ToString) -> Self {
        self.context_mut().entity = Some(entity.to_string());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_errors_are_retryable() {
        assert!(StoreError::throttled("slow down").is_retryable());
        assert!(StoreError::connection("reset").is_retryable());
        assert!(StoreError::timeout("deadline").is_retryable());
        assert!(!StoreError::conflict("leased").is_retryable());
        assert!(!StoreError::not_found("gone").is_retryable());
        assert!(!StoreError::validation("bad").is_retryable());
    }

    #[test]
    fn context_is_rendered_in_the_message() {
        let err = StoreError::conflict("lease held")
            .with_operation("acquire_lease")
            .with_target("west")
            .with_entity("locks/st-1");
        assert_eq!(
            err.to_string(),
            "conflict: lease held [operation=acquire_lease, target=west, entity=locks/st-1]"
        );
    }
}
