//! Error taxonomy shared by the grading pipeline

use crate::types::SandboxStatus;
use thiserror::Error;
use uuid::Uuid;

pub type GradeResult<T> = Result<T, GradeError>;

/// Coarse classification used for propagation and HTTP mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Bad input to the pipeline. Not retryable.
    Validation,
    /// Sandbox unreachable or timed out. The class suited to caller retry.
    SandboxTransport,
    /// Sandbox answered, but not with something usable.
    SandboxProtocol,
    /// Grading data required for a run is missing.
    GradingData,
    /// Storage read or write failed.
    Persistence,
}

#[derive(Error, Debug)]
pub enum GradeError {
    #[error("missing required field: {0}")]
    MissingRequiredField(&'static str),

    #[error("invalid student identity: {0:?}")]
    InvalidStudentId(String),

    #[error("no run profile for language: {0}")]
    UnknownLanguage(String),

    #[error("sandbox rejected file {0}: malformed payload or identifier")]
    InvalidRequest(String),

    #[error("sandbox file endpoint not found")]
    EndpointUnavailable,

    #[error("sandbox failed to write file {0} to its cache")]
    SandboxCacheError(String),

    #[error("unexpected response code from sandbox: {0}")]
    UnexpectedSandboxResponse(u16),

    #[error("sandbox rejected run: {0}")]
    SandboxRejected(SandboxStatus),

    #[error("sandbox unreachable: {0}")]
    SandboxUnreachable(String),

    #[error("malformed sandbox output: {0}")]
    MalformedSandboxOutput(String),

    #[error("no testcase for submission {0}")]
    TestcaseNotFound(Uuid),

    #[error("persistence error: {0}")]
    Persistence(String),
}

impl GradeError {
    pub fn class(&self) -> ErrorClass {
        match self {
            GradeError::MissingRequiredField(_)
            | GradeError::InvalidStudentId(_)
            | GradeError::UnknownLanguage(_)
            | GradeError::InvalidRequest(_) => ErrorClass::Validation,
            GradeError::SandboxUnreachable(_) => ErrorClass::SandboxTransport,
            GradeError::EndpointUnavailable
            | GradeError::SandboxCacheError(_)
            | GradeError::UnexpectedSandboxResponse(_)
            | GradeError::SandboxRejected(_)
            | GradeError::MalformedSandboxOutput(_) => ErrorClass::SandboxProtocol,
            GradeError::TestcaseNotFound(_) => ErrorClass::GradingData,
            GradeError::Persistence(_) => ErrorClass::Persistence,
        }
    }
}

impl From<::redis::RedisError> for GradeError {
    fn from(err: ::redis::RedisError) -> Self {
        GradeError::Persistence(err.to_string())
    }
}
