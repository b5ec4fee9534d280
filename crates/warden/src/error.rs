use thiserror::Error;

/// Single error enum for all engine operations.
///
/// Construction-time failures (bad regex, mixed policy fields, malformed
/// JSON) surface here and are never swallowed internally. The only place an
/// error becomes a normal return value is `Guard::is_allowed`, which logs
/// it and fails closed.
#[derive(Debug, Error)]
pub enum WardenError {
    #[error("unbalanced braces in pattern phrase '{0}'")]
    UnbalancedBraces(String),

    #[error("invalid regex: {0}")]
    InvalidRegex(String),

    #[error("rule creation error: {0}")]
    RuleCreation(String),

    #[error("policy creation error: {0}")]
    PolicyCreation(String),

    #[error("type error: {0}")]
    TypeError(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("deserialization error: {0}")]
    Deserialization(String),

    #[error("checker creation error: {0}")]
    CheckerCreation(String),

    #[error("policy with uid '{0}' already exists")]
    PolicyExists(String),

    #[error("unknown checker type: {0}")]
    UnknownCheckerType(String),

    #[error("storage error: {0}")]
    Storage(String),
}

pub type WardenResult<T> = Result<T, WardenError>;
