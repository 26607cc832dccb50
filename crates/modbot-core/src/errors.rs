/// Core error type for the moderation bot.
///
/// Adapter crates map their library errors into this type so the workflow
/// code can distinguish "log and keep going" failures from failures that must
/// change the result of an operation (counter writes, allowlist writes).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    /// Job broker unreachable. Swallowed on the moderation path.
    #[error("dispatch error: {0}")]
    Dispatch(String),

    /// Classifier output did not match the expected verdict shape.
    #[error("classification parse error: {0}")]
    ClassificationParse(String),

    /// Counter / allowlist / log store unreachable. Must surface in the
    /// return value of state-mutating operations.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// Approval callback payload had fewer fields than expected.
    #[error("malformed approval token: {0}")]
    MalformedToken(String),

    /// Approval callback payload carried non-integer ids.
    #[error("invalid id in approval token: {0}")]
    InvalidId(String),

    /// Chat platform API failure. Reported, never retried here.
    #[error("platform call failed: {0}")]
    PlatformCall(String),

    #[error("external service error: {0}")]
    External(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
