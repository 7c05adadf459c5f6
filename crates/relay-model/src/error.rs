use thiserror::Error;

/// The closed vocabulary of per-poll failure kinds.
///
/// Every fallible path in the relay eventually surfaces one of these. The
/// variant carries the *kind* for log fields and tests that want to match on
/// it; the human-readable detail lives in the `anyhow` context chain wrapping
/// the call site, not here.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("config error: {0}")]
    Config(String),

    #[error("datasource error: {0}")]
    Datasource(String),

    #[error("decompress error: {0}")]
    Decompress(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("bus error: {0}")]
    Bus(String),

    #[error("commit after publish error: {0}")]
    CommitAfterPublish(String),
}
