use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised inside the trading core.
///
/// Public REST operations do not surface these directly: they log the error
/// and hand back "no result" so callers can keep going on cached data.
#[derive(Debug, Error)]
pub enum Error {
    /// Connection refused, DNS, TLS or timeout while talking to an exchange.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The exchange answered with a non-2xx status.
    #[error("exchange returned HTTP {status}: {body}")]
    Exchange { status: u16, body: String },

    /// The exchange answered 2xx but the payload did not have the expected shape.
    #[error("malformed payload: {0}")]
    Decode(String),

    /// Missing or unusable API credentials.
    #[error("invalid credentials: {0}")]
    Signing(String),

    /// The streaming socket failed or closed.
    #[error("stream disconnected: {0}")]
    StreamDisconnect(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("unknown symbol: {0}")]
    UnknownSymbol(String),

    #[error("unknown strategy: {0}")]
    UnknownStrategy(String),

    #[error("trading session is not running")]
    SessionClosed,

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn decode(context: &str, err: impl std::fmt::Display) -> Self {
        Self::Decode(format!("{context}: {err}"))
    }
}
