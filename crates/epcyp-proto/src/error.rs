use thiserror::Error;

/// Failure while retrieving or decoding one YP feed.  Always scoped to a
/// single source; other sources keep merging.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum FeedError {
    #[error("network error fetching {url}: {message}")]
    Network { url: String, message: String },

    #[error("timed out after {secs}s fetching {url}")]
    Timeout { url: String, secs: u64 },

    #[error("HTTP {status} from {url}")]
    Http { url: String, status: u16 },

    #[error("malformed feed from {url}: {message}")]
    Parse { url: String, message: String },
}

impl FeedError {
    pub fn url(&self) -> &str {
        match self {
            Self::Network { url, .. }
            | Self::Timeout { url, .. }
            | Self::Http { url, .. }
            | Self::Parse { url, .. } => url,
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum FavoriteError {
    #[error("favorite #{index} ({name}) has an invalid pattern: {message}")]
    InvalidPattern {
        index: usize,
        name: String,
        message: String,
    },

    #[error("no favorite at index {0}")]
    OutOfRange(usize),
}

/// A refresh was requested before the minimum interval elapsed.  This is a
/// control-flow signal for the UI, not a failure.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("refresh rejected, next update possible in {seconds_remaining}s")]
pub struct CooldownError {
    pub seconds_remaining: u64,
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
