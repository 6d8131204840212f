use thiserror::Error;

/// Library error type for kiosk engine operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Network-level failure while fetching an image or catalog document.
    #[error("fetch failed for {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The server answered, but not with a success status.
    #[error("unexpected status {status} for {url}")]
    HttpStatus { url: String, status: u16 },

    /// Bytes arrived but could not be decoded into pixels.
    #[error("could not decode image from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: image::ImageError,
    },

    /// The catalog could not provide the requested playlist or items.
    #[error("catalog error: {0}")]
    Catalog(String),

    /// Underlying IO error.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// YAML/serde configuration error.
    #[error(transparent)]
    Config(#[from] serde_yaml::Error),

    /// JSON catalog document error.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
