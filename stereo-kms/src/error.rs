//! Error types for stereo scanout

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("cannot load {0}")]
    Library(String),

    #[error("{library} is missing symbol {symbol}")]
    Symbol {
        library: &'static str,
        symbol: &'static str,
    },

    #[error("cannot open '{path}': {source}")]
    Open {
        path: String,
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{what}: {source}")]
    Drm {
        what: &'static str,
        source: std::io::Error,
    },

    #[error("couldn't find connector with id {0}")]
    NoConnector(u32),

    #[error("no connected connector found")]
    NoConnectedConnector,

    #[error("connector {0} is not connected")]
    Disconnected(u32),

    #[error("no valid mode for connector {0}")]
    NoMode(u32),

    #[error("no valid crtc for connector {0}")]
    NoCrtc(u32),

    #[error("GBM error: {0}")]
    Gbm(String),

    #[error("unknown stereo layout \"{0}\"")]
    UnknownLayout(String),

    #[error("unsupported: {0}")]
    Unsupported(String),
}

impl Error {
    /// Wrap a failed DRM ioctl with what we were doing
    pub(crate) fn drm(what: &'static str) -> impl FnOnce(std::io::Error) -> Self {
        move |source| Error::Drm { what, source }
    }
}
