use std::io;

use thiserror::Error;

use super::registry::SecondaryKind;

#[derive(Debug, Error)]
pub enum NetError {
    #[error("Connection to {endpoint} failed: {source}")]
    Connect {
        endpoint: String,
        #[source]
        source: io::Error,
    },

    #[error("Connection to {0} timed out")]
    ConnectTimeout(String),

    #[error("Handshake rejected by remote: {0}")]
    Rejected(String),

    #[error("A {0} connection is already open")]
    KindAlreadyOpen(SecondaryKind),

    #[error("No server key configured")]
    MissingKey,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, NetError>;
