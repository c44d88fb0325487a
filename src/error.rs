use std::path::PathBuf;
use thiserror::Error;

use crate::models::group::GroupId;
use crate::models::server::ServerAddress;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to fetch {url}: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("invalid server address {0:?}")]
    InvalidAddress(String),
    #[error("invalid legacy favourites file {path}: {reason}")]
    Legacy {
        path: PathBuf,
        reason: String,
    },
    #[error("{0} sources cannot be written")]
    ReadOnly(String),
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("group {0} not found")]
    GroupNotFound(GroupId),
    #[error("no connector at position {0}")]
    ConnectorNotFound(usize),
    #[error("server {0} not found")]
    ServerNotFound(ServerAddress),
    #[error("group {0} is not a favourites list")]
    NotFavourites(GroupId),
    #[error("{0} is already in the favourites list")]
    AlreadyFavourite(ServerAddress),
    #[error(transparent)]
    Source(#[from] SourceError),
}
