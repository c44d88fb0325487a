// src/utils.rs
use actix_web::error::BlockingError;
use actix_web::{ HttpResponse, ResponseError };
use actix_web::http::StatusCode;
use log::error;
use serde_json::json;
use std::fmt;

use crate::error::EngineError;
use crate::models::group::GroupId;
use crate::models::server::ServerAddress;

#[derive(Debug)]
pub enum RequestError {
    GroupNotFound(String),
    ServerNotFound(String),
    InvalidAddress(String),
    InvalidGroupId(String),
    NotFavourites(String),
    AlreadyFavourite(String),
    SourceFailed(String),
    Blocking,
}

impl fmt::Display for RequestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GroupNotFound(id) => write!(f, "Server list {} not found", id),
            Self::ServerNotFound(address) => write!(f, "Server {} not found", address),
            Self::InvalidAddress(address) => write!(f, "Invalid server address: {}", address),
            Self::InvalidGroupId(id) => write!(f, "Invalid server list id: {}", id),
            Self::NotFavourites(id) => write!(f, "Server list {} is not a favourites list", id),
            Self::AlreadyFavourite(address) => write!(f, "{} is already a favourite", address),
            Self::SourceFailed(reason) => write!(f, "Server list source failed: {}", reason),
            Self::Blocking => write!(f, "Background task was cancelled"),
        }
    }
}

impl ResponseError for RequestError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::GroupNotFound(_) | Self::ServerNotFound(_) => StatusCode::NOT_FOUND,
            Self::InvalidAddress(_) | Self::InvalidGroupId(_) | Self::NotFavourites(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::AlreadyFavourite(_) => StatusCode::CONFLICT,
            Self::SourceFailed(_) => StatusCode::BAD_GATEWAY,
            Self::Blocking => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(json!({ "error": self.to_string() }))
    }
}

impl From<EngineError> for RequestError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::GroupNotFound(id) => Self::GroupNotFound(id.to_string()),
            EngineError::ConnectorNotFound(position) => Self::GroupNotFound(format!("#{}", position)),
            EngineError::ServerNotFound(address) => Self::ServerNotFound(address.to_string()),
            EngineError::NotFavourites(id) => Self::NotFavourites(id.to_string()),
            EngineError::AlreadyFavourite(address) => Self::AlreadyFavourite(address.to_string()),
            EngineError::Source(source) => Self::SourceFailed(source.to_string()),
        }
    }
}

impl From<BlockingError> for RequestError {
    fn from(e: BlockingError) -> Self {
        error!("Blocking engine call failed: {}", e);
        Self::Blocking
    }
}

pub fn parse_group_id(raw: &str) -> Result<GroupId, RequestError> {
    raw.parse().map_err(|_| RequestError::InvalidGroupId(raw.to_string()))
}

pub fn parse_address(raw: &str) -> Result<ServerAddress, RequestError> {
    raw.trim()
        .parse()
        .map_err(|_| RequestError::InvalidAddress(raw.to_string()))
}
