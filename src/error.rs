use actix_web::{HttpResponse, ResponseError};
use serde::Serialize;

use crate::models::{EntityKind, Id};
use crate::repo::RepoError;

/// Failure taxonomy of the core services.
#[derive(thiserror::Error, Debug)]
pub enum ServiceError {
    #[error("{0} {1} not found")]
    NotFound(EntityKind, Id),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("concurrent update, retry")]
    Conflict,
    #[error("storage failure: {0}")]
    Storage(String),
}

impl ServiceError {
    /// Stable machine-readable kind for clients.
    pub fn kind(&self) -> &'static str {
        match self {
            ServiceError::NotFound(..) => "not_found",
            ServiceError::Forbidden(_) => "forbidden",
            ServiceError::InvalidState(_) => "invalid_state",
            ServiceError::Validation(_) => "validation",
            ServiceError::Conflict => "conflict",
            ServiceError::Storage(_) => "internal",
        }
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;

impl From<RepoError> for ServiceError {
    fn from(e: RepoError) -> Self {
        match e {
            // Lookups that can legitimately miss go through `or_missing`; a
            // NotFound reaching this point means a row vanished mid-operation.
            RepoError::NotFound => ServiceError::Storage("row disappeared during update".into()),
            RepoError::Conflict => ServiceError::Conflict,
            RepoError::Internal(msg) => ServiceError::Storage(msg),
        }
    }
}

/// Attach the entity being looked up to a repository miss.
pub trait RepoResultExt<T> {
    fn or_missing(self, kind: EntityKind, id: Id) -> ServiceResult<T>;
}

impl<T> RepoResultExt<T> for Result<T, RepoError> {
    fn or_missing(self, kind: EntityKind, id: Id) -> ServiceResult<T> {
        self.map_err(|e| match e {
            RepoError::NotFound => ServiceError::NotFound(kind, id),
            other => other.into(),
        })
    }
}

#[derive(Debug, Serialize)]
pub struct ApiErrorBody {
    pub error: String,
    pub message: String,
}

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Service(#[from] ServiceError),
    #[error("authentication required")]
    Unauthorized,
    #[error("too many requests")]
    TooManyRequests,
    #[error("bad request: {0}")]
    BadRequest(String),
}

impl From<RepoError> for ApiError {
    fn from(e: RepoError) -> Self {
        ApiError::Service(e.into())
    }
}

impl ApiError {
    fn kind(&self) -> &'static str {
        match self {
            ApiError::Service(e) => e.kind(),
            ApiError::Unauthorized => "unauthorized",
            ApiError::TooManyRequests => "rate_limited",
            ApiError::BadRequest(_) => "bad_request",
        }
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> actix_web::http::StatusCode {
        use actix_web::http::StatusCode;
        match self {
            ApiError::Service(ServiceError::NotFound(..)) => StatusCode::NOT_FOUND,
            ApiError::Service(ServiceError::Forbidden(_)) => StatusCode::FORBIDDEN,
            ApiError::Service(ServiceError::InvalidState(_)) => StatusCode::CONFLICT,
            ApiError::Service(ServiceError::Validation(_)) => StatusCode::BAD_REQUEST,
            ApiError::Service(ServiceError::Conflict) => StatusCode::CONFLICT,
            ApiError::Service(ServiceError::Storage(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::TooManyRequests => StatusCode::TOO_MANY_REQUESTS,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let message = match self {
            ApiError::Service(ServiceError::Storage(detail)) => {
                tracing::error!(%detail, "storage failure");
                "internal error".to_string()
            }
            other => other.to_string(),
        };
        HttpResponse::build(self.status_code()).json(ApiErrorBody { error: self.kind().to_string(), message })
    }
}
