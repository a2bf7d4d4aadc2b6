use actix_web::http::{header, StatusCode};
use actix_web::{HttpResponse, ResponseError};
use serde::Serialize;
use utoipa::ToSchema;

use crate::forms::FormErrors;
use crate::repo::RepoError;

#[derive(Debug, Serialize, ToSchema)]
pub struct ApiErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<FormErrors>,
}

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("not found")] NotFound,
    #[error("conflict")] Conflict,
    #[error("forbidden")] Forbidden,
    #[error("bad request")] BadRequest,
    #[error("validation failed")] Validation(FormErrors),
    /// No credentials at all: the client is sent to the login page.
    #[error("login required")] LoginRequired { location: String },
    /// Credentials were sent but did not verify.
    #[error("invalid token")] Unauthorized,
    #[error("payload too large")] PayloadTooLarge,
    #[error("internal error")] Internal,
}

impl From<RepoError> for ApiError {
    fn from(e: RepoError) -> Self {
        match e {
            RepoError::NotFound => ApiError::NotFound,
            RepoError::Conflict => ApiError::Conflict,
            RepoError::Invalid(msg) => ApiError::Validation(FormErrors::single(FormErrors::NON_FIELD, msg)),
            RepoError::Internal(msg) => {
                log::error!("repository failure: {msg}");
                ApiError::Internal
            }
        }
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Conflict => StatusCode::CONFLICT,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::BadRequest | ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::LoginRequired { .. } => StatusCode::FOUND,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let fields = match self {
            ApiError::Validation(errors) => Some(errors.clone()),
            _ => None,
        };
        let mut res = HttpResponse::build(self.status_code());
        if let ApiError::LoginRequired { location } = self {
            res.insert_header((header::LOCATION, location.as_str()));
        }
        res.json(ApiErrorBody { error: self.to_string(), fields })
    }
}
