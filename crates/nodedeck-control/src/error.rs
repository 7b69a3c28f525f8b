use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use nodedeck_runner::{RunnerError, project_fs::FsError};
use sea_orm::DbErr;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub message: String,
}

pub fn json_error(code: StatusCode, message: impl Into<String>) -> Response {
    (
        code,
        Json(ErrorBody {
            message: message.into(),
        }),
    )
        .into_response()
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("{0}")]
    Conflict(String),
    #[error("database error: {0}")]
    Db(#[from] DbErr),
    #[error(transparent)]
    Runner(#[from] RunnerError),
    #[error(transparent)]
    Fs(#[from] FsError),
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Db(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Runner(err) => match err {
                RunnerError::AlreadyActive { .. } | RunnerError::Cancelled { .. } => {
                    StatusCode::CONFLICT
                }
                err if err.is_user_error() => StatusCode::BAD_REQUEST,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Fs(err) => match err {
                FsError::Absolute | FsError::Traversal | FsError::Root | FsError::Archive(_) => {
                    StatusCode::BAD_REQUEST
                }
                FsError::NotFound(_) => StatusCode::NOT_FOUND,
                FsError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(err = %self, "request failed");
        }
        json_error(status, self.to_string())
    }
}
