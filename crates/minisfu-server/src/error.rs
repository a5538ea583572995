use crate::sfu::SfuError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use minisfu_media::MediaError;
use minisfu_protocol::ErrorBody;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Invalid input: {0}")]
    BadRequest(String),

    #[error("Unsupported offer: {0}")]
    Unsupported(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),
}

impl From<SfuError> for AppError {
    fn from(err: SfuError) -> Self {
        match err {
            SfuError::Media(MediaError::CodecNotFound(_)) => AppError::Unsupported(err.to_string()),
            SfuError::Media(MediaError::Webrtc(e)) => AppError::Internal(e.into()),
            SfuError::Media(_) => AppError::BadRequest(err.to_string()),
            SfuError::PublisherAlreadyConnected | SfuError::NoPublisher => {
                AppError::Conflict(err.to_string())
            }
            SfuError::MissingLocalDescription | SfuError::Webrtc(_) => {
                AppError::Internal(anyhow::Error::new(err))
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Unsupported(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg.clone()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            AppError::Internal(e) => {
                tracing::error!("Internal error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        (status, Json(ErrorBody { error: message })).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
