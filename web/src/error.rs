use std::error::Error as StdError;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use domain::error::{DomainErrorKind, EntityErrorKind, Error as DomainError, InternalErrorKind};
use log::*;
use sse::StreamErrorKind;

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Debug)]
pub struct Error(DomainError);

impl StdError for Error {}

impl std::fmt::Display for Error {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> core::result::Result<(), std::fmt::Error> {
        write!(fmt, "{self:?}")
    }
}

// List of possible StatusCode variants https://docs.rs/http/latest/http/status/struct.StatusCode.html#associatedconstant.UNPROCESSABLE_ENTITY
impl IntoResponse for Error {
    fn into_response(self) -> Response {
        match self.0.error_kind {
            DomainErrorKind::Internal(internal_error_kind) => match internal_error_kind {
                InternalErrorKind::Entity(entity_error_kind) => match entity_error_kind {
                    EntityErrorKind::NotFound => {
                        (StatusCode::NOT_FOUND, "NOT FOUND").into_response()
                    }
                    EntityErrorKind::Invalid => {
                        (StatusCode::UNPROCESSABLE_ENTITY, "UNPROCESSABLE ENTITY").into_response()
                    }
                    EntityErrorKind::Other(message) => {
                        error!("Entity error: {message}");
                        (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL SERVER ERROR").into_response()
                    }
                },
                InternalErrorKind::Other(message) => {
                    error!("Internal error: {message}");
                    (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL SERVER ERROR").into_response()
                }
            },
            DomainErrorKind::Stream(stream_error_kind) => match stream_error_kind {
                StreamErrorKind::Unauthorized => {
                    (StatusCode::UNAUTHORIZED, "UNAUTHORIZED").into_response()
                }
                StreamErrorKind::TooManyConnections(_) => {
                    (StatusCode::TOO_MANY_REQUESTS, "TOO MANY REQUESTS").into_response()
                }
                StreamErrorKind::ShuttingDown => {
                    (StatusCode::SERVICE_UNAVAILABLE, "SERVICE UNAVAILABLE").into_response()
                }
                other => {
                    error!("Stream error: {other:?}");
                    (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL SERVER ERROR").into_response()
                }
            },
        }
    }
}

impl<E> From<E> for Error
where
    E: Into<DomainError>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sse::{ConnectionLimit, Error as StreamError};

    fn status_of(kind: StreamErrorKind) -> StatusCode {
        Error::from(StreamError::new(kind)).into_response().status()
    }

    #[test]
    fn admission_errors_map_to_client_statuses() {
        assert_eq!(
            status_of(StreamErrorKind::Unauthorized),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            status_of(StreamErrorKind::TooManyConnections(
                ConnectionLimit::PerUser
            )),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            status_of(StreamErrorKind::TooManyConnections(
                ConnectionLimit::PerStream
            )),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            status_of(StreamErrorKind::ShuttingDown),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn other_stream_errors_are_internal() {
        assert_eq!(
            status_of(StreamErrorKind::StreamTypeMismatch),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            status_of(StreamErrorKind::Encode),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn entity_errors_map_to_their_statuses() {
        let not_found = Error::from(DomainError::not_found()).into_response();
        let invalid = Error::from(DomainError::invalid("bad")).into_response();

        assert_eq!(not_found.status(), StatusCode::NOT_FOUND);
        assert_eq!(invalid.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }
}
