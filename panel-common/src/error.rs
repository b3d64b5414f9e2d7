use std::error::Error as StdError;
use std::fmt;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};

/// A taxonomy of failures that cross a component boundary, mirrored onto
/// an HTTP status when surfaced through the API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    BadRequest,
    NotFound,
    Unreachable,
    CommandFailed { code: i32, stderr: String },
    Io,
    Conflict,
    Fatal,
}

impl ErrorKind {
    pub fn status(&self) -> StatusCode {
        match self {
            ErrorKind::BadRequest => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Unreachable => StatusCode::BAD_GATEWAY,
            ErrorKind::CommandFailed { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorKind::Io => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::Fatal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// The error type shared by every core and API component: a kind plus an
/// optional lower-level cause, never a panic.
#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    source: Option<Box<dyn StdError + Send + Sync + 'static>>,
}

impl Error {
    pub fn from_kind(kind: ErrorKind) -> Self {
        Self { kind, source: None }
    }

    pub fn source<E: StdError + Send + Sync + 'static>(kind: ErrorKind, err: E) -> Self {
        Self {
            kind,
            source: Some(Box::new(err)),
        }
    }

    pub fn custom<S: AsRef<str>>(kind: ErrorKind, message: S) -> Self {
        Self {
            kind,
            source: Some(message.as_ref().into()),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind.clone()
    }

    pub fn command_failed(code: i32, stderr: impl Into<String>) -> Self {
        Self::from_kind(ErrorKind::CommandFailed {
            code,
            stderr: stderr.into(),
        })
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Self::from_kind(kind)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::source(ErrorKind::Io, err)
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => Self::from_kind(ErrorKind::NotFound),
            _ => Self::source(ErrorKind::Fatal, err),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.kind, &self.source) {
            (kind, Some(source)) => write!(f, "{kind:?}: {source}"),
            (kind, None) => write!(f, "{kind:?}"),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn StdError + 'static))
    }
}

#[derive(Debug, Serialize)]
struct ApiError {
    code: i32,
    message: String,
    data: Option<()>,
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        tracing::error!(error = %self, kind = ?self.kind, "request produced an error");
        let status = self.kind.status();
        let body = ApiError {
            code: -1,
            message: self.to_string(),
            data: None,
        };
        (status, axum::Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, Error>;
