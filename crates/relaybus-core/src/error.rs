//! Shared error types across relaybus crates.

use thiserror::Error;

use crate::protocol::envelope::BusResponse;

/// Wire-level error codes (stable API).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Request failed schema validation.
    BadRequest,
    /// Handler output failed schema validation.
    BadResponse,
    /// Unrecognized `dataEncoding` on a request or response.
    InvalidDataEncoding,
    /// No reply within the request timeout.
    BusResponseTimeout,
    /// Anonymous caller on a gated subject.
    MustBeLoggedIn,
    /// Authenticated caller lacking a required scope.
    PermissionDenied,
    /// Invalid or missing credentials.
    Unauthorized,
    /// Not allowed to access resource.
    Forbidden,
    /// Resource was not found.
    NotFound,
    /// Uncaught handler failure or schema engine failure.
    InternalServerError,
}

impl ErrorCode {
    /// String representation used in error envelopes.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::BadRequest => "BAD_REQUEST",
            ErrorCode::BadResponse => "BAD_RESPONSE",
            ErrorCode::InvalidDataEncoding => "INVALID_DATA_ENCODING",
            ErrorCode::BusResponseTimeout => "BUS_RESPONSE_TIMEOUT",
            ErrorCode::MustBeLoggedIn => "MUST_BE_LOGGED_IN",
            ErrorCode::PermissionDenied => "PERMISSION_DENIED",
            ErrorCode::Unauthorized => "UNAUTHORIZED",
            ErrorCode::Forbidden => "FORBIDDEN",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::InternalServerError => "INTERNAL_SERVER_ERROR",
        }
    }

    /// HTTP-style status carried in the envelope.
    pub fn status(self) -> u16 {
        match self {
            ErrorCode::BadRequest | ErrorCode::InvalidDataEncoding => 400,
            ErrorCode::Unauthorized => 401,
            ErrorCode::MustBeLoggedIn | ErrorCode::PermissionDenied | ErrorCode::Forbidden => 403,
            ErrorCode::NotFound => 404,
            ErrorCode::BusResponseTimeout => 408,
            ErrorCode::BadResponse | ErrorCode::InternalServerError => 500,
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            ErrorCode::BadRequest => "Request has missing or invalid fields",
            ErrorCode::BadResponse => "Response has missing or invalid fields",
            ErrorCode::InvalidDataEncoding => "Invalid data encoding in response/request",
            ErrorCode::BusResponseTimeout => "Bus response timed out",
            ErrorCode::MustBeLoggedIn | ErrorCode::PermissionDenied => "Permission denied",
            ErrorCode::Unauthorized => "Invalid or missing credentials",
            ErrorCode::Forbidden => "Not allowed to access resource",
            ErrorCode::NotFound => "Resource was not found",
            ErrorCode::InternalServerError => "Server encountered an unexpected error",
        }
    }

    /// All codes, in registration order of the catalog defaults.
    pub const ALL: [ErrorCode; 10] = [
        ErrorCode::BadRequest,
        ErrorCode::Unauthorized,
        ErrorCode::Forbidden,
        ErrorCode::NotFound,
        ErrorCode::InternalServerError,
        ErrorCode::BadResponse,
        ErrorCode::InvalidDataEncoding,
        ErrorCode::BusResponseTimeout,
        ErrorCode::PermissionDenied,
        ErrorCode::MustBeLoggedIn,
    ];
}

/// Shared result type.
pub type Result<T> = std::result::Result<T, BusError>;

/// Unified error type used by core and runtime.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("bus is not connected")]
    NotConnected,
    #[error("transport: {0}")]
    Transport(String),
    #[error("codec: {0}")]
    Codec(String),
    #[error("invalid config: {0}")]
    Config(String),
    #[error("schema: {0}")]
    Schema(String),
    #[error("invalid subscription: {0}")]
    InvalidSubscription(String),
    /// An error-shaped reply, carrying the full envelope.
    #[error("{0}")]
    Response(Box<BusResponse>),
}

impl BusError {
    /// The error envelope when this error came back over the bus.
    pub fn response(&self) -> Option<&BusResponse> {
        match self {
            BusError::Response(res) => Some(res),
            _ => None,
        }
    }

    /// Wire code of the carried envelope, if any.
    pub fn code(&self) -> Option<&str> {
        self.response()
            .and_then(|res| res.error.as_ref())
            .map(|e| e.code.as_str())
    }

    /// Status of the carried envelope, if any.
    pub fn status(&self) -> Option<u16> {
        self.response().map(|res| res.status)
    }
}

impl From<BusResponse> for BusError {
    fn from(res: BusResponse) -> Self {
        BusError::Response(Box::new(res))
    }
}
