//! Subscription handlers.
//!
//! A handler answers synchronously ([`Reply::Ready`]), with a pending
//! computation ([`Reply::Pending`]), or not at all ([`Reply::NoReply`]).
//! Both answering paths end in the same response step of the pipeline.

use std::future::Future;

use futures_util::future::BoxFuture;
use serde_json::Value;
use thiserror::Error;

use relaybus_core::{BusError, BusRequest, BusResponse};

pub type HandlerResult = Result<BusResponse, HandlerError>;

/// Failure raised by a handler.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Error-shaped reply, sent as is after stamping.
    #[error("{0}")]
    Response(Box<BusResponse>),
    /// Anything else; replied as `INTERNAL_SERVER_ERROR`.
    #[error("{0}")]
    Failure(String),
}

impl From<BusResponse> for HandlerError {
    fn from(res: BusResponse) -> Self {
        HandlerError::Response(Box::new(res))
    }
}

impl From<BusError> for HandlerError {
    fn from(err: BusError) -> Self {
        match err {
            BusError::Response(res) => HandlerError::Response(res),
            other => HandlerError::Failure(other.to_string()),
        }
    }
}

impl From<String> for HandlerError {
    fn from(msg: String) -> Self {
        HandlerError::Failure(msg)
    }
}

impl From<&str> for HandlerError {
    fn from(msg: &str) -> Self {
        HandlerError::Failure(msg.to_string())
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(err: serde_json::Error) -> Self {
        HandlerError::Failure(err.to_string())
    }
}

impl From<std::io::Error> for HandlerError {
    fn from(err: std::io::Error) -> Self {
        HandlerError::Failure(err.to_string())
    }
}

/// What a handler produced for one message.
pub enum Reply {
    Ready(HandlerResult),
    Pending(BoxFuture<'static, HandlerResult>),
    NoReply,
}

impl From<HandlerResult> for Reply {
    fn from(res: HandlerResult) -> Self {
        Reply::Ready(res)
    }
}

impl From<BusResponse> for Reply {
    fn from(res: BusResponse) -> Self {
        Reply::Ready(Ok(res))
    }
}

/// Bare data is a 200 reply.
impl From<Value> for Reply {
    fn from(data: Value) -> Self {
        Reply::Ready(Ok(BusResponse::ok(data)))
    }
}

impl From<()> for Reply {
    fn from(_: ()) -> Self {
        Reply::NoReply
    }
}

pub trait Handler: Send + Sync + 'static {
    fn handle(&self, req: BusRequest) -> Reply;
}

impl<F, R> Handler for F
where
    F: Fn(BusRequest) -> R + Send + Sync + 'static,
    R: Into<Reply>,
{
    fn handle(&self, req: BusRequest) -> Reply {
        self(req).into()
    }
}

/// Adapt an async fn into a handler answering with [`Reply::Pending`].
pub fn from_async<F, Fut>(f: F) -> impl Handler
where
    F: Fn(BusRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    move |req: BusRequest| Reply::Pending(Box::pin(f(req)))
}
