use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde_json::{json, Value};

use relaybus_core::error::{BusError, Result};
use relaybus_core::protocol::codec::{decompress, ChunkBuffer, GZIP};
use relaybus_core::protocol::subject::{parse_params, request_data_subject};
use relaybus_core::{BusRequest, BusResponse, DataMessage, ErrorCode};

use super::SubscriptionShared;
use crate::context::{self, RequestContext};
use crate::dispatch::{Handler, HandlerError, HandlerResult, Reply};
use crate::schema::ValidationTarget;
use crate::transport::{codec, SubscriptionGuard};

/// Run one inbound message through `sub`.
///
/// Boxed because a parent delegates to its child through this same function.
pub(super) fn handle_message(
    sub: Arc<SubscriptionShared>,
    mut req: BusRequest,
    subject: String,
    reply_to: Option<String>,
) -> BoxFuture<'static, ()> {
    Box::pin(async move {
        let started = Instant::now();

        if let Some(chunks) = req.chunks.filter(|n| *n > 0) {
            let buffer = match sub.ctx.codec.chunk_buffer(chunks) {
                Ok(buffer) => buffer,
                Err(e) => {
                    tracing::warn!(subject = %subject, error = %e, "refusing chunked request");
                    let responder = Responder::new(&sub, &req, reply_to.as_deref(), started);
                    return responder.error(BusResponse::error(ErrorCode::BadRequest, e.to_string())).await;
                }
            };
            match receive_request_chunks(&sub, &req, &subject, buffer, reply_to.as_deref()).await {
                Ok(joined) => {
                    req.data = Value::String(joined);
                    req.chunks = None;
                }
                Err(e) => {
                    tracing::warn!(subject = %subject, error = %e, "request chunks not received, dropping request");
                    return;
                }
            }
        }

        if let Some(child) = sub.matching_child(&subject) {
            return handle_message(child, req, subject, reply_to).await;
        }

        let responder = Responder::new(&sub, &req, reply_to.as_deref(), started);

        if let Some(encoding) = req.data_encoding.take() {
            if encoding != GZIP {
                let detail = format!("Cannot decompress data, unrecognized data encoding: {encoding}");
                return responder
                    .error(BusResponse::error(ErrorCode::InvalidDataEncoding, detail))
                    .await;
            }
            match req.data.as_str().map(decompress) {
                Some(Ok(data)) => req.data = data,
                Some(Err(e)) => {
                    return responder.error(BusResponse::internal_server_error(e.to_string())).await;
                }
                None => {
                    let detail = "compressed data must be a base64 string";
                    return responder.error(BusResponse::internal_server_error(detail)).await;
                }
            }
        }

        if req.req_id.is_empty() {
            tracing::warn!(subject = %sub.subject(), "message is missing reqId");
        }

        if let Some(schema) = sub.request_schema.as_deref() {
            if sub.options().validate_request {
                if let Err(res) = sub.ctx.schemas.validate(schema, &req.data, ValidationTarget::Request) {
                    return responder.error(res).await;
                }
            }
        }

        if let Some(rejection) = sub.policy().check(req.scopes()).into_response() {
            tracing::debug!(subject = %subject, code = ?rejection.error_code(), "request rejected by access policy");
            return responder.error(rejection).await;
        }

        if let Some(params) = parse_params(sub.subject(), &subject) {
            for (name, value) in params {
                req.params.entry(name).or_insert(value);
            }
        }

        let ambient = RequestContext {
            req_id: req.req_id.clone(),
            user: req.user.clone(),
            subject: subject.clone(),
            reply_to: reply_to.clone(),
        };
        let outcome = context::request::scope(ambient, invoke(Arc::clone(&sub.handler), req)).await;

        match outcome {
            None => {}
            Some(Ok(res)) if res.is_error() => responder.error(res).await,
            Some(Ok(res)) => responder.success(res).await,
            Some(Err(HandlerError::Response(res))) if res.is_error() => responder.error(*res).await,
            Some(Err(HandlerError::Response(res))) => {
                let detail = serde_json::to_string(&*res).unwrap_or_default();
                responder.error(BusResponse::internal_server_error(detail)).await
            }
            Some(Err(HandlerError::Failure(msg))) => {
                tracing::error!(subject = %subject, error = %msg, "handler failed");
                responder.error(BusResponse::internal_server_error(msg)).await
            }
        }
    })
}

/// Call the handler; a panic in either the sync or the async part becomes a
/// failure. `None` means the handler chose not to reply.
async fn invoke(handler: Arc<dyn Handler>, req: BusRequest) -> Option<HandlerResult> {
    let reply = match std::panic::catch_unwind(AssertUnwindSafe(|| handler.handle(req))) {
        Ok(reply) => reply,
        Err(panic) => return Some(Err(HandlerError::Failure(panic_message(panic)))),
    };
    match reply {
        Reply::Ready(res) => Some(res),
        Reply::Pending(fut) => Some(
            AssertUnwindSafe(fut)
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| Err(HandlerError::Failure(panic_message(panic)))),
        ),
        Reply::NoReply => None,
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    let msg = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    format!("handler panicked: {msg}")
}

/// Publishes the outcome of one message back to its requester.
struct Responder<'a> {
    sub: &'a SubscriptionShared,
    reply_to: Option<&'a str>,
    /// Where the requester wants response chunks.
    data_subject: Option<String>,
    req_id: String,
    transaction_id: String,
    started: Instant,
}

impl<'a> Responder<'a> {
    fn new(sub: &'a SubscriptionShared, req: &BusRequest, reply_to: Option<&'a str>, started: Instant) -> Self {
        Self {
            sub,
            reply_to,
            data_subject: req.data_subject.clone(),
            req_id: req.req_id.clone(),
            transaction_id: req.transaction_id.clone(),
            started,
        }
    }

    fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    async fn error(&self, mut res: BusResponse) {
        res.req_id = self.req_id.clone();
        res.transaction_id = self.transaction_id.clone();
        res.ms = Some(self.elapsed_ms());
        res.ensure_error_id();
        res.stamp_thrower(self.sub.ctx.service_name());

        let Some(reply_to) = self.reply_to else {
            tracing::warn!(subject = %self.sub.subject(), error = %res, "error without reply address");
            return;
        };
        self.send(reply_to, res).await;
    }

    async fn success(&self, mut res: BusResponse) {
        res.req_id = self.req_id.clone();
        res.transaction_id = self.transaction_id.clone();
        res.ms = Some(self.elapsed_ms());
        if res.status == 0 {
            res.status = 200;
        }

        if let Some(schema) = self.sub.response_schema.as_deref() {
            if self.sub.options().validate_response {
                if let Err(invalid) = self.sub.ctx.schemas.validate(schema, &res.data, ValidationTarget::Response) {
                    return self.error(invalid).await;
                }
            }
        }

        let Some(reply_to) = self.reply_to else { return };

        let chunks = match self.sub.ctx.codec.prepare_outbound(&mut res) {
            Ok(chunks) => chunks,
            Err(e) => return self.error(BusResponse::internal_server_error(e.to_string())).await,
        };

        if let (false, Some(data_subject)) = (chunks.is_empty(), self.data_subject.as_deref()) {
            let total = u32::try_from(chunks.len()).unwrap_or(u32::MAX);
            res.chunks = Some(total);
            res.data = json!({});
            for (index, data) in chunks.into_iter().enumerate() {
                let piece = DataMessage {
                    req_id: self.req_id.clone(),
                    transaction_id: self.transaction_id.clone(),
                    data,
                    chunk: u32::try_from(index).unwrap_or(u32::MAX),
                    chunks: Some(total),
                };
                if let Err(e) = self.sub.ctx.publish(data_subject, &piece, None).await {
                    tracing::warn!(data_subject, error = %e, "failed to publish response chunk");
                }
            }
            tracing::debug!(subject = %self.sub.subject(), chunks = total, "response sent in chunks");
        }

        self.send(reply_to, res).await;
    }

    async fn send(&self, reply_to: &str, mut res: BusResponse) {
        res.from = Some(self.sub.ctx.origin.clone());
        if let Err(e) = self.sub.ctx.publish(reply_to, &res, None).await {
            tracing::warn!(reply_to, error = %e, "failed to publish reply");
        }
    }
}

/// Ask the requester to push its data chunks and collect them.
///
/// The data subscription is opened before the requester is told about it.
async fn receive_request_chunks(
    sub: &SubscriptionShared,
    req: &BusRequest,
    subject: &str,
    mut buffer: ChunkBuffer,
    reply_to: Option<&str>,
) -> Result<String> {
    let chunks = buffer.total();
    let ctx = &sub.ctx;
    let data_subject = request_data_subject(subject, &req.transaction_id);

    let (sid, mut stream) = ctx.transport.subscribe(&data_subject, None).await?;
    let mut guard = SubscriptionGuard::new(Arc::clone(&ctx.transport));
    guard.track(sid);

    let reply_to = reply_to
        .ok_or_else(|| BusError::InvalidSubscription("chunked request without reply address".into()))?;
    let ask = BusResponse {
        req_id: req.req_id.clone(),
        chunks: Some(u32::try_from(chunks).unwrap_or(u32::MAX)),
        data_subject: Some(data_subject.clone()),
        from: Some(ctx.origin.clone()),
        ..BusResponse::default()
    };
    ctx.publish(reply_to, &ask, None).await?;

    let deadline = tokio::time::sleep(ctx.cfg.chunk_timeout());
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => {
                return Err(BusError::Transport(format!(
                    "timed out waiting for {chunks} chunks on {data_subject}"
                )));
            }
            msg = stream.recv() => {
                let Some(msg) = msg else {
                    return Err(BusError::Transport(format!("{data_subject} closed before all chunks arrived")));
                };
                let piece: DataMessage = match codec::decode(&msg.payload) {
                    Ok(piece) => piece,
                    Err(e) => {
                        tracing::warn!(%data_subject, error = %e, "dropping undecodable chunk");
                        continue;
                    }
                };
                if let Err(e) = buffer.insert(piece.chunk, piece.data) {
                    tracing::warn!(%data_subject, error = %e, "dropping chunk");
                    continue;
                }
                if buffer.is_complete() {
                    tracing::debug!(%data_subject, chunks, "request chunks complete");
                    return Ok(buffer.join());
                }
            }
        }
    }
}
