//! Request/response correlation.
//!
//! Every call gets a fresh transaction id and two temporary subscriptions:
//! `res.<tx>.<subject>` for replies and `_data_.res.<tx>.<subject>` for
//! response chunks. Both are dropped when the call resolves; the data one at
//! the latest after the configured grace period.

use std::future::pending;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::time::{sleep, sleep_until, Instant};
use uuid::Uuid;

use relaybus_core::error::{BusError, Result};
use relaybus_core::protocol::codec::{decompress, ChunkBuffer, GZIP};
use relaybus_core::protocol::subject::{response_data_subject, response_reply_subject};
use relaybus_core::{BusRequest, BusResponse, DataMessage, ErrorCode};

use crate::context::{self, BusContext};
use crate::transport::{codec, SubscriptionGuard};

/// `request_many` stops after this many replies unless told otherwise.
pub const DEFAULT_MAX_RESPONSES: usize = 10;

/// Collection window of `request_many` when no timeout is given.
pub const DEFAULT_COLLECT_WINDOW: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestOptions {
    /// Without a timeout a single request waits until a reply arrives.
    pub timeout: Option<Duration>,
    pub max_responses: Option<usize>,
    /// Return error-shaped replies as `Err(BusError::Response)`.
    pub throw_errors: bool,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            timeout: None,
            max_responses: None,
            throw_errors: true,
        }
    }
}

impl RequestOptions {
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn timeout_ms(self, ms: u64) -> Self {
        self.timeout(Duration::from_millis(ms))
    }

    pub fn max_responses(mut self, max: usize) -> Self {
        self.max_responses = Some(max);
        self
    }

    /// Hand error-shaped replies back as ordinary values.
    pub fn no_throw(mut self) -> Self {
        self.throw_errors = false;
        self
    }
}

/// Send `req` and wait for one reply.
pub(crate) async fn request(
    ctx: &BusContext,
    subject: &str,
    req: BusRequest,
    opts: RequestOptions,
) -> Result<BusResponse> {
    let exchange = exchange(ctx, subject, req, opts.timeout, 1).await?;
    let res = match exchange.responses.into_iter().next() {
        Some(res) => res,
        None => {
            let ms = opts.timeout.map(|t| t.as_millis()).unwrap_or_default();
            let mut res = BusResponse::error(
                ErrorCode::BusResponseTimeout,
                format!("Expected response for {subject} within {ms} ms"),
            );
            res.req_id = exchange.req_id;
            res.transaction_id = exchange.transaction_id;
            res.stamp_thrower(ctx.service_name());
            tracing::warn!(subject, timeout_ms = %ms, "request timed out");
            res
        }
    };

    if opts.throw_errors && res.is_error() {
        return Err(BusError::from(res));
    }
    Ok(res)
}

/// Send `req` and collect replies until `max_responses` arrived or the
/// collection window closes. Never fails on a timeout.
pub(crate) async fn request_many(
    ctx: &BusContext,
    subject: &str,
    req: BusRequest,
    opts: RequestOptions,
) -> Result<Vec<BusResponse>> {
    let max = opts.max_responses.unwrap_or(DEFAULT_MAX_RESPONSES).max(1);
    let exchange = exchange(ctx, subject, req, opts.timeout, max).await?;
    tracing::debug!(subject, received = exchange.responses.len(), max, "request_many finished");
    Ok(exchange.responses)
}

struct Exchange {
    req_id: String,
    transaction_id: String,
    /// Empty when the window closed before any reply.
    responses: Vec<BusResponse>,
}

/// Reply-side state of one pending call.
struct Collector<'a> {
    ctx: &'a BusContext,
    req_id: String,
    transaction_id: String,
    max_responses: usize,
    /// Response chunks received so far.
    chunks: Option<ChunkBuffer>,
    /// Chunks that arrived before their total was known.
    early: Vec<DataMessage>,
    /// A chunked reply waiting for its data.
    held: Option<BusResponse>,
    responses: Vec<BusResponse>,
}

impl Collector<'_> {
    fn is_done(&self) -> bool {
        self.responses.len() >= self.max_responses
    }

    fn on_chunk(&mut self, piece: DataMessage) {
        if self.chunks.is_none() {
            let total = piece
                .chunks
                .or_else(|| self.held.as_ref().and_then(|res| res.chunks))
                .filter(|n| *n > 0);
            let Some(total) = total else {
                if self.early.len() < self.ctx.codec.max_chunks as usize {
                    self.early.push(piece);
                } else {
                    tracing::warn!(transaction_id = %self.transaction_id, "dropping response chunk without a chunk count");
                }
                return;
            };
            match self.ctx.codec.chunk_buffer(total) {
                Ok(buffer) => self.chunks = Some(buffer),
                Err(e) => {
                    tracing::warn!(transaction_id = %self.transaction_id, error = %e, "dropping response chunk");
                    return;
                }
            }
        }
        let Some(buffer) = self.chunks.as_mut() else { return };
        if let Err(e) = buffer.insert(piece.chunk, piece.data) {
            tracing::warn!(transaction_id = %self.transaction_id, error = %e, "dropping response chunk");
            return;
        }
        if buffer.is_complete() {
            if let Some(res) = self.held.take() {
                self.finish_chunked(res);
            }
        }
    }

    fn on_reply(&mut self, res: BusResponse) {
        let Some(total) = res.chunks.filter(|n| *n > 0) else {
            return self.finalize(res, None);
        };
        if self.chunks.is_none() {
            match self.ctx.codec.chunk_buffer(total) {
                Ok(buffer) => self.chunks = Some(buffer),
                Err(e) => {
                    let failed = self.encoding_error(e.to_string());
                    return self.finalize(failed, None);
                }
            }
        }
        self.held = Some(res);
        for piece in std::mem::take(&mut self.early) {
            self.on_chunk(piece);
        }
        if self.chunks.as_ref().is_some_and(ChunkBuffer::is_complete) {
            if let Some(res) = self.held.take() {
                self.finish_chunked(res);
            }
        }
    }

    fn finish_chunked(&mut self, res: BusResponse) {
        let joined = self.chunks.take().map(|buffer| buffer.join());
        self.finalize(res, joined);
    }

    fn encoding_error(&self, detail: String) -> BusResponse {
        let mut res = BusResponse::error(ErrorCode::InvalidDataEncoding, detail);
        res.transaction_id = self.transaction_id.clone();
        res.stamp_thrower(self.ctx.service_name());
        res
    }

    fn finalize(&mut self, mut res: BusResponse, joined: Option<String>) {
        res.chunks = None;
        if let Some(encoding) = res.data_encoding.take() {
            let encoded = joined.or_else(|| res.data.as_str().map(str::to_string));
            let decoded = match (encoding == GZIP, encoded) {
                (false, _) => Err(format!("Cannot decompress data, unrecognized data encoding: {encoding}")),
                (true, None) => Err("compressed data must be a base64 string".to_string()),
                (true, Some(encoded)) => decompress(&encoded).map_err(|e| e.to_string()),
            };
            match decoded {
                Ok(data) => res.data = data,
                Err(detail) => res = self.encoding_error(detail),
            }
        } else if let Some(joined) = joined {
            res.data = Value::String(joined);
        }
        res.req_id = self.req_id.clone();
        self.responses.push(res);
    }
}

async fn exchange(
    ctx: &BusContext,
    subject: &str,
    mut req: BusRequest,
    timeout: Option<Duration>,
    max_responses: usize,
) -> Result<Exchange> {
    let transaction_id = Uuid::new_v4().to_string();
    let req_id = if req.req_id.is_empty() {
        context::current_req_id().unwrap_or_else(|| Uuid::new_v4().to_string())
    } else {
        req.req_id.clone()
    };
    let reply_to = response_reply_subject(subject, &transaction_id);
    let reply_data = response_data_subject(subject, &transaction_id);

    let mut guard = SubscriptionGuard::new(Arc::clone(&ctx.transport));
    let (data_sid, mut data_rx) = ctx.transport.subscribe(&reply_data, None).await?;
    guard.track(data_sid);
    let (reply_sid, mut reply_rx) = ctx.transport.subscribe(&reply_to, None).await?;
    guard.track(reply_sid);

    req.req_id = req_id.clone();
    req.transaction_id = transaction_id.clone();
    req.from = Some(ctx.origin.clone());
    let request_chunks = ctx.codec.prepare_outbound(&mut req)?;
    if !request_chunks.is_empty() {
        req.chunks = Some(u32::try_from(request_chunks.len()).unwrap_or(u32::MAX));
        req.data = json!({});
    }
    req.data_subject = Some(reply_data.clone());

    ctx.publish(subject, &req, Some(&reply_to)).await?;
    tracing::debug!(subject, %transaction_id, chunks = request_chunks.len(), "request sent");

    let window = timeout.or((max_responses > 1).then_some(DEFAULT_COLLECT_WINDOW));
    let deadline = async move {
        match window {
            Some(window) => sleep_until(Instant::now() + window).await,
            None => pending::<()>().await,
        }
    };
    tokio::pin!(deadline);
    let grace = sleep(ctx.cfg.data_reply_grace());
    tokio::pin!(grace);
    let mut data_open = true;

    let mut collector = Collector {
        ctx,
        req_id,
        transaction_id,
        max_responses,
        chunks: None,
        early: Vec::new(),
        held: None,
        responses: Vec::new(),
    };

    while !collector.is_done() {
        tokio::select! {
            _ = &mut deadline => break,
            _ = &mut grace, if data_open => {
                guard.release(data_sid);
                data_open = false;
            }
            msg = data_rx.recv(), if data_open => {
                let Some(msg) = msg else {
                    data_open = false;
                    continue;
                };
                match codec::decode::<DataMessage>(&msg.payload) {
                    Ok(piece) => collector.on_chunk(piece),
                    Err(e) => tracing::warn!(subject = %msg.subject, error = %e, "dropping undecodable chunk"),
                }
            }
            msg = reply_rx.recv() => {
                let Some(msg) = msg else {
                    return Err(BusError::Transport(format!("reply subscription on {reply_to} closed")));
                };
                let res: BusResponse = match codec::decode(&msg.payload) {
                    Ok(res) => res,
                    Err(e) => {
                        tracing::warn!(subject = %msg.subject, error = %e, "dropping undecodable reply");
                        continue;
                    }
                };
                if let (true, Some(data_subject)) = (is_chunk_request(&res), res.data_subject.as_deref()) {
                    if request_chunks.is_empty() {
                        tracing::warn!(subject, %data_subject, "asked for request chunks that were never split, ignoring");
                    } else {
                        push_request_chunks(ctx, data_subject, &res.req_id, &request_chunks).await?;
                    }
                    continue;
                }
                collector.on_reply(res);
            }
        }
    }

    Ok(Exchange {
        req_id: collector.req_id,
        transaction_id: collector.transaction_id,
        responses: collector.responses,
    })
}

/// The responder asks for the request data instead of answering.
fn is_chunk_request(res: &BusResponse) -> bool {
    res.chunks.is_some_and(|n| n > 0) && res.status == 0 && res.error.is_none()
}

async fn push_request_chunks(ctx: &BusContext, data_subject: &str, req_id: &str, chunks: &[String]) -> Result<()> {
    let total = u32::try_from(chunks.len()).unwrap_or(u32::MAX);
    for (index, data) in chunks.iter().enumerate() {
        let piece = DataMessage {
            req_id: req_id.to_string(),
            data: data.clone(),
            chunk: u32::try_from(index).unwrap_or(u32::MAX),
            chunks: Some(total),
            ..DataMessage::default()
        };
        ctx.publish(data_subject, &piece, None).await?;
    }
    tracing::debug!(data_subject, chunks = total, "request chunks pushed");
    Ok(())
}
