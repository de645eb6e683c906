//! Ambient per-message context.
//!
//! Scoped around each handler invocation so nested `request` calls made by a
//! handler inherit the inbound `reqId` without threading it by hand.

use std::future::Future;

use relaybus_core::User;

tokio::task_local! {
    static REQUEST_CONTEXT: RequestContext;
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestContext {
    pub req_id: String,
    pub user: Option<User>,
    /// Actual subject the message arrived on.
    pub subject: String,
    pub reply_to: Option<String>,
}

/// Run `fut` with `ctx` as the ambient request context.
pub async fn scope<F: Future>(ctx: RequestContext, fut: F) -> F::Output {
    REQUEST_CONTEXT.scope(ctx, fut).await
}

pub fn current() -> Option<RequestContext> {
    REQUEST_CONTEXT.try_with(Clone::clone).ok()
}

pub fn current_req_id() -> Option<String> {
    REQUEST_CONTEXT
        .try_with(|c| c.req_id.clone())
        .ok()
        .filter(|id| !id.is_empty())
}

pub fn current_user() -> Option<User> {
    REQUEST_CONTEXT.try_with(|c| c.user.clone()).ok().flatten()
}

pub fn current_subject() -> Option<String> {
    REQUEST_CONTEXT.try_with(|c| c.subject.clone()).ok()
}
