use relaybus_core::{BusResponse, ErrorCode};

use super::permissions::{has_permission, RequiredPermissions, ScopeMap};

/// Decision from access policy evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyDecision {
    Pass,
    Reject { code: ErrorCode, detail: String },
}

impl PolicyDecision {
    /// Error reply for a rejection, `None` on pass.
    pub fn into_response(self) -> Option<BusResponse> {
        match self {
            PolicyDecision::Pass => None,
            PolicyDecision::Reject { code, detail } => Some(BusResponse::error(code, detail)),
        }
    }
}

/// Access policy of one subscription.
/// Compiled once on subscribe and on every builder update.
#[derive(Debug, Clone, Default)]
pub struct AccessPolicy {
    must_be_logged_in: bool,
    permissions: Option<RequiredPermissions>,
    compiled: Vec<ScopeMap>,
}

impl AccessPolicy {
    pub fn new(must_be_logged_in: bool, permissions: Option<RequiredPermissions>) -> Self {
        let compiled = permissions
            .as_ref()
            .map(|p| p.sets().iter().map(|set| ScopeMap::compile(set.as_slice())).collect())
            .unwrap_or_default();
        Self {
            must_be_logged_in,
            permissions,
            compiled,
        }
    }

    pub fn must_be_logged_in(&self) -> bool {
        self.must_be_logged_in
    }

    pub fn permissions(&self) -> Option<&RequiredPermissions> {
        self.permissions.as_ref()
    }

    /// Anonymous callers (no scopes) are checked before permissions, so a
    /// caller failing both gets `MUST_BE_LOGGED_IN`.
    pub fn check(&self, scopes: &[String]) -> PolicyDecision {
        if scopes.is_empty() {
            if self.must_be_logged_in || !self.compiled.is_empty() {
                return PolicyDecision::Reject {
                    code: ErrorCode::MustBeLoggedIn,
                    detail: "Must be logged in".into(),
                };
            }
            return PolicyDecision::Pass;
        }

        if has_permission(&self.compiled, scopes) {
            return PolicyDecision::Pass;
        }

        let wanted = self
            .permissions
            .as_ref()
            .map(RequiredPermissions::describe)
            .unwrap_or_default();
        PolicyDecision::Reject {
            code: ErrorCode::PermissionDenied,
            detail: format!("User does not have permission for {wanted}"),
        }
    }
}
