use crate::security::service::SecurityService;
use crate::storage::users::UserDirectory;
use std::sync::Arc;

/// Application state shared by every handler and guard chain
#[derive(Clone)]
pub struct AppState {
    /// Sessions, rate limits, credentials and audit
    pub security: Arc<SecurityService>,
    /// Identity lookups for login and role checks
    pub users: Arc<dyn UserDirectory>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("security", &self.security)
            .field("users", &"Arc<dyn UserDirectory>")
            .finish()
    }
}

impl AppState {
    /// Create new application state
    pub fn new(security: Arc<SecurityService>, users: Arc<dyn UserDirectory>) -> Self {
        Self { security, users }
    }
}
