use crate::config::Config;
use crate::identity::IdentityService;
use crate::rename::RenameService;
use crate::review::service::ReviewService;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub identity: IdentityService,
    pub review: ReviewService,
    /// Background propagation of display-name changes.
    pub rename: RenameService,
}
