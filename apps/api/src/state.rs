use sqlx::PgPool;

use crate::automation::session::AutomationService;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    /// Runs attempts; also exposes the profile store and artifact storage it
    /// was built with.
    pub automation: AutomationService,
}
