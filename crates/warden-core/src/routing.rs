use axum::Router;

use crate::controllers::{self, AppState};

/// All API routes. Docs and the root banner are added by [`crate::App`].
pub fn build_routes() -> Router<AppState> {
    Router::new()
        .merge(controllers::auth::routes())
        .merge(controllers::sessions::routes())
        .merge(controllers::stats::routes())
}
