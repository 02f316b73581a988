pub mod health;
pub mod slack;

use axum::Router;

use crate::AppState;

/// Combine all routes
pub fn app_routes() -> Router<AppState> {
    Router::new()
        .merge(health::routes())
        .nest("/slack", slack::router())
}
