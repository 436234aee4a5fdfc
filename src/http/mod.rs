//! 4.I HTTP surface — adapters over A-H (spec.md §4.I). Route handlers
//! validate inputs, enforce idempotency where applicable, and translate
//! every internal error enum into a structured `ApiError` response.

pub mod handlers;
pub mod state;

use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::agent::ModelProvider;
use crate::store::Store;
use state::AppState;

/// Builds the full router: lab routes, manager routes, and the
/// supplemented health/export routes, all sharing one `AppState`.
pub fn configure_app<S: Store + 'static, P: ModelProvider + 'static>(state: AppState<S, P>) -> Router {
    Router::new()
        .merge(handlers::lab::router())
        .merge(handlers::manager::router())
        .merge(handlers::system::router())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
