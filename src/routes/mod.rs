//! Router assembly.

pub mod common;
pub mod entity;

pub use common::{common_routes, common_routes_with_ready};
pub use entity::entity_routes;

use axum::Router;

use crate::state::AppState;

/// Entity routes plus health, readiness and version.
pub fn app(state: AppState, body_limit: usize) -> Router {
    common_routes_with_ready(state.clone()).merge(entity_routes(state, body_limit))
}
