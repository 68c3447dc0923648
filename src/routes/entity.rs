//! Generic entity routes. The schema and entity come from the path; the
//! registry decides whether they exist.

use axum::{routing::get, Router};
use tower::ServiceBuilder;
use tower_http::limit::RequestBodyLimitLayer;

use crate::handlers::entity::{list, metadata, method_not_allowed, post, post_by_id, read};
use crate::state::AppState;

pub fn entity_routes(state: AppState, body_limit: usize) -> Router {
    Router::new()
        .route(
            "/:schema/:entity",
            get(list).post(post).fallback(method_not_allowed),
        )
        .route(
            "/:schema/:entity/metadata",
            get(metadata).fallback(method_not_allowed),
        )
        .route(
            "/:schema/:entity/:id",
            get(read).post(post_by_id).fallback(method_not_allowed),
        )
        .layer(ServiceBuilder::new().layer(RequestBodyLimitLayer::new(body_limit)))
        .with_state(state)
}
