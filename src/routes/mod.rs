use axum::http::HeaderValue;
use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::{auth::AuthenticatedUser, state::AppState};

pub mod documents;
pub mod health;
pub mod me;
pub mod organizations;
pub mod revisions;

pub fn create_router(state: AppState) -> Router<()> {
    let allow_origin = match state.config.cors_allowed_origin.as_ref() {
        Some(origins) => AllowOrigin::list(
            origins
                .split(',')
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .filter_map(|value| value.parse::<HeaderValue>().ok()),
        ),
        None => AllowOrigin::mirror_request(),
    };
    let cors = CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true);

    let documents_routes = Router::new()
        .route("/", post(documents::create_document))
        .route(
            "/:id",
            get(documents::get_document).patch(documents::update_document),
        )
        .route("/:id/sign", post(documents::sign_document))
        .route("/:id/sealed-fields", get(documents::sealed_fields))
        .route("/:id/revisions", post(revisions::create_revision));

    let revisions_routes = Router::new()
        .route("/:id", get(revisions::get_revision))
        .route("/:id/approvals", post(revisions::decide_revision))
        .route("/:id/cancel", post(revisions::cancel_revision))
        .route("/:id/events", get(revisions::revision_events));

    let organizations_routes = Router::new()
        .route("/:org_id/revisions", get(revisions::list_org_revisions))
        .route(
            "/:org_id/members/:user_id",
            put(organizations::set_member_role).delete(organizations::remove_member),
        );

    let protected_state = state.clone();
    let protected_routes = Router::new()
        .nest("/api/documents", documents_routes)
        .nest("/api/revisions", revisions_routes)
        .nest("/api/organizations", organizations_routes)
        .route("/api/me", get(me::me))
        .layer(middleware::from_extractor_with_state::<AuthenticatedUser, _>(protected_state));

    Router::new()
        .merge(protected_routes)
        .route("/api/health", get(health::health_check))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}
