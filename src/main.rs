use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post, put};
use axum::{middleware, Router};
use std::net::SocketAddr;
use std::sync::Arc;

mod auth;
mod broker;
mod checkin;
mod config;
mod contract;
mod error;
mod escrow;
mod handlers;
mod milestone;
mod models;
mod notify;
mod store;

use handlers::AppState;

async fn authenticate(
    headers: HeaderMap,
    State(state): State<AppState>,
    mut request: axum::http::Request<axum::body::Body>,
    next: middleware::Next,
) -> Result<axum::response::Response, (StatusCode, String)> {
    let auth_header = headers.get("Authorization").ok_or((
        StatusCode::UNAUTHORIZED,
        "Missing Authorization header".to_string(),
    ))?;
    let token = auth_header
        .to_str()
        .ok()
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or((
            StatusCode::UNAUTHORIZED,
            "Invalid Authorization header format".to_string(),
        ))?;
    let claims = auth::validate_token(token, &state.config.jwt_secret).map_err(|_| {
        (
            StatusCode::UNAUTHORIZED,
            "Invalid or expired token".to_string(),
        )
    })?;
    log::info!("Authenticated user: {} ({:?})", claims.sub, claims.role);
    request.extensions_mut().insert(auth::AuthUser {
        id: claims.sub,
        role: claims.role,
    });
    Ok(next.run(request).await)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info");
    }
    env_logger::init();

    let config = config::AppConfig::load()?;
    log::info!(
        "Loaded config: port={} radius={}m platform_fee={}bps",
        config.port,
        config.checkin_radius_m,
        config.platform_fee_bps
    );

    let addr = SocketAddr::from(([127, 0, 0, 1], config.port));
    let store = Arc::new(store::Store::new(config.settings()));
    let state = AppState { config, store };

    let protected_routes = Router::new()
        .route("/api/projects", post(handlers::create_project).get(handlers::list_projects))
        .route(
            "/api/projects/:id",
            get(handlers::get_project)
                .put(handlers::update_project)
                .delete(handlers::delete_project),
        )
        .route("/api/projects/:id/fund", post(handlers::fund_project))
        .route("/api/milestones/:id/submit", post(handlers::submit_milestone))
        .route("/api/milestones/:id/approve", post(handlers::approve_milestone))
        .route("/api/milestones/:id/request-changes", post(handlers::request_changes))
        .route("/api/check-in", post(handlers::check_in))
        .route("/api/check-out", post(handlers::check_out))
        .route(
            "/api/check-in-status/:project_id/:user_id",
            get(handlers::check_in_status),
        )
        .route("/api/applications", post(handlers::apply))
        .route("/api/applications/:id/decide", post(handlers::decide_application))
        .route("/api/applications/:id/withdraw", post(handlers::withdraw_application))
        .route("/api/gigs", post(handlers::post_gig).get(handlers::list_gigs))
        .route("/api/contracts", post(handlers::create_contract))
        .route("/api/contracts/:id", get(handlers::get_contract))
        .route("/api/contracts/:id/sign", post(handlers::sign_contract))
        .route("/api/contracts/:id/status", put(handlers::set_contract_status))
        .route("/api/notifications/:user_id", get(handlers::list_notifications))
        .route("/api/notifications/mark-read", post(handlers::mark_read))
        .route("/api/admin/audit", get(handlers::audit_log))
        .route("/api/admin/analytics", get(handlers::analytics))
        .layer(middleware::from_fn_with_state(state.clone(), authenticate));

    let app = Router::new()
        .route("/", get(|| async { "Hello, BuildEscrow Marketplace!" }))
        .route("/api/login", post(handlers::login))
        .merge(protected_routes)
        .with_state(state);

    log::info!("Starting server on {}", addr);
    axum::serve(
        tokio::net::TcpListener::bind(addr).await?,
        app.into_make_service(),
    )
    .await?;

    Ok(())
}
