pub mod handlers;

use axum::routing::get;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};

pub use handlers::ApiState;

/// The control API, mounted under `/api/v1`.
pub fn router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route(
            "/servers",
            get(handlers::servers::handle_list).post(handlers::servers::handle_start),
        )
        .route(
            "/servers/{port}",
            axum::routing::delete(handlers::servers::handle_stop),
        )
        .route("/chunks", get(handlers::chunks::handle_list))
        .route(
            "/chunks/{id}",
            get(handlers::chunks::handle_get).delete(handlers::chunks::handle_remove),
        )
        .route(
            "/chunk_requests",
            get(handlers::chunk_requests::handle_queues)
                .post(handlers::chunk_requests::handle_submit),
        )
        .route(
            "/chunk_requests/{id}",
            get(handlers::chunk_requests::handle_get),
        )
        .with_state(state);

    Router::new().nest("/api/v1", api_routes).layer(cors)
}

pub async fn serve(state: ApiState, port: u16) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(format!("127.0.0.1:{}", port)).await?;
    tracing::info!(port, "control API listening on 127.0.0.1");
    axum::serve(listener, router(state)).await?;
    Ok(())
}
