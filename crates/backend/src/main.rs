mod config;
mod graphql;
mod poller;
mod push;
mod service;
mod sources;

use std::sync::Arc;

use async_graphql_axum::{GraphQLRequest, GraphQLResponse};
use axum::{extract::State, response::Html, routing::get, Router};
use tower_http::cors::CorsLayer;
use tracing_subscriber::EnvFilter;

use config::Config;
use graphql::Schema;
use push::PushHub;
use service::MapService;
use sources::{SnapshotSource, TrackingClient};

async fn graphql_handler(State(schema): State<Schema>, req: GraphQLRequest) -> GraphQLResponse {
    schema.execute(req.into_inner()).await.into()
}

async fn graphiql() -> Html<String> {
    Html(
        async_graphql::http::GraphiQLSource::build()
            .endpoint("/graphql")
            .finish(),
    )
}

async fn healthz() -> &'static str {
    "ok"
}

/// Build the full application router.
fn build_app(schema: Schema) -> Router {
    Router::new()
        .route("/graphql", get(graphiql).post(graphql_handler))
        .route("/healthz", get(healthz))
        .with_state(schema)
        .layer(CorsLayer::permissive())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .compact()
        .init();
}

#[tokio::main]
async fn main() {
    init_tracing();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Invalid configuration");
            std::process::exit(1);
        }
    };

    if let Err(e) = run(config).await {
        tracing::error!(error = %e, "Server failed");
        std::process::exit(1);
    }
}

async fn run(config: Config) -> std::io::Result<()> {
    let hub = PushHub::new();
    let source = SnapshotSource::from_config(&config.snapshot);
    let provider = config.tracking.as_ref().map(|tracking| {
        tracing::info!(url = %tracking.base_url, interval = ?tracking.interval, "Position polling enabled");
        (Arc::new(TrackingClient::new(tracking)), tracking.interval)
    });
    let (handle, service_task) = MapService::spawn(source, provider, &hub);

    let schema = graphql::build_schema(handle.clone(), hub);
    let app = build_app(schema);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "Server running");
    tracing::info!("GraphiQL playground at http://localhost:{}/graphql", config.port);

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutting down");
        })
        .await;

    let _ = handle.shutdown().await;
    let _ = service_task.await;
    served
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::tests::FakeProvider;
    use axum::body::Body;
    use axum::http::{header, Method, Request, StatusCode};
    use tower::ServiceExt;

    /// Serve a schema backed by a real service loading `fleet.json` from a temp dir.
    async fn test_app() -> (Router, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("fleet.json"),
            r#"{"office": {"longitude": 78.0, "latitude": 20.0}, "vehicles": [{"id": "1"}]}"#,
        )
        .unwrap();
        let hub = PushHub::new();
        let source = SnapshotSource::File(dir.path().join("fleet.json"));
        let (handle, _task) = MapService::<FakeProvider>::spawn(source, None, &hub);
        handle.reload().await.unwrap();
        (build_app(graphql::build_schema(handle, hub)), dir)
    }

    #[tokio::test]
    async fn test_healthz() {
        let (app, _dir) = test_app().await;
        let resp = app
            .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_graphiql_served_on_get() {
        let (app, _dir) = test_app().await;
        let resp = app
            .oneshot(Request::builder().uri("/graphql").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let ct = resp.headers().get(header::CONTENT_TYPE).unwrap().to_str().unwrap();
        assert!(ct.starts_with("text/html"));
    }

    #[tokio::test]
    async fn test_graphql_post_returns_markers() {
        let (app, _dir) = test_app().await;
        let resp = app
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/graphql")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"query": "{ markers { id } }"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(
            body["data"]["markers"],
            serde_json::json!([{"id": "office"}, {"id": "vehicle-1"}])
        );
    }

    #[tokio::test]
    async fn test_cors_allows_any_origin() {
        let (app, _dir) = test_app().await;
        let resp = app
            .oneshot(
                Request::builder()
                    .uri("/healthz")
                    .header(header::ORIGIN, "https://dispatch.example.com")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(
            resp.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
            "*"
        );
    }
}
