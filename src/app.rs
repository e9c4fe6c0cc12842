use std::net::SocketAddr;

use axum::{
    http::{
        header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, COOKIE},
        HeaderValue, Method,
    },
    routing::get,
    Router,
};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};

use crate::{analytics, auth, chat, config::AppConfig, content, site, state::AppState, users};

pub fn build_app(state: AppState) -> Router {
    let cors = cors_layer(&state.config);
    let uploads = ServeDir::new(&state.config.storage.upload_dir);

    Router::new()
        .route("/", get(|| async { "API RUNNING..." }))
        .merge(auth::router(&state))
        .merge(users::router(&state))
        .merge(chat::router(&state))
        .merge(content::router(&state))
        .merge(analytics::router(&state))
        .merge(site::router(&state))
        .nest_service("/uploads", uploads)
        .with_state(state)
        .layer(cors)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    let method = req.method().clone();
                    let uri = req.uri().clone();
                    tracing::info_span!("http_request", %method, uri = %uri, status = tracing::field::Empty)
                })
                .on_response(
                    |res: &axum::http::Response<_>,
                     _latency: std::time::Duration,
                     span: &tracing::Span| {
                        let status = res.status();
                        span.record("status", tracing::field::display(status));
                        if status.is_server_error() {
                            tracing::error!(%status, "response");
                        } else {
                            tracing::info!(%status, "response");
                        }
                    },
                ),
        )
}

/// Credentialed CORS for the configured origins, permissive when none are set.
fn cors_layer(config: &AppConfig) -> CorsLayer {
    let exact = config.cors_allowed_origins.clone();
    let prefixes = config.cors_allowed_origin_prefixes.clone();
    if exact.is_empty() && prefixes.is_empty() {
        return CorsLayer::permissive();
    }

    CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(move |origin: &HeaderValue, _| {
            origin_allowed(origin, &exact, &prefixes)
        }))
        .allow_credentials(true)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([ACCEPT, AUTHORIZATION, CONTENT_TYPE, COOKIE])
}

fn origin_allowed(origin: &HeaderValue, exact: &[String], prefixes: &[String]) -> bool {
    let Ok(origin) = origin.to_str() else {
        return false;
    };
    exact.iter().any(|o| o == origin) || prefixes.iter().any(|p| origin.starts_with(p.as_str()))
}

pub async fn serve(app: Router) -> anyhow::Result<()> {
    let addr: SocketAddr = format!(
        "{}:{}",
        std::env::var("APP_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
        std::env::var("APP_PORT").unwrap_or_else(|_| "8080".into())
    )
    .parse()?;

    tracing::info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
    };
    use tower::ServiceExt;

    use super::*;

    #[test]
    fn origins_match_exactly_or_by_prefix() {
        let exact = vec!["https://intranet.example.com".to_string()];
        let prefixes = vec!["http://192.168.".to_string()];
        let ok = |o: &'static str| origin_allowed(&HeaderValue::from_static(o), &exact, &prefixes);

        assert!(ok("https://intranet.example.com"));
        assert!(ok("http://192.168.1.20:3000"));
        assert!(!ok("https://intranet.example.com.evil.io"));
        assert!(!ok("http://10.0.0.1"));
    }

    #[tokio::test]
    async fn root_reports_running() {
        let app = build_app(AppState::fake());
        let res = app
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let body = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"API RUNNING...");
    }
}
