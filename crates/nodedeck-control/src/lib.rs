//! HTTP and WebSocket front of the project runner.

pub mod auth;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod logs_ws;
pub mod security;
pub mod servers;
pub mod state;
pub mod store;

#[cfg(test)]
mod test_support;

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, State},
    middleware,
    routing::{get, post, put},
};
use serde::Serialize;

use crate::state::AppState;

#[derive(Debug, Serialize)]
struct HealthzResponse {
    status: &'static str,
    version: &'static str,
    processes: usize,
}

async fn healthz(State(state): State<AppState>) -> Json<HealthzResponse> {
    Json(HealthzResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        processes: state.registry.list().await.len(),
    })
}

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route(
            "/servers",
            get(servers::list_servers).post(servers::create_server),
        )
        .route(
            "/servers/:id",
            get(servers::get_server)
                .patch(servers::update_server)
                .delete(servers::delete_server),
        )
        .route("/servers/:id/start", post(servers::start_server))
        .route("/servers/:id/stop", post(servers::stop_server))
        .route("/servers/:id/restart", post(servers::restart_server))
        .route(
            "/servers/:id/upload",
            put(servers::upload_project)
                .layer(DefaultBodyLimit::max(state.config.max_upload_bytes)),
        )
        .route(
            "/servers/:id/files",
            get(servers::list_files).delete(servers::delete_file),
        )
        .route("/servers/:id/files/move", post(servers::move_file));

    let protected = Router::new()
        .nest("/api", api)
        .route("/ws", get(logs_ws::logs_ws))
        .route("/auth/whoami", get(auth::whoami))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            security::require_auth,
        ));

    Router::new()
        .route("/healthz", get(healthz))
        .route("/auth/login", post(auth::login))
        .route("/auth/logout", post(auth::logout))
        .merge(protected)
        .layer(middleware::from_fn(security::request_id))
        .with_state(state)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::test_support::{setup, zip_with_bot};
    use axum::{
        body::Body,
        http::{Request, StatusCode, header},
        response::Response,
    };
    use futures_util::StreamExt;
    use nodedeck_process::LogEnvelope;
    use serde_json::json;
    use std::{collections::BTreeMap, net::SocketAddr, time::Duration};
    use tokio_tungstenite::{
        MaybeTlsStream, WebSocketStream,
        tungstenite::{self, client::IntoClientRequest},
    };
    use tower::ServiceExt;

    type LogSocket = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

    async fn body_json(resp: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn json_request(
        method: &str,
        uri: &str,
        cookie: Option<&str>,
        body: serde_json::Value,
    ) -> Request<Body> {
        let mut b = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(c) = cookie {
            b = b.header(header::COOKIE, c);
        }
        b.body(Body::from(body.to_string())).unwrap()
    }

    fn empty_request(method: &str, uri: &str, cookie: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::COOKIE, cookie)
            .body(Body::empty())
            .unwrap()
    }

    async fn open_log_socket(
        addr: SocketAddr,
        server_id: &str,
        cookie: Option<&str>,
    ) -> Result<LogSocket, tungstenite::Error> {
        let mut req = format!("ws://{addr}/ws?serverId={server_id}").into_client_request()?;
        if let Some(c) = cookie {
            req.headers_mut().insert("Cookie", c.parse().unwrap());
        }
        let (ws, _) = tokio_tungstenite::connect_async(req).await?;
        Ok(ws)
    }

    async fn wait_for_subscribers(state: &AppState, topic: &str, wanted: usize) -> bool {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            if state.hub.subscriber_count(topic).await == wanted {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    #[tokio::test]
    async fn api_rejects_requests_without_a_session() {
        let (state, root) = setup("router-unauth").await;
        let app = router(state);

        let resp = app
            .clone()
            .oneshot(Request::get("/api/servers").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert!(resp.headers().contains_key(security::REQUEST_ID_HEADER));
        assert_eq!(body_json(resp).await["message"], "missing access token");

        let resp = app
            .clone()
            .oneshot(empty_request("GET", "/api/servers", "access=not.a.jwt"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(resp).await["message"], "invalid access token");

        let resp = app
            .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn login_create_cap_and_start_through_the_router() {
        let (state, root) = setup("router-flow").await;
        let app = router(state.clone());

        let resp = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/auth/login",
                None,
                json!({ "username": "admin", "password": "wrong" }),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let resp = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/auth/login",
                None,
                json!({ "username": "admin", "password": "admin" }),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let cookie = resp
            .headers()
            .get(header::SET_COOKIE)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(';').next())
            .unwrap()
            .to_string();
        assert!(cookie.starts_with("access="), "{cookie}");

        let resp = app
            .clone()
            .oneshot(empty_request("GET", "/auth/whoami", &cookie))
            .await
            .unwrap();
        assert_eq!(body_json(resp).await["userId"], "admin");

        let mut ids = Vec::new();
        for name in ["one", "two", "three"] {
            let resp = app
                .clone()
                .oneshot(json_request(
                    "POST",
                    "/api/servers",
                    Some(cookie.as_str()),
                    json!({ "name": name }),
                ))
                .await
                .unwrap();
            assert_eq!(resp.status(), StatusCode::CREATED);
            let body = body_json(resp).await;
            assert_eq!(body["status"], "stopped");
            ids.push(body["id"].as_str().unwrap().to_string());
        }

        let resp = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/servers",
                Some(cookie.as_str()),
                json!({ "name": "four" }),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let message = body_json(resp).await["message"].as_str().unwrap().to_string();
        assert!(message.contains("limit"), "{message}");

        let resp = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("PUT")
                    .uri(format!("/api/servers/{}/upload", ids[0]))
                    .header(header::COOKIE, &cookie)
                    .body(Body::from(zip_with_bot("echo hi\nsleep 5\n")))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await["files"], 1);

        let resp = app
            .clone()
            .oneshot(empty_request(
                "POST",
                &format!("/api/servers/{}/start", ids[0]),
                &cookie,
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["status"], "running");
        assert!(body["processId"].is_string());

        let resp = app
            .clone()
            .oneshot(empty_request(
                "POST",
                &format!("/api/servers/{}/start", ids[0]),
                &cookie,
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CONFLICT);

        let resp = app
            .oneshot(empty_request(
                "POST",
                &format!("/api/servers/{}/stop", ids[0]),
                &cookie,
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["status"], "stopped");
        assert!(body["processId"].is_null());

        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn log_socket_streams_only_the_owned_server() {
        let (state, root) = setup("router-ws").await;
        let lc = &state.lifecycle;
        let mine = lc.create_server("admin", "bot", BTreeMap::new()).await.unwrap();
        let quiet = lc.create_server("admin", "quiet", BTreeMap::new()).await.unwrap();
        let foreign = lc.create_server("bob", "theirs", BTreeMap::new()).await.unwrap();
        lc.upload_project("admin", &mine.id, &zip_with_bot("echo hi\nsleep 5\n"))
            .await
            .unwrap();

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = router(state.clone());
        let server = tokio::spawn(async move { axum::serve(listener, app).await });

        let token = auth::make_access_jwt(&state.config.jwt_secret, "admin").unwrap();
        let cookie = format!("access={token}");

        assert!(open_log_socket(addr, &mine.id, None).await.is_err());
        assert!(open_log_socket(addr, &foreign.id, Some(cookie.as_str())).await.is_err());
        assert!(open_log_socket(addr, "missing", Some(cookie.as_str())).await.is_err());

        let mut ws = open_log_socket(addr, &mine.id, Some(cookie.as_str())).await.unwrap();
        let mut other = open_log_socket(addr, &quiet.id, Some(cookie.as_str())).await.unwrap();
        assert!(wait_for_subscribers(&state, &mine.id, 1).await);
        assert!(wait_for_subscribers(&state, &quiet.id, 1).await);

        lc.start_server("admin", &mine.id).await.unwrap();

        let line = tokio::time::timeout(Duration::from_secs(10), async {
            while let Some(Ok(msg)) = ws.next().await {
                let Ok(text) = msg.to_text() else { continue };
                if let Ok(env) = serde_json::from_str::<LogEnvelope>(text)
                    && env.message == "[stdout] hi"
                {
                    return Some(env);
                }
            }
            None
        })
        .await
        .ok()
        .flatten()
        .expect("stdout line over the socket");
        assert_eq!(line.kind, "log");

        assert!(
            tokio::time::timeout(Duration::from_millis(500), other.next())
                .await
                .is_err()
        );

        ws.close(None).await.unwrap();
        assert!(wait_for_subscribers(&state, &mine.id, 0).await);

        lc.stop_server("admin", &mine.id).await.unwrap();
        server.abort();
        let _ = std::fs::remove_dir_all(&root);
    }
}
