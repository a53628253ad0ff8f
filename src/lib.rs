pub mod commands;
pub mod config;
pub mod db;
pub mod error;
pub mod import;
pub mod middleware;
pub mod models;

use anyhow::Context;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;

use crate::config::Config;
use crate::db::Database;
use crate::import::ImportSessions;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Database>,
    pub imports: Arc<ImportSessions>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(db: Database, config: Config) -> Self {
        AppState {
            db: Arc::new(db),
            imports: Arc::new(ImportSessions::new(config.import_session_ttl)),
            config: Arc::new(config),
        }
    }
}

pub fn router(state: AppState) -> Router {
    let body_limit = state.config.max_upload_bytes;

    let api = Router::new()
        .route(
            "/trades",
            get(commands::list_trades)
                .post(commands::create_trade)
                .put(commands::update_trade)
                .delete(commands::delete_trade),
        )
        .route("/trades/month", get(commands::monthly_summary))
        .route("/trades/stats", get(commands::trade_stats))
        .route("/trades/:id", get(commands::get_trade))
        .route("/docs", get(commands::get_docs))
        .route("/imports", post(commands::upload_import))
        .route(
            "/imports/:id",
            get(commands::get_import).delete(commands::discard_import),
        )
        .route("/imports/:id/commit", post(commands::commit_import));

    Router::new()
        .nest("/api", api)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(axum::middleware::from_fn(middleware::cors))
        .layer(axum::middleware::from_fn(middleware::log_requests))
        .with_state(state)
}

fn open_database(config: &Config) -> anyhow::Result<Database> {
    if let Some(parent) = config.database_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create database directory {:?}", parent))?;
    }

    log::info!("Database path: {:?}", config.database_path);

    Database::new(&config.database_path).map_err(|e| {
        let backups = config
            .database_path
            .parent()
            .map(|p| p.join("backups"))
            .unwrap_or_else(|| "backups".into());
        log::error!("Database initialization failed: {}", e);
        log::error!("This might be due to a failed migration or database corruption.");
        log::error!("Pre-migration backups are kept in {:?}.", backups);
        log::error!(
            "To recover, stop the server, replace {:?} with the most recent backup and start again.",
            config.database_path
        );
        anyhow::anyhow!("Database initialization failed: {}", e)
    })
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    log::info!("Shutdown signal received");
}

/// Opens the database, binds the listener and serves until Ctrl-C.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let database = open_database(&config)?;
    let bind_addr = config.bind_addr;
    let app = router(AppState::new(database, config));

    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", bind_addr))?;
    log::info!("Listening on http://{}/api", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Method, Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn app() -> Router {
        let config = Config {
            public_url: "http://ledger.test/api".to_string(),
            max_upload_bytes: 64 * 1024,
            ..Config::default()
        };
        router(AppState::new(Database::in_memory().unwrap(), config))
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    fn json_request(method: Method, uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn empty_request(method: Method, uri: &str) -> Request<Body> {
        Request::builder().method(method).uri(uri).body(Body::empty()).unwrap()
    }

    const BOUNDARY: &str = "ledger-test-boundary";

    fn upload_request(file_name: &str, contents: &[u8]) -> Request<Body> {
        let mut body = Vec::new();
        body.extend_from_slice(
            format!(
                "--{b}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{f}\"\r\nContent-Type: text/csv\r\n\r\n",
                b = BOUNDARY,
                f = file_name
            )
            .as_bytes(),
        );
        body.extend_from_slice(contents);
        body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());

        Request::builder()
            .method(Method::POST)
            .uri("/api/imports")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .body(Body::from(body))
            .unwrap()
    }

    fn trade_body(idu: &str) -> Value {
        json!({
            "idu": idu,
            "data": "2024-01-15",
            "ativo": "BTC",
            "direcao": "long",
            "percentual": "2.5",
            "alvo": 3
        })
    }

    #[tokio::test]
    async fn test_trade_crud_flow() {
        let app = app();

        let (status, created) = send(&app, json_request(Method::POST, "/api/trades", trade_body("T-1"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(created["idu"], "T-1");
        assert_eq!(created["direcao"], "LONG");
        assert_eq!(created["percentual"], 2.5);
        let id = created["id"].as_i64().unwrap();

        let (status, body) = send(&app, json_request(Method::POST, "/api/trades", trade_body("T-1"))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Trade with this IDU already exists");

        let (status, fetched) = send(&app, empty_request(Method::GET, &format!("/api/trades/{}", id))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(fetched["ativo"], "BTC");

        let mut update = trade_body("T-1b");
        update["id"] = json!(id);
        update["alvo"] = json!("n/a");
        let (status, updated) = send(&app, json_request(Method::PUT, "/api/trades", update)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(updated["idu"], "T-1b");
        assert_eq!(updated["alvo"], 0.0);

        let (status, body) = send(&app, empty_request(Method::DELETE, &format!("/api/trades?id={}", id))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Trade deleted successfully");

        let (status, body) = send(&app, empty_request(Method::GET, &format!("/api/trades/{}", id))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Trade not found");
    }

    #[tokio::test]
    async fn test_update_rejects_idu_held_by_another_trade() {
        let app = app();
        send(&app, json_request(Method::POST, "/api/trades", trade_body("A"))).await;
        let (_, second) = send(&app, json_request(Method::POST, "/api/trades", trade_body("B"))).await;

        let mut update = trade_body("A");
        update["id"] = second["id"].clone();
        let (status, body) = send(&app, json_request(Method::PUT, "/api/trades", update)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Trade with IDU A already exists");

        let mut missing = trade_body("C");
        missing["id"] = json!(999);
        let (status, _) = send(&app, json_request(Method::PUT, "/api/trades", missing)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_request_errors() {
        let app = app();

        let (status, body) = send(&app, empty_request(Method::GET, "/api/trades/abc")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Invalid ID format");

        let (status, body) = send(&app, empty_request(Method::DELETE, "/api/trades")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "ID is required");

        let (status, _) = send(&app, empty_request(Method::DELETE, "/api/trades?id=42")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(&app, empty_request(Method::GET, "/api/trades?page=0")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(&app, empty_request(Method::GET, "/api/trades?orderBy=secret")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let bad_json = Request::builder()
            .method(Method::POST)
            .uri("/api/trades")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let (status, body) = send(&app, bad_json).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn test_listing_paginates_and_filters() {
        let app = app();
        for (idu, ativo) in [("L1", "BTC"), ("L2", "ETH"), ("L3", "BTCUSDT")] {
            let mut body = trade_body(idu);
            body["ativo"] = json!(ativo);
            send(&app, json_request(Method::POST, "/api/trades", body)).await;
        }

        let (status, page) = send(&app, empty_request(Method::GET, "/api/trades?limit=2&orderBy=idu&order=asc")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(page["data"].as_array().unwrap().len(), 2);
        assert_eq!(page["data"][0]["idu"], "L1");
        assert_eq!(page["meta"]["total"], 3);
        assert_eq!(page["meta"]["totalPages"], 2);
        assert_eq!(page["meta"]["hasNext"], true);

        let (_, all) = send(&app, empty_request(Method::GET, "/api/trades?all=true&ativo=btc")).await;
        assert_eq!(all["data"].as_array().unwrap().len(), 2);
        assert_eq!(all["meta"], json!({ "total": 2 }));
    }

    #[tokio::test]
    async fn test_listing_survives_huge_page_and_limit() {
        let app = app();
        send(&app, json_request(Method::POST, "/api/trades", trade_body("H1"))).await;
        send(&app, json_request(Method::POST, "/api/trades", trade_body("H2"))).await;

        let (status, page) = send(&app, empty_request(Method::GET, "/api/trades?limit=9223372036854775807")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(page["data"].as_array().unwrap().len(), 2);
        assert_eq!(page["meta"]["totalPages"], 1);

        let (status, page) = send(
            &app,
            empty_request(Method::GET, "/api/trades?page=9223372036854775807&limit=9223372036854775807"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(page["data"], json!([]));
        assert_eq!(page["meta"]["hasNext"], false);

        let (status, trade) = send(&app, empty_request(Method::GET, "/api/trades/1")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(trade["idu"], "H1");
    }

    #[tokio::test]
    async fn test_cors_headers_and_preflight() {
        let app = app();

        let preflight = Request::builder()
            .method(Method::OPTIONS)
            .uri("/api/trades/stats")
            .header(header::ORIGIN, "http://localhost:5173")
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(preflight).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers();
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "http://localhost:5173");
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_METHODS], "GET, POST, PUT, DELETE, OPTIONS");
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_HEADERS], "Content-Type, Authorization");
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_CREDENTIALS], "true");
        assert_eq!(headers[header::ACCESS_CONTROL_MAX_AGE], "86400");

        let response = app.clone().oneshot(empty_request(Method::GET, "/api/trades/abc")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert!(response.headers().get(header::ACCESS_CONTROL_MAX_AGE).is_none());
    }

    #[tokio::test]
    async fn test_cors_is_limited_to_api_paths() {
        let app = app();
        let preflight = Request::builder()
            .method(Method::OPTIONS)
            .uri("/elsewhere")
            .header(header::ORIGIN, "http://localhost:5173")
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(preflight).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(response.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).is_none());

        let response = app.oneshot(empty_request(Method::GET, "/health")).await.unwrap();
        assert!(response.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).is_none());
    }

    #[tokio::test]
    async fn test_docs_use_configured_base_url() {
        let (status, docs) = send(&app(), empty_request(Method::GET, "/api/docs")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(docs["baseUrl"], "http://ledger.test/api");
        assert_eq!(docs["name"], "Trade Ledger API");
    }

    #[tokio::test]
    async fn test_stats_and_month_endpoints() {
        let app = app();
        send(&app, json_request(Method::POST, "/api/trades", trade_body("S1"))).await;

        let (status, months) = send(&app, empty_request(Method::GET, "/api/trades/month")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(months[0]["chave"], "2024-01");
        assert_eq!(months[0]["resumo"]["totalTrades"], 1);

        let (status, stats) = send(
            &app,
            empty_request(Method::GET, "/api/trades/stats?dataInicio=2024-01-01&dataFim=2024-02-10"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(stats["totalTrades"], 1);
        assert_eq!(stats["estatisticasPorMes"].as_array().unwrap().len(), 2);
    }

    const SEMICOLON_CSV: &str = "IDU;Data;Ativo;Direção;Percentual;Alvo\n\
                                 I-1;15/01/2024;BTC;long;\"2,5\";1\n\
                                 I-2;16/01/2024;ETH;SHORT;0.05;\n";

    #[tokio::test]
    async fn test_import_upload_commit_flow() {
        let app = app();
        send(&app, json_request(Method::POST, "/api/trades", trade_body("I-2"))).await;

        let (status, preview) = send(&app, upload_request("trades.csv", SEMICOLON_CSV.as_bytes())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(preview["fileName"], "trades.csv");
        assert_eq!(preview["rowCount"], 2);
        assert_eq!(preview["missingFields"], json!([]));
        assert_eq!(preview["suggestedMapping"]["direcao"], "Direção");
        let import_id = preview["importId"].as_str().unwrap().to_string();

        let (status, again) = send(&app, empty_request(Method::GET, &format!("/api/imports/{}", import_id))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(again["importId"], import_id.as_str());

        let (status, report) = send(
            &app,
            empty_request(Method::POST, &format!("/api/imports/{}/commit", import_id)),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(report["created"], 1);
        assert_eq!(report["updated"], 1);

        let (_, list) = send(&app, empty_request(Method::GET, "/api/trades?all=true&orderBy=idu&order=asc")).await;
        assert_eq!(list["data"][0]["idu"], "I-1");
        assert_eq!(list["data"][0]["percentual"], 2.5);
        assert_eq!(list["data"][1]["idu"], "I-2");
        assert_eq!(list["data"][1]["direcao"], "SHORT");
        assert_eq!(list["data"][1]["percentual"], 5.0);

        // Committed sessions are gone
        let (status, _) = send(&app, empty_request(Method::GET, &format!("/api/imports/{}", import_id))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_workbook_upload_commit_flow() {
        let app = app();
        let workbook = include_bytes!(concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/trades.xlsx"));

        let (status, preview) = send(&app, upload_request("trades.xlsx", workbook)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(preview["rowCount"], 2);
        assert_eq!(preview["sampleRows"][0][1], "2024-01-15");
        assert_eq!(preview["missingFields"], json!([]));

        let commit_uri = format!("/api/imports/{}/commit", preview["importId"].as_str().unwrap());
        let (status, report) = send(&app, empty_request(Method::POST, &commit_uri)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(report["created"], 2);

        let (_, list) = send(&app, empty_request(Method::GET, "/api/trades?all=true&orderBy=idu&order=asc")).await;
        assert_eq!(list["data"][0]["data"], "2024-01-15T00:00:00Z");
        assert_eq!(list["data"][1]["direcao"], "SHORT");
        assert_eq!(list["data"][1]["percentual"], 5.0);
        assert_eq!(list["data"][1]["alvo"], 0.0);
    }

    #[tokio::test]
    async fn test_failed_commit_keeps_session() {
        let app = app();
        let csv = "code,when,pair,side,pct,goal\nX1,2024-01-02,BTC,LONG,1,2\n";
        let (_, preview) = send(&app, upload_request("odd.csv", csv.as_bytes())).await;
        let import_id = preview["importId"].as_str().unwrap().to_string();
        let commit_uri = format!("/api/imports/{}/commit", import_id);

        let (status, body) = send(&app, json_request(Method::POST, &commit_uri, json!({}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("missing mapping for"));

        let mapping = json!({
            "mapping": {
                "idu": "code", "data": "when", "ativo": "pair",
                "direcao": "side", "percentual": "pct", "alvo": "goal"
            },
            "percentualMode": "raw"
        });
        let (status, report) = send(&app, json_request(Method::POST, &commit_uri, mapping)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(report["created"], 1);
        assert_eq!(report["log"][0]["type"], "create");
    }

    #[tokio::test]
    async fn test_concurrent_commits_apply_once() {
        let app = app();
        let (_, preview) = send(&app, upload_request("trades.csv", SEMICOLON_CSV.as_bytes())).await;
        let commit_uri = format!("/api/imports/{}/commit", preview["importId"].as_str().unwrap());

        let (first, second) = tokio::join!(
            send(&app, empty_request(Method::POST, &commit_uri)),
            send(&app, empty_request(Method::POST, &commit_uri)),
        );
        let statuses = [first.0, second.0];
        assert!(statuses.contains(&StatusCode::OK), "statuses {:?}", statuses);
        assert!(statuses.contains(&StatusCode::NOT_FOUND), "statuses {:?}", statuses);

        let report = if first.0 == StatusCode::OK { first.1 } else { second.1 };
        assert_eq!(report["created"], 2);
        assert_eq!(report["updated"], 0);

        let (_, list) = send(&app, empty_request(Method::GET, "/api/trades?all=true")).await;
        assert_eq!(list["meta"]["total"], 2);
    }

    #[tokio::test]
    async fn test_import_errors() {
        let app = app();

        let (status, body) = send(&app, upload_request("empty.csv", b"idu,data\n")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("invalid or empty CSV"));

        let unknown = uuid::Uuid::new_v4();
        let (status, _) = send(&app, empty_request(Method::GET, &format!("/api/imports/{}", unknown))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = send(&app, empty_request(Method::DELETE, &format!("/api/imports/{}", unknown))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = send(&app, upload_request("big.csv", &vec![b'a'; 128 * 1024])).await;
        assert!(status.is_client_error(), "unexpected status {}", status);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn test_discard_import() {
        let app = app();
        let (_, preview) = send(&app, upload_request("trades.csv", SEMICOLON_CSV.as_bytes())).await;
        let uri = format!("/api/imports/{}", preview["importId"].as_str().unwrap());

        let (status, body) = send(&app, empty_request(Method::DELETE, &uri)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Import discarded");

        let (status, _) = send(&app, empty_request(Method::GET, &uri)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
