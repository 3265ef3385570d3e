mod excel;
mod text;

use axum::{
    routing::{get, post},
    Router,
};
use std::path::Path;
use tower_http::services::ServeDir;

use crate::state::AppState;

/// JSON API under `/api`, static files for everything else.
pub fn router(state: AppState, static_dir: &Path) -> Router {
    let excel = Router::new()
        .route("/files", get(excel::list_files))
        .route("/status", get(excel::status))
        .route("/stream", get(excel::stream))
        .route("/load", post(excel::load))
        .route("/cancel", post(excel::cancel))
        .route("/unload", post(excel::unload))
        .route("/search", get(excel::search))
        .route("/lookup", get(excel::lookup))
        .route("/row", get(excel::row));

    let txt = Router::new()
        .route("/list", get(text::list))
        .route("/content", get(text::content));

    Router::new()
        .nest("/api/excel", excel)
        .nest("/api/txt", txt)
        .fallback_service(ServeDir::new(static_dir))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::{to_bytes, Body},
        http::{Method, Request, StatusCode},
    };
    use serde_json::Value;
    use std::fs;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::{tempdir, TempDir};
    use tower::ServiceExt;
    use wordbook_core::{
        IngestError, IngestionService, RawRow, ServiceConfig, SheetRows, SheetSource, SourceOpener,
    };

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    struct Dictionary;

    impl SheetSource for Dictionary {
        fn sheet_names(&self) -> Vec<String> {
            vec!["Main".to_string()]
        }

        fn estimate_rows(&mut self) -> Result<Option<u64>, IngestError> {
            Ok(Some(3))
        }

        fn sheet_rows(&mut self, _sheet: &str) -> Result<SheetRows<'_>, IngestError> {
            let rows: Vec<RawRow> = [
                ["id", "word", "phonetic", "meaning"],
                ["1", "Run", "/rʌn/", "move fast"],
                ["2", "Walk", "/wɔːk/", "move on foot"],
            ]
            .iter()
            .map(|row| row.iter().map(|cell| Some(cell.to_string())).collect())
            .collect();

            Ok(SheetRows {
                column_count: 4,
                rows: Box::new(rows.into_iter().map(Ok)),
            })
        }
    }

    struct DictionaryOpener;

    impl SourceOpener for DictionaryOpener {
        fn open(&self, _path: &Path) -> Result<Box<dyn SheetSource>, IngestError> {
            Ok(Box::new(Dictionary))
        }
    }

    fn app() -> Result<(TempDir, Router), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let sources = dir.path().join("sheets");
        let texts = dir.path().join("texts");
        let assets = dir.path().join("static");
        for folder in [&sources, &texts, &assets] {
            fs::create_dir_all(folder)?;
        }
        fs::write(sources.join("words.xlsx"), b"stand-in workbook bytes")?;
        fs::write(texts.join("chapter2.txt"), "second")?;
        fs::write(texts.join("chapter10.txt"), "tenth")?;
        fs::write(texts.join("notes.md"), "# notes")?;
        fs::write(assets.join("index.html"), "<h1>wordbook</h1>")?;

        let config = ServiceConfig::new(&sources, dir.path().join("state"));
        let service = IngestionService::with_opener(config, Arc::new(DictionaryOpener))?;
        let router = router(AppState::new(service, texts), &assets);
        Ok((dir, router))
    }

    async fn call(app: &Router, method: Method, uri: &str) -> Result<(StatusCode, Vec<u8>), Box<dyn std::error::Error>> {
        let response = app
            .clone()
            .oneshot(Request::builder().method(method).uri(uri).body(Body::empty())?)
            .await?;
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await?;
        Ok((status, body.to_vec()))
    }

    async fn call_json(app: &Router, method: Method, uri: &str) -> Result<(StatusCode, Value), Box<dyn std::error::Error>> {
        let (status, body) = call(app, method, uri).await?;
        Ok((status, serde_json::from_slice(&body)?))
    }

    async fn load_and_wait(app: &Router) -> TestResult {
        let (status, body) = call_json(app, Method::POST, "/api/excel/load?file=words.xlsx").await?;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["started"], true);

        for _ in 0..500 {
            let (_, status) = call_json(app, Method::GET, "/api/excel/status").await?;
            if status["running"] == false {
                assert_eq!(status["loaded"], true);
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        Err("ingestion did not finish".into())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn status_and_files_before_loading() -> TestResult {
        let (_dir, app) = app()?;

        let (status, body) = call_json(&app, Method::GET, "/api/excel/status").await?;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["loaded"], false);
        assert_eq!(body["running"], false);
        assert_eq!(body["state"], "idle");

        let (status, body) = call_json(&app, Method::GET, "/api/excel/files").await?;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["files"][0]["name"], "words.xlsx");

        let (status, body) = call_json(&app, Method::GET, "/api/excel/search?word=run").await?;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "store not loaded");
        assert_eq!(body["status"], "error");

        let (status, body) = call_json(&app, Method::POST, "/api/excel/cancel").await?;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["cancelled"], false);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn load_rejects_unknown_files() -> TestResult {
        let (_dir, app) = app()?;

        let (status, _) = call_json(&app, Method::POST, "/api/excel/load?file=missing.xlsx").await?;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _) = call_json(&app, Method::POST, "/api/excel/load").await?;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _) = call(&app, Method::GET, "/api/excel/load?file=words.xlsx").await?;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn loaded_store_answers_queries() -> TestResult {
        let (_dir, app) = app()?;
        load_and_wait(&app).await?;

        let (status, body) = call_json(&app, Method::GET, "/api/excel/search?word=%20RUN%20").await?;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["word"], "RUN");
        assert_eq!(body["normalized"], "run");
        assert_eq!(body["count"], 1);
        assert_eq!(body["matches"][0]["sheet"], "Main");
        assert_eq!(body["matches"][0]["row_index"], 1);

        let (status, body) = call_json(&app, Method::GET, "/api/excel/lookup?word=walk").await?;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["meaning"], "move on foot");

        let (status, body) = call_json(&app, Method::GET, "/api/excel/row?sheet=Main&row_index=1").await?;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["row"]["2"], "/rʌn/");

        let (status, _) = call_json(&app, Method::GET, "/api/excel/search").await?;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _) = call_json(&app, Method::GET, "/api/excel/lookup?word=swim").await?;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = call_json(&app, Method::GET, "/api/excel/row?sheet=Main&row_index=-1").await?;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _) = call_json(&app, Method::GET, "/api/excel/row?row_index=1").await?;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _) = call_json(&app, Method::GET, "/api/excel/row?sheet=Main&row_index=9").await?;
        assert_eq!(status, StatusCode::NOT_FOUND);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn unload_clears_the_store() -> TestResult {
        let (_dir, app) = app()?;
        load_and_wait(&app).await?;

        let (status, body) = call_json(&app, Method::POST, "/api/excel/unload").await?;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ok"], true);

        let (_, body) = call_json(&app, Method::GET, "/api/excel/status").await?;
        assert_eq!(body["loaded"], false);
        let (status, _) = call_json(&app, Method::GET, "/api/excel/lookup?word=run").await?;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stream_emits_server_sent_status_events() -> TestResult {
        let (_dir, app) = app()?;

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/api/excel/stream?duration=0&interval=0.01")
                    .body(Body::empty())?,
            )
            .await?;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get("content-type").map(|value| value.as_bytes()),
            Some(&b"text/event-stream"[..])
        );
        assert_eq!(
            response.headers().get("x-accel-buffering").map(|value| value.as_bytes()),
            Some(&b"no"[..])
        );

        let body = to_bytes(response.into_body(), usize::MAX).await?;
        let text = String::from_utf8(body.to_vec())?;
        let events: Vec<&str> = text.lines().filter(|line| line.starts_with("data:")).collect();
        assert_eq!(events.len(), 1);
        let report: Value = serde_json::from_str(events[0].trim_start_matches("data:").trim())?;
        assert_eq!(report["loaded"], false);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn text_documents_are_listed_and_read() -> TestResult {
        let (_dir, app) = app()?;

        let (status, body) = call_json(&app, Method::GET, "/api/txt/list").await?;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["files"], serde_json::json!(["chapter2.txt", "chapter10.txt"]));

        let (status, body) =
            call_json(&app, Method::GET, "/api/txt/content?name=..%2Fchapter10.txt").await?;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["name"], "chapter10.txt");
        assert_eq!(body["content"], "tenth");

        let (status, _) = call_json(&app, Method::GET, "/api/txt/content?name=notes.md").await?;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _) = call_json(&app, Method::GET, "/api/txt/content?name=gone.txt").await?;
        assert_eq!(status, StatusCode::NOT_FOUND);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn other_paths_serve_static_files() -> TestResult {
        let (_dir, app) = app()?;

        let (status, body) = call(&app, Method::GET, "/").await?;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"<h1>wordbook</h1>");

        let (status, _) = call(&app, Method::GET, "/missing.css").await?;
        assert_eq!(status, StatusCode::NOT_FOUND);
        Ok(())
    }
}
