//! HTTP API tests against a stub OCR engine.

use std::io::{Cursor, Read};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use axum::http::StatusCode;
use axum_test::multipart::{MultipartForm, Part};
use axum_test::TestServer;
use image::{DynamicImage, Rgb, RgbImage};
use lopdf::{dictionary, Document, Object, Stream};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use pagelens_core::device::Device;
use pagelens_core::models::ModelVariant;
use pagelens_core::ocr::{EngineLoader, OcrEngine};
use pagelens_core::{AppState, Config, Settings};
use pagelens_server::{router, ServerState};

struct StubEngine {
    calls: AtomicUsize,
}

#[async_trait]
impl OcrEngine for StubEngine {
    async fn recognize(
        &self,
        _image: &DynamicImage,
        stream: Option<mpsc::Sender<String>>,
    ) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(5)).await;
        if let Some(tx) = stream {
            let _ = tx.send("recognized ".to_string()).await;
            let _ = tx.send("text".to_string()).await;
        }
        Ok("recognized text".to_string())
    }

    fn variant(&self) -> ModelVariant {
        ModelVariant::TextOnly
    }
}

struct StubLoader {
    engine: Arc<StubEngine>,
}

#[async_trait]
impl EngineLoader for StubLoader {
    async fn load(&self, _variant: ModelVariant, _device: Device) -> Result<Arc<dyn OcrEngine>> {
        Ok(self.engine.clone())
    }
}

struct Harness {
    server: TestServer,
    engine: Arc<StubEngine>,
    output_dir: std::path::PathBuf,
    shutdown: CancellationToken,
    _dir: tempfile::TempDir,
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn harness(http_transport: bool) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let config = Config::rooted_at(dir.path());
    config.ensure_dirs().unwrap();
    let settings = Settings {
        pdf_dpi: 72,
        ..Settings::default()
    };

    let engine = Arc::new(StubEngine {
        calls: AtomicUsize::new(0),
    });
    let loader = Arc::new(StubLoader {
        engine: engine.clone(),
    });
    let output_dir = config.output_dir.clone();
    let app = AppState::with_loader(config, settings, loader);

    let state = ServerState::new(app).await.unwrap();
    let shutdown = CancellationToken::new();
    state.start_worker(shutdown.clone());

    let server = if http_transport {
        TestServer::builder()
            .http_transport()
            .build(router(state))
            .unwrap()
    } else {
        TestServer::new(router(state)).unwrap()
    };

    Harness {
        server,
        engine,
        output_dir,
        shutdown,
        _dir: dir,
    }
}

fn png_bytes() -> Vec<u8> {
    let mut bytes = Vec::new();
    DynamicImage::ImageRgb8(RgbImage::from_pixel(32, 32, Rgb([240, 240, 240])))
        .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
        .unwrap();
    bytes
}

fn pdf_bytes(pages: usize) -> Vec<u8> {
    let mut doc = Document::with_version("1.4");
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });

    let mut page_ids = Vec::new();
    for i in 0..pages {
        let content = format!("BT /F1 12 Tf 100 700 Td (Page {}) Tj ET", i + 1);
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.into_bytes()));
        page_ids.push(doc.add_object(dictionary! {
            "Type" => "Page",
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            "Resources" => resources_id,
            "Contents" => content_id,
        }));
    }

    let kids: Vec<Object> = page_ids.iter().map(|&id| id.into()).collect();
    let pages_id = doc.add_object(dictionary! {
        "Type" => "Pages",
        "Kids" => kids,
        "Count" => Object::Integer(pages as i64),
    });
    for page_id in &page_ids {
        if let Ok(Object::Dictionary(ref mut dict)) = doc.get_object_mut(*page_id) {
            dict.set("Parent", pages_id);
        }
    }
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut buffer = Vec::new();
    doc.save_to(&mut buffer).unwrap();
    buffer
}

fn file_part(name: &str, bytes: Vec<u8>) -> Part {
    let mime = if name.ends_with(".pdf") {
        "application/pdf"
    } else {
        "image/png"
    };
    Part::bytes(bytes).file_name(name).mime_type(mime)
}

async fn create_job(server: &TestServer, files: Vec<(&str, Vec<u8>)>) -> Value {
    let mut form = MultipartForm::new()
        .add_text("kind", "img")
        .add_text("mode", "text")
        .add_text("device", "cpu");
    for (name, bytes) in files {
        form = form.add_part("files", file_part(name, bytes));
    }
    let response = server.post("/api/jobs").multipart(form).await;
    response.assert_status_ok();
    response.json::<Value>()
}

/// Poll until the job reaches `done` or `failed`
async fn wait_finished(server: &TestServer, id: &str) -> Value {
    for _ in 0..500 {
        let job = server.get(&format!("/api/jobs/{}", id)).await.json::<Value>();
        if job["status"] == "done" || job["status"] == "failed" {
            return job;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("job {} did not finish", id);
}

#[tokio::test]
async fn test_health_and_system_info() {
    let h = harness(false).await;

    let health = h.server.get("/api/health").await.json::<Value>();
    assert_eq!(health["status"], "ok");

    let info = h.server.get("/api/system/info").await.json::<Value>();
    assert!(info["cudaSupported"].is_boolean());
    assert!(info["cudaDevices"].is_array());
}

#[tokio::test]
async fn test_create_list_and_get_job() {
    let h = harness(false).await;

    let job = create_job(&h.server, vec![("scan.png", png_bytes()), ("doc.pdf", pdf_bytes(3))]).await;
    let id = job["id"].as_str().unwrap();
    assert_eq!(id.len(), 12);
    assert_eq!(job["status"], "ready");
    assert_eq!(job["files"][1]["pageCount"], 3);
    assert_eq!(job["files"][1]["pagesSel"], "all");
    assert_eq!(job["files"][1]["type"], "pdf");

    let jobs = h.server.get("/api/jobs").await.json::<Vec<Value>>();
    assert_eq!(jobs.len(), 1);

    let fetched = h.server.get(&format!("/api/jobs/{}", id)).await.json::<Value>();
    assert_eq!(fetched["id"], job["id"]);

    h.server
        .get("/api/jobs/doesnotexist")
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_unsupported_upload_rejected_before_processing() {
    let h = harness(false).await;

    let form = MultipartForm::new()
        .add_text("kind", "img")
        .add_part("files", file_part("ok.png", png_bytes()))
        .add_part("files", Part::bytes(b"hello".to_vec()).file_name("notes.txt"));
    let response = h.server.post("/api/jobs").multipart(form).await;
    response.assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(response.json::<Value>()["code"], "BAD_REQUEST");

    let jobs = h.server.get("/api/jobs").await.json::<Vec<Value>>();
    assert!(jobs.is_empty());
    assert_eq!(h.engine.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_edit_job_settings_and_files() {
    let h = harness(false).await;
    let job = create_job(&h.server, vec![("doc.pdf", pdf_bytes(4))]).await;
    let id = job["id"].as_str().unwrap().to_string();
    let file_id = job["files"][0]["id"].as_str().unwrap().to_string();

    let renamed = h
        .server
        .put(&format!("/api/jobs/{}/name", id))
        .json(&json!({ "name": "Contracts" }))
        .await
        .json::<Value>();
    assert_eq!(renamed["name"], "Contracts");

    let moded = h
        .server
        .put(&format!("/api/jobs/{}/mode", id))
        .json(&json!({ "mode": "text-img" }))
        .await
        .json::<Value>();
    assert_eq!(moded["mode"], "text-img");

    let device = h
        .server
        .put(&format!("/api/jobs/{}/device", id))
        .json(&json!({ "device": "mps" }))
        .await
        .json::<Value>();
    assert_eq!(device["device"], "metal");

    let file = h
        .server
        .put(&format!("/api/jobs/{}/files/{}/pages", id, file_id))
        .json(&json!({ "pagesSel": "2-3" }))
        .await
        .json::<Value>();
    assert_eq!(file["pagesSel"], "2-3");

    let form = MultipartForm::new().add_part("files", file_part("extra.png", png_bytes()));
    let updated = h
        .server
        .post(&format!("/api/jobs/{}/files/add", id))
        .multipart(form)
        .await
        .json::<Value>();
    assert_eq!(updated["files"].as_array().unwrap().len(), 2);

    let updated = h
        .server
        .delete(&format!("/api/jobs/{}/files/{}", id, file_id))
        .await
        .json::<Value>();
    assert_eq!(updated["files"].as_array().unwrap().len(), 1);
    assert!(!h.output_dir.join(&id).join("files").join("doc.pdf").exists());
}

#[tokio::test]
async fn test_file_preview_and_single_page() {
    let h = harness(false).await;
    let job = create_job(&h.server, vec![("doc.pdf", pdf_bytes(3))]).await;
    let id = job["id"].as_str().unwrap();

    let response = h.server.get(&format!("/api/jobs/{}/files/doc.pdf", id)).await;
    response.assert_status_ok();
    assert_eq!(response.header("content-type"), "application/pdf");

    let page = h.server.get(&format!("/api/jobs/{}/files/doc.pdf/page/2", id)).await;
    page.assert_status_ok();
    let single = Document::load_mem(page.as_bytes()).unwrap();
    assert_eq!(single.get_pages().len(), 1);

    h.server
        .get(&format!("/api/jobs/{}/files/doc.pdf/page/9", id))
        .await
        .assert_status(StatusCode::BAD_REQUEST);
    h.server
        .get(&format!("/api/jobs/{}/files/missing.pdf", id))
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_enqueue_process_and_edit_results() {
    let h = harness(false).await;
    let job = create_job(&h.server, vec![("doc.pdf", pdf_bytes(3)), ("scan.png", png_bytes())]).await;
    let id = job["id"].as_str().unwrap().to_string();
    let pdf_id = job["files"][0]["id"].as_str().unwrap().to_string();

    h.server
        .put(&format!("/api/jobs/{}/files/{}/pages", id, pdf_id))
        .json(&json!({ "pagesSel": "1,3" }))
        .await
        .assert_status_ok();

    let enqueued = h
        .server
        .post(&format!("/api/jobs/{}/enqueue", id))
        .await
        .json::<Value>();
    assert_eq!(enqueued["message"], "Job enqueued");
    assert!(enqueued["queue_position"].as_u64().is_some());

    let finished = wait_finished(&h.server, &id).await;
    assert_eq!(finished["status"], "done");
    assert_eq!(finished["progress"], 100);
    assert_eq!(
        finished["results"][&pdf_id]["outputs"],
        json!(["doc_page_1.md", "doc_page_3.md"])
    );
    assert_eq!(h.engine.calls.load(Ordering::SeqCst), 3);

    let result = h
        .server
        .get(&format!("/api/jobs/{}/results/doc_page_3.md", id))
        .await;
    result.assert_status_ok();
    assert_eq!(result.text(), "# doc - Page 3\n\nrecognized text");
    assert!(result.header("content-type").to_str().unwrap().starts_with("text/markdown"));

    h.server
        .put(&format!("/api/jobs/{}/results/scan.md", id))
        .json(&json!({ "content": "fixed by hand" }))
        .await
        .assert_status_ok();
    let edited = h.server.get(&format!("/api/jobs/{}/results/scan.md", id)).await;
    assert_eq!(edited.text(), "fixed by hand");
}

#[tokio::test]
async fn test_duplicate_enqueue_rejected() {
    let h = harness(false).await;
    let empty = h
        .server
        .post("/api/jobs")
        .multipart(MultipartForm::new().add_text("kind", "img"))
        .await
        .json::<Value>();
    assert_eq!(empty["status"], "idle");
    h.server
        .post(&format!("/api/jobs/{}/enqueue", empty["id"].as_str().unwrap()))
        .await
        .assert_status(StatusCode::BAD_REQUEST);

    h.server
        .post("/api/jobs/nope/enqueue")
        .await
        .assert_status(StatusCode::NOT_FOUND);

    let job = create_job(&h.server, vec![("a.png", png_bytes())]).await;
    let id = job["id"].as_str().unwrap().to_string();
    h.server
        .post(&format!("/api/jobs/{}/enqueue", id))
        .await
        .assert_status_ok();

    // Still queued or running: a second enqueue is refused
    let second = h.server.post(&format!("/api/jobs/{}/enqueue", id)).await;
    if second.status_code() != StatusCode::OK {
        second.assert_status(StatusCode::BAD_REQUEST);
        assert_eq!(second.json::<Value>()["error"], "Job already in queue");
    }
    wait_finished(&h.server, &id).await;
}

#[tokio::test]
async fn test_partial_failure_is_done() {
    let h = harness(false).await;
    let job = create_job(
        &h.server,
        vec![("good.png", png_bytes()), ("broken.png", b"garbage".to_vec())],
    )
    .await;
    let id = job["id"].as_str().unwrap().to_string();
    let broken_id = job["files"][1]["id"].as_str().unwrap().to_string();

    h.server
        .post(&format!("/api/jobs/{}/enqueue", id))
        .await
        .assert_status_ok();
    let finished = wait_finished(&h.server, &id).await;

    assert_eq!(finished["status"], "done");
    assert!(finished["results"][&broken_id]["error"].is_string());
    assert!(!h.output_dir.join(&id).join("results").join("broken.md").exists());
}

#[tokio::test]
async fn test_delete_removes_uploads_and_results() {
    let h = harness(false).await;
    let job = create_job(&h.server, vec![("a.png", png_bytes())]).await;
    let id = job["id"].as_str().unwrap().to_string();

    h.server
        .post(&format!("/api/jobs/{}/enqueue", id))
        .await
        .assert_status_ok();
    wait_finished(&h.server, &id).await;
    assert!(h.output_dir.join(&id).join("results").join("a.md").exists());

    h.server
        .delete(&format!("/api/jobs/{}", id))
        .await
        .assert_status_ok();
    assert!(!h.output_dir.join(&id).exists());

    let jobs = h.server.get("/api/jobs").await.json::<Vec<Value>>();
    assert!(jobs.is_empty());
    h.server
        .get(&format!("/api/jobs/{}", id))
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_zip_downloads() {
    let h = harness(false).await;
    let first = create_job(&h.server, vec![("a.png", png_bytes())]).await;
    let second = create_job(&h.server, vec![("b.png", png_bytes())]).await;
    let first_id = first["id"].as_str().unwrap().to_string();
    let second_id = second["id"].as_str().unwrap().to_string();

    h.server
        .put(&format!("/api/jobs/{}/name", first_id))
        .json(&json!({ "name": "First" }))
        .await
        .assert_status_ok();
    h.server
        .put(&format!("/api/jobs/{}/name", second_id))
        .json(&json!({ "name": "Second" }))
        .await
        .assert_status_ok();

    for id in [&first_id, &second_id] {
        h.server
            .post(&format!("/api/jobs/{}/enqueue", id))
            .await
            .assert_status_ok();
    }
    wait_finished(&h.server, &first_id).await;
    wait_finished(&h.server, &second_id).await;

    let response = h
        .server
        .get(&format!("/api/jobs/{}/download/zip", first_id))
        .await;
    response.assert_status_ok();
    assert_eq!(response.header("content-type"), "application/zip");
    let disposition = response.header("content-disposition");
    assert!(disposition.to_str().unwrap().contains("First_results.zip"));

    let mut archive = zip::ZipArchive::new(Cursor::new(response.as_bytes().to_vec())).unwrap();
    let mut text = String::new();
    archive
        .by_name("a.md")
        .unwrap()
        .read_to_string(&mut text)
        .unwrap();
    assert_eq!(text, "recognized text");
    assert!(archive.by_name("manifest.json").is_ok());

    let response = h
        .server
        .post("/api/batch/download")
        .json(&json!({ "job_ids": [first_id, second_id, "missing"] }))
        .await;
    response.assert_status_ok();
    let archive = zip::ZipArchive::new(Cursor::new(response.as_bytes().to_vec())).unwrap();
    let names: Vec<&str> = archive.file_names().collect();
    assert!(names.contains(&"First/a.md"));
    assert!(names.contains(&"Second/b.md"));

    h.server
        .post("/api/batch/download")
        .json(&json!({ "job_ids": [] }))
        .await
        .assert_status(StatusCode::BAD_REQUEST);
    h.server
        .post("/api/batch/download")
        .json(&json!({ "job_ids": ["missing"] }))
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_websocket_pushes_job_events() {
    let h = harness(true).await;
    let job = create_job(&h.server, vec![("a.png", png_bytes())]).await;
    let id = job["id"].as_str().unwrap().to_string();

    let mut ws = h.server.get_websocket("/ws").await.into_websocket().await;
    let snapshot: Value = ws.receive_json().await;
    assert_eq!(snapshot["type"], "queue_update");

    h.server
        .post(&format!("/api/jobs/{}/enqueue", id))
        .await
        .assert_status_ok();

    let mut types = Vec::new();
    let complete = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let event: Value = ws.receive_json().await;
            types.push(event["type"].as_str().unwrap_or_default().to_string());
            if event["type"] == "job_complete" {
                return event;
            }
        }
    })
    .await
    .expect("no job_complete event");

    assert_eq!(complete["job_id"], id.as_str());
    assert_eq!(complete["progress"], 100);
    assert!(types.iter().any(|t| t == "ocr_chunk"));
    assert!(types.iter().any(|t| t == "file_complete"));
}
