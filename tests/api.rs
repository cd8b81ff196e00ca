//! HTTP-level integration tests for edgequake-convert.
//!
//! Every test builds the full router over a temporary workspace and a
//! temporary SQLite file, then drives it through `axum-test`.
//!
//! Tests that need pdfium skip themselves when no library can be bound:
//!   PDFIUM_LIB_PATH=/path/to/libpdfium.so cargo test --test api -- --nocapture

use axum::http::StatusCode;
use axum_test::multipart::{MultipartForm, Part};
use axum_test::{TestResponse, TestServer};
use edgequake_convert::{
    build_router, AppState, CleanupPolicy, ConversionRecord, ConversionStore, ConvertError,
    Rasterizer,
    RenderSettings, ServiceConfig, Workspace, RASTERIZER_MISSING_MESSAGE,
};
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use lopdf::{dictionary, Document, Object, Stream};
use pdfium_auto::BindOptions;
use std::future::IntoFuture;
use std::io::Cursor;
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;
use tracing_subscriber::EnvFilter;

// ── Test helpers ─────────────────────────────────────────────────────────────

struct TestApp {
    _dir: TempDir,
    state: AppState,
    server: TestServer,
}

impl TestApp {
    async fn records(&self) -> Vec<ConversionRecord> {
        self.state.store().list_recent(100).await.unwrap()
    }

    fn files_in(&self, dir: &Path) -> usize {
        std::fs::read_dir(dir).unwrap().count()
    }

    fn uploads(&self) -> usize {
        self.files_in(self.state.workspace().uploads_dir())
    }

    fn outputs(&self) -> usize {
        self.files_in(self.state.workspace().outputs_dir())
    }
}

fn config(dir: &Path, policy: CleanupPolicy) -> ServiceConfig {
    ServiceConfig::builder()
        .database_url(format!("sqlite://{}", dir.join("conversions.db").display()))
        .uploads_dir(dir.join("uploads"))
        .outputs_dir(dir.join("outputs"))
        .cleanup(policy)
        .pdf_dpi(72)
        .build()
        .unwrap()
}

/// Route the service's logs to the test harness; `RUST_LOG` picks the level.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

async fn app_with(config: ServiceConfig, dir: TempDir, rasterizer: Option<Rasterizer>) -> TestApp {
    init_tracing();
    let workspace =
        Workspace::init(&config.uploads_dir, &config.outputs_dir, config.cleanup).unwrap();
    let store = ConversionStore::connect(&config.database_url, 2).await.unwrap();
    let state = AppState::new(config, workspace, store, rasterizer);
    let server = TestServer::new(build_router(state.clone()).unwrap()).unwrap();
    TestApp {
        _dir: dir,
        state,
        server,
    }
}

/// App without a pdfium binding.
async fn app(policy: CleanupPolicy) -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path(), policy);
    app_with(config, dir, None).await
}

/// Skip this test if pdfium cannot be bound on this host.
macro_rules! app_with_pdfium_or_skip {
    () => {{
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path(), CleanupPolicy::AfterResponse);
        match Rasterizer::start(BindOptions::default(), RenderSettings::from(&config)).await {
            Ok(r) => app_with(config, dir, Some(r)).await,
            Err(e) => {
                println!("SKIP: pdfium unavailable: {e}");
                return;
            }
        }
    }};
}

fn png_bytes(w: u32, h: u32, alpha: u8) -> Vec<u8> {
    let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(w, h, Rgba([200, 40, 90, alpha])));
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png).unwrap();
    buf
}

/// PDF with `pages` pages; page 1 is 200×100 pt, the rest 100×300 pt.
fn pdf_bytes(pages: usize) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let mut kids: Vec<Object> = Vec::new();
    for i in 0..pages {
        let (w, h): (i64, i64) = if i == 0 { (200, 100) } else { (100, 300) };
        let content_id = doc.add_object(Stream::new(dictionary! {}, b"0 g 20 20 40 40 re f".to_vec()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![0.into(), 0.into(), w.into(), h.into()],
            "Contents" => content_id,
        });
        kids.push(Object::Reference(page_id));
    }
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => pages as i64,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    let mut buf = Vec::new();
    doc.save_to(&mut buf).unwrap();
    buf
}

fn file_part(bytes: Vec<u8>, name: &str, mime: &str) -> Part {
    Part::bytes(bytes).file_name(name.to_string()).mime_type(mime.to_string())
}

fn upload(bytes: Vec<u8>, name: &str, mime: &str, target: Option<&str>) -> MultipartForm {
    let form = MultipartForm::new().add_part("file", file_part(bytes, name, mime));
    match target {
        Some(t) => form.add_text("target_format", t.to_string()),
        None => form,
    }
}

fn detail(resp: &TestResponse) -> String {
    let json: serde_json::Value = resp.json();
    json["detail"].as_str().unwrap_or_default().to_string()
}

fn disposition(resp: &TestResponse) -> String {
    resp.header("content-disposition")
        .to_str()
        .unwrap()
        .to_string()
}

// ── /convert-image ───────────────────────────────────────────────────────────

#[tokio::test]
async fn convert_png_with_alpha_to_jpg() {
    let app = app(CleanupPolicy::AfterResponse).await;

    let resp = app
        .server
        .post("/convert-image")
        .multipart(upload(png_bytes(64, 48, 120), "photo.png", "image/png", Some("jpg")))
        .await;

    assert_eq!(resp.status_code(), StatusCode::OK);
    assert_eq!(resp.header("content-type"), "image/jpeg");
    assert_eq!(disposition(&resp), "attachment; filename=\"converted.jpg\"");

    let body = resp.as_bytes().to_vec();
    let img = image::load_from_memory(&body).unwrap();
    assert_eq!((img.width(), img.height()), (64, 48));
    assert!(!img.color().has_alpha());

    let records = app.records().await;
    assert_eq!(records.len(), 1);
    let r = &records[0];
    assert_eq!(r.filename, "photo.png");
    assert_eq!(r.source_format, "png");
    assert_eq!(r.target_format, "jpg");
    assert_eq!(r.file_size as usize, body.len());

    assert_eq!(app.uploads(), 0, "upload should be removed after the response");
    assert_eq!(app.outputs(), 0, "output should be removed after the response");
}

#[tokio::test]
async fn target_token_is_normalised() {
    let app = app(CleanupPolicy::AfterResponse).await;

    let resp = app
        .server
        .post("/convert-image")
        .multipart(upload(png_bytes(8, 8, 255), "Icon.PNG", "image/png", Some(" WEBP ")))
        .await;

    assert_eq!(resp.status_code(), StatusCode::OK);
    assert_eq!(disposition(&resp), "attachment; filename=\"converted.webp\"");
    let r = &app.records().await[0];
    assert_eq!(r.source_format, "png");
    assert_eq!(r.target_format, "webp");
}

#[tokio::test]
async fn retain_policy_keeps_both_files() {
    let app = app(CleanupPolicy::Retain).await;

    let resp = app
        .server
        .post("/convert-image")
        .multipart(upload(png_bytes(10, 10, 255), "a.png", "image/png", Some("bmp")))
        .await;
    assert_eq!(resp.status_code(), StatusCode::OK);

    assert_eq!(app.uploads(), 1);
    assert_eq!(app.outputs(), 1);
    let output = std::fs::read_dir(app.state.workspace().outputs_dir())
        .unwrap()
        .next()
        .unwrap()
        .unwrap()
        .path();
    assert_eq!(output.extension().unwrap(), "bmp");
    assert_eq!(std::fs::read(&output).unwrap(), resp.as_bytes().to_vec());
}

#[tokio::test]
async fn unsupported_target_is_rejected_without_record() {
    let app = app(CleanupPolicy::AfterResponse).await;

    let resp = app
        .server
        .post("/convert-image")
        .multipart(upload(png_bytes(4, 4, 255), "a.png", "image/png", Some("xyz")))
        .await;

    assert_eq!(resp.status_code(), StatusCode::BAD_REQUEST);
    assert!(detail(&resp).contains("xyz"));
    assert!(app.records().await.is_empty());
}

#[tokio::test]
async fn undecodable_image_is_rejected_without_record() {
    let app = app(CleanupPolicy::AfterResponse).await;

    let resp = app
        .server
        .post("/convert-image")
        .multipart(upload(b"not an image at all".to_vec(), "fake.png", "image/png", Some("jpg")))
        .await;

    assert_eq!(resp.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
    assert!(detail(&resp).contains("fake.png"));
    assert!(app.records().await.is_empty());
    assert_eq!(app.uploads(), 0);
    assert_eq!(app.outputs(), 0);
}

#[tokio::test]
async fn missing_fields_are_bad_requests() {
    let app = app(CleanupPolicy::AfterResponse).await;

    let no_target = app
        .server
        .post("/convert-image")
        .multipart(upload(png_bytes(4, 4, 255), "a.png", "image/png", None))
        .await;
    assert_eq!(no_target.status_code(), StatusCode::BAD_REQUEST);
    assert!(detail(&no_target).contains("target_format"));

    let no_file = app
        .server
        .post("/convert-image")
        .multipart(MultipartForm::new().add_text("target_format", "png"))
        .await;
    assert_eq!(no_file.status_code(), StatusCode::BAD_REQUEST);
    assert!(detail(&no_file).contains("file"));

    let not_multipart = app.server.post("/convert-image").text("hello").await;
    assert_eq!(not_multipart.status_code(), StatusCode::BAD_REQUEST);
    assert!(!detail(&not_multipart).is_empty());

    assert!(app.records().await.is_empty());
}

#[tokio::test]
async fn concurrent_requests_get_their_own_output() {
    let app = app(CleanupPolicy::AfterResponse).await;
    let server = &app.server;

    let send = |w: u32, h: u32| async move {
        let resp = server
            .post("/convert-image")
            .multipart(upload(png_bytes(w, h, 255), &format!("{w}x{h}.png"), "image/png", Some("png")))
            .await;
        assert_eq!(resp.status_code(), StatusCode::OK);
        let img = image::load_from_memory(resp.as_bytes()).unwrap();
        (img.width(), img.height())
    };

    let (a, b, c, d) = tokio::join!(send(11, 7), send(23, 5), send(3, 31), send(17, 17));
    assert_eq!(a, (11, 7));
    assert_eq!(b, (23, 5));
    assert_eq!(c, (3, 31));
    assert_eq!(d, (17, 17));
    assert_eq!(app.records().await.len(), 4);
}

#[tokio::test]
async fn disconnected_client_leaves_no_files() {
    let app = app(CleanupPolicy::AfterResponse).await;

    let request = app
        .server
        .post("/convert-image")
        .multipart(upload(png_bytes(3000, 3000, 255), "big.png", "image/png", Some("tiff")))
        .into_future();
    // Give up on the response, as a browser does when the tab is closed.
    let _ = tokio::time::timeout(Duration::from_millis(300), request).await;

    // The upload lives exactly as long as the conversion; once it is gone the
    // output must be gone too.
    for _ in 0..600 {
        if app.uploads() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(app.uploads(), 0);
    assert_eq!(app.outputs(), 0, "output written after the client left was kept");
}

#[tokio::test]
async fn upload_limit_is_enforced() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = config(dir.path(), CleanupPolicy::AfterResponse);
    cfg.max_upload_bytes = Some(1024);
    let app = app_with(cfg, dir, None).await;

    let resp = app
        .server
        .post("/convert-image")
        .multipart(upload(vec![7u8; 8 * 1024], "big.png", "image/png", Some("jpg")))
        .await;

    assert_eq!(resp.status_code(), StatusCode::PAYLOAD_TOO_LARGE);
    assert!(app.records().await.is_empty());
}

#[tokio::test]
async fn storage_failure_discards_the_output() {
    let app = app(CleanupPolicy::Retain).await;
    app.state.store().pool().close().await;

    let resp = app
        .server
        .post("/convert-image")
        .multipart(upload(png_bytes(6, 6, 255), "a.png", "image/png", Some("gif")))
        .await;

    assert_eq!(resp.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(!detail(&resp).is_empty());
    assert_eq!(app.outputs(), 0, "converted file must not outlive a failed log write");
}

// ── /image-to-pdf ────────────────────────────────────────────────────────────

#[tokio::test]
async fn image_to_pdf_produces_one_page() {
    let app = app(CleanupPolicy::AfterResponse).await;

    let resp = app
        .server
        .post("/image-to-pdf")
        .multipart(upload(png_bytes(150, 50, 0), "banner.png", "image/png", None))
        .await;

    assert_eq!(resp.status_code(), StatusCode::OK);
    assert_eq!(resp.header("content-type"), "application/pdf");
    assert_eq!(disposition(&resp), "attachment; filename=\"converted.pdf\"");

    let body = resp.as_bytes().to_vec();
    let doc = Document::load_mem(&body).unwrap();
    assert_eq!(doc.get_pages().len(), 1);

    let r = &app.records().await[0];
    assert_eq!(r.source_format, "png");
    assert_eq!(r.target_format, "pdf");
    assert_eq!(r.file_size as usize, body.len());
}

#[tokio::test]
async fn image_to_pdf_ignores_target_field() {
    let app = app(CleanupPolicy::AfterResponse).await;

    let resp = app
        .server
        .post("/image-to-pdf")
        .multipart(upload(png_bytes(20, 20, 255), "x.png", "image/png", Some("jpg")))
        .await;

    assert_eq!(resp.status_code(), StatusCode::OK);
    assert_eq!(app.records().await[0].target_format, "pdf");
}

// ── /pdf-to-image ────────────────────────────────────────────────────────────

#[tokio::test]
async fn pdf_to_image_without_rasterizer_is_unavailable() {
    let app = app(CleanupPolicy::AfterResponse).await;

    let resp = app
        .server
        .post("/pdf-to-image")
        .multipart(upload(pdf_bytes(2), "report.pdf", "application/pdf", Some("png")))
        .await;

    assert_eq!(resp.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(detail(&resp), RASTERIZER_MISSING_MESSAGE);
    assert!(app.records().await.is_empty());
}

#[tokio::test]
async fn pdf_to_image_renders_first_page_only() {
    let app = app_with_pdfium_or_skip!();

    let resp = app
        .server
        .post("/pdf-to-image")
        .multipart(upload(pdf_bytes(4), "report.pdf", "application/pdf", Some("png")))
        .await;

    assert_eq!(resp.status_code(), StatusCode::OK);
    assert_eq!(disposition(&resp), "attachment; filename=\"converted.png\"");
    let body = resp.as_bytes().to_vec();
    let img = image::load_from_memory(&body).unwrap();
    assert_eq!((img.width(), img.height()), (200, 100));

    let records = app.records().await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].filename, "report.pdf");
    assert_eq!(records[0].source_format, "pdf");
    assert_eq!(records[0].target_format, "png");
    assert_eq!(records[0].file_size as usize, body.len());
}

#[tokio::test]
async fn pdf_without_pages_is_rejected_without_record() {
    let app = app_with_pdfium_or_skip!();

    let resp = app
        .server
        .post("/pdf-to-image")
        .multipart(upload(pdf_bytes(0), "empty.pdf", "application/pdf", Some("jpg")))
        .await;

    assert_eq!(resp.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(detail(&resp), ConvertError::EmptyDocument.to_string());
    assert!(app.records().await.is_empty());
    assert_eq!(app.outputs(), 0);
}

// ── /health and /conversions ─────────────────────────────────────────────────

#[tokio::test]
async fn health_reports_rasterizer_state() {
    let app = app(CleanupPolicy::AfterResponse).await;
    let resp = app.server.get("/health").await;
    assert_eq!(resp.status_code(), StatusCode::OK);
    let json: serde_json::Value = resp.json();
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["pdf_rasterizer"], false);
}

#[tokio::test]
async fn conversions_are_listed_newest_first() {
    let app = app(CleanupPolicy::AfterResponse).await;
    for name in ["first.png", "second.png"] {
        let resp = app
            .server
            .post("/convert-image")
            .multipart(upload(png_bytes(5, 5, 255), name, "image/png", Some("png")))
            .await;
        assert_eq!(resp.status_code(), StatusCode::OK);
    }

    let all: Vec<ConversionRecord> = app.server.get("/conversions").await.json();
    let names: Vec<_> = all.iter().map(|r| r.filename.as_str()).collect();
    assert_eq!(names, ["second.png", "first.png"]);

    let one: Vec<ConversionRecord> = app
        .server
        .get("/conversions")
        .add_query_param("limit", 1)
        .await
        .json();
    assert_eq!(one.len(), 1);
    assert_eq!(one[0].filename, "second.png");

    let bad = app
        .server
        .get("/conversions")
        .add_query_param("limit", "many")
        .await;
    assert_eq!(bad.status_code(), StatusCode::BAD_REQUEST);
}
