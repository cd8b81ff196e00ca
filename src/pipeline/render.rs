//! PDF rasterisation: render the first page of a PDF to an image via pdfium.
//!
//! ## Threading
//!
//! The `pdfium-render` crate wraps the pdfium C++ library, which keeps global
//! state and must not be entered from two threads at once. [`Rasterizer`]
//! therefore owns the bound [`Pdfium`] on one dedicated OS thread and feeds it
//! jobs over a channel; async callers await a oneshot reply. Rendering is
//! serialised, which matches what pdfium allows anyway. A job that panics is
//! caught on the thread and fails only its own request.
//!
//! ## Availability
//!
//! The library is bound once when the rasterizer starts. If no library can
//! be found, [`Rasterizer::start`] fails and the service runs without PDF
//! rasterization; callers then answer with
//! [`ConvertError::DependencyMissing`].

use crate::config::ServiceConfig;
use crate::error::ConvertError;
use crate::format::TargetFormat;
use crate::pipeline::encode::{prepare_for_target, write_image};
use crate::pipeline::raster::Converted;
use crate::workspace::ConversionFiles;
use image::DynamicImage;
use pdfium_auto::{BindOptions, LibrarySource, PdfiumAutoError};
use pdfium_render::prelude::*;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Instant;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

/// Rendering knobs taken from [`ServiceConfig`].
#[derive(Debug, Clone, Copy)]
pub struct RenderSettings {
    pub dpi: u32,
    pub max_rendered_pixels: u32,
    pub jpeg_quality: u8,
}

impl From<&ServiceConfig> for RenderSettings {
    fn from(config: &ServiceConfig) -> Self {
        Self {
            dpi: config.pdf_dpi,
            max_rendered_pixels: config.max_rendered_pixels,
            jpeg_quality: config.jpeg_quality,
        }
    }
}

struct RenderJob {
    files: ConversionFiles,
    target: TargetFormat,
    name: String,
    reply: oneshot::Sender<Result<(ConversionFiles, Converted), ConvertError>>,
}

/// Clears the shared running flag when the rendering thread exits, however
/// it exits.
struct RunningFlag(Arc<AtomicBool>);

impl Drop for RunningFlag {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Handle to the pdfium rendering thread.
///
/// Dropping the last handle closes the job channel and the thread exits.
#[derive(Debug)]
pub struct Rasterizer {
    jobs: mpsc::Sender<RenderJob>,
    source: LibrarySource,
    running: Arc<AtomicBool>,
}

impl Rasterizer {
    /// Spawn the rendering thread and bind pdfium on it.
    pub async fn start(
        options: BindOptions,
        settings: RenderSettings,
    ) -> Result<Self, PdfiumAutoError> {
        let (jobs, queue) = mpsc::channel::<RenderJob>();
        let (ready_tx, ready_rx) = oneshot::channel();
        let running = Arc::new(AtomicBool::new(true));
        let flag = RunningFlag(Arc::clone(&running));

        std::thread::Builder::new()
            .name("pdf-rasterizer".into())
            .spawn(move || {
                let _flag = flag;
                let pdfium = match pdfium_auto::bind_pdfium(&options) {
                    Ok((pdfium, source)) => {
                        let _ = ready_tx.send(Ok(source));
                        pdfium
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                run_jobs(queue, |job| render_first_page(&pdfium, job, &settings));
            })
            .map_err(|e| PdfiumAutoError::Bind {
                path: PathBuf::from("<thread>"),
                reason: format!("could not spawn rasterizer thread: {e}"),
            })?;

        let source = ready_rx.await.map_err(|_| PdfiumAutoError::Bind {
            path: PathBuf::from("<thread>"),
            reason: "rasterizer thread exited during startup".into(),
        })??;

        info!("PDF rasterizer ready (pdfium from {source})");
        Ok(Self {
            jobs,
            source,
            running,
        })
    }

    /// Where the bound pdfium library was found.
    pub fn library_source(&self) -> &LibrarySource {
        &self.source
    }

    /// Whether the rendering thread is still accepting jobs.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Render page 1 of the PDF at `files.inbound()` into `target`, written to
    /// `files.outbound()`.
    ///
    /// The rendering thread owns `files` while the job runs and hands them back
    /// with the result. If the caller is gone by then, the files are dropped on
    /// that thread, after the output was written, and the cleanup policy still
    /// applies.
    pub async fn pdf_to_image(
        &self,
        files: ConversionFiles,
        target: TargetFormat,
        name: String,
    ) -> Result<(ConversionFiles, Converted), ConvertError> {
        let (reply, result) = oneshot::channel();
        self.jobs
            .send(RenderJob {
                files,
                target,
                name,
                reply,
            })
            .map_err(|_| ConvertError::Internal("PDF rasterizer thread has stopped".into()))?;

        result
            .await
            .map_err(|_| ConvertError::Internal("PDF rasterizer dropped the job".into()))?
    }
}

/// Serve jobs until every [`Rasterizer`] handle is gone. A panicking job
/// fails that request only.
fn run_jobs<F>(queue: mpsc::Receiver<RenderJob>, mut render: F)
where
    F: FnMut(&RenderJob) -> Result<Converted, ConvertError>,
{
    while let Ok(job) = queue.recv() {
        let result = match panic::catch_unwind(AssertUnwindSafe(|| render(&job))) {
            Ok(result) => result,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!("Rendering '{}' panicked: {}", job.name, message);
                Err(ConvertError::Internal(format!("PDF rendering panicked: {message}")))
            }
        };

        let RenderJob {
            files, name, reply, ..
        } = job;
        if reply.send(result.map(|done| (files, done))).is_err() {
            warn!("Caller went away before '{}' finished rendering", name);
        }
    }
    debug!("PDF rasterizer queue closed; thread exiting");
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Blocking implementation of first-page rendering.
fn render_first_page(
    pdfium: &Pdfium,
    job: &RenderJob,
    settings: &RenderSettings,
) -> Result<Converted, ConvertError> {
    let started = Instant::now();
    let decode_failed = |detail: String| ConvertError::Decode {
        name: job.name.clone(),
        detail,
    };

    let document = pdfium
        .load_pdf_from_file(job.files.inbound(), None)
        .map_err(|e| decode_failed(format!("{e:?}")))?;

    let pages = document.pages();
    let total_pages = pages.len() as usize;
    if total_pages == 0 {
        return Err(ConvertError::EmptyDocument);
    }
    debug!("PDF '{}' loaded: {} pages, rendering page 1", job.name, total_pages);

    let max_px = i32::try_from(settings.max_rendered_pixels).unwrap_or(i32::MAX);
    let render_config = PdfRenderConfig::new()
        .scale_page_by_factor(settings.dpi as f32 / 72.0)
        .set_maximum_width(max_px)
        .set_maximum_height(max_px);

    let page = pages
        .get(0)
        .map_err(|e| decode_failed(format!("page 1: {e:?}")))?;
    let bitmap = page
        .render_with_config(&render_config)
        .map_err(|e| decode_failed(format!("rendering page 1: {e:?}")))?;

    let rgb = DynamicImage::ImageRgb8(bitmap.as_image().to_rgb8());
    let (width, height) = (rgb.width(), rgb.height());
    let img = prepare_for_target(rgb, &job.target);
    let bytes = write_image(&img, job.files.outbound(), &job.target, settings.jpeg_quality)?;

    info!(
        "Rendered '{}' page 1/{} → {} ({}x{}, {} bytes) in {:.1}ms",
        job.name,
        total_pages,
        job.target,
        width,
        height,
        bytes,
        started.elapsed().as_secs_f64() * 1000.0
    );
    Ok(Converted {
        width,
        height,
        bytes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CleanupPolicy;
    use crate::workspace::Workspace;
    use lopdf::{dictionary, Document, Object, Stream};

    fn settings() -> RenderSettings {
        RenderSettings {
            dpi: 72,
            max_rendered_pixels: 4000,
            jpeg_quality: 90,
        }
    }

    fn workspace(policy: CleanupPolicy) -> (tempfile::TempDir, Workspace) {
        let root = tempfile::tempdir().unwrap();
        let ws = Workspace::init(root.path().join("uploads"), root.path().join("outputs"), policy)
            .unwrap();
        (root, ws)
    }

    fn png() -> TargetFormat {
        TargetFormat::parse("png").unwrap()
    }

    /// A rasterizer whose thread runs `render` instead of pdfium.
    fn rasterizer_with<F>(render: F) -> Rasterizer
    where
        F: FnMut(&RenderJob) -> Result<Converted, ConvertError> + Send + 'static,
    {
        let (jobs, queue) = mpsc::channel();
        let running = Arc::new(AtomicBool::new(true));
        let flag = RunningFlag(Arc::clone(&running));
        std::thread::spawn(move || {
            let _flag = flag;
            run_jobs(queue, render);
        });
        Rasterizer {
            jobs,
            source: LibrarySource::System,
            running,
        }
    }

    #[tokio::test]
    async fn panicking_job_fails_alone() {
        let (_root, ws) = workspace(CleanupPolicy::AfterResponse);
        let rasterizer = rasterizer_with(|job| {
            if job.name == "boom.pdf" {
                panic!("renderer blew up");
            }
            std::fs::write(job.files.outbound(), b"ok")
                .map_err(|e| ConvertError::io(job.files.outbound(), e))?;
            Ok(Converted {
                width: 1,
                height: 1,
                bytes: 2,
            })
        });

        let err = rasterizer
            .pdf_to_image(ws.allocate("boom.pdf", "png").unwrap(), png(), "boom.pdf".into())
            .await
            .unwrap_err();
        assert!(
            matches!(&err, ConvertError::Internal(m) if m.contains("renderer blew up")),
            "got: {err}"
        );
        assert!(rasterizer.is_running());

        let (files, done) = rasterizer
            .pdf_to_image(ws.allocate("fine.pdf", "png").unwrap(), png(), "fine.pdf".into())
            .await
            .unwrap();
        assert_eq!(done.bytes, 2);
        assert_eq!(std::fs::read(files.outbound()).unwrap(), b"ok");
    }

    #[tokio::test]
    async fn stopped_thread_is_reported_and_files_released() {
        let (_root, ws) = workspace(CleanupPolicy::AfterResponse);
        let (jobs, queue) = mpsc::channel();
        let running = Arc::new(AtomicBool::new(true));
        drop(RunningFlag(Arc::clone(&running)));
        drop(queue);
        let rasterizer = Rasterizer {
            jobs,
            source: LibrarySource::System,
            running,
        };
        assert!(!rasterizer.is_running());

        let files = ws.allocate("a.pdf", "png").unwrap();
        files.write_upload(b"%PDF").await.unwrap();
        let err = rasterizer
            .pdf_to_image(files, png(), "a.pdf".into())
            .await
            .unwrap_err();
        assert!(matches!(err, ConvertError::Internal(_)));
        assert_eq!(std::fs::read_dir(ws.uploads_dir()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn abandoned_job_cleans_up_after_writing() {
        let (_root, ws) = workspace(CleanupPolicy::AfterResponse);
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let (written_tx, written_rx) = oneshot::channel::<()>();
        let mut written_tx = Some(written_tx);
        let rasterizer = rasterizer_with(move |job| {
            let _ = release_rx.recv();
            std::fs::write(job.files.outbound(), b"late")
                .map_err(|e| ConvertError::io(job.files.outbound(), e))?;
            if let Some(tx) = written_tx.take() {
                let _ = tx.send(());
            }
            Ok(Converted {
                width: 1,
                height: 1,
                bytes: 4,
            })
        });

        let files = ws.allocate("a.pdf", "png").unwrap();
        files.write_upload(b"%PDF").await.unwrap();
        let abandoned = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            rasterizer.pdf_to_image(files, png(), "a.pdf".into()),
        )
        .await;
        assert!(abandoned.is_err());

        release_tx.send(()).unwrap();
        written_rx.await.unwrap();
        let empty = |dir: &std::path::Path| std::fs::read_dir(dir).unwrap().count() == 0;
        for _ in 0..200 {
            if empty(ws.uploads_dir()) && empty(ws.outputs_dir()) {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(empty(ws.uploads_dir()));
        assert!(empty(ws.outputs_dir()));
    }

    /// PDF whose first page is 200×100 pt and every later page 100×300 pt.
    fn write_pdf(path: &std::path::Path, page_count: usize) {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let mut kids = Vec::new();
        for i in 0..page_count {
            let (w, h): (i64, i64) = if i == 0 { (200, 100) } else { (100, 300) };
            let content_id = doc.add_object(Stream::new(dictionary! {}, b"0 g 10 10 50 50 re f".to_vec()));
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
                "Count" => page_count as i64,
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);
        doc.save(path).unwrap();
    }

    /// Skip this test when no pdfium library can be bound on this host.
    macro_rules! rasterizer_or_skip {
        () => {{
            match Rasterizer::start(BindOptions::default(), settings()).await {
                Ok(r) => r,
                Err(e) => {
                    println!("SKIP: pdfium unavailable: {e}");
                    return;
                }
            }
        }};
    }

    #[tokio::test]
    async fn missing_library_fails_to_start() {
        let dir = tempfile::tempdir().unwrap();
        let options = BindOptions {
            lib_path: Some(dir.path().join("libpdfium.so")),
            allow_download: false,
        };
        let err = Rasterizer::start(options, settings()).await.unwrap_err();
        assert!(matches!(err, PdfiumAutoError::Bind { .. }), "got: {err}");
    }

    #[tokio::test]
    async fn renders_only_the_first_page() {
        let rasterizer = rasterizer_or_skip!();
        let (_root, ws) = workspace(CleanupPolicy::AfterResponse);
        let files = ws.allocate("report.pdf", "png").unwrap();
        write_pdf(files.inbound(), 4);

        let (files, done) = rasterizer
            .pdf_to_image(files, png(), "report.pdf".into())
            .await
            .unwrap();

        assert_eq!((done.width, done.height), (200, 100));
        let back = image::open(files.outbound()).unwrap();
        assert_eq!((back.width(), back.height()), (200, 100));
        assert!(!back.color().has_alpha());
    }

    #[tokio::test]
    async fn garbage_pdf_is_a_decode_error() {
        let rasterizer = rasterizer_or_skip!();
        let (_root, ws) = workspace(CleanupPolicy::AfterResponse);
        let files = ws.allocate("broken.pdf", "png").unwrap();
        files
            .write_upload(b"%PDF-1.4 this is not really a pdf")
            .await
            .unwrap();

        let err = rasterizer
            .pdf_to_image(files, png(), "broken.pdf".into())
            .await
            .unwrap_err();
        assert!(matches!(err, ConvertError::Decode { .. }), "got: {err}");
    }

    #[tokio::test]
    async fn zero_page_pdf_is_empty_document() {
        let rasterizer = rasterizer_or_skip!();
        let (_root, ws) = workspace(CleanupPolicy::AfterResponse);
        let files = ws.allocate("empty.pdf", "png").unwrap();
        write_pdf(files.inbound(), 0);

        let err = rasterizer
            .pdf_to_image(files, png(), "empty.pdf".into())
            .await
            .unwrap_err();
        assert!(matches!(err, ConvertError::EmptyDocument), "got: {err}");
    }
}
