//! Temporary file manager: the `uploads/` and `outputs/` working directories.
//!
//! Every request gets a fresh random identifier. The upload is stored as
//! `uploads/<id>.<original-ext>` and the converted file as
//! `outputs/<id>.<target-ext>`, so concurrent requests never touch each
//! other's files. [`ConversionFiles`] owns both paths for the lifetime of the
//! request and, under [`CleanupPolicy::AfterResponse`], removes them when it is
//! dropped, on success and error paths alike. Converters take ownership of the
//! guard while they run, so a request abandoned mid-conversion is cleaned up
//! once the converter has finished writing.

use crate::config::CleanupPolicy;
use crate::error::ConvertError;
use crate::format::extension_of;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tempfile::TempPath;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// The two working directories.
#[derive(Debug, Clone)]
pub struct Workspace {
    uploads: PathBuf,
    outputs: PathBuf,
    policy: CleanupPolicy,
}

impl Workspace {
    /// Create both directories if they do not exist yet. Idempotent.
    pub fn init(
        uploads: impl Into<PathBuf>,
        outputs: impl Into<PathBuf>,
        policy: CleanupPolicy,
    ) -> Result<Self, ConvertError> {
        let uploads = uploads.into();
        let outputs = outputs.into();
        for dir in [&uploads, &outputs] {
            std::fs::create_dir_all(dir).map_err(|e| ConvertError::io(dir, e))?;
        }
        debug!(
            "Workspace ready: uploads={} outputs={} policy={:?}",
            uploads.display(),
            outputs.display(),
            policy
        );
        Ok(Self {
            uploads,
            outputs,
            policy,
        })
    }

    pub fn uploads_dir(&self) -> &Path {
        &self.uploads
    }

    pub fn outputs_dir(&self) -> &Path {
        &self.outputs
    }

    pub fn policy(&self) -> CleanupPolicy {
        self.policy
    }

    /// Reserve a fresh inbound/outbound pair for one request.
    ///
    /// The inbound name keeps the extension of `original_filename` verbatim;
    /// the outbound name shares the identifier and uses `target_ext`.
    pub fn allocate(
        &self,
        original_filename: &str,
        target_ext: &str,
    ) -> Result<ConversionFiles, ConvertError> {
        let id = Uuid::new_v4();
        let inbound = match extension_of(original_filename) {
            Some(ext) => self.uploads.join(format!("{id}.{ext}")),
            None => self.uploads.join(id.to_string()),
        };
        let outbound = self.outputs.join(format!("{id}.{target_ext}"));

        let guard = |path: PathBuf| {
            TempPath::try_from_path(&path).map_err(|e| ConvertError::io(path, e))
        };
        Ok(ConversionFiles {
            id,
            inbound: Some(guard(inbound)?),
            outbound: Some(guard(outbound)?),
            policy: self.policy,
        })
    }

    /// Remove files older than `max_age` from both directories.
    pub async fn sweep(&self, max_age: Duration) -> SweepReport {
        let mut report = SweepReport::default();
        for dir in [&self.uploads, &self.outputs] {
            sweep_dir(dir, max_age, &mut report).await;
        }
        if report.removed > 0 || report.failed > 0 {
            info!(
                "Workspace sweep removed {} file(s), {} failure(s)",
                report.removed, report.failed
            );
        }
        report
    }
}

/// Outcome of [`Workspace::sweep`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub removed: usize,
    pub failed: usize,
}

async fn sweep_dir(dir: &Path, max_age: Duration, report: &mut SweepReport) {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Cannot list {} for sweep: {}", dir.display(), e);
            report.failed += 1;
            return;
        }
    };

    let now = SystemTime::now();
    while let Ok(Some(entry)) = entries.next_entry().await {
        let Ok(meta) = entry.metadata().await else {
            continue;
        };
        if !meta.is_file() {
            continue;
        }
        let age = meta
            .modified()
            .ok()
            .and_then(|m| now.duration_since(m).ok())
            .unwrap_or_default();
        if age < max_age {
            continue;
        }
        match tokio::fs::remove_file(entry.path()).await {
            Ok(()) => report.removed += 1,
            Err(e) => {
                warn!("Sweep could not remove {}: {}", entry.path().display(), e);
                report.failed += 1;
            }
        }
    }
}

/// The inbound and outbound files of one request.
#[derive(Debug)]
pub struct ConversionFiles {
    id: Uuid,
    inbound: Option<TempPath>,
    outbound: Option<TempPath>,
    policy: CleanupPolicy,
}

impl ConversionFiles {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn inbound(&self) -> &Path {
        self.inbound.as_deref().unwrap_or(Path::new(""))
    }

    pub fn outbound(&self) -> &Path {
        self.outbound.as_deref().unwrap_or(Path::new(""))
    }

    /// Persist the uploaded payload verbatim at the inbound path.
    pub async fn write_upload(&self, bytes: &[u8]) -> Result<(), ConvertError> {
        let path = self.inbound();
        tokio::fs::write(path, bytes)
            .await
            .map_err(|e| ConvertError::io(path, e))?;
        debug!("Stored {} upload bytes at {}", bytes.len(), path.display());
        Ok(())
    }

    /// Size of the outbound file as it is on disk right now.
    pub async fn output_size(&self) -> Result<u64, ConvertError> {
        let path = self.outbound();
        tokio::fs::metadata(path)
            .await
            .map(|m| m.len())
            .map_err(|e| ConvertError::io(path, e))
    }

    /// Read the whole outbound file into memory.
    pub async fn read_output(&self) -> Result<Vec<u8>, ConvertError> {
        let path = self.outbound();
        tokio::fs::read(path)
            .await
            .map_err(|e| ConvertError::io(path, e))
    }

    /// Delete the outbound file now, whatever the cleanup policy.
    pub async fn discard_output(&self) {
        let path = self.outbound();
        if let Err(e) = tokio::fs::remove_file(path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Could not discard {}: {}", path.display(), e);
            }
        }
    }
}

impl Drop for ConversionFiles {
    fn drop(&mut self) {
        let paths = [self.inbound.take(), self.outbound.take()];
        match self.policy {
            CleanupPolicy::AfterResponse => {
                // TempPath removes the file (if any) as it goes out of scope.
                drop(paths);
            }
            CleanupPolicy::Retain => {
                for path in paths.into_iter().flatten() {
                    if let Err(e) = path.keep() {
                        warn!("Could not retain {}: {}", e.path.display(), e.error);
                    }
                }
            }
        }
    }
}
