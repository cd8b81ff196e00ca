//! Shared application state handed to every handler.

use crate::config::ServiceConfig;
use crate::error::ConvertError;
use crate::pipeline::render::{Rasterizer, RenderSettings};
use crate::store::ConversionStore;
use crate::workspace::Workspace;
use pdfium_auto::BindOptions;
use std::sync::Arc;
use tracing::warn;

/// Cheaply cloneable handle to the service's shared resources.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: ServiceConfig,
    workspace: Workspace,
    store: ConversionStore,
    rasterizer: Option<Rasterizer>,
}

impl AppState {
    pub fn new(
        config: ServiceConfig,
        workspace: Workspace,
        store: ConversionStore,
        rasterizer: Option<Rasterizer>,
    ) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                config,
                workspace,
                store,
                rasterizer,
            }),
        }
    }

    /// Create the working directories, open the conversion log and probe for
    /// pdfium.
    ///
    /// A missing pdfium library is not fatal: the service starts and
    /// `/pdf-to-image` answers with [`ConvertError::DependencyMissing`].
    pub async fn initialize(config: ServiceConfig) -> Result<Self, ConvertError> {
        let workspace = Workspace::init(&config.uploads_dir, &config.outputs_dir, config.cleanup)?;
        let store = ConversionStore::connect(&config.database_url, config.max_db_connections).await?;

        let options = BindOptions {
            lib_path: config.pdfium_lib_path.clone(),
            allow_download: config.pdfium_download,
        };
        let rasterizer = match Rasterizer::start(options, RenderSettings::from(&config)).await {
            Ok(r) => Some(r),
            Err(e) => {
                warn!("PDF rasterization disabled: {e}");
                None
            }
        };

        Ok(Self::new(config, workspace, store, rasterizer))
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.inner.config
    }

    pub fn workspace(&self) -> &Workspace {
        &self.inner.workspace
    }

    pub fn store(&self) -> &ConversionStore {
        &self.inner.store
    }

    pub fn rasterizer(&self) -> Option<&Rasterizer> {
        self.inner.rasterizer.as_ref()
    }
}
