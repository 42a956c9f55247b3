//! Shared application state for the API server.
//!
//! Reads go straight to the engines' concurrent maps. Mutations are handed
//! to the foreground loop so they never interleave with each other or with
//! store callbacks.

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use genforge_core::{Genforge, GeneratorService};
use genforge_db::Foreground;

use crate::error::ApiError;

/// State shared by every handler.
pub struct AppState {
    /// The wired engines.
    pub app: Arc<Genforge>,
    /// Handle to the foreground loop.
    pub foreground: Foreground,
    /// When the server started.
    pub started_at: DateTime<Utc>,
}

impl AppState {
    /// Build state over a wired instance, using its gateway's foreground.
    pub fn new(app: Arc<Genforge>) -> Self {
        let foreground = app.gateway().foreground().clone();
        Self {
            app,
            foreground,
            started_at: Utc::now(),
        }
    }

    /// Run a service call on the foreground loop and wait for its result.
    pub async fn mutate<T, F, Fut>(&self, task: F) -> Result<T, ApiError>
    where
        T: Send + 'static,
        F: FnOnce(Arc<GeneratorService>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, genforge_core::ServiceError>> + Send + 'static,
    {
        let service = Arc::clone(self.app.service());
        let result = self.foreground.call(move || task(service)).await?;
        Ok(result?)
    }
}
