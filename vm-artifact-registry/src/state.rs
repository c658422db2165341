//! # Application State
//!
//! Shared state handed to every HTTP handler. The [`ArtifactService`] carries all
//! repository state; handlers never touch storage directly.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use vm_artifact_registry::config::Config;
//! use vm_artifact_registry::service::{ArtifactService, Collaborators};
//! use vm_artifact_registry::state::AppState;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::default();
//! let service = ArtifactService::new(config.clone(), Collaborators::default()).await?;
//! let state = Arc::new(AppState {
//!     service: Arc::new(service),
//!     max_body_bytes: config.mirrors.max_artifact_size_bytes(),
//! });
//! # Ok(())
//! # }
//! ```

use crate::service::ArtifactService;
use serde::Serialize;
use std::sync::Arc;

/// Application state shared by all request handlers.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<ArtifactService>,
    /// Largest request body accepted by deploy routes
    pub max_body_bytes: u64,
}

/// Standardized success response for API consistency.
///
/// Serializes to: `{"message": "Operation completed successfully"}`
#[derive(Serialize)]
pub struct SuccessResponse {
    /// Human-readable success message describing the completed operation
    pub message: String,
}
