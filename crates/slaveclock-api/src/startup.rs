//! Control API startup helper for embedding in the daemon binary.
//!
//! [`spawn_api`] launches the HTTP server on a background Tokio task so it
//! runs alongside the daemon loop.

use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::server::{ServerConfig, ServerError};
use crate::state::AppState;

/// Spawn the control API on a background Tokio task.
///
/// The address is checked before spawning so an obviously bad host fails
/// startup instead of being logged from the background task. Bind errors
/// are still only logged. The caller should abort the returned handle on
/// shutdown.
///
/// # Errors
///
/// Returns [`ServerError::Bind`] if the configured address does not parse.
pub fn spawn_api(config: ServerConfig, state: Arc<AppState>) -> Result<JoinHandle<()>, ServerError> {
    let addr = config.socket_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = crate::server::start_server(&config, state).await {
            tracing::error!(error = %e, "Control API exited with error");
        }
    });

    tracing::info!(%addr, "Control API spawned on background task");

    Ok(handle)
}
