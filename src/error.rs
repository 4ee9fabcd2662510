// Error types
//
// Plumbing code returns anyhow::Result with context. The enums here are the
// faults callers match on. Library code never exits; only the binary calls
// `fatal`.

use thiserror::Error;

pub use crate::assets::AssetError;
pub use crate::backend::queue_family::DeviceError;
pub use crate::backend::resource::ResourceError;

/// Faults that end an `Application::run`
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("application has already run")]
    AlreadyRan,

    #[error("window error: {0:#}")]
    Window(anyhow::Error),

    #[error("render backend error: {0:#}")]
    Backend(anyhow::Error),

    #[error("failed to spawn update thread: {0}")]
    SpawnUpdate(std::io::Error),

    #[error("update thread panicked: {0}")]
    UpdatePanicked(String),
}

/// Log `err` at error level and terminate the process.
pub fn fatal(err: &dyn std::fmt::Display) -> ! {
    log::error!("Fatal: {}", err);
    log::logger().flush();
    std::process::exit(1);
}

/// Best-effort text of a panic payload
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
