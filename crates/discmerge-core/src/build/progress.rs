//! Progress reporting and cooperative cancellation for builds

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use crate::error::{Error, Result};

/// Phase of a build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum BuildPhase {
    #[default]
    Preflight,
    Copy,
    Prune,
    Import,
    CopySongs,
    Textures,
    Write,
    Melody,
    Cache,
    Config,
    Finalize,
    Done,
}

impl std::fmt::Display for BuildPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Preflight => write!(f, "Preflight"),
            Self::Copy => write!(f, "Copy"),
            Self::Prune => write!(f, "Prune"),
            Self::Import => write!(f, "Import"),
            Self::CopySongs => write!(f, "Copy songs"),
            Self::Textures => write!(f, "Textures"),
            Self::Write => write!(f, "Write"),
            Self::Melody => write!(f, "Melody"),
            Self::Cache => write!(f, "CHC"),
            Self::Config => write!(f, "Config"),
            Self::Finalize => write!(f, "Finalize"),
            Self::Done => write!(f, "Done"),
        }
    }
}

/// One progress event
#[derive(Debug, Clone, Default, Serialize)]
pub struct BuildProgress {
    pub phase: BuildPhase,
    pub message: String,
    pub current: Option<usize>,
    pub total: Option<usize>,
    /// No meaningful current/total for this step
    pub indeterminate: bool,
}

/// Progress callback type
pub type ProgressCallback = Box<dyn Fn(BuildProgress) + Send + Sync>;

/// Cancellation predicate; returns true once cancellation was requested
pub type CancelCheck = Box<dyn Fn() -> bool + Send + Sync>;

/// Adapt a shared flag into a [`CancelCheck`]
pub fn cancel_flag(token: Arc<AtomicBool>) -> CancelCheck {
    Box::new(move || token.load(Ordering::SeqCst))
}

/// Emits progress and polls cancellation on behalf of an engine.
///
/// A positive cancellation check surfaces as [`Error::Cancelled`] carrying the
/// folder being built; the subset builder relocates it before returning.
pub(crate) struct Reporter<'a> {
    progress: Option<&'a ProgressCallback>,
    cancel: Option<&'a CancelCheck>,
    partial_output: PathBuf,
}

impl<'a> Reporter<'a> {
    pub(crate) fn new(
        progress: Option<&'a ProgressCallback>,
        cancel: Option<&'a CancelCheck>,
        partial_output: PathBuf,
    ) -> Self {
        Self {
            progress,
            cancel,
            partial_output,
        }
    }

    /// Report a step with no meaningful count
    pub(crate) fn step(&self, phase: BuildPhase, message: impl Into<String>) {
        self.emit(BuildProgress {
            phase,
            message: message.into(),
            current: None,
            total: None,
            indeterminate: true,
        });
    }

    /// Report a counted step
    pub(crate) fn count(
        &self,
        phase: BuildPhase,
        message: impl Into<String>,
        current: usize,
        total: usize,
    ) {
        self.emit(BuildProgress {
            phase,
            message: message.into(),
            current: Some(current),
            total: Some(total),
            indeterminate: false,
        });
    }

    fn emit(&self, progress: BuildProgress) {
        match (progress.current, progress.total) {
            (Some(current), Some(total)) => {
                info!("[{}] {} ({}/{})", progress.phase, progress.message, current, total)
            }
            _ => info!("[{}] {}", progress.phase, progress.message),
        }
        if let Some(callback) = self.progress {
            callback(progress);
        }
    }

    pub(crate) fn is_cancel_requested(&self) -> bool {
        self.cancel.map(|check| check()).unwrap_or(false)
    }

    /// Return `Err(Cancelled)` if cancellation was requested
    pub(crate) fn checkpoint(&self, reason: &str) -> Result<()> {
        if self.is_cancel_requested() {
            return Err(Error::Cancelled {
                partial_output: self.partial_output.clone(),
                reason: reason.to_string(),
            });
        }
        Ok(())
    }
}
