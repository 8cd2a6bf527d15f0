mod anchors;
mod capture;
mod controller;
pub mod host;
mod memory_host;
mod observer;
mod runtime;
mod settings;

use std::time::Duration;
use thiserror::Error;

pub use anchors::{wait_for_anchors, Anchors};
pub use capture::{CaptureExtractor, CaptureHandler, EditorCaptureExtractor};
pub use controller::{
    decide, Directive, LifecycleConfig, LifecycleController, LifecyclePhase, LifecycleSignal,
    LifecycleSnapshot, MountOutcome, SkipReason, UnmountOutcome, DEFAULT_ANCHOR_TIMEOUT,
};
pub use host::{DomError, HostPage, ListenerId, NodeRef, ObservationId};
pub use memory_host::{ConsoleNodes, Element, ElementSpec, MemoryHost};
pub use observer::AttachmentObserver;
pub use runtime::LifecycleRuntime;
pub use settings::{LogLevelSink, SettingsProvider, SettingsSubscription};

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("observer root not found: {selector}")]
    RootMissing { selector: String },
    #[error("anchors missing after {timeout:?}: {}", .missing.join(", "))]
    AnchorTimeout {
        missing: Vec<String>,
        timeout: Duration,
    },
    #[error("host page error: {0}")]
    Dom(#[from] DomError),
}
