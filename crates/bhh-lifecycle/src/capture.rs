use crate::host::HostPage;
use bhh_core::{HostSelectors, ParsedCapture, Selector};
use bhh_history::{CaptureOutcome, HistoryService};
use std::rc::{Rc, Weak};
use tracing::{debug, error};

pub trait CaptureExtractor {
    /// The operation currently visible in the host editors, or `None` when
    /// nothing parseable is there.
    fn extract(&self) -> Option<ParsedCapture>;
}

impl<F> CaptureExtractor for F
where
    F: Fn() -> Option<ParsedCapture>,
{
    fn extract(&self) -> Option<ParsedCapture> {
        self()
    }
}

/// Reads the first editor as the operation and the second as its variables.
pub struct EditorCaptureExtractor {
    host: Weak<dyn HostPage>,
    editors: Selector,
}

impl EditorCaptureExtractor {
    pub fn new(host: &Rc<dyn HostPage>, selectors: &HostSelectors) -> Self {
        Self {
            host: Rc::downgrade(host),
            editors: selectors.editors.clone(),
        }
    }
}

impl CaptureExtractor for EditorCaptureExtractor {
    fn extract(&self) -> Option<ParsedCapture> {
        let host = self.host.upgrade()?;
        let editors = host.query_all(&self.editors);
        let [operation, variables, ..] = editors.as_slice() else {
            debug!("editors_missing: found {} of 2", editors.len());
            return None;
        };
        let operation_text = host.text_content(*operation)?;
        let variables_text = host.text_content(*variables);

        let capture = ParsedCapture::from_editor_text(&operation_text, variables_text.as_deref());
        (!capture.is_empty()).then_some(capture)
    }
}

/// Runs on every click of the host's execute control.
pub struct CaptureHandler {
    extractor: Box<dyn CaptureExtractor>,
    history: Rc<HistoryService>,
}

impl CaptureHandler {
    pub fn new(extractor: impl CaptureExtractor + 'static, history: Rc<HistoryService>) -> Self {
        Self {
            extractor: Box::new(extractor),
            history,
        }
    }

    pub fn history(&self) -> &Rc<HistoryService> {
        &self.history
    }

    /// Never fails: this runs inside a host event listener, so errors stop
    /// here.
    pub fn handle_execute(&self) -> Option<CaptureOutcome> {
        let Some(capture) = self.extractor.extract() else {
            debug!("capture_skipped: nothing parseable in editors");
            return None;
        };
        match self.history.record(&capture) {
            Ok(outcome) => Some(outcome),
            Err(err) => {
                error!("capture_failed: {err}");
                None
            }
        }
    }
}
