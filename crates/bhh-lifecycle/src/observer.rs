use crate::host::{HostPage, MutationCallback, ObservationId};
use crate::LifecycleError;
use bhh_core::{HostSelectors, Selector};
use std::cell::Cell;
use std::rc::{Rc, Weak};
use tracing::{debug, error, warn};

/// Watches the observer root for structural changes and reports when the
/// target region comes and goes. Each absent/present transition fires its
/// callback exactly once.
pub struct AttachmentObserver {
    host: Rc<dyn HostPage>,
    root: Selector,
    target: Selector,
    on_appear: Rc<dyn Fn()>,
    on_disappear: Rc<dyn Fn()>,
    present: Rc<Cell<bool>>,
    observation: Option<ObservationId>,
}

impl AttachmentObserver {
    pub fn new(
        host: Rc<dyn HostPage>,
        selectors: &HostSelectors,
        on_appear: Rc<dyn Fn()>,
        on_disappear: Rc<dyn Fn()>,
    ) -> Self {
        Self {
            host,
            root: selectors.observer_root.clone(),
            target: selectors.target_region.clone(),
            on_appear,
            on_disappear,
            present: Rc::new(Cell::new(false)),
            observation: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.observation.is_some()
    }

    pub fn is_present(&self) -> bool {
        self.present.get()
    }

    pub fn start(&mut self) -> Result<(), LifecycleError> {
        if self.observation.is_some() {
            warn!("observer_start_ignored: already running");
            return Ok(());
        }
        let Some(root) = self.host.query(&self.root) else {
            error!("observer_root_missing: {}", self.root);
            return Err(LifecycleError::RootMissing {
                selector: self.root.to_string(),
            });
        };

        self.present.set(false);
        let check = presence_check(
            Rc::downgrade(&self.host),
            self.target.clone(),
            self.present.clone(),
            self.on_appear.clone(),
            self.on_disappear.clone(),
        );
        self.observation = Some(self.host.observe_subtree(root, check.clone())?);
        debug!("observer_started: root={} target={}", self.root, self.target);

        check();
        Ok(())
    }

    pub fn stop(&mut self) {
        if let Some(observation) = self.observation.take() {
            self.host.disconnect(observation);
            debug!("observer_stopped");
        }
    }
}

impl Drop for AttachmentObserver {
    fn drop(&mut self) {
        self.stop();
    }
}

fn presence_check(
    host: Weak<dyn HostPage>,
    target: Selector,
    present: Rc<Cell<bool>>,
    on_appear: Rc<dyn Fn()>,
    on_disappear: Rc<dyn Fn()>,
) -> MutationCallback {
    Rc::new(move || {
        let Some(host) = host.upgrade() else {
            return;
        };
        let now = host.query(&target).is_some();
        if present.replace(now) == now {
            return;
        }
        if now {
            debug!("target_region_appeared: {target}");
            on_appear();
        } else {
            debug!("target_region_disappeared: {target}");
            on_disappear();
        }
    })
}
