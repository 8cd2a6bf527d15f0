use crate::host::{HostPage, MutationCallback, NodeRef, ObservationId};
use crate::LifecycleError;
use bhh_core::HostSelectors;
use std::rc::Rc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::debug;

/// The host nodes a mount needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Anchors {
    pub region: NodeRef,
    pub toolbar: NodeRef,
    pub execute: NodeRef,
}

fn locate(host: &dyn HostPage, selectors: &HostSelectors) -> Result<Anchors, Vec<String>> {
    let region = host.query(&selectors.target_region);
    let toolbar = host.query(&selectors.toolbar);
    let execute = host.query(&selectors.execute_control);
    match (region, toolbar, execute) {
        (Some(region), Some(toolbar), Some(execute)) => Ok(Anchors {
            region,
            toolbar,
            execute,
        }),
        _ => {
            let missing = [
                (region.is_none(), &selectors.target_region),
                (toolbar.is_none(), &selectors.toolbar),
                (execute.is_none(), &selectors.execute_control),
            ]
            .into_iter()
            .filter(|(absent, _)| *absent)
            .map(|(_, selector)| selector.to_string())
            .collect();
            Err(missing)
        }
    }
}

struct ObservationGuard {
    host: Rc<dyn HostPage>,
    observation: ObservationId,
}

impl Drop for ObservationGuard {
    fn drop(&mut self) {
        self.host.disconnect(self.observation);
    }
}

/// Resolves as soon as every anchor is present, re-checking after each
/// mutation batch under the observer root, or fails once `timeout` elapses.
pub async fn wait_for_anchors(
    host: &Rc<dyn HostPage>,
    selectors: &HostSelectors,
    timeout: Duration,
) -> Result<Anchors, LifecycleError> {
    let missing = match locate(host.as_ref(), selectors) {
        Ok(anchors) => return Ok(anchors),
        Err(missing) => missing,
    };
    let root = host
        .query(&selectors.observer_root)
        .ok_or_else(|| LifecycleError::RootMissing {
            selector: selectors.observer_root.to_string(),
        })?;
    debug!("anchor_wait_started: missing={}", missing.join(", "));

    let notify = Rc::new(Notify::new());
    let signal = notify.clone();
    let callback: MutationCallback = Rc::new(move || signal.notify_one());
    let _guard = ObservationGuard {
        observation: host.observe_subtree(root, callback)?,
        host: host.clone(),
    };

    let wait = async {
        loop {
            notify.notified().await;
            if let Ok(anchors) = locate(host.as_ref(), selectors) {
                return anchors;
            }
        }
    };

    match tokio::time::timeout(timeout, wait).await {
        Ok(anchors) => Ok(anchors),
        Err(_) => match locate(host.as_ref(), selectors) {
            Ok(anchors) => Ok(anchors),
            Err(missing) => Err(LifecycleError::AnchorTimeout { missing, timeout }),
        },
    }
}
