use crate::capture::CaptureHandler;
use crate::controller::{LifecycleConfig, LifecycleController, LifecycleSignal};
use crate::host::HostPage;
use crate::observer::AttachmentObserver;
use crate::settings::{LogLevelSink, SettingsProvider};
use crate::LifecycleError;
use std::rc::Rc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Wires observer callbacks and settings changes into one controller. Signals
/// are handled on spawned local tasks, so this must live inside a
/// `tokio::task::LocalSet`.
pub struct LifecycleRuntime {
    controller: Rc<LifecycleController>,
    observer: AttachmentObserver,
    settings_task: JoinHandle<()>,
}

impl LifecycleRuntime {
    pub fn start(
        host: Rc<dyn HostPage>,
        config: LifecycleConfig,
        capture: Rc<CaptureHandler>,
        log_sink: Rc<dyn LogLevelSink>,
        settings: &SettingsProvider,
    ) -> Result<Self, LifecycleError> {
        let mut subscription = settings.subscribe();
        let initial = subscription.current();
        log_sink.apply_log_level(initial.log_level);

        let controller = Rc::new(LifecycleController::new(
            host.clone(),
            config,
            capture,
            log_sink,
            initial,
        ));

        let mut observer = AttachmentObserver::new(
            host,
            &controller.config().selectors,
            dispatch(&controller, LifecycleSignal::Appear),
            dispatch(&controller, LifecycleSignal::Disappear),
        );

        // Each change gets its own task: a mount waiting for anchors must not
        // hold back later changes, which it reads through the shared state.
        let weak = Rc::downgrade(&controller);
        let settings_task = tokio::task::spawn_local(async move {
            while let Some(change) = subscription.next().await {
                let Some(controller) = weak.upgrade() else {
                    break;
                };
                tokio::task::spawn_local(async move {
                    controller
                        .handle(LifecycleSignal::SettingsChanged(change))
                        .await;
                });
            }
            debug!("settings_subscription_closed");
        });

        if let Err(err) = observer.start() {
            settings_task.abort();
            return Err(err);
        }
        info!(
            "lifecycle_runtime_started: enabled={} selectors=v{}",
            initial.enabled,
            controller.config().selectors.version
        );

        Ok(Self {
            controller,
            observer,
            settings_task,
        })
    }

    pub fn controller(&self) -> &Rc<LifecycleController> {
        &self.controller
    }

    pub fn observer(&self) -> &AttachmentObserver {
        &self.observer
    }

    /// Stops observing and unmounts if attached.
    pub fn shutdown(mut self) {
        self.observer.stop();
        self.settings_task.abort();
        if self.controller.phase() == crate::LifecyclePhase::Attached {
            self.controller.detach();
        }
        info!("lifecycle_runtime_stopped");
    }
}

impl Drop for LifecycleRuntime {
    fn drop(&mut self) {
        self.settings_task.abort();
    }
}

fn dispatch(controller: &Rc<LifecycleController>, signal: LifecycleSignal) -> Rc<dyn Fn()> {
    let controller = Rc::downgrade(controller);
    Rc::new(move || {
        let Some(controller) = controller.upgrade() else {
            return;
        };
        tokio::task::spawn_local(async move {
            controller.handle(signal).await;
        });
    })
}
