use crate::anchors::{wait_for_anchors, Anchors};
use crate::capture::CaptureHandler;
use crate::host::{HostPage, ListenerId, NodeRef};
use crate::settings::LogLevelSink;
use crate::LifecycleError;
use bhh_core::{HostSelectors, LogLevel, Settings, SettingsChange};
use serde::Serialize;
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

pub const DEFAULT_ANCHOR_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleConfig {
    pub selectors: HostSelectors,
    pub anchor_timeout: Duration,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            selectors: HostSelectors::default(),
            anchor_timeout: DEFAULT_ANCHOR_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LifecyclePhase {
    Detached,
    Attached,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleSignal {
    Appear,
    Disappear,
    SettingsChanged(SettingsChange),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Disabled,
    AlreadyAttached,
    AlreadyDetached,
    RegionAbsent,
    NoEffect,
}

impl SkipReason {
    fn is_warning(self) -> bool {
        matches!(self, Self::AlreadyAttached | Self::AlreadyDetached)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    ApplyLogLevel(LogLevel),
    Mount,
    Unmount,
    ApplyNativeVisibility(bool),
    Skip(SkipReason),
}

/// The transition table. `settings` is what is in force once the signal has
/// been taken into account.
pub fn decide(
    phase: LifecyclePhase,
    region_present: bool,
    signal: &LifecycleSignal,
    settings: &Settings,
) -> Vec<Directive> {
    use Directive::*;
    use LifecyclePhase::*;

    match signal {
        LifecycleSignal::Appear => match phase {
            _ if !settings.enabled => vec![Skip(SkipReason::Disabled)],
            Attached => vec![Skip(SkipReason::AlreadyAttached)],
            Detached => vec![Mount],
        },
        LifecycleSignal::Disappear => match phase {
            Attached => vec![Unmount],
            Detached => vec![Skip(SkipReason::AlreadyDetached)],
        },
        LifecycleSignal::SettingsChanged(change) => {
            let mut directives = Vec::new();
            if change.log_level_changed() {
                directives.push(ApplyLogLevel(change.new.log_level));
            }
            if change.enabled_changed() {
                match (change.new.enabled, phase) {
                    (true, Detached) if region_present => directives.push(Mount),
                    (true, Detached) => directives.push(Skip(SkipReason::RegionAbsent)),
                    (false, Attached) => directives.push(Unmount),
                    _ => {}
                }
            } else if change.visibility_changed() && phase == Attached {
                directives.push(ApplyNativeVisibility(change.new.show_host_original_ui));
            }
            if directives.is_empty() {
                directives.push(Skip(SkipReason::NoEffect));
            }
            directives
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountOutcome {
    Attached,
    AlreadyAttached,
    InFlight,
    Disabled,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnmountOutcome {
    Detached,
    AlreadyDetached,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleSnapshot {
    pub phase: LifecyclePhase,
    pub region_present: bool,
    pub in_flight: bool,
    pub settings: Settings,
    pub mounts: u64,
    pub unmounts: u64,
}

/// Side effects created by one mount, in creation order.
#[derive(Debug, Default)]
struct MountProgress {
    containers: Vec<String>,
    listener: Option<ListenerId>,
    native_history: Option<NodeRef>,
}

struct State {
    phase: LifecyclePhase,
    region_present: bool,
    in_flight: bool,
    settings: Settings,
    mounted: Option<MountProgress>,
    mounts: u64,
    unmounts: u64,
}

struct TransitionGuard<'a> {
    state: &'a RefCell<State>,
}

impl<'a> TransitionGuard<'a> {
    fn begin(state: &'a RefCell<State>) -> Self {
        state.borrow_mut().in_flight = true;
        Self { state }
    }
}

impl Drop for TransitionGuard<'_> {
    fn drop(&mut self) {
        self.state.borrow_mut().in_flight = false;
    }
}

pub struct LifecycleController {
    host: Rc<dyn HostPage>,
    config: LifecycleConfig,
    capture: Rc<CaptureHandler>,
    log_sink: Rc<dyn LogLevelSink>,
    state: RefCell<State>,
}

impl LifecycleController {
    pub fn new(
        host: Rc<dyn HostPage>,
        config: LifecycleConfig,
        capture: Rc<CaptureHandler>,
        log_sink: Rc<dyn LogLevelSink>,
        settings: Settings,
    ) -> Self {
        Self {
            host,
            config,
            capture,
            log_sink,
            state: RefCell::new(State {
                phase: LifecyclePhase::Detached,
                region_present: false,
                in_flight: false,
                settings,
                mounted: None,
                mounts: 0,
                unmounts: 0,
            }),
        }
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    pub fn settings(&self) -> Settings {
        self.state.borrow().settings
    }

    pub fn phase(&self) -> LifecyclePhase {
        self.state.borrow().phase
    }

    pub fn snapshot(&self) -> LifecycleSnapshot {
        let state = self.state.borrow();
        LifecycleSnapshot {
            phase: state.phase,
            region_present: state.region_present,
            in_flight: state.in_flight,
            settings: state.settings,
            mounts: state.mounts,
            unmounts: state.unmounts,
        }
    }

    pub async fn handle(&self, signal: LifecycleSignal) {
        let (phase, region_present, settings) = {
            let mut state = self.state.borrow_mut();
            match signal {
                LifecycleSignal::Appear => state.region_present = true,
                LifecycleSignal::Disappear => state.region_present = false,
                LifecycleSignal::SettingsChanged(change) => state.settings = change.new,
            }
            (state.phase, state.region_present, state.settings)
        };

        for directive in decide(phase, region_present, &signal, &settings) {
            match directive {
                Directive::ApplyLogLevel(level) => {
                    info!("log_level_applied: {level}");
                    self.log_sink.apply_log_level(level);
                }
                Directive::Mount => {
                    self.attach().await;
                }
                Directive::Unmount => {
                    self.detach();
                }
                Directive::ApplyNativeVisibility(visible) => {
                    self.apply_native_visibility(visible);
                }
                Directive::Skip(reason) if reason.is_warning() => {
                    warn!("lifecycle_signal_ignored: {signal:?} ({reason:?})");
                }
                Directive::Skip(reason) => {
                    debug!("lifecycle_signal_ignored: {signal:?} ({reason:?})");
                }
            }
        }
    }

    /// Waits for the anchors, then creates the containers, hooks the execute
    /// control and applies native history visibility. Any failure on the way
    /// undoes whatever was already created.
    pub async fn attach(&self) -> MountOutcome {
        {
            let state = self.state.borrow();
            if state.phase == LifecyclePhase::Attached {
                warn!("mount_skipped: already attached");
                return MountOutcome::AlreadyAttached;
            }
            if state.in_flight {
                debug!("mount_skipped: transition in flight");
                return MountOutcome::InFlight;
            }
            if !state.settings.enabled {
                debug!("mount_skipped: disabled");
                return MountOutcome::Disabled;
            }
        }
        let _transition = TransitionGuard::begin(&self.state);

        let anchors = match wait_for_anchors(
            &self.host,
            &self.config.selectors,
            self.config.anchor_timeout,
        )
        .await
        {
            Ok(anchors) => anchors,
            Err(err) => {
                error!("mount_aborted: {err}");
                return MountOutcome::Failed;
            }
        };

        let settings = self.state.borrow().settings;
        if !settings.enabled {
            info!("mount_aborted: disabled while waiting for anchors");
            return MountOutcome::Disabled;
        }

        let mut progress = MountProgress::default();
        if let Err(err) = self.mount_side_effects(&anchors, &settings, &mut progress) {
            error!("mount_failed: {err}");
            self.teardown(progress);
            return MountOutcome::Failed;
        }

        let mut state = self.state.borrow_mut();
        state.phase = LifecyclePhase::Attached;
        state.mounted = Some(progress);
        state.mounts += 1;
        info!("lifecycle_attached: region={}", anchors.region);
        MountOutcome::Attached
    }

    /// Tears down in reverse order. Internal state is reset even if the host
    /// refuses parts of the cleanup.
    pub fn detach(&self) -> UnmountOutcome {
        let progress = {
            let mut state = self.state.borrow_mut();
            if state.phase == LifecyclePhase::Detached {
                warn!("unmount_skipped: already detached");
                return UnmountOutcome::AlreadyDetached;
            }
            state.phase = LifecyclePhase::Detached;
            state.unmounts += 1;
            state.mounted.take()
        };
        if let Some(progress) = progress {
            self.teardown(progress);
        }
        info!("lifecycle_detached");
        UnmountOutcome::Detached
    }

    pub fn apply_native_visibility(&self, visible: bool) {
        if self.phase() != LifecyclePhase::Attached {
            debug!("native_visibility_skipped: not attached");
            return;
        }
        let Some(node) = self.host.query(&self.config.selectors.native_history_control) else {
            debug!("native_history_control_missing");
            return;
        };
        match self.host.set_visible(node, visible) {
            Ok(()) => {
                if let Some(mounted) = self.state.borrow_mut().mounted.as_mut() {
                    mounted.native_history = Some(node);
                }
                info!("native_history_visibility: visible={visible}");
            }
            Err(err) => error!("native_history_visibility_failed: {err}"),
        }
    }

    fn mount_side_effects(
        &self,
        anchors: &Anchors,
        settings: &Settings,
        progress: &mut MountProgress,
    ) -> Result<(), LifecycleError> {
        let selectors = &self.config.selectors;
        for id in [&selectors.button_container_id, &selectors.pane_container_id] {
            if self.host.remove_element(id) {
                warn!("stale_container_removed: {id}");
            }
        }

        let toolbar_len = self.host.child_count(anchors.toolbar)?;
        self.host
            .insert_container(anchors.toolbar, &selectors.button_container_id, toolbar_len.min(1))?;
        progress.containers.push(selectors.button_container_id.clone());

        let region_len = self.host.child_count(anchors.region)?;
        self.host.insert_container(
            anchors.region,
            &selectors.pane_container_id,
            region_len.saturating_sub(1),
        )?;
        progress.containers.push(selectors.pane_container_id.clone());

        let handler = Rc::downgrade(&self.capture);
        let listener = self.host.add_click_listener(
            anchors.execute,
            Rc::new(move || {
                if let Some(handler) = handler.upgrade() {
                    handler.handle_execute();
                }
            }),
        )?;
        progress.listener = Some(listener);

        match self.host.query(&selectors.native_history_control) {
            Some(node) => {
                self.host.set_visible(node, settings.show_host_original_ui)?;
                progress.native_history = Some(node);
            }
            None => debug!("native_history_control_missing"),
        }
        Ok(())
    }

    fn teardown(&self, progress: MountProgress) {
        if let Some(node) = progress.native_history {
            if let Err(err) = self.host.set_visible(node, true) {
                debug!("native_history_restore_skipped: {err}");
            }
        }
        for id in progress.containers.iter().rev() {
            if !self.host.remove_element(id) {
                debug!("container_already_gone: {id}");
            }
        }
        if let Some(listener) = progress.listener {
            if !self.host.remove_click_listener(listener) {
                debug!("execute_listener_already_gone");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_host::{ConsoleNodes, MemoryHost};
    use bhh_history::HistoryService;
    use bhh_storage::HistoryStore;

    #[derive(Default)]
    struct RecordingSink {
        levels: RefCell<Vec<LogLevel>>,
    }

    impl LogLevelSink for RecordingSink {
        fn apply_log_level(&self, level: LogLevel) {
            self.levels.borrow_mut().push(level);
        }
    }

    struct Fixture {
        memory: Rc<MemoryHost>,
        controller: LifecycleController,
        sink: Rc<RecordingSink>,
        history: Rc<HistoryService>,
    }

    fn fixture(settings: Settings) -> Fixture {
        let memory = Rc::new(MemoryHost::new());
        let host: Rc<dyn HostPage> = memory.clone();
        let history = Rc::new(HistoryService::new(
            HistoryStore::open_in_memory().expect("open db"),
        ));
        let capture = Rc::new(CaptureHandler::new(
            crate::capture::EditorCaptureExtractor::new(&host, &HostSelectors::default()),
            history.clone(),
        ));
        let sink = Rc::new(RecordingSink::default());
        let controller = LifecycleController::new(
            host,
            LifecycleConfig::default(),
            capture,
            sink.clone(),
            settings,
        );
        Fixture {
            memory,
            controller,
            sink,
            history,
        }
    }

    fn change(old: Settings, new: Settings) -> LifecycleSignal {
        LifecycleSignal::SettingsChanged(SettingsChange { old, new })
    }

    fn disabled() -> Settings {
        Settings {
            enabled: false,
            ..Settings::default()
        }
    }

    fn containers(memory: &MemoryHost) -> (Option<NodeRef>, Option<NodeRef>) {
        let selectors = HostSelectors::default();
        (
            memory.find_by_id(&selectors.button_container_id),
            memory.find_by_id(&selectors.pane_container_id),
        )
    }

    fn assert_clean(memory: &MemoryHost, console: &ConsoleNodes) {
        assert_eq!(containers(memory), (None, None));
        assert_eq!(memory.listener_count(), 0);
        assert_eq!(memory.is_visible(console.native_history), Some(true));
    }

    #[test]
    fn decide_table() {
        use Directive::*;
        use LifecyclePhase::*;
        let on = Settings::default();
        let off = disabled();

        assert_eq!(decide(Detached, true, &LifecycleSignal::Appear, &on), vec![Mount]);
        assert_eq!(
            decide(Detached, true, &LifecycleSignal::Appear, &off),
            vec![Skip(SkipReason::Disabled)]
        );
        assert_eq!(
            decide(Attached, true, &LifecycleSignal::Appear, &on),
            vec![Skip(SkipReason::AlreadyAttached)]
        );
        assert_eq!(decide(Attached, false, &LifecycleSignal::Disappear, &on), vec![Unmount]);
        assert_eq!(
            decide(Detached, false, &LifecycleSignal::Disappear, &on),
            vec![Skip(SkipReason::AlreadyDetached)]
        );

        assert_eq!(decide(Attached, true, &change(on, off), &off), vec![Unmount]);
        assert_eq!(decide(Detached, true, &change(off, on), &on), vec![Mount]);
        assert_eq!(
            decide(Detached, false, &change(off, on), &on),
            vec![Skip(SkipReason::RegionAbsent)]
        );

        let visible = Settings {
            show_host_original_ui: true,
            ..on
        };
        assert_eq!(
            decide(Attached, true, &change(on, visible), &visible),
            vec![ApplyNativeVisibility(true)]
        );
        assert_eq!(
            decide(Detached, true, &change(on, visible), &visible),
            vec![Skip(SkipReason::NoEffect)]
        );

        let quiet_and_off = Settings {
            log_level: LogLevel::Error,
            ..off
        };
        assert_eq!(
            decide(Attached, true, &change(on, quiet_and_off), &quiet_and_off),
            vec![ApplyLogLevel(LogLevel::Error), Unmount]
        );
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn attach_twice_creates_containers_once() {
        let fx = fixture(Settings::default());
        let console = fx.memory.mount_console().expect("console");

        assert_eq!(fx.controller.attach().await, MountOutcome::Attached);
        assert_eq!(fx.controller.attach().await, MountOutcome::AlreadyAttached);

        let (button, pane) = containers(&fx.memory);
        let button = button.expect("button container");
        let pane = pane.expect("pane container");
        let toolbar = fx.memory.children(console.toolbar);
        assert_eq!(toolbar.len(), 4);
        assert_eq!(toolbar[1], button);
        let region = fx.memory.children(console.region);
        assert_eq!(region, vec![region[0], pane, console.explorer]);
        assert_eq!(fx.memory.listener_count(), 1);
        assert_eq!(fx.memory.is_visible(console.native_history), Some(false));
        assert_eq!(fx.controller.snapshot().mounts, 1);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn disabling_while_attached_restores_the_host() {
        let fx = fixture(Settings::default());
        let console = fx.memory.mount_console().expect("console");
        fx.controller.handle(LifecycleSignal::Appear).await;
        assert_eq!(fx.controller.phase(), LifecyclePhase::Attached);

        fx.controller
            .handle(change(Settings::default(), disabled()))
            .await;

        assert_eq!(fx.controller.phase(), LifecyclePhase::Detached);
        assert_clean(&fx.memory, &console);
        assert_eq!(fx.controller.detach(), UnmountOutcome::AlreadyDetached);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn anchor_timeout_leaves_nothing_behind() {
        let fx = fixture(Settings::default());
        let body = fx.memory.body();
        fx.memory
            .append(
                body,
                crate::memory_host::ElementSpec::new("div").class("graphiql-container"),
            )
            .expect("region without toolbar");

        let started = tokio::time::Instant::now();
        assert_eq!(fx.controller.attach().await, MountOutcome::Failed);
        assert!(started.elapsed() >= DEFAULT_ANCHOR_TIMEOUT);

        let snapshot = fx.controller.snapshot();
        assert_eq!(snapshot.phase, LifecyclePhase::Detached);
        assert!(!snapshot.in_flight);
        assert_eq!(containers(&fx.memory), (None, None));
        assert_eq!(fx.memory.observer_count(), 0);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn rejected_insert_rolls_back_the_partial_mount() {
        let fx = fixture(Settings::default());
        let console = fx.memory.mount_console().expect("console");
        fx.memory.reject_inserts_into(console.region, "region is frozen");

        assert_eq!(fx.controller.attach().await, MountOutcome::Failed);
        assert_eq!(fx.controller.phase(), LifecyclePhase::Detached);
        assert_clean(&fx.memory, &console);
        assert_eq!(fx.memory.children(console.toolbar).len(), 3);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn stale_containers_are_replaced() {
        let fx = fixture(Settings::default());
        let console = fx.memory.mount_console().expect("console");
        let selectors = HostSelectors::default();
        fx.memory
            .insert_container(console.region, &selectors.pane_container_id, 0)
            .expect("stale pane");

        assert_eq!(fx.controller.attach().await, MountOutcome::Attached);
        let selector = bhh_core::Selector::id(selectors.pane_container_id.clone());
        assert_eq!(fx.memory.count_matching(&selector), 1);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn visibility_and_log_level_apply_without_remount() {
        let fx = fixture(Settings::default());
        let console = fx.memory.mount_console().expect("console");
        fx.controller.handle(LifecycleSignal::Appear).await;

        let shown = Settings {
            show_host_original_ui: true,
            log_level: LogLevel::Debug,
            ..Settings::default()
        };
        fx.controller
            .handle(change(Settings::default(), shown))
            .await;

        assert_eq!(fx.memory.is_visible(console.native_history), Some(true));
        assert_eq!(*fx.sink.levels.borrow(), vec![LogLevel::Debug]);
        let snapshot = fx.controller.snapshot();
        assert_eq!(snapshot.mounts, 1);
        assert_eq!(snapshot.unmounts, 0);
        assert_eq!(snapshot.settings, shown);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn enabling_without_region_waits_for_appear() {
        let fx = fixture(disabled());
        fx.controller
            .handle(change(disabled(), Settings::default()))
            .await;
        assert_eq!(fx.controller.phase(), LifecyclePhase::Detached);

        fx.memory.mount_console().expect("console");
        fx.controller.handle(LifecycleSignal::Appear).await;
        assert_eq!(fx.controller.phase(), LifecyclePhase::Attached);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn execute_click_records_history() {
        let fx = fixture(Settings::default());
        let console = fx.memory.mount_console().expect("console");
        fx.controller.handle(LifecycleSignal::Appear).await;

        fx.memory
            .set_editor_text(&console, "mutation addUser { id }", "{\"name\": \"ada\"}")
            .expect("editor text");
        assert_eq!(fx.memory.click(console.execute), 1);
        assert_eq!(fx.memory.click(console.execute), 1);

        let entries = fx.history.list().expect("list");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].display_name, "addUser");

        fx.controller.handle(LifecycleSignal::Disappear).await;
        assert_eq!(fx.memory.click(console.execute), 0);
    }
}
