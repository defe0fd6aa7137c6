//! Session controller
//!
//! A [`Session`] owns everything one running machine needs: the persistent
//! slot, the output gate, the coalescer and the input router. Startup runs
//! once in [`Session::start`]; afterwards [`Session::run`] drives a single
//! `select!` loop over machine output, renderer input, timers and user
//! commands. Handlers run to completion, so no component state is shared
//! across tasks.

use crate::boot::{show_prompt, BootGate, BootPath};
use crate::coalescer::{sleep_until_deadline, OutputCoalescer};
use crate::config::SessionConfig;
use crate::error::{CoreError, Result};
use crate::event::Subscription;
use crate::fetch::StateFetcher;
use crate::gate::OutputGate;
use crate::input::InputRouter;
use crate::machine::{Machine, MachineLauncher};
use crate::notify::{ControlsGuard, Notifier};
use crate::store::{resolve_initial_state, KvBackend, SnapshotStore, StoreHandle};
use crate::terminal::{Clipboard, Renderer};
use crate::types::{MachineEvent, RendererEvent, Snapshot};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};

/// Machine events handled per loop pass before other sources are polled
pub const OUTPUT_BATCH: usize = 1024;

/// Written after the loading banner when there is no state to restore
pub const COLD_BOOT_MESSAGE: &str = "booting... this may take a minute\r\n";

pub const SAVE_FAILED_MESSAGE: &str = "Failed to save state. Please try again later.";

pub const REBOOT_QUESTION: &str = "Default state not found. Do you want to reboot the system?";

/// Bold italic green "<distro> Linux loading..." line
pub fn loading_banner(distro: &str) -> String {
    format!("\x1b[1;3;32m{distro} Linux loading...\x1b[0m\r\n")
}

/// User action delivered to a running session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    SaveNow,
    ResetToDefault,
    /// Export the current state into this directory
    Export(PathBuf),
    /// Restore the state stored in this file
    Import(PathBuf),
    Shutdown,
}

/// Why [`Session::run`] returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionExit {
    Shutdown,
    /// The saved state was discarded; relaunch with a cold boot
    Reboot,
}

/// Result of a reset or import
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreOutcome {
    Restored,
    /// Restore failed and the user declined to reboot
    Cancelled,
    /// Restore failed, the saved record was cleared, the host should relaunch
    RebootRequested,
}

/// External collaborators a session is built from
pub struct SessionDeps {
    pub launcher: Arc<dyn MachineLauncher>,
    pub renderer: Arc<dyn Renderer>,
    pub clipboard: Arc<dyn Clipboard>,
    pub notifier: Arc<dyn Notifier>,
    pub backend: Arc<dyn KvBackend>,
    pub fetcher: Arc<dyn StateFetcher>,
}

pub struct Session {
    config: SessionConfig,
    machine: Arc<dyn Machine>,
    renderer: Arc<dyn Renderer>,
    notifier: Arc<dyn Notifier>,
    fetcher: Arc<dyn StateFetcher>,
    store: Option<StoreHandle>,
    gate: OutputGate,
    coalescer: OutputCoalescer,
    router: InputRouter,
    machine_events: Subscription<MachineEvent>,
    renderer_events: Subscription<RendererEvent>,
    autosave: Option<Interval>,
    pending_export: Option<(Instant, PathBuf)>,
    boot_path: BootPath,
}

impl Session {
    /// Launch the machine and wait until it is interactive
    ///
    /// Storage problems never abort startup: without a store the session
    /// falls back to the default state, and without that to a cold boot.
    pub async fn start(deps: SessionDeps, config: SessionConfig) -> Result<Self> {
        config.validate()?;
        let SessionDeps {
            launcher,
            renderer,
            clipboard,
            notifier,
            backend,
            fetcher,
        } = deps;

        notifier.set_controls_enabled(false);
        notifier.set_loading(true);
        renderer.reset();
        renderer.write(&loading_banner(&config.distro_name));

        let store = match SnapshotStore::new(backend, config.store.clone()).open().await {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!("Continuing without persistent state: {}", e);
                None
            }
        };

        let initial = resolve_initial_state(
            store.as_ref(),
            config.default_state.as_ref(),
            fetcher.as_ref(),
        )
        .await;
        let restoring = initial.is_some();
        match &initial {
            Some(state) => info!("Launching machine from {}", state.describe()),
            None => info!("Launching machine for a cold boot"),
        }
        let machine = launcher.launch(initial).await?;

        if !restoring {
            renderer.reset();
            renderer.write(COLD_BOOT_MESSAGE);
        }

        // Subscribe before start so the loop owns every byte after boot
        let machine_events = machine.subscribe();
        let renderer_events = renderer.subscribe();
        let boot = BootGate::arm(machine.as_ref(), restoring, &config.boot);
        machine.start().await?;
        let boot_path = boot.wait(renderer.as_ref()).await?;

        let gate = OutputGate::new();
        let mut router = InputRouter::new(
            machine.clone(),
            clipboard,
            gate.clone(),
            config.resize_settle(),
        );
        router.attach(renderer.rows(), config.attach_settle())?;

        notifier.set_loading(false);
        renderer.focus();
        notifier.set_controls_enabled(true);

        let autosave = match (config.autosave_interval(), &store) {
            (Some(period), Some(_)) => {
                info!("Autosaving every {}s", period.as_secs());
                let mut interval = interval_at(Instant::now() + period, period);
                interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                Some(interval)
            }
            (Some(_), None) => {
                warn!("Autosave disabled: no persistent store");
                None
            }
            (None, _) => None,
        };

        Ok(Self {
            coalescer: OutputCoalescer::new(gate.clone(), config.flush_delay()),
            config,
            machine,
            renderer,
            notifier,
            fetcher,
            store,
            gate,
            router,
            machine_events,
            renderer_events,
            autosave,
            pending_export: None,
            boot_path,
        })
    }

    pub fn boot_path(&self) -> BootPath {
        self.boot_path
    }

    pub fn machine(&self) -> &Arc<dyn Machine> {
        &self.machine
    }

    pub fn store(&self) -> Option<&StoreHandle> {
        self.store.as_ref()
    }

    pub fn gate(&self) -> &OutputGate {
        &self.gate
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Drive the session until shutdown or a requested reboot
    ///
    /// Dropping every command sender counts as shutdown. The receiver is
    /// borrowed so a host can relaunch after a reboot with the same channel.
    ///
    /// Input, timers and commands are polled ahead of machine output, and
    /// output is drained at most [`OUTPUT_BATCH`] events per pass, so a guest
    /// that never stops printing cannot starve them.
    pub async fn run(
        &mut self,
        commands: &mut mpsc::Receiver<SessionCommand>,
    ) -> Result<SessionExit> {
        loop {
            tokio::select! {
                biased;

                event = self.renderer_events.recv() => match event {
                    Some(event) => self.on_renderer_event(event).await,
                    None => {
                        info!("Renderer closed");
                        return Ok(SessionExit::Shutdown);
                    }
                },

                _ = sleep_until_deadline(self.coalescer.deadline()) => {
                    if let Some(text) = self.coalescer.flush() {
                        self.renderer.write(&text);
                    }
                }

                _ = sleep_until_deadline(self.router.settle_deadline()) => self.router.settle(),

                _ = next_tick(&mut self.autosave) => self.autosave().await,

                _ = sleep_until_deadline(self.pending_export.as_ref().map(|(at, _)| *at)) => {
                    if let Some((_, dir)) = self.pending_export.take() {
                        // Failures are already alerted
                        let _ = self.write_export(&dir).await;
                    }
                }

                command = commands.recv() => {
                    let command = command.unwrap_or(SessionCommand::Shutdown);
                    if let Some(exit) = self.handle_command(command).await {
                        info!("Session ending: {:?}", exit);
                        return Ok(exit);
                    }
                }

                event = self.machine_events.recv() => match event {
                    Some(event) => {
                        self.on_machine_event(event);
                        let mut drained = 1;
                        while drained < OUTPUT_BATCH {
                            match self.machine_events.try_recv() {
                                Some(event) => self.on_machine_event(event),
                                None => break,
                            }
                            drained += 1;
                        }
                        if drained == OUTPUT_BATCH {
                            tokio::task::yield_now().await;
                        }
                    }
                    None => {
                        return Err(CoreError::Machine("machine event stream closed".into()));
                    }
                },
            }
        }
    }

    fn on_machine_event(&mut self, event: MachineEvent) {
        match event {
            MachineEvent::OutputByte(byte) => {
                if let Some(text) = self.coalescer.push(byte) {
                    self.renderer.write(&text);
                }
            }
            MachineEvent::Ready => trace!("Machine ready"),
        }
    }

    async fn on_renderer_event(&mut self, event: RendererEvent) {
        let result = match event {
            RendererEvent::Key(key) => self.router.on_key(&key).await,
            RendererEvent::Input(input) => self.router.on_input(&input),
            RendererEvent::Resize { rows, .. } => self.router.on_resize(rows).map(|_| ()),
        };
        if let Err(e) = result {
            warn!("Input not delivered: {}", e);
        }
    }

    async fn handle_command(&mut self, command: SessionCommand) -> Option<SessionExit> {
        debug!("Command: {:?}", command);
        let outcome = match command {
            SessionCommand::SaveNow => {
                let _ = self.save_now().await;
                return None;
            }
            SessionCommand::ResetToDefault => self.reset_to_default().await,
            SessionCommand::Import(path) => self.import_from(&path).await,
            SessionCommand::Export(dir) => {
                // Give the machine time to finish processing pending input
                self.pending_export = Some((Instant::now() + self.config.export_delay(), dir));
                return None;
            }
            SessionCommand::Shutdown => return Some(SessionExit::Shutdown),
        };

        match outcome {
            Ok(RestoreOutcome::RebootRequested) => Some(SessionExit::Reboot),
            Ok(_) => None,
            Err(e) => {
                error!("Action failed: {}", e);
                None
            }
        }
    }

    /// Persist the current machine state, alerting the user on failure
    pub async fn save_now(&mut self) -> Result<()> {
        let _controls = ControlsGuard::new(self.notifier.clone());
        let result = self.persist().await;
        if let Err(e) = &result {
            error!("Failed to save state: {}", e);
            self.notifier.alert(SAVE_FAILED_MESSAGE);
        }
        result
    }

    /// Periodic save; failures are only logged
    pub async fn autosave(&self) {
        match self.persist().await {
            Ok(()) => debug!("Autosaved state"),
            Err(e) => warn!("Autosave failed: {}", e),
        }
    }

    async fn persist(&self) -> Result<()> {
        let store = self
            .store
            .as_ref()
            .ok_or_else(|| CoreError::WriteFailed("persistent store is unavailable".into()))?;
        let snapshot = self
            .machine
            .save_state()
            .await
            .map_err(|e| CoreError::WriteFailed(e.to_string()))?;
        store.put(&snapshot).await
    }

    /// Replace the machine state with the default snapshot
    ///
    /// On success the saved record is cleared. If the default cannot be
    /// fetched or restored, the user may choose to reboot from scratch.
    pub async fn reset_to_default(&mut self) -> Result<RestoreOutcome> {
        let _controls = ControlsGuard::new(self.notifier.clone());
        info!("Resetting state to default");
        self.machine.stop().await?;

        let restored = match self.fetch_default().await {
            Ok(snapshot) => self.restore(snapshot).await,
            Err(e) => Err(e),
        };
        let outcome = match restored {
            Ok(()) => {
                self.clear_saved().await;
                RestoreOutcome::Restored
            }
            Err(e) => {
                debug!("Failed to restore default state: {}", e);
                self.offer_reboot(REBOOT_QUESTION).await
            }
        };
        self.finish_restore(outcome).await
    }

    /// Restore the raw bytes of a previously exported file
    pub async fn import_from(&mut self, path: &Path) -> Result<RestoreOutcome> {
        let _controls = ControlsGuard::new(self.notifier.clone());
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                error!("Error reading file {}: {}", path.display(), e);
                self.notifier.alert(&format!("Error reading file: {e}"));
                return Err(e.into());
            }
        };

        debug!("Stopping machine before restoring state");
        self.machine.stop().await?;
        let outcome = match self.restore(Snapshot::from(bytes)).await {
            Ok(()) => {
                info!("State restored from {}", path.display());
                RestoreOutcome::Restored
            }
            Err(e) => {
                error!("Failed to restore {}: {}", path.display(), e);
                self.offer_reboot(&format!("{e}. Do you want to reboot the system?"))
                    .await
            }
        };
        self.finish_restore(outcome).await
    }

    /// Wait for the export delay, then write the state into `dir`
    pub async fn export_to(&self, dir: &Path) -> Result<PathBuf> {
        tokio::time::sleep(self.config.export_delay()).await;
        self.write_export(dir).await
    }

    async fn write_export(&self, dir: &Path) -> Result<PathBuf> {
        let _controls = ControlsGuard::new(self.notifier.clone());
        let path = dir.join(&self.config.export_file_name);
        let result: Result<usize> = async {
            let snapshot = self.machine.save_state().await?;
            tokio::fs::write(&path, snapshot.as_bytes()).await?;
            Ok(snapshot.len())
        }
        .await;

        match result {
            Ok(len) => {
                info!("Exported {} bytes to {}", len, path.display());
                Ok(path)
            }
            Err(e) => {
                error!("Failed to export state: {}", e);
                self.notifier.alert(&format!("Failed to export state: {e}"));
                Err(e)
            }
        }
    }

    async fn fetch_default(&self) -> Result<Snapshot> {
        let default = self
            .config
            .default_state
            .as_ref()
            .ok_or_else(|| CoreError::Restore("no default state configured".into()))?;
        let bytes = self.fetcher.fetch(&default.location).await?;
        Ok(Snapshot::from(bytes))
    }

    /// Restore with output gated off; stale buffered output is dropped
    async fn restore(&mut self, snapshot: Snapshot) -> Result<()> {
        self.gate.close();
        self.coalescer.discard();
        let result = self
            .machine
            .restore_state(snapshot)
            .await
            .map_err(CoreError::into_restore);
        if self.router.settle_deadline().is_none() {
            self.gate.open();
        }
        result
    }

    async fn offer_reboot(&self, question: &str) -> RestoreOutcome {
        if self.notifier.confirm(question).await {
            self.clear_saved().await;
            RestoreOutcome::RebootRequested
        } else {
            RestoreOutcome::Cancelled
        }
    }

    async fn finish_restore(&self, outcome: RestoreOutcome) -> Result<RestoreOutcome> {
        if outcome != RestoreOutcome::RebootRequested {
            self.machine.run().await?;
            show_prompt(self.renderer.as_ref(), &self.config.boot.sentinel);
        }
        Ok(outcome)
    }

    async fn clear_saved(&self) {
        if let Some(store) = &self.store {
            if let Err(e) = store.delete().await {
                warn!("Saved state not cleared: {}", e);
            }
        }
    }
}

async fn next_tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::fetch::LocalFetcher;
    use crate::machine::{MockLauncher, MockMachine};
    use crate::notify::MockNotifier;
    use crate::store::MemoryBackend;
    use crate::terminal::{MockClipboard, MockRenderer};
    use crate::types::{InitialState, KeyEvent, Modifiers};
    use std::time::Duration;

    const BOOT: &[u8] = b"OpenRC 0.52 is starting up Linux\r\nlocalhost:~# ";

    struct Harness {
        machine: Arc<MockMachine>,
        launcher: Arc<MockLauncher>,
        renderer: Arc<MockRenderer>,
        clipboard: Arc<MockClipboard>,
        notifier: Arc<MockNotifier>,
        backend: Arc<MemoryBackend>,
        dir: tempfile::TempDir,
    }

    impl Harness {
        fn new(machine: MockMachine) -> Self {
            let machine = Arc::new(machine.with_boot_output(BOOT));
            Self {
                launcher: Arc::new(MockLauncher::new(machine.clone())),
                machine,
                renderer: Arc::new(MockRenderer::default()),
                clipboard: Arc::new(MockClipboard::with_text("uname -a\r")),
                notifier: Arc::new(MockNotifier::new()),
                backend: Arc::new(MemoryBackend::new()),
                dir: tempfile::tempdir().unwrap(),
            }
        }

        fn deps(&self) -> SessionDeps {
            SessionDeps {
                launcher: self.launcher.clone(),
                renderer: self.renderer.clone(),
                clipboard: self.clipboard.clone(),
                notifier: self.notifier.clone(),
                backend: self.backend.clone(),
                fetcher: Arc::new(LocalFetcher::with_base_dir(self.dir.path())),
            }
        }

        fn write_default(&self, bytes: &[u8]) {
            std::fs::write(self.dir.path().join("alpine-state.bin"), bytes).unwrap();
        }

        async fn store(&self) -> StoreHandle {
            SnapshotStore::new(self.backend.clone(), StoreConfig::default())
                .open()
                .await
                .unwrap()
        }

        async fn start(&self) -> Session {
            Session::start(self.deps(), SessionConfig::default())
                .await
                .unwrap()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cold_boot_startup_sequence() {
        let h = Harness::new(MockMachine::new());
        let session = h.start().await;

        assert_eq!(session.boot_path(), BootPath::Cold);
        assert_eq!(h.launcher.launches(), vec![None]);
        assert_eq!(
            h.renderer.writes(),
            vec![
                loading_banner("Alpine"),
                COLD_BOOT_MESSAGE.to_string(),
                String::from_utf8_lossy(BOOT).into_owned(),
            ]
        );
        assert_eq!(h.renderer.reset_count(), 2);
        assert!(h.renderer.is_focused());
        assert!(h.notifier.controls_enabled());
        assert!(!h.notifier.is_loading());

        // Attached with the gate closed until the shell settles
        assert_eq!(h.machine.sent(), vec!["stty rows 24\r\n"]);
        assert!(!session.gate().is_open());
    }

    #[tokio::test]
    async fn test_saved_state_takes_priority() {
        let h = Harness::new(MockMachine::new());
        h.write_default(b"default");
        let saved = Snapshot::from(vec![1u8, 2, 3]);
        h.store().await.put(&saved).await.unwrap();

        let session = h.start().await;
        assert_eq!(session.boot_path(), BootPath::Restore);
        assert_eq!(h.launcher.launches(), vec![Some(InitialState::Saved(saved))]);
        assert!(h.renderer.output().ends_with("localhost:~# "));
    }

    #[tokio::test]
    async fn test_reachable_default_is_restored() {
        let h = Harness::new(MockMachine::new());
        h.write_default(b"default");

        let session = h.start().await;
        assert_eq!(session.boot_path(), BootPath::Restore);
        assert!(matches!(
            h.launcher.launches().as_slice(),
            [Some(InitialState::Default(_))]
        ));
        assert!(!h.renderer.output().contains(COLD_BOOT_MESSAGE));
    }

    #[tokio::test]
    async fn test_empty_sentinel_refuses_to_start() {
        let h = Harness::new(MockMachine::new());
        let config = SessionConfig::default().with_sentinel("");

        let result = Session::start(h.deps(), config).await;
        assert!(matches!(result, Err(CoreError::InvalidState(_))));
        assert!(h.launcher.launches().is_empty());
    }

    #[tokio::test]
    async fn test_store_unavailable_is_not_fatal() {
        let h = Harness::new(MockMachine::new());
        h.backend.set_fail_open(true);

        let mut session = h.start().await;
        assert!(session.store().is_none());
        assert_eq!(session.boot_path(), BootPath::Cold);

        let result = session.save_now().await;
        assert!(matches!(result, Err(CoreError::WriteFailed(_))));
        assert_eq!(h.notifier.alerts(), vec![SAVE_FAILED_MESSAGE]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cold_boot_then_autosave() {
        let h = Harness::new(MockMachine::new().with_state(vec![42u8; 16]));
        let mut session = h.start().await;
        let (tx, mut rx) = mpsc::channel(4);
        let task = tokio::spawn(async move { session.run(&mut rx).await });

        tokio::time::sleep(Duration::from_secs(59)).await;
        assert_eq!(h.store().await.get().await, None);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(
            h.store().await.get().await,
            Some(Snapshot::from(vec![42u8; 16]))
        );
        assert_eq!(h.backend.record_count(), 1);

        tx.send(SessionCommand::Shutdown).await.unwrap();
        assert_eq!(task.await.unwrap().unwrap(), SessionExit::Shutdown);
    }

    #[tokio::test(start_paused = true)]
    async fn test_output_gated_until_attach_settles() {
        let h = Harness::new(MockMachine::new());
        let mut session = h.start().await;
        let (_tx, mut rx) = mpsc::channel(4);
        let task = tokio::spawn(async move { session.run(&mut rx).await });

        // Echo of the stty command arrives while gated
        h.machine.emit_output(b"stty rows 24\r\n");
        tokio::time::sleep(Duration::from_millis(600)).await;
        h.renderer.clear_writes();

        h.machine.emit_output("héllo".as_bytes());
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(h.renderer.writes(), vec!["héllo"]);

        task.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_keys_and_resize_reach_machine() {
        let h = Harness::new(MockMachine::new());
        let mut session = h.start().await;
        let (_tx, mut rx) = mpsc::channel(4);
        let task = tokio::spawn(async move { session.run(&mut rx).await });

        h.renderer.press(KeyEvent::plain("l"));
        h.renderer
            .press(KeyEvent::new("\u{16}", "v", Modifiers::ctrl().with_shift()));
        h.renderer.resize(24);
        h.renderer.resize(40);
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(
            h.machine.sent(),
            vec!["stty rows 24\r\n", "l", "uname -a\r", "stty rows 40\r\n"]
        );
        task.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_input_and_flush_timer_run_under_output_flood() {
        const BACKLOG: usize = 256 * 1024;

        let h = Harness::new(MockMachine::new());
        let mut session = h.start().await;
        let (_tx, mut rx) = mpsc::channel(4);
        let task = tokio::spawn(async move { session.run(&mut rx).await });
        tokio::time::sleep(Duration::from_millis(600)).await;
        h.renderer.clear_writes();

        // No boundary bytes, so only the flush timer can release this output
        h.machine.emit_output(&vec![b'x'; BACKLOG]);
        h.renderer.press(KeyEvent::plain("\u{3}"));

        let mut passes = 0;
        while !h.machine.sent().iter().any(|s| s == "\u{3}") {
            assert!(passes < 50, "interrupt stuck behind machine output");
            tokio::task::yield_now().await;
            passes += 1;
        }

        // The clock only moves when told to while the loop is busy
        tokio::time::advance(Duration::from_millis(150)).await;
        let mut passes = 0;
        while h.renderer.writes().is_empty() {
            assert!(passes < 50, "flush timer never fired during output");
            tokio::task::yield_now().await;
            passes += 1;
        }

        let written = h.renderer.output();
        assert!(written.chars().all(|c| c == 'x'));
        assert!(written.len() < BACKLOG);

        task.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_buffered_output_stays_gated_through_resize() {
        let h = Harness::new(MockMachine::new());
        let mut session = h.start().await;
        let (_tx, mut rx) = mpsc::channel(4);
        let task = tokio::spawn(async move { session.run(&mut rx).await });
        tokio::time::sleep(Duration::from_millis(600)).await;
        h.renderer.clear_writes();

        // Buffered, with the flush timer still pending
        h.machine.emit_output(b"stale");
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(h.renderer.writes().is_empty());

        h.renderer.resize(40);
        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert!(h.renderer.writes().is_empty());
        assert_eq!(h.machine.sent().last().map(String::as_str), Some("stty rows 40\r\n"));

        // Settled: new output reaches the renderer again
        h.machine.emit_output(b"fresh\n");
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(h.renderer.writes(), vec!["fresh\n"]);

        task.abort();
    }

    #[tokio::test]
    async fn test_save_now_writes_record() {
        let h = Harness::new(MockMachine::new().with_state(vec![7u8; 4]));
        let mut session = h.start().await;

        session.save_now().await.unwrap();
        assert_eq!(h.store().await.get().await, Some(Snapshot::from(vec![7u8; 4])));
        assert!(h.notifier.alerts().is_empty());
        assert!(h.notifier.controls_enabled());
    }

    #[tokio::test]
    async fn test_save_now_failure_alerts() {
        let h = Harness::new(MockMachine::new());
        let mut session = h.start().await;
        h.machine.set_fail_save(true);

        assert!(matches!(session.save_now().await, Err(CoreError::WriteFailed(_))));
        assert_eq!(h.notifier.alerts(), vec![SAVE_FAILED_MESSAGE]);
        let changes = h.notifier.control_changes();
        assert_eq!(&changes[changes.len() - 2..], &[false, true]);
    }

    #[tokio::test]
    async fn test_reset_to_default_restores_and_clears() {
        let h = Harness::new(MockMachine::new());
        h.write_default(b"default-state");
        let mut session = h.start().await;
        h.store().await.put(&Snapshot::from(vec![1u8])).await.unwrap();
        let resets = h.renderer.reset_count();

        let outcome = session.reset_to_default().await.unwrap();
        assert_eq!(outcome, RestoreOutcome::Restored);
        assert_eq!(h.machine.restored(), vec![Snapshot::from(&b"default-state"[..])]);
        assert_eq!(h.store().await.get().await, None);
        assert_eq!(h.machine.stop_count(), 1);
        assert_eq!(h.machine.run_count(), 1);
        assert_eq!(h.renderer.reset_count(), resets + 1);
        assert_eq!(h.renderer.writes().last().map(String::as_str), Some("localhost:~# "));
    }

    #[tokio::test]
    async fn test_reset_without_default_can_be_cancelled() {
        let h = Harness::new(MockMachine::new());
        let mut session = h.start().await;
        h.store().await.put(&Snapshot::from(vec![1u8])).await.unwrap();

        let outcome = session.reset_to_default().await.unwrap();
        assert_eq!(outcome, RestoreOutcome::Cancelled);
        assert_eq!(h.notifier.questions(), vec![REBOOT_QUESTION]);
        assert_eq!(h.machine.run_count(), 1);
        // Declining keeps the saved record
        assert!(h.store().await.get().await.is_some());
    }

    #[tokio::test]
    async fn test_reset_failure_reboot_clears_record() {
        let h = Harness::new(MockMachine::new());
        h.write_default(b"default-state");
        let mut session = h.start().await;
        h.store().await.put(&Snapshot::from(vec![1u8])).await.unwrap();
        h.machine.set_fail_restore(true);
        h.notifier.set_answer(true);

        let outcome = session.reset_to_default().await.unwrap();
        assert_eq!(outcome, RestoreOutcome::RebootRequested);
        assert_eq!(h.store().await.get().await, None);
        assert_eq!(h.machine.run_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_export_waits_then_writes_exact_bytes() {
        let h = Harness::new(MockMachine::new().with_state(vec![0u8, 159, 146, 150]));
        let session = h.start().await;
        let started = Instant::now();

        let path = session.export_to(h.dir.path()).await.unwrap();
        assert!(started.elapsed() >= Duration::from_secs(3));
        assert_eq!(path, h.dir.path().join("v86state.bin"));
        assert_eq!(std::fs::read(&path).unwrap(), vec![0u8, 159, 146, 150]);
    }

    #[tokio::test]
    async fn test_import_restores_file_bytes() {
        let h = Harness::new(MockMachine::new());
        let mut session = h.start().await;
        let file = h.dir.path().join("backup.bin");
        std::fs::write(&file, [9u8, 8, 7]).unwrap();

        let outcome = session.import_from(&file).await.unwrap();
        assert_eq!(outcome, RestoreOutcome::Restored);
        assert_eq!(h.machine.restored(), vec![Snapshot::from(vec![9u8, 8, 7])]);
        assert_eq!(h.machine.stop_count(), 1);
        assert_eq!(h.machine.run_count(), 1);
        // Still inside the attach settle window, so the gate stays closed
        assert!(!session.gate().is_open());
    }

    #[tokio::test]
    async fn test_import_unreadable_file_alerts() {
        let h = Harness::new(MockMachine::new());
        let mut session = h.start().await;

        let result = session.import_from(&h.dir.path().join("missing.bin")).await;
        assert!(matches!(result, Err(CoreError::Io(_))));
        assert!(h.notifier.alerts()[0].starts_with("Error reading file: "));
        assert_eq!(h.machine.stop_count(), 0);
    }

    #[tokio::test]
    async fn test_import_restore_failure_offers_reboot() {
        let h = Harness::new(MockMachine::new());
        let mut session = h.start().await;
        let file = h.dir.path().join("garbage.bin");
        std::fs::write(&file, b"garbage").unwrap();
        h.machine.set_fail_restore(true);

        let outcome = session.import_from(&file).await.unwrap();
        assert_eq!(outcome, RestoreOutcome::Cancelled);
        assert!(h.notifier.questions()[0].starts_with("Failed to restore snapshot"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reboot_command_ends_run() {
        let h = Harness::new(MockMachine::new());
        let mut session = h.start().await;
        h.notifier.set_answer(true);
        let (tx, mut rx) = mpsc::channel(4);
        let task = tokio::spawn(async move { session.run(&mut rx).await });

        tx.send(SessionCommand::ResetToDefault).await.unwrap();
        assert_eq!(task.await.unwrap().unwrap(), SessionExit::Reboot);
    }

    #[tokio::test(start_paused = true)]
    async fn test_export_command_is_delayed() {
        let h = Harness::new(MockMachine::new());
        let mut session = h.start().await;
        let (tx, mut rx) = mpsc::channel(4);
        let task = tokio::spawn(async move { session.run(&mut rx).await });
        let target = h.dir.path().join("v86state.bin");

        tx.send(SessionCommand::Export(h.dir.path().to_path_buf())).await.unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(!target.exists());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(target.exists());

        drop(tx);
        assert_eq!(task.await.unwrap().unwrap(), SessionExit::Shutdown);
    }

    #[test]
    fn test_loading_banner() {
        assert_eq!(
            loading_banner("Alpine"),
            "\x1b[1;3;32mAlpine Linux loading...\x1b[0m\r\n"
        );
    }
}
