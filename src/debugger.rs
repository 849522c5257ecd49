//! The debugger facade
//!
//! [`Debugger`] is what a front end talks to. It owns the user's
//! breakpoints and launch profiles, which outlive sessions, and at most one
//! [`Session`]. Intents are methods; everything the front end should show
//! arrives on the [`DebuggerEvent`] channel returned by [`Debugger::new`].

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;

use crate::breakpoints::{Breakpoint, BreakpointId, BreakpointManager, SourceFiles, SyncReport};
use crate::common::config::Config;
use crate::common::{Error, Result};
use crate::configurations::{ConfigurationStore, DebugConfiguration};
use crate::events::{DebuggerEvent, StopSnapshot};
use crate::mi::{commands, LocalVariable, Reply, StackFrame, StopReason, ThreadInfo};
use crate::session::{
    Session, SessionOptions, SessionState, Supervisor, SupervisorEvent, TimeoutPrompt, WaitOutcome,
};

/// A started debugger process and its event stream
pub type Transport = (Supervisor, mpsc::UnboundedReceiver<SupervisorEvent>);

pub struct Debugger {
    config: Config,
    breakpoints: BreakpointManager,
    configurations: ConfigurationStore,
    session: Option<Session>,
    prompt: Arc<dyn TimeoutPrompt>,
    events_tx: mpsc::UnboundedSender<DebuggerEvent>,
}

impl Debugger {
    pub fn new(
        mut config: Config,
        sources: Arc<dyn SourceFiles>,
        prompt: Arc<dyn TimeoutPrompt>,
    ) -> (Self, mpsc::UnboundedReceiver<DebuggerEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let configurations = ConfigurationStore::from_loaded(
            std::mem::take(&mut config.configurations),
            config.limits.max_configurations,
        );
        (
            Self {
                config,
                breakpoints: BreakpointManager::new(sources),
                configurations,
                session: None,
                prompt,
                events_tx,
            },
            events_rx,
        )
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn breakpoints(&self) -> &BreakpointManager {
        &self.breakpoints
    }

    pub fn configurations(&self) -> &ConfigurationStore {
        &self.configurations
    }

    pub fn configurations_mut(&mut self) -> &mut ConfigurationStore {
        &mut self.configurations
    }

    /// The current or last session
    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// State of the current session; `Idle` when there is none
    pub fn state(&self) -> SessionState {
        self.session
            .as_ref()
            .map(Session::state)
            .unwrap_or(SessionState::Idle)
    }

    fn ensure_no_session(&self) -> Result<()> {
        match &self.session {
            Some(session) if !session.state().is_terminal() => Err(Error::AlreadyRunning),
            _ => Ok(()),
        }
    }

    fn session_mut(&mut self) -> Result<&mut Session> {
        self.session.as_mut().ok_or(Error::NoSession)
    }

    fn debugger_args(&self, profile: Option<&DebugConfiguration>) -> Vec<String> {
        let mut args = self.config.debugger.args.clone();
        if let Some(profile) = profile {
            args.extend(profile.debugger_args.iter().cloned());
        }
        args
    }

    // === Session lifecycle ===

    /// Start the debugger and run the profile's program
    pub async fn launch(&mut self, profile: &DebugConfiguration) -> Result<()> {
        self.ensure_no_session()?;
        let path = self.config.resolve_debugger(Some(profile))?;
        let transport = Supervisor::spawn(&path, &self.debugger_args(Some(profile)))?;
        self.launch_with_transport(profile, transport).await
    }

    /// Launch over an already started debugger
    pub async fn launch_with_transport(
        &mut self,
        profile: &DebugConfiguration,
        (supervisor, events_rx): Transport,
    ) -> Result<()> {
        self.ensure_no_session()?;
        tracing::info!(
            name = %profile.name,
            program = %profile.program.display(),
            "Launching program"
        );
        let options = SessionOptions::from_config(&self.config, Some(profile));
        self.session = Some(Session::new(
            supervisor,
            events_rx,
            options,
            Arc::clone(&self.prompt),
            self.events_tx.clone(),
        ));

        let result = self.start_program(profile).await;
        self.end_on_failure(result).await
    }

    async fn start_program(&mut self, profile: &DebugConfiguration) -> Result<()> {
        let session = self.session.as_mut().ok_or(Error::NoSession)?;
        session.initialize().await?;
        session
            .load_program(&profile.program, &profile.args, profile.working_dir.as_deref())
            .await?;
        session.mark_ready()?;

        self.breakpoints.reset_sync();
        self.breakpoints.sync_all(session).await?;
        self.notify(DebuggerEvent::BreakpointsChanged);

        let session = self.session.as_mut().ok_or(Error::NoSession)?;
        session.resume(commands::exec_run()).await
    }

    /// Start the debugger and attach to a running process
    pub async fn attach(&mut self, pid: u32) -> Result<()> {
        self.ensure_no_session()?;
        if !process_exists(pid) {
            return Err(Error::attach_failure(pid, "no such process"));
        }
        let path = self.config.resolve_debugger(None)?;
        let transport = Supervisor::spawn(&path, &self.debugger_args(None))?;
        self.attach_with_transport(pid, transport).await
    }

    /// Attach over an already started debugger
    pub async fn attach_with_transport(&mut self, pid: u32, (supervisor, events_rx): Transport) -> Result<()> {
        self.ensure_no_session()?;
        tracing::info!(pid, "Attaching to process");
        let options = SessionOptions::from_config(&self.config, None);
        self.session = Some(Session::new(
            supervisor,
            events_rx,
            options,
            Arc::clone(&self.prompt),
            self.events_tx.clone(),
        ));

        let result = self.start_attached(pid).await;
        self.end_on_failure(result).await
    }

    async fn start_attached(&mut self, pid: u32) -> Result<()> {
        let session = self.session.as_mut().ok_or(Error::NoSession)?;
        session.initialize().await?;
        session.mark_ready()?;
        session.attach(pid).await?;

        self.breakpoints.reset_sync();
        let session = self.session.as_mut().ok_or(Error::NoSession)?;
        self.breakpoints.sync_all(session).await?;
        self.notify(DebuggerEvent::BreakpointsChanged);
        Ok(())
    }

    /// A session that failed to start is not left half alive
    async fn end_on_failure(&mut self, result: Result<()>) -> Result<()> {
        if let Err(e) = &result {
            tracing::warn!(error = %e, "Session failed to start");
            if let Some(session) = self.session.as_mut() {
                session.terminate().await;
            }
        }
        result
    }

    // === Execution ===

    pub async fn continue_execution(&mut self) -> Result<()> {
        self.session_mut()?.resume(commands::exec_continue()).await
    }

    /// Step over
    pub async fn next(&mut self) -> Result<()> {
        self.session_mut()?.resume(commands::exec_next()).await
    }

    /// Step into
    pub async fn step(&mut self) -> Result<()> {
        self.session_mut()?.resume(commands::exec_step()).await
    }

    /// Step out of the selected frame
    pub async fn finish(&mut self) -> Result<()> {
        self.session_mut()?.resume(commands::exec_finish()).await
    }

    pub async fn interrupt(&mut self) -> Result<()> {
        self.session_mut()?.interrupt().await
    }

    pub async fn detach(&mut self) -> Result<()> {
        self.session_mut()?.detach().await
    }

    /// End the session; a no-op without one
    pub async fn terminate(&mut self) {
        if let Some(session) = self.session.as_mut() {
            session.terminate().await;
        }
    }

    // === Events ===

    /// Handle whatever the debugger sent, without waiting
    ///
    /// Returns the snapshot of a stop that happened in the meantime.
    pub async fn process_events(&mut self) -> Result<Option<StopSnapshot>> {
        let session = self.session_mut()?;
        match session.process_events().await {
            Some(snapshot) => Ok(Some(self.finish_stop(snapshot).await?)),
            None => Ok(None),
        }
    }

    /// Wait until the program stops or the session ends
    ///
    /// Without a timeout `timeouts.wait_stop_secs` applies.
    pub async fn wait_for_stop(&mut self, timeout: Option<Duration>) -> Result<WaitOutcome> {
        let timeout =
            timeout.unwrap_or_else(|| Duration::from_secs(self.config.timeouts.wait_stop_secs));
        let session = self.session_mut()?;
        let already_shown = session.last_stop().cloned();
        match session.wait_for_stop(timeout).await? {
            WaitOutcome::Stopped(snapshot) if Some(&snapshot) == already_shown.as_ref() => {
                Ok(WaitOutcome::Stopped(snapshot))
            }
            WaitOutcome::Stopped(snapshot) => {
                Ok(WaitOutcome::Stopped(self.finish_stop(snapshot).await?))
            }
            other => Ok(other),
        }
    }

    /// Attribute a fresh stop to a breakpoint, publish it, and sync
    /// breakpoint edits made while the program was running
    async fn finish_stop(&mut self, mut snapshot: StopSnapshot) -> Result<StopSnapshot> {
        if let StopReason::BreakpointHit { number } = snapshot.reason {
            snapshot.breakpoint = self.breakpoints.on_hit(number);
            if snapshot.breakpoint.is_none() {
                tracing::debug!(number, "Stopped at a breakpoint set outside the adapter");
            }
        }

        let session = self.session.as_mut().ok_or(Error::NoSession)?;
        session.set_last_stop(snapshot.clone());
        self.notify(DebuggerEvent::Stopped(snapshot.clone()));
        self.sync_breakpoints().await?;
        Ok(snapshot)
    }

    // === Inspection ===

    pub async fn stack(&mut self) -> Result<Vec<StackFrame>> {
        self.session_mut()?.stack().await
    }

    pub async fn locals(&mut self) -> Result<BTreeMap<String, LocalVariable>> {
        self.session_mut()?.locals().await
    }

    pub async fn select_frame(&mut self, level: usize) -> Result<BTreeMap<String, LocalVariable>> {
        self.session_mut()?.select_frame(level).await
    }

    pub async fn threads(&mut self) -> Result<Vec<ThreadInfo>> {
        self.session_mut()?.threads().await
    }

    pub async fn select_thread(&mut self, thread_id: u32) -> Result<Vec<StackFrame>> {
        self.session_mut()?.select_thread(thread_id).await
    }

    pub async fn evaluate(&mut self, expression: &str) -> Result<String> {
        self.session_mut()?.evaluate(expression).await
    }

    /// Send a command typed by the user to the debugger
    pub async fn raw(&mut self, input: &str) -> Result<Reply> {
        self.session_mut()?.raw(input).await
    }

    // === Breakpoints ===

    /// Add a breakpoint; it is inserted right away when the session allows it
    pub async fn add_breakpoint(
        &mut self,
        file: impl Into<PathBuf>,
        line: u32,
        condition: Option<String>,
        ignore_count: u32,
    ) -> Result<BreakpointId> {
        let id = self.breakpoints.add(file, line, condition, ignore_count)?;
        self.sync_breakpoints().await?;
        Ok(id)
    }

    pub async fn remove_breakpoint(&mut self, id: BreakpointId) -> Result<Breakpoint> {
        let removed = self.breakpoints.remove(id)?;
        self.sync_breakpoints().await?;
        Ok(removed)
    }

    pub async fn set_breakpoint_enabled(&mut self, id: BreakpointId, enabled: bool) -> Result<()> {
        self.breakpoints.set_enabled(id, enabled)?;
        self.sync_breakpoints().await?;
        Ok(())
    }

    pub async fn set_breakpoint_condition(
        &mut self,
        id: BreakpointId,
        condition: Option<String>,
    ) -> Result<()> {
        self.breakpoints.set_condition(id, condition)?;
        self.sync_breakpoints().await?;
        Ok(())
    }

    pub async fn set_breakpoint_ignore_count(&mut self, id: BreakpointId, ignore_count: u32) -> Result<()> {
        self.breakpoints.set_ignore_count(id, ignore_count)?;
        self.sync_breakpoints().await?;
        Ok(())
    }

    /// Sync now if the session can take breakpoint commands
    ///
    /// While the program runs, edits wait for the next stop.
    async fn sync_breakpoints(&mut self) -> Result<SyncReport> {
        let Some(session) = self.session.as_mut() else {
            self.notify(DebuggerEvent::BreakpointsChanged);
            return Ok(SyncReport::default());
        };
        if !matches!(session.state(), SessionState::Ready | SessionState::Stopped) {
            self.notify(DebuggerEvent::BreakpointsChanged);
            return Ok(SyncReport::default());
        }
        let report = self.breakpoints.sync_all(session).await?;
        self.notify(DebuggerEvent::BreakpointsChanged);
        Ok(report)
    }

    fn notify(&self, event: DebuggerEvent) {
        let _ = self.events_tx.send(event);
    }
}

/// A process that can be attached to
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessInfo {
    pub pid: u32,
    pub name: String,
    pub cmd: String,
}

/// Running processes whose name or command line contains `filter`, by pid
pub fn list_processes(filter: Option<&str>) -> Vec<ProcessInfo> {
    use sysinfo::{ProcessRefreshKind, RefreshKind, System};

    let system = System::new_with_specifics(
        RefreshKind::new().with_processes(ProcessRefreshKind::new()),
    );
    let filter = filter.map(str::to_lowercase);
    let mut processes: Vec<ProcessInfo> = system
        .processes()
        .values()
        .map(|process| ProcessInfo {
            pid: process.pid().as_u32(),
            name: process.name().to_string(),
            cmd: process.cmd().join(" "),
        })
        .filter(|info| match &filter {
            Some(filter) => {
                info.name.to_lowercase().contains(filter.as_str())
                    || info.cmd.to_lowercase().contains(filter.as_str())
            }
            None => true,
        })
        .collect();
    processes.sort_by_key(|p| p.pid);
    processes
}

/// Whether a process with this pid exists
#[cfg(unix)]
pub fn process_exists(pid: u32) -> bool {
    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    if raw <= 0 {
        return false;
    }
    // Signal 0 checks existence without side effects
    let result = unsafe { libc::kill(raw, 0) };
    result == 0 || std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
pub fn process_exists(pid: u32) -> bool {
    use sysinfo::{Pid, ProcessRefreshKind, RefreshKind, System};

    let system = System::new_with_specifics(
        RefreshKind::new().with_processes(ProcessRefreshKind::new()),
    );
    system.process(Pid::from_u32(pid)).is_some()
}
