//! One debugger session
//!
//! A [`Session`] owns the debugger process and everything tied to its
//! lifetime: the pending-command table, the per-command timers, the
//! debugger's view of the breakpoint table and the captured output. It is
//! driven from a single task; awaiting a command pumps the event queue, so
//! notifications are handled while replies are outstanding.

pub mod correlator;
pub mod inspector;
pub mod state;
pub mod supervisor;
pub mod watchdog;

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::common::config::Config;
use crate::common::{Error, Result};
use crate::configurations::DebugConfiguration;
use crate::events::{DebuggerEvent, OutputKind, OutputLine, StopSnapshot};
use crate::mi::{
    commands, frames, AsyncEvent, LocalVariable, MiCommand, MiResult, Record, Reply,
    ReportedBreakpoint, StackFrame, StopReason, ThreadInfo, Token,
};

pub use correlator::{Correlator, PendingHandle};
pub use state::SessionState;
pub use supervisor::{Supervisor, SupervisorEvent};
pub use watchdog::{ExpiredCommand, FixedChoice, TimeoutPrompt, Watchdog, WatchdogChoice};

/// How long `-gdb-exit` may take before the process is killed
const EXIT_GRACE: Duration = Duration::from_millis(500);

/// Tunables of one session
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Deadline of each command before the timeout prompt is asked
    pub command_timeout: Duration,
    /// Captured output lines kept (0 = unlimited)
    pub max_output_lines: usize,
    /// Characters kept of a variable value (0 = unlimited)
    pub value_char_limit: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            command_timeout: Duration::from_secs(40),
            max_output_lines: 10_000,
            value_char_limit: 0,
        }
    }
}

impl SessionOptions {
    pub fn from_config(config: &Config, profile: Option<&DebugConfiguration>) -> Self {
        Self {
            command_timeout: config.command_timeout(profile),
            max_output_lines: config.output.max_lines,
            value_char_limit: config.output.value_char_limit,
        }
    }
}

/// A stop that has not been inspected yet
#[derive(Debug, Clone)]
pub(crate) struct PendingStop {
    pub reason: StopReason,
    pub thread_id: Option<u32>,
    pub frame: Option<StackFrame>,
}

/// How waiting for the program ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome {
    Stopped(StopSnapshot),
    /// Session ended; exit code of the debuggee when known
    Exited(Option<i32>),
    /// Debugger died; terminating signal when known
    Crashed(Option<i32>),
}

/// A live connection to one debugger process
pub struct Session {
    supervisor: Supervisor,
    events_rx: mpsc::UnboundedReceiver<SupervisorEvent>,
    correlator: Correlator,
    watchdog: Watchdog,
    prompt: Arc<dyn TimeoutPrompt>,
    notify_tx: mpsc::UnboundedSender<DebuggerEvent>,
    options: SessionOptions,
    state: SessionState,
    /// Breakpoint table as the debugger reports it, by session number
    reported: BTreeMap<u32, ReportedBreakpoint>,
    output: VecDeque<OutputLine>,
    pending_stop: Option<PendingStop>,
    last_stop: Option<StopSnapshot>,
    current_thread: Option<u32>,
    selected_frame: usize,
    exit_code: Option<i32>,
    crash_signal: Option<i32>,
    /// Commands aborted by the watchdog
    timed_out: HashSet<Token>,
}

impl Session {
    /// Wrap a freshly started debugger; the session begins in `Starting`
    pub fn new(
        supervisor: Supervisor,
        events_rx: mpsc::UnboundedReceiver<SupervisorEvent>,
        options: SessionOptions,
        prompt: Arc<dyn TimeoutPrompt>,
        notify_tx: mpsc::UnboundedSender<DebuggerEvent>,
    ) -> Self {
        let mut session = Self {
            supervisor,
            events_rx,
            correlator: Correlator::new(),
            watchdog: Watchdog::new(),
            prompt,
            notify_tx,
            options,
            state: SessionState::Idle,
            reported: BTreeMap::new(),
            output: VecDeque::new(),
            pending_stop: None,
            last_stop: None,
            current_thread: None,
            selected_frame: 0,
            exit_code: None,
            crash_signal: None,
            timed_out: HashSet::new(),
        };
        session.transition(SessionState::Starting);
        session
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    /// Exit code of the debuggee, once it exited
    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    /// Signal that killed the debugger, after a crash
    pub fn crash_signal(&self) -> Option<i32> {
        self.crash_signal
    }

    pub fn pid(&self) -> Option<u32> {
        self.supervisor.pid()
    }

    pub fn current_thread(&self) -> Option<u32> {
        self.current_thread
    }

    pub fn selected_frame(&self) -> usize {
        self.selected_frame
    }

    /// Snapshot of the current stop, if the program is stopped
    pub fn last_stop(&self) -> Option<&StopSnapshot> {
        self.last_stop.as_ref()
    }

    pub(crate) fn set_last_stop(&mut self, snapshot: StopSnapshot) {
        if self.state.is_stopped() {
            self.last_stop = Some(snapshot);
        }
    }

    /// Captured output, oldest first
    pub fn output(&self) -> impl Iterator<Item = &OutputLine> {
        self.output.iter()
    }

    pub fn pending_commands(&self) -> usize {
        self.correlator.pending_count()
    }

    /// Commands written to the debugger over the whole session
    pub fn commands_issued(&self) -> u64 {
        self.correlator.issued()
    }

    // === Breakpoint table ===

    pub fn reported_breakpoints(&self) -> &BTreeMap<u32, ReportedBreakpoint> {
        &self.reported
    }

    pub(crate) fn record_breakpoint(&mut self, breakpoint: ReportedBreakpoint) {
        self.reported.insert(breakpoint.number, breakpoint);
    }

    pub(crate) fn reported_breakpoint_mut(&mut self, number: u32) -> Option<&mut ReportedBreakpoint> {
        self.reported.get_mut(&number)
    }

    pub(crate) fn forget_breakpoint(&mut self, number: u32) {
        self.reported.remove(&number);
    }

    // === Commands ===

    /// Write a command and register it; the reply is collected with [`wait`](Self::wait)
    pub async fn issue(&mut self, command: &MiCommand) -> Result<PendingHandle> {
        self.ensure_alive()?;
        let (line, handle) = self.correlator.issue(command);
        self.watchdog
            .arm(handle.token(), &command.operation, self.options.command_timeout);

        if let Err(e) = self.supervisor.send_raw(&line).await {
            // The exit event follows and resolves the pending entry
            tracing::warn!(error = %e, operation = %command.operation, "Failed to write command");
        }
        Ok(handle)
    }

    /// Drive the session until the command behind `handle` is answered
    pub async fn wait(&mut self, mut handle: PendingHandle) -> Result<Reply> {
        loop {
            match handle.try_take() {
                Some(Reply::Aborted) => return Err(self.abort_error(&handle)),
                Some(reply) => return Ok(reply),
                None => self.pump().await,
            }
        }
    }

    /// Issue a command and return its reply, including `^error` replies
    pub async fn execute(&mut self, command: &MiCommand) -> Result<Reply> {
        let handle = self.issue(command).await?;
        self.wait(handle).await
    }

    /// Issue a command and return its results; `^error` becomes
    /// [`Error::CommandFailed`]
    pub async fn request(&mut self, command: MiCommand) -> Result<Vec<MiResult>> {
        let reply = self.execute(&command).await?;
        if let Some(message) = reply.error_message() {
            return Err(Error::command_failed(&command.to_string(), message));
        }
        match reply {
            Reply::Result { results, .. } => Ok(results),
            Reply::Aborted => Err(Error::CommandAborted(command.operation)),
        }
    }

    fn ensure_alive(&self) -> Result<()> {
        match self.state {
            SessionState::Exited => Err(Error::SessionExited),
            SessionState::Crashed => Err(Error::SessionCrashed {
                signal: self.crash_signal,
            }),
            _ => Ok(()),
        }
    }

    fn abort_error(&mut self, handle: &PendingHandle) -> Error {
        if self.timed_out.remove(&handle.token()) {
            return Error::CommandTimeout {
                command: handle.operation().to_string(),
                secs: self.options.command_timeout.as_secs(),
            };
        }
        match self.state {
            SessionState::Crashed => Error::SessionCrashed {
                signal: self.crash_signal,
            },
            _ => Error::CommandAborted(handle.operation().to_string()),
        }
    }

    // === Lifecycle ===

    /// Send the setup commands; failures of single settings are logged
    pub async fn initialize(&mut self) -> Result<()> {
        for command in commands::setup_sequence(self.options.value_char_limit) {
            match self.request(command).await {
                Ok(_) => {}
                Err(e @ Error::CommandFailed { .. }) => {
                    tracing::warn!(error = %e, "Debugger rejected a setup command");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Load the program with its arguments and working directory
    pub async fn load_program(
        &mut self,
        program: &Path,
        args: &[String],
        working_dir: Option<&Path>,
    ) -> Result<()> {
        self.request(commands::file_exec_and_symbols(program))
            .await
            .map_err(|e| match e {
                Error::CommandFailed { message, .. } => Error::launch_failure(program, message),
                other => other,
            })?;
        if !args.is_empty() {
            self.request(commands::exec_arguments(args)).await?;
        }
        if let Some(dir) = working_dir {
            self.request(commands::environment_cd(dir)).await?;
        }
        Ok(())
    }

    /// `Starting → Ready`
    pub fn mark_ready(&mut self) -> Result<()> {
        self.ensure_alive()?;
        if self.transition(SessionState::Ready) {
            Ok(())
        } else {
            Err(Error::invalid_state("become ready", self.state))
        }
    }

    /// Attach to a process; a refusal ends the session
    pub async fn attach(&mut self, pid: u32) -> Result<()> {
        self.require(&[SessionState::Ready], "attach")?;
        match self.request(commands::target_attach(pid)).await {
            Ok(_) => {
                tracing::info!(pid, "Attached to process");
                Ok(())
            }
            Err(Error::CommandFailed { message, .. }) => {
                tracing::warn!(pid, reason = %message, "Attach refused");
                self.terminate().await;
                Err(Error::attach_failure(pid, message))
            }
            Err(e) => Err(e),
        }
    }

    /// Resume execution with an `-exec-*` command
    ///
    /// `-exec-run` needs a ready session, everything else a stopped one.
    pub async fn resume(&mut self, command: MiCommand) -> Result<()> {
        let required = if command.operation == "exec-run" {
            SessionState::Ready
        } else {
            SessionState::Stopped
        };
        self.require(&[required], &command.operation)?;
        self.request(command).await?;
        // Replies precede the `*running` notification
        self.transition(SessionState::Running);
        self.last_stop = None;
        Ok(())
    }

    /// Ask a running program to stop; the stop arrives as an event
    pub async fn interrupt(&mut self) -> Result<()> {
        self.require(&[SessionState::Running], "interrupt")?;
        self.request(commands::exec_interrupt()).await?;
        Ok(())
    }

    /// Detach from the debuggee and end the session
    pub async fn detach(&mut self) -> Result<()> {
        self.require(&[SessionState::Stopped, SessionState::Ready], "detach")?;
        self.request(commands::target_detach()).await?;
        self.terminate().await;
        Ok(())
    }

    /// End the session: `-gdb-exit`, then kill
    ///
    /// The state is `Exited` afterwards even if the kill later shows up as
    /// a signal.
    pub async fn terminate(&mut self) {
        if self.state.is_terminal() {
            return;
        }
        let graceful = async {
            if let Ok(handle) = self.issue(&commands::gdb_exit()).await {
                let _ = self.wait(handle).await;
            }
        };
        if tokio::time::timeout(EXIT_GRACE, graceful).await.is_err() {
            tracing::debug!("Debugger did not exit in time, killing it");
        }
        self.shut_down(SessionState::Exited);
    }

    fn require(&self, allowed: &[SessionState], action: &str) -> Result<()> {
        self.ensure_alive()?;
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(Error::invalid_state(action, self.state))
        }
    }

    // === Inspection ===

    /// Call stack of the current thread
    pub async fn stack(&mut self) -> Result<Vec<StackFrame>> {
        self.require(&[SessionState::Stopped], "list the stack")?;
        let thread = self.current_thread;
        Ok(inspector::fetch_stack(self, thread).await)
    }

    /// Locals of the selected frame
    pub async fn locals(&mut self) -> Result<BTreeMap<String, LocalVariable>> {
        self.require(&[SessionState::Stopped], "list locals")?;
        let (thread, frame) = (self.current_thread, self.selected_frame);
        Ok(inspector::fetch_locals(self, thread, frame).await)
    }

    /// Select a frame of the current stack and fetch its locals
    pub async fn select_frame(&mut self, level: usize) -> Result<BTreeMap<String, LocalVariable>> {
        self.require(&[SessionState::Stopped], "select a frame")?;
        let depth = match &self.last_stop {
            Some(stop) => stop.frames.len(),
            None => self.stack().await?.len(),
        };
        if level >= depth {
            return Err(Error::FrameNotFound(level));
        }

        self.request(commands::stack_select_frame(level)).await?;
        self.selected_frame = level;
        let thread = self.current_thread;
        let locals = inspector::fetch_locals(self, thread, level).await;
        if let Some(stop) = self.last_stop.as_mut() {
            stop.locals = locals.clone();
        }
        Ok(locals)
    }

    /// Threads of the debuggee
    pub async fn threads(&mut self) -> Result<Vec<ThreadInfo>> {
        self.require(&[SessionState::Stopped], "list threads")?;
        let results = self.request(commands::thread_info()).await?;
        let current = crate::mi::find_str(&results, "current-thread-id");
        Ok(crate::mi::find(&results, "threads")
            .map(|t| frames::threads_from_mi(t, current))
            .unwrap_or_default())
    }

    /// Switch to another thread; its stack replaces the current one
    pub async fn select_thread(&mut self, thread_id: u32) -> Result<Vec<StackFrame>> {
        self.require(&[SessionState::Stopped], "select a thread")?;
        self.request(commands::thread_select(thread_id)).await?;
        self.current_thread = Some(thread_id);
        self.selected_frame = 0;

        let frames = inspector::fetch_stack(self, Some(thread_id)).await;
        let locals = if frames.is_empty() {
            BTreeMap::new()
        } else {
            inspector::fetch_locals(self, Some(thread_id), 0).await
        };
        if let Some(stop) = self.last_stop.as_mut() {
            stop.thread_id = Some(thread_id);
            stop.frames = frames.clone();
            stop.locals = locals;
        }
        Ok(frames)
    }

    /// Evaluate an expression in the selected frame
    pub async fn evaluate(&mut self, expression: &str) -> Result<String> {
        self.require(&[SessionState::Stopped], "evaluate")?;
        let command = commands::data_evaluate_expression(
            expression,
            self.current_thread,
            Some(self.selected_frame),
        );
        let results = self.request(command).await?;
        let mut value = crate::mi::find_str(&results, "value")
            .unwrap_or_default()
            .to_string();
        let limit = self.options.value_char_limit;
        if limit > 0 && value.chars().count() > limit {
            value = value.chars().take(limit).collect::<String>() + "...";
        }
        Ok(value)
    }

    /// Send a command typed by the user
    ///
    /// MI commands (`-break-list`) are sent as they are; anything else is
    /// run through the console interpreter. `^error` replies are returned,
    /// not raised.
    pub async fn raw(&mut self, input: &str) -> Result<Reply> {
        let input = input.trim();
        let command = if input.starts_with('-') || input.starts_with(|c: char| c.is_ascii_digit()) {
            crate::mi::codec::decode_command(input)?.1
        } else {
            MiCommand::new("interpreter-exec").args(["console", input])
        };
        tracing::info!(target: "mi_debugger::mi", command = %command, "User command");
        self.execute(&command).await
    }

    /// Run the inspection of a stop that has not been inspected yet
    pub async fn inspect_pending_stop(&mut self) -> Option<StopSnapshot> {
        let stop = self.pending_stop.take()?;
        let snapshot = inspector::inspect(self, stop).await;
        self.set_last_stop(snapshot.clone());
        Some(snapshot)
    }

    // === Event handling ===

    /// Handle all queued events without waiting, then inspect a new stop
    pub async fn process_events(&mut self) -> Option<StopSnapshot> {
        self.drain_events();
        if self
            .watchdog
            .next_deadline()
            .is_some_and(|deadline| deadline <= Instant::now())
        {
            self.check_watchdog().await;
        }
        self.inspect_pending_stop().await
    }

    /// Wait until the program stops or the session ends
    pub async fn wait_for_stop(&mut self, timeout: Duration) -> Result<WaitOutcome> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(snapshot) = self.inspect_pending_stop().await {
                return Ok(WaitOutcome::Stopped(snapshot));
            }
            match self.state {
                SessionState::Exited => return Ok(WaitOutcome::Exited(self.exit_code)),
                SessionState::Crashed => return Ok(WaitOutcome::Crashed(self.crash_signal)),
                SessionState::Stopped => {
                    if let Some(stop) = &self.last_stop {
                        return Ok(WaitOutcome::Stopped(stop.clone()));
                    }
                }
                _ => {}
            }
            if tokio::time::timeout_at(deadline, self.pump()).await.is_err() {
                return Err(Error::AwaitTimeout(timeout.as_secs()));
            }
        }
    }

    /// Wait for one event or the next watchdog deadline
    async fn pump(&mut self) {
        let next = match self.watchdog.next_deadline() {
            Some(deadline) => tokio::select! {
                biased;
                event = self.events_rx.recv() => Some(event),
                _ = tokio::time::sleep_until(deadline) => None,
            },
            None => Some(self.events_rx.recv().await),
        };
        match next {
            Some(Some(event)) => self.handle_event(event),
            Some(None) => self.on_disconnected(),
            None => self.check_watchdog().await,
        }
    }

    /// Handle everything already queued, without waiting
    fn drain_events(&mut self) {
        while let Ok(event) = self.events_rx.try_recv() {
            self.handle_event(event);
        }
    }

    fn handle_event(&mut self, event: SupervisorEvent) {
        match event {
            SupervisorEvent::Record(record) => self.handle_record(record),
            SupervisorEvent::Stderr(line) => self.push_output(OutputKind::Stderr, line),
            SupervisorEvent::Exited(code) => {
                if self.state.is_terminal() {
                    tracing::trace!(code, "Ignoring exit of a finished session");
                    return;
                }
                tracing::info!(code, "Debugger exited");
                self.shut_down(SessionState::Exited);
            }
            SupervisorEvent::Crashed(signal) => {
                if self.state.is_terminal() {
                    tracing::trace!(?signal, "Ignoring signal exit of a finished session");
                    return;
                }
                tracing::error!(?signal, "Debugger crashed");
                self.crash_signal = signal;
                self.shut_down(SessionState::Crashed);
            }
        }
    }

    fn handle_record(&mut self, record: Record) {
        match record {
            Record::Result {
                token: Some(token),
                class,
                results,
            } => {
                self.watchdog.disarm(token);
                self.correlator.resolve(token, class, results);
            }
            Record::Result { token: None, class, .. } => {
                tracing::debug!(%class, "Result record without token");
            }
            Record::Async {
                kind,
                class,
                results,
                ..
            } => self.handle_async(AsyncEvent::from_record(kind, &class, &results)),
            Record::Stream { kind, text } => self.push_output(kind.into(), text),
            Record::Prompt => {}
        }
    }

    fn handle_async(&mut self, event: AsyncEvent) {
        if self.state.is_terminal() {
            tracing::trace!(?event, "Ignoring event of a finished session");
            return;
        }
        match event {
            AsyncEvent::Stopped {
                reason,
                thread_id,
                frame,
            } => {
                if thread_id.is_some() {
                    self.current_thread = thread_id;
                }
                self.selected_frame = 0;
                self.transition(SessionState::Stopped);
                if self.state.is_stopped() {
                    tracing::info!(%reason, ?thread_id, "Program stopped");
                    self.pending_stop = Some(PendingStop {
                        reason,
                        thread_id: self.current_thread,
                        frame,
                    });
                } else {
                    tracing::debug!(%reason, state = %self.state, "Ignoring stop");
                }
            }
            AsyncEvent::Running { thread_id } => {
                tracing::debug!(?thread_id, "Program running");
                self.transition(SessionState::Running);
                self.last_stop = None;
                self.pending_stop = None;
            }
            AsyncEvent::Exited { exit_code } => {
                tracing::info!(?exit_code, "Program exited");
                if exit_code.is_some() {
                    self.exit_code = exit_code;
                }
                self.shut_down(SessionState::Exited);
            }
            AsyncEvent::ThreadGroupExited { id, exit_code } => {
                tracing::debug!(%id, ?exit_code, "Thread group exited");
                if exit_code.is_some() {
                    self.exit_code = exit_code;
                }
            }
            AsyncEvent::BreakpointCreated(bp) | AsyncEvent::BreakpointModified(bp) => {
                tracing::debug!(number = bp.number, "Debugger breakpoint table changed");
                self.record_breakpoint(bp);
                self.notify(DebuggerEvent::BreakpointsChanged);
            }
            AsyncEvent::BreakpointDeleted { number } => {
                self.forget_breakpoint(number);
                self.notify(DebuggerEvent::BreakpointsChanged);
            }
            AsyncEvent::Other { kind, class, .. } => {
                tracing::trace!(?kind, %class, "Unhandled notification");
            }
        }
    }

    fn on_disconnected(&mut self) {
        if !self.state.is_terminal() {
            tracing::error!("Lost connection to the debugger");
            self.shut_down(SessionState::Crashed);
        }
    }

    async fn check_watchdog(&mut self) {
        // A reply may be queued behind the deadline
        self.drain_events();
        for expired in self.watchdog.expired(Instant::now()) {
            if self.state.is_terminal() {
                return;
            }
            if !self.correlator.is_pending(expired.token) {
                self.watchdog.disarm(expired.token);
                continue;
            }
            tracing::warn!(
                token = expired.token,
                operation = %expired.operation,
                waited_secs = expired.waited.as_secs(),
                "Command timed out"
            );
            self.notify(DebuggerEvent::CommandTimedOut {
                operation: expired.operation.clone(),
                waited_secs: expired.waited.as_secs(),
            });

            let prompt = Arc::clone(&self.prompt);
            let choice = prompt.on_expire(&expired).await;

            // The reply may have come in while the prompt was open
            self.drain_events();
            if !self.correlator.is_pending(expired.token) {
                tracing::info!(
                    operation = %expired.operation,
                    ?choice,
                    "Command answered while the timeout prompt was open"
                );
                self.watchdog.disarm(expired.token);
                continue;
            }
            match choice {
                WatchdogChoice::WaitLonger => {
                    self.watchdog.extend(expired.token);
                }
                WatchdogChoice::Abort => {
                    tracing::warn!(operation = %expired.operation, "Aborting session after timeout");
                    self.timed_out.insert(expired.token);
                    self.shut_down(SessionState::Exited);
                    return;
                }
            }
        }
    }

    /// Move to a terminal state, abort everything pending and kill the process
    fn shut_down(&mut self, state: SessionState) {
        self.transition(state);
        let aborted = self.correlator.abort_all();
        self.watchdog.clear();
        self.pending_stop = None;
        self.last_stop = None;
        self.supervisor.terminate();
        tracing::debug!(aborted, state = %self.state, "Session shut down");
    }

    fn transition(&mut self, next: SessionState) -> bool {
        if self.state == next {
            return false;
        }
        if !self.state.can_transition_to(next) {
            tracing::debug!(from = %self.state, to = %next, "Ignoring state transition");
            return false;
        }
        tracing::info!(from = %self.state, to = %next, "Session state changed");
        let from = std::mem::replace(&mut self.state, next);
        self.notify(DebuggerEvent::StateChanged { from, to: next });
        true
    }

    fn push_output(&mut self, kind: OutputKind, text: String) {
        let text = text.trim_end_matches('\n').to_string();
        let max = self.options.max_output_lines;
        if max > 0 {
            while self.output.len() >= max {
                self.output.pop_front();
            }
        }
        let line = OutputLine { kind, text };
        self.output.push_back(line.clone());
        self.notify(DebuggerEvent::Output(line));
    }

    fn notify(&self, event: DebuggerEvent) {
        // Nobody listening is fine
        let _ = self.notify_tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{in_memory, MockGdb, MockOptions};
    use tokio::io::{AsyncBufReadExt, BufReader};

    fn mock_session(
        options: MockOptions,
        prompt: Arc<dyn TimeoutPrompt>,
    ) -> (Session, mpsc::UnboundedReceiver<DebuggerEvent>) {
        let (supervisor, rx) = in_memory(MockGdb::new(options));
        let (notify_tx, notify_rx) = mpsc::unbounded_channel();
        let session = Session::new(supervisor, rx, SessionOptions::default(), prompt, notify_tx);
        (session, notify_rx)
    }

    fn abort_prompt() -> Arc<dyn TimeoutPrompt> {
        Arc::new(FixedChoice(WatchdogChoice::Abort))
    }

    async fn ready_session(options: MockOptions) -> Session {
        let (mut session, _) = mock_session(options, abort_prompt());
        session.initialize().await.unwrap();
        session.load_program(Path::new("/"), &[], None).await.unwrap();
        session.mark_ready().unwrap();
        session
    }

    #[tokio::test]
    async fn test_setup_reaches_ready() {
        let (mut session, mut events) = mock_session(MockOptions::default(), abort_prompt());
        assert_eq!(session.state(), SessionState::Starting);
        session.initialize().await.unwrap();
        session.mark_ready().unwrap();
        assert_eq!(session.state(), SessionState::Ready);

        let mut transitions = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let DebuggerEvent::StateChanged { to, .. } = event {
                transitions.push(to);
            }
        }
        assert_eq!(transitions, vec![SessionState::Starting, SessionState::Ready]);
    }

    #[tokio::test]
    async fn test_missing_program_is_launch_failure() {
        let (mut session, _) = mock_session(MockOptions::default(), abort_prompt());
        let err = session
            .load_program(Path::new("/nonexistent/Model"), &[], None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::LaunchFailure { .. }));
    }

    #[tokio::test]
    async fn test_run_to_exit_without_breakpoints() {
        let mut session = ready_session(MockOptions::default()).await;
        session.resume(commands::exec_run()).await.unwrap();
        let outcome = session.wait_for_stop(Duration::from_secs(5)).await.unwrap();
        assert_eq!(outcome, WaitOutcome::Exited(Some(0)));
        assert_eq!(session.state(), SessionState::Exited);
        assert!(session
            .output()
            .any(|l| l.kind == OutputKind::Target && l.text == "program started"));
        assert!(matches!(
            session.request(commands::thread_info()).await,
            Err(Error::SessionExited)
        ));
    }

    #[tokio::test]
    async fn test_step_requires_stopped() {
        let mut session = ready_session(MockOptions::default()).await;
        let err = session.resume(commands::exec_next()).await.unwrap_err();
        assert!(matches!(err, Error::InvalidState { .. }));
        assert!(matches!(
            session.interrupt().await,
            Err(Error::InvalidState { .. })
        ));
    }

    #[tokio::test]
    async fn test_interrupt_running_program() {
        let mut session = ready_session(MockOptions {
            no_stop: true,
            ..Default::default()
        })
        .await;
        session.resume(commands::exec_run()).await.unwrap();
        assert_eq!(session.state(), SessionState::Running);

        session.interrupt().await.unwrap();
        match session.wait_for_stop(Duration::from_secs(5)).await.unwrap() {
            WaitOutcome::Stopped(snapshot) => {
                assert_eq!(snapshot.reason, StopReason::Interrupted);
                assert!(!snapshot.frames.is_empty());
            }
            other => panic!("Expected stop, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_evaluate_and_raw_commands() {
        let mut session = ready_session(MockOptions::default()).await;
        session
            .request(commands::break_insert("/src/a.c:7", false, None, 0))
            .await
            .unwrap();
        session.resume(commands::exec_run()).await.unwrap();
        session.wait_for_stop(Duration::from_secs(5)).await.unwrap();

        assert_eq!(session.evaluate("x + n").await.unwrap(), "45");
        assert!(matches!(
            session.evaluate("nope").await,
            Err(Error::CommandFailed { .. })
        ));

        let reply = session.raw("-data-evaluate-expression nope").await.unwrap();
        assert!(reply.error_message().unwrap().contains("No symbol"));

        session.raw("info registers").await.unwrap();
        assert!(session
            .output()
            .any(|l| l.kind == OutputKind::Console && l.text == "info registers"));
    }

    #[tokio::test]
    async fn test_threads_and_frame_selection() {
        let mut session = ready_session(MockOptions::default()).await;
        session
            .request(commands::break_insert("/src/a.c:7", false, None, 0))
            .await
            .unwrap();
        session.resume(commands::exec_run()).await.unwrap();
        session.wait_for_stop(Duration::from_secs(5)).await.unwrap();

        let threads = session.threads().await.unwrap();
        assert_eq!(threads.len(), 2);
        assert!(threads[0].current);

        let frames = session.select_thread(2).await.unwrap();
        assert_eq!(session.current_thread(), Some(2));
        assert_eq!(frames[0].level, 0);

        let locals = session.select_frame(1).await.unwrap();
        assert_eq!(session.selected_frame(), 1);
        assert!(locals.contains_key("x"));
        assert!(matches!(
            session.select_frame(7).await,
            Err(Error::FrameNotFound(7))
        ));
    }

    #[tokio::test]
    async fn test_stop_is_inspected_once() {
        let mut session = ready_session(MockOptions::default()).await;
        session
            .request(commands::break_insert("/src/a.c:7", false, None, 0))
            .await
            .unwrap();
        session.resume(commands::exec_run()).await.unwrap();

        let first = session.wait_for_stop(Duration::from_secs(5)).await.unwrap();
        assert!(matches!(first, WaitOutcome::Stopped(_)));
        // Nothing new queued: no second inspection
        assert!(session.process_events().await.is_none());
        assert!(session.inspect_pending_stop().await.is_none());
    }

    #[tokio::test]
    async fn test_crash_aborts_pending_commands() {
        let (client, server) = tokio::io::duplex(4096);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (notify_tx, _notify_rx) = mpsc::unbounded_channel();
        let mut session = Session::new(
            Supervisor::from_writer(client),
            events_rx,
            SessionOptions::default(),
            abort_prompt(),
            notify_tx,
        );

        let first = session.issue(&commands::exec_run()).await.unwrap();
        let second = session.issue(&commands::thread_info()).await.unwrap();
        assert_eq!(session.pending_commands(), 2);

        // The fake debugger reads both commands, then dies on a signal
        let mut lines = BufReader::new(server).lines();
        assert_eq!(lines.next_line().await.unwrap().unwrap(), "1-exec-run");
        assert_eq!(lines.next_line().await.unwrap().unwrap(), "2-thread-info");
        events_tx.send(SupervisorEvent::Crashed(Some(11))).unwrap();

        assert!(matches!(
            session.wait(second).await,
            Err(Error::SessionCrashed { signal: Some(11) })
        ));
        assert!(matches!(
            session.wait(first).await,
            Err(Error::SessionCrashed { .. })
        ));
        assert_eq!(session.state(), SessionState::Crashed);
        assert_eq!(session.pending_commands(), 0);

        // Later events of a dead session are ignored
        events_tx.send(SupervisorEvent::Exited(0)).unwrap();
        session.process_events().await;
        assert_eq!(session.state(), SessionState::Crashed);
    }

    #[tokio::test]
    async fn test_out_of_order_replies() {
        let (client, server) = tokio::io::duplex(4096);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (notify_tx, _notify_rx) = mpsc::unbounded_channel();
        let mut session = Session::new(
            Supervisor::from_writer(client),
            events_rx,
            SessionOptions::default(),
            abort_prompt(),
            notify_tx,
        );
        let _server = server;

        let a = session
            .issue(&commands::data_evaluate_expression("a", None, None))
            .await
            .unwrap();
        let b = session
            .issue(&commands::data_evaluate_expression("b", None, None))
            .await
            .unwrap();
        for line in ["2^done,value=\"2\"", "1^done,value=\"1\""] {
            events_tx
                .send(SupervisorEvent::Record(crate::mi::decode(line)))
                .unwrap();
        }

        let reply_a = session.wait(a).await.unwrap();
        let reply_b = session.wait(b).await.unwrap();
        assert_eq!(reply_a.get("value").and_then(|v| v.as_str()), Some("1"));
        assert_eq!(reply_b.get("value").and_then(|v| v.as_str()), Some("2"));
    }

    #[tokio::test]
    async fn test_terminate_is_exited_not_crashed() {
        let mut session = ready_session(MockOptions::default().hang("gdb-exit")).await;
        session.terminate().await;
        assert_eq!(session.state(), SessionState::Exited);

        // The kill shows up as a signal exit and must not turn into a crash
        tokio::time::sleep(Duration::from_millis(50)).await;
        session.process_events().await;
        assert_eq!(session.state(), SessionState::Exited);
        assert_eq!(session.crash_signal(), None);
    }

    struct CountingPrompt {
        asked: std::sync::atomic::AtomicUsize,
        choices: Vec<WatchdogChoice>,
    }

    #[async_trait::async_trait]
    impl TimeoutPrompt for CountingPrompt {
        async fn on_expire(&self, _command: &ExpiredCommand) -> WatchdogChoice {
            let n = self.asked.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            self.choices
                .get(n)
                .copied()
                .unwrap_or(WatchdogChoice::Abort)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_watchdog_wait_longer_then_abort() {
        let prompt = Arc::new(CountingPrompt {
            asked: Default::default(),
            choices: vec![WatchdogChoice::WaitLonger],
        });
        let (mut session, mut events) =
            mock_session(MockOptions::default().hang("thread-info"), prompt.clone());

        let started = Instant::now();
        let err = session.request(commands::thread_info()).await.unwrap_err();
        assert!(matches!(err, Error::CommandTimeout { ref command, secs: 40 } if command == "thread-info"));
        // Asked once at 40s (wait longer), once more at 80s (abort)
        assert_eq!(prompt.asked.load(std::sync::atomic::Ordering::SeqCst), 2);
        assert!(started.elapsed() >= Duration::from_secs(80));
        assert_eq!(session.state(), SessionState::Exited);

        let mut timeouts = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event, DebuggerEvent::CommandTimedOut { .. }) {
                timeouts += 1;
            }
        }
        assert_eq!(timeouts, 2);
    }

    /// A session writing into a pipe nobody answers; events come from the test
    fn scripted_session(
        options: SessionOptions,
        prompt: Arc<dyn TimeoutPrompt>,
    ) -> (
        Session,
        mpsc::UnboundedSender<SupervisorEvent>,
        tokio::io::DuplexStream,
    ) {
        let (client, server) = tokio::io::duplex(4096);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (notify_tx, _notify_rx) = mpsc::unbounded_channel();
        let session = Session::new(
            Supervisor::from_writer(client),
            events_rx,
            options,
            prompt,
            notify_tx,
        );
        (session, events_tx, server)
    }

    /// Takes its time to answer and can deliver a reply meanwhile
    struct SlowPrompt {
        delay: Duration,
        choices: Vec<WatchdogChoice>,
        asked_at: std::sync::Mutex<Vec<Instant>>,
        answered_at: std::sync::Mutex<Vec<Instant>>,
        late_reply: std::sync::Mutex<Option<(mpsc::UnboundedSender<SupervisorEvent>, &'static str)>>,
    }

    impl SlowPrompt {
        fn new(delay: Duration, choices: Vec<WatchdogChoice>) -> Self {
            Self {
                delay,
                choices,
                asked_at: Default::default(),
                answered_at: Default::default(),
                late_reply: Default::default(),
            }
        }

        fn asked(&self) -> Vec<Instant> {
            self.asked_at.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl TimeoutPrompt for SlowPrompt {
        async fn on_expire(&self, _command: &ExpiredCommand) -> WatchdogChoice {
            let n = {
                let mut asked = self.asked_at.lock().unwrap();
                asked.push(Instant::now());
                asked.len() - 1
            };
            tokio::time::sleep(self.delay).await;
            if let Some((tx, line)) = self.late_reply.lock().unwrap().take() {
                tx.send(SupervisorEvent::Record(crate::mi::decode(line))).unwrap();
            }
            self.answered_at.lock().unwrap().push(Instant::now());
            self.choices.get(n).copied().unwrap_or(WatchdogChoice::Abort)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_longer_rearms_from_answer() {
        let prompt = Arc::new(SlowPrompt::new(
            Duration::from_secs(100),
            vec![WatchdogChoice::WaitLonger],
        ));
        let (mut session, _events) =
            mock_session(MockOptions::default().hang("thread-info"), prompt.clone());

        let err = session.request(commands::thread_info()).await.unwrap_err();
        assert!(matches!(err, Error::CommandTimeout { .. }));

        let asked = prompt.asked();
        let answered = prompt.answered_at.lock().unwrap().clone();
        assert_eq!(asked.len(), 2);
        // A full period passes between the answer and the next question
        assert!(asked[1] - answered[0] >= Duration::from_secs(40));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reply_during_prompt_is_not_lost() {
        let prompt = Arc::new(SlowPrompt::new(
            Duration::from_secs(20),
            vec![WatchdogChoice::WaitLonger],
        ));
        let (mut session, events_tx, _server) =
            scripted_session(SessionOptions::default(), prompt.clone());
        *prompt.late_reply.lock().unwrap() = Some((events_tx.clone(), "1^done,current-thread-id=\"1\""));

        let results = session.request(commands::thread_info()).await.unwrap();
        assert_eq!(crate::mi::find_str(&results, "current-thread-id"), Some("1"));
        assert_eq!(prompt.asked().len(), 1);
        assert_eq!(session.state(), SessionState::Starting);
        assert_eq!(session.pending_commands(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reply_during_prompt_wins_over_abort() {
        let prompt = Arc::new(SlowPrompt::new(Duration::from_secs(5), vec![WatchdogChoice::Abort]));
        let (mut session, events_tx, _server) =
            scripted_session(SessionOptions::default(), prompt.clone());
        *prompt.late_reply.lock().unwrap() = Some((events_tx.clone(), "1^done"));

        assert!(session.request(commands::thread_info()).await.is_ok());
        assert_eq!(prompt.asked().len(), 1);
        assert!(!session.state().is_terminal());
    }

    fn push_stream_lines(events_tx: &mpsc::UnboundedSender<SupervisorEvent>, lines: &[&str]) {
        for line in lines {
            let record = crate::mi::decode(&format!("~\"{}\\n\"", line));
            events_tx.send(SupervisorEvent::Record(record)).unwrap();
        }
    }

    #[tokio::test]
    async fn test_output_keeps_last_lines() {
        let options = SessionOptions {
            max_output_lines: 2,
            ..SessionOptions::default()
        };
        let (mut session, events_tx, _server) = scripted_session(options, abort_prompt());
        push_stream_lines(&events_tx, &["one", "two", "three"]);
        session.process_events().await;

        let kept: Vec<_> = session.output().map(|l| l.text.as_str()).collect();
        assert_eq!(kept, vec!["two", "three"]);
    }

    #[tokio::test]
    async fn test_output_unlimited_with_zero() {
        let options = SessionOptions {
            max_output_lines: 0,
            ..SessionOptions::default()
        };
        let (mut session, events_tx, _server) = scripted_session(options, abort_prompt());
        let lines: Vec<String> = (0..50).map(|i| format!("line {}", i)).collect();
        let refs: Vec<&str> = lines.iter().map(String::as_str).collect();
        push_stream_lines(&events_tx, &refs);
        session.process_events().await;

        assert_eq!(session.output().count(), 50);
        assert_eq!(session.output().next().map(|l| l.text.as_str()), Some("line 0"));
    }

    #[tokio::test]
    async fn test_terminate_bounded_when_debugger_stops_reading() {
        // A pipe that is never read fills up and blocks the write
        let (client, _server) = tokio::io::duplex(8);
        let (_events_tx, events_rx) = mpsc::unbounded_channel();
        let (notify_tx, _notify_rx) = mpsc::unbounded_channel();
        let mut session = Session::new(
            Supervisor::from_writer(client),
            events_rx,
            SessionOptions::default(),
            abort_prompt(),
            notify_tx,
        );

        tokio::time::timeout(Duration::from_secs(5), session.terminate())
            .await
            .expect("terminate must not hang on a full pipe");
        assert_eq!(session.state(), SessionState::Exited);
    }
}
