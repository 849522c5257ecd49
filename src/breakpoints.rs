//! Breakpoint management
//!
//! The user's breakpoints live here, independent of any session. Each
//! session gets them through [`BreakpointManager::sync_all`], which diffs
//! the desired set against the table the debugger reported and sends only
//! the commands needed to close the gap.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use serde::Serialize;

use crate::common::{Error, Result};
use crate::mi::{commands, find, MiCommand, ReportedBreakpoint};
use crate::session::Session;

/// Local breakpoint id, stable across sessions
pub type BreakpointId = u32;

/// Whether a breakpoint is known to the current session
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "detail", rename_all = "snake_case")]
pub enum SyncState {
    /// Not inserted in the current session
    Unsynced,
    /// Inserted under this session number
    Synced(u32),
    /// The debugger refused it with this message
    Rejected(String),
}

/// A user breakpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Breakpoint {
    pub id: BreakpointId,
    pub file: PathBuf,
    pub line: u32,
    pub enabled: bool,
    pub condition: Option<String>,
    pub ignore_count: u32,
    pub sync: SyncState,
    /// Ignore count changed locally since the last sync
    #[serde(skip)]
    ignore_edited: bool,
}

impl Breakpoint {
    /// `file:line`, for display
    pub fn location(&self) -> String {
        format!("{}:{}", self.file.display(), self.line)
    }

    /// Session number, when synced
    pub fn number(&self) -> Option<u32> {
        match self.sync {
            SyncState::Synced(number) => Some(number),
            _ => None,
        }
    }
}

/// What the editor knows about source files
pub trait SourceFiles: Send + Sync {
    /// Whether the file on disk matches what the user sees
    fn is_saved(&self, path: &Path) -> bool;

    /// Location string passed to `-break-insert`
    fn resolve_location(&self, path: &Path, line: u32) -> String {
        format!("{}:{}", path.display(), line)
    }
}

/// Files on disk, with an optional set of files that have unsaved edits
#[derive(Debug, Default)]
pub struct FsSources {
    dirty: RwLock<HashSet<PathBuf>>,
}

impl FsSources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_dirty(&self, path: impl Into<PathBuf>) {
        if let Ok(mut dirty) = self.dirty.write() {
            dirty.insert(path.into());
        }
    }

    pub fn mark_saved(&self, path: &Path) {
        if let Ok(mut dirty) = self.dirty.write() {
            dirty.remove(path);
        }
    }
}

impl SourceFiles for FsSources {
    fn is_saved(&self, path: &Path) -> bool {
        path.is_file()
            && self
                .dirty
                .read()
                .map(|dirty| !dirty.contains(path))
                .unwrap_or(false)
    }
}

/// Commands sent by one [`BreakpointManager::sync_all`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
    pub rejected: usize,
}

impl SyncReport {
    /// Whether the session was already in sync
    pub fn is_noop(&self) -> bool {
        *self == Self::default()
    }
}

/// The user's breakpoint set
pub struct BreakpointManager {
    sources: Arc<dyn SourceFiles>,
    breakpoints: BTreeMap<BreakpointId, Breakpoint>,
    next_id: BreakpointId,
}

impl BreakpointManager {
    pub fn new(sources: Arc<dyn SourceFiles>) -> Self {
        Self {
            sources,
            breakpoints: BTreeMap::new(),
            next_id: 1,
        }
    }

    /// Add a breakpoint; the file must be saved
    pub fn add(
        &mut self,
        file: impl Into<PathBuf>,
        line: u32,
        condition: Option<String>,
        ignore_count: u32,
    ) -> Result<BreakpointId> {
        let file = file.into();
        if !self.sources.is_saved(&file) {
            tracing::debug!(file = %file.display(), line, "Refusing breakpoint in unsaved file");
            return Err(Error::NotSaved(file));
        }

        let id = self.next_id;
        self.next_id += 1;
        tracing::info!(id, file = %file.display(), line, "Breakpoint added");
        self.breakpoints.insert(
            id,
            Breakpoint {
                id,
                file,
                line,
                enabled: true,
                condition: condition.filter(|c| !c.trim().is_empty()),
                ignore_count,
                sync: SyncState::Unsynced,
                ignore_edited: false,
            },
        );
        Ok(id)
    }

    /// Remove a breakpoint; its session entry goes away on the next sync
    pub fn remove(&mut self, id: BreakpointId) -> Result<Breakpoint> {
        let removed = self
            .breakpoints
            .remove(&id)
            .ok_or(Error::BreakpointNotFound { id })?;
        tracing::info!(id, "Breakpoint removed");
        Ok(removed)
    }

    pub fn set_enabled(&mut self, id: BreakpointId, enabled: bool) -> Result<()> {
        self.edit(id, |bp| bp.enabled = enabled)
    }

    pub fn set_condition(&mut self, id: BreakpointId, condition: Option<String>) -> Result<()> {
        let condition = condition.filter(|c| !c.trim().is_empty());
        self.edit(id, |bp| bp.condition = condition)
    }

    pub fn set_ignore_count(&mut self, id: BreakpointId, ignore_count: u32) -> Result<()> {
        self.edit(id, |bp| {
            bp.ignore_count = ignore_count;
            bp.ignore_edited = true;
        })
    }

    fn edit<F>(&mut self, id: BreakpointId, apply: F) -> Result<()>
    where
        F: FnOnce(&mut Breakpoint),
    {
        let bp = self
            .breakpoints
            .get_mut(&id)
            .ok_or(Error::BreakpointNotFound { id })?;
        apply(bp);
        // A refused breakpoint gets another chance after any edit
        if matches!(bp.sync, SyncState::Rejected(_)) {
            bp.sync = SyncState::Unsynced;
        }
        Ok(())
    }

    pub fn get(&self, id: BreakpointId) -> Option<&Breakpoint> {
        self.breakpoints.get(&id)
    }

    /// All breakpoints, by id
    pub fn list(&self) -> impl Iterator<Item = &Breakpoint> {
        self.breakpoints.values()
    }

    pub fn len(&self) -> usize {
        self.breakpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakpoints.is_empty()
    }

    /// Forget all session state; used when a new session starts
    pub fn reset_sync(&mut self) {
        for bp in self.breakpoints.values_mut() {
            bp.sync = SyncState::Unsynced;
            bp.ignore_edited = false;
        }
    }

    /// Local id of the breakpoint with this session number
    pub fn on_hit(&self, number: u32) -> Option<BreakpointId> {
        self.breakpoints
            .values()
            .find(|bp| bp.sync == SyncState::Synced(number))
            .map(|bp| bp.id)
    }

    /// Bring the session's breakpoint table in line with this set
    ///
    /// Refusals by the debugger are recorded per breakpoint; only errors
    /// that end the session are returned.
    pub async fn sync_all(&mut self, session: &mut Session) -> Result<SyncReport> {
        let mut report = SyncReport::default();
        let mut claimed = HashSet::new();

        let ids: Vec<BreakpointId> = self.breakpoints.keys().copied().collect();
        for id in ids {
            let Some(bp) = self.breakpoints.get(&id).cloned() else {
                continue;
            };
            match bp.sync {
                SyncState::Rejected(_) => {}
                SyncState::Synced(number) if session.reported_breakpoints().contains_key(&number) => {
                    claimed.insert(number);
                    if self.fix_drift(session, &bp, number).await? {
                        report.updated += 1;
                    }
                    if let Some(bp) = self.breakpoints.get_mut(&id) {
                        bp.ignore_edited = false;
                    }
                }
                _ => {
                    let sync = self.insert(session, &bp).await?;
                    match &sync {
                        SyncState::Synced(number) => {
                            claimed.insert(*number);
                            report.inserted += 1;
                        }
                        SyncState::Rejected(_) => report.rejected += 1,
                        SyncState::Unsynced => {}
                    }
                    if let Some(bp) = self.breakpoints.get_mut(&id) {
                        bp.sync = sync;
                        bp.ignore_edited = false;
                    }
                }
            }
        }

        let stale: Vec<u32> = session
            .reported_breakpoints()
            .keys()
            .filter(|number| !claimed.contains(*number))
            .copied()
            .collect();
        if !stale.is_empty() {
            if apply(session, commands::break_delete(&stale)).await? {
                report.deleted += stale.len();
            }
            // Refused deletes mean the numbers are gone already
            for number in stale {
                session.forget_breakpoint(number);
            }
        }

        if !report.is_noop() {
            tracing::info!(?report, "Breakpoints synced");
        }
        Ok(report)
    }

    async fn insert(&self, session: &mut Session, bp: &Breakpoint) -> Result<SyncState> {
        let location = self.sources.resolve_location(&bp.file, bp.line);
        let command = commands::break_insert(
            &location,
            !bp.enabled,
            bp.condition.as_deref(),
            bp.ignore_count,
        );
        match session.request(command).await {
            Ok(results) => match find(&results, "bkpt").and_then(ReportedBreakpoint::from_mi) {
                Some(reported) => {
                    let number = reported.number;
                    tracing::debug!(id = bp.id, number, %location, "Breakpoint inserted");
                    session.record_breakpoint(reported);
                    Ok(SyncState::Synced(number))
                }
                None => {
                    tracing::warn!(id = bp.id, %location, "Insert reply carried no breakpoint");
                    Ok(SyncState::Rejected("no breakpoint in reply".to_string()))
                }
            },
            Err(Error::CommandFailed { message, .. }) => {
                tracing::warn!(id = bp.id, %location, reason = %message, "Breakpoint rejected");
                Ok(SyncState::Rejected(message))
            }
            Err(e) => Err(e),
        }
    }

    /// Send the commands that make the session entry match; true if any was sent
    async fn fix_drift(&self, session: &mut Session, bp: &Breakpoint, number: u32) -> Result<bool> {
        let Some(reported) = session.reported_breakpoints().get(&number).cloned() else {
            return Ok(false);
        };
        let mut changed = false;

        if reported.enabled != bp.enabled {
            let command = if bp.enabled {
                commands::break_enable(&[number])
            } else {
                commands::break_disable(&[number])
            };
            if apply(session, command).await? {
                patch(session, number, |r| r.enabled = bp.enabled);
            }
            changed = true;
        }

        if reported.condition != bp.condition {
            if apply(session, commands::break_condition(number, bp.condition.as_deref())).await? {
                patch(session, number, |r| r.condition = bp.condition.clone());
            }
            changed = true;
        }

        // The debugger counts ignores down as they are consumed; only a
        // local edit re-arms them
        if bp.ignore_edited && reported.ignore_count != bp.ignore_count {
            if apply(session, commands::break_after(number, bp.ignore_count)).await? {
                patch(session, number, |r| r.ignore_count = bp.ignore_count);
            }
            changed = true;
        }

        Ok(changed)
    }
}

/// Send a command whose refusal is not fatal; true when it was accepted
async fn apply(session: &mut Session, command: MiCommand) -> Result<bool> {
    match session.request(command).await {
        Ok(_) => Ok(true),
        Err(Error::CommandFailed { command, message }) => {
            tracing::warn!(%command, reason = %message, "Debugger refused breakpoint update");
            Ok(false)
        }
        Err(e) => Err(e),
    }
}

fn patch<F>(session: &mut Session, number: u32, apply: F)
where
    F: FnOnce(&mut ReportedBreakpoint),
{
    if let Some(reported) = session.reported_breakpoint_mut(number) {
        apply(reported);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{FixedChoice, SessionOptions, WatchdogChoice};
    use crate::testing::{in_memory, MockGdb, MockOptions};
    use tokio::sync::mpsc;

    struct AllSaved;

    impl SourceFiles for AllSaved {
        fn is_saved(&self, _path: &Path) -> bool {
            true
        }
    }

    fn manager() -> BreakpointManager {
        BreakpointManager::new(Arc::new(AllSaved))
    }

    fn ready_session() -> Session {
        let (supervisor, rx) = in_memory(MockGdb::new(MockOptions::default()));
        let (notify_tx, _) = mpsc::unbounded_channel();
        let mut session = Session::new(
            supervisor,
            rx,
            SessionOptions::default(),
            Arc::new(FixedChoice(WatchdogChoice::Abort)),
            notify_tx,
        );
        session.mark_ready().unwrap();
        session
    }

    #[test]
    fn test_unsaved_file_rejected() {
        let sources = Arc::new(FsSources::new());
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("Model.mo");
        std::fs::write(&file, "model M end M;").unwrap();

        let mut breakpoints = BreakpointManager::new(sources.clone());
        assert!(matches!(
            breakpoints.add(dir.path().join("missing.mo"), 1, None, 0),
            Err(Error::NotSaved(_))
        ));

        sources.mark_dirty(&file);
        assert!(matches!(
            breakpoints.add(&file, 1, None, 0),
            Err(Error::NotSaved(_))
        ));
        assert!(breakpoints.is_empty());

        sources.mark_saved(&file);
        assert_eq!(breakpoints.add(&file, 1, None, 0).unwrap(), 1);
    }

    #[test]
    fn test_crud() {
        let mut breakpoints = manager();
        let a = breakpoints.add("/src/a.c", 3, Some("  ".to_string()), 0).unwrap();
        let b = breakpoints.add("/src/b.c", 9, None, 0).unwrap();
        assert_eq!((a, b), (1, 2));
        assert_eq!(breakpoints.get(a).unwrap().condition, None);

        breakpoints.set_enabled(b, false).unwrap();
        breakpoints.set_condition(b, Some("i == 2".to_string())).unwrap();
        let bp = breakpoints.get(b).unwrap();
        assert!(!bp.enabled);
        assert_eq!(bp.condition.as_deref(), Some("i == 2"));
        assert_eq!(bp.location(), "/src/b.c:9");

        breakpoints.remove(a).unwrap();
        assert_eq!(breakpoints.list().map(|bp| bp.id).collect::<Vec<_>>(), vec![b]);
        assert!(matches!(
            breakpoints.remove(a),
            Err(Error::BreakpointNotFound { id: 1 })
        ));
        assert!(matches!(
            breakpoints.set_ignore_count(7, 1),
            Err(Error::BreakpointNotFound { id: 7 })
        ));
    }

    #[tokio::test]
    async fn test_first_sync_inserts() {
        let mut session = ready_session();
        let mut breakpoints = manager();
        let id = breakpoints.add("Model.mo", 42, None, 0).unwrap();

        let report = breakpoints.sync_all(&mut session).await.unwrap();
        assert_eq!(report.inserted, 1);
        assert_eq!(breakpoints.get(id).unwrap().sync, SyncState::Synced(1));
        assert_eq!(breakpoints.on_hit(1), Some(id));
        assert_eq!(session.reported_breakpoints()[&1].line, Some(42));
    }

    #[tokio::test]
    async fn test_sync_is_idempotent() {
        let mut session = ready_session();
        let mut breakpoints = manager();
        breakpoints.add("/src/a.c", 3, Some("x > 1".to_string()), 2).unwrap();
        breakpoints.add("/src/b.c", 9, None, 0).unwrap();
        breakpoints.sync_all(&mut session).await.unwrap();

        let issued = session.commands_issued();
        let report = breakpoints.sync_all(&mut session).await.unwrap();
        assert!(report.is_noop());
        assert_eq!(session.commands_issued(), issued);
    }

    #[tokio::test]
    async fn test_drift_sends_minimal_updates() {
        let mut session = ready_session();
        let mut breakpoints = manager();
        let id = breakpoints.add("/src/a.c", 3, None, 0).unwrap();
        breakpoints.sync_all(&mut session).await.unwrap();

        breakpoints.set_enabled(id, false).unwrap();
        breakpoints.set_ignore_count(id, 4).unwrap();
        let issued = session.commands_issued();
        let report = breakpoints.sync_all(&mut session).await.unwrap();
        assert_eq!(report.updated, 1);
        assert_eq!(report.inserted, 0);
        // -break-disable and -break-after
        assert_eq!(session.commands_issued(), issued + 2);

        let reported = &session.reported_breakpoints()[&1];
        assert!(!reported.enabled);
        assert_eq!(reported.ignore_count, 4);
        assert!(breakpoints.sync_all(&mut session).await.unwrap().is_noop());
    }

    #[tokio::test]
    async fn test_rejected_until_edited() {
        let mut session = ready_session();
        let mut breakpoints = manager();
        let id = breakpoints.add("/src/nosuch.c", 5, None, 0).unwrap();

        let report = breakpoints.sync_all(&mut session).await.unwrap();
        assert_eq!(report.rejected, 1);
        assert_eq!(
            breakpoints.get(id).unwrap().sync,
            SyncState::Rejected("No source file named /src/nosuch.c.".to_string())
        );
        assert!(session.reported_breakpoints().is_empty());

        // Not retried on its own
        let issued = session.commands_issued();
        breakpoints.sync_all(&mut session).await.unwrap();
        assert_eq!(session.commands_issued(), issued);

        breakpoints.set_condition(id, Some("i > 0".to_string())).unwrap();
        assert_eq!(breakpoints.get(id).unwrap().sync, SyncState::Unsynced);
    }

    #[tokio::test]
    async fn test_removed_and_unknown_entries_deleted() {
        let mut session = ready_session();
        let mut breakpoints = manager();
        let id = breakpoints.add("/src/a.c", 3, None, 0).unwrap();
        breakpoints.sync_all(&mut session).await.unwrap();

        // An entry the user created by hand in the debugger console
        let results = session
            .request(commands::break_insert("/src/c.c:1", false, None, 0))
            .await
            .unwrap();
        let manual = find(&results, "bkpt")
            .and_then(ReportedBreakpoint::from_mi)
            .unwrap();
        session.record_breakpoint(manual);

        breakpoints.remove(id).unwrap();
        let report = breakpoints.sync_all(&mut session).await.unwrap();
        assert_eq!(report.deleted, 2);
        assert!(session.reported_breakpoints().is_empty());
    }

    #[tokio::test]
    async fn test_reset_sync_reinserts() {
        let mut breakpoints = manager();
        let id = breakpoints.add("/src/a.c", 3, None, 0).unwrap();

        let mut first = ready_session();
        breakpoints.sync_all(&mut first).await.unwrap();
        assert_eq!(breakpoints.get(id).unwrap().number(), Some(1));

        breakpoints.reset_sync();
        assert_eq!(breakpoints.get(id).unwrap().sync, SyncState::Unsynced);
        let mut second = ready_session();
        let report = breakpoints.sync_all(&mut second).await.unwrap();
        assert_eq!(report.inserted, 1);
        assert_eq!(breakpoints.on_hit(1), Some(id));
    }
}
