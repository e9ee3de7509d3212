//! Multi-server synchronization: sync one partition against every known
//! replication partner of the home server.
//!
//! A run discovers the partner graph, optionally probes every partner up
//! front, then visits partners one at a time in traversal order. Each visit
//! reports progress through a caller-supplied callback whose return value is
//! the only cancellation mechanism: `false` stops the run before the next
//! partner is visited. Partner failures are recorded in a [`FailureLedger`]
//! and do not stop the run unless `abort_on_unreachable` is set or the home
//! session itself fails.

use crate::cursor::{CursorTracker, ReplicationCursorSet};
use crate::error::{
    DirectoryError, ErrorContext, Result, DRA_GENERIC_FAILURE, RPC_SERVER_UNAVAILABLE,
};
use crate::failure::{get_replication_connection_failures, FailureLedger};
use crate::session::DirectorySession;
use crate::topology::{ReplicationTopology, SyncDirection, SyncEdge};
use crate::types::{name_key, names_equal, InvocationId, Usn};
use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Independent toggles controlling a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncOptions {
    /// Abort the whole run as soon as one partner is unreachable.
    pub abort_on_unreachable: bool,
    /// Visit only direct partners of the home server.
    pub adjacent_only: bool,
    /// Probe partners and report reachability without syncing.
    pub check_aliveness_only: bool,
    /// Skip the up-front reachability pass.
    pub skip_initial_check: bool,
    /// Push the home server's changes out instead of pulling.
    pub push_outward: bool,
    /// Include partners outside the home server's site.
    pub cross_site: bool,
}

/// Progress event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncEventKind {
    /// A sync with a partner is starting.
    SyncStarted,
    /// A sync with a partner finished successfully.
    SyncCompleted,
    /// A probe or sync failed.
    Error,
}

/// One progress event passed to the callback.
#[derive(Debug, Clone, Copy)]
pub struct SyncProgress<'a> {
    /// What happened.
    pub event: SyncEventKind,
    /// Destination of the sync step.
    pub target: Option<&'a str>,
    /// Source of the sync step.
    pub source: Option<&'a str>,
    /// The failure, for `Error` events.
    pub error: Option<&'a DirectoryError>,
}

/// Per-partner state: `Pending -> Contacting -> Syncing -> {Completed, Failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PartnerState {
    /// Not visited yet.
    Pending,
    /// Reachability is being checked.
    Contacting,
    /// Sync in flight.
    Syncing,
    /// Done. In aliveness-only runs this means the partner answered.
    Completed,
    /// Probe or sync failed.
    Failed,
}

/// Whole-run state: `NotStarted -> Running -> {Finished, Aborted}`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunState {
    /// Created, nothing done yet.
    #[default]
    NotStarted,
    /// Visiting partners.
    Running,
    /// Every partner was visited.
    Finished,
    /// Stopped early; see [`SyncReport::abort_cause`].
    Aborted,
}

/// Why a run stopped early.
#[derive(Debug, Clone, PartialEq)]
pub enum AbortCause {
    /// The progress callback returned `false`.
    Callback,
    /// A partner was unreachable and `abort_on_unreachable` was set.
    Unreachable(DirectoryError),
    /// The home session failed.
    SessionFault(DirectoryError),
}

/// What happened to one partner.
#[derive(Debug, Clone, PartialEq)]
pub struct PartnerOutcome {
    /// The partner visited.
    pub partner: String,
    /// Destination of the sync step.
    pub destination: String,
    /// Source of the sync step.
    pub source: String,
    /// Final state for this partner.
    pub state: PartnerState,
    /// Probe or sync result; `None` when never contacted.
    pub reachable: Option<bool>,
    /// Failure, if any.
    pub error: Option<DirectoryError>,
    /// Destination's cursor for the source before the sync.
    pub cursor_before: Option<Usn>,
    /// Destination's cursor for the source after a successful sync.
    pub cursor_after: Option<Usn>,
    source_invocation_id: InvocationId,
}

impl PartnerOutcome {
    fn pending(edge: SyncEdge) -> Self {
        Self {
            partner: edge.partner,
            destination: edge.destination,
            source: edge.source,
            state: PartnerState::Pending,
            reachable: None,
            error: None,
            cursor_before: None,
            cursor_after: None,
            source_invocation_id: edge.source_invocation_id,
        }
    }

    fn set_state(&mut self, state: PartnerState) {
        debug!(partner = %self.partner, from = ?self.state, to = ?state, "partner state");
        self.state = state;
    }
}

/// Result of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncReport {
    /// Final run state.
    pub state: RunState,
    /// Partition synced.
    pub partition: String,
    /// One entry per partner in visitation order. Entries still `Pending`
    /// were never visited because the run stopped early.
    pub outcomes: Vec<PartnerOutcome>,
    /// Set when `state` is `Aborted`.
    pub abort_cause: Option<AbortCause>,
}

impl SyncReport {
    /// Empty report in `NotStarted`.
    pub fn new(partition: impl Into<String>) -> Self {
        Self {
            state: RunState::NotStarted,
            partition: partition.into(),
            outcomes: Vec::new(),
            abort_cause: None,
        }
    }

    /// True when every partner was visited.
    pub fn is_finished(&self) -> bool {
        self.state == RunState::Finished
    }

    /// Outcome for a partner, by name.
    pub fn outcome(&self, partner: &str) -> Option<&PartnerOutcome> {
        self.outcomes.iter().find(|o| names_equal(&o.partner, partner))
    }

    /// Partners that completed.
    pub fn completed(&self) -> usize {
        self.count(PartnerState::Completed)
    }

    /// Partners that failed.
    pub fn failed(&self) -> usize {
        self.count(PartnerState::Failed)
    }

    /// Partners found unreachable.
    pub fn unreachable_partners(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|o| o.reachable == Some(false))
            .map(|o| o.partner.as_str())
            .collect()
    }

    fn count(&self, state: PartnerState) -> usize {
        self.outcomes.iter().filter(|o| o.state == state).count()
    }

    fn transition(&mut self, state: RunState) {
        info!(partition = %self.partition, from = ?self.state, to = ?state, "replication run state");
        self.state = state;
    }
}

/// Syncs a partition against all partners of the session's server.
///
/// Syncs sharing a (destination, source) pair never interleave, even across
/// concurrent runs on the same orchestrator.
pub struct SyncOrchestrator {
    session: Arc<DirectorySession>,
    options: SyncOptions,
    ledger: Arc<FailureLedger>,
    locks: DashMap<(String, String), Arc<Mutex<()>>>,
    trackers: DashMap<String, CursorTracker>,
}

impl SyncOrchestrator {
    /// Orchestrator over `session` with its own failure ledger.
    pub fn new(session: Arc<DirectorySession>, options: SyncOptions) -> Self {
        Self {
            session,
            options,
            ledger: Arc::new(FailureLedger::new()),
            locks: DashMap::new(),
            trackers: DashMap::new(),
        }
    }

    /// Share a failure ledger with other orchestrators.
    pub fn with_ledger(mut self, ledger: Arc<FailureLedger>) -> Self {
        self.ledger = ledger;
        self
    }

    /// Run options.
    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    /// Failure streaks recorded by runs.
    pub fn ledger(&self) -> &Arc<FailureLedger> {
        &self.ledger
    }

    /// Sync `partition` against every partner. `callback` sees each progress
    /// event synchronously, in traversal order; returning `false` stops the
    /// run before the next partner.
    ///
    /// Errors before the run starts (closed session, unreadable home
    /// topology) are returned as `Err`. Everything after that is reported in
    /// the [`SyncReport`].
    pub async fn sync_all<F>(&self, partition: &str, mut callback: F) -> Result<SyncReport>
    where
        F: FnMut(&SyncProgress<'_>) -> bool,
    {
        let opts = &self.options;
        let direction = if opts.push_outward {
            SyncDirection::Push
        } else {
            SyncDirection::Pull
        };
        let topology = ReplicationTopology::discover(
            &self.session,
            partition,
            direction,
            opts.adjacent_only,
            opts.cross_site,
        )
        .await?;
        if !opts.check_aliveness_only {
            self.seed_ledger().await?;
        }

        let mut report = SyncReport::new(partition);
        report.outcomes = topology
            .visit_order()
            .into_iter()
            .map(PartnerOutcome::pending)
            .collect();
        report.transition(RunState::Running);

        let mut keep_going = true;

        if !opts.skip_initial_check || opts.check_aliveness_only {
            for i in 0..report.outcomes.len() {
                if !keep_going {
                    return Ok(self.abort(report, AbortCause::Callback));
                }
                let outcome = &mut report.outcomes[i];
                let err = match self.contact(partition, outcome).await {
                    Ok(()) => {
                        let next = if opts.check_aliveness_only {
                            PartnerState::Completed
                        } else {
                            PartnerState::Pending
                        };
                        outcome.set_state(next);
                        continue;
                    }
                    Err(err) => err,
                };
                if err.is_session_fault() {
                    return Ok(self.abort(report, AbortCause::SessionFault(err)));
                }
                keep_going = emit(&mut callback, SyncEventKind::Error, outcome, Some(&err));
                if !opts.check_aliveness_only {
                    self.record_failure(outcome, &err);
                }
                if opts.abort_on_unreachable {
                    return Ok(self.abort(report, AbortCause::Unreachable(err)));
                }
            }
        }

        if opts.check_aliveness_only {
            return Ok(self.finish(report));
        }

        for i in 0..report.outcomes.len() {
            if report.outcomes[i].state == PartnerState::Failed {
                continue;
            }
            if !keep_going {
                return Ok(self.abort(report, AbortCause::Callback));
            }
            let outcome = &mut report.outcomes[i];
            let (proceed, failure) = self.sync_partner(partition, outcome, &mut callback).await;
            keep_going = proceed;

            if let Some(err) = failure {
                if self.is_home_fault(&err) {
                    return Ok(self.abort(report, AbortCause::SessionFault(err)));
                }
                if opts.abort_on_unreachable && is_unreachable(&err, &report.outcomes[i]) {
                    return Ok(self.abort(report, AbortCause::Unreachable(err)));
                }
            }
        }

        Ok(self.finish(report))
    }

    async fn seed_ledger(&self) -> Result<()> {
        match get_replication_connection_failures(&self.session).await {
            Ok(failures) => {
                self.ledger.seed(self.session.server_name(), &failures);
                Ok(())
            }
            Err(e) if e.is_session_fault() => Err(e),
            Err(e) => {
                warn!(server = self.session.server_name(), error = %e, "cannot read failure history");
                Ok(())
            }
        }
    }

    /// Probe a partner. Errors are either a session fault or `UnreachablePartner`.
    async fn contact(&self, partition: &str, outcome: &mut PartnerOutcome) -> Result<()> {
        let transport = self.session.transport()?;
        outcome.set_state(PartnerState::Contacting);
        match transport.probe(&outcome.partner).await {
            Ok(()) => {
                outcome.reachable = Some(true);
                Ok(())
            }
            Err(e) => {
                debug!(partner = %outcome.partner, error = %e, "probe failed");
                let err = DirectoryError::UnreachablePartner {
                    partner: outcome.partner.clone(),
                    context: step_context(partition, outcome, "probe"),
                };
                outcome.reachable = Some(false);
                outcome.error = Some(err.clone());
                outcome.set_state(PartnerState::Failed);
                Err(err)
            }
        }
    }

    /// Sync one partner. Returns the callback's continue signal and the
    /// failure, if any.
    async fn sync_partner<F>(
        &self,
        partition: &str,
        outcome: &mut PartnerOutcome,
        callback: &mut F,
    ) -> (bool, Option<DirectoryError>)
    where
        F: FnMut(&SyncProgress<'_>) -> bool,
    {
        if outcome.state == PartnerState::Pending {
            outcome.set_state(PartnerState::Contacting);
        }
        let transport = match self.session.transport() {
            Ok(t) => t,
            Err(e) => {
                outcome.set_state(PartnerState::Failed);
                outcome.error = Some(e.clone());
                return (false, Some(e));
            }
        };

        let lock = self
            .locks
            .entry((name_key(&outcome.destination), name_key(&outcome.source)))
            .or_default()
            .clone();
        let _guard = lock.lock().await;

        outcome.set_state(PartnerState::Syncing);
        let mut proceed = emit(callback, SyncEventKind::SyncStarted, outcome, None);
        outcome.cursor_before = self.read_cursor(partition, outcome).await;

        match transport
            .sync_replica(&outcome.destination, partition, &outcome.source)
            .await
        {
            Ok(()) => {
                outcome.reachable = Some(true);
                self.ledger.record_success(&outcome.destination, &outcome.source);
                outcome.cursor_after = self.read_cursor(partition, outcome).await;
                outcome.set_state(PartnerState::Completed);
                proceed &= emit(callback, SyncEventKind::SyncCompleted, outcome, None);
                (proceed, None)
            }
            Err(e) => {
                let err = e.with_context(&step_context(partition, outcome, "sync"));
                if !self.is_home_fault(&err) && is_unreachable(&err, outcome) {
                    outcome.reachable = Some(false);
                }
                outcome.error = Some(err.clone());
                outcome.set_state(PartnerState::Failed);
                if !self.is_home_fault(&err) {
                    self.record_failure(outcome, &err);
                }
                warn!(
                    destination = %outcome.destination,
                    source = %outcome.source,
                    partition = partition,
                    error = %err,
                    "partner sync failed"
                );
                proceed &= emit(callback, SyncEventKind::Error, outcome, Some(&err));
                (proceed, Some(err))
            }
        }
    }

    /// Destination's cursor for the outcome's source. Every read also feeds
    /// the per-destination tracker so regressions are logged.
    async fn read_cursor(&self, partition: &str, outcome: &PartnerOutcome) -> Option<Usn> {
        let transport = self.session.transport().ok()?;
        let cursors = match transport
            .replication_cursors(&outcome.destination, partition)
            .await
        {
            Ok(c) => c,
            Err(e) => {
                debug!(server = %outcome.destination, error = %e, "cursor read failed");
                return None;
            }
        };
        let set = ReplicationCursorSet::new(partition, cursors);
        let regressions = self
            .trackers
            .entry(name_key(&outcome.destination))
            .or_default()
            .observe(&set);
        for r in &regressions {
            warn!(
                server = %outcome.destination,
                source = %r.source_invocation_id,
                previous = r.previous,
                observed = r.observed,
                "replication cursor moved backwards"
            );
        }
        Some(
            set.by_invocation(&outcome.source_invocation_id)
                .map(|c| c.up_to_date_usn)
                .unwrap_or(0),
        )
    }

    fn record_failure(&self, outcome: &PartnerOutcome, err: &DirectoryError) {
        let code = err.code().unwrap_or(if is_unreachable(err, outcome) {
            RPC_SERVER_UNAVAILABLE
        } else {
            DRA_GENERIC_FAILURE
        });
        self.ledger.record_failure(
            &outcome.destination,
            &outcome.source,
            code,
            &err.to_string(),
            Utc::now(),
        );
    }

    /// Session-level fault on the home server.
    fn is_home_fault(&self, err: &DirectoryError) -> bool {
        err.is_session_fault()
            && err
                .server()
                .map(|s| names_equal(s, self.session.server_name()))
                .unwrap_or(true)
    }

    fn abort(&self, mut report: SyncReport, cause: AbortCause) -> SyncReport {
        warn!(
            server = self.session.server_name(),
            partition = %report.partition,
            cause = ?cause,
            "replication run aborted"
        );
        report.abort_cause = Some(cause);
        report.transition(RunState::Aborted);
        report
    }

    fn finish(&self, mut report: SyncReport) -> SyncReport {
        report.transition(RunState::Finished);
        info!(
            server = self.session.server_name(),
            partition = %report.partition,
            partners = report.outcomes.len(),
            completed = report.completed(),
            failed = report.failed(),
            "replication run finished"
        );
        report
    }
}

fn emit<F>(
    callback: &mut F,
    event: SyncEventKind,
    outcome: &PartnerOutcome,
    error: Option<&DirectoryError>,
) -> bool
where
    F: FnMut(&SyncProgress<'_>) -> bool,
{
    callback(&SyncProgress {
        event,
        target: Some(&outcome.destination),
        source: Some(&outcome.source),
        error,
    })
}

fn step_context(partition: &str, outcome: &PartnerOutcome, operation: &str) -> ErrorContext {
    ErrorContext::server(outcome.destination.as_str())
        .with_source(outcome.source.as_str())
        .with_partition(partition)
        .with_operation(operation)
}

/// True if `err` means either end of the outcome's sync step could not be
/// reached. On transitive edges the destination is not the home server.
fn is_unreachable(err: &DirectoryError, outcome: &PartnerOutcome) -> bool {
    match err {
        DirectoryError::UnreachablePartner { .. } => true,
        DirectoryError::Connection { server, .. } => {
            names_equal(server, &outcome.destination) || names_equal(server, &outcome.source)
        }
        DirectoryError::Operation { code, .. } => *code == RPC_SERVER_UNAVAILABLE,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::context::{Credentials, DirectoryContext};
    use crate::memory::{InMemoryDirectory, MemoryServer};
    use crate::transport::DirectoryTransport;

    const NC: &str = "DC=corp,DC=example";

    async fn directory(partners: &[&str]) -> Arc<InMemoryDirectory> {
        let dir = Arc::new(InMemoryDirectory::new());
        dir.add_server(MemoryServer::new("home", "corp.example", "corp.example").with_partition(NC))
            .await;
        for p in partners {
            dir.add_server(MemoryServer::new(*p, "corp.example", "corp.example").with_partition(NC))
                .await;
            dir.link("home", p, NC).await.unwrap();
        }
        dir
    }

    async fn orchestrator(dir: &Arc<InMemoryDirectory>, options: SyncOptions) -> SyncOrchestrator {
        let session = DirectorySession::open(
            dir.clone(),
            DirectoryContext::server("home"),
            &Credentials::integrated(),
            &SessionConfig::default(),
        )
        .await
        .unwrap();
        SyncOrchestrator::new(Arc::new(session), options)
    }

    #[test]
    fn test_new_report_not_started() {
        let report = SyncReport::new(NC);
        assert_eq!(report.state, RunState::NotStarted);
        assert!(report.outcomes.is_empty());
        assert!(report.abort_cause.is_none());
    }

    fn edge(destination: &str, source: &str, partner: &str) -> PartnerOutcome {
        PartnerOutcome::pending(SyncEdge {
            destination: destination.to_string(),
            source: source.to_string(),
            source_invocation_id: InvocationId::from_u128(9),
            partner: partner.to_string(),
            depth: 2,
        })
    }

    fn connection_lost(server: &str) -> DirectoryError {
        DirectoryError::Connection {
            server: server.to_string(),
            reason: "timeout".to_string(),
        }
    }

    #[test]
    fn test_is_unreachable() {
        let direct = edge("home", "dc2", "dc2");
        let rpc = DirectoryError::operation(RPC_SERVER_UNAVAILABLE, "down", ErrorContext::default());
        assert!(is_unreachable(&rpc, &direct));
        let other = DirectoryError::operation(8606, "bad", ErrorContext::default());
        assert!(!is_unreachable(&other, &direct));
        assert!(is_unreachable(&connection_lost("DC2"), &direct));
        assert!(!is_unreachable(&connection_lost("dc3"), &direct));
    }

    #[test]
    fn test_unreachable_intermediate_on_transitive_edge() {
        let transitive = edge("a", "far", "far");
        assert!(is_unreachable(&connection_lost("A"), &transitive));
        assert!(is_unreachable(&connection_lost("far"), &transitive));
        assert!(!is_unreachable(&connection_lost("b"), &transitive));
    }

    #[tokio::test]
    async fn test_unreachable_intermediate_records_rpc_unavailable() {
        let dir = directory(&["a"]).await;
        let orch = orchestrator(&dir, SyncOptions::default()).await;
        let transitive = edge("a", "far", "far");

        orch.record_failure(&transitive, &connection_lost("a"));
        let streak = orch.ledger().get("a", "far").unwrap();
        assert_eq!(streak.last_error_code, RPC_SERVER_UNAVAILABLE);
        assert_eq!(streak.consecutive_failure_count, 1);
    }

    #[tokio::test]
    async fn test_all_partners_synced() {
        let dir = directory(&["a", "b"]).await;
        dir.write_attribute("a", "CN=x,DC=corp,DC=example", "cn", &["x"]).await.unwrap();
        let orch = orchestrator(&dir, SyncOptions::default()).await;

        let report = orch.sync_all(NC, |_| true).await.unwrap();
        assert!(report.is_finished());
        assert_eq!(report.completed(), 2);
        let a = report.outcome("a").unwrap();
        assert_eq!(a.cursor_before, Some(0));
        assert_eq!(a.cursor_after, Some(1));
        assert_eq!(dir.sync_log().await.len(), 2);
    }

    #[tokio::test]
    async fn test_callback_false_stops_before_next_partner() {
        let dir = directory(&["a", "b", "c"]).await;
        let orch = orchestrator(&dir, SyncOptions::default()).await;

        let report = orch
            .sync_all(NC, |p| p.event != SyncEventKind::SyncCompleted)
            .await
            .unwrap();
        assert_eq!(report.state, RunState::Aborted);
        assert_eq!(report.abort_cause, Some(AbortCause::Callback));
        assert_eq!(report.outcomes[0].state, PartnerState::Completed);
        for unvisited in &report.outcomes[1..] {
            assert_eq!(unvisited.state, PartnerState::Pending);
            assert_eq!(unvisited.reachable, Some(true));
            assert!(unvisited.cursor_before.is_none());
        }
        assert_eq!(dir.sync_log().await.len(), 1);
    }

    #[tokio::test]
    async fn test_abort_on_unreachable() {
        let dir = directory(&["a", "b", "c"]).await;
        dir.set_reachable("b", false).await;
        let options = SyncOptions {
            abort_on_unreachable: true,
            ..SyncOptions::default()
        };
        let orch = orchestrator(&dir, options).await;

        let report = orch.sync_all(NC, |_| true).await.unwrap();
        assert_eq!(report.state, RunState::Aborted);
        assert!(matches!(report.abort_cause, Some(AbortCause::Unreachable(_))));
        assert_eq!(report.outcome("c").unwrap().state, PartnerState::Pending);
        assert!(dir.sync_log().await.is_empty());
    }

    #[tokio::test]
    async fn test_skip_initial_check_finds_dead_partner_during_sync() {
        let dir = directory(&["a", "b"]).await;
        dir.set_reachable("a", false).await;
        let options = SyncOptions {
            skip_initial_check: true,
            ..SyncOptions::default()
        };
        let orch = orchestrator(&dir, options).await;

        let report = orch.sync_all(NC, |_| true).await.unwrap();
        assert!(report.is_finished());
        assert_eq!(dir.probe_count().await, 0);
        let a = report.outcome("a").unwrap();
        assert_eq!(a.state, PartnerState::Failed);
        assert_eq!(a.reachable, Some(false));
        assert_eq!(a.error.as_ref().and_then(|e| e.code()), Some(RPC_SERVER_UNAVAILABLE));
        assert_eq!(orch.ledger().consecutive_failures("home", "a"), 1);
        assert_eq!(report.outcome("b").unwrap().state, PartnerState::Completed);
    }

    #[tokio::test]
    async fn test_sync_failure_records_server_code() {
        let dir = directory(&["a"]).await;
        dir.fail_sync("home", "a", 8606, "insufficient attributes").await;
        let orch = orchestrator(&dir, SyncOptions::default()).await;

        let report = orch.sync_all(NC, |_| true).await.unwrap();
        assert!(report.is_finished());
        let streak = orch.ledger().get("home", "a").unwrap();
        assert_eq!(streak.last_error_code, 8606);
        assert_eq!(streak.consecutive_failure_count, 1);

        dir.clear_sync_fault("home", "a").await;
        orch.sync_all(NC, |_| true).await.unwrap();
        assert_eq!(orch.ledger().consecutive_failures("home", "a"), 0);
    }

    #[tokio::test]
    async fn test_push_outward_targets_pullers() {
        let dir = directory(&[]).await;
        for p in ["x", "y"] {
            dir.add_server(MemoryServer::new(p, "corp.example", "corp.example").with_partition(NC))
                .await;
            dir.link(p, "home", NC).await.unwrap();
        }
        let options = SyncOptions {
            push_outward: true,
            ..SyncOptions::default()
        };
        let orch = orchestrator(&dir, options).await;

        let report = orch.sync_all(NC, |_| true).await.unwrap();
        assert!(report.is_finished());
        let partners: Vec<_> = report.outcomes.iter().map(|o| o.partner.as_str()).collect();
        assert_eq!(partners, vec!["y", "x"]);
        for attempt in dir.sync_log().await {
            assert_eq!(attempt.source, "home");
            assert!(attempt.succeeded);
        }
    }

    #[tokio::test]
    async fn test_transitive_partners_unless_adjacent_only() {
        let dir = directory(&["a"]).await;
        dir.add_server(MemoryServer::new("far", "corp.example", "corp.example").with_partition(NC))
            .await;
        dir.link("a", "far", NC).await.unwrap();

        let orch = orchestrator(&dir, SyncOptions::default()).await;
        let report = orch.sync_all(NC, |_| true).await.unwrap();
        assert_eq!(report.outcomes.len(), 2);
        let far = report.outcome("far").unwrap();
        assert_eq!(far.destination, "a");
        assert_eq!(far.source, "far");

        let adjacent = orchestrator(
            &dir,
            SyncOptions {
                adjacent_only: true,
                ..SyncOptions::default()
            },
        )
        .await;
        let report = adjacent.sync_all(NC, |_| true).await.unwrap();
        assert_eq!(report.outcomes.len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_runs_serialize_each_pair() {
        let dir = directory(&["a", "b"]).await;
        dir.fail_sync("home", "a", 8606, "insufficient attributes").await;
        let orch = orchestrator(&dir, SyncOptions::default()).await;

        let (first, second) = tokio::join!(orch.sync_all(NC, |_| true), orch.sync_all(NC, |_| true));
        for report in [first.unwrap(), second.unwrap()] {
            assert!(report.is_finished());
            assert_eq!(report.outcome("a").unwrap().state, PartnerState::Failed);
            assert_eq!(report.outcome("b").unwrap().state, PartnerState::Completed);
        }

        let log = dir.sync_log().await;
        let to_a: Vec<_> = log.iter().filter(|s| s.source == "a").collect();
        assert_eq!(to_a.len(), 2);
        assert!(to_a.iter().all(|s| !s.succeeded));
        assert_eq!(log.iter().filter(|s| s.source == "b" && s.succeeded).count(), 2);

        let streak = orch.ledger().get("home", "a").unwrap();
        assert_eq!(streak.consecutive_failure_count, 2);
        assert_eq!(streak.last_error_code, 8606);
        assert!(orch.ledger().get("home", "b").is_none());

        let reported = dir.connection_failures("home").await.unwrap();
        assert_eq!(reported.len(), 1);
        assert_eq!(reported[0].consecutive_failure_count, streak.consecutive_failure_count);
    }

    #[tokio::test]
    async fn test_push_outward_reaches_transitive_targets() {
        let dir = directory(&[]).await;
        for (puller, from) in [("x", "home"), ("y", "x")] {
            dir.add_server(MemoryServer::new(puller, "corp.example", "corp.example").with_partition(NC))
                .await;
            dir.link(puller, from, NC).await.unwrap();
        }
        dir.write_attribute("home", "CN=x,DC=corp,DC=example", "cn", &["x"]).await.unwrap();
        let push = SyncOptions {
            push_outward: true,
            ..SyncOptions::default()
        };
        let orch = orchestrator(&dir, push.clone()).await;

        let report = orch.sync_all(NC, |_| true).await.unwrap();
        assert!(report.is_finished());
        let steps: Vec<_> = report
            .outcomes
            .iter()
            .map(|o| (o.partner.as_str(), o.destination.as_str(), o.source.as_str()))
            .collect();
        assert_eq!(steps, vec![("y", "y", "x"), ("x", "x", "home")]);
        let x = report.outcome("x").unwrap();
        assert_eq!(x.cursor_before, Some(0));
        assert_eq!(x.cursor_after, Some(1));
        assert_eq!(report.completed(), 2);

        let adjacent = orchestrator(
            &dir,
            SyncOptions {
                adjacent_only: true,
                ..push
            },
        )
        .await;
        let report = adjacent.sync_all(NC, |_| true).await.unwrap();
        assert_eq!(report.outcomes.len(), 1);
        assert_eq!(report.outcomes[0].partner, "x");
    }

    #[tokio::test]
    async fn test_closed_session_fails_before_start() {
        let dir = directory(&["a"]).await;
        let orch = orchestrator(&dir, SyncOptions::default()).await;
        orch.session.close().await.unwrap();
        let err = orch.sync_all(NC, |_| true).await.unwrap_err();
        assert!(err.is_session_fault());
    }
}
