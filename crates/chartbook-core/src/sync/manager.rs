//! The sync cycle state machine.
//!
//! One `SyncManager` is constructed at startup and shared by reference; it
//! owns no global state. Cycles are push-then-pull. The store mutex is taken
//! per operation inside `CatalogService`, never across a network await.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use crate::auth::AccessTokenProvider;
use crate::db::RemoteApply;
use crate::error::{Error, Result};
use crate::services::CatalogService;

use super::protocol::{
    ChangeOp, MutationEnvelope, MutationStatus, PullRequest, PushRequest,
};
use super::trace::{SyncTrace, TraceEntry};
use super::transport::SyncTransport;
use super::{ConnectivityProbe, SyncEvent, SyncStatus};

/// Retry delays for consecutive failed cycles, capped at the last step.
pub const BACKOFF_LADDER: [Duration; 5] = [
    Duration::from_secs(5),
    Duration::from_secs(15),
    Duration::from_secs(30),
    Duration::from_secs(60),
    Duration::from_secs(120),
];

const PUSH_BATCH_SIZE: usize = 50;
const PULL_PAGE_SIZE: u32 = 100;

/// How a call to [`SyncManager::sync`] ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Full cycle ran; both phases succeeded
    Completed { pushed: u64, pulled: u64 },
    /// Probe reported offline; nothing ran, no backoff consumed
    Offline,
    /// Another cycle was already in flight; nothing ran
    AlreadyRunning,
    /// Cycle failed; `authentication` failures do not consume backoff
    Failed {
        message: String,
        authentication: bool,
    },
}

/// How a cycle was triggered; stamped into the sync state row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    Manual,
    Forced,
    Scheduled,
}

impl SyncMode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Forced => "forced",
            Self::Scheduled => "scheduled",
        }
    }
}

type Listener = Box<dyn Fn(&SyncEvent) + Send + Sync>;
type SharedListener = Arc<dyn Fn(&SyncEvent) + Send + Sync>;

/// Handle returned by [`SyncManager::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerId(u64);

pub struct SyncManager<T, P, C> {
    service: CatalogService,
    transport: T,
    tokens: P,
    probe: C,
    status: Mutex<SyncStatus>,
    in_flight: AtomicBool,
    failure_count: AtomicU32,
    listeners: Mutex<Vec<(u64, SharedListener)>>,
    next_listener_id: AtomicU64,
    trace: SyncTrace,
}

/// Clears the in-flight flag even when a cycle errors or panics, so one bad
/// cycle cannot wedge every later attempt.
struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl<T, P, C> SyncManager<T, P, C>
where
    T: SyncTransport,
    P: AccessTokenProvider,
    C: ConnectivityProbe,
{
    pub fn new(service: CatalogService, transport: T, tokens: P, probe: C) -> Self {
        Self {
            service,
            transport,
            tokens,
            probe,
            status: Mutex::new(SyncStatus::Idle),
            in_flight: AtomicBool::new(false),
            failure_count: AtomicU32::new(0),
            listeners: Mutex::new(Vec::new()),
            next_listener_id: AtomicU64::new(1),
            trace: SyncTrace::new(),
        }
    }

    /// Current engine status.
    #[must_use]
    pub fn status(&self) -> SyncStatus {
        self.status
            .lock()
            .map_or(SyncStatus::Idle, |status| *status)
    }

    /// True while a cycle is running.
    #[must_use]
    pub fn is_syncing(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Delay the next scheduled retry would wait. Zero when the last cycle
    /// succeeded or nothing has run yet.
    #[must_use]
    pub fn backoff_delay(&self) -> Duration {
        let failures = self.failure_count.load(Ordering::SeqCst);
        if failures == 0 {
            Duration::ZERO
        } else {
            let step = usize::try_from(failures - 1).unwrap_or(usize::MAX);
            BACKOFF_LADDER[step.min(BACKOFF_LADDER.len() - 1)]
        }
    }

    /// Snapshot of the diagnostic ring buffer, oldest first.
    #[must_use]
    pub fn trace(&self) -> Vec<TraceEntry> {
        self.trace.snapshot()
    }

    /// Register a listener. It immediately receives the current status, then
    /// every later event, synchronously in subscription order.
    pub fn subscribe(&self, listener: Listener) -> ListenerId {
        let current = self.status();
        listener(&SyncEvent::Status(current));

        let id = self.next_listener_id.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut listeners) = self.listeners.lock() {
            listeners.push((id, Arc::from(listener)));
        }
        ListenerId(id)
    }

    /// Remove a listener; unknown ids are ignored.
    pub fn unsubscribe(&self, id: ListenerId) {
        if let Ok(mut listeners) = self.listeners.lock() {
            listeners.retain(|(listener_id, _)| *listener_id != id.0);
        }
    }

    fn emit(&self, event: &SyncEvent) {
        // Fan out over a snapshot so a listener may subscribe or
        // unsubscribe from inside its callback.
        let snapshot: Vec<SharedListener> = match self.listeners.lock() {
            Ok(listeners) => listeners
                .iter()
                .map(|(_, listener)| Arc::clone(listener))
                .collect(),
            Err(_) => return,
        };
        for listener in snapshot {
            listener(event);
        }
    }

    fn set_status(&self, status: SyncStatus) {
        if let Ok(mut current) = self.status.lock() {
            *current = status;
        }
        self.emit(&SyncEvent::Status(status));
    }

    /// Run one full push-then-pull cycle.
    ///
    /// Re-entrant: a call while another cycle runs returns
    /// [`SyncOutcome::AlreadyRunning`] without queuing.
    pub async fn sync(&self) -> SyncOutcome {
        self.sync_with(SyncMode::Manual).await
    }

    async fn sync_with(&self, mode: SyncMode) -> SyncOutcome {
        if !self.probe.is_online().await {
            self.trace.record("cycle skipped: offline");
            self.set_status(SyncStatus::Offline);
            return SyncOutcome::Offline;
        }

        if self.in_flight.swap(true, Ordering::SeqCst) {
            return SyncOutcome::AlreadyRunning;
        }
        let _guard = InFlightGuard(&self.in_flight);

        let cycle_id = Uuid::now_v7().to_string();
        self.set_status(SyncStatus::Syncing);
        self.trace.record(format!("cycle start: {cycle_id}"));

        match self.run_cycle(&cycle_id, mode).await {
            Ok((pushed, pulled)) => {
                self.failure_count.store(0, Ordering::SeqCst);
                self.trace
                    .record(format!("cycle ok: pushed={pushed} pulled={pulled}"));
                self.emit(&SyncEvent::Progress { pushed, pulled });
                self.set_status(SyncStatus::Success);
                SyncOutcome::Completed { pushed, pulled }
            }
            Err(error) if error.is_authentication() => {
                let message = format!("Session expired: {error}");
                tracing::warn!("Sync authentication failure: {error}");
                self.trace.record(format!("cycle failed (auth): {error}"));
                self.persist_failure(&message, &cycle_id, mode).await;
                self.emit(&SyncEvent::Error(message.clone()));
                self.set_status(SyncStatus::Error);
                SyncOutcome::Failed {
                    message,
                    authentication: true,
                }
            }
            Err(error) => {
                let failures = self.failure_count.fetch_add(1, Ordering::SeqCst) + 1;
                let message = error.to_string();
                tracing::warn!("Sync cycle failed ({failures} in a row): {message}");
                self.trace.record(format!(
                    "cycle failed: {message}; next retry in {:?}",
                    self.backoff_delay()
                ));
                self.persist_failure(&message, &cycle_id, mode).await;
                self.emit(&SyncEvent::Error(message.clone()));
                self.set_status(SyncStatus::Error);
                SyncOutcome::Failed {
                    message,
                    authentication: false,
                }
            }
        }
    }

    /// Reset backoff and run a cycle immediately.
    pub async fn force_sync(&self) -> SyncOutcome {
        self.failure_count.store(0, Ordering::SeqCst);
        self.sync_with(SyncMode::Forced).await
    }

    async fn persist_failure(&self, message: &str, cycle_id: &str, mode: SyncMode) {
        let result = async {
            let mut state = self.service.load_sync_state().await?;
            state.record_failure(message);
            state.record_cycle(cycle_id, self.service.device_id(), mode.as_str());
            self.service.save_sync_state(&state).await
        }
        .await;
        if let Err(error) = result {
            tracing::error!("Failed to persist sync error state: {error}");
        }
    }

    async fn run_cycle(&self, cycle_id: &str, mode: SyncMode) -> Result<(u64, u64)> {
        let token = self.tokens.access_token().await?;
        let pushed = self.push_outbox(&token).await?;
        let pulled = self.pull_changes(&token).await?;

        let mut state = self.service.load_sync_state().await?;
        state.record_success(pushed, pulled);
        state.record_cycle(cycle_id, self.service.device_id(), mode.as_str());
        self.service.save_sync_state(&state).await?;
        Ok((pushed, pulled))
    }

    /// Drain the outbox in bounded batches. Returns how many mutations the
    /// server applied.
    async fn push_outbox(&self, token: &str) -> Result<u64> {
        let mut applied = 0u64;

        loop {
            let batch = self.service.take_push_batch(PUSH_BATCH_SIZE).await?;
            if batch.is_empty() {
                break;
            }
            self.trace
                .record(format!("push batch: {} mutation(s)", batch.len()));

            let request = PushRequest {
                mutations: batch.iter().map(MutationEnvelope::from).collect(),
            };
            let response = self.transport.push(token, &request).await?;

            for result in response.results {
                let Some(item) = batch.iter().find(|item| item.id == result.mutation_id) else {
                    tracing::warn!(
                        "Push result for unknown mutation {}; skipping",
                        result.mutation_id
                    );
                    continue;
                };

                match result.status {
                    MutationStatus::Applied => {
                        let new_rev = result.new_rev.ok_or_else(|| {
                            Error::Protocol(format!(
                                "APPLIED result for {} carries no new_rev",
                                result.mutation_id
                            ))
                        })?;
                        if self.service.acknowledge_applied(item, new_rev).await? {
                            applied += 1;
                        }
                    }
                    MutationStatus::Conflict => {
                        let conflict = self.service.record_push_conflict(item).await?;
                        self.trace.record(format!(
                            "push conflict: {} {}",
                            item.entity_type, item.entity_id
                        ));
                        self.emit(&SyncEvent::Conflict(conflict));
                    }
                    MutationStatus::Rejected => {
                        let message = result
                            .error
                            .unwrap_or_else(|| "rejected by server".to_string());
                        tracing::warn!(
                            "Mutation {} rejected: {message}",
                            result.mutation_id
                        );
                        self.service.record_push_rejection(item, &message).await?;
                        self.trace.record(format!(
                            "push rejected: {} {}: {message}",
                            item.entity_type, item.entity_id
                        ));
                    }
                }
            }
        }

        let mut state = self.service.load_sync_state().await?;
        state.last_push_at = Some(Utc::now());
        self.service.save_sync_state(&state).await?;
        Ok(applied)
    }

    /// Page through remote changes from the persisted cursor. The cursor is
    /// saved after every page, so an interrupted pull resumes where it
    /// stopped instead of replaying from the origin.
    async fn pull_changes(&self, token: &str) -> Result<u64> {
        let mut applied = 0u64;

        loop {
            let state = self.service.load_sync_state().await?;
            let request = PullRequest {
                since_cursor: state.last_cursor,
                limit: PULL_PAGE_SIZE,
                include_entities: true,
            };
            let response = self.transport.pull(token, &request).await?;
            self.trace
                .record(format!("pull page: {} change(s)", response.changes.len()));

            for change in &response.changes {
                let outcome = match change.op {
                    ChangeOp::Upsert => {
                        let payload = response.entities.get(&change.entity_id).ok_or_else(|| {
                            Error::Protocol(format!(
                                "pull change for {} carries no entity payload",
                                change.entity_id
                            ))
                        })?;
                        self.service
                            .apply_remote_upsert(
                                change.entity_type,
                                change.entity_id,
                                change.rev,
                                payload,
                            )
                            .await?
                    }
                    ChangeOp::Delete => {
                        self.service
                            .apply_remote_delete(change.entity_type, change.entity_id, change.rev)
                            .await?
                    }
                };

                match outcome {
                    RemoteApply::Applied => applied += 1,
                    RemoteApply::Unchanged => {}
                    RemoteApply::Conflicted(conflict) => {
                        self.trace.record(format!(
                            "pull conflict: {} {}",
                            change.entity_type, change.entity_id
                        ));
                        self.emit(&SyncEvent::Conflict(conflict));
                    }
                }
            }

            let mut state = self.service.load_sync_state().await?;
            if let Some(cursor) = response.next_cursor {
                state.last_cursor = Some(cursor);
            }
            state.last_pull_at = Some(Utc::now());
            if let Some(server_time) = response.server_time {
                state.last_server_time = Some(server_time);
            }
            self.service.save_sync_state(&state).await?;

            if !response.has_more {
                break;
            }
        }

        Ok(applied)
    }
}

impl<T, P, C> SyncManager<T, P, C>
where
    T: SyncTransport + Send + Sync + 'static,
    P: AccessTokenProvider + Send + Sync + 'static,
    C: ConnectivityProbe + Send + Sync + 'static,
{
    /// Spawn a cycle after `delay` (default: the current backoff delay).
    /// A timer that fires while another cycle runs simply loses to the
    /// in-flight flag.
    pub fn schedule_sync(
        self: &Arc<Self>,
        delay: Option<Duration>,
    ) -> tokio::task::JoinHandle<SyncOutcome> {
        let delay = delay.unwrap_or_else(|| self.backoff_delay());
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            manager.sync_with(SyncMode::Scheduled).await
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;

    use pretty_assertions::assert_eq;
    use tokio::sync::Semaphore;
    use uuid::Uuid;

    use super::*;
    use crate::auth::StaticTokenProvider;
    use crate::models::{EntityType, OutboxStatus, Song};
    use crate::sync::protocol::{MutationResult, PullResponse, PushResponse, RemoteChange};
    use crate::sync::AlwaysOnline;

    #[derive(Default)]
    struct MockInner {
        push_script: StdMutex<VecDeque<Result<PushResponse>>>,
        pull_script: StdMutex<VecDeque<Result<PullResponse>>>,
        push_requests: StdMutex<Vec<PushRequest>>,
        pull_requests: StdMutex<Vec<PullRequest>>,
        pull_gate: StdMutex<Option<Arc<Semaphore>>>,
    }

    /// Scripted transport: pops canned responses, falling back to
    /// "apply everything" / "no remote changes".
    #[derive(Clone, Default)]
    struct MockTransport {
        inner: Arc<MockInner>,
    }

    impl MockTransport {
        fn script_push(&self, response: Result<PushResponse>) {
            self.inner.push_script.lock().unwrap().push_back(response);
        }

        fn script_pull(&self, response: Result<PullResponse>) {
            self.inner.pull_script.lock().unwrap().push_back(response);
        }

        fn gate_pulls(&self) -> Arc<Semaphore> {
            let gate = Arc::new(Semaphore::new(0));
            *self.inner.pull_gate.lock().unwrap() = Some(Arc::clone(&gate));
            gate
        }

        fn pull_requests(&self) -> Vec<PullRequest> {
            self.inner.pull_requests.lock().unwrap().clone()
        }
    }

    impl SyncTransport for MockTransport {
        async fn push(&self, _token: &str, request: &PushRequest) -> Result<PushResponse> {
            self.inner
                .push_requests
                .lock()
                .unwrap()
                .push(request.clone());
            if let Some(scripted) = self.inner.push_script.lock().unwrap().pop_front() {
                return scripted;
            }
            Ok(PushResponse {
                results: request
                    .mutations
                    .iter()
                    .map(|mutation| MutationResult {
                        mutation_id: mutation.mutation_id,
                        status: MutationStatus::Applied,
                        entity_id: mutation.entity_id,
                        new_rev: Some(mutation.base_rev.unwrap_or(0) + 1),
                        error: None,
                    })
                    .collect(),
            })
        }

        async fn pull(&self, _token: &str, request: &PullRequest) -> Result<PullResponse> {
            let gate = self.inner.pull_gate.lock().unwrap().clone();
            if let Some(gate) = gate {
                let _permit = gate.acquire().await;
            }
            self.inner
                .pull_requests
                .lock()
                .unwrap()
                .push(request.clone());
            if let Some(scripted) = self.inner.pull_script.lock().unwrap().pop_front() {
                return scripted;
            }
            Ok(empty_page())
        }
    }

    struct ScriptedProbe {
        online: Arc<AtomicBool>,
    }

    impl ConnectivityProbe for ScriptedProbe {
        async fn is_online(&self) -> bool {
            self.online.load(Ordering::SeqCst)
        }
    }

    fn empty_page() -> PullResponse {
        PullResponse {
            changes: Vec::new(),
            entities: std::collections::HashMap::new(),
            next_cursor: None,
            has_more: false,
            server_time: None,
        }
    }

    fn page(
        changes: Vec<RemoteChange>,
        entities: Vec<(Uuid, serde_json::Value)>,
        next_cursor: &str,
        has_more: bool,
    ) -> PullResponse {
        PullResponse {
            changes,
            entities: entities.into_iter().collect(),
            next_cursor: Some(next_cursor.to_string()),
            has_more,
            server_time: None,
        }
    }

    async fn setup() -> (
        SyncManager<MockTransport, StaticTokenProvider, AlwaysOnline>,
        CatalogService,
        MockTransport,
    ) {
        let service = CatalogService::open_in_memory("device-test").await.unwrap();
        let transport = MockTransport::default();
        let manager = SyncManager::new(
            service.clone(),
            transport.clone(),
            StaticTokenProvider::new(Some("token".to_string())),
            AlwaysOnline,
        );
        (manager, service, transport)
    }

    #[tokio::test]
    async fn offline_create_then_sync_lands_clean() {
        let (manager, service, _transport) = setup().await;

        let song = service.create_song(Song::new("Doxology")).await.unwrap();
        let outcome = manager.sync().await;
        assert_eq!(
            outcome,
            SyncOutcome::Completed {
                pushed: 1,
                pulled: 0
            }
        );
        assert_eq!(manager.status(), SyncStatus::Success);

        let synced = service.get_song(&song.id).await.unwrap().unwrap();
        assert_eq!(synced.remote_rev, Some(1));
        assert!(!synced.dirty);

        let counts = service.outbox_counts().await.unwrap();
        assert!(counts.values().all(|&count| count == 0));

        let state = service.load_sync_state().await.unwrap();
        assert!(state.last_sync_at.is_some());
        assert_eq!(state.last_apply_summary.as_deref(), Some("pushed=1 pulled=0"));
        assert_eq!(state.last_error, None);
        assert!(state.last_sync_id.is_some());
        assert_eq!(state.last_sync_source.as_deref(), Some("device-test"));
        assert_eq!(state.last_sync_mode.as_deref(), Some("manual"));
    }

    #[tokio::test]
    async fn push_conflict_marks_item_and_emits() {
        let (manager, service, transport) = setup().await;

        let mut song = Song::new("Amazing Grace");
        song.remote_rev = Some(3);
        let song = service.create_song(song).await.unwrap();

        // Peek at the queued item to learn its mutation id, then requeue it
        // so the cycle sends it for real.
        let item = {
            let batch = service.take_push_batch(10).await.unwrap();
            tokio::time::sleep(Duration::from_millis(5)).await;
            service
                .requeue_stale_sent(chrono::Duration::zero())
                .await
                .unwrap();
            batch.into_iter().next().unwrap()
        };
        transport.script_push(Ok(PushResponse {
            results: vec![MutationResult {
                mutation_id: item.id,
                status: MutationStatus::Conflict,
                entity_id: item.entity_id,
                new_rev: None,
                error: None,
            }],
        }));

        let events: Arc<StdMutex<Vec<SyncEvent>>> = Arc::default();
        let sink = Arc::clone(&events);
        manager.subscribe(Box::new(move |event| {
            sink.lock().unwrap().push(event.clone());
        }));

        let outcome = manager.sync().await;
        assert_eq!(
            outcome,
            SyncOutcome::Completed {
                pushed: 0,
                pulled: 0
            }
        );

        let counts = service.outbox_counts().await.unwrap();
        assert_eq!(counts[OutboxStatus::Conflict.as_str()], 1);

        let conflicts = service.list_conflicts().await.unwrap();
        assert_eq!(conflicts.len(), 1);
        assert!(conflicts[0].remote_snapshot.is_none());

        let saw_conflict_event = events
            .lock()
            .unwrap()
            .iter()
            .any(|event| matches!(event, SyncEvent::Conflict(_)));
        assert!(saw_conflict_event);

        // Local edit survives untouched
        let local = service.get_song(&song.id).await.unwrap().unwrap();
        assert!(local.dirty);
        assert_eq!(local.remote_rev, Some(3));
    }

    #[tokio::test]
    async fn pull_delete_removes_clean_entity_and_replay_is_noop() {
        let (manager, service, transport) = setup().await;

        let remote_song = Song {
            dirty: false,
            ..Song::new("Retired chart")
        };
        service
            .apply_remote_upsert(
                EntityType::Song,
                remote_song.id.as_uuid(),
                1,
                &serde_json::to_value(&remote_song).unwrap(),
            )
            .await
            .unwrap();

        let delete_page = page(
            vec![RemoteChange {
                entity_type: EntityType::Song,
                entity_id: remote_song.id.as_uuid(),
                op: ChangeOp::Delete,
                rev: 2,
            }],
            Vec::new(),
            "c-2",
            false,
        );
        transport.script_pull(Ok(delete_page.clone()));

        let outcome = manager.sync().await;
        assert_eq!(
            outcome,
            SyncOutcome::Completed {
                pushed: 0,
                pulled: 1
            }
        );
        assert!(service.get_song(&remote_song.id).await.unwrap().is_none());

        // Replaying the same page applies nothing
        transport.script_pull(Ok(delete_page));
        let outcome = manager.sync().await;
        assert_eq!(
            outcome,
            SyncOutcome::Completed {
                pushed: 0,
                pulled: 0
            }
        );
    }

    #[tokio::test]
    async fn pull_pages_advance_the_cursor_and_resume_after_failure() {
        let (manager, service, transport) = setup().await;

        transport.script_pull(Ok(page(Vec::new(), Vec::new(), "c-1", true)));
        transport.script_pull(Ok(page(Vec::new(), Vec::new(), "c-2", false)));
        let outcome = manager.sync().await;
        assert!(matches!(outcome, SyncOutcome::Completed { .. }));

        let requests = transport.pull_requests();
        assert_eq!(requests[0].since_cursor, None);
        assert_eq!(requests[1].since_cursor.as_deref(), Some("c-1"));

        let state = service.load_sync_state().await.unwrap();
        assert_eq!(state.last_cursor.as_deref(), Some("c-2"));

        // A failing page leaves the cursor where the last good page put it
        transport.script_pull(Ok(page(Vec::new(), Vec::new(), "c-3", true)));
        transport.script_pull(Err(Error::Protocol("replica lag".to_string())));
        let outcome = manager.sync().await;
        assert!(matches!(
            outcome,
            SyncOutcome::Failed {
                authentication: false,
                ..
            }
        ));

        let outcome = manager.sync().await;
        assert!(matches!(outcome, SyncOutcome::Completed { .. }));
        let requests = transport.pull_requests();
        assert_eq!(
            requests.last().unwrap().since_cursor.as_deref(),
            Some("c-3")
        );
    }

    #[tokio::test]
    async fn transport_failures_walk_the_backoff_ladder() {
        let (manager, service, transport) = setup().await;

        let expected = [5u64, 15, 30, 60, 120, 120];
        for &seconds in &expected {
            transport.script_pull(Err(Error::Protocol("boom".to_string())));
            let outcome = manager.sync().await;
            assert!(matches!(outcome, SyncOutcome::Failed { .. }));
            assert_eq!(manager.backoff_delay(), Duration::from_secs(seconds));
        }

        let state = service.load_sync_state().await.unwrap();
        assert!(state.last_error.as_deref().unwrap().contains("boom"));

        // Success resets the ladder
        let outcome = manager.sync().await;
        assert!(matches!(outcome, SyncOutcome::Completed { .. }));
        assert_eq!(manager.backoff_delay(), Duration::ZERO);
        assert_eq!(
            service.load_sync_state().await.unwrap().last_error,
            None
        );
    }

    #[tokio::test]
    async fn auth_failure_consumes_no_backoff_step() {
        let service = CatalogService::open_in_memory("device-test").await.unwrap();
        let manager = SyncManager::new(
            service.clone(),
            MockTransport::default(),
            StaticTokenProvider::new(None),
            AlwaysOnline,
        );

        let outcome = manager.sync().await;
        let SyncOutcome::Failed {
            message,
            authentication,
        } = outcome
        else {
            panic!("expected failure");
        };
        assert!(authentication);
        assert!(message.starts_with("Session expired"));
        assert_eq!(manager.backoff_delay(), Duration::ZERO);
        assert_eq!(manager.status(), SyncStatus::Error);
    }

    #[tokio::test]
    async fn offline_probe_short_circuits() {
        let service = CatalogService::open_in_memory("device-test").await.unwrap();
        service.create_song(Song::new("Queued")).await.unwrap();

        let online = Arc::new(AtomicBool::new(false));
        let transport = MockTransport::default();
        let manager = SyncManager::new(
            service.clone(),
            transport.clone(),
            StaticTokenProvider::new(Some("token".to_string())),
            ScriptedProbe {
                online: Arc::clone(&online),
            },
        );

        assert_eq!(manager.sync().await, SyncOutcome::Offline);
        assert_eq!(manager.status(), SyncStatus::Offline);
        assert_eq!(manager.backoff_delay(), Duration::ZERO);
        // Nothing was sent and nothing left PENDING
        assert!(transport.inner.push_requests.lock().unwrap().is_empty());
        let counts = service.outbox_counts().await.unwrap();
        assert_eq!(counts[OutboxStatus::Pending.as_str()], 1);

        online.store(true, Ordering::SeqCst);
        assert!(matches!(
            manager.sync().await,
            SyncOutcome::Completed { pushed: 1, .. }
        ));
    }

    #[tokio::test]
    async fn concurrent_sync_is_single_flight() {
        let (manager, _service, transport) = setup().await;
        let gate = transport.gate_pulls();
        let manager = Arc::new(manager);

        let running = Arc::clone(&manager);
        let handle = tokio::spawn(async move { running.sync().await });

        // Wait for the first cycle to reach the gated pull
        while !manager.is_syncing() {
            tokio::task::yield_now().await;
        }
        assert_eq!(manager.sync().await, SyncOutcome::AlreadyRunning);

        gate.add_permits(1);
        let outcome = handle.await.unwrap();
        assert!(matches!(outcome, SyncOutcome::Completed { .. }));
        assert!(!manager.is_syncing());
    }

    #[tokio::test]
    async fn listeners_get_immediate_status_and_can_unsubscribe() {
        let (manager, _service, _transport) = setup().await;

        let events: Arc<StdMutex<Vec<SyncEvent>>> = Arc::default();
        let sink = Arc::clone(&events);
        let id = manager.subscribe(Box::new(move |event| {
            sink.lock().unwrap().push(event.clone());
        }));

        assert!(matches!(
            events.lock().unwrap()[0],
            SyncEvent::Status(SyncStatus::Idle)
        ));

        manager.sync().await;
        let seen = events.lock().unwrap().len();
        assert!(seen > 1);

        manager.unsubscribe(id);
        manager.sync().await;
        assert_eq!(events.lock().unwrap().len(), seen);
    }

    #[tokio::test]
    async fn listener_may_subscribe_during_fan_out() {
        let (manager, _service, _transport) = setup().await;
        let manager = Arc::new(manager);

        let inner_events: Arc<StdMutex<Vec<SyncEvent>>> = Arc::default();
        let added = Arc::new(AtomicBool::new(false));

        let outer_manager = Arc::clone(&manager);
        let outer_added = Arc::clone(&added);
        let sink = Arc::clone(&inner_events);
        manager.subscribe(Box::new(move |event| {
            // Subscribe a second listener from inside the fan-out
            if matches!(event, SyncEvent::Status(SyncStatus::Syncing))
                && !outer_added.swap(true, Ordering::SeqCst)
            {
                let sink = Arc::clone(&sink);
                outer_manager.subscribe(Box::new(move |event| {
                    sink.lock().unwrap().push(event.clone());
                }));
            }
        }));

        manager.sync().await;

        let inner = inner_events.lock().unwrap();
        assert!(!inner.is_empty());
        assert!(inner
            .iter()
            .any(|event| matches!(event, SyncEvent::Status(SyncStatus::Success))));
    }

    #[tokio::test]
    async fn scheduled_sync_runs_after_delay_and_loses_to_in_flight() {
        let (manager, service, transport) = setup().await;
        service.create_song(Song::new("Later")).await.unwrap();
        let manager = Arc::new(manager);

        let outcome = manager
            .schedule_sync(Some(Duration::from_millis(1)))
            .await
            .unwrap();
        assert!(matches!(outcome, SyncOutcome::Completed { pushed: 1, .. }));
        let state = service.load_sync_state().await.unwrap();
        assert_eq!(state.last_sync_mode.as_deref(), Some("scheduled"));

        // A timer that fires mid-cycle loses to the in-flight flag
        let gate = transport.gate_pulls();
        let running = Arc::clone(&manager);
        let in_flight = tokio::spawn(async move { running.sync().await });
        while !manager.is_syncing() {
            tokio::task::yield_now().await;
        }
        let outcome = manager.schedule_sync(Some(Duration::ZERO)).await.unwrap();
        assert_eq!(outcome, SyncOutcome::AlreadyRunning);

        gate.add_permits(1);
        assert!(matches!(
            in_flight.await.unwrap(),
            SyncOutcome::Completed { .. }
        ));
    }

    #[tokio::test]
    async fn trace_captures_cycle_shape() {
        let (manager, service, _transport) = setup().await;
        service.create_song(Song::new("Traced")).await.unwrap();

        manager.force_sync().await;

        let messages: Vec<String> = manager
            .trace()
            .into_iter()
            .map(|entry| entry.message)
            .collect();
        assert!(messages
            .iter()
            .any(|message| message.starts_with("cycle start")));
        assert!(messages.iter().any(|message| message.contains("push batch")));
        assert!(messages
            .iter()
            .any(|message| message.contains("pushed=1 pulled=0")));

        let state = service.load_sync_state().await.unwrap();
        assert_eq!(state.last_sync_mode.as_deref(), Some("forced"));
    }
}
