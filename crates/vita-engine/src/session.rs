//! Live conversations.
//!
//! A [`Session`] owns one [`SessionContext`], its committed history and the
//! active agent. It admits one turn at a time: the state lives behind an async
//! mutex that the turn holds until its history is committed, and a second
//! caller gets [`EngineError::SessionBusy`] instead of queueing.
//!
//! [`SessionManager`] keeps the live sessions of a process and feeds closed
//! session summaries into [`OperatorMetrics`].

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use vita_core::hooks::RunHooks;
use vita_core::ids::SessionId;
use vita_core::messages::Message;
use vita_core::session::SessionContext;
use vita_settings::StartingAgent;
use vita_telemetry::{OperatorMetrics, SessionSummary, SessionTelemetry};

use crate::emitter::{emit_outcome_notice, fragment_channel, FragmentSink, TurnStream};
use crate::error::EngineError;
use crate::hooks::HookDispatcher;
use crate::runner::{Orchestrator, TurnOutcome, TurnRequest};

#[derive(Clone, Debug)]
struct SessionState {
    context: SessionContext,
    history: Vec<Message>,
    active_agent: String,
}

struct SessionInner {
    id: SessionId,
    orchestrator: Arc<Orchestrator>,
    state: Arc<AsyncMutex<SessionState>>,
    /// Copy of the state as of the last settled turn, readable mid-turn.
    snapshot: RwLock<SessionState>,
    telemetry: Arc<SessionTelemetry>,
    hooks: HookDispatcher,
    /// Parent of every turn token; cancelled on close.
    root: CancellationToken,
    current: Mutex<Option<CancellationToken>>,
}

/// Handle to one conversation. Cheap to clone.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    /// Start a conversation with the entry agent active.
    ///
    /// `observers` receive every lifecycle callback alongside the session's
    /// own telemetry recorder.
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        context: SessionContext,
        observers: Vec<Arc<dyn RunHooks>>,
    ) -> Self {
        let id = SessionId::new();
        let telemetry = Arc::new(SessionTelemetry::new(id.as_str()));
        let recorder: Arc<dyn RunHooks> = telemetry.clone();
        let mut all = vec![recorder];
        all.extend(observers);
        let hooks = HookDispatcher::new(all, orchestrator.config().hook_failure_threshold);

        let state = SessionState {
            context,
            history: Vec::new(),
            active_agent: orchestrator.agents().entry().name.clone(),
        };

        Self {
            inner: Arc::new(SessionInner {
                id,
                orchestrator,
                snapshot: RwLock::new(state.clone()),
                state: Arc::new(AsyncMutex::new(state)),
                telemetry,
                hooks,
                root: CancellationToken::new(),
                current: Mutex::new(None),
            }),
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.inner.id
    }

    /// Run one turn to completion.
    pub async fn chat(&self, prompt: &str) -> Result<TurnOutcome, EngineError> {
        let guard = self.acquire()?;
        let cancel = self.begin_turn();
        execute(&self.inner, guard, prompt, None, &cancel).await
    }

    /// Run one turn in the background, yielding text fragments as they are
    /// produced.
    ///
    /// Busy sessions are rejected before anything is spawned. Must be called
    /// inside a tokio runtime.
    pub fn stream_chat(&self, prompt: impl Into<String>) -> Result<TurnStream, EngineError> {
        let guard = self.acquire()?;
        let cancel = self.begin_turn();
        let (sink, rx) = fragment_channel(self.inner.orchestrator.config().stream_buffer, cancel.clone());
        let inner = Arc::clone(&self.inner);
        let prompt = prompt.into();
        let token = cancel.clone();

        let task = tokio::spawn(async move {
            let result = execute(&inner, guard, &prompt, Some(&sink), &token).await;
            emit_outcome_notice(&sink, &result).await;
            result
        });
        Ok(TurnStream::new(rx, task, cancel))
    }

    /// Cancel the turn in flight, if any. Returns whether one was running.
    pub fn abort(&self) -> bool {
        match self.inner.current.lock().as_ref() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_busy(&self) -> bool {
        self.inner.state.try_lock().is_err()
    }

    pub fn summary(&self) -> SessionSummary {
        self.inner.telemetry.summarize()
    }

    /// Cancel any running turn and freeze the telemetry clock.
    pub fn close(&self) -> SessionSummary {
        self.inner.root.cancel();
        self.inner.telemetry.close()
    }

    pub fn telemetry(&self) -> &Arc<SessionTelemetry> {
        &self.inner.telemetry
    }

    /// Context as of the last settled turn.
    pub fn context(&self) -> SessionContext {
        self.inner.snapshot.read().context.clone()
    }

    /// Committed history.
    pub fn history(&self) -> Vec<Message> {
        self.inner.snapshot.read().history.clone()
    }

    pub fn active_agent(&self) -> String {
        self.inner.snapshot.read().active_agent.clone()
    }

    fn acquire(&self) -> Result<OwnedMutexGuard<SessionState>, EngineError> {
        if self.inner.root.is_cancelled() {
            return Err(EngineError::Aborted);
        }
        Arc::clone(&self.inner.state)
            .try_lock_owned()
            .map_err(|_| EngineError::SessionBusy)
    }

    fn begin_turn(&self) -> CancellationToken {
        let token = self.inner.root.child_token();
        *self.inner.current.lock() = Some(token.clone());
        token
    }
}

/// Run a turn against the locked state and commit it. The guard is released
/// only after the snapshot is published and the turn token cleared.
async fn execute(
    inner: &SessionInner,
    mut guard: OwnedMutexGuard<SessionState>,
    prompt: &str,
    sink: Option<&FragmentSink>,
    cancel: &CancellationToken,
) -> Result<TurnOutcome, EngineError> {
    let state = &mut *guard;
    let starting_agent = match inner.orchestrator.config().starting_agent {
        StartingAgent::Entry => inner.orchestrator.agents().entry().name.clone(),
        StartingAgent::LastActive => state.active_agent.clone(),
    };

    let result = inner
        .orchestrator
        .run_turn(TurnRequest {
            session_id: &inner.id,
            context: &mut state.context,
            history: &state.history,
            starting_agent: &starting_agent,
            prompt,
            hooks: &inner.hooks,
            sink,
            cancel,
        })
        .await;

    let outcome = match result {
        Ok(turn) => {
            if let TurnOutcome::Completed(_) = &turn.outcome {
                state.history = turn.history;
                state.active_agent = turn.active_agent;
            }
            Ok(turn.outcome)
        }
        Err(e) => Err(e),
    };

    // tool effects on the context stand even when the turn did not complete
    *inner.snapshot.write() = state.clone();
    inner.current.lock().take();
    debug!(session_id = %inner.id, history = state.history.len(), "turn settled");
    outcome
}

/// Registry of live sessions sharing one orchestrator.
pub struct SessionManager {
    orchestrator: Arc<Orchestrator>,
    sessions: DashMap<SessionId, Session>,
    metrics: Arc<OperatorMetrics>,
    observers: Vec<Arc<dyn RunHooks>>,
}

impl SessionManager {
    pub fn new(orchestrator: Arc<Orchestrator>, metrics: Arc<OperatorMetrics>) -> Self {
        Self {
            orchestrator,
            sessions: DashMap::new(),
            metrics,
            observers: Vec::new(),
        }
    }

    /// Attach an observer to every session created from now on.
    pub fn with_observer(mut self, observer: Arc<dyn RunHooks>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn create(&self, name: &str, uid: &str) -> Session {
        let session = Session::new(
            Arc::clone(&self.orchestrator),
            SessionContext::new(name, uid),
            self.observers.clone(),
        );
        info!(session_id = %session.id(), uid, "session created");
        self.sessions.insert(session.id().clone(), session.clone());
        session
    }

    pub fn get(&self, id: &SessionId) -> Option<Session> {
        self.sessions.get(id).map(|s| s.value().clone())
    }

    /// Remove and close a session, folding its summary into the operator metrics.
    pub fn close(&self, id: &SessionId) -> Result<SessionSummary, EngineError> {
        let (_, session) = self
            .sessions
            .remove(id)
            .ok_or_else(|| EngineError::SessionNotFound(id.to_string()))?;
        let summary = session.close();
        self.metrics.record_session(&summary);
        info!(
            session_id = %id,
            events = summary.total_events,
            tokens = summary.total_tokens(),
            errors = summary.error_count,
            "session closed"
        );
        Ok(summary)
    }

    pub fn list(&self) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = self.sessions.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn metrics(&self) -> &Arc<OperatorMetrics> {
        &self.metrics
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }
}
