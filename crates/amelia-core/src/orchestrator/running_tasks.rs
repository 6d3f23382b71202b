//! The in-memory map of supervised tasks (spec §4.4 invariant 3, "single
//! runner"). One entry per workflow with an active planning or execution
//! task — the single piece of process-global mutable state this crate
//! carries, the same role the teacher's `run_orchestrator` gives its
//! `Semaphore`/`mpsc` pair, generalized here to a keyed map since Amelia's
//! unit of concurrency is a whole workflow run, not a single task.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Which supervised phase a running task is in. Distinguishes "a workflow
/// has a planning task in flight" (blocks `replan`) from "a workflow has an
/// execution task in flight" (blocks `approve`/a second `replan`) even
/// though both occupy the same map slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    Planning,
    Execution,
}

/// `handle` starts empty: the slot is reserved (to enforce "single runner")
/// before the task is actually spawned, then filled in once `tokio::spawn`
/// returns. `cancel()` awaits whatever handle is present when it looks;
/// a reservation with no handle yet is vanishingly short-lived in practice,
/// and the caller never gets a handle-less slot because construction and
/// the fill-in happen on the same async call stack, with the command method
/// `await`ing nothing infrastructure-heavy in between.
pub struct RunningTask {
    pub kind: TaskKind,
    pub cancel: CancellationToken,
    pub handle: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl RunningTask {
    pub fn reserve(kind: TaskKind) -> Self {
        Self {
            kind,
            cancel: CancellationToken::new(),
            handle: Arc::new(Mutex::new(None)),
        }
    }
}

/// Keyed by `workflow_id`. Holding an entry is itself the "single runner"
/// lock: a command that would start a second supervised task for a workflow
/// already present here is rejected with `RunnerConflict` before it ever
/// touches the database.
#[derive(Default)]
pub struct RunningTasks(DashMap<Uuid, RunningTask>);

impl RunningTasks {
    pub fn new() -> Self {
        Self(DashMap::new())
    }

    pub fn is_running(&self, workflow_id: Uuid) -> bool {
        self.0.contains_key(&workflow_id)
    }

    pub fn kind_of(&self, workflow_id: Uuid) -> Option<TaskKind> {
        self.0.get(&workflow_id).map(|entry| entry.kind)
    }

    /// Register a task iff none is already running for this workflow.
    /// Returns `false` without inserting if one already occupies the slot.
    pub fn try_insert(&self, workflow_id: Uuid, task: RunningTask) -> bool {
        use dashmap::mapref::entry::Entry;
        match self.0.entry(workflow_id) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(task);
                true
            }
        }
    }

    /// The cancellation token and handle slot for an already-reserved task,
    /// so the spawning call site can fill in the handle after `tokio::spawn`
    /// returns without re-acquiring the whole `RunningTask`.
    pub fn cancel_token(&self, workflow_id: Uuid) -> Option<CancellationToken> {
        self.0.get(&workflow_id).map(|entry| entry.cancel.clone())
    }

    pub fn handle_slot(&self, workflow_id: Uuid) -> Option<Arc<Mutex<Option<JoinHandle<()>>>>> {
        self.0.get(&workflow_id).map(|entry| entry.handle.clone())
    }

    pub fn remove(&self, workflow_id: Uuid) -> Option<RunningTask> {
        self.0.remove(&workflow_id).map(|(_, task)| task)
    }
}
