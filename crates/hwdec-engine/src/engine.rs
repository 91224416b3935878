//! Session table plus a fixed pipeline of stage callbacks.
//!
//! ```text
//!   process(id) ─► stage[op_id](ctx, session) ─► op_id = (op_id + 1) % stages
//!                        │
//!                        ├─ Continue   session stays
//!                        └─ Processed / Failed
//!                              remove session, finalize(ctx, session)
//! ```
//!
//! One call advances one session by exactly one stage.  The engine never
//! runs stages on its own; the caller drives it.

use std::collections::HashMap;
use std::fmt;

use tracing::{debug, trace};

/// Outcome of one stage.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecutionStatus {
    Continue,
    Processed,
    Failed,
}

impl ExecutionStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Continue)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session#{}", self.0)
    }
}

/// One pipeline stage.
pub type Stage<C, S> = Box<dyn Fn(&mut C, &mut S) -> ExecutionStatus + Send>;

/// Called with a session after it was removed from the table.
pub type Finalizer<C, S> = Box<dyn Fn(&mut C, S, ExecutionStatus) + Send>;

struct Slot<S> {
    session: S,
    op_id: usize,
}

pub struct ProcessingEngine<C, S> {
    context: C,
    sessions: HashMap<SessionId, Slot<S>>,
    pipeline: Vec<Stage<C, S>>,
    finalizer: Option<Finalizer<C, S>>,
    next_id: u64,
}

impl<C, S> ProcessingEngine<C, S> {
    pub fn new(context: C, pipeline: Vec<Stage<C, S>>) -> Self {
        Self {
            context,
            sessions: HashMap::new(),
            pipeline,
            finalizer: None,
            next_id: 1,
        }
    }

    pub fn with_finalizer(mut self, finalizer: Finalizer<C, S>) -> Self {
        self.finalizer = Some(finalizer);
        self
    }

    pub fn insert_session(&mut self, session: S) -> SessionId {
        let id = SessionId(self.next_id);
        self.next_id += 1;
        self.sessions.insert(id, Slot { session, op_id: 0 });
        debug!(session = %id, stages = self.pipeline.len(), "Session registered");
        id
    }

    /// Advance `id` by one stage.
    ///
    /// An unknown or already finished session reports `Processed`.
    pub fn process(&mut self, id: SessionId) -> ExecutionStatus {
        let Some(slot) = self.sessions.get_mut(&id) else {
            return ExecutionStatus::Processed;
        };
        let status = match self.pipeline.get(slot.op_id) {
            Some(stage) => {
                let status = stage(&mut self.context, &mut slot.session);
                trace!(session = %id, op_id = slot.op_id, ?status, "Stage executed");
                slot.op_id = (slot.op_id + 1) % self.pipeline.len();
                status
            }
            None => ExecutionStatus::Processed,
        };

        if status.is_terminal() {
            if let Some(slot) = self.sessions.remove(&id) {
                debug!(session = %id, ?status, "Session finished");
                if let Some(finalize) = &self.finalizer {
                    finalize(&mut self.context, slot.session, status);
                }
            }
        }
        status
    }

    /// Next stage index for `id`, if the session is alive.
    pub fn op_id(&self, id: SessionId) -> Option<usize> {
        self.sessions.get(&id).map(|slot| slot.op_id)
    }

    pub fn session(&self, id: SessionId) -> Option<&S> {
        self.sessions.get(&id).map(|slot| &slot.session)
    }

    pub fn contains(&self, id: SessionId) -> bool {
        self.sessions.contains_key(&id)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn stage_count(&self) -> usize {
        self.pipeline.len()
    }

    pub fn context(&self) -> &C {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut C {
        &mut self.context
    }

    /// Remove every session, finalizing each as `Processed`.
    pub fn shutdown(&mut self) {
        let ids: Vec<SessionId> = self.sessions.keys().copied().collect();
        for id in ids {
            if let Some(slot) = self.sessions.remove(&id) {
                debug!(session = %id, "Session closed at shutdown");
                if let Some(finalize) = &self.finalizer {
                    finalize(&mut self.context, slot.session, ExecutionStatus::Processed);
                }
            }
        }
    }
}

impl<C, S> Drop for ProcessingEngine<C, S> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
