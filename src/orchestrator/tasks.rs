//! Registry of named background tasks.
//!
//! One task per [`TaskKind`] at a time. `Connect` and `Search` supersede a running task of
//! the same kind; `Workflow` refuses to start while one is running. Different kinds never
//! wait on each other.

use crate::model::TaskKind;
use std::collections::HashMap;
use std::future::Future;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exclusivity {
    /// Abort the running task and start the new one.
    Supersede,
    /// Keep the running task and refuse the new one.
    Reject,
}

pub fn exclusivity(kind: TaskKind) -> Exclusivity {
    match kind {
        TaskKind::Connect | TaskKind::Search => Exclusivity::Supersede,
        TaskKind::Workflow => Exclusivity::Reject,
    }
}

/// Identifies one started task. Outcomes carrying a ticket that is no longer current
/// belong to a superseded task and must be dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskTicket {
    pub kind: TaskKind,
    generation: u64,
}

#[derive(Debug, thiserror::Error)]
#[error("a {kind:?} task is already running")]
pub struct TaskBusy {
    pub kind: TaskKind,
}

struct Slot {
    generation: u64,
    handle: JoinHandle<()>,
}

#[derive(Default)]
pub struct TaskRegistry {
    slots: HashMap<TaskKind, Slot>,
    generation: u64,
}

impl TaskRegistry {
    /// Spawn the future built by `make` as the current task of `kind`.
    pub fn start<F, Fut>(&mut self, kind: TaskKind, make: F) -> Result<TaskTicket, TaskBusy>
    where
        F: FnOnce(TaskTicket) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if self.is_running(kind) {
            match exclusivity(kind) {
                Exclusivity::Reject => return Err(TaskBusy { kind }),
                Exclusivity::Supersede => {
                    tracing::debug!(?kind, "superseding running task");
                    self.cancel(kind);
                }
            }
        }

        self.generation += 1;
        let ticket = TaskTicket {
            kind,
            generation: self.generation,
        };
        let handle = tokio::spawn(make(ticket));
        self.slots.insert(
            kind,
            Slot {
                generation: ticket.generation,
                handle,
            },
        );
        Ok(ticket)
    }

    pub fn is_running(&self, kind: TaskKind) -> bool {
        self.slots
            .get(&kind)
            .is_some_and(|slot| !slot.handle.is_finished())
    }

    pub fn is_current(&self, ticket: TaskTicket) -> bool {
        self.slots
            .get(&ticket.kind)
            .is_some_and(|slot| slot.generation == ticket.generation)
    }

    /// Retire the task that produced an outcome. Returns `false` for stale tickets.
    pub fn finish(&mut self, ticket: TaskTicket) -> bool {
        if !self.is_current(ticket) {
            return false;
        }
        self.slots.remove(&ticket.kind);
        true
    }

    /// Abort the task of `kind`. Returns whether one was still running.
    pub fn cancel(&mut self, kind: TaskKind) -> bool {
        match self.slots.remove(&kind) {
            Some(slot) => {
                let running = !slot.handle.is_finished();
                slot.handle.abort();
                running
            }
            None => false,
        }
    }

    pub fn cancel_all(&mut self) {
        for (_, slot) in self.slots.drain() {
            slot.handle.abort();
        }
    }
}

// Dropping a JoinHandle does not stop its task.
impl Drop for TaskRegistry {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
