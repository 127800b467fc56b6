//! Byte-level progress shared between the tasks of one transfer.

use parking_lot::Mutex;
use serde::Serialize;
use std::{fmt, sync::Arc};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub completed: u64,
    pub total: u64,
}

impl Progress {
    pub fn is_complete(&self) -> bool {
        self.completed >= self.total
    }

    /// Completed share in `0.0..=1.0`; an empty transfer counts as done.
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            self.completed as f64 / self.total as f64
        }
    }
}

type Observer = Box<dyn Fn(Progress) + Send + Sync>;

struct State {
    completed: u64,
    observers: Vec<Observer>,
}

/// Counts completed bytes against a fixed total.
///
/// Clones share the same counter. Observers run synchronously, under the
/// register's lock, every time `completed` changes; they must not call back
/// into the register.
#[derive(Clone)]
pub struct ProgressRegister {
    total: u64,
    state: Arc<Mutex<State>>,
}

impl ProgressRegister {
    pub fn new(total: u64) -> Self {
        Self {
            total,
            state: Arc::new(Mutex::new(State {
                completed: 0,
                observers: Vec::new(),
            })),
        }
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn completed(&self) -> u64 {
        self.state.lock().completed
    }

    pub fn snapshot(&self) -> Progress {
        Progress {
            completed: self.completed(),
            total: self.total,
        }
    }

    pub fn on_change(&self, observer: impl Fn(Progress) + Send + Sync + 'static) {
        self.state.lock().observers.push(Box::new(observer));
    }

    /// Add `bytes`, saturating at `total`. Returns the new state.
    pub fn add(&self, bytes: u64) -> Progress {
        let mut state = self.state.lock();
        let completed = state.completed.saturating_add(bytes).min(self.total);
        let progress = Progress {
            completed,
            total: self.total,
        };
        if completed != state.completed {
            state.completed = completed;
            for observer in &state.observers {
                observer(progress);
            }
        }
        progress
    }
}

impl fmt::Debug for ProgressRegister {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ProgressRegister")
            .field("completed", &state.completed)
            .field("total", &self.total)
            .field("observers", &state.observers.len())
            .finish()
    }
}
