//! Cooperative cancellation and run budgets.
//!
//! The engine polls [`Budget::exhausted`] once per worklist pop. An embedder on
//! another thread may stop a run early with [`request`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

static CANCEL_REQUESTED: AtomicBool = AtomicBool::new(false);

pub fn request() {
    CANCEL_REQUESTED.store(true, Ordering::SeqCst);
}

pub fn reset() {
    CANCEL_REQUESTED.store(false, Ordering::SeqCst);
}

pub fn is_requested() -> bool {
    CANCEL_REQUESTED.load(Ordering::SeqCst)
}

/// Why a run stopped before reaching its fixpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Exhaustion {
    Iterations,
    Deadline,
    Cancelled,
}

#[derive(Debug)]
pub struct Budget {
    max_iterations: Option<u64>,
    deadline: Option<Instant>,
    iterations: u64,
}

impl Budget {
    pub fn new(max_iterations: Option<u64>, max_seconds: Option<f64>) -> Self {
        let deadline = max_seconds
            .filter(|s| s.is_finite() && *s >= 0.0)
            .map(|s| Instant::now() + Duration::from_secs_f64(s));
        Self {
            max_iterations,
            deadline,
            iterations: 0,
        }
    }

    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    /// Counts one pop. Returns the reason to stop, if any.
    pub fn tick(&mut self) -> Option<Exhaustion> {
        if let Some(reason) = self.exhausted() {
            return Some(reason);
        }
        self.iterations += 1;
        None
    }

    pub fn exhausted(&self) -> Option<Exhaustion> {
        if is_requested() {
            return Some(Exhaustion::Cancelled);
        }
        if let Some(max) = self.max_iterations {
            if self.iterations >= max {
                return Some(Exhaustion::Iterations);
            }
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(Exhaustion::Deadline),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iteration_budget() {
        let mut budget = Budget::new(Some(2), None);
        assert_eq!(budget.tick(), None);
        assert_eq!(budget.tick(), None);
        assert_eq!(budget.tick(), Some(Exhaustion::Iterations));
        assert_eq!(budget.iterations(), 2);
    }

    #[test]
    fn test_zero_deadline_expires() {
        let budget = Budget::new(None, Some(0.0));
        assert_eq!(budget.exhausted(), Some(Exhaustion::Deadline));
    }
}
