//! Structured task group for chunked CPU work
//!
//! Items are split into disjoint chunks, each chunk runs on a dedicated
//! rayon pool, and every chunk reports back either its result or an
//! explicit failure. Panics inside a chunk are caught and reported as
//! failures of that chunk only.

use crate::{Error, Result};
use rayon::prelude::*;
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::{debug, error};

/// What the caller wants to happen when a task fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorPolicy {
    /// Log the failure, keep the other tasks' results.
    #[default]
    ContinueOnError,
    /// Any failure fails the whole group.
    FailFast,
}

/// A task that did not produce a result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskFailure {
    /// Chunk index.
    pub task: usize,
    /// Number of items in the chunk.
    pub items: usize,
    /// Error or panic message.
    pub error: String,
}

/// Partial results plus per-task failures.
#[derive(Debug)]
pub struct TaskGroupOutcome<T> {
    /// Results of successful tasks, in chunk order.
    pub completed: Vec<T>,
    /// Failed tasks, in chunk order.
    pub failures: Vec<TaskFailure>,
}

impl<T> Default for TaskGroupOutcome<T> {
    fn default() -> Self {
        Self {
            completed: Vec::new(),
            failures: Vec::new(),
        }
    }
}

impl<T> TaskGroupOutcome<T> {
    /// Total items across failed tasks.
    #[must_use]
    pub fn failed_items(&self) -> usize {
        self.failures.iter().map(|f| f.items).sum()
    }
}

/// Runs a function over disjoint chunks of a slice in parallel.
#[derive(Debug, Clone, Copy)]
pub struct TaskGroup {
    workers: usize,
    policy: ErrorPolicy,
}

/// Split `items` into `chunks` contiguous parts whose lengths differ by at
/// most one, longer parts first.
#[must_use]
pub fn split<T>(items: &[T], chunks: usize) -> Vec<&[T]> {
    let chunks = chunks.clamp(1, items.len().max(1));
    let base = items.len() / chunks;
    let extra = items.len() % chunks;

    let mut parts = Vec::with_capacity(chunks);
    let mut start = 0;
    for i in 0..chunks {
        let len = base + usize::from(i < extra);
        parts.push(&items[start..start + len]);
        start += len;
    }
    parts
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

impl TaskGroup {
    /// Group with `workers` threads (at least one).
    #[must_use]
    pub fn new(workers: usize, policy: ErrorPolicy) -> Self {
        Self {
            workers: workers.max(1),
            policy,
        }
    }

    /// Worker count.
    #[must_use]
    pub const fn workers(&self) -> usize {
        self.workers
    }

    /// Error policy.
    #[must_use]
    pub const fn policy(&self) -> ErrorPolicy {
        self.policy
    }

    /// Run `task` over `min(workers, items.len())` chunks of `items`.
    ///
    /// # Errors
    /// Returns error if the worker pool cannot be created, or, under
    /// [`ErrorPolicy::FailFast`], if any chunk fails.
    pub fn run<I, T, F>(&self, items: &[I], task: F) -> Result<TaskGroupOutcome<T>>
    where
        I: Sync,
        T: Send,
        F: Fn(&[I]) -> Result<T> + Sync,
    {
        if items.is_empty() {
            return Ok(TaskGroupOutcome::default());
        }

        let chunk_count = self.workers.min(items.len());
        let chunks = split(items, chunk_count);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(chunk_count)
            .thread_name(|i| format!("zonal-worker-{i}"))
            .build()
            .map_err(|e| Error::Aggregation(format!("Failed to start worker pool: {e}")))?;

        debug!(chunks = chunk_count, items = items.len(), "Dispatching task group");
        let results: Vec<_> = pool.install(|| {
            chunks
                .par_iter()
                .enumerate()
                .map(|(i, chunk)| {
                    let result = match catch_unwind(AssertUnwindSafe(|| task(chunk))) {
                        Ok(Ok(value)) => Ok(value),
                        Ok(Err(e)) => Err(e.to_string()),
                        Err(payload) => Err(format!("worker panicked: {}", panic_message(&*payload))),
                    };
                    (i, chunk.len(), result)
                })
                .collect()
        });

        let mut outcome = TaskGroupOutcome::default();
        for (task, items, result) in results {
            match result {
                Ok(value) => outcome.completed.push(value),
                Err(message) => {
                    error!(task, items, error = %message, "Task failed");
                    outcome.failures.push(TaskFailure {
                        task,
                        items,
                        error: message,
                    });
                }
            }
        }

        if self.policy == ErrorPolicy::FailFast {
            if let Some(first) = outcome.failures.first() {
                return Err(Error::Aggregation(format!(
                    "Task {} ({} items) failed: {}",
                    first.task, first.items, first.error
                )));
            }
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_like_array_split() {
        let items: Vec<u32> = (0..10).collect();
        let lens: Vec<usize> = split(&items, 3).iter().map(|c| c.len()).collect();
        assert_eq!(lens, [4, 3, 3]);

        let lens: Vec<usize> = split(&items, 10).iter().map(|c| c.len()).collect();
        assert_eq!(lens, [1; 10]);

        let parts = split(&items, 4);
        let joined: Vec<u32> = parts.concat();
        assert_eq!(joined, items);
    }

    #[test]
    fn test_run_collects_in_chunk_order() {
        let items: Vec<u64> = (1..=100).collect();
        let outcome = TaskGroup::new(4, ErrorPolicy::ContinueOnError)
            .run(&items, |chunk| Ok(chunk.iter().sum::<u64>()))
            .unwrap();
        assert_eq!(outcome.completed.len(), 4);
        assert_eq!(outcome.completed.iter().sum::<u64>(), 5050);
        assert_eq!(outcome.completed[0], (1..=25).sum::<u64>());
        assert!(outcome.failures.is_empty());
    }

    #[test]
    fn test_error_isolated_to_chunk() {
        let items: Vec<i32> = (0..9).collect();
        let outcome = TaskGroup::new(3, ErrorPolicy::ContinueOnError)
            .run(&items, |chunk| {
                if chunk.contains(&4) {
                    Err(Error::Aggregation("bad chunk".to_string()))
                } else {
                    Ok(chunk.len())
                }
            })
            .unwrap();
        assert_eq!(outcome.completed, vec![3, 3]);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].task, 1);
        assert_eq!(outcome.failed_items(), 3);
    }

    #[test]
    fn test_panic_isolated_to_chunk() {
        let items: Vec<i32> = (0..4).collect();
        let outcome = TaskGroup::new(2, ErrorPolicy::ContinueOnError)
            .run(&items, |chunk| {
                assert!(chunk[0] != 0, "boom");
                Ok(chunk.len())
            })
            .unwrap();
        assert_eq!(outcome.completed, vec![2]);
        assert!(outcome.failures[0].error.contains("boom"));
    }

    #[test]
    fn test_fail_fast() {
        let items = [1, 2];
        let err = TaskGroup::new(2, ErrorPolicy::FailFast)
            .run(&items, |chunk| {
                if chunk[0] == 2 {
                    Err(Error::Aggregation("nope".to_string()))
                } else {
                    Ok(())
                }
            })
            .unwrap_err();
        assert!(matches!(err, Error::Aggregation(_)));
    }

    #[test]
    fn test_empty_input() {
        let items: [i32; 0] = [];
        let outcome = TaskGroup::new(8, ErrorPolicy::FailFast)
            .run(&items, |_| Ok(()))
            .unwrap();
        assert!(outcome.completed.is_empty());
    }
}
