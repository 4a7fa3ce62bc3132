use crate::buffer::{Queue, QueueMode};
use crate::error::{PatternError, Result};
use std::thread;

/// Queue size used when a policy does not set one
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Execution policy for the native thread backend.
///
/// Controls how many worker replicas a farm or filter stage runs, whether
/// results must come out in input order, and the attributes of the queues
/// created between stages. The engine only reads a policy, so one instance
/// can be shared by many invocations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionPolicy {
    concurrency_degree: usize,
    ordered: bool,
    queue_capacity: Option<usize>,
    queue_mode: QueueMode,
}

impl ExecutionPolicy {
    /// Create a policy with an explicit concurrency degree and ordering
    pub fn new(concurrency_degree: usize, ordered: bool) -> Self {
        Self {
            concurrency_degree,
            ordered,
            queue_capacity: Some(DEFAULT_QUEUE_CAPACITY),
            queue_mode: QueueMode::default(),
        }
    }

    /// Set the capacity of queues created by this policy
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = Some(capacity);
        self
    }

    /// Make queues created by this policy unbounded
    pub fn unbounded_queues(mut self) -> Self {
        self.queue_capacity = None;
        self
    }

    /// Select blocking or lock-free queues
    pub fn with_queue_mode(mut self, mode: QueueMode) -> Self {
        self.queue_mode = mode;
        self
    }

    /// Set the number of replicas farm and filter stages run
    pub fn set_concurrency_degree(&mut self, degree: usize) {
        self.concurrency_degree = degree;
    }

    /// Get the number of replicas farm and filter stages run
    pub fn concurrency_degree(&self) -> usize {
        self.concurrency_degree
    }

    /// Deliver results in input order
    pub fn enable_ordering(&mut self) {
        self.ordered = true;
    }

    /// Deliver results in completion order
    pub fn disable_ordering(&mut self) {
        self.ordered = false;
    }

    /// Check whether results keep input order
    pub fn is_ordered(&self) -> bool {
        self.ordered
    }

    /// Get the queue capacity, `None` for unbounded queues
    pub fn queue_capacity(&self) -> Option<usize> {
        self.queue_capacity
    }

    /// Get the kind of queues this policy creates
    pub fn queue_mode(&self) -> QueueMode {
        self.queue_mode
    }

    /// Reject configurations that cannot run.
    ///
    /// Every pattern calls this before spawning its first thread.
    pub fn validate(&self) -> Result<()> {
        if self.concurrency_degree < 1 {
            return Err(PatternError::InvalidConcurrency(self.concurrency_degree));
        }
        if self.queue_capacity == Some(0) {
            return Err(PatternError::ConfigError(
                "queue capacity must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Create a fresh queue for one invocation
    pub fn make_queue<T: Send>(&self) -> Queue<T> {
        Queue::new(self.queue_capacity, self.queue_mode)
    }
}

impl Default for ExecutionPolicy {
    /// Uses every available hardware thread and keeps input order
    fn default() -> Self {
        let degree = thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self::new(degree, true)
    }
}
