//! Thread ownership for one pattern invocation.
//!
//! Every thread an invocation starts is spawned through [`Invocation`], which
//! captures panics, records the first failure and closes every queue of the
//! invocation so that blocked siblings wake up and can be joined.

use crate::buffer::Queue;
use crate::error::{PatternError, Result};
use crate::metrics::StageMetrics;
use crate::policy::ExecutionPolicy;
use parking_lot::Mutex;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, trace, warn};

/// Extract a readable message from a panic payload
pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

type Closer = Box<dyn Fn() + Send + Sync>;

struct TeardownInner {
    closers: Mutex<Vec<Closer>>,
    failure: Mutex<Option<PatternError>>,
    triggered: AtomicBool,
}

/// Shared failure latch of an invocation
#[derive(Clone)]
pub(crate) struct Teardown {
    inner: Arc<TeardownInner>,
}

impl Teardown {
    fn new() -> Self {
        Self {
            inner: Arc::new(TeardownInner {
                closers: Mutex::new(Vec::new()),
                failure: Mutex::new(None),
                triggered: AtomicBool::new(false),
            }),
        }
    }

    /// Close `queue` when the invocation fails
    fn register<T: Send + 'static>(&self, queue: &Queue<T>) {
        let queue = queue.clone();
        let mut closers = self.inner.closers.lock();
        if self.is_triggered() {
            queue.close();
        }
        closers.push(Box::new(move || queue.close()));
    }

    /// Record a failure and close every registered queue.
    ///
    /// Only the first failure is kept.
    pub(crate) fn fail(&self, error: PatternError) {
        {
            let mut failure = self.inner.failure.lock();
            if failure.is_none() {
                warn!(error = %error, "tearing down invocation");
                *failure = Some(error);
            } else {
                trace!(error = %error, "additional failure during teardown");
            }
        }
        let closers = self.inner.closers.lock();
        self.inner.triggered.store(true, Ordering::Release);
        for close in closers.iter() {
            close();
        }
    }

    pub(crate) fn is_triggered(&self) -> bool {
        self.inner.triggered.load(Ordering::Acquire)
    }

    fn take_failure(&self) -> Option<PatternError> {
        self.inner.failure.lock().take()
    }
}

/// A stage registered with an invocation, for reporting
pub(crate) struct RegisteredStage {
    pub(crate) name: String,
    pub(crate) replicas: usize,
    pub(crate) metrics: StageMetrics,
    output_blocks: Box<dyn Fn() -> u64 + Send>,
}

/// Threads, queues and stage metrics of a single pattern invocation
pub(crate) struct Invocation {
    teardown: Teardown,
    handles: Vec<(String, JoinHandle<()>)>,
    stages: Vec<RegisteredStage>,
}

impl Invocation {
    pub(crate) fn new() -> Self {
        Self {
            teardown: Teardown::new(),
            handles: Vec::new(),
            stages: Vec::new(),
        }
    }

    pub(crate) fn teardown(&self) -> &Teardown {
        &self.teardown
    }

    /// Create a queue that is closed if the invocation fails
    pub(crate) fn make_queue<T: Send + 'static>(&self, policy: &ExecutionPolicy) -> Queue<T> {
        let queue = policy.make_queue();
        self.teardown.register(&queue);
        queue
    }

    /// Register a stage for reporting. Blocked pushes on `output` are
    /// credited to the stage when the invocation is joined.
    pub(crate) fn register_stage<T: Send + 'static>(
        &mut self,
        name: &str,
        replicas: usize,
        output: &Queue<T>,
    ) -> StageMetrics {
        let metrics = StageMetrics::new();
        let output = output.clone();
        self.stages.push(RegisteredStage {
            name: name.to_string(),
            replicas,
            metrics: metrics.clone(),
            output_blocks: Box::new(move || output.block_count()),
        });
        metrics
    }

    /// Start a named thread running `body`.
    ///
    /// A panic or error in `body` fails the whole invocation. A
    /// [`PatternError::QueueClosed`] from `body` only means the invocation is
    /// already being torn down.
    pub(crate) fn spawn<F>(&mut self, stage: &str, thread_name: String, body: F)
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        let teardown = self.teardown.clone();
        let stage_name = stage.to_string();
        let spawned = thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || match panic::catch_unwind(AssertUnwindSafe(body)) {
                Ok(Ok(())) => {}
                Ok(Err(PatternError::QueueClosed)) => {
                    trace!(stage = %stage_name, "stopped by teardown");
                }
                Ok(Err(error)) => teardown.fail(error),
                Err(payload) => teardown.fail(PatternError::CallablePanicked {
                    stage: stage_name,
                    message: panic_message(payload),
                }),
            });
        match spawned {
            Ok(handle) => self.handles.push((thread_name, handle)),
            Err(source) => self.teardown.fail(PatternError::Spawn {
                stage: stage.to_string(),
                source,
            }),
        }
    }

    /// Join every thread and return the first recorded failure
    pub(crate) fn join(self) -> (Vec<RegisteredStage>, Result<()>) {
        let thread_count = self.handles.len();
        for (name, handle) in self.handles {
            if handle.join().is_err() {
                self.teardown
                    .fail(PatternError::ThreadError(format!("thread `{}` panicked", name)));
            }
        }
        for stage in &self.stages {
            stage.metrics.record_blocks((stage.output_blocks)());
        }
        debug!(threads = thread_count, "invocation joined");
        let result = match self.teardown.take_failure() {
            Some(error) => Err(error),
            None => Ok(()),
        };
        (self.stages, result)
    }
}
