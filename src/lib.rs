//! Parallel patterns over data streams and sequences, executed on native threads.
//!
//! This crate lets a caller express algorithmic skeletons (pipeline, farm,
//! filter, window, map, reduce, map-reduce, stencil) without dealing with
//! threads or queues directly. Stream patterns move tagged items through blocking
//! multi-producer/multi-consumer queues; ordered execution rebuilds the input
//! order downstream of replicated stages with a reorder buffer.
//!
//! # Features
//!
//! - Blocking (mutex + condvar) or lock-free (crossbeam) stage queues, bounded
//!   or unbounded
//! - Farm and filter stages replicated over a configurable concurrency degree
//! - Count-based tumbling, sliding and hopping windows
//! - Exactly-one sentinel termination for replicated stages
//! - Order-preserving or unordered delivery, selected per execution policy
//! - Per-stage metrics: processed, filtered, reorder depth, latency percentiles
//! - Panics in user callables are reported as errors after every thread is joined
//!
//! # Example
//!
//! ```ignore
//! use stream_patterns::{farm, filter, pipeline, reduce, ExecutionPolicy};
//!
//! let policy = ExecutionPolicy::new(4, true);
//!
//! let mut next = 0;
//! let report = pipeline(&policy, move || {
//!         next += 1;
//!         (next <= 100).then_some(next)
//!     })
//!     .farm(farm(&policy, |x: u64| x * x))
//!     .keep(filter(&policy, |x: &u64| x % 2 == 0))
//!     .run(|x| println!("{}", x))?;
//! println!("{}", report.summary());
//!
//! let total = reduce(&policy, &[1, 2, 3, 4], 0, |a, b| a + b)?;
//! ```

pub mod buffer;
pub mod error;
mod lifecycle;
pub mod metrics;
pub mod pipeline;
pub mod policy;
pub mod reorder;
pub mod sequence;
pub mod stage;
pub mod stream_filter;
pub mod tagged;
pub mod window;

pub use buffer::{Queue, QueueMode};
pub use error::{PatternError, Result};
pub use metrics::{MetricsSnapshot, StageMetrics};
pub use pipeline::{farm, filter, pipeline, Farm, Filter, Pipeline, PipelineReport, StageReport};
pub use policy::{ExecutionPolicy, DEFAULT_QUEUE_CAPACITY};
pub use reorder::{Accepted, ReorderBuffer};
pub use sequence::{map, map_reduce, map_zip, map_zip_reduce, reduce, stencil};
pub use stage::{FilterStage, MapStage, StageOp, StageRunner, Termination};
pub use stream_filter::{discard, keep};
pub use tagged::{Tag, TaggedItem};
pub use window::{run_window, CountWindow};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
