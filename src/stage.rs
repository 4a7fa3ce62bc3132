use crate::buffer::Queue;
use crate::error::{PatternError, Result};
use crate::lifecycle::Invocation;
use crate::metrics::StageMetrics;
use crate::policy::ExecutionPolicy;
use crate::reorder::{Accepted, ReorderBuffer};
use crate::tagged::{Tag, TaggedItem};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, trace};

/// The operation a stage applies to each present payload.
///
/// Shared by every replica of a stage, so it takes `&self`.
pub trait StageOp<In>: Send + Sync + 'static {
    type Output: Send + 'static;

    /// Apply the operation. `None` filters the position out, leaving a hole.
    fn apply(&self, input: In) -> Option<Self::Output>;
}

/// A stage that transforms each item
pub struct MapStage<F> {
    mapper: F,
}

impl<F> MapStage<F> {
    /// Create a stage applying `mapper` to each value
    pub fn new(mapper: F) -> Self {
        Self { mapper }
    }
}

impl<In, Out, F> StageOp<In> for MapStage<F>
where
    F: Fn(In) -> Out + Send + Sync + 'static,
    Out: Send + 'static,
{
    type Output = Out;

    fn apply(&self, input: In) -> Option<Out> {
        Some((self.mapper)(input))
    }
}

/// A stage that keeps or discards items matching a predicate
pub struct FilterStage<P> {
    predicate: P,
    keep_matches: bool,
}

impl<P> FilterStage<P> {
    /// Pass items for which the predicate holds
    pub fn keep(predicate: P) -> Self {
        Self {
            predicate,
            keep_matches: true,
        }
    }

    /// Pass items for which the predicate does not hold
    pub fn discard(predicate: P) -> Self {
        Self {
            predicate,
            keep_matches: false,
        }
    }
}

impl<T, P> StageOp<T> for FilterStage<P>
where
    T: Send + 'static,
    P: Fn(&T) -> bool + Send + Sync + 'static,
{
    type Output = T;

    fn apply(&self, input: T) -> Option<T> {
        if (self.predicate)(&input) == self.keep_matches {
            Some(input)
        } else {
            None
        }
    }
}

/// Sentinel counting shared by the replicas of one stage.
///
/// Every replica observes exactly one sentinel: all but the last put it back
/// on the input queue for a sibling, the last one forwards it downstream.
#[derive(Debug)]
pub struct Termination {
    finished: AtomicUsize,
    workers: usize,
}

impl Termination {
    /// Create a counter for a stage with `workers` replicas
    pub fn new(workers: usize) -> Self {
        Self {
            finished: AtomicUsize::new(0),
            workers,
        }
    }

    /// Handle a sentinel popped by one replica.
    ///
    /// Returns `true` if this replica was the last one and forwarded the
    /// sentinel to `output`.
    pub fn on_sentinel<I: Send, O: Send>(
        &self,
        input: &Queue<TaggedItem<I>>,
        output: &Queue<TaggedItem<O>>,
    ) -> Result<bool> {
        let finished = self.finished.fetch_add(1, Ordering::AcqRel) + 1;
        if finished < self.workers {
            trace!(finished, workers = self.workers, "recirculating sentinel");
            input.push(TaggedItem::terminal())?;
            Ok(false)
        } else {
            debug_assert_eq!(finished, self.workers, "more sentinels than workers");
            output.push(TaggedItem::terminal())?;
            Ok(true)
        }
    }

    /// Get the number of replicas that have seen the sentinel
    pub fn finished(&self) -> usize {
        self.finished.load(Ordering::Acquire)
    }
}

/// Runs one replica of a stage: pop, apply, push, until the sentinel
pub struct StageRunner<In: Send, S: StageOp<In>> {
    input: Queue<TaggedItem<In>>,
    output: Queue<TaggedItem<S::Output>>,
    op: Arc<S>,
    termination: Arc<Termination>,
    metrics: StageMetrics,
}

impl<In: Send, S: StageOp<In>> StageRunner<In, S> {
    pub fn new(
        input: Queue<TaggedItem<In>>,
        output: Queue<TaggedItem<S::Output>>,
        op: Arc<S>,
        termination: Arc<Termination>,
        metrics: StageMetrics,
    ) -> Self {
        Self {
            input,
            output,
            op,
            termination,
            metrics,
        }
    }

    /// Get the metrics shared by the stage's replicas
    pub fn metrics(&self) -> &StageMetrics {
        &self.metrics
    }

    /// Process items until this replica has seen the sentinel
    pub fn run(&self) -> Result<()> {
        loop {
            let (tag, payload) = self.input.pop()?.into_parts();
            let seq = match tag {
                Tag::Terminal => {
                    self.termination.on_sentinel(&self.input, &self.output)?;
                    return Ok(());
                }
                Tag::Seq(seq) => seq,
            };

            let item = match payload {
                None => {
                    self.metrics.record_hole();
                    TaggedItem::hole(seq)
                }
                Some(value) => {
                    let start = Instant::now();
                    let result = self.op.apply(value);
                    self.metrics
                        .record_latency(start.elapsed().as_nanos() as u64);
                    self.metrics.record_processed();
                    match result {
                        Some(out) => TaggedItem::value(seq, out),
                        None => {
                            self.metrics.record_filtered();
                            TaggedItem::hole(seq)
                        }
                    }
                }
            };
            self.output.push(item)?;
        }
    }
}

/// Restore tag order between a replicated stage and the next one.
///
/// Holes are dropped and released values are re-tagged densely from 0, so
/// downstream stages see a gap-free stream.
pub fn run_sequencer<T: Send>(
    input: &Queue<TaggedItem<T>>,
    output: &Queue<TaggedItem<T>>,
    metrics: &StageMetrics,
) -> Result<()> {
    let mut reorder = ReorderBuffer::new();
    let mut next = 0u64;
    loop {
        let accepted = reorder.accept(input.pop()?)?;
        metrics.record_reorder_depth(reorder.pending());
        while let Some(value) = reorder.next_ready() {
            output.push(TaggedItem::value(next, value))?;
            next += 1;
        }
        if accepted == Accepted::Terminal {
            reorder.finish()?;
            output.push(TaggedItem::terminal())?;
            return Ok(());
        }
    }
}

/// How a stage is wired into an invocation
#[derive(Debug, Clone)]
pub(crate) struct StageSpec {
    pub(crate) name: String,
    pub(crate) replicas: usize,
    pub(crate) ordered: bool,
    pub(crate) policy: ExecutionPolicy,
}

impl StageSpec {
    /// A plain transformer: one worker, order preserved without reordering
    pub(crate) fn single(name: String, policy: &ExecutionPolicy) -> Self {
        Self {
            name,
            replicas: 1,
            ordered: false,
            policy: policy.clone(),
        }
    }

    /// A farm or filter stage governed by its own policy
    pub(crate) fn replicated(name: String, policy: &ExecutionPolicy) -> Self {
        Self {
            name,
            replicas: policy.concurrency_degree(),
            ordered: policy.is_ordered(),
            policy: policy.clone(),
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        self.policy.validate()?;
        if self.replicas < 1 {
            return Err(PatternError::InvalidConcurrency(self.replicas));
        }
        Ok(())
    }
}

/// Spawn the replicas of a stage reading `input`, returning the queue the
/// next stage reads from
pub(crate) fn launch_stage<In, S>(
    invocation: &mut Invocation,
    input: Queue<TaggedItem<In>>,
    op: S,
    spec: StageSpec,
) -> Queue<TaggedItem<S::Output>>
where
    In: Send + 'static,
    S: StageOp<In>,
{
    let output = invocation.make_queue(&spec.policy);
    let metrics = invocation.register_stage(&spec.name, spec.replicas, &output);
    let op = Arc::new(op);
    let termination = Arc::new(Termination::new(spec.replicas));
    debug!(
        stage = %spec.name,
        replicas = spec.replicas,
        ordered = spec.ordered,
        "launching stage"
    );

    for replica in 0..spec.replicas {
        let runner = StageRunner::new(
            input.clone(),
            output.clone(),
            Arc::clone(&op),
            Arc::clone(&termination),
            metrics.clone(),
        );
        invocation.spawn(&spec.name, format!("{}/{}", spec.name, replica), move || {
            runner.run()
        });
    }

    if spec.ordered && spec.replicas > 1 {
        let sequenced = invocation.make_queue(&spec.policy);
        let downstream = sequenced.clone();
        invocation.spawn(&spec.name, format!("{}/seq", spec.name), move || {
            run_sequencer(&output, &downstream, &metrics)
        });
        sequenced
    } else {
        output
    }
}
