use crate::buffer::Queue;
use crate::error::{PatternError, Result};
use crate::lifecycle::{panic_message, Invocation};
use crate::metrics::MetricsSnapshot;
use crate::policy::ExecutionPolicy;
use crate::reorder::{Accepted, ReorderBuffer};
use crate::stage::{launch_stage, FilterStage, MapStage, StageOp, StageSpec};
use crate::tagged::{Tag, TaggedItem};
use crate::window::{launch_window, CountWindow};
use std::panic::{self, AssertUnwindSafe};
use std::time::{Duration, Instant};
use tracing::debug;

type Launcher<T> = Box<dyn FnOnce(&mut Invocation) -> Queue<TaggedItem<T>> + Send>;

/// A replicated transformer stage, created by [`farm`]
pub struct Farm<F> {
    policy: ExecutionPolicy,
    transform: F,
    name: Option<String>,
}

impl<F> Farm<F> {
    /// Name the stage in thread names and reports
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Replicate `transform` across `policy.concurrency_degree()` workers
pub fn farm<F>(policy: &ExecutionPolicy, transform: F) -> Farm<F> {
    Farm {
        policy: policy.clone(),
        transform,
        name: None,
    }
}

/// A replicated predicate stage, created by [`filter`]
pub struct Filter<P> {
    policy: ExecutionPolicy,
    predicate: P,
    name: Option<String>,
}

impl<P> Filter<P> {
    /// Name the stage in thread names and reports
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Replicate `predicate` across `policy.concurrency_degree()` workers.
///
/// Used with [`Pipeline::keep`] or [`Pipeline::discard`].
pub fn filter<P>(policy: &ExecutionPolicy, predicate: P) -> Filter<P> {
    Filter {
        policy: policy.clone(),
        predicate,
        name: None,
    }
}

/// Metrics of one stage after a run
#[derive(Debug, Clone)]
pub struct StageReport {
    pub name: String,
    pub replicas: usize,
    pub metrics: MetricsSnapshot,
}

/// Summary of a completed pipeline run
#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub stages: Vec<StageReport>,
    /// Values handed to the consumer
    pub consumed: u64,
    pub elapsed: Duration,
}

impl PipelineReport {
    /// Get a summary of all stage metrics
    pub fn summary(&self) -> String {
        let mut summary = format!(
            "Pipeline Summary: {} items consumed in {:.2}s\n",
            self.consumed,
            self.elapsed.as_secs_f64()
        );
        for (i, stage) in self.stages.iter().enumerate() {
            summary.push_str(&format!(
                "  Stage {} ({} x{}): {}\n",
                i,
                stage.name,
                stage.replicas,
                stage.metrics.format()
            ));
        }
        summary
    }
}

/// A stream pipeline under construction.
///
/// Stages are only recorded while building; threads are started by
/// [`Pipeline::run`] after every policy has been validated.
///
/// ```ignore
/// use stream_patterns::{farm, pipeline, ExecutionPolicy};
///
/// let policy = ExecutionPolicy::new(4, true);
/// let mut next = 0;
/// let doubled = pipeline(&policy, move || {
///         next += 1;
///         (next <= 10).then_some(next)
///     })
///     .farm(farm(&policy, |x: i32| x * 2))
///     .collect()?;
/// assert_eq!(doubled, vec![2, 4, 6, 8, 10, 12, 14, 16, 18, 20]);
/// ```
pub struct Pipeline<T: Send + 'static> {
    policy: ExecutionPolicy,
    launcher: Launcher<T>,
    config_error: Option<PatternError>,
    stage_count: usize,
}

/// Start a pipeline fed by `generator`.
///
/// The generator runs on its own thread; returning `None` ends the stream.
/// `policy` decides whether the consumer sees items in generation order and
/// sets the attributes of the generator's output queue.
pub fn pipeline<T, G>(policy: &ExecutionPolicy, generator: G) -> Pipeline<T>
where
    T: Send + 'static,
    G: FnMut() -> Option<T> + Send + 'static,
{
    let queue_policy = policy.clone();
    Pipeline {
        policy: policy.clone(),
        config_error: policy.validate().err(),
        stage_count: 0,
        launcher: Box::new(move |invocation: &mut Invocation| {
            let queue = invocation.make_queue(&queue_policy);
            let output = queue.clone();
            invocation.spawn("generator", "generator".to_string(), move || {
                run_generator(generator, &output)
            });
            queue
        }),
    }
}

fn run_generator<T, G>(mut generator: G, output: &Queue<TaggedItem<T>>) -> Result<()>
where
    T: Send,
    G: FnMut() -> Option<T>,
{
    let mut seq = 0u64;
    while let Some(value) = generator() {
        output.push(TaggedItem::value(seq, value))?;
        seq += 1;
    }
    output.push(TaggedItem::terminal())?;
    debug!(items = seq, "generator exhausted");
    Ok(())
}

impl<T: Send + 'static> Pipeline<T> {
    /// Append a single-worker transformer
    pub fn then<U, F>(self, transform: F) -> Pipeline<U>
    where
        U: Send + 'static,
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        let name = format!("stage-{}", self.stage_count + 1);
        self.then_named(name, transform)
    }

    /// Append a named single-worker transformer
    pub fn then_named<U, F>(self, name: impl Into<String>, transform: F) -> Pipeline<U>
    where
        U: Send + 'static,
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        let spec = StageSpec::single(name.into(), &self.policy);
        self.chain(MapStage::new(transform), spec)
    }

    /// Append a replicated transformer
    pub fn farm<U, F>(self, farm: Farm<F>) -> Pipeline<U>
    where
        U: Send + 'static,
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        let name = farm
            .name
            .unwrap_or_else(|| format!("farm-{}", self.stage_count + 1));
        let spec = StageSpec::replicated(name, &farm.policy);
        self.chain(MapStage::new(farm.transform), spec)
    }

    /// Keep only the items matching the filter's predicate
    pub fn keep<P>(self, filter: Filter<P>) -> Pipeline<T>
    where
        P: Fn(&T) -> bool + Send + Sync + 'static,
    {
        let name = filter
            .name
            .unwrap_or_else(|| format!("keep-{}", self.stage_count + 1));
        let spec = StageSpec::replicated(name, &filter.policy);
        self.chain(FilterStage::keep(filter.predicate), spec)
    }

    /// Drop the items matching the filter's predicate
    pub fn discard<P>(self, filter: Filter<P>) -> Pipeline<T>
    where
        P: Fn(&T) -> bool + Send + Sync + 'static,
    {
        let name = filter
            .name
            .unwrap_or_else(|| format!("discard-{}", self.stage_count + 1));
        let spec = StageSpec::replicated(name, &filter.policy);
        self.chain(FilterStage::discard(filter.predicate), spec)
    }

    /// Group values into windows of `size`, advancing by `slide` values.
    ///
    /// The window stage runs on one worker. With an ordered pipeline policy
    /// windows follow generation order, otherwise arrival order. Values that
    /// never fill a window at the end of the stream are dropped.
    pub fn window(self, size: usize, slide: usize) -> Pipeline<Vec<T>>
    where
        T: Clone,
    {
        let name = format!("window-{}", self.stage_count + 1);
        self.window_named(name, size, slide)
    }

    /// Append a named window stage, see [`Pipeline::window`]
    pub fn window_named(
        self,
        name: impl Into<String>,
        size: usize,
        slide: usize,
    ) -> Pipeline<Vec<T>>
    where
        T: Clone,
    {
        let spec = StageSpec {
            ordered: self.policy.is_ordered(),
            ..StageSpec::single(name.into(), &self.policy)
        };
        match CountWindow::new(size, slide) {
            Ok(window) => self.extend(None, move |invocation, input| {
                launch_window(invocation, input, window, spec)
            }),
            // Never launched: `run` reports the configuration error first
            Err(error) => self.extend(Some(error), move |invocation, _| {
                invocation.make_queue(&spec.policy)
            }),
        }
    }

    fn chain<S>(self, op: S, spec: StageSpec) -> Pipeline<S::Output>
    where
        S: StageOp<T>,
    {
        let invalid = spec.validate().err();
        self.extend(invalid, move |invocation, input| {
            launch_stage(invocation, input, op, spec)
        })
    }

    /// Append a stage launched by `launch` after the current last stage
    fn extend<U, L>(self, invalid: Option<PatternError>, launch: L) -> Pipeline<U>
    where
        U: Send + 'static,
        L: FnOnce(&mut Invocation, Queue<TaggedItem<T>>) -> Queue<TaggedItem<U>>
            + Send
            + 'static,
    {
        let Pipeline {
            policy,
            launcher,
            config_error,
            stage_count,
        } = self;
        Pipeline {
            policy,
            config_error: config_error.or(invalid),
            stage_count: stage_count + 1,
            launcher: Box::new(move |invocation: &mut Invocation| {
                let input = launcher(invocation);
                launch(invocation, input)
            }),
        }
    }

    /// Run the pipeline, handing every surviving item to `consume` on the
    /// calling thread.
    ///
    /// Returns once every thread of the invocation has been joined. Items
    /// consumed before a failure stay consumed.
    pub fn run<C>(self, consume: C) -> Result<PipelineReport>
    where
        C: FnMut(T),
    {
        if let Some(error) = self.config_error {
            return Err(error);
        }
        let started = Instant::now();
        let ordered = self.policy.is_ordered();
        debug!(stages = self.stage_count, ordered, "starting pipeline");

        let mut invocation = Invocation::new();
        let last = (self.launcher)(&mut invocation);

        let mut consumed = 0u64;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            drain(&last, ordered, consume, &mut consumed)
        }));
        match outcome {
            Ok(Ok(())) | Ok(Err(PatternError::QueueClosed)) => {}
            Ok(Err(error)) => invocation.teardown().fail(error),
            Err(payload) => invocation.teardown().fail(PatternError::CallablePanicked {
                stage: "consumer".to_string(),
                message: panic_message(payload),
            }),
        }

        let (stages, joined) = invocation.join();
        joined?;
        Ok(PipelineReport {
            stages: stages
                .into_iter()
                .map(|stage| StageReport {
                    name: stage.name,
                    replicas: stage.replicas,
                    metrics: stage.metrics.snapshot(),
                })
                .collect(),
            consumed,
            elapsed: started.elapsed(),
        })
    }

    /// Run the pipeline and gather the surviving items
    pub fn collect(self) -> Result<Vec<T>> {
        let mut items = Vec::new();
        self.run(|item| items.push(item))?;
        Ok(items)
    }
}

/// Feed the last queue to the consumer until the sentinel arrives
fn drain<T, C>(
    queue: &Queue<TaggedItem<T>>,
    ordered: bool,
    mut consume: C,
    consumed: &mut u64,
) -> Result<()>
where
    T: Send,
    C: FnMut(T),
{
    if ordered {
        let mut reorder = ReorderBuffer::new();
        loop {
            let accepted = reorder.accept(queue.pop()?)?;
            while let Some(value) = reorder.next_ready() {
                consume(value);
                *consumed += 1;
            }
            if accepted == Accepted::Terminal {
                return reorder.finish();
            }
        }
    } else {
        loop {
            match queue.pop()?.into_parts() {
                (Tag::Terminal, _) => return Ok(()),
                (Tag::Seq(_), Some(value)) => {
                    consume(value);
                    *consumed += 1;
                }
                (Tag::Seq(_), None) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counter(limit: u64) -> impl FnMut() -> Option<u64> + Send + 'static {
        let mut next = 0;
        move || {
            next += 1;
            (next <= limit).then_some(next)
        }
    }

    #[test]
    fn test_generator_only() {
        let policy = ExecutionPolicy::new(2, true);
        let items = pipeline(&policy, counter(5)).collect().unwrap();
        assert_eq!(items, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_empty_stream() {
        let policy = ExecutionPolicy::new(3, true);
        let items = pipeline(&policy, || None::<u64>)
            .farm(farm(&policy, |x: u64| x + 1))
            .collect()
            .unwrap();
        assert!(items.is_empty());
    }

    #[test]
    fn test_zero_degree_farm_rejected_before_start() {
        let policy = ExecutionPolicy::new(2, true);
        let broken = ExecutionPolicy::new(0, true);
        let result = pipeline(&policy, || -> Option<u64> { panic!("generator must not run") })
            .farm(farm(&broken, |x: u64| x))
            .collect();
        assert!(matches!(result, Err(PatternError::InvalidConcurrency(0))));
    }

    #[test]
    fn test_tumbling_window_after_ordered_farm() {
        let policy = ExecutionPolicy::new(4, true);
        let windows = pipeline(&policy, counter(10))
            .farm(farm(&policy, |x: u64| x * 10))
            .window(3, 3)
            .collect()
            .unwrap();
        assert_eq!(windows, vec![vec![10, 20, 30], vec![40, 50, 60], vec![70, 80, 90]]);
    }

    #[test]
    fn test_sliding_window_skips_filtered_values() {
        let policy = ExecutionPolicy::new(3, true);
        let unordered_filter = ExecutionPolicy::new(3, false);
        let sums = pipeline(&policy, counter(12))
            .keep(filter(&unordered_filter, |x: &u64| x % 3 != 0))
            .window(3, 1)
            .then(|w: Vec<u64>| w.iter().sum::<u64>())
            .collect()
            .unwrap();
        let survivors: Vec<u64> = (1..=12).filter(|x| x % 3 != 0).collect();
        let expected: Vec<u64> = survivors.windows(3).map(|w| w.iter().sum()).collect();
        assert_eq!(sums, expected);
    }

    #[test]
    fn test_unordered_window_covers_every_value() {
        let policy = ExecutionPolicy::new(4, false);
        let windows = pipeline(&policy, counter(100))
            .farm(farm(&policy, |x: u64| x + 1))
            .window(10, 10)
            .collect()
            .unwrap();
        assert_eq!(windows.len(), 10);
        assert!(windows.iter().all(|w| w.len() == 10));
        let mut values: Vec<u64> = windows.into_iter().flatten().collect();
        values.sort_unstable();
        assert_eq!(values, (2..=101).collect::<Vec<_>>());
    }

    #[test]
    fn test_unordered_sliding_window_from_generator() {
        let policy = ExecutionPolicy::new(2, false);
        let windows = pipeline(&policy, counter(5))
            .window_named("pairs", 2, 1)
            .collect()
            .unwrap();
        assert_eq!(windows, vec![vec![1, 2], vec![2, 3], vec![3, 4], vec![4, 5]]);
    }

    #[test]
    fn test_zero_window_rejected_before_start() {
        let policy = ExecutionPolicy::new(2, true);
        let result = pipeline(&policy, || -> Option<u64> { panic!("generator must not run") })
            .window(0, 1)
            .collect();
        assert!(matches!(result, Err(PatternError::ConfigError(_))));
    }

    #[test]
    fn test_report_names_stages() {
        let policy = ExecutionPolicy::new(3, true);
        let report = pipeline(&policy, counter(20))
            .then(|x| x + 1)
            .farm(farm(&policy, |x: u64| x * 2).named("double"))
            .keep(filter(&policy, |x: &u64| x % 4 == 0))
            .run(|_| {})
            .unwrap();

        let names: Vec<_> = report.stages.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["stage-1", "double", "keep-3"]);
        assert_eq!(report.stages[1].replicas, 3);
        assert_eq!(report.stages[1].metrics.total_processed, 20);
        assert_eq!(report.stages[2].metrics.total_filtered, 10);
        assert_eq!(report.consumed, 10);
        assert!(report.summary().contains("double"));
    }
}
