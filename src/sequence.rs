//! Data-parallel patterns over finite slices.
//!
//! The input is split into at most `concurrency_degree` contiguous index
//! ranges and each range is handled by one scoped worker thread. Results are
//! assembled in partition order, so no tagging is needed.

use crate::error::{PatternError, Result};
use crate::lifecycle::panic_message;
use crate::policy::ExecutionPolicy;
use std::ops::Range;
use std::thread;
use tracing::debug;

/// Split `0..len` into at most `workers` ranges whose sizes differ by at most one
pub fn partitions(len: usize, workers: usize) -> Vec<Range<usize>> {
    let parts = workers.min(len);
    if parts == 0 {
        return Vec::new();
    }
    let base = len / parts;
    let extra = len % parts;
    let mut start = 0;
    (0..parts)
        .map(|i| {
            let size = base + usize::from(i < extra);
            let range = start..start + size;
            start += size;
            range
        })
        .collect()
}

fn run_partitioned<R, F>(
    policy: &ExecutionPolicy,
    stage: &str,
    len: usize,
    work: F,
) -> Result<Vec<R>>
where
    R: Send,
    F: Fn(Range<usize>) -> R + Sync,
{
    policy.validate()?;
    let ranges = partitions(len, policy.concurrency_degree());
    debug!(stage, len, partitions = ranges.len(), "running data-parallel pattern");

    thread::scope(|scope| {
        let work = &work;
        let mut failure = None;
        let mut handles = Vec::with_capacity(ranges.len());
        for (i, range) in ranges.into_iter().enumerate() {
            let spawned = thread::Builder::new()
                .name(format!("{}/{}", stage, i))
                .spawn_scoped(scope, move || work(range));
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(source) => {
                    failure = Some(PatternError::Spawn {
                        stage: stage.to_string(),
                        source,
                    });
                    break;
                }
            }
        }

        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.join() {
                Ok(result) => results.push(result),
                Err(payload) => {
                    if failure.is_none() {
                        failure = Some(PatternError::CallablePanicked {
                            stage: stage.to_string(),
                            message: panic_message(payload),
                        });
                    }
                }
            }
        }
        match failure {
            Some(error) => Err(error),
            None => Ok(results),
        }
    })
}

/// Apply `transform` to every element, keeping positions
pub fn map<T, U, F>(policy: &ExecutionPolicy, input: &[T], transform: F) -> Result<Vec<U>>
where
    T: Sync,
    U: Send,
    F: Fn(&T) -> U + Sync,
{
    let chunks = run_partitioned(policy, "map", input.len(), |range| {
        input[range].iter().map(&transform).collect::<Vec<_>>()
    })?;
    Ok(chunks.into_iter().flatten().collect())
}

/// Apply `transform` to pairs of elements at the same position.
///
/// Both slices must have the same length. More than two inputs can be zipped
/// by passing a slice of tuples as either side.
pub fn map_zip<A, B, U, F>(
    policy: &ExecutionPolicy,
    left: &[A],
    right: &[B],
    transform: F,
) -> Result<Vec<U>>
where
    A: Sync,
    B: Sync,
    U: Send,
    F: Fn(&A, &B) -> U + Sync,
{
    if left.len() != right.len() {
        return Err(PatternError::ConfigError(format!(
            "zipped sequences differ in length: {} and {}",
            left.len(),
            right.len()
        )));
    }
    let chunks = run_partitioned(policy, "map_zip", left.len(), |range| {
        left[range.clone()]
            .iter()
            .zip(&right[range])
            .map(|(a, b)| transform(a, b))
            .collect::<Vec<_>>()
    })?;
    Ok(chunks.into_iter().flatten().collect())
}

/// Combine every element with `combine`, starting each partition from
/// `identity`.
///
/// Partial results are combined left to right in partition order, so the
/// result is deterministic for a given degree. It is independent of the
/// degree only if `combine` is associative and `identity` is neutral.
pub fn reduce<T, C>(policy: &ExecutionPolicy, input: &[T], identity: T, combine: C) -> Result<T>
where
    T: Clone + Send + Sync,
    C: Fn(T, T) -> T + Sync,
{
    let partials = run_partitioned(policy, "reduce", input.len(), |range| {
        input[range].iter().cloned().fold(identity.clone(), &combine)
    })?;
    Ok(partials.into_iter().fold(identity, &combine))
}

/// Map every element with `transform`, then reduce the mapped values
pub fn map_reduce<T, R, F, C>(
    policy: &ExecutionPolicy,
    input: &[T],
    identity: R,
    transform: F,
    combine: C,
) -> Result<R>
where
    T: Sync,
    R: Clone + Send + Sync,
    F: Fn(&T) -> R + Sync,
    C: Fn(R, R) -> R + Sync,
{
    let mapped = map(policy, input, transform)?;
    reduce(policy, &mapped, identity, combine)
}

/// Map pairs of elements at the same position with `transform`, then reduce
/// the mapped values.
///
/// Both slices must have the same length.
pub fn map_zip_reduce<A, B, R, F, C>(
    policy: &ExecutionPolicy,
    left: &[A],
    right: &[B],
    identity: R,
    transform: F,
    combine: C,
) -> Result<R>
where
    A: Sync,
    B: Sync,
    R: Clone + Send + Sync,
    F: Fn(&A, &B) -> R + Sync,
    C: Fn(R, R) -> R + Sync,
{
    let mapped = map_zip(policy, left, right, transform)?;
    reduce(policy, &mapped, identity, combine)
}

/// Compute each output from its element and a neighbourhood of the input.
///
/// `neighbourhood(input, i)` collects whatever context element `i` needs;
/// `op` combines the element with it.
pub fn stencil<T, U, N, F, G>(
    policy: &ExecutionPolicy,
    input: &[T],
    op: F,
    neighbourhood: G,
) -> Result<Vec<U>>
where
    T: Sync,
    U: Send,
    F: Fn(&T, N) -> U + Sync,
    G: Fn(&[T], usize) -> N + Sync,
{
    let chunks = run_partitioned(policy, "stencil", input.len(), |range| {
        range
            .map(|i| op(&input[i], neighbourhood(input, i)))
            .collect::<Vec<_>>()
    })?;
    Ok(chunks.into_iter().flatten().collect())
}
