use crate::error::Result;
use crate::pipeline::{filter, pipeline};
use crate::policy::ExecutionPolicy;

/// Stream filter keeping the items that satisfy `predicate`.
///
/// `policy.concurrency_degree()` workers evaluate the predicate; rejected
/// items leave holes that the consumer skips. When the policy is ordered the
/// consumer receives the survivors in generation order.
pub fn keep<T, G, P, C>(policy: &ExecutionPolicy, generator: G, predicate: P, consume: C) -> Result<()>
where
    T: Send + 'static,
    G: FnMut() -> Option<T> + Send + 'static,
    P: Fn(&T) -> bool + Send + Sync + 'static,
    C: FnMut(T),
{
    keep_named("keep", policy, generator, predicate, consume)
}

fn keep_named<T, G, P, C>(
    name: &str,
    policy: &ExecutionPolicy,
    generator: G,
    predicate: P,
    consume: C,
) -> Result<()>
where
    T: Send + 'static,
    G: FnMut() -> Option<T> + Send + 'static,
    P: Fn(&T) -> bool + Send + Sync + 'static,
    C: FnMut(T),
{
    // Workers only tag; the single consumer does the reordering
    let mut workers = policy.clone();
    workers.disable_ordering();
    pipeline(policy, generator)
        .keep(filter(&workers, predicate).named(name))
        .run(consume)
        .map(|_| ())
}

/// Stream filter dropping the items that satisfy `predicate`.
///
/// Same as [`keep`] with the predicate negated.
pub fn discard<T, G, P, C>(
    policy: &ExecutionPolicy,
    generator: G,
    predicate: P,
    consume: C,
) -> Result<()>
where
    T: Send + 'static,
    G: FnMut() -> Option<T> + Send + 'static,
    P: Fn(&T) -> bool + Send + Sync + 'static,
    C: FnMut(T),
{
    keep_named(
        "discard",
        policy,
        generator,
        move |item: &T| !predicate(item),
        consume,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PatternError;

    fn numbers(limit: u32) -> impl FnMut() -> Option<u32> + Send + 'static {
        let mut next = 0;
        move || {
            next += 1;
            (next <= limit).then_some(next)
        }
    }

    #[test]
    fn test_keep_even_ordered() {
        let policy = ExecutionPolicy::new(3, true);
        let mut out = Vec::new();
        keep(&policy, numbers(10), |x| x % 2 == 0, |x| out.push(x)).unwrap();
        assert_eq!(out, vec![2, 4, 6, 8, 10]);
    }

    #[test]
    fn test_discard_even_ordered() {
        let policy = ExecutionPolicy::new(4, true);
        let mut out = Vec::new();
        discard(&policy, numbers(10), |x| x % 2 == 0, |x| out.push(x)).unwrap();
        assert_eq!(out, vec![1, 3, 5, 7, 9]);
    }

    #[test]
    fn test_keep_nothing() {
        let policy = ExecutionPolicy::new(2, true);
        let mut out = Vec::new();
        keep(&policy, numbers(50), |_| false, |x| out.push(x)).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_discard_panic_names_discard_stage() {
        let policy = ExecutionPolicy::new(3, true);
        let result = discard(
            &policy,
            numbers(100),
            |x| {
                if *x == 50 {
                    panic!("{}", std::thread::current().name().unwrap_or("unnamed"));
                }
                x % 2 == 0
            },
            |_| {},
        );
        match result {
            Err(PatternError::CallablePanicked { stage, message }) => {
                assert_eq!(stage, "discard");
                assert!(message.starts_with("discard/"), "thread = {}", message);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_keep_rejects_zero_degree() {
        let policy = ExecutionPolicy::new(0, true);
        let result = keep(&policy, numbers(3), |_| true, |_| {});
        assert!(matches!(result, Err(PatternError::InvalidConcurrency(0))));
    }
}
