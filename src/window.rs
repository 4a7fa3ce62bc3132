//! Count-based windows over a stream.
//!
//! A window stage runs on one worker. It gathers `size` consecutive values,
//! emits them as a `Vec`, then advances by `slide` values. `slide == size`
//! gives tumbling windows, `slide < size` overlapping (sliding) ones and
//! `slide > size` hopping ones that skip values between windows. Values left
//! over when the stream ends never fill a window and are dropped.

use crate::buffer::Queue;
use crate::error::{PatternError, Result};
use crate::lifecycle::Invocation;
use crate::metrics::StageMetrics;
use crate::reorder::{Accepted, ReorderBuffer};
use crate::stage::StageSpec;
use crate::tagged::{Tag, TaggedItem};
use std::collections::VecDeque;
use tracing::{debug, trace};

/// Window state: the values gathered so far
#[derive(Debug, Clone)]
pub struct CountWindow<T> {
    size: usize,
    slide: usize,
    items: VecDeque<T>,
    /// Values still to skip before the next window starts
    skip: usize,
}

impl<T: Clone> CountWindow<T> {
    /// Create a window of `size` values advancing by `slide`.
    ///
    /// Both must be at least 1.
    pub fn new(size: usize, slide: usize) -> Result<Self> {
        if size == 0 || slide == 0 {
            return Err(PatternError::ConfigError(format!(
                "window size and slide must be at least 1 (size {}, slide {})",
                size, slide
            )));
        }
        Ok(Self {
            size,
            slide,
            items: VecDeque::with_capacity(size),
            skip: 0,
        })
    }

    /// Add a value, returning a window once `size` values are gathered
    pub fn push(&mut self, value: T) -> Option<Vec<T>> {
        if self.skip > 0 {
            self.skip -= 1;
            return None;
        }
        self.items.push_back(value);
        if self.items.len() < self.size {
            return None;
        }

        let window: Vec<T> = self.items.iter().cloned().collect();
        if self.slide >= self.size {
            self.items.clear();
            self.skip = self.slide - self.size;
        } else {
            self.items.drain(..self.slide);
        }
        Some(window)
    }

    /// Number of values gathered towards the next window
    pub fn pending(&self) -> usize {
        self.items.len()
    }

    /// Get the number of values per window
    pub fn size(&self) -> usize {
        self.size
    }

    /// Get the number of values the window advances by
    pub fn slide(&self) -> usize {
        self.slide
    }
}

/// Feed one value to the window and forward a completed window downstream
fn feed<T: Clone + Send>(
    window: &mut CountWindow<T>,
    value: T,
    output: &Queue<TaggedItem<Vec<T>>>,
    next: &mut u64,
) -> Result<()> {
    if let Some(items) = window.push(value) {
        output.push(TaggedItem::value(*next, items))?;
        *next += 1;
    }
    Ok(())
}

/// Turn the values of `input` into windows on `output`.
///
/// When `ordered`, values are windowed in tag order through a reorder buffer;
/// otherwise in arrival order. Holes are skipped. Windows are tagged densely
/// from 0 and followed by exactly one sentinel.
pub fn run_window<T: Clone + Send>(
    input: &Queue<TaggedItem<T>>,
    output: &Queue<TaggedItem<Vec<T>>>,
    mut window: CountWindow<T>,
    ordered: bool,
    metrics: &StageMetrics,
) -> Result<()> {
    let mut next = 0u64;
    if ordered {
        let mut reorder = ReorderBuffer::new();
        loop {
            let accepted = reorder.accept(input.pop()?)?;
            metrics.record_reorder_depth(reorder.pending());
            while let Some(value) = reorder.next_ready() {
                metrics.record_processed();
                feed(&mut window, value, output, &mut next)?;
            }
            if accepted == Accepted::Terminal {
                reorder.finish()?;
                break;
            }
        }
    } else {
        loop {
            match input.pop()?.into_parts() {
                (Tag::Terminal, _) => break,
                (Tag::Seq(_), Some(value)) => {
                    metrics.record_processed();
                    feed(&mut window, value, output, &mut next)?;
                }
                (Tag::Seq(_), None) => metrics.record_hole(),
            }
        }
    }

    trace!(windows = next, leftover = window.pending(), "window stage finished");
    output.push(TaggedItem::terminal())?;
    Ok(())
}

/// Spawn a window stage reading `input`, returning the queue of windows
pub(crate) fn launch_window<T>(
    invocation: &mut Invocation,
    input: Queue<TaggedItem<T>>,
    window: CountWindow<T>,
    spec: StageSpec,
) -> Queue<TaggedItem<Vec<T>>>
where
    T: Clone + Send + 'static,
{
    let output = invocation.make_queue(&spec.policy);
    let metrics = invocation.register_stage(&spec.name, 1, &output);
    debug!(
        stage = %spec.name,
        size = window.size(),
        slide = window.slide(),
        ordered = spec.ordered,
        "launching window stage"
    );

    let downstream = output.clone();
    let ordered = spec.ordered;
    invocation.spawn(&spec.name, format!("{}/0", spec.name), move || {
        run_window(&input, &downstream, window, ordered, &metrics)
    });
    output
}
