use crate::error::{PatternError, Result};
use crate::tagged::{Tag, TaggedItem};
use std::collections::BTreeMap;

/// Outcome of feeding one item into a [`ReorderBuffer`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accepted {
    /// The item was stored and may now be released by `next_ready`
    Buffered,
    /// The end-of-stream sentinel was received
    Terminal,
}

/// Restores tag order for a single consumer.
///
/// Replicated workers race on a shared input queue, so their results arrive
/// out of order. Items are parked by tag until every earlier position has been
/// released; holes advance the expected tag without producing a value.
#[derive(Debug)]
pub struct ReorderBuffer<T> {
    pending: BTreeMap<u64, Option<T>>,
    expected: u64,
    terminated: bool,
    high_water: usize,
}

impl<T> ReorderBuffer<T> {
    /// Create an empty buffer expecting tag 0
    pub fn new() -> Self {
        Self {
            pending: BTreeMap::new(),
            expected: 0,
            terminated: false,
            high_water: 0,
        }
    }

    /// Store an item.
    ///
    /// Returns an error if the tag was already released or is already
    /// pending, which means some stage reused a tag.
    pub fn accept(&mut self, item: TaggedItem<T>) -> Result<Accepted> {
        let (tag, payload) = item.into_parts();
        let seq = match tag {
            Tag::Terminal => {
                self.terminated = true;
                return Ok(Accepted::Terminal);
            }
            Tag::Seq(seq) => seq,
        };
        if seq < self.expected || self.pending.contains_key(&seq) {
            return Err(PatternError::ProtocolViolation(format!(
                "tag {} delivered twice (next expected {})",
                seq, self.expected
            )));
        }
        self.pending.insert(seq, payload);
        self.high_water = self.high_water.max(self.pending.len());
        Ok(Accepted::Buffered)
    }

    /// Release the next value in tag order, if it is available.
    ///
    /// Holes at the expected position are skipped, so one call may advance
    /// past several positions.
    pub fn next_ready(&mut self) -> Option<T> {
        while let Some(payload) = self.pending.remove(&self.expected) {
            self.expected += 1;
            if payload.is_some() {
                return payload;
            }
        }
        None
    }

    /// Check that everything was released after the sentinel.
    ///
    /// Call after draining `next_ready`. Leftover entries mean a position
    /// never arrived.
    pub fn finish(&self) -> Result<()> {
        if !self.terminated {
            return Err(PatternError::ProtocolViolation(
                "reorder buffer finished before the end of stream".into(),
            ));
        }
        if let Some(first) = self.pending.keys().next() {
            return Err(PatternError::ProtocolViolation(format!(
                "{} items left undrained, waiting for tag {} but holding {}",
                self.pending.len(),
                self.expected,
                first
            )));
        }
        Ok(())
    }

    /// Next tag due for release
    pub fn expected(&self) -> u64 {
        self.expected
    }

    /// Number of parked items
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Largest number of items parked at once
    pub fn high_water(&self) -> usize {
        self.high_water
    }
}

impl<T> Default for ReorderBuffer<T> {
    fn default() -> Self {
        Self::new()
    }
}
