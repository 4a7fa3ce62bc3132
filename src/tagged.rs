/// Position of an item in the generated stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tag {
    /// Sequence number assigned by the generator, starting at 0
    Seq(u64),
    /// End of stream
    Terminal,
}

impl Tag {
    /// Sequence number, or `None` for the terminal tag
    pub fn seq(self) -> Option<u64> {
        match self {
            Tag::Seq(seq) => Some(seq),
            Tag::Terminal => None,
        }
    }
}

/// The unit transported between stages.
///
/// A missing payload means either a hole (the item was filtered out, its tag
/// is still a sequence number) or the end-of-stream sentinel. Fields are
/// private so a sentinel can never carry a payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaggedItem<T> {
    payload: Option<T>,
    tag: Tag,
}

impl<T> TaggedItem<T> {
    /// A present value at position `seq`
    pub fn value(seq: u64, payload: T) -> Self {
        Self {
            payload: Some(payload),
            tag: Tag::Seq(seq),
        }
    }

    /// A filtered-out position
    pub fn hole(seq: u64) -> Self {
        Self {
            payload: None,
            tag: Tag::Seq(seq),
        }
    }

    /// The end-of-stream sentinel
    pub fn terminal() -> Self {
        Self {
            payload: None,
            tag: Tag::Terminal,
        }
    }

    /// Get the item's position in the stream
    pub fn tag(&self) -> Tag {
        self.tag
    }

    /// Get the payload, `None` for holes and the sentinel
    pub fn payload(&self) -> Option<&T> {
        self.payload.as_ref()
    }

    /// Check whether this is the end-of-stream sentinel
    pub fn is_sentinel(&self) -> bool {
        self.tag == Tag::Terminal
    }

    /// Check whether this is a filtered-out position
    pub fn is_hole(&self) -> bool {
        self.payload.is_none() && self.tag != Tag::Terminal
    }

    /// Split into tag and payload
    pub fn into_parts(self) -> (Tag, Option<T>) {
        (self.tag, self.payload)
    }
}
