use std::collections::VecDeque;

use crate::message::{Message, MAX_PRIORITY};

use super::capped::CappedStore;

const BUCKET_COUNT: usize = MAX_PRIORITY as usize + 1;

/// One FIFO bucket per priority level. Removal drains priority 9 first.
#[derive(Debug)]
pub struct PriorityBuckets {
    buckets: [VecDeque<Message>; BUCKET_COUNT],
    len: usize,
}

impl Default for PriorityBuckets {
    fn default() -> Self {
        Self {
            buckets: std::array::from_fn(|_| VecDeque::new()),
            len: 0,
        }
    }
}

impl PriorityBuckets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pop_highest(&mut self) -> Option<Message> {
        let message = self
            .buckets
            .iter_mut()
            .rev()
            .find_map(|bucket| bucket.pop_front())?;
        self.len -= 1;
        Some(message)
    }

    /// Messages in delivery order, without removing them.
    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.buckets.iter().rev().flat_map(|bucket| bucket.iter())
    }
}

impl CappedStore for PriorityBuckets {
    type Item = Message;

    fn insert(&mut self, message: Message) {
        let priority = usize::from(message.priority.min(MAX_PRIORITY));
        self.buckets[priority].push_back(message);
        self.len += 1;
    }

    fn len(&self) -> usize {
        self.len
    }
}
