// Copyright 2024 - 2025 Wenmeng See the COPYRIGHT
// file at the top-level directory of this distribution.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.
//
// Author: tickbh
// -----
// Created Date: 2024/03/14 08:47:31

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use crate::field::StreamIdentifier;
use crate::table::Entry;

/// The dynamic-table references one emitted header block holds. Every
/// `add` pins the entry once; the pins release when the usage drops,
/// whether by acknowledgment, cancellation or an abandoned encode.
pub struct BlockUsage {
    refs: Vec<Arc<Entry>>,
    largest: u64,
    smallest: u64,
}

impl BlockUsage {
    pub fn new() -> BlockUsage {
        BlockUsage {
            refs: Vec::new(),
            largest: 0,
            smallest: 0,
        }
    }

    pub fn add(&mut self, entry: &Arc<Entry>) {
        entry.acquire();
        if self.largest < entry.base() {
            self.largest = entry.base();
        }
        if self.smallest == 0 || self.smallest > entry.base() {
            self.smallest = entry.base();
        }
        self.refs.push(entry.clone());
    }

    /// 该头块引用的最大插入序号, 无引用时为0
    pub fn largest(&self) -> u64 {
        self.largest
    }

    pub fn smallest(&self) -> u64 {
        self.smallest
    }

    pub fn is_empty(&self) -> bool {
        self.refs.is_empty()
    }
}

impl Drop for BlockUsage {
    fn drop(&mut self) {
        for entry in &self.refs {
            entry.release();
        }
    }
}

/// Per-stream bookkeeping of outstanding header blocks. Blocks on one
/// stream acknowledge in emission order, so each stream keeps an
/// ordered queue of usages.
pub struct UsageTracker {
    streams: HashMap<StreamIdentifier, VecDeque<BlockUsage>>,
}

impl UsageTracker {
    pub fn new() -> UsageTracker {
        UsageTracker {
            streams: HashMap::new(),
        }
    }

    /// Appends a finished usage for the stream. Usages without any
    /// dynamic reference never produce an acknowledgment, so they are
    /// dropped here instead of queued.
    pub fn commit_block(&mut self, stream: StreamIdentifier, usage: BlockUsage) {
        if usage.is_empty() {
            return;
        }
        self.streams.entry(stream).or_default().push_back(usage);
    }

    /// Drops the oldest usage for the stream. Returns the largest
    /// base it referenced, plus whether this ack un-blocked the
    /// stream against `ack_base`; acknowledging a stream with nothing
    /// outstanding is a no-op.
    pub fn ack_block(&mut self, stream: StreamIdentifier, ack_base: u64) -> (Option<u64>, bool) {
        let usages = match self.streams.get_mut(&stream) {
            Some(usages) => usages,
            None => return (None, false),
        };
        let popped = match usages.pop_front() {
            Some(usage) => usage,
            None => return (None, false),
        };
        if usages.is_empty() {
            self.streams.remove(&stream);
        }
        let was_blocking = popped.largest() > ack_base;
        let unblocked = was_blocking && self.max(stream) <= ack_base;
        (Some(popped.largest()), unblocked)
    }

    /// 流被取消时丢弃其全部引用
    pub fn cancel_stream(&mut self, stream: StreamIdentifier) -> bool {
        self.streams.remove(&stream).is_some()
    }

    /// Largest insertion base referenced across the stream's
    /// outstanding usages, 0 if none.
    pub fn max(&self, stream: StreamIdentifier) -> u64 {
        self.streams
            .get(&stream)
            .map(|usages| usages.iter().map(|u| u.largest()).max().unwrap_or(0))
            .unwrap_or(0)
    }

    /// Streams still waiting on inserts the decoder has not
    /// acknowledged past `ack_base`.
    pub fn count_blocked_streams(&self, ack_base: u64) -> usize {
        self.streams
            .values()
            .filter(|usages| usages.iter().any(|u| u.largest() > ack_base))
            .count()
    }

    pub fn can_evict(entry: &Arc<Entry>) -> bool {
        !entry.is_used()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::DynamicTable;

    fn table_with(count: usize) -> DynamicTable {
        let mut table = DynamicTable::new(4096);
        for idx in 0..count {
            table
                .insert(format!("name{}", idx).into_bytes(), b"value".to_vec())
                .unwrap();
        }
        table
    }

    #[test]
    fn test_usage_pins_entries() {
        let table = table_with(2);
        let entry = table.by_base(1).unwrap();
        let mut usage = BlockUsage::new();
        usage.add(entry);
        usage.add(entry);
        assert!(entry.is_used());
        assert!(!UsageTracker::can_evict(entry));
        drop(usage);
        assert!(UsageTracker::can_evict(entry));
    }

    #[test]
    fn test_ack_pops_oldest() {
        let table = table_with(3);
        let mut tracker = UsageTracker::new();
        let stream = StreamIdentifier(4);
        for base in 1..=3 {
            let mut usage = BlockUsage::new();
            usage.add(table.by_base(base).unwrap());
            tracker.commit_block(stream, usage);
        }
        assert_eq!(tracker.max(stream), 3);
        assert_eq!(tracker.ack_block(stream, 0), (Some(1), false));
        assert_eq!(tracker.max(stream), 3);
        assert_eq!(tracker.ack_block(stream, 3), (Some(2), false));
        // 最后一块确认后流不再阻塞
        assert_eq!(tracker.ack_block(stream, 2), (Some(3), true));
        assert_eq!(tracker.ack_block(stream, 2), (None, false));
        assert!(!table.by_base(1).unwrap().is_used());
    }

    #[test]
    fn test_empty_usage_not_queued() {
        let mut tracker = UsageTracker::new();
        let stream = StreamIdentifier(8);
        tracker.commit_block(stream, BlockUsage::new());
        assert_eq!(tracker.max(stream), 0);
        assert_eq!(tracker.ack_block(stream, 0), (None, false));
    }

    #[test]
    fn test_cancel_stream_releases() {
        let table = table_with(1);
        let mut tracker = UsageTracker::new();
        let stream = StreamIdentifier(0);
        let mut usage = BlockUsage::new();
        usage.add(table.by_base(1).unwrap());
        tracker.commit_block(stream, usage);
        assert!(table.by_base(1).unwrap().is_used());
        assert!(tracker.cancel_stream(stream));
        assert!(!tracker.cancel_stream(stream));
        assert!(!table.by_base(1).unwrap().is_used());
    }

    #[test]
    fn test_count_blocked_streams() {
        let table = table_with(4);
        let mut tracker = UsageTracker::new();
        for (sid, base) in [(1u64, 2u64), (5, 4)] {
            let mut usage = BlockUsage::new();
            usage.add(table.by_base(base).unwrap());
            tracker.commit_block(StreamIdentifier(sid), usage);
        }
        assert_eq!(tracker.count_blocked_streams(0), 2);
        assert_eq!(tracker.count_blocked_streams(2), 1);
        assert_eq!(tracker.count_blocked_streams(4), 0);
    }
}
