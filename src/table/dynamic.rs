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
// Created Date: 2024/03/13 10:21:44

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use crate::field::ENTRY_OVERHEAD;
use crate::{QpackError, QpackResult};

/// One resident dynamic-table entry. The insertion base is stored
/// inline so nothing needs a back-pointer to the owning table, and
/// the reference counter lets the eviction interlock stay O(1).
pub struct Entry {
    name: Vec<u8>,
    value: Vec<u8>,
    base: u64,
    size: usize,
    refs: AtomicUsize,
}

impl Entry {
    fn new(name: Vec<u8>, value: Vec<u8>, base: u64) -> Entry {
        let size = ENTRY_OVERHEAD + name.len() + value.len();
        Entry {
            name,
            value,
            base,
            size,
            refs: AtomicUsize::new(0),
        }
    }

    pub fn name(&self) -> &[u8] {
        &self.name
    }

    pub fn value(&self) -> &[u8] {
        &self.value
    }

    /// 插入序号, 从1开始单调递增
    pub fn base(&self) -> u64 {
        self.base
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_used(&self) -> bool {
        self.refs.load(Ordering::SeqCst) > 0
    }

    pub(crate) fn acquire(&self) {
        self.refs.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn release(&self) {
        self.refs.fetch_sub(1, Ordering::SeqCst);
    }
}

/// The dynamic insertion table. Entries append at the back and evict
/// strictly from the front; `inserts` counts every successful insert
/// since construction and never decreases.
pub struct DynamicTable {
    table: VecDeque<Arc<Entry>>,
    used: usize,
    capacity: usize,
    margin: usize,
    inserts: u64,
}

impl DynamicTable {
    pub fn new(capacity: usize) -> DynamicTable {
        DynamicTable {
            table: VecDeque::new(),
            used: 0,
            capacity,
            margin: capacity,
            inserts: 0,
        }
    }

    /// 当前占用的字节数
    pub fn used(&self) -> usize {
        self.used
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn margin(&self) -> usize {
        self.margin
    }

    pub fn set_margin(&mut self, margin: usize) {
        self.margin = margin;
    }

    /// 已插入的总条数, 亦即最新表项的插入序号
    pub fn inserts(&self) -> u64 {
        self.inserts
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Entry with insertion base `base`, if still resident.
    pub fn by_base(&self, base: u64) -> Option<&Arc<Entry>> {
        if base == 0 || base > self.inserts {
            return None;
        }
        let back = self.inserts - base;
        if back >= self.table.len() as u64 {
            return None;
        }
        self.table.get(self.table.len() - 1 - back as usize)
    }

    pub fn get_dynamic(&self, relative: u64, block_base: u64) -> Option<Arc<Entry>> {
        let base = block_base.checked_sub(relative)?;
        self.by_base(base).cloned()
    }

    pub fn get_post_base(&self, post_base: u64, block_base: u64) -> Option<Arc<Entry>> {
        let base = block_base.checked_add(post_base)?.checked_add(1)?;
        self.by_base(base).cloned()
    }

    /// Unguarded insert, the control-stream side. An entry larger
    /// than the whole table flushes every resident entry and fails
    /// with overflow; otherwise the oldest entries make room.
    pub fn insert(&mut self, name: Vec<u8>, value: Vec<u8>) -> QpackResult<Arc<Entry>> {
        let size = ENTRY_OVERHEAD + name.len() + value.len();
        if size > self.capacity {
            self.table.clear();
            self.used = 0;
            return Err(QpackError::TableOverflow);
        }
        while self.used + size > self.capacity {
            let evict = self.table.pop_front().map(|e| e.size()).unwrap_or(0);
            self.used -= evict;
        }
        self.inserts += 1;
        let entry = Arc::new(Entry::new(name, value, self.inserts));
        log::trace!(
            "QPACK: 动态表插入 base={} size={} used={}",
            self.inserts,
            size,
            self.used + size
        );
        self.used += size;
        self.table.push_back(entry.clone());
        Ok(entry)
    }

    /// Interlocked insert, the encoder side: refuses to evict any
    /// entry still referenced by an outstanding header block and
    /// leaves the table untouched in that case.
    pub fn insert_guarded(&mut self, name: Vec<u8>, value: Vec<u8>) -> Option<Arc<Entry>> {
        let size = ENTRY_OVERHEAD + name.len() + value.len();
        if size > self.capacity {
            return None;
        }
        let count = self.evictable_for(self.capacity - size)?;
        for _ in 0..count {
            let evict = self.table.pop_front().map(|e| e.size()).unwrap_or(0);
            self.used -= evict;
        }
        self.inserts += 1;
        self.used += size;
        let entry = Arc::new(Entry::new(name, value, self.inserts));
        self.table.push_back(entry.clone());
        Some(entry)
    }

    /// How many front entries must go so that `used` fits in
    /// `target`; `None` when a pinned entry stands in the way.
    fn evictable_for(&self, target: usize) -> Option<usize> {
        let mut used = self.used;
        let mut count = 0;
        for entry in self.table.iter() {
            if used <= target {
                break;
            }
            if entry.is_used() {
                return None;
            }
            used -= entry.size();
            count += 1;
        }
        if used <= target {
            Some(count)
        } else {
            None
        }
    }

    /// Shrinks or grows the byte budget, evicting as needed. Fails
    /// without touching anything if eviction would hit an entry in
    /// use.
    pub fn set_capacity(&mut self, capacity: usize) -> bool {
        match self.evictable_for(capacity) {
            Some(count) => {
                for _ in 0..count {
                    let evict = self.table.pop_front().map(|e| e.size()).unwrap_or(0);
                    self.used -= evict;
                }
                self.capacity = capacity;
                true
            }
            None => false,
        }
    }

    /// Best referenceable match bounded by `max_base`: an exact
    /// match, else the newest name-only match, both restricted to
    /// entries within the newest `margin` bytes.
    pub fn lookup_referenceable(
        &self,
        name: &[u8],
        value: &[u8],
        max_base: u64,
    ) -> (Option<Arc<Entry>>, Option<Arc<Entry>>) {
        let budget = self.margin.min(self.capacity);
        let mut acc = 0;
        let mut name_match = None;
        for entry in self.table.iter().rev() {
            acc += entry.size();
            if acc > budget {
                break;
            }
            if entry.base() > max_base || entry.name() != name {
                continue;
            }
            if entry.value() == value {
                return (Some(entry.clone()), name_match);
            }
            if name_match.is_none() {
                name_match = Some(entry.clone());
            }
        }
        (None, name_match)
    }

    /// Fallback lookup once the referenceable region came up empty:
    /// an exact match *outside* the region (a duplication candidate)
    /// plus a name-only match anywhere in the table.
    pub fn lookup_extra(
        &self,
        name: &[u8],
        value: &[u8],
        max_base: u64,
    ) -> (Option<Arc<Entry>>, Option<Arc<Entry>>) {
        let budget = self.margin.min(self.capacity);
        let mut acc = 0;
        let mut duplicate = None;
        let mut name_match = None;
        for entry in self.table.iter().rev() {
            acc += entry.size();
            if entry.name() != name {
                continue;
            }
            if name_match.is_none() {
                name_match = Some(entry.clone());
            }
            if acc > budget && entry.base() <= max_base && entry.value() == value {
                duplicate = Some(entry.clone());
                break;
            }
        }
        (duplicate, name_match)
    }
}

/// The decoder's view of the table: one mutex for every touch, one
/// condition variable publishing the insert counter so header blocks
/// can sleep until the entry they commit to exists.
pub struct SharedTable {
    inner: Mutex<DynamicTable>,
    waken: Condvar,
}

impl SharedTable {
    pub fn new(capacity: usize) -> SharedTable {
        SharedTable {
            inner: Mutex::new(DynamicTable::new(capacity)),
            waken: Condvar::new(),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, DynamicTable> {
        self.inner.lock().unwrap()
    }

    /// 表内容变化后唤醒所有等待的头块
    pub fn notify(&self) {
        self.waken.notify_all();
    }

    /// Blocks the caller until at least `base` inserts have been
    /// applied, returning the lock so decoding proceeds against a
    /// table that can no longer lose the awaited entry.
    pub fn wait_for_entry(&self, base: u64) -> MutexGuard<'_, DynamicTable> {
        let mut table = self.inner.lock().unwrap();
        while table.inserts() < base {
            table = self.waken.wait(table).unwrap();
        }
        table
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled(capacity: usize) -> DynamicTable {
        let mut table = DynamicTable::new(capacity);
        table.insert(b"name1".to_vec(), b"value1".to_vec()).unwrap();
        table.insert(b"name2".to_vec(), b"value2".to_vec()).unwrap();
        table
    }

    #[test]
    fn test_insert_accounting() {
        let table = filled(256);
        assert_eq!(table.used(), 86);
        assert_eq!(table.inserts(), 2);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_insert_evicts_oldest() {
        let mut table = filled(86);
        table.insert(b"name3".to_vec(), b"value3".to_vec()).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.inserts(), 3);
        assert!(table.by_base(1).is_none());
        assert_eq!(table.by_base(2).unwrap().name(), b"name2");
    }

    #[test]
    fn test_insert_overflow_clears() {
        let mut table = filled(100);
        let huge = vec![b'x'; 100];
        match table.insert(b"big".to_vec(), huge) {
            Err(QpackError::TableOverflow) => {}
            other => panic!("expect overflow, got {:?}", other.map(|_| ())),
        }
        assert_eq!(table.len(), 0);
        assert_eq!(table.used(), 0);
        // 失败的插入不计数
        assert_eq!(table.inserts(), 2);
    }

    #[test]
    fn test_addressing() {
        let table = filled(256);
        // block base 2: name1的相对索引为1
        assert_eq!(table.get_dynamic(1, 2).unwrap().name(), b"name1");
        assert_eq!(table.get_dynamic(0, 2).unwrap().name(), b"name2");
        assert!(table.get_dynamic(2, 2).is_none());
        // block base 1: name2的后基索引为0
        assert_eq!(table.get_post_base(0, 1).unwrap().name(), b"name2");
        assert!(table.get_post_base(1, 1).is_none());
    }

    #[test]
    fn test_set_capacity_evicts() {
        let mut table = filled(256);
        assert!(table.set_capacity(50));
        assert_eq!(table.len(), 1);
        assert_eq!(table.used(), 43);
        assert!(table.set_capacity(0));
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn test_set_capacity_interlock() {
        let mut table = filled(256);
        let pinned = table.by_base(1).unwrap().clone();
        pinned.acquire();
        assert!(!table.set_capacity(50));
        assert_eq!(table.len(), 2);
        assert_eq!(table.capacity(), 256);
        pinned.release();
        assert!(table.set_capacity(50));
    }

    #[test]
    fn test_insert_guarded_interlock() {
        let mut table = filled(86);
        let pinned = table.by_base(1).unwrap().clone();
        pinned.acquire();
        assert!(table
            .insert_guarded(b"name3".to_vec(), b"value3".to_vec())
            .is_none());
        assert_eq!(table.inserts(), 2);
        assert_eq!(table.used(), 86);
        pinned.release();
        assert!(table
            .insert_guarded(b"name3".to_vec(), b"value3".to_vec())
            .is_some());
        assert_eq!(table.inserts(), 3);
    }

    #[test]
    fn test_lookup_referenceable_margin() {
        let mut table = DynamicTable::new(200);
        table.set_margin(100);
        table.insert(b"name1".to_vec(), b"value1".to_vec()).unwrap();
        table.insert(b"name2".to_vec(), b"value2".to_vec()).unwrap();
        table.insert(b"name0".to_vec(), b"value0".to_vec()).unwrap();
        // name1累计129字节, 已在可引用区之外
        let (exact, _) = table.lookup_referenceable(b"name1", b"value1", u64::MAX);
        assert!(exact.is_none());
        let (exact, _) = table.lookup_referenceable(b"name2", b"value2", u64::MAX);
        assert_eq!(exact.unwrap().base(), 2);
        // 可引用区之外的精确匹配可以拿来复制
        let (dup, name) = table.lookup_extra(b"name1", b"value1", u64::MAX);
        assert_eq!(dup.unwrap().base(), 1);
        assert_eq!(name.unwrap().base(), 1);
    }

    #[test]
    fn test_lookup_max_base_bound() {
        let table = filled(256);
        let (exact, name) = table.lookup_referenceable(b"name2", b"value2", 1);
        assert!(exact.is_none());
        assert!(name.is_none());
        let (exact, _) = table.lookup_referenceable(b"name1", b"value1", 1);
        assert_eq!(exact.unwrap().base(), 1);
    }

    #[test]
    fn test_lookup_name_only() {
        let table = filled(256);
        let (exact, name) = table.lookup_referenceable(b"name1", b"value9", u64::MAX);
        assert!(exact.is_none());
        assert_eq!(name.unwrap().base(), 1);
    }
}
