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
// Created Date: 2024/03/18 09:36:02

use std::collections::HashSet;
use std::io::{self, Read, Write};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::{Arc, Mutex, RwLock};

use algorithm::buf::{Binary, BinaryMut, Bt, BtMut};

use crate::acks::AckRecord;
use crate::bits::{read_int_io, BitWriter};
use crate::field::{HeaderField, StreamIdentifier};
use crate::huffman::HuffmanPreference;
use crate::inst::TableUpdate;
use crate::repr::{self, Repr};
use crate::table::{
    find_static, BlockUsage, DynamicTable, UsageTracker, DEFAULT_TABLE_CAPACITY,
};
use crate::{QpackError, QpackResult};

/// 待发送的控制流帧的积压上限, 超出则编码方阻塞
const UPDATE_QUEUE_DEPTH: usize = 16;

#[derive(Clone)]
pub struct EncoderConfig {
    capacity: usize,
    margin: usize,
    max_blocked_streams: usize,
    huffman: HuffmanPreference,
    acknowledge_immediately: bool,
    never_index: HashSet<Vec<u8>>,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        EncoderConfig {
            capacity: DEFAULT_TABLE_CAPACITY,
            margin: DEFAULT_TABLE_CAPACITY,
            max_blocked_streams: 100,
            huffman: HuffmanPreference::default(),
            acknowledge_immediately: false,
            never_index: HashSet::new(),
        }
    }
}

impl EncoderConfig {
    pub fn new() -> EncoderConfig {
        EncoderConfig::default()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity;
    }

    /// 可引用区的字节预算, 不可超过容量
    pub fn margin(&self) -> usize {
        self.margin
    }

    pub fn set_margin(&mut self, margin: usize) {
        self.margin = margin;
    }

    pub fn max_blocked_streams(&self) -> usize {
        self.max_blocked_streams
    }

    pub fn set_max_blocked_streams(&mut self, max: usize) {
        self.max_blocked_streams = max;
    }

    pub fn huffman(&self) -> HuffmanPreference {
        self.huffman
    }

    pub fn set_huffman(&mut self, pref: HuffmanPreference) {
        self.huffman = pref;
    }

    /// 测试用, 每次编码后立即视为解码方已确认
    pub fn set_acknowledge_immediately(&mut self, ack: bool) {
        self.acknowledge_immediately = ack;
    }

    /// Marks a name that must never enter the dynamic table.
    pub fn never_index<N: Into<Vec<u8>>>(&mut self, name: N) {
        self.never_index.insert(name.into());
    }

    pub fn is_never_index(&self, name: &[u8]) -> bool {
        self.never_index.contains(name)
    }
}

struct EncoderShared {
    table: DynamicTable,
    tracker: UsageTracker,
    /// 解码方已确认收到的最大插入序号
    acked: u64,
    /// 表状态同步记录累计覆盖到的插入序号
    synced: u64,
}

/// Per-field decision out of the planning pass; indexed dynamic
/// entries only need their base, the usage keeps them alive.
enum Plan {
    Static { index: u64 },
    Dynamic { base: u64 },
    LiteralStaticName { index: u64, value: Vec<u8>, sensitive: bool },
    LiteralDynamicName { base: u64, value: Vec<u8>, sensitive: bool },
    Literal { name: Vec<u8>, value: Vec<u8>, sensitive: bool },
}

/// The encoding half of the codec. One write-locked pass per header
/// block plans representations and emits table updates; the block
/// itself serializes under a read guard so the base cannot move while
/// other blocks keep encoding.
#[derive(Clone)]
pub struct Encoder {
    shared: Arc<RwLock<EncoderShared>>,
    config: Arc<EncoderConfig>,
    updates_tx: SyncSender<Binary>,
    updates_rx: Arc<Mutex<Receiver<Binary>>>,
}

impl Encoder {
    pub fn new() -> Encoder {
        Encoder::with_config(EncoderConfig::default())
    }

    pub fn with_config(config: EncoderConfig) -> Encoder {
        let mut table = DynamicTable::new(config.capacity);
        table.set_margin(config.margin);
        let (updates_tx, updates_rx) = sync_channel(UPDATE_QUEUE_DEPTH);
        Encoder {
            shared: Arc::new(RwLock::new(EncoderShared {
                table,
                tracker: UsageTracker::new(),
                acked: 0,
                synced: 0,
            })),
            config: Arc::new(config),
            updates_tx,
            updates_rx: Arc::new(Mutex::new(updates_rx)),
        }
    }

    /// Encodes one header list for the stream. Any table updates the
    /// plan produces are queued for the control stream before this
    /// returns, so a caller that flushes `poll_update` frames in
    /// order keeps the §ordering the decoder relies on.
    pub fn encode_block(
        &self,
        stream: StreamIdentifier,
        fields: Vec<HeaderField>,
    ) -> QpackResult<Binary> {
        let mut plans = Vec::with_capacity(fields.len());
        let mut updates = BinaryMut::new();
        let largest_base;
        let smallest_base;
        {
            let mut shared = self.shared.write().unwrap();
            let acked = shared.acked;
            let blocking = shared.tracker.max(stream) > acked;
            let restricted = !blocking
                && shared.tracker.count_blocked_streams(acked) >= self.config.max_blocked_streams;
            let max_base = if restricted { acked } else { u64::MAX };

            let mut usage = BlockUsage::new();
            for field in fields {
                let (mut name, value, flag) = field.into_parts();
                name.make_ascii_lowercase();

                if flag.is_sensitive() {
                    plans.push(match find_static(&name, &value) {
                        Some((index, _)) => Plan::LiteralStaticName {
                            index,
                            value,
                            sensitive: true,
                        },
                        None => Plan::Literal {
                            name,
                            value,
                            sensitive: true,
                        },
                    });
                    continue;
                }

                let static_hit = find_static(&name, &value);
                if let Some((index, true)) = static_hit {
                    plans.push(Plan::Static { index });
                    continue;
                }
                let static_name = static_hit.map(|(index, _)| index);

                let (exact, name_ref) =
                    shared.table.lookup_referenceable(&name, &value, max_base);
                if let Some(entry) = exact {
                    usage.add(&entry);
                    plans.push(Plan::Dynamic { base: entry.base() });
                    continue;
                }

                let mut interlocked = false;
                if !restricted {
                    let (duplicate, name_any) =
                        shared.table.lookup_extra(&name, &value, max_base);
                    if let Some(source) = duplicate {
                        let relative = shared.table.inserts() - source.base();
                        match shared
                            .table
                            .insert_guarded(source.name().to_vec(), source.value().to_vec())
                        {
                            Some(entry) => {
                                TableUpdate::Duplicate { relative }
                                    .encode(self.config.huffman, &mut updates);
                                usage.add(&entry);
                                plans.push(Plan::Dynamic { base: entry.base() });
                                continue;
                            }
                            None => interlocked = true,
                        }
                    }
                    let indexable = !flag.is_never_index() && !self.config.is_never_index(&name);
                    if !interlocked && indexable {
                        // 控制流上的名字引用即时生效, 不受可引用区限制
                        let name_hint = name_ref.as_ref().or(name_any.as_ref()).cloned();
                        match shared.table.insert_guarded(name.clone(), value.clone()) {
                            Some(entry) => {
                                let update = if let Some(index) = static_name {
                                    TableUpdate::InsertStaticName {
                                        index,
                                        value: value.clone(),
                                    }
                                } else if let Some(hint) = name_hint {
                                    TableUpdate::InsertDynamicName {
                                        // 新表项自己已计入插入数
                                        relative: shared.table.inserts() - 1 - hint.base(),
                                        value: value.clone(),
                                    }
                                } else {
                                    TableUpdate::InsertLiteral {
                                        name: name.clone(),
                                        value: value.clone(),
                                    }
                                };
                                update.encode(self.config.huffman, &mut updates);
                                usage.add(&entry);
                                plans.push(Plan::Dynamic { base: entry.base() });
                                continue;
                            }
                            None => {}
                        }
                    }
                }

                // interlock and an exhausted blocked budget both land
                // here: a literal, at most with a name reference
                if let Some(index) = static_name {
                    plans.push(Plan::LiteralStaticName {
                        index,
                        value,
                        sensitive: false,
                    });
                } else if let Some(entry) = name_ref {
                    usage.add(&entry);
                    plans.push(Plan::LiteralDynamicName {
                        base: entry.base(),
                        value,
                        sensitive: false,
                    });
                } else {
                    plans.push(Plan::Literal {
                        name,
                        value,
                        sensitive: false,
                    });
                }
            }

            largest_base = usage.largest();
            smallest_base = usage.smallest();
            if largest_base > 0 {
                shared.tracker.commit_block(stream, usage);
            }
            if self.config.acknowledge_immediately {
                let inserts = shared.table.inserts();
                shared.acked = shared.acked.max(inserts);
                shared.synced = shared.synced.max(inserts);
            }

            // the update frame leaves while the write guard is still
            // held: a later block's instructions must never overtake
            // the inserts its relative indices were computed against
            if updates.remaining() > 0 {
                let mut frame = BinaryMut::new();
                let mut writer = BitWriter::new();
                writer.put_int(updates.remaining() as u64, 8, &mut frame);
                frame.put_slice(updates.chunk());
                log::trace!("QPACK: 控制流输出帧 len={}", updates.remaining());
                self.updates_tx
                    .send(frame.freeze())
                    .map_err(|_| QpackError::Io(io::Error::from(io::ErrorKind::BrokenPipe)))?;
            }
        }

        let shared = self.shared.read().unwrap();
        let mut block = BinaryMut::new();
        let mut size = repr::encode_prefix(largest_base, &mut block);
        for plan in plans {
            let repr = match plan {
                Plan::Static { index } => Repr::IndexedStatic { index },
                Plan::Dynamic { base } => Repr::IndexedDynamic {
                    relative: largest_base - base,
                },
                Plan::LiteralStaticName {
                    index,
                    value,
                    sensitive,
                } => Repr::LiteralStaticName {
                    index,
                    value,
                    sensitive,
                },
                Plan::LiteralDynamicName {
                    base,
                    value,
                    sensitive,
                } => Repr::LiteralDynamicName {
                    relative: largest_base - base,
                    value,
                    sensitive,
                },
                Plan::Literal {
                    name,
                    value,
                    sensitive,
                } => Repr::Literal {
                    name,
                    value,
                    sensitive,
                },
            };
            size += repr.encode(self.config.huffman, &mut block);
        }
        log::trace!(
            "QPACK: 编码头块 stream={} bases={}..{} len={} inserts={}",
            stream,
            smallest_base,
            largest_base,
            size,
            shared.table.inserts()
        );
        drop(shared);
        Ok(block.freeze())
    }

    /// Next queued control-stream frame, if any.
    pub fn poll_update(&self) -> Option<Binary> {
        self.updates_rx.lock().unwrap().try_recv().ok()
    }

    /// Long-lived pump copying queued control-stream frames into the
    /// transport's update channel.
    pub fn drive_updates<W: Write>(&self, mut writer: W) -> QpackResult<()> {
        let updates = self.updates_rx.lock().unwrap();
        loop {
            match updates.recv() {
                Ok(frame) => {
                    writer.write_all(frame.chunk())?;
                    writer.flush()?;
                }
                Err(_) => return Ok(()),
            }
        }
    }

    /// Consumes acknowledgment records already sitting in a buffer.
    pub fn recv_acks<T: Bt>(&self, buffer: &mut T) -> QpackResult<()> {
        while buffer.has_remaining() {
            self.apply_ack(AckRecord::parse(buffer)?)?;
        }
        Ok(())
    }

    /// Long-lived pump reading the acknowledgment channel. Returns
    /// cleanly when the peer closes it, errors stay connection-fatal.
    pub fn drive_acks<R: Read>(&self, mut reader: R) -> QpackResult<()> {
        let mut lead = [0u8; 1];
        loop {
            match reader.read(&mut lead) {
                Ok(0) => return Ok(()),
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
            let value = read_int_io(lead[0], 7, &mut reader)?;
            let record = if lead[0] & 0x80 != 0 {
                AckRecord::Block {
                    stream: StreamIdentifier(value),
                }
            } else {
                AckRecord::TableSync { delta: value }
            };
            self.apply_ack(record)?;
        }
    }

    fn apply_ack(&self, record: AckRecord) -> QpackResult<()> {
        log::trace!("QPACK: 收到确认 {:?}", record);
        let mut shared = self.shared.write().unwrap();
        match record {
            AckRecord::TableSync { delta } => {
                let synced = shared.synced.saturating_add(delta);
                if synced > shared.table.inserts() {
                    // 确认了从未发出的插入
                    return Err(QpackError::IndexError);
                }
                shared.synced = synced;
                if shared.acked < synced {
                    shared.acked = synced;
                }
            }
            AckRecord::Block { stream } => {
                let acked = shared.acked;
                if let (Some(largest), _) = shared.tracker.ack_block(stream, acked) {
                    if shared.acked < largest {
                        shared.acked = largest;
                    }
                }
            }
        }
        Ok(())
    }

    /// Raises the acknowledged-insert watermark; stale values are a
    /// no-op.
    pub fn ack_inserts(&self, base: u64) {
        let mut shared = self.shared.write().unwrap();
        let base = base.min(shared.table.inserts());
        if shared.acked < base {
            shared.acked = base;
        }
    }

    /// Acknowledges the oldest outstanding block on the stream;
    /// idempotent once nothing is outstanding. Returns whether the
    /// stream stopped counting against the blocked budget.
    pub fn ack_block(&self, stream: StreamIdentifier) -> bool {
        let mut shared = self.shared.write().unwrap();
        let acked = shared.acked;
        let (largest, unblocked) = shared.tracker.ack_block(stream, acked);
        if let Some(largest) = largest {
            if shared.acked < largest {
                shared.acked = largest;
            }
        }
        unblocked
    }

    /// Out-of-band stream cancel: every outstanding usage of the
    /// stream is released and its blocked-budget share returns.
    pub fn cancel_stream(&self, stream: StreamIdentifier) -> bool {
        let mut shared = self.shared.write().unwrap();
        let cancelled = shared.tracker.cancel_stream(stream);
        if cancelled {
            log::trace!("QPACK: 流{}取消, 释放其全部引用", stream);
        }
        cancelled
    }

    /// Reconfigures the table byte budgets, evicting as needed; fails
    /// without changes when eviction would hit an in-use entry.
    pub fn set_table_budget(&self, capacity: usize, margin: usize) -> bool {
        let mut shared = self.shared.write().unwrap();
        if !shared.table.set_capacity(capacity) {
            return false;
        }
        shared.table.set_margin(margin);
        true
    }

    pub fn inserts(&self) -> u64 {
        self.shared.read().unwrap().table.inserts()
    }

    pub fn highest_acknowledged(&self) -> u64 {
        self.shared.read().unwrap().acked
    }

    pub fn blocked_streams(&self) -> usize {
        let shared = self.shared.read().unwrap();
        shared.tracker.count_blocked_streams(shared.acked)
    }

    pub fn table_used(&self) -> usize {
        self.shared.read().unwrap().table.used()
    }
}
