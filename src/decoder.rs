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
// Created Date: 2024/03/19 10:07:26

use std::io::{self, Read, Write};
use std::sync::mpsc::{sync_channel, Receiver, RecvTimeoutError, SyncSender};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use algorithm::buf::{Binary, BinaryMut, Bt, BtMut};

use crate::acks::AckRecord;
use crate::bits::{read_int_io, BitReader};
use crate::field::{HeaderField, StreamIdentifier};
use crate::inst::TableUpdate;
use crate::repr::{self, Repr};
use crate::table::{get_static, DynamicTable, SharedTable, DEFAULT_TABLE_CAPACITY};
use crate::{QpackError, QpackResult};

/// 待发送的确认记录的积压上限, 超出则解码任务阻塞
const ACK_QUEUE_DEPTH: usize = 32;

/// 块内合法的伪头部名字
static PSEUDO_NAMES: &'static [&'static [u8]] =
    &[b":authority", b":method", b":path", b":scheme", b":status"];

#[derive(Clone)]
pub struct DecoderConfig {
    capacity: usize,
    ack_delay: Duration,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        DecoderConfig {
            capacity: DEFAULT_TABLE_CAPACITY,
            ack_delay: Duration::ZERO,
        }
    }
}

impl DecoderConfig {
    pub fn new() -> DecoderConfig {
        DecoderConfig::default()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity;
    }

    pub fn ack_delay(&self) -> Duration {
        self.ack_delay
    }

    /// 表状态同步确认允许聚合等待的时长, 默认不等待
    pub fn set_ack_delay(&mut self, delay: Duration) {
        self.ack_delay = delay;
    }
}

/// The decoding half of the codec. The control stream mutates the
/// shared table in arrival order; header blocks decode from any
/// thread and sleep on the table until the base they committed to has
/// been inserted.
#[derive(Clone)]
pub struct Decoder {
    shared: Arc<SharedTable>,
    /// 配置容量同时是对端能申请到的容量上限
    max_capacity: usize,
    ack_delay: Duration,
    acks_tx: SyncSender<AckRecord>,
    acks_rx: Arc<Mutex<Receiver<AckRecord>>>,
    synced: Arc<Mutex<u64>>,
}

impl Decoder {
    pub fn new() -> Decoder {
        Decoder::with_config(DecoderConfig::default())
    }

    pub fn with_config(config: DecoderConfig) -> Decoder {
        let (acks_tx, acks_rx) = sync_channel(ACK_QUEUE_DEPTH);
        Decoder {
            shared: Arc::new(SharedTable::new(config.capacity)),
            max_capacity: config.capacity,
            ack_delay: config.ack_delay,
            acks_tx,
            acks_rx: Arc::new(Mutex::new(acks_rx)),
            synced: Arc::new(Mutex::new(0)),
        }
    }

    /// Applies one control-stream frame payload. Waiting header
    /// blocks wake as soon as the lock drops; a full frame also
    /// queues the table-state sync covering its inserts.
    pub fn apply_update_frame<T: Bt>(&self, frame: &mut T) -> QpackResult<()> {
        let (result, inserts) = {
            let mut table = self.shared.lock();
            let result = self.apply_all(&mut table, frame);
            (result, table.inserts())
        };
        // even a failing batch may have inserted entries ahead of the
        // failure point
        self.shared.notify();
        result?;
        let delta = {
            let mut synced = self.synced.lock().unwrap();
            let delta = inserts - *synced;
            *synced = inserts;
            delta
        };
        if delta > 0 {
            self.acks_tx
                .send(AckRecord::TableSync { delta })
                .map_err(|_| QpackError::Io(io::Error::from(io::ErrorKind::BrokenPipe)))?;
        }
        Ok(())
    }

    fn apply_all<T: Bt>(&self, table: &mut DynamicTable, frame: &mut T) -> QpackResult<()> {
        while frame.has_remaining() {
            let update = TableUpdate::parse(frame)?;
            log::trace!("QPACK: 应用表更新 {:?}", update);
            match update {
                TableUpdate::InsertStaticName { index, value } => {
                    let (name, _) = get_static(index).ok_or(QpackError::IndexError)?;
                    table.insert(name.to_vec(), value)?;
                }
                TableUpdate::InsertDynamicName { relative, value } => {
                    let base = table
                        .inserts()
                        .checked_sub(relative)
                        .ok_or(QpackError::IndexError)?;
                    let source = table.by_base(base).ok_or(QpackError::IndexError)?.clone();
                    table.insert(source.name().to_vec(), value)?;
                }
                TableUpdate::InsertLiteral { name, value } => {
                    table.insert(name, value)?;
                }
                TableUpdate::Duplicate { relative } => {
                    let base = table
                        .inserts()
                        .checked_sub(relative)
                        .ok_or(QpackError::IndexError)?;
                    let source = table.by_base(base).ok_or(QpackError::IndexError)?.clone();
                    table.insert(source.name().to_vec(), source.value().to_vec())?;
                }
                TableUpdate::Capacity { capacity } => {
                    if capacity > self.max_capacity as u64 {
                        return Err(QpackError::TableOverflow);
                    }
                    table.set_capacity(capacity as usize);
                }
            }
        }
        Ok(())
    }

    /// Consumes length-prefixed frames already sitting in a buffer.
    pub fn apply_updates<T: Bt>(&self, buffer: &mut T) -> QpackResult<()> {
        while buffer.has_remaining() {
            let mut reader = BitReader::new();
            let len = reader.get_int(8, buffer)? as usize;
            if len > buffer.remaining() {
                return Err(QpackError::ShortInput);
            }
            let payload = buffer.chunk()[..len].to_vec();
            buffer.advance(len);
            let mut frame = Binary::from(payload);
            self.apply_update_frame(&mut frame)?;
        }
        Ok(())
    }

    /// Long-lived pump consuming the strictly ordered update channel.
    /// Clean end of stream between frames returns `Ok`; anything else
    /// is connection-fatal.
    pub fn drive_updates<R: Read>(&self, mut reader: R) -> QpackResult<()> {
        let mut lead = [0u8; 1];
        loop {
            match reader.read(&mut lead) {
                Ok(0) => return Ok(()),
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
            let len = read_int_io(lead[0], 8, &mut reader)? as usize;
            let mut payload = vec![0u8; len];
            reader.read_exact(&mut payload)?;
            let mut frame = Binary::from(payload);
            self.apply_update_frame(&mut frame)?;
        }
    }

    /// Decodes one header block. Blocks the calling thread until the
    /// largest base the block commits to has arrived on the control
    /// stream, then resolves every representation and queues the
    /// block acknowledgment.
    pub fn decode_block<T: Bt>(
        &self,
        stream: StreamIdentifier,
        buffer: &mut T,
    ) -> QpackResult<Vec<HeaderField>> {
        let (largest_base, block_base) = repr::parse_prefix(buffer)?;
        let table = if largest_base > 0 {
            self.shared.wait_for_entry(largest_base)
        } else {
            self.shared.lock()
        };
        let mut fields = Vec::new();
        while buffer.has_remaining() {
            let field = match Repr::parse(buffer)? {
                Repr::IndexedStatic { index } => {
                    let (name, value) = get_static(index).ok_or(QpackError::IndexError)?;
                    make_field(name, value, false)
                }
                Repr::IndexedDynamic { relative } => {
                    let entry = table
                        .get_dynamic(relative, block_base)
                        .ok_or(QpackError::IndexError)?;
                    make_field(entry.name(), entry.value(), false)
                }
                Repr::IndexedPostBase { index } => {
                    let entry = table
                        .get_post_base(index, block_base)
                        .ok_or(QpackError::IndexError)?;
                    make_field(entry.name(), entry.value(), false)
                }
                Repr::LiteralStaticName {
                    index,
                    value,
                    sensitive,
                } => {
                    let (name, _) = get_static(index).ok_or(QpackError::IndexError)?;
                    make_owned_field(name.to_vec(), value, sensitive)
                }
                Repr::LiteralDynamicName {
                    relative,
                    value,
                    sensitive,
                } => {
                    let entry = table
                        .get_dynamic(relative, block_base)
                        .ok_or(QpackError::IndexError)?;
                    make_owned_field(entry.name().to_vec(), value, sensitive)
                }
                Repr::LiteralPostBaseName {
                    index,
                    value,
                    sensitive,
                } => {
                    let entry = table
                        .get_post_base(index, block_base)
                        .ok_or(QpackError::IndexError)?;
                    make_owned_field(entry.name().to_vec(), value, sensitive)
                }
                Repr::Literal {
                    name,
                    value,
                    sensitive,
                } => make_owned_field(name, value, sensitive),
            };
            fields.push(field);
        }
        drop(table);
        validate_pseudo(&fields)?;
        log::trace!(
            "QPACK: 解码头块 stream={} largest={} fields={}",
            stream,
            largest_base,
            fields.len()
        );
        // a block that never touched the dynamic table must not ack
        if largest_base > 0 {
            self.acks_tx
                .send(AckRecord::Block { stream })
                .map_err(|_| QpackError::Io(io::Error::from(io::ErrorKind::BrokenPipe)))?;
        }
        Ok(fields)
    }

    /// Next queued acknowledgment record, if any.
    pub fn poll_ack(&self) -> Option<AckRecord> {
        self.acks_rx.lock().unwrap().try_recv().ok()
    }

    /// Drains every queued acknowledgment into the buffer without
    /// waiting; returns the bytes written.
    pub fn write_acks<B: Bt + BtMut>(&self, buffer: &mut B) -> usize {
        let acks = self.acks_rx.lock().unwrap();
        let mut size = 0;
        while let Ok(record) = acks.try_recv() {
            size += record.encode(buffer);
        }
        size
    }

    /// Long-lived pump writing acknowledgments to the transport in
    /// completion order. Table-state syncs may aggregate for up to
    /// the configured ack delay; block acks always flush what is
    /// pending first so relative order holds.
    pub fn drive_acks<W: Write>(&self, mut writer: W) -> QpackResult<()> {
        let acks = self.acks_rx.lock().unwrap();
        let mut pending = 0u64;
        loop {
            let record = if pending > 0 {
                match acks.recv_timeout(self.ack_delay) {
                    Ok(record) => Some(record),
                    Err(RecvTimeoutError::Timeout) => None,
                    Err(RecvTimeoutError::Disconnected) => {
                        write_record(&mut writer, AckRecord::TableSync { delta: pending })?;
                        return Ok(());
                    }
                }
            } else {
                match acks.recv() {
                    Ok(record) => Some(record),
                    Err(_) => return Ok(()),
                }
            };
            match record {
                Some(AckRecord::TableSync { delta }) => {
                    if self.ack_delay.is_zero() {
                        write_record(&mut writer, AckRecord::TableSync { delta })?;
                    } else {
                        pending += delta;
                    }
                }
                Some(block) => {
                    if pending > 0 {
                        write_record(&mut writer, AckRecord::TableSync { delta: pending })?;
                        pending = 0;
                    }
                    write_record(&mut writer, block)?;
                }
                None => {
                    write_record(&mut writer, AckRecord::TableSync { delta: pending })?;
                    pending = 0;
                }
            }
        }
    }

    /// 当前动态表的插入总数
    pub fn inserts(&self) -> u64 {
        self.shared.lock().inserts()
    }

    pub fn table_used(&self) -> usize {
        self.shared.lock().used()
    }
}

fn write_record<W: Write>(writer: &mut W, record: AckRecord) -> QpackResult<()> {
    let mut buffer = BinaryMut::new();
    record.encode(&mut buffer);
    writer.write_all(buffer.chunk())?;
    writer.flush()?;
    Ok(())
}

fn make_field(name: &[u8], value: &[u8], sensitive: bool) -> HeaderField {
    make_owned_field(name.to_vec(), value.to_vec(), sensitive)
}

fn make_owned_field(name: Vec<u8>, value: Vec<u8>, sensitive: bool) -> HeaderField {
    let mut field = HeaderField::new(name, value);
    if sensitive {
        field.flag_mut().set_sensitive();
    }
    field
}

/// Pseudo headers must all precede regular ones and come from the
/// known request/response set.
fn validate_pseudo(fields: &[HeaderField]) -> QpackResult<()> {
    let mut regular = false;
    for field in fields {
        if field.name().first() == Some(&b':') {
            if regular || !PSEUDO_NAMES.iter().any(|known| *known == field.name()) {
                return Err(QpackError::PseudoHeaderViolation);
            }
        } else {
            regular = true;
        }
    }
    Ok(())
}
