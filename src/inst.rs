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
// Created Date: 2024/03/14 10:12:55

use std::fmt;

use algorithm::buf::{Bt, BtMut};

use crate::bits::{BitReader, BitWriter};
use crate::huffman::HuffmanPreference;
use crate::QpackResult;

/// One control-stream instruction. Relative indices count back from
/// the newest insert at the moment the instruction applies: 0 is the
/// entry inserted last.
pub enum TableUpdate {
    /// 以静态表某项的名字插入新表项
    InsertStaticName { index: u64, value: Vec<u8> },
    /// 以动态表某项的名字插入新表项
    InsertDynamicName { relative: u64, value: Vec<u8> },
    InsertLiteral { name: Vec<u8>, value: Vec<u8> },
    Duplicate { relative: u64 },
    Capacity { capacity: u64 },
}

impl TableUpdate {
    pub fn encode<B: Bt + BtMut>(&self, pref: HuffmanPreference, buffer: &mut B) -> usize {
        let mut writer = BitWriter::new();
        let size = match self {
            TableUpdate::InsertStaticName { index, value } => {
                let mut size = writer.put_bits(0b11, 2, buffer);
                size += writer.put_int(*index, 6, buffer);
                size + writer.put_string(value, 7, pref, buffer)
            }
            TableUpdate::InsertDynamicName { relative, value } => {
                let mut size = writer.put_bits(0b10, 2, buffer);
                size += writer.put_int(*relative, 6, buffer);
                size + writer.put_string(value, 7, pref, buffer)
            }
            TableUpdate::InsertLiteral { name, value } => {
                let mut size = writer.put_bits(0b01, 2, buffer);
                size += writer.put_string(name, 5, pref, buffer);
                size + writer.put_string(value, 7, pref, buffer)
            }
            TableUpdate::Duplicate { relative } => {
                let size = writer.put_bits(0b000, 3, buffer);
                size + writer.put_int(*relative, 5, buffer)
            }
            TableUpdate::Capacity { capacity } => {
                let size = writer.put_bits(0b001, 3, buffer);
                size + writer.put_int(*capacity, 5, buffer)
            }
        };
        debug_assert!(writer.is_aligned());
        size
    }

    pub fn parse<T: Bt>(buffer: &mut T) -> QpackResult<TableUpdate> {
        let mut reader = BitReader::new();
        let update = if reader.get_bit(buffer)? {
            let is_static = reader.get_bit(buffer)?;
            let index = reader.get_int(6, buffer)?;
            let value = reader.get_string(7, buffer)?;
            if is_static {
                TableUpdate::InsertStaticName { index, value }
            } else {
                TableUpdate::InsertDynamicName {
                    relative: index,
                    value,
                }
            }
        } else if reader.get_bit(buffer)? {
            let name = reader.get_string(5, buffer)?;
            let value = reader.get_string(7, buffer)?;
            TableUpdate::InsertLiteral { name, value }
        } else if reader.get_bit(buffer)? {
            TableUpdate::Capacity {
                capacity: reader.get_int(5, buffer)?,
            }
        } else {
            TableUpdate::Duplicate {
                relative: reader.get_int(5, buffer)?,
            }
        };
        debug_assert!(reader.is_aligned());
        Ok(update)
    }
}

impl fmt::Debug for TableUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableUpdate::InsertStaticName { index, .. } => {
                write!(f, "InsertStaticName({})", index)
            }
            TableUpdate::InsertDynamicName { relative, .. } => {
                write!(f, "InsertDynamicName({})", relative)
            }
            TableUpdate::InsertLiteral { name, .. } => {
                write!(f, "InsertLiteral({})", String::from_utf8_lossy(name))
            }
            TableUpdate::Duplicate { relative } => write!(f, "Duplicate({})", relative),
            TableUpdate::Capacity { capacity } => write!(f, "Capacity({})", capacity),
        }
    }
}
