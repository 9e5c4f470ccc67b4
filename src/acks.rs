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
// Created Date: 2024/03/15 09:05:19

use std::fmt;

use algorithm::buf::{Bt, BtMut};

use crate::bits::{BitReader, BitWriter};
use crate::field::StreamIdentifier;
use crate::QpackResult;

/// One record on the acknowledgment stream, decoder to encoder.
#[derive(Clone, PartialEq, Eq)]
pub enum AckRecord {
    /// 自上次同步以来新应用的插入条数
    TableSync { delta: u64 },
    /// 某条流上最旧的头块已解码完成
    Block { stream: StreamIdentifier },
}

impl AckRecord {
    pub fn encode<B: Bt + BtMut>(&self, buffer: &mut B) -> usize {
        let mut writer = BitWriter::new();
        match self {
            AckRecord::TableSync { delta } => {
                let size = writer.put_bit(false, buffer);
                size + writer.put_int(*delta, 7, buffer)
            }
            AckRecord::Block { stream } => {
                let size = writer.put_bit(true, buffer);
                size + writer.put_int(stream.0, 7, buffer)
            }
        }
    }

    pub fn parse<T: Bt>(buffer: &mut T) -> QpackResult<AckRecord> {
        let mut reader = BitReader::new();
        if reader.get_bit(buffer)? {
            Ok(AckRecord::Block {
                stream: StreamIdentifier(reader.get_int(7, buffer)?),
            })
        } else {
            Ok(AckRecord::TableSync {
                delta: reader.get_int(7, buffer)?,
            })
        }
    }
}

impl fmt::Debug for AckRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AckRecord::TableSync { delta } => write!(f, "TableSync({})", delta),
            AckRecord::Block { stream } => write!(f, "BlockAck({})", stream),
        }
    }
}

#[cfg(test)]
mod tests {
    use algorithm::buf::BinaryMut;

    use super::*;

    #[test]
    fn test_record_bytes() {
        let mut buffer = BinaryMut::new();
        AckRecord::TableSync { delta: 2 }.encode(&mut buffer);
        AckRecord::Block {
            stream: StreamIdentifier(4),
        }
        .encode(&mut buffer);
        AckRecord::Block {
            stream: StreamIdentifier(1000),
        }
        .encode(&mut buffer);
        assert_eq!(buffer.chunk()[..2], [0x02, 0x84]);

        let mut read = buffer.freeze();
        assert_eq!(
            AckRecord::parse(&mut read).unwrap(),
            AckRecord::TableSync { delta: 2 }
        );
        assert_eq!(
            AckRecord::parse(&mut read).unwrap(),
            AckRecord::Block {
                stream: StreamIdentifier(4)
            }
        );
        assert_eq!(
            AckRecord::parse(&mut read).unwrap(),
            AckRecord::Block {
                stream: StreamIdentifier(1000)
            }
        );
        assert!(!read.has_remaining());
    }
}
