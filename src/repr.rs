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
// Created Date: 2024/03/14 14:28:40

use std::fmt;

use algorithm::buf::{Bt, BtMut};

use crate::bits::{BitReader, BitWriter};
use crate::huffman::HuffmanPreference;
use crate::{QpackError, QpackResult};

/// One representation inside a header block. Dynamic indices are
/// relative to the block base fixed in the prefix; post-base indices
/// address entries inserted after that base was chosen.
pub enum Repr {
    IndexedStatic { index: u64 },
    IndexedDynamic { relative: u64 },
    IndexedPostBase { index: u64 },
    LiteralStaticName { index: u64, value: Vec<u8>, sensitive: bool },
    LiteralDynamicName { relative: u64, value: Vec<u8>, sensitive: bool },
    LiteralPostBaseName { index: u64, value: Vec<u8>, sensitive: bool },
    Literal { name: Vec<u8>, value: Vec<u8>, sensitive: bool },
}

impl Repr {
    pub fn encode<B: Bt + BtMut>(&self, pref: HuffmanPreference, buffer: &mut B) -> usize {
        let mut writer = BitWriter::new();
        let size = match self {
            Repr::IndexedStatic { index } => {
                let size = writer.put_bits(0b11, 2, buffer);
                size + writer.put_int(*index, 6, buffer)
            }
            Repr::IndexedDynamic { relative } => {
                let size = writer.put_bits(0b10, 2, buffer);
                size + writer.put_int(*relative, 6, buffer)
            }
            Repr::IndexedPostBase { index } => {
                let size = writer.put_bits(0b0001, 4, buffer);
                size + writer.put_int(*index, 4, buffer)
            }
            Repr::LiteralStaticName {
                index,
                value,
                sensitive,
            } => {
                let mut size = writer.put_bits(0b01, 2, buffer);
                size += writer.put_bit(*sensitive, buffer);
                size += writer.put_bit(true, buffer);
                size += writer.put_int(*index, 4, buffer);
                size + writer.put_string(value, 7, pref, buffer)
            }
            Repr::LiteralDynamicName {
                relative,
                value,
                sensitive,
            } => {
                let mut size = writer.put_bits(0b01, 2, buffer);
                size += writer.put_bit(*sensitive, buffer);
                size += writer.put_bit(false, buffer);
                size += writer.put_int(*relative, 4, buffer);
                size + writer.put_string(value, 7, pref, buffer)
            }
            Repr::LiteralPostBaseName {
                index,
                value,
                sensitive,
            } => {
                let mut size = writer.put_bits(0b0000, 4, buffer);
                size += writer.put_bit(*sensitive, buffer);
                size += writer.put_int(*index, 3, buffer);
                size + writer.put_string(value, 7, pref, buffer)
            }
            Repr::Literal {
                name,
                value,
                sensitive,
            } => {
                let mut size = writer.put_bits(0b001, 3, buffer);
                size += writer.put_bit(*sensitive, buffer);
                size += writer.put_string(name, 3, pref, buffer);
                size + writer.put_string(value, 7, pref, buffer)
            }
        };
        debug_assert!(writer.is_aligned());
        size
    }

    pub fn parse<T: Bt>(buffer: &mut T) -> QpackResult<Repr> {
        let mut reader = BitReader::new();
        let repr = if reader.get_bit(buffer)? {
            let is_static = reader.get_bit(buffer)?;
            let index = reader.get_int(6, buffer)?;
            if is_static {
                Repr::IndexedStatic { index }
            } else {
                Repr::IndexedDynamic { relative: index }
            }
        } else if reader.get_bit(buffer)? {
            let sensitive = reader.get_bit(buffer)?;
            let is_static = reader.get_bit(buffer)?;
            let index = reader.get_int(4, buffer)?;
            let value = reader.get_string(7, buffer)?;
            if is_static {
                Repr::LiteralStaticName {
                    index,
                    value,
                    sensitive,
                }
            } else {
                Repr::LiteralDynamicName {
                    relative: index,
                    value,
                    sensitive,
                }
            }
        } else if reader.get_bit(buffer)? {
            let sensitive = reader.get_bit(buffer)?;
            let name = reader.get_string(3, buffer)?;
            let value = reader.get_string(7, buffer)?;
            Repr::Literal {
                name,
                value,
                sensitive,
            }
        } else if reader.get_bit(buffer)? {
            Repr::IndexedPostBase {
                index: reader.get_int(4, buffer)?,
            }
        } else {
            let sensitive = reader.get_bit(buffer)?;
            let index = reader.get_int(3, buffer)?;
            let value = reader.get_string(7, buffer)?;
            Repr::LiteralPostBaseName {
                index,
                value,
                sensitive,
            }
        };
        debug_assert!(reader.is_aligned());
        Ok(repr)
    }
}

impl fmt::Debug for Repr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Repr::IndexedStatic { index } => write!(f, "IndexedStatic({})", index),
            Repr::IndexedDynamic { relative } => write!(f, "IndexedDynamic({})", relative),
            Repr::IndexedPostBase { index } => write!(f, "IndexedPostBase({})", index),
            Repr::LiteralStaticName { index, .. } => write!(f, "LiteralStaticName({})", index),
            Repr::LiteralDynamicName { relative, .. } => {
                write!(f, "LiteralDynamicName({})", relative)
            }
            Repr::LiteralPostBaseName { index, .. } => {
                write!(f, "LiteralPostBaseName({})", index)
            }
            Repr::Literal { name, .. } => write!(f, "Literal({})", String::from_utf8_lossy(name)),
        }
    }
}

/// Writes the two-field block prefix: the largest referenced base,
/// then a signed distance from it to the block base. This encoder
/// always chooses the block base equal to the largest base, so the
/// distance is zero with the sign clear.
pub fn encode_prefix<B: Bt + BtMut>(largest_base: u64, buffer: &mut B) -> usize {
    let mut writer = BitWriter::new();
    let mut size = writer.put_int(largest_base, 8, buffer);
    size += writer.put_bit(false, buffer);
    size + writer.put_int(0, 7, buffer)
}

/// Reads the block prefix back as `(largest_base, block_base)`. A set
/// sign places the block base below the largest referenced base,
/// which is what post-base references resolve against.
pub fn parse_prefix<T: Bt>(buffer: &mut T) -> QpackResult<(u64, u64)> {
    let mut reader = BitReader::new();
    let largest_base = reader.get_int(8, buffer)?;
    let negative = reader.get_bit(buffer)?;
    let delta = reader.get_int(7, buffer)?;
    let block_base = if negative {
        largest_base
            .checked_sub(delta)
            .ok_or(QpackError::IndexError)?
    } else {
        largest_base
            .checked_add(delta)
            .ok_or(QpackError::IntegerOverflow)?
    };
    Ok((largest_base, block_base))
}

#[cfg(test)]
mod tests {
    use algorithm::buf::{Binary, BinaryMut};

    use super::*;

    fn encoded(repr: Repr, pref: HuffmanPreference) -> Vec<u8> {
        let mut buffer = BinaryMut::new();
        let size = repr.encode(pref, &mut buffer);
        assert_eq!(size, buffer.remaining());
        buffer.chunk().to_vec()
    }

    #[test]
    fn test_indexed_bytes() {
        assert_eq!(
            encoded(Repr::IndexedDynamic { relative: 1 }, HuffmanPreference::Auto),
            vec![0x81]
        );
        assert_eq!(
            encoded(Repr::IndexedDynamic { relative: 0 }, HuffmanPreference::Auto),
            vec![0x80]
        );
        assert_eq!(
            encoded(Repr::IndexedStatic { index: 1 }, HuffmanPreference::Auto),
            vec![0xc1]
        );
        assert_eq!(
            encoded(Repr::IndexedPostBase { index: 0 }, HuffmanPreference::Auto),
            vec![0x10]
        );
    }

    #[test]
    fn test_prefix_bytes() {
        let mut buffer = BinaryMut::new();
        assert_eq!(encode_prefix(2, &mut buffer), 2);
        assert_eq!(buffer.chunk(), &[0x02, 0x00]);
        let mut read = buffer.freeze();
        assert_eq!(parse_prefix(&mut read).unwrap(), (2, 2));
    }

    #[test]
    fn test_prefix_negative_delta() {
        // 符号位置位表示块基小于最大引用序号
        let mut read = Binary::from(vec![0x05, 0x82]);
        assert_eq!(parse_prefix(&mut read).unwrap(), (5, 3));
        let mut read = Binary::from(vec![0x05, 0x02]);
        assert_eq!(parse_prefix(&mut read).unwrap(), (5, 7));
        let mut read = Binary::from(vec![0x02, 0x83]);
        match parse_prefix(&mut read) {
            Err(QpackError::IndexError) => {}
            other => panic!("expect index error, got {:?}", other),
        }
    }

    #[test]
    fn test_literal_round() {
        let reprs = vec![
            Repr::Literal {
                name: b"x-trace".to_vec(),
                value: b"1".to_vec(),
                sensitive: true,
            },
            Repr::LiteralStaticName {
                index: 22,
                value: b"token".to_vec(),
                sensitive: true,
            },
            Repr::LiteralDynamicName {
                relative: 3,
                value: b"v".to_vec(),
                sensitive: false,
            },
            Repr::LiteralPostBaseName {
                index: 1,
                value: b"v2".to_vec(),
                sensitive: false,
            },
        ];
        let mut buffer = BinaryMut::new();
        for repr in &reprs {
            repr.encode(HuffmanPreference::Never, &mut buffer);
        }
        let mut read = buffer.freeze();
        match Repr::parse(&mut read).unwrap() {
            Repr::Literal {
                name,
                value,
                sensitive,
            } => {
                assert_eq!(name, b"x-trace");
                assert_eq!(value, b"1");
                assert!(sensitive);
            }
            other => panic!("unexpected {:?}", other),
        }
        match Repr::parse(&mut read).unwrap() {
            Repr::LiteralStaticName {
                index, sensitive, ..
            } => {
                assert_eq!(index, 22);
                assert!(sensitive);
            }
            other => panic!("unexpected {:?}", other),
        }
        match Repr::parse(&mut read).unwrap() {
            Repr::LiteralDynamicName {
                relative,
                sensitive,
                ..
            } => {
                assert_eq!(relative, 3);
                assert!(!sensitive);
            }
            other => panic!("unexpected {:?}", other),
        }
        match Repr::parse(&mut read).unwrap() {
            Repr::LiteralPostBaseName { index, value, .. } => {
                assert_eq!(index, 1);
                assert_eq!(value, b"v2");
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(!read.has_remaining());
    }
}
