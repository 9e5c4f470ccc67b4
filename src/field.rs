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
// Created Date: 2024/03/11 10:02:15

use std::fmt;

/// 每条表项除名字与值外额外计的开销字节数
pub const ENTRY_OVERHEAD: usize = 32;

bitflags! {
    #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
    pub struct FieldFlag: u8 {
        const SENSITIVE = 0x1;
        const NEVER_INDEX = 0x2;
    }
}

impl FieldFlag {
    pub fn zero() -> FieldFlag {
        FieldFlag::default()
    }

    pub fn is_sensitive(&self) -> bool {
        self.contains(FieldFlag::SENSITIVE)
    }

    pub fn set_sensitive(&mut self) {
        self.set(FieldFlag::SENSITIVE, true)
    }

    pub fn is_never_index(&self) -> bool {
        self.contains(FieldFlag::NEVER_INDEX)
    }

    pub fn set_never_index(&mut self) {
        self.set(FieldFlag::NEVER_INDEX, true)
    }
}

impl Default for FieldFlag {
    fn default() -> Self {
        Self(Default::default())
    }
}

/// One header field as the codec sees it. Names compare
/// case-insensitively; the encoder lowercases them before any lookup
/// so everything behind this type deals in lowercase only.
#[derive(Clone, PartialEq, Eq)]
pub struct HeaderField {
    name: Vec<u8>,
    value: Vec<u8>,
    flag: FieldFlag,
}

impl HeaderField {
    pub fn new<N: Into<Vec<u8>>, V: Into<Vec<u8>>>(name: N, value: V) -> HeaderField {
        HeaderField {
            name: name.into(),
            value: value.into(),
            flag: FieldFlag::zero(),
        }
    }

    /// 敏感头部, 永不进表且带不索引标记
    pub fn sensitive<N: Into<Vec<u8>>, V: Into<Vec<u8>>>(name: N, value: V) -> HeaderField {
        let mut field = HeaderField::new(name, value);
        field.flag.set_sensitive();
        field
    }

    pub fn name(&self) -> &[u8] {
        &self.name
    }

    pub fn value(&self) -> &[u8] {
        &self.value
    }

    pub fn flag(&self) -> FieldFlag {
        self.flag
    }

    pub fn flag_mut(&mut self) -> &mut FieldFlag {
        &mut self.flag
    }

    pub fn is_sensitive(&self) -> bool {
        self.flag.is_sensitive()
    }

    /// Size under the table accounting rule, 32 plus the byte
    /// lengths of name and value.
    pub fn size(&self) -> usize {
        ENTRY_OVERHEAD + self.name.len() + self.value.len()
    }

    /// 把名字统一转为小写
    pub fn lower_name(&mut self) {
        self.name.make_ascii_lowercase();
    }

    pub fn into_parts(self) -> (Vec<u8>, Vec<u8>, FieldFlag) {
        (self.name, self.value, self.flag)
    }
}

impl fmt::Debug for HeaderField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "HeaderField({}={}{})",
            String::from_utf8_lossy(&self.name),
            String::from_utf8_lossy(&self.value),
            if self.is_sensitive() { ", sensitive" } else { "" }
        )
    }
}

impl From<(&str, &str)> for HeaderField {
    fn from(src: (&str, &str)) -> Self {
        HeaderField::new(src.0, src.1)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct StreamIdentifier(pub u64);

impl StreamIdentifier {
    pub fn zero() -> StreamIdentifier {
        StreamIdentifier(0)
    }
}

impl fmt::Display for StreamIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_size() {
        let field = HeaderField::new("name1", "value1");
        assert_eq!(field.size(), 32 + 5 + 6);
    }

    #[test]
    fn test_lower_name() {
        let mut field = HeaderField::new("X-Trace-Id", "abc");
        field.lower_name();
        assert_eq!(field.name(), b"x-trace-id");
        assert_eq!(field.value(), b"abc");
    }

    #[test]
    fn test_sensitive_flag() {
        let field = HeaderField::sensitive("authorization", "secret");
        assert!(field.is_sensitive());
        assert!(!field.flag().is_never_index());
    }
}
