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
// Created Date: 2024/03/13 09:54:02

/// 动态表的默认容量
pub const DEFAULT_TABLE_CAPACITY: usize = 4_096;

mod dynamic;
mod static_table;
mod usage;

pub use dynamic::{DynamicTable, Entry, SharedTable};
pub use static_table::{find_static, get_static, STATIC_TABLE_LEN};
pub use usage::{BlockUsage, UsageTracker};
