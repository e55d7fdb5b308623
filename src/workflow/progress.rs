//! 批次进度板
//!
//! 每个对象每完成一个阶段就把自己的报告行贴上来。批次被中断时，
//! 编排层从这里拿到每个对象最后到达的状态来写报告。

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use crate::services::report_writer::ReportRow;

#[derive(Debug, Default)]
pub struct ProgressBoard {
    rows: Mutex<BTreeMap<usize, ReportRow>>,
}

impl ProgressBoard {
    pub fn new() -> Self {
        Self::default()
    }

    fn rows(&self) -> MutexGuard<'_, BTreeMap<usize, ReportRow>> {
        // 持锁期间不会 panic，中毒时数据仍然完整
        self.rows.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 覆盖该对象的报告行
    pub fn publish(&self, row: &ReportRow) {
        self.rows().insert(row.index, row.clone());
    }

    /// 按输入顺序返回全部报告行
    pub fn snapshot(&self) -> Vec<ReportRow> {
        self.rows().values().cloned().collect()
    }
}
