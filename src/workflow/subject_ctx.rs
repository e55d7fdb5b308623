//! 对象处理上下文
//!
//! 封装"我正在处理第几个对象、它的输出目录叫什么"这一信息

use std::fmt::Display;

use crate::models::subject::SubjectId;

/// 对象处理上下文
#[derive(Debug, Clone)]
pub struct SubjectCtx {
    /// 输入中的序号（从1开始，仅用于日志和报告）
    pub index: usize,

    /// 对象标识（输出目录名）
    pub id: SubjectId,

    /// 姓名（输入行无法解析时为原始值或空）
    pub name: String,

    /// 重复输入时第一次出现的对象
    pub duplicate_of: Option<SubjectId>,
}

impl SubjectCtx {
    pub fn new(index: usize, id: SubjectId, name: impl Into<String>) -> Self {
        Self {
            index,
            id,
            name: name.into(),
            duplicate_of: None,
        }
    }
}

impl Display for SubjectCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[대상 {}]", self.index)
    }
}
