// src/search/error.rs
// 搜索引擎错误类型
//
// 执行失败与草图约束冲突不是错误，只在单个假设内部被吸收；
// 这里只列出必须中止整批搜索的故障。

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SearchError {
    /// 搜索步数超出草图长度: 引擎与草图失去同步
    #[error("search desynchronized from sketch: question `{question}` at t={t}, sketch length {sketch_len}")]
    Desynchronized {
        question: String,
        t: usize,
        sketch_len: usize,
    },

    /// 动作 id 超出动作空间或不在记录的合法动作中
    #[error("action {action} is outside the action space of `{question}`")]
    UnknownAction { action: usize, question: String },

    /// 协作方返回的缓冲区批次维与活跃假设数不一致
    #[error("shape mismatch in {what}: expected {expected}, found {found}")]
    ShapeMismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },

    /// 编码器 / 解码器 / 草图预测器 / 环境调用失败
    #[error(transparent)]
    Collaborator(#[from] anyhow::Error),
}

pub type SearchResult<T> = std::result::Result<T, SearchError>;

/// 检查批次维
pub(crate) fn ensure_batch(what: &'static str, expected: usize, found: usize) -> SearchResult<()> {
    if expected == found {
        Ok(())
    } else {
        Err(SearchError::ShapeMismatch { what, expected, found })
    }
}
