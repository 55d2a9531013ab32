// src/search/hypothesis.rs
// 假设 (Hypothesis) 与候选延续 (Continuation)

use std::sync::Arc;

use crate::env::{ProgramEnv, Sample};
use crate::sketch::Sketch;

/// 假设状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HypothesisStatus {
    /// 环境尚未结束，继续接受解码步
    Active,
    /// 环境正常结束
    Completed,
    /// 环境以 error 结束
    Failed,
}

/// 一个部分或完整的候选程序
///
/// 每个假设独占自己的环境克隆；多个假设可以共享同一个草图。
#[derive(Debug, Clone)]
pub struct Hypothesis<E> {
    /// 所属问题在输入列表中的下标
    pub question: usize,
    /// 约束该假设的草图 (无约束搜索为 None)
    pub sketch: Option<Arc<Sketch>>,
    pub env: E,
    /// 累计对数分数
    pub score: f32,
}

impl<E: ProgramEnv> Hypothesis<E> {
    pub fn new(question: usize, sketch: Option<Arc<Sketch>>, env: E, score: f32) -> Self {
        Self { question, sketch, env, score }
    }

    pub fn status(&self) -> HypothesisStatus {
        if !self.env.is_done() {
            HypothesisStatus::Active
        } else if self.env.has_error() {
            HypothesisStatus::Failed
        } else {
            HypothesisStatus::Completed
        }
    }

    /// 克隆环境并执行一步，得到新的假设；`self` 不被修改
    pub fn advance(&self, relative_action: usize, score: f32) -> anyhow::Result<Self> {
        let mut env = self.env.clone();
        env.step(relative_action)?;
        Ok(Self {
            question: self.question,
            sketch: self.sketch.clone(),
            env,
            score,
        })
    }

    pub fn into_sample(self) -> Sample {
        Sample {
            trajectory: self.env.to_trajectory(),
            log_prob: self.score,
        }
    }

    pub fn program_text(&self) -> String {
        self.env.human_readable_program().join(" ")
    }
}

/// 尚未执行的候选延续: 对第 `parent` 行假设执行 `relative_action`
#[derive(Debug, Clone)]
pub struct Continuation {
    /// 父假设在当前批次中的行号
    pub parent: usize,
    /// 父假设在其所属束中的位置
    pub local: usize,
    pub sketch: Option<Arc<Sketch>>,
    pub relative_action: usize,
    /// 绝对动作 id
    pub action: usize,
    pub score: f32,
}

/// 束搜索排序池中的一项: 已完成的假设或待执行的延续
#[derive(Debug)]
pub enum PoolEntry<E> {
    Completed(Hypothesis<E>),
    Continue(Continuation),
}

impl<E> PoolEntry<E> {
    pub fn score(&self) -> f32 {
        match self {
            PoolEntry::Completed(hyp) => hyp.score,
            PoolEntry::Continue(cont) => cont.score,
        }
    }

    pub fn sketch(&self) -> Option<&Arc<Sketch>> {
        match self {
            PoolEntry::Completed(hyp) => hyp.sketch.as_ref(),
            PoolEntry::Continue(cont) => cont.sketch.as_ref(),
        }
    }
}
