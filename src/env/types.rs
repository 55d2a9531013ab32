// src/env/types.rs
// 环境层基础数据结构: 问题上下文、观测、轨迹与样本

use std::fmt;
use std::sync::Arc;

// ==============================================================================
// --- 问题上下文 ---
// ==============================================================================

/// 问题上下文
///
/// 每个问题只创建一次。克隆环境时按引用共享 (`Arc`)，
/// 属于只读的静态元数据，不会被任何假设修改。
#[derive(Debug, Clone, PartialEq)]
pub struct QuestionContext {
    /// 问题标识 (与环境名称一致)
    pub name: String,
    /// 分词后的问题
    pub question_tokens: Vec<String>,
    /// 表格常量 (列名、实体等)
    pub constants: Vec<String>,
}

impl QuestionContext {
    pub fn new(name: impl Into<String>, question: &str) -> Self {
        Self {
            name: name.into(),
            question_tokens: question.split_whitespace().map(str::to_string).collect(),
            constants: Vec::new(),
        }
    }

    pub fn with_constants(mut self, constants: &[&str]) -> Self {
        self.constants = constants.iter().map(|c| c.to_string()).collect();
        self
    }
}

// ==============================================================================
// --- 观测 ---
// ==============================================================================

/// 观测 (解释器在某一时刻报告的状态)
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Observation {
    /// 当前合法动作 (绝对动作 id，按解释器给出的顺序)
    ///
    /// 相对动作编号 = 该列表中的下标。
    pub valid_actions: Vec<usize>,
    /// 解码器本步读取的输入 (上一步动作 id)，起始步为 None
    pub read_index: Option<usize>,
}

impl Observation {
    /// 空观测: 没有任何合法动作，用于填充批次
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_valid(&self, action: usize) -> bool {
        self.valid_actions.contains(&action)
    }

    /// 绝对动作 id -> 相对动作编号
    pub fn relative_index(&self, action: usize) -> Option<usize> {
        self.valid_actions.iter().position(|&a| a == action)
    }
}

/// 单步执行结果
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutcome {
    pub observation: Observation,
    pub reward: f32,
    pub done: bool,
}

// ==============================================================================
// --- 轨迹与样本 ---
// ==============================================================================

/// 完整程序轨迹
///
/// `observations[t]` 是执行 `action_ids[t]` 之前的观测，两者等长。
#[derive(Debug, Clone, PartialEq)]
pub struct Trajectory {
    pub env_name: String,
    pub context: Arc<QuestionContext>,
    /// 人类可读的程序 token
    pub program: Vec<String>,
    /// 每一步执行的绝对动作 id
    pub action_ids: Vec<usize>,
    pub observations: Vec<Observation>,
    pub reward: f32,
}

impl Trajectory {
    pub fn len(&self) -> usize {
        self.action_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.action_ids.is_empty()
    }

    pub fn human_readable_program(&self) -> String {
        self.program.join(" ")
    }
}

impl fmt::Display for Trajectory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {} (reward={})", self.env_name, self.human_readable_program(), self.reward)
    }
}

/// 搜索产出的候选程序
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub trajectory: Trajectory,
    /// 累计对数概率 (草图先验 + 变量落地步的动作对数概率)
    pub log_prob: f32,
}

impl Sample {
    /// 概率 = exp(log_prob)
    pub fn prob(&self) -> f32 {
        self.log_prob.exp()
    }
}
