// src/sketch.rs
// 程序草图 (Sketch): 由固定 token 与变量槽组成的程序模板

use std::fmt;
use std::sync::Arc;

/// 变量槽的文本表示
pub const VARIABLE_SLOT: &str = "<VAR>";

/// 草图中的一个位置
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SketchToken {
    /// 必须原样复现的固定 token
    Fixed(String),
    /// 变量槽，由策略在当前合法动作中选择
    Variable,
}

impl SketchToken {
    pub fn is_variable(&self) -> bool {
        matches!(self, SketchToken::Variable)
    }
}

impl fmt::Display for SketchToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SketchToken::Fixed(token) => write!(f, "{}", token),
            SketchToken::Variable => write!(f, "{}", VARIABLE_SLOT),
        }
    }
}

/// 程序草图
///
/// 构造后不可变；相等性即 token 序列相等 (用于草图覆盖统计)。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Sketch {
    tokens: Vec<SketchToken>,
}

impl Sketch {
    pub fn new(tokens: Vec<SketchToken>) -> Self {
        Self { tokens }
    }

    /// 由具体程序得到草图: 内存变量 token (`v0`, `v1`, ...) 变为变量槽
    pub fn from_program<S: AsRef<str>>(program: &[S]) -> Self {
        Self::from_program_with(program, is_memory_variable)
    }

    /// 由具体程序得到草图，`is_variable` 决定哪些 token 成为变量槽
    pub fn from_program_with<S, F>(program: &[S], is_variable: F) -> Self
    where
        S: AsRef<str>,
        F: Fn(&str) -> bool,
    {
        let tokens = program
            .iter()
            .map(|t| {
                let t = t.as_ref();
                if is_variable(t) {
                    SketchToken::Variable
                } else {
                    SketchToken::Fixed(t.to_string())
                }
            })
            .collect();
        Self { tokens }
    }

    /// 解析空白分隔的草图文本，`<VAR>` 表示变量槽
    pub fn parse(text: &str) -> Self {
        let tokens = text
            .split_whitespace()
            .map(|t| {
                if t == VARIABLE_SLOT {
                    SketchToken::Variable
                } else {
                    SketchToken::Fixed(t.to_string())
                }
            })
            .collect();
        Self { tokens }
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn tokens(&self) -> &[SketchToken] {
        &self.tokens
    }

    /// 第 t 步的 token，越界返回 None
    pub fn get(&self, t: usize) -> Option<&SketchToken> {
        self.tokens.get(t)
    }

    /// 变量落地步掩码 (变量槽为 1.0，其余为 0.0)
    pub fn variable_mask(&self) -> Vec<f32> {
        self.tokens
            .iter()
            .map(|t| if t.is_variable() { 1.0 } else { 0.0 })
            .collect()
    }
}

impl fmt::Display for Sketch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, token) in self.tokens.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{}", token)?;
        }
        Ok(())
    }
}

/// 内存变量 token: `v` 后接数字
pub fn is_memory_variable(token: &str) -> bool {
    token
        .strip_prefix('v')
        .map(|rest| !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()))
        .unwrap_or(false)
}

/// 带先验对数概率的草图 (草图预测器的输出)
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredSketch {
    pub sketch: Arc<Sketch>,
    pub log_prob: f32,
}

impl ScoredSketch {
    pub fn new(sketch: Sketch, log_prob: f32) -> Self {
        Self { sketch: Arc::new(sketch), log_prob }
    }
}

impl fmt::Display for ScoredSketch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (log_prob={:.4})", self.sketch, self.log_prob)
    }
}
