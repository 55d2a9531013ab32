// src/model/fixed.rs
// 查表式协作方实现
//
// 不含可训练参数，输出完全由配置决定，用于演示程序与测试。
// `TableDecoder` 的打分可以依赖解码历史 (`history_coupling`)，
// 这样一旦批量状态与假设错位，分数就会随之改变。

use anyhow::{bail, Result};
use ndarray::{Array2, Array3};
use std::collections::HashMap;
use std::sync::Arc;

use super::encoding::{ContextEncoding, DecoderState, SketchEncoding};
use super::{ContextEncoder, Decoder, SketchEncoder, SketchPredictor};
use crate::env::QuestionContext;
use crate::observation::BatchedObservation;
use crate::sketch::{ScoredSketch, Sketch};

/// 稳定的 token 哈希 (FNV-1a)，用于把 token 映射到特征维
fn token_bucket(token: &str, buckets: usize) -> usize {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in token.bytes() {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    (hash % buckets.max(1) as u64) as usize
}

// ================ 问题编码器 ================

/// 词袋式问题编码: 每个 token 在哈希桶位置置 1
#[derive(Debug, Clone)]
pub struct BagOfTokensEncoder {
    pub hidden: usize,
}

impl BagOfTokensEncoder {
    pub fn new(hidden: usize) -> Self {
        Self { hidden: hidden.max(1) }
    }
}

impl ContextEncoder for BagOfTokensEncoder {
    fn encode(&self, contexts: &[&QuestionContext]) -> Result<ContextEncoding> {
        let max_len = contexts.iter().map(|c| c.question_tokens.len()).max().unwrap_or(0);
        let mut encoding = Array3::zeros((contexts.len(), max_len, self.hidden));
        let mut mask = Array2::zeros((contexts.len(), max_len));
        for (b, ctx) in contexts.iter().enumerate() {
            for (l, token) in ctx.question_tokens.iter().enumerate() {
                encoding[[b, l, token_bucket(token, self.hidden)]] = 1.0;
                mask[[b, l]] = 1.0;
            }
        }
        Ok(ContextEncoding { encoding, mask })
    }
}

// ================ 草图预测器 ================

/// 按问题名称查表的草图预测器
#[derive(Debug, Clone, Default)]
pub struct FixedSketchPredictor {
    sketches: HashMap<String, Vec<ScoredSketch>>,
    /// 表中不存在的草图的先验对数概率
    unknown_log_prob: f32,
}

impl FixedSketchPredictor {
    pub fn new(unknown_log_prob: f32) -> Self {
        Self { sketches: HashMap::new(), unknown_log_prob }
    }

    /// 设置某个问题的候选草图 (内部按先验降序保存)
    pub fn with_sketches(mut self, question: &str, mut sketches: Vec<ScoredSketch>) -> Self {
        sketches.sort_by(|a, b| b.log_prob.partial_cmp(&a.log_prob).unwrap_or(std::cmp::Ordering::Equal));
        self.sketches.insert(question.to_string(), sketches);
        self
    }
}

impl SketchPredictor for FixedSketchPredictor {
    fn get_sketches(&self, contexts: &[&QuestionContext], k: usize) -> Result<Vec<Vec<ScoredSketch>>> {
        Ok(contexts
            .iter()
            .map(|ctx| {
                self.sketches
                    .get(&ctx.name)
                    .map(|s| s.iter().take(k).cloned().collect())
                    .unwrap_or_default()
            })
            .collect())
    }

    fn sketch_log_probs(&self, contexts: &[&QuestionContext], sketches: &[Arc<Sketch>]) -> Result<Vec<f32>> {
        if contexts.len() != sketches.len() {
            bail!("草图数量 ({}) 与问题数量 ({}) 不一致", sketches.len(), contexts.len());
        }
        Ok(contexts
            .iter()
            .zip(sketches)
            .map(|(ctx, sketch)| {
                self.sketches
                    .get(&ctx.name)
                    .and_then(|cands| cands.iter().find(|c| c.sketch == *sketch))
                    .map(|c| c.log_prob)
                    .unwrap_or(self.unknown_log_prob)
            })
            .collect())
    }
}

// ================ 草图编码器 ================

/// 只编码草图结构的编码器: 固定 token 按哈希桶置 1，变量槽为全零
#[derive(Debug, Clone)]
pub struct StructureSketchEncoder {
    pub hidden: usize,
}

impl StructureSketchEncoder {
    pub fn new(hidden: usize) -> Self {
        Self { hidden: hidden.max(1) }
    }
}

impl SketchEncoder for StructureSketchEncoder {
    fn encode(&self, sketches: &[Arc<Sketch>]) -> Result<SketchEncoding> {
        let mut encoding = SketchEncoding::from_sketches(sketches, self.hidden);
        for (b, sketch) in sketches.iter().enumerate() {
            for (t, token) in sketch.tokens().iter().enumerate() {
                if !token.is_variable() {
                    let bucket = token_bucket(&token.to_string(), self.hidden);
                    encoding.value[[b, t, bucket]] = 1.0;
                }
            }
        }
        Ok(encoding)
    }
}

// ================ 查表解码器 ================

/// 查表解码器
///
/// 动作分数 = 逐步覆盖值 (若有) 或基础分数，再加上
/// `history_coupling * f(历史, 动作)`。
/// 隐状态: `hidden[:, 0]` 为问题长度，`hidden[:, 1]` 为已读取输入的累计和。
#[derive(Debug, Clone)]
pub struct TableDecoder {
    action_space: usize,
    base: Vec<f32>,
    step_overrides: HashMap<(usize, usize), f32>,
    history_coupling: f32,
}

impl TableDecoder {
    pub fn new(action_space: usize) -> Self {
        Self {
            action_space,
            base: vec![0.0; action_space],
            step_overrides: HashMap::new(),
            history_coupling: 0.0,
        }
    }

    pub fn with_logit(mut self, action: usize, logit: f32) -> Self {
        if action < self.action_space {
            self.base[action] = logit;
        }
        self
    }

    /// 只在第 t 步生效的分数
    pub fn with_step_logit(mut self, t: usize, action: usize, logit: f32) -> Self {
        self.step_overrides.insert((t, action), logit);
        self
    }

    pub fn with_history_coupling(mut self, coupling: f32) -> Self {
        self.history_coupling = coupling;
        self
    }

    fn history_feature(h0: f32, h1: f32, action: usize) -> f32 {
        ((h0 + h1) * (action + 1) as f32) % 5.0 / 5.0
    }
}

impl Decoder for TableDecoder {
    fn action_space(&self) -> usize {
        self.action_space
    }

    fn initial_state(&self, context: &ContextEncoding, _sketch: &SketchEncoding) -> Result<DecoderState> {
        let batch = context.batch_size();
        let mut state = DecoderState::zeros(batch, 2, 1);
        for b in 0..batch {
            state.hidden[[b, 0]] = context.mask.row(b).sum();
        }
        Ok(state)
    }

    fn step(
        &self,
        observation: &BatchedObservation,
        state: &DecoderState,
        _context: &ContextEncoding,
        _sketch: &SketchEncoding,
    ) -> Result<(Array2<f32>, DecoderState)> {
        let batch = observation.batch_size();
        if batch != state.batch_size() {
            bail!("观测批次 ({}) 与解码器状态批次 ({}) 不一致", batch, state.batch_size());
        }

        let mut next = state.clone();
        next.t = state.t + 1;
        let mut logits = Array2::zeros((batch, self.action_space));
        for row in 0..batch {
            let read = observation.read_ind[row];
            let h0 = state.hidden[[row, 0]];
            let h1 = state.hidden[[row, 1]] + (read + 1) as f32;
            next.hidden[[row, 1]] = h1;
            next.memory[[row, 0, 0]] = read as f32;

            for action in 0..self.action_space {
                let base = self
                    .step_overrides
                    .get(&(state.t, action))
                    .copied()
                    .unwrap_or(self.base[action]);
                logits[[row, action]] = base + self.history_coupling * Self::history_feature(h0, h1, action);
            }
        }
        Ok((logits, next))
    }
}
