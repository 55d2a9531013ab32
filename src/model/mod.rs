// src/model/mod.rs
// 神经网络协作方接口定义
//
// 搜索引擎只消费这些接口的输出 (动作打分、编码缓冲)，
// 不关心分数在网络内部如何计算。

pub mod encoding;
pub mod fixed;
#[cfg(feature = "torch")]
pub mod torch;

pub use encoding::{ContextEncoding, DecoderState, SketchEncoding};
pub use fixed::{BagOfTokensEncoder, FixedSketchPredictor, StructureSketchEncoder, TableDecoder};
#[cfg(feature = "torch")]
pub use torch::TchDecoder;

use anyhow::Result;
use ndarray::Array2;
use std::sync::Arc;

use crate::env::QuestionContext;
use crate::observation::BatchedObservation;
use crate::sketch::{ScoredSketch, Sketch};

/// 问题编码器
pub trait ContextEncoder {
    /// 每个上下文编码为一行
    fn encode(&self, contexts: &[&QuestionContext]) -> Result<ContextEncoding>;
}

/// 草图预测器
pub trait SketchPredictor {
    /// 为每个问题给出至多 `k` 个草图及其先验对数概率 (按概率降序)
    fn get_sketches(&self, contexts: &[&QuestionContext], k: usize) -> Result<Vec<Vec<ScoredSketch>>>;

    /// 给定草图在对应问题下的先验对数概率
    fn sketch_log_probs(&self, contexts: &[&QuestionContext], sketches: &[Arc<Sketch>]) -> Result<Vec<f32>>;
}

/// 草图编码器
pub trait SketchEncoder {
    /// 编码结果至少包含与草图长度对齐的 `var_time_step_mask`
    fn encode(&self, sketches: &[Arc<Sketch>]) -> Result<SketchEncoding>;
}

/// 逐步解码器
pub trait Decoder {
    /// 动作空间大小 (打分向量长度)
    fn action_space(&self) -> usize;

    fn initial_state(&self, context: &ContextEncoding, sketch: &SketchEncoding) -> Result<DecoderState>;

    /// 解码一步
    ///
    /// # 返回
    ///
    /// * `Array2<f32>` - (batch, action_space) 的原始动作分数 (未 mask / softmax)
    /// * `DecoderState` - 下一步状态，与输入逐行对齐
    fn step(
        &self,
        observation: &BatchedObservation,
        state: &DecoderState,
        context: &ContextEncoding,
        sketch: &SketchEncoding,
    ) -> Result<(Array2<f32>, DecoderState)>;
}

/// 搜索所需的全部协作方
#[derive(Clone, Copy)]
pub struct Models<'m> {
    pub encoder: &'m dyn ContextEncoder,
    pub sketch_predictor: &'m dyn SketchPredictor,
    pub sketch_encoder: &'m dyn SketchEncoder,
    pub decoder: &'m dyn Decoder,
}
