// src/batch.rs
// 批量状态重排 (Re-indexing)
//
// 活跃假设集合每一步都可能缩小或重排。所有与假设逐行对齐的缓冲区
// (问题编码、草图编码、解码器循环状态与内存、累计分数) 都必须按同一组
// 下标重排，否则下一次批量解码会读到别的假设的状态。
// 这里只实现一次 `gather`，所有搜索算法共用。

use ndarray::{Array, Array1, Axis, RemoveAxis};

use crate::model::{ContextEncoding, DecoderState, SketchEncoding};
use crate::search::error::{ensure_batch, SearchResult};

/// 按第 0 维下标收集，返回新分配的缓冲区 (不原地修改)
pub trait Gather {
    fn gather(&self, indices: &[usize]) -> Self;
}

impl<A: Clone, D: RemoveAxis> Gather for Array<A, D> {
    fn gather(&self, indices: &[usize]) -> Self {
        self.select(Axis(0), indices)
    }
}

impl<T: Clone> Gather for Vec<T> {
    fn gather(&self, indices: &[usize]) -> Self {
        indices.iter().map(|&i| self[i].clone()).collect()
    }
}

impl Gather for ContextEncoding {
    fn gather(&self, indices: &[usize]) -> Self {
        Self {
            encoding: self.encoding.gather(indices),
            mask: self.mask.gather(indices),
        }
    }
}

impl Gather for SketchEncoding {
    fn gather(&self, indices: &[usize]) -> Self {
        Self {
            value: self.value.gather(indices),
            mask: self.mask.gather(indices),
            var_time_step_mask: self.var_time_step_mask.gather(indices),
        }
    }
}

impl Gather for DecoderState {
    fn gather(&self, indices: &[usize]) -> Self {
        Self {
            t: self.t,
            hidden: self.hidden.gather(indices),
            memory: self.memory.gather(indices),
        }
    }
}

// ================ 批量搜索状态 ================

/// 与活跃假设逐行对齐的全部辅助缓冲
#[derive(Debug, Clone, PartialEq)]
pub struct BatchedState {
    pub context: ContextEncoding,
    pub sketch: SketchEncoding,
    pub decoder: DecoderState,
    /// 每个假设的累计对数分数
    pub scores: Array1<f32>,
}

impl BatchedState {
    /// 组装批量状态，并检查所有缓冲区批次维一致
    pub fn new(
        context: ContextEncoding,
        sketch: SketchEncoding,
        decoder: DecoderState,
        scores: Array1<f32>,
    ) -> SearchResult<Self> {
        let batch = scores.len();
        ensure_batch("context encoding", batch, context.batch_size())?;
        ensure_batch("sketch encoding", batch, sketch.batch_size())?;
        ensure_batch("decoder state", batch, decoder.batch_size())?;
        Ok(Self { context, sketch, decoder, scores })
    }

    pub fn batch_size(&self) -> usize {
        self.scores.len()
    }

    /// 替换解码器状态 (解码一步之后)
    pub fn with_decoder(self, decoder: DecoderState) -> SearchResult<Self> {
        ensure_batch("decoder state", self.batch_size(), decoder.batch_size())?;
        Ok(Self { decoder, ..self })
    }

    /// 替换累计分数
    pub fn with_scores(self, scores: Array1<f32>) -> SearchResult<Self> {
        ensure_batch("scores", self.batch_size(), scores.len())?;
        Ok(Self { scores, ..self })
    }
}

impl Gather for BatchedState {
    fn gather(&self, indices: &[usize]) -> Self {
        Self {
            context: self.context.gather(indices),
            sketch: self.sketch.gather(indices),
            decoder: self.decoder.gather(indices),
            scores: self.scores.gather(indices),
        }
    }
}
