// src/model/encoding.rs
// 协作方之间传递的批量数值缓冲区 (第 0 维均为批次维)

use ndarray::{Array2, Array3};
use std::sync::Arc;

use crate::sketch::Sketch;

/// 问题编码 (每个问题/假设一行)
#[derive(Debug, Clone, PartialEq)]
pub struct ContextEncoding {
    /// (batch, question_len, hidden)
    pub encoding: Array3<f32>,
    /// (batch, question_len)，有效 token 为 1.0
    pub mask: Array2<f32>,
}

impl ContextEncoding {
    pub fn batch_size(&self) -> usize {
        self.encoding.shape()[0]
    }
}

/// 草图编码
#[derive(Debug, Clone, PartialEq)]
pub struct SketchEncoding {
    /// (batch, sketch_len, hidden)
    pub value: Array3<f32>,
    /// (batch, sketch_len)，有效位置为 1.0
    pub mask: Array2<f32>,
    /// (batch, sketch_len)，变量落地步为 1.0
    pub var_time_step_mask: Array2<f32>,
}

impl SketchEncoding {
    /// 不带草图的空编码 (无约束搜索使用)
    pub fn empty(batch_size: usize) -> Self {
        Self {
            value: Array3::zeros((batch_size, 0, 0)),
            mask: Array2::zeros((batch_size, 0)),
            var_time_step_mask: Array2::zeros((batch_size, 0)),
        }
    }

    /// 仅由草图结构构造掩码，`value` 置零
    pub fn from_sketches(sketches: &[Arc<Sketch>], hidden: usize) -> Self {
        let max_len = sketches.iter().map(|s| s.len()).max().unwrap_or(0);
        let mut mask = Array2::zeros((sketches.len(), max_len));
        let mut var_mask = Array2::zeros((sketches.len(), max_len));
        for (row, sketch) in sketches.iter().enumerate() {
            for (t, v) in sketch.variable_mask().into_iter().enumerate() {
                mask[[row, t]] = 1.0;
                var_mask[[row, t]] = v;
            }
        }
        Self {
            value: Array3::zeros((sketches.len(), max_len, hidden)),
            mask,
            var_time_step_mask: var_mask,
        }
    }

    pub fn batch_size(&self) -> usize {
        self.mask.shape()[0]
    }

    pub fn max_len(&self) -> usize {
        self.mask.shape()[1]
    }

    /// 第 row 个假设在第 t 步的变量落地掩码，超出草图宽度为 0.0
    pub fn variable_step_mask(&self, row: usize, t: usize) -> f32 {
        if t < self.max_len() {
            self.var_time_step_mask[[row, t]]
        } else {
            0.0
        }
    }
}

/// 解码器状态
///
/// `hidden` 为循环状态，`memory` 为每个假设计算出的中间值缓冲；
/// 两者都与当前活跃假设列表逐行对齐。
#[derive(Debug, Clone, PartialEq)]
pub struct DecoderState {
    /// 已执行的解码步数
    pub t: usize,
    /// (batch, hidden)
    pub hidden: Array2<f32>,
    /// (batch, memory_size, hidden)
    pub memory: Array3<f32>,
}

impl DecoderState {
    pub fn zeros(batch_size: usize, hidden: usize, memory_size: usize) -> Self {
        Self {
            t: 0,
            hidden: Array2::zeros((batch_size, hidden)),
            memory: Array3::zeros((batch_size, memory_size, hidden)),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.hidden.shape()[0]
    }
}
