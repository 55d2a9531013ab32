// src/model/torch.rs
// 基于 libtorch 的解码器 (需要 `torch` 特性)
//
// 输入特征 = [合法动作掩码, 上一步动作 one-hot, 上一步隐状态, 问题编码均值, 当前草图位置编码]
// h' = tanh(W_in x)，动作分数 = W_policy h'

use anyhow::{bail, Result};
use ndarray::{Array2, Array3};
use std::path::Path;
use tch::{nn, Device, Kind, Tensor};

use super::encoding::{ContextEncoding, DecoderState, SketchEncoding};
use super::Decoder;
use crate::observation::BatchedObservation;

pub struct TchDecoder {
    vs: nn::VarStore,
    input: nn::Linear,
    policy: nn::Linear,
    device: Device,
    action_space: usize,
    hidden: usize,
    context_dim: usize,
    sketch_dim: usize,
}

impl TchDecoder {
    /// 随机初始化
    ///
    /// # 参数
    ///
    /// * `action_space` - 动作空间大小
    /// * `hidden` - 隐状态维度
    /// * `context_dim` - 问题编码最后一维
    /// * `sketch_dim` - 草图编码最后一维 (无草图时以 0 填充)
    pub fn new(device: Device, action_space: usize, hidden: usize, context_dim: usize, sketch_dim: usize) -> Self {
        let vs = nn::VarStore::new(device);
        let root = vs.root();
        let width = 2 * action_space + hidden + context_dim + sketch_dim;
        let input = nn::linear(&root / "input", width as i64, hidden as i64, Default::default());
        let policy = nn::linear(&root / "policy", hidden as i64, action_space as i64, Default::default());
        Self {
            vs,
            input,
            policy,
            device,
            action_space,
            hidden,
            context_dim,
            sketch_dim,
        }
    }

    /// 加载模型权重
    pub fn load(&mut self, path: impl AsRef<Path>) -> Result<()> {
        self.vs.load(path)?;
        Ok(())
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        self.vs.save(path)?;
        Ok(())
    }

    fn input_width(&self) -> usize {
        2 * self.action_space + self.hidden + self.context_dim + self.sketch_dim
    }

    /// 第 row 行问题编码的掩码均值
    fn pooled_context(&self, context: &ContextEncoding, row: usize) -> Vec<f32> {
        let mut pooled = vec![0.0; self.context_dim];
        let mut count = 0.0;
        for l in 0..context.encoding.shape()[1] {
            if context.mask[[row, l]] > 0.0 {
                for (d, v) in pooled.iter_mut().enumerate() {
                    *v += context.encoding[[row, l, d]];
                }
                count += 1.0;
            }
        }
        if count > 0.0 {
            pooled.iter_mut().for_each(|v| *v /= count);
        }
        pooled
    }

    /// 第 row 行在第 t 步的草图编码，超出草图宽度为 0
    fn sketch_features(&self, sketch: &SketchEncoding, row: usize, t: usize) -> Vec<f32> {
        let mut out = vec![0.0; self.sketch_dim];
        if t < sketch.max_len() && sketch.value.shape()[2] == self.sketch_dim {
            for (d, v) in out.iter_mut().enumerate() {
                *v = sketch.value[[row, t, d]];
            }
        }
        out
    }
}

impl Decoder for TchDecoder {
    fn action_space(&self) -> usize {
        self.action_space
    }

    fn initial_state(&self, context: &ContextEncoding, _sketch: &SketchEncoding) -> Result<DecoderState> {
        if context.encoding.shape()[2] != self.context_dim && context.encoding.shape()[1] > 0 {
            bail!("问题编码维度 {} 与解码器配置 {} 不一致", context.encoding.shape()[2], self.context_dim);
        }
        Ok(DecoderState::zeros(context.batch_size(), self.hidden, 1))
    }

    fn step(
        &self,
        observation: &BatchedObservation,
        state: &DecoderState,
        context: &ContextEncoding,
        sketch: &SketchEncoding,
    ) -> Result<(Array2<f32>, DecoderState)> {
        let batch = observation.batch_size();
        if batch != state.batch_size() || batch != context.batch_size() {
            bail!(
                "批次不一致: 观测 {}, 状态 {}, 问题编码 {}",
                batch,
                state.batch_size(),
                context.batch_size()
            );
        }
        if batch == 0 {
            let mut next = state.clone();
            next.t += 1;
            return Ok((Array2::zeros((0, self.action_space)), next));
        }

        let width = self.input_width();
        let mut features: Vec<f32> = Vec::with_capacity(batch * width);
        for row in 0..batch {
            features.extend(observation.valid_action_mask.row(row).iter());
            let mut read = vec![0.0f32; self.action_space];
            if let Ok(action) = usize::try_from(observation.read_ind[row]) {
                if action < self.action_space {
                    read[action] = 1.0;
                }
            }
            features.extend(read);
            features.extend(state.hidden.row(row).iter());
            features.extend(self.pooled_context(context, row));
            features.extend(self.sketch_features(sketch, row, state.t));
        }

        let (logits_flat, hidden_flat) = tch::no_grad(|| {
            let xs = Tensor::from_slice(&features)
                .view([batch as i64, width as i64])
                .to_device(self.device)
                .to_kind(Kind::Float);
            let hidden = xs.apply(&self.input).tanh();
            let logits = hidden.apply(&self.policy);

            let mut logits_flat = vec![0.0f32; batch * self.action_space];
            let logits_len = logits_flat.len();
            logits.to_device(Device::Cpu).copy_data(&mut logits_flat, logits_len);

            let mut hidden_flat = vec![0.0f32; batch * self.hidden];
            let hidden_len = hidden_flat.len();
            hidden.to_device(Device::Cpu).copy_data(&mut hidden_flat, hidden_len);

            (logits_flat, hidden_flat)
        });

        let logits = Array2::from_shape_vec((batch, self.action_space), logits_flat)?;
        let hidden = Array2::from_shape_vec((batch, self.hidden), hidden_flat.clone())?;
        let memory = Array3::from_shape_vec((batch, 1, self.hidden), hidden_flat)?;
        Ok((logits, DecoderState { t: state.t + 1, hidden, memory }))
    }
}
