// src/search/scorer.rs
// 轨迹打分 (按记录动作逐步重放)
//
// 整批轨迹补齐到最大长度，逐步用记录的观测驱动解码器，
// 取记录动作在掩码 log-softmax 下的对数概率。
// 轨迹对数概率 = 草图先验 + 变量落地步的对数概率之和。

use ndarray::{Array1, Array2};
use std::sync::Arc;

use super::agent::Agent;
use super::error::{ensure_batch, SearchError, SearchResult};
use super::events::EventSink;
use super::ops::{masked_entropy, masked_log_softmax};
use crate::batch::BatchedState;
use crate::env::{QuestionContext, Trajectory};
use crate::observation::BatchedSequence;
use crate::sketch::Sketch;

/// 打分结果
#[derive(Debug, Clone)]
pub struct TrajectoryScores {
    /// 每条轨迹的对数概率 (含草图先验)
    pub log_probs: Vec<f32>,
    /// 草图先验对数概率
    pub sketch_log_probs: Vec<f32>,
    /// (batch, max_len) 每步记录动作的对数概率，补齐位置为 0
    pub step_log_probs: Array2<f32>,
    /// 按有效步数归一化的熵 (仅在请求时计算)
    pub entropy: Option<Vec<f32>>,
}

impl<'m, S: EventSink> Agent<'m, S> {
    /// 为每条轨迹打分，草图由程序推导 (`Sketch::from_program`)
    pub fn score_trajectories(&self, trajectories: &[Trajectory], with_entropy: bool) -> SearchResult<TrajectoryScores> {
        let sketches: Vec<Arc<Sketch>> = trajectories
            .iter()
            .map(|t| Arc::new(Sketch::from_program(&t.program)))
            .collect();
        self.score_trajectories_with(trajectories, &sketches, with_entropy)
    }

    /// 使用给定草图为轨迹打分
    ///
    /// # 参数
    ///
    /// * `trajectories` - 完整轨迹
    /// * `sketches` - 与轨迹一一对应的草图
    /// * `with_entropy` - 是否计算策略熵
    pub fn score_trajectories_with(
        &self,
        trajectories: &[Trajectory],
        sketches: &[Arc<Sketch>],
        with_entropy: bool,
    ) -> SearchResult<TrajectoryScores> {
        ensure_batch("trajectory sketches", trajectories.len(), sketches.len())?;
        let batch = trajectories.len();
        if batch == 0 {
            return Ok(TrajectoryScores {
                log_probs: Vec::new(),
                sketch_log_probs: Vec::new(),
                step_log_probs: Array2::zeros((0, 0)),
                entropy: with_entropy.then(Vec::new),
            });
        }

        for (traj, sketch) in trajectories.iter().zip(sketches) {
            if traj.len() > sketch.len() {
                return Err(SearchError::Desynchronized {
                    question: traj.env_name.clone(),
                    t: sketch.len(),
                    sketch_len: sketch.len(),
                });
            }
        }

        let models = self.models();
        let action_space = models.decoder.action_space();
        let sequence = BatchedSequence::from_trajectories(trajectories, action_space)?;

        let contexts: Vec<&QuestionContext> = trajectories.iter().map(|t| t.context.as_ref()).collect();
        let context = models.encoder.encode(&contexts)?;
        let sketch_priors = models.sketch_predictor.sketch_log_probs(&contexts, sketches)?;
        ensure_batch("sketch priors", batch, sketch_priors.len())?;
        let sketch = self.encode_sketches(sketches)?;
        let decoder = models.decoder.initial_state(&context, &sketch)?;
        let mut state = BatchedState::new(context, sketch, decoder, Array1::zeros(batch))?;

        let mut step_log_probs = Array2::zeros((batch, sequence.max_len()));
        let mut grounded = Array1::<f32>::zeros(batch);
        let mut entropy = Array1::<f32>::zeros(batch);

        for t in 0..sequence.max_len() {
            let observation = sequence.slice(t);
            let (logits, next) = models
                .decoder
                .step(observation, &state.decoder, &state.context, &state.sketch)?;
            ensure_batch("action scores", batch, logits.nrows())?;
            ensure_batch("action space", action_space, logits.ncols())?;

            for row in 0..batch {
                // 补齐步不参与
                if sequence.tgt_action_mask[[row, t]] == 0.0 {
                    continue;
                }
                let valid = observation.valid_actions(row);
                let log_probs = masked_log_softmax(logits.row(row), valid);
                let action = sequence.tgt_action_ids[[row, t]];
                let log_prob = log_probs[action];

                step_log_probs[[row, t]] = log_prob;
                // 固定 token 步不计分 (避免 -inf * 0)
                let weight = state.sketch.variable_step_mask(row, t);
                if weight > 0.0 {
                    grounded[row] += log_prob * weight;
                }
                if with_entropy {
                    entropy[row] += masked_entropy(logits.row(row), valid);
                }
            }

            state = state.with_decoder(next)?;
        }

        let log_probs: Vec<f32> = sketch_priors.iter().zip(grounded.iter()).map(|(p, g)| p + g).collect();
        let entropy = with_entropy.then(|| {
            trajectories
                .iter()
                .zip(entropy.iter())
                .map(|(traj, h)| if traj.is_empty() { 0.0 } else { h / traj.len() as f32 })
                .collect()
        });

        Ok(TrajectoryScores {
            log_probs,
            sketch_log_probs: sketch_priors,
            step_log_probs,
            entropy,
        })
    }

    /// 轨迹 (对数) 概率，`log == false` 时返回概率
    pub fn trajectory_probs(&self, trajectories: &[Trajectory], log: bool) -> SearchResult<Vec<f32>> {
        let scores = self.score_trajectories(trajectories, false)?;
        Ok(if log {
            scores.log_probs
        } else {
            scores.log_probs.into_iter().map(f32::exp).collect()
        })
    }
}
