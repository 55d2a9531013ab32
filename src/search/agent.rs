// src/search/agent.rs
// 搜索代理: 持有协作方、配置与事件接收器，各搜索算法都实现为它的方法

use ndarray::Array2;
use std::collections::HashMap;
use std::sync::Arc;

use super::error::{ensure_batch, SearchResult};
use super::events::{EventSink, NoopSink, SearchEvent};
use crate::batch::BatchedState;
use crate::config::SearchConfig;
use crate::env::{Observation, ProgramEnv, QuestionContext, Sample};
use crate::model::{ContextEncoding, DecoderState, Models, SketchEncoding};
use crate::observation::BatchedObservation;
use crate::sketch::{ScoredSketch, Sketch};

/// 外部给定的候选草图: 问题名称 -> 草图列表
pub type ConstraintSketches = HashMap<String, Vec<ScoredSketch>>;

/// 单个问题的搜索结果
#[derive(Debug, Clone)]
pub struct QuestionResult {
    pub name: String,
    /// 按分数降序
    pub samples: Vec<Sample>,
}

/// 束搜索输出: 与输入环境一一对应 (被缓存过滤的问题结果为空)
#[derive(Debug, Clone, Default)]
pub struct BeamSearchOutput {
    pub per_question: Vec<QuestionResult>,
}

impl BeamSearchOutput {
    /// 按问题名称查找
    pub fn get(&self, name: &str) -> Option<&[Sample]> {
        self.per_question
            .iter()
            .find(|r| r.name == name)
            .map(|r| r.samples.as_slice())
    }

    pub fn len(&self) -> usize {
        self.per_question.len()
    }

    pub fn is_empty(&self) -> bool {
        self.per_question.is_empty()
    }

    /// 展平为一个列表 (按输入顺序)
    pub fn into_list(self) -> Vec<Sample> {
        self.per_question.into_iter().flat_map(|r| r.samples).collect()
    }
}

/// 搜索代理
///
/// 泛型 `S` 为事件接收器，默认 `NoopSink` 不产生任何事件。
pub struct Agent<'m, S: EventSink = NoopSink> {
    models: Models<'m>,
    config: SearchConfig,
    sink: S,
}

impl<'m> Agent<'m, NoopSink> {
    pub fn new(models: Models<'m>, config: SearchConfig) -> Self {
        Self { models, config, sink: NoopSink }
    }
}

impl<'m, S: EventSink> Agent<'m, S> {
    /// 替换事件接收器
    pub fn with_sink<T: EventSink>(self, sink: T) -> Agent<'m, T> {
        Agent { models: self.models, config: self.config, sink }
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    pub fn models(&self) -> Models<'m> {
        self.models
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    /// 只有接收器启用时才构造事件
    pub(crate) fn emit<F: FnOnce() -> SearchEvent>(&mut self, event: F) {
        if self.sink.enabled() {
            let event = event();
            self.sink.record(&event);
        }
    }

    /// 参与搜索的环境及其输入下标 (开启 `use_cache` 时跳过探索已满的环境)
    pub(crate) fn searchable<'e, E: ProgramEnv>(&self, envs: &'e [E]) -> Vec<(usize, &'e E)> {
        envs.iter()
            .enumerate()
            .filter(|(_, env)| {
                let skip = self.config.use_cache && env.exploration_exhausted();
                if skip {
                    log::debug!("跳过探索已满的环境 {}", env.name());
                }
                !skip
            })
            .collect()
    }

    /// 每个问题的候选草图: 优先使用外部约束，否则调用草图预测器
    pub(crate) fn candidate_sketches<E: ProgramEnv>(
        &self,
        envs: &[(usize, &E)],
        constraint: Option<&ConstraintSketches>,
    ) -> SearchResult<Vec<Vec<ScoredSketch>>> {
        if let Some(constraint) = constraint {
            return Ok(envs
                .iter()
                .map(|(_, env)| constraint.get(env.name()).cloned().unwrap_or_default())
                .collect());
        }
        let contexts: Vec<&QuestionContext> = envs.iter().map(|(_, env)| env.context().as_ref()).collect();
        let sketches = self
            .models
            .sketch_predictor
            .get_sketches(&contexts, self.config.num_sketches)?;
        ensure_batch("sketch predictions", envs.len(), sketches.len())?;
        Ok(sketches)
    }

    /// 每个问题编码一次 (一行一个问题)
    pub(crate) fn encode_questions<E: ProgramEnv>(&self, envs: &[(usize, &E)]) -> SearchResult<ContextEncoding> {
        let contexts: Vec<&QuestionContext> = envs.iter().map(|(_, env)| env.context().as_ref()).collect();
        let encoding = self.models.encoder.encode(&contexts)?;
        ensure_batch("context encoding", envs.len(), encoding.batch_size())?;
        Ok(encoding)
    }

    pub(crate) fn encode_sketches(&self, sketches: &[Arc<Sketch>]) -> SearchResult<SketchEncoding> {
        let encoding = self.models.sketch_encoder.encode(sketches)?;
        ensure_batch("sketch encoding", sketches.len(), encoding.batch_size())?;
        Ok(encoding)
    }

    /// 对所有活跃假设执行一次批量解码
    ///
    /// # 返回
    ///
    /// * `Array2<f32>` - (batch, action_space) 原始动作分数
    /// * `BatchedObservation` - 本步的批量观测
    /// * `DecoderState` - 下一步解码器状态 (尚未重排)
    pub(crate) fn decode_step(
        &self,
        observations: &[&Observation],
        names: &[&str],
        state: &BatchedState,
    ) -> SearchResult<(Array2<f32>, BatchedObservation, DecoderState)> {
        let action_space = self.models.decoder.action_space();
        let batched = BatchedObservation::from_observations(observations, action_space, names)?;
        ensure_batch("observations", state.batch_size(), batched.batch_size())?;

        let (logits, next) =
            self.models
                .decoder
                .step(&batched, &state.decoder, &state.context, &state.sketch)?;
        ensure_batch("action scores", state.batch_size(), logits.nrows())?;
        ensure_batch("action space", action_space, logits.ncols())?;
        ensure_batch("next decoder state", state.batch_size(), next.batch_size())?;
        Ok((logits, batched, next))
    }
}
