// src/search/sampler.rs
// 随机采样
//
// 1. 每个问题取若干候选草图，按带温度的 softmax 有放回地抽 K 个
// 2. 每个抽到的草图克隆一份环境，得到一个假设
// 3. 所有假设同步前进: 固定 token 步强制执行草图动作，变量槽步从掩码策略中采样
//
// 无约束版本 (`sample_unconstrained`) 不使用草图，每一步都从策略采样并计分。

use ndarray::{Array1, ArrayView1};
use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;
use std::sync::Arc;

use super::agent::{Agent, ConstraintSketches};
use super::error::{SearchError, SearchResult};
use super::events::{DiscardReason, EventSink, SearchEvent, SearchKind};
use super::hypothesis::{Hypothesis, HypothesisStatus};
use super::ops::{masked_log_softmax, masked_softmax, softmax_with_temperature};
use crate::batch::{BatchedState, Gather};
use crate::env::{Observation, ProgramEnv, Sample};
use crate::model::SketchEncoding;
use crate::sketch::{Sketch, SketchToken};

/// 单个假设在一步中的动作选择
enum Choice {
    Act { relative: usize, log_prob: f32 },
    Discard(DiscardReason),
}

/// 从掩码分布中采样一个动作，返回 (相对动作, 对数概率)
fn sample_action<R: Rng + ?Sized>(logits: ArrayView1<f32>, valid: &[usize], rng: &mut R) -> Option<(usize, f32)> {
    let log_probs = masked_log_softmax(logits, valid);
    let probs = masked_softmax(logits, valid);
    let weights: Vec<f32> = valid.iter().map(|&a| probs[a]).collect();
    let dist = WeightedIndex::new(&weights).ok()?;
    let relative = dist.sample(rng);
    Some((relative, log_probs[valid[relative]]))
}

impl<'m, S: EventSink> Agent<'m, S> {
    /// 草图约束采样
    ///
    /// # 参数
    ///
    /// * `envs` - 每个问题一个环境 (不会被修改)
    /// * `k` - 每个问题抽取的样本数
    /// * `constraint` - 外部给定的候选草图，None 时调用草图预测器
    /// * `rng` - 随机数生成器
    ///
    /// # 返回
    ///
    /// 所有正常结束的样本 (每个问题至多 `k` 个)
    pub fn sample<E, R>(
        &mut self,
        envs: &[E],
        k: usize,
        constraint: Option<&ConstraintSketches>,
        rng: &mut R,
    ) -> SearchResult<Vec<Sample>>
    where
        E: ProgramEnv,
        R: Rng + ?Sized,
    {
        if k == 0 {
            return Ok(Vec::new());
        }
        let questions = self.searchable(envs);
        let candidates = self.candidate_sketches(&questions, constraint)?;
        let temperature = self.config().sketch_sample_temperature;

        // 抽草图并克隆环境
        let mut hyps = Vec::new();
        let mut context_rows = Vec::new();
        for (row, ((q, env), sketches)) in questions.iter().zip(&candidates).enumerate() {
            if sketches.is_empty() {
                continue;
            }
            let priors: Vec<f32> = sketches.iter().map(|s| s.log_prob).collect();
            let dist = match WeightedIndex::new(softmax_with_temperature(&priors, temperature)) {
                Ok(dist) => dist,
                Err(e) => {
                    log::warn!("问题 {} 的草图分布无效: {}", env.name(), e);
                    continue;
                }
            };
            for _ in 0..k {
                let drawn = &sketches[dist.sample(rng)];
                hyps.push(Hypothesis::new(*q, Some(Arc::clone(&drawn.sketch)), (*env).clone(), drawn.log_prob));
                context_rows.push(row);
            }
        }

        self.emit(|| SearchEvent::SearchStarted {
            kind: SearchKind::Sample,
            questions: questions.len(),
            hypotheses: hyps.len(),
        });
        if hyps.is_empty() {
            return Ok(Vec::new());
        }

        let context = self.encode_questions(&questions)?.gather(&context_rows);
        let sketches: Vec<Arc<Sketch>> = hyps.iter().filter_map(|h| h.sketch.clone()).collect();
        let sketch = self.encode_sketches(&sketches)?;
        let decoder = self.models().decoder.initial_state(&context, &sketch)?;
        let scores = hyps.iter().map(|h| h.score).collect();
        let state = BatchedState::new(context, sketch, decoder, scores)?;

        self.rollout(hyps, state, |t, hyp, logits, valid, weight, rng| {
            let sketch = hyp.sketch.as_deref().ok_or_else(|| SearchError::Desynchronized {
                question: hyp.env.name().to_string(),
                t,
                sketch_len: 0,
            })?;
            match sketch.get(t) {
                None => Err(SearchError::Desynchronized {
                    question: hyp.env.name().to_string(),
                    t,
                    sketch_len: sketch.len(),
                }),
                // 固定 token: 强制执行草图动作，忽略策略输出
                Some(SketchToken::Fixed(token)) => {
                    let observation = hyp.env.observation();
                    Ok(match hyp
                        .env
                        .lookup_action(token)
                        .and_then(|a| observation.relative_index(a))
                    {
                        Some(relative) => Choice::Act { relative, log_prob: 0.0 },
                        None => Choice::Discard(DiscardReason::ConstraintViolation),
                    })
                }
                Some(SketchToken::Variable) => Ok(match sample_action(logits, valid, rng) {
                    Some((relative, log_prob)) => Choice::Act { relative, log_prob: log_prob * weight },
                    None => Choice::Discard(DiscardReason::NoValidAction),
                }),
            }
        }, rng)
    }

    /// 无草图采样: 每个环境克隆 `k` 份，每一步都从策略采样并计分
    pub fn sample_unconstrained<E, R>(&mut self, envs: &[E], k: usize, rng: &mut R) -> SearchResult<Vec<Sample>>
    where
        E: ProgramEnv,
        R: Rng + ?Sized,
    {
        if k == 0 {
            return Ok(Vec::new());
        }
        let questions = self.searchable(envs);
        let mut hyps = Vec::with_capacity(questions.len() * k);
        let mut context_rows = Vec::with_capacity(questions.len() * k);
        for (row, (q, env)) in questions.iter().enumerate() {
            for _ in 0..k {
                hyps.push(Hypothesis::new(*q, None, (*env).clone(), 0.0));
                context_rows.push(row);
            }
        }

        self.emit(|| SearchEvent::SearchStarted {
            kind: SearchKind::SampleUnconstrained,
            questions: questions.len(),
            hypotheses: hyps.len(),
        });
        if hyps.is_empty() {
            return Ok(Vec::new());
        }

        let context = self.encode_questions(&questions)?.gather(&context_rows);
        let sketch = SketchEncoding::empty(hyps.len());
        let decoder = self.models().decoder.initial_state(&context, &sketch)?;
        let state = BatchedState::new(context, sketch, decoder, Array1::zeros(hyps.len()))?;

        self.rollout(
            hyps,
            state,
            |_, _, logits, valid, _, rng| {
                Ok(match sample_action(logits, valid, rng) {
                    Some((relative, log_prob)) => Choice::Act { relative, log_prob },
                    None => Choice::Discard(DiscardReason::NoValidAction),
                })
            },
            rng,
        )
    }

    /// 同步推进所有假设，直到没有活跃假设
    ///
    /// `choose(t, hyp, logits, valid, variable_weight, rng)` 决定每个假设本步的动作。
    fn rollout<E, R, F>(
        &mut self,
        mut hyps: Vec<Hypothesis<E>>,
        mut state: BatchedState,
        mut choose: F,
        rng: &mut R,
    ) -> SearchResult<Vec<Sample>>
    where
        E: ProgramEnv,
        R: Rng + ?Sized,
        F: FnMut(usize, &Hypothesis<E>, ArrayView1<f32>, &[usize], f32, &mut R) -> SearchResult<Choice>,
    {
        let mut samples = Vec::new();
        let mut t = 0;

        while !hyps.is_empty() {
            self.emit(|| SearchEvent::StepStarted { t, active: hyps.len() });

            let observations: Vec<&Observation> = hyps.iter().map(|h| h.env.observation()).collect();
            let names: Vec<&str> = hyps.iter().map(|h| h.env.name()).collect();
            let (logits, batched, next) = self.decode_step(&observations, &names, &state)?;

            let mut scores = state.scores.clone();
            let mut survivors = Vec::with_capacity(hyps.len());
            let mut next_hyps = Vec::with_capacity(hyps.len());

            for (row, hyp) in hyps.iter().enumerate() {
                let weight = state.sketch.variable_step_mask(row, t);
                let choice = choose(t, hyp, logits.row(row), batched.valid_actions(row), weight, rng)?;
                let (relative, log_prob) = match choice {
                    Choice::Act { relative, log_prob } => (relative, log_prob),
                    Choice::Discard(reason) => {
                        self.emit(|| SearchEvent::HypothesisDiscarded {
                            question: hyp.env.name().to_string(),
                            reason,
                            score: hyp.score,
                        });
                        continue;
                    }
                };

                scores[row] = hyp.score + log_prob;
                let child = hyp.advance(relative, scores[row])?;
                match child.status() {
                    HypothesisStatus::Active => {
                        survivors.push(row);
                        next_hyps.push(child);
                    }
                    HypothesisStatus::Completed => {
                        self.emit(|| SearchEvent::HypothesisCompleted {
                            question: child.env.name().to_string(),
                            program: child.program_text(),
                            score: child.score,
                        });
                        samples.push(child.into_sample());
                    }
                    HypothesisStatus::Failed => {
                        self.emit(|| SearchEvent::HypothesisDiscarded {
                            question: child.env.name().to_string(),
                            reason: DiscardReason::ExecutionError,
                            score: child.score,
                        });
                    }
                }
            }

            // 所有缓冲按存活假设重排
            state = state.with_decoder(next)?.with_scores(scores)?.gather(&survivors);
            hyps = next_hyps;
            t += 1;
        }

        Ok(samples)
    }
}
