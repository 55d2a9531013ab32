// src/search/beam.rs
// 草图引导的束搜索
//
// 每个问题维护一个束。每一步:
// 1. 对所有活跃假设做一次批量解码
// 2. 变量槽步枚举全部合法动作作为候选；固定 token 步只有草图动作一个候选
// 3. 每个问题把已完成假设与候选放进同一个池，按分数稳定降序排序后依次录取，
//    录取数达到束宽即停止 (开启草图覆盖时继续为尚未覆盖的草图补录)
// 4. 所有批量缓冲按存活子假设的父行号重排

use std::collections::HashSet;
use std::sync::Arc;

use super::agent::{Agent, BeamSearchOutput, ConstraintSketches, QuestionResult};
use super::error::{SearchError, SearchResult};
use super::events::{DiscardReason, EventSink, SearchEvent, SearchKind};
use super::hypothesis::{Continuation, Hypothesis, HypothesisStatus, PoolEntry};
use super::ops::{masked_log_softmax, stable_sort_desc};
use crate::batch::{BatchedState, Gather};
use crate::env::{Observation, ProgramEnv};
use crate::sketch::{Sketch, SketchToken};

impl<'m, S: EventSink> Agent<'m, S> {
    /// 草图引导的束搜索
    ///
    /// # 参数
    ///
    /// * `envs` - 每个问题一个环境 (不会被修改)
    /// * `beam_width` - 束宽 B
    /// * `constraint` - 外部给定的候选草图，None 时调用草图预测器
    /// * `force_sketch_coverage` - 保证束中出现过的每个草图在下一步至少保留一个假设
    ///
    /// # 返回
    ///
    /// 与 `envs` 一一对应的结果，每个问题至多 B 个，按分数降序
    pub fn beam_search<E: ProgramEnv>(
        &mut self,
        envs: &[E],
        beam_width: usize,
        constraint: Option<&ConstraintSketches>,
        force_sketch_coverage: bool,
    ) -> SearchResult<BeamSearchOutput> {
        let questions = self.searchable(envs);
        let candidates = self.candidate_sketches(&questions, constraint)?;

        // 初始束: 每个 (问题, 候选草图) 一个假设，分数为草图先验
        let mut beams: Vec<(usize, Vec<Hypothesis<E>>)> = Vec::new();
        let mut context_rows = Vec::new();
        for (row, ((q, env), sketches)) in questions.iter().zip(&candidates).enumerate() {
            if sketches.is_empty() {
                continue;
            }
            let beam = sketches
                .iter()
                .map(|s| Hypothesis::new(*q, Some(Arc::clone(&s.sketch)), (*env).clone(), s.log_prob))
                .collect::<Vec<_>>();
            context_rows.extend(std::iter::repeat(row).take(beam.len()));
            beams.push((*q, beam));
        }
        let mut completed: Vec<Vec<Hypothesis<E>>> = envs.iter().map(|_| Vec::new()).collect();

        self.emit(|| SearchEvent::SearchStarted {
            kind: SearchKind::BeamSearch,
            questions: questions.len(),
            hypotheses: context_rows.len(),
        });

        if !beams.is_empty() {
            let context = self.encode_questions(&questions)?.gather(&context_rows);
            let sketches: Vec<Arc<Sketch>> = beams
                .iter()
                .flat_map(|(_, beam)| beam.iter().filter_map(|h| h.sketch.clone()))
                .collect();
            let sketch = self.encode_sketches(&sketches)?;
            let decoder = self.models().decoder.initial_state(&context, &sketch)?;
            let scores = beams.iter().flat_map(|(_, beam)| beam.iter().map(|h| h.score)).collect();
            let state = BatchedState::new(context, sketch, decoder, scores)?;

            self.run_beams(beams, state, &mut completed, beam_width, force_sketch_coverage)?;
        }

        Ok(self.finalize(envs, completed, beam_width))
    }

    fn run_beams<E: ProgramEnv>(
        &mut self,
        mut beams: Vec<(usize, Vec<Hypothesis<E>>)>,
        mut state: BatchedState,
        completed: &mut [Vec<Hypothesis<E>>],
        beam_width: usize,
        force_sketch_coverage: bool,
    ) -> SearchResult<()> {
        let mut t = 0;

        while !beams.is_empty() {
            let active: usize = beams.iter().map(|(_, beam)| beam.len()).sum();
            self.emit(|| SearchEvent::StepStarted { t, active });

            let observations: Vec<&Observation> =
                beams.iter().flat_map(|(_, beam)| beam.iter().map(|h| h.env.observation())).collect();
            let names: Vec<&str> = beams.iter().flat_map(|(_, beam)| beam.iter().map(|h| h.env.name())).collect();
            let (logits, batched, next) = self.decode_step(&observations, &names, &state)?;

            let mut new_beams = Vec::new();
            let mut parents = Vec::new();
            let mut new_scores = Vec::new();
            let mut beam_start = 0;

            for (q, beam) in &beams {
                // ---- 展开候选 ----
                let mut candidates = Vec::new();
                for (local, hyp) in beam.iter().enumerate() {
                    let row = beam_start + local;
                    let sketch = hyp.sketch.as_ref().ok_or_else(|| SearchError::Desynchronized {
                        question: hyp.env.name().to_string(),
                        t,
                        sketch_len: 0,
                    })?;
                    let token = sketch.get(t).ok_or_else(|| SearchError::Desynchronized {
                        question: hyp.env.name().to_string(),
                        t,
                        sketch_len: sketch.len(),
                    })?;

                    match token {
                        SketchToken::Variable => {
                            let weight = state.sketch.variable_step_mask(row, t);
                            let valid = batched.valid_actions(row);
                            let log_probs = masked_log_softmax(logits.row(row), valid);
                            let before = candidates.len();
                            for (relative, &action) in valid.iter().enumerate() {
                                let score = hyp.score + log_probs[action] * weight;
                                // 被掩码的动作 (非有限分数) 不进入候选池
                                if !score.is_finite() {
                                    continue;
                                }
                                self.emit(|| SearchEvent::CandidateGenerated {
                                    question: hyp.env.name().to_string(),
                                    sketch: Some(sketch.to_string()),
                                    action: hyp.env.action_token(action).unwrap_or("?").to_string(),
                                    score,
                                });
                                candidates.push(Continuation {
                                    parent: row,
                                    local,
                                    sketch: Some(Arc::clone(sketch)),
                                    relative_action: relative,
                                    action,
                                    score,
                                });
                            }
                            if candidates.len() == before {
                                self.emit(|| SearchEvent::HypothesisDiscarded {
                                    question: hyp.env.name().to_string(),
                                    reason: DiscardReason::NoValidAction,
                                    score: hyp.score,
                                });
                            }
                        }
                        SketchToken::Fixed(text) => {
                            let action = hyp.env.lookup_action(text);
                            match action.and_then(|a| hyp.env.observation().relative_index(a).map(|r| (a, r))) {
                                Some((action, relative)) => candidates.push(Continuation {
                                    parent: row,
                                    local,
                                    sketch: Some(Arc::clone(sketch)),
                                    relative_action: relative,
                                    action,
                                    score: hyp.score,
                                }),
                                None => self.emit(|| SearchEvent::HypothesisDiscarded {
                                    question: hyp.env.name().to_string(),
                                    reason: DiscardReason::ConstraintViolation,
                                    score: hyp.score,
                                }),
                            }
                        }
                    }
                }

                // ---- 与已完成假设合并排序 ----
                let mut pool: Vec<PoolEntry<E>> = completed[*q].drain(..).map(PoolEntry::Completed).collect();
                pool.extend(candidates.into_iter().map(PoolEntry::Continue));
                stable_sort_desc(&mut pool, PoolEntry::score);

                let mut uncovered: HashSet<Arc<Sketch>> = if force_sketch_coverage {
                    beam.iter().filter_map(|h| h.sketch.clone()).collect()
                } else {
                    HashSet::new()
                };

                // ---- 依次录取 ----
                let mut new_beam = Vec::new();
                for (admitted, entry) in pool.into_iter().enumerate() {
                    // 束已满: 只为尚未覆盖的草图补录
                    if admitted >= beam_width {
                        if uncovered.is_empty() {
                            break;
                        }
                        if !entry.sketch().map(|s| uncovered.contains(s)).unwrap_or(false) {
                            continue;
                        }
                    }

                    let sketch = entry.sketch().cloned();
                    let survived = match entry {
                        PoolEntry::Completed(hyp) => {
                            completed[*q].push(hyp);
                            true
                        }
                        PoolEntry::Continue(cont) => {
                            let child = beam[cont.local].advance(cont.relative_action, cont.score)?;
                            match child.status() {
                                HypothesisStatus::Active => {
                                    parents.push(cont.parent);
                                    new_scores.push(cont.score);
                                    new_beam.push(child);
                                    true
                                }
                                HypothesisStatus::Completed => {
                                    self.emit(|| SearchEvent::HypothesisCompleted {
                                        question: child.env.name().to_string(),
                                        program: child.program_text(),
                                        score: child.score,
                                    });
                                    completed[*q].push(child);
                                    true
                                }
                                HypothesisStatus::Failed => {
                                    self.emit(|| SearchEvent::HypothesisDiscarded {
                                        question: child.env.name().to_string(),
                                        reason: DiscardReason::ExecutionError,
                                        score: child.score,
                                    });
                                    false
                                }
                            }
                        }
                    };

                    if survived {
                        if let Some(sketch) = sketch {
                            uncovered.remove(&sketch);
                        }
                    }
                }

                if !new_beam.is_empty() {
                    new_beams.push((*q, new_beam));
                }
                beam_start += beam.len();
            }

            if new_beams.is_empty() {
                break;
            }

            // 所有批量缓冲按父行号重排
            state = state.with_decoder(next)?.gather(&parents).with_scores(new_scores.into())?;
            beams = new_beams;
            t += 1;
        }

        Ok(())
    }

    /// 每个问题: 按分数降序排序已完成假设，截断到束宽
    pub(crate) fn finalize<E: ProgramEnv>(
        &mut self,
        envs: &[E],
        completed: Vec<Vec<Hypothesis<E>>>,
        beam_width: usize,
    ) -> BeamSearchOutput {
        let per_question = envs
            .iter()
            .zip(completed)
            .map(|(env, mut hyps)| {
                stable_sort_desc(&mut hyps, |h| h.score);
                hyps.truncate(beam_width);
                self.emit(|| SearchEvent::BeamFinalized {
                    question: env.name().to_string(),
                    results: hyps.len(),
                    best_score: hyps.first().map(|h| h.score),
                });
                QuestionResult {
                    name: env.name().to_string(),
                    samples: hyps.into_iter().map(Hypothesis::into_sample).collect(),
                }
            })
            .collect();
        BeamSearchOutput { per_question }
    }
}
