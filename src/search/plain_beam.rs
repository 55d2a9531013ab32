// src/search/plain_beam.rs
// 无草图束搜索
//
// 每个问题的候选 = 在 (活跃假设 x 动作) 上取分数最高的 B 个。
// 各问题的活跃假设数可以不同，批次按最大活跃数补齐为矩形:
// 补齐行使用空观测 (没有合法动作)、分数 -inf、父行号 0。

use ndarray::Array1;

use super::agent::{Agent, BeamSearchOutput};
use super::error::{SearchError, SearchResult};
use super::events::{DiscardReason, EventSink, SearchEvent, SearchKind};
use super::hypothesis::{Hypothesis, HypothesisStatus};
use super::ops::{masked_log_softmax, top_k_desc};
use crate::batch::{BatchedState, Gather};
use crate::env::{Observation, ProgramEnv};
use crate::model::{ContextEncoding, SketchEncoding};

/// 补齐后的批量布局
struct PaddedBeams<E> {
    /// (问题下标, 在 `questions` 中的行号, 活跃假设)
    beams: Vec<(usize, usize, Vec<Hypothesis<E>>)>,
    /// 每个束补齐后的行数
    max_live: usize,
}

impl<E: ProgramEnv> PaddedBeams<E> {
    fn rows(&self) -> usize {
        self.beams.len() * self.max_live
    }

    fn observations<'a>(&'a self, padding: &'a Observation) -> Vec<&'a Observation> {
        let mut out = Vec::with_capacity(self.rows());
        for (_, _, beam) in &self.beams {
            out.extend(beam.iter().map(|h| h.env.observation()));
            out.extend(std::iter::repeat(padding).take(self.max_live - beam.len()));
        }
        out
    }

    fn names(&self) -> Vec<&str> {
        let mut out = Vec::with_capacity(self.rows());
        for (_, _, beam) in &self.beams {
            let name = beam.first().map(|h| h.env.name()).unwrap_or("<pad>");
            out.extend(std::iter::repeat(name).take(self.max_live));
        }
        out
    }
}

impl<'m, S: EventSink> Agent<'m, S> {
    /// 无草图束搜索
    ///
    /// 每个问题一直扩展到没有活跃假设为止，最后按分数截断到 `beam_width`。
    pub fn plain_beam_search<E: ProgramEnv>(&mut self, envs: &[E], beam_width: usize) -> SearchResult<BeamSearchOutput> {
        let questions = self.searchable(envs);
        let mut completed: Vec<Vec<Hypothesis<E>>> = envs.iter().map(|_| Vec::new()).collect();

        self.emit(|| SearchEvent::SearchStarted {
            kind: SearchKind::PlainBeamSearch,
            questions: questions.len(),
            hypotheses: questions.len(),
        });

        if !questions.is_empty() && beam_width > 0 {
            let base_context = self.encode_questions(&questions)?;
            let context = base_context.clone();
            let sketch = SketchEncoding::empty(questions.len());
            let decoder = self.models().decoder.initial_state(&context, &sketch)?;
            let state = BatchedState::new(context, sketch, decoder, Array1::zeros(questions.len()))?;

            let beams = PaddedBeams {
                beams: questions
                    .iter()
                    .enumerate()
                    .map(|(row, (q, env))| (*q, row, vec![Hypothesis::new(*q, None, (*env).clone(), 0.0)]))
                    .collect(),
                max_live: 1,
            };
            self.run_plain_beams(beams, state, &base_context, &mut completed, beam_width)?;
        }

        Ok(self.finalize(envs, completed, beam_width))
    }

    fn run_plain_beams<E: ProgramEnv>(
        &mut self,
        mut beams: PaddedBeams<E>,
        mut state: BatchedState,
        base_context: &ContextEncoding,
        completed: &mut [Vec<Hypothesis<E>>],
        beam_width: usize,
    ) -> SearchResult<()> {
        let padding = Observation::empty();
        let mut t = 0;

        loop {
            self.emit(|| SearchEvent::StepStarted { t, active: beams.rows() });

            let (logits, batched, next) = {
                let observations = beams.observations(&padding);
                let names = beams.names();
                self.decode_step(&observations, &names, &state)?
            };
            let action_space = logits.ncols();

            let mut new_beams = Vec::new();
            for (beam_id, (q, question_row, beam)) in beams.beams.iter().enumerate() {
                let live_size = beam_width.saturating_sub(completed[*q].len());

                // (max_live * action_space) 个候选分数，补齐行全为 -inf
                let mut flat = vec![f32::NEG_INFINITY; beams.max_live * action_space];
                for (local, hyp) in beam.iter().enumerate() {
                    let row = beam_id * beams.max_live + local;
                    let log_probs = masked_log_softmax(logits.row(row), batched.valid_actions(row));
                    for (action, lp) in log_probs.into_iter().enumerate() {
                        flat[local * action_space + action] = state.scores[row] + lp;
                    }
                }

                let mut new_beam = Vec::new();
                for pos in top_k_desc(&flat, beam_width) {
                    let (local, action) = (pos / action_space, pos % action_space);
                    let hyp = &beam[local];
                    let score = flat[pos];
                    let relative = hyp
                        .env
                        .observation()
                        .relative_index(action)
                        .ok_or_else(|| SearchError::UnknownAction {
                            action,
                            question: hyp.env.name().to_string(),
                        })?;
                    self.emit(|| SearchEvent::CandidateGenerated {
                        question: hyp.env.name().to_string(),
                        sketch: None,
                        action: hyp.env.action_token(action).unwrap_or("?").to_string(),
                        score,
                    });

                    let child = hyp.advance(relative, score)?;
                    match child.status() {
                        HypothesisStatus::Active => new_beam.push((beam_id * beams.max_live + local, child)),
                        HypothesisStatus::Completed => {
                            self.emit(|| SearchEvent::HypothesisCompleted {
                                question: child.env.name().to_string(),
                                program: child.program_text(),
                                score,
                            });
                            completed[*q].push(child);
                        }
                        HypothesisStatus::Failed => self.emit(|| SearchEvent::HypothesisDiscarded {
                            question: child.env.name().to_string(),
                            reason: DiscardReason::ExecutionError,
                            score,
                        }),
                    }
                    // 已完成数达到束宽后不再限制活跃数，只受 top-k 约束
                    if live_size > 0 && new_beam.len() >= live_size {
                        break;
                    }
                }

                if !new_beam.is_empty() {
                    new_beams.push((*q, *question_row, new_beam));
                }
            }

            if new_beams.is_empty() {
                break;
            }

            // ---- 补齐并重排 ----
            let max_live = new_beams.iter().map(|(_, _, b)| b.len()).max().unwrap_or(1);
            let mut parents = Vec::with_capacity(new_beams.len() * max_live);
            let mut context_rows = Vec::with_capacity(new_beams.len() * max_live);
            let mut scores = Vec::with_capacity(new_beams.len() * max_live);
            let mut next_beams = Vec::with_capacity(new_beams.len());
            for (q, question_row, beam) in new_beams {
                let live = beam.len();
                let mut hyps = Vec::with_capacity(live);
                for (parent, hyp) in beam {
                    parents.push(parent);
                    scores.push(hyp.score);
                    hyps.push(hyp);
                }
                parents.extend(std::iter::repeat(0).take(max_live - live));
                scores.extend(std::iter::repeat(f32::NEG_INFINITY).take(max_live - live));
                context_rows.extend(std::iter::repeat(question_row).take(max_live));
                next_beams.push((q, question_row, hyps));
            }

            let rows = parents.len();
            state = BatchedState::new(
                base_context.gather(&context_rows),
                SketchEncoding::empty(rows),
                next.gather(&parents),
                Array1::from(scores),
            )?;
            beams = PaddedBeams { beams: next_beams, max_live };
            t += 1;
        }

        Ok(())
    }
}
