// src/search/decode.rs
// 批量解码: 把问题分批送入草图引导的束搜索

use super::agent::{Agent, ConstraintSketches};
use super::error::{ensure_batch, SearchResult};
use super::events::EventSink;
use crate::env::{ProgramEnv, QuestionContext, Sample};

impl<'m, S: EventSink> Agent<'m, S> {
    /// 对所有问题做束搜索解码
    ///
    /// 问题按 `decode_batch_size` 分批；开启 `use_sketch_constrained_decoding` 时
    /// 先为每批预测 `num_sketches` 个草图并作为约束传入。
    ///
    /// # 返回
    ///
    /// 与 `envs` 一一对应的结果列表 (按分数降序)
    pub fn decode_examples<E: ProgramEnv>(&mut self, envs: &[E], beam_width: usize) -> SearchResult<Vec<Vec<Sample>>> {
        let batch_size = self.config().decode_batch_size.max(1);
        let constrained = self.config().use_sketch_constrained_decoding;
        let force_coverage = self.config().force_sketch_coverage;
        if constrained {
            log::info!("使用草图约束解码 (每个问题 {} 个草图)", self.config().num_sketches);
        }

        let mut results = Vec::with_capacity(envs.len());
        for (i, chunk) in envs.chunks(batch_size).enumerate() {
            log::debug!("解码第 {} 批 ({} 个问题)", i, chunk.len());

            let constraint = if constrained {
                let contexts: Vec<&QuestionContext> = chunk.iter().map(|e| e.context().as_ref()).collect();
                let predicted = self
                    .models()
                    .sketch_predictor
                    .get_sketches(&contexts, self.config().num_sketches)?;
                ensure_batch("sketch predictions", chunk.len(), predicted.len())?;
                Some(
                    chunk
                        .iter()
                        .zip(predicted)
                        .map(|(env, sketches)| (env.name().to_string(), sketches))
                        .collect::<ConstraintSketches>(),
                )
            } else {
                None
            };

            let output = self.beam_search(chunk, beam_width, constraint.as_ref(), force_coverage)?;
            results.extend(output.per_question.into_iter().map(|r| r.samples));
        }
        Ok(results)
    }
}
