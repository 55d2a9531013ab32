//! # nsm_search - 草图引导的程序搜索引擎
//!
//! 在神经策略之上做程序合成搜索: 先选一个程序草图 (固定 token + 变量槽)，
//! 再由逐步解码器只为变量槽选择具体 token。
//!
//! ## 模块
//! - `env`: 环境协作方接口与查表文法环境
//! - `sketch`: 草图与带先验的草图
//! - `model`: 编码器 / 草图预测器 / 解码器接口及实现
//! - `observation`: 观测批量化
//! - `batch`: 批量缓冲按父假设重排
//! - `search`: 轨迹打分、采样、束搜索
//! - `config`: 搜索配置
//!
//! ## 使用示例
//! ```rust
//! use std::sync::Arc;
//! use nsm_search::*;
//!
//! let grammar = Arc::new(
//!     Grammar::new(0)
//!         .rule(None, &["A"])
//!         .rule(Some("A"), &["v0", "v1"])
//!         .rule(Some("v0"), &["B"])
//!         .rule(Some("v1"), &["B"])
//!         .end_token("B"),
//! );
//! let env = GrammarEnv::new(Arc::clone(&grammar), QuestionContext::new("q", "how many"));
//!
//! let encoder = BagOfTokensEncoder::new(8);
//! let predictor = FixedSketchPredictor::new(-10.0)
//!     .with_sketches("q", vec![ScoredSketch::new(Sketch::parse("A <VAR> B"), -0.1)]);
//! let sketch_encoder = StructureSketchEncoder::new(4);
//! let decoder = TableDecoder::new(grammar.action_space());
//! let models = Models {
//!     encoder: &encoder,
//!     sketch_predictor: &predictor,
//!     sketch_encoder: &sketch_encoder,
//!     decoder: &decoder,
//! };
//!
//! let mut agent = Agent::new(models, SearchConfig::default());
//! let output = agent.beam_search(&[env], 2, None, false).unwrap();
//! assert_eq!(output.get("q").unwrap().len(), 2);
//! ```

pub mod batch;
pub mod config;
pub mod env;
pub mod model;
pub mod observation;
pub mod search;
pub mod sketch;

// 重新导出核心类型，方便外部使用
pub use config::SearchConfig;
pub use env::{Grammar, GrammarEnv, Observation, ProgramEnv, QuestionContext, Sample, StepOutcome, Trajectory};
pub use model::{
    BagOfTokensEncoder, ContextEncoder, Decoder, FixedSketchPredictor, Models, SketchEncoder, SketchPredictor,
    StructureSketchEncoder, TableDecoder,
};
pub use search::{
    Agent, BeamSearchOutput, ConstraintSketches, CsvEventSink, EventSink, LogSink, NoopSink, SearchError,
    SearchEvent, SearchResult, TrajectoryScores,
};
pub use sketch::{ScoredSketch, Sketch, SketchToken};
