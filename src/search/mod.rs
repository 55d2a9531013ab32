// src/search/mod.rs
// 搜索引擎: 轨迹打分、随机采样、草图引导束搜索、无草图束搜索
//
// 全部算法都是单线程同步的逐步循环。每一步对所有活跃假设做一次批量解码，
// 然后用 `batch::Gather` 把所有批量缓冲按存活假设重排。

pub mod agent;
pub mod beam;
pub mod decode;
pub mod error;
pub mod events;
pub mod hypothesis;
pub mod ops;
pub mod plain_beam;
pub mod sampler;
pub mod scorer;

#[cfg(test)]
mod tests;

pub use agent::{Agent, BeamSearchOutput, ConstraintSketches, QuestionResult};
pub use error::{SearchError, SearchResult};
pub use events::{CsvEventSink, DiscardReason, EventSink, LogSink, NoopSink, SearchEvent, SearchKind};
pub use hypothesis::{Continuation, Hypothesis, HypothesisStatus, PoolEntry};
pub use scorer::TrajectoryScores;
