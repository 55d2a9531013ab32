// src/search/events.rs
// 搜索过程的结构化事件
//
// 引擎在固定位置调用 `EventSink::record`。`NoopSink` 的 `enabled()`
// 返回 false，引擎据此跳过事件构造，不记录时没有额外开销。

use anyhow::Result;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// 搜索算法
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchKind {
    Sample,
    SampleUnconstrained,
    BeamSearch,
    PlainBeamSearch,
}

/// 假设被丢弃的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    /// 程序执行结束但解释器报错
    ExecutionError,
    /// 草图固定 token 在当前步不是合法动作
    ConstraintViolation,
    /// 没有可选动作 (合法动作为空，或全部被解码器屏蔽)
    NoValidAction,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SearchEvent {
    SearchStarted {
        kind: SearchKind,
        questions: usize,
        hypotheses: usize,
    },
    StepStarted {
        t: usize,
        active: usize,
    },
    CandidateGenerated {
        question: String,
        sketch: Option<String>,
        action: String,
        score: f32,
    },
    HypothesisCompleted {
        question: String,
        program: String,
        score: f32,
    },
    HypothesisDiscarded {
        question: String,
        reason: DiscardReason,
        score: f32,
    },
    BeamFinalized {
        question: String,
        results: usize,
        best_score: Option<f32>,
    },
}

impl SearchEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            SearchEvent::SearchStarted { .. } => "search_started",
            SearchEvent::StepStarted { .. } => "step_started",
            SearchEvent::CandidateGenerated { .. } => "candidate_generated",
            SearchEvent::HypothesisCompleted { .. } => "hypothesis_completed",
            SearchEvent::HypothesisDiscarded { .. } => "hypothesis_discarded",
            SearchEvent::BeamFinalized { .. } => "beam_finalized",
        }
    }

    pub fn question(&self) -> Option<&str> {
        match self {
            SearchEvent::CandidateGenerated { question, .. }
            | SearchEvent::HypothesisCompleted { question, .. }
            | SearchEvent::HypothesisDiscarded { question, .. }
            | SearchEvent::BeamFinalized { question, .. } => Some(question),
            _ => None,
        }
    }

    pub fn score(&self) -> Option<f32> {
        match self {
            SearchEvent::CandidateGenerated { score, .. }
            | SearchEvent::HypothesisCompleted { score, .. }
            | SearchEvent::HypothesisDiscarded { score, .. } => Some(*score),
            SearchEvent::BeamFinalized { best_score, .. } => *best_score,
            _ => None,
        }
    }

    /// 事件的其余字段，写成一列文本
    fn detail(&self) -> String {
        match self {
            SearchEvent::SearchStarted { kind, questions, hypotheses } => {
                format!("{:?} questions={} hypotheses={}", kind, questions, hypotheses)
            }
            SearchEvent::StepStarted { t, active } => format!("t={} active={}", t, active),
            SearchEvent::CandidateGenerated { sketch, action, .. } => match sketch {
                Some(sketch) => format!("sketch={} action={}", sketch, action),
                None => format!("action={}", action),
            },
            SearchEvent::HypothesisCompleted { program, .. } => program.clone(),
            SearchEvent::HypothesisDiscarded { reason, .. } => format!("{:?}", reason),
            SearchEvent::BeamFinalized { results, .. } => format!("results={}", results),
        }
    }
}

// ================ 事件接收器 ================

pub trait EventSink {
    /// 返回 false 时引擎不会构造任何事件
    fn enabled(&self) -> bool {
        true
    }

    fn record(&mut self, event: &SearchEvent);
}

/// 丢弃所有事件
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl EventSink for NoopSink {
    fn enabled(&self) -> bool {
        false
    }

    fn record(&mut self, _event: &SearchEvent) {}
}

/// 把事件转发到 `log::debug!`
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl EventSink for LogSink {
    fn enabled(&self) -> bool {
        log::log_enabled!(log::Level::Debug)
    }

    fn record(&mut self, event: &SearchEvent) {
        log::debug!(
            "[{}] {} {} {}",
            event.kind(),
            event.question().unwrap_or("-"),
            event.detail(),
            event.score().map(|s| format!("score={:.4}", s)).unwrap_or_default()
        );
    }
}

/// 收集事件 (测试使用)
impl EventSink for Vec<SearchEvent> {
    fn record(&mut self, event: &SearchEvent) {
        self.push(event.clone());
    }
}

// ================ CSV 事件日志 ================

/// CSV 事件日志: 每个事件追加一行
///
/// 文件为空时先写表头。写入失败只记录一次警告，不会中断搜索。
#[derive(Debug)]
pub struct CsvEventSink {
    path: PathBuf,
    file: File,
    failed: bool,
}

impl CsvEventSink {
    pub const HEADER: &'static str = "event,question,score,detail";

    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;

        // 检查文件是否为空（新文件需要写入表头）
        if std::fs::metadata(&path)?.len() == 0 {
            writeln!(file, "{}", Self::HEADER)?;
        }

        Ok(Self { path, file, failed: false })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_row(&mut self, event: &SearchEvent) -> Result<()> {
        writeln!(
            self.file,
            "{},{},{},{}",
            event.kind(),
            csv_field(event.question().unwrap_or("")),
            event.score().map(|s| format!("{:.6}", s)).unwrap_or_default(),
            csv_field(&event.detail())
        )?;
        Ok(())
    }
}

impl EventSink for CsvEventSink {
    fn record(&mut self, event: &SearchEvent) {
        if let Err(e) = self.write_row(event) {
            if !self.failed {
                log::warn!("写入事件日志 {} 失败: {}", self.path.display(), e);
                self.failed = true;
            }
        }
    }
}

/// 含逗号/引号的字段加引号
fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}
