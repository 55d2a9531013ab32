// ==============================================================================
// --- 模块声明 ---
// ==============================================================================

pub mod grammar;
pub mod types;

// ==============================================================================
// --- 公共 API 重导出 ---
// ==============================================================================

pub use grammar::{Grammar, GrammarEnv};
pub use types::{Observation, QuestionContext, Sample, StepOutcome, Trajectory};

use anyhow::Result;
use std::sync::Arc;

// ==============================================================================
// --- 环境接口 (解释器协作方) ---
// ==============================================================================

/// 程序环境特征 (Trait)
///
/// 一个环境对应一个正在构造的候选程序: 已生成的程序、工作内存、当前观测以及
/// `done` / `error` 标志。
///
/// 克隆约定: `clone()` 必须深拷贝全部执行状态 (程序、内存、观测)，
/// 分叉后的假设之间不得共享可变状态；只有 `QuestionContext` 与解释器的静态
/// 定义可以通过 `Arc` 只读共享。
pub trait ProgramEnv: Clone {
    /// 环境名称，与所属问题绑定
    fn name(&self) -> &str;

    /// 问题上下文 (只读共享)
    fn context(&self) -> &Arc<QuestionContext>;

    /// 环境创建时的起始观测
    fn start_observation(&self) -> &Observation;

    /// 当前观测
    fn observation(&self) -> &Observation;

    /// 当前合法动作 (绝对动作 id)
    fn valid_actions(&self) -> &[usize] {
        &self.observation().valid_actions
    }

    /// 执行一个动作
    ///
    /// # 参数
    ///
    /// * `relative_action` - 在 `valid_actions()` 中的下标
    fn step(&mut self, relative_action: usize) -> Result<StepOutcome>;

    /// 程序是否已结束
    fn is_done(&self) -> bool;

    /// 程序结束时是否执行出错
    fn has_error(&self) -> bool;

    /// 草图 token -> 绝对动作 id (解码词表查询)
    fn lookup_action(&self, token: &str) -> Option<usize>;

    /// 绝对动作 id -> token
    fn action_token(&self, action: usize) -> Option<&str>;

    /// 当前已生成的程序 (人类可读)
    fn human_readable_program(&self) -> Vec<String>;

    fn to_trajectory(&self) -> Trajectory;

    /// 探索缓存是否已满 (已探索完所有程序)
    ///
    /// 开启 `use_cache` 时，返回 true 的环境将被跳过。
    fn exploration_exhausted(&self) -> bool {
        false
    }
}
