// src/env/grammar.rs
// 基于转移表的程序解释器 (演示与测试使用)
//
// 解释器的静态定义 (词表、转移规则、结束/出错 token) 放在 `Grammar` 中，
// 由所有克隆通过 Arc 只读共享；每个 `GrammarEnv` 独占自己的程序与观测历史。

use anyhow::{anyhow, bail, Result};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use super::types::{Observation, QuestionContext, StepOutcome, Trajectory};
use super::ProgramEnv;

// ==============================================================================
// --- 语法表 ---
// ==============================================================================

/// 解释器静态定义
///
/// * 动作 id = token 在词表中的下标
/// * `transitions[None]` 为起始合法动作，`transitions[Some(a)]` 为执行 a 之后的合法动作
/// * 执行结束 token 后程序完成；程序中含有出错 token 时以 error 结束
/// * 超过 `max_steps` 步 (0 表示不限) 或走入没有后继的死路时以 error 结束
#[derive(Debug, Clone, Default)]
pub struct Grammar {
    vocab: Vec<String>,
    index: HashMap<String, usize>,
    transitions: HashMap<Option<usize>, Vec<usize>>,
    end_tokens: HashSet<usize>,
    error_tokens: HashSet<usize>,
    max_steps: usize,
}

impl Grammar {
    pub fn new(max_steps: usize) -> Self {
        Self { max_steps, ..Default::default() }
    }

    /// 注册 token 并返回其动作 id
    pub fn intern(&mut self, token: &str) -> usize {
        if let Some(&id) = self.index.get(token) {
            return id;
        }
        let id = self.vocab.len();
        self.vocab.push(token.to_string());
        self.index.insert(token.to_string(), id);
        id
    }

    /// 添加转移规则: `from` 之后可以执行 `to` 中的 token (`from = None` 表示起始)
    pub fn rule(mut self, from: Option<&str>, to: &[&str]) -> Self {
        let from_id = from.map(|t| self.intern(t));
        let to_ids: Vec<usize> = to.iter().map(|t| self.intern(t)).collect();
        let entry = self.transitions.entry(from_id).or_default();
        for id in to_ids {
            if !entry.contains(&id) {
                entry.push(id);
            }
        }
        self
    }

    pub fn end_token(mut self, token: &str) -> Self {
        let id = self.intern(token);
        self.end_tokens.insert(id);
        self
    }

    pub fn error_token(mut self, token: &str) -> Self {
        let id = self.intern(token);
        self.error_tokens.insert(id);
        self
    }

    /// 动作空间大小 (词表大小)
    pub fn action_space(&self) -> usize {
        self.vocab.len()
    }

    pub fn token(&self, action: usize) -> Option<&str> {
        self.vocab.get(action).map(String::as_str)
    }

    pub fn id(&self, token: &str) -> Option<usize> {
        self.index.get(token).copied()
    }

    fn next_actions(&self, after: Option<usize>) -> Vec<usize> {
        self.transitions.get(&after).cloned().unwrap_or_default()
    }
}

// ==============================================================================
// --- 环境 ---
// ==============================================================================

/// 基于 `Grammar` 的程序环境
#[derive(Debug, Clone)]
pub struct GrammarEnv {
    grammar: Arc<Grammar>,
    context: Arc<QuestionContext>,
    /// 标准答案程序，完全一致时奖励为 1
    answer: Option<Arc<Vec<String>>>,
    start: Observation,
    current: Observation,
    program: Vec<usize>,
    observations: Vec<Observation>,
    done: bool,
    error: bool,
    reward: f32,
    exhausted: bool,
}

impl GrammarEnv {
    pub fn new(grammar: Arc<Grammar>, context: QuestionContext) -> Self {
        let start = Observation {
            valid_actions: grammar.next_actions(None),
            read_index: None,
        };
        Self {
            grammar,
            context: Arc::new(context),
            answer: None,
            current: start.clone(),
            start,
            program: Vec::new(),
            observations: Vec::new(),
            done: false,
            error: false,
            reward: 0.0,
            exhausted: false,
        }
    }

    pub fn with_answer(mut self, program: &[&str]) -> Self {
        self.answer = Some(Arc::new(program.iter().map(|t| t.to_string()).collect()));
        self
    }

    /// 标记探索缓存已满
    pub fn mark_exhausted(&mut self) {
        self.exhausted = true;
    }

    pub fn grammar(&self) -> &Arc<Grammar> {
        &self.grammar
    }

    pub fn reward(&self) -> f32 {
        self.reward
    }

    fn finish(&mut self, last_action: usize, error: bool) {
        self.done = true;
        self.error = error;
        self.reward = match &self.answer {
            Some(answer) if !error && **answer == self.human_readable_program() => 1.0,
            _ => 0.0,
        };
        self.current = Observation {
            valid_actions: Vec::new(),
            read_index: Some(last_action),
        };
    }
}

impl ProgramEnv for GrammarEnv {
    fn name(&self) -> &str {
        &self.context.name
    }

    fn context(&self) -> &Arc<QuestionContext> {
        &self.context
    }

    fn start_observation(&self) -> &Observation {
        &self.start
    }

    fn observation(&self) -> &Observation {
        &self.current
    }

    fn step(&mut self, relative_action: usize) -> Result<StepOutcome> {
        if self.done {
            bail!("环境 {} 已结束，不能继续执行", self.context.name);
        }
        let action = *self.current.valid_actions.get(relative_action).ok_or_else(|| {
            anyhow!(
                "无效相对动作: {} (合法动作数 {})",
                relative_action,
                self.current.valid_actions.len()
            )
        })?;

        self.observations.push(self.current.clone());
        self.program.push(action);

        if self.grammar.end_tokens.contains(&action) {
            let error = self.program.iter().any(|a| self.grammar.error_tokens.contains(a));
            self.finish(action, error);
        } else if self.grammar.max_steps > 0 && self.program.len() >= self.grammar.max_steps {
            // 超出解释器步数限制
            self.finish(action, true);
        } else {
            let next = self.grammar.next_actions(Some(action));
            if next.is_empty() {
                self.finish(action, true);
            } else {
                self.current = Observation {
                    valid_actions: next,
                    read_index: Some(action),
                };
            }
        }

        Ok(StepOutcome {
            observation: self.current.clone(),
            reward: self.reward,
            done: self.done,
        })
    }

    fn is_done(&self) -> bool {
        self.done
    }

    fn has_error(&self) -> bool {
        self.error
    }

    fn lookup_action(&self, token: &str) -> Option<usize> {
        self.grammar.id(token)
    }

    fn action_token(&self, action: usize) -> Option<&str> {
        self.grammar.token(action)
    }

    fn human_readable_program(&self) -> Vec<String> {
        self.program
            .iter()
            .filter_map(|&a| self.grammar.token(a))
            .map(str::to_string)
            .collect()
    }

    fn to_trajectory(&self) -> Trajectory {
        Trajectory {
            env_name: self.context.name.clone(),
            context: Arc::clone(&self.context),
            program: self.human_readable_program(),
            action_ids: self.program.clone(),
            observations: self.observations.clone(),
            reward: self.reward,
        }
    }

    fn exploration_exhausted(&self) -> bool {
        self.exhausted
    }
}
