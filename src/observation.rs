// src/observation.rs
// 观测适配器: 假设的观测 <-> 解码器需要的批量输入
//
// * `BatchedObservation`: 一个解码步的批量输入 (合法动作掩码 + 读取下标)
// * `BatchedSequence`: 教师强制打分时，整批轨迹按最大长度补齐后的逐步输入

use ndarray::{Array1, Array2};

use crate::env::{Observation, Trajectory};
use crate::search::error::{SearchError, SearchResult};

/// 起始步 (无读取输入) 的读取下标
pub const NO_READ_INDEX: i64 = -1;

// ================ 单步批量观测 ================

/// 单个解码步的批量观测
#[derive(Debug, Clone, PartialEq)]
pub struct BatchedObservation {
    /// (batch, action_space)，合法动作为 1.0
    pub valid_action_mask: Array2<f32>,
    /// (batch,)，上一步动作 id，起始步为 -1
    pub read_ind: Array1<i64>,
    /// 每行的合法动作列表 (绝对 id，保持解释器顺序)
    valid_actions: Vec<Vec<usize>>,
}

impl BatchedObservation {
    /// 将一组观测打包为批量输入
    ///
    /// # 参数
    ///
    /// * `observations` - 每个活跃假设的当前观测
    /// * `action_space` - 解码器动作空间大小
    /// * `names` - 每行所属问题名称 (仅用于报错)
    pub fn from_observations(
        observations: &[&Observation],
        action_space: usize,
        names: &[&str],
    ) -> SearchResult<Self> {
        let batch = observations.len();
        let mut mask = Array2::zeros((batch, action_space));
        let mut read_ind = Array1::from_elem(batch, NO_READ_INDEX);
        let mut valid_actions = Vec::with_capacity(batch);

        for (row, obs) in observations.iter().enumerate() {
            for &action in &obs.valid_actions {
                if action >= action_space {
                    return Err(SearchError::UnknownAction {
                        action,
                        question: names.get(row).copied().unwrap_or("?").to_string(),
                    });
                }
                mask[[row, action]] = 1.0;
            }
            if let Some(read) = obs.read_index {
                read_ind[row] = read as i64;
            }
            valid_actions.push(obs.valid_actions.clone());
        }

        Ok(Self { valid_action_mask: mask, read_ind, valid_actions })
    }

    pub fn batch_size(&self) -> usize {
        self.valid_actions.len()
    }

    pub fn action_space(&self) -> usize {
        self.valid_action_mask.shape()[1]
    }

    /// 第 row 行的合法动作 (绝对 id)
    pub fn valid_actions(&self, row: usize) -> &[usize] {
        &self.valid_actions[row]
    }

    /// 还原第 row 行的观测
    pub fn observation(&self, row: usize) -> Observation {
        let read = self.read_ind[row];
        Observation {
            valid_actions: self.valid_actions[row].clone(),
            read_index: if read < 0 { None } else { Some(read as usize) },
        }
    }
}

// ================ 轨迹批量序列 ================

/// 补齐到同一长度的批量轨迹输入
#[derive(Debug, Clone)]
pub struct BatchedSequence {
    /// 每个时间步的批量观测，长度 = 最大轨迹长度
    pub steps: Vec<BatchedObservation>,
    /// (batch, max_len)，记录的绝对动作 id (补齐位置为 0)
    pub tgt_action_ids: Array2<usize>,
    /// (batch, max_len)，t < 轨迹长度 时为 1.0
    pub tgt_action_mask: Array2<f32>,
}

impl BatchedSequence {
    pub fn from_trajectories(trajectories: &[Trajectory], action_space: usize) -> SearchResult<Self> {
        let batch = trajectories.len();
        let max_len = trajectories.iter().map(Trajectory::len).max().unwrap_or(0);
        let names: Vec<&str> = trajectories.iter().map(|t| t.env_name.as_str()).collect();

        let mut tgt_action_ids = Array2::zeros((batch, max_len));
        let mut tgt_action_mask = Array2::zeros((batch, max_len));
        for (row, traj) in trajectories.iter().enumerate() {
            if traj.observations.len() != traj.action_ids.len() {
                return Err(SearchError::ShapeMismatch {
                    what: "trajectory observations",
                    expected: traj.action_ids.len(),
                    found: traj.observations.len(),
                });
            }
            for (t, (&action, obs)) in traj.action_ids.iter().zip(&traj.observations).enumerate() {
                if action >= action_space || !obs.is_valid(action) {
                    return Err(SearchError::UnknownAction {
                        action,
                        question: traj.env_name.clone(),
                    });
                }
                tgt_action_ids[[row, t]] = action;
                tgt_action_mask[[row, t]] = 1.0;
            }
        }

        let padding = Observation::empty();
        let mut steps = Vec::with_capacity(max_len);
        for t in 0..max_len {
            let obs_t: Vec<&Observation> = trajectories
                .iter()
                .map(|traj| traj.observations.get(t).unwrap_or(&padding))
                .collect();
            steps.push(BatchedObservation::from_observations(&obs_t, action_space, &names)?);
        }

        Ok(Self { steps, tgt_action_ids, tgt_action_mask })
    }

    pub fn max_len(&self) -> usize {
        self.steps.len()
    }

    /// 第 t 步的批量观测
    pub fn slice(&self, t: usize) -> &BatchedObservation {
        &self.steps[t]
    }
}
