// src/search/ops.rs
// 搜索用到的数值小工具: 掩码 softmax / log-softmax、熵、稳定排序与 top-k

use ndarray::ArrayView1;
use std::cmp::Ordering;

/// 掩码 log-softmax
///
/// 只在 `valid` 列出的动作上归一化，其余位置为 `-inf`。
/// 没有合法动作时整行都是 `-inf`。
///
/// # 参数
///
/// * `logits` - 解码器输出的原始动作分数 (长度 = 动作空间)
/// * `valid` - 合法动作 (绝对 id)
pub fn masked_log_softmax(logits: ArrayView1<f32>, valid: &[usize]) -> Vec<f32> {
    let mut out = vec![f32::NEG_INFINITY; logits.len()];

    // 第一遍：找到最大 logit（数值稳定性）
    let max_logit = valid
        .iter()
        .filter_map(|&a| logits.get(a).copied())
        .fold(f32::NEG_INFINITY, f32::max);
    if !max_logit.is_finite() {
        return out;
    }

    // 第二遍：log-sum-exp
    let sum: f32 = valid
        .iter()
        .filter_map(|&a| logits.get(a))
        .map(|&l| (l - max_logit).exp())
        .sum();
    let log_z = max_logit + sum.ln();

    for &a in valid {
        if let Some(&l) = logits.get(a) {
            out[a] = l - log_z;
        }
    }
    out
}

/// 掩码 softmax，非法动作概率为 0
pub fn masked_softmax(logits: ArrayView1<f32>, valid: &[usize]) -> Vec<f32> {
    masked_log_softmax(logits, valid)
        .into_iter()
        .map(|lp| if lp.is_finite() { lp.exp() } else { 0.0 })
        .collect()
}

/// 掩码分布的熵 `sum(-p * log p)`，只累计合法动作
pub fn masked_entropy(logits: ArrayView1<f32>, valid: &[usize]) -> f32 {
    masked_softmax(logits, valid)
        .into_iter()
        .filter(|&p| p > 0.0)
        .map(|p| -p * p.ln())
        .sum()
}

/// 带温度的 softmax (草图先验 -> 类别分布)
pub fn softmax_with_temperature(scores: &[f32], temperature: f32) -> Vec<f32> {
    let scaled: Vec<f32> = scores.iter().map(|s| s / temperature).collect();
    let max = scaled.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    if !max.is_finite() {
        return vec![0.0; scores.len()];
    }
    let exps: Vec<f32> = scaled.iter().map(|s| (s - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// 降序比较，NaN 视为相等 (调用方保证 NaN 不会进入排序)
pub fn desc(a: f32, b: f32) -> Ordering {
    b.partial_cmp(&a).unwrap_or(Ordering::Equal)
}

/// 按分数降序稳定排序，分数相同时保持原顺序
pub fn stable_sort_desc<T, F>(items: &mut [T], score: F)
where
    F: Fn(&T) -> f32,
{
    items.sort_by(|a, b| desc(score(a), score(b)));
}

/// 分数最高的 k 个有限值的下标 (降序；同分时下标小者在前)
pub fn top_k_desc(scores: &[f32], k: usize) -> Vec<usize> {
    let mut indexed: Vec<usize> = (0..scores.len()).filter(|&i| scores[i].is_finite()).collect();
    indexed.sort_by(|&a, &b| desc(scores[a], scores[b]));
    indexed.truncate(k);
    indexed
}
