// src/config.rs
// 搜索配置

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// 搜索配置参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// 每个问题向草图预测器请求的草图数
    pub num_sketches: usize,
    /// 采样草图时 softmax 的温度
    pub sketch_sample_temperature: f32,
    /// 默认束宽
    pub beam_width: usize,
    /// 束搜索是否保证每个草图至少保留一个假设
    pub force_sketch_coverage: bool,
    /// 跳过探索缓存已满的环境
    pub use_cache: bool,
    /// `decode_examples` 是否先预测草图再做约束解码
    pub use_sketch_constrained_decoding: bool,
    /// `decode_examples` 每批问题数
    pub decode_batch_size: usize,
    /// 随机种子 (None 表示使用系统熵)
    pub seed: Option<u64>,
}

impl Default for SearchConfig {
    /// 默认配置
    ///
    /// * num_sketches: 5
    /// * sketch_sample_temperature: 1.0
    /// * beam_width: 5
    /// * decode_batch_size: 32
    fn default() -> Self {
        Self {
            num_sketches: 5,
            sketch_sample_temperature: 1.0,
            beam_width: 5,
            force_sketch_coverage: false,
            use_cache: false,
            use_sketch_constrained_decoding: false,
            decode_batch_size: 32,
            seed: None,
        }
    }
}

impl SearchConfig {
    /// 从 JSON 文件加载，缺省字段取默认值
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("无法读取配置文件 {}", path.display()))?;
        let config: Self = serde_json::from_str(&text)
            .with_context(|| format!("配置文件格式错误 {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.beam_width == 0 {
            bail!("beam_width 必须大于 0");
        }
        if !(self.sketch_sample_temperature > 0.0) {
            bail!("sketch_sample_temperature 必须为正数, 当前为 {}", self.sketch_sample_temperature);
        }
        if self.decode_batch_size == 0 {
            bail!("decode_batch_size 必须大于 0");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = SearchConfig::default();
        assert_eq!(config.num_sketches, 5);
        assert_eq!(config.decode_batch_size, 32);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"beam_width": 3, "force_sketch_coverage": true, "seed": 7}}"#).unwrap();
        let config = SearchConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.beam_width, 3);
        assert!(config.force_sketch_coverage);
        assert_eq!(config.seed, Some(7));
        assert_eq!(config.num_sketches, 5);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let config = SearchConfig { sketch_sample_temperature: 0.0, ..Default::default() };
        assert!(config.validate().is_err());
        let config = SearchConfig { beam_width: 0, ..Default::default() };
        assert!(config.validate().is_err());

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"decode_batch_size": 0}}"#).unwrap();
        assert!(SearchConfig::from_json_file(file.path()).is_err());
    }
}
