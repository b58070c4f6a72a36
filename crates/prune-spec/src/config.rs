use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::method::{MethodConfig, PruneType};

/// 内置的 Llama 幅值剪枝配置名
pub const LLAMA_MAGNITUDE_PRUNING: &str = "llama_magnitude_pruning";

/// 配置加载与覆盖过程中的错误
#[derive(Debug, Error)]
pub enum OverrideError {
    #[error("覆盖项 '{0}' 缺少 '='，格式应为 key=value")]
    MissingEquals(String),

    #[error("未知的配置键 '{0}'")]
    UnknownKey(String),

    #[error("配置键 '{key}' 的值 '{value}' 无效: {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },

    #[error("未知的配置名 '{0}'")]
    UnknownProfile(String),

    #[error("读取配置文件 {path} 失败: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("解析配置文件 {path} 失败: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// `modelpool.*` 配置段
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelPoolConfig {
    /// 源模型目录
    #[serde(default)]
    pub base_model: PathBuf,
}

/// 一次剪枝运行的完整配置
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PruneConfig {
    #[serde(default)]
    pub method: MethodConfig,
    #[serde(default)]
    pub modelpool: ModelPoolConfig,
    /// 剪枝后模型的输出目录
    #[serde(default)]
    pub merged_model_save_path: PathBuf,
}

impl PruneConfig {
    /// 返回内置的命名配置
    pub fn profile(name: &str) -> Result<Self, OverrideError> {
        match name {
            LLAMA_MAGNITUDE_PRUNING => Ok(Self {
                method: MethodConfig::unstructured(0.5),
                ..Self::default()
            }),
            other => Err(OverrideError::UnknownProfile(other.to_string())),
        }
    }

    /// 从 JSON 文件加载配置，缺失字段取默认值
    pub fn from_json_file(path: &Path) -> Result<Self, OverrideError> {
        let raw = fs::read_to_string(path).map_err(|source| OverrideError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| OverrideError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// 按名称解析配置：`config_dir/<name>.json` 存在时优先，否则使用内置配置
    pub fn resolve(name: &str, config_dir: Option<&Path>) -> Result<Self, OverrideError> {
        if let Some(dir) = config_dir {
            let candidate = dir.join(format!("{}.json", name));
            if candidate.is_file() {
                return Self::from_json_file(&candidate);
            }
        }
        Self::profile(name)
    }

    /// 应用单条 `key=value` 覆盖项
    pub fn apply_override(&mut self, item: &str) -> Result<(), OverrideError> {
        let (key, value) = item
            .split_once('=')
            .ok_or_else(|| OverrideError::MissingEquals(item.to_string()))?;
        let key = key.trim();
        let value = value.trim();

        let invalid = |reason: String| OverrideError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
            reason,
        };

        match key {
            "method.prune_type" => {
                self.method.prune_type = value.parse::<PruneType>().map_err(invalid)?;
            }
            "method.sparsity_ratio" => {
                self.method.sparsity_ratio =
                    value.parse::<f64>().map_err(|e| invalid(e.to_string()))?;
            }
            "method.n" => {
                self.method.n = value.parse::<usize>().map_err(|e| invalid(e.to_string()))?;
            }
            "method.m" => {
                self.method.m = value.parse::<usize>().map_err(|e| invalid(e.to_string()))?;
            }
            "modelpool.base_model" => {
                self.modelpool.base_model = PathBuf::from(value);
            }
            "merged_model_save_path" => {
                self.merged_model_save_path = PathBuf::from(value);
            }
            other => return Err(OverrideError::UnknownKey(other.to_string())),
        }
        Ok(())
    }

    /// 依次应用多条覆盖项
    pub fn apply_overrides<I, S>(&mut self, items: I) -> Result<(), OverrideError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for item in items {
            self.apply_override(item.as_ref())?;
        }
        Ok(())
    }

    /// 校验配置完整性
    pub fn validate(&self) -> Result<(), String> {
        self.method.validate()?;

        if self.modelpool.base_model.as_os_str().is_empty() {
            return Err("modelpool.base_model 不能为空".to_string());
        }

        if self.merged_model_save_path.as_os_str().is_empty() {
            return Err("merged_model_save_path 不能为空".to_string());
        }

        Ok(())
    }
}
