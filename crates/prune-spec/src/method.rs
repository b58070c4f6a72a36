use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// 剪枝结构类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PruneType {
    /// 按行对单个权重做幅值排序剪枝，无位置约束
    #[default]
    Unstructured,
    /// N:M 半结构化剪枝：每连续 M 个权重保留幅值最大的 N 个
    Semistructured,
}

impl PruneType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PruneType::Unstructured => "unstructured",
            PruneType::Semistructured => "semistructured",
        }
    }
}

impl fmt::Display for PruneType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PruneType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unstructured" => Ok(PruneType::Unstructured),
            "semistructured" => Ok(PruneType::Semistructured),
            other => Err(format!(
                "未知的 prune_type '{}'，可选值: unstructured, semistructured",
                other
            )),
        }
    }
}

/// `method.*` 配置段
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodConfig {
    /// 剪枝结构类型
    #[serde(default)]
    pub prune_type: PruneType,
    /// 置零权重的比例（仅 unstructured 模式使用）
    #[serde(default = "default_sparsity_ratio")]
    pub sparsity_ratio: f64,
    /// 每个块内保留的权重数（仅 semistructured 模式使用）
    #[serde(default = "default_n")]
    pub n: usize,
    /// 块大小（仅 semistructured 模式使用）
    #[serde(default = "default_m")]
    pub m: usize,
}

fn default_sparsity_ratio() -> f64 {
    0.5
}

fn default_n() -> usize {
    2
}

fn default_m() -> usize {
    4
}

impl Default for MethodConfig {
    fn default() -> Self {
        Self {
            prune_type: PruneType::default(),
            sparsity_ratio: default_sparsity_ratio(),
            n: default_n(),
            m: default_m(),
        }
    }
}

impl MethodConfig {
    pub fn unstructured(sparsity_ratio: f64) -> Self {
        Self {
            prune_type: PruneType::Unstructured,
            sparsity_ratio,
            ..Self::default()
        }
    }

    pub fn semistructured(n: usize, m: usize) -> Self {
        Self {
            prune_type: PruneType::Semistructured,
            n,
            m,
            ..Self::default()
        }
    }

    /// 该配置预期达到的稀疏度
    pub fn target_sparsity(&self) -> f64 {
        match self.prune_type {
            PruneType::Unstructured => self.sparsity_ratio,
            PruneType::Semistructured => 1.0 - self.n as f64 / self.m as f64,
        }
    }

    /// 校验参数合法性
    pub fn validate(&self) -> Result<(), String> {
        match self.prune_type {
            PruneType::Unstructured => {
                if !(0.0..=1.0).contains(&self.sparsity_ratio) {
                    return Err(format!(
                        "sparsity_ratio 必须位于 [0, 1]，当前为 {}",
                        self.sparsity_ratio
                    ));
                }
            }
            PruneType::Semistructured => {
                if self.m == 0 {
                    return Err("m 必须 > 0".to_string());
                }
                if self.n > self.m {
                    return Err(format!("n ({}) 不能大于 m ({})", self.n, self.m));
                }
            }
        }
        Ok(())
    }
}
