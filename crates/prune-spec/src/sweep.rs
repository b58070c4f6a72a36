use std::collections::HashSet;
use std::path::Path;

use crate::config::LLAMA_MAGNITUDE_PRUNING;
use crate::method::{MethodConfig, PruneType};

/// 扫参计划中的单次调用
#[derive(Debug, Clone, PartialEq)]
pub struct SweepRun {
    pub prune_type: PruneType,
    /// unstructured 模式的稀疏度
    pub sparsity_ratio: Option<f64>,
    pub n: Option<usize>,
    pub m: Option<usize>,
    /// 相对于输出根目录的子路径 (如 "sparsity_0.5", "2_4")
    pub subpath: String,
}

impl SweepRun {
    pub fn unstructured(sparsity_ratio: f64) -> Self {
        Self {
            prune_type: PruneType::Unstructured,
            sparsity_ratio: Some(sparsity_ratio),
            n: None,
            m: None,
            subpath: format!("sparsity_{}", sparsity_ratio),
        }
    }

    pub fn semistructured(n: usize, m: usize) -> Self {
        Self {
            prune_type: PruneType::Semistructured,
            sparsity_ratio: None,
            n: Some(n),
            m: Some(m),
            subpath: format!("{}_{}", n, m),
        }
    }

    /// 本次调用对应的 method 配置（缺省字段取默认值）
    pub fn method(&self) -> MethodConfig {
        let mut method = MethodConfig {
            prune_type: self.prune_type,
            ..MethodConfig::default()
        };
        if let Some(ratio) = self.sparsity_ratio {
            method.sparsity_ratio = ratio;
        }
        if let Some(n) = self.n {
            method.n = n;
        }
        if let Some(m) = self.m {
            method.m = m;
        }
        method
    }

    /// 生成本次调用的有序覆盖项列表
    pub fn overrides(&self, model_path: &Path, output_path: &Path) -> Vec<String> {
        let mut items = vec![format!("method.prune_type={}", self.prune_type)];
        match self.prune_type {
            PruneType::Unstructured => {
                if let Some(ratio) = self.sparsity_ratio {
                    items.push(format!("method.sparsity_ratio={}", ratio));
                }
            }
            PruneType::Semistructured => {
                if let Some(n) = self.n {
                    items.push(format!("method.n={}", n));
                }
                if let Some(m) = self.m {
                    items.push(format!("method.m={}", m));
                }
            }
        }
        items.push(format!("modelpool.base_model={}", model_path.display()));
        items.push(format!(
            "merged_model_save_path={}",
            output_path.join(&self.subpath).display()
        ));
        items
    }
}

/// 扫参计划：同一个基础配置下的一组调用
#[derive(Debug, Clone, PartialEq)]
pub struct SweepPlan {
    pub config_name: String,
    pub runs: Vec<SweepRun>,
}

impl SweepPlan {
    /// 默认计划：两档 unstructured 稀疏度 + 2:4 与 4:8 半结构化
    pub fn default_plan() -> Self {
        Self::from_grid(LLAMA_MAGNITUDE_PRUNING, &[0.5, 0.7], &[(2, 4), (4, 8)])
    }

    /// 先按稀疏度列表生成 unstructured 调用，再按 N:M 列表生成 semistructured 调用
    pub fn from_grid(config_name: &str, sparsities: &[f64], nm_pairs: &[(usize, usize)]) -> Self {
        let runs = sparsities
            .iter()
            .map(|&ratio| SweepRun::unstructured(ratio))
            .chain(nm_pairs.iter().map(|&(n, m)| SweepRun::semistructured(n, m)))
            .collect();
        Self {
            config_name: config_name.to_string(),
            runs,
        }
    }

    /// 校验计划完整性
    pub fn validate(&self) -> Result<(), String> {
        if self.runs.is_empty() {
            return Err("runs 不能为空".to_string());
        }

        let mut seen = HashSet::new();
        for run in &self.runs {
            run.method()
                .validate()
                .map_err(|e| format!("{}: {}", run.subpath, e))?;
            if !seen.insert(run.subpath.as_str()) {
                return Err(format!("输出子路径重复: {}", run.subpath));
            }
        }

        Ok(())
    }
}

/// 解析 "N:M" 形式的块模式
pub fn parse_nm(s: &str) -> Result<(usize, usize), String> {
    let (n, m) = s
        .split_once(':')
        .ok_or_else(|| format!("N:M 格式无效: '{}'", s))?;
    let n = n
        .trim()
        .parse::<usize>()
        .map_err(|e| format!("N 无效 '{}': {}", n, e))?;
    let m = m
        .trim()
        .parse::<usize>()
        .map_err(|e| format!("M 无效 '{}': {}", m, e))?;
    Ok((n, m))
}
