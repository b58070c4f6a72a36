use serde::{Deserialize, Serialize};

use crate::config::PruneConfig;

/// 单个 Tensor 的剪枝结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TensorReport {
    /// 完整的 Tensor 名称 (如 "model.layers.3.self_attn.q_proj.weight")
    pub name: String,
    /// 所在的输出文件名
    pub file: String,
    /// 数据类型 (如 "BF16")
    pub dtype: String,
    pub shape: Vec<usize>,
    pub numel: usize,
    /// 剪枝前的零值数量
    pub zeros_before: usize,
    /// 剪枝后的零值数量
    pub zeros_after: usize,
    /// 是否参与剪枝（false 表示原样拷贝）
    pub pruned: bool,
}

/// 单个输出文件的描述
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputFile {
    pub filename: String,
    /// 文件大小（字节）
    pub bytes: u64,
    /// BLAKE3 校验值
    pub blake3: String,
}

/// 剪枝报告，写入输出目录下的 prune_report.json
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PruneReport {
    pub config: PruneConfig,
    /// 源模型的 model_type（来自 config.json）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_type: Option<String>,
    pub files: Vec<OutputFile>,
    pub tensors: Vec<TensorReport>,
    /// 参与剪枝的参数总数
    pub prunable_params: usize,
    /// 参与剪枝的参数中为零的数量
    pub pruned_params: usize,
    /// 参与剪枝部分的实际稀疏度
    pub achieved_sparsity: f64,
}

impl PruneReport {
    pub fn new(config: PruneConfig, model_type: Option<String>) -> Self {
        Self {
            config,
            model_type,
            files: Vec::new(),
            tensors: Vec::new(),
            prunable_params: 0,
            pruned_params: 0,
            achieved_sparsity: 0.0,
        }
    }

    /// 记录一个 Tensor，同时累加统计值
    pub fn push_tensor(&mut self, tensor: TensorReport) {
        if tensor.pruned {
            self.prunable_params += tensor.numel;
            self.pruned_params += tensor.zeros_after;
            self.achieved_sparsity = if self.prunable_params > 0 {
                self.pruned_params as f64 / self.prunable_params as f64
            } else {
                0.0
            };
        }
        self.tensors.push(tensor);
    }

    /// 校验报告完整性
    pub fn validate(&self) -> Result<(), String> {
        if self.files.is_empty() {
            return Err("files 不能为空".to_string());
        }

        if !(0.0..=1.0).contains(&self.achieved_sparsity) {
            return Err(format!(
                "achieved_sparsity 必须位于 [0, 1]，当前为 {}",
                self.achieved_sparsity
            ));
        }

        Ok(())
    }
}
