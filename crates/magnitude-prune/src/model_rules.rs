use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use regex::Regex;
use serde_json::Value;
use tracing::warn;

/// 解码层 Tensor 的公共前缀规则: "model.layers.{N}."
const DECODER_LAYER_PATTERN: &str = r"^model\.layers\.(\d+)\.";

/// 已知采用 `model.layers.N` 命名的模型家族
const KNOWN_FAMILIES: &[&str] = &["llama", "mistral", "qwen"];

pub struct ModelRules {
    pub model_type: Option<String>,
    pub layer_re: Regex,
}

pub fn rules_from_input_dir(input_dir: &Path) -> Result<ModelRules> {
    let config_path = input_dir.join("config.json");
    let model_type = read_model_type(&config_path)?;

    if let Some(mt) = model_type.as_deref() {
        if !is_known_family(mt) {
            warn!(model_type = mt, "未知的模型家族，按 model.layers.N 规则处理");
        }
    }

    Ok(ModelRules {
        model_type,
        layer_re: Regex::new(DECODER_LAYER_PATTERN)?,
    })
}

fn read_model_type(config_path: &Path) -> Result<Option<String>> {
    if !config_path.exists() {
        return Ok(None);
    }

    let raw = fs::read_to_string(config_path)
        .with_context(|| format!("读取 config 失败: {}", config_path.display()))?;
    let value: Value = serde_json::from_str(&raw)
        .with_context(|| format!("解析 config 失败: {}", config_path.display()))?;

    Ok(value
        .get("model_type")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string()))
}

fn is_known_family(model_type: &str) -> bool {
    let lower = model_type.to_ascii_lowercase();
    KNOWN_FAMILIES.iter().any(|f| lower.contains(f))
}
