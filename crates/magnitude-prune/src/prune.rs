use std::fs;
use std::time::Instant;

use anyhow::{Context, Result, anyhow, bail};
use tracing::{debug, info, warn};

use prune_spec::{OutputFile, PruneConfig, PruneReport, TensorReport};

use crate::classify::{TensorClass, classify_tensor};
use crate::io::{
    OwnedTensor, bytes_to_f32, copy_auxiliary_files, discover_safetensors, f32_to_bytes,
    is_float_dtype, load_tensors, map_files, write_safetensors,
};
use crate::magnitude::{count_zeros, prune_tensor};
use crate::metrics::{RunMetrics, ShardPerf, write_metrics_file};
use crate::model_rules::rules_from_input_dir;

pub const REPORT_FILENAME: &str = "prune_report.json";

/// 核心剪枝流程
pub fn run(config: PruneConfig) -> Result<PruneReport> {
    let total_start = Instant::now();

    config.validate().map_err(|e| anyhow!("配置校验失败: {}", e))?;

    let input = config.modelpool.base_model.clone();
    let output = config.merged_model_save_path.clone();

    // 源目录必须先存在，避免留下空的输出目录
    let input_canonical = fs::canonicalize(&input)
        .with_context(|| format!("源模型目录不存在: {}", input.display()))?;

    // ── 创建输出目录 ──
    fs::create_dir_all(&output)
        .with_context(|| format!("无法创建输出目录 {}", output.display()))?;

    let output_canonical = fs::canonicalize(&output)
        .with_context(|| format!("无法解析输出目录 {}", output.display()))?;
    if input_canonical == output_canonical {
        bail!("输出目录不能与源模型目录相同: {}", output.display());
    }

    // 第一步：发现并 mmap 所有 .safetensors 文件
    let scan_start = Instant::now();
    let paths = discover_safetensors(&input)?;
    info!(count = paths.len(), input = %input.display(), "发现 safetensors 文件");
    let loaded_files = map_files(&paths)?;
    let scan_ms = scan_start.elapsed().as_millis();

    // 第二步：解析模型规则
    let rules = rules_from_input_dir(&input)?;
    match &rules.model_type {
        Some(model_type) => info!(model_type = %model_type, "检测到 model_type"),
        None => info!("未检测到 model_type，默认按 Llama 规则处理"),
    }

    let mut report = PruneReport::new(config.clone(), rules.model_type.clone());
    let mut metrics = RunMetrics {
        files_count: loaded_files.len(),
        scan_ms,
        ..RunMetrics::default()
    };

    // 第三步：逐个分片剪枝并写出，峰值内存约为单个分片大小
    for loaded in &loaded_files {
        let shard_start = Instant::now();
        let filename = loaded
            .path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| anyhow!("无效的文件名: {}", loaded.path.display()))?
            .to_string();

        let mut load_result = load_tensors(loaded)?;

        let prune_start = Instant::now();
        let mut pruned_count = 0usize;
        for tensor in &mut load_result.tensors {
            let numel: usize = tensor.shape.iter().product();
            let class = classify_tensor(&tensor.name, tensor.shape.len(), &rules.layer_re);

            let layer = match class {
                TensorClass::Prunable { layer } if is_float_dtype(tensor.dtype) => layer,
                TensorClass::Prunable { .. } => {
                    warn!(tensor = %tensor.name, dtype = ?tensor.dtype, "非浮点类型，跳过剪枝");
                    report.push_tensor(passthrough_report(&filename, tensor, numel));
                    continue;
                }
                TensorClass::Passthrough => {
                    report.push_tensor(passthrough_report(&filename, tensor, numel));
                    continue;
                }
            };

            let mut values = bytes_to_f32(&tensor.data, tensor.dtype)
                .with_context(|| format!("解码失败: {}", tensor.name))?;
            let zeros_before = count_zeros(&values);
            let masked = prune_tensor(&mut values, &tensor.shape, &config.method)
                .with_context(|| format!("剪枝失败: {}", tensor.name))?;
            let zeros_after = count_zeros(&values);
            tensor.data = f32_to_bytes(&values, tensor.dtype)?;

            debug!(
                tensor = %tensor.name,
                layer,
                masked,
                sparsity = zeros_after as f64 / numel.max(1) as f64,
                "已剪枝"
            );

            pruned_count += 1;
            report.push_tensor(TensorReport {
                name: tensor.name.clone(),
                file: filename.clone(),
                dtype: format!("{:?}", tensor.dtype),
                shape: tensor.shape.clone(),
                numel,
                zeros_before,
                zeros_after,
                pruned: true,
            });
        }
        let prune_ms = prune_start.elapsed().as_millis();

        let output_path = output.join(&filename);
        let (bytes, hash, timings) =
            write_safetensors(&load_result.tensors, &load_result.metadata, &output_path)?;

        println!(
            "  -> {} ({} 个 Tensor，其中 {} 个已剪枝，{} 字节)",
            filename,
            load_result.tensors.len(),
            pruned_count,
            bytes
        );

        metrics.push_shard(ShardPerf {
            filename: filename.clone(),
            tensor_count: load_result.tensors.len(),
            pruned_count,
            bytes_read: load_result.bytes_read,
            bytes_written: bytes,
            load_ms: load_result.load_ms,
            prune_ms,
            serialize_ms: timings.serialize_ms,
            hash_ms: timings.hash_ms,
            write_ms: timings.write_ms,
            shard_total_ms: shard_start.elapsed().as_millis(),
        });

        report.files.push(OutputFile {
            filename,
            bytes,
            blake3: hash,
        });
    }

    // 第四步：拷贝 config.json / tokenizer 等辅助文件
    let copied = copy_auxiliary_files(&input, &output)?;
    info!(count = copied.len(), "已拷贝辅助文件");

    // 第五步：写入报告与指标
    report.validate().map_err(|e| anyhow!(e))?;

    let report_path = output.join(REPORT_FILENAME);
    let json = serde_json::to_string_pretty(&report)?;
    fs::write(&report_path, &json)
        .with_context(|| format!("写入失败: {}", report_path.display()))?;

    metrics.prunable_params = report.prunable_params;
    metrics.pruned_params = report.pruned_params;
    metrics.total_ms = total_start.elapsed().as_millis();
    let metrics_path = write_metrics_file(&output, &metrics.format())?;

    println!("\n报告已写入 {}", report_path.display());
    println!("指标已写入 {}", metrics_path.display());
    println!(
        "完成！{} 个 Tensor 参与剪枝，实际稀疏度 {:.4}（目标 {:.4}）。",
        metrics.pruned_tensors,
        report.achieved_sparsity,
        config.method.target_sparsity()
    );

    Ok(report)
}

/// 原样拷贝的 Tensor 只记录形状，不统计零值
fn passthrough_report(filename: &str, tensor: &OwnedTensor, numel: usize) -> TensorReport {
    TensorReport {
        name: tensor.name.clone(),
        file: filename.to_string(),
        dtype: format!("{:?}", tensor.dtype),
        shape: tensor.shape.clone(),
        numel,
        zeros_before: 0,
        zeros_after: 0,
        pruned: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::path::Path;

    use prune_spec::MethodConfig;
    use safetensors::tensor::{Dtype, SafeTensors, TensorView};
    use tempfile::TempDir;

    const HIDDEN: usize = 8;

    fn ramp(len: usize, offset: f32) -> Vec<f32> {
        (0..len)
            .map(|i| (i as f32 + offset) * if i % 2 == 0 { 1.0 } else { -1.0 })
            .collect()
    }

    fn write_shard(tensors: &[(&str, Vec<usize>, Dtype)], path: &Path) {
        let owned: Vec<(String, Vec<usize>, Dtype, Vec<u8>)> = tensors
            .iter()
            .map(|(name, shape, dtype)| {
                let values = ramp(shape.iter().product(), 1.0);
                (
                    name.to_string(),
                    shape.clone(),
                    *dtype,
                    f32_to_bytes(&values, *dtype).unwrap(),
                )
            })
            .collect();
        let views: Vec<(&str, TensorView<'_>)> = owned
            .iter()
            .map(|(n, s, d, b)| (n.as_str(), TensorView::new(*d, s.clone(), b).unwrap()))
            .collect();
        let metadata = Some(HashMap::from([("format".to_string(), "pt".to_string())]));
        let bytes = safetensors::serialize(views, &metadata).unwrap();
        fs::write(path, bytes).unwrap();
    }

    /// 构造一个两层、分两个分片的迷你 Llama 模型
    fn write_tiny_model(dir: &Path) {
        write_shard(
            &[
                ("model.embed_tokens.weight", vec![16, HIDDEN], Dtype::BF16),
                ("model.layers.0.self_attn.q_proj.weight", vec![HIDDEN, HIDDEN], Dtype::BF16),
                ("model.layers.0.mlp.up_proj.weight", vec![HIDDEN * 2, HIDDEN], Dtype::BF16),
                ("model.layers.0.input_layernorm.weight", vec![HIDDEN], Dtype::BF16),
            ],
            &dir.join("model-00001-of-00002.safetensors"),
        );
        write_shard(
            &[
                ("model.layers.1.mlp.down_proj.weight", vec![HIDDEN, HIDDEN * 2], Dtype::F32),
                ("model.norm.weight", vec![HIDDEN], Dtype::F32),
                ("lm_head.weight", vec![16, HIDDEN], Dtype::F16),
            ],
            &dir.join("model-00002-of-00002.safetensors"),
        );
        fs::write(dir.join("config.json"), r#"{"model_type":"llama"}"#).unwrap();
    }

    fn config(input: &Path, output: &Path, method: MethodConfig) -> PruneConfig {
        let mut cfg = PruneConfig::default();
        cfg.method = method;
        cfg.modelpool.base_model = input.to_path_buf();
        cfg.merged_model_save_path = output.to_path_buf();
        cfg
    }

    fn read_values(path: &Path, name: &str) -> Vec<f32> {
        let bytes = fs::read(path).unwrap();
        let st = SafeTensors::deserialize(&bytes).unwrap();
        let t = st.tensor(name).unwrap();
        bytes_to_f32(t.data(), t.dtype()).unwrap()
    }

    #[test]
    fn unstructured_run_prunes_linear_layers_only() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        write_tiny_model(src.path());
        let out = dst.path().join("sparsity_0.5");

        let report = run(config(src.path(), &out, MethodConfig::unstructured(0.5))).unwrap();

        assert_eq!(report.model_type.as_deref(), Some("llama"));
        assert_eq!(report.files.len(), 2);
        assert_eq!(report.tensors.iter().filter(|t| t.pruned).count(), 3);
        assert!((report.achieved_sparsity - 0.5).abs() < 1e-9);

        let shard1 = out.join("model-00001-of-00002.safetensors");
        let q = read_values(&shard1, "model.layers.0.self_attn.q_proj.weight");
        for row in q.chunks(HIDDEN) {
            assert_eq!(count_zeros(row), HIDDEN / 2);
        }

        // embedding / norm 原样保留
        let embed = read_values(&shard1, "model.embed_tokens.weight");
        assert_eq!(count_zeros(&embed), 0);
        let norm = read_values(&shard1, "model.layers.0.input_layernorm.weight");
        assert_eq!(norm, ramp(HIDDEN, 1.0));

        assert!(out.join("config.json").is_file());
        assert!(out.join(REPORT_FILENAME).is_file());
        assert!(out.join(crate::metrics::METRICS_FILENAME).is_file());
    }

    #[test]
    fn semistructured_run_respects_block_pattern() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        write_tiny_model(src.path());
        let out = dst.path().join("4_8");

        run(config(src.path(), &out, MethodConfig::semistructured(4, 8))).unwrap();

        let down = read_values(
            &out.join("model-00002-of-00002.safetensors"),
            "model.layers.1.mlp.down_proj.weight",
        );
        for block in down.chunks(8) {
            assert_eq!(block.iter().filter(|v| **v != 0.0).count(), 4);
        }
        let lm_head = read_values(&out.join("model-00002-of-00002.safetensors"), "lm_head.weight");
        assert_eq!(count_zeros(&lm_head), 0);
    }

    #[test]
    fn passthrough_tensors_are_byte_identical() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        write_tiny_model(src.path());
        let out = dst.path().join("2_4");

        run(config(src.path(), &out, MethodConfig::semistructured(2, 4))).unwrap();

        let before = fs::read(src.path().join("model-00002-of-00002.safetensors")).unwrap();
        let after = fs::read(out.join("model-00002-of-00002.safetensors")).unwrap();
        let before = SafeTensors::deserialize(&before).unwrap();
        let after = SafeTensors::deserialize(&after).unwrap();
        for name in ["model.norm.weight", "lm_head.weight"] {
            assert_eq!(
                before.tensor(name).unwrap().data(),
                after.tensor(name).unwrap().data()
            );
        }
    }

    #[test]
    fn report_round_trips_through_json() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        write_tiny_model(src.path());
        let out = dst.path().join("sparsity_0.7");

        run(config(src.path(), &out, MethodConfig::unstructured(0.7))).unwrap();

        let raw = fs::read_to_string(out.join(REPORT_FILENAME)).unwrap();
        let report: PruneReport = serde_json::from_str(&raw).unwrap();
        assert_eq!(report.config.method, MethodConfig::unstructured(0.7));
        assert_eq!(report.tensors.len(), 7);
    }

    #[test]
    fn rejects_output_equal_to_input() {
        let src = TempDir::new().unwrap();
        write_tiny_model(src.path());
        let err = run(config(src.path(), src.path(), MethodConfig::unstructured(0.5))).unwrap_err();
        assert!(err.to_string().contains("不能与源模型目录相同"));
    }

    #[test]
    fn rejects_invalid_method_before_touching_disk() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        write_tiny_model(src.path());
        let out = dst.path().join("bad");

        assert!(run(config(src.path(), &out, MethodConfig::semistructured(2, 0))).is_err());
        assert!(!out.exists());
    }

    #[test]
    fn missing_base_model_leaves_no_output_dir() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        let missing = src.path().join("no-such-model");
        let out = dst.path().join("sparsity_0.5");

        let err = run(config(&missing, &out, MethodConfig::unstructured(0.5))).unwrap_err();
        assert!(err.to_string().contains("源模型目录不存在"));
        assert!(!out.exists());
    }
}
