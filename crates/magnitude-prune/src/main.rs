//! magnitude-prune: 基于权重幅值的 LLM 剪枝工具
//!
//! 读取 safetensors 格式的模型，对解码层中的线性投影权重做幅值剪枝：
//! - unstructured: 每行置零 `sparsity_ratio` 比例的最小幅值权重
//! - semistructured: 每连续 M 个权重保留幅值最大的 N 个
//!
//! 配置由命名配置 (`--config-name`) 加上 `key=value` 覆盖项组成，
//! 结果模型、prune_report.json 与 metrics.txt 写入 `merged_model_save_path`。

use std::fs::File;
use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use memmap2::Mmap;
use tracing::info;

use prune_spec::{LLAMA_MAGNITUDE_PRUNING, PruneConfig};

mod classify;
mod io;
mod magnitude;
mod metrics;
mod model_rules;
mod prune;

// CLI 参数定义

#[derive(Parser, Debug)]
#[command(
    name = "magnitude-prune",
    version,
    about = "对 safetensors 模型做幅值剪枝（unstructured / N:M semistructured）"
)]
pub struct Args {
    /// 基础配置名
    #[arg(long, default_value = LLAMA_MAGNITUDE_PRUNING)]
    pub config_name: String,

    /// 存放 `<config-name>.json` 的目录，存在时优先于内置配置
    #[arg(long)]
    pub config_path: Option<PathBuf>,

    /// 日志级别 (trace / debug / info / warn / error)
    #[arg(long, default_value = "info")]
    pub log_level: tracing::Level,

    /// 配置覆盖项，如 `method.sparsity_ratio=0.7` `modelpool.base_model=/path`
    #[arg(value_name = "KEY=VALUE")]
    pub overrides: Vec<String>,
}

/// 已加载（mmap）的源文件
pub struct LoadedFile {
    pub path: PathBuf,
    pub _file: File,
    pub mmap: Mmap,
}

fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_max_level(args.log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let mut config = PruneConfig::resolve(&args.config_name, args.config_path.as_deref())?;
    config.apply_overrides(&args.overrides)?;

    info!(
        config_name = %args.config_name,
        prune_type = %config.method.prune_type,
        sparsity_ratio = config.method.sparsity_ratio,
        n = config.method.n,
        m = config.method.m,
        "开始剪枝"
    );
    println!("{}", serde_json::to_string_pretty(&config)?);

    prune::run(config)?;
    Ok(())
}
