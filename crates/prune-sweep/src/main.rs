//! prune-sweep: 幅值剪枝扫参启动器
//!
//! 以不同的剪枝配置依次调用 magnitude-prune，每个变体写入独立的输出子目录。
//! 默认计划为 unstructured 0.5 / 0.7 与 semistructured 2:4 / 4:8 共四次调用。

use std::path::PathBuf;

use anyhow::{Result, anyhow, bail};
use clap::Parser;
use tracing::info;

use prune_spec::{LLAMA_MAGNITUDE_PRUNING, SweepPlan, parse_nm};

mod launcher;

#[derive(Parser, Debug)]
#[command(author, version, about = "按参数网格依次调用幅值剪枝工具")]
struct Args {
    /// 源模型目录
    #[arg(long, env = "MODEL_PATH")]
    model_path: PathBuf,

    /// 输出根目录，每个变体写入其下的独立子目录
    #[arg(long, env = "OUTPUT_PATH")]
    output_path: PathBuf,

    /// 剪枝程序
    #[arg(long, default_value = "magnitude-prune")]
    program: String,

    /// 基础配置名
    #[arg(long, default_value = LLAMA_MAGNITUDE_PRUNING)]
    config_name: String,

    /// unstructured 稀疏度列表（逗号分隔）；与 --nm 任一给出时替换默认计划
    #[arg(long, value_delimiter = ',')]
    sparsity: Vec<f64>,

    /// semistructured 块模式列表，如 `2:4,4:8`
    #[arg(long, value_delimiter = ',', value_parser = parse_nm)]
    nm: Vec<(usize, usize)>,

    /// 只打印命令，不执行
    #[arg(long)]
    dry_run: bool,

    /// 遇到第一次失败即停止
    #[arg(long)]
    fail_fast: bool,

    /// 日志级别 (trace / debug / info / warn / error)
    #[arg(long, default_value = "info")]
    log_level: tracing::Level,
}

fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_max_level(args.log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let plan = if args.sparsity.is_empty() && args.nm.is_empty() {
        SweepPlan {
            config_name: args.config_name.clone(),
            ..SweepPlan::default_plan()
        }
    } else {
        SweepPlan::from_grid(&args.config_name, &args.sparsity, &args.nm)
    };

    plan.validate().map_err(|e| anyhow!("扫参计划校验失败: {}", e))?;
    info!(runs = plan.runs.len(), config_name = %plan.config_name, "扫参计划已生成");

    if args.dry_run {
        for run in &plan.runs {
            let cmd_args =
                launcher::command_args(&plan.config_name, run, &args.model_path, &args.output_path);
            println!("{}", launcher::render_command(&args.program, &cmd_args));
        }
        return Ok(());
    }

    let outcomes = launcher::run_sweep(
        &plan,
        &args.program,
        &args.model_path,
        &args.output_path,
        args.fail_fast,
    )?;

    println!("\n=== 扫参结果 ===");
    for o in &outcomes {
        if o.success {
            println!("{:<16} ok      {} ms", o.subpath, o.elapsed_ms);
        } else {
            let code = o.code.map_or("-".to_string(), |c| c.to_string());
            println!("{:<16} FAILED  exit={} {}", o.subpath, code, o.command);
        }
    }

    let failed: Vec<&str> = outcomes
        .iter()
        .filter(|o| !o.success)
        .map(|o| o.subpath.as_str())
        .collect();
    if !failed.is_empty() {
        bail!("{} 个变体剪枝失败: {}", failed.len(), failed.join(", "));
    }
    if outcomes.len() < plan.runs.len() {
        bail!("扫参提前终止");
    }

    println!("完成！共生成 {} 个剪枝变体。", outcomes.len());
    Ok(())
}
