use std::path::Path;
use std::process::Command;
use std::time::Instant;

use anyhow::Result;
use tracing::{info, warn};

use prune_spec::{SweepPlan, SweepRun};

/// 单次调用的执行结果
#[derive(Debug)]
pub struct RunOutcome {
    pub subpath: String,
    pub command: String,
    pub success: bool,
    /// 子进程退出码；启动失败或被信号终止时为 None
    pub code: Option<i32>,
    pub elapsed_ms: u128,
}

/// 生成传给剪枝工具的参数：`--config-name <name>` 加上有序覆盖项
pub fn command_args(
    config_name: &str,
    run: &SweepRun,
    model_path: &Path,
    output_path: &Path,
) -> Vec<String> {
    let mut args = vec!["--config-name".to_string(), config_name.to_string()];
    args.extend(run.overrides(model_path, output_path));
    args
}

pub fn build_command(program: &str, args: &[String]) -> Command {
    let mut cmd = Command::new(program);
    cmd.args(args);
    cmd
}

/// 渲染成便于复制粘贴的命令行，含空白或引号的参数加单引号
pub fn render_command(program: &str, args: &[String]) -> String {
    std::iter::once(program)
        .chain(args.iter().map(String::as_str))
        .map(|a| {
            if a.is_empty() || a.chars().any(|c| c.is_whitespace() || c == '\'' || c == '"') {
                format!("'{}'", a.replace('\'', r"'\''"))
            } else {
                a.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// 按顺序逐个执行计划中的调用，每个子进程结束后才启动下一个
///
/// 默认遇到失败继续执行后续调用；`fail_fast` 为 true 时在第一次失败后停止。
pub fn run_sweep(
    plan: &SweepPlan,
    program: &str,
    model_path: &Path,
    output_path: &Path,
    fail_fast: bool,
) -> Result<Vec<RunOutcome>> {
    let mut outcomes = Vec::with_capacity(plan.runs.len());

    for (idx, run) in plan.runs.iter().enumerate() {
        let args = command_args(&plan.config_name, run, model_path, output_path);
        let command = render_command(program, &args);
        info!(
            run = idx + 1,
            total = plan.runs.len(),
            prune_type = %run.prune_type,
            subpath = %run.subpath,
            "启动剪枝"
        );
        println!("[{}/{}] {}", idx + 1, plan.runs.len(), command);

        let start = Instant::now();
        let (success, code) = match build_command(program, &args).status() {
            Ok(status) => (status.success(), status.code()),
            Err(e) => {
                warn!(program, error = %e, "无法启动剪枝程序");
                (false, None)
            }
        };
        let elapsed_ms = start.elapsed().as_millis();

        if success {
            info!(subpath = %run.subpath, elapsed_ms, "剪枝完成");
        } else {
            warn!(subpath = %run.subpath, code = ?code, "剪枝失败");
        }

        outcomes.push(RunOutcome {
            subpath: run.subpath.clone(),
            command,
            success,
            code,
            elapsed_ms,
        });

        if !success && fail_fast {
            warn!("已启用 --fail-fast，停止后续调用");
            break;
        }
    }

    Ok(outcomes)
}
