//! 幅值剪枝工具链的共享类型：method 配置、命名配置与覆盖项、扫参计划、剪枝报告。

mod config;
mod method;
mod report;
mod sweep;

pub use config::{LLAMA_MAGNITUDE_PRUNING, ModelPoolConfig, OverrideError, PruneConfig};
pub use method::{MethodConfig, PruneType};
pub use report::{OutputFile, PruneReport, TensorReport};
pub use sweep::{SweepPlan, SweepRun, parse_nm};
