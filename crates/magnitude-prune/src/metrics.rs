use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

pub const METRICS_FILENAME: &str = "metrics.txt";

/// 单个分片的处理指标
pub struct ShardPerf {
    pub filename: String,
    pub tensor_count: usize,
    pub pruned_count: usize,
    pub bytes_read: usize,
    pub bytes_written: u64,
    pub load_ms: u128,
    pub prune_ms: u128,
    pub serialize_ms: u128,
    pub hash_ms: u128,
    pub write_ms: u128,
    pub shard_total_ms: u128,
}

/// 整次运行的汇总指标
#[derive(Default)]
pub struct RunMetrics {
    pub files_count: usize,
    pub tensors_total: usize,
    pub pruned_tensors: usize,
    pub prunable_params: usize,
    pub pruned_params: usize,
    pub bytes_read: usize,
    pub bytes_written: u64,
    pub scan_ms: u128,
    pub total_ms: u128,
    pub shards: Vec<ShardPerf>,
}

impl RunMetrics {
    pub fn push_shard(&mut self, perf: ShardPerf) {
        self.tensors_total += perf.tensor_count;
        self.pruned_tensors += perf.pruned_count;
        self.bytes_read += perf.bytes_read;
        self.bytes_written += perf.bytes_written;
        self.shards.push(perf);
    }

    fn sum(&self, f: impl Fn(&ShardPerf) -> u128) -> u128 {
        self.shards.iter().map(f).sum()
    }

    pub fn format(&self) -> String {
        let sparsity = if self.prunable_params > 0 {
            self.pruned_params as f64 / self.prunable_params as f64
        } else {
            0.0
        };

        let mut out = format!(
            "files_count: {}\n\
tensors_total: {}\n\
pruned_tensors: {}\n\
prunable_params: {}\n\
pruned_params: {}\n\
achieved_sparsity: {:.4}\n\
bytes_read: {}\n\
bytes_written: {}\n\
scan_ms: {}\n\
load_ms: {}\n\
prune_ms: {}\n\
serialize_ms: {}\n\
hash_ms: {}\n\
write_ms: {}\n\
total_ms: {}",
            self.files_count,
            self.tensors_total,
            self.pruned_tensors,
            self.prunable_params,
            self.pruned_params,
            sparsity,
            self.bytes_read,
            self.bytes_written,
            self.scan_ms,
            self.sum(|s| s.load_ms),
            self.sum(|s| s.prune_ms),
            self.sum(|s| s.serialize_ms),
            self.sum(|s| s.hash_ms),
            self.sum(|s| s.write_ms),
            self.total_ms,
        );

        out.push_str("\nshard_perf_begin\n");
        for s in &self.shards {
            out.push_str(&format!(
                "filename: {}\ntensor_count: {}\npruned_count: {}\nbytes_read: {}\nbytes_written: {}\nload_ms: {}\nprune_ms: {}\nserialize_ms: {}\nhash_ms: {}\nwrite_ms: {}\nshard_total_ms: {}\n---\n",
                s.filename,
                s.tensor_count,
                s.pruned_count,
                s.bytes_read,
                s.bytes_written,
                s.load_ms,
                s.prune_ms,
                s.serialize_ms,
                s.hash_ms,
                s.write_ms,
                s.shard_total_ms,
            ));
        }
        out.push_str("shard_perf_end");

        out
    }
}

pub fn write_metrics_file(output_dir: &Path, metrics: &str) -> Result<PathBuf> {
    let path = output_dir.join(METRICS_FILENAME);
    fs::write(&path, metrics)
        .with_context(|| format!("无法写入指标文件 {}", path.display()))?;
    Ok(path)
}
