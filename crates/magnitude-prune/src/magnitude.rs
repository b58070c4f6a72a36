//! 基于权重绝对值的剪枝算法
//!
//! 所有算法都在行主序的二维视图 `(rows, cols)` 上原地操作：
//! - unstructured: 每个输出行内置零幅值最小的 `floor(cols * sparsity)` 个权重
//! - semistructured: 每行内每连续 `m` 个权重保留幅值最大的 `n` 个，其余置零
//!
//! 排序遇到幅值相同时按列索引打破平局（索引小者视为更重要），保证结果确定。

use std::cmp::Ordering;

use anyhow::{Result, bail};

use prune_spec::{MethodConfig, PruneType};

/// 重要性分数：权重绝对值
pub fn magnitude_scores(weights: &[f32]) -> Vec<f32> {
    weights.iter().map(|w| w.abs()).collect()
}

pub fn count_zeros(values: &[f32]) -> usize {
    values.iter().filter(|v| **v == 0.0).count()
}

/// 将 Tensor 形状视为二维 `(rows, cols)`；一维及以下返回 None
pub fn matrix_dims(shape: &[usize]) -> Option<(usize, usize)> {
    match shape {
        [] | [_] => None,
        [rows, rest @ ..] => Some((*rows, rest.iter().product())),
    }
}

/// 每行应置零的权重数
fn prune_count(cols: usize, sparsity: f64) -> usize {
    ((cols as f64 * sparsity).floor() as usize).min(cols)
}

/// 升序：幅值小的在前，幅值相同则索引大的在前（先被剪掉）
fn ascending_importance(scores: &[f32], a: usize, b: usize) -> Ordering {
    scores[a].total_cmp(&scores[b]).then_with(|| b.cmp(&a))
}

/// unstructured 剪枝，返回本次新置零的权重数
pub fn unstructured_prune(weights: &mut [f32], rows: usize, cols: usize, sparsity: f64) -> usize {
    debug_assert_eq!(weights.len(), rows * cols);

    let k = prune_count(cols, sparsity);
    if k == 0 || cols == 0 {
        return 0;
    }

    let mut newly_masked = 0;
    let mut order: Vec<usize> = Vec::with_capacity(cols);

    for row in weights.chunks_exact_mut(cols) {
        let scores = magnitude_scores(row);
        order.clear();
        order.extend(0..cols);
        // 只需要最小的 k 个，select 之后再对前 k 个无须排序
        if k < cols {
            order.select_nth_unstable_by(k, |&a, &b| ascending_importance(&scores, a, b));
        }
        for &idx in &order[..k] {
            if row[idx] != 0.0 {
                newly_masked += 1;
            }
            row[idx] = 0.0;
        }
    }

    newly_masked
}

/// semistructured (N:M) 剪枝，返回本次新置零的权重数
pub fn semistructured_prune(
    weights: &mut [f32],
    rows: usize,
    cols: usize,
    n: usize,
    m: usize,
) -> Result<usize> {
    debug_assert_eq!(weights.len(), rows * cols);

    if m == 0 || n > m {
        bail!("无效的 N:M 模式 {}:{}", n, m);
    }
    if cols % m != 0 {
        bail!("列数 {} 不能被块大小 m={} 整除", cols, m);
    }
    if n == m || cols == 0 {
        return Ok(0);
    }

    let mut newly_masked = 0;
    let mut order: Vec<usize> = Vec::with_capacity(m);

    for block in weights.chunks_exact_mut(m) {
        let scores = magnitude_scores(block);
        order.clear();
        order.extend(0..m);
        // 前 m - n 个是最不重要的
        order.sort_by(|&a, &b| ascending_importance(&scores, a, b));
        for &idx in &order[..m - n] {
            if block[idx] != 0.0 {
                newly_masked += 1;
            }
            block[idx] = 0.0;
        }
    }

    Ok(newly_masked)
}

/// 按 method 配置剪枝一个 Tensor
pub fn prune_tensor(values: &mut [f32], shape: &[usize], method: &MethodConfig) -> Result<usize> {
    let Some((rows, cols)) = matrix_dims(shape) else {
        bail!("仅支持二维及以上的 Tensor，当前形状 {:?}", shape);
    };
    if rows * cols != values.len() {
        bail!(
            "形状 {:?} 与数据长度 {} 不一致",
            shape,
            values.len()
        );
    }

    match method.prune_type {
        PruneType::Unstructured => Ok(unstructured_prune(
            values,
            rows,
            cols,
            method.sparsity_ratio,
        )),
        PruneType::Semistructured => semistructured_prune(values, rows, cols, method.n, method.m),
    }
}
