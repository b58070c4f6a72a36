use regex::Regex;

/// Tensor 分类结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TensorClass {
    /// 解码层内的线性投影权重，附带层索引号
    Prunable { layer: u32 },
    /// 原样拷贝: embedding / norm / lm_head / bias
    Passthrough,
}

/// 根据 Llama 系列的 Tensor 命名规则进行分类
///
/// 参与剪枝（模式: `model.layers.{N}.{组件}.weight`，且至少二维）:
///   - `model.layers.{N}.self_attn.{q,k,v,o}_proj.weight`
///   - `model.layers.{N}.mlp.{gate,up,down}_proj.weight`
///
/// 原样拷贝:
///   - `model.embed_tokens.weight` / `model.norm.weight` / `lm_head.weight`
///   - `model.layers.{N}.input_layernorm.weight` 等一维 norm 权重
///   - 所有 bias
pub fn classify_tensor(name: &str, rank: usize, layer_re: &Regex) -> TensorClass {
    if rank < 2 || !name.ends_with(".weight") {
        return TensorClass::Passthrough;
    }

    layer_re
        .captures(name)
        .and_then(|caps| caps[1].parse::<u32>().ok())
        .map_or(TensorClass::Passthrough, |layer| TensorClass::Prunable {
            layer,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layer_re() -> Regex {
        Regex::new(r"^model\.layers\.(\d+)\.").unwrap()
    }

    #[test]
    fn embed_tokens_is_passthrough() {
        let re = layer_re();
        assert_eq!(
            classify_tensor("model.embed_tokens.weight", 2, &re),
            TensorClass::Passthrough
        );
    }

    #[test]
    fn lm_head_is_passthrough() {
        let re = layer_re();
        assert_eq!(
            classify_tensor("lm_head.weight", 2, &re),
            TensorClass::Passthrough
        );
    }

    #[test]
    fn attention_projection_is_prunable() {
        let re = layer_re();
        assert_eq!(
            classify_tensor("model.layers.5.self_attn.q_proj.weight", 2, &re),
            TensorClass::Prunable { layer: 5 }
        );
    }

    #[test]
    fn mlp_projection_is_prunable() {
        let re = layer_re();
        assert_eq!(
            classify_tensor("model.layers.12.mlp.down_proj.weight", 2, &re),
            TensorClass::Prunable { layer: 12 }
        );
    }

    #[test]
    fn layernorm_is_passthrough() {
        let re = layer_re();
        assert_eq!(
            classify_tensor("model.layers.0.input_layernorm.weight", 1, &re),
            TensorClass::Passthrough
        );
    }

    #[test]
    fn bias_is_passthrough() {
        let re = layer_re();
        assert_eq!(
            classify_tensor("model.layers.3.self_attn.q_proj.bias", 2, &re),
            TensorClass::Passthrough
        );
    }

    #[test]
    fn overflowing_layer_index_is_passthrough() {
        let re = layer_re();
        assert_eq!(
            classify_tensor("model.layers.99999999999.mlp.up_proj.weight", 2, &re),
            TensorClass::Passthrough
        );
    }
}
