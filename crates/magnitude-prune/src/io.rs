use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result, anyhow, bail};
use memmap2::Mmap;
use safetensors::tensor::{Dtype, SafeTensors, TensorView};

use crate::LoadedFile;

/// 从 mmap 源文件中提取出来的 Tensor 完整数据（持有所有权）
pub struct OwnedTensor {
    pub name: String,
    pub dtype: Dtype,
    pub shape: Vec<usize>,
    pub data: Vec<u8>,
}

pub struct LoadResult {
    pub tensors: Vec<OwnedTensor>,
    /// 源文件 Header 中的 `__metadata__`，写出时原样保留
    pub metadata: Option<HashMap<String, String>>,
    pub bytes_read: usize,
    pub load_ms: u128,
}

pub struct WriteTimings {
    pub serialize_ms: u128,
    pub hash_ms: u128,
    pub write_ms: u128,
}

/// 列出目录下所有 .safetensors 文件（排序后返回）
pub fn discover_safetensors(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        bail!("输入路径 '{}' 不是有效目录", dir.display());
    }

    let mut paths: Vec<PathBuf> = fs::read_dir(dir)
        .with_context(|| format!("无法读取目录 {}", dir.display()))?
        .filter_map(|entry| {
            let path = entry.ok()?.path();
            if path.extension().and_then(|e| e.to_str()) == Some("safetensors") {
                Some(path)
            } else {
                None
            }
        })
        .collect();

    paths.sort(); // 确保多文件场景下顺序确定

    if paths.is_empty() {
        bail!("在 {} 中未找到 .safetensors 文件", dir.display());
    }

    Ok(paths)
}

/// 内存映射所有源文件
pub fn map_files(paths: &[PathBuf]) -> Result<Vec<LoadedFile>> {
    paths
        .iter()
        .map(|path| {
            let file =
                fs::File::open(path).with_context(|| format!("无法打开 {}", path.display()))?;
            // SAFETY: 文件以只读方式打开，且在处理期间保持 File 句柄存活
            let mmap = unsafe { Mmap::map(&file) }
                .with_context(|| format!("mmap 失败: {}", path.display()))?;
            Ok(LoadedFile {
                path: path.clone(),
                _file: file,
                mmap,
            })
        })
        .collect()
}

/// 加载单个源文件中的全部 Tensor（按名称排序）
///
/// 每次只持有一个文件的数据量，多分片模型的峰值内存约为最大分片大小。
pub fn load_tensors(loaded: &LoadedFile) -> Result<LoadResult> {
    let start = Instant::now();

    let st = SafeTensors::deserialize(&loaded.mmap)
        .with_context(|| format!("解析失败: {}", loaded.path.display()))?;
    let (_, header) = SafeTensors::read_metadata(&loaded.mmap)
        .with_context(|| format!("读取 Header 失败: {}", loaded.path.display()))?;

    let mut names: Vec<&str> = st.names().into_iter().map(|s| s.as_str()).collect();
    names.sort_unstable();

    let mut tensors = Vec::with_capacity(names.len());
    let mut bytes_read = 0usize;

    for name in names {
        let tensor = st
            .tensor(name)
            .with_context(|| format!("Tensor '{}' 在 {} 中未找到", name, loaded.path.display()))?;
        bytes_read += tensor.data().len();
        tensors.push(OwnedTensor {
            name: name.to_string(),
            dtype: tensor.dtype(),
            shape: tensor.shape().to_vec(),
            data: tensor.data().to_vec(),
        });
    }

    Ok(LoadResult {
        tensors,
        metadata: header.metadata().clone(),
        bytes_read,
        load_ms: start.elapsed().as_millis(),
    })
}

/// 是否为可剪枝的浮点类型
pub fn is_float_dtype(dtype: Dtype) -> bool {
    matches!(dtype, Dtype::F32 | Dtype::F16 | Dtype::BF16)
}

/// 将原始小端字节解码为 f32
pub fn bytes_to_f32(data: &[u8], dtype: Dtype) -> Result<Vec<f32>> {
    match dtype {
        Dtype::F32 => {
            if data.len() % 4 != 0 {
                bail!("F32 数据长度 {} 不是 4 的倍数", data.len());
            }
            Ok(data
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect())
        }
        Dtype::F16 => {
            if data.len() % 2 != 0 {
                bail!("F16 数据长度 {} 不是 2 的倍数", data.len());
            }
            Ok(data
                .chunks_exact(2)
                .map(|c| half::f16::from_le_bytes([c[0], c[1]]).to_f32())
                .collect())
        }
        Dtype::BF16 => {
            if data.len() % 2 != 0 {
                bail!("BF16 数据长度 {} 不是 2 的倍数", data.len());
            }
            Ok(data
                .chunks_exact(2)
                .map(|c| half::bf16::from_le_bytes([c[0], c[1]]).to_f32())
                .collect())
        }
        other => bail!("不支持的数据类型 {:?}，仅支持 F32 / F16 / BF16", other),
    }
}

/// 将 f32 编码回原数据类型的小端字节
///
/// 剪枝只会把值置零，其余值由原类型解码而来，回写不损失精度。
pub fn f32_to_bytes(values: &[f32], dtype: Dtype) -> Result<Vec<u8>> {
    match dtype {
        Dtype::F32 => Ok(values.iter().flat_map(|v| v.to_le_bytes()).collect()),
        Dtype::F16 => Ok(values
            .iter()
            .flat_map(|v| half::f16::from_f32(*v).to_le_bytes())
            .collect()),
        Dtype::BF16 => Ok(values
            .iter()
            .flat_map(|v| half::bf16::from_f32(*v).to_le_bytes())
            .collect()),
        other => bail!("不支持的数据类型 {:?}，仅支持 F32 / F16 / BF16", other),
    }
}

/// 将一组 OwnedTensor 序列化为新的 .safetensors 文件
/// 返回 (文件字节数, BLAKE3 十六进制摘要, 计时信息)
pub fn write_safetensors(
    tensors: &[OwnedTensor],
    metadata: &Option<HashMap<String, String>>,
    output_path: &Path,
) -> Result<(u64, String, WriteTimings)> {
    // 构建 TensorView 引用，借用 OwnedTensor 中的数据
    let views: Vec<(&str, TensorView<'_>)> = tensors
        .iter()
        .map(|t| {
            let view = TensorView::new(t.dtype, t.shape.clone(), &t.data)
                .with_context(|| format!("Tensor '{}' 数据格式无效", t.name))?;
            Ok((t.name.as_str(), view))
        })
        .collect::<Result<_>>()?;

    let serialize_start = Instant::now();
    let serialized =
        safetensors::serialize(views, metadata).context("safetensors 序列化失败")?;
    let serialize_ms = serialize_start.elapsed().as_millis();

    let size = serialized.len() as u64;

    // 哈希与落盘互不依赖，并行执行
    let (hash, hash_ms, write_ms) = std::thread::scope(|scope| {
        let serialized_ref = &serialized;
        let hash_handle = scope.spawn(move || {
            let hash_start = Instant::now();
            let hash = blake3::hash(serialized_ref).to_hex().to_string();
            (hash, hash_start.elapsed().as_millis())
        });

        let write_start = Instant::now();
        fs::write(output_path, serialized_ref)
            .with_context(|| format!("写入失败: {}", output_path.display()))?;
        let write_ms = write_start.elapsed().as_millis();

        let (hash, hash_ms) = hash_handle
            .join()
            .map_err(|_| anyhow!("hash 线程异常终止"))?;

        Ok::<(String, u128, u128), anyhow::Error>((hash, hash_ms, write_ms))
    })?;

    Ok((
        size,
        hash,
        WriteTimings {
            serialize_ms,
            hash_ms,
            write_ms,
        },
    ))
}

/// 拷贝源目录中除 .safetensors 以外的文件（config.json、tokenizer 等），子目录跳过
pub fn copy_auxiliary_files(src: &Path, dst: &Path) -> Result<Vec<PathBuf>> {
    let mut copied = Vec::new();

    for entry in fs::read_dir(src).with_context(|| format!("无法读取目录 {}", src.display()))? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        if path.extension().and_then(|e| e.to_str()) == Some("safetensors") {
            continue;
        }
        let Some(name) = path.file_name() else {
            continue;
        };
        let target = dst.join(name);
        fs::copy(&path, &target).with_context(|| {
            format!("拷贝失败: {} -> {}", path.display(), target.display())
        })?;
        copied.push(target);
    }

    copied.sort();
    Ok(copied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn tensor(name: &str, values: &[f32], shape: Vec<usize>, dtype: Dtype) -> OwnedTensor {
        OwnedTensor {
            name: name.to_string(),
            dtype,
            shape,
            data: f32_to_bytes(values, dtype).unwrap(),
        }
    }

    #[test]
    fn discover_sorts_and_filters() {
        let dir = TempDir::new().unwrap();
        fs::File::create(dir.path().join("model-00002-of-00002.safetensors")).unwrap();
        fs::File::create(dir.path().join("model-00001-of-00002.safetensors")).unwrap();
        fs::File::create(dir.path().join("config.json")).unwrap();

        let found = discover_safetensors(dir.path()).unwrap();
        assert_eq!(found.len(), 2);
        assert!(found[0].ends_with("model-00001-of-00002.safetensors"));
    }

    #[test]
    fn discover_rejects_empty_dir() {
        let dir = TempDir::new().unwrap();
        let err = discover_safetensors(dir.path()).unwrap_err();
        assert!(err.to_string().contains("未找到"));
    }

    #[test]
    fn half_precision_conversions() {
        let values = [1.0f32, -0.5, 0.0, 2.0];
        for dtype in [Dtype::F32, Dtype::F16, Dtype::BF16] {
            let bytes = f32_to_bytes(&values, dtype).unwrap();
            assert_eq!(bytes_to_f32(&bytes, dtype).unwrap(), values);
        }
        assert!(bytes_to_f32(&[0u8; 3], Dtype::F16).is_err());
        assert!(bytes_to_f32(&[0u8; 4], Dtype::I32).is_err());
    }

    #[test]
    fn write_then_load_preserves_metadata() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("model.safetensors");
        let tensors = vec![
            tensor("b", &[1.0, 2.0], vec![2], Dtype::F32),
            tensor("a", &[1.0, 2.0, 3.0, 4.0], vec![2, 2], Dtype::BF16),
        ];
        let metadata = Some(HashMap::from([("format".to_string(), "pt".to_string())]));

        let (bytes, hash, _) = write_safetensors(&tensors, &metadata, &path).unwrap();
        assert_eq!(bytes, fs::metadata(&path).unwrap().len());
        assert_eq!(hash, blake3::hash(&fs::read(&path).unwrap()).to_hex().to_string());

        let loaded = map_files(&[path]).unwrap();
        let result = load_tensors(&loaded[0]).unwrap();
        let names: Vec<_> = result.tensors.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, ["a", "b"]);
        assert_eq!(result.tensors[0].dtype, Dtype::BF16);
        assert_eq!(result.metadata, metadata);
        assert_eq!(result.bytes_read, 2 * 4 + 4 * 2);
    }

    #[test]
    fn copies_only_auxiliary_files() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        fs::write(src.path().join("config.json"), "{}").unwrap();
        fs::write(src.path().join("tokenizer.json"), "{}").unwrap();
        fs::write(src.path().join("model.safetensors"), b"x").unwrap();
        fs::create_dir(src.path().join("nested")).unwrap();

        let copied = copy_auxiliary_files(src.path(), dst.path()).unwrap();
        assert_eq!(copied.len(), 2);
        assert!(dst.path().join("config.json").is_file());
        assert!(dst.path().join("tokenizer.json").is_file());
        assert!(!dst.path().join("model.safetensors").exists());
        assert!(!dst.path().join("nested").exists());
    }
}
