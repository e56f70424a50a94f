//! 判断产物是否需要重新生成
//!
//! 基础判断只比较修改时间：产物存在且比所有源文件都新，才认为是最新的。
//! 在此之上叠加一层内容指纹缓存 [`BuildCache`]，用于发现修改时间无法反映的变化，
//! 例如编译参数（宏定义）改变，或源文件内容变了但时间戳更旧。

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::error::{BuildResult, IoPathContext};

fn modified(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// 产物存在，且修改时间严格晚于每一个源文件时返回 true
///
/// 源文件缺失时视为需要重新生成。
pub fn is_up_to_date<P: AsRef<Path>>(sources: &[P], target: &Path) -> bool {
    let Some(target_time) = modified(target) else {
        return false;
    };
    sources.iter().all(|source| match modified(source.as_ref()) {
        Some(source_time) => target_time > source_time,
        None => false,
    })
}

/// 单个产物的缓存记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct CacheRecord {
    fingerprint: String,
}

/// 以产物路径为键的内容指纹缓存，持久化为 json
#[derive(Debug, Default)]
pub struct BuildCache {
    path: Option<PathBuf>,
    records: Mutex<BTreeMap<PathBuf, CacheRecord>>,
}

impl BuildCache {
    pub const FILE_NAME: &'static str = ".shader-build-cache.json";

    /// 仅存在于内存中的缓存
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// 从 `out_dir` 加载缓存；文件缺失或损坏时从空缓存开始
    pub fn load(out_dir: &Path) -> Self {
        let path = out_dir.join(Self::FILE_NAME);
        let records = match std::fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str(&text).unwrap_or_else(|e| {
                log::warn!("Ignoring corrupt build cache {path:?}: {e}");
                BTreeMap::new()
            }),
            Err(_) => BTreeMap::new(),
        };

        Self {
            path: Some(path),
            records: Mutex::new(records),
        }
    }

    /// 写回磁盘，产物已不存在的记录会被丢弃
    pub fn save(&self) -> BuildResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        records.retain(|target, _| target.exists());
        let text = serde_json::to_string_pretty(&*records).map_err(|e| crate::error::BuildError::Io {
            path: path.clone(),
            source: e.into(),
        })?;
        std::fs::write(path, text).with_path(path)
    }

    /// 计算指纹：源文件路径与内容 + 生成产物所用的命令
    pub fn fingerprint<P: AsRef<Path>>(sources: &[P], command: &[u8]) -> String {
        let mut hasher = blake3::Hasher::new();
        for source in sources {
            let source = source.as_ref();
            hasher.update(source.as_os_str().as_encoded_bytes());
            hasher.update(&[0]);
            // 读不到的源文件会让时间戳判断失败，这里不需要额外处理
            if let Ok(bytes) = std::fs::read(source) {
                hasher.update(&bytes);
            }
            hasher.update(&[0]);
        }
        hasher.update(command);
        hasher.finalize().to_hex().to_string()
    }

    /// 判断 `target` 是否需要重新生成
    ///
    /// 时间戳判断为过期时一定重新生成；时间戳判断为最新时，若缓存中有该产物的记录且指纹不同，
    /// 同样重新生成。没有记录时信任时间戳。
    pub fn needs_rebuild<P: AsRef<Path>>(&self, sources: &[P], target: &Path, fingerprint: &str) -> bool {
        if !is_up_to_date(sources, target) {
            return true;
        }
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        match records.get(target) {
            Some(record) if record.fingerprint != fingerprint => {
                log::info!("Inputs of {target:?} changed, rebuilding");
                true
            }
            _ => false,
        }
    }

    /// 记录产物成功生成时的指纹
    pub fn record(&self, target: &Path, fingerprint: String) {
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        records.insert(target.to_path_buf(), CacheRecord { fingerprint });
    }
}
