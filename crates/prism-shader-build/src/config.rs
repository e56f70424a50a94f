//! 构建配置
//!
//! 配置从 TOML 文件加载，所有字段都有默认值，命令行参数会再覆盖一次。
//!
//! ```toml
//! jobs = 8
//! timeout_secs = 120
//! rules_file = "variant_rules.toml"
//!
//! [spirv]
//! optimize = true
//!
//! [tools]
//! glslang = "/opt/vulkan/bin/glslangValidator"
//! ```

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::variant::VariantRuleTable;

/// shaders_dir 中默认查找的配置文件名
pub const DEFAULT_CONFIG_FILE: &str = "shader_build.toml";

/// 显式指定的工具路径，覆盖自动探测的结果
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolOverrides {
    pub fxc: Option<PathBuf>,
    pub xcrun: Option<PathBuf>,
    pub glslang: Option<PathBuf>,
    pub spirv_opt: Option<PathBuf>,
    pub spirv_to_header: Option<PathBuf>,
    pub python: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpirvConfig {
    /// 是否运行 spirv-opt；关闭时直接拷贝未优化的模块
    pub optimize: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetalConfig {
    /// 链接出的 metallib 名称（不含扩展名）
    pub library_name: String,
}

impl Default for MetalConfig {
    fn default() -> Self {
        Self {
            library_name: "rive_pls_macosx".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// 单个后端内并行编译的任务数，1 表示顺序执行
    pub jobs: usize,
    /// 单次外部调用的超时秒数，0 表示不限时
    pub timeout_secs: u64,
    /// 是否让各个后端并行运行
    pub parallel_backends: bool,
    /// 外部变体规则表，相对路径基于配置文件所在目录
    pub rules_file: Option<PathBuf>,
    pub spirv: SpirvConfig,
    pub metal: MetalConfig,
    pub tools: ToolOverrides,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            jobs: 1,
            timeout_secs: 300,
            parallel_backends: false,
            rules_file: None,
            spirv: SpirvConfig::default(),
            metal: MetalConfig::default(),
            tools: ToolOverrides::default(),
        }
    }
}

impl BuildConfig {
    /// 从 TOML 文件加载配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).with_context(|| format!("Failed to read config {path:?}"))?;

        let mut config: BuildConfig =
            toml::from_str(&content).with_context(|| format!("Failed to parse config {path:?}"))?;

        if let Some(dir) = path.parent() {
            config.rules_file = config.rules_file.take().map(|rules_file| dir.join(rules_file));
        }
        Ok(config)
    }

    /// 按优先级加载：显式指定的文件 > `shaders_dir/shader_build.toml` > 默认值
    pub fn resolve(explicit: Option<&Path>, shaders_dir: &Path) -> anyhow::Result<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }
        let fallback = shaders_dir.join(DEFAULT_CONFIG_FILE);
        if fallback.is_file() {
            log::info!("Using config {fallback:?}");
            return Self::from_file(fallback);
        }
        Ok(Self::default())
    }

    /// 加载变体规则表，未配置外部文件时使用内置规则
    pub fn variant_rules(&self) -> anyhow::Result<VariantRuleTable> {
        match &self.rules_file {
            Some(path) => VariantRuleTable::from_file(path)
                .with_context(|| format!("Failed to load variant rule table {path:?}")),
            None => Ok(VariantRuleTable::default()),
        }
    }

    pub fn timeout(&self) -> Option<std::time::Duration> {
        (self.timeout_secs > 0).then(|| std::time::Duration::from_secs(self.timeout_secs))
    }
}
