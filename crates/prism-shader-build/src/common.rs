//! 着色器编译的共享类型和工具

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{BuildResult, IoPathContext};

/// Shader 的执行阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShaderStage {
    Vertex,
    /// HLSL Pixel shader
    Fragment,
}

impl ShaderStage {
    /// glslangValidator `-S` 参数使用的阶段名
    pub fn glslang_stage(self) -> &'static str {
        match self {
            ShaderStage::Vertex => "vert",
            ShaderStage::Fragment => "frag",
        }
    }
}

/// 图形后端
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    D3d,
    Metal,
    Vulkan,
}

impl Backend {
    /// 默认的执行顺序
    pub const ALL: [Backend; 3] = [Backend::D3d, Backend::Metal, Backend::Vulkan];

    /// 后端在 `out_dir` 下的子目录
    pub fn out_subdir(self) -> &'static str {
        match self {
            Backend::D3d => "d3d",
            Backend::Metal => "macosx",
            Backend::Vulkan => "spirv",
        }
    }

    /// 后端源码在 `shaders_dir` 下的子目录
    pub fn src_subdir(self) -> &'static str {
        match self {
            Backend::D3d => "d3d",
            Backend::Metal => "metal",
            Backend::Vulkan => "spirv",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Backend::D3d => "d3d",
            Backend::Metal => "metal",
            Backend::Vulkan => "vulkan",
        };
        f.write_str(name)
    }
}

/// 目标平台
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Windows,
    Macos,
    LinuxBsd,
    Android,
}

impl Platform {
    /// 解析平台名，无法识别时返回 None
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "windows" => Some(Platform::Windows),
            "macos" => Some(Platform::Macos),
            "linuxbsd" => Some(Platform::LinuxBsd),
            "android" => Some(Platform::Android),
            _ => None,
        }
    }

    /// 该平台需要运行的后端，按固定顺序排列
    pub fn backends(self) -> &'static [Backend] {
        match self {
            Platform::Windows => &[Backend::D3d, Backend::Vulkan],
            Platform::Macos => &[Backend::Metal],
            Platform::LinuxBsd | Platform::Android => &[Backend::Vulkan],
        }
    }
}

/// 一个着色器源文件
#[derive(Debug, Clone)]
pub struct ShaderSource {
    pub path: PathBuf,
    /// 不带扩展名的文件名，如 `draw_path.main` 的 `draw_path`
    pub stem: String,
    /// 扩展名，不含 `.`
    pub extension: String,
    /// 相对 `shaders_dir` 的路径，使用 `/` 分隔，用于匹配规则表
    pub relative: String,
}

impl ShaderSource {
    pub fn new(shaders_dir: &Path, path: &Path) -> Option<Self> {
        let stem = path.file_stem()?.to_str()?.to_string();
        let extension = path.extension()?.to_str()?.to_string();
        let relative = path
            .strip_prefix(shaders_dir)
            .unwrap_or(path)
            .to_str()?
            .replace('\\', "/");

        Some(Self {
            path: path.to_path_buf(),
            stem,
            extension,
            relative,
        })
    }

    pub fn file_name(&self) -> String {
        format!("{}.{}", self.stem, self.extension)
    }
}

/// 列出 `dir` 中（不递归）扩展名属于 `extensions` 的文件，按文件名排序
///
/// 目录不存在时返回空列表。
pub fn list_files(dir: &Path, extensions: &[&str]) -> BuildResult<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    for entry in walkdir::WalkDir::new(dir).min_depth(1).max_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(dir).to_path_buf();
            crate::error::BuildError::Io {
                path,
                source: e.into(),
            }
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let matched = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| extensions.contains(&ext));
        if matched {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

/// 确保目录存在
pub fn ensure_dir(dir: &Path) -> BuildResult<()> {
    std::fs::create_dir_all(dir).with_path(dir)
}
