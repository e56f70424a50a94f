//! 外部工具链的定位
//!
//! 工具链在启动时解析一次，之后作为显式配置注入各个后端，便于在测试中替换为假的工具。

use std::path::{Path, PathBuf};

use crate::config::ToolOverrides;

/// 一个可执行的外部工具
///
/// `prefix_args` 用于 `xcrun -sdk macosx metal` 这类经由驱动程序调用的工具。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tool {
    pub program: PathBuf,
    pub prefix_args: Vec<String>,
}

impl Tool {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            prefix_args: Vec::new(),
        }
    }

    pub fn with_prefix<I, S>(program: impl Into<PathBuf>, prefix_args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            prefix_args: prefix_args.into_iter().map(Into::into).collect(),
        }
    }
}

/// fxc 不在 PATH 中时依次查找的 Windows SDK 目录，新版本在前
const FXC_INSTALL_DIRS: &[&str] = &[
    r"C:\Program Files (x86)\Windows Kits\10\bin\10.0.22621.0\x64",
    r"C:\Program Files (x86)\Windows Kits\10\bin\10.0.22000.0\x64",
    r"C:\Program Files (x86)\Windows Kits\10\bin\10.0.20348.0\x64",
    r"C:\Program Files (x86)\Windows Kits\10\bin\10.0.19041.0\x64",
    r"C:\Program Files (x86)\Windows Kits\10\bin\x64",
];

/// 在给定目录中查找可执行文件，找不到时返回 None
pub fn locate_in<I, P>(name: &str, dirs: I) -> Option<PathBuf>
where
    I: IntoIterator<Item = P>,
    P: AsRef<Path>,
{
    for dir in dirs {
        let dir = dir.as_ref();
        let candidate = dir.join(name);
        if candidate.is_file() {
            return Some(candidate);
        }
        if cfg!(windows) {
            let candidate = dir.join(format!("{name}.exe"));
            if candidate.is_file() {
                return Some(candidate);
            }
        }
    }
    None
}

/// 在 PATH 中查找可执行文件
pub fn locate(name: &str) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    locate_in(name, std::env::split_paths(&path))
}

/// 查找 D3D 编译器：先查 PATH，再查固定的 SDK 安装目录
pub fn locate_fxc() -> Option<PathBuf> {
    locate("fxc").or_else(|| locate_in("fxc", FXC_INSTALL_DIRS))
}

/// 解析后的工具链，缺失的工具为 None
#[derive(Debug, Clone, Default)]
pub struct Toolchain {
    /// D3D 字节码编译器
    pub fxc: Option<Tool>,
    /// Metal 编译器 (`xcrun -sdk macosx metal`)
    pub metal: Option<Tool>,
    /// Metal 链接器 (`xcrun -sdk macosx metallib`)
    pub metallib: Option<Tool>,
    /// SPIR-V 编译器
    pub glslang: Option<Tool>,
    /// SPIR-V 优化器，仅在开启优化时需要
    pub spirv_opt: Option<Tool>,
    /// 外部的 SPIR-V 转头文件工具；为 None 时使用内置实现
    pub spirv_to_header: Option<Tool>,
    /// 用于执行 minify 与代码生成脚本
    pub python: Option<Tool>,
}

impl Toolchain {
    /// 探测当前系统中的工具链
    pub fn discover() -> Self {
        let xcrun = locate("xcrun");
        let toolchain = Self {
            fxc: locate_fxc().map(Tool::new),
            metal: xcrun.clone().map(|p| Tool::with_prefix(p, ["-sdk", "macosx", "metal"])),
            metallib: xcrun.map(|p| Tool::with_prefix(p, ["-sdk", "macosx", "metallib"])),
            glslang: locate("glslangValidator").map(Tool::new),
            spirv_opt: locate("spirv-opt").map(Tool::new),
            spirv_to_header: None,
            python: locate("python3").or_else(|| locate("python")).map(Tool::new),
        };
        log::debug!("Discovered toolchain: {toolchain:#?}");
        toolchain
    }

    /// 用配置中显式给出的路径覆盖探测结果
    pub fn with_overrides(mut self, overrides: &ToolOverrides) -> Self {
        let apply = |slot: &mut Option<Tool>, path: &Option<PathBuf>| {
            if let Some(path) = path {
                *slot = Some(Tool::new(path));
            }
        };
        apply(&mut self.fxc, &overrides.fxc);
        apply(&mut self.glslang, &overrides.glslang);
        apply(&mut self.spirv_opt, &overrides.spirv_opt);
        apply(&mut self.spirv_to_header, &overrides.spirv_to_header);
        apply(&mut self.python, &overrides.python);
        if let Some(xcrun) = &overrides.xcrun {
            self.metal = Some(Tool::with_prefix(xcrun, ["-sdk", "macosx", "metal"]));
            self.metallib = Some(Tool::with_prefix(xcrun, ["-sdk", "macosx", "metallib"]));
        }
        self
    }
}
