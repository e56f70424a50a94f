//! 着色器变体展开
//!
//! 一个源文件会按 [`VariantRuleTable`] 展开为多个 [`VariantSpec`]：
//!
//! 1. 按扩展名分类：`.vert` 只有顶点变体，`.frag` 只有片元变体，`.main` 两者都有
//! 2. 片元变体按文件名子串选择一种模式宏（如 `webgpu`、`clockwise`），都不命中时使用默认模式
//! 3. 在 fixed-color 列表中的源文件额外得到 `fixedcolor_frag` 变体
//! 4. 在 MSAA 列表中的源文件额外得到规则表中列出的五个派生变体
//!
//! 变体的后缀直接用作输出文件的扩展名与符号名的后缀，各族后缀互不相交，因此输出不会冲突。

use std::collections::HashSet;
use std::path::Path;

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

use crate::common::{ShaderSource, ShaderStage};
use crate::error::{BuildError, BuildResult};
use crate::header;

pub const VERTEX_SUFFIX: &str = "vert";
pub const FRAGMENT_SUFFIX: &str = "frag";
pub const FIXED_COLOR_SUFFIX: &str = "fixedcolor_frag";

/// 源文件的入口类型，由扩展名决定
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Vertex,
    Fragment,
    /// 同一个文件同时包含顶点与片元入口
    Dual,
}

impl SourceKind {
    pub const EXTENSIONS: [&'static str; 3] = ["vert", "frag", "main"];

    pub fn from_extension(extension: &str) -> Option<Self> {
        match extension {
            "vert" => Some(SourceKind::Vertex),
            "frag" => Some(SourceKind::Fragment),
            "main" => Some(SourceKind::Dual),
            _ => None,
        }
    }

    fn stages(self) -> &'static [ShaderStage] {
        match self {
            SourceKind::Vertex => &[ShaderStage::Vertex],
            SourceKind::Fragment => &[ShaderStage::Fragment],
            SourceKind::Dual => &[ShaderStage::Vertex, ShaderStage::Fragment],
        }
    }
}

/// 一个需要编译的变体
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantSpec {
    pub stage: ShaderStage,
    /// 有序、去重的预处理宏
    pub defines: IndexSet<String>,
    /// 变体的逻辑名，同时用作输出扩展名
    pub suffix: String,
}

impl VariantSpec {
    fn new<'a>(stage: ShaderStage, suffix: &str, defines: impl IntoIterator<Item = &'a String>) -> Self {
        Self {
            stage,
            defines: defines.into_iter().cloned().collect(),
            suffix: suffix.to_string(),
        }
    }

    /// 输出文件名（不含最终的 `.spirv` / `.h`）：`{stem}.{suffix}`
    pub fn output_stem(&self, source_stem: &str) -> String {
        format!("{source_stem}.{}", self.suffix)
    }

    /// 头文件中的符号名：`{stem}_{suffix}`，非法字符替换为 `_`
    pub fn symbol_name(&self, source_stem: &str) -> String {
        header::symbol_name_for(&format!("{source_stem}_{}", self.suffix))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageDefines {
    pub vertex: Vec<String>,
    pub fragment: Vec<String>,
}

impl StageDefines {
    fn for_stage(&self, stage: ShaderStage) -> &[String] {
        match stage {
            ShaderStage::Vertex => &self.vertex,
            ShaderStage::Fragment => &self.fragment,
        }
    }
}

/// 文件名包含 `contains` 时使用的片元模式
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FragmentMode {
    #[serde(default)]
    pub contains: String,
    pub defines: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixedColorRule {
    pub defines: Vec<String>,
    #[serde(default)]
    pub sources: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivedVariant {
    pub suffix: String,
    pub stage: ShaderStage,
    #[serde(default)]
    pub defines: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsaaRule {
    #[serde(default)]
    pub sources: Vec<String>,
    pub variants: Vec<DerivedVariant>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedOutput {
    pub name: String,
    #[serde(default)]
    pub defines: Vec<String>,
}

/// D3D 中替代默认片元输出的具名输出
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct D3dFragmentOverride {
    /// `shaders_dir/d3d` 中的文件名
    pub source: String,
    pub outputs: Vec<NamedOutput>,
}

/// 变体规则表，变体组合的唯一来源
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantRuleTable {
    pub stage_defines: StageDefines,
    #[serde(default)]
    pub fragment_modes: Vec<FragmentMode>,
    pub default_fragment_mode: FragmentMode,
    pub fixed_color: FixedColorRule,
    pub msaa: MsaaRule,
    #[serde(default)]
    pub d3d_fragment_overrides: Vec<D3dFragmentOverride>,
}

impl Default for VariantRuleTable {
    fn default() -> Self {
        // 内置规则表在测试中校验过，解析不会失败
        Self::from_toml_str(include_str!("../rules/default_rules.toml")).unwrap_or_else(|e| {
            unreachable!("built-in variant rule table is invalid: {e}");
        })
    }
}

impl VariantRuleTable {
    pub fn from_toml_str(text: &str) -> BuildResult<Self> {
        let table: Self = toml::from_str(text).map_err(|e| BuildError::InvalidRuleTable(e.to_string()))?;
        table.validate()?;
        Ok(table)
    }

    pub fn from_file(path: &Path) -> BuildResult<Self> {
        use crate::error::IoPathContext;
        let text = std::fs::read_to_string(path).with_path(path)?;
        Self::from_toml_str(&text)
    }

    /// 检查后缀是否可以用作文件扩展名，且各族后缀互不冲突
    pub fn validate(&self) -> BuildResult<()> {
        let valid_suffix = |s: &str| !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');

        let mut seen: HashSet<&str> = [VERTEX_SUFFIX, FRAGMENT_SUFFIX, FIXED_COLOR_SUFFIX].into_iter().collect();
        for variant in &self.msaa.variants {
            if !valid_suffix(variant.suffix.as_str()) {
                return Err(BuildError::InvalidRuleTable(format!(
                    "suffix `{}` is not a valid file extension",
                    variant.suffix
                )));
            }
            if !seen.insert(variant.suffix.as_str()) {
                return Err(BuildError::InvalidRuleTable(format!(
                    "msaa suffix `{}` collides with another variant",
                    variant.suffix
                )));
            }
        }

        let mut names = HashSet::new();
        for rule in &self.d3d_fragment_overrides {
            for output in &rule.outputs {
                if !valid_suffix(output.name.as_str()) || !names.insert(output.name.as_str()) {
                    return Err(BuildError::InvalidRuleTable(format!(
                        "d3d output name `{}` is invalid or duplicated",
                        output.name
                    )));
                }
            }
        }
        Ok(())
    }

    /// 按文件名选择片元模式
    pub fn fragment_mode(&self, file_name: &str) -> &FragmentMode {
        self.fragment_modes
            .iter()
            .find(|mode| !mode.contains.is_empty() && file_name.contains(&mode.contains))
            .unwrap_or(&self.default_fragment_mode)
    }

    pub fn is_fixed_color(&self, relative: &str) -> bool {
        self.fixed_color.sources.iter().any(|s| s == relative)
    }

    pub fn is_msaa(&self, relative: &str) -> bool {
        self.msaa.sources.iter().any(|s| s == relative)
    }

    pub fn d3d_fragment_override(&self, file_name: &str) -> Option<&D3dFragmentOverride> {
        self.d3d_fragment_overrides.iter().find(|rule| rule.source == file_name)
    }

    fn standard_variant(&self, stage: ShaderStage, file_name: &str) -> VariantSpec {
        let stage_defines = self.stage_defines.for_stage(stage);
        match stage {
            ShaderStage::Vertex => VariantSpec::new(stage, VERTEX_SUFFIX, stage_defines),
            ShaderStage::Fragment => {
                let mode = self.fragment_mode(file_name);
                VariantSpec::new(stage, FRAGMENT_SUFFIX, stage_defines.iter().chain(&mode.defines))
            }
        }
    }
}

/// 将一个源文件展开为需要编译的全部变体，顺序固定
///
/// 扩展名无法识别时返回空列表。
pub fn expand(source: &ShaderSource, rules: &VariantRuleTable) -> Vec<VariantSpec> {
    let Some(kind) = SourceKind::from_extension(&source.extension) else {
        return Vec::new();
    };
    let file_name = source.file_name();

    let mut variants: Vec<VariantSpec> = kind
        .stages()
        .iter()
        .map(|&stage| rules.standard_variant(stage, &file_name))
        .collect();

    if rules.is_fixed_color(&source.relative) {
        let stage = ShaderStage::Fragment;
        let mode = rules.fragment_mode(&file_name);
        let defines = rules
            .stage_defines
            .for_stage(stage)
            .iter()
            .chain(&mode.defines)
            .chain(&rules.fixed_color.defines);
        variants.push(VariantSpec::new(stage, FIXED_COLOR_SUFFIX, defines));
    }

    if rules.is_msaa(&source.relative) {
        for derived in &rules.msaa.variants {
            let defines = rules.stage_defines.for_stage(derived.stage).iter().chain(&derived.defines);
            variants.push(VariantSpec::new(derived.stage, &derived.suffix, defines));
        }
    }

    variants
}
