//! Metal 着色器编译器
//!
//! 1. 若存在代码生成脚本，先生成 `draw_combinations.metal`
//! 2. 逐个将 `shaders_dir/metal/*.metal` 编译为 `.air`，跳过已是最新的文件
//! 3. 将所有 `.air` 链接为一个 metallib。链接总是执行，任何一个 `.air` 变化都会影响结果
//! 4. 把 metallib 序列化为字节数组头文件

use std::path::{Path, PathBuf};

use crate::backend::{BackendCompiler, BuildContext, CompileJob, execute_jobs};
use crate::common::{Backend, ensure_dir, list_files};
use crate::error::BuildResult;
use crate::header;
use crate::runner::Invocation;
use crate::toolchain::Tool;

/// Metal 编译器
#[derive(Debug, Default)]
pub struct MetalCompiler;

impl MetalCompiler {
    const LANGUAGE_STD: &'static str = "-std=macos-metal2.3";
    const MIN_OS_VERSION: &'static str = "-mmacosx-version-min=10.15";
    const GENERATOR_SCRIPT: &'static str = "generate_draw_combinations.py";
    const GENERATED_SOURCE: &'static str = "draw_combinations.metal";

    pub const fn new() -> Self {
        Self
    }

    /// 运行代码生成脚本，脚本不存在时跳过
    ///
    /// 返回 false 表示缺少 python 且策略允许跳过，此时整个后端跳过。
    fn generate_combinations(&self, ctx: &BuildContext) -> BuildResult<bool> {
        let script = ctx.backend_src_dir(Backend::Metal).join(Self::GENERATOR_SCRIPT);
        if !script.is_file() {
            log::debug!("No metal generator at {script:?}");
            return Ok(true);
        }
        let Some(python) = ctx.require_tool(&ctx.toolchain.python, "python", Backend::Metal)? else {
            return Ok(false);
        };

        let generated = ctx.out_dir.join(Self::GENERATED_SOURCE);
        let invocation = Invocation::new(python).arg(&script).arg(&generated).output(&generated);
        ctx.runner.run(&invocation)?;
        Ok(true)
    }

    fn compile_invocation(metal: &Tool, ctx: &BuildContext, source: &Path, air: &Path) -> Invocation {
        Invocation::new(metal)
            .args([Self::LANGUAGE_STD, Self::MIN_OS_VERSION, "-I"])
            .arg(ctx.out_dir)
            .args(["-ffast-math", "-fpreserve-invariance", "-fvisibility=hidden", "-c"])
            .arg(source)
            .arg("-o")
            .arg(air)
            .output(air)
    }

    fn library_paths(ctx: &BuildContext) -> (PathBuf, PathBuf, String) {
        let file_name = format!("{}.metallib", ctx.config.metal.library_name);
        let library = ctx.backend_out_dir(Backend::Metal).join(&file_name);
        let header_path = ctx.out_dir.join(format!("{file_name}.h"));
        (library, header_path, header::symbol_name_for(&file_name))
    }
}

impl BackendCompiler for MetalCompiler {
    fn backend(&self) -> Backend {
        Backend::Metal
    }

    fn build(&self, ctx: &BuildContext) -> BuildResult<()> {
        let Some(metal) = ctx.require_tool(&ctx.toolchain.metal, "metal", Backend::Metal)? else {
            return Ok(());
        };
        let Some(metallib) = ctx.require_tool(&ctx.toolchain.metallib, "metallib", Backend::Metal)? else {
            return Ok(());
        };

        log::info!("Generating Metal shaders from {:?} to {:?}", ctx.shaders_dir, ctx.out_dir);
        let out_dir = ctx.backend_out_dir(Backend::Metal);
        ensure_dir(&out_dir)?;

        if !self.generate_combinations(ctx)? {
            return Ok(());
        }

        let sources = list_files(&ctx.backend_src_dir(Backend::Metal), &["metal"])?;
        if sources.is_empty() {
            log::info!("Metal: no sources, nothing to link");
            return Ok(());
        }

        let mut airs = Vec::with_capacity(sources.len());
        let mut jobs = Vec::with_capacity(sources.len());
        for source in &sources {
            let Some(stem) = source.file_stem() else {
                continue;
            };
            let air = out_dir.join(format!("{}.air", stem.to_string_lossy()));
            jobs.push(CompileJob::new(source, &air).run(Self::compile_invocation(metal, ctx, source, &air)));
            airs.push(air);
        }
        let built = execute_jobs(ctx, jobs)?;
        log::info!("Metal: {built} of {} objects recompiled", airs.len());

        let (library, header_path, symbol) = Self::library_paths(ctx);
        let link = Invocation::new(metallib).args(&airs).arg("-o").arg(&library).output(&library);
        ctx.runner.run(&link)?;

        header::write_byte_array_header(&library, &header_path, &symbol)
    }
}
