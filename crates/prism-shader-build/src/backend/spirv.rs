//! Vulkan (SPIR-V) 着色器编译器
//!
//! 每个源文件先经 [`variant::expand`] 展开为多个变体，每个变体依次：
//! 编译为未优化的 SPIR-V，优化或原样拷贝为最终模块，删除中间文件，再转换为头文件。

use std::ffi::OsString;

use crate::backend::{BackendCompiler, BuildContext, CompileJob, JobStep, execute_jobs};
use crate::common::{Backend, ShaderSource, ensure_dir, list_files};
use crate::error::BuildResult;
use crate::runner::Invocation;
use crate::toolchain::Tool;
use crate::variant::{self, SourceKind, VariantSpec};

/// SPIR-V 编译器
///
/// 使用 glslangValidator 编译 `.vert`、`.frag` 与同时包含两个入口的 `.main` 文件
#[derive(Debug, Default)]
pub struct SpirvCompiler;

impl SpirvCompiler {
    const TARGET_ENV: &'static str = "vulkan1.1";

    pub const fn new() -> Self {
        Self
    }

    fn plan_variant(
        &self,
        ctx: &BuildContext,
        glslang: &Tool,
        optimizer: Option<&Tool>,
        source: &ShaderSource,
        shader_variant: &VariantSpec,
    ) -> CompileJob {
        let out_dir = ctx.backend_out_dir(Backend::Vulkan);
        let output_stem = shader_variant.output_stem(&source.stem);
        let unoptimized = out_dir.join(format!("{output_stem}.unoptimized.spirv"));
        let binary = out_dir.join(format!("{output_stem}.spirv"));
        let header = ctx.out_dir.join(format!("{output_stem}.h"));
        let symbol = shader_variant.symbol_name(&source.stem);

        let mut include = OsString::from("-I");
        include.push(ctx.out_dir);

        let compile = Invocation::new(glslang)
            .args(["--target-env", Self::TARGET_ENV, "-S", shader_variant.stage.glslang_stage()])
            .args(shader_variant.defines.iter().map(|define| format!("-D{define}")))
            .arg(include)
            .args(["-g0", "-o"])
            .arg(&unoptimized)
            .arg(&source.path)
            .output(&unoptimized);

        let finalize = match optimizer {
            Some(spirv_opt) => JobStep::Run(
                Invocation::new(spirv_opt)
                    .arg("-O")
                    .arg(&unoptimized)
                    .arg("-o")
                    .arg(&binary)
                    .output(&binary),
            ),
            None => JobStep::Copy {
                from: unoptimized.clone(),
                to: binary.clone(),
            },
        };

        let to_header = match &ctx.toolchain.spirv_to_header {
            Some(tool) => JobStep::Run(
                Invocation::new(tool)
                    .arg(&binary)
                    .arg(&header)
                    .arg(&symbol)
                    .output(&header),
            ),
            None => JobStep::EmitHeader {
                binary: binary.clone(),
                header: header.clone(),
                symbol,
            },
        };

        CompileJob::new(&source.path, header)
            .run(compile)
            .step(finalize)
            .step(JobStep::Remove(unoptimized))
            .step(to_header)
    }
}

impl BackendCompiler for SpirvCompiler {
    fn backend(&self) -> Backend {
        Backend::Vulkan
    }

    fn build(&self, ctx: &BuildContext) -> BuildResult<()> {
        let Some(glslang) = ctx.require_tool(&ctx.toolchain.glslang, "glslangValidator", Backend::Vulkan)? else {
            return Ok(());
        };
        let optimizer = if ctx.config.spirv.optimize {
            match ctx.require_tool(&ctx.toolchain.spirv_opt, "spirv-opt", Backend::Vulkan)? {
                Some(tool) => Some(tool),
                None => return Ok(()),
            }
        } else {
            None
        };

        log::info!("Generating SPIR-V shaders from {:?} to {:?}", ctx.shaders_dir, ctx.out_dir);
        ensure_dir(&ctx.backend_out_dir(Backend::Vulkan))?;

        let mut jobs = Vec::new();
        for path in list_files(&ctx.backend_src_dir(Backend::Vulkan), &SourceKind::EXTENSIONS)? {
            let Some(source) = ShaderSource::new(ctx.shaders_dir, &path) else {
                continue;
            };
            for shader_variant in variant::expand(&source, ctx.rules) {
                jobs.push(self.plan_variant(ctx, glslang, optimizer, &source, &shader_variant));
            }
        }

        let total = jobs.len();
        let built = execute_jobs(ctx, jobs)?;
        log::info!("SPIR-V: {built} of {total} variants rebuilt");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ToolPolicy;
    use crate::backend::testing::Fixture;
    use crate::header::parse_byte_array_header;
    use crate::runner::testing::RecordingRunner;

    fn compiles(runner: &RecordingRunner) -> usize {
        runner.count("glslangValidator")
    }

    #[test]
    fn test_msaa_dual_source_compiles_seven_variants() {
        let fixture = Fixture::new();
        fixture.add_source("spirv/draw_msaa_path.main", "");
        let runner = RecordingRunner::default();

        SpirvCompiler::new().build(&fixture.ctx(&runner, ToolPolicy::Required)).unwrap();

        assert_eq!(compiles(&runner), 7);
        for suffix in [
            "vert",
            "frag",
            "noclipdistance_vert",
            "webgpu_vert",
            "webgpu_noclipdistance_vert",
            "webgpu_frag",
            "webgpu_fixedcolor_frag",
        ] {
            let header = fixture.out(&format!("draw_msaa_path.{suffix}.h"));
            let text = std::fs::read_to_string(&header).unwrap();
            assert!(text.starts_with(&format!("unsigned char draw_msaa_path_{suffix}[] = {{")));
            assert!(fixture.out(&format!("spirv/draw_msaa_path.{suffix}.spirv")).exists());
            assert!(!fixture.out(&format!("spirv/draw_msaa_path.{suffix}.unoptimized.spirv")).exists());
        }
    }

    #[test]
    fn test_compile_arguments() {
        let fixture = Fixture::new();
        let src = fixture.add_source("spirv/draw_clockwise_path.frag", "");
        let runner = RecordingRunner::default();

        SpirvCompiler::new().build(&fixture.ctx(&runner, ToolPolicy::Required)).unwrap();

        let calls = runner.calls();
        assert_eq!(calls.len(), 1);
        let args: Vec<_> = calls[0].args.iter().map(|a| a.to_string_lossy().into_owned()).collect();
        let include = format!("-I{}", fixture.out.path().display());
        let unoptimized = fixture.out("spirv/draw_clockwise_path.frag.unoptimized.spirv").display().to_string();
        let src = src.display().to_string();
        assert_eq!(
            args,
            [
                "--target-env",
                "vulkan1.1",
                "-S",
                "frag",
                "-DFRAGMENT",
                "-DPLS_IMPL_STORAGE_TEXTURE",
                include.as_str(),
                "-g0",
                "-o",
                unoptimized.as_str(),
                src.as_str(),
            ]
        );
    }

    #[test]
    fn test_copy_keeps_binary_unmodified() {
        let fixture = Fixture::new();
        fixture.add_source("spirv/blit.vert", "");
        let runner = RecordingRunner::default();

        SpirvCompiler::new().build(&fixture.ctx(&runner, ToolPolicy::Required)).unwrap();

        assert_eq!(runner.count("spirv-opt"), 0);
        let binary = std::fs::read(fixture.out("spirv/blit.vert.spirv")).unwrap();
        let text = std::fs::read_to_string(fixture.out("blit.vert.h")).unwrap();
        assert_eq!(parse_byte_array_header(&text), Some((binary.clone(), binary.len())));
    }

    #[test]
    fn test_header_symbol_is_sanitized() {
        let fixture = Fixture::new();
        fixture.add_source("spirv/draw-path.vert", "");
        let runner = RecordingRunner::default();

        SpirvCompiler::new().build(&fixture.ctx(&runner, ToolPolicy::Required)).unwrap();

        let text = std::fs::read_to_string(fixture.out("draw-path.vert.h")).unwrap();
        assert!(text.starts_with("unsigned char draw_path_vert[] = {"));
        assert!(text.contains("unsigned int draw_path_vert_len = "));
    }

    #[test]
    fn test_optimizer_toggle() {
        let mut fixture = Fixture::new();
        fixture.config.spirv.optimize = true;
        fixture.add_source("spirv/blit.vert", "");
        let runner = RecordingRunner::default();

        SpirvCompiler::new().build(&fixture.ctx(&runner, ToolPolicy::Required)).unwrap();

        assert_eq!(runner.count("spirv-opt"), 1);
        assert!(fixture.out("blit.vert.h").exists());
    }

    #[test]
    fn test_external_header_tool() {
        let mut fixture = Fixture::new();
        fixture.toolchain.spirv_to_header = Some(Tool::new("spirv_to_header"));
        fixture.add_source("spirv/blit.vert", "");
        let runner = RecordingRunner::default();

        SpirvCompiler::new().build(&fixture.ctx(&runner, ToolPolicy::Required)).unwrap();

        let calls = runner.calls_with_arg("blit_vert");
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].outputs, [fixture.out("blit.vert.h")]);
    }

    #[test]
    fn test_second_run_is_idempotent() {
        let fixture = Fixture::new();
        fixture.add_source("spirv/draw_msaa_path.main", "");
        fixture.add_source("spirv/draw_clockwise_path.main", "");
        let runner = RecordingRunner::default();
        let compiler = SpirvCompiler::new();

        compiler.build(&fixture.ctx(&runner, ToolPolicy::Required)).unwrap();
        let first = compiles(&runner);
        assert_eq!(first, 7 + 3);

        compiler.build(&fixture.ctx(&runner, ToolPolicy::Required)).unwrap();
        assert_eq!(compiles(&runner), first);
    }

    #[test]
    fn test_changed_rules_rebuild_affected_variants() {
        let mut fixture = Fixture::new();
        fixture.add_source("spirv/blit.vert", "");
        fixture.add_source("spirv/blit.frag", "");
        let runner = RecordingRunner::default();
        SpirvCompiler::new().build(&fixture.ctx(&runner, ToolPolicy::Required)).unwrap();
        assert_eq!(compiles(&runner), 2);

        fixture.rules.default_fragment_mode.defines = vec!["PLS_IMPL_NONE".to_string()];
        SpirvCompiler::new().build(&fixture.ctx(&runner, ToolPolicy::Required)).unwrap();

        assert_eq!(compiles(&runner), 3);
        assert_eq!(runner.calls_with_arg("-DPLS_IMPL_NONE").len(), 1);
    }
}
