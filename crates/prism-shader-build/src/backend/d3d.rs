//! D3D 着色器编译器
//!
//! 使用 fxc 将 `shaders_dir/d3d/*.hlsl` 编译为字节码头文件：每个源文件生成一个顶点阶段
//! 与一个像素阶段的头文件，规则表中列出的源文件用具名输出替代默认的片元输出。
//! 可选的 `root.sig` 编译为根签名头文件。

use std::path::Path;

use crate::backend::{BackendCompiler, BuildContext, CompileJob, execute_jobs};
use crate::common::{Backend, ShaderStage, ensure_dir, list_files};
use crate::error::BuildResult;
use crate::runner::Invocation;
use crate::toolchain::Tool;

/// D3D 编译器
#[derive(Debug, Default)]
pub struct D3dCompiler;

impl D3dCompiler {
    const VERTEX_PROFILE: &'static str = "vs_5_0";
    const PIXEL_PROFILE: &'static str = "ps_5_0";
    const ROOT_SIG_PROFILE: &'static str = "rootsig_1_1";
    const ROOT_SIG_ENTRY: &'static str = "ROOT_SIG";
    const ROOT_SIG_FILE: &'static str = "root.sig";

    pub const fn new() -> Self {
        Self
    }

    fn stage_args(stage: ShaderStage) -> (&'static str, &'static str) {
        match stage {
            ShaderStage::Vertex => ("VERTEX", Self::VERTEX_PROFILE),
            ShaderStage::Fragment => ("FRAGMENT", Self::PIXEL_PROFILE),
        }
    }

    /// `fxc /D <stage> [/D <extra>...] /I <out_dir> /Zi /T <profile> /Fh <output> <source>`
    fn stage_invocation(
        fxc: &Tool,
        ctx: &BuildContext,
        stage: ShaderStage,
        extra_defines: &[String],
        source: &Path,
        output: &Path,
    ) -> Invocation {
        let (stage_define, profile) = Self::stage_args(stage);
        let mut invocation = Invocation::new(fxc).args(["/D", stage_define]);
        for define in extra_defines {
            invocation = invocation.arg("/D").arg(define);
        }
        invocation
            .arg("/I")
            .arg(ctx.out_dir)
            .args(["/Zi", "/T", profile, "/Fh"])
            .arg(output)
            .arg(source)
            .output(output)
    }

    fn plan(&self, fxc: &Tool, ctx: &BuildContext) -> BuildResult<Vec<CompileJob>> {
        let src_dir = ctx.backend_src_dir(Backend::D3d);
        let out_dir = ctx.backend_out_dir(Backend::D3d);
        let mut jobs = Vec::new();

        for hlsl in list_files(&src_dir, &["hlsl"])? {
            let (Some(stem), Some(file_name)) = (
                hlsl.file_stem().and_then(|s| s.to_str()),
                hlsl.file_name().and_then(|s| s.to_str()),
            ) else {
                continue;
            };

            let vert_out = out_dir.join(format!("{stem}.vert.h"));
            let vert = Self::stage_invocation(fxc, ctx, ShaderStage::Vertex, &[], &hlsl, &vert_out);
            jobs.push(CompileJob::new(&hlsl, &vert_out).run(vert));

            match ctx.rules.d3d_fragment_override(file_name) {
                Some(rule) => {
                    for output in &rule.outputs {
                        let frag_out = out_dir.join(format!("{}.frag.h", output.name));
                        let frag =
                            Self::stage_invocation(fxc, ctx, ShaderStage::Fragment, &output.defines, &hlsl, &frag_out);
                        jobs.push(CompileJob::new(&hlsl, &frag_out).run(frag));
                    }
                }
                None => {
                    let frag_out = out_dir.join(format!("{stem}.frag.h"));
                    let frag = Self::stage_invocation(fxc, ctx, ShaderStage::Fragment, &[], &hlsl, &frag_out);
                    jobs.push(CompileJob::new(&hlsl, &frag_out).run(frag));
                }
            }
        }

        let root_sig = src_dir.join(Self::ROOT_SIG_FILE);
        if root_sig.is_file() {
            let root_sig_out = out_dir.join(format!("{}.h", Self::ROOT_SIG_FILE));
            let invocation = Invocation::new(fxc)
                .arg("/I")
                .arg(ctx.out_dir)
                .args(["/T", Self::ROOT_SIG_PROFILE, "/E", Self::ROOT_SIG_ENTRY, "/Fh"])
                .arg(&root_sig_out)
                .arg(&root_sig)
                .output(&root_sig_out);
            jobs.push(CompileJob::new(&root_sig, &root_sig_out).run(invocation));
        } else {
            log::debug!("No root signature at {root_sig:?}");
        }

        Ok(jobs)
    }
}

impl BackendCompiler for D3dCompiler {
    fn backend(&self) -> Backend {
        Backend::D3d
    }

    fn build(&self, ctx: &BuildContext) -> BuildResult<()> {
        let Some(fxc) = ctx.require_tool(&ctx.toolchain.fxc, "fxc", Backend::D3d)? else {
            return Ok(());
        };

        log::info!("Generating D3D shaders from {:?} to {:?}", ctx.shaders_dir, ctx.out_dir);
        ensure_dir(&ctx.backend_out_dir(Backend::D3d))?;

        let jobs = self.plan(fxc, ctx)?;
        let total = jobs.len();
        let built = execute_jobs(ctx, jobs)?;
        log::info!("D3D: {built} of {total} outputs rebuilt");
        Ok(())
    }
}
