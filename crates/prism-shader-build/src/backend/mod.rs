//! 各个图形后端的编译器适配
//!
//! 每个后端先规划出全部 [`CompileJob`]，再经过过期判断，最后执行仍需重新生成的任务。

pub mod d3d;
pub mod metal;
pub mod spirv;

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use rayon::prelude::*;

use crate::common::Backend;
use crate::config::BuildConfig;
use crate::error::{BuildError, BuildResult, IoPathContext};
use crate::header;
use crate::runner::{Invocation, ToolRunner};
use crate::staleness::BuildCache;
use crate::toolchain::{Tool, Toolchain};
use crate::variant::VariantRuleTable;

/// 工具链缺失时的处理策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolPolicy {
    /// 后端是目标平台明确需要的，缺失即失败
    Required,
    /// 后端只是顺带尝试，缺失时跳过并给出警告
    Optional,
}

/// 后端编译时共享的上下文
pub struct BuildContext<'a> {
    pub shaders_dir: &'a Path,
    pub out_dir: &'a Path,
    pub toolchain: &'a Toolchain,
    pub rules: &'a VariantRuleTable,
    pub config: &'a BuildConfig,
    pub runner: &'a dyn ToolRunner,
    pub cache: &'a BuildCache,
    pub policy: ToolPolicy,
}

impl BuildContext<'_> {
    /// 取出后端需要的工具；缺失时按策略返回错误或 None
    pub fn require_tool<'t>(
        &self,
        tool: &'t Option<Tool>,
        name: &'static str,
        backend: Backend,
    ) -> BuildResult<Option<&'t Tool>> {
        match (tool, self.policy) {
            (Some(tool), _) => Ok(Some(tool)),
            (None, ToolPolicy::Required) => Err(BuildError::ToolchainUnavailable {
                tool: name,
                required_by: format!("the {backend} backend"),
            }),
            (None, ToolPolicy::Optional) => {
                log::warn!("`{name}` not found, skipping the {backend} backend");
                Ok(None)
            }
        }
    }

    /// 后端在 `out_dir` 下的输出目录
    pub fn backend_out_dir(&self, backend: Backend) -> PathBuf {
        self.out_dir.join(backend.out_subdir())
    }

    pub fn backend_src_dir(&self, backend: Backend) -> PathBuf {
        self.shaders_dir.join(backend.src_subdir())
    }
}

/// 后端编译器
pub trait BackendCompiler: Send + Sync {
    fn backend(&self) -> Backend;

    /// 编译该后端的全部着色器，结果写入 `out_dir`
    fn build(&self, ctx: &BuildContext) -> BuildResult<()>;
}

/// 根据后端类型获取对应的编译器实例
pub fn get_compiler(backend: Backend) -> Box<dyn BackendCompiler> {
    match backend {
        Backend::D3d => Box::new(d3d::D3dCompiler::new()),
        Backend::Metal => Box::new(metal::MetalCompiler::new()),
        Backend::Vulkan => Box::new(spirv::SpirvCompiler::new()),
    }
}

/// 任务中的一个步骤
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStep {
    Run(Invocation),
    Copy { from: PathBuf, to: PathBuf },
    Remove(PathBuf),
    EmitHeader { binary: PathBuf, header: PathBuf, symbol: String },
}

impl JobStep {
    fn execute(&self, runner: &dyn ToolRunner) -> BuildResult<()> {
        match self {
            JobStep::Run(invocation) => runner.run(invocation),
            JobStep::Copy { from, to } => std::fs::copy(from, to).map(|_| ()).with_path(from),
            JobStep::Remove(path) => std::fs::remove_file(path).with_path(path),
            JobStep::EmitHeader { binary, header, symbol } => header::write_byte_array_header(binary, header, symbol),
        }
    }

    fn fingerprint_input(&self) -> Vec<u8> {
        match self {
            JobStep::Run(invocation) => invocation.fingerprint_input(),
            other => format!("{other:?}").into_bytes(),
        }
    }
}

/// 生成一个产物的任务
#[derive(Debug, Clone)]
pub struct CompileJob {
    pub sources: Vec<PathBuf>,
    /// 用于过期判断的最终产物
    pub target: PathBuf,
    pub steps: Vec<JobStep>,
}

impl CompileJob {
    pub fn new(source: impl Into<PathBuf>, target: impl Into<PathBuf>) -> Self {
        Self {
            sources: vec![source.into()],
            target: target.into(),
            steps: Vec::new(),
        }
    }

    pub fn step(mut self, step: JobStep) -> Self {
        self.steps.push(step);
        self
    }

    pub fn run(self, invocation: Invocation) -> Self {
        self.step(JobStep::Run(invocation))
    }

    fn primary_source(&self) -> PathBuf {
        self.sources.first().cloned().unwrap_or_default()
    }

    fn fingerprint(&self) -> String {
        let mut command = Vec::new();
        for step in &self.steps {
            command.extend(step.fingerprint_input());
            command.push(b'\n');
        }
        BuildCache::fingerprint(&self.sources, &command)
    }

    fn execute(&self, runner: &dyn ToolRunner) -> BuildResult<()> {
        self.steps.iter().try_for_each(|step| step.execute(runner))
    }
}

/// 每个产物只能由一个任务写出
fn check_distinct_targets(jobs: &[CompileJob]) -> BuildResult<()> {
    let mut owners: HashMap<&Path, &CompileJob> = HashMap::with_capacity(jobs.len());
    for job in jobs {
        if let Some(first) = owners.insert(&job.target, job) {
            return Err(BuildError::DuplicateOutput {
                path: job.target.clone(),
                first: first.primary_source(),
                second: job.primary_source(),
            });
        }
    }
    Ok(())
}

/// 过滤掉最新的任务，执行其余任务，返回实际执行的任务数
///
/// 执行前拒绝写出同一产物的任务。`jobs > 1` 时在 rayon 线程池中并行执行，所有任务都会跑完，
/// 返回按规划顺序的第一个错误；顺序执行时遇到错误立即停止。已生成的其他产物保留在磁盘上。
pub fn execute_jobs(ctx: &BuildContext, jobs: Vec<CompileJob>) -> BuildResult<usize> {
    check_distinct_targets(&jobs)?;

    let stale: Vec<(CompileJob, String)> = jobs
        .into_iter()
        .filter_map(|job| {
            let fingerprint = job.fingerprint();
            if ctx.cache.needs_rebuild(&job.sources, &job.target, &fingerprint) {
                Some((job, fingerprint))
            } else {
                log::debug!("Up to date: {:?}", job.target);
                None
            }
        })
        .collect();

    let run_one = |(job, fingerprint): &(CompileJob, String)| -> BuildResult<()> {
        log::info!("Building {:?}", job.target);
        job.execute(ctx.runner)?;
        ctx.cache.record(&job.target, fingerprint.clone());
        Ok(())
    };

    if ctx.config.jobs > 1 && stale.len() > 1 {
        match rayon::ThreadPoolBuilder::new().num_threads(ctx.config.jobs).build() {
            Ok(pool) => {
                let results: Vec<BuildResult<()>> = pool.install(|| stale.par_iter().map(run_one).collect());
                results.into_iter().collect::<BuildResult<()>>()?;
            }
            Err(e) => {
                log::warn!("Failed to create thread pool, compiling sequentially: {e}");
                stale.iter().try_for_each(run_one)?;
            }
        }
    } else {
        stale.iter().try_for_each(run_one)?;
    }
    Ok(stale.len())
}
