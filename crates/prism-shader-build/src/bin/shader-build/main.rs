//! Shader 构建工具
//!
//! `shader-build <SHADERS_DIR> <OUT_DIR> [PLATFORM]`

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use prism_crate_tools::init_log::init_log;
use prism_shader_build::Pipeline;
use prism_shader_build::common::Platform;
use prism_shader_build::config::BuildConfig;
use prism_shader_build::toolchain::Toolchain;

#[derive(Parser, Debug)]
#[command(name = "shader-build", version, about = "Compile a shader tree into embeddable headers")]
struct Cli {
    /// 着色器源码目录
    shaders_dir: PathBuf,

    /// 输出目录
    out_dir: PathBuf,

    /// 目标平台：windows, macos, linuxbsd, android；缺省时尝试全部后端
    platform: Option<String>,

    /// 配置文件，缺省时使用 `<SHADERS_DIR>/shader_build.toml`
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// 每个后端内部并行编译的任务数
    #[arg(long, short = 'j')]
    jobs: Option<usize>,

    /// 单次编译器调用的超时秒数，0 表示不限制
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,

    /// 使用 spirv-opt 优化 SPIR-V
    #[arg(long)]
    optimize_spirv: bool,

    /// 各个后端并行运行
    #[arg(long)]
    parallel_backends: bool,

    /// 输出调试日志
    #[arg(long, short)]
    verbose: bool,
}

impl Cli {
    /// 命令行参数覆盖配置文件
    fn apply_overrides(&self, config: &mut BuildConfig) {
        if let Some(jobs) = self.jobs {
            config.jobs = jobs.max(1);
        }
        if let Some(timeout) = self.timeout {
            config.timeout_secs = timeout;
        }
        config.spirv.optimize |= self.optimize_spirv;
        config.parallel_backends |= self.parallel_backends;
    }

    fn platform(&self) -> Option<Platform> {
        let name = self.platform.as_deref()?;
        let platform = Platform::parse(name);
        if platform.is_none() {
            log::warn!("Unrecognized platform `{name}`, building every backend");
        }
        platform
    }
}

fn build(cli: &Cli) -> anyhow::Result<()> {
    let mut config = BuildConfig::resolve(cli.config.as_deref(), &cli.shaders_dir)?;
    cli.apply_overrides(&mut config);
    log::debug!("Build config: {config:#?}");

    let rules = config.variant_rules()?;
    let toolchain = Toolchain::discover().with_overrides(&config.tools);

    let pipeline = Pipeline::new(&cli.shaders_dir, &cli.out_dir, toolchain, config)
        .with_platform(cli.platform())
        .with_rules(rules);

    pipeline
        .run()
        .with_context(|| format!("Failed to build shaders from {:?}", pipeline.shaders_dir()))?;

    log::info!("Shaders written to {:?}", pipeline.out_dir());
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_log(if cli.verbose { log::LevelFilter::Debug } else { log::LevelFilter::Info });

    match build(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}
