//! 构建流程
//!
//! 1. 创建输出目录
//! 2. 运行 `minify.py` 预处理，之后才开始任何后端
//! 3. 按 D3D、Metal、Vulkan 的顺序运行目标平台需要的后端
//! 4. 无论成功与否都保存指纹缓存

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::backend::{BuildContext, ToolPolicy, get_compiler};
use crate::common::{Backend, Platform, ensure_dir, list_files};
use crate::config::BuildConfig;
use crate::error::{BuildError, BuildResult};
use crate::runner::{Invocation, ProcessRunner, ToolRunner};
use crate::staleness::BuildCache;
use crate::toolchain::Toolchain;
use crate::variant::VariantRuleTable;

/// 预处理脚本，位于 `shaders_dir` 下
pub const MINIFY_SCRIPT: &str = "minify.py";

/// 交给预处理脚本的源文件扩展名
const MINIFY_EXTENSIONS: [&str; 3] = ["glsl", "vert", "frag"];

/// 一次完整的着色器构建
pub struct Pipeline {
    shaders_dir: PathBuf,
    out_dir: PathBuf,
    platform: Option<Platform>,
    toolchain: Toolchain,
    rules: VariantRuleTable,
    config: BuildConfig,
    runner: Arc<dyn ToolRunner>,
}

impl Pipeline {
    /// 使用内置变体规则与子进程 runner 创建构建流程
    pub fn new(
        shaders_dir: impl Into<PathBuf>,
        out_dir: impl Into<PathBuf>,
        toolchain: Toolchain,
        config: BuildConfig,
    ) -> Self {
        let runner = Arc::new(ProcessRunner::new(config.timeout()));
        Self {
            shaders_dir: shaders_dir.into(),
            out_dir: out_dir.into(),
            platform: None,
            toolchain,
            rules: VariantRuleTable::default(),
            config,
            runner,
        }
    }

    /// 指定目标平台；None 表示尝试全部后端
    pub fn with_platform(mut self, platform: Option<Platform>) -> Self {
        self.platform = platform;
        self
    }

    pub fn with_rules(mut self, rules: VariantRuleTable) -> Self {
        self.rules = rules;
        self
    }

    pub fn with_runner(mut self, runner: Arc<dyn ToolRunner>) -> Self {
        self.runner = runner;
        self
    }

    pub fn shaders_dir(&self) -> &Path {
        &self.shaders_dir
    }

    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }

    /// 本次需要运行的后端，顺序固定
    pub fn backends(&self) -> &'static [Backend] {
        match self.platform {
            Some(platform) => platform.backends(),
            None => &Backend::ALL,
        }
    }

    /// 明确指定平台时工具链缺失即失败，否则跳过该后端
    fn tool_policy(&self) -> ToolPolicy {
        match self.platform {
            Some(_) => ToolPolicy::Required,
            None => ToolPolicy::Optional,
        }
    }

    /// 执行完整的构建流程，遇到第一个错误即停止
    pub fn run(&self) -> BuildResult<()> {
        log::info!(
            "Building shaders from {:?} to {:?}, backends: {:?}",
            self.shaders_dir,
            self.out_dir,
            self.backends()
        );
        ensure_dir(&self.out_dir)?;
        self.minify()?;

        let cache = BuildCache::load(&self.out_dir);
        let result = self.run_backends(&cache);
        let saved = cache.save();

        match (result, saved) {
            (Err(e), Err(save_err)) => {
                log::warn!("Failed to save build cache: {save_err}");
                Err(e)
            }
            (result, saved) => result.and(saved),
        }
    }

    /// `python shaders_dir/minify.py -o out_dir <*.glsl *.vert *.frag>`
    fn minify(&self) -> BuildResult<()> {
        let script = self.shaders_dir.join(MINIFY_SCRIPT);
        if !script.is_file() {
            return Err(BuildError::MissingExpectedInput { path: script });
        }
        let python = self.toolchain.python.as_ref().ok_or_else(|| BuildError::ToolchainUnavailable {
            tool: "python",
            required_by: "the minify step".to_string(),
        })?;

        let inputs = list_files(&self.shaders_dir, &MINIFY_EXTENSIONS)?;
        log::info!("Minifying {} shaders", inputs.len());
        let invocation = Invocation::new(python).arg(&script).arg("-o").arg(&self.out_dir).args(&inputs);
        self.runner.run(&invocation)
    }

    fn run_backends(&self, cache: &BuildCache) -> BuildResult<()> {
        let ctx = BuildContext {
            shaders_dir: &self.shaders_dir,
            out_dir: &self.out_dir,
            toolchain: &self.toolchain,
            rules: &self.rules,
            config: &self.config,
            runner: self.runner.as_ref(),
            cache,
            policy: self.tool_policy(),
        };

        let backends = self.backends();
        if self.config.parallel_backends && backends.len() > 1 {
            return run_backends_parallel(&ctx, backends);
        }
        backends.iter().try_for_each(|&backend| get_compiler(backend).build(&ctx))
    }
}

/// 每个后端一个线程，结果经 channel 汇总；全部结束后按后端顺序返回第一个错误
fn run_backends_parallel(ctx: &BuildContext, backends: &[Backend]) -> BuildResult<()> {
    let (sender, receiver) = crossbeam_channel::unbounded();

    std::thread::scope(|scope| {
        for (index, &backend) in backends.iter().enumerate() {
            let sender = sender.clone();
            scope.spawn(move || {
                let result = get_compiler(backend).build(ctx);
                if let Err(e) = &result {
                    log::error!("{backend} backend failed: {e}");
                }
                // 接收端在所有线程结束前不会被释放
                let _ = sender.send((index, result));
            });
        }
    });
    drop(sender);

    let mut results: Vec<(usize, BuildResult<()>)> = receiver.iter().collect();
    results.sort_by_key(|(index, _)| *index);
    results.into_iter().try_for_each(|(_, result)| result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::testing::{backdate, fake_toolchain};
    use crate::runner::testing::RecordingRunner;

    struct Tree {
        shaders: tempfile::TempDir,
        out: tempfile::TempDir,
    }

    impl Tree {
        /// 含有三个后端源文件与预处理脚本的着色器目录
        fn new() -> Self {
            let tree = Self {
                shaders: tempfile::tempdir().unwrap(),
                out: tempfile::tempdir().unwrap(),
            };
            tree.add(MINIFY_SCRIPT);
            tree.add("common.glsl");
            tree.add("d3d/foo.hlsl");
            tree.add("metal/backend.metal");
            tree.add("spirv/blit.vert");
            tree.add("spirv/draw_msaa_path.main");
            tree
        }

        fn add(&self, relative: &str) -> PathBuf {
            let path = self.shaders.path().join(relative);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(&path, relative).unwrap();
            backdate(&path);
            path
        }

        fn out(&self, relative: &str) -> PathBuf {
            self.out.path().join(relative)
        }

        fn pipeline(&self, platform: Option<Platform>, runner: &Arc<RecordingRunner>) -> Pipeline {
            self.pipeline_with(platform, fake_toolchain(), BuildConfig::default(), runner)
        }

        fn pipeline_with(
            &self,
            platform: Option<Platform>,
            toolchain: Toolchain,
            config: BuildConfig,
            runner: &Arc<RecordingRunner>,
        ) -> Pipeline {
            Pipeline::new(self.shaders.path(), self.out.path(), toolchain, config)
                .with_platform(platform)
                .with_runner(runner.clone())
        }
    }

    fn compiles(runner: &RecordingRunner) -> usize {
        runner.count("fxc") + runner.count("glslangValidator") + runner.calls_with_arg("metal").len()
    }

    #[test]
    fn test_macos_runs_only_metal() {
        let tree = Tree::new();
        let runner = Arc::new(RecordingRunner::default());

        tree.pipeline(Platform::parse("macos"), &runner).run().unwrap();

        assert_eq!(runner.count("fxc"), 0);
        assert_eq!(runner.count("glslangValidator"), 0);
        assert_eq!(runner.calls_with_arg("metal").len(), 1);
        assert_eq!(runner.calls_with_arg("metallib").len(), 1);
        assert!(tree.out("rive_pls_macosx.metallib.h").exists());
        assert!(!tree.out("d3d").exists());
        assert!(!tree.out("spirv").exists());
    }

    #[test]
    fn test_minify_runs_first_with_sorted_inputs() {
        let tree = Tree::new();
        tree.add("advanced_blend.glsl");
        tree.add("blit.frag");
        let runner = Arc::new(RecordingRunner::default());

        tree.pipeline(Platform::parse("linuxbsd"), &runner).run().unwrap();

        let calls = runner.calls();
        let minify = &calls[0];
        assert_eq!(minify.program, PathBuf::from("python3"));
        let args: Vec<PathBuf> = minify.args.iter().map(PathBuf::from).collect();
        assert_eq!(
            args,
            [
                tree.shaders.path().join(MINIFY_SCRIPT),
                PathBuf::from("-o"),
                tree.out.path().to_path_buf(),
                tree.shaders.path().join("advanced_blend.glsl"),
                tree.shaders.path().join("blit.frag"),
                tree.shaders.path().join("common.glsl"),
            ]
        );
        assert!(calls[1..].iter().all(|call| call.program.ends_with("glslangValidator")));
    }

    #[test]
    fn test_second_run_issues_no_compiles() {
        let tree = Tree::new();
        let runner = Arc::new(RecordingRunner::default());

        tree.pipeline(None, &runner).run().unwrap();
        let first = compiles(&runner);
        // d3d 2 + metal 1 + spirv (1 + 7)
        assert_eq!(first, 11);
        assert!(tree.out(BuildCache::FILE_NAME).exists());

        tree.pipeline(None, &runner).run().unwrap();
        assert_eq!(compiles(&runner), first);
    }

    #[test]
    fn test_missing_minify_script_is_fatal() {
        let tree = Tree::new();
        std::fs::remove_file(tree.shaders.path().join(MINIFY_SCRIPT)).unwrap();
        let runner = Arc::new(RecordingRunner::default());

        let err = tree.pipeline(None, &runner).run().unwrap_err();
        assert!(matches!(err, BuildError::MissingExpectedInput { path } if path.ends_with(MINIFY_SCRIPT)));
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn test_missing_tool_policy_depends_on_platform() {
        let tree = Tree::new();
        let mut toolchain = fake_toolchain();
        toolchain.fxc = None;

        let runner = Arc::new(RecordingRunner::default());
        tree.pipeline_with(None, toolchain.clone(), BuildConfig::default(), &runner).run().unwrap();
        assert_eq!(runner.count("glslangValidator"), 8);

        let runner = Arc::new(RecordingRunner::default());
        let err = tree
            .pipeline_with(Platform::parse("windows"), toolchain, BuildConfig::default(), &runner)
            .run()
            .unwrap_err();
        assert!(matches!(err, BuildError::ToolchainUnavailable { tool: "fxc", .. }));
        assert_eq!(runner.count("glslangValidator"), 0);
    }

    #[test]
    fn test_first_failure_stops_later_backends() {
        let tree = Tree::new();
        let runner = Arc::new(RecordingRunner::failing_on("fxc"));

        let err = tree.pipeline(Platform::parse("windows"), &runner).run().unwrap_err();
        assert!(matches!(err, BuildError::CompilerFailed { .. }));
        assert_eq!(runner.count("glslangValidator"), 0);
        // 失败后缓存仍然写回
        assert!(tree.out(BuildCache::FILE_NAME).exists());
    }

    #[test]
    fn test_parallel_backends_match_sequential_outputs() {
        let tree = Tree::new();
        let config = BuildConfig {
            parallel_backends: true,
            jobs: 4,
            ..BuildConfig::default()
        };
        let runner = Arc::new(RecordingRunner::default());

        tree.pipeline_with(None, fake_toolchain(), config, &runner).run().unwrap();

        assert_eq!(compiles(&runner), 11);
        assert!(tree.out("d3d/foo.vert.h").exists());
        assert!(tree.out("rive_pls_macosx.metallib.h").exists());
        assert!(tree.out("draw_msaa_path.webgpu_fixedcolor_frag.h").exists());
    }

    #[test]
    fn test_parallel_backends_report_first_failure_in_order() {
        let tree = Tree::new();
        let config = BuildConfig {
            parallel_backends: true,
            ..BuildConfig::default()
        };
        let runner = Arc::new(RecordingRunner::failing_on("glslangValidator"));

        let err = tree.pipeline_with(None, fake_toolchain(), config, &runner).run().unwrap_err();
        assert!(matches!(err, BuildError::CompilerFailed { command, .. } if command.starts_with("glslangValidator")));
        // 其余后端照常完成
        assert!(tree.out("d3d/foo.frag.h").exists());
        assert!(tree.out("rive_pls_macosx.metallib.h").exists());
    }
}
