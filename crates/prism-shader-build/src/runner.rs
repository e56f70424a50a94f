//! 外部工具的调用
//!
//! 所有对原生编译器的调用都描述为 [`Invocation`]，再交给 [`ToolRunner`] 执行。
//! 正式运行使用 [`ProcessRunner`]，测试中替换为记录调用的 runner。

use std::ffi::OsString;
use std::io::Read;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use crate::error::{BuildError, BuildResult};
use crate::toolchain::Tool;

/// 一次外部工具调用
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: PathBuf,
    pub args: Vec<OsString>,
    /// 该调用会写出的文件，用于日志与测试
    pub outputs: Vec<PathBuf>,
}

impl Invocation {
    pub fn new(tool: &Tool) -> Self {
        Self {
            program: tool.program.clone(),
            args: tool.prefix_args.iter().map(OsString::from).collect(),
            outputs: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn output(mut self, path: impl Into<PathBuf>) -> Self {
        self.outputs.push(path.into());
        self
    }

    /// 便于阅读的命令行
    pub fn command_line(&self) -> String {
        let mut line = self.program.display().to_string();
        for arg in &self.args {
            line.push(' ');
            line.push_str(&arg.to_string_lossy());
        }
        line
    }

    /// 参与缓存指纹计算的内容：程序与全部参数
    pub fn fingerprint_input(&self) -> Vec<u8> {
        let mut bytes = self.program.as_os_str().as_encoded_bytes().to_vec();
        for arg in &self.args {
            bytes.push(0);
            bytes.extend_from_slice(arg.as_encoded_bytes());
        }
        bytes
    }
}

/// 外部工具执行器
pub trait ToolRunner: Send + Sync {
    /// 执行调用，非零退出或超时返回错误
    fn run(&self, invocation: &Invocation) -> BuildResult<()>;
}

/// 以子进程方式执行外部工具
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    /// 单次调用的超时时间，None 表示不限时
    timeout: Option<Duration>,
}

impl ProcessRunner {
    const POLL_INTERVAL: Duration = Duration::from_millis(10);

    pub fn new(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }

    /// 在后台线程中读完管道，避免子进程因管道写满而阻塞
    fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> std::thread::JoinHandle<Vec<u8>> {
        std::thread::spawn(move || {
            let mut buf = Vec::new();
            if let Some(mut pipe) = pipe {
                pipe.read_to_end(&mut buf).ok();
            }
            buf
        })
    }
}

impl ToolRunner for ProcessRunner {
    fn run(&self, invocation: &Invocation) -> BuildResult<()> {
        let command = invocation.command_line();
        log::info!("Running: {command}");

        let mut child = Command::new(&invocation.program)
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| BuildError::Spawn {
                command: command.clone(),
                source,
            })?;

        let stdout = Self::drain(child.stdout.take());
        let stderr = Self::drain(child.stderr.take());

        let start = Instant::now();
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {}
                Err(source) => {
                    return Err(BuildError::Spawn { command, source });
                }
            }
            if let Some(timeout) = self.timeout {
                if start.elapsed() >= timeout {
                    child.kill().ok();
                    child.wait().ok();
                    return Err(BuildError::Timeout { command, after: timeout });
                }
            }
            std::thread::sleep(Self::POLL_INTERVAL);
        };

        let stdout = stdout.join().unwrap_or_default();
        let stderr = stderr.join().unwrap_or_default();
        if !stdout.is_empty() {
            log::info!("stdout: {}", String::from_utf8_lossy(&stdout));
        }

        if !status.success() {
            return Err(BuildError::CompilerFailed {
                command,
                status: status.to_string(),
                stderr: String::from_utf8_lossy(&stderr).into_owned(),
            });
        }
        if !stderr.is_empty() {
            log::warn!("stderr: {}", String::from_utf8_lossy(&stderr));
        }
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> Invocation {
        Invocation::new(&Tool::new("sh")).args(["-c", script])
    }

    #[test]
    fn test_command_line_rendering() {
        let invocation = Invocation::new(&Tool::with_prefix("xcrun", ["-sdk", "macosx", "metal"]))
            .args(["-c", "a.metal"])
            .output("a.air");
        assert_eq!(invocation.command_line(), "xcrun -sdk macosx metal -c a.metal");
        assert_eq!(invocation.outputs, [PathBuf::from("a.air")]);
    }

    #[cfg(unix)]
    #[test]
    fn test_process_runner_exit_status() {
        let runner = ProcessRunner::new(Some(Duration::from_secs(30)));
        assert!(runner.run(&sh("exit 0")).is_ok());

        let err = runner.run(&sh("echo boom >&2; exit 3")).unwrap_err();
        match err {
            BuildError::CompilerFailed { stderr, .. } => assert!(stderr.contains("boom")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_process_runner_timeout_is_distinct() {
        let runner = ProcessRunner::new(Some(Duration::from_millis(100)));
        let err = runner.run(&sh("sleep 5")).unwrap_err();
        assert!(matches!(err, BuildError::Timeout { .. }), "unexpected error: {err:?}");
    }

    #[test]
    fn test_spawn_failure() {
        let runner = ProcessRunner::new(None);
        let err = runner.run(&Invocation::new(&Tool::new("/definitely/not/a/compiler"))).unwrap_err();
        assert!(matches!(err, BuildError::Spawn { .. }));
    }
}
