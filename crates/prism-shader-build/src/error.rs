//! 着色器构建的错误类型

use std::path::PathBuf;
use std::time::Duration;

/// 构建过程中的错误
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    /// 找不到所需的外部编译器
    #[error("toolchain `{tool}` required by {required_by} is unavailable")]
    ToolchainUnavailable { tool: &'static str, required_by: String },

    /// 外部编译器以非零状态退出
    #[error("command failed ({status}): {command}\n{stderr}")]
    CompilerFailed { command: String, status: String, stderr: String },

    /// 外部编译器超时，进程已被终止
    #[error("command timed out after {after:?}: {command}")]
    Timeout { command: String, after: Duration },

    /// 无法启动外部进程
    #[error("failed to spawn: {command}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// 必需的输入文件不存在
    #[error("missing expected input: {}", path.display())]
    MissingExpectedInput { path: PathBuf },

    #[error("io error on {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// 两个任务会写出同一个产物
    #[error("{} would be written by both {} and {}", path.display(), first.display(), second.display())]
    DuplicateOutput { path: PathBuf, first: PathBuf, second: PathBuf },

    #[error("invalid variant rule table: {0}")]
    InvalidRuleTable(String),
}

pub type BuildResult<T> = Result<T, BuildError>;

/// 为 `std::io::Result` 附加出错的路径
pub(crate) trait IoPathContext<T> {
    fn with_path(self, path: impl Into<PathBuf>) -> BuildResult<T>;
}

impl<T> IoPathContext<T> for std::io::Result<T> {
    fn with_path(self, path: impl Into<PathBuf>) -> BuildResult<T> {
        self.map_err(|source| BuildError::Io {
            path: path.into(),
            source,
        })
    }
}
