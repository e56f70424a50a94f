//! 增量的多后端着色器构建
//!
//! 将一个着色器源码目录编译为可以直接 `#include` 的字节数组头文件：
//! - D3D：fxc 生成的字节码头文件
//! - Metal：所有 `.metal` 链接成的 metallib，再序列化为头文件
//! - Vulkan：每个变体一个 SPIR-V 模块及其头文件
//!
//! 输入未变化时不会重新调用原生编译器，详见 [`staleness`]。
//! 入口为 [`pipeline::Pipeline`]。

pub mod backend;
pub mod common;
pub mod config;
pub mod error;
pub mod header;
pub mod pipeline;
pub mod runner;
pub mod staleness;
pub mod toolchain;
pub mod variant;

pub use error::{BuildError, BuildResult};
pub use pipeline::Pipeline;
