//! 将二进制数据序列化为可嵌入的 C 头文件
//!
//! 输出格式与 `xxd -i` 一致，下游引擎代码直接链接这里生成的符号名：
//!
//! ```text
//! unsigned char rive_pls_macosx_metallib[] = {
//!   0x4d, 0x54, 0x4c, 0x42, ...
//! };
//! unsigned int rive_pls_macosx_metallib_len = 1234;
//! ```

use std::path::Path;

use crate::error::{BuildResult, IoPathContext};

/// 每行输出的字节数
pub const BYTES_PER_LINE: usize = 12;

/// 由文件名得到 C 符号名：非 `[A-Za-z0-9_]` 字符替换为 `_`
pub fn symbol_name_for(file_name: &str) -> String {
    file_name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

/// 生成字节数组头文件的文本，相同输入总是得到相同输出
pub fn emit_byte_array_header(symbol: &str, bytes: &[u8]) -> String {
    let lines: Vec<String> = bytes
        .chunks(BYTES_PER_LINE)
        .map(|line| {
            let hex: Vec<String> = line.iter().map(|byte| format!("0x{byte:02x}")).collect();
            format!("  {}", hex.join(", "))
        })
        .collect();
    let body = if lines.is_empty() { String::new() } else { format!("{}\n", lines.join(",\n")) };

    format!("unsigned char {symbol}[] = {{\n{body}}};\nunsigned int {symbol}_len = {};\n", bytes.len())
}

/// 读取二进制文件并写出对应的头文件
pub fn write_byte_array_header(binary: &Path, header: &Path, symbol: &str) -> BuildResult<()> {
    let bytes = std::fs::read(binary).with_path(binary)?;
    log::info!("Emitting header {header:?} ({} bytes, symbol `{symbol}`)", bytes.len());
    std::fs::write(header, emit_byte_array_header(symbol, &bytes)).with_path(header)
}

/// 解析由 [`emit_byte_array_header`] 生成的文本，返回字节与长度常量
#[cfg(test)]
pub(crate) fn parse_byte_array_header(text: &str) -> Option<(Vec<u8>, usize)> {
    let body_start = text.find('{')? + 1;
    let body_end = text.find("};")?;
    let bytes = text[body_start..body_end]
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| u8::from_str_radix(s.strip_prefix("0x")?, 16).ok())
        .collect::<Option<Vec<_>>>()?;

    let len = text
        .lines()
        .find(|line| line.starts_with("unsigned int"))?
        .rsplit('=')
        .next()?
        .trim()
        .trim_end_matches(';')
        .parse()
        .ok()?;
    Some((bytes, len))
}
