use std::io::Write;

/// 初始化彩色终端日志
///
/// `level` 为默认的过滤级别；若设置了 `RUST_LOG` 环境变量，则以环境变量为准。
pub fn init_log(level: log::LevelFilter) {
    env_logger::Builder::new()
        .filter(None, level)
        .parse_default_env()
        .format(|buf, record| {
            let level_style = level_style(buf, record.level());
            let grey_style = anstyle::Style::new().fg_color(Some(anstyle::Color::Rgb(anstyle::RgbColor(110, 110, 110))));

            let line = record.line().unwrap_or(!0);
            let file = record.file().unwrap_or("").rsplit(['/', '\\']).next().unwrap_or("");
            let time = chrono::Local::now().format("%H:%M:%S%.3f");
            let level = record.level();

            writeln!(
                buf,
                "{level_style}[{time}] {level:<5}{level_style:#} {grey_style}[{file}:{line}]{grey_style:#} {}",
                record.args()
            )
        })
        .init();
}

fn level_style(buf: &env_logger::fmt::Formatter, level: log::Level) -> anstyle::Style {
    let color = match level {
        log::Level::Error => anstyle::AnsiColor::Red,
        log::Level::Warn => anstyle::AnsiColor::Yellow,
        log::Level::Info => anstyle::AnsiColor::Green,
        log::Level::Debug => anstyle::AnsiColor::Cyan,
        log::Level::Trace => return buf.default_level_style(level),
    };
    buf.default_level_style(level).fg_color(Some(anstyle::Color::Ansi(color)))
}
