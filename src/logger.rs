use tracing_subscriber::EnvFilter;

/// 初始化日志
///
/// 优先使用命令行给出的级别，其次是 `RUST_LOG`，都没有时为 `info`。
pub fn init(level: Option<&str>) {
    let filter = match level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
