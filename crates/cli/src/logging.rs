use directories::BaseDirs;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

fn filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Logs go to a daily file so stdout only carries the streamed answer.
/// Falls back to stderr when no data dir is available.
pub fn init() -> Option<WorkerGuard> {
    let dir = BaseDirs::new().map(|b| b.data_dir().join("assist").join("logs"));
    if let Some(dir) = dir.filter(|d| std::fs::create_dir_all(d).is_ok()) {
        let appender = tracing_appender::rolling::daily(dir, "assist.log");
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let installed = tracing_subscriber::fmt()
            .with_env_filter(filter())
            .with_writer(writer)
            .with_ansi(false)
            .try_init()
            .is_ok();
        return installed.then_some(guard);
    }
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter())
        .with_writer(std::io::stderr)
        .try_init();
    None
}
