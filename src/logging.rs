use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Initialize structured logging for a process embedding the engine.
/// Safe to call more than once; later calls are ignored.
pub fn init(level: Level) {
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber).ok();
}
