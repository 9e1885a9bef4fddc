use color_eyre::Result;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Installs the color-eyre report handler and a pretty tracing subscriber.
///
/// Call once at process start, before any other crate API. `RUST_LOG` defaults
/// to `info` and `RUST_LIB_BACKTRACE` to `0` when unset.
pub fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    init_subscriber();
    Ok(())
}

fn init_subscriber() {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        tracing::warn!("A global tracing subscriber is already installed");
    }
}
