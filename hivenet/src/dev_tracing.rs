//! Development helper: initialize a tracing subscriber when `RUST_LOG` is set.

/// Install a fmt subscriber filtered by `RUST_LOG`.
///
/// Tests, examples and benches call `hivenet::dev_tracing::init_tracing()`
/// to see the reactor's `[ACCEPT]`/`[CONNECT]`/`[FORWARD]` logs. No-op when
/// `RUST_LOG` is unset or a global subscriber is already installed.
pub fn init_tracing() {
    if std::env::var_os("RUST_LOG").is_some() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }
}
