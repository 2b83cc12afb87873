use std::sync::Once;

use env_logger::Builder;
use log::LevelFilter;

/// How the process-wide logger is set up.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// `env_logger` directives such as `"pixstream_engine=trace"`. Overrides `RUST_LOG`.
    pub env_filter: Option<String>,
    /// Level for the wgpu driver crates, which are noisy at `info`.
    pub wgpu_level: LevelFilter,
    pub write_style: env_logger::WriteStyle,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            env_filter: None,
            wgpu_level: LevelFilter::Warn,
            write_style: env_logger::WriteStyle::Auto,
        }
    }
}

const WGPU_MODULES: [&str; 3] = ["wgpu_core", "wgpu_hal", "naga"];

fn quiet_wgpu(builder: &mut Builder, level: LevelFilter) {
    for module in WGPU_MODULES {
        builder.filter_module(module, level);
    }
}

static INIT: Once = Once::new();

/// Installs the global logger on the first call; later calls do nothing.
///
/// Directives come from `config.env_filter`, then `RUST_LOG`, then `info`.
/// Explicit directives win over `wgpu_level`.
pub fn init_logging(config: LoggingConfig) {
    INIT.call_once(|| {
        let mut builder = Builder::new();
        builder.filter_level(LevelFilter::Info);
        quiet_wgpu(&mut builder, config.wgpu_level);

        if let Some(filter) = config.env_filter.or_else(|| std::env::var("RUST_LOG").ok()) {
            builder.parse_filters(&filter);
        }

        builder.write_style(config.write_style).init();
        log::debug!("logger installed");
    });
}

/// Logger for tests: output is captured per test, `debug` unless `RUST_LOG` says otherwise.
pub fn init_test_logging() {
    let mut builder = Builder::from_env(env_logger::Env::default().default_filter_or("debug"));
    quiet_wgpu(&mut builder, LevelFilter::Warn);
    let _ = builder.is_test(true).try_init();
}
