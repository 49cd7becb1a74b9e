use anyhow::Result;
use conductor_config::{LogConfig, OutputFormat};
use tracing::debug;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// 按 `LogConfig` 初始化 tracing，`RUST_LOG` 优先于配置中的级别
///
/// 全局 subscriber 已存在时（测试、或父进程已初始化）静默跳过。
pub fn init_logging(config: &LogConfig) -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.level.to_string()));

    let registry = tracing_subscriber::registry().with(env_filter);

    let result = match config.format {
        OutputFormat::Json => {
            let fmt_layer = tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(true)
                .with_span_list(true)
                .with_file(config.include_location)
                .with_line_number(config.include_location)
                .with_thread_ids(config.include_thread_id);

            registry.with(fmt_layer).try_init()
        }
        OutputFormat::Pretty => {
            let fmt_layer = tracing_subscriber::fmt::layer()
                .pretty()
                .with_file(config.include_location)
                .with_line_number(config.include_location)
                .with_thread_ids(config.include_thread_id);

            registry.with(fmt_layer).try_init()
        }
        OutputFormat::Text => {
            let fmt_layer = tracing_subscriber::fmt::layer()
                .compact()
                .with_file(config.include_location)
                .with_line_number(config.include_location)
                .with_thread_ids(config.include_thread_id);

            registry.with(fmt_layer).try_init()
        }
    };

    match result {
        Ok(()) => {
            debug!(
                logging.format = ?config.format,
                logging.level = %config.level,
                "Logging initialized"
            );
        }
        Err(e) => {
            debug!("Logging already initialized: {}", e);
        }
    }

    Ok(())
}

pub fn init_tracing() -> Result<()> {
    init_logging(&LogConfig::default())
}
