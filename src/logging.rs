use std::io::Write;

use chrono::Local;
use log::LevelFilter;

/// Installs the `env_logger` backend.
///
/// `level` applies unless `RUST_LOG` is set. Calling this again after a
/// logger is installed does nothing.
pub fn init_logging(level: LevelFilter) {
    let mut builder = env_logger::Builder::new();
    builder.filter_level(level);
    if let Ok(filters) = std::env::var("RUST_LOG") {
        builder.parse_filters(&filters);
    }
    let installed = builder
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{}] {}: {}",
                Local::now().to_rfc3339(),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .try_init()
        .is_ok();

    if installed {
        log::info!("Logging initialized at {}", level);
    }
}
