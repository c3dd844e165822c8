use std::sync::Once;

use log::LevelFilter;

static INIT: Once = Once::new();

/// Level used when `RUST_LOG` is not set.
pub fn default_level(verbose: bool) -> LevelFilter {
    if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    }
}

/// Initialize the global logger. Later calls are ignored.
///
/// `RUST_LOG` wins over `verbose` when present.
pub fn init_logging(verbose: bool) {
    INIT.call_once(|| {
        let mut builder = env_logger::Builder::new();
        match std::env::var("RUST_LOG") {
            Ok(filter) => {
                builder.parse_filters(&filter);
            }
            Err(_) => {
                builder.filter_level(default_level(verbose));
            }
        }
        builder.format_timestamp_millis();
        if let Err(e) = builder.try_init() {
            eprintln!("Logger already set: {e}");
        }
    });
}
