pub use slog::{debug, error, info, o, trace, warn, Discard, Logger};

use sloggers::{Config, LoggerConfig};
use std::fs;
use std::path::Path;

/// Default terminal logger used when no config file is supplied (e.g. the `gen_*` binaries).
pub fn init() -> Logger {
    let config: LoggerConfig = serdeconv::from_toml_str(
        r#"
type = "terminal"
level = "debug"
destination = "stderr"
"#,
    )
    .expect("invalid built-in logging config");

    config.build_logger().expect("failed to build logger")
}

/// Builds a logger from a TOML config file on disk, falling back to the terminal default if the
/// path does not exist. Matches the `sloggers` config schema used by `init`.
pub fn init_from_file<P: AsRef<Path>>(path: P) -> Logger {
    let path = path.as_ref();

    if !path.exists() {
        return init();
    }

    let contents = fs::read_to_string(path).expect("failed to read logging config");
    let config: LoggerConfig = serdeconv::from_toml_str(&contents).expect("invalid logging config");

    config.build_logger().expect("failed to build logger")
}
