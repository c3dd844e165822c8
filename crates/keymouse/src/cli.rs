use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "keymouse", about = "Drive the mouse pointer from the keyboard")]
pub struct Args {
    /// Path to the settings JSON file.
    #[arg(long, env = "KEYMOUSE_CONFIG", default_value = "keymouse.json")]
    pub config: PathBuf,

    /// Write the default settings to the config path and exit.
    #[arg(long)]
    pub write_default_config: bool,

    /// Log per-key decisions and backend failures.
    #[arg(short, long)]
    pub verbose: bool,

    /// Keep retrying the keyboard hook until input monitoring is granted.
    #[arg(long)]
    pub wait_for_permission: bool,

    /// How often the settings file is checked for changes.
    #[arg(long, default_value_t = 1000)]
    pub reload_interval_ms: u64,
}

impl Args {
    pub fn reload_interval(&self) -> Duration {
        Duration::from_millis(self.reload_interval_ms.max(1))
    }
}
