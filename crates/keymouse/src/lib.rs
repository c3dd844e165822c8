// keymouse application wiring: command line, logging, startup

pub mod cli;
pub mod logging;
pub mod startup;
