pub mod config;
pub mod script;
pub mod simulate;

pub use config::CliConfig;
pub use script::{Script, Step};
pub use simulate::{print_event, run_script};
