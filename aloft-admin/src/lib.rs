mod cli;
mod logging;

pub use cli::Cli;
pub use logging::init_tracing;
