pub mod io;
pub mod model;
pub mod validation;

pub use io::{read_config, write_config};
pub use model::{LoadConfig, LoopCount, SummaryOutput};
pub use validation::validate_config;
