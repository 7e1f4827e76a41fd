pub mod clock;
pub mod config;
pub mod consent;
pub mod errors;
pub mod storage;

pub use config::ConsentConfig;
pub use consent::*;
pub use errors::{ConsentError, Result};
