pub mod config;
pub mod error;
pub mod policy;
pub mod target;
pub mod task;

pub use config::RelayConfig;
pub use error::*;
pub use policy::*;
pub use target::*;
pub use task::*;
