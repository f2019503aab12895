pub mod config;
pub mod error;
pub mod stats;
pub mod traits;
pub mod types;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use config::*;
pub use error::*;
pub use traits::*;
pub use types::*;
