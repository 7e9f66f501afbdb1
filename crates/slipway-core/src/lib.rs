pub mod artifact;
pub mod config;
pub mod types;

pub use artifact::{ArtifactRef, ArtifactRefError};
pub use config::SlipwayConfig;
pub use types::*;
