pub mod cache;
pub mod checkpoint;
pub mod replay;
pub mod secondary;

pub use cache::CacheConfig;
pub use checkpoint::{CheckpointConfig, ExportConfig};
pub use replay::ReplayConfig;
pub use secondary::{SqliteConfig, SynchronousMode};
