//! 核心：错误分类与优雅关闭

pub mod error;
pub mod shutdown;

pub use error::{CacheError, ConfigError, DeliveryError, GeneratorError, StartupError, StoreError};
pub use shutdown::{drain_in_flight, ShutdownManager, ShutdownReason};
