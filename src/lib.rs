/// tidemark library
///
/// Keeps one project directory's task list, backups and session state
/// consistent across short, independent runs.

pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod store;

// Re-exports for convenience
pub use config::Config;
pub use error::{Result, TidemarkError};
pub use store::ProjectLayout;
