/// Persisted state for tidemark
///
/// The file layout of a project and the serde models written into it.

pub mod layout;
pub mod models;

pub use layout::ProjectLayout;
pub use models::*;
