/// Core functionality modules
///
/// Root resolution, staleness evaluation, versioned backups with retention,
/// and session recording.

pub mod backup;
pub mod catalog;
pub mod retention;
pub mod root_resolver;
pub mod session;
pub mod timing;

pub use backup::{BackupManager, BackupOutcome, VerifyReport};
pub use catalog::BackupCatalog;
pub use retention::{PruneReport, RetentionPolicy};
pub use root_resolver::RootResolver;
pub use session::{RecordOutcome, SessionRecorder};
pub use timing::{Artifact, ArtifactReport, DueReport, TimingEvaluator, TimingThresholds};
