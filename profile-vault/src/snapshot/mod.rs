//! Snapshot collection, packaging and size classification.

pub mod archive;
pub mod builder;
pub mod fingerprint;
pub mod size;

pub use builder::{CollectedFile, Snapshot, SnapshotBuilder, SnapshotContents, SnapshotOptions};
pub use fingerprint::fingerprint;
pub use size::{classify, SizeClass, SizeLimit};
