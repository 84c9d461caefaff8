//! Filesystem helpers: home resolution, enumeration and snapshot filtering.

pub mod filter;
pub mod paths;
pub mod walker;

pub use filter::{FilterOptions, PathFilter};
pub use paths::HomeResolver;
pub use walker::{enumerate_files, FileInfo};
