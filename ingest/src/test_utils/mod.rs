//! Test utilities for exercising the pipeline without a database.

mod changelog;
mod source;

pub use changelog::FailingChangelogStore;
pub use source::MemoryDeltaSource;
