//! Context window management: token accounting and history compaction.

mod compactor;
mod tokens;

pub use compactor::{CompactionError, Compactor};
pub use tokens::TokenCounter;
