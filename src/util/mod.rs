//! Shared helpers
//!
//! - `keypath`: dotted key paths into configuration trees
//! - `lazy`: initialize-once holders for process-wide values
//! - `merge`: deep merge of configuration trees

pub mod keypath;
mod lazy;
pub mod merge;

pub use lazy::LazyHolder;
pub use merge::merge;
