//! Each command returns `Ok(false)` when it ran but something it processed failed.

pub mod import;
pub mod load;
pub mod plan;
