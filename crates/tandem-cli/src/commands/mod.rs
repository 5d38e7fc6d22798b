pub mod diffs;
pub mod replay;
pub mod status;
