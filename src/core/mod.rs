pub mod association;
pub mod dedup;
pub mod hash;
pub mod matcher;
pub mod ncc;
pub mod report;
pub mod scanner;
