pub mod engram;
pub mod infect;
pub mod ingest;
pub mod retrieve;
pub mod retry;
pub mod stats;
pub mod types;
