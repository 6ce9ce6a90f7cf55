pub mod doctor;
pub mod export;
pub mod import;
pub mod infect;
pub mod ingest;
pub mod reset;
pub mod search;
pub mod stats;
