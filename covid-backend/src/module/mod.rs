pub mod handler;
pub mod scheduled;
pub mod stats;
