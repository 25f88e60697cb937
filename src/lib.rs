pub mod config;
pub mod error;
pub mod notify;
pub mod upload;
pub mod utils;

pub use error::IngestError;
