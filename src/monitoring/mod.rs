pub mod status;

pub use status::{ApiResponse, SystemStatusReport};
