// Pagebound - client state sync and economy rules

pub mod api;
pub mod error;
pub mod features;
pub mod models;
pub mod utils;

pub use error::Rejection;
pub use features::session::Session;
