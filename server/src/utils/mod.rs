pub mod auth;
pub mod error;
pub mod extract;
pub mod response;

pub use auth::{CurrentUser, StaffUser};
pub use error::AppError;
