pub use faceauth_core::errors::{AppError, AppResult};
