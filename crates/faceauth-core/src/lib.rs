pub mod decode;
pub mod errors;
pub mod faces;
pub mod response;
