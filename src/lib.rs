pub mod common;
pub mod config;
pub mod connect;
pub mod scheduler;
pub mod session;

pub type Error = crate::common::error::QshellError;
pub type Result<T> = std::result::Result<T, Error>;
