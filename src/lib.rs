pub mod bluetooth;
pub mod codec;
pub mod config;
pub mod error;
pub mod export;
pub mod models;
pub mod utils;

pub use error::GattError;
