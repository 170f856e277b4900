pub mod codec;
pub mod error;
pub mod settings;
pub mod retry;
pub mod signature;
pub mod types;
