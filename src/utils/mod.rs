pub use cancel_token::*;

pub mod backoff;
mod cancel_token;
pub mod config_io;
pub mod core_pinner;
pub mod logger;
