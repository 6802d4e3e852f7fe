pub mod bus;
pub mod config;
pub mod error;
pub mod io;
pub mod runtime;
pub mod service;
mod test;
pub mod transport;
pub mod utils;

pub mod prelude;
