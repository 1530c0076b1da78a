//! Sandbox module containing the trust boundary components.

pub mod cache;
pub mod config;
pub mod environment;
pub mod executor;
pub mod host;
pub mod io;
pub mod limits;
pub mod load;
pub mod loader;
pub mod os;
pub mod permit;
pub mod protect;
pub mod trusted;
