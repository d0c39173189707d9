pub mod config;
pub mod display;
pub mod http;
pub mod input;
pub mod mcp;
pub mod process;
pub mod screenshot;
pub mod service;
pub mod session;
pub mod window;

#[cfg(all(test, unix))]
pub(crate) mod testutil;
