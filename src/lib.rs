pub mod compute;
pub mod config;
pub mod container;
pub mod credentials;
pub mod deploy;
pub mod env_file;
pub mod error;
pub mod exec;
pub mod logging;
pub mod output;
pub mod report;

#[cfg(test)]
pub(crate) mod test_support;

pub use error::DeskError;
