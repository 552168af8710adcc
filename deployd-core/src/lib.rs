#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![forbid(unsafe_code)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

pub mod broadcast;
pub mod config;
pub mod deployer;
pub mod deployment;
pub mod pipeline;
pub mod session;
pub mod stages;
pub mod status;

#[cfg(test)]
pub(crate) mod test_support;
