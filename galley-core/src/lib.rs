#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![forbid(unsafe_code)]

pub mod broadcast;
pub mod catalog;
pub mod config;
pub mod entities;
pub mod error;
pub mod events;
pub mod framework;
pub mod fsm;
pub mod payments;
pub mod pricing;
pub mod processors;
pub mod service;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;
