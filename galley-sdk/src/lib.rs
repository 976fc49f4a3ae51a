//! Wire types and identity signatures shared by the Galley server and its clients.

pub mod objects;
pub mod signature;

#[cfg(feature = "client")]
pub mod client;
