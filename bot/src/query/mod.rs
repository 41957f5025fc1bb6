//! Thin ServerQuery adapter that binds [`crate::directory::Directory`] to a
//! TeamSpeak 3 query port.

pub mod client;
pub mod codec;

pub use client::QueryClient;
