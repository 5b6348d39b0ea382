pub mod client;
pub mod connection;
pub mod error;
pub mod protocol;
pub mod server;
pub mod session;
pub mod worker;

pub use client::Client;
pub use error::{Result, WavecastError};
pub use protocol::{Message, MessageChannel, Response};
pub use server::{Server, ServerConfig};
