pub mod client;
pub mod engine;
pub mod error;
pub mod pool;
pub mod protocol;
pub mod server;

pub use client::{RemoteDatabase, RemoteStatement};
pub use error::{Error, Result};
pub use pool::{ConnectionPool, DatabaseConfig, SharedConnection};
pub use server::create_router;
