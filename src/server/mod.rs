pub mod handler;
pub mod routes;

pub use handler::SocketHandler;
pub use routes::create_router;
