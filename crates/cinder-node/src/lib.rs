mod error;
pub mod protocol;
mod server;
mod session;
mod store;

pub use error::NodeError;
pub use server::Server;
pub use session::{Node, NodeConfig, Session};
pub use store::MemoryStore;
