pub mod connection;
mod live;
mod room;
mod server;
mod signaling;

pub use connection::{ClientConnection, ClientRole};
pub use server::{LiveStatus, RelayServer};
pub use signaling::{ClientMessage, ServerMessage};
