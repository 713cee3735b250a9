//! Hook-protocol server: the OCI runtime's side channel into this daemon.
//!
//! Three layers, each grounded in a file of the original source: the raw
//! transport (`socket.rs`, from `pkg/server/server.go` +
//! `pkg/clienthandler/clienthandler.go`'s cgo peek helper), the wire
//! format (`protocol.rs`), and the request state machine (`handler.rs`).
//! `server.rs` ties them together into an accept loop.

mod handler;
mod protocol;
mod server;
mod socket;

pub use handler::HookHandler;
pub use server::HookServer;
pub use socket::SocketError;
