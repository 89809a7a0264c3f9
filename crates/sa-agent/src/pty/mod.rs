//! PTY support for shell sessions

mod backend;

pub use backend::{PortablePtyBackend, PortablePtyProcess};
