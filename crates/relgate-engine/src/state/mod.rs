pub mod atomic;
pub mod audit_log;
pub mod writer;

pub use writer::{StateDir, StateWriter};
