pub mod aggregate;
pub mod cancel;
pub mod engine;

pub use cancel::CancelToken;
pub use engine::PolicyEngine;
