pub mod manager;

pub use manager::BypassManager;
