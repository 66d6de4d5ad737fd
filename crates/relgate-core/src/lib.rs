#![forbid(unsafe_code)]

pub mod bypass;
pub mod errors;
pub mod evaluation;
pub mod schema;
pub mod spec;
pub mod templates;
pub mod traits;
pub mod types;
