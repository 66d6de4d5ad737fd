#![forbid(unsafe_code)]

pub mod bypass;
pub mod criterion;
pub mod gates;
pub mod policy;
pub mod providers;
pub mod registry;
pub mod report;
pub mod state;
