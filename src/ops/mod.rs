//! Front-end operations against a local node

pub mod frontend;

pub use frontend::{describe, FrontendClient};
