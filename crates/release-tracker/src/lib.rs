pub mod audit;
pub mod bulk;
pub mod config;
pub mod controller;
pub mod error;
pub mod filter;
pub mod lifecycle;
pub mod logging;
pub mod model;
pub mod sanitize;
pub mod session;
pub mod status;
pub mod store;
pub mod ui;

pub use error::{Error, Result};
