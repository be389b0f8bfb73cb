//! Utility types shared by every layer of the library.
//!
//! - [`Path`] - hierarchical scene paths and prefix algebra
//! - [`Value`] - typed field values with block sentinels
//! - [`TimeCode`] - time ordinates with the default sentinel
//! - [`Error`] / [`Result`] - error handling
//! - configuration and tracing setup

mod config;
mod error;
mod logging;
mod path;
mod time_code;
mod value;

pub use config::*;
pub use error::*;
pub use logging::*;
pub use path::*;
pub use time_code::*;
pub use value::*;
