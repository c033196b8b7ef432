//! NOS API - Core types shared by the NOS virtual memory core
//!
//! This crate provides the error type, identifier newtypes and logging macros
//! used by the synchronization and memory management crates.
//!
//! # Architecture
//!
//! - **Core**: identifier newtypes (`Pid`, `Tick`)
//! - **Error**: the common `Error` enum and `Result` alias
//! - **Logging**: `nos_trace!` .. `nos_error!` macros over the `log` facade
//!
//! # Usage
//!
//! ```rust
//! use nos_api::{Error, Pid, Result};
//!
//! fn check(pid: Pid) -> Result<()> {
//!     if pid.as_u32() == 0 {
//!         return Err(Error::Config("pid 0 is reserved".into()));
//!     }
//!     Ok(())
//! }
//!
//! assert!(check(Pid::new(1)).is_ok());
//! ```

#![warn(missing_docs)]

pub mod core;
pub mod error;
#[macro_use]
pub mod logging;

#[cfg(feature = "log")]
#[doc(hidden)]
pub use log as __log;

// Re-export commonly used types
pub use crate::core::types::{Pid, Tick};
pub use crate::error::{Error, Result};
