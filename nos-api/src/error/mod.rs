//! Error handling module for the NOS virtual memory core
//!
//! Only recoverable conditions are represented here. Kernel invariants that a
//! caller can break (using a condition without its lock, faulting on a page
//! beyond the page table) are programming errors and panic instead.

use crate::core::types::Pid;

/// Common error type used throughout the NOS virtual memory core
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Rejected configuration value
    #[error("Configuration error: {0}")]
    Config(String),
    /// Swap file I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Program image that cannot back an address space
    #[error("Invalid program image: {0}")]
    InvalidImage(String),
    /// An image section could not supply one of its pages
    #[error("Section {section} cannot supply page {page}")]
    SectionUnreadable {
        /// Section index within the image
        section: usize,
        /// Page index within the section
        page: usize,
    },
    /// A page fault that cannot be satisfied; the faulting process must be
    /// terminated abnormally
    #[error("Unrecoverable fault in {pid} at vpn {vpn}: {reason}")]
    UnrecoverableFault {
        /// Faulting process
        pid: Pid,
        /// Faulting virtual page
        vpn: usize,
        /// Underlying cause
        reason: String,
    },
}

impl Error {
    /// Returns true if this error must terminate the faulting process.
    pub fn is_fatal_to_process(&self) -> bool {
        matches!(self, Error::UnrecoverableFault { .. })
    }
}

/// Result type for operations that can fail
pub type Result<T> = core::result::Result<T, Error>;

/// Creates a new configuration error
pub fn config_error(msg: &str) -> Error {
    Error::Config(msg.to_string())
}
