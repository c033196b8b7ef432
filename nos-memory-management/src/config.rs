//! Pager configuration

use std::path::PathBuf;

use nos_api::Result;
use nos_api::error::config_error;

/// Default number of physical frames
pub const DEFAULT_NUM_FRAMES: usize = 16;
/// Default swap file name, relative to the working directory
pub const DEFAULT_SWAP_FILE: &str = "nos-vm.swap";
/// Default stack size of a new address space, in pages
pub const DEFAULT_STACK_PAGES: usize = 8;

/// Pager configuration
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct VmConfig {
    /// Physical frames available to user pages
    pub num_frames: usize,
    /// Swap file location
    pub swap_file: PathBuf,
    /// Stack pages given to each address space
    pub stack_pages: usize,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            num_frames: DEFAULT_NUM_FRAMES,
            swap_file: PathBuf::from(DEFAULT_SWAP_FILE),
            stack_pages: DEFAULT_STACK_PAGES,
        }
    }
}

impl VmConfig {
    /// Set the number of physical frames.
    pub fn with_num_frames(mut self, num_frames: usize) -> Self {
        self.num_frames = num_frames;
        self
    }

    /// Set the swap file location.
    pub fn with_swap_file(mut self, swap_file: impl Into<PathBuf>) -> Self {
        self.swap_file = swap_file.into();
        self
    }

    /// Set the stack size of new address spaces.
    pub fn with_stack_pages(mut self, stack_pages: usize) -> Self {
        self.stack_pages = stack_pages;
        self
    }

    /// Check the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.num_frames == 0 {
            return Err(config_error("num_frames must be at least 1"));
        }
        if u32::try_from(self.num_frames).is_err() {
            return Err(config_error("num_frames does not fit a frame index"));
        }
        if self.swap_file.as_os_str().is_empty() {
            return Err(config_error("swap_file must not be empty"));
        }
        Ok(())
    }
}
