//! Core types used throughout the NOS virtual memory core

pub mod types;
