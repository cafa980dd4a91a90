//! Core library modules for butterfly-transfer
//!
//! This module contains the internal implementation details of the butterfly-transfer library.

pub mod context;
pub mod error;
pub mod gauge;
pub mod limiter;
pub mod options;
pub mod progress;
pub mod transfer;
