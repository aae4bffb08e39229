//! Shared building blocks for the gojs host runtime.
//!
//! This crate carries the pieces both the runtime and engine adapters need:
//! - The [`Error`] type and [`Result`] alias
//! - [`Memory`], bounds-checked little-endian access to guest linear memory
//! - [`write_args`], the argv/envp image builder for the guest entry point

pub mod args;
pub mod error;
pub mod memory;

pub use args::write_args;
pub use error::{Error, Result};
pub use memory::Memory;
