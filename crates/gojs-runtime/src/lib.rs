//! Host-side runtime for WebAssembly binaries built with `GOOS=js GOARCH=wasm`.
//!
//! A stock Go Wasm binary expects to be loaded by the `wasm_exec.js` glue
//! script, which supplies about two dozen imports under the `go` module
//! namespace. This crate re-implements that glue natively so those binaries
//! run inside any engine that can be embedded into a native process:
//!
//! - [`Module`] holds the NaN-boxed value table, the simulated JS global
//!   object graph, and one handler per imported function.
//! - [`Instance`] is the contract the embedder implements: linear-memory
//!   access plus the guest's `getsp` and `resume` exports.
//! - [`Module::invoke`] layers the waPC guest/host call protocol on top of
//!   the same bridge.
//!
//! Engine-specific glue stays out of this crate; an embedder registers every
//! `Module` handler under the `go` import namespace, passing the guest's
//! stack pointer through unchanged.

mod globals;
mod registry;
#[cfg(test)]
mod testutil;
mod wapc;

pub mod instance;
pub mod module;
pub mod value;

pub use instance::Instance;
pub use module::Module;
pub use value::{FuncScope, JsFunction, JsObject, Properties, Value};

pub use gojs_core::{write_args, Error, Memory, Result};
