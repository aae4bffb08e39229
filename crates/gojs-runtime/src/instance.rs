//! The contract an embedder implements to host a guest binary.

use std::io::Write as _;

use gojs_core::{Error, Result};

/// An instance of a running Wasm module, as seen by the runtime.
///
/// The memory accessors are usually delegated to a [`gojs_core::Memory`]
/// composed into the embedder's type, or forwarded to the engine's own
/// memory view. Borrowed views returned by [`mem`](Instance::mem) must not
/// be retained across calls that can re-enter the guest; the guest may grow
/// its memory during those.
///
/// `write`, `exit` and `host_call` are optional capabilities with usable
/// defaults: fd 1/2 writes go to the process stdout/stderr, `exit` is a
/// no-op, and `host_call` reports that waPC host calls are unsupported.
pub trait Instance {
    fn mem(&self, offset: u32, length: u32) -> Result<&[u8]>;
    fn mem_mut(&mut self, offset: u32, length: u32) -> Result<&mut [u8]>;
    fn get_u32(&self, offset: u32) -> Result<u32>;
    fn get_i64(&self, offset: u32) -> Result<i64>;
    fn get_f64(&self, offset: u32) -> Result<f64>;
    fn set_u8(&mut self, offset: u32, val: u8) -> Result<()>;
    fn set_u32(&mut self, offset: u32, val: u32) -> Result<()>;
    fn set_i64(&mut self, offset: u32, val: i64) -> Result<()>;
    fn set_f64(&mut self, offset: u32, val: f64) -> Result<()>;

    /// Current value of the guest stack pointer, via the `getsp` export.
    fn get_sp(&mut self) -> Result<u32>;

    /// Resume the guest scheduler, via the `resume` export. Returns once the
    /// guest yields back to the host.
    fn resume(&mut self) -> Result<()>;

    /// Write to a file descriptor. Only fd 1 and fd 2 are valid.
    fn write(&mut self, fd: i64, buf: &[u8]) -> Result<usize> {
        match fd {
            1 => {
                std::io::stdout().write_all(buf)?;
                Ok(buf.len())
            }
            2 => {
                std::io::stderr().write_all(buf)?;
                Ok(buf.len())
            }
            _ => Err(Error::InvalidFd(fd)),
        }
    }

    /// Called when the guest program exits.
    fn exit(&mut self, _code: i32) {}

    /// Dispatch a waPC host call. The default keeps the `wapc` namespace
    /// answering `__host_call` with an error tuple.
    fn host_call(
        &mut self,
        _binding: &str,
        _namespace: &str,
        _operation: &str,
        _payload: &[u8],
    ) -> Result<Vec<u8>> {
        Err(Error::NotImplemented)
    }
}
