//! Test fixtures: an in-process engine adapter over an owned memory block.

use gojs_core::{Error, Memory, Result};

use crate::instance::Instance;

/// An adapter backed by a plain [`Memory`] with scripted exports.
///
/// `get_sp` always answers with the configured `sp`, `resume` only counts
/// invocations, writes to fd 1/2 are captured, and `host_call` records its
/// arguments and answers `host_response` (or `NotImplemented` when unset).
pub(crate) struct MockInstance {
    pub mem: Memory,
    pub sp: u32,
    pub resumes: u32,
    pub writes: Vec<(i64, Vec<u8>)>,
    pub exit_code: Option<i32>,
    pub host_calls: Vec<(String, String, String, Vec<u8>)>,
    pub host_response: Option<Vec<u8>>,
}

impl MockInstance {
    pub fn new() -> Self {
        Self {
            mem: Memory::new(1 << 16),
            sp: 0,
            resumes: 0,
            writes: Vec::new(),
            exit_code: None,
            host_calls: Vec::new(),
            host_response: None,
        }
    }
}

impl Instance for MockInstance {
    fn mem(&self, offset: u32, length: u32) -> Result<&[u8]> {
        self.mem.range(offset, length)
    }

    fn mem_mut(&mut self, offset: u32, length: u32) -> Result<&mut [u8]> {
        self.mem.range_mut(offset, length)
    }

    fn get_u32(&self, offset: u32) -> Result<u32> {
        self.mem.get_u32(offset)
    }

    fn get_i64(&self, offset: u32) -> Result<i64> {
        self.mem.get_i64(offset)
    }

    fn get_f64(&self, offset: u32) -> Result<f64> {
        self.mem.get_f64(offset)
    }

    fn set_u8(&mut self, offset: u32, val: u8) -> Result<()> {
        self.mem.set_u8(offset, val)
    }

    fn set_u32(&mut self, offset: u32, val: u32) -> Result<()> {
        self.mem.set_u32(offset, val)
    }

    fn set_i64(&mut self, offset: u32, val: i64) -> Result<()> {
        self.mem.set_i64(offset, val)
    }

    fn set_f64(&mut self, offset: u32, val: f64) -> Result<()> {
        self.mem.set_f64(offset, val)
    }

    fn get_sp(&mut self) -> Result<u32> {
        Ok(self.sp)
    }

    fn resume(&mut self) -> Result<()> {
        self.resumes += 1;
        Ok(())
    }

    fn write(&mut self, fd: i64, buf: &[u8]) -> Result<usize> {
        match fd {
            1 | 2 => {
                self.writes.push((fd, buf.to_vec()));
                Ok(buf.len())
            }
            _ => Err(Error::InvalidFd(fd)),
        }
    }

    fn exit(&mut self, code: i32) {
        self.exit_code = Some(code);
    }

    fn host_call(
        &mut self,
        binding: &str,
        namespace: &str,
        operation: &str,
        payload: &[u8],
    ) -> Result<Vec<u8>> {
        self.host_calls.push((
            binding.to_owned(),
            namespace.to_owned(),
            operation.to_owned(),
            payload.to_vec(),
        ));

        match &self.host_response {
            Some(response) => Ok(response.clone()),
            None => Err(Error::NotImplemented),
        }
    }
}
