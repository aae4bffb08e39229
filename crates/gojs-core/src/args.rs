//! Argv/envp image for the guest's `run(argc, argv)` entry point.

use crate::{Error, Memory, Result};

/// Offset at which the string area starts.
const ARGS_OFFSET: u32 = 4096;

/// The argv area must stay below this offset.
const ARGS_LIMIT: u32 = ARGS_OFFSET + 8192;

fn align8(offset: u32) -> u32 {
    (offset + 7) & !7
}

/// Writes the command-line arguments and environment variables into guest
/// memory and returns `(argc, argv)` for the `run` export.
///
/// Strings are written NUL-terminated starting at offset 4096, each
/// allocation rounded up to an 8-byte boundary. The pointer table follows:
/// one 8-byte entry per string (u32 pointer, u32 zero), with a zero entry
/// terminating the argument pointers and another terminating the environment
/// pointers. Environment variables are passed as `KEY=VALUE` strings.
pub fn write_args(mem: &mut Memory, args: &[&str], envs: &[&str]) -> Result<(u32, u32)> {
    let mut offset = ARGS_OFFSET;

    let mut str_ptr = |mem: &mut Memory, s: &str| -> Result<u32> {
        let ptr = offset;
        let bytes = s.as_bytes();
        let end = offset as u64 + bytes.len() as u64 + 1;
        if end > ARGS_LIMIT as u64 {
            return Err(Error::ArgsTooLarge);
        }

        mem.range_mut(offset, bytes.len() as u32)?.copy_from_slice(bytes);
        mem.set_u8(offset + bytes.len() as u32, 0)?;
        offset = align8(offset + bytes.len() as u32 + 1);

        Ok(ptr)
    };

    let mut ptrs = Vec::with_capacity(args.len() + envs.len() + 2);
    for &arg in args {
        ptrs.push(str_ptr(mem, arg)?);
    }
    ptrs.push(0);

    for &env in envs {
        ptrs.push(str_ptr(mem, env)?);
    }
    ptrs.push(0);

    let argv = align8(offset);
    let mut table = argv;
    for ptr in ptrs {
        if table as u64 + 8 > ARGS_LIMIT as u64 {
            return Err(Error::ArgsTooLarge);
        }

        mem.set_u32(table, ptr)?;
        mem.set_u32(table + 4, 0)?;
        table += 8;
    }

    Ok((args.len() as u32, argv))
}
