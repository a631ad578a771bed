/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Overwrites reserved no-op regions in the dispatch code with a short
//! sequence that loads a handler address into a scratch register and calls or
//! jumps to it.
//!
//! Patching happens once, during the single-threaded setup phase. Nothing here
//! synchronizes with other threads; the pages are briefly writable and no
//! other thread may run the patched code while that is the case.

mod aarch64;
mod x86;
mod x86_64;

pub use aarch64::Aarch64;
pub use x86::X86;
pub use x86_64::X86_64;

use syscalls::Errno;

use crate::error::Error;

/// The encoder for the architecture we are running on.
#[cfg(target_arch = "x86_64")]
pub type Native = X86_64;
#[cfg(target_arch = "x86")]
pub type Native = X86;
#[cfg(target_arch = "aarch64")]
pub type Native = Aarch64;

/// What happens after the handler returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookKind {
    /// Indirect call. The handler returns to the instruction right after the
    /// hook.
    Call,
    /// Indirect jump. The handler takes over the rest of the routine the hook
    /// was embedded in and returns to that routine's caller.
    Jump,
}

/// Encodes the instruction sequence written into a hook.
pub trait HookEncoder {
    /// Number of bytes the encoded sequence occupies.
    const HOOK_SIZE: usize;

    /// Encodes a load of `handler` followed by a call or jump through it.
    fn encode(handler: u64, kind: HookKind) -> Result<Vec<u8>, Error>;
}

/// A reserved region of code that can be overwritten.
#[derive(Debug, Clone, Copy)]
pub struct HookRegion {
    addr: *mut u8,
    len: usize,
}

unsafe impl Send for HookRegion {}

impl HookRegion {
    /// # Safety
    ///
    /// `addr..addr + len` must be a region of mapped code that nothing is
    /// executing, and that may be rewritten.
    pub unsafe fn from_raw(addr: *mut u8, len: usize) -> Self {
        Self { addr, len }
    }

    pub fn addr(&self) -> usize {
        self.addr as usize
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn end(&self) -> usize {
        self.addr() + self.len
    }
}

pub fn page_size() -> usize {
    unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
}

/// Returns the page-aligned `(start, len)` span covering all of `regions`.
pub fn page_span(regions: &[HookRegion], page_size: usize) -> (usize, usize) {
    let mask = !(page_size - 1);
    let start = regions.iter().map(HookRegion::addr).min().unwrap_or(0) & mask;
    let end = regions.iter().map(HookRegion::end).max().unwrap_or(0);
    let end = (end + page_size - 1) & mask;
    (start, end - start)
}

fn protect(addr: usize, len: usize, prot: libc::c_int) -> Result<(), Error> {
    let ret = unsafe { libc::mprotect(addr as *mut libc::c_void, len, prot) };
    if ret != 0 {
        return Err(Error::Protect {
            addr,
            errno: Errno::last(),
        });
    }
    Ok(())
}

/// Makes the pages covering `regions` writable, runs `f`, and then drops the
/// write permission again. The pages end up read+execute even if `f` fails,
/// so we never leave writable code behind.
pub fn with_writable_code<F>(regions: &[HookRegion], f: F) -> Result<(), Error>
where
    F: FnOnce() -> Result<(), Error>,
{
    let (start, len) = page_span(regions, page_size());

    protect(start, len, libc::PROT_READ | libc::PROT_WRITE | libc::PROT_EXEC)?;
    let result = f();
    protect(start, len, libc::PROT_READ | libc::PROT_EXEC)?;

    result
}

/// Writes the hook sequence into `region` without touching page protection.
///
/// # Safety
///
/// The region must currently be writable.
pub unsafe fn write_hook<E: HookEncoder>(
    region: &HookRegion,
    handler: usize,
    kind: HookKind,
) -> Result<(), Error> {
    let bytes = E::encode(handler as u64, kind)?;

    if bytes.len() > region.len {
        return Err(Error::HookTooSmall {
            len: region.len,
            needed: bytes.len(),
        });
    }

    core::ptr::copy_nonoverlapping(bytes.as_ptr(), region.addr, bytes.len());
    Ok(())
}

/// Patches a single region so that it calls or jumps to `handler`.
///
/// # Safety
///
/// See [`HookRegion::from_raw`]. `handler` must be a function that is safe to
/// enter from the hook's position.
pub unsafe fn patch<E: HookEncoder>(
    region: &HookRegion,
    handler: usize,
    kind: HookKind,
) -> Result<(), Error> {
    with_writable_code(core::slice::from_ref(region), || {
        write_hook::<E>(region, handler, kind)
    })
}

/// Patches an entry/exit pair with a single protection change. The two hooks
/// of a call class sit close together in the same dispatch routine.
///
/// # Safety
///
/// See [`patch`].
pub unsafe fn patch_pair<E: HookEncoder>(
    entry: &HookRegion,
    entry_handler: usize,
    exit: &HookRegion,
    exit_handler: usize,
) -> Result<(), Error> {
    with_writable_code(&[*entry, *exit], || {
        write_hook::<E>(entry, entry_handler, HookKind::Call)?;
        write_hook::<E>(exit, exit_handler, HookKind::Call)
    })
}
