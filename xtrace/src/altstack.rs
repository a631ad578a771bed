/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! A bigger alternate signal stack. Formatting a trace line from inside a
//! signal handler needs more room than the default one gives us.

use syscalls::Errno;

use crate::error::Error;
use crate::patch::page_size;

/// Size of the alternate signal stack installed at setup.
pub const ALT_STACK_SIZE: usize = 16 * 1024;

/// An installed alternate signal stack with an inaccessible guard page below
/// it. The mapping is never freed; it is in use for the rest of the thread's
/// life.
#[derive(Debug, Clone, Copy)]
pub struct AltStack {
    base: usize,
    size: usize,
}

impl AltStack {
    /// Lowest usable address.
    pub fn base(&self) -> usize {
        self.base
    }

    pub fn size(&self) -> usize {
        self.size
    }
}

/// Allocates `size` bytes plus a guard page and installs them as the calling
/// thread's alternate signal stack.
pub fn install(size: usize) -> Result<AltStack, Error> {
    let guard = page_size();

    let map = unsafe {
        libc::mmap(
            core::ptr::null_mut(),
            size + guard,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
            -1,
            0,
        )
    };
    if map == libc::MAP_FAILED {
        return Err(Error::AltStackAlloc(Errno::last()));
    }

    // Stacks grow down, so an overflow runs into the guard page.
    if unsafe { libc::mprotect(map, guard, libc::PROT_NONE) } != 0 {
        return Err(Error::AltStackAlloc(Errno::last()));
    }

    let base = map as usize + guard;
    let stack = libc::stack_t {
        ss_sp: base as *mut libc::c_void,
        ss_flags: 0,
        ss_size: size,
    };

    if unsafe { libc::sigaltstack(&stack, core::ptr::null_mut()) } != 0 {
        return Err(Error::AltStackInstall(Errno::last()));
    }

    Ok(AltStack { base, size })
}

#[cfg(feature = "darling")]
extern "C" {
    fn _sigaltstack_set_default_size_for_xtrace(size: libc::size_t) -> libc::c_int;
}

/// Makes `size` the alternate signal stack size for threads created from now
/// on. `set` returns a negated errno on failure.
pub fn set_default_size_with<F>(size: usize, set: F) -> Result<(), Error>
where
    F: FnOnce(usize) -> libc::c_int,
{
    match set(size) {
        ret if ret < 0 => Err(Error::AltStackDefaultSize(Errno::new(-ret))),
        _ => Ok(()),
    }
}

/// Sets the alternate signal stack size the compatibility layer gives every
/// new thread.
#[cfg(feature = "darling")]
pub fn set_default_size(size: usize) -> Result<(), Error> {
    set_default_size_with(size, |size| unsafe {
        _sigaltstack_set_default_size_for_xtrace(size as libc::size_t)
    })
}
