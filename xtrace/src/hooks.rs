/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! The hook sites exported by the dispatch library.
//!
//! The call dispatch code reserves a region of `nop`s in front of and behind
//! every translated call. Those regions get a call to one of the
//! [trampolines](crate::trampoline).
//!
//! The three auxiliary sites are the first bytes of empty functions. Those
//! get a jump straight to the Rust hook, which then returns to their caller.

use crate::error::Error;
use crate::lifecycle;
use crate::patch;
use crate::patch::HookEncoder;
use crate::patch::HookKind;
use crate::patch::HookRegion;
use crate::patch::Native;
use crate::trampoline::xtrace_bsd_entry_trampoline;
use crate::trampoline::xtrace_bsd_exit_trampoline;
use crate::trampoline::xtrace_mach_entry_trampoline;
use crate::trampoline::xtrace_mach_exit_trampoline;

#[cfg(not(target_arch = "x86_64"))]
compile_error!("call hooks are only available on x86_64");

extern "C" {
    static _darling_mach_syscall_entry: *mut u8;
    static _darling_mach_syscall_exit: *mut u8;
    static _darling_bsd_syscall_entry: *mut u8;
    static _darling_bsd_syscall_exit: *mut u8;

    fn _xtrace_thread_exit();
    fn _xtrace_execve_inject(envp_ptr: *mut *const *const libc::c_char);
    fn _xtrace_postfork_child();
}

/// A patchable region together with what it gets pointed at.
#[derive(Debug, Clone, Copy)]
pub struct HookSite {
    pub name: &'static str,
    pub region: HookRegion,
    pub handler: usize,
    pub kind: HookKind,
}

impl HookSite {
    /// # Safety
    ///
    /// `addr` must be the start of a reserved hook region of at least
    /// [`Native::HOOK_SIZE`] bytes.
    unsafe fn new(name: &'static str, addr: *mut u8, handler: usize, kind: HookKind) -> Self {
        Self {
            name,
            region: HookRegion::from_raw(addr, Native::HOOK_SIZE),
            handler,
            kind,
        }
    }
}

/// Points every hook site of the dispatch library at the tracer.
///
/// # Safety
///
/// Must run while the process is still single-threaded, and only once.
pub unsafe fn install_all() -> Result<(), Error> {
    let pairs = [
        (
            HookSite::new(
                "mach entry",
                _darling_mach_syscall_entry,
                xtrace_mach_entry_trampoline as usize,
                HookKind::Call,
            ),
            HookSite::new(
                "mach exit",
                _darling_mach_syscall_exit,
                xtrace_mach_exit_trampoline as usize,
                HookKind::Call,
            ),
        ),
        (
            HookSite::new(
                "bsd entry",
                _darling_bsd_syscall_entry,
                xtrace_bsd_entry_trampoline as usize,
                HookKind::Call,
            ),
            HookSite::new(
                "bsd exit",
                _darling_bsd_syscall_exit,
                xtrace_bsd_exit_trampoline as usize,
                HookKind::Call,
            ),
        ),
    ];

    for (entry, exit) in &pairs {
        patch::patch_pair::<Native>(&entry.region, entry.handler, &exit.region, exit.handler)?;
        tracing::debug!(
            entry = entry.region.addr(),
            exit = exit.region.addr(),
            "patched {} and {}",
            entry.name,
            exit.name
        );
    }

    let misc = [
        HookSite::new(
            "thread exit",
            _xtrace_thread_exit as *mut u8,
            lifecycle::xtrace_thread_exit_hook as usize,
            HookKind::Jump,
        ),
        HookSite::new(
            "execve inject",
            _xtrace_execve_inject as *mut u8,
            lifecycle::xtrace_execve_inject_hook as usize,
            HookKind::Jump,
        ),
        HookSite::new(
            "postfork child",
            _xtrace_postfork_child as *mut u8,
            lifecycle::xtrace_postfork_child_hook as usize,
            HookKind::Jump,
        ),
    ];

    for site in &misc {
        patch::patch::<Native>(&site.region, site.handler, site.kind)?;
        tracing::debug!(addr = site.region.addr(), "patched {}", site.name);
    }

    Ok(())
}
