/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Hooks run on thread exit, on `execve` and in the child after a fork.

use core::cell::RefCell;

use crate::config::Config;
use crate::env::propagate;
use crate::env::CStringArray;
use crate::env::EnvBlock;
use crate::runtime;
use crate::sink;

thread_local! {
    /// The environment handed to the last `execve` of this thread. It has to
    /// outlive the call, which doesn't return if it succeeds.
    static INJECTED_ENV: RefCell<Option<CStringArray>> = const { RefCell::new(None) };
}

/// Releases everything the tracer holds for the calling thread.
pub fn thread_exit() {
    sink::close_thread_log();
    runtime::with_thread(|thread| thread.reset());
    let _ = INJECTED_ENV.try_with(|env| env.borrow_mut().take());
}

/// Fixes up the calling thread after `fork`, in the child.
///
/// A per-thread log file inherited from the parent is named after the parent's
/// thread, so it is dropped and the child opens its own on the next write.
pub fn postfork_child(config: &Config) {
    if config.uses_per_thread_log() {
        sink::close_thread_log();
    }
}

/// Rewrites the environment at `*envp_ptr` so that the exec'd image is traced
/// the same way, and points `*envp_ptr` at the result.
///
/// # Safety
///
/// `envp_ptr` must be valid for reads and writes, and `*envp_ptr` must be null
/// or a null-terminated array of C strings.
pub unsafe fn execve_inject(config: &Config, envp_ptr: *mut *const *const libc::c_char) {
    if envp_ptr.is_null() {
        return;
    }

    let mut env = EnvBlock::from_ptr(*envp_ptr);
    propagate(config, &mut env);
    let array = env.array();

    // The caller's array may be one we injected earlier, so it is only
    // replaced after it has been read.
    let _ = INJECTED_ENV.try_with(|slot| {
        *envp_ptr = array.as_ptr();
        slot.borrow_mut().replace(array);
    });
}

#[no_mangle]
pub extern "C" fn xtrace_thread_exit_hook() {
    thread_exit();
}

/// # Safety
///
/// See [`execve_inject`].
#[no_mangle]
pub unsafe extern "C" fn xtrace_execve_inject_hook(envp_ptr: *mut *const *const libc::c_char) {
    if let Some(config) = runtime::config() {
        execve_inject(config, envp_ptr);
    }
}

#[no_mangle]
pub extern "C" fn xtrace_postfork_child_hook() {
    if let Some(config) = runtime::config() {
        postfork_child(config);
    }
}
