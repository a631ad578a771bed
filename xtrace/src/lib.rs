/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! A call tracer that is loaded into a process and hooks itself into the
//! call dispatch code of the compatibility layer.
//!
//! Every translated mach trap and bsd syscall is reported as a line like
//!
//! ```text
//! [1234] open("/etc/hosts", 0x0, 0) -> 3
//! ```
//!
//! The tracer never changes what a call does. It only watches.
//!
//! # Configuration
//!
//! Everything is read from the environment once at startup:
//!
//! - `XTRACE_LOG_FILE`: write to this file instead of stdout.
//! - `XTRACE_LOG_FILE_PER_THREAD`: write to `<XTRACE_LOG_FILE>.<tid>` instead.
//! - `XTRACE_SPLIT_ENTRY_AND_EXIT`: put entries and exits on separate lines.
//! - `XTRACE_NO_COLOR`: don't color the output.
//! - `XTRACE_KPRINTF`: write to the kernel log.
//!
//! The settings are handed down to every image started with `execve`.

pub mod altstack;
pub mod calls;
pub mod config;
pub mod env;
pub mod error;
#[cfg(feature = "darling")]
pub mod hooks;
pub mod lifecycle;
pub mod patch;
pub mod render;
pub mod runtime;
pub mod sink;
pub mod tracer;
pub mod tracker;
#[cfg(target_arch = "x86_64")]
pub mod trampoline;

pub use calls::CallClass;
pub use calls::CallDef;
pub use calls::CallDefs;
pub use calls::CallTable;
pub use config::Config;
pub use error::Error;

#[global_allocator]
static GLOBAL_ALLOCATOR: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[cfg(all(feature = "darling", not(test)))]
#[link_section = ".init_array"]
#[used]
static XTRACE_CTOR: extern "C" fn() = {
    extern "C" fn xtrace_ctor() {
        runtime::setup();
    }
    xtrace_ctor
};
