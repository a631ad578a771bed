/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

use std::io;
use std::path::PathBuf;

use syscalls::Errno;
use thiserror::Error;

/// Everything that can go wrong inside the tracer.
///
/// Setup errors (patching, the alternate signal stack and opening log files)
/// are fatal and go through [`fatal`]. The tracking errors are reported by the
/// call handlers and then dropped, since the traced call must go on
/// regardless.
#[derive(Debug, Error)]
pub enum Error {
    #[error("hook region of {len} bytes cannot hold a {needed} byte sequence")]
    HookTooSmall { len: usize, needed: usize },

    #[error("handler address {0:#x} does not fit the hook encoding")]
    HandlerOutOfRange(u64),

    #[error("failed to change protection of hook pages at {addr:#x}: {errno}")]
    Protect { addr: usize, errno: Errno },

    #[error("failed to allocate larger sigstack for main thread: {0}")]
    AltStackAlloc(Errno),

    #[error("failed to override sigaltstack: {0}")]
    AltStackInstall(Errno),

    #[error("failed to set default sigstack size: {0}")]
    AltStackDefaultSize(Errno),

    #[error("failed to open logfile {path}: {source}")]
    OpenLog { path: PathBuf, source: io::Error },

    #[error("call nesting deeper than {0} levels")]
    NestingTooDeep(usize),

    #[error("call exit without a matching entry")]
    UnmatchedExit,
}

/// Aborts the process after printing the error to stderr.
///
/// Used for failures during setup: a tracer that is only half installed
/// produces traces that silently miss calls.
#[cold]
pub fn fatal(err: &Error) -> ! {
    xtrace_print::eprintln!("xtrace: {}", err);
    std::process::abort()
}
