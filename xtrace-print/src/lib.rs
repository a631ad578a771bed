/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Provides helpers for writing formatted messages straight to file
//! descriptors with the `write` syscall.
//!
//! The tracer runs inside the traced program, in the middle of its syscalls.
//! Going through `std::io` there would share locks and buffers with the
//! program, so everything here is formatted into a fixed-size stack buffer
//! first. Output that does not fit is dropped.

use core::fmt;
use core::fmt::Write;

use syscalls::syscall3;
use syscalls::Errno;
use syscalls::Sysno;

/// Default capacity of a formatted write.
pub const LINE_CAPACITY: usize = 512;

pub const STDOUT_FILENO: i32 = 1;
pub const STDERR_FILENO: i32 = 2;

#[inline(always)]
fn sys_write(fd: i32, buf: &[u8]) -> Result<usize, Errno> {
    unsafe { syscall3(Sysno::write, fd as usize, buf.as_ptr() as usize, buf.len()) }
}

/// Writes all of `buf` to `fd`, retrying on `EINTR` and short writes.
pub fn write_all(fd: i32, mut buf: &[u8]) -> Result<(), Errno> {
    while !buf.is_empty() {
        match sys_write(fd, buf) {
            Ok(0) => return Err(Errno::EIO),
            Ok(n) => buf = &buf[n..],
            Err(Errno::EINTR) => continue,
            Err(errno) => return Err(errno),
        }
    }
    Ok(())
}

/// A fixed-capacity formatting buffer. Unlike a `Vec`, it never allocates and
/// never fails: once it is full, further writes are silently truncated.
pub struct Bounded<const N: usize = LINE_CAPACITY> {
    buf: [u8; N],
    len: usize,
}

impl<const N: usize> Bounded<N> {
    pub const fn new() -> Self {
        Self { buf: [0; N], len: 0 }
    }

    /// Appends as much of `bytes` as still fits.
    pub fn push_bytes(&mut self, bytes: &[u8]) {
        let remaining = &mut self.buf[self.len..];
        let count = remaining.len().min(bytes.len());
        remaining[..count].copy_from_slice(&bytes[..count]);
        self.len += count;
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn clear(&mut self) {
        self.len = 0;
    }

    /// Writes the buffered bytes to `fd`.
    pub fn flush_to(&self, fd: i32) -> Result<(), Errno> {
        write_all(fd, self.as_bytes())
    }
}

impl<const N: usize> Default for Bounded<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> fmt::Write for Bounded<N> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.push_bytes(s.as_bytes());
        Ok(())
    }
}

fn _inner_print(fd: i32, args: fmt::Arguments<'_>) -> Result<(), Errno> {
    let mut f = Bounded::<LINE_CAPACITY>::new();
    let _ = f.write_fmt(args);
    let _ = f.write_str("\n");
    f.flush_to(fd)
}

#[doc(hidden)]
pub fn _eprintln(args: fmt::Arguments<'_>) {
    // Ignore the error.
    let _ = _inner_print(STDERR_FILENO, args);
}

/// Like `std::eprintln!`, but with a single raw `write` of at most
/// [`LINE_CAPACITY`] bytes.
#[macro_export]
macro_rules! eprintln {
    () => ($crate::_eprintln(::core::format_args!("")));
    ($($arg:tt)*) => ({
        // Purposefully avoiding format_args_nl because it requires a nightly
        // feature.
        $crate::_eprintln(::core::format_args!($($arg)*));
    })
}
