/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Call descriptors: how to name a call and print its arguments and return
//! value. The tables themselves are provided by whoever embeds the tracer.

use core::fmt::Write;

use syscalls::Errno;

/// Number of argument registers handed to the entry handler.
pub const MAX_ARGS: usize = 6;

/// Appends the formatted arguments of call `nr` to the line.
pub type ArgPrinter = fn(log: &mut String, nr: i32, args: &[usize; MAX_ARGS]);

/// Appends the formatted return value of call `nr` to the line.
pub type RetvalPrinter = fn(log: &mut String, nr: i32, retval: usize);

/// Translates an error code from the host ABI to the foreign ABI.
pub type ErrnoMap = fn(i32) -> i32;

/// The two classes of traced calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallClass {
    Mach,
    Bsd,
}

impl CallClass {
    /// Label used when a call has no name.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Mach => "mach",
            Self::Bsd => "bsd",
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CallDef {
    pub name: Option<&'static str>,
    pub print_args: Option<ArgPrinter>,
    pub print_retval: Option<RetvalPrinter>,
}

impl CallDef {
    /// A slot with no information, rendered with the numeric fallback.
    pub const UNKNOWN: CallDef = CallDef {
        name: None,
        print_args: None,
        print_retval: None,
    };

    pub const fn named(name: &'static str) -> Self {
        Self {
            name: Some(name),
            print_args: None,
            print_retval: None,
        }
    }

    pub const fn with_args(mut self, printer: ArgPrinter) -> Self {
        self.print_args = Some(printer);
        self
    }

    pub const fn with_retval(mut self, printer: RetvalPrinter) -> Self {
        self.print_retval = Some(printer);
        self
    }
}

/// Lookup from call number to descriptor.
pub trait CallTable: Sync {
    fn lookup(&self, nr: i32) -> Option<&CallDef>;
}

/// A table stored as a slice indexed by call number.
#[derive(Debug, Clone, Copy)]
pub struct CallDefs<'a>(pub &'a [CallDef]);

impl CallTable for CallDefs<'_> {
    fn lookup(&self, nr: i32) -> Option<&CallDef> {
        usize::try_from(nr).ok().and_then(|i| self.0.get(i))
    }
}

/// A table that knows no calls.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCalls;

impl CallTable for NoCalls {
    fn lookup(&self, _nr: i32) -> Option<&CallDef> {
        None
    }
}

/// Prints a return value the way most syscalls want it: errors as the
/// foreign-ABI errno with its name, everything else in decimal.
///
/// `retval` is a raw host return value, so errors are `-errno`.
pub fn print_errno_or_decimal(log: &mut String, retval: usize, map: ErrnoMap) {
    let value = retval as isize;

    if (-4095..0).contains(&value) {
        let errno = -value as i32;
        let name = Errno::new(errno).name().unwrap_or("E???");
        let _ = write!(log, "-{} {}", map(errno), name);
    } else {
        let _ = write!(log, "{}", value);
    }
}

/// Prints arguments as a comma-separated list of hexadecimal words.
pub fn print_hex_args(log: &mut String, count: usize, args: &[usize; MAX_ARGS]) {
    for (i, arg) in args.iter().take(count).enumerate() {
        if i > 0 {
            log.push_str(", ");
        }
        let _ = write!(log, "0x{:x}", arg);
    }
}
