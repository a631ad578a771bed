/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Turns entry and exit events into trace lines.

use crate::calls::CallClass;
use crate::calls::CallTable;
use crate::calls::MAX_ARGS;
use crate::config::Config;
use crate::error::Error;
use crate::render::Renderer;
use crate::tracker::NestedCalls;

/// Somewhere to put finished lines. Lines don't carry a trailing newline.
pub trait LineSink {
    fn write_line(&mut self, line: &str);
}

impl LineSink for Vec<String> {
    fn write_line(&mut self, line: &str) {
        self.push(line.to_owned());
    }
}

/// Per-thread tracing state: the nested-call tracker and the line being built.
#[derive(Debug, Default)]
pub struct ThreadTrace {
    pub calls: NestedCalls,
    pub line: String,
}

impl ThreadTrace {
    pub const fn new() -> Self {
        Self {
            calls: NestedCalls::new(),
            line: String::new(),
        }
    }

    pub fn reset(&mut self) {
        self.calls.reset();
        self.line.clear();
    }

    fn flush<S: LineSink>(&mut self, sink: &mut S) {
        sink.write_line(&self.line);
        self.line.clear();
    }
}

/// The call descriptor tables of both call classes.
#[derive(Clone, Copy)]
pub struct CallTables<'a> {
    pub mach: &'a dyn CallTable,
    pub bsd: &'a dyn CallTable,
}

impl<'a> CallTables<'a> {
    pub fn get(&self, class: CallClass) -> &'a dyn CallTable {
        match class {
            CallClass::Mach => self.mach,
            CallClass::Bsd => self.bsd,
        }
    }
}

pub struct Tracer<'a> {
    split: bool,
    renderer: Renderer,
    tables: CallTables<'a>,
}

impl<'a> Tracer<'a> {
    pub fn new(config: &Config, tables: CallTables<'a>) -> Self {
        Self {
            split: config.split_entry_and_exit,
            renderer: Renderer::new(config),
            tables,
        }
    }

    /// Handles the entry of call `nr`.
    ///
    /// Without split mode, the line stays in the buffer waiting for the exit.
    /// If another entry arrives first, the pending line is flushed as it is
    /// and the new call starts its own line.
    #[allow(clippy::too_many_arguments)]
    pub fn entry<S: LineSink>(
        &self,
        thread: &mut ThreadTrace,
        sink: &mut S,
        tid: u32,
        class: CallClass,
        nr: i32,
        args: &[usize; MAX_ARGS],
    ) -> Result<(), Error> {
        let entered = thread.calls.enter(nr)?;

        if entered.interleaved && !self.split && !thread.line.is_empty() {
            thread.flush(sink);
        }

        let def = self.tables.get(class).lookup(nr);

        self.renderer
            .call_header(&mut thread.line, def, class, nr, tid, entered.level, false);
        self.renderer.args(&mut thread.line, def, nr, args);

        if self.split {
            thread.flush(sink);
        }

        Ok(())
    }

    /// Handles the exit of the innermost pending call. The exit always
    /// finishes the line.
    ///
    /// With `force_split`, or when the entry line has already been flushed,
    /// the call header is printed again on a fresh line.
    pub fn exit<S: LineSink>(
        &self,
        thread: &mut ThreadTrace,
        sink: &mut S,
        tid: u32,
        class: CallClass,
        retval: usize,
        force_split: bool,
    ) -> Result<(), Error> {
        let exited = thread.calls.exit()?;
        let def = self.tables.get(class).lookup(exited.nr);

        if self.split || force_split || exited.after_exit {
            // Whatever is pending belongs to some other call.
            if !thread.line.is_empty() {
                thread.flush(sink);
            }
            self.renderer
                .call_header(&mut thread.line, def, class, exited.nr, tid, exited.level, true);
        }

        self.renderer.retval(&mut thread.line, def, exited.nr, retval);
        thread.flush(sink);

        Ok(())
    }
}
