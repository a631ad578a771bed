/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Builds trace lines.
//!
//! A line looks like `[<tid>] <indent><name>(<args>) -> <retval>`. The thread
//! prefix, the call name of a split exit and the arrow are printed gray unless
//! color is turned off.

use core::fmt::Write;

use colored::Colorize;

use crate::calls::CallClass;
use crate::calls::CallDef;
use crate::calls::MAX_ARGS;
use crate::config::Config;

/// Spaces of indentation per nesting level.
pub const INDENT_PER_LEVEL: usize = 4;

#[derive(Debug, Clone, Copy)]
pub struct Palette {
    color: bool,
}

impl Palette {
    pub fn new(config: &Config) -> Self {
        let color = !config.no_color;
        if color {
            // The traced program's stdout says nothing about where the trace
            // ends up, so don't let `colored` second-guess the configuration.
            colored::control::set_override(true);
        }
        Self { color }
    }

    /// Appends `text`, gray if color is enabled.
    pub fn gray(&self, log: &mut String, text: &str) {
        if self.color {
            let _ = write!(log, "{}", text.white());
        } else {
            log.push_str(text);
        }
    }
}

/// Renders the pieces of a trace line into a line buffer.
#[derive(Debug, Clone, Copy)]
pub struct Renderer {
    palette: Palette,
}

impl Renderer {
    pub fn new(config: &Config) -> Self {
        Self {
            palette: Palette::new(config),
        }
    }

    /// `[<tid>]` followed by one space plus `indent` spaces.
    pub fn start_line(&self, log: &mut String, tid: u32, indent: usize) {
        let mut prefix = String::with_capacity(16 + indent);
        let _ = write!(prefix, "[{}]", tid);
        prefix.extend(core::iter::repeat(' ').take(indent + 1));
        self.palette.gray(log, &prefix);
    }

    /// Starts a line and appends the call's name, or `<class> <nr>` when the
    /// call has none. With `gray_name`, the name and the `()` that follows it
    /// are gray; this is how the exit half of a split call is printed.
    #[allow(clippy::too_many_arguments)]
    pub fn call_header(
        &self,
        log: &mut String,
        def: Option<&CallDef>,
        class: CallClass,
        nr: i32,
        tid: u32,
        level: usize,
        gray_name: bool,
    ) {
        self.start_line(log, tid, INDENT_PER_LEVEL * level);

        let name = match def.and_then(|def| def.name) {
            Some(name) => name.to_owned(),
            None => format!("{} {}", class.label(), nr),
        };

        if gray_name {
            self.palette.gray(log, &format!("{}()", name));
        } else {
            log.push_str(&name);
        }
    }

    /// `(<args>)`, or `(...)` when there is no printer for them.
    pub fn args(&self, log: &mut String, def: Option<&CallDef>, nr: i32, args: &[usize; MAX_ARGS]) {
        match def.filter(|def| def.name.is_some()).and_then(|def| def.print_args) {
            Some(print_args) => {
                log.push('(');
                print_args(log, nr, args);
                log.push(')');
            }
            None => log.push_str("(...)"),
        }
    }

    /// ` -> <retval>`, using the raw value in hex when there is no printer.
    pub fn retval(&self, log: &mut String, def: Option<&CallDef>, nr: i32, retval: usize) {
        self.palette.gray(log, " -> ");

        match def
            .filter(|def| def.name.is_some())
            .and_then(|def| def.print_retval)
        {
            Some(print_retval) => print_retval(log, nr, retval),
            None => {
                let _ = write!(log, "0x{:x}", retval);
            }
        }
    }
}
