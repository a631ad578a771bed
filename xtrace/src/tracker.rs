/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Per-thread bookkeeping of calls that have been entered but not exited yet.

use crate::error::Error;

/// Maximum nesting depth tracked per thread.
pub const CAPACITY: usize = 64;

/// Result of a tracked entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Entered {
    /// Depth of the new call. Zero for an outermost call.
    pub level: usize,

    /// True if the last event on this thread was also an entry, so its line
    /// is still waiting for an exit.
    pub interleaved: bool,
}

/// Result of a tracked exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Exited {
    /// Call number recorded by the matching entry.
    pub nr: i32,

    /// Depth of the call that exited.
    pub level: usize,

    /// True if the last event on this thread was also an exit. The entry line
    /// of this call was flushed long ago and can't be completed.
    pub after_exit: bool,
}

#[derive(Debug, Clone)]
pub struct NestedCalls {
    /// Number of calls entered but not exited.
    current_level: usize,

    /// `current_level` before the last event was processed.
    previous_level: usize,

    /// Call numbers, indexed by level.
    nrs: [i32; CAPACITY],

    /// Entries rejected for being nested too deep. Their exits are swallowed
    /// before anything is popped off `nrs`.
    rejected: usize,
}

impl Default for NestedCalls {
    fn default() -> Self {
        Self::new()
    }
}

impl NestedCalls {
    pub const fn new() -> Self {
        Self {
            current_level: 0,
            previous_level: 0,
            nrs: [0; CAPACITY],
            rejected: 0,
        }
    }

    pub fn depth(&self) -> usize {
        self.current_level
    }

    pub fn rejected(&self) -> usize {
        self.rejected
    }

    /// Records the entry of call `nr`.
    pub fn enter(&mut self, nr: i32) -> Result<Entered, Error> {
        if self.rejected > 0 || self.current_level == CAPACITY {
            self.rejected += 1;
            return Err(Error::NestingTooDeep(CAPACITY));
        }

        let level = self.current_level;
        let interleaved = self.previous_level < level;

        self.nrs[level] = nr;
        self.previous_level = level;
        self.current_level += 1;

        Ok(Entered { level, interleaved })
    }

    /// Records an exit and returns the call it belongs to.
    pub fn exit(&mut self) -> Result<Exited, Error> {
        if self.rejected > 0 {
            self.rejected -= 1;
            return Err(Error::NestingTooDeep(CAPACITY));
        }

        if self.current_level == 0 {
            return Err(Error::UnmatchedExit);
        }

        let after_exit = self.previous_level > self.current_level;

        self.previous_level = self.current_level;
        self.current_level -= 1;

        Ok(Exited {
            nr: self.nrs[self.current_level],
            level: self.current_level,
            after_exit,
        })
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }
}
