/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Tracer configuration, read once from the environment at startup.

use std::ffi::OsStr;
use std::ffi::OsString;
use std::os::unix::ffi::OsStrExt;
use std::path::PathBuf;

pub const LOG_FILE: &str = "XTRACE_LOG_FILE";
pub const SPLIT_ENTRY_AND_EXIT: &str = "XTRACE_SPLIT_ENTRY_AND_EXIT";
pub const NO_COLOR: &str = "XTRACE_NO_COLOR";
pub const KPRINTF: &str = "XTRACE_KPRINTF";
pub const LOG_FILE_PER_THREAD: &str = "XTRACE_LOG_FILE_PER_THREAD";

/// The variable the dynamic loader reads to force-load extra libraries.
pub const INSERT_LIBRARIES: &str = "DYLD_INSERT_LIBRARIES";

/// Where the tracer library is installed inside the prefix.
pub const DEFAULT_LIBRARY_PATH: &str = "/usr/lib/darling/libxtrace.dylib";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Print every entry and every exit as its own line.
    pub split_entry_and_exit: bool,

    /// Don't emit ANSI color codes.
    pub no_color: bool,

    /// Send output to the kernel log.
    pub kprintf: bool,

    /// Use `<log_file>.<tid>` instead of one shared file. Only meaningful when
    /// `log_file` is set.
    pub log_file_per_thread: bool,

    /// Base path of the log file(s). `None` logs to stdout.
    pub log_file: Option<PathBuf>,

    /// The tracer library injected into exec'd images.
    pub library_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            split_entry_and_exit: false,
            no_color: false,
            kprintf: false,
            log_file_per_thread: false,
            log_file: None,
            library_path: PathBuf::from(DEFAULT_LIBRARY_PATH),
        }
    }
}

/// A flag is set if its value starts with one of `1`, `T`, `t`, `Y` or `y`.
pub fn is_truthy(value: &OsStr) -> bool {
    matches!(
        value.as_bytes().first(),
        Some(b'1' | b'T' | b't' | b'Y' | b'y')
    )
}

impl Config {
    /// Reads the configuration from the process environment.
    pub fn from_env() -> Self {
        Self::from_vars(std::env::vars_os())
    }

    /// Reads the configuration from a list of variables. Unrelated variables
    /// are ignored. When a variable appears more than once, the first one
    /// wins, matching `getenv`.
    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<OsStr>,
        V: AsRef<OsStr>,
    {
        let mut config = Self::default();
        let mut seen = [false; 5];

        for (key, value) in vars {
            let value = value.as_ref();
            let slot = match key.as_ref().as_bytes() {
                b"XTRACE_SPLIT_ENTRY_AND_EXIT" => 0,
                b"XTRACE_NO_COLOR" => 1,
                b"XTRACE_KPRINTF" => 2,
                b"XTRACE_LOG_FILE_PER_THREAD" => 3,
                b"XTRACE_LOG_FILE" => 4,
                _ => continue,
            };

            if std::mem::replace(&mut seen[slot], true) {
                continue;
            }

            match slot {
                0 => config.split_entry_and_exit = is_truthy(value),
                1 => config.no_color = is_truthy(value),
                2 => config.kprintf = is_truthy(value),
                3 => config.log_file_per_thread = is_truthy(value),
                _ => {
                    config.log_file = (!value.is_empty()).then(|| PathBuf::from(value));
                }
            }
        }

        config
    }

    pub fn with_library_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.library_path = path.into();
        self
    }

    /// True if each thread writes to its own log file.
    pub fn uses_per_thread_log(&self) -> bool {
        self.log_file.is_some() && self.log_file_per_thread
    }

    /// The configuration as environment variables, the way a child process
    /// would need to see them to trace with the same settings.
    pub fn vars(&self) -> [(&'static str, OsString); 5] {
        fn flag(value: bool) -> OsString {
            OsString::from(if value { "1" } else { "0" })
        }

        [
            (SPLIT_ENTRY_AND_EXIT, flag(self.split_entry_and_exit)),
            (NO_COLOR, flag(self.no_color)),
            (KPRINTF, flag(self.kprintf)),
            (LOG_FILE_PER_THREAD, flag(self.log_file_per_thread)),
            (
                LOG_FILE,
                self.log_file
                    .as_ref()
                    .map(|path| path.as_os_str().to_owned())
                    .unwrap_or_default(),
            ),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthy_values() {
        for value in ["1", "T", "true", "t", "Y", "yes", "y"] {
            assert!(is_truthy(OsStr::new(value)), "{}", value);
        }

        for value in ["", "0", "false", "no", "N", " 1", "on"] {
            assert!(!is_truthy(OsStr::new(value)), "{}", value);
        }
    }

    #[test]
    fn from_vars() {
        let config = Config::from_vars([
            ("PATH", "/bin"),
            (SPLIT_ENTRY_AND_EXIT, "yes"),
            (NO_COLOR, "0"),
            (LOG_FILE, "/tmp/t.log"),
            (LOG_FILE_PER_THREAD, "True"),
        ]);

        assert!(config.split_entry_and_exit);
        assert!(!config.no_color);
        assert!(!config.kprintf);
        assert!(config.log_file_per_thread);
        assert_eq!(config.log_file, Some(PathBuf::from("/tmp/t.log")));
        assert!(config.uses_per_thread_log());
        assert_eq!(config.library_path, PathBuf::from(DEFAULT_LIBRARY_PATH));
    }

    #[test]
    fn empty_log_file_disables_file_logging() {
        let config = Config::from_vars([(LOG_FILE, ""), (LOG_FILE_PER_THREAD, "1")]);
        assert_eq!(config.log_file, None);
        assert!(!config.uses_per_thread_log());
    }

    #[test]
    fn first_occurrence_wins() {
        let config = Config::from_vars([(NO_COLOR, "1"), (NO_COLOR, "0")]);
        assert!(config.no_color);
    }

    #[test]
    fn vars_round_trip() {
        let config = Config {
            no_color: true,
            log_file: Some(PathBuf::from("/tmp/t.log")),
            ..Default::default()
        };

        let vars = config.vars();
        assert_eq!(vars[0], (SPLIT_ENTRY_AND_EXIT, OsString::from("0")));
        assert_eq!(vars[1], (NO_COLOR, OsString::from("1")));
        assert_eq!(vars[4], (LOG_FILE, OsString::from("/tmp/t.log")));

        assert_eq!(Config::from_vars(vars), config);
    }
}
