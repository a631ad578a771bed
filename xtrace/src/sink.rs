/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Where trace lines go.
//!
//! Every line is formatted into a bounded buffer of
//! [`LINE_CAPACITY`](xtrace_print::LINE_CAPACITY) bytes and written with a
//! single raw `write`. Longer lines are cut short.

use core::cell::RefCell;
use core::fmt::Write;
use std::fs::File;
use std::fs::OpenOptions;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::path::Path;
use std::path::PathBuf;

use once_cell::sync::OnceCell;
use xtrace_print::Bounded;
use xtrace_print::STDERR_FILENO;
use xtrace_print::STDOUT_FILENO;

use crate::config::Config;
use crate::error::fatal;
use crate::error::Error;
use crate::tracer::LineSink;

/// Tag put in front of every line sent to the kernel log.
pub const KMSG_TAG: &str = "xtrace: ";

/// Where kernel log lines are written.
pub const KMSG_PATH: &str = "/dev/kmsg";

thread_local! {
    /// This thread's own log file when logging per thread.
    static THREAD_LOG: RefCell<Option<File>> = const { RefCell::new(None) };
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    /// The kernel log device, or stderr if it can't be opened.
    Kernel(PathBuf),
    /// One file shared by every thread of the process.
    Shared(PathBuf),
    /// `<base>.<tid>` for every thread.
    PerThread(PathBuf),
    /// stdout for the trace, stderr for errors.
    Console,
}

impl Destination {
    pub fn new(config: &Config) -> Self {
        if config.kprintf {
            return Self::Kernel(PathBuf::from(KMSG_PATH));
        }

        match &config.log_file {
            Some(base) if config.log_file_per_thread => Self::PerThread(base.clone()),
            Some(base) => Self::Shared(base.clone()),
            None => Self::Console,
        }
    }
}

/// Opens a log file for appending, creating it with mode 0644 if needed.
pub fn open_log(path: &Path) -> Result<File, Error> {
    OpenOptions::new()
        .append(true)
        .create(true)
        .mode(0o644)
        .custom_flags(libc::O_CLOEXEC)
        .open(path)
        .map_err(|source| Error::OpenLog {
            path: path.to_owned(),
            source,
        })
}

/// The path of the log file of thread `tid`.
pub fn per_thread_path(base: &Path, tid: u32) -> PathBuf {
    let mut path = base.as_os_str().to_owned();
    path.push(format!(".{}", tid));
    PathBuf::from(path)
}

/// A file opened at most once, by whichever thread gets there first.
#[derive(Debug, Default)]
pub struct SharedLog {
    file: OnceCell<File>,
}

impl SharedLog {
    pub const fn new() -> Self {
        Self {
            file: OnceCell::new(),
        }
    }

    /// Returns the file, calling `open` if it hasn't been opened yet. If
    /// several threads race here, `open` still runs only once.
    pub fn get_or_open<F>(&self, open: F) -> Result<&File, Error>
    where
        F: FnOnce() -> Result<File, Error>,
    {
        self.file.get_or_try_init(open)
    }

    pub fn get(&self) -> Option<&File> {
        self.file.get()
    }
}

/// True if this thread has its own log file open. Always false once the
/// thread's locals have been torn down.
pub fn thread_log_is_open() -> bool {
    THREAD_LOG
        .try_with(|log| log.borrow().is_some())
        .unwrap_or(false)
}

/// Closes this thread's own log file, if it has one.
pub fn close_thread_log() {
    let _ = THREAD_LOG.try_with(|log| log.borrow_mut().take());
}

#[derive(Debug)]
pub struct LogSink {
    destination: Destination,
    shared: SharedLog,
    kmsg: OnceCell<Option<File>>,
}

impl LogSink {
    pub fn new(config: &Config) -> Self {
        Self::with_destination(Destination::new(config))
    }

    pub fn with_destination(destination: Destination) -> Self {
        Self {
            destination,
            shared: SharedLog::new(),
            kmsg: OnceCell::new(),
        }
    }

    pub fn destination(&self) -> &Destination {
        &self.destination
    }

    /// Writes a trace line for thread `tid`. Failing to open the log file is
    /// fatal.
    pub fn log(&self, tid: u32, line: &str) {
        if let Err(err) = self.try_write(tid, line, STDOUT_FILENO) {
            fatal(&err);
        }
    }

    /// Writes an error line for thread `tid`. Same as [`LogSink::log`] except
    /// that the console fallback is stderr.
    pub fn error(&self, tid: u32, line: &str) {
        if let Err(err) = self.try_write(tid, line, STDERR_FILENO) {
            fatal(&err);
        }
    }

    /// Writes `line` followed by a newline to wherever this sink points.
    /// `console` is the descriptor used by [`Destination::Console`].
    pub fn try_write(&self, tid: u32, line: &str, console: i32) -> Result<(), Error> {
        let mut buf = Bounded::<{ xtrace_print::LINE_CAPACITY }>::new();

        match &self.destination {
            Destination::Kernel(path) => {
                let _ = writeln!(buf, "{}{}", KMSG_TAG, line);
                let _ = buf.flush_to(self.kmsg_fd(path));
            }
            Destination::Shared(path) => {
                let _ = writeln!(buf, "{}", line);
                let file = self.shared.get_or_open(|| open_log(path))?;
                let _ = buf.flush_to(file.as_raw_fd());
            }
            Destination::PerThread(base) => {
                let _ = writeln!(buf, "{}", line);
                // Calls traced from other thread-local destructors can arrive
                // after the file is gone. Those lines are dropped.
                let written = THREAD_LOG.try_with(|log| -> Result<(), Error> {
                    let mut log = log.borrow_mut();
                    if log.is_none() {
                        *log = Some(open_log(&per_thread_path(base, tid))?);
                    }
                    if let Some(file) = &*log {
                        let _ = buf.flush_to(file.as_raw_fd());
                    }
                    Ok(())
                });
                if let Ok(result) = written {
                    result?;
                }
            }
            Destination::Console => {
                let _ = writeln!(buf, "{}", line);
                let _ = buf.flush_to(console);
            }
        }

        Ok(())
    }

    /// The kernel log descriptor, opened on first use, or stderr.
    fn kmsg_fd(&self, path: &Path) -> i32 {
        let kmsg = self.kmsg.get_or_init(|| {
            OpenOptions::new()
                .write(true)
                .custom_flags(libc::O_CLOEXEC)
                .open(path)
                .ok()
        });

        match kmsg {
            Some(file) => file.as_raw_fd(),
            None => STDERR_FILENO,
        }
    }

    /// Binds the sink to a thread so the tracer can write lines through it.
    pub fn for_thread(&self, tid: u32) -> ThreadLog<'_> {
        ThreadLog { sink: self, tid }
    }
}

/// A [`LogSink`] bound to one thread.
#[derive(Debug, Clone, Copy)]
pub struct ThreadLog<'a> {
    sink: &'a LogSink,
    tid: u32,
}

impl LineSink for ThreadLog<'_> {
    fn write_line(&mut self, line: &str) {
        self.sink.log(self.tid, line);
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;
    use std::sync::Barrier;

    use super::*;

    fn config(log_file: Option<&Path>, per_thread: bool, kprintf: bool) -> Config {
        Config {
            log_file: log_file.map(Path::to_owned),
            log_file_per_thread: per_thread,
            kprintf,
            ..Default::default()
        }
    }

    #[test]
    fn destination_from_config() {
        let base = Path::new("/tmp/trace");

        assert_eq!(
            Destination::new(&config(None, false, false)),
            Destination::Console
        );
        assert_eq!(
            Destination::new(&config(None, true, false)),
            Destination::Console
        );
        assert_eq!(
            Destination::new(&config(Some(base), false, false)),
            Destination::Shared(base.to_owned())
        );
        assert_eq!(
            Destination::new(&config(Some(base), true, false)),
            Destination::PerThread(base.to_owned())
        );
        assert_eq!(
            Destination::new(&config(Some(base), true, true)),
            Destination::Kernel(PathBuf::from(KMSG_PATH))
        );
    }

    #[test]
    fn per_thread_file_names() {
        assert_eq!(
            per_thread_path(Path::new("/var/log/xtrace.log"), 4242),
            PathBuf::from("/var/log/xtrace.log.4242")
        );
    }

    #[test]
    fn shared_file_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trace.log");
        fs::write(&path, "old\n").unwrap();

        let sink = LogSink::new(&config(Some(&path), false, false));
        sink.log(1, "[1] first");
        sink.error(2, "[2] second");

        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "old\n[1] first\n[2] second\n"
        );
    }

    #[test]
    fn long_lines_are_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trace.log");

        let sink = LogSink::new(&config(Some(&path), false, false));
        sink.log(1, &"x".repeat(2000));

        let written = fs::read(&path).unwrap();
        assert_eq!(written.len(), xtrace_print::LINE_CAPACITY);
        assert!(written.iter().all(|b| *b == b'x'));
    }

    #[test]
    fn per_thread_files() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("trace");
        let sink = Arc::new(LogSink::new(&config(Some(&base), true, false)));

        let handles: Vec<_> = (0..3u32)
            .map(|i| {
                let sink = sink.clone();
                std::thread::spawn(move || {
                    let tid = 100 + i;
                    assert!(!thread_log_is_open());
                    sink.log(tid, &format!("[{}] hello", tid));
                    assert!(thread_log_is_open());
                    sink.log(tid, &format!("[{}] bye", tid));
                    close_thread_log();
                    assert!(!thread_log_is_open());
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        for tid in 100..103 {
            let contents = fs::read_to_string(per_thread_path(&base, tid)).unwrap();
            assert_eq!(contents, format!("[{0}] hello\n[{0}] bye\n", tid));
        }
        assert!(!base.exists());
    }

    #[test]
    fn open_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("trace.log");

        let sink = LogSink::new(&config(Some(&path), false, false));
        let err = sink.try_write(1, "lost", STDOUT_FILENO).unwrap_err();
        assert!(matches!(err, Error::OpenLog { path: p, .. } if p == path));
    }

    #[test]
    fn kernel_lines_are_tagged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kmsg");
        fs::write(&path, "").unwrap();

        let sink = LogSink::with_destination(Destination::Kernel(path.clone()));
        sink.log(1, "[1] first");
        sink.error(1, "[1] second");

        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "xtrace: [1] first\nxtrace: [1] second\n"
        );
    }

    #[test]
    fn kernel_falls_back_to_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("kmsg");

        let sink = LogSink::with_destination(Destination::Kernel(path.clone()));
        assert_eq!(sink.kmsg_fd(&path), STDERR_FILENO);
        assert!(sink.try_write(1, "[1] to stderr", STDOUT_FILENO).is_ok());
        assert!(!path.exists());
    }

    #[test]
    fn shared_lines_are_not_interleaved() {
        const THREADS: u32 = 8;
        const LINES: usize = 200;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trace.log");
        let sink = Arc::new(LogSink::new(&config(Some(&path), false, false)));
        let barrier = Arc::new(Barrier::new(THREADS as usize));

        let handles: Vec<_> = (0..THREADS)
            .map(|i| {
                let sink = sink.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    let tid = 200 + i;
                    barrier.wait();
                    for n in 0..LINES {
                        sink.log(tid, &format!("[{}] write(0x{:x}) -> 0x0", tid, n));
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let contents = fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = contents.lines().collect();
        assert_eq!(lines.len(), THREADS as usize * LINES);

        for tid in 200..200 + THREADS {
            for n in 0..LINES {
                let line = format!("[{}] write(0x{:x}) -> 0x0", tid, n);
                assert_eq!(lines.iter().filter(|l| **l == line).count(), 1, "{}", line);
            }
        }
    }

    #[test]
    fn shared_log_opens_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shared.log");

        let shared = Arc::new(SharedLog::new());
        let opens = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let shared = shared.clone();
                let opens = opens.clone();
                let barrier = barrier.clone();
                let path = path.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    let file = shared
                        .get_or_open(|| {
                            opens.fetch_add(1, Ordering::SeqCst);
                            open_log(&path)
                        })
                        .unwrap();
                    file.as_raw_fd()
                })
            })
            .collect();

        let fds: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(opens.load(Ordering::SeqCst), 1);
        assert!(fds.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(shared.get().unwrap().as_raw_fd(), fds[0]);
    }
}
