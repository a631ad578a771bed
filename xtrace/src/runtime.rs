/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Process-wide tracer state and the handlers the dispatch hooks end up in.
//!
//! Everything global is written once during setup, before the ready gate
//! opens. After that the handlers only read it; the mutable state is all
//! thread-local.

use core::cell::RefCell;
use core::sync::atomic::AtomicBool;
use core::sync::atomic::Ordering;
use std::sync::Once;

use once_cell::sync::OnceCell;
use syscalls::Sysno;

use crate::altstack;
use crate::calls::CallClass;
use crate::calls::CallTable;
use crate::calls::NoCalls;
use crate::calls::MAX_ARGS;
use crate::config::Config;
use crate::error::fatal;
use crate::error::Error;
use crate::sink::LogSink;
use crate::tracer::CallTables;
use crate::tracer::ThreadTrace;
use crate::tracer::Tracer;

static NO_CALLS: NoCalls = NoCalls;

static CONFIG: OnceCell<Config> = OnceCell::new();
static TABLES: OnceCell<CallTables<'static>> = OnceCell::new();
static SINK: OnceCell<LogSink> = OnceCell::new();
static TRACER: OnceCell<Tracer<'static>> = OnceCell::new();

/// Closed until setup is done. Events arriving before that are dropped.
static READY: AtomicBool = AtomicBool::new(false);

static SETUP: Once = Once::new();

thread_local! {
    static THREAD: RefCell<ThreadTrace> = const { RefCell::new(ThreadTrace::new()) };
}

/// Thread id of the calling thread.
pub fn current_tid() -> u32 {
    unsafe { syscalls::raw_syscall!(Sysno::gettid) as u32 }
}

/// Registers the descriptor tables of both call classes. Has to happen before
/// [`init`]; returns false if tables were registered already.
pub fn set_call_tables(mach: &'static dyn CallTable, bsd: &'static dyn CallTable) -> bool {
    TABLES.set(CallTables { mach, bsd }).is_ok()
}

/// Installs `config` as the process-wide configuration and opens the ready
/// gate. Only the first call has any effect; returns whether this was it.
pub fn init(config: Config) -> bool {
    let mut first = false;
    let config = CONFIG.get_or_init(|| {
        first = true;
        config
    });

    let tables = *TABLES.get_or_init(|| CallTables {
        mach: &NO_CALLS,
        bsd: &NO_CALLS,
    });

    SINK.get_or_init(|| LogSink::new(config));
    TRACER.get_or_init(|| Tracer::new(config, tables));

    READY.store(true, Ordering::Release);
    first
}

/// The configuration in effect, once [`init`] has run.
pub fn config() -> Option<&'static Config> {
    CONFIG.get()
}

pub fn sink() -> Option<&'static LogSink> {
    SINK.get()
}

pub fn is_ready() -> bool {
    READY.load(Ordering::Acquire)
}

/// Full tracer setup: reads the configuration from the environment, patches
/// the hook sites, gives the thread and its future siblings a bigger signal
/// stack and opens the gate.
/// Any failure aborts the process. Runs once; later calls do nothing.
pub fn setup() {
    SETUP.call_once(|| {
        let config = Config::from_env();

        #[cfg(feature = "darling")]
        if let Err(err) = unsafe { crate::hooks::install_all() } {
            fatal(&err);
        }

        if let Err(err) = altstack::install(altstack::ALT_STACK_SIZE) {
            fatal(&err);
        }

        #[cfg(feature = "darling")]
        if let Err(err) = altstack::set_default_size(altstack::ALT_STACK_SIZE) {
            fatal(&err);
        }

        tracing::debug!(?config, "xtrace set up");
        init(config);
    });
}

/// Runs `f` with the calling thread's trace state. Does nothing if the state
/// is already in use further up the stack, which happens when a traced call is
/// made from inside the tracer itself, or if the thread is being torn down.
pub(crate) fn with_thread<F>(f: F)
where
    F: FnOnce(&mut ThreadTrace),
{
    let _ = THREAD.try_with(|thread| {
        if let Ok(mut thread) = thread.try_borrow_mut() {
            f(&mut thread);
        }
    });
}

fn report(tid: u32, class: CallClass, err: Error, thread: &ThreadTrace) {
    match err {
        Error::NestingTooDeep(_) if thread.calls.rejected() == 1 => {
            if let Some(sink) = SINK.get() {
                sink.error(tid, &format!("[{}] {}, not tracing deeper calls", tid, err));
            }
        }
        Error::NestingTooDeep(_) => {}
        err => tracing::warn!(tid, class = class.label(), "ignoring event: {}", err),
    }
}

/// Traces the entry of call `nr` on the calling thread.
pub fn entry(class: CallClass, nr: i32, args: &[usize; MAX_ARGS]) {
    if !is_ready() {
        return;
    }

    let (tracer, sink) = match (TRACER.get(), SINK.get()) {
        (Some(tracer), Some(sink)) => (tracer, sink),
        _ => return,
    };

    let tid = current_tid();
    with_thread(|thread| {
        if let Err(err) = tracer.entry(thread, &mut sink.for_thread(tid), tid, class, nr, args) {
            report(tid, class, err, thread);
        }
    });
}

/// Traces the exit of the innermost pending call on the calling thread.
pub fn exit(class: CallClass, retval: usize, force_split: bool) {
    if !is_ready() {
        return;
    }

    let (tracer, sink) = match (TRACER.get(), SINK.get()) {
        (Some(tracer), Some(sink)) => (tracer, sink),
        _ => return,
    };

    let tid = current_tid();
    with_thread(|thread| {
        if let Err(err) = tracer.exit(thread, &mut sink.for_thread(tid), tid, class, retval, force_split)
        {
            report(tid, class, err, thread);
        }
    });
}

unsafe fn read_args(args: *const [usize; MAX_ARGS]) -> [usize; MAX_ARGS] {
    if args.is_null() {
        [0; MAX_ARGS]
    } else {
        *args
    }
}

#[no_mangle]
pub extern "C" fn xtrace_setup() {
    setup();
}

/// # Safety
///
/// `args` must be null or point to six readable words.
#[no_mangle]
pub unsafe extern "C" fn xtrace_mach_entry(nr: libc::c_int, args: *const [usize; MAX_ARGS]) {
    entry(CallClass::Mach, nr, &read_args(args));
}

#[no_mangle]
pub extern "C" fn xtrace_mach_exit(retval: usize, force_split: libc::c_int) {
    exit(CallClass::Mach, retval, force_split != 0);
}

/// # Safety
///
/// `args` must be null or point to six readable words.
#[no_mangle]
pub unsafe extern "C" fn xtrace_bsd_entry(nr: libc::c_int, args: *const [usize; MAX_ARGS]) {
    entry(CallClass::Bsd, nr, &read_args(args));
}

#[no_mangle]
pub extern "C" fn xtrace_bsd_exit(retval: usize, force_split: libc::c_int) {
    exit(CallClass::Bsd, retval, force_split != 0);
}
