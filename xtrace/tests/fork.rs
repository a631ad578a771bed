/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Per-thread logs across a real fork.

use std::fs;

use nix::sys::wait::waitpid;
use nix::sys::wait::WaitStatus;
use nix::unistd::fork;
use nix::unistd::ForkResult;
use xtrace::calls::NoCalls;
use xtrace::calls::MAX_ARGS;
use xtrace::lifecycle;
use xtrace::runtime;
use xtrace::sink::per_thread_path;
use xtrace::CallDef;
use xtrace::CallDefs;
use xtrace::Config;

static BSD: [CallDef; 4] = [
    CallDef::UNKNOWN,
    CallDef::named("exit"),
    CallDef::named("fork"),
    CallDef::named("read"),
];

static BSD_TABLE: CallDefs<'static> = CallDefs(&BSD);
static MACH_TABLE: NoCalls = NoCalls;

#[test]
fn child_gets_its_own_log() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("trace");

    runtime::set_call_tables(&MACH_TABLE, &BSD_TABLE);
    runtime::init(Config {
        no_color: true,
        log_file: Some(base.clone()),
        log_file_per_thread: true,
        ..Default::default()
    });

    let parent = runtime::current_tid();

    unsafe { runtime::xtrace_bsd_entry(3, &[0; MAX_ARGS]) };
    runtime::xtrace_bsd_exit(0, 0);
    assert!(per_thread_path(&base, parent).exists());

    unsafe { runtime::xtrace_bsd_entry(2, &[0; MAX_ARGS]) };

    let child = match unsafe { fork() }.unwrap() {
        ForkResult::Child => {
            lifecycle::xtrace_postfork_child_hook();
            runtime::xtrace_bsd_exit(0, 1);
            unsafe { libc::_exit(0) };
        }
        ForkResult::Parent { child } => child,
    };

    runtime::xtrace_bsd_exit(child.as_raw() as usize, 1);
    assert_eq!(waitpid(child, None).unwrap(), WaitStatus::Exited(child, 0));

    assert_eq!(
        fs::read_to_string(per_thread_path(&base, parent)).unwrap(),
        format!(
            "[{0}] read(...) -> 0x0\n[{0}] fork(...)\n[{0}] fork() -> 0x{1:x}\n",
            parent,
            child.as_raw()
        )
    );

    let child_tid = child.as_raw() as u32;
    assert_eq!(
        fs::read_to_string(per_thread_path(&base, child_tid)).unwrap(),
        format!("[{0}] fork(...)\n[{1}] fork() -> 0x0\n", parent, child_tid)
    );
}
