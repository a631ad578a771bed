/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

use std::ffi::CStr;
use std::path::PathBuf;

use xtrace::env::EnvBlock;
use xtrace::lifecycle;
use xtrace::runtime;
use xtrace::Config;

unsafe fn read(envp: *const *const libc::c_char) -> Vec<String> {
    let mut out = Vec::new();
    let mut ptr = envp;
    while !(*ptr).is_null() {
        out.push(CStr::from_ptr(*ptr).to_str().unwrap().to_owned());
        ptr = ptr.add(1);
    }
    out
}

#[test]
fn execve_carries_configuration() {
    let caller = EnvBlock::from_entries([
        "HOME=/Users/me",
        "XTRACE_SPLIT_ENTRY_AND_EXIT=0",
        "DYLD_INSERT_LIBRARIES=/usr/lib/libgmalloc.dylib",
    ])
    .array();
    let mut envp = caller.as_ptr();

    // Without a configuration there is nothing to hand down.
    unsafe { lifecycle::xtrace_execve_inject_hook(&mut envp) };
    assert_eq!(envp, caller.as_ptr());

    runtime::init(Config {
        split_entry_and_exit: true,
        kprintf: true,
        log_file: Some(PathBuf::from("/tmp/trace.log")),
        log_file_per_thread: true,
        ..Default::default()
    });

    unsafe { lifecycle::xtrace_execve_inject_hook(&mut envp) };

    let env = unsafe { read(envp) };
    assert_eq!(
        env,
        [
            "HOME=/Users/me",
            "XTRACE_SPLIT_ENTRY_AND_EXIT=1",
            "DYLD_INSERT_LIBRARIES=/usr/lib/libgmalloc.dylib:/usr/lib/darling/libxtrace.dylib",
            "XTRACE_NO_COLOR=0",
            "XTRACE_KPRINTF=1",
            "XTRACE_LOG_FILE_PER_THREAD=1",
            "XTRACE_LOG_FILE=/tmp/trace.log",
        ]
    );

    // The new image reads back the same settings.
    let child = Config::from_vars(
        unsafe { EnvBlock::from_ptr(envp) }
            .iter()
            .filter_map(|(k, v)| Some((k.to_owned(), v?.to_owned()))),
    );
    assert_eq!(Some(&child), runtime::config());

    lifecycle::xtrace_thread_exit_hook();
}
