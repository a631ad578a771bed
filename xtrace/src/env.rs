/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Rewriting the environment of an `execve` so that the new image is traced
//! with the same settings.

use std::ffi::CStr;
use std::ffi::CString;
use std::ffi::OsStr;
use std::ffi::OsString;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::ffi::OsStringExt;

use linked_hash_map::LinkedHashMap;

use crate::config::Config;
use crate::config::INSERT_LIBRARIES;

/// Converts raw bytes to a `CString`, cutting them at the first nul.
pub fn to_cstring(mut bytes: Vec<u8>) -> CString {
    if let Some(nul) = bytes.iter().position(|b| *b == 0) {
        bytes.truncate(nul);
    }
    CString::new(bytes).unwrap_or_default()
}

/// A null-terminated array of C strings that owns its strings.
#[derive(Clone, Debug)]
pub struct CStringArray {
    items: Vec<CString>,
    ptrs: Vec<*const libc::c_char>,
}

impl CStringArray {
    pub fn with_capacity(capacity: usize) -> Self {
        let mut result = CStringArray {
            items: Vec::with_capacity(capacity),
            ptrs: Vec::with_capacity(capacity + 1),
        };
        result.ptrs.push(core::ptr::null());
        result
    }

    pub fn push(&mut self, item: CString) {
        let l = self.ptrs.len();
        self.ptrs[l - 1] = item.as_ptr();
        self.ptrs.push(core::ptr::null());
        self.items.push(item);
    }

    /// Pointer to the array. Valid for as long as `self` is alive.
    pub fn as_ptr(&self) -> *const *const libc::c_char {
        self.ptrs.as_ptr()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CStr> {
        self.items.iter().map(|x| x.as_ref())
    }
}

// The raw pointers only ever point into `items`.
unsafe impl Send for CStringArray {}

/// An environment block with its order preserved.
///
/// Entries that have no `=` are kept as keys without a value and are written
/// back as they were. If a key appears more than once, the first occurrence
/// is kept.
#[derive(Clone, Debug, Default)]
pub struct EnvBlock {
    vars: LinkedHashMap<OsString, Option<OsString>>,
}

impl EnvBlock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a null-terminated `KEY=VALUE` array. A null `envp` is an empty
    /// environment.
    ///
    /// # Safety
    ///
    /// `envp` must be null or point to a null-terminated array of valid C
    /// strings.
    pub unsafe fn from_ptr(envp: *const *const libc::c_char) -> Self {
        let mut env = Self::new();

        if envp.is_null() {
            return env;
        }

        let mut ptr = envp;
        while !(*ptr).is_null() {
            env.push_entry(CStr::from_ptr(*ptr).to_bytes());
            ptr = ptr.add(1);
        }

        env
    }

    pub fn from_entries<I, E>(entries: I) -> Self
    where
        I: IntoIterator<Item = E>,
        E: AsRef<[u8]>,
    {
        let mut env = Self::new();
        for entry in entries {
            env.push_entry(entry.as_ref());
        }
        env
    }

    fn push_entry(&mut self, entry: &[u8]) {
        let entry = match entry.iter().position(|b| *b == 0) {
            Some(nul) => &entry[..nul],
            None => entry,
        };

        let (key, value) = match entry.iter().position(|b| *b == b'=') {
            Some(eq) => (
                &entry[..eq],
                Some(OsStr::from_bytes(&entry[eq + 1..]).to_owned()),
            ),
            None => (entry, None),
        };

        let key = OsStr::from_bytes(key);
        if !self.vars.contains_key(key) {
            self.vars.insert(key.to_owned(), value);
        }
    }

    pub fn get<K: AsRef<OsStr>>(&self, key: K) -> Option<&OsStr> {
        self.vars
            .get(key.as_ref())
            .and_then(|v| v.as_ref().map(|v| v.as_os_str()))
    }

    /// Sets `key` to `value`. An existing key keeps its position; a new one
    /// goes at the end.
    pub fn set<K: AsRef<OsStr>, V: AsRef<OsStr>>(&mut self, key: K, value: V) {
        let key = key.as_ref();
        let value = value.as_ref().to_owned();

        // `LinkedHashMap::insert` would move an existing key to the back.
        match self.vars.get_mut(key) {
            Some(slot) => *slot = Some(value),
            None => {
                self.vars.insert(key.to_owned(), Some(value));
            }
        }
    }

    /// Appends `item` to the colon-separated list in `key`. Nothing changes if
    /// `item` is already the last element.
    pub fn append_path<K: AsRef<OsStr>, V: AsRef<OsStr>>(&mut self, key: K, item: V) {
        let key = key.as_ref();
        let item = item.as_ref();

        let value = match self.get(key) {
            None => item.to_owned(),
            Some(current) if current.is_empty() => item.to_owned(),
            Some(current) => {
                let last = current.as_bytes().rsplit(|b| *b == b':').next();
                if last == Some(item.as_bytes()) {
                    return;
                }

                let mut value = current.to_owned();
                value.reserve_exact(item.len() + 1);
                value.push(":");
                value.push(item);
                value
            }
        };

        self.set(key, value);
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&OsStr, Option<&OsStr>)> {
        self.vars.iter().map(|(k, v)| (k.as_ref(), v.as_deref()))
    }

    /// Serializes the block into a null-terminated array.
    pub fn array(&self) -> CStringArray {
        let mut result = CStringArray::with_capacity(self.vars.len());

        for (k, v) in &self.vars {
            let mut entry = k.clone();
            if let Some(v) = v {
                // Reserve additional space for '=' and null terminator
                entry.reserve_exact(v.len() + 2);
                entry.push("=");
                entry.push(v);
            }

            result.push(to_cstring(entry.into_vec()));
        }

        result
    }
}

/// Writes the tracer configuration into `env` and makes sure the tracer
/// library gets loaded into the new image.
pub fn propagate(config: &Config, env: &mut EnvBlock) {
    for (key, value) in config.vars() {
        env.set(key, value);
    }

    env.append_path(INSERT_LIBRARIES, &config.library_path);
}
