/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! The code the call hooks are pointed at.
//!
//! The entry hook is reached with the call number in `rax` and the arguments
//! in the syscall argument registers; the exit hook with the return value in
//! `rax`. The trampolines save every register the dispatch code may still
//! need, including `xmm0` to `xmm15`, hand the interesting ones to the Rust
//! handlers, and restore everything before returning into the dispatch code.

use crate::runtime;

extern "C" {
    pub fn xtrace_mach_entry_trampoline();
    pub fn xtrace_mach_exit_trampoline();
    pub fn xtrace_bsd_entry_trampoline();
    pub fn xtrace_bsd_exit_trampoline();
}

// The vector registers live in the 256 bytes below the pushed general
// purpose registers, at `rbp - 328` up to `rbp - 72`.
macro_rules! save_xmm {
    () => {
        concat!(
            "movdqu [rbp - 328], xmm0\n",
            "movdqu [rbp - 312], xmm1\n",
            "movdqu [rbp - 296], xmm2\n",
            "movdqu [rbp - 280], xmm3\n",
            "movdqu [rbp - 264], xmm4\n",
            "movdqu [rbp - 248], xmm5\n",
            "movdqu [rbp - 232], xmm6\n",
            "movdqu [rbp - 216], xmm7\n",
            "movdqu [rbp - 200], xmm8\n",
            "movdqu [rbp - 184], xmm9\n",
            "movdqu [rbp - 168], xmm10\n",
            "movdqu [rbp - 152], xmm11\n",
            "movdqu [rbp - 136], xmm12\n",
            "movdqu [rbp - 120], xmm13\n",
            "movdqu [rbp - 104], xmm14\n",
            "movdqu [rbp - 88], xmm15\n",
        )
    };
}

macro_rules! restore_xmm {
    () => {
        concat!(
            "movdqu xmm0, [rbp - 328]\n",
            "movdqu xmm1, [rbp - 312]\n",
            "movdqu xmm2, [rbp - 296]\n",
            "movdqu xmm3, [rbp - 280]\n",
            "movdqu xmm4, [rbp - 264]\n",
            "movdqu xmm5, [rbp - 248]\n",
            "movdqu xmm6, [rbp - 232]\n",
            "movdqu xmm7, [rbp - 216]\n",
            "movdqu xmm8, [rbp - 200]\n",
            "movdqu xmm9, [rbp - 184]\n",
            "movdqu xmm10, [rbp - 168]\n",
            "movdqu xmm11, [rbp - 152]\n",
            "movdqu xmm12, [rbp - 136]\n",
            "movdqu xmm13, [rbp - 120]\n",
            "movdqu xmm14, [rbp - 104]\n",
            "movdqu xmm15, [rbp - 88]\n",
        )
    };
}

macro_rules! entry_trampoline {
    ($name:literal, $handler:path) => {
        core::arch::global_asm!(
            concat!(".globl ", $name),
            concat!(".type ", $name, ", @function"),
            concat!($name, ":"),
            "push rbp",
            "mov rbp, rsp",
            "push rax",
            "push rdi",
            "push rsi",
            "push rdx",
            "push rcx",
            "push r8",
            "push r9",
            "push r10",
            "push r11",
            "sub rsp, 304",
            save_xmm!(),
            // Arguments in syscall order: the fourth one is in r10.
            "mov [rsp], rdi",
            "mov [rsp + 8], rsi",
            "mov [rsp + 16], rdx",
            "mov [rsp + 24], r10",
            "mov [rsp + 32], r8",
            "mov [rsp + 40], r9",
            "mov rdi, rax",
            "mov rsi, rsp",
            "and rsp, -16",
            "call {handler}@PLT",
            restore_xmm!(),
            "lea rsp, [rbp - 72]",
            "pop r11",
            "pop r10",
            "pop r9",
            "pop r8",
            "pop rcx",
            "pop rdx",
            "pop rsi",
            "pop rdi",
            "pop rax",
            "pop rbp",
            "ret",
            concat!(".size ", $name, ", . - ", $name),
            handler = sym $handler,
        );
    };
}

macro_rules! exit_trampoline {
    ($name:literal, $handler:path) => {
        core::arch::global_asm!(
            concat!(".globl ", $name),
            concat!(".type ", $name, ", @function"),
            concat!($name, ":"),
            "push rbp",
            "mov rbp, rsp",
            "push rax",
            "push rdi",
            "push rsi",
            "push rdx",
            "push rcx",
            "push r8",
            "push r9",
            "push r10",
            "push r11",
            "sub rsp, 256",
            save_xmm!(),
            "mov rdi, rax",
            "xor esi, esi",
            "and rsp, -16",
            "call {handler}@PLT",
            restore_xmm!(),
            "lea rsp, [rbp - 72]",
            "pop r11",
            "pop r10",
            "pop r9",
            "pop r8",
            "pop rcx",
            "pop rdx",
            "pop rsi",
            "pop rdi",
            "pop rax",
            "pop rbp",
            "ret",
            concat!(".size ", $name, ", . - ", $name),
            handler = sym $handler,
        );
    };
}

entry_trampoline!("xtrace_mach_entry_trampoline", runtime::xtrace_mach_entry);
exit_trampoline!("xtrace_mach_exit_trampoline", runtime::xtrace_mach_exit);
entry_trampoline!("xtrace_bsd_entry_trampoline", runtime::xtrace_bsd_entry);
exit_trampoline!("xtrace_bsd_exit_trampoline", runtime::xtrace_bsd_exit);
