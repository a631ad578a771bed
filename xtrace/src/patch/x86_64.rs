/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

use super::HookEncoder;
use super::HookKind;
use crate::error::Error;

/// `movabs $handler, %r10` followed by `call *%r10` or `jmp *%r10`.
///
/// r10 is free to clobber at every hook site: it is caller-saved and the
/// dispatch code has already moved the fourth syscall argument out of it.
pub struct X86_64;

const MOVABS_R10: [u8; 2] = [0x49, 0xba];
const CALL_R10: [u8; 3] = [0x41, 0xff, 0xd2];
const JMP_R10: [u8; 3] = [0x41, 0xff, 0xe2];

impl HookEncoder for X86_64 {
    const HOOK_SIZE: usize = 13;

    fn encode(handler: u64, kind: HookKind) -> Result<Vec<u8>, Error> {
        let mut bytes = Vec::with_capacity(Self::HOOK_SIZE);
        bytes.extend_from_slice(&MOVABS_R10);
        bytes.extend_from_slice(&handler.to_le_bytes());
        bytes.extend_from_slice(match kind {
            HookKind::Call => &CALL_R10,
            HookKind::Jump => &JMP_R10,
        });
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call() {
        assert_eq!(
            X86_64::encode(0x0011_2233_4455_6677, HookKind::Call).unwrap(),
            [
                0x49, 0xba, 0x77, 0x66, 0x55, 0x44, 0x33, 0x22, 0x11, 0x00, 0x41, 0xff, 0xd2
            ]
        );
    }

    #[test]
    fn jump() {
        let bytes = X86_64::encode(0x7f00_dead_beef, HookKind::Jump).unwrap();
        assert_eq!(bytes.len(), X86_64::HOOK_SIZE);
        assert_eq!(&bytes[10..], &[0x41, 0xff, 0xe2]);
    }
}
