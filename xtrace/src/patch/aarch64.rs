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

/// There is no single instruction that loads a full 64-bit immediate, so the
/// handler address is assembled 16 bits at a time with four `movk`s into x9,
/// followed by `blr x9` or `br x9`.
pub struct Aarch64;

/// Scratch register used by the hook.
const X9: u32 = 9;

/// `movk x<rd>, #imm16, lsl #(16 * hw)`
const fn movk(rd: u32, imm16: u16, hw: u32) -> u32 {
    0b1_11_100101 << 23 | (hw & 0x3) << 21 | (imm16 as u32) << 5 | (rd & 0x1f)
}

/// `blr x<rn>`
const fn blr(rn: u32) -> u32 {
    0b1101011_0_0_01_11111_0000_0_0 << 10 | (rn & 0x1f) << 5
}

/// `br x<rn>`
const fn br(rn: u32) -> u32 {
    0b1101011_0_0_00_11111_0000_0_0 << 10 | (rn & 0x1f) << 5
}

impl HookEncoder for Aarch64 {
    const HOOK_SIZE: usize = 20;

    fn encode(handler: u64, kind: HookKind) -> Result<Vec<u8>, Error> {
        let branch = match kind {
            HookKind::Call => blr(X9),
            HookKind::Jump => br(X9),
        };

        let words = [
            movk(X9, handler as u16, 0),
            movk(X9, (handler >> 16) as u16, 1),
            movk(X9, (handler >> 32) as u16, 2),
            movk(X9, (handler >> 48) as u16, 3),
            branch,
        ];

        Ok(words.iter().flat_map(|word| word.to_le_bytes()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(bytes: &[u8]) -> Vec<u32> {
        bytes
            .chunks(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    }

    #[test]
    fn instruction_words() {
        // Reference encodings from an assembler.
        assert_eq!(movk(9, 0x1234, 0), 0xf282_4689);
        assert_eq!(movk(9, 0xffff, 3), 0xf2ff_ffe9);
        assert_eq!(blr(9), 0xd63f_0120);
        assert_eq!(br(9), 0xd61f_0120);
    }

    #[test]
    fn call() {
        let bytes = Aarch64::encode(0x0000_ffff_1234_5678, HookKind::Call).unwrap();
        assert_eq!(bytes.len(), Aarch64::HOOK_SIZE);
        assert_eq!(
            words(&bytes),
            [
                movk(9, 0x5678, 0),
                movk(9, 0x1234, 1),
                movk(9, 0xffff, 2),
                movk(9, 0x0000, 3),
                0xd63f_0120,
            ]
        );
    }

    #[test]
    fn jump() {
        let bytes = Aarch64::encode(0x4000, HookKind::Jump).unwrap();
        assert_eq!(words(&bytes)[4], 0xd61f_0120);
    }
}
