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

/// `mov $handler, %ecx` followed by `call *%ecx` or `jmp *%ecx`.
pub struct X86;

const MOV_ECX: u8 = 0xb9;
const CALL_ECX: [u8; 2] = [0xff, 0xd1];
const JMP_ECX: [u8; 2] = [0xff, 0xe1];

impl HookEncoder for X86 {
    const HOOK_SIZE: usize = 7;

    fn encode(handler: u64, kind: HookKind) -> Result<Vec<u8>, Error> {
        let handler = u32::try_from(handler).map_err(|_| Error::HandlerOutOfRange(handler))?;

        let mut bytes = Vec::with_capacity(Self::HOOK_SIZE);
        bytes.push(MOV_ECX);
        bytes.extend_from_slice(&handler.to_le_bytes());
        bytes.extend_from_slice(match kind {
            HookKind::Call => &CALL_ECX,
            HookKind::Jump => &JMP_ECX,
        });
        Ok(bytes)
    }
}
