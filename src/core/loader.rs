// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 itsakeyfut
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! PS-EXE executable loading
//!
//! Side-loaded executables replace the BIOS shell: when the guest is about
//! to jump to the shell entry point, the CPU patches the image into RAM and
//! branches to its entry instead, with GP/SP/FP initialized from the
//! header.
//!
//! # PS-EXE Format
//!
//! A 2048-byte header followed by the program body:
//!
//! ```text
//! 0x00-0x07: "PS-X EXE" magic
//! 0x10-0x13: Initial PC (entry point)
//! 0x14-0x17: Initial GP (global pointer)
//! 0x18-0x1B: Load address
//! 0x1C-0x1F: Body size in bytes
//! 0x30-0x33: Stack base
//! 0x34-0x37: Stack offset
//! 0x800+:    Program body
//! ```

use super::error::{EmulatorError, Result};
use super::memory::Bus;

/// PS-EXE header magic
const MAGIC: &[u8; 8] = b"PS-X EXE";

/// Header size preceding the program body
const HEADER_SIZE: usize = 0x800;

/// Default stack top used when the header leaves the stack base zero
const DEFAULT_STACK: u32 = 0x801F_FF00;

/// A parsed PS-EXE image
#[derive(Debug, Clone)]
pub struct Executable {
    /// Entry point
    entry_pc: u32,
    /// Initial global pointer
    initial_gp: u32,
    /// RAM address the body loads at
    load_address: u32,
    /// Initial stack pointer (base + offset)
    initial_sp: u32,
    /// Program body
    body: Vec<u8>,
}

impl Executable {
    /// Parse a PS-EXE image from memory
    ///
    /// # Errors
    ///
    /// [`EmulatorError::InvalidExecutable`] when the magic, header or body
    /// size does not hold up.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_SIZE {
            return Err(EmulatorError::InvalidExecutable {
                message: format!("file too small for a PS-EXE header ({} bytes)", data.len()),
            });
        }

        if &data[0..8] != MAGIC {
            return Err(EmulatorError::InvalidExecutable {
                message: "missing PS-X EXE magic".into(),
            });
        }

        let word = |offset: usize| {
            u32::from_le_bytes([
                data[offset],
                data[offset + 1],
                data[offset + 2],
                data[offset + 3],
            ])
        };

        let entry_pc = word(0x10);
        let initial_gp = word(0x14);
        let load_address = word(0x18);
        let body_size = word(0x1C) as usize;
        let stack_base = word(0x30);
        let stack_offset = word(0x34);

        if entry_pc & 3 != 0 {
            return Err(EmulatorError::InvalidExecutable {
                message: format!("misaligned entry point 0x{:08X}", entry_pc),
            });
        }

        if data.len() < HEADER_SIZE + body_size {
            return Err(EmulatorError::InvalidExecutable {
                message: format!(
                    "body truncated: header claims {} bytes, file holds {}",
                    body_size,
                    data.len() - HEADER_SIZE
                ),
            });
        }

        let masked_load = load_address & 0x1F_FFFF;
        if masked_load as usize + body_size > Bus::RAM_SIZE {
            return Err(EmulatorError::InvalidExecutable {
                message: format!(
                    "body does not fit in RAM (load 0x{:08X}, {} bytes)",
                    load_address, body_size
                ),
            });
        }

        let initial_sp = if stack_base == 0 {
            DEFAULT_STACK
        } else {
            stack_base.wrapping_add(stack_offset)
        };

        log::info!(
            "Loader: PS-EXE entry=0x{:08X} load=0x{:08X} size={} sp=0x{:08X}",
            entry_pc,
            load_address,
            body_size,
            initial_sp
        );

        Ok(Self {
            entry_pc,
            initial_gp,
            load_address,
            initial_sp,
            body: data[HEADER_SIZE..HEADER_SIZE + body_size].to_vec(),
        })
    }

    /// Read and parse a PS-EXE file
    pub fn from_file(path: &str) -> Result<Self> {
        let data = std::fs::read(path)?;
        Self::parse(&data)
    }

    /// Entry point PC
    pub fn entry_pc(&self) -> u32 {
        self.entry_pc
    }

    /// Initial global pointer
    pub fn initial_gp(&self) -> u32 {
        self.initial_gp
    }

    /// Initial stack/frame pointer
    pub fn initial_sp(&self) -> u32 {
        self.initial_sp
    }

    /// Copy the program body into RAM at its load address
    pub fn patch_into_ram(&self, bus: &mut Bus) -> Result<()> {
        let offset = (self.load_address & 0x1F_FFFF) as usize;
        bus.ram_mut()[offset..offset + self.body.len()].copy_from_slice(&self.body);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a minimal PS-EXE image
    fn build_exe(entry: u32, load: u32, body: &[u8]) -> Vec<u8> {
        let mut data = vec![0u8; HEADER_SIZE + body.len()];
        data[0..8].copy_from_slice(MAGIC);
        data[0x10..0x14].copy_from_slice(&entry.to_le_bytes());
        data[0x14..0x18].copy_from_slice(&0x8000_F000u32.to_le_bytes());
        data[0x18..0x1C].copy_from_slice(&load.to_le_bytes());
        data[0x1C..0x20].copy_from_slice(&(body.len() as u32).to_le_bytes());
        data[HEADER_SIZE..].copy_from_slice(body);
        data
    }

    #[test]
    fn test_parse_valid_header() {
        let data = build_exe(0x8001_0000, 0x8001_0000, &[1, 2, 3, 4]);
        let exe = Executable::parse(&data).unwrap();

        assert_eq!(exe.entry_pc(), 0x8001_0000);
        assert_eq!(exe.initial_gp(), 0x8000_F000);
        assert_eq!(exe.initial_sp(), DEFAULT_STACK);
    }

    #[test]
    fn test_stack_from_header() {
        let mut data = build_exe(0x8001_0000, 0x8001_0000, &[0; 4]);
        data[0x30..0x34].copy_from_slice(&0x801F_0000u32.to_le_bytes());
        data[0x34..0x38].copy_from_slice(&0x100u32.to_le_bytes());

        let exe = Executable::parse(&data).unwrap();
        assert_eq!(exe.initial_sp(), 0x801F_0100);
    }

    #[test]
    fn test_rejects_bad_magic() {
        let mut data = build_exe(0x8001_0000, 0x8001_0000, &[0; 4]);
        data[0] = b'X';
        assert!(Executable::parse(&data).is_err());
    }

    #[test]
    fn test_rejects_short_file() {
        assert!(Executable::parse(&[0u8; 16]).is_err());
    }

    #[test]
    fn test_rejects_truncated_body() {
        let mut data = build_exe(0x8001_0000, 0x8001_0000, &[0; 4]);
        // Claim more body than the file carries
        data[0x1C..0x20].copy_from_slice(&100u32.to_le_bytes());
        assert!(Executable::parse(&data).is_err());
    }

    #[test]
    fn test_rejects_misaligned_entry() {
        let data = build_exe(0x8001_0002, 0x8001_0000, &[0; 4]);
        assert!(Executable::parse(&data).is_err());
    }

    #[test]
    fn test_patch_into_ram() {
        let body = [0xAA, 0xBB, 0xCC, 0xDD];
        let data = build_exe(0x8001_0000, 0x8001_0000, &body);
        let exe = Executable::parse(&data).unwrap();

        let mut bus = Bus::new();
        exe.patch_into_ram(&mut bus).unwrap();

        assert_eq!(bus.read32(0x8001_0000).unwrap(), 0xDDCC_BBAA);
    }
}
