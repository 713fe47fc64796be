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

//! Cold-boot behavior against synthetic BIOS images

mod common;

use common::fixtures;
use sable::core::cpu::Cpu;
use sable::core::memory::Bus;

#[test]
fn cold_boot_starts_at_the_reset_vector() {
    let bios = fixtures::idle_bios();

    let mut bus = Bus::new();
    bus.load_bios(&fixtures::path_of(&bios)).unwrap();

    let cpu = Cpu::new();
    assert_eq!(cpu.pc(), 0xBFC00000);

    // The image is mapped at the vector: the idle loop's jump is there
    let word = bus.read32(0xBFC00000).unwrap();
    assert_eq!(word, 0x0BF0_0000);
}

#[test]
fn straight_line_code_advances_twelve_bytes_in_three_steps() {
    // Three NOPs, no branches
    let bios = fixtures::bios_with_program(&[0, 0, 0]);

    let mut bus = Bus::new();
    bus.load_bios(&fixtures::path_of(&bios)).unwrap();

    let mut cpu = Cpu::new();
    for _ in 0..3 {
        cpu.step(&mut bus).unwrap();
    }
    assert_eq!(cpu.pc(), 0xBFC0000C);
}

#[test]
fn bios_putchar_reaches_the_host_log() {
    // ori t1, r0, 0x3D  (putchar selector)
    // ori a0, r0, 'H'
    // ori t0, r0, 0xB0  (B0 call gate)
    // jr t0
    // nop
    let bios = fixtures::bios_with_program(&[
        0x3409_003D,
        0x3404_0048,
        0x3408_00B0,
        0x0100_0008,
        0x0000_0000,
    ]);

    let mut bus = Bus::new();
    bus.load_bios(&fixtures::path_of(&bios)).unwrap();

    let mut cpu = Cpu::new();

    // Four instructions plus the delay slot, then the step that hits the
    // call gate
    for _ in 0..6 {
        cpu.step(&mut bus).unwrap();
    }

    assert_eq!(cpu.tty_line(), "H");
}

#[test]
fn missing_bios_is_a_startup_error() {
    let mut bus = Bus::new();
    assert!(bus.load_bios("/nonexistent/bios.bin").is_err());
}

#[test]
fn short_bios_is_rejected() {
    use std::io::Write;

    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(&[0u8; 1024]).unwrap();
    file.flush().unwrap();

    let mut bus = Bus::new();
    let err = bus
        .load_bios(&file.path().to_string_lossy())
        .unwrap_err();
    assert!(matches!(
        err,
        sable::core::error::EmulatorError::InvalidBiosSize { .. }
    ));
}
