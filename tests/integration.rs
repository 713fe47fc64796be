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

//! End-to-end scenarios through the public System interface
//!
//! The CPU idles in a synthetic BIOS full of NOPs while the tests drive
//! the peripherals through their memory-mapped registers, exactly as guest
//! code would.

mod common;

use common::fixtures;
use sable::core::system::System;

/// A booted system with the idle BIOS and a patterned disc
fn boot_system() -> System {
    let bios = fixtures::idle_bios();
    let iso = fixtures::patterned_iso(16);

    let mut system = System::new();
    system.load_bios(&fixtures::path_of(&bios)).unwrap();
    system.load_disc(&fixtures::path_of(&iso)).unwrap();
    system.reset();
    system
}

/// Run slices until at least `cycles` guest cycles have elapsed
fn run_cycles(system: &mut System, cycles: u64) {
    let target = system.cycles() + cycles;
    while system.cycles() < target {
        system.run_slice().unwrap();
    }
}

#[test]
fn dma_otc_builds_the_ordering_table() {
    let mut system = boot_system();

    // Enable channel 6 in DPCR and its interrupt in DICR
    system.bus_mut().write32(0x1F8010F0, 0x0800_0000).unwrap();
    system
        .bus_mut()
        .write32(0x1F8010F4, (1 << 22) | (1 << 23))
        .unwrap();

    // OTC: MADR at the top of the table, 8 entries, decrementing burst
    system.bus_mut().write32(0x1F8010E0, 0x001FFFFC).unwrap();
    system.bus_mut().write32(0x1F8010E4, 8).unwrap();
    system
        .bus_mut()
        .write32(0x1F8010E8, (1 << 24) | (1 << 1))
        .unwrap();

    // The chain is in RAM immediately; the completion event needs cycles
    run_cycles(&mut system, 64);

    // Seven entries each point at the word below, the tail terminates
    for i in 0..7u32 {
        let addr = 0x001FFFFC - 4 * i;
        assert_eq!(
            system.bus_mut().read32(addr).unwrap(),
            addr - 4,
            "entry at 0x{:08X}",
            addr
        );
    }
    assert_eq!(system.bus_mut().read32(0x001FFFE0).unwrap(), 0x00FFFFFF);

    // Start bit cleared, interrupt delivered
    assert_eq!(
        system.bus_mut().read32(0x1F8010E8).unwrap() & (1 << 24),
        0
    );
    assert_ne!(system.bus_mut().read32(0x1F801070).unwrap() & (1 << 3), 0);
}

#[test]
fn gpu_fill_paints_vram_through_gp0() {
    let mut system = boot_system();

    // GP0(0x02): white 2x2 fill at (8, 16)
    system.bus_mut().write32(0x1F801810, 0x02FFFFFF).unwrap();
    system.bus_mut().write32(0x1F801810, 0x00100008).unwrap();
    system.bus_mut().write32(0x1F801810, 0x00020002).unwrap();

    let gpu = system.gpu();
    let vram = gpu.borrow();
    let vram = vram.vram();

    for y in 16..18usize {
        for x in 8..10usize {
            assert_eq!(vram[y * 1024 + x], 0x7FFF, "pixel ({}, {})", x, y);
        }
    }
    assert_eq!(vram[16 * 1024 + 7], 0);
    assert_eq!(vram[18 * 1024 + 8], 0);
}

#[test]
fn gpu_image_upload_roundtrip_through_the_ports() {
    let mut system = boot_system();

    // CPU->VRAM: 2x2 at (64, 32)
    system.bus_mut().write32(0x1F801810, 0xA0000000).unwrap();
    system.bus_mut().write32(0x1F801810, 0x00200040).unwrap();
    system.bus_mut().write32(0x1F801810, 0x00020002).unwrap();
    system.bus_mut().write32(0x1F801810, 0x2222_1111).unwrap();
    system.bus_mut().write32(0x1F801810, 0x4444_3333).unwrap();

    // VRAM->CPU of the same rectangle
    system.bus_mut().write32(0x1F801810, 0xC0000000).unwrap();
    system.bus_mut().write32(0x1F801810, 0x00200040).unwrap();
    system.bus_mut().write32(0x1F801810, 0x00020002).unwrap();

    assert_eq!(system.bus_mut().read32(0x1F801810).unwrap(), 0x2222_1111);
    assert_eq!(system.bus_mut().read32(0x1F801810).unwrap(), 0x4444_3333);
}

#[test]
fn cdrom_get_id_reports_a_licensed_disc() {
    let mut system = boot_system();

    // Unmask CDROM in the INTC
    system.bus_mut().write32(0x1F801074, 1 << 2).unwrap();

    // IE = all classes (register bank 1)
    system.bus_mut().write8(0x1F801800, 1).unwrap();
    system.bus_mut().write8(0x1F801802, 0x1F).unwrap();
    system.bus_mut().write8(0x1F801800, 0).unwrap();

    // GetID
    system.bus_mut().write8(0x1F801801, 0x1A).unwrap();

    // INT3 lands ~10k cycles later
    run_cycles(&mut system, 12_000);

    assert_ne!(
        system.bus_mut().read32(0x1F801070).unwrap() & (1 << 2),
        0,
        "INT3 reached the INTC"
    );

    // Licensed, Mode2, region SCEI; the status byte leads
    let mut response = Vec::new();
    for _ in 0..9 {
        response.push(system.bus_mut().read8(0x1F801801).unwrap());
    }
    assert_eq!(
        &response[1..],
        &[0x02, 0x00, 0x20, 0x00, b'S', b'C', b'E', b'I']
    );

    // Interrupt class was 3
    system.bus_mut().write8(0x1F801800, 1).unwrap();
    assert_eq!(system.bus_mut().read8(0x1F801803).unwrap() & 0x1F, 3);

    // Acknowledge INT3 and the INTC line, then the INT2 completes GetID
    system.bus_mut().write8(0x1F801803, 0x1F).unwrap();
    system.bus_mut().write32(0x1F801070, 0).unwrap();

    run_cycles(&mut system, 25_000);
    assert_eq!(system.bus_mut().read8(0x1F801803).unwrap() & 0x1F, 2);
}

#[test]
fn cdrom_readn_streams_patterned_sectors() {
    let mut system = boot_system();

    // SetLoc 00:02:01 (sector 1 of the image)
    system.bus_mut().write8(0x1F801802, 0x00).unwrap();
    system.bus_mut().write8(0x1F801802, 0x02).unwrap();
    system.bus_mut().write8(0x1F801802, 0x01).unwrap();
    system.bus_mut().write8(0x1F801801, 0x02).unwrap();
    run_cycles(&mut system, 12_000);

    // ReadN at single speed
    system.bus_mut().write8(0x1F801801, 0x06).unwrap();

    // INT3 ack plus one sector period
    run_cycles(&mut system, 520_000);

    // Sector 1 is all 0x01 bytes; drain it through DMA channel 3
    system.bus_mut().write32(0x1F8010F0, 0x0000_8000).unwrap();
    system.bus_mut().write32(0x1F8010B0, 0x00001000).unwrap();
    system.bus_mut().write32(0x1F8010B4, 8).unwrap();
    system
        .bus_mut()
        .write32(0x1F8010B8, (1 << 24) | (1 << 28))
        .unwrap();

    assert_eq!(system.bus_mut().read32(0x00001000).unwrap(), 0x01010101);
    assert_eq!(system.bus_mut().read32(0x0000101C).unwrap(), 0x01010101);
}

#[test]
fn timer2_overflow_and_compare_interrupt() {
    let mut system = boot_system();

    // Unmask Timer 2
    system.bus_mut().write32(0x1F801074, 1 << 6).unwrap();

    // cmpe + ovfe, free running on the CPU clock, compare = 0
    system.bus_mut().write32(0x1F801124, (1 << 4) | (1 << 5)).unwrap();
    system.bus_mut().write32(0x1F801128, 0).unwrap();

    run_cycles(&mut system, 0x10001 + 256);

    // The overflow raised Timer 2's INTC line
    assert_ne!(system.bus_mut().read32(0x1F801070).unwrap() & (1 << 6), 0);

    // Both sticky flags latched; the mode read clears them
    let mode = system.bus_mut().read32(0x1F801124).unwrap();
    assert_ne!(mode & (1 << 11), 0, "compare flag");
    assert_ne!(mode & (1 << 12), 0, "overflow flag");

    let mode = system.bus_mut().read32(0x1F801124).unwrap();
    assert_eq!(mode & ((1 << 11) | (1 << 12)), 0);
}

#[test]
fn controller_exchange_reaches_the_intc() {
    let mut system = boot_system();

    // Unmask the controller interrupt
    system.bus_mut().write32(0x1F801074, 1 << 7).unwrap();

    // Enable TX and the /ACK interrupt, select slot 0
    system
        .bus_mut()
        .write16(0x1F80104A, (1 << 0) | (1 << 12))
        .unwrap();

    // Address the pad
    system.bus_mut().write8(0x1F801040, 0x01).unwrap();

    // The /ACK event sits ~1088 cycles out
    run_cycles(&mut system, 1536);

    assert_ne!(system.bus_mut().read32(0x1F801070).unwrap() & (1 << 7), 0);
    assert_eq!(system.bus_mut().read8(0x1F801040).unwrap(), 0xFF);
}

#[test]
fn vblank_interrupt_fires_every_frame() {
    let mut system = boot_system();

    system.run_frame().unwrap();
    assert_ne!(system.bus_mut().read32(0x1F801070).unwrap() & 1, 0);

    // Acknowledge and run another frame
    system.bus_mut().write32(0x1F801070, 0).unwrap();
    system.run_frame().unwrap();
    assert_ne!(system.bus_mut().read32(0x1F801070).unwrap() & 1, 0);
}

#[test]
fn frame_sink_sees_gpu_output() {
    use std::cell::Cell;
    use std::rc::Rc;

    let mut system = boot_system();

    // Draw something before the first vblank
    system.bus_mut().write32(0x1F801810, 0x02FFFFFF).unwrap();
    system.bus_mut().write32(0x1F801810, 0x00000000).unwrap();
    system.bus_mut().write32(0x1F801810, 0x00010001).unwrap();

    let seen = Rc::new(Cell::new(0u16));
    let probe = seen.clone();
    system.set_frame_sink(Box::new(move |vram| {
        probe.set(vram[0]);
    }));

    system.run_frame().unwrap();
    assert_eq!(seen.get(), 0x7FFF);
}
