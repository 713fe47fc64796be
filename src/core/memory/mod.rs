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

//! Memory bus implementation for PlayStation 1 emulator
//!
//! The Bus is the central component for all memory operations in the
//! emulator. It manages address translation, memory mapping, and routing of
//! read/write operations to RAM, scratchpad, BIOS and the peripherals.
//!
//! # Memory Map
//!
//! | Physical Address Range | Region       | Size   |
//! |------------------------|--------------|--------|
//! | 0x00000000-0x001FFFFF  | RAM          | 2MB    |
//! | 0x1F000000-0x1F7FFFFF  | Expansion 1  | -      |
//! | 0x1F800000-0x1F8003FF  | Scratchpad   | 1KB    |
//! | 0x1F801000-0x1F80103F  | Mem control  | -      |
//! | 0x1F801040-0x1F80105F  | SIO          | 32B    |
//! | 0x1F801060-0x1F801063  | RAM size     | 4B     |
//! | 0x1F801070-0x1F801077  | INTC         | 8B     |
//! | 0x1F801080-0x1F8010FF  | DMA          | 128B   |
//! | 0x1F801100-0x1F80112F  | Timers       | 48B    |
//! | 0x1F801800-0x1F801803  | CD-ROM       | 4B     |
//! | 0x1F801810-0x1F801817  | GPU          | 8B     |
//! | 0x1F801820-0x1F801827  | MDEC         | 8B     |
//! | 0x1F801C00-0x1F801E7F  | SPU          | 640B   |
//! | 0x1F802000-0x1F80207F  | Expansion 2  | -      |
//! | 0x1FC00000-0x1FC7FFFF  | BIOS ROM     | 512KB  |
//! | 0xFFFE0130             | Cache ctrl   | 4B     |
//!
//! # Address Translation
//!
//! KUSEG, KSEG0 and KSEG1 all alias the same physical space; masking with
//! `0x1FFF_FFFF` collapses the segments in one step.
//!
//! # Example
//!
//! ```
//! use sable::core::memory::Bus;
//!
//! let mut bus = Bus::new();
//!
//! // Write to RAM via KSEG0, read it back through the other segments
//! bus.write32(0x80000000, 0x12345678).unwrap();
//! assert_eq!(bus.read32(0x00000000).unwrap(), 0x12345678);
//! assert_eq!(bus.read32(0xA0000000).unwrap(), 0x12345678);
//! ```

use crate::core::cdrom::CdRom;
use crate::core::controller::Sio;
use crate::core::dma::Dma;
use crate::core::error::{EmulatorError, Result};
use crate::core::gpu::Gpu;
use crate::core::interrupt::InterruptController;
use crate::core::loader::Executable;
use crate::core::mdec::Mdec;
use crate::core::spu::Spu;
use crate::core::timer::Timers;
use crate::core::timing::Scheduler;
use std::cell::RefCell;
use std::fs::File;
use std::io::Read;
use std::rc::Rc;

/// Memory region identification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryRegion {
    /// Main RAM (2MB)
    Ram,
    /// Expansion region 1 (no hardware present)
    Expansion1,
    /// Scratchpad (1KB)
    Scratchpad,
    /// Memory/bus configuration registers
    MemControl,
    /// Serial controller port
    Sio,
    /// RAM size register
    RamSize,
    /// Interrupt controller
    Intc,
    /// DMA controller
    Dma,
    /// Timer bank
    Timers,
    /// CD-ROM drive
    CdRom,
    /// GPU ports
    Gpu,
    /// MDEC ports
    Mdec,
    /// SPU register file
    Spu,
    /// Expansion region 2 (POST display)
    Expansion2,
    /// BIOS ROM
    Bios,
    /// Cache control word
    CacheControl,
    /// Unmapped
    Unmapped,
}

/// Memory bus managing all memory accesses
///
/// Owns the backing stores (RAM, scratchpad, BIOS) and shared handles to
/// every peripheral so memory-mapped accesses can be routed. The handles
/// are `Rc<RefCell<..>>` because the system loop and DMA engine touch the
/// same devices outside of bus dispatch.
pub struct Bus {
    /// Main RAM (2MB)
    ram: Vec<u8>,

    /// Scratchpad (1KB fast on-chip RAM)
    scratchpad: [u8; Self::SCRATCHPAD_SIZE],

    /// BIOS ROM (512KB)
    bios: Vec<u8>,

    /// Cache Control register (0xFFFE0130)
    cache_control: u32,

    /// Event scheduler, shared with peripherals that self-schedule
    scheduler: Rc<RefCell<Scheduler>>,

    /// Interrupt controller
    intc: Rc<RefCell<InterruptController>>,

    /// GPU
    gpu: Rc<RefCell<Gpu>>,

    /// DMA controller
    dma: Rc<RefCell<Dma>>,

    /// CD-ROM drive
    cdrom: Rc<RefCell<CdRom>>,

    /// Serial controller port
    sio: Rc<RefCell<Sio>>,

    /// Timer bank
    timers: Rc<RefCell<Timers>>,

    /// SPU register file
    spu: Rc<RefCell<Spu>>,

    /// MDEC register skeleton
    mdec: Rc<RefCell<Mdec>>,

    /// Side-load executable, consumed by the CPU's shell-entry hook
    pending_exe: Option<Executable>,
}

impl Bus {
    /// RAM size (2MB)
    pub const RAM_SIZE: usize = 2 * 1024 * 1024;

    /// Scratchpad size (1KB)
    const SCRATCHPAD_SIZE: usize = 1024;

    /// BIOS size (512KB)
    pub const BIOS_SIZE: usize = 512 * 1024;

    const SCRATCHPAD_START: u32 = 0x1F80_0000;
    const BIOS_START: u32 = 0x1FC0_0000;

    /// Create a fully wired bus
    ///
    /// All backing stores start zeroed; peripherals are constructed and
    /// connected to the shared scheduler. Load a BIOS before booting.
    pub fn new() -> Self {
        let scheduler = Rc::new(RefCell::new(Scheduler::new()));

        let gpu = Rc::new(RefCell::new(Gpu::new(scheduler.clone())));
        let cdrom = Rc::new(RefCell::new(CdRom::new(scheduler.clone())));
        let sio = Rc::new(RefCell::new(Sio::new(scheduler.clone())));
        let dma = {
            let mut sched = scheduler.borrow_mut();
            Rc::new(RefCell::new(Dma::new(&mut sched)))
        };

        Self {
            ram: vec![0u8; Self::RAM_SIZE],
            scratchpad: [0u8; Self::SCRATCHPAD_SIZE],
            bios: vec![0u8; Self::BIOS_SIZE],
            cache_control: 0,
            scheduler,
            intc: Rc::new(RefCell::new(InterruptController::new())),
            gpu,
            dma,
            cdrom,
            sio,
            timers: Rc::new(RefCell::new(Timers::new())),
            spu: Rc::new(RefCell::new(Spu::new())),
            mdec: Rc::new(RefCell::new(Mdec::new())),
            pending_exe: None,
        }
    }

    /// Reset volatile state (RAM, scratchpad, peripherals)
    ///
    /// BIOS contents survive, as ROM does across a power cycle.
    pub fn reset(&mut self) {
        self.ram.fill(0);
        self.scratchpad.fill(0);
        self.cache_control = 0;
        self.scheduler.borrow_mut().reset();
        self.gpu.borrow_mut().reset();
        self.dma.borrow_mut().reset();
        self.cdrom.borrow_mut().reset();
        self.sio.borrow_mut().reset();
        self.timers.borrow_mut().reset();
        self.spu.borrow_mut().reset();
        self.mdec.borrow_mut().reset();
        *self.intc.borrow_mut() = InterruptController::new();
    }

    /// Load BIOS from file
    ///
    /// The file must be exactly 512KB.
    ///
    /// # Errors
    ///
    /// [`EmulatorError::BiosNotFound`] when the file cannot be opened,
    /// [`EmulatorError::InvalidBiosSize`] on a size mismatch.
    pub fn load_bios(&mut self, path: &str) -> Result<()> {
        let mut file = File::open(path).map_err(|_| EmulatorError::BiosNotFound {
            path: path.to_string(),
        })?;

        let metadata = file.metadata()?;
        if metadata.len() != Self::BIOS_SIZE as u64 {
            return Err(EmulatorError::InvalidBiosSize {
                expected: Self::BIOS_SIZE,
                got: metadata.len() as usize,
            });
        }

        file.read_exact(&mut self.bios)?;

        log::info!("Bus: BIOS loaded from {}", path);
        Ok(())
    }

    /// Arm a PS-EXE image for side-loading at the shell entry point
    pub fn arm_exe(&mut self, exe: Executable) {
        log::info!("Bus: EXE side-load armed (entry 0x{:08X})", exe.entry_pc());
        self.pending_exe = Some(exe);
    }

    /// Take the armed executable, if any (the hook fires at most once)
    pub fn take_exe(&mut self) -> Option<Executable> {
        self.pending_exe.take()
    }

    // --- Shared handles ---

    /// Scheduler handle
    pub fn scheduler(&self) -> Rc<RefCell<Scheduler>> {
        Rc::clone(&self.scheduler)
    }

    /// Interrupt controller handle
    pub fn interrupt_controller(&self) -> Rc<RefCell<InterruptController>> {
        Rc::clone(&self.intc)
    }

    /// GPU handle
    pub fn gpu(&self) -> Rc<RefCell<Gpu>> {
        Rc::clone(&self.gpu)
    }

    /// DMA controller handle
    pub fn dma(&self) -> Rc<RefCell<Dma>> {
        Rc::clone(&self.dma)
    }

    /// CD-ROM drive handle
    pub fn cdrom(&self) -> Rc<RefCell<CdRom>> {
        Rc::clone(&self.cdrom)
    }

    /// Controller port handle
    pub fn sio(&self) -> Rc<RefCell<Sio>> {
        Rc::clone(&self.sio)
    }

    /// Timer bank handle
    pub fn timers(&self) -> Rc<RefCell<Timers>> {
        Rc::clone(&self.timers)
    }

    /// SPU handle
    pub fn spu(&self) -> Rc<RefCell<Spu>> {
        Rc::clone(&self.spu)
    }

    /// MDEC handle
    pub fn mdec(&self) -> Rc<RefCell<Mdec>> {
        Rc::clone(&self.mdec)
    }

    /// True when an unmasked interrupt is waiting in the INTC
    pub fn irq_pending(&self) -> bool {
        self.intc.borrow().is_pending()
    }

    /// Direct RAM access (loader, tests)
    pub fn ram_mut(&mut self) -> &mut [u8] {
        &mut self.ram
    }

    // --- Address decoding ---

    /// Collapse kuseg/kseg0/kseg1 into the physical address
    #[inline(always)]
    fn translate_address(vaddr: u32) -> u32 {
        vaddr & 0x1FFF_FFFF
    }

    /// Identify the memory region for a virtual address
    pub fn identify_region(&self, vaddr: u32) -> MemoryRegion {
        let paddr = Self::translate_address(vaddr);

        match paddr {
            0x0000_0000..=0x001F_FFFF => MemoryRegion::Ram,
            0x1F00_0000..=0x1F7F_FFFF => MemoryRegion::Expansion1,
            0x1F80_0000..=0x1F80_03FF => MemoryRegion::Scratchpad,
            0x1F80_1000..=0x1F80_103F => MemoryRegion::MemControl,
            0x1F80_1040..=0x1F80_105F => MemoryRegion::Sio,
            0x1F80_1060..=0x1F80_1063 => MemoryRegion::RamSize,
            0x1F80_1070..=0x1F80_1077 => MemoryRegion::Intc,
            0x1F80_1080..=0x1F80_10FF => MemoryRegion::Dma,
            0x1F80_1100..=0x1F80_112F => MemoryRegion::Timers,
            0x1F80_1800..=0x1F80_1803 => MemoryRegion::CdRom,
            0x1F80_1810..=0x1F80_1817 => MemoryRegion::Gpu,
            0x1F80_1820..=0x1F80_1827 => MemoryRegion::Mdec,
            0x1F80_1C00..=0x1F80_1E7F => MemoryRegion::Spu,
            0x1F80_2000..=0x1F80_207F => MemoryRegion::Expansion2,
            0x1FC0_0000..=0x1FC7_FFFF => MemoryRegion::Bios,
            0x1FFE_0130 => MemoryRegion::CacheControl,
            _ => MemoryRegion::Unmapped,
        }
    }

    // --- Reads ---

    /// Read an 8-bit value
    pub fn read8(&mut self, vaddr: u32) -> Result<u8> {
        let paddr = Self::translate_address(vaddr);

        match self.identify_region(vaddr) {
            MemoryRegion::Ram => Ok(self.ram[paddr as usize]),
            MemoryRegion::Scratchpad => {
                Ok(self.scratchpad[(paddr - Self::SCRATCHPAD_START) as usize])
            }
            MemoryRegion::Bios => Ok(self.bios[(paddr - Self::BIOS_START) as usize]),
            MemoryRegion::CdRom => Ok(self.cdrom.borrow_mut().read(paddr)),
            MemoryRegion::Sio => Ok(self.sio.borrow_mut().read8(paddr)),
            MemoryRegion::Expansion1 => {
                // Expansion ROM header reads as absent (0x00), the rest
                // floats high
                if (0x1F00_0000..=0x1F00_00FF).contains(&paddr) {
                    Ok(0x00)
                } else {
                    Ok(0xFF)
                }
            }
            MemoryRegion::Expansion2 => Ok(0xFF),
            _ => {
                // Word peripherals serve the low lane for narrow reads
                self.read32(vaddr & !3).map(|w| w as u8)
            }
        }
    }

    /// Read a 16-bit value (2-byte aligned)
    pub fn read16(&mut self, vaddr: u32) -> Result<u16> {
        if vaddr & 1 != 0 {
            return Err(EmulatorError::UnalignedAccess {
                address: vaddr,
                size: 2,
            });
        }

        let paddr = Self::translate_address(vaddr);

        match self.identify_region(vaddr) {
            MemoryRegion::Ram => {
                let offset = paddr as usize;
                Ok(u16::from_le_bytes([self.ram[offset], self.ram[offset + 1]]))
            }
            MemoryRegion::Scratchpad => {
                let offset = (paddr - Self::SCRATCHPAD_START) as usize;
                Ok(u16::from_le_bytes([
                    self.scratchpad[offset],
                    self.scratchpad[offset + 1],
                ]))
            }
            MemoryRegion::Bios => {
                let offset = (paddr - Self::BIOS_START) as usize;
                Ok(u16::from_le_bytes([
                    self.bios[offset],
                    self.bios[offset + 1],
                ]))
            }
            MemoryRegion::Sio => Ok(self.sio.borrow_mut().read16(paddr)),
            MemoryRegion::Intc => Ok(self.read_intc(paddr) as u16),
            MemoryRegion::Timers => Ok(self.timers.borrow_mut().read(paddr)),
            MemoryRegion::Spu => Ok(self.spu.borrow_mut().read16(paddr)),
            MemoryRegion::Expansion1 => Ok(0xFFFF),
            _ => self.read32(vaddr & !3).map(|w| w as u16),
        }
    }

    /// Read a 32-bit value (4-byte aligned)
    pub fn read32(&mut self, vaddr: u32) -> Result<u32> {
        if vaddr & 3 != 0 {
            return Err(EmulatorError::UnalignedAccess {
                address: vaddr,
                size: 4,
            });
        }

        let paddr = Self::translate_address(vaddr);

        match self.identify_region(vaddr) {
            MemoryRegion::Ram => {
                let offset = paddr as usize;
                Ok(u32::from_le_bytes([
                    self.ram[offset],
                    self.ram[offset + 1],
                    self.ram[offset + 2],
                    self.ram[offset + 3],
                ]))
            }
            MemoryRegion::Scratchpad => {
                let offset = (paddr - Self::SCRATCHPAD_START) as usize;
                Ok(u32::from_le_bytes([
                    self.scratchpad[offset],
                    self.scratchpad[offset + 1],
                    self.scratchpad[offset + 2],
                    self.scratchpad[offset + 3],
                ]))
            }
            MemoryRegion::Bios => {
                let offset = (paddr - Self::BIOS_START) as usize;
                Ok(u32::from_le_bytes([
                    self.bios[offset],
                    self.bios[offset + 1],
                    self.bios[offset + 2],
                    self.bios[offset + 3],
                ]))
            }
            MemoryRegion::MemControl | MemoryRegion::RamSize => {
                log::trace!("Bus: memory-control read @ 0x{:08X}", paddr);
                Ok(0)
            }
            MemoryRegion::Sio => Ok(self.sio.borrow_mut().read16(paddr) as u32),
            MemoryRegion::Intc => Ok(self.read_intc(paddr)),
            MemoryRegion::Dma => Ok(self.dma.borrow_mut().read(paddr)),
            MemoryRegion::Timers => Ok(self.timers.borrow_mut().read(paddr) as u32),
            MemoryRegion::CdRom => Ok(self.cdrom.borrow_mut().read(paddr) as u32),
            MemoryRegion::Gpu => {
                let mut gpu = self.gpu.borrow_mut();
                match paddr {
                    0x1F80_1810 => Ok(gpu.read_gpuread()),
                    _ => Ok(gpu.read_gpustat()),
                }
            }
            MemoryRegion::Mdec => {
                let mut mdec = self.mdec.borrow_mut();
                match paddr {
                    0x1F80_1820 => Ok(mdec.read_data()),
                    _ => Ok(mdec.read_status()),
                }
            }
            MemoryRegion::Spu => {
                let mut spu = self.spu.borrow_mut();
                let lo = spu.read16(paddr) as u32;
                let hi = spu.read16(paddr + 2) as u32;
                Ok((hi << 16) | lo)
            }
            MemoryRegion::Expansion1 => {
                // The BIOS probes the expansion ROM entry points as
                // function pointers; absent ROM must read as 0
                if (0x1F00_0000..=0x1F00_00FF).contains(&paddr) {
                    Ok(0x0000_0000)
                } else {
                    Ok(0xFFFF_FFFF)
                }
            }
            MemoryRegion::Expansion2 => Ok(0xFFFF_FFFF),
            MemoryRegion::CacheControl => Ok(self.cache_control),
            MemoryRegion::Unmapped => Err(EmulatorError::InvalidMemoryAccess { address: vaddr }),
        }
    }

    // --- Writes ---

    /// Write an 8-bit value
    pub fn write8(&mut self, vaddr: u32, value: u8) -> Result<()> {
        let paddr = Self::translate_address(vaddr);

        match self.identify_region(vaddr) {
            MemoryRegion::Ram => {
                self.ram[paddr as usize] = value;
                Ok(())
            }
            MemoryRegion::Scratchpad => {
                self.scratchpad[(paddr - Self::SCRATCHPAD_START) as usize] = value;
                Ok(())
            }
            MemoryRegion::Bios => {
                log::trace!("Bus: write to BIOS ROM @ 0x{:08X} ignored", paddr);
                Ok(())
            }
            MemoryRegion::CdRom => self.cdrom.borrow_mut().write(paddr, value),
            MemoryRegion::Sio => {
                self.sio.borrow_mut().write8(paddr, value);
                Ok(())
            }
            MemoryRegion::Expansion2 => {
                if paddr == 0x1F80_2041 {
                    log::debug!("Bus: POST = 0x{:02X}", value);
                } else {
                    log::trace!(
                        "Bus: expansion 2 write8 @ 0x{:08X} = 0x{:02X} ignored",
                        paddr,
                        value
                    );
                }
                Ok(())
            }
            MemoryRegion::Expansion1 => {
                log::trace!(
                    "Bus: expansion 1 write8 @ 0x{:08X} = 0x{:02X} ignored",
                    paddr,
                    value
                );
                Ok(())
            }
            // Word peripherals take narrow writes replicated into the lanes
            _ => self.write32(vaddr & !3, u32::from_le_bytes([value; 4])),
        }
    }

    /// Write a 16-bit value (2-byte aligned)
    pub fn write16(&mut self, vaddr: u32, value: u16) -> Result<()> {
        if vaddr & 1 != 0 {
            return Err(EmulatorError::UnalignedAccess {
                address: vaddr,
                size: 2,
            });
        }

        let paddr = Self::translate_address(vaddr);
        let bytes = value.to_le_bytes();

        match self.identify_region(vaddr) {
            MemoryRegion::Ram => {
                let offset = paddr as usize;
                self.ram[offset] = bytes[0];
                self.ram[offset + 1] = bytes[1];
                Ok(())
            }
            MemoryRegion::Scratchpad => {
                let offset = (paddr - Self::SCRATCHPAD_START) as usize;
                self.scratchpad[offset] = bytes[0];
                self.scratchpad[offset + 1] = bytes[1];
                Ok(())
            }
            MemoryRegion::Bios => {
                log::trace!("Bus: write to BIOS ROM @ 0x{:08X} ignored", paddr);
                Ok(())
            }
            MemoryRegion::Sio => {
                self.sio.borrow_mut().write16(paddr, value);
                Ok(())
            }
            MemoryRegion::Intc => {
                self.write_intc(paddr, value as u32);
                Ok(())
            }
            MemoryRegion::Timers => {
                self.timers.borrow_mut().write(paddr, value);
                Ok(())
            }
            MemoryRegion::Spu => {
                self.spu.borrow_mut().write16(paddr, value);
                Ok(())
            }
            MemoryRegion::MemControl | MemoryRegion::RamSize => {
                log::trace!(
                    "Bus: memory-control write16 @ 0x{:08X} = 0x{:04X} ignored",
                    paddr,
                    value
                );
                Ok(())
            }
            _ => {
                let wide = value as u32;
                self.write32(vaddr & !3, (wide << 16) | wide)
            }
        }
    }

    /// Write a 32-bit value (4-byte aligned)
    pub fn write32(&mut self, vaddr: u32, value: u32) -> Result<()> {
        if vaddr & 3 != 0 {
            return Err(EmulatorError::UnalignedAccess {
                address: vaddr,
                size: 4,
            });
        }

        let paddr = Self::translate_address(vaddr);
        let bytes = value.to_le_bytes();

        match self.identify_region(vaddr) {
            MemoryRegion::Ram => {
                let offset = paddr as usize;
                self.ram[offset..offset + 4].copy_from_slice(&bytes);
                Ok(())
            }
            MemoryRegion::Scratchpad => {
                let offset = (paddr - Self::SCRATCHPAD_START) as usize;
                self.scratchpad[offset..offset + 4].copy_from_slice(&bytes);
                Ok(())
            }
            MemoryRegion::Bios => {
                log::trace!("Bus: write to BIOS ROM @ 0x{:08X} ignored", paddr);
                Ok(())
            }
            MemoryRegion::MemControl | MemoryRegion::RamSize => {
                // BIOS bus configuration; accepted and ignored
                log::trace!(
                    "Bus: memory-control write @ 0x{:08X} = 0x{:08X} ignored",
                    paddr,
                    value
                );
                Ok(())
            }
            MemoryRegion::Sio => {
                self.sio.borrow_mut().write16(paddr, value as u16);
                Ok(())
            }
            MemoryRegion::Intc => {
                self.write_intc(paddr, value);
                Ok(())
            }
            MemoryRegion::Dma => self.write_dma(paddr, value),
            MemoryRegion::Timers => {
                self.timers.borrow_mut().write(paddr, value as u16);
                Ok(())
            }
            MemoryRegion::CdRom => self.cdrom.borrow_mut().write(paddr, value as u8),
            MemoryRegion::Gpu => {
                let mut gpu = self.gpu.borrow_mut();
                match paddr {
                    0x1F80_1810 => gpu.write_gp0(value),
                    _ => gpu.write_gp1(value),
                }
            }
            MemoryRegion::Mdec => {
                {
                    let mut mdec = self.mdec.borrow_mut();
                    match paddr {
                        0x1F80_1820 => mdec.write_command(value),
                        _ => mdec.write_control(value),
                    }
                }
                // A finished macroblock raises the output request line
                let out_ready = self.mdec.borrow().output_requested();
                self.dma
                    .borrow_mut()
                    .set_drq(crate::core::dma::CH_MDEC_OUT, out_ready);
                Ok(())
            }
            MemoryRegion::Spu => {
                let mut spu = self.spu.borrow_mut();
                spu.write16(paddr, value as u16);
                spu.write16(paddr + 2, (value >> 16) as u16);
                Ok(())
            }
            MemoryRegion::Expansion1 | MemoryRegion::Expansion2 => {
                log::trace!(
                    "Bus: expansion write @ 0x{:08X} = 0x{:08X} ignored",
                    paddr,
                    value
                );
                Ok(())
            }
            MemoryRegion::CacheControl => {
                log::trace!("Bus: cache control = 0x{:08X}", value);
                self.cache_control = value;
                Ok(())
            }
            MemoryRegion::Unmapped => Err(EmulatorError::InvalidMemoryAccess { address: vaddr }),
        }
    }

    // --- Peripheral glue ---

    /// I_STAT / I_MASK reads
    fn read_intc(&self, paddr: u32) -> u32 {
        let intc = self.intc.borrow();
        match paddr & !3 {
            0x1F80_1070 => intc.read_status(),
            _ => intc.read_mask(),
        }
    }

    /// I_STAT / I_MASK writes
    fn write_intc(&mut self, paddr: u32, value: u32) {
        let mut intc = self.intc.borrow_mut();
        match paddr & !3 {
            0x1F80_1070 => intc.write_status(value),
            _ => intc.write_mask(value),
        }
    }

    /// DMA register writes, running any transfer the write activates
    fn write_dma(&mut self, paddr: u32, value: u32) -> Result<()> {
        let effect = self.dma.borrow_mut().write(paddr, value);

        if effect.raise_irq {
            self.intc.borrow_mut().send_interrupt(3);
        }

        if let Some(channel) = effect.start_channel {
            self.run_dma_channel(channel)?;
        }

        Ok(())
    }

    /// Execute an activated DMA transfer
    ///
    /// Data movement is immediate; the per-channel completion event fires
    /// later to clear the start bit and raise the interrupt, modeling bus
    /// occupancy.
    fn run_dma_channel(&mut self, channel: usize) -> Result<()> {
        let setup = self.dma.borrow().channel_setup(channel);

        let words = match channel {
            crate::core::dma::CH_GPU => self.run_dma_gpu(&setup)?,
            crate::core::dma::CH_CDROM => self.run_dma_cdrom(&setup)?,
            crate::core::dma::CH_SPU => self.run_dma_spu(&setup)?,
            crate::core::dma::CH_OTC => self.run_dma_otc(&setup)?,
            crate::core::dma::CH_MDEC_IN => self.run_dma_mdec_in(&setup)?,
            crate::core::dma::CH_MDEC_OUT => self.run_dma_mdec_out(&setup)?,
            _ => {
                return Err(EmulatorError::InvalidState {
                    message: format!("DMA transfer on unhandled channel {}", channel),
                })
            }
        };

        let mut sched = self.scheduler.borrow_mut();
        self.dma
            .borrow_mut()
            .transfer_started(channel, words, &mut sched);
        Ok(())
    }

    /// Word read from RAM at a DMA-masked address
    #[inline(always)]
    fn dma_ram_read(&self, addr: u32) -> u32 {
        let offset = (addr & 0x1F_FFFC) as usize;
        u32::from_le_bytes([
            self.ram[offset],
            self.ram[offset + 1],
            self.ram[offset + 2],
            self.ram[offset + 3],
        ])
    }

    /// Word write to RAM at a DMA-masked address
    #[inline(always)]
    fn dma_ram_write(&mut self, addr: u32, value: u32) {
        let offset = (addr & 0x1F_FFFC) as usize;
        self.ram[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    /// GPU channel: slice transfers both ways, linked-list command chains
    fn run_dma_gpu(&mut self, setup: &crate::core::dma::ChannelSetup) -> Result<i64> {
        use crate::core::dma::SyncMode;

        let gpu = self.gpu.clone();
        let mut addr = setup.base_address;
        let mut words: i64 = 0;

        match setup.sync_mode {
            SyncMode::Slice => {
                let total = setup.total_words() as i64;
                if setup.from_ram {
                    for _ in 0..total {
                        gpu.borrow_mut().write_gp0(self.dma_ram_read(addr))?;
                        addr = addr.wrapping_add(4);
                    }
                } else {
                    for _ in 0..total {
                        let data = gpu.borrow_mut().read_gpuread();
                        self.dma_ram_write(addr, data);
                        addr = addr.wrapping_add(4);
                    }
                }
                words = total;
            }
            SyncMode::LinkedList => {
                // Chase the ordering-table chain; each node is a header
                // with a word count and a pointer to the next node
                loop {
                    let header = self.dma_ram_read(addr);
                    addr = addr.wrapping_add(4);

                    let count = header >> 24;
                    for _ in 0..count {
                        gpu.borrow_mut().write_gp0(self.dma_ram_read(addr))?;
                        addr = addr.wrapping_add(4);
                    }
                    words += count as i64;

                    if header & (1 << 23) != 0 {
                        break;
                    }
                    addr = header & 0x1F_FFFC;
                }
            }
            SyncMode::Burst => {
                return Err(EmulatorError::InvalidState {
                    message: "GPU DMA in burst mode".into(),
                })
            }
        }

        Ok(words)
    }

    /// CD-ROM channel: burst drain of the sector buffer into RAM
    fn run_dma_cdrom(&mut self, setup: &crate::core::dma::ChannelSetup) -> Result<i64> {
        let cdrom = self.cdrom.clone();
        let mut addr = setup.base_address;
        let words = setup.block_size as i64;

        for _ in 0..words {
            let data = cdrom.borrow_mut().dma_read_word();
            self.dma_ram_write(addr, data);
            addr = addr.wrapping_add(4);
        }

        Ok(words)
    }

    /// SPU channel: slice transfer against sound RAM
    fn run_dma_spu(&mut self, setup: &crate::core::dma::ChannelSetup) -> Result<i64> {
        let spu = self.spu.clone();
        let mut addr = setup.base_address;
        let words = setup.total_words() as i64;

        if setup.from_ram {
            for _ in 0..words {
                spu.borrow_mut().dma_write_word(self.dma_ram_read(addr));
                addr = addr.wrapping_add(4);
            }
        } else {
            for _ in 0..words {
                let data = spu.borrow_mut().dma_read_word();
                self.dma_ram_write(addr, data);
                addr = addr.wrapping_add(4);
            }
        }

        Ok(words)
    }

    /// OTC channel: generate the linked-list terminator chain
    fn run_dma_otc(&mut self, setup: &crate::core::dma::ChannelSetup) -> Result<i64> {
        let mut addr = setup.base_address;
        let count = setup.block_size as i64;

        for i in (1..=count).rev() {
            let data = if i != 1 {
                addr.wrapping_sub(4) & 0xFF_FFFF
            } else {
                0x00FF_FFFF
            };
            self.dma_ram_write(addr, data);
            addr = addr.wrapping_sub(4);
        }

        Ok(count)
    }

    /// MDEC input channel: feed the command port
    fn run_dma_mdec_in(&mut self, setup: &crate::core::dma::ChannelSetup) -> Result<i64> {
        let mdec = self.mdec.clone();
        let mut addr = setup.base_address;
        let words = setup.total_words() as i64;

        for _ in 0..words {
            mdec.borrow_mut().write_command(self.dma_ram_read(addr));
            addr = addr.wrapping_add(4);
        }

        Ok(words)
    }

    /// MDEC output channel: drain decoded words into RAM
    fn run_dma_mdec_out(&mut self, setup: &crate::core::dma::ChannelSetup) -> Result<i64> {
        let mdec = self.mdec.clone();
        let mut addr = setup.base_address;
        let words = setup.total_words() as i64;

        for _ in 0..words {
            let data = mdec.borrow_mut().read_data();
            self.dma_ram_write(addr, data);
            addr = addr.wrapping_add(4);
        }

        Ok(words)
    }

    /// Write raw words into the BIOS image (test helper)
    #[cfg(test)]
    pub(crate) fn patch_bios_for_test(&mut self, offset: usize, words: &[u32]) {
        for (i, word) in words.iter().enumerate() {
            let at = offset + 4 * i;
            self.bios[at..at + 4].copy_from_slice(&word.to_le_bytes());
        }
    }
}

impl Default for Bus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_translation_collapses_segments() {
        let mut bus = Bus::new();

        bus.write32(0x0000_1000, 0xAAAA_AAAA).unwrap();
        assert_eq!(bus.read32(0x8000_1000).unwrap(), 0xAAAA_AAAA);

        bus.write32(0xA000_1000, 0xBBBB_BBBB).unwrap();
        assert_eq!(bus.read32(0x0000_1000).unwrap(), 0xBBBB_BBBB);
    }

    #[test]
    fn test_ram_write_read_identity() {
        let mut bus = Bus::new();

        bus.write32(0x8000_0000, 0x1234_5678).unwrap();
        assert_eq!(bus.read32(0x8000_0000).unwrap(), 0x1234_5678);

        bus.write8(0x8000_0004, 0x42).unwrap();
        assert_eq!(bus.read8(0x8000_0004).unwrap(), 0x42);

        bus.write16(0x8000_0006, 0xBEEF).unwrap();
        assert_eq!(bus.read16(0x8000_0006).unwrap(), 0xBEEF);
    }

    #[test]
    fn test_little_endian_lanes() {
        let mut bus = Bus::new();

        bus.write8(0x8000_0000, 0x12).unwrap();
        bus.write8(0x8000_0001, 0x34).unwrap();
        bus.write8(0x8000_0002, 0x56).unwrap();
        bus.write8(0x8000_0003, 0x78).unwrap();

        assert_eq!(bus.read32(0x8000_0000).unwrap(), 0x7856_3412);
        assert_eq!(bus.read16(0x8000_0002).unwrap(), 0x7856);
    }

    #[test]
    fn test_bios_is_read_only() {
        let mut bus = Bus::new();

        bus.write32(0xBFC0_0000, 0xDEAD_BEEF).unwrap();
        assert_eq!(bus.read32(0xBFC0_0000).unwrap(), 0);
    }

    #[test]
    fn test_scratchpad_roundtrip() {
        let mut bus = Bus::new();

        bus.write32(0x1F80_0000, 0xABCD_EF00).unwrap();
        assert_eq!(bus.read32(0x1F80_0000).unwrap(), 0xABCD_EF00);

        let end = 0x1F80_0000 + 1024 - 4;
        bus.write32(end, 0xCAFE_BABE).unwrap();
        assert_eq!(bus.read32(end).unwrap(), 0xCAFE_BABE);
    }

    #[test]
    fn test_alignment_errors() {
        let mut bus = Bus::new();

        assert!(bus.read32(0x8000_0001).is_err());
        assert!(bus.read16(0x8000_0001).is_err());
        assert!(bus.write32(0x8000_0002, 0).is_err());
        assert!(bus.write16(0x8000_0001, 0).is_err());
        assert!(bus.read8(0x8000_0001).is_ok());
    }

    #[test]
    fn test_region_identification() {
        let bus = Bus::new();

        assert_eq!(bus.identify_region(0x0000_0000), MemoryRegion::Ram);
        assert_eq!(bus.identify_region(0x1F80_0000), MemoryRegion::Scratchpad);
        assert_eq!(bus.identify_region(0x1F80_1074), MemoryRegion::Intc);
        assert_eq!(bus.identify_region(0x1F80_1080), MemoryRegion::Dma);
        assert_eq!(bus.identify_region(0x1F80_1110), MemoryRegion::Timers);
        assert_eq!(bus.identify_region(0x1F80_1800), MemoryRegion::CdRom);
        assert_eq!(bus.identify_region(0x1F80_1810), MemoryRegion::Gpu);
        assert_eq!(bus.identify_region(0x1F80_1C00), MemoryRegion::Spu);
        assert_eq!(bus.identify_region(0xBFC0_0000), MemoryRegion::Bios);
        assert_eq!(bus.identify_region(0xFFFE_0130), MemoryRegion::CacheControl);
        assert_eq!(bus.identify_region(0x1F90_0000), MemoryRegion::Unmapped);
    }

    #[test]
    fn test_unmapped_access_is_an_error() {
        let mut bus = Bus::new();
        assert!(bus.read32(0x1FFF_FFFC).is_err());
        assert!(bus.write32(0x1FFF_FFFC, 0).is_err());
    }

    #[test]
    fn test_expansion1_reads() {
        let mut bus = Bus::new();

        // ROM header probes read as "no ROM present"
        assert_eq!(bus.read32(0x1F00_0000).unwrap(), 0);
        assert_eq!(bus.read8(0x1F00_0084).unwrap(), 0);

        // The rest of the region floats high
        assert_eq!(bus.read32(0x1F00_0100).unwrap(), 0xFFFF_FFFF);
        assert_eq!(bus.read8(0x1F00_0100).unwrap(), 0xFF);
    }

    #[test]
    fn test_intc_via_bus() {
        let mut bus = Bus::new();

        bus.interrupt_controller().borrow_mut().send_interrupt(0);
        assert_eq!(bus.read32(0x1F80_1070).unwrap(), 1);

        bus.write32(0x1F80_1074, 0x7FF).unwrap();
        assert_eq!(bus.read32(0x1F80_1074).unwrap(), 0x7FF);
        assert!(bus.irq_pending());

        // Acknowledge with AND semantics
        bus.write32(0x1F80_1070, 0).unwrap();
        assert_eq!(bus.read32(0x1F80_1070).unwrap(), 0);
        assert!(!bus.irq_pending());
    }

    #[test]
    fn test_cache_control_word() {
        let mut bus = Bus::new();

        bus.write32(0xFFFE_0130, 0x0001_E988).unwrap();
        assert_eq!(bus.read32(0xFFFE_0130).unwrap(), 0x0001_E988);
    }

    #[test]
    fn test_memory_control_writes_ignored() {
        let mut bus = Bus::new();

        // BIOS bus setup writes must not fault
        bus.write32(0x1F80_1000, 0x1F00_0000).unwrap();
        bus.write32(0x1F80_1060, 0x0000_0B88).unwrap();
        assert_eq!(bus.read32(0x1F80_1000).unwrap(), 0);
    }

    #[test]
    fn test_reset_clears_ram_keeps_bios() {
        let mut bus = Bus::new();

        bus.bios[0] = 0x77;
        bus.write32(0x8000_0000, 0x1234_5678).unwrap();

        bus.reset();

        assert_eq!(bus.read32(0x8000_0000).unwrap(), 0);
        assert_eq!(bus.read8(0xBFC0_0000).unwrap(), 0x77);
    }
}
