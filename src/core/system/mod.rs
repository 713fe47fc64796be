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

//! System integration
//!
//! Ties the CPU, bus and peripherals together and drives the outer
//! emulation loop. Each iteration runs three steps on a shared quantum of
//! guest cycles: the CPU interprets quantum/2 instructions (two cycles
//! each), the timers advance, and the scheduler distributes the same
//! cycles to the pending events. Events that come due are dispatched here,
//! where their effects (interrupt lines, timer gates, frame presentation)
//! are wired between the components.
//!
//! The quantum adapts to the next deadline so events are never overshot by
//! more than one slice.

use super::cdrom::CdRom;
use super::controller::Sio;
use super::cpu::Cpu;
use super::dma::{Dma, CH_CDROM};
use super::error::Result;
use super::gpu::{Gpu, ScanlineOutcome};
use super::interrupt::InterruptController;
use super::loader::Executable;
use super::memory::Bus;
use super::timer::Timers;
use super::timing::{FiredEvent, Scheduler};
use crate::frontend::{FrameSink, InputSource};
use std::cell::RefCell;
use std::rc::Rc;

/// Upper bound on the cycles of one loop slice
const MAX_SLICE_CYCLES: i64 = 128;

/// INTC source indices
mod irq {
    pub const VBLANK: usize = 0;
    pub const CDROM: usize = 2;
    pub const DMA: usize = 3;
    pub const TIMER0: usize = 4;
    pub const SIORX: usize = 7;
}

/// PlayStation system
///
/// # Example
/// ```no_run
/// use sable::core::system::System;
///
/// let mut system = System::new();
/// system.load_bios("SCPH1001.BIN").unwrap();
/// system.load_disc("game.iso").unwrap();
/// system.reset();
/// system.run_frame().unwrap();
/// ```
pub struct System {
    /// CPU core
    cpu: Cpu,

    /// Memory bus (owns the peripheral wiring)
    bus: Bus,

    /// Shared handles for event dispatch
    scheduler: Rc<RefCell<Scheduler>>,
    gpu: Rc<RefCell<Gpu>>,
    dma: Rc<RefCell<Dma>>,
    cdrom: Rc<RefCell<CdRom>>,
    sio: Rc<RefCell<Sio>>,
    timers: Rc<RefCell<Timers>>,
    intc: Rc<RefCell<InterruptController>>,

    /// Presentation callback, invoked at each vertical blank
    frame_sink: Option<FrameSink>,

    /// Input callback, sampled at each vertical blank
    input_source: Option<InputSource>,

    /// Total guest cycles executed
    cycles: u64,

    /// Set by the scanline handler when a frame completes
    frame_complete: bool,
}

impl System {
    /// Create a new system with all components wired together
    pub fn new() -> Self {
        let bus = Bus::new();

        let scheduler = bus.scheduler();
        let gpu = bus.gpu();
        let dma = bus.dma();
        let cdrom = bus.cdrom();
        let sio = bus.sio();
        let timers = bus.timers();
        let intc = bus.interrupt_controller();

        log::info!("System: components initialized");

        Self {
            cpu: Cpu::new(),
            bus,
            scheduler,
            gpu,
            dma,
            cdrom,
            sio,
            timers,
            intc,
            frame_sink: None,
            input_source: None,
            cycles: 0,
            frame_complete: false,
        }
    }

    /// Load the BIOS ROM image
    pub fn load_bios(&mut self, path: &str) -> Result<()> {
        self.bus.load_bios(path)
    }

    /// Insert a disc image
    pub fn load_disc(&mut self, path: &str) -> Result<()> {
        self.cdrom.borrow_mut().load_disc(path)
    }

    /// Arm a PS-EXE for side-loading at the shell entry
    pub fn load_exe(&mut self, path: &str) -> Result<()> {
        let exe = Executable::from_file(path)?;
        self.bus.arm_exe(exe);
        Ok(())
    }

    /// Install the presentation callback
    pub fn set_frame_sink(&mut self, sink: FrameSink) {
        self.frame_sink = Some(sink);
    }

    /// Install the input callback
    pub fn set_input_source(&mut self, source: InputSource) {
        self.input_source = Some(source);
    }

    /// Reset everything as on a power cycle (BIOS and disc stay)
    pub fn reset(&mut self) {
        self.cpu.reset();
        self.bus.reset();
        self.cycles = 0;
        self.frame_complete = false;
    }

    /// Current program counter
    pub fn pc(&self) -> u32 {
        self.cpu.pc()
    }

    /// Total guest cycles executed
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// CPU core access
    pub fn cpu(&self) -> &Cpu {
        &self.cpu
    }

    /// Bus access (tests, debugging)
    pub fn bus_mut(&mut self) -> &mut Bus {
        &mut self.bus
    }

    /// GPU handle (framebuffer access)
    pub fn gpu(&self) -> Rc<RefCell<Gpu>> {
        Rc::clone(&self.gpu)
    }

    /// CD-ROM handle
    pub fn cdrom(&self) -> Rc<RefCell<CdRom>> {
        Rc::clone(&self.cdrom)
    }

    /// Run one loop slice: CPU block, timer step, scheduler tick
    ///
    /// The slice length is `min(128, cycles-until-next-event)` so event
    /// deadlines slip by at most one slice.
    pub fn run_slice(&mut self) -> Result<()> {
        let quantum = self.scheduler.borrow().run_cycles(MAX_SLICE_CYCLES);

        // Two cycles per instruction
        self.cpu.step_block(&mut self.bus, quantum / 2)?;

        let timer_irqs = self.timers.borrow_mut().step(quantum);
        self.raise_timer_irqs(timer_irqs);

        let fired = self.scheduler.borrow_mut().tick(quantum);
        for event in fired {
            self.dispatch(event)?;
        }

        self.cycles += quantum as u64;
        Ok(())
    }

    /// Run until the scanline handler reports a completed frame
    pub fn run_frame(&mut self) -> Result<()> {
        self.frame_complete = false;
        while !self.frame_complete {
            self.run_slice()?;
        }
        Ok(())
    }

    /// Route a fired scheduler event to its owner and wire the effects
    fn dispatch(&mut self, event: FiredEvent) -> Result<()> {
        let scanline_id = self.gpu.borrow().scanline_event_id();
        let hblank_id = self.gpu.borrow().hblank_event_id();
        let cdrom_id = self.cdrom.borrow().irq_event_id();
        let dma_id = self.dma.borrow().transfer_end_event_id();
        let sio_id = self.sio.borrow().ack_event_id();

        if event.id == scanline_id {
            let outcome = self.gpu.borrow_mut().scanline_tick(event.late);
            match outcome {
                ScanlineOutcome::EnterVblank => {
                    self.intc.borrow_mut().send_interrupt(irq::VBLANK);
                    self.timers.borrow_mut().vblank_start();
                    self.present_frame();
                    self.frame_complete = true;
                }
                ScanlineOutcome::LeaveVblank => {
                    self.timers.borrow_mut().vblank_end();
                }
                ScanlineOutcome::Progress => {}
            }
        } else if event.id == hblank_id {
            self.gpu.borrow_mut().hblank_tick(event.late);
            if self.timers.borrow_mut().step_hblank() {
                self.intc.borrow_mut().send_interrupt(irq::TIMER0 + 1);
            }
        } else if event.id == cdrom_id {
            let deliver = self.cdrom.borrow_mut().irq_event(event.param)?;
            if deliver {
                self.intc.borrow_mut().send_interrupt(irq::CDROM);
            }
            // A freshly buffered sector raises the drive's request line
            if event.param == 1 {
                self.dma.borrow_mut().set_drq(CH_CDROM, true);
            }
        } else if event.id == dma_id {
            let raise = self.dma.borrow_mut().transfer_end(event.param as usize);
            if raise {
                self.intc.borrow_mut().send_interrupt(irq::DMA);
            }
        } else if event.id == sio_id {
            if self.sio.borrow_mut().ack_event() {
                self.intc.borrow_mut().send_interrupt(irq::SIORX);
            }
        } else {
            log::warn!("System: fired event {} has no owner", event.id);
        }

        Ok(())
    }

    /// Raise the timer interrupt lines
    fn raise_timer_irqs(&mut self, irqs: [bool; 3]) {
        for (index, &fired) in irqs.iter().enumerate() {
            if fired {
                self.intc.borrow_mut().send_interrupt(irq::TIMER0 + index);
            }
        }
    }

    /// Hand the frame to the presentation layer and latch fresh input
    fn present_frame(&mut self) {
        if let Some(sink) = self.frame_sink.as_mut() {
            let gpu = self.gpu.borrow();
            sink(gpu.vram());
        }

        if let Some(source) = self.input_source.as_mut() {
            let buttons = source();
            self.sio.borrow_mut().set_buttons(buttons);
        }
    }
}

impl Default for System {
    fn default() -> Self {
        Self::new()
    }
}
