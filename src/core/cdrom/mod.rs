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

//! CD-ROM drive emulation
//!
//! The drive is a register bank at 0x1F801800..03 with a 2-bit INDEX
//! selector remapping registers 1..3. Commands go through a parameter
//! FIFO, answer through a response FIFO, and signal completion with three
//! interrupt classes: INT3 (primary acknowledge), INT2 (second phase of
//! multi-step commands) and INT1 (sector ready). All delays run on the
//! shared scheduler; Pause cancels whatever the drive still had queued.
//!
//! Sector data lands in a raw 2352-byte buffer. The guest drains it
//! through the data port or, far more commonly, DMA channel 3.

pub mod disc;

use crate::core::error::{EmulatorError, Result};
use crate::core::timing::{EventId, Scheduler};
use disc::{Disc, MsfPosition, SECTOR_SIZE};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

/// Drive status byte flags
mod status {
    /// Command error
    pub const ERROR: u8 = 1 << 0;
    /// Spindle motor on
    pub const MOTOR_ON: u8 = 1 << 1;
    /// Shell open
    pub const SHELL_OPEN: u8 = 1 << 4;
    /// Data read in progress
    pub const READ: u8 = 1 << 5;
    /// Seek in progress
    pub const SEEK: u8 = 1 << 6;
    /// Audio playback in progress
    pub const PLAY: u8 = 1 << 7;
}

/// Mode byte flags (SetMode)
mod mode {
    /// Deliver the full 0x924-byte sector instead of 0x800 data bytes
    pub const FULL_SECTOR: u8 = 1 << 5;
    /// Double speed
    pub const SPEED: u8 = 1 << 7;
}

/// Command delay constants, in CPU cycles
///
/// The primary acknowledge arrives about 10k cycles after the command
/// byte; second-phase interrupts add another 20k. Sector reads pace at
/// the drive speed.
const INT3_DELAY: i64 = 10_000;
const INT2_DELAY: i64 = INT3_DELAY + 20_000;

/// Hardware FIFO capacity for parameters and responses
const FIFO_CAPACITY: usize = 16;

/// CD-ROM commands
mod command {
    pub const GET_STAT: u8 = 0x01;
    pub const SET_LOC: u8 = 0x02;
    pub const READ_N: u8 = 0x06;
    pub const PAUSE: u8 = 0x09;
    pub const INIT: u8 = 0x0A;
    pub const SET_MODE: u8 = 0x0E;
    pub const GET_TN: u8 = 0x13;
    pub const GET_TD: u8 = 0x14;
    pub const SEEK_L: u8 = 0x15;
    pub const TEST: u8 = 0x19;
    pub const GET_ID: u8 = 0x1A;
    pub const READ_TOC: u8 = 0x1E;
}

/// CD-ROM drive model
///
/// # Example
///
/// ```
/// use sable::core::cdrom::CdRom;
/// use sable::core::timing::Scheduler;
/// use std::cell::RefCell;
/// use std::rc::Rc;
///
/// let scheduler = Rc::new(RefCell::new(Scheduler::new()));
/// let mut cdrom = CdRom::new(scheduler);
///
/// // Select register bank 1
/// cdrom.write(0x1F801800, 0x01).unwrap();
/// ```
pub struct CdRom {
    /// Drive status byte
    stat: u8,

    /// Mode byte (SetMode)
    mode: u8,

    /// Register bank selector (0..=3)
    index: u8,

    /// Last command byte
    command: u8,

    /// Parameter FIFO (up to 16 bytes)
    param_fifo: VecDeque<u8>,

    /// Response FIFO (up to 16 bytes)
    response_fifo: VecDeque<u8>,

    /// Interrupt enable mask (5 bits)
    int_enable: u8,

    /// Interrupt flags (5 bits)
    int_flags: u8,

    /// Raw sector buffer
    read_buffer: Box<[u8; SECTOR_SIZE]>,

    /// Read cursor into the sector buffer
    read_index: usize,

    /// End of the valid data window for the current sector
    read_end: usize,

    /// Current seek target / read position
    position: MsfPosition,

    /// Open disc image
    disc: Option<Disc>,

    /// Shared scheduler
    scheduler: Rc<RefCell<Scheduler>>,

    /// Interrupt delivery event (param = interrupt class 1..=3)
    irq_event: EventId,
}

impl CdRom {
    /// Create a new drive with no disc inserted
    pub fn new(scheduler: Rc<RefCell<Scheduler>>) -> Self {
        let irq_event = scheduler.borrow_mut().register_event("CDROM IRQ");

        Self {
            stat: status::MOTOR_ON,
            mode: 0,
            index: 0,
            command: 0,
            param_fifo: VecDeque::new(),
            response_fifo: VecDeque::new(),
            int_enable: 0,
            int_flags: 0,
            read_buffer: Box::new([0u8; SECTOR_SIZE]),
            read_index: 0,
            read_end: 0,
            position: MsfPosition::default(),
            disc: None,
            scheduler,
            irq_event,
        }
    }

    /// Reset drive state; the disc stays in the tray
    pub fn reset(&mut self) {
        self.stat = status::MOTOR_ON;
        self.mode = 0;
        self.index = 0;
        self.command = 0;
        self.param_fifo.clear();
        self.response_fifo.clear();
        self.int_enable = 0;
        self.int_flags = 0;
        self.read_index = 0;
        self.read_end = 0;
        self.position = MsfPosition::default();
    }

    /// Open a disc image
    pub fn load_disc(&mut self, path: &str) -> Result<()> {
        self.disc = Some(Disc::open(path)?);
        Ok(())
    }

    /// True when an image is loaded
    pub fn has_disc(&self) -> bool {
        self.disc.is_some()
    }

    /// Scheduler event id for interrupt delivery
    pub fn irq_event_id(&self) -> EventId {
        self.irq_event
    }

    /// Sector cadence for the current drive speed
    fn sector_period(&self) -> i64 {
        if self.mode & mode::SPEED != 0 {
            250_000
        } else {
            500_000
        }
    }

    // --- Register interface ---

    /// 8-bit register read
    pub fn read(&mut self, paddr: u32) -> u8 {
        match paddr & 3 {
            0 => self.read_status_register(),
            1 => self.pop_response(),
            2 => self.read_data_byte(),
            _ => match self.index {
                0 | 2 => self.int_enable,
                _ => self.int_flags,
            },
        }
    }

    /// 8-bit register write
    pub fn write(&mut self, paddr: u32, value: u8) -> Result<()> {
        match paddr & 3 {
            0 => {
                self.index = value & 3;
                Ok(())
            }
            1 => match self.index {
                0 => self.run_command(value),
                _ => {
                    // Sound-map and volume registers; stored nowhere
                    log::trace!(
                        "CDROM: write @ 1.{} = 0x{:02X} ignored",
                        self.index,
                        value
                    );
                    Ok(())
                }
            },
            2 => match self.index {
                0 => self.push_param(value),
                1 => {
                    self.int_enable = value & 0x1F;
                    Ok(())
                }
                _ => {
                    log::trace!(
                        "CDROM: write @ 2.{} = 0x{:02X} ignored",
                        self.index,
                        value
                    );
                    Ok(())
                }
            },
            _ => match self.index {
                0 => {
                    // Request register; bit 7 asks for the sector data
                    if value & 0x80 == 0 {
                        self.read_index = self.read_end;
                    }
                    Ok(())
                }
                1 => {
                    self.int_flags &= !(value & 0x1F);
                    if value & 0x40 != 0 {
                        self.param_fifo.clear();
                    }
                    Ok(())
                }
                _ => {
                    log::trace!(
                        "CDROM: write @ 3.{} = 0x{:02X} ignored",
                        self.index,
                        value
                    );
                    Ok(())
                }
            },
        }
    }

    /// The index/status register (0x1F801800 read)
    fn read_status_register(&self) -> u8 {
        let mut value = self.index;
        value |= (self.param_fifo.is_empty() as u8) << 3;
        value |= ((self.param_fifo.len() != FIFO_CAPACITY) as u8) << 4;
        value |= (!self.response_fifo.is_empty() as u8) << 5;
        value |= ((self.read_index < self.read_end) as u8) << 6;
        value
    }

    /// Pop one response byte; over-reading yields 0
    fn pop_response(&mut self) -> u8 {
        match self.response_fifo.pop_front() {
            Some(byte) => byte,
            None => {
                log::warn!("CDROM: response FIFO over-read");
                0
            }
        }
    }

    /// Pop one data byte from the sector window
    fn read_data_byte(&mut self) -> u8 {
        if self.read_index < self.read_end {
            let byte = self.read_buffer[self.read_index];
            self.read_index += 1;
            byte
        } else {
            0
        }
    }

    /// Push a parameter byte; overflowing the hardware FIFO is fatal
    fn push_param(&mut self, value: u8) -> Result<()> {
        if self.param_fifo.len() == FIFO_CAPACITY {
            return Err(EmulatorError::FifoOverflow {
                what: "CDROM parameter FIFO",
            });
        }
        self.param_fifo.push_back(value);
        Ok(())
    }

    /// Pop a parameter, defaulting to 0 on underflow
    fn pop_param(&mut self) -> u8 {
        self.param_fifo.pop_front().unwrap_or(0)
    }

    /// Push a response byte; overflow is an internal invariant violation
    fn push_response(&mut self, value: u8) {
        if self.response_fifo.len() < FIFO_CAPACITY {
            self.response_fifo.push_back(value);
        } else {
            log::error!("CDROM: response FIFO overflow, byte dropped");
        }
    }

    /// Queue an interrupt class for delivery
    fn schedule_irq(&mut self, class: i32, delay: i64) {
        self.scheduler
            .borrow_mut()
            .schedule(self.irq_event, class, delay);
    }

    // --- Commands ---

    /// Dispatch a command byte
    fn run_command(&mut self, value: u8) -> Result<()> {
        self.command = value;

        log::debug!("CDROM: command 0x{:02X}", value);

        match value {
            command::GET_STAT => self.cmd_get_stat(),
            command::SET_LOC => self.cmd_set_loc(),
            command::READ_N => self.cmd_read_n(),
            command::PAUSE => self.cmd_pause(),
            command::INIT => self.cmd_init(),
            command::SET_MODE => self.cmd_set_mode(),
            command::GET_TN => self.cmd_get_tn(),
            command::GET_TD => self.cmd_get_td(),
            command::SEEK_L => self.cmd_seek_l(),
            command::TEST => self.cmd_test(),
            command::GET_ID => self.cmd_get_id(),
            command::READ_TOC => self.cmd_read_toc(),
            _ => return Err(EmulatorError::UnhandledCdCommand { command: value }),
        }

        self.param_fifo.clear();
        Ok(())
    }

    /// GetStat: report the status byte, clear the shell-open latch
    fn cmd_get_stat(&mut self) {
        self.push_response(self.stat);
        self.stat &= !status::SHELL_OPEN;
        self.schedule_irq(3, INT3_DELAY);
    }

    /// SetLoc: latch the BCD seek target from the parameter FIFO
    fn cmd_set_loc(&mut self) {
        self.push_response(self.stat);

        let minute = self.pop_param();
        let second = self.pop_param();
        let sector = self.pop_param();
        self.position = MsfPosition::new(minute, second, sector);

        log::debug!(
            "CDROM: seek target [{:02X}:{:02X}:{:02X}]",
            minute,
            second,
            sector
        );

        self.schedule_irq(3, INT3_DELAY);
    }

    /// ReadN: begin paced sector reads at the current target
    fn cmd_read_n(&mut self) {
        self.push_response(self.stat);
        self.schedule_irq(3, INT3_DELAY);

        self.stat |= status::READ;
        self.push_response(self.stat);
        self.schedule_irq(1, INT3_DELAY + self.sector_period());
    }

    /// Pause: stop reading/playing and drop queued drive events
    fn cmd_pause(&mut self) {
        self.scheduler.borrow_mut().cancel(self.irq_event);

        self.push_response(self.stat);
        self.schedule_irq(3, INT3_DELAY);

        self.stat &= !(status::READ | status::PLAY);
        self.push_response(self.stat);
        self.schedule_irq(2, INT2_DELAY + 100_000);
    }

    /// Init: motor on, mode back to full-sector
    fn cmd_init(&mut self) {
        self.push_response(self.mode);
        self.schedule_irq(3, INT3_DELAY);

        self.stat |= status::MOTOR_ON;
        self.mode = mode::FULL_SECTOR;

        self.push_response(self.mode);
        self.schedule_irq(2, INT2_DELAY);
    }

    /// SetMode: latch the mode byte
    fn cmd_set_mode(&mut self) {
        self.push_response(self.stat);
        self.mode = self.pop_param();

        log::debug!("CDROM: mode = 0x{:02X}", self.mode);

        self.schedule_irq(3, INT3_DELAY);
    }

    /// GetTN: first and last track numbers (single data track)
    fn cmd_get_tn(&mut self) {
        self.push_response(self.stat);
        self.push_response(0x01);
        self.push_response(0x01);
        self.schedule_irq(3, INT3_DELAY);
    }

    /// GetTD: start position of a track (the data track starts at 00:02)
    fn cmd_get_td(&mut self) {
        let _track = self.pop_param();

        self.push_response(self.stat);
        self.push_response(0x00);
        self.push_response(0x02);
        self.schedule_irq(3, INT3_DELAY);
    }

    /// SeekL: data-mode seek to the latched target
    fn cmd_seek_l(&mut self) {
        self.push_response(self.stat);
        self.schedule_irq(3, INT3_DELAY);

        self.stat |= status::SEEK;
        self.push_response(self.stat);
        self.schedule_irq(2, INT2_DELAY);
    }

    /// Test: diagnostic sub-commands; 0x20 reports the controller date
    fn cmd_test(&mut self) {
        let sub = self.pop_param();

        match sub {
            0x20 => {
                // Controller ROM date 94-09-19 version C0
                self.push_response(0x94);
                self.push_response(0x09);
                self.push_response(0x19);
                self.push_response(0xC0);
                self.schedule_irq(3, INT3_DELAY);
            }
            _ => {
                log::warn!("CDROM: unhandled Test sub-command 0x{:02X}", sub);
                self.push_response(self.stat | status::ERROR);
                self.push_response(0x40);
                self.schedule_irq(5, INT3_DELAY);
            }
        }
    }

    /// GetID: report a licensed Mode2 disc with region string "SCEI"
    fn cmd_get_id(&mut self) {
        self.push_response(self.stat);
        self.schedule_irq(3, INT3_DELAY);

        self.push_response(0x02);
        self.push_response(0x00);
        self.push_response(0x20);
        self.push_response(0x00);
        self.push_response(b'S');
        self.push_response(b'C');
        self.push_response(b'E');
        self.push_response(b'I');
        self.schedule_irq(2, INT2_DELAY);
    }

    /// ReadTOC: reread the table of contents
    fn cmd_read_toc(&mut self) {
        self.push_response(self.stat);
        self.schedule_irq(3, INT3_DELAY);

        self.push_response(self.stat);
        self.schedule_irq(2, INT2_DELAY);
    }

    // --- Event handling ---

    /// Deliver a scheduled interrupt class
    ///
    /// Latches the class into the interrupt flags; returns true when the
    /// enable mask lets the interrupt through to the INTC. An INT1 also
    /// loads the next sector and schedules its successor, keeping the read
    /// loop running until Pause cancels it.
    pub fn irq_event(&mut self, class: i32) -> Result<bool> {
        log::trace!("CDROM: INT{} (command 0x{:02X})", class, self.command);

        self.int_flags |= class as u8;

        let deliver = self.int_enable & self.int_flags != 0;

        if class == 1 {
            self.load_sector()?;
            let period = self.sector_period();
            self.schedule_irq(1, period);
        }

        Ok(deliver)
    }

    /// Read the sector at the current position and advance it
    fn load_sector(&mut self) -> Result<()> {
        let position = self.position;

        match self.disc.as_mut() {
            Some(disc) => disc.read_sector(position, self.read_buffer.as_mut())?,
            None => {
                return Err(EmulatorError::InvalidState {
                    message: "sector read with no disc loaded".into(),
                })
            }
        }

        // Data window: raw sectors start after the 12-byte sync pattern,
        // cooked reads skip the header/subheader too
        if self.mode & mode::FULL_SECTOR != 0 {
            self.read_index = 12;
            self.read_end = 12 + 0x924;
        } else {
            self.read_index = 24;
            self.read_end = 24 + 0x800;
        }

        self.position.advance();

        Ok(())
    }

    /// True while the sector buffer still holds unread data
    pub fn data_ready(&self) -> bool {
        self.read_index < self.read_end
    }

    /// Drain one word for DMA channel 3
    pub fn dma_read_word(&mut self) -> u32 {
        if self.read_index + 4 > SECTOR_SIZE {
            log::warn!("CDROM: DMA read past the sector buffer");
            return 0;
        }

        let word = u32::from_le_bytes([
            self.read_buffer[self.read_index],
            self.read_buffer[self.read_index + 1],
            self.read_buffer[self.read_index + 2],
            self.read_buffer[self.read_index + 3],
        ]);
        self.read_index += 4;
        word
    }
}
