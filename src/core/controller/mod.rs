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

//! SIO (serial controller port)
//!
//! Models the digital-pad path through the JOY serial link. Every byte the
//! guest transmits is answered by a byte from the pad after an /ACK delay
//! of about 1088 CPU cycles, delivered through a scheduler event that can
//! raise the controller interrupt.
//!
//! The exchange for a digital pad read is:
//!
//! ```text
//! TX 0x01 (address pad)   -> RX 0xFF
//! TX 0x42 (read command)  -> RX 0x41 (digital pad ID low)
//! TX --   (TAP byte)      -> RX 0x5A (ID high)
//! TX --                   -> RX buttons 7..0   (active low)
//! TX --                   -> RX buttons 15..8  (active low)
//! ```
//!
//! Any unexpected command byte drops the exchange back to idle. Only slot
//! 0 has a pad; slot 1 answers as disconnected (0xFF).

use crate::core::timing::{EventId, Scheduler};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

/// /ACK delay between a TX byte and its response, in CPU cycles
const ACK_DELAY: i64 = 1088;

/// Digital pad ID halfword (0x5A41)
const PAD_ID_LO: u8 = 0x41;
const PAD_ID_HI: u8 = 0x5A;

/// Pad exchange state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PadState {
    /// Waiting for an address byte
    Idle,
    /// Addressed; waiting for the read command
    SendId,
    /// Streaming ID high byte and button bytes (position 0..=2)
    SendButtons(u8),
}

/// JOY_CTRL fields
#[derive(Debug, Clone, Copy, Default)]
struct Control {
    /// TX enable
    tx_enable: bool,
    /// RX enable
    rx_enable: bool,
    /// RX interrupt mode
    rx_irq_mode: u8,
    /// TX interrupt enable
    tx_irq: bool,
    /// RX interrupt enable
    rx_irq: bool,
    /// /ACK interrupt enable
    ack_irq: bool,
    /// Slot select (false = slot 0)
    slot: bool,
}

/// JOY_STAT fields
#[derive(Debug, Clone, Copy, Default)]
struct StatusFlags {
    /// TX ready (FIFO not full)
    tx_ready1: bool,
    /// TX ready (all bits shifted)
    tx_ready2: bool,
    /// Interrupt pending
    irq: bool,
}

/// Serial controller port with one digital pad in slot 0
///
/// # Example
///
/// ```
/// use sable::core::controller::Sio;
/// use sable::core::timing::Scheduler;
/// use std::cell::RefCell;
/// use std::rc::Rc;
///
/// let scheduler = Rc::new(RefCell::new(Scheduler::new()));
/// let mut sio = Sio::new(scheduler);
///
/// // Nothing pressed: all button bits float high
/// sio.set_buttons(0xFFFF);
/// ```
pub struct Sio {
    /// Control register
    ctrl: Control,

    /// Status flags
    stat: StatusFlags,

    /// JOY_MODE register (stored only)
    mode: u16,

    /// JOY_BAUD register (stored only)
    baud: u16,

    /// Received bytes waiting for the guest
    rx_fifo: VecDeque<u8>,

    /// Responses in flight, released one per /ACK event
    pending_rx: VecDeque<u8>,

    /// Pad protocol state
    state: PadState,

    /// Current button word, active low, PSX bit order
    buttons: u16,

    /// Shared scheduler
    scheduler: Rc<RefCell<Scheduler>>,

    /// /ACK delivery event
    ack_event: EventId,
}

impl Sio {
    /// Create a new port with the pad reporting nothing pressed
    pub fn new(scheduler: Rc<RefCell<Scheduler>>) -> Self {
        let ack_event = scheduler.borrow_mut().register_event("SIO ACK");

        Self {
            ctrl: Control::default(),
            stat: StatusFlags {
                tx_ready1: true,
                tx_ready2: true,
                irq: false,
            },
            mode: 0,
            baud: 0,
            rx_fifo: VecDeque::new(),
            pending_rx: VecDeque::new(),
            state: PadState::Idle,
            buttons: 0xFFFF,
            scheduler,
            ack_event,
        }
    }

    /// Reset the port; button state is host input and survives
    pub fn reset(&mut self) {
        self.ctrl = Control::default();
        self.stat = StatusFlags {
            tx_ready1: true,
            tx_ready2: true,
            irq: false,
        };
        self.mode = 0;
        self.baud = 0;
        self.rx_fifo.clear();
        self.pending_rx.clear();
        self.state = PadState::Idle;
    }

    /// Scheduler event id of the /ACK event
    pub fn ack_event_id(&self) -> EventId {
        self.ack_event
    }

    /// Latch the frame's button word (active low, PSX bit order)
    pub fn set_buttons(&mut self, buttons: u16) {
        self.buttons = buttons;
    }

    // --- Register interface ---

    /// 8-bit read (JOY_RX_FIFO, or the low byte of the wider registers)
    pub fn read8(&mut self, paddr: u32) -> u8 {
        match paddr {
            0x1F80_1040 => match self.rx_fifo.pop_front() {
                Some(byte) => byte,
                None => {
                    log::warn!("SIO: RX FIFO read while empty");
                    0
                }
            },
            _ => self.read16(paddr & !1) as u8,
        }
    }

    /// 16-bit read
    pub fn read16(&mut self, paddr: u32) -> u16 {
        match paddr {
            0x1F80_1040 => self.read8(paddr) as u16,
            0x1F80_1044 => {
                let mut value = self.stat.tx_ready1 as u16;
                value |= (!self.rx_fifo.is_empty() as u16) << 1;
                value |= (self.stat.tx_ready2 as u16) << 2;
                value |= (self.stat.irq as u16) << 9;
                value
            }
            0x1F80_1048 => self.mode,
            0x1F80_104A => {
                let mut value = self.ctrl.tx_enable as u16;
                value |= (self.ctrl.rx_enable as u16) << 1;
                value |= (self.ctrl.rx_irq_mode as u16) << 8;
                value |= (self.ctrl.tx_irq as u16) << 10;
                value |= (self.ctrl.rx_irq as u16) << 11;
                value |= (self.ctrl.ack_irq as u16) << 12;
                value |= (self.ctrl.slot as u16) << 13;
                value
            }
            0x1F80_104E => self.baud,
            _ => {
                log::warn!("SIO: unhandled 16-bit read @ 0x{:08X}", paddr);
                0
            }
        }
    }

    /// 8-bit write (JOY_TX_FIFO)
    pub fn write8(&mut self, paddr: u32, value: u8) {
        match paddr {
            0x1F80_1040 => self.transmit(value),
            _ => log::warn!("SIO: unhandled 8-bit write @ 0x{:08X}", paddr),
        }
    }

    /// 16-bit write
    pub fn write16(&mut self, paddr: u32, value: u16) {
        match paddr {
            0x1F80_1040 => self.transmit(value as u8),
            0x1F80_1048 => self.mode = value,
            0x1F80_104A => self.write_ctrl(value),
            0x1F80_104E => self.baud = value,
            _ => log::warn!(
                "SIO: unhandled 16-bit write @ 0x{:08X} = 0x{:04X}",
                paddr,
                value
            ),
        }
    }

    /// JOY_CTRL write: enables, acknowledge and reset bits
    fn write_ctrl(&mut self, value: u16) {
        self.ctrl.tx_enable = value & (1 << 0) != 0;
        self.ctrl.rx_irq_mode = ((value >> 8) & 3) as u8;
        self.ctrl.tx_irq = value & (1 << 10) != 0;
        self.ctrl.rx_irq = value & (1 << 11) != 0;
        self.ctrl.ack_irq = value & (1 << 12) != 0;

        // /JOYn output also forces RX on
        self.ctrl.rx_enable = value & ((1 << 1) | (1 << 2)) != 0;

        if value & (1 << 4) != 0 {
            // Acknowledge
            self.stat.irq = false;
        }

        if value & (1 << 6) != 0 {
            // Reset
            log::debug!("SIO: port reset");
            self.stat.tx_ready1 = true;
            self.stat.tx_ready2 = true;
            self.stat.irq = false;
            self.rx_fifo.clear();
            self.pending_rx.clear();
            self.state = PadState::Idle;
        }

        self.ctrl.slot = value & (1 << 13) != 0;
    }

    // --- Pad protocol ---

    /// Handle a transmitted byte and queue the pad's answer
    fn transmit(&mut self, value: u8) {
        log::trace!("SIO: TX 0x{:02X} in {:?}", value, self.state);

        // Only slot 0 has a pad connected
        if self.ctrl.slot {
            self.queue_response(0xFF);
            self.state = PadState::Idle;
            return;
        }

        match self.state {
            PadState::Idle => {
                if value == 0x01 {
                    self.state = PadState::SendId;
                }
                // The pad drives nothing during the address byte
                self.queue_response(0xFF);
            }
            PadState::SendId => {
                if value == 0x42 {
                    self.state = PadState::SendButtons(0);
                    self.queue_response(PAD_ID_LO);
                } else {
                    self.state = PadState::Idle;
                    self.queue_response(0xFF);
                }
            }
            PadState::SendButtons(step) => {
                let response = match step {
                    0 => PAD_ID_HI,
                    1 => self.buttons as u8,
                    _ => (self.buttons >> 8) as u8,
                };
                self.queue_response(response);

                self.state = if step >= 2 {
                    PadState::Idle
                } else {
                    PadState::SendButtons(step + 1)
                };
            }
        }
    }

    /// Stage a response byte behind the /ACK delay
    fn queue_response(&mut self, byte: u8) {
        self.pending_rx.push_back(byte);
        self.scheduler
            .borrow_mut()
            .schedule(self.ack_event, byte as i32, ACK_DELAY);
    }

    /// Deliver one staged response on the /ACK event
    ///
    /// Returns true when the controller interrupt should be raised.
    pub fn ack_event(&mut self) -> bool {
        let byte = match self.pending_rx.pop_front() {
            Some(byte) => byte,
            None => return false,
        };

        self.rx_fifo.push_back(byte);

        if self.ctrl.ack_irq || self.ctrl.rx_irq {
            self.stat.irq = true;
            return true;
        }

        false
    }
}
