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

//! MDEC (macroblock decoder) register model
//!
//! The MDEC is modeled as a register-level state machine: commands arrive
//! on the data port (directly or via DMA channel 0), quantization and
//! scale tables are absorbed, macroblock words are counted, and the status
//! word tracks the busy/request bits the guest and the DMA controller
//! observe. Actual macroblock decoding is out of scope; the data port
//! reads back zero words, which decodes to black frames.

/// MDEC command selector (top 3 bits of the command word)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Nop,
    DecodeMacroblock,
    SetQuantTables,
    SetScaleTable,
}

/// Upload state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Waiting for a command word
    Idle,
    /// Absorbing macroblock data words
    ReceiveMacroblock,
    /// Absorbing quantization table words
    ReceiveQuantTables,
    /// Absorbing scale table words
    ReceiveScaleTable,
}

/// Decoded MDEC status fields
#[derive(Debug, Clone, Copy, Default)]
struct Status {
    /// Remaining parameter words minus one
    remaining: u16,
    /// Current block
    block: u8,
    /// Output bit 15 setting (15-bit depth)
    bit15: bool,
    /// Signed output
    signed: bool,
    /// Output depth (0=4bit, 1=8bit, 2=24bit, 3=15bit)
    depth: u8,
    /// Data-out request (drives DMA channel 1)
    out_request: bool,
    /// Data-in request (drives DMA channel 0)
    in_request: bool,
    /// Command busy
    busy: bool,
    /// Input FIFO full
    in_full: bool,
    /// Output FIFO empty
    out_empty: bool,
}

/// MDEC register skeleton
///
/// # Example
///
/// ```
/// use sable::core::mdec::Mdec;
///
/// let mut mdec = Mdec::new();
/// mdec.write_control(0x8000_0000); // reset
/// assert_eq!(mdec.read_status() & (1 << 29), 0); // not busy
/// ```
pub struct Mdec {
    /// Status fields
    status: Status,

    /// Quantization tables (64 luminance + 64 color entries)
    #[allow(dead_code)]
    quant_table: [u8; 128],
    quant_index: usize,

    /// IDCT scale table
    #[allow(dead_code)]
    scale_table: [i16; 64],
    scale_index: usize,

    /// Words left in the current upload
    command_len: usize,

    /// Upload state
    state: State,
}

impl Mdec {
    /// Create a new MDEC in idle state
    pub fn new() -> Self {
        Self {
            status: Status {
                in_request: true,
                out_empty: true,
                ..Status::default()
            },
            quant_table: [0u8; 128],
            quant_index: 0,
            scale_table: [0i16; 64],
            scale_index: 0,
            command_len: 0,
            state: State::Idle,
        }
    }

    /// Reset to idle
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// MDEC1 read: the status word
    pub fn read_status(&self) -> u32 {
        let s = &self.status;

        (s.remaining as u32)
            | (s.block as u32) << 16
            | (s.bit15 as u32) << 23
            | (s.signed as u32) << 24
            | (s.depth as u32) << 25
            | (s.out_request as u32) << 27
            | (s.in_request as u32) << 28
            | (s.busy as u32) << 29
            | (s.in_full as u32) << 30
            | (s.out_empty as u32) << 31
    }

    /// MDEC0 read: decoded macroblock data
    ///
    /// Decoding is not modeled, so the output stream is all zeroes.
    pub fn read_data(&mut self) -> u32 {
        0
    }

    /// True when decoded data waits for DMA channel 1
    pub fn output_requested(&self) -> bool {
        self.status.out_request
    }

    /// MDEC0 write: command word or upload payload
    pub fn write_command(&mut self, word: u32) {
        match self.state {
            State::Idle => self.start_command(word),
            State::ReceiveMacroblock => {
                self.command_len -= 1;
                if self.command_len == 0 {
                    // Macroblock complete: flag output for the DMA engine
                    self.status.remaining = 0xFFFF;
                    self.status.busy = false;
                    self.status.in_full = true;
                    self.status.in_request = true;
                    self.status.out_empty = false;
                    self.status.out_request = true;
                    self.state = State::Idle;
                }
            }
            State::ReceiveQuantTables => {
                let bytes = word.to_le_bytes();
                self.quant_table[self.quant_index..self.quant_index + 4].copy_from_slice(&bytes);
                self.quant_index += 4;

                self.command_len -= 1;
                if self.command_len == 0 {
                    self.status.remaining = 0;
                    self.status.busy = false;
                    self.state = State::Idle;
                }
            }
            State::ReceiveScaleTable => {
                self.scale_table[self.scale_index] = word as i16;
                self.scale_table[self.scale_index + 1] = (word >> 16) as i16;
                self.scale_index += 2;

                self.command_len -= 1;
                if self.command_len == 0 {
                    self.status.busy = false;
                    self.state = State::Idle;
                }
            }
        }
    }

    /// Decode a fresh command word
    fn start_command(&mut self, word: u32) {
        let command = match word >> 29 {
            0 => Command::Nop,
            1 => Command::DecodeMacroblock,
            2 => Command::SetQuantTables,
            3 => Command::SetScaleTable,
            other => {
                log::warn!("MDEC: unhandled command {}", other);
                return;
            }
        };

        // Output format bits are latched by every command
        self.status.bit15 = word & (1 << 25) != 0;
        self.status.signed = word & (1 << 26) != 0;
        self.status.depth = ((word >> 27) & 3) as u8;

        log::debug!("MDEC: {:?} (0x{:08X})", command, word);

        match command {
            Command::Nop => {
                self.status.remaining = word as u16;
            }
            Command::DecodeMacroblock => {
                self.command_len = (word & 0xFFFF) as usize;
                self.state = State::ReceiveMacroblock;
                self.status.busy = true;
            }
            Command::SetQuantTables => {
                self.quant_index = 0;
                // Bit 0 selects whether the color table follows
                self.command_len = if word & 1 != 0 { 32 } else { 16 };
                self.state = State::ReceiveQuantTables;
                self.status.busy = true;
            }
            Command::SetScaleTable => {
                self.scale_index = 0;
                self.command_len = 32;
                self.state = State::ReceiveScaleTable;
                self.status.busy = true;
            }
        }
    }

    /// MDEC1 write: control register
    pub fn write_control(&mut self, word: u32) {
        if word & (1 << 31) != 0 {
            log::debug!("MDEC: reset");

            self.status = Status {
                in_request: true,
                out_empty: true,
                ..Status::default()
            };
            self.state = State::Idle;
        }
    }
}

impl Default for Mdec {
    fn default() -> Self {
        Self::new()
    }
}
