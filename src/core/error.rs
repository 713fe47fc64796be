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

//! Emulator error types
//!
//! Guest-architectural faults (overflow, misaligned access, syscall, ...)
//! never appear here: those are handled by the COP0 exception vector and
//! return normally. Everything in this enum is either a fatal host-level
//! I/O failure, undefined guest behavior the emulator does not model, or
//! an internal invariant violation.

use std::fmt;

/// Result type for emulator operations
pub type Result<T> = std::result::Result<T, EmulatorError>;

/// Emulator error types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmulatorError {
    /// BIOS file could not be opened
    BiosNotFound {
        /// Path that was tried
        path: String,
    },

    /// BIOS has an unexpected size
    InvalidBiosSize {
        /// Expected size in bytes
        expected: usize,
        /// Actual size in bytes
        got: usize,
    },

    /// Disc image could not be opened
    DiscNotFound {
        /// Path that was tried
        path: String,
    },

    /// Executable image is malformed
    InvalidExecutable {
        /// What was wrong with it
        message: String,
    },

    /// I/O error (file operations)
    Io {
        /// Error message
        message: String,
    },

    /// Access to a region no device claims
    InvalidMemoryAccess {
        /// The address that was accessed
        address: u32,
    },

    /// Unaligned access reached a device that requires alignment
    UnalignedAccess {
        /// The address that was accessed
        address: u32,
        /// The size of the access (2 for 16-bit, 4 for 32-bit)
        size: u32,
    },

    /// CPU fetched an instruction the interpreter does not model
    UnhandledInstruction {
        /// The full instruction word
        instruction: u32,
        /// PC of the faulting fetch
        pc: u32,
    },

    /// GP0 command byte with no implementation
    UnhandledGp0Command {
        /// Command byte (top 8 bits of the word)
        command: u8,
    },

    /// GP1 command byte with no implementation
    UnhandledGp1Command {
        /// Command byte (top 8 bits of the word)
        command: u8,
    },

    /// CD-ROM command byte with no implementation
    UnhandledCdCommand {
        /// Command byte
        command: u8,
    },

    /// A bounded FIFO was pushed past its hardware capacity
    FifoOverflow {
        /// Which FIFO overflowed
        what: &'static str,
    },

    /// A state machine reached an arm that should be unreachable
    InvalidState {
        /// Description of the broken invariant
        message: String,
    },
}

impl fmt::Display for EmulatorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EmulatorError::BiosNotFound { path } => {
                write!(f, "BIOS file not found: {}", path)
            }
            EmulatorError::InvalidBiosSize { expected, got } => {
                write!(
                    f,
                    "Invalid BIOS size: expected {} bytes, got {} bytes",
                    expected, got
                )
            }
            EmulatorError::DiscNotFound { path } => {
                write!(f, "Disc image not found: {}", path)
            }
            EmulatorError::InvalidExecutable { message } => {
                write!(f, "Invalid executable: {}", message)
            }
            EmulatorError::Io { message } => {
                write!(f, "I/O error: {}", message)
            }
            EmulatorError::InvalidMemoryAccess { address } => {
                write!(f, "Invalid memory access at address 0x{:08X}", address)
            }
            EmulatorError::UnalignedAccess { address, size } => {
                write!(
                    f,
                    "Unaligned {}-bit access at address 0x{:08X}",
                    size * 8,
                    address
                )
            }
            EmulatorError::UnhandledInstruction { instruction, pc } => {
                write!(
                    f,
                    "Unhandled instruction 0x{:08X} at PC=0x{:08X}",
                    instruction, pc
                )
            }
            EmulatorError::UnhandledGp0Command { command } => {
                write!(f, "Unhandled GP0 command 0x{:02X}", command)
            }
            EmulatorError::UnhandledGp1Command { command } => {
                write!(f, "Unhandled GP1 command 0x{:02X}", command)
            }
            EmulatorError::UnhandledCdCommand { command } => {
                write!(f, "Unhandled CD-ROM command 0x{:02X}", command)
            }
            EmulatorError::FifoOverflow { what } => {
                write!(f, "FIFO overflow: {}", what)
            }
            EmulatorError::InvalidState { message } => {
                write!(f, "Invalid state: {}", message)
            }
        }
    }
}

impl std::error::Error for EmulatorError {}

impl From<std::io::Error> for EmulatorError {
    fn from(err: std::io::Error) -> Self {
        EmulatorError::Io {
            message: err.to_string(),
        }
    }
}
