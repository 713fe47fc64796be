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

//! PlayStation 1 emulator core library
//!
//! This library provides the core emulation components for a PlayStation 1
//! emulator: the MIPS R3000A CPU with its system-control and geometry
//! coprocessors, the memory bus, the cycle-driven event scheduler, and the
//! peripheral set (GPU, CD-ROM, DMA, timers, interrupt controller,
//! controller port, SPU and MDEC register models).
//!
//! # Example
//!
//! ```no_run
//! use sable::core::system::System;
//!
//! let mut system = System::new();
//! system.load_bios("SCPH1001.BIN").unwrap();
//! system.load_disc("game.iso").unwrap();
//! system.reset();
//!
//! // Run one video frame
//! system.run_frame().unwrap();
//! ```

pub mod core;
pub mod frontend;
