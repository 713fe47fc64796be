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

use clap::Parser;
use log::{error, info};
use sable::core::system::System;
use sable::frontend::buttons;

/// PlayStation (PSX) emulator
#[derive(Parser)]
#[command(name = "sable")]
#[command(about = "PlayStation emulator", long_about = None)]
struct Args {
    /// Path to PlayStation BIOS file (e.g., SCPH1001.BIN)
    bios: String,

    /// Path to CD-ROM image file (raw 2352-byte sectors)
    iso: String,

    /// Optional PS-EXE to side-load instead of the shell
    exe: Option<String>,

    /// Number of frames to run before exiting (0 = run forever)
    #[arg(short = 'n', long, default_value = "0")]
    frames: u64,
}

fn main() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    info!("sable v{}", env!("CARGO_PKG_VERSION"));
    info!("PlayStation emulator");

    let args = Args::parse();

    let mut system = System::new();

    info!("Loading BIOS from: {}", args.bios);
    if let Err(e) = system.load_bios(&args.bios) {
        error!("Failed to load BIOS: {}", e);
        std::process::exit(1);
    }

    info!("Loading disc from: {}", args.iso);
    if let Err(e) = system.load_disc(&args.iso) {
        error!("Failed to load disc: {}", e);
        std::process::exit(1);
    }

    if let Some(exe) = &args.exe {
        info!("Side-loading EXE from: {}", exe);
        if let Err(e) = system.load_exe(exe) {
            error!("Failed to load EXE: {}", e);
            std::process::exit(1);
        }
    }

    // Headless: no window, no pad input
    system.set_input_source(Box::new(|| buttons::NONE_PRESSED));

    info!("Starting emulation...");
    system.reset();

    let mut frame: u64 = 0;
    loop {
        if let Err(e) = system.run_frame() {
            error!("Fatal at PC=0x{:08X}: {}", system.pc(), e);
            error!("Frame {}, cycle {}", frame, system.cycles());
            std::process::exit(1);
        }

        frame += 1;

        if frame % 60 == 0 {
            info!(
                "Frame {} | PC: 0x{:08X} | Cycles: {}",
                frame,
                system.pc(),
                system.cycles()
            );
        }

        if args.frames != 0 && frame >= args.frames {
            break;
        }
    }

    info!("Emulation finished after {} frames", frame);
}
