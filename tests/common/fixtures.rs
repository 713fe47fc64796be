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

//! Synthetic BIOS and disc images for the integration tests

use std::io::Write;
use tempfile::NamedTempFile;

/// BIOS image size the loader insists on
pub const BIOS_SIZE: usize = 512 * 1024;

/// Raw sector size of the synthetic disc
pub const SECTOR_SIZE: usize = 2352;

/// Build a 512KB BIOS image with a program at the reset vector
///
/// The rest of the image is zero, which the CPU decodes as NOPs.
pub fn bios_with_program(program: &[u32]) -> NamedTempFile {
    let mut image = vec![0u8; BIOS_SIZE];

    for (i, word) in program.iter().enumerate() {
        image[4 * i..4 * i + 4].copy_from_slice(&word.to_le_bytes());
    }

    let mut file = NamedTempFile::new().expect("create BIOS fixture");
    file.write_all(&image).expect("write BIOS fixture");
    file.flush().expect("flush BIOS fixture");
    file
}

/// A BIOS that parks the CPU in a jump-to-self idle loop
///
/// The loop keeps the PC inside the ROM no matter how many frames the
/// test runs.
pub fn idle_bios() -> NamedTempFile {
    // j 0xBFC00000 ; nop
    bios_with_program(&[0x0BF0_0000, 0x0000_0000])
}

/// Build a raw disc image where every sector byte encodes its sector
/// number, making reads recognizable
pub fn patterned_iso(sectors: usize) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("create ISO fixture");

    for sector in 0..sectors {
        let data = vec![sector as u8; SECTOR_SIZE];
        file.write_all(&data).expect("write ISO fixture");
    }
    file.flush().expect("flush ISO fixture");
    file
}

/// Path helper for the fixture files
pub fn path_of(file: &NamedTempFile) -> String {
    file.path().to_string_lossy().into_owned()
}
