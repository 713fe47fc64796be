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

//! GTE (Geometry Transformation Engine, COP2)
//!
//! Fixed-point 3D math coprocessor. All arithmetic runs through shared
//! primitives that saturate into sticky bits of the FLAG register:
//! MAC1..3 accumulate in 44 bits, MAC0 in 32, IR1..3 clamp to
//! [-0x8000, 0x7FFF] (or [0, 0x7FFF] under `lm`), IR0 to [0, 0x1000],
//! the screen FIFOs clamp SX/SY to [-1024, 1023] and SZ to [0, 0xFFFF].
//! Division uses the 257-entry Newton-Raphson reciprocal table shipped in
//! silicon.

/// FLAG register bit positions (sticky until the next command)
mod flag {
    pub const MAC1_POS: u32 = 1 << 30;
    pub const MAC2_POS: u32 = 1 << 29;
    pub const MAC3_POS: u32 = 1 << 28;
    pub const MAC1_NEG: u32 = 1 << 27;
    pub const MAC2_NEG: u32 = 1 << 26;
    pub const MAC3_NEG: u32 = 1 << 25;
    pub const IR1_SAT: u32 = 1 << 24;
    pub const IR2_SAT: u32 = 1 << 23;
    pub const IR3_SAT: u32 = 1 << 22;
    pub const SZ3_SAT: u32 = 1 << 18;
    pub const DIV_OVF: u32 = 1 << 17;
    pub const MAC0_POS: u32 = 1 << 16;
    pub const MAC0_NEG: u32 = 1 << 15;
    pub const SX2_SAT: u32 = 1 << 14;
    pub const SY2_SAT: u32 = 1 << 13;
    pub const IR0_SAT: u32 = 1 << 12;

    /// Bits summarized into bit 31 on read
    pub const SUMMARY_MASK: u32 = 0x7F87_E000;
}

/// Unsigned Newton-Raphson reciprocal table (copied from the silicon ROM)
const UNR_TABLE: [u8; 257] = [
    0xFF, 0xFD, 0xFB, 0xF9, 0xF7, 0xF5, 0xF3, 0xF1, 0xEF, 0xEE, 0xEC, 0xEA, 0xE8, 0xE6, 0xE4,
    0xE3, 0xE1, 0xDF, 0xDD, 0xDC, 0xDA, 0xD8, 0xD6, 0xD5, 0xD3, 0xD1, 0xD0, 0xCE, 0xCD, 0xCB,
    0xC9, 0xC8, 0xC6, 0xC5, 0xC3, 0xC1, 0xC0, 0xBE, 0xBD, 0xBB, 0xBA, 0xB8, 0xB7, 0xB5, 0xB4,
    0xB2, 0xB1, 0xB0, 0xAE, 0xAD, 0xAB, 0xAA, 0xA9, 0xA7, 0xA6, 0xA4, 0xA3, 0xA2, 0xA0, 0x9F,
    0x9E, 0x9C, 0x9B, 0x9A, 0x99, 0x97, 0x96, 0x95, 0x94, 0x92, 0x91, 0x90, 0x8F, 0x8D, 0x8C,
    0x8B, 0x8A, 0x89, 0x87, 0x86, 0x85, 0x84, 0x83, 0x82, 0x81, 0x7F, 0x7E, 0x7D, 0x7C, 0x7B,
    0x7A, 0x79, 0x78, 0x77, 0x75, 0x74, 0x73, 0x72, 0x71, 0x70, 0x6F, 0x6E, 0x6D, 0x6C, 0x6B,
    0x6A, 0x69, 0x68, 0x67, 0x66, 0x65, 0x64, 0x63, 0x62, 0x61, 0x60, 0x5F, 0x5E, 0x5D, 0x5D,
    0x5C, 0x5B, 0x5A, 0x59, 0x58, 0x57, 0x56, 0x55, 0x54, 0x53, 0x53, 0x52, 0x51, 0x50, 0x4F,
    0x4E, 0x4D, 0x4D, 0x4C, 0x4B, 0x4A, 0x49, 0x48, 0x48, 0x47, 0x46, 0x45, 0x44, 0x43, 0x43,
    0x42, 0x41, 0x40, 0x3F, 0x3F, 0x3E, 0x3D, 0x3C, 0x3C, 0x3B, 0x3A, 0x39, 0x39, 0x38, 0x37,
    0x36, 0x36, 0x35, 0x34, 0x33, 0x33, 0x32, 0x31, 0x31, 0x30, 0x2F, 0x2E, 0x2E, 0x2D, 0x2C,
    0x2C, 0x2B, 0x2A, 0x2A, 0x29, 0x28, 0x28, 0x27, 0x26, 0x26, 0x25, 0x24, 0x24, 0x23, 0x22,
    0x22, 0x21, 0x20, 0x20, 0x1F, 0x1E, 0x1E, 0x1D, 0x1D, 0x1C, 0x1B, 0x1B, 0x1A, 0x19, 0x19,
    0x18, 0x18, 0x17, 0x16, 0x16, 0x15, 0x15, 0x14, 0x14, 0x13, 0x12, 0x12, 0x11, 0x11, 0x10,
    0x0F, 0x0F, 0x0E, 0x0E, 0x0D, 0x0D, 0x0C, 0x0C, 0x0B, 0x0A, 0x0A, 0x09, 0x09, 0x08, 0x08,
    0x07, 0x07, 0x06, 0x06, 0x05, 0x05, 0x04, 0x04, 0x03, 0x03, 0x02, 0x02, 0x01, 0x01, 0x00,
    0x00, 0x00,
];

/// GTE command opcodes (low 6 bits of the CO-format word)
mod opcode {
    pub const RTPS: u32 = 0x01;
    pub const NCLIP: u32 = 0x06;
    pub const AVSZ3: u32 = 0x2D;
    pub const AVSZ4: u32 = 0x2E;
    pub const RTPT: u32 = 0x30;
}

/// Geometry Transformation Engine state
///
/// Data registers hold the vectors, accumulators and FIFOs; control
/// registers hold the matrices, translation/color vectors and projection
/// parameters. Both banks are exposed to the CPU through the coprocessor
/// transfer instructions (MFC2/MTC2/CFC2/CTC2/LWC2/SWC2).
pub struct Gte {
    /// Input vectors V0..V2 (signed 16-bit x/y/z)
    v: [[i16; 3]; 3],

    /// Color/code register (RGBC)
    rgbc: u32,

    /// Ordering-table Z average
    otz: u16,

    /// 16-bit saturated accumulators IR0..IR3
    ir: [i16; 4],

    /// 32-bit accumulators MAC0..MAC3
    mac: [i32; 4],

    /// Screen XY FIFO, three stages (packed Y:X)
    sxy: [u32; 3],

    /// Screen Z FIFO, four stages
    sz: [u16; 4],

    /// Color FIFO, three stages
    rgb: [u32; 3],

    /// Prohibited register 23, storage only
    res1: u32,

    /// Leading-count source register
    lzcs: u32,

    /// Rotation matrix (3x3, 1.3.12 fixed point)
    rt: [[i16; 3]; 3],

    /// Translation vector
    tr: [i32; 3],

    /// Light source matrix
    llm: [[i16; 3]; 3],

    /// Background color
    bk: [i32; 3],

    /// Light color matrix
    lcm: [[i16; 3]; 3],

    /// Far color
    fc: [i32; 3],

    /// Screen offset (16.16)
    ofx: i32,
    ofy: i32,

    /// Projection plane distance
    h: u16,

    /// Depth cueing coefficients
    dqa: i16,
    dqb: i32,

    /// Z scale factors for AVSZ3/AVSZ4
    zsf3: i16,
    zsf4: i16,

    /// Sticky error flags
    flags: u32,
}

impl Gte {
    /// Create a new GTE with all registers cleared
    pub fn new() -> Self {
        Self {
            v: [[0; 3]; 3],
            rgbc: 0,
            otz: 0,
            ir: [0; 4],
            mac: [0; 4],
            sxy: [0; 3],
            sz: [0; 4],
            rgb: [0; 3],
            res1: 0,
            lzcs: 0,
            rt: [[0; 3]; 3],
            tr: [0; 3],
            llm: [[0; 3]; 3],
            bk: [0; 3],
            lcm: [[0; 3]; 3],
            fc: [0; 3],
            ofx: 0,
            ofy: 0,
            h: 0,
            dqa: 0,
            dqb: 0,
            zsf3: 0,
            zsf4: 0,
            flags: 0,
        }
    }

    /// Reset to the power-on state
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Read a data register (MFC2/SWC2)
    pub fn get(&self, idx: u32) -> u32 {
        match idx & 0x1F {
            0 => pack_xy(self.v[0][0], self.v[0][1]),
            1 => self.v[0][2] as i32 as u32,
            2 => pack_xy(self.v[1][0], self.v[1][1]),
            3 => self.v[1][2] as i32 as u32,
            4 => pack_xy(self.v[2][0], self.v[2][1]),
            5 => self.v[2][2] as i32 as u32,
            6 => self.rgbc,
            7 => self.otz as u32,
            8 => self.ir[0] as i32 as u32,
            9 => self.ir[1] as i32 as u32,
            10 => self.ir[2] as i32 as u32,
            11 => self.ir[3] as i32 as u32,
            12 => self.sxy[0],
            13 => self.sxy[1],
            14 => self.sxy[2],
            // SXYP mirrors the newest FIFO stage
            15 => self.sxy[2],
            16 => self.sz[0] as u32,
            17 => self.sz[1] as u32,
            18 => self.sz[2] as u32,
            19 => self.sz[3] as u32,
            20 => self.rgb[0],
            21 => self.rgb[1],
            22 => self.rgb[2],
            23 => self.res1,
            24 => self.mac[0] as u32,
            25 => self.mac[1] as u32,
            26 => self.mac[2] as u32,
            27 => self.mac[3] as u32,
            28 | 29 => self.read_orgb(),
            30 => self.lzcs,
            31 => leading_count(self.lzcs),
            _ => unreachable!(),
        }
    }

    /// Write a data register (MTC2/LWC2)
    pub fn set(&mut self, idx: u32, data: u32) {
        match idx & 0x1F {
            0 => {
                self.v[0][0] = data as i16;
                self.v[0][1] = (data >> 16) as i16;
            }
            1 => self.v[0][2] = data as i16,
            2 => {
                self.v[1][0] = data as i16;
                self.v[1][1] = (data >> 16) as i16;
            }
            3 => self.v[1][2] = data as i16,
            4 => {
                self.v[2][0] = data as i16;
                self.v[2][1] = (data >> 16) as i16;
            }
            5 => self.v[2][2] = data as i16,
            6 => self.rgbc = data,
            7 => self.otz = data as u16,
            8 => self.ir[0] = data as i16,
            9 => self.ir[1] = data as i16,
            10 => self.ir[2] = data as i16,
            11 => self.ir[3] = data as i16,
            12 => self.sxy[0] = data,
            13 => self.sxy[1] = data,
            14 => self.sxy[2] = data,
            15 => {
                // Writing SXYP pushes the FIFO
                self.sxy[0] = self.sxy[1];
                self.sxy[1] = self.sxy[2];
                self.sxy[2] = data;
            }
            16 => self.sz[0] = data as u16,
            17 => self.sz[1] = data as u16,
            18 => self.sz[2] = data as u16,
            19 => self.sz[3] = data as u16,
            20 => self.rgb[0] = data,
            21 => self.rgb[1] = data,
            22 => self.rgb[2] = data,
            23 => self.res1 = data,
            24 => self.mac[0] = data as i32,
            25 => self.mac[1] = data as i32,
            26 => self.mac[2] = data as i32,
            27 => self.mac[3] = data as i32,
            28 => {
                // IRGB: 5-bit color fields expand into IR1..IR3
                self.ir[1] = ((data & 0x1F) << 7) as i16;
                self.ir[2] = (((data >> 5) & 0x1F) << 7) as i16;
                self.ir[3] = (((data >> 10) & 0x1F) << 7) as i16;
            }
            29 | 31 => log::trace!("GTE: write to read-only data register {}", idx),
            30 => self.lzcs = data,
            _ => unreachable!(),
        }
    }

    /// Read a control register (CFC2)
    pub fn get_control(&self, idx: u32) -> u32 {
        match idx & 0x1F {
            0 => pack_xy(self.rt[0][0], self.rt[0][1]),
            1 => pack_xy(self.rt[0][2], self.rt[1][0]),
            2 => pack_xy(self.rt[1][1], self.rt[1][2]),
            3 => pack_xy(self.rt[2][0], self.rt[2][1]),
            4 => self.rt[2][2] as i32 as u32,
            5 => self.tr[0] as u32,
            6 => self.tr[1] as u32,
            7 => self.tr[2] as u32,
            8 => pack_xy(self.llm[0][0], self.llm[0][1]),
            9 => pack_xy(self.llm[0][2], self.llm[1][0]),
            10 => pack_xy(self.llm[1][1], self.llm[1][2]),
            11 => pack_xy(self.llm[2][0], self.llm[2][1]),
            12 => self.llm[2][2] as i32 as u32,
            13 => self.bk[0] as u32,
            14 => self.bk[1] as u32,
            15 => self.bk[2] as u32,
            16 => pack_xy(self.lcm[0][0], self.lcm[0][1]),
            17 => pack_xy(self.lcm[0][2], self.lcm[1][0]),
            18 => pack_xy(self.lcm[1][1], self.lcm[1][2]),
            19 => pack_xy(self.lcm[2][0], self.lcm[2][1]),
            20 => self.lcm[2][2] as i32 as u32,
            21 => self.fc[0] as u32,
            22 => self.fc[1] as u32,
            23 => self.fc[2] as u32,
            24 => self.ofx as u32,
            25 => self.ofy as u32,
            // H reads back sign-expanded (hardware bug)
            26 => self.h as i16 as i32 as u32,
            27 => self.dqa as i32 as u32,
            28 => self.dqb as u32,
            29 => self.zsf3 as i32 as u32,
            30 => self.zsf4 as i32 as u32,
            31 => {
                let mut flags = self.flags;
                if flags & flag::SUMMARY_MASK != 0 {
                    flags |= 1 << 31;
                }
                flags
            }
            _ => unreachable!(),
        }
    }

    /// Write a control register (CTC2)
    pub fn set_control(&mut self, idx: u32, data: u32) {
        match idx & 0x1F {
            0 => {
                self.rt[0][0] = data as i16;
                self.rt[0][1] = (data >> 16) as i16;
            }
            1 => {
                self.rt[0][2] = data as i16;
                self.rt[1][0] = (data >> 16) as i16;
            }
            2 => {
                self.rt[1][1] = data as i16;
                self.rt[1][2] = (data >> 16) as i16;
            }
            3 => {
                self.rt[2][0] = data as i16;
                self.rt[2][1] = (data >> 16) as i16;
            }
            4 => self.rt[2][2] = data as i16,
            5 => self.tr[0] = data as i32,
            6 => self.tr[1] = data as i32,
            7 => self.tr[2] = data as i32,
            8 => {
                self.llm[0][0] = data as i16;
                self.llm[0][1] = (data >> 16) as i16;
            }
            9 => {
                self.llm[0][2] = data as i16;
                self.llm[1][0] = (data >> 16) as i16;
            }
            10 => {
                self.llm[1][1] = data as i16;
                self.llm[1][2] = (data >> 16) as i16;
            }
            11 => {
                self.llm[2][0] = data as i16;
                self.llm[2][1] = (data >> 16) as i16;
            }
            12 => self.llm[2][2] = data as i16,
            13 => self.bk[0] = data as i32,
            14 => self.bk[1] = data as i32,
            15 => self.bk[2] = data as i32,
            16 => {
                self.lcm[0][0] = data as i16;
                self.lcm[0][1] = (data >> 16) as i16;
            }
            17 => {
                self.lcm[0][2] = data as i16;
                self.lcm[1][0] = (data >> 16) as i16;
            }
            18 => {
                self.lcm[1][1] = data as i16;
                self.lcm[1][2] = (data >> 16) as i16;
            }
            19 => {
                self.lcm[2][0] = data as i16;
                self.lcm[2][1] = (data >> 16) as i16;
            }
            20 => self.lcm[2][2] = data as i16,
            21 => self.fc[0] = data as i32,
            22 => self.fc[1] = data as i32,
            23 => self.fc[2] = data as i32,
            24 => self.ofx = data as i32,
            25 => self.ofy = data as i32,
            26 => self.h = data as u16,
            27 => self.dqa = data as i16,
            28 => self.dqb = data as i32,
            29 => self.zsf3 = data as i16,
            30 => self.zsf4 = data as i16,
            // Error bits 30..12 are writable; bit 31 is derived on read
            31 => self.flags = data & 0x7FFF_F000,
            _ => unreachable!(),
        }
    }

    /// Execute a CO-format GTE command (low 25 bits of the instruction)
    pub fn execute(&mut self, cmd: u32) {
        self.flags = 0;

        let op = cmd & 0x3F;
        match op {
            opcode::RTPS => self.cmd_rtps(cmd),
            opcode::RTPT => self.cmd_rtpt(cmd),
            opcode::NCLIP => self.cmd_nclip(),
            opcode::AVSZ3 => self.cmd_avsz3(),
            opcode::AVSZ4 => self.cmd_avsz4(),
            _ => {
                log::warn!("GTE: unhandled command 0x{:02X} (0x{:07X})", op, cmd);
            }
        }
    }

    /// Sticky FLAG register value, bit 31 summarizing the error bits
    pub fn flags(&self) -> u32 {
        self.get_control(31)
    }

    // --- Commands ---

    /// RTPS: perspective-transform V0
    fn cmd_rtps(&mut self, cmd: u32) {
        let sf = cmd & (1 << 19) != 0;
        let lm = cmd & (1 << 10) != 0;

        self.rtp_vector(0, sf, lm);
    }

    /// RTPT: perspective-transform V0, V1, V2 in sequence
    fn cmd_rtpt(&mut self, cmd: u32) {
        let sf = cmd & (1 << 19) != 0;
        let lm = cmd & (1 << 10) != 0;

        for i in 0..3 {
            self.rtp_vector(i, sf, lm);
        }
    }

    /// NCLIP: winding test over the screen-XY FIFO
    fn cmd_nclip(&mut self) {
        let (x0, y0) = unpack_xy(self.sxy[0]);
        let (x1, y1) = unpack_xy(self.sxy[1]);
        let (x2, y2) = unpack_xy(self.sxy[2]);

        let area = x0 * y1 + x1 * y2 + x2 * y0 - x0 * y2 - x1 * y0 - x2 * y1;

        self.set_mac0(area);
    }

    /// AVSZ3: average of the three newest screen-Z entries into OTZ
    fn cmd_avsz3(&mut self) {
        let sum = self.sz[1] as i64 + self.sz[2] as i64 + self.sz[3] as i64;
        let avg = self.zsf3 as i64 * sum;

        self.set_mac0(avg);
        self.otz = self.saturate_otz(avg >> 12);
    }

    /// AVSZ4: average of all four screen-Z entries into OTZ
    fn cmd_avsz4(&mut self) {
        let sum = self.sz[0] as i64 + self.sz[1] as i64 + self.sz[2] as i64 + self.sz[3] as i64;
        let avg = self.zsf4 as i64 * sum;

        self.set_mac0(avg);
        self.otz = self.saturate_otz(avg >> 12);
    }

    /// Perspective-transform one vector and push the screen FIFOs
    fn rtp_vector(&mut self, i: usize, sf: bool, lm: bool) {
        let shift = if sf { 12 } else { 0 };

        let vx = self.v[i][0] as i64;
        let vy = self.v[i][1] as i64;
        let vz = self.v[i][2] as i64;

        // Two-step sign extension: once after the translation term plus the
        // first product, once after the remaining products, so intermediate
        // overflow wraps exactly as the hardware does.
        let x_inner = self.ext_mac(1, ((self.tr[0] as i64) << 12) + self.rt[0][0] as i64 * vx)
            + self.rt[0][1] as i64 * vy
            + self.rt[0][2] as i64 * vz;
        let x = self.ext_mac(1, x_inner);
        let y_inner = self.ext_mac(2, ((self.tr[1] as i64) << 12) + self.rt[1][0] as i64 * vx)
            + self.rt[1][1] as i64 * vy
            + self.rt[1][2] as i64 * vz;
        let y = self.ext_mac(2, y_inner);
        let z_inner = self.ext_mac(3, ((self.tr[2] as i64) << 12) + self.rt[2][0] as i64 * vx)
            + self.rt[2][1] as i64 * vy
            + self.rt[2][2] as i64 * vz;
        let z = self.ext_mac(3, z_inner);

        self.mac[1] = (x >> shift) as i32;
        self.mac[2] = (y >> shift) as i32;
        self.mac[3] = (z >> shift) as i32;

        self.set_ir(1, self.mac[1] as i64, lm);
        self.set_ir(2, self.mac[2] as i64, lm);

        // IR3 saturation is checked against the unshifted value
        self.set_ir(3, z >> 12, false);

        self.push_sz(self.mac[3] as i64 >> (12 - shift));

        let q = self.divide() as i64;

        let sx = self.set_mac0(q * self.ir[1] as i64 + self.ofx as i64) >> 16;
        let sy = self.set_mac0(q * self.ir[2] as i64 + self.ofy as i64) >> 16;
        self.push_sxy(sx, sy);

        // Depth cue
        let dc = self.set_mac0(q * self.dqa as i64 + self.dqb as i64);
        self.set_ir0(dc >> 12);
    }

    // --- Fixed-point primitives ---

    /// Check a MAC1..3 accumulation against 44 bits, latch the sticky
    /// overflow flags and sign-extend back into range
    fn ext_mac(&mut self, idx: usize, value: i64) -> i64 {
        const MAC_MAX: i64 = (1 << 43) - 1;
        const MAC_MIN: i64 = -(1 << 43);

        if value > MAC_MAX {
            self.flags |= match idx {
                1 => flag::MAC1_POS,
                2 => flag::MAC2_POS,
                _ => flag::MAC3_POS,
            };
        } else if value < MAC_MIN {
            self.flags |= match idx {
                1 => flag::MAC1_NEG,
                2 => flag::MAC2_NEG,
                _ => flag::MAC3_NEG,
            };
        }

        (value << 20) >> 20
    }

    /// Store MAC0 with 32-bit overflow flags; returns the unclamped value
    /// so screen-XY extraction sees the full intermediate
    fn set_mac0(&mut self, value: i64) -> i64 {
        if value > i32::MAX as i64 {
            self.flags |= flag::MAC0_POS;
        } else if value < i32::MIN as i64 {
            self.flags |= flag::MAC0_NEG;
        }

        self.mac[0] = value as i32;

        value
    }

    /// Saturate into IR1..3 with the matching sticky flag
    fn set_ir(&mut self, idx: usize, value: i64, lm: bool) {
        let min = if lm { 0 } else { -0x8000 };
        let max = 0x7FFF;

        let clamped = if value > max {
            self.flags |= match idx {
                1 => flag::IR1_SAT,
                2 => flag::IR2_SAT,
                _ => flag::IR3_SAT,
            };
            max
        } else if value < min {
            self.flags |= match idx {
                1 => flag::IR1_SAT,
                2 => flag::IR2_SAT,
                _ => flag::IR3_SAT,
            };
            min
        } else {
            value
        };

        self.ir[idx] = clamped as i16;
    }

    /// Saturate into IR0 ([0, 0x1000])
    fn set_ir0(&mut self, value: i64) {
        let clamped = if value < 0 {
            self.flags |= flag::IR0_SAT;
            0
        } else if value > 0x1000 {
            self.flags |= flag::IR0_SAT;
            0x1000
        } else {
            value
        };

        self.ir[0] = clamped as i16;
    }

    /// Push a Z value into the four-stage SZ FIFO with saturation
    fn push_sz(&mut self, value: i64) {
        let clamped = if value < 0 {
            self.flags |= flag::SZ3_SAT;
            0
        } else if value > 0xFFFF {
            self.flags |= flag::SZ3_SAT;
            0xFFFF
        } else {
            value
        };

        self.sz[0] = self.sz[1];
        self.sz[1] = self.sz[2];
        self.sz[2] = self.sz[3];
        self.sz[3] = clamped as u16;
    }

    /// Push a screen coordinate pair into the three-stage SXY FIFO
    fn push_sxy(&mut self, x: i64, y: i64) {
        let x = if x > 1023 {
            self.flags |= flag::SX2_SAT;
            1023
        } else if x < -1024 {
            self.flags |= flag::SX2_SAT;
            -1024
        } else {
            x
        };

        let y = if y > 1023 {
            self.flags |= flag::SY2_SAT;
            1023
        } else if y < -1024 {
            self.flags |= flag::SY2_SAT;
            -1024
        } else {
            y
        };

        self.sxy[0] = self.sxy[1];
        self.sxy[1] = self.sxy[2];
        self.sxy[2] = ((y as u16 as u32) << 16) | (x as u16 as u32);
    }

    /// Saturate an average-Z result into OTZ
    fn saturate_otz(&mut self, value: i64) -> u16 {
        if value < 0 {
            self.flags |= flag::SZ3_SAT;
            0
        } else if value > 0xFFFF {
            self.flags |= flag::SZ3_SAT;
            0xFFFF
        } else {
            value as u16
        }
    }

    /// H / SZ3 via the silicon's unsigned Newton-Raphson reciprocal
    ///
    /// Returns a 1.16 quotient clamped to 0x1FFFF; the divide-overflow
    /// flag latches when SZ3 is too small for the projection distance.
    fn divide(&mut self) -> u32 {
        let h = self.h as u64;
        let sz3 = self.sz[3] as u64;

        if sz3 * 2 <= h {
            self.flags |= flag::DIV_OVF;
            return 0x1FFFF;
        }

        let shift = (self.sz[3]).leading_zeros();
        let n = h << shift;
        let d = sz3 << shift;

        let u = 0x101 + UNR_TABLE[((d - 0x7FC0) >> 7) as usize] as u64;
        let d = (0x200_0080u64.wrapping_sub(d * u)) >> 8;
        let d = (0x80 + d * u) >> 8;

        let q = (n * d + 0x8000) >> 16;

        if q > 0x1FFFF {
            self.flags |= flag::DIV_OVF;
            0x1FFFF
        } else {
            q as u32
        }
    }

    /// IRGB/ORGB: IR1..3 converted back to a 5:5:5 color word
    fn read_orgb(&self) -> u32 {
        let component = |ir: i16| -> u32 { (ir >> 7).clamp(0, 0x1F) as u32 };

        component(self.ir[1]) | (component(self.ir[2]) << 5) | (component(self.ir[3]) << 10)
    }
}

impl Default for Gte {
    fn default() -> Self {
        Self::new()
    }
}

/// Pack two signed halfwords into a register word (low = first)
#[inline(always)]
fn pack_xy(x: i16, y: i16) -> u32 {
    ((y as u16 as u32) << 16) | (x as u16 as u32)
}

/// Split a packed screen-XY word into sign-extended coordinates
#[inline(always)]
fn unpack_xy(v: u32) -> (i64, i64) {
    ((v as u16 as i16) as i64, ((v >> 16) as u16 as i16) as i64)
}

/// LZCR: leading ones for negative LZCS, leading zeros otherwise
#[inline(always)]
fn leading_count(value: u32) -> u32 {
    if value & 0x8000_0000 != 0 {
        (!value).leading_zeros()
    } else {
        value.leading_zeros()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Identity rotation with H far enough away to avoid overflow
    fn projection_gte() -> Gte {
        let mut gte = Gte::new();

        // RT = identity (1.0 in 1.3.12 is 0x1000)
        gte.set_control(0, 0x0000_1000); // RT11=1.0, RT12=0
        gte.set_control(2, 0x0000_1000); // RT22=1.0, RT23=0
        gte.set_control(4, 0x0000_1000); // RT33=1.0

        gte.set_control(26, 0x0000_0100); // H = 256
        gte
    }

    #[test]
    fn test_vector_register_packing() {
        let mut gte = Gte::new();

        gte.set(0, 0xFFFF_0005); // VY0 = -1, VX0 = 5
        assert_eq!(gte.get(0), 0xFFFF_0005);

        gte.set(1, 0x0000_8000); // VZ0 = -32768
        assert_eq!(gte.get(1), 0xFFFF_8000); // sign-extended read
    }

    #[test]
    fn test_control_register_matrix_packing() {
        let mut gte = Gte::new();

        gte.set_control(0, 0x1234_5678);
        assert_eq!(gte.get_control(0), 0x1234_5678);

        gte.set_control(4, 0x0000_8000);
        assert_eq!(gte.get_control(4), 0xFFFF_8000); // RT33 sign-extends
    }

    #[test]
    fn test_sxyp_write_pushes_fifo() {
        let mut gte = Gte::new();

        gte.set(15, 0x0001_0001);
        gte.set(15, 0x0002_0002);
        gte.set(15, 0x0003_0003);

        assert_eq!(gte.get(12), 0x0001_0001);
        assert_eq!(gte.get(13), 0x0002_0002);
        assert_eq!(gte.get(14), 0x0003_0003);
        assert_eq!(gte.get(15), 0x0003_0003);
    }

    #[test]
    fn test_divide_exact() {
        let mut gte = Gte::new();
        gte.h = 0x1000;
        gte.sz[3] = 0x1000;

        // H/SZ3 = 1.0 in 1.16 fixed point
        assert_eq!(gte.divide(), 0x10000);
        assert_eq!(gte.flags, 0);
    }

    #[test]
    fn test_divide_overflow_sets_flag() {
        let mut gte = Gte::new();
        gte.h = 0x2000;
        gte.sz[3] = 0x1000;

        assert_eq!(gte.divide(), 0x1FFFF);
        assert_ne!(gte.flags & flag::DIV_OVF, 0);
    }

    #[test]
    fn test_divide_by_zero_sets_flag() {
        let mut gte = Gte::new();
        gte.h = 1;
        gte.sz[3] = 0;

        assert_eq!(gte.divide(), 0x1FFFF);
        assert_ne!(gte.flags & flag::DIV_OVF, 0);
    }

    #[test]
    fn test_ir_saturation_with_lm() {
        let mut gte = Gte::new();

        gte.set_ir(1, -5, true);
        assert_eq!(gte.ir[1], 0);
        assert_ne!(gte.flags & flag::IR1_SAT, 0);

        gte.flags = 0;
        gte.set_ir(1, -5, false);
        assert_eq!(gte.ir[1], -5);
        assert_eq!(gte.flags, 0);

        gte.set_ir(2, 0x9000, false);
        assert_eq!(gte.ir[2], 0x7FFF);
        assert_ne!(gte.flags & flag::IR2_SAT, 0);
    }

    #[test]
    fn test_sz_fifo_advances_and_saturates() {
        let mut gte = Gte::new();

        gte.push_sz(10);
        gte.push_sz(20);
        gte.push_sz(30);
        gte.push_sz(0x2_0000);

        assert_eq!(gte.sz, [10, 20, 30, 0xFFFF]);
        assert_ne!(gte.flags & flag::SZ3_SAT, 0);
    }

    #[test]
    fn test_mac_overflow_flags() {
        let mut gte = Gte::new();

        gte.ext_mac(1, 1 << 43);
        assert_ne!(gte.flags & flag::MAC1_POS, 0);

        gte.ext_mac(3, -(1 << 43) - 1);
        assert_ne!(gte.flags & flag::MAC3_NEG, 0);

        // In-range value leaves the flags alone
        let flags = gte.flags;
        assert_eq!(gte.ext_mac(2, 12345), 12345);
        assert_eq!(gte.flags, flags);
    }

    #[test]
    fn test_flag_bit31_summarizes() {
        let mut gte = Gte::new();

        gte.flags = flag::IR1_SAT;
        assert_ne!(gte.flags() & (1 << 31), 0);

        gte.flags = flag::IR0_SAT;
        assert_ne!(gte.flags() & (1 << 31), 0);

        gte.flags = 0;
        assert_eq!(gte.flags(), 0);
    }

    #[test]
    fn test_rtpt_identity_projection() {
        let mut gte = projection_gte();

        // Three vectors on the projection plane distance
        gte.set(0, 0x0000_0064); // V0 = (100, 0, ...)
        gte.set(1, 0x0000_0100); // VZ0 = 256 = H
        gte.set(2, 0x0000_0000);
        gte.set(3, 0x0000_0100);
        gte.set(4, 0xFF9C_0000); // V2 = (0, -100, ...)
        gte.set(5, 0x0000_0100);

        gte.execute(opcode::RTPT | (1 << 19)); // sf=1

        // Z went straight through the rotation into the SZ FIFO
        assert_eq!(gte.sz[3], 256);

        // At z == H the projection is 1:1, so SX2 of the first vector is 100
        let (x0, y0) = unpack_xy(gte.sxy[0]);
        assert_eq!((x0, y0), (100, 0));

        let (x2, y2) = unpack_xy(gte.sxy[2]);
        assert_eq!((x2, y2), (0, -100));
    }

    #[test]
    fn test_rtps_depth_cue_clamps_ir0() {
        let mut gte = projection_gte();

        gte.set_control(27, 0x0000_1000); // DQA
        gte.set_control(28, 0x0100_0000); // DQB large -> IR0 clamps high

        gte.set(0, 0);
        gte.set(1, 0x0000_0100);

        gte.execute(opcode::RTPS | (1 << 19));

        assert_eq!(gte.ir[0], 0x1000);
        assert_ne!(gte.flags() & flag::IR0_SAT, 0);
    }

    #[test]
    fn test_nclip_winding_sign() {
        let mut gte = Gte::new();

        // Counter-clockwise triangle
        gte.set(12, pack_xy(0, 0));
        gte.set(13, pack_xy(10, 0));
        gte.set(14, pack_xy(0, 10));

        gte.execute(opcode::NCLIP);
        assert_eq!(gte.mac[0], 100);

        // Swap two vertices: sign flips
        gte.set(13, pack_xy(0, 10));
        gte.set(14, pack_xy(10, 0));

        gte.execute(opcode::NCLIP);
        assert_eq!(gte.mac[0], -100);
    }

    #[test]
    fn test_avsz3_scales_and_saturates() {
        let mut gte = Gte::new();

        gte.sz = [0, 0x1000, 0x1000, 0x1000];
        gte.zsf3 = 0x155; // ~1/3 in 4.12

        gte.execute(opcode::AVSZ3);
        // 0x155 * 0x3000 >> 12 = 0x3FF
        assert_eq!(gte.otz, 0x3FF);

        gte.sz = [0xFFFF, 0xFFFF, 0xFFFF, 0xFFFF];
        gte.zsf3 = 0x7FFF;
        gte.execute(opcode::AVSZ3);
        assert_eq!(gte.otz, 0xFFFF);
        assert_ne!(gte.flags() & flag::SZ3_SAT, 0);
    }

    #[test]
    fn test_avsz4_uses_all_four_entries() {
        let mut gte = Gte::new();

        gte.sz = [0x100, 0x100, 0x100, 0x100];
        gte.zsf4 = 0x400; // 1/4 in 4.12

        gte.execute(opcode::AVSZ4);
        assert_eq!(gte.otz, 0x100);
    }

    #[test]
    fn test_lzcr_counts_leading_bits() {
        let mut gte = Gte::new();

        gte.set(30, 0x0000_0001);
        assert_eq!(gte.get(31), 31);

        gte.set(30, 0xFFFF_FFFE);
        assert_eq!(gte.get(31), 31);

        gte.set(30, 0);
        assert_eq!(gte.get(31), 32);
    }

    #[test]
    fn test_flags_clear_on_each_command() {
        let mut gte = Gte::new();
        gte.h = 0x2000;
        gte.sz[3] = 0x10;

        gte.execute(opcode::RTPS);
        assert_ne!(gte.flags(), 0);

        // A clean NCLIP clears the sticky state
        gte.set(12, pack_xy(0, 0));
        gte.set(13, pack_xy(1, 0));
        gte.set(14, pack_xy(0, 1));
        gte.execute(opcode::NCLIP);
        assert_eq!(gte.flags(), 0);
    }
}
