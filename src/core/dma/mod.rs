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

//! DMA (Direct Memory Access) Controller
//!
//! Seven channels move words between RAM and the peripherals without CPU
//! involvement. This module owns the register file and the activation and
//! interrupt logic; the bus performs the actual data movement (it owns RAM
//! and the device handles) and reports back the transferred word count so
//! a completion event can model bus occupancy.
//!
//! # DMA Channels
//!
//! | Channel | Device      | Base Address |
//! |---------|-------------|--------------|
//! | 0       | MDEC In     | 0x1F801080   |
//! | 1       | MDEC Out    | 0x1F801090   |
//! | 2       | GPU         | 0x1F8010A0   |
//! | 3       | CD-ROM      | 0x1F8010B0   |
//! | 4       | SPU         | 0x1F8010C0   |
//! | 5       | PIO         | 0x1F8010D0   |
//! | 6       | OTC         | 0x1F8010E0   |
//!
//! Each channel has **MADR** (+0x0), **BCR** (+0x4) and **CHCR** (+0x8);
//! globally **DPCR** (0x1F8010F0) holds the per-channel enables and
//! **DICR** (0x1F8010F4) the interrupt mask/flag logic.
//!
//! A transfer activates when (DRQ or forced-start) and the DPCR enable and
//! the CHCR start bit are all set. MDEC-In, GPU, SPU and OTC keep their
//! request lines permanently asserted; the CD-ROM raises its line once a
//! sector sits in the drive's data buffer.

use crate::core::timing::{EventId, Scheduler};

/// Channel 0: MDEC input (macroblock upload)
pub const CH_MDEC_IN: usize = 0;
/// Channel 1: MDEC output (decoded pixels)
pub const CH_MDEC_OUT: usize = 1;
/// Channel 2: GPU (display lists and image data)
pub const CH_GPU: usize = 2;
/// Channel 3: CD-ROM sector buffer
pub const CH_CDROM: usize = 3;
/// Channel 4: SPU sound RAM
pub const CH_SPU: usize = 4;
/// Channel 5: PIO expansion
pub const CH_PIO: usize = 5;
/// Channel 6: OTC (ordering table clear)
pub const CH_OTC: usize = 6;

/// Channel names for logging
const CHANNEL_NAMES: [&str; 7] = [
    "MDEC_IN", "MDEC_OUT", "GPU", "CDROM", "SPU", "PIO", "OTC",
];

/// Transfer synchronization mode (CHCR bits 9-10)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// Whole block at once (CD-ROM, OTC)
    Burst,
    /// Block-by-block with device sync (SPU, GPU image data)
    Slice,
    /// Pointer-chain in RAM (GPU display lists)
    LinkedList,
}

/// Snapshot of one channel's transfer parameters, handed to the bus
#[derive(Debug, Clone, Copy)]
pub struct ChannelSetup {
    /// Start address in RAM (word aligned, masked)
    pub base_address: u32,
    /// BCR low half: words per block (0 reads as 0x10000)
    pub block_size: u32,
    /// BCR high half: number of blocks
    pub block_count: u32,
    /// Synchronization mode
    pub sync_mode: SyncMode,
    /// Direction: true = RAM to device
    pub from_ram: bool,
    /// Address step: true = decrementing
    pub decrement: bool,
}

impl ChannelSetup {
    /// Total words of a slice transfer (block size x block count)
    pub fn total_words(&self) -> u32 {
        self.block_size * self.block_count
    }
}

/// Effect of a DMA register write, applied by the bus
#[derive(Debug, Clone, Copy, Default)]
pub struct WriteEffect {
    /// Channel whose transfer the write just activated
    pub start_channel: Option<usize>,
    /// DICR master flag had a rising edge; raise INTC.DMA
    pub raise_irq: bool,
}

/// One DMA channel's register file
#[derive(Debug, Clone, Copy, Default)]
struct Channel {
    /// Memory address register
    madr: u32,
    /// Block size (BCR bits 0-15)
    size: u16,
    /// Block count (BCR bits 16-31)
    count: u16,
    /// Raw CHCR word
    chcr: u32,
    /// Device request line
    drq: bool,
}

impl Channel {
    const CHCR_FROM_RAM: u32 = 1 << 0;
    const CHCR_DECREMENT: u32 = 1 << 1;
    const CHCR_START: u32 = 1 << 24;
    const CHCR_FORCE: u32 = 1 << 28;

    fn sync_mode(&self) -> SyncMode {
        match (self.chcr >> 9) & 3 {
            0 => SyncMode::Burst,
            1 => SyncMode::Slice,
            _ => SyncMode::LinkedList,
        }
    }

    fn started(&self) -> bool {
        self.chcr & Self::CHCR_START != 0
    }

    fn forced(&self) -> bool {
        self.chcr & Self::CHCR_FORCE != 0
    }
}

/// DMA interrupt control (DICR) fields
#[derive(Debug, Clone, Copy, Default)]
struct Dicr {
    /// Force interrupt
    force: bool,
    /// Per-channel interrupt mask
    mask: u8,
    /// Master interrupt enable
    master_enable: bool,
    /// Per-channel pending flags
    pending: u8,
    /// Master interrupt flag
    master_flag: bool,
}

/// DMA controller with 7 channels
///
/// # Example
///
/// ```
/// use sable::core::dma::Dma;
/// use sable::core::timing::Scheduler;
///
/// let mut scheduler = Scheduler::new();
/// let dma = Dma::new(&mut scheduler);
/// assert_eq!(dma.read(0x1F8010F0), 0x0765_4321);
/// ```
pub struct Dma {
    /// The seven channels
    channels: [Channel; 7],

    /// DPCR priority/enable word
    control: u32,

    /// DICR interrupt state
    dicr: Dicr,

    /// Completion event registered with the scheduler (param = channel)
    transfer_end_event: EventId,
}

impl Dma {
    /// DPCR reset value (priorities 1..7 in channel order)
    const DPCR_RESET: u32 = 0x0765_4321;

    /// Create a new DMA controller and register its completion event
    pub fn new(scheduler: &mut Scheduler) -> Self {
        let mut dma = Self {
            channels: [Channel::default(); 7],
            control: Self::DPCR_RESET,
            dicr: Dicr::default(),
            transfer_end_event: scheduler.register_event("DMA transfer end"),
        };
        dma.assert_static_drqs();
        dma
    }

    /// Reset all channels and the interrupt state
    pub fn reset(&mut self) {
        self.channels = [Channel::default(); 7];
        self.control = Self::DPCR_RESET;
        self.dicr = Dicr::default();
        self.assert_static_drqs();
    }

    /// Request lines that the hardware holds permanently high
    fn assert_static_drqs(&mut self) {
        self.channels[CH_MDEC_IN].drq = true;
        self.channels[CH_GPU].drq = true;
        self.channels[CH_SPU].drq = true;
        self.channels[CH_OTC].drq = true;
    }

    /// Scheduler event id of the completion event
    pub fn transfer_end_event_id(&self) -> EventId {
        self.transfer_end_event
    }

    /// Set a device request line (CD-ROM sector ready, MDEC output)
    pub fn set_drq(&mut self, channel: usize, drq: bool) {
        self.channels[channel].drq = drq;
    }

    /// Snapshot a channel's decoded transfer parameters
    pub fn channel_setup(&self, channel: usize) -> ChannelSetup {
        let chn = &self.channels[channel];
        ChannelSetup {
            base_address: chn.madr,
            block_size: if chn.size == 0 { 0x1_0000 } else { chn.size as u32 },
            block_count: if chn.count == 0 {
                0x1_0000
            } else {
                chn.count as u32
            },
            sync_mode: chn.sync_mode(),
            from_ram: chn.chcr & Channel::CHCR_FROM_RAM != 0,
            decrement: chn.chcr & Channel::CHCR_DECREMENT != 0,
        }
    }

    /// Read a DMA register
    pub fn read(&self, paddr: u32) -> u32 {
        match paddr {
            0x1F80_10F0 => self.control,
            0x1F80_10F4 => self.read_dicr(),
            _ => {
                let channel = Self::channel_for(paddr);
                let chn = &self.channels[channel];
                match paddr & 0xF {
                    0x0 => chn.madr,
                    0x4 => ((chn.count as u32) << 16) | chn.size as u32,
                    _ => chn.chcr,
                }
            }
        }
    }

    /// Write a DMA register
    ///
    /// Returns the side effects the bus has to apply: a channel to start
    /// and/or a DMA interrupt edge.
    pub fn write(&mut self, paddr: u32, value: u32) -> WriteEffect {
        let mut effect = WriteEffect::default();

        match paddr {
            0x1F80_10F0 => {
                log::debug!("DMA: DPCR = 0x{:08X}", value);
                self.control = value;

                // A freshly enabled channel may be ready to run
                effect.start_channel = (0..7).find(|&chn| self.ready_to_start(chn));
            }
            0x1F80_10F4 => {
                log::debug!("DMA: DICR = 0x{:08X}", value);

                self.dicr.force = value & (1 << 15) != 0;
                self.dicr.mask = ((value >> 16) & 0x7F) as u8;
                self.dicr.master_enable = value & (1 << 23) != 0;
                // Writing 1 to a pending bit acknowledges it
                self.dicr.pending &= !((value >> 24) & 0x7F) as u8;

                effect.raise_irq = self.update_master_flag();
            }
            _ => {
                let channel = Self::channel_for(paddr);

                match paddr & 0xF {
                    0x0 => {
                        log::trace!("DMA: D{}_MADR = 0x{:08X}", channel, value);
                        self.channels[channel].madr = value & 0xFF_FFFC;
                    }
                    0x4 => {
                        log::trace!("DMA: D{}_BCR = 0x{:08X}", channel, value);
                        self.channels[channel].size = value as u16;
                        self.channels[channel].count = (value >> 16) as u16;
                    }
                    _ => {
                        log::debug!(
                            "DMA: D{}_CHCR ({}) = 0x{:08X}",
                            channel,
                            CHANNEL_NAMES[channel],
                            value
                        );
                        self.channels[channel].chcr = value;

                        if self.ready_to_start(channel) {
                            effect.start_channel = Some(channel);
                        }
                    }
                }
            }
        }

        effect
    }

    /// Activation rule: (DRQ | forced) & DPCR enable & CHCR start
    fn ready_to_start(&self, channel: usize) -> bool {
        let chn = &self.channels[channel];
        let enabled = self.control & (1 << (4 * channel + 3)) != 0;

        (chn.drq || chn.forced()) && enabled && chn.started()
    }

    /// Book-keeping after the bus moved a transfer's data
    ///
    /// Clears BCR and schedules the completion event with a cycle cost
    /// approximating the channel's bus bandwidth.
    pub fn transfer_started(&mut self, channel: usize, words: i64, scheduler: &mut Scheduler) {
        let chn = &mut self.channels[channel];
        chn.size = 0;
        chn.count = 0;

        // Per-word bus cost by device
        let cycles = match channel {
            CH_CDROM => 24 * words,
            CH_SPU => 4 * words,
            _ => words,
        };

        // The sector buffer is drained; drop the drive's request line
        if channel == CH_CDROM {
            chn.drq = false;
        }

        log::debug!(
            "DMA: {} transfer of {} words, completion in {} cycles",
            CHANNEL_NAMES[channel],
            words,
            cycles
        );

        scheduler.schedule(self.transfer_end_event, channel as i32, cycles.max(1));
    }

    /// Completion event handler: clear the start bit and latch the
    /// channel's interrupt
    ///
    /// Returns true when INTC.DMA must be raised (rising master flag).
    pub fn transfer_end(&mut self, channel: usize) -> bool {
        log::debug!("DMA: {} transfer end", CHANNEL_NAMES[channel]);

        self.channels[channel].chcr &= !Channel::CHCR_START;

        if self.dicr.mask & (1 << channel) != 0 {
            self.dicr.pending |= 1 << channel;
        }

        self.update_master_flag()
    }

    /// Recompute DICR.master_flag; true on a rising edge
    fn update_master_flag(&mut self) -> bool {
        let old = self.dicr.master_flag;

        self.dicr.master_flag = self.dicr.force
            || (self.dicr.master_enable && (self.dicr.mask & self.dicr.pending) != 0);

        !old && self.dicr.master_flag
    }

    /// Pack the DICR word
    fn read_dicr(&self) -> u32 {
        (self.dicr.force as u32) << 15
            | (self.dicr.mask as u32) << 16
            | (self.dicr.master_enable as u32) << 23
            | (self.dicr.pending as u32) << 24
            | (self.dicr.master_flag as u32) << 31
    }

    /// Map a channel register address to its channel index
    fn channel_for(paddr: u32) -> usize {
        ((paddr >> 4) & 0xF) as usize - 8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (Dma, Scheduler) {
        let mut scheduler = Scheduler::new();
        let dma = Dma::new(&mut scheduler);
        (dma, scheduler)
    }

    #[test]
    fn test_dpcr_reset_value() {
        let (dma, _) = setup();
        assert_eq!(dma.read(0x1F80_10F0), 0x0765_4321);
    }

    #[test]
    fn test_madr_masked_to_word_address() {
        let (mut dma, _) = setup();

        dma.write(0x1F80_10E0, 0xFF1F_FFFE);
        assert_eq!(dma.read(0x1F80_10E0), 0x001F_FFFC);
    }

    #[test]
    fn test_bcr_split() {
        let (mut dma, _) = setup();

        dma.write(0x1F80_10A4, 0x0010_0008);
        assert_eq!(dma.read(0x1F80_10A4), 0x0010_0008);

        let setup = dma.channel_setup(CH_GPU);
        assert_eq!(setup.block_size, 8);
        assert_eq!(setup.block_count, 0x10);
        assert_eq!(setup.total_words(), 0x80);
    }

    #[test]
    fn test_zero_block_size_reads_as_full() {
        let (mut dma, _) = setup();

        dma.write(0x1F80_10E4, 0);
        assert_eq!(dma.channel_setup(CH_OTC).block_size, 0x1_0000);
    }

    #[test]
    fn test_activation_requires_enable_and_start() {
        let (mut dma, _) = setup();

        // OTC has a static DRQ; starting without the DPCR enable does
        // nothing
        dma.control = 0;
        let effect = dma.write(0x1F80_10E8, (1 << 24) | 2);
        assert_eq!(effect.start_channel, None);

        // Enabling the channel in DPCR picks the waiting channel up
        let effect = dma.write(0x1F80_10F0, 0x0800_0000);
        assert_eq!(effect.start_channel, Some(CH_OTC));
    }

    #[test]
    fn test_forced_start_overrides_missing_drq() {
        let (mut dma, _) = setup();

        // CD-ROM DRQ is low until a sector is buffered
        let effect = dma.write(0x1F80_10B8, 1 << 24);
        assert_eq!(effect.start_channel, None);

        let effect = dma.write(0x1F80_10B8, (1 << 24) | (1 << 28));
        assert_eq!(effect.start_channel, Some(CH_CDROM));
    }

    #[test]
    fn test_chcr_mode_decode() {
        let (mut dma, _) = setup();

        dma.write(0x1F80_10A8, 1 | (2 << 9));
        let setup = dma.channel_setup(CH_GPU);
        assert_eq!(setup.sync_mode, SyncMode::LinkedList);
        assert!(setup.from_ram);
        assert!(!setup.decrement);

        dma.write(0x1F80_10E8, 2);
        let setup = dma.channel_setup(CH_OTC);
        assert_eq!(setup.sync_mode, SyncMode::Burst);
        assert!(setup.decrement);
    }

    #[test]
    fn test_transfer_end_clears_start_and_latches_irq() {
        let (mut dma, mut scheduler) = setup();

        // Enable channel 6 interrupts with master enable
        dma.write(0x1F80_10F4, (1 << 22) | (1 << 23));

        dma.write(0x1F80_10E8, (1 << 24) | 2);
        dma.transfer_started(CH_OTC, 8, &mut scheduler);

        assert!(dma.transfer_end(CH_OTC));
        assert_eq!(dma.read(0x1F80_10E8) & (1 << 24), 0);

        let dicr = dma.read(0x1F80_10F4);
        assert_ne!(dicr & (1 << 30), 0); // pending bit 6
        assert_ne!(dicr & (1 << 31), 0); // master flag
    }

    #[test]
    fn test_irq_is_edge_triggered() {
        let (mut dma, mut scheduler) = setup();

        dma.write(0x1F80_10F4, (1 << 22) | (1 << 23));

        dma.transfer_started(CH_OTC, 8, &mut scheduler);
        assert!(dma.transfer_end(CH_OTC));

        // A second completion while the flag is still set must not edge
        dma.transfer_started(CH_OTC, 8, &mut scheduler);
        assert!(!dma.transfer_end(CH_OTC));
    }

    #[test]
    fn test_dicr_pending_acknowledge() {
        let (mut dma, mut scheduler) = setup();

        dma.write(0x1F80_10F4, (1 << 22) | (1 << 23));
        dma.transfer_started(CH_OTC, 8, &mut scheduler);
        dma.transfer_end(CH_OTC);

        // Acknowledge pending bit 6
        let effect = dma.write(0x1F80_10F4, (1 << 22) | (1 << 23) | (1 << 30));
        assert!(!effect.raise_irq);
        assert_eq!(dma.read(0x1F80_10F4) & (1 << 30), 0);
    }

    #[test]
    fn test_unmasked_completion_does_not_latch() {
        let (mut dma, mut scheduler) = setup();

        dma.write(0x1F80_10F4, 1 << 23); // master on, mask empty

        dma.transfer_started(CH_GPU, 16, &mut scheduler);
        assert!(!dma.transfer_end(CH_GPU));
        assert_eq!(dma.read(0x1F80_10F4) & (0x7F << 24), 0);
    }

    #[test]
    fn test_completion_event_cost_by_channel() {
        let (mut dma, mut scheduler) = setup();

        dma.transfer_started(CH_CDROM, 512, &mut scheduler);
        // 24 cycles per word
        assert_eq!(scheduler.until_next_event(), 24 * 512);
    }
}
