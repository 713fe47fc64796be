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

//! CPU (MIPS R3000A) emulation
//!
//! Instruction-at-a-time interpreter. The CPU keeps three program counters:
//! `current_pc` (the instruction being executed, reported by exceptions),
//! `pc` (the fetch address) and `next_pc` (the following fetch address,
//! redirected by branches). A two-slot boolean ring tracks whether the
//! current and next instructions sit in a branch delay slot so that EPC and
//! Cause.BD stay correct when a fault lands in a delay slot.
//!
//! # Specifications
//! - Architecture: MIPS I (32-bit)
//! - Clock frequency: 33.8688 MHz, 2 cycles per instruction
//! - Registers: 32 general-purpose registers + HI/LO
//!
//! # Example
//! ```
//! use sable::core::cpu::Cpu;
//!
//! let cpu = Cpu::new();
//! assert_eq!(cpu.reg(0), 0); // r0 is always 0
//! assert_eq!(cpu.pc(), 0xBFC00000);
//! ```

pub mod cop0;
pub mod gte;

use crate::core::error::{EmulatorError, Result};
use crate::core::memory::Bus;
use cop0::{Cop0, Exception};
use gte::Gte;

/// BIOS reset vector
const RESET_VECTOR: u32 = 0xBFC0_0000;

/// Entry point of the BIOS shell, used by the EXE side-load hook
const SHELL_ENTRY: u32 = 0x8003_0000;

/// Register index of the return-address register
const REG_RA: u32 = 31;

/// MIPS R3000A CPU core
pub struct Cpu {
    /// General purpose registers (r0-r31)
    ///
    /// r0 is hardwired to always return 0
    regs: [u32; 32],

    /// HI register (multiplication/division result upper 32 bits)
    hi: u32,

    /// LO register (multiplication/division result lower 32 bits)
    lo: u32,

    /// Fetch address of the next step
    pc: u32,

    /// Address of the instruction currently executing
    current_pc: u32,

    /// Fetch address after `pc` (branch targets land here)
    next_pc: u32,

    /// Delay-slot ring: `[0]` = current instruction is in a delay slot,
    /// `[1]` = the next one will be
    in_delay_slot: [bool; 2],

    /// Coprocessor 0 (System Control Unit)
    cop0: Cop0,

    /// Coprocessor 2 (Geometry Transformation Engine)
    gte: Gte,

    /// Line buffer for the BIOS putchar hook
    tty_line: String,
}

impl Cpu {
    /// Create a new CPU at the reset vector
    pub fn new() -> Self {
        Self {
            regs: [0u32; 32],
            hi: 0,
            lo: 0,
            pc: RESET_VECTOR,
            current_pc: RESET_VECTOR,
            next_pc: RESET_VECTOR.wrapping_add(4),
            in_delay_slot: [false; 2],
            cop0: Cop0::new(),
            gte: Gte::new(),
            tty_line: String::new(),
        }
    }

    /// Reset CPU to the power-on state
    pub fn reset(&mut self) {
        self.regs = [0u32; 32];
        self.hi = 0;
        self.lo = 0;
        self.pc = RESET_VECTOR;
        self.current_pc = RESET_VECTOR;
        self.next_pc = RESET_VECTOR.wrapping_add(4);
        self.in_delay_slot = [false; 2];
        self.cop0.reset();
        self.gte.reset();
        self.tty_line.clear();
    }

    /// Read a general purpose register; r0 always reads 0
    #[inline(always)]
    pub fn reg(&self, index: u32) -> u32 {
        self.regs[(index & 0x1F) as usize]
    }

    /// Write a general purpose register; writes to r0 are dropped
    #[inline(always)]
    pub fn set_reg(&mut self, index: u32, value: u32) {
        self.regs[(index & 0x1F) as usize] = value;
        self.regs[0] = 0;
    }

    /// Current program counter (the next instruction to execute)
    pub fn pc(&self) -> u32 {
        self.pc
    }

    /// COP0 register file (exception state, interrupt mask)
    pub fn cop0(&self) -> &Cop0 {
        &self.cop0
    }

    /// True if the current instruction sits in a branch delay slot
    pub fn in_delay_slot(&self) -> bool {
        self.in_delay_slot[0]
    }

    /// Execute a block of instructions
    ///
    /// The outer loop passes `quantum / 2` since every instruction costs two
    /// cycles. Pending unmasked interrupts are taken at instruction
    /// boundaries, never mid-instruction.
    ///
    /// # Arguments
    ///
    /// * `bus` - Memory bus
    /// * `count` - Number of instructions to run
    pub fn step_block(&mut self, bus: &mut Bus, count: i64) -> Result<()> {
        for _ in 0..count {
            self.step(bus)?;
        }
        Ok(())
    }

    /// Execute one instruction
    pub fn step(&mut self, bus: &mut Bus) -> Result<()> {
        // Sample the INTC line; interrupts are only ever taken here,
        // between instructions.
        self.cop0.set_interrupt_pending(bus.irq_pending());
        if self.cop0.interrupt_pending() {
            self.take_interrupt();
        }

        self.current_pc = self.pc;

        // Advance the delay-slot ring
        self.in_delay_slot[0] = self.in_delay_slot[1];
        self.in_delay_slot[1] = false;

        // Hook the BIOS function trampolines
        let masked_pc = self.current_pc & 0x1FFF_FFFF;
        if masked_pc == 0xA0 || masked_pc == 0xB0 || masked_pc == 0xC0 {
            self.bios_hook(masked_pc)?;
        }

        // Fetch, advance, execute
        let instruction = bus.read32(self.current_pc)?;

        self.pc = self.next_pc;
        self.next_pc = self.next_pc.wrapping_add(4);

        self.execute(bus, instruction)
    }

    /// Intercept the A0/B0/C0 BIOS call gates
    ///
    /// A0(0x40) is SystemErrorUnresolvedException, a guest state no game
    /// recovers from. B0(0x3D) is putchar; the character goes to the host
    /// log, line-buffered.
    fn bios_hook(&mut self, gate: u32) -> Result<()> {
        let function = self.reg(9); // t1 selects the BIOS function

        if gate == 0xA0 && function == 0x40 {
            return Err(EmulatorError::InvalidState {
                message: "guest raised SystemErrorUnresolvedException".into(),
            });
        }

        if gate == 0xB0 && function == 0x3D {
            let ch = self.reg(4) as u8 as char; // a0 carries the character
            if ch == '\n' {
                log::info!(target: "tty", "{}", self.tty_line);
                self.tty_line.clear();
            } else {
                self.tty_line.push(ch);
            }
        }

        Ok(())
    }

    /// Characters printed by the guest on the current (unflushed) TTY line
    pub fn tty_line(&self) -> &str {
        &self.tty_line
    }

    // --- Control flow helpers ---

    /// Set PC and next PC (exception vectors, EXE entry)
    fn set_pc(&mut self, addr: u32) -> Result<()> {
        if addr == 0 {
            return Err(EmulatorError::InvalidState {
                message: "jump to address 0".into(),
            });
        }

        if addr & 3 != 0 {
            self.cop0.set_bad_vaddr(addr);
            self.raise_exception(Exception::LoadError);
            return Ok(());
        }

        self.pc = addr;
        self.next_pc = addr.wrapping_add(4);
        Ok(())
    }

    /// Redirect the next fetch (branch targets)
    fn set_branch_pc(&mut self, addr: u32) -> Result<()> {
        if addr == 0 {
            return Err(EmulatorError::InvalidState {
                message: "jump to address 0".into(),
            });
        }

        if addr & 3 != 0 {
            self.cop0.set_bad_vaddr(addr);
            self.raise_exception(Exception::LoadError);
            return Ok(());
        }

        self.next_pc = addr;
        Ok(())
    }

    /// Common branch path: write the link register, mark the delay slot,
    /// and take the branch when the condition holds
    fn branch(&mut self, target: u32, taken: bool, link_reg: u32) -> Result<()> {
        if self.in_delay_slot[0] {
            return Err(EmulatorError::InvalidState {
                message: format!(
                    "branch in branch delay slot at PC=0x{:08X}",
                    self.current_pc
                ),
            });
        }

        // The link register receives the address after the delay slot
        self.set_reg(link_reg, self.next_pc);

        self.in_delay_slot[1] = true;

        if taken {
            self.set_branch_pc(target)?;
        }
        Ok(())
    }

    /// Raise a CPU exception through COP0
    ///
    /// EPC points at the faulting instruction, or at the preceding branch
    /// when the fault sits in a delay slot (with Cause.BD set). Both delay
    /// ring slots are cleared; control transfers to the active vector.
    fn raise_exception(&mut self, e: Exception) {
        log::trace!("CPU: exception {:?} @ 0x{:08X}", e, self.current_pc);

        self.cop0.enter_exception(e);
        self.cop0.set_bd(self.in_delay_slot[0]);

        if self.in_delay_slot[0] {
            self.cop0.set_epc(self.current_pc.wrapping_sub(4));
        } else {
            self.cop0.set_epc(self.current_pc);
        }

        self.in_delay_slot = [false; 2];

        let vector = if self.cop0.is_bev() {
            0xBFC0_0180
        } else {
            0x8000_0080
        };

        self.pc = vector;
        self.next_pc = vector.wrapping_add(4);
    }

    /// Take a pending external interrupt at an instruction boundary
    fn take_interrupt(&mut self) {
        self.current_pc = self.pc;

        self.in_delay_slot[0] = self.in_delay_slot[1];
        self.in_delay_slot[1] = false;

        self.raise_exception(Exception::Interrupt);
    }

    // --- Memory helpers ---

    /// Aligned word read with AdEL reporting
    fn load32(&mut self, bus: &mut Bus, addr: u32) -> Result<Option<u32>> {
        if addr & 3 != 0 {
            self.cop0.set_bad_vaddr(addr);
            self.raise_exception(Exception::LoadError);
            return Ok(None);
        }
        bus.read32(addr).map(Some)
    }

    /// Aligned halfword read with AdEL reporting
    fn load16(&mut self, bus: &mut Bus, addr: u32) -> Result<Option<u16>> {
        if addr & 1 != 0 {
            self.cop0.set_bad_vaddr(addr);
            self.raise_exception(Exception::LoadError);
            return Ok(None);
        }
        bus.read16(addr).map(Some)
    }

    /// Aligned word write with AdES reporting and isolation suppression
    fn store32(&mut self, bus: &mut Bus, addr: u32, value: u32) -> Result<()> {
        if addr & 3 != 0 {
            self.cop0.set_bad_vaddr(addr);
            self.raise_exception(Exception::StoreError);
            return Ok(());
        }
        if self.cop0.is_cache_isolated() {
            return Ok(());
        }
        bus.write32(addr, value)
    }

    /// Aligned halfword write with AdES reporting and isolation suppression
    fn store16(&mut self, bus: &mut Bus, addr: u32, value: u16) -> Result<()> {
        if addr & 1 != 0 {
            self.cop0.set_bad_vaddr(addr);
            self.raise_exception(Exception::StoreError);
            return Ok(());
        }
        if self.cop0.is_cache_isolated() {
            return Ok(());
        }
        bus.write16(addr, value)
    }

    // --- Decode ---

    /// Decode and execute one instruction word
    fn execute(&mut self, bus: &mut Bus, instr: u32) -> Result<()> {
        let opcode = instr >> 26;

        match opcode {
            0x00 => self.execute_special(bus, instr),
            0x01 => self.execute_regimm(instr),
            0x02 => self.op_j(instr),
            0x03 => self.op_jal(instr),
            0x04 => self.op_beq(instr),
            0x05 => self.op_bne(instr),
            0x06 => self.op_blez(instr),
            0x07 => self.op_bgtz(instr),
            0x08 => self.op_addi(instr),
            0x09 => self.op_addiu(instr),
            0x0A => self.op_slti(instr),
            0x0B => self.op_sltiu(instr),
            0x0C => self.op_andi(instr),
            0x0D => self.op_ori(instr),
            0x0E => self.op_xori(instr),
            0x0F => self.op_lui(instr),
            0x10 => self.execute_cop0(instr),
            0x12 => self.execute_cop2(instr),
            0x20 => self.op_lb(bus, instr),
            0x21 => self.op_lh(bus, instr),
            0x22 => self.op_lwl(bus, instr),
            0x23 => self.op_lw(bus, instr),
            0x24 => self.op_lbu(bus, instr),
            0x25 => self.op_lhu(bus, instr),
            0x26 => self.op_lwr(bus, instr),
            0x28 => self.op_sb(bus, instr),
            0x29 => self.op_sh(bus, instr),
            0x2A => self.op_swl(bus, instr),
            0x2B => self.op_sw(bus, instr),
            0x2E => self.op_swr(bus, instr),
            0x32 => self.op_lwc2(bus, instr),
            0x3A => self.op_swc2(bus, instr),
            _ => Err(EmulatorError::UnhandledInstruction {
                instruction: instr,
                pc: self.current_pc,
            }),
        }
    }

    /// SPECIAL group (opcode 0x00), selected by the funct field
    fn execute_special(&mut self, bus: &mut Bus, instr: u32) -> Result<()> {
        match instr & 0x3F {
            0x00 => self.op_sll(instr),
            0x02 => self.op_srl(instr),
            0x03 => self.op_sra(instr),
            0x04 => self.op_sllv(instr),
            0x06 => self.op_srlv(instr),
            0x07 => self.op_srav(instr),
            0x08 => self.op_jr(bus, instr),
            0x09 => self.op_jalr(bus, instr),
            0x0C => {
                self.raise_exception(Exception::SystemCall);
                Ok(())
            }
            0x0D => {
                self.raise_exception(Exception::Breakpoint);
                Ok(())
            }
            0x10 => self.op_mfhi(instr),
            0x11 => self.op_mthi(instr),
            0x12 => self.op_mflo(instr),
            0x13 => self.op_mtlo(instr),
            0x18 => self.op_mult(instr),
            0x19 => self.op_multu(instr),
            0x1A => self.op_div(instr),
            0x1B => self.op_divu(instr),
            0x20 => self.op_add(instr),
            0x21 => self.op_addu(instr),
            0x22 => self.op_sub(instr),
            0x23 => self.op_subu(instr),
            0x24 => self.op_and(instr),
            0x25 => self.op_or(instr),
            0x26 => self.op_xor(instr),
            0x27 => self.op_nor(instr),
            0x2A => self.op_slt(instr),
            0x2B => self.op_sltu(instr),
            _ => Err(EmulatorError::UnhandledInstruction {
                instruction: instr,
                pc: self.current_pc,
            }),
        }
    }

    /// REGIMM group (opcode 0x01)
    ///
    /// Only bit 16 (BGEZ vs BLTZ) and bit 20 (and-link) of the rt field
    /// participate in the decode; the other bits are ignored by hardware.
    fn execute_regimm(&mut self, instr: u32) -> Result<()> {
        let rs = reg_rs(instr);
        let target = self
            .pc
            .wrapping_add((sign_extend16(instr) << 2) as u32);

        let value = self.reg(rs) as i32;
        let rt = reg_rt(instr);

        let taken = if rt & 0x01 != 0 {
            value >= 0 // BGEZ / BGEZAL
        } else {
            value < 0 // BLTZ / BLTZAL
        };

        let link_reg = if rt & 0x10 != 0 { REG_RA } else { 0 };

        self.branch(target, taken, link_reg)
    }

    /// COP0 transfers and RFE
    fn execute_cop0(&mut self, instr: u32) -> Result<()> {
        match reg_rs(instr) {
            0x00 => {
                // MFC0
                let data = self.cop0.get(reg_rd(instr));
                self.set_reg(reg_rt(instr), data);
                Ok(())
            }
            0x04 => {
                // MTC0
                self.cop0.set(reg_rd(instr), self.reg(reg_rt(instr)));
                Ok(())
            }
            0x10..=0x1F => match instr & 0x3F {
                0x10 => {
                    // RFE pops the mode stack; PC is untouched
                    self.cop0.leave_exception();
                    Ok(())
                }
                _ => Err(EmulatorError::UnhandledInstruction {
                    instruction: instr,
                    pc: self.current_pc,
                }),
            },
            _ => Err(EmulatorError::UnhandledInstruction {
                instruction: instr,
                pc: self.current_pc,
            }),
        }
    }

    /// COP2 transfers and GTE command dispatch
    fn execute_cop2(&mut self, instr: u32) -> Result<()> {
        let rs = reg_rs(instr);

        if rs >= 0x10 {
            // CO format: the low 25 bits select the GTE operation
            self.gte.execute(instr & 0x1FF_FFFF);
            return Ok(());
        }

        match rs {
            0x00 => {
                // MFC2
                let data = self.gte.get(reg_rd(instr));
                self.set_reg(reg_rt(instr), data);
                Ok(())
            }
            0x02 => {
                // CFC2
                let data = self.gte.get_control(reg_rd(instr));
                self.set_reg(reg_rt(instr), data);
                Ok(())
            }
            0x04 => {
                // MTC2
                self.gte.set(reg_rd(instr), self.reg(reg_rt(instr)));
                Ok(())
            }
            0x06 => {
                // CTC2
                self.gte.set_control(reg_rd(instr), self.reg(reg_rt(instr)));
                Ok(())
            }
            _ => Err(EmulatorError::UnhandledInstruction {
                instruction: instr,
                pc: self.current_pc,
            }),
        }
    }

    // --- Arithmetic ---

    /// ADD: signed addition, overflow raises an exception
    fn op_add(&mut self, instr: u32) -> Result<()> {
        let a = self.reg(reg_rs(instr));
        let b = self.reg(reg_rt(instr));
        let result = a.wrapping_add(b);

        // Same sign in, different sign out = signed overflow
        if (!(a ^ b) & (a ^ result)) & 0x8000_0000 != 0 {
            self.raise_exception(Exception::Overflow);
            return Ok(());
        }

        self.set_reg(reg_rd(instr), result);
        Ok(())
    }

    /// ADDI: signed immediate addition, overflow raises an exception
    fn op_addi(&mut self, instr: u32) -> Result<()> {
        let a = self.reg(reg_rs(instr));
        let imm = sign_extend16(instr) as u32;
        let result = a.wrapping_add(imm);

        if (!(a ^ imm) & (a ^ result)) & 0x8000_0000 != 0 {
            self.raise_exception(Exception::Overflow);
            return Ok(());
        }

        self.set_reg(reg_rt(instr), result);
        Ok(())
    }

    /// ADDIU
    fn op_addiu(&mut self, instr: u32) -> Result<()> {
        let result = self
            .reg(reg_rs(instr))
            .wrapping_add(sign_extend16(instr) as u32);
        self.set_reg(reg_rt(instr), result);
        Ok(())
    }

    /// ADDU
    fn op_addu(&mut self, instr: u32) -> Result<()> {
        let result = self.reg(reg_rs(instr)).wrapping_add(self.reg(reg_rt(instr)));
        self.set_reg(reg_rd(instr), result);
        Ok(())
    }

    /// SUB: signed subtraction, overflow raises an exception
    fn op_sub(&mut self, instr: u32) -> Result<()> {
        let a = self.reg(reg_rs(instr));
        let b = self.reg(reg_rt(instr));
        let result = a.wrapping_sub(b);

        if ((a ^ b) & (a ^ result)) & 0x8000_0000 != 0 {
            self.raise_exception(Exception::Overflow);
            return Ok(());
        }

        self.set_reg(reg_rd(instr), result);
        Ok(())
    }

    /// SUBU
    fn op_subu(&mut self, instr: u32) -> Result<()> {
        let result = self.reg(reg_rs(instr)).wrapping_sub(self.reg(reg_rt(instr)));
        self.set_reg(reg_rd(instr), result);
        Ok(())
    }

    // --- Bitwise ---

    /// AND
    fn op_and(&mut self, instr: u32) -> Result<()> {
        let result = self.reg(reg_rs(instr)) & self.reg(reg_rt(instr));
        self.set_reg(reg_rd(instr), result);
        Ok(())
    }

    /// ANDI (zero-extended immediate)
    fn op_andi(&mut self, instr: u32) -> Result<()> {
        let result = self.reg(reg_rs(instr)) & (instr & 0xFFFF);
        self.set_reg(reg_rt(instr), result);
        Ok(())
    }

    /// OR
    fn op_or(&mut self, instr: u32) -> Result<()> {
        let result = self.reg(reg_rs(instr)) | self.reg(reg_rt(instr));
        self.set_reg(reg_rd(instr), result);
        Ok(())
    }

    /// ORI (zero-extended immediate)
    fn op_ori(&mut self, instr: u32) -> Result<()> {
        let result = self.reg(reg_rs(instr)) | (instr & 0xFFFF);
        self.set_reg(reg_rt(instr), result);
        Ok(())
    }

    /// XOR
    fn op_xor(&mut self, instr: u32) -> Result<()> {
        let result = self.reg(reg_rs(instr)) ^ self.reg(reg_rt(instr));
        self.set_reg(reg_rd(instr), result);
        Ok(())
    }

    /// XORI (zero-extended immediate)
    fn op_xori(&mut self, instr: u32) -> Result<()> {
        let result = self.reg(reg_rs(instr)) ^ (instr & 0xFFFF);
        self.set_reg(reg_rt(instr), result);
        Ok(())
    }

    /// NOR
    fn op_nor(&mut self, instr: u32) -> Result<()> {
        let result = !(self.reg(reg_rs(instr)) | self.reg(reg_rt(instr)));
        self.set_reg(reg_rd(instr), result);
        Ok(())
    }

    /// LUI
    fn op_lui(&mut self, instr: u32) -> Result<()> {
        self.set_reg(reg_rt(instr), (instr & 0xFFFF) << 16);
        Ok(())
    }

    // --- Shifts ---

    /// SLL (also the canonical NOP encoding)
    fn op_sll(&mut self, instr: u32) -> Result<()> {
        let result = self.reg(reg_rt(instr)) << shamt(instr);
        self.set_reg(reg_rd(instr), result);
        Ok(())
    }

    /// SRL
    fn op_srl(&mut self, instr: u32) -> Result<()> {
        let result = self.reg(reg_rt(instr)) >> shamt(instr);
        self.set_reg(reg_rd(instr), result);
        Ok(())
    }

    /// SRA
    fn op_sra(&mut self, instr: u32) -> Result<()> {
        let result = (self.reg(reg_rt(instr)) as i32) >> shamt(instr);
        self.set_reg(reg_rd(instr), result as u32);
        Ok(())
    }

    /// SLLV
    fn op_sllv(&mut self, instr: u32) -> Result<()> {
        let result = self.reg(reg_rt(instr)) << (self.reg(reg_rs(instr)) & 0x1F);
        self.set_reg(reg_rd(instr), result);
        Ok(())
    }

    /// SRLV
    fn op_srlv(&mut self, instr: u32) -> Result<()> {
        let result = self.reg(reg_rt(instr)) >> (self.reg(reg_rs(instr)) & 0x1F);
        self.set_reg(reg_rd(instr), result);
        Ok(())
    }

    /// SRAV
    fn op_srav(&mut self, instr: u32) -> Result<()> {
        let result = (self.reg(reg_rt(instr)) as i32) >> (self.reg(reg_rs(instr)) & 0x1F);
        self.set_reg(reg_rd(instr), result as u32);
        Ok(())
    }

    // --- Comparisons ---

    /// SLT
    fn op_slt(&mut self, instr: u32) -> Result<()> {
        let result = (self.reg(reg_rs(instr)) as i32) < (self.reg(reg_rt(instr)) as i32);
        self.set_reg(reg_rd(instr), result as u32);
        Ok(())
    }

    /// SLTU
    fn op_sltu(&mut self, instr: u32) -> Result<()> {
        let result = self.reg(reg_rs(instr)) < self.reg(reg_rt(instr));
        self.set_reg(reg_rd(instr), result as u32);
        Ok(())
    }

    /// SLTI
    fn op_slti(&mut self, instr: u32) -> Result<()> {
        let result = (self.reg(reg_rs(instr)) as i32) < sign_extend16(instr);
        self.set_reg(reg_rt(instr), result as u32);
        Ok(())
    }

    /// SLTIU (immediate still sign-extended, comparison unsigned)
    fn op_sltiu(&mut self, instr: u32) -> Result<()> {
        let result = self.reg(reg_rs(instr)) < sign_extend16(instr) as u32;
        self.set_reg(reg_rt(instr), result as u32);
        Ok(())
    }

    // --- Multiply / divide ---

    /// MULT: signed 64-bit product into HI:LO
    fn op_mult(&mut self, instr: u32) -> Result<()> {
        let a = self.reg(reg_rs(instr)) as i32 as i64;
        let b = self.reg(reg_rt(instr)) as i32 as i64;
        let result = (a * b) as u64;

        self.lo = result as u32;
        self.hi = (result >> 32) as u32;
        Ok(())
    }

    /// MULTU: unsigned 64-bit product into HI:LO
    fn op_multu(&mut self, instr: u32) -> Result<()> {
        let a = self.reg(reg_rs(instr)) as u64;
        let b = self.reg(reg_rt(instr)) as u64;
        let result = a * b;

        self.lo = result as u32;
        self.hi = (result >> 32) as u32;
        Ok(())
    }

    /// DIV with the PSX divide-by-zero and INT_MIN/-1 rules
    fn op_div(&mut self, instr: u32) -> Result<()> {
        let n = self.reg(reg_rs(instr)) as i32;
        let d = self.reg(reg_rt(instr)) as i32;

        if d == 0 {
            self.lo = if n < 0 { 1 } else { 0xFFFF_FFFF };
            self.hi = n as u32;
        } else if n == i32::MIN && d == -1 {
            self.lo = i32::MIN as u32;
            self.hi = 0;
        } else {
            self.lo = (n / d) as u32;
            self.hi = (n % d) as u32;
        }
        Ok(())
    }

    /// DIVU: unsigned division; by zero sets LO = -1, HI = numerator
    fn op_divu(&mut self, instr: u32) -> Result<()> {
        let n = self.reg(reg_rs(instr));
        let d = self.reg(reg_rt(instr));

        if d == 0 {
            self.lo = 0xFFFF_FFFF;
            self.hi = n;
        } else {
            self.lo = n / d;
            self.hi = n % d;
        }
        Ok(())
    }

    /// MFHI
    fn op_mfhi(&mut self, instr: u32) -> Result<()> {
        self.set_reg(reg_rd(instr), self.hi);
        Ok(())
    }

    /// MTHI
    fn op_mthi(&mut self, instr: u32) -> Result<()> {
        self.hi = self.reg(reg_rs(instr));
        Ok(())
    }

    /// MFLO
    fn op_mflo(&mut self, instr: u32) -> Result<()> {
        self.set_reg(reg_rd(instr), self.lo);
        Ok(())
    }

    /// MTLO
    fn op_mtlo(&mut self, instr: u32) -> Result<()> {
        self.lo = self.reg(reg_rs(instr));
        Ok(())
    }

    // --- Branches and jumps ---

    /// BEQ
    fn op_beq(&mut self, instr: u32) -> Result<()> {
        let target = self.pc.wrapping_add((sign_extend16(instr) << 2) as u32);
        let taken = self.reg(reg_rs(instr)) == self.reg(reg_rt(instr));
        self.branch(target, taken, 0)
    }

    /// BNE
    fn op_bne(&mut self, instr: u32) -> Result<()> {
        let target = self.pc.wrapping_add((sign_extend16(instr) << 2) as u32);
        let taken = self.reg(reg_rs(instr)) != self.reg(reg_rt(instr));
        self.branch(target, taken, 0)
    }

    /// BLEZ
    fn op_blez(&mut self, instr: u32) -> Result<()> {
        let target = self.pc.wrapping_add((sign_extend16(instr) << 2) as u32);
        let taken = (self.reg(reg_rs(instr)) as i32) <= 0;
        self.branch(target, taken, 0)
    }

    /// BGTZ
    fn op_bgtz(&mut self, instr: u32) -> Result<()> {
        let target = self.pc.wrapping_add((sign_extend16(instr) << 2) as u32);
        let taken = (self.reg(reg_rs(instr)) as i32) > 0;
        self.branch(target, taken, 0)
    }

    /// J
    fn op_j(&mut self, instr: u32) -> Result<()> {
        let target = (self.pc & 0xF000_0000) | ((instr & 0x03FF_FFFF) << 2);
        self.branch(target, true, 0)
    }

    /// JAL
    fn op_jal(&mut self, instr: u32) -> Result<()> {
        let target = (self.pc & 0xF000_0000) | ((instr & 0x03FF_FFFF) << 2);
        self.branch(target, true, REG_RA)
    }

    /// JR (with the shell-entry side-load hook)
    fn op_jr(&mut self, bus: &mut Bus, instr: u32) -> Result<()> {
        let target = self.reg(reg_rs(instr));
        let target = self.hook_shell_entry(bus, target)?;
        self.branch(target, true, 0)
    }

    /// JALR (with the shell-entry side-load hook)
    fn op_jalr(&mut self, bus: &mut Bus, instr: u32) -> Result<()> {
        let target = self.reg(reg_rs(instr));
        let target = self.hook_shell_entry(bus, target)?;
        self.branch(target, true, reg_rd(instr))
    }

    /// Divert a jump to the BIOS shell into a side-loaded executable
    ///
    /// The loader has already validated the image; patching RAM happens
    /// here, right before control would have reached the shell.
    fn hook_shell_entry(&mut self, bus: &mut Bus, target: u32) -> Result<u32> {
        if target != SHELL_ENTRY {
            return Ok(target);
        }

        let exe = match bus.take_exe() {
            Some(exe) => exe,
            None => return Ok(target),
        };

        let entry = exe.entry_pc();
        log::info!("CPU: side-loading EXE, entry 0x{:08X}", entry);

        exe.patch_into_ram(bus)?;

        self.set_reg(28, exe.initial_gp()); // gp
        let sp = exe.initial_sp();
        self.set_reg(29, sp); // sp
        self.set_reg(30, sp); // fp

        Ok(entry)
    }

    // --- Loads ---

    /// LB
    fn op_lb(&mut self, bus: &mut Bus, instr: u32) -> Result<()> {
        let addr = self.effective_address(instr);
        let value = bus.read8(addr)? as i8 as i32 as u32;
        self.set_reg(reg_rt(instr), value);
        Ok(())
    }

    /// LBU
    fn op_lbu(&mut self, bus: &mut Bus, instr: u32) -> Result<()> {
        let addr = self.effective_address(instr);
        let value = bus.read8(addr)? as u32;
        self.set_reg(reg_rt(instr), value);
        Ok(())
    }

    /// LH
    fn op_lh(&mut self, bus: &mut Bus, instr: u32) -> Result<()> {
        let addr = self.effective_address(instr);
        if let Some(value) = self.load16(bus, addr)? {
            self.set_reg(reg_rt(instr), value as i16 as i32 as u32);
        }
        Ok(())
    }

    /// LHU
    fn op_lhu(&mut self, bus: &mut Bus, instr: u32) -> Result<()> {
        let addr = self.effective_address(instr);
        if let Some(value) = self.load16(bus, addr)? {
            self.set_reg(reg_rt(instr), value as u32);
        }
        Ok(())
    }

    /// LW
    fn op_lw(&mut self, bus: &mut Bus, instr: u32) -> Result<()> {
        let addr = self.effective_address(instr);
        if let Some(value) = self.load32(bus, addr)? {
            self.set_reg(reg_rt(instr), value);
        }
        Ok(())
    }

    /// LWL: merge the high bytes of an unaligned word
    fn op_lwl(&mut self, bus: &mut Bus, instr: u32) -> Result<()> {
        let addr = self.effective_address(instr);
        let rt = reg_rt(instr);

        let aligned = bus.read32(addr & !3)?;
        let shift = 24 - 8 * (addr & 3);
        let mask = !(!0u32 << shift);

        self.set_reg(rt, (self.reg(rt) & mask) | (aligned << shift));
        Ok(())
    }

    /// LWR: merge the low bytes of an unaligned word
    fn op_lwr(&mut self, bus: &mut Bus, instr: u32) -> Result<()> {
        let addr = self.effective_address(instr);
        let rt = reg_rt(instr);

        let aligned = bus.read32(addr & !3)?;
        let shift = 8 * (addr & 3);
        let mask = 0xFFFF_FF00u32 << (24 - shift);

        self.set_reg(rt, (self.reg(rt) & mask) | (aligned >> shift));
        Ok(())
    }

    /// LWC2: load a word into a GTE data register
    fn op_lwc2(&mut self, bus: &mut Bus, instr: u32) -> Result<()> {
        let addr = self.effective_address(instr);
        if let Some(value) = self.load32(bus, addr)? {
            self.gte.set(reg_rt(instr), value);
        }
        Ok(())
    }

    // --- Stores ---

    /// SB
    fn op_sb(&mut self, bus: &mut Bus, instr: u32) -> Result<()> {
        let addr = self.effective_address(instr);
        if self.cop0.is_cache_isolated() {
            return Ok(());
        }
        bus.write8(addr, self.reg(reg_rt(instr)) as u8)
    }

    /// SH
    fn op_sh(&mut self, bus: &mut Bus, instr: u32) -> Result<()> {
        let addr = self.effective_address(instr);
        let value = self.reg(reg_rt(instr)) as u16;
        self.store16(bus, addr, value)
    }

    /// SW
    fn op_sw(&mut self, bus: &mut Bus, instr: u32) -> Result<()> {
        let addr = self.effective_address(instr);
        let value = self.reg(reg_rt(instr));
        self.store32(bus, addr, value)
    }

    /// SWL: store the high bytes of the register into an unaligned word
    fn op_swl(&mut self, bus: &mut Bus, instr: u32) -> Result<()> {
        let addr = self.effective_address(instr);

        let aligned = bus.read32(addr & !3)?;
        let shift = 8 * (addr & 3);
        let mask = 0xFFFF_FF00u32 << shift;

        let value = (aligned & mask) | (self.reg(reg_rt(instr)) >> (24 - shift));

        if self.cop0.is_cache_isolated() {
            return Ok(());
        }
        bus.write32(addr & !3, value)
    }

    /// SWR: store the low bytes of the register into an unaligned word
    fn op_swr(&mut self, bus: &mut Bus, instr: u32) -> Result<()> {
        let addr = self.effective_address(instr);

        let aligned = bus.read32(addr & !3)?;
        let shift = 8 * (addr & 3);
        let mask = !(!0u32 << shift);

        let value = (aligned & mask) | (self.reg(reg_rt(instr)) << shift);

        if self.cop0.is_cache_isolated() {
            return Ok(());
        }
        bus.write32(addr & !3, value)
    }

    /// SWC2: store a GTE data register
    fn op_swc2(&mut self, bus: &mut Bus, instr: u32) -> Result<()> {
        let addr = self.effective_address(instr);
        let value = self.gte.get(reg_rt(instr));
        self.store32(bus, addr, value)
    }

    /// Base register plus sign-extended offset
    #[inline(always)]
    fn effective_address(&self, instr: u32) -> u32 {
        self.reg(reg_rs(instr))
            .wrapping_add(sign_extend16(instr) as u32)
    }
}

impl Default for Cpu {
    fn default() -> Self {
        Self::new()
    }
}

// --- Field extraction helpers ---

/// rs field (bits 21..=25)
#[inline(always)]
fn reg_rs(instr: u32) -> u32 {
    (instr >> 21) & 0x1F
}

/// rt field (bits 16..=20)
#[inline(always)]
fn reg_rt(instr: u32) -> u32 {
    (instr >> 16) & 0x1F
}

/// rd field (bits 11..=15)
#[inline(always)]
fn reg_rd(instr: u32) -> u32 {
    (instr >> 11) & 0x1F
}

/// shamt field (bits 6..=10)
#[inline(always)]
fn shamt(instr: u32) -> u32 {
    (instr >> 6) & 0x1F
}

/// Sign-extended 16-bit immediate
#[inline(always)]
fn sign_extend16(instr: u32) -> i32 {
    instr as u16 as i16 as i32
}
