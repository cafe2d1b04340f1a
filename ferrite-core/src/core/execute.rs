use log::trace;

use super::memory::MemoryError;
use super::{
    Core, CsrSpecifier, CsrWriteError, Exception, ExecutionError, ExecutionResult, FatalError,
};
use crate::instruction::CsrOp;
use crate::registers::{Registers, Specifier};
use crate::system_bus::SystemBus;
use crate::{Alignment, PrivilegeLevel};

#[derive(Debug)]
pub(super) struct Executor<'c, B: SystemBus> {
    pub core: &'c mut Core<B>,
}

impl<'c, B: SystemBus> Executor<'c, B> {
    /// Executes an `addi` instruction.
    ///
    /// > ADDI adds the sign-extended 12-bit immediate to register rs1. Arithmetic overflow is
    /// > ignored and the result is simply the low XLEN bits of the result. ADDI rd, rs1, 0 is
    /// > used to implement the MV rd, rs1 assembler pseudoinstruction.
    pub fn addi(&mut self, dest: Specifier, src: Specifier, immediate: i32) -> ExecutionResult {
        trace!("Executing addi {dest} {src} {immediate}");
        self.reg_imm_op(dest, src, immediate, |s, imm| s.wrapping_add_signed(imm))
    }

    /// Executes a `slti` instruction.
    ///
    /// > SLTI (set less than immediate) places the value 1 in register rd if register rs1 is less
    /// > than the sign-extended immediate when both are treated as signed numbers, else 0 is
    /// > written to rd.
    pub fn slti(&mut self, dest: Specifier, src: Specifier, immediate: i32) -> ExecutionResult {
        trace!("Executing slti {dest} {src} {immediate}");
        self.reg_imm_op(dest, src, immediate, |s, imm| ((s as i32) < imm) as u32)
    }

    /// Executes a `sltiu` instruction.
    ///
    /// > SLTIU is similar but compares the values as unsigned numbers (i.e., the immediate is
    /// > first sign-extended to XLEN bits then treated as an unsigned number). Note, SLTIU rd,
    /// > rs1, 1 sets rd to 1 if rs1 equals zero, otherwise sets rd to 0.
    pub fn sltiu(&mut self, dest: Specifier, src: Specifier, immediate: i32) -> ExecutionResult {
        trace!("Executing sltiu {dest} {src} {immediate}");
        self.reg_imm_op(dest, src, immediate, |s, imm| (s < (imm as u32)) as u32)
    }

    /// Executes an `andi` instruction.
    pub fn andi(&mut self, dest: Specifier, src: Specifier, immediate: i32) -> ExecutionResult {
        trace!("Executing andi {dest} {src} {immediate}");
        self.reg_imm_op(dest, src, immediate, |s, imm| s & (imm as u32))
    }

    /// Executes an `ori` instruction.
    pub fn ori(&mut self, dest: Specifier, src: Specifier, immediate: i32) -> ExecutionResult {
        trace!("Executing ori {dest} {src} {immediate}");
        self.reg_imm_op(dest, src, immediate, |s, imm| s | (imm as u32))
    }

    /// Executes a `xori` instruction.
    ///
    /// > Note, XORI rd, rs1, -1 performs a bitwise logical inversion of register rs1 (assembler
    /// > pseudoinstruction NOT rd, rs).
    pub fn xori(&mut self, dest: Specifier, src: Specifier, immediate: i32) -> ExecutionResult {
        trace!("Executing xori {dest} {src} {immediate}");
        self.reg_imm_op(dest, src, immediate, |s, imm| s ^ (imm as u32))
    }

    /// Executes a `slli` instruction.
    ///
    /// > SLLI is a logical left shift (zeros are shifted into the lower bits).
    ///
    /// # Panics
    ///
    /// `shift_amount_u5` must fit in a u5 (`0..=31`), otherwise this will panic.
    pub fn slli(
        &mut self,
        dest: Specifier,
        src: Specifier,
        shift_amount_u5: u32,
    ) -> ExecutionResult {
        trace!("Executing slli {dest} {src} {shift_amount_u5}");
        self.reg_shamt_op(dest, src, shift_amount_u5, |s, shamt| s << shamt)
    }

    /// Executes a `srli` instruction.
    ///
    /// > SRLI is a logical right shift (zeros are shifted into the upper bits).
    ///
    /// # Panics
    ///
    /// `shift_amount_u5` must fit in a u5 (`0..=31`), otherwise this will panic.
    pub fn srli(
        &mut self,
        dest: Specifier,
        src: Specifier,
        shift_amount_u5: u32,
    ) -> ExecutionResult {
        trace!("Executing srli {dest} {src} {shift_amount_u5}");
        self.reg_shamt_op(dest, src, shift_amount_u5, |s, shamt| s >> shamt)
    }

    /// Executes a `srai` instruction.
    ///
    /// > SRAI is an arithmetic right shift (the original sign bit is copied into the vacated
    /// > upper bits).
    ///
    /// # Panics
    ///
    /// `shift_amount_u5` must fit in a u5 (`0..=31`), otherwise this will panic.
    pub fn srai(
        &mut self,
        dest: Specifier,
        src: Specifier,
        shift_amount_u5: u32,
    ) -> ExecutionResult {
        trace!("Executing srai {dest} {src} {shift_amount_u5}");
        self.reg_shamt_op(dest, src, shift_amount_u5, |s, shamt| {
            ((s as i32) >> shamt) as u32
        })
    }

    /// Executes a `lui` instruction.
    ///
    /// > LUI (load upper immediate) is used to build 32-bit constants and uses the U-type format.
    /// > LUI places the U-immediate value in the top 20 bits of the destination register rd,
    /// > filling in the lowest 12 bits with zeros.
    ///
    /// Note that the bottom 12 bits of `immediate` need not be zero, they will always be
    /// discarded.
    pub fn lui(&mut self, dest: Specifier, immediate: i32) -> ExecutionResult {
        trace!("Executing lui {dest} {immediate}");
        let result = immediate as u32 & !0xFFF;
        let registers = self.core.registers_mut();
        registers.set_x(dest, result);
        increment_pc(registers);
        Ok(())
    }

    /// Executes an `auipc` instruction.
    ///
    /// > AUIPC (add upper immediate to pc) is used to build pc-relative addresses and uses the
    /// > U-type format. AUIPC forms a 32-bit offset from the 20-bit U-immediate, filling in the
    /// > lowest 12 bits with zeros, adds this offset to the address of the AUIPC instruction,
    /// > then places the result in register rd.
    pub fn auipc(&mut self, dest: Specifier, immediate: i32) -> ExecutionResult {
        trace!("Executing auipc {dest} {immediate}");
        let registers = self.core.registers_mut();
        let result = registers.pc().wrapping_add_signed(immediate & !0xFFF);
        registers.set_x(dest, result);
        increment_pc(registers);
        Ok(())
    }

    /// Executes an `add` instruction.
    pub fn add(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        trace!("Executing add {dest} {src1} {src2}");
        self.reg_reg_op(dest, src1, src2, |s1, s2| s1.wrapping_add(s2))
    }

    /// Executes a `sub` instruction.
    pub fn sub(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        trace!("Executing sub {dest} {src1} {src2}");
        self.reg_reg_op(dest, src1, src2, |s1, s2| s1.wrapping_sub(s2))
    }

    /// Executes a `slt` instruction.
    ///
    /// > SLT and SLTU perform signed and unsigned compares respectively, writing 1 to rd if
    /// > rs1 < rs2, 0 otherwise.
    pub fn slt(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        trace!("Executing slt {dest} {src1} {src2}");
        self.reg_reg_op(dest, src1, src2, |s1, s2| {
            ((s1 as i32) < (s2 as i32)) as u32
        })
    }

    /// Executes a `sltu` instruction.
    pub fn sltu(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        trace!("Executing sltu {dest} {src1} {src2}");
        self.reg_reg_op(dest, src1, src2, |s1, s2| (s1 < s2) as u32)
    }

    /// Executes an `and` instruction.
    pub fn and(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        trace!("Executing and {dest} {src1} {src2}");
        self.reg_reg_op(dest, src1, src2, |s1, s2| s1 & s2)
    }

    /// Executes an `or` instruction.
    pub fn or(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        trace!("Executing or {dest} {src1} {src2}");
        self.reg_reg_op(dest, src1, src2, |s1, s2| s1 | s2)
    }

    /// Executes a `xor` instruction.
    pub fn xor(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        trace!("Executing xor {dest} {src1} {src2}");
        self.reg_reg_op(dest, src1, src2, |s1, s2| s1 ^ s2)
    }

    /// Executes a `sll` instruction.
    ///
    /// > SLL, SRL, and SRA perform logical left, logical right, and arithmetic right shifts on
    /// > the value in register rs1 by the shift amount held in the lower 5 bits of register rs2.
    pub fn sll(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        trace!("Executing sll {dest} {src1} {src2}");
        self.reg_reg_op(dest, src1, src2, |s1, s2| s1 << (s2 & 0x1F))
    }

    /// Executes a `srl` instruction.
    pub fn srl(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        trace!("Executing srl {dest} {src1} {src2}");
        self.reg_reg_op(dest, src1, src2, |s1, s2| s1 >> (s2 & 0x1F))
    }

    /// Executes a `sra` instruction.
    pub fn sra(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        trace!("Executing sra {dest} {src1} {src2}");
        self.reg_reg_op(dest, src1, src2, |s1, s2| {
            ((s1 as i32) >> (s2 & 0x1F)) as u32
        })
    }

    /// Executes a `mul` instruction.
    ///
    /// > MUL performs an XLEN-bit×XLEN-bit multiplication of rs1 by rs2 and places the lower
    /// > XLEN bits in the destination register.
    pub fn mul(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        trace!("Executing mul {dest} {src1} {src2}");
        self.reg_reg_op(dest, src1, src2, |s1, s2| s1.wrapping_mul(s2))
    }

    /// Executes a `mulh` instruction.
    ///
    /// > MULH, MULHU, and MULHSU perform the same multiplication but return the upper XLEN bits
    /// > of the full 2×XLEN-bit product, for signed×signed, unsigned×unsigned, and signed
    /// > rs1×unsigned rs2 multiplication, respectively.
    pub fn mulh(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        trace!("Executing mulh {dest} {src1} {src2}");
        self.reg_reg_op(dest, src1, src2, |s1, s2| {
            ((s1 as i32 as i64 * s2 as i32 as i64) >> 32) as u32
        })
    }

    /// Executes a `mulhsu` instruction.
    pub fn mulhsu(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        trace!("Executing mulhsu {dest} {src1} {src2}");
        self.reg_reg_op(dest, src1, src2, |s1, s2| {
            ((s1 as i32 as i64 * s2 as i64) >> 32) as u32
        })
    }

    /// Executes a `mulhu` instruction.
    pub fn mulhu(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        trace!("Executing mulhu {dest} {src1} {src2}");
        self.reg_reg_op(dest, src1, src2, |s1, s2| {
            ((s1 as u64 * s2 as u64) >> 32) as u32
        })
    }

    /// Executes a `div` instruction.
    ///
    /// > DIV and DIVU perform an XLEN bits by XLEN bits signed and unsigned integer division of
    /// > rs1 by rs2, rounding towards zero.
    ///
    /// > The quotient of division by zero has all bits set, and the remainder of division by
    /// > zero equals the dividend. Signed division overflow occurs only when the most-negative
    /// > integer is divided by −1. The quotient of a signed division with overflow is equal to
    /// > the dividend, and the remainder is zero.
    pub fn div(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        trace!("Executing div {dest} {src1} {src2}");
        self.reg_reg_op(dest, src1, src2, |s1, s2| match s2 == 0 {
            true => 0xFFFF_FFFF,
            false => (s1 as i32).overflowing_div(s2 as i32).0 as u32,
        })
    }

    /// Executes a `divu` instruction.
    pub fn divu(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        trace!("Executing divu {dest} {src1} {src2}");
        self.reg_reg_op(dest, src1, src2, |s1, s2| {
            s1.checked_div(s2).unwrap_or(0xFFFF_FFFF)
        })
    }

    /// Executes a `rem` instruction.
    ///
    /// > REM and REMU provide the remainder of the corresponding division operation. For REM,
    /// > the sign of the result equals the sign of the dividend.
    pub fn rem(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        trace!("Executing rem {dest} {src1} {src2}");
        self.reg_reg_op(dest, src1, src2, |s1, s2| match s2 == 0 {
            true => s1,
            false => (s1 as i32).overflowing_rem(s2 as i32).0 as u32,
        })
    }

    /// Executes a `remu` instruction.
    pub fn remu(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        trace!("Executing remu {dest} {src1} {src2}");
        self.reg_reg_op(dest, src1, src2, |s1, s2| s1.checked_rem(s2).unwrap_or(s1))
    }

    pub fn jal(&mut self, dest: Specifier, offset: i32) -> ExecutionResult {
        trace!("Executing jal {dest} {offset}");
        self.jump_op(dest, |registers| registers.pc().wrapping_add_signed(offset))
    }

    /// > The JALR instruction [...] sets the least-significant bit of the result to zero.
    pub fn jalr(&mut self, dest: Specifier, base: Specifier, offset: i32) -> ExecutionResult {
        trace!("Executing jalr {dest} {base} {offset}");
        self.jump_op(dest, |registers| {
            registers.x(base).wrapping_add_signed(offset) & !1
        })
    }

    pub fn beq(&mut self, src1: Specifier, src2: Specifier, offset: i32) -> ExecutionResult {
        trace!("Executing beq {src1} {src2} {offset}");
        self.cond_branch(src1, src2, offset, |s1, s2| s1 == s2)
    }

    pub fn bne(&mut self, src1: Specifier, src2: Specifier, offset: i32) -> ExecutionResult {
        trace!("Executing bne {src1} {src2} {offset}");
        self.cond_branch(src1, src2, offset, |s1, s2| s1 != s2)
    }

    pub fn blt(&mut self, src1: Specifier, src2: Specifier, offset: i32) -> ExecutionResult {
        trace!("Executing blt {src1} {src2} {offset}");
        self.cond_branch(src1, src2, offset, |s1, s2| (s1 as i32) < (s2 as i32))
    }

    pub fn bltu(&mut self, src1: Specifier, src2: Specifier, offset: i32) -> ExecutionResult {
        trace!("Executing bltu {src1} {src2} {offset}");
        self.cond_branch(src1, src2, offset, |s1, s2| s1 < s2)
    }

    pub fn bge(&mut self, src1: Specifier, src2: Specifier, offset: i32) -> ExecutionResult {
        trace!("Executing bge {src1} {src2} {offset}");
        self.cond_branch(src1, src2, offset, |s1, s2| (s1 as i32) >= (s2 as i32))
    }

    pub fn bgeu(&mut self, src1: Specifier, src2: Specifier, offset: i32) -> ExecutionResult {
        trace!("Executing bgeu {src1} {src2} {offset}");
        self.cond_branch(src1, src2, offset, |s1, s2| s1 >= s2)
    }

    /// Executes a `lb` instruction, sign-extending the loaded byte.
    pub fn lb(&mut self, dest: Specifier, base: Specifier, offset: i32) -> ExecutionResult {
        trace!("Executing lb {dest} {offset}({base})");
        self.load_op(dest, base, offset, |core, address| {
            core.read_byte(address).map(|value| value as i8 as u32)
        })
    }

    /// Executes a `lbu` instruction, zero-extending the loaded byte.
    pub fn lbu(&mut self, dest: Specifier, base: Specifier, offset: i32) -> ExecutionResult {
        trace!("Executing lbu {dest} {offset}({base})");
        self.load_op(dest, base, offset, |core, address| {
            core.read_byte(address).map(|value| value as u32)
        })
    }

    /// Executes a `lh` instruction, sign-extending the loaded halfword.
    pub fn lh(&mut self, dest: Specifier, base: Specifier, offset: i32) -> ExecutionResult {
        trace!("Executing lh {dest} {offset}({base})");
        self.load_op(dest, base, offset, |core, address| {
            core.read_halfword(address).map(|value| value as i16 as u32)
        })
    }

    /// Executes a `lhu` instruction, zero-extending the loaded halfword.
    pub fn lhu(&mut self, dest: Specifier, base: Specifier, offset: i32) -> ExecutionResult {
        trace!("Executing lhu {dest} {offset}({base})");
        self.load_op(dest, base, offset, |core, address| {
            core.read_halfword(address).map(|value| value as u32)
        })
    }

    pub fn lw(&mut self, dest: Specifier, base: Specifier, offset: i32) -> ExecutionResult {
        trace!("Executing lw {dest} {offset}({base})");
        self.load_op(dest, base, offset, |core, address| core.read_word(address))
    }

    pub fn sb(&mut self, src: Specifier, base: Specifier, offset: i32) -> ExecutionResult {
        trace!("Executing sb {src} {offset}({base})");
        self.store_op(src, base, offset, |core, address, value| {
            core.write_byte(address, value as u8)
        })
    }

    pub fn sh(&mut self, src: Specifier, base: Specifier, offset: i32) -> ExecutionResult {
        trace!("Executing sh {src} {offset}({base})");
        self.store_op(src, base, offset, |core, address, value| {
            core.write_halfword(address, value as u16)
        })
    }

    pub fn sw(&mut self, src: Specifier, base: Specifier, offset: i32) -> ExecutionResult {
        trace!("Executing sw {src} {offset}({base})");
        self.store_op(src, base, offset, |core, address, value| {
            core.write_word(address, value)
        })
    }

    /// Executes a `lr.w` instruction.
    ///
    /// Loads the word at the address in `addr` and takes out the hart's reservation. The address
    /// must be word-aligned.
    pub fn lr(&mut self, dest: Specifier, _src: Specifier, addr: Specifier) -> ExecutionResult {
        trace!("Executing lr.w {dest}, ({addr})");
        let address = self.core.registers().x(addr);
        if !Alignment::WORD.is_aligned(address) {
            return Err(Exception::InstructionAddressMisaligned(address).into());
        }
        let value = match self.core.read_word(address) {
            Ok(value) => value,
            Err(err) => return Err(self.load_error(err, address)),
        };
        self.core.reservation = true;
        let registers = self.core.registers_mut();
        registers.set_x(dest, value);
        increment_pc(registers);
        Ok(())
    }

    /// Executes a `sc.w` instruction.
    ///
    /// If the reservation is held, the word in `src` is stored and `dest` receives 0; otherwise
    /// nothing is stored and `dest` receives 1. A successful store consumes the reservation.
    /// Either way the instruction completes and pc advances.
    pub fn sc(&mut self, dest: Specifier, src: Specifier, addr: Specifier) -> ExecutionResult {
        trace!("Executing sc.w {dest}, {src}, ({addr})");
        let registers = self.core.registers();
        let address = registers.x(addr);
        let value = registers.x(src);
        if !Alignment::WORD.is_aligned(address) {
            return Err(Exception::InstructionAddressMisaligned(address).into());
        }
        if self.core.reservation {
            if let Err(err) = self.core.write_word(address, value) {
                return Err(self.store_error(err, address));
            }
            self.core.reservation = false;
            self.core.registers_mut().set_x(dest, 0);
        } else {
            self.core.registers_mut().set_x(dest, 1);
        }
        increment_pc(self.core.registers_mut());
        Ok(())
    }

    pub fn amoswap(&mut self, dest: Specifier, src: Specifier, addr: Specifier) -> ExecutionResult {
        trace!("Executing amoswap.w {dest}, {src}, ({addr})");
        self.amo_op(dest, src, addr, |_, reg| reg)
    }

    pub fn amoadd(&mut self, dest: Specifier, src: Specifier, addr: Specifier) -> ExecutionResult {
        trace!("Executing amoadd.w {dest}, {src}, ({addr})");
        self.amo_op(dest, src, addr, |mem, reg| mem.wrapping_add(reg))
    }

    pub fn amoand(&mut self, dest: Specifier, src: Specifier, addr: Specifier) -> ExecutionResult {
        trace!("Executing amoand.w {dest}, {src}, ({addr})");
        self.amo_op(dest, src, addr, |mem, reg| mem & reg)
    }

    pub fn amoor(&mut self, dest: Specifier, src: Specifier, addr: Specifier) -> ExecutionResult {
        trace!("Executing amoor.w {dest}, {src}, ({addr})");
        self.amo_op(dest, src, addr, |mem, reg| mem | reg)
    }

    pub fn amoxor(&mut self, dest: Specifier, src: Specifier, addr: Specifier) -> ExecutionResult {
        trace!("Executing amoxor.w {dest}, {src}, ({addr})");
        self.amo_op(dest, src, addr, |mem, reg| mem ^ reg)
    }

    pub fn amomax(&mut self, dest: Specifier, src: Specifier, addr: Specifier) -> ExecutionResult {
        trace!("Executing amomax.w {dest}, {src}, ({addr})");
        self.amo_op(dest, src, addr, |mem, reg| {
            (mem as i32).max(reg as i32) as u32
        })
    }

    pub fn amomin(&mut self, dest: Specifier, src: Specifier, addr: Specifier) -> ExecutionResult {
        trace!("Executing amomin.w {dest}, {src}, ({addr})");
        self.amo_op(dest, src, addr, |mem, reg| {
            (mem as i32).min(reg as i32) as u32
        })
    }

    pub fn amomaxu(&mut self, dest: Specifier, src: Specifier, addr: Specifier) -> ExecutionResult {
        trace!("Executing amomaxu.w {dest}, {src}, ({addr})");
        self.amo_op(dest, src, addr, |mem, reg| mem.max(reg))
    }

    pub fn amominu(&mut self, dest: Specifier, src: Specifier, addr: Specifier) -> ExecutionResult {
        trace!("Executing amominu.w {dest}, {src}, ({addr})");
        self.amo_op(dest, src, addr, |mem, reg| mem.min(reg))
    }

    /// Executes a `fence` instruction. Memory operations are strictly program-ordered on this
    /// single in-order hart, so this is a nop.
    pub fn fence(&mut self) -> ExecutionResult {
        trace!("Executing fence");
        increment_pc(self.core.registers_mut());
        Ok(())
    }

    /// Executes a `fence.i` instruction. Instruction fetches always observe the latest stores
    /// here, so this is a nop.
    pub fn fence_i(&mut self) -> ExecutionResult {
        trace!("Executing fence.i");
        increment_pc(self.core.registers_mut());
        Ok(())
    }

    pub fn ecall(&mut self) -> ExecutionResult {
        trace!("Executing ecall");
        // The hart only ever runs in M-mode.
        Err(Exception::EnvironmentCallFromMMode.into())
    }

    pub fn ebreak(&mut self) -> ExecutionResult {
        trace!("Executing ebreak");
        Err(Exception::Breakpoint.into())
    }

    pub fn mret(&mut self) -> ExecutionResult {
        trace!("Executing mret");
        if self.core.privilege_mode < PrivilegeLevel::Machine {
            return Err(FatalError::InsufficientPrivilege {
                pc: self.core.registers().pc(),
                actual_level: self.core.privilege_mode,
            }
            .into());
        }
        // MPP is pinned to M-mode, so the privilege mode cannot drop on a trap return.
        self.core.privilege_mode = PrivilegeLevel::Machine;
        self.core.status.return_from_machine_trap();
        *self.core.registers_mut().pc_mut() = self.core.trap.read_mepc();
        Ok(())
    }

    pub fn wfi(&mut self) -> ExecutionResult {
        trace!("Executing wfi");
        // Implemented as a nop, which is allowed.
        increment_pc(self.core.registers_mut());
        Ok(())
    }

    /// Executes a `csrrw` instruction.
    ///
    /// > The CSRRW (Atomic Read/Write CSR) instruction atomically swaps values in the CSRs and
    /// > integer registers. CSRRW reads the old value of the CSR, zero-extends the value to XLEN
    /// > bits, then writes it to integer register rd. The initial value in rs1 is written to the
    /// > CSR.
    pub fn csrrw(&mut self, dest: Specifier, csr: CsrSpecifier, src: Specifier) -> ExecutionResult {
        trace!("Executing csrrw {dest} {csr:#05x} {src}");
        self.csr_reg_op(CsrOp::ReadWrite, dest, csr, src)
    }

    /// Executes a `csrrs` instruction.
    ///
    /// > The CSRRS (Atomic Read and Set Bits in CSR) instruction reads the value of the CSR,
    /// > zero-extends the value to XLEN bits, and writes it to integer register rd. The initial
    /// > value in integer register rs1 is treated as a bit mask that specifies bit positions to
    /// > be set in the CSR.
    ///
    /// > For both CSRRS and CSRRC, if rs1=x0, then the instruction will not write to the CSR at
    /// > all, and so shall not cause any of the side effects that might otherwise occur on a CSR
    /// > write.
    pub fn csrrs(&mut self, dest: Specifier, csr: CsrSpecifier, src: Specifier) -> ExecutionResult {
        trace!("Executing csrrs {dest} {csr:#05x} {src}");
        self.csr_reg_op(CsrOp::ReadSet, dest, csr, src)
    }

    /// Executes a `csrrc` instruction.
    ///
    /// > The CSRRC (Atomic Read and Clear Bits in CSR) instruction reads the value of the CSR,
    /// > zero-extends the value to XLEN bits, and writes it to integer register rd. The initial
    /// > value in integer register rs1 is treated as a bit mask that specifies bit positions to
    /// > be cleared in the CSR.
    pub fn csrrc(&mut self, dest: Specifier, csr: CsrSpecifier, src: Specifier) -> ExecutionResult {
        trace!("Executing csrrc {dest} {csr:#05x} {src}");
        self.csr_reg_op(CsrOp::ReadClear, dest, csr, src)
    }

    /// Executes a `csrrwi` instruction.
    ///
    /// > The CSRRWI, CSRRSI, and CSRRCI variants are similar to CSRRW, CSRRS, and CSRRC
    /// > respectively, except they update the CSR using an XLEN-bit value obtained by
    /// > zero-extending a 5-bit unsigned immediate (uimm[4:0]) field encoded in the rs1 field
    /// > instead of a value from an integer register.
    pub fn csrrwi(
        &mut self,
        dest: Specifier,
        csr: CsrSpecifier,
        immediate: u32,
    ) -> ExecutionResult {
        trace!("Executing csrrwi {dest} {csr:#05x} {immediate}");
        self.csr_imm_op(CsrOp::ReadWrite, dest, csr, immediate)
    }

    /// Executes a `csrrsi` instruction.
    ///
    /// > For CSRRSI and CSRRCI, if the uimm[4:0] field is zero, then these instructions will not
    /// > write to the CSR, and shall not cause any of the side effects that might otherwise
    /// > occur on a CSR write.
    pub fn csrrsi(
        &mut self,
        dest: Specifier,
        csr: CsrSpecifier,
        immediate: u32,
    ) -> ExecutionResult {
        trace!("Executing csrrsi {dest} {csr:#05x} {immediate}");
        self.csr_imm_op(CsrOp::ReadSet, dest, csr, immediate)
    }

    /// Executes a `csrrci` instruction.
    pub fn csrrci(
        &mut self,
        dest: Specifier,
        csr: CsrSpecifier,
        immediate: u32,
    ) -> ExecutionResult {
        trace!("Executing csrrci {dest} {csr:#05x} {immediate}");
        self.csr_imm_op(CsrOp::ReadClear, dest, csr, immediate)
    }

    // Private generic implementations

    fn reg_imm_op<F>(
        &mut self,
        dest: Specifier,
        src: Specifier,
        immediate: i32,
        op: F,
    ) -> ExecutionResult
    where
        F: FnOnce(u32, i32) -> u32,
    {
        let registers = self.core.registers_mut();
        registers.set_x(dest, op(registers.x(src), immediate));
        increment_pc(registers);
        Ok(())
    }

    fn reg_shamt_op<F>(
        &mut self,
        dest: Specifier,
        src: Specifier,
        shift_amount_u5: u32,
        op: F,
    ) -> ExecutionResult
    where
        F: FnOnce(u32, u32) -> u32,
    {
        if shift_amount_u5 > 31 {
            panic!("out of range u5 used");
        }
        let registers = self.core.registers_mut();
        registers.set_x(dest, op(registers.x(src), shift_amount_u5));
        increment_pc(registers);
        Ok(())
    }

    fn reg_reg_op<F>(
        &mut self,
        dest: Specifier,
        src1: Specifier,
        src2: Specifier,
        op: F,
    ) -> ExecutionResult
    where
        F: FnOnce(u32, u32) -> u32,
    {
        let registers = self.core.registers_mut();
        registers.set_x(dest, op(registers.x(src1), registers.x(src2)));
        increment_pc(registers);
        Ok(())
    }

    /// First argument of `op` is the value from memory, the second the value from `src`.
    fn amo_op<F>(
        &mut self,
        dest: Specifier,
        src: Specifier,
        addr: Specifier,
        op: F,
    ) -> ExecutionResult
    where
        F: FnOnce(u32, u32) -> u32,
    {
        let registers = self.core.registers();
        let address = registers.x(addr);
        let src_value = registers.x(src);

        if !Alignment::WORD.is_aligned(address) {
            return Err(Exception::InstructionAddressMisaligned(address).into());
        }

        let mem_value = match self.core.read_word(address) {
            Ok(value) => value,
            Err(err) => return Err(self.load_error(err, address)),
        };

        let new_value = op(mem_value, src_value);

        if let Err(err) = self.core.write_word(address, new_value) {
            return Err(self.store_error(err, address));
        }

        let registers = self.core.registers_mut();
        registers.set_x(dest, mem_value);
        increment_pc(registers);
        Ok(())
    }

    fn jump_op<F>(&mut self, dest: Specifier, compute_target: F) -> ExecutionResult
    where
        F: FnOnce(&Registers) -> u32,
    {
        let registers = self.core.registers_mut();
        // Compute target pc
        let new_pc = compute_target(registers);
        // Check target pc is word-aligned
        if !Alignment::WORD.is_aligned(new_pc) {
            return Err(Exception::InstructionAddressMisaligned(new_pc).into());
        }
        // Update pc to target
        let old_pc = std::mem::replace(registers.pc_mut(), new_pc);
        // Write incremented old pc to `dest` register
        registers.set_x(dest, old_pc.wrapping_add(4));
        Ok(())
    }

    // Takes the branch if `predicate` returns `true`.
    fn cond_branch<P>(
        &mut self,
        src1: Specifier,
        src2: Specifier,
        offset: i32,
        predicate: P,
    ) -> ExecutionResult
    where
        P: FnOnce(u32, u32) -> bool,
    {
        let registers = self.core.registers_mut();
        if predicate(registers.x(src1), registers.x(src2)) {
            let new_pc = registers.pc().wrapping_add_signed(offset);
            // Check target pc is word-aligned
            if !Alignment::WORD.is_aligned(new_pc) {
                return Err(Exception::InstructionAddressMisaligned(new_pc).into());
            }
            *registers.pc_mut() = new_pc;
        } else {
            increment_pc(registers);
        }
        Ok(())
    }

    fn load_op<F>(
        &mut self,
        dest: Specifier,
        base: Specifier,
        offset: i32,
        read: F,
    ) -> ExecutionResult
    where
        F: FnOnce(&mut Core<B>, u32) -> Result<u32, MemoryError>,
    {
        let address = self.core.registers().x(base).wrapping_add_signed(offset);
        let value = match read(self.core, address) {
            Ok(value) => value,
            Err(err) => return Err(self.load_error(err, address)),
        };
        let registers = self.core.registers_mut();
        registers.set_x(dest, value);
        increment_pc(registers);
        Ok(())
    }

    fn store_op<F>(
        &mut self,
        src: Specifier,
        base: Specifier,
        offset: i32,
        write: F,
    ) -> ExecutionResult
    where
        F: FnOnce(&mut Core<B>, u32, u32) -> Result<(), MemoryError>,
    {
        let registers = self.core.registers();
        let value = registers.x(src);
        let address = registers.x(base).wrapping_add_signed(offset);
        if let Err(err) = write(self.core, address, value) {
            return Err(self.store_error(err, address));
        }
        increment_pc(self.core.registers_mut());
        Ok(())
    }

    fn csr_reg_op(
        &mut self,
        op: CsrOp,
        dest: Specifier,
        csr: CsrSpecifier,
        src: Specifier,
    ) -> ExecutionResult {
        self.csr_op(
            op,
            dest,
            csr,
            (op == CsrOp::ReadWrite || src != Specifier::X0)
                .then(|| self.core.registers().x(src)),
        )
    }

    fn csr_imm_op(
        &mut self,
        op: CsrOp,
        dest: Specifier,
        csr: CsrSpecifier,
        immediate: u32,
    ) -> ExecutionResult {
        self.csr_op(
            op,
            dest,
            csr,
            (op == CsrOp::ReadWrite || immediate != 0).then_some(immediate),
        )
    }

    /// Common path of the six CSR instruction forms.
    ///
    /// The old value is always read first and is what lands in `dest`. pc is advanced before the
    /// write is performed, so anything the write side effects do to the control flow (taking a
    /// newly unmasked interrupt, most notably) sees the state as of the *next* instruction.
    /// `src_value` is `None` for the forms that must not perform a write at all.
    fn csr_op(
        &mut self,
        op: CsrOp,
        dest: Specifier,
        csr: CsrSpecifier,
        src_value: Option<u32>,
    ) -> ExecutionResult {
        let privilege_level = self.core.privilege_mode;
        let old_value = self
            .core
            .read_csr(csr, privilege_level)
            .map_err(|_| Exception::IllegalInstruction(None))?;
        increment_pc(self.core.registers_mut());
        if let Some(src_value) = src_value {
            let new_value = match op {
                CsrOp::ReadWrite => src_value,
                CsrOp::ReadSet => old_value | src_value,
                CsrOp::ReadClear => old_value & !src_value,
            };
            self.core
                .write_csr(csr, privilege_level, new_value)
                .map_err(|err| match err {
                    CsrWriteError::Access(_) => {
                        ExecutionError::Trap(Exception::IllegalInstruction(None))
                    }
                    CsrWriteError::Fatal(fatal) => ExecutionError::Fatal(fatal),
                })?;
        }
        self.core.registers_mut().set_x(dest, old_value);
        Ok(())
    }

    fn load_error(&self, err: MemoryError, address: u32) -> ExecutionError {
        match err {
            MemoryError::AccessFault => Exception::LoadAccessFault(address).into(),
            MemoryError::NullPointerRead => FatalError::NullPointerRead {
                pc: self.core.registers().pc(),
            }
            .into(),
        }
    }

    fn store_error(&self, err: MemoryError, address: u32) -> ExecutionError {
        match err {
            MemoryError::AccessFault => Exception::StoreAccessFault(address).into(),
            // Writes to address zero surface as plain access faults; only reads trip the
            // null-pointer diagnostic.
            MemoryError::NullPointerRead => Exception::StoreAccessFault(address).into(),
        }
    }
}

fn increment_pc(registers: &mut Registers) {
    let pc = registers.pc_mut();
    *pc = pc.wrapping_add(4);
}

#[cfg(test)]
mod tests {
    use crate::board::{Board, Config};
    use crate::core::{csr, Exception, ExecutionError};
    use crate::registers::Specifier;
    use crate::PrivilegeLevel;

    const RAM_BASE: u32 = 0x8000_0000;

    fn board() -> Board {
        Board::new(Config {
            mem_size: 4 * 1024 * 1024,
            page_offset: RAM_BASE,
        })
        .unwrap()
    }

    /// Writes `instructions` to RAM starting at the reset vector and runs them one per step.
    fn run(board: &mut Board, instructions: &[u32]) {
        for (i, raw) in instructions.iter().enumerate() {
            board.load_physical(RAM_BASE + 4 * i as u32, &raw.to_le_bytes());
        }
        for _ in instructions {
            board.step().unwrap();
        }
    }

    fn x(board: &Board, index: u8) -> u32 {
        board.core().registers().x(Specifier::from_u5(index))
    }

    #[test]
    fn test_addi_wraps() {
        let mut board = board();
        // addi x1, x0, 1 ; addi x1, x1, -1
        run(&mut board, &[0x0010_0093, 0xFFF0_8093]);
        assert_eq!(0, x(&board, 1));
    }

    #[test]
    fn test_sub_wraps() {
        let mut board = board();
        // addi x1, x0, -2 ; addi x2, x0, 3 ; mul-free wrap check via sub: x3 = x1 - x2
        run(&mut board, &[0xFFE0_0093, 0x0030_0113, 0x4020_81B3]);
        assert_eq!((-5_i32) as u32, x(&board, 3));
    }

    #[test]
    fn test_shift_semantics() {
        let mut board = board();
        // addi x1, x0, -16 ; srai x2, x1, 2 ; srli x3, x1, 2 ; slli x4, x1, 1
        run(
            &mut board,
            &[0xFF00_0093, 0x4020_D113, 0x0020_D193, 0x0010_9213],
        );
        assert_eq!((-4_i32) as u32, x(&board, 2));
        assert_eq!(0xFFFF_FFF0 >> 2, x(&board, 3));
        assert_eq!(0xFFFF_FFE0, x(&board, 4));
    }

    #[test]
    fn test_div_by_zero() {
        let mut board = board();
        // addi x1, x0, 42 ; div x3, x1, x0 ; rem x4, x1, x0 ; divu x5, x1, x0 ; remu x6, x1, x0
        run(
            &mut board,
            &[
                0x02A0_0093,
                0x0200_C1B3,
                0x0200_E233,
                0x0200_D2B3,
                0x0200_F333,
            ],
        );
        assert_eq!(0xFFFF_FFFF, x(&board, 3));
        assert_eq!(42, x(&board, 4));
        assert_eq!(0xFFFF_FFFF, x(&board, 5));
        assert_eq!(42, x(&board, 6));
    }

    #[test]
    fn test_div_overflow() {
        let mut board = board();
        // lui x1, 0x80000 (INT_MIN) ; addi x2, x0, -1 ; div x3, x1, x2 ; rem x4, x1, x2
        run(
            &mut board,
            &[0x8000_00B7, 0xFFF0_0113, 0x0220_C1B3, 0x0220_E233],
        );
        assert_eq!(0x8000_0000, x(&board, 3));
        assert_eq!(0, x(&board, 4));
    }

    #[test]
    fn test_mulh_variants() {
        let mut board = board();
        // addi x1, x0, -1 ; addi x2, x0, 2
        // mulh x3, x1, x2 ; mulhu x4, x1, x2 ; mulhsu x5, x1, x2 ; mul x6, x1, x2
        run(
            &mut board,
            &[
                0xFFF0_0093,
                0x0020_0113,
                0x0220_91B3,
                0x0220_B233,
                0x0220_A2B3,
                0x0220_8333,
            ],
        );
        // -1 * 2 = -2: high word is all ones.
        assert_eq!(0xFFFF_FFFF, x(&board, 3));
        // 0xFFFFFFFF * 2 = 0x1_FFFF_FFFE: high word is 1.
        assert_eq!(1, x(&board, 4));
        // signed -1 * unsigned 2 = -2.
        assert_eq!(0xFFFF_FFFF, x(&board, 5));
        assert_eq!(0xFFFF_FFFE, x(&board, 6));
    }

    #[test]
    fn test_load_store_widths() {
        let mut board = board();
        let base = RAM_BASE + 0x1000;
        board.load_physical(base, &0x80FF_7F01_u32.to_le_bytes());
        let core = board.core_mut();
        core.registers_mut().set_x(Specifier::from_u5(6), base);
        // lb x1, 3(x6) -> sign-extended 0x80
        core.execute_instruction(crate::instruction::Instruction::decode(0x0033_0083).unwrap())
            .unwrap();
        // lbu x2, 3(x6)
        core.execute_instruction(crate::instruction::Instruction::decode(0x0033_4103).unwrap())
            .unwrap();
        // lh x3, 2(x6) -> sign-extended 0x80FF
        core.execute_instruction(crate::instruction::Instruction::decode(0x0023_1183).unwrap())
            .unwrap();
        // lhu x4, 0(x6)
        core.execute_instruction(crate::instruction::Instruction::decode(0x0003_5203).unwrap())
            .unwrap();
        let registers = core.registers();
        assert_eq!(0xFFFF_FF80, registers.x(Specifier::from_u5(1)));
        assert_eq!(0x0000_0080, registers.x(Specifier::from_u5(2)));
        assert_eq!(0xFFFF_80FF, registers.x(Specifier::from_u5(3)));
        assert_eq!(0x0000_7F01, registers.x(Specifier::from_u5(4)));
    }

    #[test]
    fn test_jalr_clears_low_bit() {
        let mut board = board();
        let core = board.core_mut();
        core.registers_mut().set_x(Specifier::from_u5(6), RAM_BASE + 0x103);
        // jalr x1, 0(x6): the low bit of the computed target is cleared first, leaving an
        // address that is still misaligned, so this raises with the cleared target as payload.
        let result =
            core.execute_instruction(crate::instruction::Instruction::decode(0x0003_00E7).unwrap());
        assert_eq!(
            Err(ExecutionError::Trap(Exception::InstructionAddressMisaligned(
                RAM_BASE + 0x102
            ))),
            result
        );
        // With an aligned base the jump goes through.
        core.registers_mut().set_x(Specifier::from_u5(6), RAM_BASE + 0x101);
        core.execute_instruction(crate::instruction::Instruction::decode(0x0033_00E7).unwrap())
            .unwrap();
        assert_eq!(RAM_BASE + 0x104, core.registers().pc());
    }

    #[test]
    fn test_amo_sequence() {
        let mut board = board();
        let address = RAM_BASE + 0x2000;
        board.load_physical(address, &10_u32.to_le_bytes());
        let core = board.core_mut();
        core.registers_mut().set_x(Specifier::from_u5(6), address);
        core.registers_mut().set_x(Specifier::from_u5(8), 5);
        // amoadd.w x5, x8, (x6)
        core.execute_instruction(crate::instruction::Instruction::decode(0x0083_22AF).unwrap())
            .unwrap();
        assert_eq!(10, x(&board, 5));
        assert_eq!(15, board.core_mut().read_word(address).unwrap());
        // amomin.w x5, x9, (x6) with x9 = -3: signed min wins.
        let core = board.core_mut();
        core.registers_mut().set_x(Specifier::from_u5(9), (-3_i32) as u32);
        core.execute_instruction(crate::instruction::Instruction::decode(0x8093_22AF).unwrap())
            .unwrap();
        assert_eq!(15, x(&board, 5));
        assert_eq!((-3_i32) as u32, board.core_mut().read_word(address).unwrap());
        // amomaxu.w x5, x8, (x6): unsigned max sees 0xFFFF_FFFD.
        let core = board.core_mut();
        core.execute_instruction(crate::instruction::Instruction::decode(0xE083_22AF).unwrap())
            .unwrap();
        assert_eq!((-3_i32) as u32, x(&board, 5));
        assert_eq!((-3_i32) as u32, board.core_mut().read_word(address).unwrap());
    }

    #[test]
    fn test_amo_misaligned() {
        let mut board = board();
        let core = board.core_mut();
        core.registers_mut()
            .set_x(Specifier::from_u5(6), RAM_BASE + 0x2002);
        let result =
            core.execute_instruction(crate::instruction::Instruction::decode(0x0083_22AF).unwrap());
        assert_eq!(
            Err(ExecutionError::Trap(Exception::InstructionAddressMisaligned(
                RAM_BASE + 0x2002
            ))),
            result
        );
    }

    #[test]
    fn test_lr_sc_reservation() {
        let mut board = board();
        let address = RAM_BASE + 0x1000;
        let core = board.core_mut();
        core.registers_mut().set_x(Specifier::from_u5(6), address);
        core.registers_mut()
            .set_x(Specifier::from_u5(8), 0xDEAD_BEEF);
        // lr.w x5, (x6)
        core.execute_instruction(crate::instruction::Instruction::decode(0x1003_22AF).unwrap())
            .unwrap();
        assert_eq!(0, x(&board, 5));
        // sc.w x7, x8, (x6) succeeds and consumes the reservation.
        board
            .core_mut()
            .execute_instruction(crate::instruction::Instruction::decode(0x1883_23AF).unwrap())
            .unwrap();
        assert_eq!(0, x(&board, 7));
        assert_eq!(0xDEAD_BEEF, board.core_mut().read_word(address).unwrap());
        // A second sc.w fails without storing.
        let core = board.core_mut();
        core.registers_mut().set_x(Specifier::from_u5(8), 0x1111_1111);
        core.execute_instruction(crate::instruction::Instruction::decode(0x1883_23AF).unwrap())
            .unwrap();
        assert_eq!(1, x(&board, 7));
        assert_eq!(0xDEAD_BEEF, board.core_mut().read_word(address).unwrap());
    }

    #[test]
    fn test_store_does_not_invalidate_reservation() {
        // The rwsem fast path interleaves plain stores between lr and sc; the reservation must
        // survive them.
        let mut board = board();
        let address = RAM_BASE + 0x1000;
        let scratch = RAM_BASE + 0x1100;
        let core = board.core_mut();
        core.registers_mut().set_x(Specifier::from_u5(6), address);
        core.registers_mut().set_x(Specifier::from_u5(7), scratch);
        core.registers_mut().set_x(Specifier::from_u5(8), 7);
        // lr.w x5, (x6)
        core.execute_instruction(crate::instruction::Instruction::decode(0x1003_22AF).unwrap())
            .unwrap();
        // sw x8, 0(x7)
        core.execute_instruction(crate::instruction::Instruction::decode(0x0083_A023).unwrap())
            .unwrap();
        // sc.w x7, x8, (x6) still succeeds.
        core.execute_instruction(crate::instruction::Instruction::decode(0x1883_23AF).unwrap())
            .unwrap();
        assert_eq!(0, x(&board, 7));
    }

    #[test]
    fn test_csr_read_before_write() {
        let mut board = board();
        let core = board.core_mut();
        core.write_csr(csr::MSCRATCH, PrivilegeLevel::Machine, 0xAAAA_AAAA)
            .unwrap();
        core.registers_mut()
            .set_x(Specifier::from_u5(6), 0xBBBB_BBBB);
        // csrrw x5, mscratch, x6
        core.execute_instruction(crate::instruction::Instruction::decode(0x3403_12F3).unwrap())
            .unwrap();
        assert_eq!(0xAAAA_AAAA, x(&board, 5));
        assert_eq!(
            0xBBBB_BBBB,
            board
                .core_mut()
                .read_csr(csr::MSCRATCH, PrivilegeLevel::Machine)
                .unwrap()
        );
    }

    #[test]
    fn test_csrrs_x0_skips_write() {
        let mut board = board();
        let core = board.core_mut();
        // csrrs x5, mvendorid, x0 reads a read-only CSR without attempting a write.
        core.execute_instruction(crate::instruction::Instruction::decode(0xF110_22F3).unwrap())
            .unwrap();
        assert_eq!(0, x(&board, 5));
    }

    #[test]
    fn test_csrrw_to_read_only_is_silent() {
        let mut board = board();
        let core = board.core_mut();
        core.registers_mut().set_x(Specifier::from_u5(6), 123);
        // csrrw x5, mhartid, x6: write dropped, no fault, storage unchanged.
        core.execute_instruction(crate::instruction::Instruction::decode(0xF143_12F3).unwrap())
            .unwrap();
        assert_eq!(0, x(&board, 5));
        assert_eq!(
            0,
            board
                .core_mut()
                .read_csr(csr::MHARTID, PrivilegeLevel::Machine)
                .unwrap()
        );
    }

    #[test]
    fn test_unknown_csr_is_illegal() {
        let mut board = board();
        let core = board.core_mut();
        // csrrw x5, 0x123, x6: unimplemented CSR.
        let result =
            core.execute_instruction(crate::instruction::Instruction::decode(0x1233_12F3).unwrap());
        assert_eq!(
            Err(ExecutionError::Trap(Exception::IllegalInstruction(None))),
            result
        );
    }
}
