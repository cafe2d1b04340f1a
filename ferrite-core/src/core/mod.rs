//! Provides the RV32IMA_Zicsr_Zifencei machine-mode execution core.

mod counters;
pub mod csr;
mod execute;
mod interrupts;
mod memory;
mod status;
mod trap;

use crate::instruction::{
    AmoOp, BranchCondition, CsrOp, Instruction, LoadWidth, RegImmOp, RegRegOp, RegShiftImmOp,
    StoreWidth,
};
use crate::registers::Registers;
use crate::system_bus::SystemBus;
use crate::{Alignment, PrivilegeLevel, RawPrivilegeLevel};
use counters::Counters;
use execute::Executor;
use interrupts::Interrupts;
use log::{debug, trace};
use status::Status;
use thiserror::Error;
use trap::{Trap, TrapCause, VectorMode};

pub use csr::CsrSpecifier;
pub use memory::MemoryError;

#[derive(Debug, Clone)]
pub struct Config {
    /// > The mhartid CSR is an MXLEN-bit read-only register containing the integer ID of the
    /// > hardware thread running the code. This register must be readable in any implementation.
    /// > Hart IDs might not necessarily be numbered contiguously in a multiprocessor system, but
    /// > at least one hart must have a hart ID of zero.
    pub hart_id: u32,
    /// Physical memory address of the memory-mapped mtime control register.
    /// The register is 64 bits wide, and the address must support reads of 8 bytes.
    ///
    /// Note that this address is accessed directly on the system bus, without the fault checks
    /// guest accesses go through.
    pub mtime_address: u32,
    /// Physical memory address of the memory-mapped mtimecmp control register.
    /// The register is 64 bits wide, and the address must support reads of 8 bytes.
    ///
    /// Note that this address is accessed directly on the system bus, without the fault checks
    /// guest accesses go through.
    pub mtimecmp_address: u32,
    /// Address to which the core's pc register is reset.
    pub reset_vector: u32,
}

/// Single-hart RISC-V core implementing the RV32IMA_Zicsr_Zifencei ISA at Machine level only.
///
/// > From the perspective of software running in a given execution environment, a hart is a
/// > resource that autonomously fetches and executes RISC-V instructions within that execution
/// > environment.
///
/// As hardware multithreading is not supported, core and hart are the same thing here, and the
/// hart's architectural state (registers, CSRs, the LR/SC reservation) lives directly on this
/// struct. The core owns the system bus it fetches and loads/stores through.
#[derive(Debug)]
pub struct Core<B: SystemBus> {
    /// Configuration options for this core. See [`Config`].
    config: Config,
    /// The system bus via which physical memory is accessed by this core.
    system_bus: B,
    /// General purpose registers: x and pc registers.
    registers: Registers,
    /// The core's current privilege mode. Always Machine on this platform, but kept as real state
    /// so the CSR privilege checks read naturally.
    privilege_mode: PrivilegeLevel,
    /// The mstatus register.
    status: Status,
    /// The mie and mip registers.
    interrupts: Interrupts,
    /// The machine trap-handling registers (mscratch, mepc, mcause, mtval, mtvec, medeleg).
    trap: Trap,
    /// The mcycle/minstret counters and mcounteren.
    counters: Counters,
    /// The LR/SC reservation. One flag for the whole hart: LR.W sets it, a successful SC.W
    /// clears it, and nothing else touches it. In particular, ordinary stores do not invalidate
    /// an existing reservation, which is sound on a single in-order hart.
    reservation: bool,
}

impl<B: SystemBus> Core<B> {
    /// The misa CSR value: MXL=32, extensions I, M, and A.
    ///
    /// > The misa CSR is a WARL read-write register reporting the ISA supported by the hart.
    ///
    /// Writes to it are dropped, which the privileged spec permits for harts that cannot vary
    /// their ISA.
    pub const MISA: u32 = 0x4040_1101;
    /// The mvendorid CSR is set to 0 to indicate this is a non-commercial implementation.
    pub const MVENDORID: u32 = 0;
    /// The marchid CSR is set to 0 to indicate it is not implemented.
    pub const MARCHID: u32 = 0;
    /// The mimpid CSR is set to 0 to indicate it is not implemented.
    pub const MIMPID: u32 = 0;
    /// The mconfigptr CSR is set to 0 to indicate no configuration structure exists.
    pub const MCONFIGPTR: u32 = 0;

    pub fn new(system_bus: B, config: Config) -> Self {
        let registers = Registers::new(config.reset_vector);
        Self {
            config,
            system_bus,
            registers,
            privilege_mode: PrivilegeLevel::Machine,
            status: Status::new(),
            interrupts: Interrupts::new(),
            trap: Trap::new(),
            counters: Counters::new(),
            reservation: false,
        }
    }

    /// Provide a read-only view of this core's configuration.
    ///
    /// It is not possible to modify the configuration after creation.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the Hart ID that was assigned to this core's single hart.
    pub fn hart_id(&self) -> u32 {
        self.config.hart_id
    }

    /// Returns the current privilege mode. See also [`PrivilegeLevel`].
    pub fn privilege_mode(&self) -> PrivilegeLevel {
        self.privilege_mode
    }

    /// Provides immutable access to the general purpose (x) registers, and the pc register.
    pub fn registers(&self) -> &Registers {
        &self.registers
    }

    /// Provides mutable access to the general purpose (x) registers, and the pc register.
    pub fn registers_mut(&mut self) -> &mut Registers {
        &mut self.registers
    }

    /// Provides immutable access to the system bus this core is attached to.
    pub fn system_bus(&self) -> &B {
        &self.system_bus
    }

    /// Provides mutable access to the system bus this core is attached to.
    pub fn system_bus_mut(&mut self) -> &mut B {
        &mut self.system_bus
    }

    /// Performs a read of the memory-mapped mtime register.
    pub fn read_mtime(&mut self) -> u64 {
        let mut buf = [0u8; 8];
        let address = self.config.mtime_address;
        self.system_bus.read(&mut buf, address);
        u64::from_le_bytes(buf)
    }

    /// Performs a read of the memory-mapped mtimecmp register.
    pub fn read_mtimecmp(&mut self) -> u64 {
        let mut buf = [0u8; 8];
        let address = self.config.mtimecmp_address;
        self.system_bus.read(&mut buf, address);
        u64::from_le_bytes(buf)
    }

    /// Executes a single cycle: timer check, interrupt check, then fetch-decode-execute.
    ///
    /// Exceptions and interrupts are handled internally by redirecting the guest into its trap
    /// handler; they still count as a successfully simulated cycle. Only errors the guest cannot
    /// observe (see [`FatalError`]) are returned.
    pub fn step(&mut self) -> Result<(), FatalError> {
        let pc = self.registers.pc();
        if !Alignment::WORD.is_aligned(pc) {
            self.enter_trap(TrapCause::Exception(Exception::InstructionAddressMisaligned(
                pc,
            )))?;
            self.counters.increment_cycle();
            return Ok(());
        }

        // MTIP is a level signal: asserted while mtime has caught up with mtimecmp, deasserted
        // again once the guest programs a comparator value that lies in the future.
        let mtime = self.read_mtime();
        let mtimecmp = self.read_mtimecmp();
        self.interrupts.set_machine_timer(mtime >= mtimecmp);

        // If an interrupt is taken, pc now points at the trap handler and the remainder of this
        // cycle executes the handler's first instruction.
        self.check_for_interrupt()?;

        let result = match self.fetch_instruction() {
            Ok(raw) => match Instruction::decode(raw) {
                Ok(instruction) => {
                    self.execute_instruction(instruction)
                        .map_err(|err| match err {
                            // Attach the raw instruction word for mtval if the handler could not.
                            ExecutionError::Trap(Exception::IllegalInstruction(None)) => {
                                ExecutionError::Trap(Exception::IllegalInstruction(Some(raw)))
                            }
                            err => err,
                        })
                }
                Err(_) => Err(Exception::IllegalInstruction(Some(raw)).into()),
            },
            Err(err) => Err(err),
        };

        if let Err(err) = result {
            match err {
                ExecutionError::Trap(exception) => {
                    self.enter_trap(TrapCause::Exception(exception))?
                }
                ExecutionError::Fatal(fatal) => return Err(fatal),
            }
        }

        self.counters.increment_cycle();
        Ok(())
    }

    /// Execute a single (decoded) instruction.
    ///
    /// This only takes care of the instruction-specific operations, such as updating `x`
    /// registers, updating memory, updating the `pc` register, and depending on the instruction
    /// also updating CSRs. Additional state updates that normally happen in a cycle, such as
    /// incrementing the counters, are not performed.
    pub fn execute_instruction(&mut self, instruction: Instruction) -> ExecutionResult {
        let mut executor = Executor { core: self };
        match instruction {
            Instruction::OpImm {
                op,
                dest,
                src,
                immediate,
            } => {
                let op = match op {
                    RegImmOp::Addi => Executor::addi,
                    RegImmOp::Slti => Executor::slti,
                    RegImmOp::Sltiu => Executor::sltiu,
                    RegImmOp::Xori => Executor::xori,
                    RegImmOp::Ori => Executor::ori,
                    RegImmOp::Andi => Executor::andi,
                };
                op(&mut executor, dest, src, immediate)
            }
            Instruction::OpShiftImm {
                op,
                dest,
                src,
                shift_amount_u5,
            } => {
                let op = match op {
                    RegShiftImmOp::Slli => Executor::slli,
                    RegShiftImmOp::Srli => Executor::srli,
                    RegShiftImmOp::Srai => Executor::srai,
                };
                op(&mut executor, dest, src, shift_amount_u5)
            }
            Instruction::Auipc { dest, immediate } => executor.auipc(dest, immediate),
            Instruction::Lui { dest, immediate } => executor.lui(dest, immediate),
            Instruction::Amo {
                op,
                aq: _,
                rl: _,
                src,
                addr,
                dest,
            } => {
                let op = match op {
                    AmoOp::Lr => Executor::lr,
                    AmoOp::Sc => Executor::sc,
                    AmoOp::Swap => Executor::amoswap,
                    AmoOp::Add => Executor::amoadd,
                    AmoOp::Xor => Executor::amoxor,
                    AmoOp::And => Executor::amoand,
                    AmoOp::Or => Executor::amoor,
                    AmoOp::Min => Executor::amomin,
                    AmoOp::Max => Executor::amomax,
                    AmoOp::Minu => Executor::amominu,
                    AmoOp::Maxu => Executor::amomaxu,
                };
                op(&mut executor, dest, src, addr)
            }
            Instruction::Op {
                op,
                dest,
                src1,
                src2,
            } => {
                let op = match op {
                    RegRegOp::Add => Executor::add,
                    RegRegOp::Slt => Executor::slt,
                    RegRegOp::Sltu => Executor::sltu,
                    RegRegOp::And => Executor::and,
                    RegRegOp::Or => Executor::or,
                    RegRegOp::Xor => Executor::xor,
                    RegRegOp::Sll => Executor::sll,
                    RegRegOp::Srl => Executor::srl,
                    RegRegOp::Sub => Executor::sub,
                    RegRegOp::Sra => Executor::sra,
                    RegRegOp::Mul => Executor::mul,
                    RegRegOp::Mulh => Executor::mulh,
                    RegRegOp::Mulhsu => Executor::mulhsu,
                    RegRegOp::Mulhu => Executor::mulhu,
                    RegRegOp::Div => Executor::div,
                    RegRegOp::Divu => Executor::divu,
                    RegRegOp::Rem => Executor::rem,
                    RegRegOp::Remu => Executor::remu,
                };
                op(&mut executor, dest, src1, src2)
            }
            Instruction::Jal { dest, offset } => executor.jal(dest, offset),
            Instruction::Jalr { dest, base, offset } => executor.jalr(dest, base, offset),
            Instruction::Branch {
                condition,
                src1,
                src2,
                offset,
            } => {
                let op = match condition {
                    BranchCondition::Beq => Executor::beq,
                    BranchCondition::Bne => Executor::bne,
                    BranchCondition::Blt => Executor::blt,
                    BranchCondition::Bltu => Executor::bltu,
                    BranchCondition::Bge => Executor::bge,
                    BranchCondition::Bgeu => Executor::bgeu,
                };
                op(&mut executor, src1, src2, offset)
            }
            Instruction::Load {
                width,
                dest,
                base,
                offset,
            } => {
                let op = match width {
                    LoadWidth::Lb => Executor::lb,
                    LoadWidth::Lh => Executor::lh,
                    LoadWidth::Lw => Executor::lw,
                    LoadWidth::Lbu => Executor::lbu,
                    LoadWidth::Lhu => Executor::lhu,
                };
                op(&mut executor, dest, base, offset)
            }
            Instruction::Store {
                width,
                src,
                base,
                offset,
            } => {
                let op = match width {
                    StoreWidth::Sb => Executor::sb,
                    StoreWidth::Sh => Executor::sh,
                    StoreWidth::Sw => Executor::sw,
                };
                op(&mut executor, src, base, offset)
            }
            Instruction::Fence => executor.fence(),
            Instruction::FenceI => executor.fence_i(),
            Instruction::Ecall => executor.ecall(),
            Instruction::Ebreak => executor.ebreak(),
            Instruction::Mret => executor.mret(),
            Instruction::Wfi => executor.wfi(),
            Instruction::Csr { op, dest, csr, src } => {
                let op = match op {
                    CsrOp::ReadWrite => Executor::csrrw,
                    CsrOp::ReadSet => Executor::csrrs,
                    CsrOp::ReadClear => Executor::csrrc,
                };
                op(&mut executor, dest, csr, src)
            }
            Instruction::Csri {
                op,
                dest,
                csr,
                immediate,
            } => {
                let op = match op {
                    CsrOp::ReadWrite => Executor::csrrwi,
                    CsrOp::ReadSet => Executor::csrrsi,
                    CsrOp::ReadClear => Executor::csrrci,
                };
                op(&mut executor, dest, csr, immediate)
            }
        }
    }

    /// Read the value of a CSR by its specifier.
    ///
    /// `privilege_level` indicates at what privilege level the read is performed. If the CSR that
    /// is being read requires a higher privilege level (see
    /// [`csr::required_privilege_level`]), a [`CsrAccessError::Privileged`] is returned.
    pub fn read_csr(
        &mut self,
        specifier: CsrSpecifier,
        privilege_level: PrivilegeLevel,
    ) -> Result<u32, CsrAccessError> {
        self.check_csr_access(specifier, privilege_level)?;
        match specifier {
            //
            // Machine info registers
            //
            csr::MISA => Ok(Self::MISA),
            csr::MVENDORID => Ok(Self::MVENDORID),
            csr::MARCHID => Ok(Self::MARCHID),
            csr::MIMPID => Ok(Self::MIMPID),
            csr::MCONFIGPTR => Ok(Self::MCONFIGPTR),
            csr::MHARTID => Ok(self.config.hart_id),
            //
            // Trap setup and handling
            //
            csr::MSTATUS => Ok(self.status.read_mstatus()),
            csr::MSTATUSH => Ok(0),
            csr::MEDELEG => Ok(self.trap.read_medeleg()),
            // No delegation targets exist, so mideleg is hardwired to zero.
            csr::MIDELEG => Ok(0),
            csr::MIE => Ok(self.interrupts.read_mie()),
            csr::MIP => Ok(self.interrupts.read_mip()),
            csr::MTVEC => Ok(self.trap.read_mtvec()),
            csr::MCOUNTEREN => Ok(self.counters.read_mcounteren()),
            csr::MSCRATCH => Ok(self.trap.read_mscratch()),
            csr::MEPC => Ok(self.trap.read_mepc()),
            csr::MCAUSE => Ok(self.trap.read_mcause()),
            csr::MTVAL => Ok(self.trap.read_mtval()),
            //
            // Physical memory protection
            //
            // PMP is not implemented; the whole register file reads as zero and ignores writes,
            // which advertises "no protection configured".
            csr::PMPCFG0..=csr::PMPCFG15 => Ok(0),
            csr::PMPADDR0..=csr::PMPADDR63 => Ok(0),
            //
            // Counter registers
            //
            // The unprivileged counters are read-only shadows of their m-counterparts.
            csr::MCYCLE | csr::CYCLE => Ok(self.counters.read_mcycle()),
            csr::MCYCLEH | csr::CYCLEH => Ok(self.counters.read_mcycleh()),
            csr::MINSTRET | csr::INSTRET => Ok(self.counters.read_minstret()),
            csr::MINSTRETH | csr::INSTRETH => Ok(self.counters.read_minstreth()),
            csr::TIME => Ok(self.read_mtime() as u32),
            csr::TIMEH => Ok((self.read_mtime() >> 32) as u32),
            _ => Err(CsrAccessError::CsrUnsupported(specifier)),
        }
    }

    /// Write a value to a CSR by its specifier.
    ///
    /// `privilege_level` indicates at what privilege level the write is performed. If the CSR
    /// that is being written requires a higher privilege level, a
    /// [`CsrAccessError::Privileged`] is returned.
    ///
    /// Writes to read-only CSRs are dropped without error, and several writable CSRs pin or
    /// suppress individual fields; see the per-register storage types. Writing mstatus, mie,
    /// mip, or mideleg re-evaluates pending interrupts, which can redirect the guest into its
    /// trap handler before this returns.
    pub fn write_csr(
        &mut self,
        specifier: CsrSpecifier,
        privilege_level: PrivilegeLevel,
        value: u32,
    ) -> Result<(), CsrWriteError> {
        self.check_csr_access(specifier, privilege_level)?;
        if csr::is_read_only(specifier) {
            trace!("dropping write {value:#010x} to read-only CSR {specifier:#05X}");
            return Ok(());
        }
        match specifier {
            csr::MSTATUS => {
                self.status.write_mstatus(value);
                self.check_for_interrupt()?;
            }
            csr::MISA => {}
            csr::MSTATUSH => {}
            csr::MEDELEG => self.trap.write_medeleg(value, 0xFFFF_FFFF),
            csr::MIDELEG => {
                // Storage is hardwired to zero, but the write still re-evaluates interrupts.
                self.check_for_interrupt()?;
            }
            csr::MIE => {
                self.interrupts.write_mie(value);
                self.check_for_interrupt()?;
            }
            csr::MIP => {
                self.interrupts.write_mip(value);
                self.check_for_interrupt()?;
            }
            csr::MTVEC => self.trap.write_mtvec(value, 0xFFFF_FFFF),
            csr::MCOUNTEREN => self.counters.write_mcounteren(value, 0xFFFF_FFFF),
            csr::MSCRATCH => self.trap.write_mscratch(value, 0xFFFF_FFFF),
            csr::MEPC => self.trap.write_mepc(value, 0xFFFF_FFFF),
            csr::MCAUSE => self.trap.write_mcause(value, 0xFFFF_FFFF),
            csr::MTVAL => self.trap.write_mtval(value, 0xFFFF_FFFF),
            csr::PMPCFG0..=csr::PMPCFG15 => {}
            csr::PMPADDR0..=csr::PMPADDR63 => {}
            csr::MCYCLE | csr::MCYCLEH | csr::MINSTRET | csr::MINSTRETH => {}
            _ => Err(CsrAccessError::CsrUnsupported(specifier))?,
        }
        Ok(())
    }

    fn check_csr_access(
        &self,
        specifier: CsrSpecifier,
        privilege_level: PrivilegeLevel,
    ) -> Result<(), CsrAccessError> {
        if !csr::is_valid(specifier) {
            return Err(CsrAccessError::CsrUnsupported(specifier));
        }
        let required_level = csr::required_privilege_level(specifier);
        if privilege_level < required_level {
            return Err(CsrAccessError::Privileged {
                specifier,
                required_level,
                actual_level: privilege_level,
            });
        }
        Ok(())
    }

    /// Take the highest-priority pending-and-enabled interrupt, if any.
    ///
    /// Interrupts are only taken while the global MIE bit of mstatus is set (the hart always runs
    /// in M-mode, where lower-privilege interrupts cannot apply). The priority order among the
    /// machine interrupts is external > software > timer.
    pub fn check_for_interrupt(&mut self) -> Result<(), FatalError> {
        if self.interrupts.read_mip() == 0 {
            return Ok(());
        }
        if self.privilege_mode != PrivilegeLevel::Machine || !self.status.mie() {
            return Ok(());
        }
        for interrupt in [
            Interrupt::MachineExternal,
            Interrupt::MachineSoftware,
            Interrupt::MachineTimer,
        ] {
            if self.interrupts.is_ready(interrupt) {
                return self.enter_trap(TrapCause::Interrupt(interrupt));
            }
        }
        Ok(())
    }

    /// "Independent instruction fetch unit"
    ///
    /// > The base RISC-V ISA has fixed-length 32-bit instructions that must be naturally aligned
    /// > on 32-bit boundaries.
    ///
    /// pc alignment is checked at the start of the cycle, so only bus-level problems can surface
    /// here. A fetch from unmapped memory raises a load access fault, matching what the trap
    /// handler of the targeted kernels expects from this platform.
    fn fetch_instruction(&mut self) -> ExecutionResult<u32> {
        let pc = self.registers.pc();
        match self.read_word(pc) {
            Ok(raw) => Ok(raw),
            Err(MemoryError::AccessFault) => Err(Exception::LoadAccessFault(pc).into()),
            Err(MemoryError::NullPointerRead) => Err(FatalError::NullPointerRead { pc }.into()),
        }
    }

    /// Redirect the guest into its trap handler for `cause`.
    ///
    /// Saves the interrupted context (mepc, mcause, mtval, the MIE/MPIE/MPP stack in mstatus) and
    /// points pc at the mtvec base. Only direct mtvec mode is supported; a guest that configures
    /// vectored mode ends the simulation with a fatal error.
    fn enter_trap(&mut self, cause: TrapCause) -> Result<(), FatalError> {
        let pc = self.registers.pc();
        debug!(
            "trap at pc {pc:#010x}: cause {:#010x} ({cause:?})",
            cause.mcause()
        );
        self.trap.write_mcause(cause.mcause(), 0xFFFF_FFFF);
        let tval = match cause {
            TrapCause::Exception(exception) => match exception {
                Exception::IllegalInstruction(raw_instruction) => raw_instruction.unwrap_or(0),
                Exception::Breakpoint => pc,
                Exception::InstructionAddressMisaligned(address)
                | Exception::LoadAccessFault(address)
                | Exception::StoreAccessFault(address) => address,
                Exception::EnvironmentCallFromMMode => 0,
            },
            TrapCause::Interrupt(_) => 0,
        };
        self.trap.write_mtval(tval, 0xFFFF_FFFF);
        let mie = self.status.mie();
        self.status.set_mpp(self.privilege_mode.into());
        self.status.set_mpie(mie);
        self.status.set_mie(false);
        self.trap.write_mepc(pc, 0xFFFF_FFFF);
        match self.trap.mtvec_mode() {
            VectorMode::Direct => {
                *self.registers.pc_mut() = self.trap.mtvec_base();
                Ok(())
            }
            VectorMode::Vectored | VectorMode::Reserved => Err(FatalError::UnhandledTrapVectorMode {
                mtvec: self.trap.read_mtvec(),
            }),
        }
    }
}

/// Errors that can occur when attempting to access a CSR.
#[derive(Error, Debug)]
pub enum CsrAccessError {
    #[error("unsupported CSR: {0:#05X}")]
    CsrUnsupported(CsrSpecifier),
    /// Attempt to access a CSR that requires a higher privilege level.
    #[error(
        "cannot access CSR {specifier:#05X} from privilege level {actual_level}, \
         since it requires privilege level {required_level}"
    )]
    Privileged {
        /// The CSR for which access was requested.
        specifier: CsrSpecifier,
        /// The minimum required privilege level to access that CSR.
        required_level: RawPrivilegeLevel,
        /// The actual privilege level from which the access was performed.
        actual_level: PrivilegeLevel,
    },
}

/// Errors that can occur when attempting to write to a CSR.
#[derive(Error, Debug)]
pub enum CsrWriteError {
    /// A non-write-specific access error. See [`CsrAccessError`].
    #[error(transparent)]
    Access(#[from] CsrAccessError),
    /// A CSR write side effect (the interrupt re-evaluation) ran into a fatal error.
    #[error(transparent)]
    Fatal(#[from] FatalError),
}

/// Result of executing a single instruction. [`Ok`] if execution went normal, [`Err`] if the
/// instruction could not complete.
pub type ExecutionResult<T = ()> = Result<T, ExecutionError>;

/// Why an instruction did not complete: either the guest raised a trappable exception, or the
/// simulation itself cannot continue.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ExecutionError {
    /// A synchronous exception to be delivered to the guest's trap handler.
    Trap(Exception),
    /// The simulation cannot continue; see [`FatalError`].
    Fatal(FatalError),
}

impl From<Exception> for ExecutionError {
    fn from(value: Exception) -> Self {
        Self::Trap(value)
    }
}

impl From<FatalError> for ExecutionError {
    fn from(value: FatalError) -> Self {
        Self::Fatal(value)
    }
}

/// Synchronous exceptions this machine can raise. The numeric codes are the standard mcause
/// values.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Exception {
    /// Instruction address is not on a four-byte aligned boundary in memory. Also raised, with
    /// the target address as the inner value, for misaligned atomic operations.
    InstructionAddressMisaligned(u32),
    /// Generic exception used to communicate one of many possible scenarios:
    ///
    /// - Attempt to decode a reserved or unsupported instruction.
    /// - Attempt to access a non-existent CSR.
    /// - Attempt to access a CSR without the appropriate privilege level.
    ///
    /// The inner value is the raw instruction if that data was available.
    IllegalInstruction(Option<u32>),
    Breakpoint,
    /// The inner value is the faulting address.
    LoadAccessFault(u32),
    /// The inner value is the faulting address.
    StoreAccessFault(u32),
    EnvironmentCallFromMMode,
}

impl Exception {
    pub const INSTRUCTION_ADDRESS_MISALIGNED: u32 = 0;
    pub const ILLEGAL_INSTRUCTION: u32 = 2;
    pub const BREAKPOINT: u32 = 3;
    pub const LOAD_ACCESS_FAULT: u32 = 5;
    pub const STORE_ACCESS_FAULT: u32 = 7;
    pub const ENVIRONMENT_CALL_FROM_M_MODE: u32 = 11;

    /// Returns the exception code (cause) for this exception.
    pub const fn code(&self) -> u32 {
        match self {
            Self::InstructionAddressMisaligned(_) => Self::INSTRUCTION_ADDRESS_MISALIGNED,
            Self::IllegalInstruction(_) => Self::ILLEGAL_INSTRUCTION,
            Self::Breakpoint => Self::BREAKPOINT,
            Self::LoadAccessFault(_) => Self::LOAD_ACCESS_FAULT,
            Self::StoreAccessFault(_) => Self::STORE_ACCESS_FAULT,
            Self::EnvironmentCallFromMMode => Self::ENVIRONMENT_CALL_FROM_M_MODE,
        }
    }
}

/// Asynchronous interrupts this machine can take. The numeric codes are the standard mcause
/// values (without the interrupt bit).
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Interrupt {
    MachineSoftware,
    MachineTimer,
    MachineExternal,
}

impl Interrupt {
    /// Returns the exception code (cause) for this interrupt. This is also the bit position of
    /// the interrupt in the mie and mip registers.
    pub const fn code(&self) -> u32 {
        match self {
            Self::MachineSoftware => 3,
            Self::MachineTimer => 7,
            Self::MachineExternal => 11,
        }
    }
}

/// Errors the guest can neither observe nor handle; each one ends the simulation.
///
/// Most of these are bring-up diagnostics: a production build would fold them into
/// [`Exception::IllegalInstruction`] and let the guest deal with it.
#[derive(Error, Debug, Clone, Copy, Eq, PartialEq)]
pub enum FatalError {
    /// The decoder rejected an instruction word and no illegal-instruction fallback applied.
    #[error("unknown instruction {raw_instruction:#010x} at pc {pc:#010x}")]
    UnknownInstruction { pc: u32, raw_instruction: u32 },
    /// A decoded instruction deliberately has no handler.
    #[error("instruction {mnemonic} is not implemented")]
    NotImplemented { mnemonic: &'static str },
    /// An operation outside the CSR access path required a higher privilege level.
    #[error("insufficient privilege level {actual_level} at pc {pc:#010x}")]
    InsufficientPrivilege {
        pc: u32,
        actual_level: PrivilegeLevel,
    },
    /// The guest configured an mtvec addressing mode other than direct.
    #[error("unhandled trap vector mode in mtvec {mtvec:#010x}")]
    UnhandledTrapVectorMode { mtvec: u32 },
    /// The guest read from address zero; see [`MemoryError::NullPointerRead`].
    #[error("read from guest address zero at pc {pc:#010x}")]
    NullPointerRead { pc: u32 },
}

impl FatalError {
    /// The process exit code reported for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::UnknownInstruction { .. } => 1,
            Self::NotImplemented { .. } => 2,
            Self::InsufficientPrivilege { .. } => 3,
            Self::UnhandledTrapVectorMode { .. } => 4,
            Self::NullPointerRead { .. } => 5,
        }
    }
}
