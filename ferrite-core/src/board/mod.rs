//! A minimal virt-style board: one core, RAM at the page offset, UART + CLINT + syscon below it.

mod system_bus;

use crate::core::{self, Core, FatalError};
use crate::registers::Specifier;
use crate::resources::clint;
use crate::resources::ram::Ram;
use crate::resources::syscon::{PowerState, Syscon};
use crate::resources::uart::Uart;
use crate::Alignment;
use log::{debug, info};
use thiserror::Error;

pub use system_bus::{Interconnect, CLINT_BASE, SYSCON_BASE, UART_BASE};

#[derive(Debug, Clone)]
pub struct Config {
    /// Size of RAM in bytes.
    pub mem_size: usize,
    /// Guest physical address of the first RAM byte. The executable is loaded here, and the
    /// core's reset vector points here.
    pub page_offset: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mem_size: 64 * 1024 * 1024,
            page_offset: 0x8000_0000,
        }
    }
}

#[derive(Error, Debug)]
pub enum BoardError {
    #[error("invalid RAM configuration: {mem_size:#x} bytes at {page_offset:#010x}")]
    InvalidMemorySize { mem_size: usize, page_offset: u32 },
}

/// RISC-V hardware platform with a single single-hart core.
///
/// > A RISC-V hardware platform can contain one or more RISC-V-compatible processing cores
/// > together with other non-RISC-V-compatible cores, fixed-function accelerators, various
/// > physical memory structures, I/O devices, and an interconnect structure to allow the
/// > components to communicate.
///
/// This board has exactly what a no-MMU kernel needs and nothing more: RAM, a console UART, a
/// CLINT for the timer, and a syscon to power off through.
#[derive(Debug)]
pub struct Board {
    core: Core<Interconnect>,
}

impl Board {
    pub fn new(config: Config) -> Result<Self, BoardError> {
        let invalid = BoardError::InvalidMemorySize {
            mem_size: config.mem_size,
            page_offset: config.page_offset,
        };
        if config.page_offset as u64 + config.mem_size as u64 > 1 << 32 {
            return Err(invalid);
        }
        let Some(ram) = Ram::new(config.mem_size) else {
            return Err(invalid);
        };
        let interconnect = Interconnect {
            ram,
            uart: Uart::new(),
            clint: clint::Clint::new(),
            syscon: Syscon::new(),
            ram_base: config.page_offset,
        };
        let core = Core::new(
            interconnect,
            core::Config {
                // At least one hart must have ID 0 according to the spec.
                hart_id: 0,
                mtime_address: CLINT_BASE + clint::MTIME_ADDR_LO,
                mtimecmp_address: CLINT_BASE + clint::MTIMECMP_ADDR_LO,
                reset_vector: config.page_offset,
            },
        );
        info!(
            "board: {} bytes of RAM at {:#010x}",
            config.mem_size, config.page_offset
        );
        Ok(Self { core })
    }

    pub fn core(&self) -> &Core<Interconnect> {
        &self.core
    }

    pub fn core_mut(&mut self) -> &mut Core<Interconnect> {
        &mut self.core
    }

    /// Runs a single core cycle. See [`Core::step`].
    pub fn step(&mut self) -> Result<(), FatalError> {
        self.core.step()
    }

    /// The power state latched by the syscon device.
    pub fn power_state(&self) -> PowerState {
        self.core.system_bus().syscon.power_state()
    }

    /// Returns `true` once the guest has requested a poweroff or reboot.
    pub fn is_powered_down(&self) -> bool {
        self.core.system_bus().syscon.is_powered_down()
    }

    /// Write a byte buffer into the physical address space.
    ///
    /// Only the RAM region is loadable; bytes aimed below it are ignored, and bytes past the end
    /// of RAM are dropped.
    pub fn load_physical(&mut self, base_address: u32, buf: &[u8]) {
        let ram_base = self.core.system_bus().ram_base;
        if base_address < ram_base {
            debug!("load_physical: ignoring {} bytes below RAM", buf.len());
            return;
        }
        let offset = base_address - ram_base;
        self.core.system_bus_mut().ram.write(offset, buf);
    }

    /// Read bytes from the physical address space without going through the core.
    ///
    /// Addresses outside RAM read as zero. Intended for test harnesses and post-mortem
    /// inspection.
    pub fn read_physical(&self, address: u32, buf: &mut [u8]) {
        buf.fill(0);
        let ram_base = self.core.system_bus().ram_base;
        if address >= ram_base {
            self.core.system_bus().ram.read(buf, address - ram_base);
        }
    }

    /// Read a little-endian word from the physical address space. See [`Self::read_physical`].
    pub fn read_physical_word(&self, address: u32) -> u32 {
        let mut buf = [0u8; 4];
        self.read_physical(address, &mut buf);
        u32::from_le_bytes(buf)
    }

    /// Sets up the registers the kernel's boot protocol expects: the hart id in `a0` and the
    /// physical address of the device tree (or zero) in `a1`.
    pub fn set_boot_registers(&mut self, dtb_address: Option<u32>) {
        let hart_id = self.core.hart_id();
        let registers = self.core.registers_mut();
        registers.set_x(Specifier::A0, hart_id);
        registers.set_x(Specifier::A1, dtb_address.unwrap_or(0));
    }

    /// Copies `dtb` to the end of RAM (8-byte aligned) and points `a1` at it.
    ///
    /// Returns the guest physical address the blob was placed at, or `None` if it does not fit.
    pub fn load_dtb(&mut self, dtb: &[u8]) -> Option<u32> {
        let ram_base = self.core.system_bus().ram_base;
        let ram_len = self.core.system_bus().ram.len() as u64;
        let end = ram_base as u64 + ram_len;
        let address = Alignment::DOUBLEWORD.align_down(end.checked_sub(dtb.len() as u64)? as u32);
        if (address as u64) < ram_base as u64 {
            return None;
        }
        self.load_physical(address, dtb);
        self.set_boot_registers(Some(address));
        debug!("dtb: {} bytes at {address:#010x}", dtb.len());
        Some(address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{csr, Exception, Interrupt};
    use crate::resources::syscon;
    use crate::PrivilegeLevel;

    const RAM_BASE: u32 = 0x8000_0000;

    fn board() -> Board {
        Board::new(Config {
            mem_size: 4 * 1024 * 1024,
            page_offset: RAM_BASE,
        })
        .unwrap()
    }

    fn load_words(board: &mut Board, address: u32, words: &[u32]) {
        for (i, word) in words.iter().enumerate() {
            board.load_physical(address + 4 * i as u32, &word.to_le_bytes());
        }
    }

    fn x(board: &Board, index: u8) -> u32 {
        board.core().registers().x(Specifier::from_u5(index))
    }

    fn read_csr(board: &mut Board, specifier: csr::CsrSpecifier) -> u32 {
        board
            .core_mut()
            .read_csr(specifier, PrivilegeLevel::Machine)
            .unwrap()
    }

    fn write_csr(board: &mut Board, specifier: csr::CsrSpecifier, value: u32) {
        board
            .core_mut()
            .write_csr(specifier, PrivilegeLevel::Machine, value)
            .unwrap()
    }

    fn mstatus_mie(board: &mut Board) -> bool {
        read_csr(board, csr::MSTATUS) & 0x8 != 0
    }

    #[test]
    fn test_lui() {
        let mut board = board();
        // lui x5, 0xABCDE
        load_words(&mut board, RAM_BASE, &[0xABCD_E2B7]);
        board.step().unwrap();
        assert_eq!(0xABCD_E000, x(&board, 5));
        assert_eq!(RAM_BASE + 4, board.core().registers().pc());
    }

    #[test]
    fn test_jal_forward() {
        let mut board = board();
        // jal x1, 8
        load_words(&mut board, RAM_BASE, &[0x0080_00EF]);
        board.step().unwrap();
        assert_eq!(RAM_BASE + 4, x(&board, 1));
        assert_eq!(RAM_BASE + 8, board.core().registers().pc());
    }

    #[test]
    fn test_beq_backward() {
        let mut board = board();
        // beq x0, x0, -4 at 0x80000100
        load_words(&mut board, RAM_BASE + 0x100, &[0xFE00_0EE3]);
        *board.core_mut().registers_mut().pc_mut() = RAM_BASE + 0x100;
        board.step().unwrap();
        assert_eq!(RAM_BASE + 0xFC, board.core().registers().pc());
    }

    #[test]
    fn test_syscon_poweroff_via_store() {
        let mut board = board();
        // sw x8, 0(x6) with x6 = syscon, x8 = poweroff magic
        load_words(&mut board, RAM_BASE, &[0x0083_2023]);
        let registers = board.core_mut().registers_mut();
        registers.set_x(Specifier::from_u5(6), SYSCON_BASE);
        registers.set_x(Specifier::from_u5(8), syscon::POWEROFF_MAGIC);
        board.step().unwrap();
        assert!(board.is_powered_down());
        assert_eq!(PowerState::Poweroff, board.power_state());
    }

    #[test]
    fn test_timer_interrupt() {
        let mut board = board();
        let handler = RAM_BASE + 0x200;
        // The handler's first instruction executes in the same cycle the interrupt is taken, so
        // park a nop there.
        load_words(&mut board, handler, &[0x0000_0013]);
        write_csr(&mut board, csr::MTVEC, handler);
        // mtimecmp stays at its reset value of zero, so the timer has already expired; enabling
        // MTIE is all it takes.
        write_csr(&mut board, csr::MIE, 1 << Interrupt::MachineTimer.code());
        assert!(mstatus_mie(&mut board));

        board.step().unwrap();
        assert_eq!(0x8000_0007, read_csr(&mut board, csr::MCAUSE));
        assert_eq!(RAM_BASE, read_csr(&mut board, csr::MEPC));
        assert_eq!(0, read_csr(&mut board, csr::MTVAL));
        assert!(!mstatus_mie(&mut board));
        assert_eq!(handler + 4, board.core().registers().pc());
    }

    #[test]
    fn test_illegal_instruction_trap() {
        let mut board = board();
        let handler = RAM_BASE + 0x200;
        load_words(&mut board, handler, &[0x0000_0013]);
        load_words(&mut board, RAM_BASE, &[0xFFFF_FFFF]);
        write_csr(&mut board, csr::MTVEC, handler);
        board.step().unwrap();
        assert_eq!(
            Exception::ILLEGAL_INSTRUCTION,
            read_csr(&mut board, csr::MCAUSE)
        );
        assert_eq!(0xFFFF_FFFF, read_csr(&mut board, csr::MTVAL));
        assert_eq!(RAM_BASE, read_csr(&mut board, csr::MEPC));
        // MPIE latched the pre-trap MIE (set at reset), MIE is now clear.
        assert!(!mstatus_mie(&mut board));
        assert_eq!(handler + 4, board.core().registers().pc());
    }

    #[test]
    fn test_ecall_trap() {
        let mut board = board();
        let handler = RAM_BASE + 0x200;
        load_words(&mut board, handler, &[0x0000_0013]);
        load_words(&mut board, RAM_BASE, &[0x0000_0073]);
        write_csr(&mut board, csr::MTVEC, handler);
        board.step().unwrap();
        assert_eq!(
            Exception::ENVIRONMENT_CALL_FROM_M_MODE,
            read_csr(&mut board, csr::MCAUSE)
        );
        assert_eq!(0, read_csr(&mut board, csr::MTVAL));
        assert_eq!(RAM_BASE, read_csr(&mut board, csr::MEPC));
    }

    #[test]
    fn test_fetch_fault_traps_as_load_access() {
        let mut board = board();
        let handler = RAM_BASE + 0x200;
        load_words(&mut board, handler, &[0x0000_0013]);
        write_csr(&mut board, csr::MTVEC, handler);
        let bad_pc = RAM_BASE + 0x40_0000; // one byte past 4 MiB of RAM
        *board.core_mut().registers_mut().pc_mut() = bad_pc;
        board.step().unwrap();
        assert_eq!(
            Exception::LOAD_ACCESS_FAULT,
            read_csr(&mut board, csr::MCAUSE)
        );
        assert_eq!(bad_pc, read_csr(&mut board, csr::MTVAL));
        assert_eq!(bad_pc, read_csr(&mut board, csr::MEPC));
    }

    #[test]
    fn test_misaligned_pc_traps() {
        let mut board = board();
        let handler = RAM_BASE + 0x200;
        load_words(&mut board, handler, &[0x0000_0013]);
        write_csr(&mut board, csr::MTVEC, handler);
        *board.core_mut().registers_mut().pc_mut() = RAM_BASE + 2;
        board.step().unwrap();
        assert_eq!(
            Exception::INSTRUCTION_ADDRESS_MISALIGNED,
            read_csr(&mut board, csr::MCAUSE)
        );
        assert_eq!(RAM_BASE + 2, read_csr(&mut board, csr::MTVAL));
        // The handler itself runs on the next cycle for this trap shape.
        assert_eq!(handler, board.core().registers().pc());
    }

    #[test]
    fn test_mret_restores_context() {
        let mut board = board();
        let handler = RAM_BASE + 0x200;
        load_words(&mut board, handler, &[0x0000_0013]);
        load_words(&mut board, RAM_BASE, &[0x0000_0073]); // ecall
        load_words(&mut board, handler + 4, &[0x3020_0073]); // mret
        write_csr(&mut board, csr::MTVEC, handler);
        board.step().unwrap(); // trap + handler nop
        assert!(!mstatus_mie(&mut board));
        board.step().unwrap(); // mret
        // pc returned to the faulting instruction, MIE restored from MPIE.
        assert_eq!(RAM_BASE, board.core().registers().pc());
        assert!(mstatus_mie(&mut board));
    }

    #[test]
    fn test_vectored_mtvec_is_fatal() {
        let mut board = board();
        write_csr(&mut board, csr::MTVEC, (RAM_BASE + 0x200) | 1);
        load_words(&mut board, RAM_BASE, &[0x0000_0073]); // ecall
        let result = board.step();
        assert_eq!(
            Err(FatalError::UnhandledTrapVectorMode {
                mtvec: (RAM_BASE + 0x200) | 1
            }),
            result
        );
    }

    #[test]
    fn test_null_read_is_fatal() {
        let mut board = board();
        // lw x1, 0(x0)
        load_words(&mut board, RAM_BASE, &[0x0000_2083]);
        let result = board.step();
        assert_eq!(
            Err(FatalError::NullPointerRead { pc: RAM_BASE }),
            result
        );
    }

    #[test]
    fn test_lr_sc_through_steps() {
        let mut board = board();
        let address = RAM_BASE + 0x1000;
        // lr.w x5, (x6) ; sc.w x7, x8, (x6)
        load_words(&mut board, RAM_BASE, &[0x1003_22AF, 0x1883_23AF]);
        let registers = board.core_mut().registers_mut();
        registers.set_x(Specifier::from_u5(6), address);
        registers.set_x(Specifier::from_u5(8), 0xDEAD_BEEF);
        board.step().unwrap();
        board.step().unwrap();
        assert_eq!(0, x(&board, 7));
        assert_eq!(0xDEAD_BEEF, board.read_physical_word(address));
        assert_eq!(
            [0xEF, 0xBE, 0xAD, 0xDE],
            {
                let mut buf = [0u8; 4];
                board.read_physical(address, &mut buf);
                buf
            }
        );
    }

    #[test]
    fn test_cycle_counters_advance() {
        let mut board = board();
        load_words(&mut board, RAM_BASE, &[0x0000_0013, 0x0000_0013]);
        assert_eq!(0, read_csr(&mut board, csr::MCYCLE));
        board.step().unwrap();
        assert_eq!(1, read_csr(&mut board, csr::MCYCLE));
        assert_eq!(1, read_csr(&mut board, csr::MINSTRET));
        assert_eq!(1, read_csr(&mut board, csr::CYCLE));
        board.step().unwrap();
        assert_eq!(2, read_csr(&mut board, csr::MCYCLE));
        assert_eq!(read_csr(&mut board, csr::MCYCLE), read_csr(&mut board, csr::MINSTRET));
    }

    #[test]
    fn test_x0_stays_zero_across_steps() {
        let mut board = board();
        // addi x0, x0, 1 ; lui x0, 0xABCDE
        load_words(&mut board, RAM_BASE, &[0x0010_0013, 0xABCD_E037]);
        board.step().unwrap();
        assert_eq!(0, x(&board, 0));
        board.step().unwrap();
        assert_eq!(0, x(&board, 0));
    }

    #[test]
    fn test_boot_registers() {
        let mut board = board();
        board.set_boot_registers(Some(0x8030_0000));
        assert_eq!(0, x(&board, 10));
        assert_eq!(0x8030_0000, x(&board, 11));
    }

    #[test]
    fn test_load_dtb_at_end_of_ram() {
        let mut board = board();
        let dtb = [0xD0u8, 0x0D, 0xFE, 0xED, 0x01];
        let address = board.load_dtb(&dtb).unwrap();
        assert!(Alignment::DOUBLEWORD.is_aligned(address));
        assert!(address >= RAM_BASE);
        let mut buf = [0u8; 5];
        board.read_physical(address, &mut buf);
        assert_eq!(dtb, buf);
        assert_eq!(address, x(&board, 11));
    }

    #[test]
    fn test_invalid_config_rejected() {
        assert!(Board::new(Config {
            mem_size: 0,
            page_offset: RAM_BASE,
        })
        .is_err());
        assert!(Board::new(Config {
            mem_size: 1 << 31,
            page_offset: 0xC000_0000,
        })
        .is_err());
    }

    #[test]
    fn test_mtime_csr_shadows_clint() {
        let mut board = board();
        let time = read_csr(&mut board, csr::TIME);
        let mtime = board.core().system_bus().clint.mtime();
        // Both read the same clock; allow for the microseconds between the two samples.
        assert!(mtime as u32 >= time);
    }
}
