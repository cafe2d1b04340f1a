/// The machine cycle and instructions-retired counters, plus mcounteren storage.
///
/// > The RDCYCLE pseudoinstruction reads the low XLEN bits of the cycle CSR which holds a count
/// > of the number of clock cycles executed by the processor core on which the hart is running
/// > from an arbitrary start time in the past.
///
/// Every completed cycle retires exactly one instruction (or one trap entry) on this machine, so
/// minstret is not stored separately: it reads through mcycle and the two stay equal by
/// construction. Guest writes to any of the counter CSRs are dropped.
#[derive(Debug, Clone)]
pub struct Counters {
    mcycle: u32,
    mcycleh: u32,
    mcounteren: u32,
}

impl Default for Counters {
    fn default() -> Self {
        Self::new()
    }
}

impl Counters {
    pub fn new() -> Self {
        Self {
            mcycle: 0,
            mcycleh: 0,
            mcounteren: 0,
        }
    }

    pub(super) fn increment_cycle(&mut self) {
        self.mcycle = self.mcycle.wrapping_add(1);
        if self.mcycle == 0 {
            self.mcycleh = self.mcycleh.wrapping_add(1);
        }
    }

    pub fn read_mcycle(&self) -> u32 {
        self.mcycle
    }

    pub fn read_mcycleh(&self) -> u32 {
        self.mcycleh
    }

    pub fn read_minstret(&self) -> u32 {
        self.mcycle
    }

    pub fn read_minstreth(&self) -> u32 {
        self.mcycleh
    }

    pub fn read_mcounteren(&self) -> u32 {
        self.mcounteren
    }

    pub fn write_mcounteren(&mut self, value: u32, mask: u32) {
        self.mcounteren = self.mcounteren & !mask | value & mask;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_increment_with_carry() {
        let mut counters = Counters::new();
        counters.increment_cycle();
        assert_eq!(1, counters.read_mcycle());
        assert_eq!(0, counters.read_mcycleh());
        assert_eq!(counters.read_mcycle(), counters.read_minstret());

        let mut counters = Counters {
            mcycle: u32::MAX,
            mcycleh: 0,
            mcounteren: 0,
        };
        counters.increment_cycle();
        assert_eq!(0, counters.read_mcycle());
        assert_eq!(1, counters.read_mcycleh());
        assert_eq!(counters.read_mcycleh(), counters.read_minstreth());
    }
}
