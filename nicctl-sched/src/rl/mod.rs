//! Rate limiter profiles.
//!
//! A profile turns a bandwidth in kbps into the clock-relative encoding firmware uses.
//! Profiles are created per layer and shared between every node of that layer asking for
//! the same type and bandwidth.
use nicctl_common::{constants::KiB, round_to_num};
use nicctl_transport::RegisterAccess;

mod encode;
mod pool;

pub use encode::RlEncoding;
pub(crate) use pool::ProfilePool;
pub use pool::RlProfile;

/// Smallest bandwidth a profile can express, in kbps.
pub const MIN_BW: u32 = 500;
/// Largest bandwidth a profile can express (100 Gbps), in kbps.
pub const MAX_BW: u32 = 100_000_000;
/// Burst size programmed into new profiles unless configured otherwise.
pub const DFLT_BURST_SIZE: u32 = 15 * KiB;

/// Profile id firmware uses for "no limit" on CIR and EIR.
pub(crate) const DFLT_RL_PROF_ID: u16 = 0;
/// SRL profile id meaning "no shared limiter".
pub(crate) const NO_SHARED_RL_PROF_ID: u16 = 0xFFFF;
pub(crate) const INVAL_PROF_ID: u16 = 0xFFFF;

const MIN_BURST_SIZE: u32 = 64;
const MAX_BURST_SIZE: u32 = 2047 * KiB;
const MAX_BURST_SIZE_64B_GRAN: u32 = 2047 * 64;
/// Burst size is expressed in KiB rather than 64 byte units.
const BURST_KBYTE_GRANULARITY: u16 = 1 << 11;

/// Register holding the PSM clock source selector.
const CLKSTAT_SRC: u32 = 0x000B_826C;
const PSM_CLK_SRC_S: u32 = 4;
const PSM_CLK_SRC_M: u32 = 0x3 << PSM_CLK_SRC_S;

/// Encodes a burst size in bytes the way firmware expects it in a profile.
///
/// Returns `None` outside 64 bytes ..= 2047 KiB. Sizes that round to at most 2047 * 64
/// bytes use 64 byte granularity, larger ones KiB granularity.
pub fn encode_burst_size(bytes: u32) -> Option<u16> {
    if !(MIN_BURST_SIZE..=MAX_BURST_SIZE).contains(&bytes) {
        return None;
    }

    let rounded = round_to_num(bytes, 64);
    if rounded <= MAX_BURST_SIZE_64B_GRAN {
        return Some((rounded / 64) as u16);
    }

    let kib = round_to_num(bytes, KiB).min(MAX_BURST_SIZE);
    Some(BURST_KBYTE_GRANULARITY | (kib / KiB) as u16)
}

/// Frequency of the clock rate limiter encodings are relative to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PsmClock {
    #[default]
    Mhz367,
    Mhz416,
    Mhz446,
    Mhz390,
}

impl PsmClock {
    /// Maps the 2-bit source selector.
    pub const fn from_selector(sel: u8) -> Self {
        match sel & 0x3 {
            0 => Self::Mhz367,
            1 => Self::Mhz416,
            2 => Self::Mhz446,
            _ => Self::Mhz390,
        }
    }

    /// Reads the selector from the clock status register.
    pub fn read<R: RegisterAccess + ?Sized>(io: &R) -> Self {
        let val = io.read32(CLKSTAT_SRC);
        Self::from_selector(((val & PSM_CLK_SRC_M) >> PSM_CLK_SRC_S) as u8)
    }

    pub const fn hz(&self) -> u64 {
        match self {
            Self::Mhz367 => 367_647_059,
            Self::Mhz416 => 416_666_667,
            Self::Mhz446 => 446_428_571,
            Self::Mhz390 => 390_625_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;

    use super::*;

    #[test]
    fn burst_size_granularity() {
        assert_eq!(encode_burst_size(DFLT_BURST_SIZE), Some(240));
        assert_eq!(encode_burst_size(64), Some(1));
        assert_eq!(encode_burst_size(100), Some(2));
        assert_eq!(encode_burst_size(2047 * 64), Some(2047));
        assert_eq!(encode_burst_size(256 * KiB), Some(BURST_KBYTE_GRANULARITY | 256));
        assert_eq!(encode_burst_size(MAX_BURST_SIZE), Some(BURST_KBYTE_GRANULARITY | 2047));

        assert_eq!(encode_burst_size(63), None);
        assert_eq!(encode_burst_size(MAX_BURST_SIZE + 1), None);
    }

    struct OneReg(Mutex<u32>);

    impl RegisterAccess for OneReg {
        fn read32(&self, reg: u32) -> u32 {
            assert_eq!(reg, CLKSTAT_SRC);
            *self.0.lock()
        }

        fn write32(&self, _reg: u32, val: u32) {
            *self.0.lock() = val;
        }

        fn flush(&self) {}
    }

    #[test]
    fn psm_clock_from_register() {
        let io = OneReg(Mutex::new(0));
        assert_eq!(PsmClock::read(&io), PsmClock::Mhz367);

        io.write32(CLKSTAT_SRC, 0xffff_ff0f | (2 << 4));
        assert_eq!(PsmClock::read(&io), PsmClock::Mhz446);
        assert_eq!(PsmClock::read(&io).hz(), 446_428_571);

        io.write32(CLKSTAT_SRC, 3 << 4);
        assert_eq!(PsmClock::read(&io), PsmClock::Mhz390);
    }
}
