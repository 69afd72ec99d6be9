//! Rate limiter profile payloads.
use bytes::{Buf, BufMut};

use crate::{Error, Payload};

/// Rate limiter profile types, stored in the low bits of [`RlProfileElem::flags`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum RlType {
    /// Committed information rate.
    Cir = 0,
    /// Excess information rate.
    Eir = 1,
    /// Shared rate limiter.
    Srl = 2,
}

impl RlType {
    pub const ALL: [RlType; 3] = [RlType::Cir, RlType::Eir, RlType::Srl];

    pub const fn index(&self) -> usize {
        *self as usize
    }
}

impl TryFrom<u8> for RlType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value & PROFILE_TYPE_M {
            0 => Ok(RlType::Cir),
            1 => Ok(RlType::Eir),
            2 => Ok(RlType::Srl),
            other => Err(other),
        }
    }
}

pub const PROFILE_TYPE_M: u8 = 0x3;
/// Profile is not valid.
pub const PROFILE_INVAL: u8 = 1 << 7;

/// One rate limiter profile as exchanged with firmware.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RlProfileElem {
    /// Scheduler layer plus one.
    pub level: u8,
    pub flags: u8,
    pub profile_id: u16,
    pub max_burst_size: u16,
    pub rl_multiply: u16,
    pub wake_up_calc: u16,
    pub rl_encode: u16,
}

impl RlProfileElem {
    pub fn rl_type(&self) -> Result<RlType, u8> {
        RlType::try_from(self.flags)
    }
}

impl Payload for RlProfileElem {
    const LEN: usize = 12;

    fn encode<B: BufMut>(&self, dst: &mut B) {
        dst.put_u8(self.level);
        dst.put_u8(self.flags);
        dst.put_u16_le(self.profile_id);
        dst.put_u16_le(self.max_burst_size);
        dst.put_u16_le(self.rl_multiply);
        dst.put_u16_le(self.wake_up_calc);
        dst.put_u16_le(self.rl_encode);
    }

    fn decode<B: Buf>(src: &mut B) -> Result<Self, Error> {
        Ok(Self {
            level: src.get_u8(),
            flags: src.get_u8(),
            profile_id: src.get_u16_le(),
            max_burst_size: src.get_u16_le(),
            rl_multiply: src.get_u16_le(),
            wake_up_calc: src.get_u16_le(),
            rl_encode: src.get_u16_le(),
        })
    }
}

/// Param offsets of the add, query and remove profile commands.
pub mod profile_cmd {
    pub const NUM_PROFILES: usize = 0;
    pub const NUM_PROCESSED: usize = 2;
}
