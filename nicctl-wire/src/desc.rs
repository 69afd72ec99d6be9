use bytes::{Buf, BufMut};

use crate::{ensure_len, Error, Opcode, ReturnCode};

/// Size of a control queue descriptor in bytes.
pub const DESC_LEN: usize = 32;

/// Descriptor flag bits.
pub mod flags {
    /// Descriptor done, written back by firmware.
    pub const DD: u16 = 1 << 0;
    /// Command completed.
    pub const CMP: u16 = 1 << 1;
    /// Command or event error.
    pub const ERR: u16 = 1 << 2;
    pub const VFE: u16 = 1 << 3;
    /// Large buffer (more than 512 bytes).
    pub const LB: u16 = 1 << 9;
    /// Firmware reads the attached buffer.
    pub const RD: u16 = 1 << 10;
    pub const VFC: u16 = 1 << 11;
    /// An indirect buffer is attached.
    pub const BUF: u16 = 1 << 12;
    /// Don't interrupt on completion.
    pub const SI: u16 = 1 << 13;
    pub const EI: u16 = 1 << 14;
    pub const FE: u16 = 1 << 15;
}

/// Offset of the buffer address inside the params of every indirect command.
const ADDR_HIGH: usize = 8;
const ADDR_LOW: usize = 12;

/// The 16 opcode-specific bytes of a descriptor.
///
/// Accessors silently ignore out-of-range offsets (reads return zero), command layouts
/// only ever use the fixed offsets they define.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Params(pub [u8; 16]);

impl Params {
    pub fn u8_at(&self, off: usize) -> u8 {
        self.0.get(off).copied().unwrap_or_default()
    }

    pub fn u16_at(&self, off: usize) -> u16 {
        self.0.get(off..off + 2).map(|mut b| b.get_u16_le()).unwrap_or_default()
    }

    pub fn u32_at(&self, off: usize) -> u32 {
        self.0.get(off..off + 4).map(|mut b| b.get_u32_le()).unwrap_or_default()
    }

    pub fn set_u8(&mut self, off: usize, val: u8) {
        if let Some(b) = self.0.get_mut(off) {
            *b = val;
        }
    }

    pub fn set_u16(&mut self, off: usize, val: u16) {
        if let Some(b) = self.0.get_mut(off..off + 2) {
            b.copy_from_slice(&val.to_le_bytes());
        }
    }

    pub fn set_u32(&mut self, off: usize, val: u32) {
        if let Some(b) = self.0.get_mut(off..off + 4) {
            b.copy_from_slice(&val.to_le_bytes());
        }
    }

    /// The DMA address of the indirect buffer.
    pub fn addr(&self) -> u64 {
        (u64::from(self.u32_at(ADDR_HIGH)) << 32) | u64::from(self.u32_at(ADDR_LOW))
    }

    pub fn set_addr(&mut self, pa: u64) {
        self.set_u32(ADDR_HIGH, (pa >> 32) as u32);
        self.set_u32(ADDR_LOW, pa as u32);
    }
}

/// A control queue descriptor.
///
/// ```text
/// struct ice_aq_desc {
///     __le16 flags;
///     __le16 opcode;
///     __le16 datalen;
///     __le16 retval;
///     __le32 cookie_high;
///     __le32 cookie_low;
///     u8 params[16];
/// };
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Descriptor {
    pub flags: u16,
    pub opcode: u16,
    /// Length of the attached buffer.
    pub datalen: u16,
    /// Firmware return code, the high byte is internal to firmware.
    pub retval: u16,
    /// Opaque round-trip cookies, never interpreted.
    pub cookie_high: u32,
    pub cookie_low: u32,
    pub params: Params,
}

impl Descriptor {
    /// A descriptor for a direct command with the default flags.
    pub fn new(opcode: Opcode) -> Self {
        Self { flags: flags::SI, opcode: opcode as u16, ..Default::default() }
    }

    /// A descriptor for an indirect command whose buffer firmware reads.
    pub fn with_read_buf(opcode: Opcode) -> Self {
        let mut desc = Self::new(opcode);
        desc.flags |= flags::RD;
        desc
    }

    /// Returns the typed opcode, if known.
    pub fn opcode(&self) -> Result<Opcode, Error> {
        Opcode::try_from(self.opcode).map_err(Error::Opcode)
    }

    /// Returns the return code with the firmware-internal high byte stripped.
    pub fn return_code(&self) -> ReturnCode {
        ReturnCode::from_raw(self.retval)
    }

    #[inline]
    pub fn has_flag(&self, flag: u16) -> bool {
        self.flags & flag != 0
    }

    pub fn encode<B: BufMut>(&self, dst: &mut B) {
        dst.put_u16_le(self.flags);
        dst.put_u16_le(self.opcode);
        dst.put_u16_le(self.datalen);
        dst.put_u16_le(self.retval);
        dst.put_u32_le(self.cookie_high);
        dst.put_u32_le(self.cookie_low);
        dst.put_slice(&self.params.0);
    }

    pub fn decode<B: Buf>(src: &mut B) -> Result<Self, Error> {
        ensure_len(src.remaining(), DESC_LEN)?;

        let flags = src.get_u16_le();
        let opcode = src.get_u16_le();
        let datalen = src.get_u16_le();
        let retval = src.get_u16_le();
        let cookie_high = src.get_u32_le();
        let cookie_low = src.get_u32_le();
        let mut params = Params::default();
        src.copy_to_slice(&mut params.0);

        Ok(Self { flags, opcode, datalen, retval, cookie_high, cookie_low, params })
    }

    pub fn to_bytes(&self) -> [u8; DESC_LEN] {
        let mut out = [0u8; DESC_LEN];
        self.encode(&mut &mut out[..]);
        out
    }

    pub fn from_bytes(mut bytes: &[u8]) -> Result<Self, Error> {
        Self::decode(&mut bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_matches_firmware() {
        let mut desc = Descriptor::with_read_buf(Opcode::AddSchedElems);
        desc.datalen = 0x30;
        desc.retval = 0x0102;
        desc.cookie_low = 0xdead_beef;
        desc.params.set_u16(0, 3);
        desc.params.set_addr(0x1122_3344_5566_7788);

        let bytes = desc.to_bytes();
        assert_eq!(&bytes[0..2], &(flags::SI | flags::RD).to_le_bytes());
        assert_eq!(&bytes[2..4], &0x0401u16.to_le_bytes());
        assert_eq!(&bytes[4..6], &0x30u16.to_le_bytes());
        assert_eq!(&bytes[12..16], &0xdead_beefu32.to_le_bytes());
        assert_eq!(&bytes[16..18], &3u16.to_le_bytes());
        assert_eq!(&bytes[24..28], &0x1122_3344u32.to_le_bytes());
        assert_eq!(&bytes[28..32], &0x5566_7788u32.to_le_bytes());

        let decoded = Descriptor::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, desc);
        assert_eq!(decoded.params.addr(), 0x1122_3344_5566_7788);
    }

    #[test]
    fn return_code_strips_internal_byte() {
        let desc = Descriptor { retval: 0xab00, ..Default::default() };
        assert_eq!(desc.return_code(), ReturnCode::Ok);

        let desc = Descriptor { retval: 0xab0c, ..Default::default() };
        assert_eq!(desc.return_code(), ReturnCode::Busy);
    }

    #[test]
    fn short_buffer_is_rejected() {
        let err = Descriptor::from_bytes(&[0u8; 16]).unwrap_err();
        assert_eq!(err, Error::Short { need: DESC_LEN, have: 16 });
    }

    #[test]
    fn params_ignore_out_of_range() {
        let mut params = Params::default();
        params.set_u32(14, 0xffff_ffff);
        assert_eq!(params.u32_at(14), 0);
        assert_eq!(params, Params::default());
    }
}
