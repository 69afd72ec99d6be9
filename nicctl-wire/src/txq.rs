//! Tx queue payloads.
use bytes::{Buf, BufMut, BytesMut};

use crate::{ensure_len, Error, Payload};
use crate::sched::TxSchedElem;

/// Size of the opaque Tx queue context.
pub const TXQ_CTX_LEN: usize = 22;

/// One queue of an add Tx queues group.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AddTxqEntry {
    pub txq_id: u16,
    /// Written back by firmware.
    pub q_teid: u32,
    pub txq_ctx: [u8; TXQ_CTX_LEN],
    pub info: TxSchedElem,
}

impl Payload for AddTxqEntry {
    const LEN: usize = 48;

    fn encode<B: BufMut>(&self, dst: &mut B) {
        dst.put_u16_le(self.txq_id);
        dst.put_bytes(0, 2);
        dst.put_u32_le(self.q_teid);
        dst.put_slice(&self.txq_ctx);
        dst.put_bytes(0, 2);
        self.info.encode(dst);
    }

    fn decode<B: Buf>(src: &mut B) -> Result<Self, Error> {
        let txq_id = src.get_u16_le();
        src.advance(2);
        let q_teid = src.get_u32_le();
        let mut txq_ctx = [0u8; TXQ_CTX_LEN];
        src.copy_to_slice(&mut txq_ctx);
        src.advance(2);
        let info = TxSchedElem::decode(src)?;
        Ok(Self { txq_id, q_teid, txq_ctx, info })
    }
}

/// Buffer of the add Tx queues command for a single group.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddTxqGroup {
    pub parent_teid: u32,
    pub txqs: Vec<AddTxqEntry>,
}

impl AddTxqGroup {
    const HDR_LEN: usize = 8;

    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(Self::HDR_LEN + self.txqs.len() * AddTxqEntry::LEN);
        buf.put_u32_le(self.parent_teid);
        buf.put_u8(self.txqs.len() as u8);
        buf.put_bytes(0, 3);
        for txq in &self.txqs {
            txq.encode(&mut buf);
        }
        buf
    }

    pub fn decode(mut src: &[u8]) -> Result<Self, Error> {
        ensure_len(src.remaining(), Self::HDR_LEN)?;
        let parent_teid = src.get_u32_le();
        let num_txqs = src.get_u8() as usize;
        src.advance(3);
        let txqs = crate::decode_list(&mut src, num_txqs)?;
        Ok(Self { parent_teid, txqs })
    }
}

/// Buffer of the disable Tx queues command for a single group.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DisTxqGroup {
    pub parent_teid: u32,
    pub q_ids: Vec<u16>,
}

impl DisTxqGroup {
    const HDR_LEN: usize = 6;

    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(Self::HDR_LEN + self.q_ids.len() * 2 + 2);
        buf.put_u32_le(self.parent_teid);
        buf.put_u8(self.q_ids.len() as u8);
        buf.put_u8(0);
        for id in &self.q_ids {
            buf.put_u16_le(*id);
        }
        // Groups are padded to a 4 byte boundary
        if self.q_ids.len() % 2 == 1 {
            buf.put_u16_le(0);
        }
        buf
    }

    pub fn decode(mut src: &[u8]) -> Result<Self, Error> {
        ensure_len(src.remaining(), Self::HDR_LEN)?;
        let parent_teid = src.get_u32_le();
        let num_qs = src.get_u8() as usize;
        src.advance(1);
        ensure_len(src.remaining(), num_qs * 2)?;
        let q_ids = (0..num_qs).map(|_| src.get_u16_le()).collect();
        Ok(Self { parent_teid, q_ids })
    }
}

/// Param offsets of the add and disable Tx queue commands.
pub mod txq_cmd {
    pub const NUM_QGRPS: usize = 0;
    /// Disable only: number of entries.
    pub const NUM_ENTRIES: usize = 1;
}
