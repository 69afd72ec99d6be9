//! Scheduler element payloads.
use bytes::{Buf, BufMut, BytesMut};

use crate::{decode_list, ensure_len, Error, Payload};
use nicctl_common::constants::MAX_TOPO_LAYERS;

/// Scheduler element types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ElemType {
    Undefined = 0,
    RootPort = 1,
    Tc = 2,
    SeGeneric = 3,
    EntryPoint = 4,
    Leaf = 5,
    SePadded = 6,
}

impl TryFrom<u8> for ElemType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ElemType::Undefined),
            1 => Ok(ElemType::RootPort),
            2 => Ok(ElemType::Tc),
            3 => Ok(ElemType::SeGeneric),
            4 => Ok(ElemType::EntryPoint),
            5 => Ok(ElemType::Leaf),
            6 => Ok(ElemType::SePadded),
            _ => Err(value),
        }
    }
}

/// Bits of [`TxSchedElem::valid_sections`].
pub mod valid {
    pub const GENERIC: u8 = 1 << 0;
    pub const CIR: u8 = 1 << 1;
    pub const EIR: u8 = 1 << 2;
    pub const SHARED: u8 = 1 << 3;
}

/// Layout of [`TxSchedElem::generic`].
pub mod generic {
    pub const PRIO_S: u8 = 1;
    pub const PRIO_M: u8 = 0x7 << PRIO_S;
    pub const SP_S: u8 = 4;
    /// Strict priority when set, WFQ otherwise.
    pub const SP_M: u8 = 1 << SP_S;
}

/// Element is suspended.
pub const ELEM_FLAG_SUSPEND: u8 = 1 << 0;

/// Rate limiter reference of one element.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ElemInfoBw {
    pub profile_idx: u16,
    pub bw_alloc: u16,
}

impl Payload for ElemInfoBw {
    const LEN: usize = 4;

    fn encode<B: BufMut>(&self, dst: &mut B) {
        dst.put_u16_le(self.profile_idx);
        dst.put_u16_le(self.bw_alloc);
    }

    fn decode<B: Buf>(src: &mut B) -> Result<Self, Error> {
        Ok(Self { profile_idx: src.get_u16_le(), bw_alloc: src.get_u16_le() })
    }
}

/// Configuration of one scheduler element.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TxSchedElem {
    pub elem_type: u8,
    pub valid_sections: u8,
    pub generic: u8,
    pub flags: u8,
    pub cir: ElemInfoBw,
    pub eir: ElemInfoBw,
    pub srl_id: u16,
    pub reserved: u16,
}

impl TxSchedElem {
    /// Returns the typed element type.
    pub fn elem_type(&self) -> Result<ElemType, Error> {
        ElemType::try_from(self.elem_type).map_err(Error::ElemType)
    }

    /// The priority stored in the generic byte.
    pub fn priority(&self) -> u8 {
        (self.generic & generic::PRIO_M) >> generic::PRIO_S
    }

    pub fn is_suspended(&self) -> bool {
        self.flags & ELEM_FLAG_SUSPEND != 0
    }
}

impl Payload for TxSchedElem {
    const LEN: usize = 16;

    fn encode<B: BufMut>(&self, dst: &mut B) {
        dst.put_u8(self.elem_type);
        dst.put_u8(self.valid_sections);
        dst.put_u8(self.generic);
        dst.put_u8(self.flags);
        self.cir.encode(dst);
        self.eir.encode(dst);
        dst.put_u16_le(self.srl_id);
        dst.put_u16_le(self.reserved);
    }

    fn decode<B: Buf>(src: &mut B) -> Result<Self, Error> {
        Ok(Self {
            elem_type: src.get_u8(),
            valid_sections: src.get_u8(),
            generic: src.get_u8(),
            flags: src.get_u8(),
            cir: ElemInfoBw::decode(src)?,
            eir: ElemInfoBw::decode(src)?,
            srl_id: src.get_u16_le(),
            reserved: src.get_u16_le(),
        })
    }
}

/// An element together with its position in the tree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TxSchedElemData {
    pub parent_teid: u32,
    pub node_teid: u32,
    pub data: TxSchedElem,
}

impl Payload for TxSchedElemData {
    const LEN: usize = 24;

    fn encode<B: BufMut>(&self, dst: &mut B) {
        dst.put_u32_le(self.parent_teid);
        dst.put_u32_le(self.node_teid);
        self.data.encode(dst);
    }

    fn decode<B: Buf>(src: &mut B) -> Result<Self, Error> {
        Ok(Self {
            parent_teid: src.get_u32_le(),
            node_teid: src.get_u32_le(),
            data: TxSchedElem::decode(src)?,
        })
    }
}

/// Header of a group of elements sharing a parent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TopoGroupHeader {
    pub parent_teid: u32,
    pub num_elems: u16,
    pub reserved: u16,
}

impl Payload for TopoGroupHeader {
    const LEN: usize = 8;

    fn encode<B: BufMut>(&self, dst: &mut B) {
        dst.put_u32_le(self.parent_teid);
        dst.put_u16_le(self.num_elems);
        dst.put_u16_le(self.reserved);
    }

    fn decode<B: Buf>(src: &mut B) -> Result<Self, Error> {
        Ok(Self { parent_teid: src.get_u32_le(), num_elems: src.get_u16_le(), reserved: src.get_u16_le() })
    }
}

/// Buffer of the add and get element commands: a header and the elements.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ElemGroup {
    pub parent_teid: u32,
    pub elems: Vec<TxSchedElemData>,
}

impl ElemGroup {
    pub fn encoded_len(&self) -> usize {
        TopoGroupHeader::LEN + self.elems.len() * TxSchedElemData::LEN
    }

    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        TopoGroupHeader { parent_teid: self.parent_teid, num_elems: self.elems.len() as u16, reserved: 0 }
            .encode(&mut buf);
        for elem in &self.elems {
            elem.encode(&mut buf);
        }
        buf
    }

    pub fn decode(mut src: &[u8]) -> Result<Self, Error> {
        ensure_len(src.remaining(), TopoGroupHeader::LEN)?;
        let hdr = TopoGroupHeader::decode(&mut src)?;
        let elems = decode_list(&mut src, hdr.num_elems as usize)?;
        Ok(Self { parent_teid: hdr.parent_teid, elems })
    }
}

/// Buffer of the delete element command: a header and the TEIDs to delete.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TeidGroup {
    pub parent_teid: u32,
    pub teids: Vec<u32>,
}

impl TeidGroup {
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(TopoGroupHeader::LEN + self.teids.len() * 4);
        TopoGroupHeader { parent_teid: self.parent_teid, num_elems: self.teids.len() as u16, reserved: 0 }
            .encode(&mut buf);
        put_teids(&mut buf, &self.teids);
        buf
    }

    pub fn decode(mut src: &[u8]) -> Result<Self, Error> {
        ensure_len(src.remaining(), TopoGroupHeader::LEN)?;
        let hdr = TopoGroupHeader::decode(&mut src)?;
        let teids = get_teids(&mut src, hdr.num_elems as usize)?;
        Ok(Self { parent_teid: hdr.parent_teid, teids })
    }
}

/// Buffer of the move element command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MoveGroup {
    pub src_parent_teid: u32,
    pub dest_parent_teid: u32,
    pub flags: u8,
    pub teids: Vec<u32>,
}

impl MoveGroup {
    const HDR_LEN: usize = 12;

    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(Self::HDR_LEN + self.teids.len() * 4);
        buf.put_u32_le(self.src_parent_teid);
        buf.put_u32_le(self.dest_parent_teid);
        buf.put_u16_le(self.teids.len() as u16);
        buf.put_u8(self.flags);
        buf.put_u8(0);
        put_teids(&mut buf, &self.teids);
        buf
    }

    pub fn decode(mut src: &[u8]) -> Result<Self, Error> {
        ensure_len(src.remaining(), Self::HDR_LEN)?;
        let src_parent_teid = src.get_u32_le();
        let dest_parent_teid = src.get_u32_le();
        let num_elems = src.get_u16_le() as usize;
        let flags = src.get_u8();
        src.advance(1);
        let teids = get_teids(&mut src, num_elems)?;
        Ok(Self { src_parent_teid, dest_parent_teid, flags, teids })
    }
}

/// One branch of the default topology, root first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopoBranch {
    pub elems: Vec<TxSchedElemData>,
}

impl TopoBranch {
    /// Every branch occupies a fixed slot of one header and nine elements.
    pub const LEN: usize = TopoGroupHeader::LEN + MAX_TOPO_LAYERS as usize * TxSchedElemData::LEN;

    pub fn encode<B: BufMut>(&self, dst: &mut B) {
        let parent_teid = self.elems.first().map(|e| e.parent_teid).unwrap_or_default();
        TopoGroupHeader { parent_teid, num_elems: self.elems.len() as u16, reserved: 0 }.encode(dst);
        for i in 0..MAX_TOPO_LAYERS as usize {
            self.elems.get(i).copied().unwrap_or_default().encode(dst);
        }
    }

    pub fn decode<B: Buf>(src: &mut B) -> Result<Self, Error> {
        ensure_len(src.remaining(), Self::LEN)?;
        let hdr = TopoGroupHeader::decode(src)?;
        let count = hdr.num_elems as usize;
        if count > MAX_TOPO_LAYERS as usize {
            return Err(Error::Count { count, max: MAX_TOPO_LAYERS as usize });
        }

        let mut elems = decode_list::<TxSchedElemData, _>(src, MAX_TOPO_LAYERS as usize)?;
        elems.truncate(count);
        Ok(Self { elems })
    }

    /// Decodes `count` consecutive branches.
    pub fn decode_all(mut src: &[u8], count: usize) -> Result<Vec<Self>, Error> {
        (0..count).map(|_| Self::decode(&mut src)).collect()
    }
}

/// Scheduler-wide properties returned by the resource query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GenericSchedProps {
    pub phys_levels: u16,
    pub logical_levels: u16,
    pub flattening_bitmap: u8,
    pub max_device_cgds: u8,
    pub max_pf_cgds: u8,
    pub rdma_qsets: u16,
}

impl Payload for GenericSchedProps {
    const LEN: usize = 32;

    fn encode<B: BufMut>(&self, dst: &mut B) {
        dst.put_u16_le(self.phys_levels);
        dst.put_u16_le(self.logical_levels);
        dst.put_u8(self.flattening_bitmap);
        dst.put_u8(self.max_device_cgds);
        dst.put_u8(self.max_pf_cgds);
        dst.put_u8(0);
        dst.put_u16_le(self.rdma_qsets);
        dst.put_bytes(0, 22);
    }

    fn decode<B: Buf>(src: &mut B) -> Result<Self, Error> {
        let phys_levels = src.get_u16_le();
        let logical_levels = src.get_u16_le();
        let flattening_bitmap = src.get_u8();
        let max_device_cgds = src.get_u8();
        let max_pf_cgds = src.get_u8();
        src.advance(1);
        let rdma_qsets = src.get_u16_le();
        src.advance(22);
        Ok(Self { phys_levels, logical_levels, flattening_bitmap, max_device_cgds, max_pf_cgds, rdma_qsets })
    }
}

/// Properties of one scheduler layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LayerProps {
    pub logical_layer: u8,
    pub chunk_size: u8,
    pub max_device_nodes: u16,
    pub max_pf_nodes: u16,
    /// Maximum number of children of a node one layer up.
    pub max_sibl_grp_sz: u16,
    pub max_cir_rl_profiles: u16,
    pub max_eir_rl_profiles: u16,
    pub max_srl_profiles: u16,
}

impl Payload for LayerProps {
    const LEN: usize = 32;

    fn encode<B: BufMut>(&self, dst: &mut B) {
        dst.put_u8(self.logical_layer);
        dst.put_u8(self.chunk_size);
        dst.put_u16_le(self.max_device_nodes);
        dst.put_u16_le(self.max_pf_nodes);
        dst.put_bytes(0, 4);
        dst.put_u16_le(self.max_sibl_grp_sz);
        dst.put_u16_le(self.max_cir_rl_profiles);
        dst.put_u16_le(self.max_eir_rl_profiles);
        dst.put_u16_le(self.max_srl_profiles);
        dst.put_bytes(0, 14);
    }

    fn decode<B: Buf>(src: &mut B) -> Result<Self, Error> {
        let logical_layer = src.get_u8();
        let chunk_size = src.get_u8();
        let max_device_nodes = src.get_u16_le();
        let max_pf_nodes = src.get_u16_le();
        src.advance(4);
        let max_sibl_grp_sz = src.get_u16_le();
        let max_cir_rl_profiles = src.get_u16_le();
        let max_eir_rl_profiles = src.get_u16_le();
        let max_srl_profiles = src.get_u16_le();
        src.advance(14);
        Ok(Self {
            logical_layer,
            chunk_size,
            max_device_nodes,
            max_pf_nodes,
            max_sibl_grp_sz,
            max_cir_rl_profiles,
            max_eir_rl_profiles,
            max_srl_profiles,
        })
    }
}

/// Response of the scheduler resource query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedResources {
    pub generic: GenericSchedProps,
    pub layers: Vec<LayerProps>,
}

impl SchedResources {
    pub const LEN: usize = GenericSchedProps::LEN + MAX_TOPO_LAYERS as usize * LayerProps::LEN;

    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(Self::LEN);
        self.generic.encode(&mut buf);
        for i in 0..MAX_TOPO_LAYERS as usize {
            self.layers.get(i).copied().unwrap_or_default().encode(&mut buf);
        }
        buf
    }

    /// Decodes the response, keeping the layers reported by `logical_levels`.
    pub fn decode(mut src: &[u8]) -> Result<Self, Error> {
        ensure_len(src.remaining(), Self::LEN)?;
        let generic = GenericSchedProps::decode(&mut src)?;
        let count = generic.logical_levels as usize;
        if count > MAX_TOPO_LAYERS as usize {
            return Err(Error::Count { count, max: MAX_TOPO_LAYERS as usize });
        }
        let mut layers = decode_list::<LayerProps, _>(&mut src, MAX_TOPO_LAYERS as usize)?;
        layers.truncate(count);
        Ok(Self { generic, layers })
    }
}

/// One entry of the configure node attribute command.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NodeAttr {
    pub node_teid: u32,
    pub max_children: u16,
    pub children_level: u16,
}

impl Payload for NodeAttr {
    const LEN: usize = 8;

    fn encode<B: BufMut>(&self, dst: &mut B) {
        dst.put_u32_le(self.node_teid);
        dst.put_u16_le(self.max_children);
        dst.put_u16_le(self.children_level);
    }

    fn decode<B: Buf>(src: &mut B) -> Result<Self, Error> {
        Ok(Self { node_teid: src.get_u32_le(), max_children: src.get_u16_le(), children_level: src.get_u16_le() })
    }
}

/// Writes a list of TEIDs.
pub fn put_teids<B: BufMut>(dst: &mut B, teids: &[u32]) {
    for teid in teids {
        dst.put_u32_le(*teid);
    }
}

/// Reads `count` TEIDs.
pub fn get_teids<B: Buf>(src: &mut B, count: usize) -> Result<Vec<u32>, Error> {
    ensure_len(src.remaining(), count * 4)?;
    Ok((0..count).map(|_| src.get_u32_le()).collect())
}

/// Param offsets of the scheduler element commands
/// (add, get, configure, move, suspend, resume, delete).
pub mod elem_cmd {
    pub const NUM_ELEM_REQ: usize = 0;
    pub const NUM_ELEM_RESP: usize = 2;
}

/// Param offsets of the get default topology command.
pub mod topo_cmd {
    pub const PORT_NUM: usize = 0;
    pub const NUM_BRANCHES: usize = 1;
}

/// Param offsets of the query node to root command.
pub mod node_to_root_cmd {
    pub const TEID: usize = 0;
    pub const NUM_NODES: usize = 4;
}

/// Param offsets of the configure node attribute command.
pub mod node_attr_cmd {
    pub const NUM_ENTRIES: usize = 0;
}
