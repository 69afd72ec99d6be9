//! Scheduler commands, one method per admin queue opcode.
use tracing::trace;

use nicctl_common::constants::{AQ_MAX_BUF_LEN, MAX_TOPO_LAYERS};
use nicctl_wire::{
    decode_list, encode_list,
    rl::{profile_cmd, RlProfileElem},
    sched::{
        elem_cmd, node_attr_cmd, node_to_root_cmd, put_teids, topo_cmd, ElemGroup,
        MoveGroup, NodeAttr, SchedResources, TeidGroup, TopoBranch, TxSchedElemData,
    },
    txq::{txq_cmd, AddTxqGroup, DisTxqGroup},
    Descriptor, Opcode, Payload,
};

use crate::{CommandTransport, SchedError, SchedStats};

/// Typed access to the firmware scheduler commands over a [`CommandTransport`].
#[derive(Debug)]
pub(crate) struct Firmware<T> {
    transport: T,
    stats: SchedStats,
}

impl<T: CommandTransport> Firmware<T> {
    pub(crate) fn new(transport: T) -> Self {
        Self { transport, stats: SchedStats::default() }
    }

    pub(crate) fn transport(&self) -> &T {
        &self.transport
    }

    pub(crate) fn stats(&self) -> &SchedStats {
        &self.stats
    }

    fn send(&self, desc: &mut Descriptor, buf: Option<&mut [u8]>) -> Result<(), SchedError> {
        self.stats.increment_commands();
        trace!(opcode = desc.opcode, "sending scheduler command");
        self.transport.send_command(desc, buf).map_err(|e| {
            self.stats.increment_cmd_errors();
            SchedError::from(e)
        })
    }

    /// Reads the default topology of `port`, one branch per traffic class.
    pub(crate) fn get_dflt_topo(&self, port: u8) -> Result<Vec<TopoBranch>, SchedError> {
        let mut desc = Descriptor::new(Opcode::GetDfltTopo);
        desc.params.set_u8(topo_cmd::PORT_NUM, port);
        let mut buf = vec![0u8; AQ_MAX_BUF_LEN];
        self.send(&mut desc, Some(&mut buf))?;

        let num_branches = desc.params.u8_at(topo_cmd::NUM_BRANCHES) as usize;
        Ok(TopoBranch::decode_all(&buf, num_branches)?)
    }

    pub(crate) fn query_sched_res(&self) -> Result<SchedResources, SchedError> {
        let mut desc = Descriptor::new(Opcode::QuerySchedRes);
        let mut buf = vec![0u8; SchedResources::LEN];
        self.send(&mut desc, Some(&mut buf))?;
        Ok(SchedResources::decode(&buf)?)
    }

    /// Adds one group of elements. Returns the group as written back by firmware, with
    /// the new TEIDs filled in, and the number of groups added.
    pub(crate) fn add_elems(&self, group: &ElemGroup) -> Result<(ElemGroup, u16), SchedError> {
        let mut desc = Descriptor::with_read_buf(Opcode::AddSchedElems);
        desc.params.set_u16(elem_cmd::NUM_ELEM_REQ, 1);
        let mut buf = group.encode();
        self.send(&mut desc, Some(&mut buf[..]))?;

        let added = desc.params.u16_at(elem_cmd::NUM_ELEM_RESP);
        self.stats.increment_nodes_added(group.elems.len() * added as usize);
        Ok((ElemGroup::decode(&buf)?, added))
    }

    /// Reads back the firmware copy of the given elements.
    pub(crate) fn query_elems(&self, teids: &[u32]) -> Result<Vec<TxSchedElemData>, SchedError> {
        let req: Vec<_> =
            teids.iter().map(|teid| TxSchedElemData { node_teid: *teid, ..Default::default() }).collect();
        let mut desc = Descriptor::with_read_buf(Opcode::GetSchedElems);
        desc.params.set_u16(elem_cmd::NUM_ELEM_REQ, teids.len() as u16);
        let mut buf = encode_list(&req);
        self.send(&mut desc, Some(&mut buf[..]))?;

        let found = (desc.params.u16_at(elem_cmd::NUM_ELEM_RESP) as usize).min(teids.len());
        Ok(decode_list(&mut &buf[..], found)?)
    }

    /// Configures elements. Returns the number of elements firmware accepted.
    pub(crate) fn cfg_elems(&self, elems: &[TxSchedElemData]) -> Result<u16, SchedError> {
        let mut desc = Descriptor::with_read_buf(Opcode::CfgSchedElems);
        desc.params.set_u16(elem_cmd::NUM_ELEM_REQ, elems.len() as u16);
        let mut buf = encode_list(elems);
        self.send(&mut desc, Some(&mut buf[..]))?;
        Ok(desc.params.u16_at(elem_cmd::NUM_ELEM_RESP))
    }

    /// Moves one group of elements. Returns the number of groups moved.
    pub(crate) fn move_elems(&self, group: &MoveGroup) -> Result<u16, SchedError> {
        let mut desc = Descriptor::with_read_buf(Opcode::MoveSchedElems);
        desc.params.set_u16(elem_cmd::NUM_ELEM_REQ, 1);
        let mut buf = group.encode();
        self.send(&mut desc, Some(&mut buf[..]))?;
        Ok(desc.params.u16_at(elem_cmd::NUM_ELEM_RESP))
    }

    pub(crate) fn suspend_resume(&self, teids: &[u32], suspend: bool) -> Result<(), SchedError> {
        let opcode = if suspend { Opcode::SuspendSchedElems } else { Opcode::ResumeSchedElems };
        let mut desc = Descriptor::with_read_buf(opcode);
        desc.params.set_u16(elem_cmd::NUM_ELEM_REQ, teids.len() as u16);
        let mut buf = Vec::with_capacity(teids.len() * 4);
        put_teids(&mut buf, teids);
        self.send(&mut desc, Some(&mut buf))?;

        let done = desc.params.u16_at(elem_cmd::NUM_ELEM_RESP) as usize;
        if done != teids.len() {
            return Err(SchedError::Cfg("suspend/resume incomplete"));
        }
        Ok(())
    }

    /// Deletes one group of elements. Returns the number of groups deleted.
    pub(crate) fn delete_elems(&self, group: &TeidGroup) -> Result<u16, SchedError> {
        let mut desc = Descriptor::with_read_buf(Opcode::DeleteSchedElems);
        desc.params.set_u16(elem_cmd::NUM_ELEM_REQ, 1);
        let mut buf = group.encode();
        self.send(&mut desc, Some(&mut buf[..]))?;

        let deleted = desc.params.u16_at(elem_cmd::NUM_ELEM_RESP);
        if deleted == 1 {
            self.stats.increment_nodes_removed(group.teids.len());
        }
        Ok(deleted)
    }

    /// Creates a profile. The returned element carries the firmware assigned id.
    pub(crate) fn add_rl_profile(&self, profile: &RlProfileElem) -> Result<RlProfileElem, SchedError> {
        let mut desc = Descriptor::with_read_buf(Opcode::AddRlProfiles);
        desc.params.set_u16(profile_cmd::NUM_PROFILES, 1);
        let mut buf = encode_list([profile]);
        self.send(&mut desc, Some(&mut buf[..]))?;

        if desc.params.u16_at(profile_cmd::NUM_PROCESSED) != 1 {
            return Err(SchedError::Cfg("rate limiter profile not added"));
        }
        self.stats.increment_profiles_added();
        Ok(RlProfileElem::decode(&mut &buf[..])?)
    }

    pub(crate) fn remove_rl_profile(&self, profile: &RlProfileElem) -> Result<(), SchedError> {
        let mut desc = Descriptor::with_read_buf(Opcode::RemoveRlProfiles);
        desc.params.set_u16(profile_cmd::NUM_PROFILES, 1);
        let mut buf = encode_list([profile]);
        self.send(&mut desc, Some(&mut buf[..]))?;

        if desc.params.u16_at(profile_cmd::NUM_PROCESSED) != 1 {
            return Err(SchedError::Cfg("rate limiter profile not removed"));
        }
        self.stats.increment_profiles_removed();
        Ok(())
    }

    /// Reads back the firmware copy of the given profiles, matched by layer and id.
    pub(crate) fn query_rl_profiles(&self, profiles: &[RlProfileElem]) -> Result<Vec<RlProfileElem>, SchedError> {
        let mut desc = Descriptor::with_read_buf(Opcode::QueryRlProfiles);
        desc.params.set_u16(profile_cmd::NUM_PROFILES, profiles.len() as u16);
        let mut buf = encode_list(profiles);
        self.send(&mut desc, Some(&mut buf[..]))?;
        Ok(decode_list(&mut &buf[..], profiles.len())?)
    }

    /// Returns the path from `teid` up to the root, the node itself first.
    pub(crate) fn query_node_to_root(&self, teid: u32) -> Result<Vec<TxSchedElemData>, SchedError> {
        let mut desc = Descriptor::new(Opcode::QueryNodeToRoot);
        desc.params.set_u32(node_to_root_cmd::TEID, teid);
        let mut buf = vec![0u8; MAX_TOPO_LAYERS as usize * TxSchedElemData::LEN];
        self.send(&mut desc, Some(&mut buf))?;

        let count = (desc.params.u16_at(node_to_root_cmd::NUM_NODES) as usize).min(MAX_TOPO_LAYERS as usize);
        Ok(decode_list(&mut &buf[..], count)?)
    }

    pub(crate) fn cfg_node_attr(&self, attrs: &[NodeAttr]) -> Result<(), SchedError> {
        let mut desc = Descriptor::with_read_buf(Opcode::CfgNodeAttr);
        desc.params.set_u16(node_attr_cmd::NUM_ENTRIES, attrs.len() as u16);
        let mut buf = encode_list(attrs);
        self.send(&mut desc, Some(&mut buf[..]))
    }

    /// Adds one group of Tx queues. The returned group carries the queue TEIDs.
    pub(crate) fn add_txqs(&self, group: &AddTxqGroup) -> Result<AddTxqGroup, SchedError> {
        let mut desc = Descriptor::with_read_buf(Opcode::AddTxqs);
        desc.params.set_u8(txq_cmd::NUM_QGRPS, 1);
        let mut buf = group.encode();
        self.send(&mut desc, Some(&mut buf[..]))?;
        Ok(AddTxqGroup::decode(&buf)?)
    }

    pub(crate) fn dis_txqs(&self, group: &DisTxqGroup) -> Result<(), SchedError> {
        let mut desc = Descriptor::with_read_buf(Opcode::DisTxqs);
        desc.params.set_u8(txq_cmd::NUM_ENTRIES, 1);
        let mut buf = group.encode();
        self.send(&mut desc, Some(&mut buf[..]))
    }
}
