use tracing::{debug, warn};

use nicctl_wire::{
    sched::{ElemType, TxSchedElem, TxSchedElemData},
    txq::{AddTxqEntry, AddTxqGroup, DisTxqGroup, TXQ_CTX_LEN},
};

use super::{Owner, Port};
use crate::{aq::Firmware, tree::dflt_elem, tree::NodeId, CommandTransport, SchedError};

impl Port {
    /// Queue group of the VSI with room for another queue of `owner`, preferring the
    /// group with the fewest queues.
    pub(crate) fn free_qparent(&self, vsi: u16, tc: u8, owner: Owner) -> Option<NodeId> {
        let (vsil, qgl) = (self.tree.layers.vsi(), self.tree.layers.qgrp());
        let vsi_node = self.tree.vsi_node(tc, vsi)?;
        if qgl == vsil {
            return Some(vsi_node);
        }

        self.tree
            .chain(tc, qgl)
            .filter(|id| {
                self.tree[*id].owner == owner && self.tree.has_room(*id) && self.tree.in_subtree(vsi_node, *id)
            })
            .min_by_key(|id| self.tree[*id].children.len())
    }

    /// Creates the Tx queue `q_handle` of the VSI in firmware and links its leaf. Saved
    /// bandwidth of the queue is applied to the new leaf.
    pub(crate) fn ena_txq<T: CommandTransport>(
        &mut self,
        fw: &Firmware<T>,
        vsi: u16,
        tc: u8,
        q_handle: u16,
        txq_id: u16,
        txq_ctx: [u8; TXQ_CTX_LEN],
    ) -> Result<u32, SchedError> {
        let ctx = self.vsis.get(&vsi).ok_or(SchedError::Param("unknown VSI"))?;
        let saved = ctx
            .lan_q
            .get(tc as usize)
            .and_then(|q| q.get(q_handle as usize))
            .ok_or(SchedError::Param("queue handle out of range"))?
            .bw;

        let parent = self.free_qparent(vsi, tc, Owner::Lan).ok_or(SchedError::Param("no queue group with room"))?;
        let parent_teid = self.tree[parent].teid();

        let info = TxSchedElem { elem_type: 0, ..dflt_elem(ElemType::Leaf) };
        let req = AddTxqGroup { parent_teid, txqs: vec![AddTxqEntry { txq_id, q_teid: 0, txq_ctx, info }] };
        let resp = fw.add_txqs(&req)?;
        let q_teid = resp.txqs.first().map(|q| q.q_teid).ok_or(SchedError::Cfg("queue not added"))?;

        let elem = TxSchedElemData { parent_teid, node_teid: q_teid, data: dflt_elem(ElemType::Leaf) };
        let leaf = match self.tree.add_node(fw, self.tree.layers.leaf(), &elem, None) {
            Ok(leaf) => leaf,
            Err(e) => {
                if let Err(dis) = fw.dis_txqs(&DisTxqGroup { parent_teid, q_ids: vec![txq_id] }) {
                    warn!(txq_id, teid = q_teid, error = %dis, "could not stop unlinked Tx queue");
                }
                return Err(e);
            }
        };

        if let Some(q) = self.vsis.get_mut(&vsi).and_then(|c| c.lan_q[tc as usize].get_mut(q_handle as usize)) {
            q.handle = Some(q_handle);
            q.teid = q_teid;
            q.txq_id = txq_id;
        }
        debug!(vsi, tc, q_handle, txq_id, teid = q_teid, "enabled Tx queue");

        self.tree.replay_node_bw(fw, &mut self.pool, leaf, &saved)?;
        Ok(q_teid)
    }

    /// Stops the Tx queue `q_handle` of the VSI and unlinks its leaf.
    pub(crate) fn dis_txq<T: CommandTransport>(
        &mut self,
        fw: &Firmware<T>,
        vsi: u16,
        tc: u8,
        q_handle: u16,
    ) -> Result<(), SchedError> {
        let q = self
            .vsis
            .get(&vsi)
            .and_then(|c| c.lan_q.get(tc as usize))
            .and_then(|q| q.get(q_handle as usize))
            .copied()
            .filter(|q| q.handle == Some(q_handle))
            .ok_or(SchedError::DoesNotExist)?;
        let leaf = self.tree.find_by_teid(q.teid).ok_or(SchedError::DoesNotExist)?;

        let parent_teid = self.tree[leaf].info.parent_teid;
        fw.dis_txqs(&DisTxqGroup { parent_teid, q_ids: vec![q.txq_id] })?;
        self.tree.free_node(fw, leaf)?;

        if let Some(q) = self.vsis.get_mut(&vsi).and_then(|c| c.lan_q[tc as usize].get_mut(q_handle as usize)) {
            q.handle = None;
        }
        debug!(vsi, tc, q_handle, "disabled Tx queue");
        Ok(())
    }
}
