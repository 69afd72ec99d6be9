use tracing::{debug, warn};

use nicctl_wire::{
    rl::RlType,
    sched::{
        generic, valid, ElemGroup, ElemInfoBw, ElemType, MoveGroup, TeidGroup, TxSchedElem,
        TxSchedElemData, ELEM_FLAG_SUSPEND,
    },
};

use super::{Node, NodeId, SchedTree};
use crate::{aq::Firmware, rl::DFLT_RL_PROF_ID, CommandTransport, SchedError, DFLT_BW_WT};

/// Element data of a freshly added node: default profiles and weights.
pub(crate) fn dflt_elem(elem_type: ElemType) -> TxSchedElem {
    let bw = ElemInfoBw { profile_idx: DFLT_RL_PROF_ID, bw_alloc: DFLT_BW_WT };
    TxSchedElem {
        elem_type: elem_type as u8,
        valid_sections: valid::GENERIC | valid::CIR | valid::EIR,
        generic: 0,
        cir: bw,
        eir: bw,
        ..Default::default()
    }
}

impl SchedTree {
    /// Links a node firmware already created. The element is read back from firmware
    /// before it is linked. Root and TC nodes take `tc` as their traffic class, all
    /// others inherit the parent's.
    pub(crate) fn add_node<T: CommandTransport>(
        &mut self,
        fw: &Firmware<T>,
        layer: u8,
        elem: &TxSchedElemData,
        tc: Option<u8>,
    ) -> Result<NodeId, SchedError> {
        let parent = self.find_by_teid(elem.parent_teid).ok_or(SchedError::Param("parent not found"))?;

        let info = fw
            .query_elems(&[elem.node_teid])?
            .into_iter()
            .next()
            .ok_or(SchedError::Cfg("element not found by firmware"))?;

        let tc_num = tc.unwrap_or(self[parent].tc_num);
        Ok(self.insert(Some(parent), Node::new(info, layer, tc_num)))
    }

    /// Adds `count` generic nodes under `parent` with a single firmware command.
    fn add_elems<T: CommandTransport>(
        &mut self,
        fw: &Firmware<T>,
        parent: NodeId,
        layer: u8,
        count: u16,
    ) -> Result<Vec<NodeId>, SchedError> {
        let parent_teid = self[parent].teid();
        let elem = TxSchedElemData { parent_teid, node_teid: 0, data: dflt_elem(ElemType::SeGeneric) };
        let req = ElemGroup { parent_teid, elems: vec![elem; count as usize] };

        let (resp, groups) = fw.add_elems(&req).map_err(|e| e.or_cfg("add elements"))?;
        if groups != 1 || resp.elems.len() != count as usize {
            warn!(parent = parent_teid, groups, "firmware did not add the node group");
            return Err(SchedError::Cfg("add elements"));
        }

        let mut added = Vec::with_capacity(resp.elems.len());
        for elem in &resp.elems {
            match self.add_node(fw, layer, elem, None) {
                Ok(id) => added.push(id),
                Err(e) => {
                    // The whole group goes, linked or not
                    for id in added {
                        self.release(id);
                    }
                    let teids = resp.elems.iter().map(|e| e.node_teid).collect();
                    if let Err(del) = fw.delete_elems(&TeidGroup { parent_teid, teids }) {
                        warn!(parent = parent_teid, err = %del, "failed to remove partially added nodes");
                    }
                    return Err(e);
                }
            }
        }

        debug!(parent = parent_teid, layer, count, "added scheduler nodes");
        Ok(added)
    }

    /// Adds `count` nodes on `layer` under `parent`, refusing to exceed its fan-out.
    ///
    /// A full TC node is a configuration error, any other full parent reports
    /// [`SchedError::MaxLimit`] so the caller can move on to the next sibling.
    pub(crate) fn add_nodes_to_hw_layer<T: CommandTransport>(
        &mut self,
        fw: &Firmware<T>,
        tc_node: NodeId,
        parent: Option<NodeId>,
        layer: u8,
        count: u16,
    ) -> Result<Vec<NodeId>, SchedError> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let Some(parent) = parent else {
            return Err(SchedError::Param("missing parent"));
        };
        if layer < self.layers.entry() || layer != self.node(parent)?.layer + 1 {
            return Err(SchedError::Param("layer"));
        }

        if self[parent].children.len() + count as usize > self.fan_out(self[parent].layer) {
            if parent == tc_node {
                return Err(SchedError::Cfg("TC node fan-out exceeded"));
            }
            return Err(SchedError::MaxLimit);
        }

        self.add_elems(fw, parent, layer, count)
    }

    /// Adds `count` nodes on `layer`, starting under `parent` and spilling over to the
    /// next parents on the sibling chain once a parent is full.
    pub(crate) fn add_nodes_to_layer<T: CommandTransport>(
        &mut self,
        fw: &Firmware<T>,
        tc_node: NodeId,
        parent: NodeId,
        layer: u8,
        count: u16,
    ) -> Result<Vec<NodeId>, SchedError> {
        let mut added = Vec::with_capacity(count as usize);
        let mut parent = Some(parent);
        let mut batch = count;

        while added.len() < count as usize {
            let Some(cur) = parent else {
                return Err(SchedError::Cfg("no parent with room left"));
            };
            match self.add_nodes_to_hw_layer(fw, tc_node, Some(cur), layer, batch) {
                Ok(ids) => added.extend(ids),
                Err(SchedError::MaxLimit) => {}
                Err(e) => return Err(e),
            }
            if added.len() == count as usize {
                break;
            }

            let max = self.fan_out(self[cur].layer);
            if self[cur].children.len() < max {
                // Use up what is left on this parent
                batch = (max - self[cur].children.len()).min(count as usize - added.len()) as u16;
            } else {
                parent = self[cur].sibling;
                batch = (count as usize - added.len()) as u16;
            }
        }

        Ok(added)
    }

    /// Frees the subtree at `id`, children first. Every removed node at or below the
    /// entry layer, other than a queue leaf, is deleted from firmware as well; firmware
    /// failures are logged and don't stop the removal.
    pub(crate) fn free_node<T: CommandTransport>(&mut self, fw: &Firmware<T>, id: NodeId) -> Result<(), SchedError> {
        let order = self.subtree(id)?;
        let entry = self.layers.entry();

        for id in order.into_iter().rev() {
            let node = &self[id];
            let deletable = node.layer >= entry && !node.is_fixed() && node.elem_type() != Some(ElemType::Leaf);
            if deletable {
                if let Some(parent) = node.parent {
                    let group = TeidGroup { parent_teid: self[parent].teid(), teids: vec![node.teid()] };
                    if let Err(e) = fw.delete_elems(&group) {
                        warn!(teid = group.teids[0], err = %e, "failed to delete scheduler node");
                    }
                }
            }
            self.release(id);
        }
        Ok(())
    }

    /// Moves the nodes with the given TEIDs under `parent`, one firmware command each.
    /// Nodes moved before a failure stay moved.
    pub(crate) fn move_nodes<T: CommandTransport>(
        &mut self,
        fw: &Firmware<T>,
        parent: NodeId,
        teids: &[u32],
    ) -> Result<(), SchedError> {
        if teids.is_empty() {
            return Err(SchedError::Param("no nodes to move"));
        }
        let dest = self.node(parent)?;
        if dest.children.len() + teids.len() > self.fan_out(dest.layer) {
            return Err(SchedError::AqFull);
        }

        for teid in teids {
            let id = self.find_by_teid(*teid).ok_or(SchedError::Param("unknown node"))?;
            if self[id].layer != self[parent].layer + 1 {
                return Err(SchedError::Param("destination on the wrong layer"));
            }
            if self[id].tc_num != self[parent].tc_num {
                return Err(SchedError::Param("destination in another traffic class"));
            }

            let group = MoveGroup {
                src_parent_teid: self[id].info.parent_teid,
                dest_parent_teid: self[parent].teid(),
                flags: 0,
                teids: vec![*teid],
            };
            match fw.move_elems(&group) {
                Ok(1) => {}
                Ok(_) => return Err(SchedError::Cfg("move elements")),
                Err(e) => return Err(e.or_cfg("move elements")),
            }
            self.reparent(id, parent)?;
            debug!(teid, parent = group.dest_parent_teid, "moved scheduler node");
        }
        Ok(())
    }

    /// Configures a node's element and updates the local copy once firmware accepted it.
    pub(crate) fn update_elem<T: CommandTransport>(
        &mut self,
        fw: &Firmware<T>,
        id: NodeId,
        mut data: TxSchedElem,
    ) -> Result<(), SchedError> {
        if self.node(id)?.elem_type() == Some(ElemType::Tc) {
            data.valid_sections &= !valid::CIR;
            data.cir = self[id].info.data.cir;
        }

        let req = TxSchedElemData {
            parent_teid: 0,
            node_teid: self[id].teid(),
            data: TxSchedElem { elem_type: 0, flags: 0, ..data },
        };
        match fw.cfg_elems(&[req]) {
            Ok(1) => {}
            Ok(n) => {
                warn!(teid = req.node_teid, configured = n, "element not configured");
                return Err(SchedError::Cfg("configure element"));
            }
            Err(e) => return Err(e.or_cfg("configure element")),
        }

        self[id].info.data = data;
        Ok(())
    }

    pub(crate) fn suspend_resume<T: CommandTransport>(
        &mut self,
        fw: &Firmware<T>,
        ids: &[NodeId],
        suspend: bool,
    ) -> Result<(), SchedError> {
        if ids.is_empty() {
            return Ok(());
        }
        let teids = ids.iter().map(|id| self.node(*id).map(Node::teid)).collect::<Result<Vec<_>, _>>()?;
        fw.suspend_resume(&teids, suspend)?;

        for id in ids {
            let flags = &mut self[*id].info.data.flags;
            if suspend {
                *flags |= ELEM_FLAG_SUSPEND;
            } else {
                *flags &= !ELEM_FLAG_SUSPEND;
            }
        }
        Ok(())
    }

    /// Sets the priority (0-7) of a node among its siblings.
    pub(crate) fn set_node_priority<T: CommandTransport>(
        &mut self,
        fw: &Firmware<T>,
        id: NodeId,
        prio: u8,
    ) -> Result<(), SchedError> {
        let mut data = self.node(id)?.info.data;
        data.valid_sections |= valid::GENERIC;
        data.generic = (data.generic & !generic::PRIO_M) | ((prio << generic::PRIO_S) & generic::PRIO_M);
        self.update_elem(fw, id, data)
    }

    /// Sets the CIR and EIR weight of a node and switches it to WFQ.
    pub(crate) fn set_node_weight<T: CommandTransport>(
        &mut self,
        fw: &Firmware<T>,
        id: NodeId,
        weight: u16,
    ) -> Result<(), SchedError> {
        let mut data = self.node(id)?.info.data;
        data.valid_sections = valid::CIR | valid::EIR | valid::GENERIC;
        data.cir.bw_alloc = weight;
        data.eir.bw_alloc = weight;
        data.generic &= !generic::SP_M;
        self.update_elem(fw, id, data)
    }

    pub(crate) fn cfg_node_bw_alloc<T: CommandTransport>(
        &mut self,
        fw: &Firmware<T>,
        id: NodeId,
        rl_type: RlType,
        bw_alloc: u16,
    ) -> Result<(), SchedError> {
        let mut data = self.node(id)?.info.data;
        match rl_type {
            RlType::Cir => {
                data.valid_sections |= valid::CIR;
                data.cir.bw_alloc = bw_alloc;
            }
            RlType::Eir => {
                data.valid_sections |= valid::EIR;
                data.eir.bw_alloc = bw_alloc;
            }
            RlType::Srl => return Err(SchedError::Param("weight of a shared limiter")),
        }
        self.update_elem(fw, id, data)
    }

    /// Compares every node of the subtree with the firmware copy. Mismatches are logged,
    /// never repaired.
    pub(crate) fn is_balanced<T: CommandTransport>(&self, fw: &Firmware<T>, base: NodeId) -> Result<bool, SchedError> {
        let mut balanced = true;
        for id in self.subtree(base)? {
            let local = &self[id].info;
            let Some(remote) = fw.query_elems(&[local.node_teid])?.into_iter().next() else {
                warn!(teid = local.node_teid, "node missing in firmware");
                balanced = false;
                continue;
            };
            if !same_elem(local, &remote) {
                warn!(teid = local.node_teid, ?local, ?remote, "node differs from firmware");
                balanced = false;
            }
        }
        Ok(balanced)
    }
}

/// Compares the fields firmware keeps for an element.
fn same_elem(a: &TxSchedElemData, b: &TxSchedElemData) -> bool {
    let (x, y) = (&a.data, &b.data);
    a.parent_teid == b.parent_teid
        && x.elem_type == y.elem_type
        && x.generic == y.generic
        && x.cir == y.cir
        && x.eir == y.eir
        && x.srl_id == y.srl_id
        && x.flags & ELEM_FLAG_SUSPEND == y.flags & ELEM_FLAG_SUSPEND
}
