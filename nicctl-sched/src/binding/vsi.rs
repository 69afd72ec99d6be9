use tracing::debug;

use nicctl_common::constants::MAX_TRAFFIC_CLASS;
use nicctl_wire::sched::ElemType;

use super::{Owner, Port, QueueCtx};
use crate::{
    aq::Firmware,
    tree::{NodeId, MAX_LAYERS},
    CommandTransport, SchedError,
};

impl Port {
    /// Sets up, or with `enable` false suspends, the VSI's node on `tc` and makes room for
    /// `max_queues` queues owned by `owner`. Queue capacity only ever grows.
    pub(crate) fn cfg_vsi<T: CommandTransport>(
        &mut self,
        fw: &Firmware<T>,
        vsi: u16,
        tc: u8,
        max_queues: u16,
        owner: Owner,
        enable: bool,
    ) -> Result<(), SchedError> {
        let tc_node = self.tree.tc_node(tc).ok_or(SchedError::Param("traffic class not configured"))?;
        self.vsis.entry(vsi).or_default();

        let vsi_node = self.tree.vsi_node(tc, vsi);
        if !enable {
            if let Some(node) = vsi_node.filter(|n| self.tree[*n].in_use) {
                self.tree.suspend_resume(fw, &[node], true)?;
                self.tree[node].in_use = false;
                debug!(vsi, tc, "suspended VSI node");
            }
            return Ok(());
        }

        let vsi_node = match vsi_node {
            Some(node) => node,
            None => {
                self.add_vsi_to_topo(fw, vsi, tc, tc_node)?;
                let node = self.tree.vsi_node(tc, vsi).ok_or(SchedError::Cfg("VSI node not added"))?;
                self.tree[node].in_use = true;
                if let Some(ctx) = self.vsis.get_mut(&vsi) {
                    ctx.set_max_queues(tc, Owner::Lan, 0);
                    ctx.set_max_queues(tc, Owner::Rdma, 0);
                }
                node
            }
        };

        self.update_vsi_child_nodes(fw, vsi, tc, vsi_node, max_queues, owner)?;

        if !self.tree[vsi_node].in_use {
            self.tree.suspend_resume(fw, &[vsi_node], false)?;
            self.tree[vsi_node].in_use = true;
        }
        Ok(())
    }

    /// Counts the nodes needed per layer to hang a new VSI node under `tc`, reusing the
    /// deepest existing node with room.
    fn calc_vsi_support_nodes(&self, tc: u8, tc_node: NodeId) -> [u16; MAX_LAYERS] {
        let mut num = [0u16; MAX_LAYERS];
        let (entry, vsil) = (self.tree.layers.entry(), self.tree.layers.vsi());
        let empty = self.tree[tc_node].children.is_empty();

        for layer in (entry..=vsil).rev() {
            if empty || layer == vsil {
                num[layer as usize] += 1;
            } else if self.tree.chain(tc, layer).any(|id| self.tree.has_room(id)) {
                break;
            } else {
                num[layer as usize] += 1;
            }
        }
        num
    }

    fn add_vsi_to_topo<T: CommandTransport>(
        &mut self,
        fw: &Firmware<T>,
        vsi: u16,
        tc: u8,
        tc_node: NodeId,
    ) -> Result<(), SchedError> {
        let num = self.calc_vsi_support_nodes(tc, tc_node);
        let (entry, vsil) = (self.tree.layers.entry(), self.tree.layers.vsi());

        let mut parent = tc_node;
        for layer in entry..=vsil {
            let want = num[layer as usize];
            let added = self.tree.add_nodes_to_layer(fw, tc_node, parent, layer, want)?;
            if added.len() != want as usize {
                return Err(SchedError::Cfg("VSI support nodes"));
            }
            parent = match added.first() {
                Some(first) => *first,
                None => self.tree[parent].children.first().copied().ok_or(SchedError::Cfg("VSI support nodes"))?,
            };
            if layer == vsil {
                self.tree[parent].vsi_handle = Some(vsi);
            }
        }
        debug!(vsi, tc, teid = self.tree[parent].teid(), "added VSI node");
        Ok(())
    }

    /// Number of nodes each layer below the VSI needs for `num_queues` queues.
    fn calc_vsi_child_nodes(&self, num_queues: u16) -> [u16; MAX_LAYERS] {
        let mut num = [0u16; MAX_LAYERS];
        let (vsil, qgl) = (self.tree.layers.vsi(), self.tree.layers.qgrp());

        let mut n = num_queues;
        for layer in (vsil + 1..=qgl).rev() {
            let fan_out = self.tree.fan_out(layer).max(1) as u16;
            n = n.div_ceil(fan_out).max(1);
            num[layer as usize] = n;
        }
        num
    }

    /// Nodes of `layer` below the VSI node that belong to `owner`.
    fn owned_nodes(&self, tc: u8, vsi_node: NodeId, layer: u8, owner: Owner) -> Vec<NodeId> {
        self.tree
            .chain(tc, layer)
            .filter(|id| self.tree[*id].owner == owner && self.tree.in_subtree(vsi_node, *id))
            .collect()
    }

    /// Brings the owner's nodes on every layer below the VSI up to `num`, filling the
    /// owner's parents in chain order.
    fn add_vsi_child_nodes<T: CommandTransport>(
        &mut self,
        fw: &Firmware<T>,
        tc: u8,
        vsi_node: NodeId,
        num: &[u16; MAX_LAYERS],
        owner: Owner,
    ) -> Result<(), SchedError> {
        let (vsil, qgl) = (self.tree.layers.vsi(), self.tree.layers.qgrp());
        let tc_node = self.tree.tc_node(tc).ok_or(SchedError::Cfg("traffic class node"))?;

        for layer in vsil + 1..=qgl {
            let have = self.owned_nodes(tc, vsi_node, layer, owner).len();
            let mut need = (num[layer as usize] as usize).saturating_sub(have);
            if need == 0 {
                continue;
            }

            let parents =
                if layer == vsil + 1 { vec![vsi_node] } else { self.owned_nodes(tc, vsi_node, layer - 1, owner) };
            for parent in parents {
                let room = self.tree.fan_out(self.tree[parent].layer).saturating_sub(self.tree[parent].children.len());
                let batch = room.min(need) as u16;
                if batch == 0 {
                    continue;
                }
                for id in self.tree.add_nodes_to_hw_layer(fw, tc_node, Some(parent), layer, batch)? {
                    self.tree[id].owner = owner;
                }
                need -= batch as usize;
                if need == 0 {
                    break;
                }
            }
            if need > 0 {
                return Err(SchedError::Cfg("no room below VSI node"));
            }
        }
        Ok(())
    }

    fn update_vsi_child_nodes<T: CommandTransport>(
        &mut self,
        fw: &Firmware<T>,
        vsi: u16,
        tc: u8,
        vsi_node: NodeId,
        max_queues: u16,
        owner: Owner,
    ) -> Result<(), SchedError> {
        let prev = self.vsis.get(&vsi).map(|c| c.max_queues(tc, owner)).unwrap_or_default();
        if max_queues <= prev {
            return Ok(());
        }

        if owner == Owner::Lan {
            if let Some(queues) = self.vsis.get_mut(&vsi).and_then(|c| c.lan_q.get_mut(tc as usize)) {
                if queues.len() < max_queues as usize {
                    queues.resize(max_queues as usize, QueueCtx::default());
                }
            }
        }

        let num = self.calc_vsi_child_nodes(max_queues);
        self.add_vsi_child_nodes(fw, tc, vsi_node, &num, owner)?;

        if let Some(ctx) = self.vsis.get_mut(&vsi) {
            ctx.set_max_queues(tc, owner, max_queues);
        }
        debug!(vsi, tc, ?owner, max_queues, "VSI queue capacity raised");
        Ok(())
    }

    /// Removes the `owner` nodes of a VSI on every TC. A VSI node left without children
    /// is removed as well, together with its aggregator membership.
    pub(crate) fn rm_vsi_cfg<T: CommandTransport>(
        &mut self,
        fw: &Firmware<T>,
        vsi: u16,
        owner: Owner,
    ) -> Result<(), SchedError> {
        if !self.vsis.contains_key(&vsi) {
            return Err(SchedError::Param("unknown VSI"));
        }

        for tc in 0..MAX_TRAFFIC_CLASS {
            if self.tree.tc_node(tc).is_none() {
                continue;
            }
            let Some(vsi_node) = self.tree.vsi_node(tc, vsi) else {
                continue;
            };
            let has_leaf =
                self.tree.subtree(vsi_node)?.iter().any(|id| self.tree[*id].elem_type() == Some(ElemType::Leaf));
            if has_leaf {
                return Err(SchedError::InUse);
            }

            let owned: Vec<_> =
                self.tree[vsi_node].children.iter().copied().filter(|c| self.tree[*c].owner == owner).collect();
            for child in owned {
                self.tree.free_node(fw, child)?;
            }

            if self.tree[vsi_node].children.is_empty() {
                self.tree.free_node(fw, vsi_node)?;
                self.rm_agg_vsi_info(vsi);
                debug!(vsi, tc, "removed VSI node");
            }
            if let Some(ctx) = self.vsis.get_mut(&vsi) {
                ctx.set_max_queues(tc, owner, 0);
            }
        }

        let has_node = (0..MAX_TRAFFIC_CLASS).any(|tc| self.tree.vsi_node(tc, vsi).is_some());
        if !has_node && self.vsis.get(&vsi).map_or(false, |c| c.is_idle()) {
            self.vsis.remove(&vsi);
            debug!(vsi, "dropped VSI context");
        }
        Ok(())
    }

    fn rm_agg_vsi_info(&mut self, vsi: u16) {
        if let Some(agg) = self.aggs.values_mut().find(|a| a.vsi(vsi).is_some()) {
            agg.vsis.retain(|v| v.vsi != vsi);
        }
    }
}
