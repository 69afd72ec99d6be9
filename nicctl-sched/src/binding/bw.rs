//! Bandwidth settings addressed by VSI, aggregator, TC or queue, saved for replay.
use tracing::debug;

use nicctl_common::constants::MAX_TRAFFIC_CLASS;
use nicctl_wire::{
    rl::RlType,
    sched::{generic, valid, ElemType},
};

use super::{tc_bit, AggType, Port, MAX_TCS};
use crate::{aq::Firmware, replay::BwTypeInfo, tree::NodeId, CommandTransport, SchedError};

/// Limits set together on a shared limiter node.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SharedLimits {
    pub(crate) min_bw: u32,
    pub(crate) max_bw: u32,
    pub(crate) shared_bw: u32,
}

impl Port {
    /// Node of `tc` that `id` names for the given kind of object.
    pub(crate) fn node_by_id_type(&self, id: u32, agg_type: AggType, tc: u8) -> Option<NodeId> {
        self.tree.tc_node(tc)?;
        match agg_type {
            AggType::Tc => self.tree.tc_node(tc),
            AggType::Agg => self.tree.agg_node(tc, id),
            AggType::Vsi => {
                let vsi = u16::try_from(id).ok()?;
                self.vsis.get(&vsi)?;
                self.tree.vsi_node(tc, vsi)
            }
            AggType::Queue => self.tree.find_by_teid(id),
            AggType::QueueGroup => {
                let leaf = self.tree.find_by_teid(id)?;
                self.tree[leaf].parent
            }
        }
    }

    pub(crate) fn cfg_node_bw_lmt_per_tc<T: CommandTransport>(
        &mut self,
        fw: &Firmware<T>,
        id: u32,
        agg_type: AggType,
        tc: u8,
        rl_type: RlType,
        bw: u32,
    ) -> Result<(), SchedError> {
        let node = self.node_by_id_type(id, agg_type, tc).ok_or(SchedError::Param("node not found"))?;
        self.tree.set_node_bw_lmt(fw, &mut self.pool, node, rl_type, bw)
    }

    pub(crate) fn cfg_vsi_bw_lmt_per_tc<T: CommandTransport>(
        &mut self,
        fw: &Firmware<T>,
        vsi: u16,
        tc: u8,
        rl_type: RlType,
        bw: u32,
    ) -> Result<(), SchedError> {
        if !self.vsis.contains_key(&vsi) {
            return Err(SchedError::Param("unknown VSI"));
        }
        self.cfg_node_bw_lmt_per_tc(fw, vsi.into(), AggType::Vsi, tc, rl_type, bw)?;
        if let Some(info) = self.vsi_bw_mut(vsi, tc) {
            info.set_bw(rl_type, bw);
        }
        Ok(())
    }

    pub(crate) fn cfg_agg_bw_lmt_per_tc<T: CommandTransport>(
        &mut self,
        fw: &Firmware<T>,
        agg_id: u32,
        tc: u8,
        rl_type: RlType,
        bw: u32,
    ) -> Result<(), SchedError> {
        if !self.aggs.contains_key(&agg_id) {
            return Err(SchedError::Param("unknown aggregator"));
        }
        self.cfg_node_bw_lmt_per_tc(fw, agg_id, AggType::Agg, tc, rl_type, bw)?;
        if let Some(info) = self.agg_bw_mut(agg_id, tc) {
            info.set_bw(rl_type, bw);
        }
        Ok(())
    }

    /// Limits a TC node. The node is switched to strict priority on its TC first.
    pub(crate) fn cfg_tc_node_bw_lmt<T: CommandTransport>(
        &mut self,
        fw: &Firmware<T>,
        tc: u8,
        rl_type: RlType,
        bw: u32,
    ) -> Result<(), SchedError> {
        if tc >= MAX_TRAFFIC_CLASS {
            return Err(SchedError::Param("traffic class"));
        }
        let node = self.tree.tc_node(tc).ok_or(SchedError::Param("traffic class not configured"))?;

        let mut data = self.tree[node].info.data;
        data.valid_sections = valid::GENERIC;
        data.generic = ((tc << generic::PRIO_S) & generic::PRIO_M) | generic::SP_M;
        self.tree.update_elem(fw, node, data)?;

        self.tree.set_node_bw_lmt(fw, &mut self.pool, node, rl_type, bw)?;
        self.tc_bw[tc as usize].set_bw(rl_type, bw);
        Ok(())
    }

    pub(crate) fn cfg_tc_node_bw_alloc<T: CommandTransport>(
        &mut self,
        fw: &Firmware<T>,
        tc: u8,
        rl_type: RlType,
        bw_alloc: u16,
    ) -> Result<(), SchedError> {
        if tc >= MAX_TRAFFIC_CLASS {
            return Err(SchedError::Param("traffic class"));
        }
        let node = self.tree.tc_node(tc).ok_or(SchedError::Param("traffic class not configured"))?;
        self.tree.cfg_node_bw_alloc(fw, node, rl_type, bw_alloc)?;
        self.tc_bw[tc as usize].set_weight(rl_type, bw_alloc);
        Ok(())
    }

    /// Limits an enabled Tx queue.
    pub(crate) fn cfg_q_bw_lmt<T: CommandTransport>(
        &mut self,
        fw: &Firmware<T>,
        vsi: u16,
        tc: u8,
        q_handle: u16,
        rl_type: RlType,
        bw: u32,
    ) -> Result<(), SchedError> {
        let q = self
            .vsis
            .get(&vsi)
            .and_then(|c| c.lan_q.get(tc as usize))
            .and_then(|q| q.get(q_handle as usize))
            .ok_or(SchedError::Param("queue handle out of range"))?;
        let leaf = self.tree.find_by_teid(q.teid).ok_or(SchedError::Param("queue not enabled"))?;
        if self.tree[leaf].elem_type() != Some(ElemType::Leaf) {
            return Err(SchedError::Param("queue node is not a leaf"));
        }

        self.tree.set_node_bw_lmt(fw, &mut self.pool, leaf, rl_type, bw)?;
        if let Some(q) = self.vsis.get_mut(&vsi).and_then(|c| c.lan_q[tc as usize].get_mut(q_handle as usize)) {
            q.bw.set_bw(rl_type, bw);
        }
        Ok(())
    }

    /// Sets the weight of the VSI's node on every TC of `ena_tcmap`.
    pub(crate) fn cfg_vsi_bw_alloc<T: CommandTransport>(
        &mut self,
        fw: &Firmware<T>,
        vsi: u16,
        ena_tcmap: u8,
        rl_type: RlType,
        bw_alloc: &[u16; MAX_TCS],
    ) -> Result<(), SchedError> {
        if !self.vsis.contains_key(&vsi) {
            return Err(SchedError::Param("unknown VSI"));
        }
        for tc in 0..MAX_TRAFFIC_CLASS {
            if ena_tcmap & tc_bit(tc) == 0 {
                continue;
            }
            let Some(node) = self.tree.vsi_node(tc, vsi) else {
                continue;
            };
            self.tree.cfg_node_bw_alloc(fw, node, rl_type, bw_alloc[tc as usize])?;
            if let Some(info) = self.vsi_bw_mut(vsi, tc) {
                info.set_weight(rl_type, bw_alloc[tc as usize]);
            }
        }
        Ok(())
    }

    pub(crate) fn cfg_agg_bw_alloc<T: CommandTransport>(
        &mut self,
        fw: &Firmware<T>,
        agg_id: u32,
        ena_tcmap: u8,
        rl_type: RlType,
        bw_alloc: &[u16; MAX_TCS],
    ) -> Result<(), SchedError> {
        if !self.aggs.contains_key(&agg_id) {
            return Err(SchedError::Param("unknown aggregator"));
        }
        for tc in 0..MAX_TRAFFIC_CLASS {
            if ena_tcmap & tc_bit(tc) == 0 {
                continue;
            }
            let Some(node) = self.tree.agg_node(tc, agg_id) else {
                continue;
            };
            self.tree.cfg_node_bw_alloc(fw, node, rl_type, bw_alloc[tc as usize])?;
            if let Some(info) = self.agg_bw_mut(agg_id, tc) {
                info.set_weight(rl_type, bw_alloc[tc as usize]);
            }
        }
        Ok(())
    }

    /// Checks that the shared limiter of every node in `nodes` can be placed, using the
    /// profile layer chosen for the first one.
    fn validate_srl_nodes(&self, nodes: &[NodeId]) -> Result<(), SchedError> {
        let Some(first) = nodes.first() else {
            return Ok(());
        };
        let sel = self
            .tree
            .rl_prof_layer(RlType::Srl, self.tree[*first].layer)
            .ok_or(SchedError::Param("no shared limiter profiles"))?;
        nodes.iter().try_for_each(|id| self.tree.validate_srl_node(*id, sel))
    }

    /// Applies the three limits to the node carrying the shared limiter of `node`.
    fn set_srl_limits<T: CommandTransport>(
        &mut self,
        fw: &Firmware<T>,
        node: NodeId,
        limits: SharedLimits,
    ) -> Result<(), SchedError> {
        let sel = self
            .tree
            .rl_prof_layer(RlType::Srl, self.tree[node].layer)
            .ok_or(SchedError::Param("no shared limiter profiles"))?;
        let cfg_node = self.tree.srl_node(node, sel).ok_or(SchedError::Cfg("shared limiter node"))?;

        self.tree.set_node_bw_lmt(fw, &mut self.pool, cfg_node, RlType::Cir, limits.min_bw)?;
        self.tree.set_node_bw_lmt(fw, &mut self.pool, cfg_node, RlType::Eir, limits.max_bw)?;
        self.tree.set_node_bw_lmt(fw, &mut self.pool, cfg_node, RlType::Srl, limits.shared_bw)
    }

    /// Sets minimum, maximum and shared limits of the VSI on every TC it has a node on.
    pub(crate) fn cfg_vsi_bw_shared_lmt<T: CommandTransport>(
        &mut self,
        fw: &Firmware<T>,
        vsi: u16,
        limits: SharedLimits,
    ) -> Result<(), SchedError> {
        if !self.vsis.contains_key(&vsi) {
            return Err(SchedError::Param("unknown VSI"));
        }
        let nodes: Vec<_> = (0..MAX_TRAFFIC_CLASS).filter_map(|tc| Some((tc, self.tree.vsi_node(tc, vsi)?))).collect();
        self.validate_srl_nodes(&nodes.iter().map(|(_, n)| *n).collect::<Vec<_>>())?;

        for (tc, node) in nodes {
            self.set_srl_limits(fw, node, limits)?;
            if let Some(info) = self.vsi_bw_mut(vsi, tc) {
                save_limits(info, limits);
            }
        }
        debug!(vsi, ?limits, "set VSI shared limits");
        Ok(())
    }

    /// Sets minimum, maximum and shared limits of the aggregator on every TC it has a
    /// node on.
    pub(crate) fn cfg_agg_bw_shared_lmt<T: CommandTransport>(
        &mut self,
        fw: &Firmware<T>,
        agg_id: u32,
        limits: SharedLimits,
    ) -> Result<(), SchedError> {
        if !self.aggs.contains_key(&agg_id) {
            return Err(SchedError::Param("unknown aggregator"));
        }
        let nodes: Vec<_> =
            (0..MAX_TRAFFIC_CLASS).filter_map(|tc| Some((tc, self.tree.agg_node(tc, agg_id)?))).collect();
        self.validate_srl_nodes(&nodes.iter().map(|(_, n)| *n).collect::<Vec<_>>())?;

        for (tc, node) in nodes {
            self.set_srl_limits(fw, node, limits)?;
            if let Some(info) = self.agg_bw_mut(agg_id, tc) {
                save_limits(info, limits);
            }
        }
        debug!(agg_id, ?limits, "set aggregator shared limits");
        Ok(())
    }

    pub(crate) fn cfg_agg_bw_shared_lmt_per_tc<T: CommandTransport>(
        &mut self,
        fw: &Firmware<T>,
        agg_id: u32,
        tc: u8,
        limits: SharedLimits,
    ) -> Result<(), SchedError> {
        if !self.aggs.contains_key(&agg_id) {
            return Err(SchedError::Param("unknown aggregator"));
        }
        let node = self.tree.agg_node(tc, agg_id).ok_or(SchedError::Cfg("aggregator node"))?;
        self.validate_srl_nodes(&[node])?;
        self.set_srl_limits(fw, node, limits)?;
        if let Some(info) = self.agg_bw_mut(agg_id, tc) {
            save_limits(info, limits);
        }
        Ok(())
    }

    /// Sets the priority of VSIs among the siblings below the aggregator's node.
    pub(crate) fn cfg_agg_vsi_priority_per_tc<T: CommandTransport>(
        &mut self,
        fw: &Firmware<T>,
        agg_id: u32,
        tc: u8,
        prios: &[(u16, u8)],
    ) -> Result<(), SchedError> {
        let agg = self.aggs.get(&agg_id).ok_or(SchedError::Param("unknown aggregator"))?;
        self.tree.tc_node(tc).ok_or(SchedError::Param("traffic class not configured"))?;
        let agg_node = self.tree.agg_node(tc, agg_id).ok_or(SchedError::Param("aggregator node"))?;
        if prios.len() > self.tree.fan_out(self.tree[agg_node].layer) {
            return Err(SchedError::Param("more VSIs than the aggregator holds"));
        }
        for (vsi, _) in prios {
            if !self.vsis.contains_key(vsi) || agg.vsi(*vsi).is_none() {
                return Err(SchedError::Param("VSI not in aggregator"));
            }
        }

        for (vsi, prio) in prios {
            let node = self.tree.vsi_node(tc, *vsi).ok_or(SchedError::Param("VSI node"))?;
            if !self.tree.in_subtree(agg_node, node) {
                continue;
            }
            self.tree.set_node_priority(fw, node, *prio)?;
            if let Some(info) = self.vsi_bw_mut(*vsi, tc) {
                info.set_priority(*prio);
            }
        }
        Ok(())
    }

    /// Sets the priority of queue leaves, given by TEID.
    pub(crate) fn cfg_vsi_q_priority<T: CommandTransport>(
        &mut self,
        fw: &Firmware<T>,
        prios: &[(u32, u8)],
    ) -> Result<(), SchedError> {
        for (teid, prio) in prios {
            let node = self.tree.find_by_teid(*teid).ok_or(SchedError::Param("unknown queue"))?;
            if self.tree[node].elem_type() != Some(ElemType::Leaf) {
                return Err(SchedError::Param("node is not a queue"));
            }
            self.tree.set_node_priority(fw, node, *prio)?;
        }
        Ok(())
    }

    pub(crate) fn vsi_bw_mut(&mut self, vsi: u16, tc: u8) -> Option<&mut BwTypeInfo> {
        self.vsis.get_mut(&vsi)?.bw.get_mut(tc as usize)
    }

    pub(crate) fn agg_bw_mut(&mut self, agg_id: u32, tc: u8) -> Option<&mut BwTypeInfo> {
        self.aggs.get_mut(&agg_id)?.bw.get_mut(tc as usize)
    }
}

fn save_limits(info: &mut BwTypeInfo, limits: SharedLimits) {
    info.set_bw(RlType::Cir, limits.min_bw);
    info.set_bw(RlType::Eir, limits.max_bw);
    info.set_bw(RlType::Srl, limits.shared_bw);
}
