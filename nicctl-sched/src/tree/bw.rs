use tracing::debug;

use nicctl_wire::{rl::RlType, sched::valid};

use super::{NodeId, SchedTree};
use crate::{
    aq::Firmware,
    replay::BwTypeInfo,
    rl::{ProfilePool, DFLT_RL_PROF_ID, INVAL_PROF_ID},
    CommandTransport, SchedError, DFLT_BW,
};

impl SchedTree {
    /// Layer whose profiles serve a `rl_type` limit on a node of `layer`.
    ///
    /// CIR and EIR profiles must exist on the node's own layer. A shared limiter falls
    /// back to the layer below, then the layer above, when the node's layer has none.
    pub(crate) fn rl_prof_layer(&self, rl_type: RlType, layer: u8) -> Option<u8> {
        let num_layers = self.layers.num_layers();
        if layer >= num_layers {
            return None;
        }
        let props = |l: u8| self.layer_props.get(l as usize);

        match rl_type {
            RlType::Cir => props(layer).filter(|p| p.max_cir_rl_profiles > 0).map(|_| layer),
            RlType::Eir => props(layer).filter(|p| p.max_eir_rl_profiles > 0).map(|_| layer),
            RlType::Srl => {
                let has_srl = |l: u8| props(l).is_some_and(|p| p.max_srl_profiles > 0);
                if has_srl(layer) {
                    Some(layer)
                } else if layer + 1 < num_layers && has_srl(layer + 1) {
                    Some(layer + 1)
                } else if layer > 0 && has_srl(layer - 1) {
                    Some(layer - 1)
                } else {
                    None
                }
            }
        }
    }

    /// Profile id a node is configured with, [`INVAL_PROF_ID`] when the section isn't valid.
    pub(crate) fn node_rl_prof_id(&self, id: NodeId, rl_type: RlType) -> u16 {
        let data = &self[id].info.data;
        match rl_type {
            RlType::Cir if data.valid_sections & valid::CIR != 0 => data.cir.profile_idx,
            RlType::Eir if data.valid_sections & valid::EIR != 0 => data.eir.profile_idx,
            RlType::Srl if data.valid_sections & valid::SHARED != 0 => data.srl_id,
            _ => INVAL_PROF_ID,
        }
    }

    fn cfg_node_bw_lmt<T: CommandTransport>(
        &mut self,
        fw: &Firmware<T>,
        id: NodeId,
        rl_type: RlType,
        prof_id: u16,
    ) -> Result<(), SchedError> {
        let mut data = self[id].info.data;
        match rl_type {
            RlType::Cir => {
                data.valid_sections |= valid::CIR;
                data.cir.profile_idx = prof_id;
            }
            RlType::Eir => {
                data.valid_sections |= valid::EIR;
                data.eir.profile_idx = prof_id;
            }
            RlType::Srl => {
                data.valid_sections |= valid::SHARED;
                data.srl_id = prof_id;
            }
        }
        self.update_elem(fw, id, data)
    }

    /// Node a shared limit for `id` lands on when profiles live on `sel_layer`: its only
    /// child below, its parent above, or the node itself.
    pub(crate) fn srl_node(&self, id: NodeId, sel_layer: u8) -> Option<NodeId> {
        let layer = self[id].layer;
        if sel_layer > layer {
            self[id].children.first().copied()
        } else if sel_layer < layer {
            self[id].parent
        } else {
            Some(id)
        }
    }

    /// A shared limit may only move to a neighbouring layer when the neighbour covers
    /// exactly the traffic of `id`.
    pub(crate) fn validate_srl_node(&self, id: NodeId, sel_layer: u8) -> Result<(), SchedError> {
        let node = self.node(id)?;
        let ok = sel_layer == node.layer
            || (sel_layer == node.layer + 1 && node.children.len() == 1)
            || (sel_layer + 1 == node.layer && node.parent.is_some_and(|p| self[p].children.len() == 1));
        if ok {
            return Ok(());
        }
        Err(SchedError::Cfg("shared limiter layer not usable for node"))
    }

    /// Limits `id` to `bw` kbps, or restores the default profile for [`DFLT_BW`].
    ///
    /// The previous profile is released once the node is configured with the new one.
    pub(crate) fn set_node_bw_lmt<T: CommandTransport>(
        &mut self,
        fw: &Firmware<T>,
        pool: &mut ProfilePool,
        id: NodeId,
        rl_type: RlType,
        bw: u32,
    ) -> Result<(), SchedError> {
        pool.rm_unused(fw);

        let layer = self
            .rl_prof_layer(rl_type, self.node(id)?.layer)
            .ok_or(SchedError::Param("no rate limiter profiles on layer"))?;
        let node = if rl_type == RlType::Srl {
            self.validate_srl_node(id, layer)?;
            self.srl_node(id, layer).ok_or(SchedError::Cfg("shared limiter node"))?
        } else {
            id
        };

        if bw == DFLT_BW {
            self.set_node_bw_dflt(fw, pool, node, rl_type, layer)
        } else {
            self.set_node_bw(fw, pool, node, rl_type, bw, layer)
        }
    }

    fn set_node_bw_dflt<T: CommandTransport>(
        &mut self,
        fw: &Firmware<T>,
        pool: &mut ProfilePool,
        id: NodeId,
        rl_type: RlType,
        layer: u8,
    ) -> Result<(), SchedError> {
        let old = self.node_rl_prof_id(id, rl_type);
        self.cfg_node_bw_lmt(fw, id, rl_type, ProfilePool::default_id(rl_type))?;
        debug!(teid = self[id].teid(), ?rl_type, "restored default bandwidth");

        if old == DFLT_RL_PROF_ID || old == INVAL_PROF_ID {
            return Ok(());
        }
        pool.release(fw, layer, rl_type, old)
    }

    fn set_node_bw<T: CommandTransport>(
        &mut self,
        fw: &Firmware<T>,
        pool: &mut ProfilePool,
        id: NodeId,
        rl_type: RlType,
        bw: u32,
        layer: u8,
    ) -> Result<(), SchedError> {
        let new = pool.acquire(fw, layer, rl_type, bw)?;
        let old = self.node_rl_prof_id(id, rl_type);

        if let Err(e) = self.cfg_node_bw_lmt(fw, id, rl_type, new) {
            let _ = pool.release(fw, layer, rl_type, new);
            return Err(e);
        }
        debug!(teid = self[id].teid(), ?rl_type, bw, profile = new, "set bandwidth limit");

        // Either way the node holds a single reference on its profile. Release failures
        // are logged by the pool and don't undo a configured node.
        if old == new {
            let _ = pool.release(fw, layer, rl_type, new);
        } else if !((old == DFLT_RL_PROF_ID && rl_type != RlType::Srl) || old == INVAL_PROF_ID) {
            let _ = pool.release(fw, layer, rl_type, old);
        }
        Ok(())
    }

    /// Re-applies saved settings: priority, CIR, CIR weight, EIR, EIR weight and the
    /// shared limit, stopping at the first failure.
    pub(crate) fn replay_node_bw<T: CommandTransport>(
        &mut self,
        fw: &Firmware<T>,
        pool: &mut ProfilePool,
        id: NodeId,
        info: &BwTypeInfo,
    ) -> Result<(), SchedError> {
        if info.is_empty() {
            return Ok(());
        }
        if let Some(prio) = info.priority() {
            self.set_node_priority(fw, id, prio)?;
        }
        for rl_type in [RlType::Cir, RlType::Eir] {
            if let Some(bw) = info.bw(rl_type) {
                self.set_node_bw_lmt(fw, pool, id, rl_type, bw)?;
            }
            if let Some(weight) = info.weight(rl_type) {
                self.cfg_node_bw_alloc(fw, id, rl_type, weight)?;
            }
        }
        if let Some(bw) = info.bw(RlType::Srl) {
            self.set_node_bw_lmt(fw, pool, id, RlType::Srl, bw)?;
        }
        Ok(())
    }
}
