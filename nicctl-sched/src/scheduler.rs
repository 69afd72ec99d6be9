use parking_lot::Mutex;
use tracing::{debug, info};

use nicctl_wire::{
    rl::{RlProfileElem, RlType},
    sched::{NodeAttr, TxSchedElemData},
    txq::TXQ_CTX_LEN,
};

use crate::{
    aq::Firmware,
    binding::{tc_bit, AggType, Owner, Port, SharedLimits, MAX_TCS},
    replay::BwTypeInfo,
    rl::{encode_burst_size, ProfilePool, PsmClock, RlProfile, DFLT_BURST_SIZE},
    tree::{LayerMap, NodeInfo, SchedTree},
    CommandTransport, SchedError, SchedStats,
};

#[derive(Debug, Clone)]
pub struct SchedOptions {
    /// Port whose default topology is loaded.
    pub port: u8,
    /// Clock rate limiter profiles are encoded against. See [`PsmClock::read`].
    pub psm_clock: PsmClock,
    /// Burst size of new rate limiter profiles, in bytes.
    pub burst_size: u32,
}

impl SchedOptions {
    pub fn with_port(mut self, port: u8) -> Self {
        self.port = port;
        self
    }

    pub fn with_psm_clock(mut self, psm_clock: PsmClock) -> Self {
        self.psm_clock = psm_clock;
        self
    }

    pub fn with_burst_size(mut self, bytes: u32) -> Self {
        self.burst_size = bytes;
        self
    }
}

impl Default for SchedOptions {
    fn default() -> Self {
        Self { port: 0, psm_clock: PsmClock::default(), burst_size: DFLT_BURST_SIZE }
    }
}

/// Tx scheduler of one port.
///
/// Every operation takes the scheduler lock for its whole duration, firmware commands
/// included, so operations on one port are serialized. Operations other than
/// [`init`](Self::init) fail with [`SchedError::NotReady`] until the tree was loaded.
pub struct Scheduler<T: CommandTransport> {
    fw: Firmware<T>,
    options: SchedOptions,
    port: Mutex<Port>,
}

impl<T: CommandTransport> Scheduler<T> {
    pub fn new(transport: T) -> Self {
        Self::with_options(transport, SchedOptions::default())
    }

    pub fn with_options(transport: T, options: SchedOptions) -> Self {
        Self { fw: Firmware::new(transport), options, port: Mutex::new(Port::new()) }
    }

    pub fn transport(&self) -> &T {
        self.fw.transport()
    }

    pub fn stats(&self) -> &SchedStats {
        self.fw.stats()
    }

    pub fn options(&self) -> &SchedOptions {
        &self.options
    }

    /// Loads the firmware's layer properties and default topology.
    ///
    /// After [`clear`](Self::clear) this builds a fresh tree; saved aggregator, VSI and
    /// bandwidth settings are kept for the `replay_*` operations.
    pub fn init(&self) -> Result<(), SchedError> {
        let mut port = self.port.lock();
        if port.ready {
            return Err(SchedError::Cfg("already initialized"));
        }
        let burst = match port.burst {
            Some(burst) => burst,
            None => encode_burst_size(self.options.burst_size).ok_or(SchedError::Param("burst size"))?,
        };

        let mut tree = SchedTree::new();
        tree.apply_resources(self.fw.query_sched_res()?)?;
        let branches = self.fw.get_dflt_topo(self.options.port)?;
        tree.init_port(&self.fw, &branches)?;

        port.pool = ProfilePool::new(tree.layers.num_layers(), self.options.psm_clock.hz(), burst);
        port.tree = tree;
        port.ready = true;
        info!(port = self.options.port, layers = port.tree.layers.num_layers(), "scheduler initialized");
        Ok(())
    }

    /// Frees the tree and every profile. Firmware failures are logged only.
    pub fn clear(&self) {
        let mut guard = self.port.lock();
        let port = &mut *guard;
        if !port.ready {
            return;
        }
        port.tree.clear(&self.fw);
        port.pool.clear(&self.fw);
        port.reset_for_replay();
        port.ready = false;
        info!(port = self.options.port, "scheduler cleared");
    }

    pub fn is_ready(&self) -> bool {
        self.port.lock().ready
    }

    fn with_port<R>(&self, f: impl FnOnce(&mut Port, &Firmware<T>) -> Result<R, SchedError>) -> Result<R, SchedError> {
        let mut port = self.port.lock();
        if !port.ready {
            return Err(SchedError::NotReady);
        }
        f(&mut port, &self.fw)
    }

    fn read_port<R>(&self, f: impl FnOnce(&Port) -> Option<R>) -> Option<R> {
        let port = self.port.lock();
        if !port.ready {
            return None;
        }
        f(&port)
    }

    pub fn layers(&self) -> Result<LayerMap, SchedError> {
        self.with_port(|port, _| Ok(port.tree.layers))
    }

    pub fn node(&self, teid: u32) -> Option<NodeInfo> {
        self.read_port(|port| port.tree.find_by_teid(teid).map(|id| port.tree.info(id)))
    }

    pub fn root(&self) -> Option<NodeInfo> {
        self.read_port(|port| port.tree.root().map(|id| port.tree.info(id)))
    }

    pub fn tc_node(&self, tc: u8) -> Option<NodeInfo> {
        self.read_port(|port| port.tree.tc_node(tc).map(|id| port.tree.info(id)))
    }

    pub fn vsi_node(&self, vsi: u16, tc: u8) -> Option<NodeInfo> {
        self.read_port(|port| port.tree.vsi_node(tc, vsi).map(|id| port.tree.info(id)))
    }

    pub fn agg_node(&self, agg_id: u32, tc: u8) -> Option<NodeInfo> {
        self.read_port(|port| port.tree.agg_node(tc, agg_id).map(|id| port.tree.info(id)))
    }

    pub fn node_count(&self) -> usize {
        self.port.lock().tree.len()
    }

    /// Rate limiter profiles currently in use.
    pub fn profiles(&self) -> Vec<RlProfile> {
        self.port.lock().pool.iter().cloned().collect()
    }

    /// Adds `count` nodes on `layer` under the node with `parent_teid`. Returns the new
    /// TEIDs. Fails with [`SchedError::MaxLimit`] when the parent can't hold them all, in
    /// which case nothing is added.
    pub fn add_nodes(&self, parent_teid: u32, layer: u8, count: u16) -> Result<Vec<u32>, SchedError> {
        self.with_port(|port, fw| {
            let tree = &mut port.tree;
            let parent = tree.find_by_teid(parent_teid).ok_or(SchedError::Param("unknown parent"))?;
            let tc_node = tree.tc_node(tree[parent].tc_num).ok_or(SchedError::Param("parent outside any TC"))?;

            let full = tree[parent].children.len() + count as usize > tree.fan_out(tree[parent].layer);
            let added = tree.add_nodes_to_hw_layer(fw, tc_node, Some(parent), layer, count).map_err(|e| match e {
                SchedError::Cfg(_) if full => SchedError::MaxLimit,
                e => e,
            })?;
            Ok(added.into_iter().map(|id| tree[id].teid()).collect())
        })
    }

    /// Removes a node and everything below it. Root and TC nodes can't be removed.
    pub fn remove_node(&self, teid: u32) -> Result<(), SchedError> {
        self.with_port(|port, fw| {
            let id = port.tree.find_by_teid(teid).ok_or(SchedError::Param("unknown node"))?;
            if port.tree[id].is_fixed() {
                return Err(SchedError::Param("root and TC nodes are fixed"));
            }
            port.tree.free_node(fw, id)
        })
    }

    pub fn move_nodes(&self, parent_teid: u32, teids: &[u32]) -> Result<(), SchedError> {
        self.with_port(|port, fw| {
            let parent = port.tree.find_by_teid(parent_teid).ok_or(SchedError::Param("unknown parent"))?;
            port.tree.move_nodes(fw, parent, teids)
        })
    }

    fn suspend_resume(&self, teids: &[u32], suspend: bool) -> Result<(), SchedError> {
        self.with_port(|port, fw| {
            let ids = teids
                .iter()
                .map(|teid| port.tree.find_by_teid(*teid).ok_or(SchedError::Param("unknown node")))
                .collect::<Result<Vec<_>, _>>()?;
            port.tree.suspend_resume(fw, &ids, suspend)
        })
    }

    pub fn suspend_nodes(&self, teids: &[u32]) -> Result<(), SchedError> {
        self.suspend_resume(teids, true)
    }

    pub fn resume_nodes(&self, teids: &[u32]) -> Result<(), SchedError> {
        self.suspend_resume(teids, false)
    }

    /// Limits a node to `bw` kbps, or removes the limit with [`DFLT_BW`](crate::DFLT_BW).
    pub fn set_node_bw_lmt(&self, teid: u32, rl_type: RlType, bw: u32) -> Result<(), SchedError> {
        self.with_port(|port, fw| {
            let id = port.tree.find_by_teid(teid).ok_or(SchedError::Param("unknown node"))?;
            port.tree.set_node_bw_lmt(fw, &mut port.pool, id, rl_type, bw)
        })
    }

    /// Sets the strict priority (0-7) of a node among its siblings.
    pub fn set_node_priority(&self, teid: u32, prio: u8) -> Result<(), SchedError> {
        if prio > 7 {
            return Err(SchedError::Param("priority"));
        }
        self.with_port(|port, fw| {
            let id = port.tree.find_by_teid(teid).ok_or(SchedError::Param("unknown node"))?;
            port.tree.set_node_priority(fw, id, prio)
        })
    }

    pub fn set_node_weight(&self, teid: u32, weight: u16) -> Result<(), SchedError> {
        self.with_port(|port, fw| {
            let id = port.tree.find_by_teid(teid).ok_or(SchedError::Param("unknown node"))?;
            port.tree.set_node_weight(fw, id, weight)
        })
    }

    pub fn cfg_node_bw_alloc(&self, teid: u32, rl_type: RlType, bw_alloc: u16) -> Result<(), SchedError> {
        self.with_port(|port, fw| {
            let id = port.tree.find_by_teid(teid).ok_or(SchedError::Param("unknown node"))?;
            port.tree.cfg_node_bw_alloc(fw, id, rl_type, bw_alloc)
        })
    }

    /// Compares the subtree at `teid` with firmware. Differences are logged.
    pub fn is_balanced(&self, teid: u32) -> Result<bool, SchedError> {
        self.with_port(|port, fw| {
            let id = port.tree.find_by_teid(teid).ok_or(SchedError::Param("unknown node"))?;
            port.tree.is_balanced(fw, id)
        })
    }

    /// Asks firmware for the path from `teid` to the root.
    pub fn query_node_to_root(&self, teid: u32) -> Result<Vec<TxSchedElemData>, SchedError> {
        self.with_port(|_, fw| fw.query_node_to_root(teid))
    }

    pub fn cfg_node_attr(&self, attrs: &[NodeAttr]) -> Result<(), SchedError> {
        if attrs.is_empty() {
            return Err(SchedError::Param("no node attributes"));
        }
        self.with_port(|_, fw| fw.cfg_node_attr(attrs))
    }

    /// Reads back the firmware copy of every profile in use.
    pub fn query_rl_profiles(&self) -> Result<Vec<RlProfileElem>, SchedError> {
        self.with_port(|port, fw| {
            let elems: Vec<_> = port.pool.iter().map(|p| p.elem).collect();
            if elems.is_empty() {
                return Ok(Vec::new());
            }
            fw.query_rl_profiles(&elems)
        })
    }

    /// Sets the burst size of profiles created from now on, in bytes.
    pub fn set_rl_burst_size(&self, bytes: u32) -> Result<(), SchedError> {
        let burst = encode_burst_size(bytes).ok_or(SchedError::Param("burst size"))?;
        let mut port = self.port.lock();
        port.burst = Some(burst);
        port.pool.set_burst(burst);
        debug!(bytes, burst, "rate limiter burst size set");
        Ok(())
    }

    /// Makes room for `max_queues` queues of `owner` on the VSI's node of `tc`, adding
    /// the node when needed. With `enable` false the node is suspended instead.
    pub fn cfg_vsi(&self, vsi: u16, tc: u8, max_queues: u16, owner: Owner, enable: bool) -> Result<(), SchedError> {
        self.with_port(|port, fw| port.cfg_vsi(fw, vsi, tc, max_queues, owner, enable))
    }

    /// Configures the VSI on every TC: TCs in `tc_bitmap` get `max_queues[tc]` queues,
    /// the others are suspended.
    pub fn cfg_vsi_qs(
        &self,
        vsi: u16,
        tc_bitmap: u8,
        max_queues: &[u16; MAX_TCS],
        owner: Owner,
    ) -> Result<(), SchedError> {
        self.with_port(|port, fw| {
            for tc in 0..MAX_TCS as u8 {
                if port.tree.tc_node(tc).is_none() {
                    continue;
                }
                let enable = tc_bitmap & tc_bit(tc) != 0;
                port.cfg_vsi(fw, vsi, tc, max_queues[tc as usize], owner, enable)?;
            }
            Ok(())
        })
    }

    /// Removes the VSI's `owner` nodes. Fails with [`SchedError::InUse`] while a queue is
    /// enabled below the VSI.
    pub fn rm_vsi_cfg(&self, vsi: u16, owner: Owner) -> Result<(), SchedError> {
        self.with_port(|port, fw| port.rm_vsi_cfg(fw, vsi, owner))
    }

    /// Creates or updates an aggregator so it has a node on exactly the TCs in
    /// `tc_bitmap`.
    pub fn cfg_agg(&self, agg_id: u32, agg_type: AggType, tc_bitmap: u8) -> Result<(), SchedError> {
        self.with_port(|port, fw| {
            port.cfg_agg(fw, agg_id, agg_type, tc_bitmap)?;
            if let Some(agg) = port.aggs.get_mut(&agg_id) {
                agg.replay_tc_bitmap = tc_bitmap;
            }
            Ok(())
        })
    }

    pub fn rm_agg_cfg(&self, agg_id: u32) -> Result<(), SchedError> {
        self.with_port(|port, fw| port.rm_agg_cfg(fw, agg_id))
    }

    /// Moves the VSI below the aggregator on the TCs in `tc_bitmap`.
    pub fn move_vsi_to_agg(&self, agg_id: u32, vsi: u16, tc_bitmap: u8) -> Result<(), SchedError> {
        self.with_port(|port, fw| {
            port.assoc_vsi_to_agg(fw, agg_id, vsi, tc_bitmap)?;
            if let Some(info) = port.aggs.get_mut(&agg_id).and_then(|a| a.vsi_mut(vsi)) {
                info.replay_tc_bitmap = tc_bitmap;
            }
            Ok(())
        })
    }

    /// Enables a LAN Tx queue of the VSI. Returns the queue's TEID.
    pub fn ena_txq(
        &self,
        vsi: u16,
        tc: u8,
        q_handle: u16,
        txq_id: u16,
        txq_ctx: [u8; TXQ_CTX_LEN],
    ) -> Result<u32, SchedError> {
        self.with_port(|port, fw| port.ena_txq(fw, vsi, tc, q_handle, txq_id, txq_ctx))
    }

    pub fn dis_txq(&self, vsi: u16, tc: u8, q_handle: u16) -> Result<(), SchedError> {
        self.with_port(|port, fw| port.dis_txq(fw, vsi, tc, q_handle))
    }

    /// Limits the node that `id` names on `tc`, without saving the limit.
    pub fn cfg_node_bw_lmt_per_tc(
        &self,
        id: u32,
        agg_type: AggType,
        tc: u8,
        rl_type: RlType,
        bw: u32,
    ) -> Result<(), SchedError> {
        self.with_port(|port, fw| port.cfg_node_bw_lmt_per_tc(fw, id, agg_type, tc, rl_type, bw))
    }

    pub fn cfg_vsi_bw_lmt_per_tc(&self, vsi: u16, tc: u8, rl_type: RlType, bw: u32) -> Result<(), SchedError> {
        self.with_port(|port, fw| port.cfg_vsi_bw_lmt_per_tc(fw, vsi, tc, rl_type, bw))
    }

    pub fn cfg_agg_bw_lmt_per_tc(&self, agg_id: u32, tc: u8, rl_type: RlType, bw: u32) -> Result<(), SchedError> {
        self.with_port(|port, fw| port.cfg_agg_bw_lmt_per_tc(fw, agg_id, tc, rl_type, bw))
    }

    pub fn cfg_tc_node_bw_lmt(&self, tc: u8, rl_type: RlType, bw: u32) -> Result<(), SchedError> {
        self.with_port(|port, fw| port.cfg_tc_node_bw_lmt(fw, tc, rl_type, bw))
    }

    pub fn cfg_tc_node_bw_alloc(&self, tc: u8, rl_type: RlType, bw_alloc: u16) -> Result<(), SchedError> {
        self.with_port(|port, fw| port.cfg_tc_node_bw_alloc(fw, tc, rl_type, bw_alloc))
    }

    pub fn cfg_q_bw_lmt(&self, vsi: u16, tc: u8, q_handle: u16, rl_type: RlType, bw: u32) -> Result<(), SchedError> {
        self.with_port(|port, fw| port.cfg_q_bw_lmt(fw, vsi, tc, q_handle, rl_type, bw))
    }

    pub fn cfg_vsi_bw_alloc(
        &self,
        vsi: u16,
        ena_tcmap: u8,
        rl_type: RlType,
        bw_alloc: &[u16; MAX_TCS],
    ) -> Result<(), SchedError> {
        self.with_port(|port, fw| port.cfg_vsi_bw_alloc(fw, vsi, ena_tcmap, rl_type, bw_alloc))
    }

    pub fn cfg_agg_bw_alloc(
        &self,
        agg_id: u32,
        ena_tcmap: u8,
        rl_type: RlType,
        bw_alloc: &[u16; MAX_TCS],
    ) -> Result<(), SchedError> {
        self.with_port(|port, fw| port.cfg_agg_bw_alloc(fw, agg_id, ena_tcmap, rl_type, bw_alloc))
    }

    /// Sets minimum, maximum and shared limits of the VSI on all of its TCs.
    /// [`DFLT_BW`](crate::DFLT_BW) removes a limit.
    pub fn cfg_vsi_bw_shared_lmt(&self, vsi: u16, min_bw: u32, max_bw: u32, shared_bw: u32) -> Result<(), SchedError> {
        let limits = SharedLimits { min_bw, max_bw, shared_bw };
        self.with_port(|port, fw| port.cfg_vsi_bw_shared_lmt(fw, vsi, limits))
    }

    pub fn cfg_agg_bw_shared_lmt(
        &self,
        agg_id: u32,
        min_bw: u32,
        max_bw: u32,
        shared_bw: u32,
    ) -> Result<(), SchedError> {
        let limits = SharedLimits { min_bw, max_bw, shared_bw };
        self.with_port(|port, fw| port.cfg_agg_bw_shared_lmt(fw, agg_id, limits))
    }

    pub fn cfg_agg_bw_shared_lmt_per_tc(
        &self,
        agg_id: u32,
        tc: u8,
        min_bw: u32,
        max_bw: u32,
        shared_bw: u32,
    ) -> Result<(), SchedError> {
        let limits = SharedLimits { min_bw, max_bw, shared_bw };
        self.with_port(|port, fw| port.cfg_agg_bw_shared_lmt_per_tc(fw, agg_id, tc, limits))
    }

    /// Sets the priority of VSIs below the aggregator's node on `tc`.
    pub fn cfg_agg_vsi_priority_per_tc(&self, agg_id: u32, tc: u8, prios: &[(u16, u8)]) -> Result<(), SchedError> {
        if prios.iter().any(|(_, p)| *p > 7) {
            return Err(SchedError::Param("priority"));
        }
        self.with_port(|port, fw| port.cfg_agg_vsi_priority_per_tc(fw, agg_id, tc, prios))
    }

    /// Sets the priority of queues, given as `(teid, priority)`.
    pub fn cfg_vsi_q_priority(&self, prios: &[(u32, u8)]) -> Result<(), SchedError> {
        if prios.iter().any(|(_, p)| *p > 7) {
            return Err(SchedError::Param("priority"));
        }
        self.with_port(|port, fw| port.cfg_vsi_q_priority(fw, prios))
    }

    pub fn replay_tc_node_bw(&self) -> Result<(), SchedError> {
        self.with_port(|port, fw| port.replay_tc_node_bw(fw))
    }

    /// Rebuilds every aggregator that lost nodes. Failures are logged only.
    pub fn replay_agg(&self) -> Result<(), SchedError> {
        self.with_port(|port, fw| {
            port.replay_agg(fw);
            Ok(())
        })
    }

    pub fn replay_vsi_agg(&self, vsi: u16) -> Result<(), SchedError> {
        self.with_port(|port, fw| port.replay_vsi_agg(fw, vsi))
    }

    pub fn replay_vsi_bw(&self, vsi: u16, tc_bitmap: u8) -> Result<(), SchedError> {
        self.with_port(|port, fw| port.replay_vsi_bw(fw, vsi, tc_bitmap))
    }

    pub fn replay_q_bw(&self, vsi: u16, tc: u8, q_handle: u16) -> Result<(), SchedError> {
        self.with_port(|port, fw| port.replay_q_bw(fw, vsi, tc, q_handle))
    }

    /// Re-applies saved settings to the node with `teid`.
    pub fn replay_node_bw(&self, teid: u32, info: &BwTypeInfo) -> Result<(), SchedError> {
        self.with_port(|port, fw| {
            let id = port.tree.find_by_teid(teid).ok_or(SchedError::Param("unknown node"))?;
            port.tree.replay_node_bw(fw, &mut port.pool, id, info)
        })
    }

    pub fn vsi_bw_info(&self, vsi: u16, tc: u8) -> Option<BwTypeInfo> {
        self.port.lock().vsis.get(&vsi)?.bw.get(tc as usize).copied()
    }

    pub fn agg_bw_info(&self, agg_id: u32, tc: u8) -> Option<BwTypeInfo> {
        self.port.lock().aggs.get(&agg_id)?.bw.get(tc as usize).copied()
    }

    pub fn tc_bw_info(&self, tc: u8) -> Option<BwTypeInfo> {
        self.port.lock().tc_bw.get(tc as usize).copied()
    }

    pub fn vsi_max_queues(&self, vsi: u16, tc: u8, owner: Owner) -> Option<u16> {
        self.port.lock().vsis.get(&vsi).map(|c| c.max_queues(tc, owner))
    }

    /// TCs the aggregator currently has nodes on.
    pub fn agg_tc_bitmap(&self, agg_id: u32) -> Option<u8> {
        self.port.lock().aggs.get(&agg_id).map(|a| a.tc_bitmap)
    }

    /// Aggregator a VSI was moved to, `None` for the default aggregator.
    pub fn vsi_agg(&self, vsi: u16) -> Option<u32> {
        self.port.lock().vsi_agg(vsi)
    }
}

impl<T: CommandTransport> std::fmt::Debug for Scheduler<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler").field("options", &self.options).field("stats", self.fw.stats()).finish()
    }
}
