use tracing::{debug, warn};

use nicctl_common::constants::MAX_TRAFFIC_CLASS;

use super::{tc_bit, AggInfo, AggType, AggVsiInfo, Port};
use crate::{
    aq::Firmware,
    tree::{NodeId, MAX_LAYERS},
    CommandTransport, SchedError, DFLT_AGG_ID,
};

impl Port {
    /// First node of the subtree at `start` that can take another VSI. Intermediate
    /// nodes with room are marked as not needing a new node in `num`.
    fn free_vsi_parent(&self, start: NodeId, num: &mut [u16; MAX_LAYERS]) -> Result<Option<NodeId>, SchedError> {
        let vsil = self.tree.layers.vsi();
        for id in self.tree.subtree(start)? {
            let layer = self.tree[id].layer;
            if layer + 1 == vsil {
                if self.tree.has_room(id) {
                    return Ok(Some(id));
                }
            } else if layer + 1 < vsil && self.tree.has_room(id) {
                num[layer as usize] = 0;
            }
        }
        Ok(None)
    }

    /// Moves the VSI node of `tc` below the aggregator's node, creating intermediate
    /// nodes when none of the aggregator's have room.
    pub(crate) fn move_vsi_to_agg_tc<T: CommandTransport>(
        &mut self,
        fw: &Firmware<T>,
        vsi: u16,
        agg_id: u32,
        tc: u8,
    ) -> Result<(), SchedError> {
        let tc_node = self.tree.tc_node(tc).ok_or(SchedError::Cfg("traffic class node"))?;
        if agg_id == DFLT_AGG_ID && self.tree.agg_node(tc, agg_id).is_none() {
            self.add_agg_cfg(fw, agg_id, tc)?;
        }
        let agg_node = self.tree.agg_node(tc, agg_id).ok_or(SchedError::DoesNotExist)?;
        let vsi_node = self.tree.vsi_node(tc, vsi).ok_or(SchedError::DoesNotExist)?;
        if self.tree.in_subtree(agg_node, vsi_node) {
            return Ok(());
        }

        let (aggl, vsil) = (self.tree.layers.agg(), self.tree.layers.vsi());
        let mut num = [0u16; MAX_LAYERS];
        for layer in aggl + 1..vsil {
            num[layer as usize] = 1;
        }

        let mut parent = None;
        for child in self.tree[agg_node].children.clone() {
            parent = self.free_vsi_parent(child, &mut num)?;
            if parent.is_some() {
                break;
            }
        }

        let parent = match parent {
            Some(parent) => parent,
            None => {
                let mut parent = agg_node;
                for layer in aggl + 1..vsil {
                    let want = num[layer as usize];
                    let added = self.tree.add_nodes_to_layer(fw, tc_node, parent, layer, want)?;
                    if added.len() != want as usize {
                        return Err(SchedError::Cfg("aggregator path nodes"));
                    }
                    parent = match added.first() {
                        Some(first) => *first,
                        None => self.tree[parent]
                            .children
                            .first()
                            .copied()
                            .ok_or(SchedError::Cfg("aggregator path nodes"))?,
                    };
                }
                parent
            }
        };

        let vsi_teid = self.tree[vsi_node].teid();
        self.tree.move_nodes(fw, parent, &[vsi_teid])?;
        debug!(vsi, agg_id, tc, "moved VSI to aggregator");
        Ok(())
    }

    /// Moves every VSI of the aggregator on `tc` back to the default aggregator.
    fn move_all_vsi_to_dflt_agg<T: CommandTransport>(
        &mut self,
        fw: &Firmware<T>,
        agg_id: u32,
        tc: u8,
        rm_vsi_info: bool,
    ) -> Result<(), SchedError> {
        let vsis: Vec<_> = match self.aggs.get(&agg_id) {
            Some(agg) => agg.vsis.iter().filter(|v| v.tc_bitmap & tc_bit(tc) != 0).map(|v| v.vsi).collect(),
            None => return Ok(()),
        };

        for vsi in vsis {
            self.move_vsi_to_agg_tc(fw, vsi, DFLT_AGG_ID, tc)?;
            if let Some(agg) = self.aggs.get_mut(&agg_id) {
                if let Some(info) = agg.vsi_mut(vsi) {
                    info.tc_bitmap &= !tc_bit(tc);
                }
                if rm_vsi_info {
                    agg.vsis.retain(|v| v.vsi != vsi || v.tc_bitmap != 0);
                }
            }
        }
        Ok(())
    }

    /// Returns `true` if any VSI hangs below the aggregator node.
    fn is_agg_inuse(&self, node: NodeId) -> bool {
        let vsil = self.tree.layers.vsi();
        let mut stack = vec![node];
        while let Some(id) = stack.pop() {
            let n = &self.tree[id];
            if n.layer + 1 < vsil {
                stack.extend(n.children.iter().copied());
            } else if !n.children.is_empty() {
                return true;
            }
        }
        false
    }

    /// Removes the aggregator's node on `tc` along with the single-child chain above it.
    fn rm_agg_node<T: CommandTransport>(&mut self, fw: &Firmware<T>, agg_id: u32, tc: u8) -> Result<(), SchedError> {
        self.tree.tc_node(tc).ok_or(SchedError::Cfg("traffic class node"))?;
        let agg_node = self.tree.agg_node(tc, agg_id).ok_or(SchedError::DoesNotExist)?;
        if self.is_agg_inuse(agg_node) {
            return Err(SchedError::InUse);
        }

        let entry = self.tree.layers.entry();
        let mut node = agg_node;
        while self.tree[node].layer > entry {
            match self.tree[node].parent {
                Some(parent) if self.tree[parent].children.len() == 1 => node = parent,
                _ => break,
            }
        }
        self.tree.free_node(fw, node)
    }

    fn rm_agg_cfg_tc<T: CommandTransport>(
        &mut self,
        fw: &Firmware<T>,
        agg_id: u32,
        tc: u8,
        rm_vsi_info: bool,
    ) -> Result<(), SchedError> {
        let on_tc = self.aggs.get(&agg_id).is_some_and(|a| a.tc_bitmap & tc_bit(tc) != 0);
        if !on_tc {
            return Ok(());
        }

        self.move_all_vsi_to_dflt_agg(fw, agg_id, tc, rm_vsi_info)?;
        self.rm_agg_node(fw, agg_id, tc)?;
        if let Some(agg) = self.aggs.get_mut(&agg_id) {
            agg.tc_bitmap &= !tc_bit(tc);
        }
        Ok(())
    }

    /// Creates the aggregator's node on `tc`, reusing existing nodes with room above it.
    pub(crate) fn add_agg_cfg<T: CommandTransport>(
        &mut self,
        fw: &Firmware<T>,
        agg_id: u32,
        tc: u8,
    ) -> Result<(), SchedError> {
        let tc_node = self.tree.tc_node(tc).ok_or(SchedError::Cfg("traffic class node"))?;
        if self.tree.agg_node(tc, agg_id).is_some() {
            return Ok(());
        }

        let (entry, aggl) = (self.tree.layers.entry(), self.tree.layers.agg());
        let mut num = [0u16; MAX_LAYERS];
        num[aggl as usize] = 1;
        for layer in (entry..aggl).rev() {
            if self.tree.chain(tc, layer).any(|id| self.tree.has_room(id)) {
                break;
            }
            num[layer as usize] += 1;
        }

        let mut parent = tc_node;
        for layer in entry..=aggl {
            let want = num[layer as usize];
            let added = self.tree.add_nodes_to_layer(fw, tc_node, parent, layer, want)?;
            if added.len() != want as usize {
                return Err(SchedError::Cfg("aggregator nodes"));
            }
            match added.first() {
                Some(first) => {
                    parent = *first;
                    if layer == aggl {
                        self.tree[parent].agg_id = agg_id;
                    }
                }
                None => {
                    parent =
                        self.tree[parent].children.first().copied().ok_or(SchedError::Cfg("aggregator nodes"))?;
                }
            }
        }
        debug!(agg_id, tc, teid = self.tree[parent].teid(), "added aggregator node");
        Ok(())
    }

    /// Gives the aggregator a node on exactly the TCs of `tc_bitmap`.
    pub(crate) fn cfg_agg<T: CommandTransport>(
        &mut self,
        fw: &Firmware<T>,
        agg_id: u32,
        agg_type: AggType,
        tc_bitmap: u8,
    ) -> Result<(), SchedError> {
        self.aggs.entry(agg_id).or_insert_with(|| AggInfo::new(agg_id, agg_type));

        for tc in 0..MAX_TRAFFIC_CLASS {
            if tc_bitmap & tc_bit(tc) == 0 {
                self.rm_agg_cfg_tc(fw, agg_id, tc, false)?;
                continue;
            }
            if self.aggs.get(&agg_id).is_some_and(|a| a.tc_bitmap & tc_bit(tc) != 0) {
                continue;
            }
            self.add_agg_cfg(fw, agg_id, tc)?;
            if let Some(agg) = self.aggs.get_mut(&agg_id) {
                agg.tc_bitmap |= tc_bit(tc);
            }
        }
        Ok(())
    }

    /// Moves the VSI into the aggregator on every TC of `tc_bitmap`, taking those TCs
    /// away from the aggregator it was in before.
    pub(crate) fn assoc_vsi_to_agg<T: CommandTransport>(
        &mut self,
        fw: &Firmware<T>,
        agg_id: u32,
        vsi: u16,
        tc_bitmap: u8,
    ) -> Result<(), SchedError> {
        if !self.vsis.contains_key(&vsi) {
            return Err(SchedError::Param("unknown VSI"));
        }
        let agg = self.aggs.get_mut(&agg_id).ok_or(SchedError::Param("unknown aggregator"))?;
        if agg.vsi(vsi).is_none() {
            agg.vsis.push(AggVsiInfo { vsi, tc_bitmap: 0, replay_tc_bitmap: 0 });
        }
        let old_agg = self.aggs.values().find(|a| a.agg_id != agg_id && a.vsi(vsi).is_some()).map(|a| a.agg_id);

        let mut res = Ok(());
        for tc in 0..MAX_TRAFFIC_CLASS {
            if tc_bitmap & tc_bit(tc) == 0 {
                continue;
            }
            if let Err(e) = self.move_vsi_to_agg_tc(fw, vsi, agg_id, tc) {
                res = Err(e);
                break;
            }
            if let Some(info) = self.aggs.get_mut(&agg_id).and_then(|a| a.vsi_mut(vsi)) {
                info.tc_bitmap |= tc_bit(tc);
            }
            if let Some(info) = old_agg.and_then(|id| self.aggs.get_mut(&id)).and_then(|a| a.vsi_mut(vsi)) {
                info.tc_bitmap &= !tc_bit(tc);
            }
        }

        if let Some(old) = old_agg.and_then(|id| self.aggs.get_mut(&id)) {
            old.vsis.retain(|v| v.vsi != vsi || v.tc_bitmap != 0);
        }
        res
    }

    /// Removes an aggregator on every TC. Its VSIs go back to the default aggregator.
    pub(crate) fn rm_agg_cfg<T: CommandTransport>(&mut self, fw: &Firmware<T>, agg_id: u32) -> Result<(), SchedError> {
        if !self.aggs.contains_key(&agg_id) {
            return Err(SchedError::DoesNotExist);
        }
        for tc in 0..MAX_TRAFFIC_CLASS {
            self.rm_agg_cfg_tc(fw, agg_id, tc, true)?;
        }
        if self.aggs.get(&agg_id).is_some_and(|a| a.tc_bitmap != 0) {
            warn!(agg_id, "aggregator still holds traffic classes");
            return Err(SchedError::InUse);
        }

        self.aggs.remove(&agg_id);
        self.pool.rm_unused(fw);
        debug!(agg_id, "removed aggregator");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{binding::test_port as setup, binding::Owner, testing::FwTopology};

    #[test]
    fn aggregator_gets_own_path() {
        let (_fake, fw, mut port) = setup(FwTopology::nine_layer(2));
        port.cfg_agg(&fw, 10, AggType::Agg, 0b11).unwrap();

        for tc in 0..2 {
            let node = port.tree.agg_node(tc, 10).unwrap();
            assert_eq!(port.tree[node].layer, 4);
        }
        assert_eq!(port.aggs[&10].tc_bitmap, 0b11);

        // Configuring again is a no-op
        let len = port.tree.len();
        port.cfg_agg(&fw, 10, AggType::Agg, 0b11).unwrap();
        assert_eq!(port.tree.len(), len);
        port.tree.check_invariants();
    }

    #[test]
    fn vsi_moves_between_aggregators() {
        let (fake, fw, mut port) = setup(FwTopology::nine_layer(1));
        port.cfg_vsi(&fw, 4, 0, 2, Owner::Lan, true).unwrap();
        port.cfg_agg(&fw, 10, AggType::Agg, 0b1).unwrap();
        port.cfg_agg(&fw, 20, AggType::Agg, 0b1).unwrap();

        port.assoc_vsi_to_agg(&fw, 10, 4, 0b1).unwrap();
        let vsi_node = port.tree.vsi_node(0, 4).unwrap();
        let agg10 = port.tree.agg_node(0, 10).unwrap();
        assert!(port.tree.in_subtree(agg10, vsi_node));
        assert_eq!(fake.parent_of(port.tree[vsi_node].teid()), port.tree[vsi_node].parent.map(|p| port.tree[p].teid()));
        assert_eq!(port.vsi_agg(4), Some(10));

        port.assoc_vsi_to_agg(&fw, 20, 4, 0b1).unwrap();
        let agg20 = port.tree.agg_node(0, 20).unwrap();
        assert!(port.tree.in_subtree(agg20, vsi_node));
        assert!(port.aggs[&10].vsis.is_empty());
        assert_eq!(port.aggs[&20].vsi(4).map(|v| v.tc_bitmap), Some(0b1));
        port.tree.check_invariants();
    }

    #[test]
    fn aggregator_with_vsis_is_removed_after_moving_them_home() {
        let (_fake, fw, mut port) = setup(FwTopology::nine_layer(1));
        port.cfg_vsi(&fw, 4, 0, 2, Owner::Lan, true).unwrap();
        port.cfg_agg(&fw, 10, AggType::Agg, 0b1).unwrap();
        port.assoc_vsi_to_agg(&fw, 10, 4, 0b1).unwrap();

        port.rm_agg_cfg(&fw, 10).unwrap();
        assert!(port.tree.agg_node(0, 10).is_none());
        assert!(!port.aggs.contains_key(&10));

        let vsi_node = port.tree.vsi_node(0, 4).unwrap();
        let home = port.tree.agg_node(0, DFLT_AGG_ID).unwrap();
        assert!(port.tree.in_subtree(home, vsi_node));
        port.tree.check_invariants();
    }

    #[test]
    fn dropping_a_tc_keeps_the_others() {
        let (_fake, fw, mut port) = setup(FwTopology::nine_layer(2));
        port.cfg_agg(&fw, 10, AggType::Agg, 0b11).unwrap();
        port.cfg_agg(&fw, 10, AggType::Agg, 0b10).unwrap();
        assert!(port.tree.agg_node(0, 10).is_none());
        assert!(port.tree.agg_node(1, 10).is_some());
        assert_eq!(port.aggs[&10].tc_bitmap, 0b10);
    }

    #[test]
    fn unknown_aggregator() {
        let (_fake, fw, mut port) = setup(FwTopology::nine_layer(1));
        port.cfg_vsi(&fw, 4, 0, 2, Owner::Lan, true).unwrap();
        assert!(matches!(port.rm_agg_cfg(&fw, 77), Err(SchedError::DoesNotExist)));
        assert!(matches!(port.assoc_vsi_to_agg(&fw, 77, 4, 1), Err(SchedError::Param(_))));
        assert!(matches!(port.move_vsi_to_agg_tc(&fw, 4, 77, 0), Err(SchedError::DoesNotExist)));
    }
}
