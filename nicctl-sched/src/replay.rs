//! Saved bandwidth settings, re-applied to a rebuilt tree after a reset.
use tracing::{debug, warn};

use nicctl_common::constants::MAX_TRAFFIC_CLASS;
use nicctl_wire::rl::RlType;

use crate::{
    aq::Firmware,
    binding::{tc_bit, Port},
    CommandTransport, SchedError, DFLT_BW,
};

const CIR: u8 = 1 << 0;
const EIR: u8 = 1 << 1;
const SHARED: u8 = 1 << 2;
const PRIO: u8 = 1 << 3;
const CIR_WT: u8 = 1 << 4;
const EIR_WT: u8 = 1 << 5;

/// What was configured on one node, and with which values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BwTypeInfo {
    bitmap: u8,
    cir_bw: u32,
    cir_wt: u16,
    eir_bw: u32,
    eir_wt: u16,
    shared_bw: u32,
    prio: u8,
}

impl BwTypeInfo {
    /// Returns `true` if nothing was saved.
    pub const fn is_empty(&self) -> bool {
        self.bitmap == 0
    }

    /// Saves a limit. The default bandwidth forgets it instead.
    pub fn set_bw(&mut self, rl_type: RlType, bw: u32) {
        let (bit, slot) = match rl_type {
            RlType::Cir => (CIR, &mut self.cir_bw),
            RlType::Eir => (EIR, &mut self.eir_bw),
            RlType::Srl => (SHARED, &mut self.shared_bw),
        };
        if bw == DFLT_BW {
            self.bitmap &= !bit;
            *slot = 0;
        } else {
            self.bitmap |= bit;
            *slot = bw;
        }
    }

    /// Saves a CIR or EIR weight. Shared limiters have no weight and are ignored.
    pub fn set_weight(&mut self, rl_type: RlType, weight: u16) {
        match rl_type {
            RlType::Cir => {
                self.bitmap |= CIR_WT;
                self.cir_wt = weight;
            }
            RlType::Eir => {
                self.bitmap |= EIR_WT;
                self.eir_wt = weight;
            }
            RlType::Srl => {}
        }
    }

    pub fn set_priority(&mut self, prio: u8) {
        self.bitmap |= PRIO;
        self.prio = prio;
    }

    pub const fn bw(&self, rl_type: RlType) -> Option<u32> {
        match rl_type {
            RlType::Cir if self.bitmap & CIR != 0 => Some(self.cir_bw),
            RlType::Eir if self.bitmap & EIR != 0 => Some(self.eir_bw),
            RlType::Srl if self.bitmap & SHARED != 0 => Some(self.shared_bw),
            _ => None,
        }
    }

    pub const fn weight(&self, rl_type: RlType) -> Option<u16> {
        match rl_type {
            RlType::Cir if self.bitmap & CIR_WT != 0 => Some(self.cir_wt),
            RlType::Eir if self.bitmap & EIR_WT != 0 => Some(self.eir_wt),
            _ => None,
        }
    }

    pub const fn priority(&self) -> Option<u8> {
        if self.bitmap & PRIO != 0 {
            return Some(self.prio);
        }
        None
    }
}

impl Port {
    /// Re-applies the saved TC node settings. TCs without a node are skipped.
    pub(crate) fn replay_tc_node_bw<T: CommandTransport>(&mut self, fw: &Firmware<T>) -> Result<(), SchedError> {
        for tc in 0..MAX_TRAFFIC_CLASS {
            let Some(node) = self.tree.tc_node(tc) else {
                continue;
            };
            let info = self.tc_bw[tc as usize];
            self.tree.replay_node_bw(fw, &mut self.pool, node, &info)?;
        }
        Ok(())
    }

    fn replay_agg_bw<T: CommandTransport>(
        &mut self,
        fw: &Firmware<T>,
        agg_id: u32,
        tc_bitmap: u8,
    ) -> Result<(), SchedError> {
        let Some(saved) = self.aggs.get(&agg_id).map(|a| a.bw) else {
            return Ok(());
        };
        for tc in 0..MAX_TRAFFIC_CLASS {
            if tc_bitmap & tc_bit(tc) == 0 || saved[tc as usize].is_empty() {
                continue;
            }
            let node = self.tree.agg_node(tc, agg_id).ok_or(SchedError::Param("aggregator node"))?;
            self.tree.replay_node_bw(fw, &mut self.pool, node, &saved[tc as usize])?;
        }
        Ok(())
    }

    /// Rebuilds aggregators whose nodes no longer match what was configured, and their
    /// bandwidth. Failures are logged and the next aggregator is tried.
    pub(crate) fn replay_agg<T: CommandTransport>(&mut self, fw: &Firmware<T>) {
        let tc_map = self.tc_map();
        let pending: Vec<_> = self
            .aggs
            .values()
            .filter(|a| a.tc_bitmap != a.replay_tc_bitmap)
            .map(|a| (a.agg_id, a.agg_type, a.replay_tc_bitmap & tc_map))
            .collect();

        for (agg_id, agg_type, bitmap) in pending {
            if let Err(e) = self.cfg_agg(fw, agg_id, agg_type, bitmap) {
                warn!(agg_id, err = %e, "failed to replay aggregator");
                continue;
            }
            if let Err(e) = self.replay_agg_bw(fw, agg_id, bitmap) {
                warn!(agg_id, err = %e, "failed to replay aggregator bandwidth");
            }
        }
    }

    /// Re-applies the saved settings of the VSI's nodes on the TCs of `tc_bitmap`.
    pub(crate) fn replay_vsi_bw<T: CommandTransport>(
        &mut self,
        fw: &Firmware<T>,
        vsi: u16,
        tc_bitmap: u8,
    ) -> Result<(), SchedError> {
        let saved = self.vsis.get(&vsi).ok_or(SchedError::Param("unknown VSI"))?.bw;
        for tc in 0..MAX_TRAFFIC_CLASS {
            if tc_bitmap & tc_bit(tc) == 0 || saved[tc as usize].is_empty() {
                continue;
            }
            let Some(node) = self.tree.vsi_node(tc, vsi) else {
                continue;
            };
            self.tree.replay_node_bw(fw, &mut self.pool, node, &saved[tc as usize])?;
        }
        Ok(())
    }

    /// Puts the VSI back into its aggregator and re-applies both bandwidths. A VSI of
    /// the default aggregator has nothing to replay.
    pub(crate) fn replay_vsi_agg<T: CommandTransport>(&mut self, fw: &Firmware<T>, vsi: u16) -> Result<(), SchedError> {
        let Some(agg_id) = self.vsi_agg(vsi) else {
            return Ok(());
        };
        let tc_map = self.tc_map();
        let Some((agg_type, agg_bitmap, vsi_bitmap)) = self
            .aggs
            .get(&agg_id)
            .and_then(|a| Some((a.agg_type, a.replay_tc_bitmap, a.vsi(vsi)?.replay_tc_bitmap)))
        else {
            return Ok(());
        };

        self.cfg_agg(fw, agg_id, agg_type, agg_bitmap & tc_map)?;
        self.replay_agg_bw(fw, agg_id, agg_bitmap & tc_map)?;
        self.assoc_vsi_to_agg(fw, agg_id, vsi, vsi_bitmap & tc_map)?;

        let bitmap = self.aggs.get(&agg_id).and_then(|a| a.vsi(vsi)).map(|v| v.tc_bitmap).unwrap_or_default();
        self.replay_vsi_bw(fw, vsi, bitmap)?;
        debug!(vsi, agg_id, "replayed VSI aggregator");
        Ok(())
    }

    /// Re-applies the saved settings of an enabled queue.
    pub(crate) fn replay_q_bw<T: CommandTransport>(
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
            .ok_or(SchedError::Param("queue handle out of range"))?;
        let leaf = self.tree.find_by_teid(q.teid).ok_or(SchedError::Param("queue not enabled"))?;
        self.tree.replay_node_bw(fw, &mut self.pool, leaf, &q.bw)
    }
}
