//! VSI, aggregator and queue bookkeeping on top of the scheduler tree.
//!
//! [`Port`] holds everything a scheduler knows about one port: the tree, the profile pool
//! and the records of which VSI queues, aggregators and bandwidths were configured. The
//! records outlive the tree so a rebuilt tree can be configured again.
use rustc_hash::FxHashMap;

use nicctl_common::constants::MAX_TRAFFIC_CLASS;

use crate::{replay::BwTypeInfo, rl::ProfilePool, tree::SchedTree};

mod agg;
mod bw;
mod queue;
mod vsi;

pub(crate) use bw::SharedLimits;

pub(crate) const MAX_TCS: usize = MAX_TRAFFIC_CLASS as usize;

/// Which function a VSI's queue group nodes were added for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Owner {
    #[default]
    Lan,
    Rdma,
}

/// Kind of object a per-TC bandwidth setting addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggType {
    Tc,
    Agg,
    Vsi,
    QueueGroup,
    Queue,
}

/// One LAN Tx queue of a VSI.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct QueueCtx {
    /// Set while the queue is enabled.
    pub(crate) handle: Option<u16>,
    pub(crate) teid: u32,
    pub(crate) txq_id: u16,
    pub(crate) bw: BwTypeInfo,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct VsiCtx {
    pub(crate) max_lanq: [u16; MAX_TCS],
    pub(crate) max_rdmaq: [u16; MAX_TCS],
    pub(crate) bw: [BwTypeInfo; MAX_TCS],
    pub(crate) lan_q: [Vec<QueueCtx>; MAX_TCS],
}

impl VsiCtx {
    pub(crate) fn max_queues(&self, tc: u8, owner: Owner) -> u16 {
        let max = match owner {
            Owner::Lan => &self.max_lanq,
            Owner::Rdma => &self.max_rdmaq,
        };
        max.get(tc as usize).copied().unwrap_or_default()
    }

    /// No queue capacity, enabled queue or saved setting left.
    pub(crate) fn is_idle(&self) -> bool {
        self.max_lanq.iter().chain(&self.max_rdmaq).all(|n| *n == 0)
            && self.bw.iter().all(BwTypeInfo::is_empty)
            && self.lan_q.iter().flatten().all(|q| q.handle.is_none() && q.bw.is_empty())
    }

    pub(crate) fn set_max_queues(&mut self, tc: u8, owner: Owner, n: u16) {
        let max = match owner {
            Owner::Lan => &mut self.max_lanq,
            Owner::Rdma => &mut self.max_rdmaq,
        };
        if let Some(slot) = max.get_mut(tc as usize) {
            *slot = n;
        }
    }
}

/// A VSI's membership in an aggregator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct AggVsiInfo {
    pub(crate) vsi: u16,
    pub(crate) tc_bitmap: u8,
    pub(crate) replay_tc_bitmap: u8,
}

#[derive(Debug, Clone)]
pub(crate) struct AggInfo {
    pub(crate) agg_id: u32,
    pub(crate) agg_type: AggType,
    /// TCs the aggregator currently has a node on.
    pub(crate) tc_bitmap: u8,
    pub(crate) replay_tc_bitmap: u8,
    pub(crate) vsis: Vec<AggVsiInfo>,
    pub(crate) bw: [BwTypeInfo; MAX_TCS],
}

impl AggInfo {
    pub(crate) fn new(agg_id: u32, agg_type: AggType) -> Self {
        Self {
            agg_id,
            agg_type,
            tc_bitmap: 0,
            replay_tc_bitmap: 0,
            vsis: Vec::new(),
            bw: [BwTypeInfo::default(); MAX_TCS],
        }
    }

    pub(crate) fn vsi(&self, vsi: u16) -> Option<&AggVsiInfo> {
        self.vsis.iter().find(|v| v.vsi == vsi)
    }

    pub(crate) fn vsi_mut(&mut self, vsi: u16) -> Option<&mut AggVsiInfo> {
        self.vsis.iter_mut().find(|v| v.vsi == vsi)
    }
}

#[inline]
pub(crate) const fn tc_bit(tc: u8) -> u8 {
    1 << tc
}

/// Scheduler state of one port.
#[derive(Debug)]
pub(crate) struct Port {
    pub(crate) tree: SchedTree,
    pub(crate) pool: ProfilePool,
    pub(crate) vsis: FxHashMap<u16, VsiCtx>,
    pub(crate) aggs: FxHashMap<u32, AggInfo>,
    pub(crate) tc_bw: [BwTypeInfo; MAX_TCS],
    /// Encoded burst size set at runtime, used instead of the configured one.
    pub(crate) burst: Option<u16>,
    pub(crate) ready: bool,
}

impl Port {
    pub(crate) fn new() -> Self {
        Self {
            tree: SchedTree::new(),
            pool: ProfilePool::new(0, 0, 0),
            vsis: FxHashMap::default(),
            aggs: FxHashMap::default(),
            tc_bw: [BwTypeInfo::default(); MAX_TCS],
            burst: None,
            ready: false,
        }
    }

    /// Bitmap of the TCs the tree has a node for.
    pub(crate) fn tc_map(&self) -> u8 {
        (0..MAX_TRAFFIC_CLASS).filter(|tc| self.tree.tc_node(*tc).is_some()).fold(0, |m, tc| m | tc_bit(tc))
    }

    /// Aggregator the VSI currently belongs to, if any but the default.
    pub(crate) fn vsi_agg(&self, vsi: u16) -> Option<u32> {
        self.aggs.values().find(|a| a.vsi(vsi).is_some()).map(|a| a.agg_id)
    }

    /// Forgets which nodes aggregators and VSIs hold, keeping what is needed to replay
    /// them on a new tree.
    pub(crate) fn reset_for_replay(&mut self) {
        for agg in self.aggs.values_mut() {
            agg.tc_bitmap = 0;
            for vsi in &mut agg.vsis {
                vsi.tc_bitmap = 0;
            }
        }
        for ctx in self.vsis.values_mut() {
            ctx.max_lanq = [0; MAX_TCS];
            ctx.max_rdmaq = [0; MAX_TCS];
            for queues in &mut ctx.lan_q {
                for q in queues.iter_mut() {
                    q.handle = None;
                }
            }
        }
    }
}

#[cfg(test)]
pub(crate) fn test_port(
    topo: crate::testing::FwTopology,
) -> (crate::testing::FakeFirmware, crate::aq::Firmware<crate::testing::FakeFirmware>, Port) {
    let _ = tracing_subscriber::fmt::try_init();
    let fake = crate::testing::FakeFirmware::new(topo);
    let fw = crate::aq::Firmware::new(fake.clone());
    let mut port = Port::new();
    port.tree.apply_resources(fw.query_sched_res().unwrap()).unwrap();
    port.tree.init_port(&fw, &fw.get_dflt_topo(0).unwrap()).unwrap();
    port.pool = ProfilePool::new(port.tree.layers.num_layers(), crate::rl::PsmClock::default().hz(), 240);
    port.ready = true;
    (fake, fw, port)
}
