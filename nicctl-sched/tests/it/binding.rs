use nicctl_sched::{testing::FwTopology, AggType, Owner, RlType, SchedError, DFLT_AGG_ID};
use nicctl_wire::{sched::ElemType, txq::TXQ_CTX_LEN};

use crate::{assert_consistent, scheduler};

#[test]
fn queue_groups_grow_but_never_shrink() {
    let (fake, sched) = scheduler(FwTopology::nine_layer(1).with_max_children(7, 4));
    sched.cfg_vsi(7, 0, 9, Owner::Lan, true).unwrap();

    let vsi = sched.vsi_node(7, 0).unwrap();
    assert_eq!(vsi.vsi_handle, Some(7));
    assert_eq!(vsi.children.len(), 3);
    assert_eq!(sched.vsi_max_queues(7, 0, Owner::Lan), Some(9));

    let count = fake.node_count();
    sched.cfg_vsi(7, 0, 5, Owner::Lan, true).unwrap();
    assert_eq!(fake.node_count(), count);
    assert_eq!(sched.vsi_node(7, 0).unwrap().children.len(), 3);
    assert_eq!(sched.vsi_max_queues(7, 0, Owner::Lan), Some(9));
    assert_consistent(&fake, &sched);
}

#[test]
fn vsis_share_the_path_to_the_tc() {
    let (fake, sched) = scheduler(FwTopology::nine_layer(1));
    sched.cfg_vsi(1, 0, 2, Owner::Lan, true).unwrap();
    let count = fake.node_count();
    sched.cfg_vsi(2, 0, 2, Owner::Lan, true).unwrap();

    // A VSI node and one queue group
    assert_eq!(fake.node_count(), count + 2);
    let (a, b) = (sched.vsi_node(1, 0).unwrap(), sched.vsi_node(2, 0).unwrap());
    assert_eq!(a.parent_teid, b.parent_teid);
    assert_eq!(a.layer, sched.layers().unwrap().vsi());
    assert_consistent(&fake, &sched);
}

#[test]
fn disabled_vsi_is_suspended() {
    let (fake, sched) = scheduler(FwTopology::nine_layer(2));
    sched.cfg_vsi_qs(3, 0b01, &[2; 8], Owner::Lan).unwrap();
    assert!(sched.vsi_node(3, 1).is_none());

    sched.cfg_vsi_qs(3, 0b11, &[2; 8], Owner::Lan).unwrap();
    sched.cfg_vsi_qs(3, 0b10, &[2; 8], Owner::Lan).unwrap();
    let vsi = sched.vsi_node(3, 0).unwrap();
    assert!(!vsi.in_use);
    assert!(fake.is_suspended(vsi.teid));
    assert!(sched.vsi_node(3, 1).unwrap().in_use);
}

#[test]
fn queues_enable_and_disable() {
    let (fake, sched) = scheduler(FwTopology::nine_layer(1));
    sched.cfg_vsi(1, 0, 4, Owner::Lan, true).unwrap();
    let layers = sched.layers().unwrap();

    let teids: Vec<_> = (0..4).map(|q| sched.ena_txq(1, 0, q, 100 + q, [0; TXQ_CTX_LEN]).unwrap()).collect();
    for teid in &teids {
        let leaf = sched.node(*teid).unwrap();
        assert_eq!(leaf.layer, layers.leaf());
        assert_eq!(leaf.elem.elem_type(), Ok(ElemType::Leaf));
    }
    assert!(matches!(sched.ena_txq(1, 0, 4, 104, [0; TXQ_CTX_LEN]), Err(SchedError::Param(_))));
    assert_consistent(&fake, &sched);

    assert!(matches!(sched.rm_vsi_cfg(1, Owner::Lan), Err(SchedError::InUse)));
    for q in 0..4 {
        sched.dis_txq(1, 0, q).unwrap();
    }
    assert!(matches!(sched.dis_txq(1, 0, 0), Err(SchedError::DoesNotExist)));

    sched.rm_vsi_cfg(1, Owner::Lan).unwrap();
    assert!(sched.vsi_node(1, 0).is_none());
    assert_eq!(sched.vsi_max_queues(1, 0, Owner::Lan), None);
    assert!(matches!(sched.rm_vsi_cfg(1, Owner::Lan), Err(SchedError::Param(_))));
    assert_consistent(&fake, &sched);
}

#[test]
fn queue_limit_survives_disable() {
    let (_fake, sched) = scheduler(FwTopology::nine_layer(1));
    sched.cfg_vsi(1, 0, 1, Owner::Lan, true).unwrap();
    let teid = sched.ena_txq(1, 0, 0, 9, [0; TXQ_CTX_LEN]).unwrap();

    sched.cfg_q_bw_lmt(1, 0, 0, RlType::Eir, 3000).unwrap();
    assert_ne!(sched.node(teid).unwrap().elem.eir.profile_idx, 0);

    sched.dis_txq(1, 0, 0).unwrap();
    let teid = sched.ena_txq(1, 0, 0, 9, [0; TXQ_CTX_LEN]).unwrap();
    let leaf = sched.node(teid).unwrap();
    assert_ne!(leaf.elem.eir.profile_idx, 0);

    sched.cfg_q_bw_lmt(1, 0, 0, RlType::Eir, nicctl_sched::DFLT_BW).unwrap();
    sched.replay_q_bw(1, 0, 0).unwrap();
    assert_eq!(sched.node(teid).unwrap().elem.eir.profile_idx, 0);
}

#[test]
fn vsi_moves_into_aggregator_and_back() {
    let (fake, sched) = scheduler(FwTopology::nine_layer(1));
    sched.cfg_vsi(4, 0, 2, Owner::Lan, true).unwrap();
    sched.cfg_agg(10, AggType::Agg, 0b1).unwrap();
    assert_eq!(sched.agg_tc_bitmap(10), Some(0b1));
    let agg = sched.agg_node(10, 0).unwrap();
    assert_eq!(agg.layer, sched.layers().unwrap().agg());

    sched.move_vsi_to_agg(10, 4, 0b1).unwrap();
    assert_eq!(sched.vsi_agg(4), Some(10));
    let vsi = sched.vsi_node(4, 0).unwrap();
    let path: Vec<_> = sched.query_node_to_root(vsi.teid).unwrap().iter().map(|e| e.node_teid).collect();
    assert!(path.contains(&agg.teid));
    assert_consistent(&fake, &sched);

    sched.rm_agg_cfg(10).unwrap();
    assert_eq!(sched.vsi_agg(4), None);
    assert!(sched.agg_node(10, 0).is_none());
    let home = sched.agg_node(DFLT_AGG_ID, 0).unwrap();
    let path: Vec<_> = sched.query_node_to_root(vsi.teid).unwrap().iter().map(|e| e.node_teid).collect();
    assert!(path.contains(&home.teid));
    assert!(matches!(sched.rm_agg_cfg(10), Err(SchedError::DoesNotExist)));
    assert_consistent(&fake, &sched);
}

#[test]
fn aggregator_limits() {
    let (fake, sched) = scheduler(FwTopology::nine_layer(2));
    sched.cfg_agg(10, AggType::Agg, 0b11).unwrap();

    sched.cfg_agg_bw_lmt_per_tc(10, 1, RlType::Cir, 5000).unwrap();
    assert_eq!(sched.agg_bw_info(10, 1).unwrap().bw(RlType::Cir), Some(5000));
    assert_ne!(sched.agg_node(10, 1).unwrap().elem.cir.profile_idx, 0);

    sched.cfg_agg_bw_shared_lmt_per_tc(10, 0, 2000, 9000, 6000).unwrap();
    assert_eq!(sched.agg_bw_info(10, 0).unwrap().bw(RlType::Srl), Some(6000));
    assert!(sched.agg_bw_info(10, 1).unwrap().bw(RlType::Srl).is_none());

    let mut weights = [0u16; 8];
    weights[1] = 12;
    sched.cfg_agg_bw_alloc(10, 0b10, RlType::Cir, &weights).unwrap();
    assert_eq!(sched.agg_node(10, 1).unwrap().elem.cir.bw_alloc, 12);

    assert!(matches!(sched.cfg_agg_bw_lmt_per_tc(77, 0, RlType::Cir, 5000), Err(SchedError::Param(_))));
    assert_eq!(fake.profile_count(), 4);
}

#[test]
fn priorities_below_aggregator_and_queues() {
    let (_fake, sched) = scheduler(FwTopology::nine_layer(1));
    sched.cfg_agg(10, AggType::Agg, 0b1).unwrap();
    for vsi in [4, 5] {
        sched.cfg_vsi(vsi, 0, 1, Owner::Lan, true).unwrap();
        sched.move_vsi_to_agg(10, vsi, 0b1).unwrap();
    }

    sched.cfg_agg_vsi_priority_per_tc(10, 0, &[(4, 3), (5, 6)]).unwrap();
    assert_eq!(sched.vsi_node(4, 0).unwrap().elem.priority(), 3);
    assert_eq!(sched.vsi_node(5, 0).unwrap().elem.priority(), 6);
    assert_eq!(sched.vsi_bw_info(5, 0).unwrap().priority(), Some(6));
    assert!(matches!(sched.cfg_agg_vsi_priority_per_tc(10, 0, &[(4, 9)]), Err(SchedError::Param(_))));
    assert!(matches!(sched.cfg_agg_vsi_priority_per_tc(10, 0, &[(6, 1)]), Err(SchedError::Param(_))));

    let teid = sched.ena_txq(4, 0, 0, 1, [0; TXQ_CTX_LEN]).unwrap();
    sched.cfg_vsi_q_priority(&[(teid, 2)]).unwrap();
    assert_eq!(sched.node(teid).unwrap().elem.priority(), 2);

    let vsi = sched.vsi_node(4, 0).unwrap();
    assert!(matches!(sched.cfg_vsi_q_priority(&[(vsi.teid, 2)]), Err(SchedError::Param(_))));
}
