use nicctl_sched::{
    testing::{FakeFirmware, FwTopology},
    AggType, Owner, RlType, SchedError, Scheduler,
};
use nicctl_wire::{Opcode, ReturnCode};

use crate::{assert_consistent, scheduler};

#[test]
fn operations_wait_for_init() {
    let _ = tracing_subscriber::fmt::try_init();
    let fake = FakeFirmware::new(FwTopology::nine_layer(1));
    let sched = Scheduler::new(fake.clone());

    assert!(!sched.is_ready());
    assert!(sched.root().is_none());
    assert!(matches!(sched.layers(), Err(SchedError::NotReady)));
    assert!(matches!(sched.cfg_vsi(1, 0, 2, Owner::Lan, true), Err(SchedError::NotReady)));
    assert!(matches!(sched.replay_agg(), Err(SchedError::NotReady)));
    assert_eq!(sched.stats().commands(), 0);

    sched.init().unwrap();
    assert!(sched.is_ready());
    assert_eq!(sched.node_count(), fake.node_count());
    assert!(matches!(sched.init(), Err(SchedError::Cfg(_))));
}

#[test]
fn failed_init_can_be_retried() {
    let _ = tracing_subscriber::fmt::try_init();
    let fake = FakeFirmware::new(FwTopology::nine_layer(1));
    let sched = Scheduler::new(fake.clone());

    fake.fail_next(Opcode::GetDfltTopo, ReturnCode::Again);
    assert!(matches!(sched.init(), Err(SchedError::Transport(_))));
    assert!(!sched.is_ready());
    assert!(sched.stats().cmd_errors() > 0);

    sched.init().unwrap();
    assert_consistent(&fake, &sched);
}

#[test]
fn five_layer_port() {
    let (fake, sched) = scheduler(FwTopology::five_layer(1));
    let layers = sched.layers().unwrap();
    assert_eq!(layers.vsi(), layers.qgrp());

    sched.cfg_vsi(2, 0, 3, Owner::Lan, true).unwrap();
    let vsi = sched.vsi_node(2, 0).unwrap();
    let teid = sched.ena_txq(2, 0, 0, 1, [0; 22]).unwrap();
    assert_eq!(sched.node(teid).unwrap().parent_teid, Some(vsi.teid));
    assert_consistent(&fake, &sched);
}

#[test]
fn clear_keeps_settings_for_replay() {
    let (fake, sched) = scheduler(FwTopology::nine_layer(2));
    sched.cfg_vsi_qs(3, 0b11, &[2; 8], Owner::Lan).unwrap();
    sched.cfg_agg(10, AggType::Agg, 0b11).unwrap();
    sched.move_vsi_to_agg(10, 3, 0b01).unwrap();

    sched.cfg_vsi_bw_lmt_per_tc(3, 0, RlType::Eir, 20_000).unwrap();
    sched.cfg_agg_bw_lmt_per_tc(10, 1, RlType::Cir, 5_000).unwrap();
    sched.cfg_tc_node_bw_lmt(1, RlType::Eir, 80_000).unwrap();
    assert_eq!(fake.profile_count(), 3);

    sched.clear();
    assert!(!sched.is_ready());
    assert_eq!(fake.profile_count(), 0);
    // Root and TCs stay in firmware
    assert_eq!(fake.node_count(), 3);
    assert_eq!(sched.agg_tc_bitmap(10), Some(0));
    assert_eq!(sched.vsi_bw_info(3, 0).unwrap().bw(RlType::Eir), Some(20_000));
    assert_eq!(sched.vsi_max_queues(3, 0, Owner::Lan), Some(0));

    sched.init().unwrap();
    sched.cfg_vsi_qs(3, 0b11, &[2; 8], Owner::Lan).unwrap();
    assert_eq!(sched.vsi_agg(3), Some(10));

    sched.replay_agg().unwrap();
    assert_eq!(sched.agg_tc_bitmap(10), Some(0b11));
    assert_ne!(sched.agg_node(10, 1).unwrap().elem.cir.profile_idx, 0);

    sched.replay_vsi_agg(3).unwrap();
    let vsi = sched.vsi_node(3, 0).unwrap();
    let agg = sched.agg_node(10, 0).unwrap();
    let path: Vec<_> = sched.query_node_to_root(vsi.teid).unwrap().iter().map(|e| e.node_teid).collect();
    assert!(path.contains(&agg.teid));
    assert_ne!(vsi.elem.eir.profile_idx, 0);

    sched.replay_tc_node_bw().unwrap();
    assert_ne!(sched.tc_node(1).unwrap().elem.eir.profile_idx, 0);
    assert_eq!(fake.profile_count(), 3);

    let root = sched.root().unwrap();
    assert!(sched.is_balanced(root.teid).unwrap());
    assert_consistent(&fake, &sched);
}

#[test]
fn replay_skips_missing_nodes() {
    let (_fake, sched) = scheduler(FwTopology::nine_layer(1));
    sched.cfg_vsi(3, 0, 2, Owner::Lan, true).unwrap();
    sched.cfg_vsi_bw_lmt_per_tc(3, 0, RlType::Cir, 1_000).unwrap();

    sched.clear();
    sched.init().unwrap();

    // The VSI has no node yet, nothing to apply
    sched.replay_vsi_bw(3, 0b1).unwrap();
    assert!(sched.profiles().is_empty());
    assert!(matches!(sched.replay_vsi_bw(4, 0b1), Err(SchedError::Param(_))));

    sched.cfg_vsi(3, 0, 2, Owner::Lan, true).unwrap();
    sched.replay_vsi_bw(3, 0b1).unwrap();
    assert_eq!(sched.profiles().len(), 1);
    // A VSI of the default aggregator has nothing else to replay
    sched.replay_vsi_agg(3).unwrap();
}

#[test]
fn shared_between_threads() {
    let (fake, sched) = scheduler(FwTopology::nine_layer(4));
    let sched = std::sync::Arc::new(sched);

    let handles: Vec<_> = (0..4u8)
        .map(|tc| {
            let sched = sched.clone();
            std::thread::spawn(move || {
                for vsi in 0..4u16 {
                    sched.cfg_vsi(vsi, tc, 2, Owner::Lan, true).unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    for tc in 0..4 {
        for vsi in 0..4 {
            assert!(sched.vsi_node(vsi, tc).is_some());
        }
    }
    assert_consistent(&fake, &sched);
}
