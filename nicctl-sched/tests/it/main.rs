use nicctl_sched::{
    testing::{FakeFirmware, FwTopology},
    CommandTransport, NodeInfo, Scheduler,
};

mod bandwidth;
mod binding;
mod failures;
mod lifecycle;
mod tree;

fn scheduler(topo: FwTopology) -> (FakeFirmware, Scheduler<FakeFirmware>) {
    let _ = tracing_subscriber::fmt::try_init();
    let fake = FakeFirmware::new(topo);
    let sched = Scheduler::new(fake.clone());
    sched.init().unwrap();
    (fake, sched)
}

/// Every node of the tree, parents before children.
fn walk<T: CommandTransport>(sched: &Scheduler<T>) -> Vec<NodeInfo> {
    let mut out = Vec::new();
    let mut stack: Vec<_> = sched.root().into_iter().collect();
    while let Some(node) = stack.pop() {
        stack.extend(node.children.iter().rev().filter_map(|c| sched.node(*c)));
        out.push(node);
    }
    out
}

/// Checks the host tree against itself and against the firmware model.
fn assert_consistent(fake: &FakeFirmware, sched: &Scheduler<FakeFirmware>) {
    let nodes = walk(sched);
    assert_eq!(nodes.len(), sched.node_count());
    assert_eq!(nodes.len(), fake.node_count());

    let mut seen = std::collections::HashSet::new();
    for node in &nodes {
        assert!(seen.insert(node.teid), "TEID {} linked twice", node.teid);
        let Some(parent_teid) = node.parent_teid else {
            continue;
        };
        let parent = sched.node(parent_teid).unwrap();
        assert_eq!(node.layer, parent.layer + 1);
        assert!(parent.children.contains(&node.teid));
        assert_eq!(fake.parent_of(node.teid), Some(parent_teid));
    }
}
