#![doc(issue_tracker_base_url = "https://github.com/chainbound/nicctl-rs/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
//! Control queue transport and Tx scheduler management for multi-port NICs.
//!
//! [`open_port`] brings up the admin control queue of a device and loads the Tx
//! scheduler tree of one of its ports on top of it.
use thiserror::Error;
use tracing::info;

pub use nicctl_common::{constants, TcBitmap};
pub use nicctl_sched::*;
pub use nicctl_transport::{
    Channel, ChannelRegisters, Clock, ControlQueue, CtlqError, CtlqOptions, DmaMemory, HeapDma, ManualClock,
    RegisterAccess, RetryPolicy, RqEvent, SystemClock,
};
pub use nicctl_wire as wire;

/// Scheduler driving firmware through a control queue.
pub type PortScheduler<R, D, C> = Scheduler<ControlQueue<R, D, C>>;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Transport(#[from] CtlqError),
    #[error(transparent)]
    Sched(#[from] SchedError),
}

/// Initializes the admin control queue over `io` and `dma`, then loads the scheduler of
/// `options.port`. The PSM clock is read from the device, overriding `options.psm_clock`.
pub fn open_port<R, D, C>(
    io: R,
    dma: D,
    clock: C,
    ctlq: CtlqOptions,
    options: SchedOptions,
) -> Result<PortScheduler<R, D, C>, Error>
where
    R: RegisterAccess,
    D: DmaMemory,
    C: Clock,
{
    let psm_clock = PsmClock::read(&io);
    let queue = ControlQueue::new(Channel::Admin, ChannelRegisters::admin(), io, dma, clock).with_options(ctlq);
    queue.init()?;

    let port = options.port;
    let sched = Scheduler::with_options(queue, options.with_psm_clock(psm_clock));
    if let Err(e) = sched.init() {
        sched.transport().shutdown();
        return Err(e.into());
    }
    info!(port, ?psm_clock, "port opened");
    Ok(sched)
}
