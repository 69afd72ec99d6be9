use std::sync::Arc;

use nicctl_transport::{
    testing::{echo, CommandHandler, SimDevice},
    Channel, ChannelRegisters, ControlQueue, CtlqError, CtlqOptions, DmaMemory, HeapDma,
    ManualClock,
};
use nicctl_wire::{desc::flags, Descriptor, Opcode, ReturnCode};

pub(crate) type SimQueue<H> = ControlQueue<Arc<SimDevice<H>>, HeapDma, ManualClock>;

pub(crate) fn setup<H: CommandHandler>(
    options: CtlqOptions,
    handler: H,
) -> (Arc<SimDevice<H>>, HeapDma, SimQueue<H>) {
    let _ = tracing_subscriber::fmt::try_init();

    let regs = ChannelRegisters::admin();
    let dma = HeapDma::new();
    let dev = Arc::new(SimDevice::new(regs, dma.clone(), handler));
    let queue = ControlQueue::new(Channel::Admin, regs, Arc::clone(&dev), dma.clone(), ManualClock::new())
        .with_options(options);
    (dev, dma, queue)
}

#[test]
fn command_round_trip() {
    let handler = |desc: &mut Descriptor, buf: &mut Vec<u8>| {
        assert_eq!(desc.opcode, Opcode::GetSchedElems as u16);
        assert!(desc.has_flag(flags::BUF));
        assert!(!desc.has_flag(flags::LB));
        for b in buf.iter_mut() {
            *b = b.wrapping_add(1);
        }
        desc.params.set_u16(2, 1);
    };
    let (_dev, _dma, queue) = setup(CtlqOptions::default().with_sq(8, 512).with_rq(8, 512), handler);
    queue.init().unwrap();
    assert!(queue.is_ready());

    let mut desc = Descriptor::new(Opcode::GetSchedElems);
    desc.cookie_high = 0xabcd;
    let mut buf = [1u8, 2, 3, 4];
    queue.send_command(&mut desc, Some(&mut buf)).unwrap();

    assert_eq!(buf, [2, 3, 4, 5]);
    assert!(desc.has_flag(flags::DD));
    assert_eq!(desc.params.u16_at(2), 1);
    assert_eq!(desc.cookie_high, 0xabcd);
    assert_eq!(queue.stats().sent(), 1);
}

#[test]
fn large_buffer_sets_flag() {
    let handler = |desc: &mut Descriptor, _: &mut Vec<u8>| {
        assert!(desc.has_flag(flags::LB));
    };
    let (_dev, _dma, queue) = setup(CtlqOptions::default(), handler);
    queue.init().unwrap();

    let mut desc = Descriptor::with_read_buf(Opcode::AddSchedElems);
    let mut buf = vec![0u8; 1024];
    queue.send_command(&mut desc, Some(&mut buf)).unwrap();
}

#[test]
fn queue_full_when_all_slots_outstanding() {
    let (dev, _dma, queue) = setup(CtlqOptions::default().with_sq(4, 64), echo);
    queue.init().unwrap();
    dev.set_stalled(true);

    for _ in 0..4 {
        let mut desc = Descriptor::new(Opcode::GetVersion);
        assert!(matches!(queue.send_command(&mut desc, None), Err(CtlqError::Timeout)));
    }
    assert_eq!(queue.sq_cursors(), (0, 0, 4));

    let mut desc = Descriptor::new(Opcode::GetVersion);
    assert!(matches!(queue.send_command(&mut desc, None), Err(CtlqError::QueueFull)));
    assert_eq!(queue.stats().timeouts(), 4);

    // Firmware catches up and completes everything, head wraps back to 0
    dev.set_stalled(false);
    let mut desc = Descriptor::new(Opcode::GetVersion);
    queue.send_command(&mut desc, None).unwrap();
    assert_eq!(queue.sq_cursors(), (1, 0, 1));
}

#[test]
fn critical_error_on_timeout() {
    let (dev, _dma, queue) = setup(CtlqOptions::default(), echo);
    queue.init().unwrap();
    dev.set_stalled(true);
    dev.set_critical(true);

    let mut desc = Descriptor::new(Opcode::GetVersion);
    assert!(matches!(queue.send_command(&mut desc, None), Err(CtlqError::FwCritical)));
}

#[test]
fn reset_flag_fails_fast() {
    let (dev, _dma, queue) = setup(CtlqOptions::default(), echo);
    queue.init().unwrap();
    queue.reset_flag().set();

    let writes = dev.register_writes();
    let mut desc = Descriptor::new(Opcode::GetVersion);
    assert!(matches!(queue.send_command(&mut desc, None), Err(CtlqError::ResetOngoing)));
    assert_eq!(dev.register_writes(), writes);

    queue.reset_flag().clear();
    queue.send_command(&mut desc, None).unwrap();
}

#[test]
fn not_ready_and_idempotent_shutdown() {
    let (dev, dma, queue) = setup(CtlqOptions::default(), echo);

    let mut desc = Descriptor::new(Opcode::GetVersion);
    assert!(matches!(queue.send_command(&mut desc, None), Err(CtlqError::NotReady)));
    assert!(matches!(queue.clean_rq(64), Err(CtlqError::NotReady)));

    queue.init().unwrap();
    assert!(matches!(queue.init(), Err(CtlqError::Cfg(_))));
    assert!(queue.is_ready());

    queue.shutdown();
    let writes = dev.register_writes();
    assert_eq!(dev.register(ChannelRegisters::admin().sq.len), 0);
    assert_eq!(dma.allocated(), 0);

    queue.shutdown();
    assert_eq!(dev.register_writes(), writes);
    assert!(matches!(queue.send_command(&mut desc, None), Err(CtlqError::NotReady)));

    // Can be brought up again
    queue.init().unwrap();
    queue.send_command(&mut desc, None).unwrap();
}

#[test]
fn init_errors() {
    let (_dev, _dma, queue) = setup(CtlqOptions::default().with_sq(0, 64), echo);
    assert!(matches!(queue.init(), Err(CtlqError::Cfg(_))));

    let (_dev, _dma, queue) = setup(CtlqOptions::default().with_rq(8, 0), echo);
    assert!(matches!(queue.init(), Err(CtlqError::Cfg(_))));

    let regs = ChannelRegisters::admin();
    let dma = HeapDma::new().with_limit(8 * 1024);
    let dev = Arc::new(SimDevice::new(regs, dma.clone(), echo));
    let queue = ControlQueue::new(Channel::Admin, regs, dev, dma.clone(), ManualClock::new())
        .with_options(CtlqOptions::default().with_sq(4, 1024).with_rq(4, 1024));
    assert!(matches!(queue.init(), Err(CtlqError::NoMemory)));
    assert_eq!(dma.regions(), 0);
    assert!(!queue.is_ready());
}

#[test]
fn failed_programming_leaves_registers_clear() {
    let regs = ChannelRegisters::admin();
    let (dev, dma, queue) = setup(CtlqOptions::default().with_sq(8, 256).with_rq(8, 256), echo);

    // The send ring programs fine, the receive ring base never latches
    dev.set_stuck(regs.rq.bal, true);
    assert!(matches!(queue.init(), Err(CtlqError::Cfg(_))));
    assert!(!queue.is_ready());
    assert_eq!(dma.allocated(), 0);
    for reg in [regs.sq.len, regs.sq.bal, regs.sq.bah, regs.sq.head, regs.sq.tail, regs.rq.len, regs.rq.tail] {
        assert_eq!(dev.register(reg), 0);
    }

    dev.set_stuck(regs.rq.bal, false);
    queue.init().unwrap();
    let mut desc = Descriptor::new(Opcode::GetVersion);
    queue.send_command(&mut desc, None).unwrap();
}

#[test]
fn buffer_size_checks() {
    let handler = |_: &mut Descriptor, buf: &mut Vec<u8>| {
        if buf.len() == 8 {
            buf.resize(32, 0xff);
        }
    };
    let (_dev, _dma, queue) = setup(CtlqOptions::default().with_sq(4, 64), handler);
    queue.init().unwrap();

    let mut desc = Descriptor::new(Opcode::GetSchedElems);
    let mut big = [0u8; 65];
    assert!(matches!(queue.send_command(&mut desc, Some(&mut big)), Err(CtlqError::Param(_))));

    // Firmware answers with more than the caller can take
    let mut small = [0u8; 8];
    assert!(matches!(queue.send_command(&mut desc, Some(&mut small)), Err(CtlqError::Param(_))));

    let mut fits = [0u8; 16];
    let mut desc = Descriptor::new(Opcode::GetSchedElems);
    queue.send_command(&mut desc, Some(&mut fits)).unwrap();
}

#[test]
fn command_error_masks_internal_byte() {
    let handler = |desc: &mut Descriptor, _: &mut Vec<u8>| desc.retval = 0x7f0e;
    let (_dev, _dma, queue) = setup(CtlqOptions::default(), handler);
    queue.init().unwrap();

    let mut desc = Descriptor::new(Opcode::CfgSchedElems);
    let err = queue.send_command(&mut desc, None).unwrap_err();
    assert_eq!(err.return_code(), Some(ReturnCode::Invalid));
    assert!(desc.has_flag(flags::ERR));
    assert_eq!(queue.stats().cmd_errors(), 1);
}

fn busy_twice() -> impl CommandHandler {
    let mut calls = 0;
    move |desc: &mut Descriptor, buf: &mut Vec<u8>| {
        // Every attempt sees the original request
        assert_eq!(buf.as_slice(), &[9, 9]);
        buf[0] = 0;
        calls += 1;
        if calls <= 2 {
            desc.retval = ReturnCode::Busy.as_raw() as u16;
        }
    }
}

#[test]
fn busy_retry_for_configured_opcodes() {
    let options = CtlqOptions::default().with_busy_retry(Opcode::DeleteSchedElems);
    let (_dev, _dma, queue) = setup(options, busy_twice());
    queue.init().unwrap();

    let mut desc = Descriptor::with_read_buf(Opcode::DeleteSchedElems);
    let mut buf = [9u8, 9];
    queue.send_command(&mut desc, Some(&mut buf)).unwrap();
    assert_eq!(buf, [0, 9]);
    assert_eq!(queue.stats().busy_retries(), 2);
}

#[test]
fn busy_without_retry_fails() {
    let (_dev, _dma, queue) = setup(CtlqOptions::default(), busy_twice());
    queue.init().unwrap();

    let mut desc = Descriptor::with_read_buf(Opcode::DeleteSchedElems);
    let mut buf = [9u8, 9];
    let err = queue.send_command(&mut desc, Some(&mut buf)).unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(err.return_code(), Some(ReturnCode::Busy));
}

#[test]
fn drain_events() {
    let (dev, _dma, queue) = setup(CtlqOptions::default().with_rq(4, 256), echo);
    queue.init().unwrap();
    assert!(matches!(queue.clean_rq(256), Err(CtlqError::NoWork)));

    let mut event = Descriptor::new(Opcode::DisTxqs);
    event.cookie_low = 1;
    assert!(dev.post_event(event, &[1, 2, 3, 4]));
    event.cookie_low = 2;
    event.flags |= flags::ERR;
    event.retval = ReturnCode::Io.as_raw() as u16;
    assert!(dev.post_event(event, &[5; 300]));

    let first = queue.clean_rq(2).unwrap();
    assert_eq!(first.desc.cookie_low, 1);
    assert_eq!(first.buf, vec![1, 2]);
    assert_eq!(first.pending, 1);
    assert!(first.error().is_none());

    let second = queue.clean_rq(512).unwrap();
    assert_eq!(second.desc.cookie_low, 2);
    // Truncated to the posted receive buffer
    assert_eq!(second.buf.len(), 256);
    assert_eq!(second.pending, 0);
    assert!(matches!(second.error(), Some(CtlqError::Command(ReturnCode::Io))));

    assert!(matches!(queue.clean_rq(256), Err(CtlqError::NoWork)));
    assert_eq!(queue.stats().events(), 2);
}

#[test]
fn receive_slots_are_recycled() {
    let (dev, _dma, queue) = setup(CtlqOptions::default().with_rq(4, 64), echo);
    queue.init().unwrap();

    for round in 0..10u32 {
        let mut event = Descriptor::new(Opcode::DisTxqs);
        event.cookie_low = round;
        assert!(dev.post_event(event, &round.to_le_bytes()));
        let got = queue.clean_rq(64).unwrap();
        assert_eq!(got.desc.cookie_low, round);
        assert_eq!(got.buf, round.to_le_bytes());
    }
}

#[test]
fn heap_dma_is_shared() {
    let dma = HeapDma::new();
    let handle = dma.alloc(16).unwrap();
    let clone = dma.clone();
    clone.write(&handle, 0, &[7; 16]).unwrap();

    let mut out = [0u8; 16];
    dma.read(&handle, 0, &mut out).unwrap();
    assert_eq!(out, [7; 16]);
}
