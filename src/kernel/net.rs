// src/kernel/net.rs

//! Network receive ring and per-protocol transmit channels
//!
//! Receive side: one standing multi-buffer request posts a small ring of
//! frame buffers to the device. Each per-buffer completion is
//! classified, handed to the [`FrameSink`], and the buffer is returned
//! to the device immediately, so the ring is only ever short one buffer
//! at a time.
//!
//! Transmit side: one single-entry channel per protocol. A channel with
//! a send in flight rejects further sends with `ChannelBusy`; callers
//! treat that as backpressure and retry on a later loop iteration. A
//! saturated channel never blocks the other protocols.

use log::{trace, warn};

use crate::abi::work::{BufferDesc, CompletionEntry, CompletionFlags, DeviceId, FrameBuf, SlotId, WorkRequest};
use crate::constants::{FRAME_SIZE, NET_RX_BUFFERS};
use crate::errors::{KernelResult, NetError};
use crate::kernel::{Kernel, Owner};
use crate::platform::Platform;

const ETHERTYPE_ARP: u16 = 0x0806;
const ETHERTYPE_IPV4: u16 = 0x0800;
const ETH_HDR_LEN: usize = 14;
const IPV4_PROTO_OFFSET: usize = ETH_HDR_LEN + 9;
const IP_PROTO_ICMP: u8 = 1;
const IP_PROTO_UDP: u8 = 17;

/// Protocols the kernel demultiplexes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// Address resolution
    Arp,
    /// IPv4 ICMP
    Icmp,
    /// IPv4 UDP
    Udp,
}

impl Protocol {
    /// All demultiplexed protocols
    pub const ALL: [Self; 3] = [Self::Arp, Self::Icmp, Self::Udp];

    /// Transmit channel index
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::Arp => 0,
            Self::Icmp => 1,
            Self::Udp => 2,
        }
    }

    /// Classify an Ethernet frame, `None` for anything unhandled
    #[must_use]
    pub fn classify(frame: &[u8]) -> Option<Self> {
        if frame.len() < ETH_HDR_LEN {
            return None;
        }
        let ethertype = u16::from_be_bytes([frame[12], frame[13]]);
        match ethertype {
            ETHERTYPE_ARP => Some(Self::Arp),
            ETHERTYPE_IPV4 => {
                let proto = *frame.get(IPV4_PROTO_OFFSET)?;
                match proto {
                    IP_PROTO_ICMP => Some(Self::Icmp),
                    IP_PROTO_UDP => Some(Self::Udp),
                    _ => None,
                }
            }
            _ => None,
        }
    }
}

/// Consumer of received frames and producer of outbound ones
///
/// The frame slice is only valid for the duration of the call; the
/// buffer goes back to the device as soon as `on_frame` returns.
pub trait FrameSink {
    /// Inspect one received frame
    fn on_frame(&mut self, protocol: Protocol, frame: &[u8]);

    /// Produce the next outbound frame for `protocol`, writing it into
    /// `out` and returning its length
    fn pull_frame(&mut self, _protocol: Protocol, _out: &mut [u8]) -> Option<usize> {
        None
    }
}

/// Standing receive ring
#[derive(Debug)]
pub struct NetRx {
    device: DeviceId,
    bufs: [FrameBuf; NET_RX_BUFFERS],
    slot: Option<SlotId>,
}

impl NetRx {
    /// Receive ring for `device`, not yet posted
    #[must_use]
    pub const fn new(device: DeviceId) -> Self {
        const BUF: FrameBuf = FrameBuf::new();
        Self {
            device,
            bufs: [BUF; NET_RX_BUFFERS],
            slot: None,
        }
    }

    /// True while the standing request is posted
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.slot.is_some()
    }

    /// Post the standing receive request
    pub fn start<P: Platform>(&mut self, k: &mut Kernel<P>) -> KernelResult<()> {
        if self.slot.is_some() {
            return Err(NetError::BufferNotPosted.into());
        }
        let slot = k.reserve(Owner::NetRx)?;
        let mut descs = [BufferDesc::EMPTY; NET_RX_BUFFERS];
        for (desc, buf) in descs.iter_mut().zip(self.bufs.iter_mut()) {
            *desc = buf.desc();
        }
        if let Err(e) = k.submit(slot, WorkRequest::net_recv(self.device, &descs)) {
            k.release(slot);
            return Err(e);
        }
        self.slot = Some(slot);
        Ok(())
    }

    /// Handle one per-buffer receive completion
    ///
    /// Classifies the frame, hands it to the sink, and reposts the
    /// buffer before returning.
    pub fn on_completion<P: Platform, S: FrameSink>(
        &mut self,
        k: &mut Kernel<P>,
        entry: &CompletionEntry,
        sink: &mut S,
    ) -> KernelResult<()> {
        let Some(slot) = self.slot else {
            return Err(NetError::BufferNotPosted.into());
        };
        debug_assert_eq!(entry.slot, slot);

        if !entry.result.is_ok() {
            warn!("receive ring stopped: {:?}", entry.result);
            self.slot = None;
            k.release(slot);
            return Ok(());
        }
        if !entry.flags.contains(CompletionFlags::BUFFER) {
            return Err(NetError::BufferNotPosted.into());
        }
        let idx = entry.buffer_index as usize;
        if idx >= NET_RX_BUFFERS {
            return Err(NetError::BufferNotPosted.into());
        }

        let len = (entry.bytes as usize).min(FRAME_SIZE);
        let frame = &self.bufs[idx].0[..len];
        match Protocol::classify(frame) {
            Some(protocol) => sink.on_frame(protocol, frame),
            None => trace!("dropping {} byte frame with unhandled protocol", len),
        }

        // The sink has seen the data; give the buffer back.
        k.rx_release(slot, idx);
        Ok(())
    }
}

#[derive(Debug)]
struct TxChannel {
    slot: Option<SlotId>,
    buf: FrameBuf,
}

impl TxChannel {
    const fn new() -> Self {
        Self {
            slot: None,
            buf: FrameBuf::new(),
        }
    }
}

/// Per-protocol transmit channels, one in-flight send each
#[derive(Debug)]
pub struct NetTx {
    device: DeviceId,
    channels: [TxChannel; 3],
}

impl NetTx {
    /// Transmit channels for `device`
    #[must_use]
    pub const fn new(device: DeviceId) -> Self {
        const CH: TxChannel = TxChannel::new();
        Self {
            device,
            channels: [CH; 3],
        }
    }

    /// True while `protocol`'s channel has a send in flight
    #[must_use]
    pub fn is_busy(&self, protocol: Protocol) -> bool {
        self.channels[protocol.index()].slot.is_some()
    }

    /// Queue one frame on `protocol`'s channel
    ///
    /// `ChannelBusy` is backpressure: the caller keeps the frame and
    /// retries after the in-flight send completes.
    pub fn try_send<P: Platform>(
        &mut self,
        k: &mut Kernel<P>,
        protocol: Protocol,
        frame: &[u8],
    ) -> KernelResult<()> {
        if frame.len() > FRAME_SIZE {
            return Err(NetError::FrameTooLarge.into());
        }
        let ch = &mut self.channels[protocol.index()];
        if ch.slot.is_some() {
            return Err(NetError::ChannelBusy.into());
        }
        ch.buf.0[..frame.len()].copy_from_slice(frame);
        let desc = ch.buf.desc_prefix(frame.len());

        let slot = k.reserve(Owner::NetTx(protocol))?;
        if let Err(e) = k.submit(slot, WorkRequest::net_send(self.device, desc)) {
            k.release(slot);
            return Err(e);
        }
        self.channels[protocol.index()].slot = Some(slot);
        Ok(())
    }

    /// Handle a transmit completion, freeing the channel
    pub fn on_completion<P: Platform>(
        &mut self,
        k: &mut Kernel<P>,
        protocol: Protocol,
        entry: &CompletionEntry,
    ) -> KernelResult<()> {
        let ch = &mut self.channels[protocol.index()];
        let Some(slot) = ch.slot.take() else {
            return Err(NetError::BufferNotPosted.into());
        };
        debug_assert_eq!(entry.slot, slot);
        if !entry.result.is_ok() {
            warn!("{:?} send failed: {:?}", protocol, entry.result);
        }
        k.release(slot);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::ring::CompletionRing;
    use crate::abi::work::{ResultCode, Status, SubmissionBatch};
    use crate::kernel::RequestTable;
    use crate::platform::{BootInfo, WakeEvent, WakeReason};

    struct InertPlatform {
        rx_releases: usize,
    }

    impl Platform for InertPlatform {
        fn init(&mut self, _boot: &BootInfo<'_>) -> KernelResult<()> {
            Ok(())
        }
        fn submit(&mut self, _table: &mut RequestTable, _batch: SubmissionBatch<'_>) {}
        fn rx_release(&mut self, _table: &RequestTable, _slot: SlotId, _buffer_index: usize) {
            self.rx_releases += 1;
        }
        fn wfi(&mut self, _timeout_ms: Option<u64>) -> WakeEvent {
            WakeEvent {
                now_ms: 0,
                reason: WakeReason::Timeout,
            }
        }
        fn irq_register(&mut self, _irq: u32, _ring: &'static CompletionRing) -> KernelResult<()> {
            Ok(())
        }
        fn irq_enable(&mut self, _irq: u32) {}
    }

    fn kernel(ring: &'static CompletionRing) -> Kernel<InertPlatform> {
        Kernel::new(InertPlatform { rx_releases: 0 }, ring)
    }

    #[derive(Default)]
    struct RecordingSink {
        frames: usize,
        last_protocol: Option<Protocol>,
        last_len: usize,
    }

    impl FrameSink for RecordingSink {
        fn on_frame(&mut self, protocol: Protocol, frame: &[u8]) {
            self.frames += 1;
            self.last_protocol = Some(protocol);
            self.last_len = frame.len();
        }
    }

    fn arp_frame() -> [u8; 42] {
        let mut f = [0u8; 42];
        f[12] = 0x08;
        f[13] = 0x06;
        f
    }

    fn ipv4_frame(proto: u8) -> [u8; 60] {
        let mut f = [0u8; 60];
        f[12] = 0x08;
        f[13] = 0x00;
        f[IPV4_PROTO_OFFSET] = proto;
        f
    }

    #[test]
    fn test_classification() {
        assert_eq!(Protocol::classify(&arp_frame()), Some(Protocol::Arp));
        assert_eq!(
            Protocol::classify(&ipv4_frame(IP_PROTO_ICMP)),
            Some(Protocol::Icmp)
        );
        assert_eq!(
            Protocol::classify(&ipv4_frame(IP_PROTO_UDP)),
            Some(Protocol::Udp)
        );
        // TCP is unhandled.
        assert_eq!(Protocol::classify(&ipv4_frame(6)), None);
        // Runt frame.
        assert_eq!(Protocol::classify(&[0u8; 10]), None);
    }

    #[test]
    fn test_rx_demux_and_repost() {
        static RING: CompletionRing = CompletionRing::new();
        let mut k = kernel(&RING);
        let mut rx = NetRx::new(DeviceId(2));
        let mut sink = RecordingSink::default();

        rx.start(&mut k).unwrap();
        k.flush().unwrap();
        let slot = rx.slot.unwrap();

        // Frame arrives in buffer 2.
        let frame = ipv4_frame(IP_PROTO_UDP);
        rx.bufs[2].0[..frame.len()].copy_from_slice(&frame);
        let entry = CompletionEntry::rx_buffer(slot, 2, frame.len() as u32);
        rx.on_completion(&mut k, &entry, &mut sink).unwrap();

        assert_eq!(sink.frames, 1);
        assert_eq!(sink.last_protocol, Some(Protocol::Udp));
        assert_eq!(sink.last_len, frame.len());
        assert_eq!(k.platform().rx_releases, 1);
        // Standing request stays posted.
        assert!(rx.is_active());
    }

    #[test]
    fn test_rx_unknown_protocol_still_reposts() {
        static RING: CompletionRing = CompletionRing::new();
        let mut k = kernel(&RING);
        let mut rx = NetRx::new(DeviceId(2));
        let mut sink = RecordingSink::default();

        rx.start(&mut k).unwrap();
        k.flush().unwrap();
        let slot = rx.slot.unwrap();

        let entry = CompletionEntry::rx_buffer(slot, 0, 60);
        rx.on_completion(&mut k, &entry, &mut sink).unwrap();
        assert_eq!(sink.frames, 0);
        assert_eq!(k.platform().rx_releases, 1);
    }

    #[test]
    fn test_tx_backpressure_is_per_protocol() {
        static RING: CompletionRing = CompletionRing::new();
        let mut k = kernel(&RING);
        let mut tx = NetTx::new(DeviceId(2));

        tx.try_send(&mut k, Protocol::Icmp, &ipv4_frame(IP_PROTO_ICMP))
            .unwrap();
        // ICMP channel saturated.
        let err = tx
            .try_send(&mut k, Protocol::Icmp, &ipv4_frame(IP_PROTO_ICMP))
            .unwrap_err();
        assert!(err.is_backpressure());

        // ARP is unaffected.
        tx.try_send(&mut k, Protocol::Arp, &arp_frame()).unwrap();
        assert!(tx.is_busy(Protocol::Icmp));
        assert!(tx.is_busy(Protocol::Arp));
        assert!(!tx.is_busy(Protocol::Udp));
    }

    #[test]
    fn test_tx_completion_frees_channel() {
        static RING: CompletionRing = CompletionRing::new();
        let mut k = kernel(&RING);
        let mut tx = NetTx::new(DeviceId(2));

        tx.try_send(&mut k, Protocol::Arp, &arp_frame()).unwrap();
        k.flush().unwrap();
        let slot = tx.channels[Protocol::Arp.index()].slot.unwrap();

        k.ring().push(CompletionEntry::success(slot, 42));
        k.tick();
        let event = k.take_event().unwrap();
        tx.on_completion(&mut k, Protocol::Arp, &event.completion)
            .unwrap();

        assert!(!tx.is_busy(Protocol::Arp));
        assert_eq!(k.table().slot(slot).status, Status::Free);
        // Channel is reusable.
        tx.try_send(&mut k, Protocol::Arp, &arp_frame()).unwrap();
    }

    #[test]
    fn test_oversized_frame_rejected() {
        static RING: CompletionRing = CompletionRing::new();
        let mut k = kernel(&RING);
        let mut tx = NetTx::new(DeviceId(2));
        let big = [0u8; FRAME_SIZE + 1];
        let err = tx.try_send(&mut k, Protocol::Udp, &big).unwrap_err();
        assert!(!err.is_backpressure());
        assert!(!tx.is_busy(Protocol::Udp));
    }

    #[test]
    fn test_rx_failure_stops_ring() {
        static RING: CompletionRing = CompletionRing::new();
        let mut k = kernel(&RING);
        let mut rx = NetRx::new(DeviceId(2));
        let mut sink = RecordingSink::default();

        rx.start(&mut k).unwrap();
        k.flush().unwrap();
        let slot = rx.slot.unwrap();

        // Terminal failure: kernel marks the slot complete, ring stops.
        k.ring().push(CompletionEntry::failure(slot, ResultCode::IoError));
        k.tick();
        let event = k.take_event().unwrap();
        rx.on_completion(&mut k, &event.completion, &mut sink).unwrap();
        assert!(!rx.is_active());
        assert_eq!(k.table().slot(slot).status, Status::Free);
    }
}
