// src/kmain.rs

//! Boot sequence and the event loop
//!
//! [`Os`] ties the pieces together: it seeds the generator from the
//! entropy device (with a bounded wait and a degraded fallback), arms
//! the periodic re-mix timer, starts the block self-test and the
//! receive ring, then settles into the batch/park/drain cycle in
//! [`Os::poll`].
//!
//! Buffers submitted to the platform live inside this struct and are
//! handed over as raw addresses, so an `Os` must not move while any
//! request is in flight. [`Os::boot`] leaves nothing in flight: the
//! standing services post their buffers on the first [`Os::poll`], so
//! the value may move freely between boot and that first poll.

use log::{info, warn};
use zeroize::Zeroize;

use crate::abi::work::{BufferDesc, FrameBuf, SlotId, WorkRequest};
use crate::constants::{
    DEV_BLOCK, DEV_NET, DEV_RNG, IRQ_BLOCK, IRQ_NET, IRQ_RNG, REMIX_INTERVAL_MS, REMIX_LEN,
    SEED_LEN, SEED_WAIT_MAX_MS, SEED_WAIT_STEP_MS,
};
use crate::errors::KernelResult;
use crate::kernel::block::BlockTest;
use crate::kernel::csprng::CsprngState;
use crate::kernel::net::{FrameSink, NetRx, NetTx, Protocol};
use crate::kernel::{Event, Kernel, Owner};
use crate::platform::{BootInfo, Platform};

/// The assembled system
pub struct Os<P: Platform> {
    kernel: Kernel<P>,
    block: BlockTest,
    rx: NetRx,
    tx: NetTx,
    degraded: bool,
    services_started: bool,
    seed_buf: [u8; SEED_LEN],
    remix_buf: [u8; REMIX_LEN],
    remix_fill_slot: Option<SlotId>,
    tx_scratch: FrameBuf,
    /// Protocol and length of a pulled frame still waiting in
    /// `tx_scratch` after backpressure
    tx_pending: Option<(Protocol, usize)>,
}

impl<P: Platform> Os<P> {
    /// Assemble an unbooted system around a kernel
    #[must_use]
    pub fn new(kernel: Kernel<P>) -> Self {
        Self {
            kernel,
            block: BlockTest::new(DEV_BLOCK, 0),
            rx: NetRx::new(DEV_NET),
            tx: NetTx::new(DEV_NET),
            degraded: false,
            services_started: false,
            seed_buf: [0; SEED_LEN],
            remix_buf: [0; REMIX_LEN],
            remix_fill_slot: None,
            tx_scratch: FrameBuf::new(),
            tx_pending: None,
        }
    }

    /// Bring the system up
    ///
    /// Interrupt lines for the block and network devices are required;
    /// an unavailable entropy line only degrades the seed. After this
    /// returns the generator is seeded and the re-mix timer is armed.
    /// The block self-test and the receive ring start on the first
    /// [`Os::poll`], once the system sits at its final address and the
    /// buffer addresses they capture stay valid.
    pub fn boot(&mut self, boot: &BootInfo<'_>) -> KernelResult<()> {
        let ring = self.kernel.ring();
        self.kernel.platform_mut().init(boot)?;

        self.kernel.platform_mut().irq_register(IRQ_BLOCK, ring)?;
        self.kernel.platform_mut().irq_register(IRQ_NET, ring)?;
        let rng_available = match self.kernel.platform_mut().irq_register(IRQ_RNG, ring) {
            Ok(()) => true,
            Err(e) => {
                warn!("entropy interrupt unavailable ({}), degraded seed", e);
                false
            }
        };

        self.kernel.platform_mut().irq_enable(IRQ_BLOCK);
        self.kernel.platform_mut().irq_enable(IRQ_NET);
        if rng_available {
            self.kernel.platform_mut().irq_enable(IRQ_RNG);
        }

        self.seed(rng_available)?;
        self.arm_remix_timer()?;
        self.kernel.flush()?;
        info!("boot complete (degraded entropy: {})", self.degraded);
        Ok(())
    }

    /// Seed the generator, waiting a bounded time for the entropy device
    fn seed(&mut self, rng_available: bool) -> KernelResult<()> {
        if rng_available {
            let slot = self.kernel.reserve(Owner::Seed)?;
            let desc = BufferDesc::from_slice(&mut self.seed_buf);
            self.kernel.submit(slot, WorkRequest::rng_fill(DEV_RNG, desc))?;
            self.kernel.flush()?;

            let mut waited = 0;
            while waited < SEED_WAIT_MAX_MS {
                self.kernel.wait(Some(SEED_WAIT_STEP_MS));
                self.kernel.tick();
                waited += SEED_WAIT_STEP_MS;

                while let Some(event) = self.kernel.take_event() {
                    if event.owner == Owner::Seed {
                        self.kernel.release(slot);
                        if event.completion.result.is_ok() {
                            self.kernel.set_rng(CsprngState::init(&mut self.seed_buf));
                            info!("generator seeded from entropy device");
                            return Ok(());
                        }
                        warn!(
                            "entropy read failed ({:?}), degraded seed",
                            event.completion.result
                        );
                        return self.seed_degraded();
                    }
                }
            }

            // The device never answered; withdraw the request.
            warn!("entropy device timed out after {} ms", SEED_WAIT_MAX_MS);
            self.kernel.cancel(slot)?;
            self.kernel.flush()?;
            self.kernel.tick();
            while let Some(event) = self.kernel.take_event() {
                if event.owner == Owner::Seed {
                    self.kernel.release(slot);
                }
            }
        }
        self.seed_degraded()
    }

    /// Last-resort seed from the boot clock
    fn seed_degraded(&mut self) -> KernelResult<()> {
        self.degraded = true;
        let mut state = self.kernel.now_ms() ^ 0x9E37_79B9_7F4A_7C15;
        for byte in self.seed_buf.iter_mut() {
            state = state
                .wrapping_mul(6_364_136_223_846_793_005)
                .wrapping_add(1_442_695_040_888_963_407);
            *byte = (state >> 33) as u8;
        }
        self.kernel.set_rng(CsprngState::init(&mut self.seed_buf));
        warn!("generator seeded from boot clock only");
        Ok(())
    }

    fn arm_remix_timer(&mut self) -> KernelResult<()> {
        let slot = self.kernel.reserve(Owner::RemixTimer)?;
        let deadline = self.kernel.now_ms() + REMIX_INTERVAL_MS;
        self.kernel.submit(slot, WorkRequest::timer(deadline))
    }

    /// One event loop iteration
    ///
    /// Pulls outbound frames from the sink, flushes the batch, parks,
    /// then drains and dispatches completions. `max_timeout_ms` bounds
    /// the park even when no timer is armed.
    pub fn poll<S: FrameSink>(
        &mut self,
        sink: &mut S,
        max_timeout_ms: Option<u64>,
    ) -> KernelResult<()> {
        // The self-test and the receive ring capture their buffer
        // addresses when posted, so they first start here, after the
        // system has settled at its final address.
        if !self.services_started {
            self.services_started = true;
            self.block.start(&mut self.kernel)?;
            self.rx.start(&mut self.kernel)?;
        }

        // A frame already pulled from the sink is retried before
        // anything new is pulled; backpressure defers it, never drops
        // it.
        if let Some((protocol, len)) = self.tx_pending {
            if !self.tx.is_busy(protocol) {
                match self
                    .tx
                    .try_send(&mut self.kernel, protocol, &self.tx_scratch.0[..len])
                {
                    Ok(()) => self.tx_pending = None,
                    Err(e) if e.is_backpressure() => {}
                    Err(e) => return Err(e),
                }
            }
        }
        // One staging buffer: while a deferred frame occupies it, no
        // further frames are pulled.
        if self.tx_pending.is_none() {
            for protocol in Protocol::ALL {
                if self.tx.is_busy(protocol) {
                    continue;
                }
                if let Some(len) = sink.pull_frame(protocol, &mut self.tx_scratch.0) {
                    match self
                        .tx
                        .try_send(&mut self.kernel, protocol, &self.tx_scratch.0[..len])
                    {
                        Ok(()) => {}
                        Err(e) if e.is_backpressure() => {
                            self.tx_pending = Some((protocol, len));
                            break;
                        }
                        Err(e) => return Err(e),
                    }
                }
            }
        }

        self.kernel.flush()?;
        self.kernel.wait(max_timeout_ms);
        self.kernel.tick();

        while let Some(event) = self.kernel.take_event() {
            self.dispatch(event, sink)?;
        }
        Ok(())
    }

    fn dispatch<S: FrameSink>(&mut self, event: Event, sink: &mut S) -> KernelResult<()> {
        match event.owner {
            Owner::BlockTest => self.block.on_completion(&mut self.kernel, &event.completion),
            Owner::NetRx => self.rx.on_completion(&mut self.kernel, &event.completion, sink),
            Owner::NetTx(protocol) => {
                self.tx.on_completion(&mut self.kernel, protocol, &event.completion)
            }
            Owner::RemixTimer => self.on_remix_timer(event.slot),
            Owner::RemixFill => self.on_remix_fill(event),
            Owner::Seed => {
                // A seed read the boot path gave up on; reclaim the slot.
                warn!("late entropy completion for slot {}", event.slot.0);
                self.kernel.release(event.slot);
                Ok(())
            }
            Owner::Unassigned => {
                warn!("completion for unowned slot {}", event.slot.0);
                Ok(())
            }
        }
    }

    /// Interval elapsed: request fresh entropy and re-arm the timer
    fn on_remix_timer(&mut self, timer_slot: SlotId) -> KernelResult<()> {
        self.kernel.release(timer_slot);

        if self.remix_fill_slot.is_none() {
            let slot = self.kernel.reserve(Owner::RemixFill)?;
            let desc = BufferDesc::from_slice(&mut self.remix_buf);
            match self.kernel.submit(slot, WorkRequest::rng_fill(DEV_RNG, desc)) {
                Ok(()) => self.remix_fill_slot = Some(slot),
                Err(e) => {
                    self.kernel.release(slot);
                    warn!("re-mix fill not submitted: {}", e);
                }
            }
        }
        self.arm_remix_timer()
    }

    /// Fresh entropy arrived: fold it into the generator
    fn on_remix_fill(&mut self, event: Event) -> KernelResult<()> {
        self.remix_fill_slot = None;
        self.kernel.release(event.slot);
        if event.completion.result.is_ok() {
            if let Some(rng) = self.kernel.rng_mut() {
                rng.mix(&self.remix_buf);
                info!("generator re-mixed with {} bytes", REMIX_LEN);
            }
        } else {
            warn!("re-mix entropy read failed: {:?}", event.completion.result);
        }
        self.remix_buf.zeroize();
        Ok(())
    }

    /// Run the event loop forever
    pub fn run<S: FrameSink>(&mut self, sink: &mut S) -> ! {
        loop {
            if let Err(e) = self.poll(sink, None) {
                warn!("poll error: {}", e);
            }
        }
    }

    /// True when the generator was seeded without the entropy device
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    /// Block self-test state machine
    #[must_use]
    pub fn block(&self) -> &BlockTest {
        &self.block
    }

    /// Receive ring
    #[must_use]
    pub fn rx(&self) -> &NetRx {
        &self.rx
    }

    /// Transmit channels
    #[must_use]
    pub fn tx(&self) -> &NetTx {
        &self.tx
    }

    /// The kernel core
    #[must_use]
    pub fn kernel(&self) -> &Kernel<P> {
        &self.kernel
    }

    /// Mutable access to the kernel core
    pub fn kernel_mut(&mut self) -> &mut Kernel<P> {
        &mut self.kernel
    }
}
