//! Interrupt-to-worker handoff.
//!
//! Radio completion interrupts arrive on a GPIO (SX1262 DIO1).  The ISR
//! does the minimum possible work: it loads the token the owning
//! transport armed for the next edge and pushes it into a lock-free
//! bounded queue.  The transport's worker thread drains the queue and
//! performs all protocol work (reading the packet, stats, callbacks).
//!
//! ```text
//! ┌───────────┐  dispatch(gpio)  ┌──────────────┐  fire()  ┌─────────────┐  take()  ┌──────────┐
//! │ GPIO ISR  │─────────────────▶│ IRQ registry │────────▶│ TokenQueue  │────────▶│  Worker  │
//! │ (DIO1)    │                  │ gpio → line  │         │ (lock-free) │         │  thread  │
//! └───────────┘                  └──────────────┘         └─────────────┘         └──────────┘
//! ```
//!
//! Nothing on the ISR side allocates, logs, or blocks.  The registry has
//! a fixed number of slots; only one transport instance per physical
//! interrupt line can be registered at a time.

use core::cell::RefCell;
use core::sync::atomic::{AtomicU8, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

use critical_section::Mutex;

use crate::error::{Error, Result};

/// Tokens posted by the interrupt path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum IrqToken {
    TxDone = 1,
    RxDone = 2,
}

impl IrqToken {
    const fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            1 => Some(Self::TxDone),
            2 => Some(Self::RxDone),
            _ => None,
        }
    }
}

// ── Lock-free bounded queue ───────────────────────────────────
//
// Sequence-numbered ring: each slot carries the position it expects to
// be written (or read) at next.  Producers and the consumer claim
// positions with a CAS, so pushes from several contexts never lose a
// token and a full queue is detected without locking.

struct Slot {
    seq: AtomicUsize,
    value: AtomicU8,
}

/// Bounded MPMC queue of `u8` tokens.  `N` must be a power of two.
pub struct TokenQueue<const N: usize> {
    slots: [Slot; N],
    head: AtomicUsize,
    tail: AtomicUsize,
}

impl<const N: usize> TokenQueue<N> {
    const MASK: usize = {
        assert!(N.is_power_of_two(), "TokenQueue capacity must be a power of two");
        N - 1
    };

    pub fn new() -> Self {
        Self {
            slots: core::array::from_fn(|i| Slot {
                seq: AtomicUsize::new(i),
                value: AtomicU8::new(0),
            }),
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
        }
    }

    /// Push a token.  Safe to call from ISR context.
    /// Returns `false` if the queue is full (token dropped).
    pub fn push(&self, value: u8) -> bool {
        let mut pos = self.tail.load(Ordering::Relaxed);
        loop {
            let slot = &self.slots[pos & Self::MASK];
            let seq = slot.seq.load(Ordering::Acquire);
            let diff = seq as isize - pos as isize;
            if diff == 0 {
                match self.tail.compare_exchange_weak(
                    pos,
                    pos.wrapping_add(1),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        slot.value.store(value, Ordering::Relaxed);
                        slot.seq.store(pos.wrapping_add(1), Ordering::Release);
                        return true;
                    }
                    Err(current) => pos = current,
                }
            } else if diff < 0 {
                return false;
            } else {
                pos = self.tail.load(Ordering::Relaxed);
            }
        }
    }

    /// Pop the oldest token, or `None` if empty.
    pub fn pop(&self) -> Option<u8> {
        let mut pos = self.head.load(Ordering::Relaxed);
        loop {
            let slot = &self.slots[pos & Self::MASK];
            let seq = slot.seq.load(Ordering::Acquire);
            let diff = seq as isize - pos.wrapping_add(1) as isize;
            if diff == 0 {
                match self.head.compare_exchange_weak(
                    pos,
                    pos.wrapping_add(1),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        let value = slot.value.load(Ordering::Relaxed);
                        slot.seq.store(pos.wrapping_add(N), Ordering::Release);
                        return Some(value);
                    }
                    Err(current) => pos = current,
                }
            } else if diff < 0 {
                return None;
            } else {
                pos = self.head.load(Ordering::Relaxed);
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        let head = self.head.load(Ordering::Relaxed);
        self.slots[head & Self::MASK].seq.load(Ordering::Acquire) != head.wrapping_add(1)
    }
}

impl<const N: usize> Default for TokenQueue<N> {
    fn default() -> Self {
        Self::new()
    }
}

// ── IRQ line ──────────────────────────────────────────────────

/// Tokens buffered between ISR and worker.
pub const IRQ_QUEUE_DEPTH: usize = 16;

struct LineState {
    /// Raw [`IrqToken`] to post on the next edge; 0 = disarmed.
    armed: AtomicU8,
    queue: TokenQueue<IRQ_QUEUE_DEPTH>,
    fired: AtomicU32,
    dropped: AtomicU32,
}

/// Shared handle to one interrupt line's token queue.
///
/// The transport arms the line before starting an operation (like
/// choosing which action the next DIO1 edge means), the ISR calls
/// [`fire`](Self::fire), and the worker calls [`take`](Self::take).
#[derive(Clone)]
pub struct IrqLine(Arc<LineState>);

impl IrqLine {
    pub fn new() -> Self {
        Self(Arc::new(LineState {
            armed: AtomicU8::new(0),
            queue: TokenQueue::new(),
            fired: AtomicU32::new(0),
            dropped: AtomicU32::new(0),
        }))
    }

    /// Select the token the next edge will post.
    pub fn arm(&self, token: IrqToken) {
        self.0.armed.store(token as u8, Ordering::Release);
    }

    /// Ignore edges until re-armed.
    pub fn disarm(&self) {
        self.0.armed.store(0, Ordering::Release);
    }

    pub fn armed(&self) -> Option<IrqToken> {
        IrqToken::from_raw(self.0.armed.load(Ordering::Acquire))
    }

    /// Interrupt entry point.  O(1), no allocation, no locks.
    /// Returns `true` if a token was queued.
    pub fn fire(&self) -> bool {
        let token = self.0.armed.load(Ordering::Acquire);
        if token == 0 {
            return false;
        }
        self.0.fired.fetch_add(1, Ordering::Relaxed);
        if self.0.queue.push(token) {
            true
        } else {
            self.0.dropped.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    /// Worker side: next pending token.
    pub fn take(&self) -> Option<IrqToken> {
        while let Some(raw) = self.0.queue.pop() {
            if let Some(token) = IrqToken::from_raw(raw) {
                return Some(token);
            }
        }
        None
    }

    /// Discard every pending token.
    pub fn drain(&self) -> usize {
        let mut n = 0;
        while self.0.queue.pop().is_some() {
            n += 1;
        }
        n
    }

    /// Edges seen while armed.
    pub fn fired_count(&self) -> u32 {
        self.0.fired.load(Ordering::Relaxed)
    }

    /// Tokens lost to a full queue.
    pub fn dropped_count(&self) -> u32 {
        self.0.dropped.load(Ordering::Relaxed)
    }
}

impl Default for IrqLine {
    fn default() -> Self {
        Self::new()
    }
}

// ── Registry ──────────────────────────────────────────────────
//
// ESP-IDF ISR callbacks cannot capture, so the trampoline receives only
// the GPIO number and looks up the owning line here.

/// Interrupt lines that may be registered at once.
pub const MAX_IRQ_LINES: usize = 4;

static REGISTRY: Mutex<RefCell<[Option<(i32, IrqLine)>; MAX_IRQ_LINES]>> =
    Mutex::new(RefCell::new([const { None }; MAX_IRQ_LINES]));

/// Bind `gpio` to `line`.  Fails if the GPIO is already bound or the
/// registry is full.
pub fn register(gpio: i32, line: &IrqLine) -> Result<()> {
    critical_section::with(|cs| {
        let mut slots = REGISTRY.borrow_ref_mut(cs);
        if slots.iter().flatten().any(|(g, _)| *g == gpio) {
            return Err(Error::Init("IRQ line already registered"));
        }
        let free = slots
            .iter_mut()
            .find(|s| s.is_none())
            .ok_or(Error::Init("IRQ registry full"))?;
        *free = Some((gpio, line.clone()));
        Ok(())
    })
}

/// Remove the binding for `gpio`.  Returns `true` if one existed.
pub fn unregister(gpio: i32) -> bool {
    let removed = critical_section::with(|cs| {
        REGISTRY
            .borrow_ref_mut(cs)
            .iter_mut()
            .find(|s| s.as_ref().is_some_and(|(g, _)| *g == gpio))
            .and_then(Option::take)
    });
    // Release the Arc outside the critical section.
    removed.is_some()
}

/// ISR trampoline body: fire the line bound to `gpio`.
pub fn dispatch(gpio: i32) -> bool {
    critical_section::with(|cs| {
        REGISTRY
            .borrow_ref(cs)
            .iter()
            .flatten()
            .find(|(g, _)| *g == gpio)
            .is_some_and(|(_, line)| line.fire())
    })
}

pub fn is_registered(gpio: i32) -> bool {
    critical_section::with(|cs| REGISTRY.borrow_ref(cs).iter().flatten().any(|(g, _)| *g == gpio))
}

// ── ESP-IDF GPIO glue ─────────────────────────────────────────

#[cfg(target_os = "espidf")]
unsafe extern "C" fn gpio_trampoline(arg: *mut core::ffi::c_void) {
    dispatch(arg as i32);
}

/// Register `line` for `gpio` and route the GPIO's rising edge to it.
#[cfg(target_os = "espidf")]
pub fn install_gpio_irq(gpio: i32, line: &IrqLine) -> Result<()> {
    use esp_idf_sys::*;

    register(gpio, line)?;
    // SAFETY: the ISR service install is idempotent (INVALID_STATE means
    // already installed); the handler is a plain fn that only touches the
    // critical-section-guarded registry and atomics.
    unsafe {
        let ret = gpio_install_isr_service(0);
        if ret != ESP_OK && ret != ESP_ERR_INVALID_STATE {
            unregister(gpio);
            return Err(Error::Init("GPIO ISR service install failed"));
        }
        gpio_set_intr_type(gpio, gpio_int_type_t_GPIO_INTR_POSEDGE);
        let ret = gpio_isr_handler_add(gpio, Some(gpio_trampoline), gpio as *mut core::ffi::c_void);
        if ret != ESP_OK {
            unregister(gpio);
            return Err(Error::Init("GPIO ISR handler add failed"));
        }
        gpio_intr_enable(gpio);
    }
    log::info!("IRQ: GPIO{} routed to worker queue", gpio);
    Ok(())
}

/// Detach the GPIO handler and drop the registry binding.
#[cfg(target_os = "espidf")]
pub fn remove_gpio_irq(gpio: i32) {
    // SAFETY: removing a handler that was never added is a no-op error.
    unsafe {
        esp_idf_sys::gpio_intr_disable(gpio);
        esp_idf_sys::gpio_isr_handler_remove(gpio);
    }
    unregister(gpio);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_is_fifo_and_bounded() {
        let q: TokenQueue<4> = TokenQueue::new();
        assert!(q.is_empty());
        for v in 1..=4 {
            assert!(q.push(v));
        }
        assert!(!q.push(5), "fifth push must fail on a 4-slot queue");
        assert_eq!(q.pop(), Some(1));
        assert!(q.push(5));
        assert_eq!(q.pop(), Some(2));
        assert_eq!(q.pop(), Some(3));
        assert_eq!(q.pop(), Some(4));
        assert_eq!(q.pop(), Some(5));
        assert_eq!(q.pop(), None);
        assert!(q.is_empty());
    }

    #[test]
    fn concurrent_producers_lose_nothing() {
        let q = Arc::new(TokenQueue::<256>::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let q = Arc::clone(&q);
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        assert!(q.push(1));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let mut n = 0;
        while q.pop().is_some() {
            n += 1;
        }
        assert_eq!(n, 200);
    }

    #[test]
    fn disarmed_line_ignores_edges() {
        let line = IrqLine::new();
        assert!(!line.fire());
        assert_eq!(line.take(), None);
        assert_eq!(line.fired_count(), 0);

        line.arm(IrqToken::TxDone);
        assert!(line.fire());
        assert_eq!(line.take(), Some(IrqToken::TxDone));

        line.arm(IrqToken::RxDone);
        line.fire();
        line.fire();
        line.disarm();
        line.fire();
        assert_eq!(line.fired_count(), 3);
        assert_eq!(line.drain(), 2);
    }

    #[test]
    fn full_line_counts_dropped_tokens() {
        let line = IrqLine::new();
        line.arm(IrqToken::RxDone);
        for _ in 0..IRQ_QUEUE_DEPTH {
            assert!(line.fire());
        }
        assert!(!line.fire());
        assert_eq!(line.dropped_count(), 1);
    }

    #[test]
    fn registry_routes_by_gpio() {
        let line = IrqLine::new();
        line.arm(IrqToken::RxDone);
        register(9001, &line).unwrap();
        assert!(is_registered(9001));
        assert_eq!(
            register(9001, &IrqLine::new()),
            Err(Error::Init("IRQ line already registered"))
        );

        assert!(dispatch(9001));
        assert!(!dispatch(9002), "unbound GPIO must be ignored");
        assert_eq!(line.take(), Some(IrqToken::RxDone));

        assert!(unregister(9001));
        assert!(!unregister(9001));
        assert!(!dispatch(9001));
    }
}
