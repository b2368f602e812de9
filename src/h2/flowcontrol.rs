//! Flow-control credit tracking (RFC 7540 Section 6.9).
//!
//! Two layers: [`FlowControl`] is plain credit bookkeeping (never negative,
//! overflow past 2^31-1 is a connection error); [`SendCredit`] adds the
//! async waiter used by the send path, which may be satisfied partially
//! when a WINDOW_UPDATE grants less than the requested amount.

use std::sync::Mutex;

use tokio::sync::Notify;

use crate::base::neterror::NetError;

/// Default initial window size (RFC 7540 Section 6.9.2).
pub const DEFAULT_WINDOW_SIZE: i64 = 65_535;

/// Tracks a single send or receive window.
#[derive(Debug, Clone)]
pub struct FlowControl {
    window: i64,
}

impl FlowControl {
    pub fn new(initial: i64) -> Self {
        Self { window: initial }
    }

    /// Current credit. Can go negative only through `adjust` after a
    /// SETTINGS change shrank the initial window.
    pub fn window(&self) -> i64 {
        self.window
    }

    /// Spend `amount` credit. Fails if the window would go below zero.
    pub fn consume(&mut self, amount: u32) -> Result<(), NetError> {
        let new = self.window - i64::from(amount);
        if new < 0 {
            return Err(NetError::Http2FlowControlError);
        }
        self.window = new;
        Ok(())
    }

    /// Add credit from a WINDOW_UPDATE. Fails past 2^31 - 1.
    pub fn increase(&mut self, increment: u32) -> Result<(), NetError> {
        let new = self.window + i64::from(increment);
        if new > 0x7fff_ffff {
            return Err(NetError::Http2FlowControlError);
        }
        self.window = new;
        Ok(())
    }

    /// Apply an INITIAL_WINDOW_SIZE delta (can be negative).
    pub fn adjust(&mut self, delta: i64) -> Result<(), NetError> {
        let new = self.window + delta;
        if new > 0x7fff_ffff {
            return Err(NetError::Http2FlowControlError);
        }
        self.window = new;
        Ok(())
    }
}

impl Default for FlowControl {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_SIZE)
    }
}

struct SendCreditState {
    window: FlowControl,
    /// Set when the connection or stream died; acquires fail with this.
    failed: Option<NetError>,
}

/// Async send-side credit: writers block until at least one byte of credit
/// exists, then take as much as is available up to their request.
pub struct SendCredit {
    state: Mutex<SendCreditState>,
    notify: Notify,
}

impl SendCredit {
    pub fn new(initial: i64) -> Self {
        Self {
            state: Mutex::new(SendCreditState {
                window: FlowControl::new(initial),
                failed: None,
            }),
            notify: Notify::new(),
        }
    }

    pub fn available(&self) -> i64 {
        self.state.lock().unwrap().window.window()
    }

    /// Acquire up to `want` bytes of credit, waiting for a WINDOW_UPDATE
    /// when none is available. Returns the amount actually granted, which
    /// may be less than `want` but is never zero.
    pub async fn acquire(&self, want: u32) -> Result<u32, NetError> {
        debug_assert!(want > 0);
        loop {
            let notified = self.notify.notified();
            {
                let mut state = self.state.lock().unwrap();
                if let Some(err) = state.failed {
                    return Err(err);
                }
                let available = state.window.window();
                if available > 0 {
                    let grant = (i64::from(want)).min(available) as u32;
                    state.window.consume(grant)?;
                    return Ok(grant);
                }
            }
            notified.await;
        }
    }

    /// Return unused credit taken by `acquire` (send path aborted).
    pub fn release_unused(&self, amount: u32) {
        if amount == 0 {
            return;
        }
        let mut state = self.state.lock().unwrap();
        let _ = state.window.increase(amount);
        drop(state);
        self.notify.notify_waiters();
    }

    /// Grant credit from a WINDOW_UPDATE.
    pub fn grant(&self, increment: u32) -> Result<(), NetError> {
        let mut state = self.state.lock().unwrap();
        state.window.increase(increment)?;
        drop(state);
        self.notify.notify_waiters();
        Ok(())
    }

    /// Apply an INITIAL_WINDOW_SIZE delta from SETTINGS.
    pub fn adjust(&self, delta: i64) -> Result<(), NetError> {
        let mut state = self.state.lock().unwrap();
        state.window.adjust(delta)?;
        drop(state);
        if delta > 0 {
            self.notify.notify_waiters();
        }
        Ok(())
    }

    /// Fail all current and future acquires.
    pub fn fail(&self, error: NetError) {
        let mut state = self.state.lock().unwrap();
        if state.failed.is_none() {
            state.failed = Some(error);
        }
        drop(state);
        self.notify.notify_waiters();
    }
}
