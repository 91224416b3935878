//! Elastic barrier: first-in maps, last-out unmaps.
//!
//! Many threads lock and unlock the same texture slice with overlapping
//! lifetimes.  The barrier makes sure the expensive map runs once when the
//! first holder arrives and the unmap runs once when the last holder leaves,
//! without a mutex around the whole critical section.
//!
//! ```text
//!   incoming  lock calls in flight (decremented only when a holder leaves)
//!   outgoing  holders currently using the mapping
//!   pending   callers spinning until the mapping is published
//!
//!   visit_in:  incoming 0 → 1          main: map, outgoing += 1
//!              incoming > 0            pending += 1, spin while outgoing == 0
//!                 pending == incoming  nobody is mapping:
//!                                      TORN_DOWN → this caller remaps
//!                                      STABLE    → teardown was called off, go
//!   visit_out: outgoing 1 → 0 and incoming == 1   unmap, TORN_DOWN
//!              outgoing 1 → 0 and incoming  > 1   a newcomer arrived, keep mapping
//!              incoming -= 1
//! ```

use std::hint;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

use tracing::error;

use hwdec_core::error::Result;

/// Mapping is live (or the last teardown was called off).
const STABLE: u8 = 0;
/// Nothing is mapped; the next lone caller must map.
const TORN_DOWN: u8 = 1;
/// A spinning caller won the race to remap.
const REMAPPING: u8 = 2;

#[derive(Debug)]
pub struct ElasticBarrier {
    incoming: AtomicUsize,
    outgoing: AtomicUsize,
    pending: AtomicUsize,
    reinit: AtomicU8,
}

impl Default for ElasticBarrier {
    fn default() -> Self {
        Self::new()
    }
}

impl ElasticBarrier {
    pub const fn new() -> Self {
        Self {
            incoming: AtomicUsize::new(0),
            outgoing: AtomicUsize::new(0),
            pending: AtomicUsize::new(0),
            reinit: AtomicU8::new(TORN_DOWN),
        }
    }

    /// Register a holder, running `on_first_in` if this caller must map.
    ///
    /// On error the caller is not registered and must not call `visit_out`.
    pub fn visit_in<F>(&self, on_first_in: F) -> Result<()>
    where
        F: FnOnce() -> Result<()>,
    {
        if self.incoming.fetch_add(1, Ordering::SeqCst) == 0 {
            return self.enter_as_main(on_first_in, false);
        }

        self.pending.fetch_add(1, Ordering::SeqCst);
        let mut on_first_in = Some(on_first_in);
        while self.outgoing.load(Ordering::SeqCst) == 0 {
            if self.pending.load(Ordering::SeqCst) == self.incoming.load(Ordering::SeqCst) {
                match self.reinit.compare_exchange(
                    TORN_DOWN,
                    REMAPPING,
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                ) {
                    Ok(_) => {
                        if let Some(map) = on_first_in.take() {
                            return self.enter_as_main(map, true);
                        }
                    }
                    // Another spinner is remapping; its outgoing bump releases us.
                    Err(REMAPPING) => {}
                    Err(_) => break,
                }
            }
            hint::spin_loop();
        }
        self.pending.fetch_sub(1, Ordering::SeqCst);
        self.outgoing.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn enter_as_main<F>(&self, on_first_in: F, was_pending: bool) -> Result<()>
    where
        F: FnOnce() -> Result<()>,
    {
        let res = on_first_in();
        if was_pending {
            self.pending.fetch_sub(1, Ordering::SeqCst);
        }
        match res {
            Ok(()) => {
                self.reinit.store(STABLE, Ordering::SeqCst);
                self.outgoing.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            Err(err) => {
                self.reinit.store(TORN_DOWN, Ordering::SeqCst);
                self.incoming.fetch_sub(1, Ordering::SeqCst);
                Err(err)
            }
        }
    }

    /// Unregister a holder, running `on_last_out` if this was the last one.
    pub fn visit_out<F>(&self, on_last_out: F)
    where
        F: FnOnce(),
    {
        let prev_out = match self
            .outgoing
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        {
            Ok(prev) => prev,
            Err(_) => {
                error!("Elastic barrier released without a matching lock");
                return;
            }
        };

        if prev_out == 1 && self.incoming.load(Ordering::SeqCst) == 1 {
            on_last_out();
            self.reinit.store(TORN_DOWN, Ordering::SeqCst);
        }
        self.incoming.fetch_sub(1, Ordering::SeqCst);
    }

    /// `(incoming, outgoing, pending)` snapshot for diagnostics.
    pub fn counters(&self) -> (usize, usize, usize) {
        (
            self.incoming.load(Ordering::SeqCst),
            self.outgoing.load(Ordering::SeqCst),
            self.pending.load(Ordering::SeqCst),
        )
    }

    pub fn is_mapped(&self) -> bool {
        self.reinit.load(Ordering::SeqCst) == STABLE && self.incoming.load(Ordering::SeqCst) > 0
    }
}
