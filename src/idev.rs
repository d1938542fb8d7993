//! L1 IDev: process-wide intra-device registry.
//!
//! Holds cross-subsystem handles (NPA pool, inline-crypto device, MCS list,
//! inline-NIX device) with reference counts and spin-locks, exactly as
//! `spec.md` §2/§5 describes. Grounded on `device::mlx4`'s
//! `static CONNECTX3_NIC: Once<Mutex<ConnectX3Nic>>` singleton pattern,
//! generalized to two independent spin-locks per `spec.md` §5
//! ("two spin-locks (`nix_inl_dev_lock`, `npa_dev_lock`)").

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use spin::{Mutex, Once};

use crate::error::{RocError, RocResult};

/// Reference count that asserts it never goes negative
/// (`spec.md` §8 property 4: "reference-count monotonicity").
#[derive(Debug, Default)]
pub struct RefCount(AtomicI32);

impl RefCount {
    pub fn new() -> Self {
        Self(AtomicI32::new(0))
    }

    pub fn get(&self) -> i32 {
        self.0.load(Ordering::Acquire)
    }

    pub fn inc(&self) -> i32 {
        self.0.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Decrements and returns the new value. Panics in debug builds if the
    /// count would go negative — the invariant the spec requires engines to
    /// uphold structurally rather than merely by convention.
    pub fn dec(&self) -> i32 {
        let prev = self.0.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "refcount underflow");
        prev - 1
    }
}

/// A process-wide NPA pool handle shared by reference between consumers
/// (`spec.md` §3 "Aura ... handles into it are shared by reference").
#[derive(Debug, Clone)]
pub struct NpaPoolHandle {
    pub aura_id: u32,
}

/// Inline-crypto device attachment: one per process, reference counted.
#[derive(Debug, Clone)]
pub struct InlineCptHandle {
    pub cpt_lf_id: u16,
}

/// Inline-NIX device attachment (meta-aura owner, soft-expiry ring base).
#[derive(Debug, Clone)]
pub struct InlineNixHandle {
    pub nix_lf_id: u16,
}

#[derive(Default)]
struct NpaRegistry {
    handle: Option<NpaPoolHandle>,
    refcnt: RefCount,
}

#[derive(Default)]
struct NixInlRegistry {
    cpt: Option<InlineCptHandle>,
    nix: Option<InlineNixHandle>,
    mcs_list: Vec<u16>,
    refcnt: RefCount,
}

/// The intra-device registry. Interior mutability is gated by the two
/// locks named in `spec.md` §5; callers never lock both at once in the same
/// direction (NPA registry updates do not need the NIX-inline lock and vice
/// versa), avoiding a lock-order-inversion hazard.
pub struct IDev {
    npa_dev_lock: Mutex<NpaRegistry>,
    nix_inl_dev_lock: Mutex<NixInlRegistry>,
}

impl IDev {
    fn new() -> Self {
        Self {
            npa_dev_lock: Mutex::new(NpaRegistry::default()),
            nix_inl_dev_lock: Mutex::new(NixInlRegistry::default()),
        }
    }

    /// Attaches to (or creates) the process-wide NPA pool. Only the first
    /// attacher issues the admin-function attach request
    /// (`spec.md` §4.2 "A reference count gates attach/detach").
    pub fn npa_attach(
        &self,
        create: impl FnOnce() -> RocResult<NpaPoolHandle>,
    ) -> RocResult<(NpaPoolHandle, bool)> {
        let mut reg = self.npa_dev_lock.lock();
        let first = reg.handle.is_none();
        if reg.handle.is_none() {
            reg.handle = Some(create()?);
        }
        reg.refcnt.inc();
        Ok((reg.handle.clone().unwrap(), first))
    }

    /// Detaches from the NPA pool. Returns `true` when this was the last
    /// reference (caller should issue the admin-function detach / destroy).
    pub fn npa_detach(&self) -> RocResult<bool> {
        let mut reg = self.npa_dev_lock.lock();
        if reg.handle.is_none() {
            return Err(RocError::Other("npa_detach: not attached"));
        }
        let remaining = reg.refcnt.dec();
        if remaining == 0 {
            reg.handle = None;
        }
        Ok(remaining == 0)
    }

    pub fn npa_refs(&self) -> i32 {
        self.npa_dev_lock.lock().refcnt.get()
    }

    pub fn nix_inl_attach_cpt(&self, handle: InlineCptHandle) -> i32 {
        let mut reg = self.nix_inl_dev_lock.lock();
        reg.cpt = Some(handle);
        reg.refcnt.inc()
    }

    pub fn nix_inl_attach_nix(&self, handle: InlineNixHandle) -> i32 {
        let mut reg = self.nix_inl_dev_lock.lock();
        reg.nix = Some(handle);
        reg.refcnt.inc()
    }

    pub fn nix_inl_cpt(&self) -> Option<InlineCptHandle> {
        self.nix_inl_dev_lock.lock().cpt.clone()
    }

    pub fn nix_inl_nix(&self) -> Option<InlineNixHandle> {
        self.nix_inl_dev_lock.lock().nix.clone()
    }

    pub fn nix_inl_refs(&self) -> i32 {
        self.nix_inl_dev_lock.lock().refcnt.get()
    }

    pub fn nix_inl_detach(&self) -> i32 {
        let mut reg = self.nix_inl_dev_lock.lock();
        let remaining = reg.refcnt.dec();
        if remaining == 0 {
            reg.cpt = None;
            reg.nix = None;
            reg.mcs_list.clear();
        }
        remaining
    }

    pub fn mcs_list_push(&self, id: u16) {
        self.nix_inl_dev_lock.lock().mcs_list.push(id);
    }

    pub fn mcs_list(&self) -> Vec<u16> {
        self.nix_inl_dev_lock.lock().mcs_list.clone()
    }
}

static IDEV: Once<Arc<IDev>> = Once::new();

/// Returns the process-wide IDev singleton, creating it on first access.
pub fn idev() -> Arc<IDev> {
    IDEV.call_once(|| Arc::new(IDev::new())).clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refcount_never_goes_negative_across_full_cycle() {
        let idev = IDev::new();
        let (h1, first1) = idev.npa_attach(|| Ok(NpaPoolHandle { aura_id: 0 })).unwrap();
        assert!(first1);
        let (h2, first2) = idev.npa_attach(|| Ok(NpaPoolHandle { aura_id: 99 })).unwrap();
        assert!(!first2);
        assert_eq!(h1.aura_id, h2.aura_id);
        assert_eq!(idev.npa_refs(), 2);
        assert!(!idev.npa_detach().unwrap());
        assert_eq!(idev.npa_refs(), 1);
        assert!(idev.npa_detach().unwrap());
        assert_eq!(idev.npa_refs(), 0);
    }

    #[test]
    fn nix_inl_refcount_reaches_zero_exactly_once() {
        let idev = IDev::new();
        idev.nix_inl_attach_cpt(InlineCptHandle { cpt_lf_id: 1 });
        idev.nix_inl_attach_nix(InlineNixHandle { nix_lf_id: 2 });
        assert_eq!(idev.nix_inl_refs(), 2);
        assert_eq!(idev.nix_inl_detach(), 1);
        assert!(idev.nix_inl_cpt().is_some());
        assert_eq!(idev.nix_inl_detach(), 0);
        assert!(idev.nix_inl_cpt().is_none());
        assert!(idev.nix_inl_nix().is_none());
    }

    #[test]
    fn singleton_is_process_wide() {
        let a = idev();
        let b = idev();
        assert!(Arc::ptr_eq(&a, &b));
    }
}
