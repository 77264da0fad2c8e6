//! Lock-free usage counters driven by successful provision and decommission.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use gridnode_types::{Capacity, TypeRegistry, TypesResult, Unit, Workload, WorkloadType};

/// Unsigned accumulator that clamps at zero instead of wrapping.
#[derive(Debug, Default)]
pub struct AtomicValue(AtomicU64);

impl AtomicValue {
    pub fn new(v: u64) -> Self {
        Self(AtomicU64::new(v))
    }

    /// Add `v`, saturating at `u64::MAX`. Returns the new value.
    pub fn increment(&self, v: u64) -> u64 {
        let mut current = self.0.load(Ordering::Relaxed);
        loop {
            let next = current.saturating_add(v);
            match self
                .0
                .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return next,
                Err(actual) => current = actual,
            }
        }
    }

    /// Subtract `v`, clamping at zero. Returns the new value.
    pub fn decrement(&self, v: u64) -> u64 {
        let mut current = self.0.load(Ordering::Relaxed);
        loop {
            let next = current.saturating_sub(v);
            match self
                .0
                .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return next,
                Err(actual) => current = actual,
            }
        }
    }

    pub fn current(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }
}

/// Running totals of provisioned capacity and per-type workload counts.
#[derive(Debug, Default)]
pub struct Counters {
    cru: AtomicValue,
    mru: AtomicValue,
    sru: AtomicValue,
    hru: AtomicValue,
    // Keys are fixed at construction so lookups never need a lock.
    types: BTreeMap<WorkloadType, AtomicValue>,
}

impl Counters {
    /// One per-type counter for every registered type.
    pub fn new(registry: &TypeRegistry) -> Self {
        Self {
            types: registry
                .types()
                .into_iter()
                .map(|typ| (typ, AtomicValue::default()))
                .collect(),
            ..Default::default()
        }
    }

    /// Account a freshly provisioned workload.
    ///
    /// Capacity is computed first; on error nothing is touched.
    pub fn increment(&self, registry: &TypeRegistry, wl: &Workload) -> TypesResult<()> {
        let cap = wl.capacity(registry)?;
        if let Some(count) = self.types.get(&wl.typ) {
            count.increment(1);
        }
        self.cru.increment(cap.cru);
        self.mru.increment(cap.mru);
        self.sru.increment(cap.sru);
        self.hru.increment(cap.hru);
        Ok(())
    }

    /// Release a decommissioned workload.
    pub fn decrement(&self, registry: &TypeRegistry, wl: &Workload) -> TypesResult<()> {
        let cap = wl.capacity(registry)?;
        if let Some(count) = self.types.get(&wl.typ) {
            count.decrement(1);
        }
        self.cru.decrement(cap.cru);
        self.mru.decrement(cap.mru);
        self.sru.decrement(cap.sru);
        self.hru.decrement(cap.hru);
        Ok(())
    }

    pub fn workload_count(&self, typ: &WorkloadType) -> Unit {
        self.types.get(typ).map(AtomicValue::current).unwrap_or(0)
    }

    /// Snapshot of the four capacity dimensions. IPv4 is not tracked here.
    pub fn current(&self) -> Capacity {
        Capacity {
            cru: self.cru.current(),
            mru: self.mru.current(),
            sru: self.sru.current(),
            hru: self.hru.current(),
            ipv4u: 0,
        }
    }
}
