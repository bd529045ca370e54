//! Atomic helpers
//!
//! Lock-free min/max updates and a floating-point accumulator stored in the
//! bits of an `AtomicU64`, used by the statistics engine so that sampling
//! never needs a lock of its own.

use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};

/// Extended atomic operations trait
pub trait AtomicExt<T> {
    /// Atomic maximum operation - updates value to max(current, val)
    fn atomic_maximize(&self, val: T, order: Ordering) -> T;

    /// Atomic minimum operation - updates value to min(current, val)
    fn atomic_minimize(&self, val: T, order: Ordering) -> T;
}

macro_rules! impl_atomic_ext {
    ($atomic_type:ty, $value_type:ty) => {
        impl AtomicExt<$value_type> for $atomic_type {
            #[inline]
            fn atomic_maximize(&self, val: $value_type, order: Ordering) -> $value_type {
                let mut current = self.load(Ordering::Relaxed);
                loop {
                    let new_val = current.max(val);
                    if new_val == current {
                        return current;
                    }

                    match self.compare_exchange_weak(current, new_val, order, Ordering::Relaxed) {
                        Ok(_) => return new_val,
                        Err(actual) => current = actual,
                    }
                }
            }

            #[inline]
            fn atomic_minimize(&self, val: $value_type, order: Ordering) -> $value_type {
                let mut current = self.load(Ordering::Relaxed);
                loop {
                    let new_val = current.min(val);
                    if new_val == current {
                        return current;
                    }

                    match self.compare_exchange_weak(current, new_val, order, Ordering::Relaxed) {
                        Ok(_) => return new_val,
                        Err(actual) => current = actual,
                    }
                }
            }
        }
    };
}

impl_atomic_ext!(AtomicU32, u32);
impl_atomic_ext!(AtomicU64, u64);
impl_atomic_ext!(AtomicUsize, usize);

/// Add `val` to the `f64` whose bits live in `cell`; returns the new value
#[inline]
pub fn atomic_add_f64(cell: &AtomicU64, val: f64, order: Ordering) -> f64 {
    let mut current = cell.load(Ordering::Relaxed);
    loop {
        let sum = f64::from_bits(current) + val;
        match cell.compare_exchange_weak(current, sum.to_bits(), order, Ordering::Relaxed) {
            Ok(_) => return sum,
            Err(actual) => current = actual,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_maximize_minimize() {
        let atomic = AtomicU64::new(10);
        assert_eq!(atomic.atomic_maximize(5, Ordering::Relaxed), 10);
        assert_eq!(atomic.atomic_maximize(15, Ordering::Relaxed), 15);
        assert_eq!(atomic.atomic_minimize(20, Ordering::Relaxed), 15);
        assert_eq!(atomic.atomic_minimize(3, Ordering::Relaxed), 3);
        assert_eq!(atomic.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn test_concurrent_maximize() {
        let atomic = Arc::new(AtomicU32::new(0));
        let handles: Vec<_> = (0..8u32)
            .map(|i| {
                let atomic = Arc::clone(&atomic);
                thread::spawn(move || {
                    for j in 0..1000 {
                        atomic.atomic_maximize(i * 1000 + j, Ordering::Relaxed);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(atomic.load(Ordering::Relaxed), 7999);
    }

    #[test]
    fn test_atomic_add_f64() {
        let cell = AtomicU64::new(0f64.to_bits());
        atomic_add_f64(&cell, 1.5, Ordering::Relaxed);
        let total = atomic_add_f64(&cell, 2.25, Ordering::Relaxed);
        assert_eq!(total, 3.75);
        assert_eq!(f64::from_bits(cell.load(Ordering::Relaxed)), 3.75);
    }
}
