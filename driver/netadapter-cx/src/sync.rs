//! Spin-lock based synchronization primitives

/// A spin-lock based mutex protecting some data.
///
/// Not reentrant, and must never be held while calling into client code.
pub type SpinMutex<T> = spin::mutex::SpinMutex<T, spin::relax::Spin>;

pub type SpinMutexGuard<'a, T> = spin::mutex::SpinMutexGuard<'a, T>;

#[cfg(test)]
mod test {
    use std::{sync::Arc, thread, vec::Vec};

    use super::SpinMutex;

    #[test]
    fn try_lock_fails_while_held() {
        let mutex = SpinMutex::new(0u32);

        let guard = mutex.lock();
        assert!(mutex.try_lock().is_none());
        drop(guard);

        assert!(mutex.try_lock().is_some());
    }

    #[test]
    fn contended_increments() {
        const THREADS: usize = 4;
        const ITERS: usize = 1000;

        let counter = Arc::new(SpinMutex::new(0usize));

        let workers = (0..THREADS)
            .map(|_| {
                let counter = counter.clone();
                thread::spawn(move || {
                    for _ in 0..ITERS {
                        *counter.lock() += 1;
                    }
                })
            })
            .collect::<Vec<_>>();

        for worker in workers {
            worker.join().unwrap();
        }

        assert_eq!(*counter.lock(), THREADS * ITERS);
    }

    #[test]
    fn usable_in_statics() {
        static COUNT: SpinMutex<u32> = SpinMutex::new(5);

        *COUNT.lock() += 1;
        assert_eq!(*COUNT.lock(), 6);
    }
}
