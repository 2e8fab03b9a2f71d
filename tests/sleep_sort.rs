//! §8(a): "sleep sort" - fork one minithread per value, each sleeping proportionally to its
//! value before recording it, and check that the values come back out in sorted order
//! regardless of fork order.
//!
//! The real demo sleeps `1000 * value` ms per §8(a), which would make this test take ~9s. A
//! 20ms-per-tick config with `sleep_with_timeout(20 * value)` preserves the same relative
//! ordering guarantee in a fraction of the time.

use std::sync::{Arc, Mutex};

use minithread::{sleep_with_timeout, thread, KernelConfig, System};

#[test]
fn sleeps_wake_up_in_ascending_order() {
    let _ = env_logger::try_init();

    let values = [7, 4, 9, 0, 1, 3, 2, 5, 6, 8];
    let order: Arc<Mutex<Vec<u64>>> = Arc::new(Mutex::new(Vec::new()));

    let config = KernelConfig { period_ms: 5, ..Default::default() };
    let started = std::time::Instant::now();
    System::run_to_completion(config, {
        let order = order.clone();
        move || {
            for &v in &values {
                let order = order.clone();
                thread::fork(move || {
                    sleep_with_timeout(20 * v);
                    order.lock().unwrap().push(v);
                });
            }
        }
    });
    let elapsed = started.elapsed();

    let observed = order.lock().unwrap().clone();
    assert_eq!(observed, vec![0, 1, 2, 3, 4, 5, 6, 7, 8, 9]);
    // The longest sleep is 20*9=180ms; leave generous headroom either side of that.
    assert!(elapsed.as_millis() >= 150, "finished suspiciously early: {elapsed:?}");
    assert!(elapsed.as_millis() < 2000, "took far longer than the longest sleep: {elapsed:?}");
}
