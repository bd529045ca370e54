//! Statistics epochs written to a registered sink
//!
//! The sink and the contention floors are process-wide, so the epoch flow runs
//! as one sequential test in its own test binary.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use mxuser::statistics::stats_sink_registered;
use mxuser::{
    register_stats_sink, run_stats_epoch, set_contention_count_floor, set_contention_duration_floor,
    set_contention_ratio_floor, ExclusiveLock, MxUserError,
};

const LINE_LENGTH: usize = 96;

static CAPTURED: Mutex<Vec<String>> = parking_lot::const_mutex(Vec::new());

fn install_capture_sink() {
    if stats_sink_registered() {
        return;
    }
    let sink = Arc::new(|line: &str| CAPTURED.lock().push(line.to_string()));
    register_stats_sink(sink, LINE_LENGTH).unwrap();
}

fn take_lines() -> Vec<String> {
    std::mem::take(&mut *CAPTURED.lock())
}

fn lines_for(lines: &[String], prefix: &str) -> Vec<String> {
    lines.iter().filter(|l| l.starts_with(prefix)).cloned().collect()
}

/// Make one contended acquisition of `lock` from a helper thread
fn contend_once(lock: &Arc<ExclusiveLock>) {
    let waiting = Arc::new(AtomicBool::new(false));
    lock.acquire();
    let helper = {
        let (lock, waiting) = (lock.clone(), waiting.clone());
        thread::spawn(move || {
            waiting.store(true, Ordering::SeqCst);
            lock.acquire();
            lock.release();
        })
    };
    while !waiting.load(Ordering::SeqCst) {
        thread::yield_now();
    }
    thread::sleep(Duration::from_millis(20));
    lock.release();
    helper.join().unwrap();
}

#[test]
fn test_epoch_announces_reports_and_flags_hot_locks() {
    install_capture_sink();

    let quiet = ExclusiveLock::create("stats.quiet", 0x10);
    let busy = ExclusiveLock::create("stats.busy", 0x20);
    busy.enable_stats(true);

    // First epoch: both locks are announced once, only the busy one reports
    for _ in 0..10 {
        busy.acquire();
        busy.release();
    }
    take_lines();
    run_stats_epoch();
    let lines = take_lines();

    let announce_quiet = format!("MXUser: n n=stats.quiet l={} r=0x10", quiet.serial());
    let announce_busy = format!("MXUser: n n=stats.busy l={} r=0x20", busy.serial());
    assert!(lines.contains(&announce_quiet), "{:?}", lines);
    assert!(lines.contains(&announce_busy), "{:?}", lines);

    let acquisition = lines_for(&lines, &format!("MXUser: e l={} t=a", busy.serial()));
    assert_eq!(acquisition.len(), 1);
    assert!(acquisition[0].contains(" c=10 "));
    let held = lines_for(&lines, &format!("MXUser: e l={} t=h", busy.serial()));
    assert_eq!(held.len(), 1);
    let contention = lines_for(&lines, &format!("MXUser: ce l={} ", busy.serial()));
    assert_eq!(contention.len(), 1);
    assert!(contention[0].contains(" a=10 s=10 c=0 "));
    assert!(lines_for(&lines, &format!("MXUser: e l={} ", quiet.serial())).is_empty());
    assert!(lines.iter().all(|l| l.len() <= LINE_LENGTH));

    // Second epoch: no re-announcement, nothing hot under default floors
    run_stats_epoch();
    let lines = take_lines();
    assert!(lines_for(&lines, "MXUser: n n=stats.").is_empty());
    assert!(!busy.stats().is_hot());

    // Lower the floors so a single contended acquisition is enough
    set_contention_ratio_floor(0.0).unwrap();
    set_contention_count_floor(1);
    set_contention_duration_floor(Duration::ZERO);
    contend_once(&busy);

    run_stats_epoch();
    let lines = take_lines();
    let hot = lines_for(&lines, &format!("MXUser: HOT l={} ", busy.serial()));
    assert_eq!(hot.len(), 1, "{:?}", lines);
    assert!(hot[0].contains("n=stats.busy"));
    assert!(busy.stats().is_hot());
    assert!(!quiet.stats().is_hot());

    // Histograms start filling once the lock is hot
    for _ in 0..5 {
        busy.acquire();
        busy.release();
    }
    run_stats_epoch();
    let lines = take_lines();
    assert!(lines_for(&lines, &format!("MXUser: HOT l={} ", busy.serial())).is_empty());
    let histo_acq = lines_for(&lines, &format!("MXUser: h l={} t=a", busy.serial()));
    assert!(!histo_acq.is_empty(), "{:?}", lines);
    assert!(histo_acq[0].contains("n=5"));
    assert!(!lines_for(&lines, &format!("MXUser: h l={} t=h", busy.serial())).is_empty());

    // A second sink is refused and the first keeps receiving lines
    let err = register_stats_sink(Arc::new(|_: &str| {}), LINE_LENGTH).unwrap_err();
    assert!(matches!(err, MxUserError::AlreadyRegistered { .. }));
    run_stats_epoch();
    assert!(!take_lines().is_empty());

    assert!(set_contention_ratio_floor(1.5).is_err());
}
