use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use xprobe_trace::{CallSite, CallSiteAttrs, CounterSource, Dispatch, RecorderCtl, sample};

/// Reads back the selector plus one.
struct Stamp;

impl CounterSource for Stamp {
    fn read(selector: u32) -> u64 {
        selector as u64 + 1
    }
}

static DISPATCH: Dispatch = Dispatch::new::<Stamp>();
static HOT: CallSite = CallSite::new("Hot", file!(), line!(), CallSiteAttrs::NONE);
static HOT_DATA: CallSite = CallSite::new("HotData", file!(), line!(), CallSiteAttrs::CAN_STORE_DATA);

const FIXED_ONLY: [u64; 3] = [0x4000_0001, 0x4000_0002, 0x4000_0003];
const GENERIC_ONLY: [u64; 2] = [1, 2];

#[test]
fn test_samples_stay_consistent_while_switching() {
    let stop = AtomicBool::new(false);
    let mut ctl = RecorderCtl::new(&DISPATCH);

    let samples = thread::scope(|s| {
        let workers: Vec<_> = (0..4)
            .map(|_| {
                s.spawn(|| {
                    sample::attach_thread();
                    let mut seen = Vec::new();
                    loop {
                        for _ in 0..256 {
                            HOT.fire_in(&DISPATCH);
                            HOT_DATA.fire_data_in(&DISPATCH, 7u64.into());
                        }
                        seen.extend(sample::drain());
                        if stop.load(Ordering::Relaxed) {
                            return seen;
                        }
                    }
                })
            })
            .collect();

        for round in 0..400 {
            if round % 2 == 0 {
                ctl.reconfigure(0, &[0, 1, 2]).unwrap();
            } else {
                ctl.reconfigure(2, &[]).unwrap();
            }
        }
        stop.store(true, Ordering::Relaxed);

        workers
            .into_iter()
            .flat_map(|w| w.join().unwrap())
            .collect::<Vec<_>>()
    });

    assert!(!samples.is_empty());
    for sample in &samples {
        let pmc = sample.pmc();
        assert!(
            pmc.is_empty() || pmc == FIXED_ONLY || pmc == GENERIC_ONLY,
            "reading matches no configuration: {pmc:x?}"
        );
    }
}

static PARK_NEXT_READ: AtomicBool = AtomicBool::new(false);
static PARKED: AtomicBool = AtomicBool::new(false);
static RELEASE: AtomicBool = AtomicBool::new(false);

/// Like `Stamp`, but the first read after arming waits until released.
struct Gate;

impl CounterSource for Gate {
    fn read(selector: u32) -> u64 {
        if PARK_NEXT_READ.swap(false, Ordering::AcqRel) {
            PARKED.store(true, Ordering::Release);
            while !RELEASE.load(Ordering::Acquire) {
                std::hint::spin_loop();
            }
        }
        selector as u64 + 1
    }
}

static GATED: Dispatch = Dispatch::new::<Gate>();
static GATED_SITE: CallSite = CallSite::new("Gated", file!(), line!(), CallSiteAttrs::NONE);

#[test]
fn test_reconfigure_mid_reading_keeps_loaded_configuration() {
    let mut ctl = RecorderCtl::new(&GATED);
    ctl.reconfigure(0, &[0, 1, 2]).unwrap();
    PARK_NEXT_READ.store(true, Ordering::Release);

    let samples = thread::scope(|s| {
        let firing = s.spawn(|| {
            sample::attach_thread();
            GATED_SITE.fire_in(&GATED);
            sample::drain()
        });

        while !PARKED.load(Ordering::Acquire) {
            std::hint::spin_loop();
        }
        ctl.reconfigure(2, &[]).unwrap();
        RELEASE.store(true, Ordering::Release);

        firing.join().unwrap()
    });

    assert_eq!(samples.len(), 1);
    assert_eq!(samples[0].pmc_count(), 3);
    assert_eq!(samples[0].pmc(), FIXED_ONLY);
    assert_eq!(GATED.active_slot(), 2);
}
