use std::cell::Cell;
use std::collections::HashSet;
use std::thread;
use xprobe_trace::{
    ProbeData, ProbeDescriptor, ProbeRegistry, Stitcher, TxnId, TxnState, sample,
    static_call_sites,
};

fn registry_of_static_sites() -> ProbeRegistry {
    let mut registry = ProbeRegistry::new();
    for &site in static_call_sites() {
        registry.register(ProbeDescriptor::from_site(site));
    }
    registry
}

#[test]
fn test_scope_fires_begin_and_end() {
    let _ = sample::drain();
    {
        xprobe_trace::probe_scope!(Outer);
        xprobe_trace::probe!(Inside);
    }
    let samples = sample::drain();
    assert_eq!(samples.len(), 3);
    assert!(samples.windows(2).all(|w| w[0].tsc <= w[1].tsc));
    assert_ne!(samples[0].call_site, samples[2].call_site);
}

#[test]
fn test_borrowed_payload_is_reread_at_scope_exit() {
    let _ = sample::drain();
    let payload = Cell::new(ProbeData::new(1));
    {
        xprobe_trace::data_probe_scope!(Frame, &payload);
        payload.set(ProbeData::from_u64s(2, 3));
    }
    let samples = sample::drain();
    assert_eq!(samples.len(), 2);
    assert_eq!(samples[0].data, Some(ProbeData::new(1)));
    assert_eq!(samples[1].data, Some(ProbeData::from_u64s(2, 3)));
}

#[test]
fn test_owned_payload_is_stored_twice() {
    let _ = sample::drain();
    {
        xprobe_trace::data_probe_scope!(Owned, ProbeData::new(42));
    }
    let samples = sample::drain();
    assert_eq!(samples.len(), 2);
    assert!(samples.iter().all(|s| s.data == Some(ProbeData::new(42))));
}

#[test]
fn test_data_probe_carries_payload() {
    let _ = sample::drain();
    xprobe_trace::data_probe!(Length, [1u32, 2, 3, 4]);
    let samples = sample::drain();
    assert_eq!(samples.len(), 1);
    assert_eq!(samples[0].data.map(|d| d.as_u32s()), Some([1, 2, 3, 4]));
}

#[test]
fn test_suspend_ids_unique_across_threads() {
    let ids: Vec<TxnId> = thread::scope(|s| {
        let workers: Vec<_> = (0..4)
            .map(|_| {
                s.spawn(|| {
                    let ids: Vec<TxnId> = (0..500)
                        .map(|_| xprobe_trace::txn_suspend!(Yield))
                        .collect();
                    let _ = sample::drain();
                    ids
                })
            })
            .collect();
        workers
            .into_iter()
            .flat_map(|w| w.join().unwrap())
            .collect()
    });

    let unique: HashSet<TxnId> = ids.iter().copied().collect();
    assert_eq!(unique.len(), ids.len());
}

#[test]
fn test_transaction_stitched_across_threads() {
    let _ = sample::drain();
    let id = {
        xprobe_trace::txn_begin!(Accept);
        xprobe_trace::probe!(Parse);
        xprobe_trace::txn_suspend!(Park)
    };
    let first = sample::drain();

    let second = thread::spawn(move || {
        sample::attach_thread();
        xprobe_trace::txn_resume!(Unpark, id);
        xprobe_trace::probe!(Execute);
        xprobe_trace::txn_end!(Finish);
        sample::drain()
    })
    .join()
    .unwrap();

    let registry = registry_of_static_sites();
    let mut stitcher = Stitcher::new(|call_site| {
        let handle = registry.lookup(call_site)?;
        registry.get(handle).map(|probe| probe.attrs())
    });
    stitcher.feed(1, &first);
    stitcher.feed(2, &second);
    let stitched = stitcher.finish();

    assert_eq!(stitched.transactions.len(), 1);
    assert!(stitched.orphan_resumes.is_empty());
    assert!(stitched.violations.is_empty());

    let txn = &stitched.transactions[0];
    assert_eq!(txn.state, TxnState::Ended);
    assert_eq!(txn.threads(), vec![1, 2]);
    assert_eq!(txn.samples().count(), 6);

    let suspend = first.last().and_then(|s| s.data);
    let resume = second.first().and_then(|s| s.data);
    assert_eq!(suspend, Some(ProbeData::from(id)));
    assert_eq!(resume, suspend);
}

#[test]
fn test_resume_with_unknown_id_is_orphaned() {
    let _ = sample::drain();
    xprobe_trace::txn_resume!(Stray, TxnId::from_raw(0xdead));
    xprobe_trace::txn_end!(StrayEnd);
    let samples = sample::drain();

    let registry = registry_of_static_sites();
    let mut stitcher = Stitcher::new(|call_site| {
        let handle = registry.lookup(call_site)?;
        registry.get(handle).map(|probe| probe.attrs())
    });
    stitcher.feed(1, &samples);
    let stitched = stitcher.finish();

    assert!(stitched.transactions.is_empty());
    assert_eq!(stitched.orphan_resumes.len(), 1);
    assert_eq!(stitched.orphan_resumes[0].samples.len(), 2);
}

#[test]
fn test_disabled_probe_records_nothing() {
    fn muted() {
        xprobe_trace::probe!(Muted);
    }

    // known to the registry before it ever fires
    let mut registry = registry_of_static_sites();
    let handle = registry.find_by_name("Muted").expect("Muted collected at link time");
    registry.disable(handle).unwrap();

    let _ = sample::drain();
    muted();
    assert_eq!(sample::pending(), 0);

    registry.enable(handle).unwrap();
    assert!(registry.get(handle).unwrap().is_enabled());
    muted();
    assert_eq!(sample::pending(), 1);
}
