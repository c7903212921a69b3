//! Recording must not allocate. Kept in its own test binary so the counting
//! allocator sees nothing but these tests.

use std::alloc::{GlobalAlloc, Layout, System};
use std::cell::Cell;
use std::thread;
use xprobe_trace::{CallSite, CallSiteAttrs, CounterSource, Dispatch, ProbeData, RecorderCtl, sample};

struct CountingAllocator;

thread_local! {
    static ALLOCATIONS: Cell<usize> = const { Cell::new(0) };
}

unsafe impl GlobalAlloc for CountingAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let _ = ALLOCATIONS.try_with(|n| n.set(n.get() + 1));
        // SAFETY: forwarded unchanged to the system allocator.
        unsafe { System.alloc(layout) }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        // SAFETY: `ptr` came from `System.alloc` with this layout.
        unsafe { System.dealloc(ptr, layout) }
    }
}

#[global_allocator]
static GLOBAL: CountingAllocator = CountingAllocator;

fn allocations() -> usize {
    ALLOCATIONS.with(Cell::get)
}

struct Stamp;

impl CounterSource for Stamp {
    fn read(selector: u32) -> u64 {
        selector as u64 + 1
    }
}

static DISPATCH: Dispatch = Dispatch::new::<Stamp>();
static PLAIN: CallSite = CallSite::new("Plain", file!(), line!(), CallSiteAttrs::NONE);
static DATA: CallSite = CallSite::new("Data", file!(), line!(), CallSiteAttrs::CAN_STORE_DATA);
static SUSPEND: CallSite = CallSite::new("Suspend", file!(), line!(), CallSiteAttrs::CAN_SUSPEND_TXN);

#[test]
fn test_first_fire_on_fresh_thread_does_not_allocate() {
    let mut ctl = RecorderCtl::new(&DISPATCH);
    ctl.reconfigure(2, &[0]).unwrap();

    let (allocated, recorded) = thread::spawn(|| {
        sample::attach_thread();
        let before = allocations();
        PLAIN.fire_in(&DISPATCH);
        DATA.fire_data_in(&DISPATCH, ProbeData::new(5));
        SUSPEND.fire_identity_in(&DISPATCH);
        xprobe_trace::probe!(FreshThread);
        let allocated = allocations() - before;
        (allocated, sample::drain())
    })
    .join()
    .unwrap();

    assert_eq!(allocated, 0, "recording allocated {allocated} times");
    assert_eq!(recorded.len(), 4);
    assert_eq!(recorded[0].pmc(), &[1, 2, 0x4000_0001]);
}

#[test]
fn test_detached_thread_drops_without_allocating() {
    let (allocated, overflow) = thread::spawn(|| {
        let before = allocations();
        PLAIN.fire_in(&DISPATCH);
        let allocated = allocations() - before;
        (allocated, sample::overflow())
    })
    .join()
    .unwrap();

    assert_eq!(allocated, 0);
    assert_eq!(overflow, 1);
}
