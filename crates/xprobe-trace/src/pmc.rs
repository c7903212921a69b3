//! Timestamp and performance counter reads used by the recorders.

/// Maximum number of programmable (generic) counters a recorder will read.
pub const MAX_GENERIC_PMC: u8 = 8;

/// Maximum number of counters of any kind read by one sample.
pub const MAX_PMC: usize = MAX_GENERIC_PMC as usize + crate::FixedCounter::COUNT as usize;

/// Where recorders get counter values from.
///
/// `selector` is the value `rdpmc` expects in ECX: generic counters use
/// their index, fixed counters set bit 30.
pub trait CounterSource: 'static {
    fn read(selector: u32) -> u64;
}

/// Reads counters straight from the PMU with `rdpmc`.
///
/// The counters must already be programmed and user-space `rdpmc` allowed
/// (CR4.PCE) by whoever configured them; a recorder reading counters is only
/// ever activated after that setup.
pub struct Rdpmc;

impl CounterSource for Rdpmc {
    #[inline(always)]
    fn read(selector: u32) -> u64 {
        #[cfg(target_arch = "x86_64")]
        {
            let lo: u32;
            let hi: u32;
            // SAFETY: rdpmc only reads the counter named by ECX into EDX:EAX.
            unsafe {
                core::arch::asm!(
                    "rdpmc",
                    in("ecx") selector,
                    out("eax") lo,
                    out("edx") hi,
                    options(nomem, nostack, preserves_flags)
                );
            }
            (hi as u64) << 32 | lo as u64
        }
        #[cfg(not(target_arch = "x86_64"))]
        {
            let _ = selector;
            0
        }
    }
}

/// Timestamp taken at the probe site.
///
/// The time stamp counter on x86_64, monotonic nanoseconds elsewhere.
#[inline(always)]
pub fn timestamp() -> u64 {
    #[cfg(target_arch = "x86_64")]
    {
        // SAFETY: rdtsc has no memory effects and is available on every x86_64 cpu.
        unsafe { core::arch::x86_64::_rdtsc() }
    }
    #[cfg(not(target_arch = "x86_64"))]
    {
        use std::sync::OnceLock;
        use std::time::Instant;

        static EPOCH: OnceLock<Instant> = OnceLock::new();
        EPOCH.get_or_init(Instant::now).elapsed().as_nanos() as u64
    }
}
