//! Where samples files live.
//!
//! `/dev/shm/<prefix>-<process name>[-<pid>][-<tid>].data`

use std::ffi::CStr;
use std::path::PathBuf;

pub const SAMPLES_DIR: &str = "/dev/shm";

/// Process name as the kernel reports it for the calling thread (at most 15 bytes).
pub fn process_name() -> String {
    let mut name = [0u8; 32];
    // SAFETY: PR_GET_NAME writes at most 16 bytes, nul terminated.
    let rc = unsafe { libc::prctl(libc::PR_GET_NAME, name.as_mut_ptr() as libc::c_ulong, 0, 0, 0) };
    if rc != 0 {
        return "unknown".to_string();
    }
    CStr::from_bytes_until_nul(&name)
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "unknown".to_string())
}

/// Samples file path for the calling process and thread.
pub fn samples_file_path(prefix: &str, suffix_pid: bool, suffix_tid: bool) -> PathBuf {
    let pid = suffix_pid.then(|| nix::unistd::getpid().as_raw());
    let tid = suffix_tid.then(|| nix::unistd::gettid().as_raw());
    build_samples_path(prefix, &process_name(), pid, tid)
}

pub fn build_samples_path(
    prefix: &str,
    process: &str,
    pid: Option<i32>,
    tid: Option<i32>,
) -> PathBuf {
    let mut file = format!("{prefix}-{process}");
    if let Some(pid) = pid {
        file.push_str(&format!("-{pid}"));
    }
    if let Some(tid) = tid {
        file.push_str(&format!("-{tid}"));
    }
    file.push_str(".data");
    PathBuf::from(SAMPLES_DIR).join(file)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_suffixes_are_optional() {
        assert_eq!(
            build_samples_path("xprobe", "app", None, None),
            PathBuf::from("/dev/shm/xprobe-app.data")
        );
        assert_eq!(
            build_samples_path("xprobe", "app", Some(42), Some(43)),
            PathBuf::from("/dev/shm/xprobe-app-42-43.data")
        );
        assert_eq!(
            build_samples_path("p", "app", None, Some(7)),
            PathBuf::from("/dev/shm/p-app-7.data")
        );
    }

    #[test]
    fn test_current_process_path() {
        let name = process_name();
        assert!(!name.is_empty());
        assert!(name.len() <= 15);

        let pid = std::process::id();
        let path = samples_file_path("xprobe", true, false);
        assert_eq!(path, build_samples_path("xprobe", &name, Some(pid as i32), None));
    }
}
