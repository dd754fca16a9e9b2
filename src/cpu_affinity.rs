// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// CPU affinity shim for the TX worker thread's `start_tx_thread(node)`
// (§4.5). Grounded on proto::rt_prio's per-platform FFI dispatch idiom
// (`#[cfg(target_os = "...")]` blocks calling into libc/windows-sys
// directly), generalized from real-time *priority* to CPU *affinity*
// binding, since the spec asks to bind a worker to a CPU node rather
// than to request real-time scheduling.

/// Bind the calling thread to a single CPU node. Returns `true` on
/// success; unsupported platforms always return `false`.
pub fn bind_current_thread(node: usize) -> bool {
    #[cfg(target_os = "linux")]
    {
        bind_linux(node)
    }
    #[cfg(target_os = "macos")]
    {
        bind_macos(node)
    }
    #[cfg(windows)]
    {
        bind_windows(node)
    }
    #[cfg(not(any(target_os = "linux", target_os = "macos", windows)))]
    {
        let _ = node;
        false
    }
}

#[cfg(target_os = "linux")]
fn bind_linux(node: usize) -> bool {
    unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_ZERO(&mut set);
        libc::CPU_SET(node, &mut set);
        libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set) == 0
    }
}

// macOS has no hard CPU-pinning API; `THREAD_AFFINITY_POLICY` is only a
// scheduling hint that groups threads sharing the same tag, so `node` is
// used as that tag rather than a literal CPU index.
#[cfg(target_os = "macos")]
fn bind_macos(node: usize) -> bool {
    #[repr(C)]
    struct ThreadAffinityPolicy {
        affinity_tag: i32,
    }

    extern "C" {
        fn pthread_mach_thread_np(thread: libc::pthread_t) -> u32;
        fn thread_policy_set(thread: u32, flavor: u32, policy_info: *const i32, count: u32) -> i32;
    }

    const THREAD_AFFINITY_POLICY: u32 = 4;
    const THREAD_AFFINITY_POLICY_COUNT: u32 = 1;

    let policy = ThreadAffinityPolicy { affinity_tag: node as i32 };
    let kr = unsafe {
        let mach_thread = pthread_mach_thread_np(libc::pthread_self());
        thread_policy_set(
            mach_thread,
            THREAD_AFFINITY_POLICY,
            &policy.affinity_tag,
            THREAD_AFFINITY_POLICY_COUNT,
        )
    };
    kr == 0
}

#[cfg(windows)]
fn bind_windows(node: usize) -> bool {
    use windows_sys::Win32::System::Threading::{GetCurrentThread, SetThreadAffinityMask};
    unsafe { SetThreadAffinityMask(GetCurrentThread(), 1usize << node) != 0 }
}
