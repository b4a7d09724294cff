//! Host capability probe: what the kernel and the compiled-in features
//! allow this process to drive.

use crate::platform;

/// Immutable snapshot of what the current host and build support.
///
/// Filled once by [`probe`]; missing information is recorded as zero or
/// `false`, never as an error.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Caps {
    pub has_raw_socket: bool,
    pub has_sendmmsg: bool,
    pub has_io_uring: bool,
    pub has_af_xdp: bool,
    pub has_dpdk: bool,
    pub kernel_major: u32,
    pub kernel_minor: u32,
    pub cpu_count: u32,
    /// 0 means unknown; callers treat that as a single node.
    pub numa_nodes: u32,
}

pub fn probe() -> Caps {
    let mut caps = Caps {
        has_raw_socket: true,
        ..Caps::default()
    };
    caps.cpu_count = platform::cpu_count() as u32;

    #[cfg(target_os = "linux")]
    {
        if let Ok(release) = std::fs::read_to_string("/proc/sys/kernel/osrelease") {
            let (major, minor) = parse_release(&release);
            caps.kernel_major = major;
            caps.kernel_minor = minor;
        }

        // sendmmsg: 3.0+; io_uring: 5.1+; AF_XDP: 4.18+. A feature that was
        // not compiled in looks exactly like a kernel that is too old.
        caps.has_sendmmsg = caps.kernel_major >= 3;
        caps.has_io_uring = cfg!(feature = "io_uring")
            && (caps.kernel_major > 5 || (caps.kernel_major == 5 && caps.kernel_minor >= 1));
        caps.has_af_xdp = cfg!(feature = "af_xdp")
            && (caps.kernel_major > 4 || (caps.kernel_major == 4 && caps.kernel_minor >= 18));

        caps.numa_nodes = match std::fs::read_to_string("/sys/devices/system/node/online") {
            Ok(online) => parse_node_range(&online),
            Err(_) => 0,
        };
    }

    caps.has_dpdk = cfg!(feature = "dpdk");
    caps
}

/// Leading `major.minor` of a kernel release string; anything unparsable
/// stays zero.
fn parse_release(release: &str) -> (u32, u32) {
    let mut parts = release.trim().split('.');
    let major = parts.next().and_then(leading_int).unwrap_or(0);
    let minor = parts.next().and_then(leading_int).unwrap_or(0);
    (major, minor)
}

fn leading_int(s: &str) -> Option<u32> {
    let end = s
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(s.len());
    s[..end].parse().ok()
}

/// Node count from the `/sys/devices/system/node/online` format: `A-B`
/// spans B−A+1 nodes, anything else is a single node.
fn parse_node_range(online: &str) -> u32 {
    let online = online.trim();
    if let Some((start, end)) = online.split_once('-') {
        if let (Ok(start), Ok(end)) = (start.parse::<u32>(), end.parse::<u32>()) {
            if end >= start {
                return end - start + 1;
            }
        }
    }
    1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn release_parsing() {
        assert_eq!(parse_release("6.8.0-41-generic\n"), (6, 8));
        assert_eq!(parse_release("3.10"), (3, 10));
        assert_eq!(parse_release("5.15-rc3"), (5, 15));
        assert_eq!(parse_release("6"), (6, 0));
        assert_eq!(parse_release("garbage"), (0, 0));
    }

    #[test]
    fn node_range_parsing() {
        assert_eq!(parse_node_range("0-3\n"), 4);
        assert_eq!(parse_node_range("0\n"), 1);
        assert_eq!(parse_node_range("junk"), 1);
    }

    #[test]
    fn probe_never_fails() {
        let caps = probe();
        assert!(caps.has_raw_socket);
        assert!(caps.cpu_count >= 1);
        #[cfg(target_os = "linux")]
        {
            // any kernel this runs on supports batched sends
            assert!(caps.has_sendmmsg);
            assert!(caps.kernel_major >= 3);
        }
        #[cfg(not(target_os = "linux"))]
        {
            assert!(!caps.has_sendmmsg && !caps.has_io_uring && !caps.has_af_xdp);
        }
    }
}
