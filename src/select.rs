//! Backend identity and the selection policy.

use std::fmt;
use std::str::FromStr;

use crate::caps::Caps;

/// One transmit/receive path. The derived ordering is the selection
/// priority: `Dpdk` ranks highest, `RawSocket` is the universal floor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BackendKind {
    None,
    RawSocket,
    Sendmmsg,
    IoUring,
    AfXdp,
    Dpdk,
}

pub(crate) const PRIORITY: [BackendKind; 5] = [
    BackendKind::Dpdk,
    BackendKind::AfXdp,
    BackendKind::IoUring,
    BackendKind::Sendmmsg,
    BackendKind::RawSocket,
];

impl BackendKind {
    pub fn name(self) -> &'static str {
        match self {
            BackendKind::Dpdk => "dpdk",
            BackendKind::AfXdp => "af_xdp",
            BackendKind::IoUring => "io_uring",
            BackendKind::Sendmmsg => "sendmmsg",
            BackendKind::RawSocket => "raw_socket",
            BackendKind::None => "none",
        }
    }

    pub fn is_available(self, caps: &Caps) -> bool {
        match self {
            BackendKind::None => false,
            BackendKind::RawSocket => caps.has_raw_socket,
            BackendKind::Sendmmsg => caps.has_sendmmsg,
            BackendKind::IoUring => caps.has_io_uring,
            BackendKind::AfXdp => caps.has_af_xdp,
            BackendKind::Dpdk => caps.has_dpdk,
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for BackendKind {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dpdk" => Ok(BackendKind::Dpdk),
            "af_xdp" => Ok(BackendKind::AfXdp),
            "io_uring" => Ok(BackendKind::IoUring),
            "sendmmsg" => Ok(BackendKind::Sendmmsg),
            "raw_socket" => Ok(BackendKind::RawSocket),
            _ => Err("expected one of: dpdk, af_xdp, io_uring, sendmmsg, raw_socket"),
        }
    }
}

/// Highest-priority backend the probed capabilities allow. Pure and
/// deterministic; callers that want something else consult `caps` directly.
pub fn select_backend(caps: &Caps) -> BackendKind {
    PRIORITY
        .into_iter()
        .find(|kind| kind.is_available(caps))
        .unwrap_or(BackendKind::None)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps_with(flags: [bool; 4]) -> Caps {
        let [sendmmsg, io_uring, af_xdp, dpdk] = flags;
        Caps {
            has_raw_socket: true,
            has_sendmmsg: sendmmsg,
            has_io_uring: io_uring,
            has_af_xdp: af_xdp,
            has_dpdk: dpdk,
            ..Caps::default()
        }
    }

    #[test]
    fn sendmmsg_only_host() {
        let caps = Caps {
            has_raw_socket: true,
            has_sendmmsg: true,
            kernel_major: 3,
            kernel_minor: 10,
            ..Caps::default()
        };
        assert_eq!(select_backend(&caps), BackendKind::Sendmmsg);
    }

    #[test]
    fn af_xdp_beats_io_uring_and_sendmmsg() {
        let caps = caps_with([true, true, true, false]);
        assert_eq!(select_backend(&caps), BackendKind::AfXdp);
    }

    #[test]
    fn nothing_available() {
        assert_eq!(select_backend(&Caps::default()), BackendKind::None);
    }

    #[test]
    fn selection_is_monotone_in_capabilities() {
        // enumerate every combination of the four optional flags
        let combos: Vec<Caps> = (0u8..16)
            .map(|bits| caps_with([bits & 1 != 0, bits & 2 != 0, bits & 4 != 0, bits & 8 != 0]))
            .collect();
        for a in &combos {
            for b in &combos {
                let pointwise_le = (!a.has_sendmmsg || b.has_sendmmsg)
                    && (!a.has_io_uring || b.has_io_uring)
                    && (!a.has_af_xdp || b.has_af_xdp)
                    && (!a.has_dpdk || b.has_dpdk);
                if pointwise_le {
                    assert!(select_backend(a) <= select_backend(b), "{a:?} vs {b:?}");
                }
            }
        }
    }
}
