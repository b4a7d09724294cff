//! Facade that owns the probe, the selection and the active backend.
//!
//! Backend fallback happens exactly once, at open time: an initializer
//! failure moves selection to the next lower-priority available backend.
//! Steady-state operations never switch backends.

use tracing::{info, warn};

use crate::api::{Backend, Dest, RxFrame, Stats};
use crate::caps::{self, Caps};
use crate::errors::{Error, Result};
use crate::select::{select_backend, BackendKind, PRIORITY};

#[derive(Clone, Debug)]
pub struct Config {
    /// L4 protocol number stamped on the raw L3 path.
    pub protocol: u8,
    /// Interface to bind for the XDP path.
    pub interface: Option<String>,
    /// Submission ring depth for the async path.
    pub queue_depth: u32,
    /// Port selection for the poll-mode path.
    pub port_id: u16,
    /// Skip selection and insist on one backend. An unavailable forced
    /// backend fails with `Unsupported`, and a forced backend never falls
    /// back.
    pub force_backend: Option<BackendKind>,
    /// Poll-mode promiscuous enable.
    pub promiscuous: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            protocol: libc::IPPROTO_RAW as u8,
            interface: None,
            queue_depth: 256,
            port_id: 0,
            force_backend: None,
            promiscuous: true,
        }
    }
}

pub struct Driver {
    caps: Caps,
    kind: BackendKind,
    backend: Option<Box<dyn Backend>>,
}

impl Driver {
    pub fn open(cfg: Config) -> Result<Self> {
        let caps = caps::probe();
        info!(?caps, "probed host capabilities");

        if let Some(kind) = cfg.force_backend {
            if !kind.is_available(&caps) {
                return Err(Error::Unsupported("forced backend is not available"));
            }
            let backend = init_backend(kind, &cfg)?;
            info!(%kind, "backend forced");
            return Ok(Driver {
                caps,
                kind,
                backend: Some(backend),
            });
        }

        let mut kind = select_backend(&caps);
        let mut last_err = None;
        while kind != BackendKind::None {
            match init_backend(kind, &cfg) {
                Ok(backend) => {
                    info!(%kind, "backend selected");
                    return Ok(Driver {
                        caps,
                        kind,
                        backend: Some(backend),
                    });
                }
                Err(source) => {
                    warn!(%kind, %source, "backend failed to initialize, falling back");
                    last_err = Some(Error::BackendInit {
                        backend: kind,
                        source: Box::new(source),
                    });
                    kind = next_lower(kind, &caps);
                }
            }
        }
        Err(last_err.unwrap_or(Error::Unsupported("no backend available")))
    }

    pub fn kind(&self) -> BackendKind {
        self.kind
    }

    pub fn caps(&self) -> &Caps {
        &self.caps
    }

    pub fn send_batch(&mut self, packets: &[&[u8]], dest: Dest<'_>) -> Result<usize> {
        match self.backend.as_mut() {
            Some(backend) => backend.send_batch(packets, dest),
            None => Err(Error::Unsupported("driver is closed")),
        }
    }

    pub fn recv_batch(&mut self, frames: &mut [RxFrame<'_>]) -> Result<usize> {
        match self.backend.as_mut() {
            Some(backend) => backend.recv_batch(frames),
            None => Err(Error::Unsupported("driver is closed")),
        }
    }

    pub fn stats(&self) -> Stats {
        self.backend
            .as_ref()
            .map(|backend| backend.stats())
            .unwrap_or_default()
    }

    /// Releases the active backend. Idempotent.
    pub fn close(&mut self) {
        if let Some(mut backend) = self.backend.take() {
            info!(kind = %self.kind, "driver closed");
            backend.close();
            self.kind = BackendKind::None;
        }
    }
}

impl Drop for Driver {
    fn drop(&mut self) {
        self.close();
    }
}

/// Next lower-priority backend that remains available.
fn next_lower(kind: BackendKind, caps: &Caps) -> BackendKind {
    PRIORITY
        .into_iter()
        .find(|candidate| *candidate < kind && candidate.is_available(caps))
        .unwrap_or(BackendKind::None)
}

fn init_backend(kind: BackendKind, cfg: &Config) -> Result<Box<dyn Backend>> {
    match kind {
        BackendKind::RawSocket => Ok(Box::new(crate::raw::Sock::open(cfg.protocol)?)),
        #[cfg(target_os = "linux")]
        BackendKind::Sendmmsg => Ok(Box::new(crate::mmsg::Sock::open()?)),
        #[cfg(all(target_os = "linux", feature = "io_uring"))]
        BackendKind::IoUring => Ok(Box::new(crate::uring::Sock::open(cfg.queue_depth)?)),
        #[cfg(all(target_os = "linux", feature = "af_xdp"))]
        BackendKind::AfXdp => {
            let ifname = cfg
                .interface
                .as_deref()
                .ok_or(Error::InvalidArgument("af_xdp requires an interface name"))?;
            Ok(Box::new(crate::af_xdp::Sock::open(ifname)?))
        }
        #[cfg(all(target_os = "linux", feature = "dpdk"))]
        BackendKind::Dpdk => Ok(Box::new(crate::dpdk::Sock::open(
            cfg.port_id,
            cfg.promiscuous,
        )?)),
        _ => Err(Error::Unsupported("backend not compiled in")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{SocketAddrV4, UdpSocket};
    use std::time::Duration;

    #[cfg(target_os = "linux")]
    #[test]
    fn auto_selection_lands_on_a_batched_path() {
        let mut driver = Driver::open(Config::default()).unwrap();
        // any Linux this runs on has at least sendmmsg; raw is never
        // auto-picked while a batched path exists
        assert!(driver.kind() >= BackendKind::Sendmmsg, "{}", driver.kind());
        assert!(driver.caps().has_sendmmsg);
        driver.close();
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn forced_sendmmsg_delivers_and_accounts() {
        let recv = UdpSocket::bind("127.0.0.1:0").unwrap();
        recv.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        let dest = SocketAddrV4::new([127, 0, 0, 1].into(), recv.local_addr().unwrap().port());

        let mut driver = Driver::open(Config {
            force_backend: Some(BackendKind::Sendmmsg),
            ..Config::default()
        })
        .unwrap();
        assert_eq!(driver.kind(), BackendKind::Sendmmsg);

        let payloads: Vec<Vec<u8>> = (0..8).map(|i| vec![i as u8; 32]).collect();
        let packets: Vec<&[u8]> = payloads.iter().map(|p| p.as_slice()).collect();
        let before = driver.stats();
        let sent = driver.send_batch(&packets, Dest::Single(dest)).unwrap();
        assert!(sent > 0);

        let after = driver.stats();
        assert_eq!(after.packets_sent, before.packets_sent + sent as u64);
        let bytes: u64 = payloads[..sent].iter().map(|p| p.len() as u64).sum();
        assert_eq!(after.bytes_sent, before.bytes_sent + bytes);

        let mut buf = [0u8; 64];
        for i in 0..sent {
            let n = recv.recv(&mut buf).unwrap();
            assert_eq!(&buf[..n], payloads[i].as_slice());
        }
    }

    #[test]
    fn forcing_an_unavailable_backend_is_unsupported() {
        // dpdk is only available when compiled in; without the feature the
        // probe reports it missing
        #[cfg(not(feature = "dpdk"))]
        {
            let res = Driver::open(Config {
                force_backend: Some(BackendKind::Dpdk),
                ..Config::default()
            });
            assert!(matches!(res, Err(Error::Unsupported(_))));
        }
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn close_is_idempotent_and_resets() {
        let mut driver = Driver::open(Config {
            force_backend: Some(BackendKind::Sendmmsg),
            ..Config::default()
        })
        .unwrap();
        driver.close();
        driver.close();
        assert_eq!(driver.stats(), Stats::default());
        assert_eq!(driver.kind(), BackendKind::None);
        assert!(matches!(
            driver.send_batch(&[], Dest::InPacket),
            Err(Error::Unsupported(_))
        ));
    }
}
