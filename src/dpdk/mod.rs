//! Userspace poll-mode backend over DPDK ports.
//!
//! The EAL and the mbuf pool are process-wide, brought up at most once and
//! guarded by one-shot flags; each handle owns one started port with a
//! single RX and a single TX queue.

mod wrapper;

use std::io;

use dpdk_sys as ffi;
use tracing::debug;

use crate::api::{Backend, Dest, RxFrame, Stats};
use crate::errors::{Error, Result};
use crate::select::BackendKind;
use wrapper::Port;

const QUEUE_DEPTH: u16 = 1024;

pub use wrapper::eal_shutdown;

pub struct Sock {
    port: Option<Port>,
    pool: *mut ffi::rte_mempool,
    burst: Vec<*mut ffi::rte_mbuf>,
}

// mbuf pointers are only staged inside a single call; the pool itself is
// thread-safe by the data plane's contract.
unsafe impl Send for Sock {}

impl Sock {
    pub fn open(port_id: u16, promiscuous: bool) -> Result<Self> {
        wrapper::eal_init(&["pktblast"])?;
        let pool = wrapper::shared_pool()?;
        let port = Port::init(port_id, pool, promiscuous, QUEUE_DEPTH)?;
        debug!(port_id, promiscuous, "dpdk port started");
        Ok(Sock {
            port: Some(port),
            pool,
            burst: Vec::new(),
        })
    }
}

impl Backend for Sock {
    fn kind(&self) -> BackendKind {
        BackendKind::Dpdk
    }

    fn send_batch(&mut self, packets: &[&[u8]], _dest: Dest<'_>) -> Result<usize> {
        let Some(port) = self.port.as_ref() else {
            return Err(io::Error::from_raw_os_error(libc::EBADF).into());
        };

        // stage as many mbufs as the pool will give us
        self.burst.clear();
        for (i, pkt) in packets.iter().enumerate() {
            let m = unsafe { ffi::rust_pktmbuf_alloc(self.pool) };
            if m.is_null() {
                if i == 0 {
                    return Err(Error::ResourceExhausted("mbuf pool"));
                }
                break;
            }
            let data = unsafe { ffi::rust_pktmbuf_append(m, pkt.len() as u16) };
            if data.is_null() {
                unsafe { ffi::rust_pktmbuf_free(m) };
                if i == 0 {
                    return Err(Error::TooBigPacket(pkt.len()));
                }
                break;
            }
            unsafe {
                std::ptr::copy_nonoverlapping(pkt.as_ptr(), data as *mut u8, pkt.len());
            }
            self.burst.push(m);
        }

        let staged = self.burst.len();
        let sent = port.tx_burst(&mut self.burst[..staged]) as usize;
        // the device keeps what it accepted; the tail goes back to the pool
        for &m in &self.burst[sent..staged] {
            unsafe { ffi::rust_pktmbuf_free(m) };
        }
        self.burst.clear();
        Ok(sent)
    }

    fn recv_batch(&mut self, frames: &mut [RxFrame<'_>]) -> Result<usize> {
        let Some(port) = self.port.as_ref() else {
            return Err(io::Error::from_raw_os_error(libc::EBADF).into());
        };

        self.burst.clear();
        self.burst.resize(frames.len(), std::ptr::null_mut());
        let got = port.rx_burst(&mut self.burst) as usize;
        for i in 0..got {
            let m = self.burst[i];
            let len = unsafe { ffi::rust_pktmbuf_data_len(m) } as usize;
            let copied = len.min(frames[i].buf.len());
            unsafe {
                std::ptr::copy_nonoverlapping(
                    ffi::rust_pktmbuf_data(m),
                    frames[i].buf.as_mut_ptr(),
                    copied,
                );
                ffi::rust_pktmbuf_free(m);
            }
            frames[i].len = copied;
        }
        self.burst.clear();
        Ok(got)
    }

    /// Counters come from the device, not from this layer.
    fn stats(&self) -> Stats {
        let Some(port) = self.port.as_ref() else {
            return Stats::default();
        };
        match port.device_stats() {
            Ok(dev) => Stats {
                packets_sent: dev.opackets,
                packets_received: dev.ipackets,
                bytes_sent: dev.obytes,
                bytes_received: dev.ibytes,
                errors: dev.oerrors + dev.ierrors,
            },
            Err(_) => Stats::default(),
        }
    }

    fn close(&mut self) {
        if let Some(port) = self.port.take() {
            port.stop();
        }
        // EAL teardown stays with the process-wide guard (eal_shutdown)
    }
}

impl Drop for Sock {
    fn drop(&mut self) {
        self.close();
    }
}
