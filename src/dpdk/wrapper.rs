//! Safe wrappers over the EAL, the shared mbuf pool and the port
//! lifecycle.

use std::ffi::CString;
use std::io;
use std::os::raw::{c_char, c_int};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Once;

use dpdk_sys as ffi;

use crate::errors::{Error, Result};

static EAL_ONCE: Once = Once::new();
static EAL_OK: AtomicBool = AtomicBool::new(false);
static EAL_DOWN: AtomicBool = AtomicBool::new(false);
static POOL: AtomicUsize = AtomicUsize::new(0);
static POOL_ONCE: Once = Once::new();

fn rc_to_result(rc: c_int, what: &'static str) -> Result<()> {
    if rc == 0 {
        Ok(())
    } else {
        Err(Error::classify_io(
            io::Error::from_raw_os_error(rc.abs()),
            what,
        ))
    }
}

/// Process-wide EAL bring-up; later calls observe the first outcome.
pub fn eal_init(args: &[&str]) -> Result<()> {
    EAL_ONCE.call_once(|| {
        let owned: Vec<CString> = args
            .iter()
            .filter_map(|a| CString::new(*a).ok())
            .collect();
        let mut argv: Vec<*mut c_char> =
            owned.iter().map(|a| a.as_ptr() as *mut c_char).collect();
        let rc = unsafe { ffi::rte_eal_init(argv.len() as c_int, argv.as_mut_ptr()) };
        EAL_OK.store(rc >= 0, Ordering::SeqCst);
    });
    if EAL_OK.load(Ordering::SeqCst) {
        Ok(())
    } else {
        Err(Error::Unsupported("EAL initialization failed"))
    }
}

/// Idempotent process-wide EAL teardown.
pub fn eal_shutdown() {
    if EAL_OK.load(Ordering::SeqCst) && !EAL_DOWN.swap(true, Ordering::SeqCst) {
        unsafe { ffi::rte_eal_cleanup() };
    }
}

/// The process-wide packet mbuf pool, created on first use.
pub fn shared_pool() -> Result<*mut ffi::rte_mempool> {
    POOL_ONCE.call_once(|| {
        let name = CString::new("pktblast_pool").unwrap();
        let pool = unsafe {
            ffi::rust_pktmbuf_pool_create(
                name.as_ptr(),
                8192,
                256,
                ffi::rust_mbuf_default_buf_size(),
            )
        };
        POOL.store(pool as usize, Ordering::SeqCst);
    });
    let pool = POOL.load(Ordering::SeqCst) as *mut ffi::rte_mempool;
    if pool.is_null() {
        Err(Error::ResourceExhausted("mbuf pool"))
    } else {
        Ok(pool)
    }
}

/// One started ethernet port with a single RX and TX queue.
pub struct Port {
    id: u16,
}

impl Port {
    pub fn init(id: u16, pool: *mut ffi::rte_mempool, promiscuous: bool, queue_depth: u16) -> Result<Self> {
        rc_to_result(unsafe { ffi::rust_eth_dev_info_valid(id) }, "port info")?;
        rc_to_result(
            unsafe { ffi::rust_eth_dev_configure(id, 1, 1) },
            "port configure",
        )?;
        rc_to_result(
            unsafe { ffi::rust_eth_rx_queue_setup(id, 0, queue_depth, pool) },
            "rx queue setup",
        )?;
        rc_to_result(
            unsafe { ffi::rust_eth_tx_queue_setup(id, 0, queue_depth) },
            "tx queue setup",
        )?;
        rc_to_result(unsafe { ffi::rte_eth_dev_start(id) }, "port start")?;
        if promiscuous {
            rc_to_result(
                unsafe { ffi::rte_eth_promiscuous_enable(id) },
                "promiscuous enable",
            )?;
        }
        Ok(Port { id })
    }

    pub fn tx_burst(&self, bufs: &mut [*mut ffi::rte_mbuf]) -> u16 {
        unsafe { ffi::rust_eth_tx_burst(self.id, 0, bufs.as_mut_ptr(), bufs.len() as u16) }
    }

    pub fn rx_burst(&self, bufs: &mut [*mut ffi::rte_mbuf]) -> u16 {
        unsafe { ffi::rust_eth_rx_burst(self.id, 0, bufs.as_mut_ptr(), bufs.len() as u16) }
    }

    pub fn device_stats(&self) -> Result<ffi::rte_eth_stats> {
        let mut stats: ffi::rte_eth_stats = unsafe { std::mem::zeroed() };
        rc_to_result(
            unsafe { ffi::rte_eth_stats_get(self.id, &mut stats) },
            "port stats",
        )?;
        Ok(stats)
    }

    pub fn stop(&self) {
        unsafe {
            ffi::rte_eth_dev_stop(self.id);
            ffi::rte_eth_dev_close(self.id);
        }
    }
}
