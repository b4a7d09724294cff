//! Safe wrappers over the libxdp XSK surface: UMEM with its fill and
//! completion rings, and the socket with its rx/tx rings.

use std::ffi::CString;
use std::io;
use std::mem::zeroed;
use std::os::raw::c_void;
use std::ptr;

use libxdp_sys::{
    rust_xsk_cons_comp_addr, rust_xsk_cons_peek, rust_xsk_cons_release, rust_xsk_cons_rx_desc,
    rust_xsk_prod_needs_wakeup, rust_xsk_prod_reserve, rust_xsk_prod_set_fill_addr,
    rust_xsk_prod_set_tx_desc, rust_xsk_prod_submit, rust_xsk_socket_create,
    rust_xsk_socket_delete, rust_xsk_socket_fd, rust_xsk_umem_create, rust_xsk_umem_delete,
    xsk_ring_cons, xsk_ring_prod, xsk_socket, xsk_umem, XDP_FLAGS_DRV_MODE,
    XDP_USE_NEED_WAKEUP, XSK_UMEM__DEFAULT_FRAME_HEADROOM,
};

pub fn resultify(x: i32) -> io::Result<u32> {
    if x >= 0 {
        Ok(x as u32)
    } else {
        Err(io::Error::from_raw_os_error(-x))
    }
}

pub fn ifindex(ifname: &str) -> u32 {
    let Ok(c_ifname) = CString::new(ifname) else {
        return 0;
    };
    unsafe { libc::if_nametoindex(c_ifname.as_ptr()) }
}

/// The UMEM registration plus its fill (userspace → kernel) and
/// completion (kernel → userspace) rings.
pub struct Umem {
    inner: *mut xsk_umem,
    fill: xsk_ring_prod,
    comp: xsk_ring_cons,
}

unsafe impl Send for Umem {}

impl Umem {
    /// Registers `area` (page-aligned, `size` bytes) with fill and
    /// completion rings both sized to the frame count.
    ///
    /// # Safety
    /// `area` must stay valid and unmoved for the lifetime of the Umem.
    pub unsafe fn create(
        area: *mut u8,
        size: u64,
        num_frames: u32,
        frame_size: u32,
    ) -> io::Result<Self> {
        let mut inner = ptr::null_mut();
        let mut fill: xsk_ring_prod = unsafe { zeroed() };
        let mut comp: xsk_ring_cons = unsafe { zeroed() };
        resultify(unsafe {
            rust_xsk_umem_create(
                &mut inner,
                area as *mut c_void,
                size,
                &mut fill,
                &mut comp,
                num_frames,
                num_frames,
                frame_size,
                XSK_UMEM__DEFAULT_FRAME_HEADROOM,
            )
        })?;
        Ok(Umem { inner, fill, comp })
    }

    pub fn as_raw(&self) -> *mut xsk_umem {
        self.inner
    }

    pub fn fill_reserve(&mut self, nb: u32) -> (u32, u32) {
        let mut idx = 0;
        let reserved = unsafe { rust_xsk_prod_reserve(&mut self.fill, nb, &mut idx) };
        (reserved, idx)
    }

    pub fn fill_set(&mut self, idx: u32, addr: u64) {
        unsafe { rust_xsk_prod_set_fill_addr(&mut self.fill, idx, addr) }
    }

    pub fn fill_submit(&mut self, nb: u32) {
        unsafe { rust_xsk_prod_submit(&mut self.fill, nb) }
    }

    pub fn comp_peek(&mut self, nb: u32) -> (u32, u32) {
        let mut idx = 0;
        let peeked = unsafe { rust_xsk_cons_peek(&mut self.comp, nb, &mut idx) };
        (peeked, idx)
    }

    pub fn comp_addr(&self, idx: u32) -> u64 {
        unsafe { rust_xsk_cons_comp_addr(&self.comp, idx) }
    }

    pub fn comp_release(&mut self, nb: u32) {
        unsafe { rust_xsk_cons_release(&mut self.comp, nb) }
    }
}

impl Drop for Umem {
    fn drop(&mut self) {
        unsafe { rust_xsk_umem_delete(self.inner) };
    }
}

/// An XSK socket bound in driver mode with need-wakeup, program load
/// inhibited (the XDP program is supplied out of band).
pub struct XskSocket {
    inner: *mut xsk_socket,
    rx: xsk_ring_cons,
    tx: xsk_ring_prod,
}

unsafe impl Send for XskSocket {}

impl XskSocket {
    /// # Safety
    /// `umem` must outlive the socket.
    pub unsafe fn create(
        umem: &Umem,
        ifname: &str,
        queue_id: u32,
        num_descs: u32,
    ) -> io::Result<Self> {
        // XSK sockets pin UMEM pages; lift the lock limit first
        let rlim = libc::rlimit {
            rlim_cur: libc::RLIM_INFINITY,
            rlim_max: libc::RLIM_INFINITY,
        };
        if unsafe { libc::setrlimit(libc::RLIMIT_MEMLOCK, &rlim) } != 0 {
            return Err(io::Error::last_os_error());
        }

        let mut rx: xsk_ring_cons = unsafe { zeroed() };
        let mut tx: xsk_ring_prod = unsafe { zeroed() };
        let mut inner = ptr::null_mut();
        let c_ifname = CString::new(ifname)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "interface name"))?;
        resultify(unsafe {
            rust_xsk_socket_create(
                &mut inner,
                c_ifname.as_ptr(),
                queue_id,
                umem.as_raw(),
                &mut rx,
                &mut tx,
                num_descs,
                num_descs,
                XDP_FLAGS_DRV_MODE,
                XDP_USE_NEED_WAKEUP as u16,
            )
        })?;
        Ok(XskSocket { inner, rx, tx })
    }

    pub fn fd(&self) -> i32 {
        unsafe { rust_xsk_socket_fd(self.inner) }
    }

    pub fn tx_reserve(&mut self, nb: u32) -> (u32, u32) {
        let mut idx = 0;
        let reserved = unsafe { rust_xsk_prod_reserve(&mut self.tx, nb, &mut idx) };
        (reserved, idx)
    }

    pub fn tx_set(&mut self, idx: u32, addr: u64, len: u32) {
        unsafe { rust_xsk_prod_set_tx_desc(&mut self.tx, idx, addr, len) }
    }

    pub fn tx_submit(&mut self, nb: u32) {
        unsafe { rust_xsk_prod_submit(&mut self.tx, nb) }
    }

    pub fn tx_needs_wakeup(&self) -> bool {
        unsafe { rust_xsk_prod_needs_wakeup(&self.tx) != 0 }
    }

    /// Zero-byte non-blocking send that kicks the kernel TX path.
    pub fn wake(&self) {
        unsafe {
            libc::sendto(
                self.fd(),
                ptr::null(),
                0,
                libc::MSG_DONTWAIT,
                ptr::null(),
                0,
            )
        };
    }

    pub fn rx_peek(&mut self, nb: u32) -> (u32, u32) {
        let mut idx = 0;
        let peeked = unsafe { rust_xsk_cons_peek(&mut self.rx, nb, &mut idx) };
        (peeked, idx)
    }

    pub fn rx_desc(&self, idx: u32) -> (u64, u32) {
        let mut addr = 0u64;
        let mut len = 0u32;
        unsafe { rust_xsk_cons_rx_desc(&self.rx, idx, &mut addr, &mut len) };
        (addr, len)
    }

    pub fn rx_release(&mut self, nb: u32) {
        unsafe { rust_xsk_cons_release(&mut self.rx, nb) }
    }
}

impl Drop for XskSocket {
    fn drop(&mut self) {
        unsafe { rust_xsk_socket_delete(self.inner) };
    }
}
