//! Kernel-bypass backend over AF_XDP sockets.
//!
//! A page-aligned arena of `NUM_FRAMES` fixed-size frames is shared with
//! the kernel; four SPSC rings (fill, completion, rx, tx) carry frame
//! addresses (offsets into the arena) back and forth. Frame identity is
//! the integer offset, never a pointer. A frame address lives in exactly
//! one place at a time: the user-held free list, the fill ring, the rx
//! path, the tx ring, or the completion ring.

mod wrapper;

use std::alloc::{self, Layout};
use std::io;

use tracing::debug;

use crate::api::{Backend, Dest, RxFrame, Stats};
use crate::errors::{Error, Result};
use crate::select::BackendKind;
use wrapper::{Umem, XskSocket};

pub const NUM_FRAMES: u32 = 4096;
pub const FRAME_SIZE: u32 = libxdp_sys::XSK_UMEM__DEFAULT_FRAME_SIZE;

/// Frames posted to the fill ring at open; the rest stay user-held so the
/// transmit path never touches a frame the kernel may be filling.
const RX_FRAMES: u32 = NUM_FRAMES / 2;

/// The user-held side of the frame ledger. TX draws addresses from here,
/// the completion ring and released RX descriptors pay them back, and the
/// fill ring is only ever topped up out of this list.
struct FrameLedger {
    free: Vec<u64>,
}

impl FrameLedger {
    fn new(num_frames: u32, frame_size: u32) -> Self {
        let free = (0..num_frames)
            .map(|i| u64::from(i) * u64::from(frame_size))
            .collect();
        FrameLedger { free }
    }

    fn pop(&mut self) -> Option<u64> {
        self.free.pop()
    }

    fn push(&mut self, addr: u64) {
        self.free.push(addr);
    }

    fn len(&self) -> usize {
        self.free.len()
    }
}

/// Page-aligned backing memory for the UMEM.
struct Arena {
    ptr: *mut u8,
    layout: Layout,
}

unsafe impl Send for Arena {}

impl Arena {
    fn alloc(size: usize) -> Result<Self> {
        let page = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        if page < 0 {
            return Err(Error::Io(io::Error::last_os_error()));
        }
        let layout = Layout::from_size_align(size, page as usize)
            .map_err(|_| Error::InvalidArgument("bad arena layout"))?;
        let ptr = unsafe { alloc::alloc(layout) };
        if ptr.is_null() {
            return Err(Error::ResourceExhausted("umem arena"));
        }
        Ok(Arena { ptr, layout })
    }
}

impl Drop for Arena {
    fn drop(&mut self) {
        unsafe { alloc::dealloc(self.ptr, self.layout) };
    }
}

pub struct Sock {
    // field order is teardown order: socket, then UMEM, then the arena
    xsk: Option<XskSocket>,
    umem: Option<Umem>,
    arena: Option<Arena>,
    ledger: FrameLedger,
    stats: Stats,
    rx_addrs: Vec<u64>,
}

impl Sock {
    pub fn open(ifname: &str) -> Result<Self> {
        if wrapper::ifindex(ifname) == 0 {
            return Err(Error::NoSuchInterface(ifname.to_string()));
        }

        let size = NUM_FRAMES as usize * FRAME_SIZE as usize;
        let arena = Arena::alloc(size)?;
        let mut umem = unsafe { Umem::create(arena.ptr, size as u64, NUM_FRAMES, FRAME_SIZE) }
            .map_err(|e| Error::classify_io(e, "umem registration"))?;
        let xsk = unsafe { XskSocket::create(&umem, ifname, 0, NUM_FRAMES) }
            .map_err(|e| Error::classify_io(e, "xsk socket"))?;

        // hand the kernel its share of the arena for RX; the remaining
        // frames stay on the free list for TX
        let mut ledger = FrameLedger::new(NUM_FRAMES, FRAME_SIZE);
        let (reserved, idx) = umem.fill_reserve(RX_FRAMES);
        if reserved != RX_FRAMES {
            return Err(Error::ResourceExhausted("fill ring"));
        }
        for i in 0..reserved {
            let addr = ledger.pop().ok_or(Error::ResourceExhausted("frame ledger"))?;
            umem.fill_set(idx + i, addr);
        }
        umem.fill_submit(reserved);

        debug!(
            ifname,
            frames = NUM_FRAMES,
            rx_frames = RX_FRAMES,
            "af_xdp socket open"
        );
        Ok(Sock {
            xsk: Some(xsk),
            umem: Some(umem),
            arena: Some(arena),
            ledger,
            stats: Stats::default(),
            rx_addrs: Vec::new(),
        })
    }
}

impl Backend for Sock {
    fn kind(&self) -> BackendKind {
        BackendKind::AfXdp
    }

    fn send_batch(&mut self, packets: &[&[u8]], _dest: Dest<'_>) -> Result<usize> {
        let (Some(xsk), Some(umem), Some(arena)) =
            (self.xsk.as_mut(), self.umem.as_mut(), self.arena.as_ref())
        else {
            return Err(io::Error::from_raw_os_error(libc::EBADF).into());
        };

        // frames the kernel is done transmitting go back on the free list
        let (done, cidx) = umem.comp_peek(NUM_FRAMES);
        for i in 0..done {
            self.ledger.push(umem.comp_addr(cidx + i));
        }
        if done > 0 {
            umem.comp_release(done);
        }

        // only frame-sized packets can enter the arena, and only as many
        // as there are free frames to carry them
        let avail = self.ledger.len();
        if avail == 0 {
            return Ok(0);
        }
        let mut want = 0;
        for pkt in packets {
            if pkt.len() > FRAME_SIZE as usize {
                if want == 0 {
                    return Err(Error::TooBigPacket(pkt.len()));
                }
                break;
            }
            want += 1;
            if want == avail {
                break;
            }
        }

        let (reserved, idx) = xsk.tx_reserve(want as u32);
        for i in 0..reserved {
            let pkt = packets[i as usize];
            // reserved ≤ want ≤ free frames, so the pop cannot fail
            let addr = self.ledger.pop().ok_or(Error::ResourceExhausted("frame ledger"))?;
            unsafe {
                std::ptr::copy_nonoverlapping(
                    pkt.as_ptr(),
                    arena.ptr.add(addr as usize),
                    pkt.len(),
                );
            }
            xsk.tx_set(idx.wrapping_add(i), addr, pkt.len() as u32);
            self.stats.packets_sent += 1;
            self.stats.bytes_sent += pkt.len() as u64;
        }
        xsk.tx_submit(reserved);

        if xsk.tx_needs_wakeup() {
            xsk.wake();
        }
        Ok(reserved as usize)
    }

    fn recv_batch(&mut self, frames: &mut [RxFrame<'_>]) -> Result<usize> {
        let (Some(xsk), Some(umem), Some(arena)) =
            (self.xsk.as_mut(), self.umem.as_mut(), self.arena.as_ref())
        else {
            return Err(io::Error::from_raw_os_error(libc::EBADF).into());
        };

        let (got, idx) = xsk.rx_peek(frames.len() as u32);
        if got == 0 {
            return Ok(0);
        }
        self.rx_addrs.clear();
        for i in 0..got {
            let (addr, len) = xsk.rx_desc(idx + i);
            let frame = &mut frames[i as usize];
            let copied = (len as usize).min(frame.buf.len());
            unsafe {
                std::ptr::copy_nonoverlapping(
                    arena.ptr.add(addr as usize),
                    frame.buf.as_mut_ptr(),
                    copied,
                );
            }
            frame.len = copied;
            self.rx_addrs.push(addr);
            self.stats.packets_received += 1;
            self.stats.bytes_received += u64::from(len);
        }
        xsk.rx_release(got);

        // released frames land on the free list, then the fill ring is
        // topped back up from it; a short refill only shrinks future RX
        // capacity
        for &addr in &self.rx_addrs {
            self.ledger.push(addr);
        }
        let (refill, fidx) = umem.fill_reserve(got);
        for i in 0..refill {
            let addr = self.ledger.pop().ok_or(Error::ResourceExhausted("frame ledger"))?;
            umem.fill_set(fidx + i, addr);
        }
        umem.fill_submit(refill);

        Ok(got as usize)
    }

    fn stats(&self) -> Stats {
        self.stats
    }

    fn close(&mut self) {
        if self.xsk.is_some() {
            // teardown order: socket, UMEM, arena
            self.xsk.take();
            self.umem.take();
            self.arena.take();
            self.ledger = FrameLedger { free: Vec::new() };
            self.stats = Stats::default();
        }
    }
}

impl Drop for Sock {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn missing_interface_is_reported() {
        match Sock::open("pktblast-no-such-if0") {
            Err(Error::NoSuchInterface(name)) => assert_eq!(name, "pktblast-no-such-if0"),
            other => panic!("expected NoSuchInterface, got {other:?}"),
        }
    }

    #[test]
    fn ledger_covers_the_arena_exactly_once() {
        let ledger = FrameLedger::new(NUM_FRAMES, FRAME_SIZE);
        let addrs: HashSet<u64> = ledger.free.iter().copied().collect();
        assert_eq!(addrs.len(), NUM_FRAMES as usize);
        for addr in &addrs {
            assert_eq!(addr % u64::from(FRAME_SIZE), 0);
            assert!(*addr < u64::from(NUM_FRAMES) * u64::from(FRAME_SIZE));
        }
    }

    #[test]
    fn ledger_conserves_frames_across_cycles() {
        // interleave take/return cycles the way send and completion do;
        // the multiset of user-held plus in-flight addresses must stay the
        // whole arena, with no address duplicated
        let mut ledger = FrameLedger::new(NUM_FRAMES, FRAME_SIZE);
        let mut in_flight: Vec<u64> = Vec::new();

        for round in 0..100 {
            for _ in 0..100 {
                let addr = ledger.pop().expect("free list exhausted");
                in_flight.push(addr);
            }
            // return in FIFO order, as a completion ring would
            let ret = if round % 2 == 0 { 100 } else { 60 };
            for addr in in_flight.drain(..ret.min(in_flight.len())) {
                ledger.push(addr);
            }

            let mut seen: HashSet<u64> = ledger.free.iter().copied().collect();
            assert_eq!(seen.len(), ledger.len(), "duplicate on free list");
            for addr in &in_flight {
                assert!(seen.insert(*addr), "frame both free and in flight");
            }
            assert_eq!(seen.len(), NUM_FRAMES as usize, "frames lost");
        }
    }

    #[test]
    fn tx_frames_never_overlap_the_initial_fill_posting() {
        // open() posts RX_FRAMES addresses to the fill ring and leaves the
        // rest on the free list; the first sends draw only from the latter
        let mut ledger = FrameLedger::new(NUM_FRAMES, FRAME_SIZE);
        let mut filled = HashSet::new();
        for _ in 0..RX_FRAMES {
            filled.insert(ledger.pop().unwrap());
        }
        while let Some(addr) = ledger.pop() {
            assert!(!filled.contains(&addr), "frame {addr} double-posted");
        }
    }
}
