//! The uniform surface every transmit backend implements.
//!
//! A handle is single-threaded: the caller serializes every method on one
//! backend (`&mut self` encodes that). Separate handles may run on
//! separate threads.

use std::net::SocketAddrV4;

use crate::errors::Result;
use crate::select::BackendKind;

/// Where a batch is headed.
#[derive(Clone, Copy, Debug)]
pub enum Dest<'a> {
    /// Packets are self-addressed frames (L3 with the destination in the
    /// IPv4 header, or full L2 frames on the kernel-bypass paths).
    InPacket,
    /// Every datagram goes to one address.
    Single(SocketAddrV4),
    /// One address per packet; must be exactly as long as the batch.
    PerPacket(&'a [SocketAddrV4]),
}

/// A caller-owned receive slot. The backend copies one frame into `buf`
/// (truncating) and records the frame length in `len`.
pub struct RxFrame<'a> {
    pub buf: &'a mut [u8],
    pub len: usize,
}

impl<'a> RxFrame<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, len: 0 }
    }
}

/// Monotonically non-decreasing counters, reset only when the owning
/// backend closes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Stats {
    pub packets_sent: u64,
    pub packets_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub errors: u64,
}

pub trait Backend: Send {
    fn kind(&self) -> BackendKind;

    /// Hands a batch to the transmit path and returns the length of the
    /// accepted prefix (`0 ≤ k ≤ packets.len()`).
    ///
    /// A short return is backpressure, not an error; the caller retries
    /// the unaccepted tail. No backend drops frames from the middle of a
    /// batch.
    fn send_batch(&mut self, packets: &[&[u8]], dest: Dest<'_>) -> Result<usize>;

    /// Copies up to `frames.len()` received frames into the caller's
    /// buffers. Returns the number of frames delivered, possibly zero.
    fn recv_batch(&mut self, frames: &mut [RxFrame<'_>]) -> Result<usize>;

    /// Snapshot of the counter block.
    fn stats(&self) -> Stats;

    /// Releases every resource the backend holds and resets the counters.
    /// Idempotent; never fails observably.
    fn close(&mut self);
}
