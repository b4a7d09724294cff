//! Async submission-queue backend: sendmsg operations staged on an
//! io_uring ring, one submit per batch, completions fully drained before
//! the batch returns.
//!
//! Because every completion is consumed inside `send_batch`, caller
//! buffers only need to stay valid for the duration of the call and no
//! in-flight state leaks across batches.

use std::io;
use std::mem;

use io_uring::{opcode, types, IoUring};
use tracing::debug;

use crate::api::{Backend, Dest, RxFrame, Stats};
use crate::errors::{Error, Result};
use crate::platform::{set_nonblocking, sockaddr_in};
use crate::select::BackendKind;

pub const DEFAULT_QUEUE_DEPTH: u32 = 256;

pub struct Sock {
    ring: Option<IoUring>,
    fd: libc::c_int,
    depth: usize,
    stats: Stats,
    // staged per batch; stable addresses for the kernel until the batch
    // drains, repopulated on the next call
    msgs: Vec<libc::msghdr>,
    iovs: Vec<libc::iovec>,
    addrs: Vec<libc::sockaddr_in>,
}

// Scratch pointers only reference caller buffers within a single call.
unsafe impl Send for Sock {}

impl Sock {
    pub fn open(queue_depth: u32) -> Result<Self> {
        let depth = if queue_depth == 0 {
            DEFAULT_QUEUE_DEPTH
        } else {
            queue_depth
        };
        let ring = IoUring::new(depth).map_err(|e| {
            if e.raw_os_error() == Some(libc::ENOSYS) {
                Error::Unsupported("io_uring")
            } else {
                Error::classify_io(e, "io_uring setup")
            }
        })?;
        let fd = unsafe { libc::socket(libc::AF_INET, libc::SOCK_DGRAM, 0) };
        if fd < 0 {
            return Err(Error::from_errno("udp socket"));
        }
        let sock = Sock {
            ring: Some(ring),
            fd,
            depth: depth as usize,
            stats: Stats::default(),
            msgs: Vec::new(),
            iovs: Vec::new(),
            addrs: Vec::new(),
        };
        set_nonblocking(fd)?;
        debug!(fd, depth, "io_uring backend open");
        Ok(sock)
    }

    fn ensure_scratch(&mut self, n: usize) {
        if self.msgs.len() < n {
            self.msgs.resize_with(n, || unsafe { mem::zeroed() });
            self.iovs.resize_with(n, || unsafe { mem::zeroed() });
            self.addrs.resize_with(n, || unsafe { mem::zeroed() });
        }
    }
}

impl Backend for Sock {
    fn kind(&self) -> BackendKind {
        BackendKind::IoUring
    }

    fn send_batch(&mut self, packets: &[&[u8]], dest: Dest<'_>) -> Result<usize> {
        if packets.is_empty() {
            return Ok(0);
        }
        match dest {
            Dest::InPacket => {
                return Err(Error::InvalidArgument(
                    "io_uring sendmsg needs an explicit destination",
                ))
            }
            Dest::PerPacket(addrs) if addrs.len() != packets.len() => {
                return Err(Error::InvalidArgument("one destination per packet required"))
            }
            _ => {}
        }
        if self.ring.is_none() {
            return Err(io::Error::from_raw_os_error(libc::EBADF).into());
        }

        // a batch never outgrows the submission ring
        let n = packets.len().min(self.depth);
        self.ensure_scratch(n);
        for i in 0..n {
            let addr = match dest {
                Dest::Single(a) => a,
                Dest::PerPacket(addrs) => addrs[i],
                Dest::InPacket => unreachable!(),
            };
            self.addrs[i] = sockaddr_in(*addr.ip(), addr.port());
            self.iovs[i].iov_base = packets[i].as_ptr() as *mut libc::c_void;
            self.iovs[i].iov_len = packets[i].len();
            let msg = &mut self.msgs[i];
            *msg = unsafe { mem::zeroed() };
            msg.msg_iov = unsafe { self.iovs.as_mut_ptr().add(i) };
            msg.msg_iovlen = 1;
        }
        let addr_base = self.addrs.as_mut_ptr();
        for (i, msg) in self.msgs.iter_mut().take(n).enumerate() {
            msg.msg_name = unsafe { addr_base.add(i) } as *mut libc::c_void;
            msg.msg_namelen = mem::size_of::<libc::sockaddr_in>() as libc::socklen_t;
        }

        let ring = self.ring.as_mut().unwrap();
        let mut staged = 0;
        {
            let mut sq = ring.submission();
            for (i, msg) in self.msgs.iter().take(n).enumerate() {
                let sqe = opcode::SendMsg::new(types::Fd(self.fd), msg as *const libc::msghdr)
                    .build()
                    .user_data(i as u64);
                if unsafe { sq.push(&sqe) }.is_err() {
                    break;
                }
                staged += 1;
            }
        }
        if staged == 0 {
            return Ok(0);
        }

        ring.submit_and_wait(staged)?;

        let mut completed = 0;
        for cqe in ring.completion() {
            if cqe.result() >= 0 {
                completed += 1;
                self.stats.packets_sent += 1;
                self.stats.bytes_sent += cqe.result() as u64;
            } else {
                self.stats.errors += 1;
            }
        }
        Ok(completed)
    }

    fn recv_batch(&mut self, frames: &mut [RxFrame<'_>]) -> Result<usize> {
        let mut got = 0;
        for frame in frames.iter_mut() {
            let n = unsafe {
                libc::recv(
                    self.fd,
                    frame.buf.as_mut_ptr() as *mut libc::c_void,
                    frame.buf.len(),
                    libc::MSG_DONTWAIT,
                )
            };
            if n < 0 {
                let e = io::Error::last_os_error();
                if e.kind() == io::ErrorKind::WouldBlock {
                    break;
                }
                return Err(e.into());
            }
            frame.len = n as usize;
            got += 1;
            self.stats.packets_received += 1;
            self.stats.bytes_received += n as u64;
        }
        Ok(got)
    }

    fn stats(&self) -> Stats {
        self.stats
    }

    fn close(&mut self) {
        if let Some(ring) = self.ring.take() {
            drop(ring);
            unsafe { libc::close(self.fd) };
            self.fd = -1;
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
    use std::net::{SocketAddrV4, UdpSocket};
    use std::time::Duration;

    fn open_or_skip() -> Option<Sock> {
        match Sock::open(64) {
            Ok(sock) => Some(sock),
            Err(e) => {
                eprintln!("skipping io_uring test: {e}");
                None
            }
        }
    }

    #[test]
    fn batch_drains_to_loopback() {
        let Some(mut sock) = open_or_skip() else {
            return;
        };
        let recv = UdpSocket::bind("127.0.0.1:0").unwrap();
        recv.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        let dest = SocketAddrV4::new([127, 0, 0, 1].into(), recv.local_addr().unwrap().port());

        let payloads: Vec<Vec<u8>> = (0..16).map(|i| format!("sqe-{i:02}").into_bytes()).collect();
        let packets: Vec<&[u8]> = payloads.iter().map(|p| p.as_slice()).collect();
        let done = sock.send_batch(&packets, Dest::Single(dest)).unwrap();
        assert_eq!(done, 16);

        let mut buf = [0u8; 32];
        for i in 0..done {
            let n = recv.recv(&mut buf).unwrap();
            assert_eq!(&buf[..n], payloads[i].as_slice(), "datagram {i}");
        }

        let stats = sock.stats();
        assert_eq!(stats.packets_sent, 16);
        assert_eq!(
            stats.bytes_sent,
            payloads.iter().map(|p| p.len() as u64).sum::<u64>()
        );
        assert_eq!(stats.errors, 0);
    }

    #[test]
    fn batch_larger_than_ring_is_clamped() {
        let Some(mut sock) = open_or_skip() else {
            return;
        };
        let recv = UdpSocket::bind("127.0.0.1:0").unwrap();
        let dest = SocketAddrV4::new([127, 0, 0, 1].into(), recv.local_addr().unwrap().port());

        let payload = [0u8; 8];
        let packets: Vec<&[u8]> = (0..200).map(|_| &payload[..]).collect();
        let done = sock.send_batch(&packets, Dest::Single(dest)).unwrap();
        assert!(done <= 64, "accepted {done} > ring depth");
    }

    #[test]
    fn close_twice_is_safe() {
        let Some(mut sock) = open_or_skip() else {
            return;
        };
        sock.close();
        sock.close();
        assert_eq!(sock.stats(), Stats::default());
    }
}
