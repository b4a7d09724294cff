//! Batched sendmmsg backend: one system call per batch of UDP datagrams.
//!
//! The message headers and iovecs are scratch state reused across batches;
//! payload bytes are never copied, the kernel reads them straight from the
//! caller's buffers during the call.

use std::io;
use std::mem;
use std::ptr;

use tracing::debug;

use crate::api::{Backend, Dest, RxFrame, Stats};
use crate::errors::{Error, Result};
use crate::platform::{set_nonblocking, sockaddr_in};
use crate::select::BackendKind;

const DEFAULT_BATCH: usize = 64;

pub struct Sock {
    fd: libc::c_int,
    stats: Stats,
    msgs: Vec<libc::mmsghdr>,
    iovs: Vec<libc::iovec>,
    addrs: Vec<libc::sockaddr_in>,
}

// The raw pointers in the scratch arrays only point into caller buffers
// for the duration of a single call.
unsafe impl Send for Sock {}

impl Sock {
    pub fn open() -> Result<Self> {
        let fd = unsafe { libc::socket(libc::AF_INET, libc::SOCK_DGRAM, 0) };
        if fd < 0 {
            return Err(Error::from_errno("udp socket"));
        }
        let sock = Sock {
            fd,
            stats: Stats::default(),
            msgs: Vec::with_capacity(DEFAULT_BATCH),
            iovs: Vec::with_capacity(DEFAULT_BATCH),
            addrs: Vec::with_capacity(DEFAULT_BATCH),
        };
        set_nonblocking(fd)?;
        debug!(fd, "sendmmsg socket open");
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
        BackendKind::Sendmmsg
    }

    fn send_batch(&mut self, packets: &[&[u8]], dest: Dest<'_>) -> Result<usize> {
        if packets.is_empty() {
            return Ok(0);
        }
        let n = packets.len();
        match dest {
            Dest::InPacket => {
                return Err(Error::InvalidArgument(
                    "sendmmsg needs an explicit destination",
                ))
            }
            Dest::PerPacket(addrs) if addrs.len() != n => {
                return Err(Error::InvalidArgument("one destination per packet required"))
            }
            _ => {}
        }
        self.ensure_scratch(n);

        match dest {
            Dest::Single(addr) => self.addrs[0] = sockaddr_in(*addr.ip(), addr.port()),
            Dest::PerPacket(addrs) => {
                for (slot, addr) in self.addrs.iter_mut().zip(addrs) {
                    *slot = sockaddr_in(*addr.ip(), addr.port());
                }
            }
            Dest::InPacket => unreachable!(),
        }

        let addr_base = self.addrs.as_mut_ptr();
        for (i, pkt) in packets.iter().enumerate() {
            self.iovs[i].iov_base = pkt.as_ptr() as *mut libc::c_void;
            self.iovs[i].iov_len = pkt.len();
        }
        let iov_base = self.iovs.as_mut_ptr();
        for (i, msg) in self.msgs.iter_mut().take(n).enumerate() {
            let name = match dest {
                Dest::Single(_) => addr_base,
                _ => unsafe { addr_base.add(i) },
            };
            msg.msg_hdr.msg_name = name as *mut libc::c_void;
            msg.msg_hdr.msg_namelen = mem::size_of::<libc::sockaddr_in>() as libc::socklen_t;
            msg.msg_hdr.msg_iov = unsafe { iov_base.add(i) };
            msg.msg_hdr.msg_iovlen = 1;
            msg.msg_hdr.msg_control = ptr::null_mut();
            msg.msg_hdr.msg_controllen = 0;
            msg.msg_hdr.msg_flags = 0;
            msg.msg_len = 0;
        }

        let rc = unsafe {
            libc::sendmmsg(
                self.fd,
                self.msgs.as_mut_ptr(),
                n as libc::c_uint,
                libc::MSG_DONTWAIT,
            )
        };
        if rc < 0 {
            let e = io::Error::last_os_error();
            if e.kind() == io::ErrorKind::WouldBlock {
                return Ok(0);
            }
            self.stats.errors += 1;
            return Err(e.into());
        }

        let sent = rc as usize;
        self.stats.packets_sent += sent as u64;
        self.stats.bytes_sent += packets[..sent].iter().map(|p| p.len() as u64).sum::<u64>();
        Ok(sent)
    }

    fn recv_batch(&mut self, frames: &mut [RxFrame<'_>]) -> Result<usize> {
        if frames.is_empty() {
            return Ok(0);
        }
        let n = frames.len();
        self.ensure_scratch(n);
        for (i, frame) in frames.iter_mut().enumerate() {
            self.iovs[i].iov_base = frame.buf.as_mut_ptr() as *mut libc::c_void;
            self.iovs[i].iov_len = frame.buf.len();
        }
        let iov_base = self.iovs.as_mut_ptr();
        for (i, msg) in self.msgs.iter_mut().take(n).enumerate() {
            msg.msg_hdr.msg_name = ptr::null_mut();
            msg.msg_hdr.msg_namelen = 0;
            msg.msg_hdr.msg_iov = unsafe { iov_base.add(i) };
            msg.msg_hdr.msg_iovlen = 1;
            msg.msg_hdr.msg_control = ptr::null_mut();
            msg.msg_hdr.msg_controllen = 0;
            msg.msg_hdr.msg_flags = 0;
            msg.msg_len = 0;
        }

        let rc = unsafe {
            libc::recvmmsg(
                self.fd,
                self.msgs.as_mut_ptr(),
                n as libc::c_uint,
                libc::MSG_DONTWAIT,
                ptr::null_mut(),
            )
        };
        if rc < 0 {
            let e = io::Error::last_os_error();
            if e.kind() == io::ErrorKind::WouldBlock {
                return Ok(0);
            }
            return Err(e.into());
        }

        let got = rc as usize;
        for (i, frame) in frames.iter_mut().take(got).enumerate() {
            frame.len = self.msgs[i].msg_len as usize;
            self.stats.packets_received += 1;
            self.stats.bytes_received += self.msgs[i].msg_len as u64;
        }
        Ok(got)
    }

    fn stats(&self) -> Stats {
        self.stats
    }

    fn close(&mut self) {
        if self.fd >= 0 {
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

    fn loopback_receiver() -> (UdpSocket, SocketAddrV4) {
        let recv = UdpSocket::bind("127.0.0.1:0").unwrap();
        recv.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        let port = recv.local_addr().unwrap().port();
        (recv, SocketAddrV4::new([127, 0, 0, 1].into(), port))
    }

    #[test]
    fn batch_of_32_reaches_loopback_receiver() {
        let (recv, dest) = loopback_receiver();
        let mut sock = Sock::open().unwrap();

        let payloads: Vec<Vec<u8>> = (0..32).map(|i| format!("pkt-{i:03}").into_bytes()).collect();
        let packets: Vec<&[u8]> = payloads.iter().map(|p| p.as_slice()).collect();
        let sent = sock.send_batch(&packets, Dest::Single(dest)).unwrap();
        assert!(sent <= 32);
        assert!(sent > 0, "loopback accepted nothing");

        let mut buf = [0u8; 64];
        for i in 0..sent {
            let n = recv.recv(&mut buf).unwrap();
            assert_eq!(&buf[..n], payloads[i].as_slice(), "datagram {i}");
        }

        let stats = sock.stats();
        assert_eq!(stats.packets_sent, sent as u64);
        let bytes: u64 = payloads[..sent].iter().map(|p| p.len() as u64).sum();
        assert_eq!(stats.bytes_sent, bytes);
    }

    #[test]
    fn per_packet_destinations() {
        let (recv_a, dest_a) = loopback_receiver();
        let (recv_b, dest_b) = loopback_receiver();
        let mut sock = Sock::open().unwrap();

        let packets: Vec<&[u8]> = vec![b"to-a", b"to-b"];
        let dests = [dest_a, dest_b];
        let sent = sock.send_batch(&packets, Dest::PerPacket(&dests)).unwrap();
        assert_eq!(sent, 2);

        let mut buf = [0u8; 16];
        let n = recv_a.recv(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"to-a");
        let n = recv_b.recv(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"to-b");
    }

    #[test]
    fn destination_shape_is_validated() {
        let mut sock = Sock::open().unwrap();
        let packets: Vec<&[u8]> = vec![b"x", b"y"];
        assert!(matches!(
            sock.send_batch(&packets, Dest::InPacket),
            Err(Error::InvalidArgument(_))
        ));
        let one = [SocketAddrV4::new([127, 0, 0, 1].into(), 9)];
        assert!(matches!(
            sock.send_batch(&packets, Dest::PerPacket(&one)),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn recv_batch_on_bound_peer() {
        // pair two backends: one bound via std, sending into a second
        let (recv, dest) = loopback_receiver();
        let mut sender = Sock::open().unwrap();
        let packets: Vec<&[u8]> = vec![b"hello"];
        assert_eq!(sender.send_batch(&packets, Dest::Single(dest)).unwrap(), 1);

        // drain through std to keep the scenario deterministic
        let mut buf = [0u8; 16];
        let n = recv.recv(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"hello");

        // an unbound backend has nothing to receive
        let mut bufs = [0u8; 32];
        let mut frames = [RxFrame::new(&mut bufs)];
        assert_eq!(sender.recv_batch(&mut frames).unwrap(), 0);
    }
}
