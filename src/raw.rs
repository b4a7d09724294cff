//! Portable raw-socket backend: one L3 datagram per send, destination
//! lifted from the submitted IPv4 header.

use std::io;
use std::mem;
use std::net::Ipv4Addr;

use tracing::debug;

use crate::api::{Backend, Dest, RxFrame, Stats};
use crate::errors::{Error, Result};
use crate::packet::IPV4_HEADER_LEN;
use crate::platform::{set_nonblocking, sockaddr_in};
use crate::select::BackendKind;

pub struct Sock {
    fd: libc::c_int,
    stats: Stats,
}

impl Sock {
    /// Raw IPv4 socket with the header-included option; submitted buffers
    /// carry complete IPv4 frames.
    pub fn open(protocol: u8) -> Result<Self> {
        let fd = unsafe { libc::socket(libc::AF_INET, libc::SOCK_RAW, protocol as libc::c_int) };
        if fd < 0 {
            return Err(Error::from_errno("raw socket"));
        }
        let sock = Sock {
            fd,
            stats: Stats::default(),
        };
        let one: libc::c_int = 1;
        let rc = unsafe {
            libc::setsockopt(
                fd,
                libc::IPPROTO_IP,
                libc::IP_HDRINCL,
                &one as *const _ as *const libc::c_void,
                mem::size_of::<libc::c_int>() as libc::socklen_t,
            )
        };
        if rc != 0 {
            return Err(Error::from_errno("IP_HDRINCL"));
        }
        set_nonblocking(fd)?;
        debug!(fd, protocol, "raw socket open");
        Ok(sock)
    }

    fn send_one(&self, frame: &[u8]) -> io::Result<usize> {
        // IPv4 destination sits at bytes 16..20, network order
        let dst = Ipv4Addr::new(frame[16], frame[17], frame[18], frame[19]);
        let addr = sockaddr_in(dst, 0);
        let n = unsafe {
            libc::sendto(
                self.fd,
                frame.as_ptr() as *const libc::c_void,
                frame.len(),
                libc::MSG_DONTWAIT,
                &addr as *const _ as *const libc::sockaddr,
                mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
            )
        };
        if n < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(n as usize)
        }
    }
}

impl Backend for Sock {
    fn kind(&self) -> BackendKind {
        BackendKind::RawSocket
    }

    fn send_batch(&mut self, packets: &[&[u8]], _dest: Dest<'_>) -> Result<usize> {
        let mut sent = 0;
        for pkt in packets {
            if pkt.len() < IPV4_HEADER_LEN {
                if sent == 0 {
                    return Err(Error::InvalidArgument("frame shorter than an IPv4 header"));
                }
                break;
            }
            match self.send_one(pkt) {
                Ok(n) => {
                    sent += 1;
                    self.stats.packets_sent += 1;
                    self.stats.bytes_sent += n as u64;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    self.stats.errors += 1;
                    if sent == 0 {
                        return Err(e.into());
                    }
                    break;
                }
            }
        }
        Ok(sent)
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
    use crate::packet::build_udp;

    fn open_or_skip() -> Option<Sock> {
        match Sock::open(libc::IPPROTO_RAW as u8) {
            Ok(sock) => Some(sock),
            Err(Error::Privilege(_)) => {
                eprintln!("skipping raw-socket test: no privilege");
                None
            }
            Err(e) => panic!("unexpected open failure: {e}"),
        }
    }

    #[test]
    fn short_frame_is_invalid_argument() {
        let Some(mut sock) = open_or_skip() else {
            return;
        };
        let short = [0u8; 8];
        let res = sock.send_batch(&[&short], Dest::InPacket);
        assert!(matches!(res, Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn loopback_frame_is_accepted() {
        let Some(mut sock) = open_or_skip() else {
            return;
        };
        let frame = build_udp(Ipv4Addr::LOCALHOST, Ipv4Addr::LOCALHOST, 4000, 4001, b"ping")
            .unwrap();
        let sent = sock.send_batch(&[&frame], Dest::InPacket).unwrap();
        assert_eq!(sent, 1);
        let stats = sock.stats();
        assert_eq!(stats.packets_sent, 1);
        assert_eq!(stats.bytes_sent, frame.len() as u64);
    }

    #[test]
    fn close_is_idempotent() {
        let Some(mut sock) = open_or_skip() else {
            return;
        };
        sock.close();
        sock.close();
        assert_eq!(sock.stats(), Stats::default());
    }
}
