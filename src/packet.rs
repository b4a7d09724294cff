//! IPv4 and UDP frame synthesis for send paths where the kernel does not
//! build headers.

use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU16, Ordering};

use crate::checksum::{internet_checksum, transport_checksum};
use crate::errors::{Error, Result};

pub const IPV4_HEADER_LEN: usize = 20;
pub const UDP_HEADER_LEN: usize = 8;

const DEFAULT_TTL: u8 = 64;

static NEXT_IDENT: AtomicU16 = AtomicU16::new(1);

#[derive(Clone, Debug)]
pub struct Ipv4Header {
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    pub protocol: u8,
    pub tos: u8,
    pub ttl: u8,
    /// Fixed identification; drawn from a process-wide counter when `None`.
    pub ident: Option<u16>,
}

impl Ipv4Header {
    pub fn new(src: Ipv4Addr, dst: Ipv4Addr, protocol: u8) -> Self {
        Self {
            src,
            dst,
            protocol,
            tos: 0,
            ttl: DEFAULT_TTL,
            ident: None,
        }
    }
}

/// Assembles a complete IPv4 datagram: fixed 20-byte header (no options),
/// checksum filled in, payload appended verbatim.
pub fn build_ipv4(hdr: &Ipv4Header, payload: &[u8]) -> Result<Vec<u8>> {
    if hdr.protocol == 0 {
        return Err(Error::InvalidArgument("IPv4 protocol 0 is reserved"));
    }
    let total = IPV4_HEADER_LEN + payload.len();
    if total > usize::from(u16::MAX) {
        return Err(Error::TooBigPacket(total));
    }
    let ident = hdr
        .ident
        .unwrap_or_else(|| NEXT_IDENT.fetch_add(1, Ordering::Relaxed));

    let mut frame = Vec::with_capacity(total);
    frame.push(0x45); // version 4, IHL 5
    frame.push(hdr.tos);
    frame.extend_from_slice(&(total as u16).to_be_bytes());
    frame.extend_from_slice(&ident.to_be_bytes());
    frame.extend_from_slice(&[0, 0]); // flags, fragment offset
    frame.push(hdr.ttl);
    frame.push(hdr.protocol);
    frame.extend_from_slice(&[0, 0]); // checksum, patched below
    frame.extend_from_slice(&hdr.src.octets());
    frame.extend_from_slice(&hdr.dst.octets());
    let csum = internet_checksum(&frame);
    frame[10..12].copy_from_slice(&csum.to_be_bytes());
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Builds a UDP datagram inside an IPv4 frame, transport checksum included.
pub fn build_udp(
    src: Ipv4Addr,
    dst: Ipv4Addr,
    src_port: u16,
    dst_port: u16,
    payload: &[u8],
) -> Result<Vec<u8>> {
    let udp_len = UDP_HEADER_LEN + payload.len();
    if udp_len > usize::from(u16::MAX) {
        return Err(Error::TooBigPacket(udp_len));
    }
    let mut segment = Vec::with_capacity(udp_len);
    segment.extend_from_slice(&src_port.to_be_bytes());
    segment.extend_from_slice(&dst_port.to_be_bytes());
    segment.extend_from_slice(&(udp_len as u16).to_be_bytes());
    segment.extend_from_slice(&[0, 0]);
    segment.extend_from_slice(payload);
    let csum = transport_checksum(src, dst, libc::IPPROTO_UDP as u8, &segment);
    segment[6..8].copy_from_slice(&csum.to_be_bytes());
    build_ipv4(&Ipv4Header::new(src, dst, libc::IPPROTO_UDP as u8), &segment)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trips_through_etherparse() {
        let hdr = Ipv4Header {
            src: Ipv4Addr::new(172, 16, 10, 99),
            dst: Ipv4Addr::new(172, 16, 10, 12),
            protocol: 6,
            tos: 0,
            ttl: 64,
            ident: Some(0x1c46),
        };
        let frame = build_ipv4(&hdr, &[0u8; 20]).unwrap();
        assert_eq!(frame.len(), 40);

        let parsed = etherparse::Ipv4HeaderSlice::from_slice(&frame).unwrap();
        assert_eq!(frame[0], 0x45); // version 4, IHL 5
        assert_eq!(parsed.ihl(), 5);
        assert_eq!(parsed.total_len(), 40);
        assert_eq!(parsed.identification(), 0x1c46);
        assert_eq!(parsed.ttl(), 64);
        assert_eq!(parsed.protocol().0, 6);
        assert_eq!(parsed.source_addr(), hdr.src);
        assert_eq!(parsed.destination_addr(), hdr.dst);
        // a valid header checksums to zero over its own 20 bytes
        assert_eq!(crate::checksum::internet_checksum(&frame[..20]), 0);
    }

    #[test]
    fn ident_is_monotonic_when_unset() {
        let hdr = Ipv4Header::new(Ipv4Addr::LOCALHOST, Ipv4Addr::LOCALHOST, 17);
        let a = build_ipv4(&hdr, b"").unwrap();
        let b = build_ipv4(&hdr, b"").unwrap();
        let ident = |f: &[u8]| u16::from_be_bytes([f[4], f[5]]);
        assert_ne!(ident(&a), ident(&b));
    }

    #[test]
    fn oversize_payload_is_rejected() {
        let hdr = Ipv4Header::new(Ipv4Addr::LOCALHOST, Ipv4Addr::LOCALHOST, 17);
        let payload = vec![0u8; 65536];
        assert!(matches!(
            build_ipv4(&hdr, &payload),
            Err(Error::TooBigPacket(_))
        ));
    }

    #[test]
    fn protocol_zero_is_rejected() {
        let hdr = Ipv4Header::new(Ipv4Addr::LOCALHOST, Ipv4Addr::LOCALHOST, 0);
        assert!(matches!(
            build_ipv4(&hdr, b""),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn udp_datagram_checksums_to_zero() {
        let src = Ipv4Addr::new(192, 168, 1, 1);
        let dst = Ipv4Addr::new(192, 168, 1, 2);
        let frame = build_udp(src, dst, 1234, 5678, b"Hello").unwrap();
        assert_eq!(frame.len(), IPV4_HEADER_LEN + UDP_HEADER_LEN + 5);

        let udp = &frame[IPV4_HEADER_LEN..];
        assert_eq!(u16::from_be_bytes([udp[4], udp[5]]), 13);
        // recomputing over the filled segment must cancel out
        assert_eq!(
            crate::checksum::transport_checksum(src, dst, 17, udp),
            0x0000
        );

        let parsed = etherparse::Ipv4HeaderSlice::from_slice(&frame).unwrap();
        assert_eq!(parsed.protocol().0, 17);
        assert_eq!(parsed.total_len(), (IPV4_HEADER_LEN + 13) as u16);
    }
}
