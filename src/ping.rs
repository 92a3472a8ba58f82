use std::io::{self, Error, ErrorKind};
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use log::debug;
use socket2::{Domain, Protocol, SockAddr, Socket};

use crate::error::IcmpError;
use crate::packet::{EchoPacket, EchoType, Family, HeaderPeek, IpHeader};
use crate::util;

/// Blocking reads wake up this often so cancellation and deadlines are noticed.
pub const POLL_SLICE: Duration = Duration::from_millis(100);

/// Without a deadline this is what bounds the filtering loop.
pub(crate) const MAX_SKIPPED_FRAMES: usize = 1024;

/// The two calls the pinger needs from a raw socket.
pub trait RawSocket {
    fn send_to(&self, buf: &[u8], dest: &SocketAddr) -> io::Result<usize>;
    fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, IpAddr)>;
}

impl RawSocket for Socket {
    fn send_to(&self, buf: &[u8], dest: &SocketAddr) -> io::Result<usize> {
        Socket::send_to(self, buf, &SockAddr::from(*dest))
    }

    fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, IpAddr)> {
        let (bytes, from) = Socket::recv_from(self, buf)?;
        let from = from.as_std()
            .ok_or_else(|| Error::new(ErrorKind::InvalidData, "reply from a non-IP address"))?;
        Ok((bytes, from.ip()))
    }
}

/// A reply that made it through filtering and validation.
#[derive(Debug)]
pub struct Received {
    pub packet: EchoPacket,
    /// Only IPv4 raw sockets hand us the IP header.
    pub ip: Option<IpHeader>,
    pub from: IpAddr,
    /// Size of the ICMP message.
    pub size: usize,
}

pub struct Pinger<S = Socket> {
    socket: S,
    destination: SocketAddr,
    family: Family,
    identifier: u16, // Used as 'identifier' word to match echo requests/replies
}

impl Pinger<Socket> {
    pub fn open(address: IpAddr, identifier: u16, ttl: Option<u32>) -> io::Result<Self> {
        // First obtain the raw socket
        let domain = if address.is_ipv6() { Domain::ipv6() } else { Domain::ipv4() };
        let protocol = if address.is_ipv6() { Protocol::icmpv6() } else { Protocol::icmpv4() };
        let stype = socket2::Type::raw().cloexec();
        let socket = Socket::new(domain, stype, Some(protocol))?;
        socket.set_read_timeout(Some(POLL_SLICE))?;

        let family = match address {
            IpAddr::V4(_) => {
                if let Some(ttl) = ttl {
                    socket.set_ttl(ttl)?;
                }
                Family::V4
            }
            IpAddr::V6(remote) => {
                if let Some(hops) = ttl {
                    socket.set_unicast_hops_v6(hops)?;
                }
                let local = match util::source_address(address)? {
                    IpAddr::V6(local) => local,
                    IpAddr::V4(_) => return Err(Error::new(ErrorKind::AddrNotAvailable, "no IPv6 source address")),
                };
                Family::V6 { local, remote }
            }
        };
        Ok(Pinger::with_socket(socket, address, family, identifier))
    }
}

impl<S: RawSocket> Pinger<S> {
    pub fn with_socket(socket: S, destination: IpAddr, family: Family, identifier: u16) -> Self {
        Pinger {
            socket,
            destination: SocketAddr::new(destination, 0), // port is ignored for ICMP
            family,
            identifier,
        }
    }

    pub fn family(&self) -> &Family {
        &self.family
    }

    pub fn identifier(&self) -> u16 {
        self.identifier
    }

    pub fn destination(&self) -> IpAddr {
        self.destination.ip()
    }

    /// Encode `packet` (stamping and checksumming it) and write it to the socket.
    pub fn send(&self, packet: &mut EchoPacket) -> Result<usize, IcmpError> {
        let bytes = packet.encode(&self.family)
            .map_err(|e| IcmpError::SendFailed(Error::new(ErrorKind::InvalidData, e.to_string())))?;
        self.socket.send_to(&bytes, &self.destination).map_err(IcmpError::SendFailed)
    }

    /// Read datagrams until one is an echo reply for our identifier.
    ///
    /// Our own requests (pinging the local host loops them back), replies to
    /// other processes and unrelated ICMP messages are dropped. Any real error
    /// is returned at once.
    pub fn receive(&self, buf: &mut [u8], deadline: Option<Instant>, cancel: &AtomicBool)
        -> Result<Received, IcmpError>
    {
        let mut skipped = 0;

        loop {
            let (bytes, from) = match self.socket.recv_from(buf) {
                Ok(r) => r,
                Err(e) if is_wakeup(&e) => {
                    check_wait(deadline, cancel)?;
                    continue;
                }
                Err(e) => return Err(IcmpError::ReceiveFailed(e)),
            };
            let frame = &buf[..bytes];

            // The IMCP portion will be located after the IP Header
            let (ip, icmp) = match self.family {
                Family::V4 => {
                    let ip = IpHeader::decode(frame)?;
                    (Some(ip), &frame[ip.header_len()..])
                }
                // The socket doesn't put the IPv6 header into our buffer
                Family::V6 { .. } => (None, frame),
            };

            let peek = EchoPacket::peek(icmp, &self.family)?;
            if let Some(reason) = self.skip_reason(&peek) {
                debug!("dropping frame from {}: {} (type={:?} id={} seq={})",
                    from, reason, peek.kind, peek.identifier, peek.sequence);
                skipped += 1;
                if deadline.is_none() && skipped >= MAX_SKIPPED_FRAMES {
                    return Err(IcmpError::Flooded(skipped));
                }
                check_wait(deadline, cancel)?;
                continue;
            }

            let seed = self.family.inbound_seed(from, icmp.len());
            let packet = EchoPacket::decode(icmp, &self.family, seed)?;

            return Ok(Received { packet, ip, from, size: icmp.len() });
        }
    }

    fn skip_reason(&self, peek: &HeaderPeek) -> Option<&'static str> {
        match peek.kind {
            EchoType::EchoRequest => Some("own echo request"),
            EchoType::EchoReply if peek.identifier != self.identifier => Some("foreign identifier"),
            EchoType::EchoReply => None,
            EchoType::Other(_) => Some("unrelated icmp type"),
        }
    }
}

fn is_wakeup(e: &io::Error) -> bool {
    matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted)
}

fn check_wait(deadline: Option<Instant>, cancel: &AtomicBool) -> Result<(), IcmpError> {
    if cancel.load(Ordering::SeqCst) {
        return Err(IcmpError::Interrupted);
    }
    match deadline {
        Some(d) if Instant::now() >= d => Err(IcmpError::TimedOut),
        _ => Ok(()),
    }
}
