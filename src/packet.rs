use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use bincode::Options;
use serde::{Deserialize, Serialize};

use crate::error::IcmpError;
use crate::util;

pub const ICMP_HEADER_LEN: usize = 8;
const TIMESTAMP_LEN: usize = 16;
/// Header plus the creation timestamp riding in the payload.
pub const ECHO_PACKET_LEN: usize = ICMP_HEADER_LEN + TIMESTAMP_LEN;
pub const IPV4_HEADER_LEN: usize = 20;
pub const PSEUDO_HEADER_LEN: usize = 40;
pub const ICMPV6_NEXT_HEADER: u8 = 58;

// Word offsets of the checksum fields
const ICMP_CHECKSUM_WORD: usize = 1;
const IPV4_CHECKSUM_WORD: usize = 5;

const ECHO_REQUEST_V4: u8 = 8;
const ECHO_REQUEST_V6: u8 = 128;
const ECHO_REPLY_V4: u8 = 0;
const ECHO_REPLY_V6: u8 = 129;

/// Big endian, fixed width integers, which is what every header on the wire uses.
fn coder() -> impl Options {
    bincode::DefaultOptions::new()
        .with_big_endian()
        .with_fixint_encoding()
        .allow_trailing_bytes()
}

#[derive(Serialize, Deserialize, Debug)]
struct ICMPEchoPacket {
    message_type: u8,
    message_code: u8,
    checksum: u16,
    identifier: u16,
    sequence_num: u16,
}

#[derive(Serialize, Deserialize, Debug)]
struct CreationTimestamp {
    secs: u64,
    nanos: u64,
}

#[derive(Serialize, Deserialize)]
struct IPv4Header {
    version_and_header_len: u8,
    type_of_service: u8,
    datagram_length: u16,
    ip_identifier: u16,
    flags_and_5frag_offset: u8, // flags are u3
    rest_of_frag_offset: u8,
    ttl: u8,
    protocol: u8,
    checksum: u16,
    source_ip: u32,
    destination_ip: u32,
}

/// Time on a clock private to this process. Only ever compared against
/// itself, so the epoch does not matter as long as it never goes backwards.
pub fn monotonic_now() -> Duration {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    EPOCH.get_or_init(Instant::now).elapsed()
}

/// Which ICMP flavour we speak. IPv6 carries the addresses needed for the
/// pseudo-header, IPv4 needs nothing extra.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Family {
    V4,
    V6 { local: Ipv6Addr, remote: Ipv6Addr },
}

impl Family {
    pub fn echo_request(&self) -> u8 {
        match self {
            Family::V4 => ECHO_REQUEST_V4,
            Family::V6 { .. } => ECHO_REQUEST_V6,
        }
    }

    pub fn echo_reply(&self) -> u8 {
        match self {
            Family::V4 => ECHO_REPLY_V4,
            Family::V6 { .. } => ECHO_REPLY_V6,
        }
    }

    /// Checksum seed for a packet of `len` bytes we are about to send.
    pub fn outbound_seed(&self, len: usize) -> u32 {
        match *self {
            Family::V4 => 0,
            Family::V6 { local, remote } => PseudoHeader::new(local, remote, len as u32).seed(),
        }
    }

    /// Checksum seed for a packet of `len` bytes received from `from`.
    pub fn inbound_seed(&self, from: IpAddr, len: usize) -> u32 {
        match *self {
            Family::V4 => 0,
            Family::V6 { local, remote } => {
                let source = match from {
                    IpAddr::V6(addr) => addr,
                    IpAddr::V4(_) => remote,
                };
                PseudoHeader::new(source, local, len as u32).seed()
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EchoType {
    EchoRequest,
    EchoReply,
    Other(u8),
}

impl EchoType {
    pub fn from_wire(family: &Family, value: u8) -> EchoType {
        if value == family.echo_request() {
            EchoType::EchoRequest
        } else if value == family.echo_reply() {
            EchoType::EchoReply
        } else {
            EchoType::Other(value)
        }
    }

    pub fn to_wire(self, family: &Family) -> u8 {
        match self {
            EchoType::EchoRequest => family.echo_request(),
            EchoType::EchoReply => family.echo_reply(),
            EchoType::Other(value) => value,
        }
    }
}

/// ICMP echo message with the creation timestamp it carries as payload.
/// Fields are host order, conversion happens in `encode`/`decode`.
#[derive(Clone, Debug, PartialEq)]
pub struct EchoPacket {
    pub kind: EchoType,
    pub code: u8,
    pub checksum: u16,
    pub identifier: u16,
    pub sequence: u16,
    pub created: Duration,
}

/// The fixed 8 byte header, enough to decide whether a frame is ours.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HeaderPeek {
    pub kind: EchoType,
    pub identifier: u16,
    pub sequence: u16,
}

impl EchoPacket {
    pub fn request(identifier: u16, sequence: u16) -> EchoPacket {
        EchoPacket {
            kind: EchoType::EchoRequest,
            code: 0,
            checksum: 0,
            identifier,
            sequence,
            created: Duration::default(),
        }
    }

    /// Stamp the packet with the current time, compute its checksum and
    /// return the bytes to put on the wire. The timestamp is taken right
    /// before checksumming so the checksum covers exactly what is sent.
    pub fn encode(&mut self, family: &Family) -> bincode::Result<Vec<u8>> {
        self.created = monotonic_now();
        self.checksum = 0;

        let mut bytes = self.serialize(family)?;
        let seed = family.outbound_seed(bytes.len());
        util::set_checksum(&mut bytes, ICMP_CHECKSUM_WORD, seed);
        self.checksum = u16::from_be_bytes([bytes[2], bytes[3]]);

        Ok(bytes)
    }

    fn serialize(&self, family: &Family) -> bincode::Result<Vec<u8>> {
        let mut bytes = coder().serialize(&ICMPEchoPacket {
            message_type: self.kind.to_wire(family),
            message_code: self.code,
            checksum: self.checksum,
            identifier: self.identifier,
            sequence_num: self.sequence,
        })?;
        coder().serialize_into(&mut bytes, &CreationTimestamp {
            secs: self.created.as_secs(),
            nanos: self.created.subsec_nanos() as u64,
        })?;
        Ok(bytes)
    }

    /// Read the type, identifier and sequence without touching the payload
    /// or the checksum.
    pub fn peek(bytes: &[u8], family: &Family) -> Result<HeaderPeek, IcmpError> {
        let header = decode_header(bytes)?;
        Ok(HeaderPeek {
            kind: EchoType::from_wire(family, header.message_type),
            identifier: header.identifier,
            sequence: header.sequence_num,
        })
    }

    /// Validate and decode a received ICMP message. `seed` follows the same
    /// convention as when building: 0 for IPv4, the pseudo-header sum for IPv6.
    pub fn decode(bytes: &[u8], family: &Family, seed: u32) -> Result<EchoPacket, IcmpError> {
        if bytes.len() < ECHO_PACKET_LEN {
            return Err(IcmpError::MalformedPacket { len: bytes.len(), needed: ECHO_PACKET_LEN });
        }
        if !util::verify_checksum(bytes, ICMP_CHECKSUM_WORD, seed) {
            return Err(IcmpError::InvalidIcmpChecksum);
        }

        let header = decode_header(bytes)?;
        let stamp: CreationTimestamp = coder()
            .deserialize(&bytes[ICMP_HEADER_LEN..])
            .map_err(|_| IcmpError::MalformedPacket { len: bytes.len(), needed: ECHO_PACKET_LEN })?;

        Ok(EchoPacket {
            kind: EchoType::from_wire(family, header.message_type),
            code: header.message_code,
            checksum: header.checksum,
            identifier: header.identifier,
            sequence: header.sequence_num,
            created: Duration::from_secs(stamp.secs).saturating_add(Duration::from_nanos(stamp.nanos)),
        })
    }

    /// Time since this packet was created, on the same clock it was stamped with.
    pub fn elapsed(&self) -> Duration {
        monotonic_now().checked_sub(self.created).unwrap_or_default()
    }
}

fn decode_header(bytes: &[u8]) -> Result<ICMPEchoPacket, IcmpError> {
    if bytes.len() < ICMP_HEADER_LEN {
        return Err(IcmpError::MalformedPacket { len: bytes.len(), needed: ICMP_HEADER_LEN });
    }
    coder()
        .deserialize(bytes)
        .map_err(|_| IcmpError::MalformedPacket { len: bytes.len(), needed: ICMP_HEADER_LEN })
}

/// ICMPv6 pseudo-header (RFC 4443 section 2.3). Only ever fed to the
/// checksum, never sent.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PseudoHeader {
    pub source: Ipv6Addr,
    pub destination: Ipv6Addr,
    pub upper_layer_length: u32,
    pub next_header: u8,
}

impl PseudoHeader {
    pub fn new(source: Ipv6Addr, destination: Ipv6Addr, upper_layer_length: u32) -> PseudoHeader {
        PseudoHeader { source, destination, upper_layer_length, next_header: ICMPV6_NEXT_HEADER }
    }

    pub fn to_bytes(&self) -> [u8; PSEUDO_HEADER_LEN] {
        let mut bytes = [0u8; PSEUDO_HEADER_LEN];
        bytes[..16].copy_from_slice(&self.source.octets());
        bytes[16..32].copy_from_slice(&self.destination.octets());
        bytes[32..36].copy_from_slice(&self.upper_layer_length.to_be_bytes());
        // 3 bytes of zeros
        bytes[39] = self.next_header;
        bytes
    }

    /// Partial sum to seed the ICMPv6 checksum with.
    pub fn seed(&self) -> u32 {
        util::partial_sum(&self.to_bytes(), 0)
    }
}

/// IPv4 header in front of every datagram an IPv4 raw socket hands us.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IpHeader {
    pub version: u8,
    pub header_length_words: u8,
    pub total_length: u16,
    pub identifier: u16,
    pub ttl: u8,
    pub protocol: u8,
    pub checksum: u16,
    pub source: Ipv4Addr,
    pub destination: Ipv4Addr,
}

impl IpHeader {
    /// Parse and checksum-verify the header at the start of `bytes`.
    pub fn decode(bytes: &[u8]) -> Result<IpHeader, IcmpError> {
        if bytes.len() < IPV4_HEADER_LEN {
            return Err(IcmpError::MalformedPacket { len: bytes.len(), needed: IPV4_HEADER_LEN });
        }
        let raw: IPv4Header = coder()
            .deserialize(bytes)
            .map_err(|_| IcmpError::MalformedPacket { len: bytes.len(), needed: IPV4_HEADER_LEN })?;

        // The 'header length' nibble counts 32 bit words
        let header_length_words = raw.version_and_header_len & 0x0F;
        let header_len = header_length_words as usize * 4;
        if header_len < IPV4_HEADER_LEN || bytes.len() < header_len {
            return Err(IcmpError::MalformedPacket {
                len: bytes.len(),
                needed: header_len.max(IPV4_HEADER_LEN),
            });
        }
        if !util::verify_checksum(&bytes[..header_len], IPV4_CHECKSUM_WORD, 0) {
            return Err(IcmpError::InvalidIpChecksum);
        }

        Ok(IpHeader {
            version: raw.version_and_header_len >> 4,
            header_length_words,
            total_length: raw.datagram_length,
            identifier: raw.ip_identifier,
            ttl: raw.ttl,
            protocol: raw.protocol,
            checksum: raw.checksum,
            source: Ipv4Addr::from(raw.source_ip),
            destination: Ipv4Addr::from(raw.destination_ip),
        })
    }

    pub fn header_len(&self) -> usize {
        self.header_length_words as usize * 4
    }
}
