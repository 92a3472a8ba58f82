use std::io::{Result, Error, ErrorKind};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, UdpSocket};

use dns_lookup::lookup_host;

use crate::config::IpVersion;

/// Resolve `dest` to an address of the requested family.
/// Literal addresses are accepted as-is as long as the family matches.
pub fn resolve_dest(dest: &str, version: IpVersion) -> Result<IpAddr> {
    let candidates = match dest.parse::<IpAddr>() {
        Ok(addr) => vec![addr],
        Err(_) => lookup_host(dest)?,
    };

    candidates.into_iter()
        .find(|addr| version.matches(addr))
        .ok_or_else(|| Error::new(ErrorKind::NotFound,
            format!("no {} address found for {}", version, dest)))
}

/// Find the local address the kernel would pick to reach `dest`.
///
/// Connecting a UDP socket sends nothing on the wire, it only runs route
/// selection, which is exactly what the ICMPv6 pseudo-header needs.
pub fn source_address(dest: IpAddr) -> Result<IpAddr> {
    let unspecified: IpAddr = match dest {
        IpAddr::V4(_) => Ipv4Addr::UNSPECIFIED.into(),
        IpAddr::V6(_) => Ipv6Addr::UNSPECIFIED.into(),
    };
    let socket = UdpSocket::bind((unspecified, 0))?;
    socket.connect((dest, 9))?;
    Ok(socket.local_addr()?.ip())
}

/// One's complement sum of all 16 bit words in `data` (RFC 1071), starting
/// from `seed`. Words are read big endian, a trailing odd byte is the high
/// byte of a zero padded word. The result is folded back to 16 bits so it can
/// seed another span.
pub fn partial_sum(data: &[u8], seed: u32) -> u32 {
    fold(sum_be_words(data) + seed as u64)
}

/// RFC 1071 checksum of `data`, seeded with a partial sum from a prior span
/// (0 for a fresh computation).
pub fn checksum(data: &[u8], seed: u32) -> u16 {
    !(fold(sum_be_words(data) + seed as u64) as u16) // The checksum field should be the ones complement of the sum
}

/// Same as [`checksum`] but the word at word offset `skipword` is summed as
/// zero. Verifying a received header this way needs no mutable copy.
pub fn checksum_skipping(data: &[u8], skipword: usize, seed: u32) -> u16 {
    // The skipped word starts on an even offset, so both halves keep their word alignment
    let start = (skipword * 2).min(data.len());
    let end = (start + 2).min(data.len());
    checksum(&data[end..], partial_sum(&data[..start], seed))
}

/// Compute the checksum of `data` (with the field at word offset `location`
/// treated as zero) and store it there big endian.
#[allow(clippy::double_parens)] // For stylistic reasons
pub fn set_checksum(data: &mut [u8], location: usize, seed: u32) {
    let sum = checksum_skipping(data, location, seed);
    data[location*2    ] = ((sum & 0xFF00) >> 8) as u8;
    data[location*2 + 1] = ((sum & 0x00FF)     ) as u8;
}

/// Recompute the checksum of `data` with the stored field at `location`
/// treated as zero and compare it to the stored value.
pub fn verify_checksum(data: &[u8], location: usize, seed: u32) -> bool {
    if data.len() < location * 2 + 2 {
        return false;
    }
    let stored = u16::from_be_bytes([data[location*2], data[location*2 + 1]]);
    checksum_skipping(data, location, seed) == stored
}

fn fold(mut sum: u64) -> u32 {
    while sum >> 16 != 0 {
        sum = (sum >> 16) + (sum & 0xFFFF);
    }
    sum as u32
}

/// Sum all words (16 bit chunks) in the given data. Each word is treated as big endian.
fn sum_be_words(data: &[u8]) -> u64 {
    data.chunks(2)
        .map(|word| match *word {
            [wh] => u16::from_be_bytes([wh, 0]),
            [wh, wl] => u16::from_be_bytes([wh, wl]),
            _ => unreachable!(),
        })
        .map(u64::from)
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_buffers_sum_to_all_ones() {
        for len in &[0usize, 2, 8, 24, 40] {
            assert_eq!(checksum(&vec![0u8; *len], 0), 0xFFFF);
        }
    }

    #[test]
    fn odd_trailing_byte_is_high_byte() {
        assert_eq!(checksum(&[0xAB], 0), !0xAB00);
        // 0x0102 + 0x0300
        assert_eq!(checksum(&[0x01, 0x02, 0x03], 0), !0x0402);
    }

    #[test]
    fn carries_are_folded() {
        // 0xFFFF + 0x0001 = 0x10000 -> 0x0001
        assert_eq!(checksum(&[0xFF, 0xFF, 0x00, 0x01], 0), !0x0001);
        assert_eq!(partial_sum(&[0xFF, 0xFF, 0xFF, 0xFF], 0), 0xFFFF);
    }

    #[test]
    fn rfc1071_example() {
        // Example from RFC 1071 section 3: sum is 0xDDF2.
        let data = [0x00, 0x01, 0xF2, 0x03, 0xF4, 0xF5, 0xF6, 0xF7];
        assert_eq!(partial_sum(&data, 0), 0xDDF2);
        assert_eq!(checksum(&data, 0), !0xDDF2);
    }

    #[test]
    fn stored_checksum_verifies() {
        let mut packet = [8, 0, 0, 0, 0x12, 0x34, 0x00, 0x07, 0xDE, 0xAD, 0xBE];
        set_checksum(&mut packet, 1, 0);
        assert!(verify_checksum(&packet, 1, 0));
        // Summing the whole thing including the stored field gives zero.
        assert_eq!(checksum(&packet, 0), 0);

        packet[9] ^= 0x01;
        assert!(!verify_checksum(&packet, 1, 0));
    }

    #[test]
    fn seed_changes_result() {
        let packet = [128, 0, 0, 0, 0x12, 0x34, 0x00, 0x01];
        let seed = partial_sum(&[0x20, 0x01, 0x0d, 0xb8], 0);
        assert_ne!(checksum(&packet, seed), checksum(&packet, 0));
        // Seeding equals summing the concatenation.
        let joined = [0x20, 0x01, 0x0d, 0xb8, 128, 0, 0, 0, 0x12, 0x34, 0x00, 0x01];
        assert_eq!(checksum(&packet, seed), checksum(&joined, 0));
    }

    #[test]
    fn skipping_a_word_equals_zeroing_it() {
        let data = [0x45, 0x00, 0x00, 0x1c, 0xab, 0xcd, 0x12, 0x34, 0x40];
        let mut zeroed = data;
        zeroed[2] = 0;
        zeroed[3] = 0;
        assert_eq!(checksum_skipping(&data, 1, 0), checksum(&zeroed, 0));
        assert_eq!(checksum_skipping(&data, 1, 0x1234), checksum(&zeroed, 0x1234));

        // Skipping past the end or the odd trailing byte never reads out of bounds
        assert_eq!(checksum_skipping(&data, 10, 0), checksum(&data, 0));
        assert_eq!(checksum_skipping(&data, 4, 0), checksum(&data[..8], 0));
    }

    #[test]
    fn verify_rejects_short_buffer() {
        assert!(!verify_checksum(&[0x45], 5, 0));
    }

    #[test]
    fn resolve_literal_respects_family() {
        assert_eq!(resolve_dest("127.0.0.1", IpVersion::V4).unwrap(), IpAddr::from([127, 0, 0, 1]));
        assert!(resolve_dest("127.0.0.1", IpVersion::V6).is_err());
        assert_eq!(resolve_dest("::1", IpVersion::V6).unwrap(), IpAddr::V6(Ipv6Addr::LOCALHOST));
    }
}
