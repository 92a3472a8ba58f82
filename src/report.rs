use std::io::{self, IsTerminal};
use std::net::IpAddr;

use colored::*;

use crate::config::ColorMode;
use crate::packet::{EchoPacket, Family, IpHeader};
use crate::session::Reply;
use crate::stats::RoundTripStats;

pub fn configure_colors(mode: ColorMode) {
    let enabled = match mode {
        ColorMode::Always => true,
        ColorMode::Never => false,
        ColorMode::Auto => io::stdout().is_terminal(),
    };
    colored::control::set_override(enabled);
}

pub fn greeting(host: &str, address: IpAddr, data_bytes: usize) -> String {
    format!("{} {} ({}): {} data bytes", "PING".cyan(), host.bold(), address, data_bytes)
}

pub fn reply_line(reply: &Reply) -> String {
    // IPv4 counts the IP header as well, IPv6 sockets never show it to us
    let bytes = reply.size + reply.ip.map_or(0, |ip| ip.header_len());
    format!("{} bytes from {}: icmp_seq={} time={}ms",
        bytes, reply.from.to_string().underline(), reply.sequence.to_string().bold(),
        format!("{:.3}", reply.rtt_ms()).bold())
}

pub fn lost_line(sequence: u16) -> String {
    format!("Request timeout for icmp_seq={}", sequence.to_string().red().bold())
}

/// Header dump printed under each reply with `-v`.
pub fn verbose_block(reply: &Reply) -> String {
    let mut out = String::new();
    if let Some(ip) = &reply.ip {
        out.push_str(&ip_header_block(ip));
    }
    out.push_str(&icmp_header_block(&reply.packet, &reply.family));
    out.push_str(&"=".repeat(55));
    out
}

fn section(title: &str) -> String {
    let sep = "=====".white().bold();
    format!("\t{} {} {}\n", sep, title, sep)
}

fn ip_header_block(ip: &IpHeader) -> String {
    // frag_off and type of service are skipped
    let mut out = section("IPv4 Header");
    out.push_str(&format!("\tVersion: {}\n", ip.version));
    out.push_str(&format!("\tHeader Length: {}\n", ip.header_length_words));
    out.push_str(&format!("\tTotal Length: {}\n", ip.total_length));
    out.push_str(&format!("\tId: {}\n", ip.identifier));
    out.push_str(&format!("\tTime To Live: {}\n", ip.ttl));
    out.push_str(&format!("\tProtocol: {}\n", ip.protocol));
    out.push_str(&format!("\tChecksum (verified): {}\n", ip.checksum));
    out.push_str(&format!("\tSource IP: {}\n", ip.source));
    out.push_str(&format!("\tDestination IP: {}\n", ip.destination));
    out
}

fn icmp_header_block(packet: &EchoPacket, family: &Family) -> String {
    let mut out = section("ICMP Header");
    out.push_str(&format!("\tType: {}\n", packet.kind.to_wire(family)));
    out.push_str(&format!("\tCode: {}\n", packet.code));
    out.push_str(&format!("\tChecksum (verified): {}\n", packet.checksum));
    out.push_str(&format!("\tId: {}\n", packet.identifier));
    out.push_str(&format!("\tSeq: {}\n", packet.sequence));
    out
}

pub fn summary(host: &str, stats: &RoundTripStats) -> String {
    let sep = "---".white().bold();
    let mut out = format!("{} {} {} {}\n", sep, host.bold(), "ping statistics".cyan(), sep);
    out.push_str(&format!("{} packets transmitted, {} packets received, {}% packet loss",
        stats.sent.to_string().bold(), stats.received.to_string().bold(),
        format!("{:.0}", stats.loss_percent()).bold()));

    if let Some(avg) = stats.mean_ms() {
        out.push_str(&format!("\nround-trip min/avg/max = {:.2}/{:.2}/{:.2} ms",
            stats.min_ms, avg, stats.max_ms));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use std::time::Duration;

    use crate::packet::EchoType;

    fn reply() -> Reply {
        Reply {
            family: Family::V4,
            sequence: 4,
            rtt: Duration::from_micros(1500),
            size: 24,
            from: IpAddr::V4(Ipv4Addr::new(192, 0, 2, 7)),
            ip: Some(IpHeader {
                version: 4,
                header_length_words: 5,
                total_length: 44,
                identifier: 7,
                ttl: 57,
                protocol: 1,
                checksum: 0xABCD,
                source: Ipv4Addr::new(192, 0, 2, 7),
                destination: Ipv4Addr::new(10, 0, 0, 1),
            }),
            packet: EchoPacket {
                kind: EchoType::EchoReply,
                code: 0,
                checksum: 0x1234,
                identifier: 99,
                sequence: 4,
                created: Duration::default(),
            },
        }
    }

    #[test]
    fn plain_lines() {
        colored::control::set_override(false);

        assert_eq!(reply_line(&reply()), "44 bytes from 192.0.2.7: icmp_seq=4 time=1.500ms");
        let mut v6 = reply();
        v6.ip = None;
        assert_eq!(reply_line(&v6), "24 bytes from 192.0.2.7: icmp_seq=4 time=1.500ms");
        assert_eq!(lost_line(9), "Request timeout for icmp_seq=9");
        assert_eq!(greeting("example.org", IpAddr::V4(Ipv4Addr::LOCALHOST), 24),
            "PING example.org (127.0.0.1): 24 data bytes");
    }

    #[test]
    fn verbose_dump_has_both_headers() {
        colored::control::set_override(false);

        let block = verbose_block(&reply());
        assert!(block.contains("IPv4 Header"));
        assert!(block.contains("\tTime To Live: 57\n"));
        assert!(block.contains("\tDestination IP: 10.0.0.1\n"));
        assert!(block.contains("ICMP Header"));
        assert!(block.contains("\tType: 0\n"));
        assert!(block.contains("\tSeq: 4\n"));

        let mut v6 = reply();
        v6.ip = None;
        v6.family = Family::V6 { local: "::1".parse().unwrap(), remote: "::1".parse().unwrap() };
        let block = verbose_block(&v6);
        assert!(!block.contains("IPv4 Header"));
        assert!(block.contains("\tType: 129\n"));
    }

    #[test]
    fn summary_lines() {
        colored::control::set_override(false);

        let mut stats = RoundTripStats::default();
        for ms in &[10.0, 5.0, 20.0] {
            stats.record_sent();
            stats.record_reply(*ms);
        }
        stats.record_sent();
        assert_eq!(summary("host", &stats),
            "--- host ping statistics ---\n\
             4 packets transmitted, 3 packets received, 25% packet loss\n\
             round-trip min/avg/max = 5.00/11.67/20.00 ms");

        assert_eq!(summary("host", &RoundTripStats::default()),
            "--- host ping statistics ---\n\
             0 packets transmitted, 0 packets received, 0% packet loss");
    }
}
