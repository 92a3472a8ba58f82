use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, trace, warn};
use socket2::Socket;

use crate::error::IcmpError;
use crate::packet::{EchoPacket, Family, IpHeader};
use crate::ping::{Pinger, RawSocket, MAX_SKIPPED_FRAMES, POLL_SLICE};
use crate::stats::RoundTripStats;

const RECV_BUFFER_LEN: usize = 4096;

/// Where the current sequence number stands.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Sent,
    Completed,
    /// Only reachable with a receive timeout; the sequence is lost, the run goes on.
    TimedOut,
    Failed,
}

/// Everything known about one answered request, for printing.
#[derive(Debug)]
pub struct Reply {
    pub family: Family,
    pub sequence: u16,
    pub rtt: Duration,
    pub size: usize,
    pub from: IpAddr,
    pub ip: Option<IpHeader>,
    pub packet: EchoPacket,
}

impl Reply {
    pub fn rtt_ms(&self) -> f64 {
        self.rtt.as_secs_f64() * 1000.0
    }
}

#[derive(Debug)]
pub enum Outcome {
    Completed(Reply),
    Lost(u16),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Finish {
    Done,
    Interrupted,
}

/// Sequence numbers to use. A count of 0 never ends and wraps around
/// after 65535, anything else yields exactly `count` numbers from 0.
#[derive(Clone, Debug)]
pub struct Sequences {
    next: u16,
    remaining: Option<u16>,
}

impl Sequences {
    pub fn new(count: u16) -> Sequences {
        Sequences {
            next: 0,
            remaining: if count == 0 { None } else { Some(count) },
        }
    }
}

impl Iterator for Sequences {
    type Item = u16;

    fn next(&mut self) -> Option<u16> {
        match self.remaining {
            Some(0) => return None,
            Some(ref mut n) => *n -= 1,
            None => {}
        }
        let sequence = self.next;
        self.next = self.next.wrapping_add(1);
        Some(sequence)
    }
}

pub struct Session<S = Socket> {
    pinger: Pinger<S>,
    stats: RoundTripStats,
    phase: Phase,
    timeout: Option<Duration>,
    buf: Vec<u8>,
}

impl<S: RawSocket> Session<S> {
    pub fn new(pinger: Pinger<S>, timeout: Option<Duration>) -> Self {
        Session {
            pinger,
            stats: RoundTripStats::default(),
            phase: Phase::Idle,
            timeout,
            buf: vec![0; RECV_BUFFER_LEN],
        }
    }

    pub fn stats(&self) -> RoundTripStats {
        self.stats
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Send one request and wait for its reply.
    pub fn round_trip(&mut self, sequence: u16, cancel: &AtomicBool) -> Result<Outcome, IcmpError> {
        self.transition(sequence, Phase::Idle);

        let mut packet = EchoPacket::request(self.pinger.identifier(), sequence);
        if let Err(e) = self.pinger.send(&mut packet) {
            self.transition(sequence, Phase::Failed);
            return Err(e);
        }
        self.stats.record_sent();
        self.transition(sequence, Phase::Sent);

        // A timeout too far out to represent is the same as no timeout
        let deadline = self.timeout.and_then(|t| Instant::now().checked_add(t));
        let mut stale = 0;
        loop {
            match self.pinger.receive(&mut self.buf, deadline, cancel) {
                Ok(received) if received.packet.sequence != sequence => {
                    debug!("dropping reply with sequence {} while waiting for {}",
                        received.packet.sequence, sequence);
                    stale += 1;
                    if deadline.is_none() && stale >= MAX_SKIPPED_FRAMES {
                        self.transition(sequence, Phase::Failed);
                        return Err(IcmpError::Flooded(stale));
                    }
                }
                Ok(received) => {
                    let reply = Reply {
                        family: *self.pinger.family(),
                        sequence,
                        rtt: received.packet.elapsed(),
                        size: received.size,
                        from: received.from,
                        ip: received.ip,
                        packet: received.packet,
                    };
                    self.stats.record_reply(reply.rtt_ms());
                    self.transition(sequence, Phase::Completed);
                    return Ok(Outcome::Completed(reply));
                }
                Err(IcmpError::TimedOut) => {
                    warn!("no reply for icmp_seq={} within {:?}", sequence, self.timeout);
                    self.transition(sequence, Phase::TimedOut);
                    return Ok(Outcome::Lost(sequence));
                }
                Err(IcmpError::Interrupted) => return Err(IcmpError::Interrupted),
                Err(e) => {
                    self.transition(sequence, Phase::Failed);
                    return Err(e);
                }
            }
        }
    }

    /// Ping every sequence number in `sequences`, `interval` apart, handing
    /// each outcome to `on_outcome`. Stops early when `cancel` is raised.
    pub fn run<F>(&mut self, sequences: Sequences, interval: Duration, cancel: &AtomicBool, mut on_outcome: F)
        -> Result<Finish, IcmpError>
        where F: FnMut(&Outcome)
    {
        for (i, sequence) in sequences.enumerate() {
            if i > 0 {
                pause(interval, cancel);
            }
            if cancel.load(Ordering::SeqCst) {
                return Ok(Finish::Interrupted);
            }

            match self.round_trip(sequence, cancel) {
                Ok(outcome) => on_outcome(&outcome),
                Err(IcmpError::Interrupted) => return Ok(Finish::Interrupted),
                Err(e) => return Err(e),
            }
        }
        Ok(Finish::Done)
    }

    fn transition(&mut self, sequence: u16, phase: Phase) {
        trace!("icmp_seq={}: {:?} -> {:?}", sequence, self.phase, phase);
        self.phase = phase;
    }
}

/// Sleep for `interval`, waking up early if `cancel` is raised.
fn pause(interval: Duration, cancel: &AtomicBool) {
    let end = Instant::now().checked_add(interval);
    loop {
        if cancel.load(Ordering::SeqCst) {
            return;
        }
        let slice = match end {
            Some(end) => {
                let now = Instant::now();
                if now >= end {
                    return;
                }
                POLL_SLICE.min(end - now)
            }
            None => POLL_SLICE,
        };
        thread::sleep(slice);
    }
}
