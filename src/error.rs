use std::error::Error;
use std::fmt;
use std::io;

/// Everything that can end a round trip. All of these abort the run except
/// `TimedOut`, which only loses the current sequence, and `Interrupted`,
/// which stops it cleanly.
#[derive(Debug)]
pub enum IcmpError {
    SendFailed(io::Error),
    ReceiveFailed(io::Error),
    InvalidIpChecksum,
    InvalidIcmpChecksum,
    MalformedPacket { len: usize, needed: usize },
    TimedOut,
    Interrupted,
    /// Too many unrelated frames in a row without a receive timeout to bound them.
    Flooded(usize),
}

impl fmt::Display for IcmpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IcmpError::SendFailed(_) => write!(f, "error while sending message to the socket"),
            IcmpError::ReceiveFailed(_) => write!(f, "error while receiving message from the socket"),
            IcmpError::InvalidIpChecksum => write!(f, "received ip frame with invalid checksum"),
            IcmpError::InvalidIcmpChecksum => write!(f, "received icmp packet with invalid checksum"),
            IcmpError::MalformedPacket { len, needed } =>
                write!(f, "received malformed packet: {} bytes, expected at least {}", len, needed),
            IcmpError::TimedOut => write!(f, "timed out waiting for a reply"),
            IcmpError::Interrupted => write!(f, "interrupted"),
            IcmpError::Flooded(n) => write!(f, "gave up after skipping {} unrelated frames", n),
        }
    }
}

impl Error for IcmpError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            IcmpError::SendFailed(e) | IcmpError::ReceiveFailed(e) => Some(e),
            _ => None,
        }
    }
}
