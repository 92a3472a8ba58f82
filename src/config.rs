use std::fmt;
use std::net::IpAddr;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::{App, AppSettings, Arg, ArgMatches};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IpVersion {
    V4,
    V6,
}

impl IpVersion {
    pub fn matches(self, addr: &IpAddr) -> bool {
        match self {
            IpVersion::V4 => addr.is_ipv4(),
            IpVersion::V6 => addr.is_ipv6(),
        }
    }
}

impl fmt::Display for IpVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IpVersion::V4 => write!(f, "IPv4"),
            IpVersion::V6 => write!(f, "IPv6"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColorMode {
    Auto,
    Always,
    Never,
}

impl ColorMode {
    fn parse(s: &str) -> Option<ColorMode> {
        match s {
            "auto" => Some(ColorMode::Auto),
            "always" => Some(ColorMode::Always),
            "never" => Some(ColorMode::Never),
            _ => None,
        }
    }
}

/// Run configuration. Built once from the command line and never mutated.
#[derive(Clone, Debug)]
pub struct Config {
    pub ip: IpVersion,
    pub hostname: String,
    /// How many echo requests to send, 0 means until interrupted.
    pub count: u16,
    pub verbosity: u64,
    pub color: ColorMode,
    /// How long to wait for each reply. `None` blocks until a reply or an error.
    pub timeout: Option<Duration>,
    pub interval: Duration,
    pub ttl: Option<u32>,
}

pub fn app<'a, 'b>() -> App<'a, 'b> {
    App::new("rping")
        .setting(AppSettings::ColoredHelp)
        .version("v1.0")
        .author("Bryan Becar <becar.bryan@gmail.com>")
        .about("Send ICMP ECHO_REQUEST packets to network hosts.")
        .arg(Arg::with_name("DESTINATION")
            .help("Hostname or IP adddress")
            .required(true)
            .index(1))
        .arg(Arg::with_name("count")
            .help("Stop after sending NUM packets, 0 pings until interrupted [0; 65535]")
            .short("c")
            .long("count")
            .value_name("NUM")
            .takes_value(true))
        .arg(Arg::with_name("ip4")
            .help("Use IPv4 for sending packets (default)")
            .short("4")
            .long("ip4")
            .conflicts_with("ip6"))
        .arg(Arg::with_name("ip6")
            .help("Use IPv6 for sending packets")
            .short("6")
            .long("ip6"))
        .arg(Arg::with_name("color")
            .help("Colorize the output")
            .long("color")
            .value_name("WHEN")
            .possible_values(&["auto", "always", "never"])
            .takes_value(true))
        .arg(Arg::with_name("verbose")
            .help("Verbose output, dumps the headers of every reply")
            .short("v")
            .long("verbose")
            .multiple(true))
        .arg(Arg::with_name("timeout")
            .help("Set how long to wait for each pong before counting it lost (Default: wait forever)")
            .short("W")
            .takes_value(true))
        .arg(Arg::with_name("interval")
            .help("Set how long to wait in between ping (Default 1s)")
            .short("i")
            .takes_value(true))
        .arg(Arg::with_name("ttl")
            .help("Set ttl (hop limit for IPv6) on outgoing packets")
            .short("t")
            .takes_value(true))
}

impl Config {
    pub fn from_matches(matches: &ArgMatches<'_>) -> Result<Config> {
        let hostname = matches.value_of("DESTINATION")
            .ok_or_else(|| anyhow!("missing destination"))?
            .to_string();

        let ip = if matches.is_present("ip6") { IpVersion::V6 } else { IpVersion::V4 };

        let count = match matches.value_of("count") {
            Some(c) => c.parse::<u16>()
                .with_context(|| format!("valid count range is [0; {}], got '{}'", u16::MAX, c))?,
            None => 0,
        };

        let color = match matches.value_of("color") {
            Some(when) => ColorMode::parse(when)
                .ok_or_else(|| anyhow!("'{}': valid values: auto, always, never", when))?,
            None => ColorMode::Auto,
        };

        let timeout = matches.value_of("timeout")
            .map(|t| humantime::parse_duration(t)
                .with_context(|| format!("invalid duration for timeout (ex: 1s, 400ms, 1m): '{}'", t)))
            .transpose()?;

        let interval = matches.value_of("interval").unwrap_or("1s");
        let interval = humantime::parse_duration(interval)
            .with_context(|| format!("invalid duration for interval (ex: 1s, 400ms, 1m): '{}'", interval))?;

        let ttl = matches.value_of("ttl")
            .map(|ttl| ttl.parse::<u32>()
                .with_context(|| format!("invalid ttl (ex: 64): '{}'", ttl)))
            .transpose()?;

        Ok(Config {
            ip,
            hostname,
            count,
            verbosity: matches.occurrences_of("verbose"),
            color,
            timeout,
            interval,
            ttl,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Config> {
        let matches = app().get_matches_from_safe(args.to_vec())?;
        Config::from_matches(&matches)
    }

    #[test]
    fn defaults() {
        let config = parse(&["rping", "localhost"]).unwrap();
        assert_eq!(config.hostname, "localhost");
        assert_eq!(config.ip, IpVersion::V4);
        assert_eq!(config.count, 0);
        assert_eq!(config.verbosity, 0);
        assert_eq!(config.color, ColorMode::Auto);
        assert_eq!(config.timeout, None);
        assert_eq!(config.interval, Duration::from_secs(1));
        assert_eq!(config.ttl, None);
    }

    #[test]
    fn all_options() {
        let config = parse(&[
            "rping", "-6", "-c", "3", "-vv", "--color", "never",
            "-W", "2s", "-i", "200ms", "-t", "12", "::1",
        ]).unwrap();
        assert_eq!(config.ip, IpVersion::V6);
        assert_eq!(config.count, 3);
        assert_eq!(config.verbosity, 2);
        assert_eq!(config.color, ColorMode::Never);
        assert_eq!(config.timeout, Some(Duration::from_secs(2)));
        assert_eq!(config.interval, Duration::from_millis(200));
        assert_eq!(config.ttl, Some(12));
    }

    #[test]
    fn count_out_of_range() {
        assert!(parse(&["rping", "-c", "65536", "localhost"]).is_err());
        assert!(parse(&["rping", "-c", "-1", "localhost"]).is_err());
        assert_eq!(parse(&["rping", "-c", "65535", "localhost"]).unwrap().count, u16::MAX);
    }

    #[test]
    fn conflicting_versions() {
        assert!(parse(&["rping", "-4", "-6", "localhost"]).is_err());
    }

    #[test]
    fn bad_durations() {
        assert!(parse(&["rping", "-W", "soon", "localhost"]).is_err());
        assert!(parse(&["rping", "-i", "x", "localhost"]).is_err());
    }
}
