use crate::RuntimeError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
}

impl FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Ok(Self::Tcp),
            "udp" => Ok(Self::Udp),
            other => Err(format!("unsupported protocol '{other}'")),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Tcp => "tcp",
            Self::Udp => "udp",
        })
    }
}

/// One published port, handed to the network layer next to the spec.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMapping {
    /// Empty means all addresses.
    pub host_ip: String,
    pub host_port: u16,
    /// Set when a host range is bound to a single container port; the
    /// network layer picks a free port from `host_port..=host_port_end`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_port_end: Option<u16>,
    pub container_port: u16,
    pub protocol: Protocol,
}

type PortRange = (u16, u16);

fn parse_range(raw: &str) -> Result<PortRange, String> {
    let port = |s: &str| match s.parse::<u16>() {
        Ok(0) | Err(_) => Err(format!("invalid port '{s}'")),
        Ok(p) => Ok(p),
    };
    match raw.split_once('-') {
        Some((start, end)) => {
            let (start, end) = (port(start)?, port(end)?);
            if end < start {
                return Err(format!("range end {end} is below start {start}"));
            }
            Ok((start, end))
        }
        None => {
            let p = port(raw)?;
            Ok((p, p))
        }
    }
}

fn split_protocol(raw: &str) -> Result<(&str, Option<Protocol>), String> {
    match raw.rsplit_once('/') {
        Some((ports, proto)) => Ok((ports, Some(proto.parse()?))),
        None => Ok((raw, None)),
    }
}

fn protocols(explicit: Option<Protocol>) -> Vec<Protocol> {
    match explicit {
        Some(proto) => vec![proto],
        None => vec![Protocol::Udp, Protocol::Tcp],
    }
}

/// Parse `[ip:][hostPort[-end]:]containerPort[-end][/proto]`.
///
/// Without a protocol each port is published for both udp and tcp. A host
/// range against a single container port yields one mapping whose host side
/// is a range. IPv6 addresses must be bracketed.
pub fn parse_port_spec(spec: &str) -> Result<Vec<PortMapping>, RuntimeError> {
    parse_publish(spec).map_err(|reason| RuntimeError::InvalidPort {
        spec: spec.to_owned(),
        reason,
    })
}

fn parse_publish(spec: &str) -> Result<Vec<PortMapping>, String> {
    let (addr, proto) = split_protocol(spec)?;

    let (rest, container) = match addr.rsplit_once(':') {
        Some((rest, container)) => (Some(rest), container),
        None => (None, addr),
    };
    let (ip, host) = match rest {
        None => ("", None),
        Some(rest) => match rest.rsplit_once(':') {
            Some((ip, host)) => (ip, Some(host)),
            None => ("", Some(rest)),
        },
    };

    let host_ip = ip.trim_start_matches('[').trim_end_matches(']');
    if !host_ip.is_empty() {
        host_ip
            .parse::<IpAddr>()
            .map_err(|_| format!("invalid host address '{host_ip}'"))?;
    }

    let container = parse_range(container)?;
    let host = match host {
        Some(h) if !h.is_empty() => Some(parse_range(h)?),
        _ => None,
    };

    let mut mappings = Vec::new();
    let container_width = container.1 - container.0;
    match host {
        Some((host_start, host_end)) if container_width == 0 && host_end > host_start => {
            for protocol in protocols(proto) {
                mappings.push(PortMapping {
                    host_ip: host_ip.to_owned(),
                    host_port: host_start,
                    host_port_end: Some(host_end),
                    container_port: container.0,
                    protocol,
                });
            }
        }
        Some((host_start, host_end)) => {
            if host_end - host_start != container_width {
                return Err("host and container port ranges differ in size".to_owned());
            }
            push_pairs(&mut mappings, host_ip, host_start, container, proto);
        }
        None => push_pairs(&mut mappings, host_ip, container.0, container, proto),
    }
    Ok(mappings)
}

fn push_pairs(
    mappings: &mut Vec<PortMapping>,
    host_ip: &str,
    host_start: u16,
    container: PortRange,
    proto: Option<Protocol>,
) {
    for (container_port, host_port) in (container.0..=container.1).zip(host_start..=u16::MAX) {
        for protocol in protocols(proto) {
            mappings.push(PortMapping {
                host_ip: host_ip.to_owned(),
                host_port,
                host_port_end: None,
                container_port,
                protocol,
            });
        }
    }
}

/// Parse an exposed `port[-end][/proto]`; host ports equal container ports.
pub fn parse_expose(spec: &str) -> Result<Vec<PortMapping>, RuntimeError> {
    let invalid = |reason: String| RuntimeError::InvalidPort {
        spec: spec.to_owned(),
        reason,
    };
    let (ports, proto) = split_protocol(spec).map_err(invalid)?;
    if ports.contains(':') {
        return Err(invalid("exposed ports cannot name a host port".to_owned()));
    }
    let range = parse_range(ports).map_err(invalid)?;
    let mut mappings = Vec::new();
    push_pairs(&mut mappings, "", range.0, range, proto);
    Ok(mappings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_protocol_is_one_mapping() {
        let maps = parse_port_spec("8080:80/tcp").unwrap();
        assert_eq!(
            maps,
            [PortMapping {
                host_ip: String::new(),
                host_port: 8080,
                host_port_end: None,
                container_port: 80,
                protocol: Protocol::Tcp,
            }]
        );
    }

    #[test]
    fn bare_port_publishes_udp_and_tcp() {
        let maps = parse_port_spec("80").unwrap();
        assert_eq!(maps.len(), 2);
        assert_eq!(maps[0].protocol, Protocol::Udp);
        assert_eq!(maps[1].protocol, Protocol::Tcp);
        assert!(maps.iter().all(|m| m.host_port == 80 && m.container_port == 80));
    }

    #[test]
    fn ranges_expand_pairwise() {
        let maps = parse_port_spec("127.0.0.1:9000-9002:7000-7002/udp").unwrap();
        let pairs: Vec<(u16, u16)> = maps.iter().map(|m| (m.host_port, m.container_port)).collect();
        assert_eq!(pairs, [(9000, 7000), (9001, 7001), (9002, 7002)]);
        assert!(maps.iter().all(|m| m.host_ip == "127.0.0.1"));
    }

    #[test]
    fn host_range_against_single_container_port() {
        let maps = parse_port_spec("5000-5010:80/tcp").unwrap();
        assert_eq!(maps.len(), 1);
        assert_eq!(maps[0].host_port, 5000);
        assert_eq!(maps[0].host_port_end, Some(5010));
        assert_eq!(maps[0].container_port, 80);
    }

    #[test]
    fn ipv6_and_empty_host_port() {
        let maps = parse_port_spec("[::1]::53/udp").unwrap();
        assert_eq!(maps[0].host_ip, "::1");
        assert_eq!(maps[0].host_port, 53);
    }

    #[test]
    fn rejects_bad_specs() {
        for bad in [
            "80/sctp",
            "0",
            "70000",
            "8000-8001:80-82",
            "90-80",
            "nothere.local:80:80",
            "a:b",
        ] {
            let err = parse_port_spec(bad).unwrap_err();
            assert!(err.to_string().contains(bad), "{bad}: {err}");
        }
    }

    #[test]
    fn expose_ranges() {
        let maps = parse_expose("3000-3001/tcp").unwrap();
        let ports: Vec<u16> = maps.iter().map(|m| m.host_port).collect();
        assert_eq!(ports, [3000, 3001]);
        assert_eq!(parse_expose("53").unwrap().len(), 2);
        assert!(parse_expose("8080:80").is_err());
    }
}
