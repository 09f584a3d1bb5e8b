//! IP pool ranges in RouterOS `start-end` form.

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use crate::error::ProvisionError;

/// A validated host range inside one /24.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpPool {
    start: Ipv4Addr,
    end: Ipv4Addr,
}

impl IpPool {
    pub fn start(&self) -> Ipv4Addr {
        self.start
    }

    pub fn end(&self) -> Ipv4Addr {
        self.end
    }

    /// Number of addresses in the range, inclusive.
    pub fn size(&self) -> u32 {
        u32::from(self.end) - u32::from(self.start) + 1
    }

    /// The enclosing /24 network address.
    pub fn network(&self) -> Ipv4Addr {
        let [a, b, c, _] = self.start.octets();
        Ipv4Addr::new(a, b, c, 0)
    }

    /// The enclosing network in CIDR form, e.g. `192.168.88.0/24`.
    pub fn network_cidr(&self) -> String {
        format!("{}/24", self.network())
    }

    /// Conventional gateway: the first host of the /24 left free by the range.
    ///
    /// `None` when the range covers every host.
    pub fn default_gateway(&self) -> Option<Ipv4Addr> {
        let [a, b, c, _] = self.start.octets();
        (1..=254u8)
            .map(|host| Ipv4Addr::new(a, b, c, host))
            .find(|addr| !self.contains(*addr))
    }

    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        (self.start..=self.end).contains(&addr)
    }

    pub fn same_subnet(&self, addr: Ipv4Addr) -> bool {
        addr.octets()[..3] == self.start.octets()[..3]
    }

    /// Resolves a gateway for this pool and checks it does not collide with it.
    pub fn gateway_for(&self, requested: Option<&str>) -> Result<Ipv4Addr, ProvisionError> {
        let gateway = match requested {
            Some(raw) => raw.trim().parse::<Ipv4Addr>().map_err(|_| {
                ProvisionError::invalid_option("gateway", format!("'{raw}' is not an IPv4 address"))
            })?,
            None => self.default_gateway().ok_or_else(|| {
                ProvisionError::invalid_option(
                    "gateway",
                    format!("pool {self} leaves no host free in {} for the gateway", self.network_cidr()),
                )
            })?,
        };
        if !self.same_subnet(gateway) {
            return Err(ProvisionError::invalid_option(
                "gateway",
                format!("{gateway} is outside {}", self.network_cidr()),
            ));
        }
        if matches!(gateway.octets()[3], 0 | 255) {
            return Err(ProvisionError::invalid_option(
                "gateway",
                format!("{gateway} is the network or broadcast address of {}", self.network_cidr()),
            ));
        }
        if self.contains(gateway) {
            return Err(ProvisionError::invalid_option(
                "gateway",
                format!("{gateway} lies inside pool {self}"),
            ));
        }
        Ok(gateway)
    }

    fn invalid(pool: &str, reason: impl Into<String>) -> ProvisionError {
        ProvisionError::InvalidIpPool {
            pool: pool.to_string(),
            reason: reason.into(),
        }
    }
}

impl FromStr for IpPool {
    type Err = ProvisionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (start_raw, end_raw) = s
            .trim()
            .split_once('-')
            .ok_or_else(|| Self::invalid(s, "expected <start>-<end>"))?;
        let start: Ipv4Addr = start_raw
            .trim()
            .parse()
            .map_err(|_| Self::invalid(s, format!("'{start_raw}' is not a dotted-quad address")))?;
        let end: Ipv4Addr = end_raw
            .trim()
            .parse()
            .map_err(|_| Self::invalid(s, format!("'{end_raw}' is not a dotted-quad address")))?;

        if start.octets()[..3] != end.octets()[..3] {
            return Err(Self::invalid(s, "start and end must be in the same /24"));
        }
        if start >= end {
            return Err(Self::invalid(s, "start must be lower than end"));
        }
        if start.octets()[3] < 1 || end.octets()[3] > 254 {
            return Err(Self::invalid(s, "host part must be within 1-254"));
        }
        Ok(Self { start, end })
    }
}

impl fmt::Display for IpPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_host_range_in_one_subnet() {
        let pool: IpPool = "192.168.88.10-192.168.88.254".parse().expect("valid");
        assert_eq!(pool.size(), 245);
        assert_eq!(pool.network_cidr(), "192.168.88.0/24");
        assert_eq!(pool.default_gateway(), Some(Ipv4Addr::new(192, 168, 88, 1)));
    }

    #[test]
    fn rejects_range_across_subnets() {
        let err = "192.168.88.10-192.168.89.5".parse::<IpPool>().expect_err("different /24");
        assert!(matches!(err, ProvisionError::InvalidIpPool { .. }));
    }

    #[test]
    fn rejects_reversed_and_equal_ranges() {
        assert!("192.168.88.200-192.168.88.50".parse::<IpPool>().is_err());
        assert!("192.168.88.50-192.168.88.50".parse::<IpPool>().is_err());
    }

    #[test]
    fn rejects_network_and_broadcast_hosts() {
        assert!("192.168.88.0-192.168.88.20".parse::<IpPool>().is_err());
        assert!("192.168.88.10-192.168.88.255".parse::<IpPool>().is_err());
    }

    #[test]
    fn rejects_garbage() {
        for raw in ["", "192.168.88.10", "a-b", "192.168.88-192.168.88.20", "1.2.3.4-1.2.3.999"] {
            assert!(raw.parse::<IpPool>().is_err(), "{raw} should be rejected");
        }
    }

    #[test]
    fn gateway_must_sit_outside_the_range() {
        let pool: IpPool = "192.168.88.10-192.168.88.254".parse().expect("valid");
        assert_eq!(pool.gateway_for(None).expect("default"), Ipv4Addr::new(192, 168, 88, 1));
        assert!(pool.gateway_for(Some("192.168.88.20")).is_err());
        assert!(pool.gateway_for(Some("10.0.0.1")).is_err());
        assert!(pool.gateway_for(Some("192.168.88.5")).is_ok());
    }

    #[test]
    fn gateway_cannot_be_network_or_broadcast() {
        let pool: IpPool = "192.168.88.10-192.168.88.254".parse().expect("valid");
        for raw in ["192.168.88.0", "192.168.88.255"] {
            let err = pool.gateway_for(Some(raw)).expect_err("reserved host");
            assert!(err.to_string().contains("network or broadcast"), "{err}");
        }
    }

    #[test]
    fn pool_starting_at_first_host_moves_default_gateway_past_it() {
        let pool: IpPool = "192.168.88.1-192.168.88.200".parse().expect("valid");
        assert_eq!(pool.gateway_for(None).expect("free host"), Ipv4Addr::new(192, 168, 88, 201));
        assert!(pool.gateway_for(Some("192.168.88.254")).is_ok());
    }

    #[test]
    fn full_range_has_no_default_gateway() {
        let pool: IpPool = "192.168.88.1-192.168.88.254".parse().expect("valid");
        assert_eq!(pool.default_gateway(), None);
        let err = pool.gateway_for(None).expect_err("no free host");
        assert!(err.to_string().contains("no host free"), "{err}");
    }
}
