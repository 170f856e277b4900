use std::net::IpAddr;

/// A CIDR block that clients must belong to.
///
/// # Examples
///
/// ```
/// use metrika_server::subnet::TrustedSubnet;
///
/// let subnet: TrustedSubnet = "192.168.1.0/24".parse().unwrap();
/// assert!(subnet.contains("192.168.1.77".parse().unwrap()));
/// assert!(!subnet.contains("192.168.2.1".parse().unwrap()));
/// assert!("10.0.0.0/33".parse::<TrustedSubnet>().is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrustedSubnet {
    network: IpAddr,
    prefix: u8,
}

impl TrustedSubnet {
    pub fn contains(&self, ip: IpAddr) -> bool {
        let ip = match ip {
            IpAddr::V6(v6) => v6.to_ipv4_mapped().map(IpAddr::V4).unwrap_or(ip),
            v4 => v4,
        };
        match (self.network, ip) {
            (IpAddr::V4(net), IpAddr::V4(addr)) => {
                let mask = v4_mask(self.prefix);
                u32::from(net) & mask == u32::from(addr) & mask
            }
            (IpAddr::V6(net), IpAddr::V6(addr)) => {
                let mask = v6_mask(self.prefix);
                u128::from(net) & mask == u128::from(addr) & mask
            }
            _ => false,
        }
    }
}

fn v4_mask(prefix: u8) -> u32 {
    u32::MAX.checked_shl(32 - u32::from(prefix)).unwrap_or(0)
}

fn v6_mask(prefix: u8) -> u128 {
    u128::MAX.checked_shl(128 - u32::from(prefix)).unwrap_or(0)
}

impl std::str::FromStr for TrustedSubnet {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (addr, prefix) = s
            .split_once('/')
            .ok_or_else(|| format!("CIDR {s:?} has no prefix length"))?;
        let network: IpAddr = addr
            .parse()
            .map_err(|e| format!("CIDR {s:?}: invalid address: {e}"))?;
        let prefix: u8 = prefix
            .parse()
            .map_err(|e| format!("CIDR {s:?}: invalid prefix length: {e}"))?;
        let max = if network.is_ipv4() { 32 } else { 128 };
        if prefix > max {
            return Err(format!("CIDR {s:?}: prefix length exceeds {max}"));
        }
        Ok(Self { network, prefix })
    }
}

impl std::fmt::Display for TrustedSubnet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix)
    }
}
