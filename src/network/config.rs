//! Network configuration

use crate::error::{DriverError, DriverResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::net::Ipv4Addr;
use uuid::Uuid;

/// Network driver types
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkDriver {
    /// Bridge network (default)
    #[default]
    Bridge,
    /// Host network
    Host,
    /// No networking
    None,
}

impl std::str::FromStr for NetworkDriver {
    type Err = DriverError;

    fn from_str(s: &str) -> DriverResult<Self> {
        match s {
            "bridge" => Ok(NetworkDriver::Bridge),
            "host" => Ok(NetworkDriver::Host),
            "none" => Ok(NetworkDriver::None),
            other => Err(DriverError::Other(format!(
                "network driver '{}' is not supported by the local runtime",
                other
            ))),
        }
    }
}

impl std::fmt::Display for NetworkDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NetworkDriver::Bridge => write!(f, "bridge"),
            NetworkDriver::Host => write!(f, "host"),
            NetworkDriver::None => write!(f, "none"),
        }
    }
}

/// Network configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Network ID
    pub id: String,
    /// Network name
    pub name: String,
    /// Network driver
    pub driver: NetworkDriver,
    /// Subnet in CIDR form
    pub subnet: String,
    /// Gateway address
    pub gateway: Ipv4Addr,
    /// Internal network (no external access)
    pub internal: bool,
    /// Network labels
    pub labels: HashMap<String, String>,
    /// Connected containers
    pub containers: HashMap<String, NetworkContainer>,
    /// Created timestamp
    pub created: DateTime<Utc>,
}

impl NetworkConfig {
    /// Create a new network configuration on the given subnet
    pub fn new(name: &str, subnet: &str) -> DriverResult<Self> {
        let (base, _) = parse_cidr(subnet)?;
        let gateway = Ipv4Addr::from(u32::from(base) + 1);

        Ok(Self {
            id: Uuid::new_v4().simple().to_string()[..12].to_string(),
            name: name.to_string(),
            driver: NetworkDriver::default(),
            subnet: subnet.to_string(),
            gateway,
            internal: false,
            labels: HashMap::new(),
            containers: HashMap::new(),
            created: Utc::now(),
        })
    }

    /// Set network driver
    pub fn driver(mut self, driver: NetworkDriver) -> Self {
        self.driver = driver;
        self
    }

    /// Set labels
    pub fn labels(mut self, labels: HashMap<String, String>) -> Self {
        self.labels = labels;
        self
    }

    /// Set internal
    pub fn internal(mut self, internal: bool) -> Self {
        self.internal = internal;
        self
    }
}

/// Container network connection info
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkContainer {
    /// Container ID
    pub container_id: String,
    /// Container name
    pub name: String,
    /// DNS aliases
    pub aliases: Vec<String>,
    /// Endpoint ID
    pub endpoint_id: String,
    /// IPv4 address
    pub ipv4_address: Ipv4Addr,
}

/// Parse `a.b.c.d/len` into the network base address and prefix length
pub fn parse_cidr(subnet: &str) -> DriverResult<(Ipv4Addr, u8)> {
    let invalid = || DriverError::Other(format!("Invalid subnet: {}", subnet));

    let (addr, len) = subnet.split_once('/').ok_or_else(invalid)?;
    let addr: Ipv4Addr = addr.parse().map_err(|_| invalid())?;
    let len: u8 = len.parse().map_err(|_| invalid())?;
    if !(8..=30).contains(&len) {
        return Err(invalid());
    }

    let mask = u32::MAX << (32 - len);
    Ok((Ipv4Addr::from(u32::from(addr) & mask), len))
}

/// IP address allocator over one subnet
#[derive(Debug, Clone)]
pub struct IpAllocator {
    /// First usable host address
    first: u32,
    /// Last usable host address (broadcast excluded)
    last: u32,
    /// Allocated addresses
    allocated: BTreeSet<u32>,
}

impl IpAllocator {
    /// Create a new IP allocator for a subnet; the gateway (.1) is reserved
    pub fn new(subnet: &str) -> DriverResult<Self> {
        let (base, len) = parse_cidr(subnet)?;
        let base = u32::from(base);
        let size = 1u32 << (32 - len);

        let mut allocated = BTreeSet::new();
        allocated.insert(base + 1);

        Ok(Self {
            first: base + 1,
            last: base + size - 2,
            allocated,
        })
    }

    /// Mark an address as taken
    pub fn reserve(&mut self, ip: Ipv4Addr) {
        self.allocated.insert(u32::from(ip));
    }

    /// Allocate the lowest free address
    pub fn allocate(&mut self) -> DriverResult<Ipv4Addr> {
        let free = (self.first..=self.last)
            .find(|candidate| !self.allocated.contains(candidate))
            .ok_or_else(|| DriverError::Other("subnet exhausted".to_string()))?;

        self.allocated.insert(free);
        Ok(Ipv4Addr::from(free))
    }

    /// Release an IP address
    pub fn release(&mut self, ip: Ipv4Addr) {
        if u32::from(ip) != self.first {
            self.allocated.remove(&u32::from(ip));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_config_builder() {
        let config = NetworkConfig::new("my-network", "10.0.0.0/24")
            .unwrap()
            .driver(NetworkDriver::Bridge)
            .internal(true);

        assert_eq!(config.name, "my-network");
        assert_eq!(config.gateway, Ipv4Addr::new(10, 0, 0, 1));
        assert!(config.internal);
    }

    #[test]
    fn test_parse_cidr() {
        assert_eq!(
            parse_cidr("172.18.5.9/16").unwrap(),
            (Ipv4Addr::new(172, 18, 0, 0), 16)
        );
        assert!(parse_cidr("172.18.0.0").is_err());
        assert!(parse_cidr("300.1.1.1/16").is_err());
    }

    #[test]
    fn test_ip_allocator() {
        let mut allocator = IpAllocator::new("172.17.0.0/16").unwrap();

        let ip1 = allocator.allocate().unwrap();
        assert_eq!(ip1, Ipv4Addr::new(172, 17, 0, 2));

        let ip2 = allocator.allocate().unwrap();
        assert_eq!(ip2, Ipv4Addr::new(172, 17, 0, 3));

        allocator.release(ip1);
        assert_eq!(allocator.allocate().unwrap(), ip1);
    }

    #[test]
    fn test_ip_allocator_exhaustion() {
        let mut allocator = IpAllocator::new("192.168.10.0/30").unwrap();
        assert_eq!(allocator.allocate().unwrap(), Ipv4Addr::new(192, 168, 10, 2));
        assert!(allocator.allocate().is_err());
    }
}
