use std::net::Ipv4Addr;
use std::str::FromStr;

/// One installed route.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RouteEntry {
    pub prefix: Ipv4Addr,
    /// Prefix length, `0..=32`.
    pub mask_bits: u8,
    /// Lower is better.
    pub metric: u16,
    pub next_hop: Ipv4Addr,
    /// Low 32 bits of the monotonic millisecond clock at install time.
    pub last_updated_ms: u32,
}

/// How the service pretends to forward matched traffic.
///
/// Diagnostic only: the derived hop count is logged, never put on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum RouteStrategy {
    #[default]
    Direct,
    SimulatedHop,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RouteDecision {
    pub strategy: RouteStrategy,
    pub hops: u8,
}

impl RouteStrategy {
    pub fn decide(self) -> RouteDecision {
        let hops = match self {
            RouteStrategy::Direct => 1,
            RouteStrategy::SimulatedHop => 3,
        };
        RouteDecision {
            strategy: self,
            hops,
        }
    }
}

impl FromStr for RouteStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "direct" => Ok(RouteStrategy::Direct),
            "hop" => Ok(RouteStrategy::SimulatedHop),
            other => Err(format!("unknown strategy {other:?} (expected direct|hop)")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decision_hops() {
        assert_eq!(RouteStrategy::Direct.decide().hops, 1);
        assert_eq!(RouteStrategy::SimulatedHop.decide().hops, 3);
    }

    #[test]
    fn strategy_from_str() {
        assert_eq!("direct".parse::<RouteStrategy>(), Ok(RouteStrategy::Direct));
        assert_eq!("hop".parse::<RouteStrategy>(), Ok(RouteStrategy::SimulatedHop));
        assert!("fastest".parse::<RouteStrategy>().is_err());
    }
}
