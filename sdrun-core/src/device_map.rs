use std::str::FromStr;

use anyhow::{anyhow, Error};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum DeviceMap {
    ForceCpu,
    Ordinal(usize),
}

impl Default for DeviceMap {
    fn default() -> Self {
        Self::ForceCpu
    }
}

impl FromStr for DeviceMap {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("cpu") {
            return Ok(Self::ForceCpu);
        }
        s.parse::<usize>()
            .map(Self::Ordinal)
            .map_err(|_| anyhow!("invalid device `{s}`, expected `cpu` or a device ordinal"))
    }
}
