//! CPU and memory amounts in Kubernetes quantity notation
//!
//! CPU is kept in millicores and memory in bytes so bundles can be compared
//! component-wise. Both serialize as quantity strings (`500m`, `2`, `512Mi`).

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// CPU amount in millicores
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Cpu(u64);

impl Cpu {
    pub const fn millis(millis: u64) -> Self {
        Self(millis)
    }

    pub const fn cores(cores: u64) -> Self {
        Self(cores * 1000)
    }

    pub fn as_millis(&self) -> u64 {
        self.0
    }
}

impl FromStr for Cpu {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(millis) = s.strip_suffix('m') {
            return millis
                .parse::<u64>()
                .map(Cpu)
                .map_err(|_| format!("invalid CPU quantity '{}'", s));
        }

        // Whole or fractional cores, at most millicore precision
        let (whole, frac) = s.split_once('.').unwrap_or((s, ""));
        if whole.is_empty() && frac.is_empty() {
            return Err(format!("invalid CPU quantity '{}'", s));
        }
        if frac.len() > 3 || !frac.chars().all(|c| c.is_ascii_digit()) {
            return Err(format!("invalid CPU quantity '{}'", s));
        }
        let whole: u64 = if whole.is_empty() {
            0
        } else {
            whole
                .parse()
                .map_err(|_| format!("invalid CPU quantity '{}'", s))?
        };
        let frac_millis: u64 = if frac.is_empty() {
            0
        } else {
            format!("{:0<3}", frac)
                .parse()
                .map_err(|_| format!("invalid CPU quantity '{}'", s))?
        };

        whole
            .checked_mul(1000)
            .and_then(|m| m.checked_add(frac_millis))
            .map(Cpu)
            .ok_or_else(|| format!("CPU quantity '{}' is out of range", s))
    }
}

impl std::fmt::Display for Cpu {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.0 % 1000 == 0 {
            write!(f, "{}", self.0 / 1000)
        } else {
            write!(f, "{}m", self.0)
        }
    }
}

impl TryFrom<String> for Cpu {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Cpu> for String {
    fn from(cpu: Cpu) -> Self {
        cpu.to_string()
    }
}

/// Memory amount in bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Memory(u64);

const KI: u64 = 1024;
const MI: u64 = KI * 1024;
const GI: u64 = MI * 1024;
const TI: u64 = GI * 1024;

impl Memory {
    pub const fn bytes(bytes: u64) -> Self {
        Self(bytes)
    }

    pub const fn mebibytes(mib: u64) -> Self {
        Self(mib * MI)
    }

    pub const fn gibibytes(gib: u64) -> Self {
        Self(gib * GI)
    }

    pub fn as_bytes(&self) -> u64 {
        self.0
    }
}

impl FromStr for Memory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let split = s
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(s.len());
        let (digits, suffix) = s.split_at(split);
        let value: u64 = digits
            .parse()
            .map_err(|_| format!("invalid memory quantity '{}'", s))?;

        let multiplier = match suffix {
            "" => 1,
            "Ki" => KI,
            "Mi" => MI,
            "Gi" => GI,
            "Ti" => TI,
            "k" | "K" => 1_000,
            "M" => 1_000_000,
            "G" => 1_000_000_000,
            "T" => 1_000_000_000_000,
            _ => return Err(format!("invalid memory quantity '{}'", s)),
        };

        value
            .checked_mul(multiplier)
            .map(Memory)
            .ok_or_else(|| format!("memory quantity '{}' overflows", s))
    }
}

impl std::fmt::Display for Memory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let bytes = self.0;
        if bytes == 0 {
            return write!(f, "0");
        }
        for (unit, suffix) in [(TI, "Ti"), (GI, "Gi"), (MI, "Mi"), (KI, "Ki")] {
            if bytes % unit == 0 {
                return write!(f, "{}{}", bytes / unit, suffix);
            }
        }
        write!(f, "{}", bytes)
    }
}

impl TryFrom<String> for Memory {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Memory> for String {
    fn from(memory: Memory) -> Self {
        memory.to_string()
    }
}

/// A (cpu, memory) pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceAmount {
    pub cpu: Cpu,
    pub memory: Memory,
}

impl ResourceAmount {
    pub const fn new(cpu: Cpu, memory: Memory) -> Self {
        Self { cpu, memory }
    }

    /// Component-wise `self <= other`
    pub fn fits_within(&self, other: &ResourceAmount) -> bool {
        self.cpu <= other.cpu && self.memory <= other.memory
    }
}

impl std::fmt::Display for ResourceAmount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "cpu={} memory={}", self.cpu, self.memory)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpu_parsing() {
        assert_eq!("500m".parse::<Cpu>().unwrap(), Cpu::millis(500));
        assert_eq!("2".parse::<Cpu>().unwrap(), Cpu::cores(2));
        assert_eq!("0.25".parse::<Cpu>().unwrap(), Cpu::millis(250));
        assert_eq!("1.5".parse::<Cpu>().unwrap(), Cpu::millis(1500));
        assert!("abc".parse::<Cpu>().is_err());
        assert!("0.0001".parse::<Cpu>().is_err());
        assert!("".parse::<Cpu>().is_err());
    }

    #[test]
    fn test_cpu_parsing_rejects_overflow() {
        let err = "18446744073709552".parse::<Cpu>().unwrap_err();
        assert!(err.contains("out of range"));
        assert!("18446744073709551.999".parse::<Cpu>().is_err());
        assert_eq!("18446744073709551".parse::<Cpu>().unwrap(), Cpu::millis(18_446_744_073_709_551_000));
    }

    #[test]
    fn test_cpu_display() {
        assert_eq!(Cpu::millis(250).to_string(), "250m");
        assert_eq!(Cpu::cores(4).to_string(), "4");
        assert_eq!(Cpu::millis(0).to_string(), "0");
    }

    #[test]
    fn test_memory_parsing() {
        assert_eq!("512Mi".parse::<Memory>().unwrap(), Memory::mebibytes(512));
        assert_eq!("4Gi".parse::<Memory>().unwrap(), Memory::gibibytes(4));
        assert_eq!("1G".parse::<Memory>().unwrap(), Memory::bytes(1_000_000_000));
        assert_eq!("1024".parse::<Memory>().unwrap(), Memory::bytes(1024));
        assert!("12Xi".parse::<Memory>().is_err());
        assert!("Mi".parse::<Memory>().is_err());
    }

    #[test]
    fn test_memory_display() {
        assert_eq!(Memory::gibibytes(8).to_string(), "8Gi");
        assert_eq!(Memory::mebibytes(1536).to_string(), "1536Mi");
        assert_eq!(Memory::bytes(1000).to_string(), "1000");
        assert_eq!(Memory::bytes(0).to_string(), "0");
    }

    #[test]
    fn test_quantity_serde_as_strings() {
        let amount = ResourceAmount::new(Cpu::millis(500), Memory::mebibytes(256));
        let json = serde_json::to_string(&amount).unwrap();
        assert_eq!(json, r#"{"cpu":"500m","memory":"256Mi"}"#);

        let parsed: ResourceAmount = serde_json::from_str(r#"{"cpu":"1","memory":"1Gi"}"#).unwrap();
        assert_eq!(parsed, ResourceAmount::new(Cpu::cores(1), Memory::gibibytes(1)));
    }

    #[test]
    fn test_fits_within_is_component_wise() {
        let small = ResourceAmount::new(Cpu::millis(100), Memory::mebibytes(128));
        let wide = ResourceAmount::new(Cpu::cores(2), Memory::mebibytes(64));
        assert!(!small.fits_within(&wide));
        assert!(small.fits_within(&small));
    }
}
