use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// An ordered set of CPU or memory-node indices in kernel list syntax
/// (`0-3,5,7-8`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CpuSet(BTreeSet<u32>);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CpuSetParseError(pub String);

impl fmt::Display for CpuSetParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid cpu list '{}'", self.0)
    }
}

impl std::error::Error for CpuSetParseError {}

impl CpuSet {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn contains(&self, index: u32) -> bool {
        self.0.contains(&index)
    }

    pub fn is_subset_of(&self, other: &CpuSet) -> bool {
        self.0.is_subset(&other.0)
    }
}

impl FromStr for CpuSet {
    type Err = CpuSetParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || CpuSetParseError(s.to_owned());
        let mut set = BTreeSet::new();
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Ok(Self(set));
        }

        for part in trimmed.split(',') {
            let part = part.trim();
            match part.split_once('-') {
                Some((lo, hi)) => {
                    let lo: u32 = lo.parse().map_err(|_| invalid())?;
                    let hi: u32 = hi.parse().map_err(|_| invalid())?;
                    if hi < lo {
                        return Err(invalid());
                    }
                    set.extend(lo..=hi);
                }
                None => {
                    set.insert(part.parse().map_err(|_| invalid())?);
                }
            }
        }
        Ok(Self(set))
    }
}

impl fmt::Display for CpuSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ranges: Vec<(u32, u32)> = Vec::new();
        for &i in &self.0 {
            match ranges.last_mut() {
                Some((_, end)) if *end + 1 == i => *end = i,
                _ => ranges.push((i, i)),
            }
        }
        let parts: Vec<String> = ranges
            .into_iter()
            .map(|(lo, hi)| {
                if lo == hi {
                    lo.to_string()
                } else {
                    format!("{lo}-{hi}")
                }
            })
            .collect();
        f.write_str(&parts.join(","))
    }
}

impl TryFrom<String> for CpuSet {
    type Error = CpuSetParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<CpuSet> for String {
    fn from(value: CpuSet) -> Self {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_kernel_list_syntax() {
        let set: CpuSet = "0-3,5,7-8\n".parse().unwrap();
        assert_eq!(set.len(), 7);
        assert!(set.contains(2));
        assert!(!set.contains(4));
        assert_eq!(set.to_string(), "0-3,5,7-8");
    }

    #[test]
    fn empty_list_is_empty_set() {
        assert!("".parse::<CpuSet>().unwrap().is_empty());
    }

    #[test]
    fn rejects_malformed_lists() {
        for bad in ["a", "3-1", "1,,2", "0-", "-1"] {
            assert!(bad.parse::<CpuSet>().is_err(), "{bad}");
        }
    }

    #[test]
    fn subset_check() {
        let host: CpuSet = "0-7".parse().unwrap();
        assert!("1,3-4".parse::<CpuSet>().unwrap().is_subset_of(&host));
        assert!(!"6-9".parse::<CpuSet>().unwrap().is_subset_of(&host));
    }
}
