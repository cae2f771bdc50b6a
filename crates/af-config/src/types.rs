use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::de;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

// ---------------------------------------------------------------------------
// HumanDuration
// ---------------------------------------------------------------------------

/// A duration parsed from a human-readable string like `"200ms"`, `"30s"`,
/// `"5m"`, `"1h"`, `"2d"`.
///
/// Millisecond precision matters here: the sink quiescence window and worker
/// idle TTLs are typically sub-second.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HumanDuration(Duration);

impl HumanDuration {
    pub fn as_duration(&self) -> Duration {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }
}

impl From<HumanDuration> for Duration {
    fn from(hd: HumanDuration) -> Self {
        hd.0
    }
}

impl From<Duration> for HumanDuration {
    fn from(d: Duration) -> Self {
        Self(d)
    }
}

impl FromStr for HumanDuration {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            anyhow::bail!("empty duration string");
        }

        let (num_part, suffix) = split_unit_suffix(s)?;
        let value: u64 = num_part
            .parse()
            .map_err(|_| anyhow::anyhow!("invalid number in duration: {s:?}"))?;

        let dur = match suffix {
            "ms" => Duration::from_millis(value),
            "s" => Duration::from_secs(value),
            "m" => Duration::from_secs(value * 60),
            "h" => Duration::from_secs(value * 3600),
            "d" => Duration::from_secs(value * 86400),
            _ => {
                anyhow::bail!(
                    "unsupported duration suffix {suffix:?} in {s:?} (expected ms/s/m/h/d)"
                )
            }
        };

        Ok(Self(dur))
    }
}

impl fmt::Display for HumanDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let millis = self.0.as_millis();
        if millis == 0 {
            return write!(f, "0s");
        }
        if !millis.is_multiple_of(1000) {
            return write!(f, "{millis}ms");
        }
        let secs = self.0.as_secs();
        if secs.is_multiple_of(86400) {
            write!(f, "{}d", secs / 86400)
        } else if secs.is_multiple_of(3600) {
            write!(f, "{}h", secs / 3600)
        } else if secs.is_multiple_of(60) {
            write!(f, "{}m", secs / 60)
        } else {
            write!(f, "{secs}s")
        }
    }
}

impl Serialize for HumanDuration {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for HumanDuration {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

/// Split `"200ms"` into `("200", "ms")`.
fn split_unit_suffix(s: &str) -> anyhow::Result<(&str, &str)> {
    let split_at = s
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(|| anyhow::anyhow!("duration {s:?} has no unit suffix"))?;
    if split_at == 0 {
        anyhow::bail!("duration {s:?} has no numeric part");
    }
    Ok(s.split_at(split_at))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_all_suffixes() {
        assert_eq!(
            "200ms".parse::<HumanDuration>().unwrap().as_duration(),
            Duration::from_millis(200),
        );
        assert_eq!(
            "30s".parse::<HumanDuration>().unwrap().as_duration(),
            Duration::from_secs(30),
        );
        assert_eq!(
            "5m".parse::<HumanDuration>().unwrap().as_duration(),
            Duration::from_secs(300),
        );
        assert_eq!(
            "2h".parse::<HumanDuration>().unwrap().as_duration(),
            Duration::from_secs(7200),
        );
        assert_eq!(
            "1d".parse::<HumanDuration>().unwrap().as_duration(),
            Duration::from_secs(86400),
        );
    }

    #[test]
    fn zero_is_valid() {
        let hd: HumanDuration = "0s".parse().unwrap();
        assert!(hd.is_zero());
        let hd: HumanDuration = "0ms".parse().unwrap();
        assert!(hd.is_zero());
    }

    #[test]
    fn reject_garbage() {
        assert!("".parse::<HumanDuration>().is_err());
        assert!("12".parse::<HumanDuration>().is_err());
        assert!("ms".parse::<HumanDuration>().is_err());
        assert!("12w".parse::<HumanDuration>().is_err());
        assert!("-5s".parse::<HumanDuration>().is_err());
    }

    #[test]
    fn display_round_trip() {
        for s in ["250ms", "45s", "3m", "6h", "2d", "0s"] {
            let hd: HumanDuration = s.parse().unwrap();
            assert_eq!(hd.to_string(), s);
            assert_eq!(hd.to_string().parse::<HumanDuration>().unwrap(), hd);
        }
        // 1500ms is not a whole second and must stay in ms
        let hd: HumanDuration = "1500ms".parse().unwrap();
        assert_eq!(hd.to_string(), "1500ms");
    }
}
