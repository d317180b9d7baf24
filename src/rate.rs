//! Rate of admissions: `rate` units per `per` period.
use std::convert::TryFrom;
use std::fmt;
use std::time::Duration;

use serde::Deserialize;

use crate::error::Error;

/// `rate` units per `per`.
///
/// A token bucket built from this rate holds at most `rate` tokens and
/// refills at `rate / per` tokens per second.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(try_from = "RateDef")]
pub struct Rate {
    rate: f64,
    per: Duration,
}

impl Rate {
    pub fn new(rate: f64, per: Duration) -> Result<Self, Error> {
        if rate.is_finite() && rate > 0.0 && !per.is_zero() {
            Ok(Self { rate, per })
        } else {
            Err(Error::invalid_rate(rate, per))
        }
    }

    /// for literal rates known to be valid
    pub(crate) const fn fixed(rate: f64, per: Duration) -> Self {
        Self { rate, per }
    }

    /// `rate` units per second
    pub fn per_second(rate: f64) -> Result<Self, Error> {
        Self::new(rate, Duration::from_secs(1))
    }

    pub fn capacity(&self) -> f64 {
        self.rate
    }

    /// A bucket below one token never admits a connection.
    pub fn admits_any(&self) -> bool {
        self.rate >= 1.0
    }

    pub fn period(&self) -> Duration {
        self.per
    }

    pub fn refill_per_sec(&self) -> f64 {
        self.rate / self.per.as_secs_f64()
    }
}

impl fmt::Display for Rate {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}/{:?}", self.rate, self.per)
    }
}

/// Accepted notations:
///
/// ```yaml
/// global: 2000            # 2000 per second
/// per_host: { rate: 5, per: 8 }
/// ```
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(untagged)]
enum RateDef {
    PerSecond(f64),
    Window {
        rate: f64,
        #[serde(default = "one_second")]
        per: f64,
    },
}

fn one_second() -> f64 {
    1.0
}

impl TryFrom<RateDef> for Rate {
    type Error = Error;
    fn try_from(def: RateDef) -> Result<Self, Self::Error> {
        let (rate, per) = match def {
            RateDef::PerSecond(rate) => (rate, 1.0),
            RateDef::Window { rate, per } => (rate, per),
        };
        let per = Duration::try_from_secs_f64(per)
            .map_err(|_| Error::invalid_rate(rate, Duration::ZERO))?;
        Rate::new(rate, per)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn refill_per_sec() {
        let rate = Rate::new(5.0, Duration::from_secs(8)).unwrap();
        assert_eq!(rate.capacity(), 5.0);
        assert_eq!(rate.refill_per_sec(), 0.625);
        assert_eq!(Rate::per_second(10.0).unwrap().refill_per_sec(), 10.0);
    }

    #[test]
    fn fractional_capacity() {
        assert!(Rate::per_second(1.0).unwrap().admits_any());
        assert!(Rate::new(2.5, Duration::from_secs(10)).unwrap().admits_any());
        assert!(!Rate::per_second(0.5).unwrap().admits_any());
    }

    #[test]
    fn reject_invalid() {
        assert!(Rate::new(0.0, Duration::from_secs(1)).is_err());
        assert!(Rate::new(-1.0, Duration::from_secs(1)).is_err());
        assert!(Rate::new(f64::NAN, Duration::from_secs(1)).is_err());
        assert!(Rate::new(f64::INFINITY, Duration::from_secs(1)).is_err());
        assert!(Rate::new(1.0, Duration::ZERO).is_err());
    }

    #[test]
    fn deserialize_rate() {
        let rate: Rate = serde_yaml::from_str("2000").unwrap();
        assert_eq!(rate, Rate::per_second(2000.0).unwrap());

        let rate: Rate = serde_yaml::from_str("{ rate: 5, per: 8 }").unwrap();
        assert_eq!(rate, Rate::new(5.0, Duration::from_secs(8)).unwrap());

        let rate: Rate = serde_yaml::from_str("rate: 3").unwrap();
        assert_eq!(rate, Rate::per_second(3.0).unwrap());

        let err = serde_yaml::from_str::<Rate>("{ rate: 5, per: 0 }").unwrap_err();
        println!("invalid: {}", err);
        assert!(serde_yaml::from_str::<Rate>("{ rate: 5, per: -1 }").is_err());
        assert!(serde_yaml::from_str::<Rate>("0").is_err());
    }
}
