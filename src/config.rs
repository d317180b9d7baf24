use std::fs::File;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::acl::{AddressAcl, IpNet};
use crate::error::Error;
use crate::rate::Rate;

/// Contents of the configuration file.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// default log filter when `RUST_LOG` is unset
    #[serde(default)]
    pub log_level: Option<String>,
    pub listeners: Vec<ListenConfig>,
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self, Error> {
        let file = File::open(path)?;
        Ok(serde_yaml::from_reader(file)?)
    }
}

impl FromStr for Config {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(serde_yaml::from_str(s)?)
    }
}

/// One guarded listener.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ListenConfig {
    /// used in logs; defaults to the bound address
    pub name: Option<String>,
    pub listen: SocketAddr,
    /// where admitted connections are relayed
    pub upstream: Option<SocketAddr>,
    #[serde(deserialize_with = "secs::positive")]
    pub connect_timeout: Duration,
    pub ratelimit: RateLimitConfig,
    pub allow: Vec<IpNet>,
    pub deny: Vec<IpNet>,
    /// upper bound on how long a shutdown request goes unnoticed
    #[serde(deserialize_with = "secs::positive")]
    pub accept_timeout: Duration,
}

impl ListenConfig {
    pub fn acl(&self) -> AddressAcl {
        AddressAcl::new(self.allow.clone(), self.deny.clone())
    }

    pub fn set_accept_timeout(&mut self, dur: Duration) -> &mut Self {
        self.accept_timeout = dur;
        self
    }
}

impl Default for ListenConfig {
    fn default() -> Self {
        ListenConfig {
            name: None,
            listen: SocketAddr::new(Ipv4Addr::new(0, 0, 0, 0).into(), 1080),
            upstream: None,
            connect_timeout: Duration::from_secs(5),
            ratelimit: RateLimitConfig::default(),
            allow: vec![],
            deny: vec![],
            accept_timeout: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RateLimitConfig {
    /// shared by every client of the listener
    pub global: Rate,
    /// independent budget per client host
    pub per_host: Rate,
    /// forget hosts idle for this long; never shorter than `per_host`'s period
    #[serde(deserialize_with = "secs::positive")]
    pub host_idle_timeout: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        RateLimitConfig {
            global: Rate::fixed(2000.0, Duration::from_secs(1)),
            per_host: Rate::fixed(10.0, Duration::from_secs(1)),
            host_idle_timeout: Duration::from_secs(60),
        }
    }
}

/// durations written as (fractional) seconds
mod secs {
    use std::time::Duration;

    use serde::{de, Deserialize, Deserializer};

    fn from_secs<E: de::Error>(secs: f64) -> Result<Duration, E> {
        Duration::try_from_secs_f64(secs)
            .map_err(|err| E::custom(format!("invalid duration {}: {}", secs, err)))
    }

    /// non-zero duration
    pub fn positive<'de, D: Deserializer<'de>>(de: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(de)?;
        match from_secs::<D::Error>(secs)? {
            dur if dur.is_zero() => Err(de::Error::custom(format!(
                "duration must be positive: {}",
                secs
            ))),
            dur => Ok(dur),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn defaults() {
        let config: Config = "listeners:\n  - {}\n".parse().unwrap();
        assert_eq!(config.log_level, None);
        let listener = &config.listeners[0];
        assert_eq!(listener.listen, "0.0.0.0:1080".parse().unwrap());
        assert_eq!(listener.upstream, None);
        assert_eq!(listener.accept_timeout, Duration::from_secs(2));
        assert_eq!(listener.ratelimit.global, Rate::per_second(2000.0).unwrap());
        assert_eq!(listener.ratelimit.per_host, Rate::per_second(10.0).unwrap());
        assert_eq!(listener.ratelimit.host_idle_timeout, Duration::from_secs(60));
        assert!(listener.allow.is_empty());
        assert!(listener.deny.is_empty());
    }

    #[test]
    fn listener_config() {
        let yaml = r#"
log_level: debug
listeners:
  - name: front
    listen: "127.0.0.1:1081"
    upstream: "10.0.0.1:1080"
    connect_timeout: 0.5
    accept_timeout: 0.25
    ratelimit:
      global: 100
      per_host: { rate: 5, per: 8 }
      host_idle_timeout: 30
    allow: [192.168.0.0/16, "::1"]
    deny: [192.168.1.1]
"#;
        let config: Config = yaml.parse().unwrap();
        assert_eq!(config.log_level.as_deref(), Some("debug"));
        let listener = &config.listeners[0];
        assert_eq!(listener.name.as_deref(), Some("front"));
        assert_eq!(listener.upstream, Some("10.0.0.1:1080".parse().unwrap()));
        assert_eq!(listener.connect_timeout, Duration::from_millis(500));
        assert_eq!(listener.accept_timeout, Duration::from_millis(250));
        assert_eq!(listener.ratelimit.global, Rate::per_second(100.0).unwrap());
        assert_eq!(
            listener.ratelimit.per_host,
            Rate::new(5.0, Duration::from_secs(8)).unwrap()
        );
        assert_eq!(listener.ratelimit.host_idle_timeout, Duration::from_secs(30));
        assert_eq!(listener.allow.len(), 2);
        assert_eq!(listener.deny, vec!["192.168.1.1".parse().unwrap()]);

        use crate::acl::Acl;
        let acl = listener.acl();
        assert!(acl.allowed(&"192.168.2.1:4000".parse().unwrap()));
        assert!(!acl.allowed(&"192.168.1.1:4000".parse().unwrap()));
        assert!(!acl.allowed(&"10.0.0.1:4000".parse().unwrap()));
    }

    #[test]
    fn invalid_config() {
        assert!(matches!(
            "listeners:\n  - ratelimit: { global: 0 }\n".parse::<Config>(),
            Err(Error::Config(_))
        ));
        assert!("listeners:\n  - allow: [10.0.0.0/33]\n"
            .parse::<Config>()
            .is_err());
        assert!("listeners:\n  - accept_timeout: -1\n"
            .parse::<Config>()
            .is_err());
        assert!("listeners:\n  - connect_timeout: 0\n"
            .parse::<Config>()
            .is_err());
        assert!("listeners:\n  - unknown: 1\n".parse::<Config>().is_err());
        assert!("log_level: info\n".parse::<Config>().is_err());
    }

    #[test]
    fn accept_timeout_is_bounded() {
        // the accept loop only sees a shutdown request between accepts
        for timeout in ["~", "0", "0.0"] {
            let yaml = format!(
                "listeners:\n  - listen: \"127.0.0.1:0\"\n    accept_timeout: {}\n",
                timeout
            );
            assert!(
                matches!(yaml.parse::<Config>(), Err(Error::Config(_))),
                "accept_timeout: {}",
                timeout
            );
        }
    }

    #[test]
    fn host_idle_timeout_is_positive() {
        for timeout in ["~", "0"] {
            let yaml = format!(
                "listeners:\n  - ratelimit: {{ host_idle_timeout: {} }}\n",
                timeout
            );
            assert!(yaml.parse::<Config>().is_err(), "host_idle_timeout: {}", timeout);
        }
        let config: Config = "listeners:\n  - ratelimit: { host_idle_timeout: 0.5 }\n"
            .parse()
            .unwrap();
        assert_eq!(
            config.listeners[0].ratelimit.host_idle_timeout,
            Duration::from_millis(500)
        );
    }

    #[test]
    fn example_config() {
        let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("example.yml");
        let config = Config::from_file(&path).unwrap();
        println!("example.yml: {:?}", config);
        assert_eq!(config.listeners.len(), 2);
    }

    #[test]
    fn missing_file() {
        let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("no-such-file.yml");
        assert!(matches!(Config::from_file(&path), Err(Error::Io(_))));
    }
}
