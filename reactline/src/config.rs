use crate::error::Error;
use crate::util;

/// Server configuration.
#[derive(Clone)]
pub struct Config {
    /// Listen address, `[scheme://]host:port`. Schemes: `tcp` (default),
    /// `tcp4`, `tcp6`, `unix`.
    pub addr: String,
    /// Number of worker loops. 0 = number of CPUs.
    pub num_loops: usize,
    /// TCP listen backlog.
    pub backlog: i32,
    /// Enable TCP_NODELAY on accepted connections.
    pub tcp_nodelay: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            addr: String::new(),
            num_loops: 0,
            backlog: 1024,
            tcp_nodelay: true,
        }
    }
}

impl Config {
    /// Validate configuration values. Returns an error if any value is out
    /// of range or the listen address is malformed.
    pub fn validate(&self) -> Result<(), Error> {
        if self.addr.is_empty() {
            return Err(Error::InvalidAddr("listen address not set".into()));
        }
        util::parse_listen_addr(&self.addr)?;
        if self.backlog <= 0 {
            return Err(Error::InvalidAddr("backlog must be > 0".into()));
        }
        Ok(())
    }
}

/// Builder for [`Config`] with discoverable methods and `build()` validation.
///
/// # Example
///
/// ```rust
/// use reactline::ConfigBuilder;
///
/// let config = ConfigBuilder::new()
///     .addr("127.0.0.1:5100")
///     .num_loops(2)
///     .backlog(512)
///     .build()
///     .expect("invalid config");
/// ```
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder with default config values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the listen address.
    pub fn addr(mut self, addr: impl Into<String>) -> Self {
        self.config.addr = addr.into();
        self
    }

    /// Set the number of worker loops. 0 = number of CPUs.
    pub fn num_loops(mut self, n: usize) -> Self {
        self.config.num_loops = n;
        self
    }

    /// Set the TCP listen backlog.
    pub fn backlog(mut self, n: i32) -> Self {
        self.config.backlog = n;
        self
    }

    /// Enable or disable TCP_NODELAY on accepted connections.
    pub fn tcp_nodelay(mut self, enable: bool) -> Self {
        self.config.tcp_nodelay = enable;
        self
    }

    /// Validate and return the config.
    pub fn build(self) -> Result<Config, Error> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_round_trip() {
        let config = ConfigBuilder::new()
            .addr("tcp://0.0.0.0:5100")
            .num_loops(4)
            .backlog(256)
            .tcp_nodelay(false)
            .build()
            .unwrap();
        assert_eq!(config.addr, "tcp://0.0.0.0:5100");
        assert_eq!(config.num_loops, 4);
        assert_eq!(config.backlog, 256);
        assert!(!config.tcp_nodelay);
    }

    #[test]
    fn empty_addr_rejected() {
        assert!(Config::default().validate().is_err());
    }

    #[test]
    fn bad_scheme_rejected() {
        let config = ConfigBuilder::new().addr("udp://0.0.0.0:53").build();
        assert!(config.is_err());
    }
}
