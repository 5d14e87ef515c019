use std::time::Duration;

use crate::config::LoadConfig;
use crate::error::PmeterError;

/// Builder for the shared `reqwest::Client` every virtual user reuses.
pub struct HttpClientBuilder {
    timeout: Duration,
    pool_max_idle_per_host: usize,
    pool_idle_timeout: Duration,
    user_agent: String,
}

impl Default for HttpClientBuilder {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            pool_max_idle_per_host: 100,
            pool_idle_timeout: Duration::from_secs(90),
            user_agent: format!("pmeter/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl HttpClientBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from the transport settings of a [`LoadConfig`].
    pub fn from_config(config: &LoadConfig) -> Self {
        Self::default()
            .timeout(config.request_timeout())
            .pool_max_idle_per_host(config.users as usize)
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn pool_max_idle_per_host(mut self, n: usize) -> Self {
        self.pool_max_idle_per_host = n;
        self
    }

    pub fn pool_idle_timeout(mut self, timeout: Duration) -> Self {
        self.pool_idle_timeout = timeout;
        self
    }

    pub fn user_agent(mut self, ua: impl Into<String>) -> Self {
        self.user_agent = ua.into();
        self
    }

    pub fn build(self) -> Result<reqwest::Client, PmeterError> {
        let client = reqwest::Client::builder()
            .timeout(self.timeout)
            .pool_max_idle_per_host(self.pool_max_idle_per_host)
            .pool_idle_timeout(self.pool_idle_timeout)
            .user_agent(self.user_agent)
            .gzip(true)
            .brotli(true)
            .build()?;
        Ok(client)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_default_builds_successfully() {
        assert!(HttpClientBuilder::default().build().is_ok());
    }

    #[test]
    fn default_builder_has_expected_values() {
        let builder = HttpClientBuilder::default();
        assert_eq!(builder.timeout, Duration::from_secs(30));
        assert_eq!(builder.pool_max_idle_per_host, 100);
        assert_eq!(builder.pool_idle_timeout, Duration::from_secs(90));
        assert!(builder.user_agent.starts_with("pmeter/"));
    }

    #[test]
    fn from_config_takes_timeout_and_pool_size() {
        let config = LoadConfig {
            users: 7,
            request_timeout_ms: 2_500,
            ..LoadConfig::default()
        };
        let builder = HttpClientBuilder::from_config(&config);
        assert_eq!(builder.timeout, Duration::from_millis(2_500));
        assert_eq!(builder.pool_max_idle_per_host, 7);
    }

    #[test]
    fn builder_chaining_all_options() {
        let client = HttpClientBuilder::new()
            .timeout(Duration::from_secs(10))
            .pool_max_idle_per_host(5)
            .pool_idle_timeout(Duration::from_secs(30))
            .user_agent("pmeter-test")
            .build();
        assert!(client.is_ok());
    }
}
