use std::str::FromStr;
use std::time::Duration;

use envconfig::Envconfig;
use rdkafka::ClientConfig;
use uuid::Uuid;

use crate::envelope::FieldNaming;

#[derive(Envconfig, Clone, Debug)]
pub struct Config {
    #[envconfig(default = "localhost:9092")]
    pub kafka_hosts: String,

    #[envconfig(default = "envelope-consumer")]
    pub kafka_consumer_group: String,

    // Comma-separated, e.g. "orders.settled,bets.settled"
    #[envconfig(default = "")]
    pub kafka_consumer_topics: TopicList,

    #[envconfig(default = "earliest")]
    pub kafka_consumer_offset_reset: String, // earliest, latest

    // Offsets advance as soon as a record is handed to the dispatcher,
    // whether or not a handler matched it.
    #[envconfig(default = "true")]
    pub kafka_consumer_auto_commit: bool,

    #[envconfig(default = "60000")]
    pub kafka_consumer_auto_commit_interval_ms: u32,

    #[envconfig(default = "false")]
    pub kafka_tls: bool,

    // Reported as the group member identity; generated when unset
    pub kafka_client_id: Option<String>,

    #[envconfig(default = "camel")]
    pub envelope_field_naming: FieldNaming,

    #[envconfig(default = "1000")]
    pub poll_timeout_ms: EnvMsDuration,

    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "8080")]
    pub port: u16,
}

impl Config {
    pub fn init_with_defaults() -> Result<Self, envconfig::Error> {
        Config::init_from_env()
    }

    /// Produce a host:port address for binding a TcpListener.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn poll_timeout(&self) -> Duration {
        self.poll_timeout_ms.0
    }

    pub fn topics(&self) -> Vec<&str> {
        self.kafka_consumer_topics.iter().collect()
    }

    pub fn client_id(&self) -> String {
        self.kafka_client_id
            .clone()
            .unwrap_or_else(|| generate_client_id(&self.kafka_consumer_group))
    }

    pub fn to_client_config(&self) -> ClientConfig {
        ConsumerConfigBuilder::new(&self.kafka_hosts, &self.kafka_consumer_group)
            .with_client_id(&self.client_id())
            .with_auto_commit(
                self.kafka_consumer_auto_commit,
                self.kafka_consumer_auto_commit_interval_ms,
            )
            .with_offset_reset(&self.kafka_consumer_offset_reset)
            .with_tls(self.kafka_tls)
            .build()
    }
}

pub fn generate_client_id(group_id: &str) -> String {
    format!("{}-{}", group_id, Uuid::now_v7())
}

#[derive(Debug, Clone, Copy)]
pub struct EnvMsDuration(pub Duration);

#[derive(Debug, PartialEq, Eq)]
pub struct ParseEnvMsDurationError;

impl FromStr for EnvMsDuration {
    type Err = ParseEnvMsDurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ms = s.parse::<u64>().map_err(|_| ParseEnvMsDurationError)?;

        Ok(EnvMsDuration(Duration::from_millis(ms)))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopicList(pub Vec<String>);

impl TopicList {
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl FromStr for TopicList {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(TopicList(
            s.split(',')
                .map(str::trim)
                .filter(|topic| !topic.is_empty())
                .map(str::to_owned)
                .collect(),
        ))
    }
}

/// Builds the rdkafka configuration for a group consumer feeding the dispatcher.
///
/// Uses the eager assignment protocol (librdkafka's default): every revocation
/// covers the consumer's whole assignment and every assignment is a complete
/// replacement, which is what `RebalanceController` expects.
pub struct ConsumerConfigBuilder {
    config: ClientConfig,
}

impl ConsumerConfigBuilder {
    pub fn new(bootstrap_servers: &str, group_id: &str) -> Self {
        let mut config = ClientConfig::new();

        config
            .set("bootstrap.servers", bootstrap_servers)
            .set("group.id", group_id)
            .set("statistics.interval.ms", "10000")
            .set("socket.timeout.ms", "10000")
            .set("session.timeout.ms", "60000")
            .set("heartbeat.interval.ms", "5000")
            .set("enable.auto.commit", "true")
            .set("auto.commit.interval.ms", "60000")
            .set("auto.offset.reset", "earliest");

        Self { config }
    }

    /// Identity this consumer reports to the group coordinator.
    pub fn with_client_id(mut self, client_id: &str) -> Self {
        self.config.set("client.id", client_id);
        self
    }

    pub fn with_auto_commit(mut self, enabled: bool, interval_ms: u32) -> Self {
        self.config
            .set("enable.auto.commit", enabled.to_string())
            .set("auto.commit.interval.ms", interval_ms.to_string());
        self
    }

    pub fn with_offset_reset(mut self, policy: &str) -> Self {
        self.config.set("auto.offset.reset", policy);
        self
    }

    /// Enable TLS/SSL for Kafka connection
    pub fn with_tls(mut self, enabled: bool) -> Self {
        if enabled {
            self.config
                .set("security.protocol", "ssl")
                .set("enable.ssl.certificate.verification", "false");
        }
        self
    }

    pub fn build(self) -> ClientConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_list_parsing() {
        let topics: TopicList = "orders.settled, bets.settled,,".parse().unwrap();

        assert_eq!(
            topics,
            TopicList(vec!["orders.settled".to_owned(), "bets.settled".to_owned()])
        );
        assert_eq!("".parse::<TopicList>().unwrap(), TopicList::default());
    }

    #[test]
    fn test_env_ms_duration_parsing() {
        let duration: EnvMsDuration = "1500".parse().unwrap();

        assert_eq!(duration.0, Duration::from_millis(1500));
        assert_eq!(
            "soon".parse::<EnvMsDuration>().unwrap_err(),
            ParseEnvMsDurationError
        );
    }

    #[test]
    fn test_builder_defaults_and_overrides() {
        let config = ConsumerConfigBuilder::new("kafka:9092", "settlements")
            .with_client_id("settlements-1")
            .with_auto_commit(false, 5000)
            .with_offset_reset("latest")
            .build();

        assert_eq!(config.get("bootstrap.servers"), Some("kafka:9092"));
        assert_eq!(config.get("group.id"), Some("settlements"));
        assert_eq!(config.get("client.id"), Some("settlements-1"));
        assert_eq!(config.get("enable.auto.commit"), Some("false"));
        assert_eq!(config.get("auto.commit.interval.ms"), Some("5000"));
        assert_eq!(config.get("auto.offset.reset"), Some("latest"));
        assert_eq!(config.get("security.protocol"), None);
    }

    #[test]
    fn test_tls_settings() {
        let config = ConsumerConfigBuilder::new("kafka:9092", "settlements")
            .with_tls(true)
            .build();

        assert_eq!(config.get("security.protocol"), Some("ssl"));
    }

    #[test]
    fn test_generated_client_id_is_prefixed_with_group() {
        let first = generate_client_id("settlements");
        let second = generate_client_id("settlements");

        assert!(first.starts_with("settlements-"));
        assert_ne!(first, second);
    }
}
