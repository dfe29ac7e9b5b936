use shared::AgentId;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use super::error::{RelayError, RelayResult};

/// Identity stamped on everything this relay publishes
pub const DEFAULT_AGENT_NAME: &str = "payment_service";

/// Where a consumer group without committed offsets starts reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OffsetReset {
    #[default]
    Earliest,
    Latest,
}

impl OffsetReset {
    pub const fn as_str(&self) -> &'static str {
        match self {
            OffsetReset::Earliest => "earliest",
            OffsetReset::Latest => "latest",
        }
    }
}

impl fmt::Display for OffsetReset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OffsetReset {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "earliest" => Ok(OffsetReset::Earliest),
            "latest" => Ok(OffsetReset::Latest),
            other => Err(RelayError::config(format!(
                "AUTO_OFFSET_RESET must be `earliest` or `latest`, got `{other}`"
            ))),
        }
    }
}

/// Broker connection settings, fixed for the process lifetime
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerConfig {
    pub bootstrap_servers: Vec<String>,
    pub consumer_group_id: String,
    pub auto_offset_reset: OffsetReset,
    /// Producer message timeout, also bounds the final flush on release
    pub delivery_timeout: Duration,
}

impl BrokerConfig {
    pub fn new(bootstrap_servers: Vec<String>, consumer_group_id: impl Into<String>) -> Self {
        Self {
            bootstrap_servers,
            consumer_group_id: consumer_group_id.into(),
            auto_offset_reset: OffsetReset::default(),
            delivery_timeout: Duration::from_secs(5),
        }
    }

    /// Comma separated form expected by broker clients
    pub fn servers_list(&self) -> String {
        self.bootstrap_servers.join(",")
    }
}

/// Fixed-delay retry budget for broker bootstrap
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub cooldown: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 6,
            cooldown: Duration::from_secs(10),
        }
    }
}

/// Relay 配置
///
/// # 环境变量
///
/// | 环境变量 | 默认值 | 说明 |
/// |----------|--------|------|
/// | KAFKA_BOOTSTRAP_SERVERS | (必填) | broker 地址列表，逗号分隔 |
/// | PAYMENT_CONSUMER_GROUP_ID | (必填) | consumer group |
/// | AUTO_OFFSET_RESET | earliest | earliest / latest |
/// | AGENT_NAME | payment_service | 发送者标识 |
/// | BOOTSTRAP_MAX_RETRIES | 6 | 连接尝试次数 |
/// | BOOTSTRAP_RETRY_COOLDOWN_SECS | 10 | 每次尝试间隔(秒) |
/// | POLL_TIMEOUT_MS | 1000 | 单次 poll 等待(毫秒) |
/// | PAYMENT_WAIT_MS | 3000 | 模拟支付确认等待(毫秒) |
/// | DELIVERY_TIMEOUT_MS | 5000 | 投递超时(毫秒) |
///
/// `LOG_LEVEL` and `LOG_DIR` are read by the logger, see
/// [`crate::utils::logger::init_logger_from_env`].
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub agent: AgentId,
    pub broker: BrokerConfig,
    pub retry: RetryPolicy,
    /// Upper bound on a single poll, so shutdown is noticed promptly
    pub poll_timeout: Duration,
    /// Stand-in for the payment gateway confirmation
    pub payment_wait: Duration,
}

impl RelayConfig {
    pub fn new(agent: impl Into<AgentId>, broker: BrokerConfig) -> Self {
        Self {
            agent: agent.into(),
            broker,
            retry: RetryPolicy::default(),
            poll_timeout: Duration::from_secs(1),
            payment_wait: Duration::from_secs(3),
        }
    }

    /// 从环境变量加载配置
    pub fn from_env() -> RelayResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup (environment, map in tests)
    pub fn from_lookup<F>(lookup: F) -> RelayResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let servers = required(&lookup, "KAFKA_BOOTSTRAP_SERVERS")?;
        let bootstrap_servers: Vec<String> = servers
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();
        if bootstrap_servers.is_empty() {
            return Err(RelayError::config("KAFKA_BOOTSTRAP_SERVERS is empty"));
        }

        let mut broker =
            BrokerConfig::new(bootstrap_servers, required(&lookup, "PAYMENT_CONSUMER_GROUP_ID")?);
        if let Some(reset) = lookup("AUTO_OFFSET_RESET") {
            broker.auto_offset_reset = reset.parse()?;
        }
        broker.delivery_timeout = Duration::from_millis(parsed(&lookup, "DELIVERY_TIMEOUT_MS", 5000)?);

        let max_attempts: u32 = parsed(&lookup, "BOOTSTRAP_MAX_RETRIES", 6)?;
        if max_attempts == 0 {
            return Err(RelayError::config("BOOTSTRAP_MAX_RETRIES must be at least 1"));
        }

        let agent = lookup("AGENT_NAME")
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_AGENT_NAME.to_string());

        Ok(Self {
            agent: AgentId::new(agent),
            broker,
            retry: RetryPolicy {
                max_attempts,
                cooldown: Duration::from_secs(parsed(&lookup, "BOOTSTRAP_RETRY_COOLDOWN_SECS", 10)?),
            },
            poll_timeout: Duration::from_millis(parsed(&lookup, "POLL_TIMEOUT_MS", 1000)?),
            payment_wait: Duration::from_millis(parsed(&lookup, "PAYMENT_WAIT_MS", 3000)?),
        })
    }

    pub fn with_retry(mut self, max_attempts: u32, cooldown: Duration) -> Self {
        self.retry = RetryPolicy {
            max_attempts,
            cooldown,
        };
        self
    }

    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    pub fn with_payment_wait(mut self, wait: Duration) -> Self {
        self.payment_wait = wait;
        self
    }
}

fn required<F>(lookup: &F, key: &str) -> RelayResult<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| RelayError::config(format!("{key} is required")))
}

fn parsed<F, T>(lookup: &F, key: &str, default: T) -> RelayResult<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| RelayError::config(format!("{key} has an invalid value: `{raw}`"))),
        None => Ok(default),
    }
}
