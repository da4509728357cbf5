//! 配置管理模块
//!
//! 支持多格式配置文件加载，环境变量覆盖，以及类型安全的配置访问。

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::events::topics;

/// 文档存储后端类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Elasticsearch,
    /// 进程内存储，仅用于本地开发和测试
    Memory,
}

/// 文档存储配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub url: String,
    pub index: String,
    pub request_timeout_seconds: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Elasticsearch,
            url: "http://localhost:9200".to_string(),
            index: "products".to_string(),
            request_timeout_seconds: 10,
        }
    }
}

/// Kafka 配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct KafkaConfig {
    pub brokers: String,
    pub auto_offset_reset: String,
    /// 声明 topic 时使用的分区数
    pub topic_partitions: i32,
    /// 声明 topic 时使用的副本数，副本越多消息在 broker 重启后越不易丢失
    pub replication_factor: i32,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            brokers: "localhost:9092".to_string(),
            auto_offset_reset: "earliest".to_string(),
            topic_partitions: 1,
            replication_factor: 1,
        }
    }
}

/// 入站事件接收配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReceiverConfig {
    /// 订阅的入站 topic，没有对应处理器的 topic 会被跳过
    pub topics: Vec<String>,
    /// 队列名后缀，完整队列名为 `{topic}:{queue_suffix}`
    pub queue_suffix: String,
    /// 同时处于未确认状态的最大投递数
    pub prefetch_count: u16,
    /// 拒绝并重新入队前的固定等待时间
    pub reject_delay_ms: u64,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            topics: vec![topics::RATING_UPDATED.to_string()],
            queue_suffix: "catalog".to_string(),
            prefetch_count: 5,
            reject_delay_ms: 5000,
        }
    }
}

impl ReceiverConfig {
    pub fn reject_delay(&self) -> Duration {
        Duration::from_millis(self.reject_delay_ms)
    }

    /// topic 对应的队列名，如 `rating_updated:catalog`
    pub fn queue_name(&self, topic: &str) -> String {
        format!("{}:{}", topic, self.queue_suffix)
    }
}

/// 评分服务（reviewing）配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReviewingConfig {
    pub base_url: String,
    pub timeout_seconds: u64,
    pub max_retries: u32,
}

impl Default for ReviewingConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8081".to_string(),
            timeout_seconds: 5,
            max_retries: 3,
        }
    }
}

/// 服务配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

/// 可观测性配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// 服务名称，用于标识日志和指标的来源
    pub service_name: String,
    pub log_level: String,
    /// 日志输出格式：json（结构化）或 pretty（人类可读）
    pub log_format: String,
    pub metrics_enabled: bool,
    pub metrics_port: u16,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            service_name: "unknown-service".to_string(),
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            metrics_enabled: true,
            metrics_port: 9090,
        }
    }
}

impl ObservabilityConfig {
    /// 注入服务名
    pub fn with_service_name(mut self, service_name: &str) -> Self {
        self.service_name = service_name.to_string();
        self
    }

    pub fn json_logs(&self) -> bool {
        self.log_format.eq_ignore_ascii_case("json")
    }
}

/// 应用配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub service_name: String,
    pub environment: String,
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub kafka: KafkaConfig,
    pub receiver: ReceiverConfig,
    pub reviewing: ReviewingConfig,
    pub observability: ObservabilityConfig,
    /// 收到关闭信号后留给在途请求的宽限时间
    pub shutdown_timeout_seconds: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            service_name: "catalog-service".to_string(),
            environment: "development".to_string(),
            server: ServerConfig::default(),
            storage: StorageConfig::default(),
            kafka: KafkaConfig::default(),
            receiver: ReceiverConfig::default(),
            reviewing: ReviewingConfig::default(),
            observability: ObservabilityConfig::default(),
            shutdown_timeout_seconds: 3,
        }
    }
}

impl AppConfig {
    /// 从配置文件和环境变量加载配置
    ///
    /// 加载顺序（后加载的会覆盖先加载的同名配置项）：
    /// 1. 当前目录的 .env 文件（如存在）
    /// 2. config/default.toml（默认配置）
    /// 3. config/{environment}.toml（环境特定配置）
    /// 4. config/{service_name}.toml（服务特定配置）
    /// 5. 环境变量（CATALOG_ 前缀，层级用双下划线，如 CATALOG_KAFKA__BROKERS -> kafka.brokers）
    pub fn load(service_name: &str) -> Result<Self, ConfigError> {
        // .env 不存在是正常情况（容器内直接注入环境变量）
        let _ = dotenvy::dotenv();

        let env = std::env::var("CATALOG_ENV").unwrap_or_else(|_| "development".to_string());

        let config_dir = std::env::var("CONFIG_DIR").unwrap_or_else(|_| "config".to_string());

        let builder = Config::builder()
            .set_default("service_name", service_name)?
            .set_default("environment", env.clone())?
            .add_source(File::from(Path::new(&config_dir).join("default.toml")).required(false))
            .add_source(
                File::from(Path::new(&config_dir).join(format!("{}.toml", env))).required(false),
            )
            .add_source(
                File::from(Path::new(&config_dir).join(format!("{}.toml", service_name)))
                    .required(false),
            )
            .add_source(
                Environment::with_prefix("CATALOG")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// 获取服务地址
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_seconds)
    }

    /// 是否为生产环境
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}
