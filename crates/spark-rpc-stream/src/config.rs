//! 流的运行配置。
//!
//! # 设计背景（Why）
//! - 强制排空是阻塞式的，需要一个可配置的安全阀，避免传输层缺陷把拥有者线程永久挂起；
//! - 响应头只有少量字段适合写入日志，白名单与标签都应由部署方决定，而非写死在代码里。
//!
//! # 契约说明（What）
//! - 支持构建器式配置，也支持通过 `serde` 从 TOML/JSON 片段反序列化，缺省字段取默认值；
//! - 未知字段视为配置错误。

use std::time::Duration;

use serde::Deserialize;
use spark_rpc_transport::MetadataMap;

const DEFAULT_LABEL: &str = "rpc-stream";
const DEFAULT_DRAIN_TIMEOUT_MS: u64 = 10_000;

/// 毫秒数，超出 `u64` 时饱和。
pub(crate) fn saturating_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn default_logged_headers() -> Vec<String> {
    ["date", "server", "x-request-id"]
        .into_iter()
        .map(String::from)
        .collect()
}

/// 流的配置项。
///
/// - `label`：写入所有日志事件的 `stream` 字段，用于区分同进程内的多条流；
/// - `drain_timeout_ms`：排空单个操作的最长等待时间，`None` 表示无限等待；
/// - `logged_headers`：流建立时允许写入调试日志的响应头名称（大小写不敏感）。
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct StreamConfig {
    label: String,
    drain_timeout_ms: Option<u64>,
    logged_headers: Vec<String>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            label: DEFAULT_LABEL.to_owned(),
            drain_timeout_ms: Some(DEFAULT_DRAIN_TIMEOUT_MS),
            logged_headers: default_logged_headers(),
        }
    }
}

impl StreamConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置日志标签。
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// 设置排空超时；`None` 表示无限等待。
    pub fn with_drain_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.drain_timeout_ms = timeout.map(saturating_millis);
        self
    }

    /// 替换响应头白名单。
    pub fn with_logged_headers<I, S>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.logged_headers = headers.into_iter().map(Into::into).collect();
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn drain_timeout(&self) -> Option<Duration> {
        self.drain_timeout_ms.map(Duration::from_millis)
    }

    pub fn logged_headers(&self) -> &[String] {
        &self.logged_headers
    }

    /// 按白名单筛选可写入日志的响应头。
    pub(crate) fn loggable_headers(&self, headers: &MetadataMap) -> MetadataMap {
        headers
            .iter()
            .filter(|(name, _)| {
                self.logged_headers
                    .iter()
                    .any(|allowed| allowed.eq_ignore_ascii_case(name))
            })
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect()
    }
}
