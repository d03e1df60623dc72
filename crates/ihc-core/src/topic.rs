//! Bus topic addresses
//!
//! Every device topic has the shape `{prefix}/{direction}/{module}/{io}/{suffix}`
//! where direction is `output` or `input` and suffix is `state` or `set`.
//! Control topics live under `{prefix}/system/`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error type for topics that do not belong to the bridge namespace
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TopicError {
    #[error("topic '{0}' is outside the bridge namespace")]
    OutsideNamespace(String),

    #[error("topic '{0}' does not match {{direction}}/{{module}}/{{io}}/{{set|state}}")]
    InvalidFormat(String),

    #[error("unknown direction '{0}' (expected 'output' or 'input')")]
    UnknownDirection(String),

    #[error("'{0}' is not a valid module or io number")]
    InvalidId(String),

    #[error("topic '{0}' addresses a read-only input")]
    ReadOnly(String),

    #[error("unknown system topic '{0}'")]
    UnknownSystemTopic(String),
}

/// Which side of a module an address refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Writable output (relay, dimmer channel)
    Output,
    /// Read-only input telemetry
    Input,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Output => "output",
            Direction::Input => "input",
        }
    }
}

impl FromStr for Direction {
    type Err = TopicError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "output" => Ok(Direction::Output),
            "input" => Ok(Direction::Input),
            other => Err(TopicError::UnknownDirection(other.to_string())),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies one controller I/O point: module number plus io number
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceKey {
    pub module: u32,
    pub io: u32,
}

impl DeviceKey {
    pub fn new(module: u32, io: u32) -> Self {
        Self { module, io }
    }
}

impl fmt::Display for DeviceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.module, self.io)
    }
}

/// A structured `(direction, module, io)` address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TopicAddress {
    pub direction: Direction,
    pub key: DeviceKey,
}

impl TopicAddress {
    pub fn new(direction: Direction, module: u32, io: u32) -> Self {
        Self {
            direction,
            key: DeviceKey::new(module, io),
        }
    }

    pub fn output(module: u32, io: u32) -> Self {
        Self::new(Direction::Output, module, io)
    }

    pub fn input(module: u32, io: u32) -> Self {
        Self::new(Direction::Input, module, io)
    }
}

impl fmt::Display for TopicAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.direction, self.key)
    }
}

/// Reserved topics under `{prefix}/system/`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SystemTopic {
    /// Restart the controller service
    Restart,
    /// Restart the host the bridge runs on
    HostRestart,
    /// Free-text status notices published by the bridge
    Status,
}

impl SystemTopic {
    pub fn as_str(&self) -> &'static str {
        match self {
            SystemTopic::Restart => "restart",
            SystemTopic::HostRestart => "pi_restart",
            SystemTopic::Status => "status",
        }
    }
}

impl FromStr for SystemTopic {
    type Err = TopicError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "restart" => Ok(SystemTopic::Restart),
            "pi_restart" => Ok(SystemTopic::HostRestart),
            "status" => Ok(SystemTopic::Status),
            other => Err(TopicError::UnknownSystemTopic(other.to_string())),
        }
    }
}

/// A bus topic classified by the namespace
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusTopic {
    /// A reserved control topic
    System(SystemTopic),
    /// A write command for an output
    Set(DeviceKey),
    /// A state report
    State(TopicAddress),
}

/// The topic namespace the bridge publishes and subscribes under
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Namespace {
    prefix: String,
}

impl Namespace {
    /// Create a namespace rooted at `prefix` (an empty prefix means the bare root)
    pub fn new(prefix: impl Into<String>) -> Self {
        let prefix = prefix.into().trim_matches('/').to_string();
        Self { prefix }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn join(&self, rest: &str) -> String {
        if self.prefix.is_empty() {
            rest.to_string()
        } else {
            format!("{}/{}", self.prefix, rest)
        }
    }

    /// `{prefix}/{direction}/{module}/{io}/state`
    pub fn state_topic(&self, address: &TopicAddress) -> String {
        self.join(&format!("{}/state", address))
    }

    /// `{prefix}/output/{module}/{io}/set`
    pub fn set_topic(&self, key: DeviceKey) -> String {
        self.join(&format!("{}/{}/set", Direction::Output, key))
    }

    /// `{prefix}/system/{name}`
    pub fn system_topic(&self, topic: SystemTopic) -> String {
        self.join(&format!("system/{}", topic.as_str()))
    }

    /// Wildcard filter matching every output write command
    pub fn set_filter(&self) -> String {
        self.join("output/+/+/set")
    }

    /// Every topic filter the bridge subscribes to on each bus (re)connect
    pub fn subscriptions(&self) -> Vec<String> {
        vec![
            self.set_filter(),
            self.system_topic(SystemTopic::Restart),
            self.system_topic(SystemTopic::HostRestart),
        ]
    }

    /// Classify a topic received from the bus
    pub fn parse(&self, topic: &str) -> Result<BusTopic, TopicError> {
        let rest = if self.prefix.is_empty() {
            topic
        } else {
            topic
                .strip_prefix(self.prefix.as_str())
                .and_then(|r| r.strip_prefix('/'))
                .ok_or_else(|| TopicError::OutsideNamespace(topic.to_string()))?
        };

        let parts: Vec<&str> = rest.split('/').collect();
        match parts.as_slice() {
            ["system", name] => name.parse().map(BusTopic::System),
            [direction, module, io, suffix] => {
                let direction: Direction = direction.parse()?;
                match *suffix {
                    "set" if direction == Direction::Input => {
                        Err(TopicError::ReadOnly(topic.to_string()))
                    }
                    "set" => Ok(BusTopic::Set(DeviceKey::new(
                        parse_id(module)?,
                        parse_id(io)?,
                    ))),
                    "state" => Ok(BusTopic::State(TopicAddress::new(
                        direction,
                        parse_id(module)?,
                        parse_id(io)?,
                    ))),
                    _ => Err(TopicError::InvalidFormat(topic.to_string())),
                }
            }
            _ => Err(TopicError::InvalidFormat(topic.to_string())),
        }
    }
}

impl Default for Namespace {
    fn default() -> Self {
        Self::new(crate::DEFAULT_TOPIC_PREFIX)
    }
}

fn parse_id(segment: &str) -> Result<u32, TopicError> {
    segment
        .parse()
        .map_err(|_| TopicError::InvalidId(segment.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_topic() {
        let ns = Namespace::default();
        assert_eq!(
            ns.state_topic(&TopicAddress::output(4, 2)),
            "ihc/output/4/2/state"
        );
        assert_eq!(
            ns.state_topic(&TopicAddress::input(1, 7)),
            "ihc/input/1/7/state"
        );
    }

    #[test]
    fn test_system_topics() {
        let ns = Namespace::default();
        assert_eq!(ns.system_topic(SystemTopic::Restart), "ihc/system/restart");
        assert_eq!(
            ns.system_topic(SystemTopic::HostRestart),
            "ihc/system/pi_restart"
        );
        assert_eq!(ns.system_topic(SystemTopic::Status), "ihc/system/status");
    }

    #[test]
    fn test_subscriptions() {
        let ns = Namespace::default();
        assert_eq!(
            ns.subscriptions(),
            vec![
                "ihc/output/+/+/set".to_string(),
                "ihc/system/restart".to_string(),
                "ihc/system/pi_restart".to_string(),
            ]
        );
    }

    #[test]
    fn test_parse_set() {
        let ns = Namespace::default();
        assert_eq!(
            ns.parse("ihc/output/4/2/set").unwrap(),
            BusTopic::Set(DeviceKey::new(4, 2))
        );
    }

    #[test]
    fn test_parse_system() {
        let ns = Namespace::default();
        assert_eq!(
            ns.parse("ihc/system/pi_restart").unwrap(),
            BusTopic::System(SystemTopic::HostRestart)
        );
        assert_eq!(
            ns.parse("ihc/system/reboot").unwrap_err(),
            TopicError::UnknownSystemTopic("reboot".to_string())
        );
    }

    #[test]
    fn test_parse_malformed() {
        let ns = Namespace::default();
        assert_eq!(
            ns.parse("foo/bar").unwrap_err(),
            TopicError::OutsideNamespace("foo/bar".to_string())
        );
        assert_eq!(
            ns.parse("ihc/output/4/2").unwrap_err(),
            TopicError::InvalidFormat("ihc/output/4/2".to_string())
        );
        assert_eq!(
            ns.parse("ihc/output/4/2/set/extra").unwrap_err(),
            TopicError::InvalidFormat("ihc/output/4/2/set/extra".to_string())
        );
        assert_eq!(
            ns.parse("ihc/output/4/2/toggle").unwrap_err(),
            TopicError::InvalidFormat("ihc/output/4/2/toggle".to_string())
        );
        // prefix must be a whole segment
        assert_eq!(
            ns.parse("ihcx/output/4/2/set").unwrap_err(),
            TopicError::OutsideNamespace("ihcx/output/4/2/set".to_string())
        );
    }

    #[test]
    fn test_parse_bad_ids() {
        let ns = Namespace::default();
        assert_eq!(
            ns.parse("ihc/output/four/2/set").unwrap_err(),
            TopicError::InvalidId("four".to_string())
        );
        assert_eq!(
            ns.parse("ihc/output/4/-1/set").unwrap_err(),
            TopicError::InvalidId("-1".to_string())
        );
    }

    #[test]
    fn test_inputs_are_read_only() {
        let ns = Namespace::default();
        assert_eq!(
            ns.parse("ihc/input/4/2/set").unwrap_err(),
            TopicError::ReadOnly("ihc/input/4/2/set".to_string())
        );
        assert_eq!(
            ns.parse("ihc/input/4/2/state").unwrap(),
            BusTopic::State(TopicAddress::input(4, 2))
        );
    }

    #[test]
    fn test_empty_prefix() {
        let ns = Namespace::new("");
        assert_eq!(ns.set_filter(), "output/+/+/set");
        assert_eq!(
            ns.parse("output/4/2/set").unwrap(),
            BusTopic::Set(DeviceKey::new(4, 2))
        );
        assert_eq!(
            ns.parse("foo/bar").unwrap_err(),
            TopicError::InvalidFormat("foo/bar".to_string())
        );
    }

    #[test]
    fn test_prefix_slashes_trimmed() {
        let ns = Namespace::new("/home/ihc/");
        assert_eq!(ns.prefix(), "home/ihc");
        assert_eq!(ns.set_topic(DeviceKey::new(1, 3)), "home/ihc/output/1/3/set");
    }
}
