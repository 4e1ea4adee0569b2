//! Records shared through the coordination substrate
//!
//! Field names on the wire follow the platform's established PascalCase JSON
//! schema so records written by other tooling decode unchanged.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

/// Lifecycle state assigned to freshly created tests
pub const STATE_START: &str = "start";

/// Status code reported when a request never produced a response
pub const FAILED_STATUS: u16 = 0;

/// Header name -> ordered header values
pub type Headers = BTreeMap<String, Vec<String>>;

/// Decode JSON `null` as the type's default (Go-style nil slices and maps)
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

// ============================================================================
// Test
// ============================================================================

/// A load test specification
///
/// Identity is the lease id (hex) the record is bound to; when the lease
/// expires the record disappears from the substrate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Test {
    /// Free-form lifecycle tag, e.g. "start"
    #[serde(default)]
    pub state: String,

    /// Explanation for the current state
    #[serde(default)]
    pub state_reason: String,

    /// Lease id in hex, doubling as the public test id
    #[serde(default)]
    pub lease: String,

    /// Run duration in seconds
    #[serde(default)]
    pub length: u32,

    /// Number of concurrent virtual users per assigned worker
    #[serde(default)]
    pub virtual_users: u32,

    /// Worker identities expected to execute the test. Empty means no worker
    /// is assigned.
    #[serde(default, deserialize_with = "null_as_default")]
    pub servers: Vec<String>,

    /// Ordered request targets
    #[serde(default, deserialize_with = "null_as_default")]
    pub targets: Vec<TestTarget>,
}

impl Test {
    /// Create a test with the given duration (seconds) and virtual users
    pub fn new(length: u32, virtual_users: u32) -> Self {
        Self {
            length,
            virtual_users,
            ..Default::default()
        }
    }

    /// Add a target
    pub fn with_target(mut self, target: TestTarget) -> Self {
        self.targets.push(target);
        self
    }

    /// Assign a worker
    pub fn with_server(mut self, server_id: impl Into<String>) -> Self {
        self.servers.push(server_id.into());
        self
    }

    /// Whether `server_id` is one of the assigned workers
    pub fn is_assigned_to(&self, server_id: &str) -> bool {
        self.servers.iter().any(|s| s == server_id)
    }

    /// Strip request headers from every target; they may carry secrets
    pub fn redact(&mut self) {
        for target in &mut self.targets {
            target.headers = None;
        }
    }

    /// Redacted copy, safe to hand to readers
    pub fn redacted(mut self) -> Self {
        self.redact();
        self
    }
}

/// A single request template within a test
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestTarget {
    /// Request URI
    #[serde(rename = "URI", default)]
    pub uri: String,

    /// HTTP method
    #[serde(rename = "Method", default)]
    pub method: String,

    /// Request headers; never returned to readers
    #[serde(rename = "Headers", default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<Headers>,

    /// Request body
    #[serde(rename = "Body", default)]
    pub body: String,
}

impl TestTarget {
    /// Create a target
    pub fn new(method: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            method: method.into(),
            headers: None,
            body: String::new(),
        }
    }

    /// Append a header value
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .get_or_insert_with(Headers::new)
            .entry(name.into())
            .or_default()
            .push(value.into());
        self
    }

    /// Set the request body
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// Aggregation key: "METHOD URI"
    pub fn id(&self) -> String {
        format!("{} {}", self.method, self.uri)
    }
}

// ============================================================================
// Workers
// ============================================================================

/// Heartbeat record of a worker process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerRegistration {
    /// Process-generated worker id
    #[serde(rename = "ID")]
    pub id: String,

    /// Last heartbeat write time
    #[serde(rename = "Timestamp")]
    pub timestamp: DateTime<Utc>,
}

impl ServerRegistration {
    /// Registration stamped with the current time
    pub fn now(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            timestamp: Utc::now(),
        }
    }

    /// Time since the last heartbeat, as seen at `now`
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.timestamp
    }
}

// ============================================================================
// Results
// ============================================================================

/// One observed request, produced by a virtual user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestResult {
    /// Target id ("METHOD URI")
    pub target: String,
    /// Response status, or [`FAILED_STATUS`]
    pub status_code: u16,
    /// Wall-clock latency in milliseconds
    pub response_time: u64,
}

impl TestResult {
    /// Whether the request failed before producing a response
    pub fn is_failure(&self) -> bool {
        self.status_code == FAILED_STATUS
    }
}

/// Per-target rollup published by a worker
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AggregateTestResult {
    /// Target id ("METHOD URI")
    pub target: String,
    /// Number of observations
    pub requests: u64,
    /// Status code (as string) -> count
    #[serde(default, deserialize_with = "null_as_default")]
    pub status_codes: BTreeMap<String, u64>,
    /// 50th percentile latency (ms)
    #[serde(rename = "P50")]
    pub p50: u64,
    /// 90th percentile latency (ms)
    #[serde(rename = "P90")]
    pub p90: u64,
    /// 99th percentile latency (ms)
    #[serde(rename = "P99")]
    pub p99: u64,
    /// Throughput estimate
    pub requests_per_second: f64,
}

/// Results published by one worker for one test
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultData {
    /// Reporting worker
    #[serde(rename = "ServerID")]
    pub server_id: String,
    /// Per-target rollups, ordered by target id
    #[serde(rename = "Results", default, deserialize_with = "null_as_default")]
    pub results: Vec<AggregateTestResult>,
    /// Test id (lease hex)
    #[serde(rename = "Lease", default)]
    pub lease: String,
}

/// Response returned to clients creating a test
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestResponse {
    /// Public test id
    #[serde(rename = "ID")]
    pub id: String,
}

// ============================================================================
// Fanout envelope
// ============================================================================

/// Payload of a fanout message, discriminated by `Type`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "Type", content = "Data")]
pub enum SocketPayload {
    /// A test record changed
    #[serde(rename = "test")]
    Test(Test),
    /// A worker published results
    #[serde(rename = "results")]
    Results(ResultData),
}

impl SocketPayload {
    /// Category tag ("test" or "results")
    pub fn kind(&self) -> &'static str {
        match self {
            SocketPayload::Test(_) => "test",
            SocketPayload::Results(_) => "results",
        }
    }
}

/// Message broadcast to fanout subscribers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SocketResponse {
    /// Typed payload
    #[serde(flatten)]
    pub payload: SocketPayload,

    /// Routing tag; empty delivers to every subscriber
    #[serde(rename = "Location", default)]
    pub location: String,
}

impl SocketResponse {
    /// Message delivered to every subscriber
    pub fn broadcast(payload: SocketPayload) -> Self {
        Self {
            payload,
            location: String::new(),
        }
    }

    /// Message delivered only to subscribers tagged with `location`
    pub fn located(payload: SocketPayload, location: impl Into<String>) -> Self {
        Self {
            payload,
            location: location.into(),
        }
    }

    /// Whether the message targets every subscriber
    pub fn is_broadcast(&self) -> bool {
        self.location.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decodes_established_schema() {
        let raw = r#"{
            "State": "start",
            "StateReason": "",
            "Lease": "694d7a1b2c3d",
            "Length": 60,
            "VirtualUsers": 4,
            "Servers": null,
            "Targets": [
                {"URI": "http://localhost:8080/", "Method": "GET",
                 "Headers": {"Authorization": ["Bearer secret"]}, "Body": ""}
            ]
        }"#;

        let test: Test = serde_json::from_str(raw).unwrap();
        assert_eq!(test.length, 60);
        assert_eq!(test.virtual_users, 4);
        assert!(test.servers.is_empty());
        assert_eq!(test.targets.len(), 1);
        assert_eq!(test.targets[0].id(), "GET http://localhost:8080/");
        assert!(test.targets[0].headers.is_some());
    }

    #[test]
    fn test_redaction_strips_all_headers() {
        let test = Test::new(10, 1)
            .with_target(TestTarget::new("GET", "http://a/").with_header("X-Token", "s1"))
            .with_target(
                TestTarget::new("POST", "http://b/")
                    .with_header("Authorization", "Bearer s2")
                    .with_body("{}"),
            )
            .redacted();

        assert!(test.targets.iter().all(|t| t.headers.is_none()));
        let json = serde_json::to_string(&test).unwrap();
        assert!(!json.contains("Headers"));
        assert!(!json.contains("s1"));
        assert!(!json.contains("s2"));
    }

    #[test]
    fn test_assignment_requires_explicit_server() {
        let unassigned = Test::new(10, 1);
        assert!(!unassigned.is_assigned_to("urn:uuid:a"));

        let assigned = Test::new(10, 1).with_server("urn:uuid:a");
        assert!(assigned.is_assigned_to("urn:uuid:a"));
        assert!(!assigned.is_assigned_to("urn:uuid:b"));
    }

    #[test]
    fn test_header_values_keep_order() {
        let target = TestTarget::new("GET", "http://a/")
            .with_header("Accept", "text/html")
            .with_header("Accept", "application/json");
        let headers = target.headers.unwrap();
        assert_eq!(headers["Accept"], vec!["text/html", "application/json"]);
    }

    #[test]
    fn test_result_data_field_names() {
        let data = ResultData {
            server_id: "urn:uuid:a".into(),
            lease: "1f".into(),
            results: vec![AggregateTestResult {
                target: "GET http://a/".into(),
                requests: 3,
                p50: 20,
                p90: 30,
                p99: 30,
                requests_per_second: 50.0,
                ..Default::default()
            }],
        };
        let json = serde_json::to_string(&data).unwrap();
        assert!(json.contains("\"ServerID\":\"urn:uuid:a\""));
        assert!(json.contains("\"P50\":20"));
        assert!(json.contains("\"RequestsPerSecond\":50.0"));
        assert!(json.contains("\"StatusCodes\":{}"));
    }

    #[test]
    fn test_server_registration_age() {
        let mut reg = ServerRegistration::now("urn:uuid:a");
        let now = reg.timestamp;
        reg.timestamp = now - chrono::Duration::seconds(45);
        assert_eq!(reg.age(now), chrono::Duration::seconds(45));
    }

    #[test]
    fn test_socket_response_envelope() {
        let msg = SocketResponse::broadcast(SocketPayload::Results(ResultData::default()));
        assert!(msg.is_broadcast());
        assert_eq!(msg.payload.kind(), "results");

        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"Type\":\"results\""));
        assert!(json.contains("\"Data\":{"));
        assert!(json.contains("\"Location\":\"\""));
    }

    #[test]
    fn test_failed_status_sentinel() {
        let result = TestResult {
            target: "GET http://a/".into(),
            status_code: FAILED_STATUS,
            response_time: 12,
        };
        assert!(result.is_failure());
    }
}
