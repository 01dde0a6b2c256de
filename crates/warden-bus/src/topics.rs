//! # Topic Names
//!
//! Every topic the service publishes or consumes. Topic strings are part of
//! the external interface; changing one is a breaking change.

/// Metering events emitted after an allowed action executes.
pub const METERING_EVENTS: &str = "metering.events";

/// Allow/deny decisions emitted by the evaluator.
pub const POLICY_DECISIONS: &str = "policy.decisions";

/// Principal creation and deactivation notices.
pub const AGENT_LIFECYCLE: &str = "agent.lifecycle";

/// Policy activations and mandate revocations; drives cache invalidation.
pub const POLICY_CHANGES: &str = "policy.changes";

/// Dead-letter topic for messages that exhausted their retries.
///
/// Retention is the broker's concern (30 days in production); the
/// in-process log keeps everything so recovery tests can replay it.
pub const DLQ: &str = "dlq";
