//! Tracking events and the sinks that receive them.

use crate::{error::SimResult, user::UserRecord};
use serde::Serialize;
use std::collections::BTreeMap;

/// Log target for emitted tracking events.
pub const TRACKING_TARGET: &str = "tracking";

/// The wire shape of a tracking event, as it appears on the log stream.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackingEvent<'a> {
    pub event: &'a str,
    pub user_key: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metric_value: Option<f64>,
}

pub trait EventSink {
    /// Record one named event for `user`.
    fn track(
        &mut self,
        event_name: &str,
        user: &UserRecord,
        metric_value: Option<f64>,
    ) -> SimResult<()>;

    /// Deliver anything buffered. Called once after the run.
    fn flush(&mut self) -> SimResult<()> {
        Ok(())
    }
}

/// Writes each event as a JSON line on the `tracking` log target.
#[derive(Debug, Default)]
pub struct LogEventSink {
    counts: BTreeMap<String, u64>,
}

impl LogEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Events emitted so far, per event name.
    pub fn counts(&self) -> &BTreeMap<String, u64> {
        &self.counts
    }

    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }
}

impl EventSink for LogEventSink {
    fn track(
        &mut self,
        event_name: &str,
        user: &UserRecord,
        metric_value: Option<f64>,
    ) -> SimResult<()> {
        let event = TrackingEvent {
            event: event_name,
            user_key: user.key(),
            metric_value,
        };
        log::info!(target: TRACKING_TARGET, "{}", serde_json::to_string(&event)?);
        *self.counts.entry(event_name.to_string()).or_insert(0) += 1;
        Ok(())
    }

    fn flush(&mut self) -> SimResult<()> {
        for (name, count) in &self.counts {
            log::info!(target: TRACKING_TARGET, "flushed {count} '{name}' event(s)");
        }
        Ok(())
    }
}
