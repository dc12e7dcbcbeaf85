//! # Latest Value Panel
//!
//! Tracks the most recent value a message path selects, the way a gauge or a
//! battery indicator would. The state is driven by three actions:
//!
//! - `Frame`: messages of one frame, scanned in order. Every message on the
//!   path's topic that yields a value replaces the previous one.
//! - `Path`: the user edited the path. It is re-parsed and re-evaluated
//!   against the last matching message.
//! - `Seek`: cached values are stale and dropped.
//!
//! A path producing more than one value is an error, reported as state.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};

use crate::core::{PanelContext, RenderState, SubscriptionPayload};
use crate::message_path::{evaluate_single, parse, ParseErrorKind, ParsedPath};
use crate::model::{Message, StructuredValue};

const VARIABLES_UNSUPPORTED: &str = "Message paths using variables are not currently supported";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LatestValueConfig {
    pub path: String,
    pub min_value: f64,
    pub max_value: f64,
}

impl Default for LatestValueConfig {
    fn default() -> Self {
        Self {
            path: String::new(),
            min_value: 0.0,
            max_value: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum LatestValueAction<'a> {
    Frame(&'a [Arc<Message>]),
    Path(&'a str),
    Seek,
}

/// Coarse bucket of a reading's fill level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Low,
    Medium,
    High,
}

/// A numeric value placed within the configured range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    pub raw: f64,
    /// `raw` clamped to `[min, max]` and mapped to `[0, 1]`.
    pub scaled: f64,
}

impl Reading {
    pub fn percent(&self) -> f64 {
        self.scaled * 100.0
    }

    pub fn level(&self) -> Level {
        match self.percent() {
            p if p <= 20.0 => Level::Low,
            p if p <= 50.0 => Level::Medium,
            _ => Level::High,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LatestValueState {
    path: String,
    parsed: Option<ParsedPath>,
    path_error: Option<String>,
    latest_message: Option<Arc<Message>>,
    latest_value: Option<StructuredValue>,
    error: Option<String>,
}

impl LatestValueState {
    pub fn new(path: &str) -> Self {
        let mut state = Self::default();
        state.reduce(LatestValueAction::Path(path));
        state
    }

    pub fn reduce(&mut self, action: LatestValueAction<'_>) {
        match action {
            LatestValueAction::Frame(messages) => self.on_frame(messages),
            LatestValueAction::Path(path) => self.on_path(path),
            LatestValueAction::Seek => {
                self.latest_message = None;
                self.latest_value = None;
                self.error = None;
            }
        }
    }

    fn on_frame(&mut self, messages: &[Arc<Message>]) {
        self.error = None;
        let Some(parsed) = self.parsed.as_ref().filter(|_| self.path_error.is_none()) else {
            if let Some(last) = messages.last() {
                self.latest_message = Some(Arc::clone(last));
            }
            return;
        };
        for message in messages.iter().filter(|m| m.topic == parsed.topic_name) {
            match evaluate_single(message, parsed) {
                Ok(Some(value)) => {
                    self.latest_value = Some(value.into_owned());
                    self.latest_message = Some(Arc::clone(message));
                }
                Ok(None) => {}
                Err(e) => {
                    self.latest_value = None;
                    self.error = Some(e.to_string());
                    return;
                }
            }
        }
    }

    fn on_path(&mut self, path: &str) {
        self.path = path.to_string();
        self.error = None;
        self.latest_value = None;
        match parse(path) {
            Ok(parsed) => {
                self.path_error = None;
                if let Some(message) = &self.latest_message {
                    match evaluate_single(message, &parsed) {
                        Ok(value) => self.latest_value = value.map(|v| v.into_owned()),
                        Err(e) => self.error = Some(e.to_string()),
                    }
                }
                self.parsed = Some(parsed);
            }
            Err(e) => {
                self.parsed = None;
                self.path_error = Some(match e.kind {
                    ParseErrorKind::UnsupportedVariable(_) | ParseErrorKind::UnsupportedDynamicBound(_) => {
                        VARIABLES_UNSUPPORTED.to_string()
                    }
                    _ => e.to_string(),
                });
            }
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Topic the panel needs, when the path parsed.
    pub fn topic(&self) -> Option<&str> {
        self.parsed.as_ref().map(|p| p.topic_name.as_str())
    }

    pub fn value(&self) -> Option<&StructuredValue> {
        self.latest_value.as_ref()
    }

    pub fn latest_message(&self) -> Option<&Arc<Message>> {
        self.latest_message.as_ref()
    }

    pub fn path_error(&self) -> Option<&str> {
        self.path_error.as_deref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Numeric reading of the current value. Strings holding a number count;
    /// anything else has no reading.
    pub fn reading(&self, config: &LatestValueConfig) -> Option<Reading> {
        let raw = match self.latest_value.as_ref()? {
            StructuredValue::String(text) => text.trim().parse::<f64>().ok()?,
            value => value.as_f64()?,
        };
        if raw.is_nan() {
            return None;
        }
        let span = config.max_value - config.min_value;
        let scaled = if span > 0.0 {
            (raw.clamp(config.min_value, config.max_value) - config.min_value) / span
        } else {
            0.0
        };
        Some(Reading { raw, scaled })
    }
}

/// A mounted latest-value panel: owns its `PanelContext` and keeps the state
/// current from the frames it receives.
pub struct LatestValuePanel {
    context: PanelContext,
    config: Mutex<LatestValueConfig>,
    state: Arc<Mutex<LatestValueState>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl LatestValuePanel {
    pub fn mount(context: PanelContext, config: LatestValueConfig) -> Self {
        let state = Arc::new(Mutex::new(LatestValueState::new(&config.path)));
        {
            let state = Arc::clone(&state);
            context.on_frame(move |render: &RenderState<'_>| {
                let Some(frame) = render.frame else {
                    return;
                };
                let mut state = lock(&state);
                if frame.did_seek {
                    state.reduce(LatestValueAction::Seek);
                }
                state.reduce(LatestValueAction::Frame(&frame.messages));
            });
        }
        let panel = Self {
            context,
            config: Mutex::new(config),
            state,
        };
        panel.resubscribe();
        panel
    }

    fn resubscribe(&self) {
        let topic = lock(&self.state).topic().map(str::to_string);
        match topic {
            Some(topic) => self.context.subscribe(&[SubscriptionPayload::new(topic)]),
            None => self.context.unsubscribe_all(),
        }
    }

    pub fn set_path(&self, path: &str) {
        lock(&self.state).reduce(LatestValueAction::Path(path));
        lock(&self.config).path = path.to_string();
        self.resubscribe();
    }

    pub fn set_range(&self, min_value: f64, max_value: f64) {
        let mut config = lock(&self.config);
        config.min_value = min_value;
        config.max_value = max_value;
    }

    pub fn config(&self) -> LatestValueConfig {
        lock(&self.config).clone()
    }

    /// A copy of the current state.
    pub fn state(&self) -> LatestValueState {
        lock(&self.state).clone()
    }

    pub fn reading(&self) -> Option<Reading> {
        let config = self.config();
        lock(&self.state).reading(&config)
    }

    pub fn context(&self) -> &PanelContext {
        &self.context
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Timestamp;
    use serde_json::json;

    fn msg(topic: &str, data: serde_json::Value) -> Arc<Message> {
        Arc::new(Message::new(topic, "sensor/Battery", Timestamp::new(1, 0), data.into()))
    }

    #[test]
    fn frame_keeps_last_matching_value() {
        let mut state = LatestValueState::new("/battery.voltage");
        let frame = [
            msg("/battery", json!({"voltage": 12.5})),
            msg("/imu", json!({"voltage": 99})),
            msg("/battery", json!({"current": 1})),
            msg("/battery", json!({"voltage": 12.1})),
        ];
        state.reduce(LatestValueAction::Frame(&frame));
        assert_eq!(state.value(), Some(&StructuredValue::Float(12.1)));
        assert!(state.error().is_none());
    }

    #[test]
    fn multiple_results_are_an_error() {
        let mut state = LatestValueState::new("/battery.cells[:]");
        state.reduce(LatestValueAction::Frame(&[msg("/battery", json!({"cells": [1, 2]}))]));
        assert_eq!(state.value(), None);
        assert!(state.error().unwrap().contains("multiple results"));
    }

    #[test]
    fn path_change_re_evaluates_latest_message() {
        let mut state = LatestValueState::new("/battery.voltage");
        state.reduce(LatestValueAction::Frame(&[msg(
            "/battery",
            json!({"voltage": 11.0, "percentage": 0.4}),
        )]));
        state.reduce(LatestValueAction::Path("/battery.percentage"));
        assert_eq!(state.value(), Some(&StructuredValue::Float(0.4)));
        assert_eq!(state.topic(), Some("/battery"));
    }

    #[test]
    fn variables_are_rejected_with_a_friendly_message() {
        let state = LatestValueState::new("/battery.cells[$start:]");
        assert_eq!(state.path_error(), Some(VARIABLES_UNSUPPORTED));
        assert_eq!(state.topic(), None);

        let state = LatestValueState::new("/battery.cells[0:count.len]");
        assert_eq!(state.path_error(), Some(VARIABLES_UNSUPPORTED));
    }

    #[test]
    fn seek_clears_cached_value() {
        let mut state = LatestValueState::new("/battery.voltage");
        state.reduce(LatestValueAction::Frame(&[msg("/battery", json!({"voltage": 12.0}))]));
        state.reduce(LatestValueAction::Seek);
        assert!(state.value().is_none());
        assert!(state.latest_message().is_none());
    }

    #[test]
    fn reading_is_clamped_into_range() {
        let mut state = LatestValueState::new("/battery.voltage");
        let config = LatestValueConfig {
            path: "/battery.voltage".into(),
            min_value: 10.0,
            max_value: 14.0,
        };
        state.reduce(LatestValueAction::Frame(&[msg("/battery", json!({"voltage": 13.0}))]));
        let reading = state.reading(&config).unwrap();
        assert_eq!(reading.scaled, 0.75);
        assert_eq!(reading.level(), Level::High);

        state.reduce(LatestValueAction::Frame(&[msg("/battery", json!({"voltage": "9.0"}))]));
        let reading = state.reading(&config).unwrap();
        assert_eq!(reading.raw, 9.0);
        assert_eq!(reading.scaled, 0.0);
        assert_eq!(reading.level(), Level::Low);

        state.reduce(LatestValueAction::Frame(&[msg("/battery", json!({"voltage": "n/a"}))]));
        assert!(state.reading(&config).is_none());
    }
}
