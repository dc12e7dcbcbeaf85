//! # Service Call Panel
//!
//! A button that calls one service on the robot with a JSON request and shows
//! the response. The button is only enabled when the active source advertises
//! `CallServices`, a service name is configured and the request parses.
//! Failures are shown as the response; they never propagate out of the panel.

use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};

use crate::core::PanelContext;
use crate::model::{Capability, StructuredValue};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServiceCallConfig {
    pub service_name: String,
    pub request_payload: String,
}

impl Default for ServiceCallConfig {
    fn default() -> Self {
        Self {
            service_name: String::new(),
            request_payload: "{}".to_string(),
        }
    }
}

/// Whether the call button can be pressed, and why not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceCallStatus {
    Ready,
    Disabled(&'static str),
    InvalidRequest(String),
}

impl ServiceCallStatus {
    pub fn can_call(&self) -> bool {
        matches!(self, ServiceCallStatus::Ready)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceResponse {
    /// Response rendered as pretty-printed JSON.
    Success(String),
    Failure(String),
}

/// Parses a request payload. An empty payload is an empty object.
pub fn parse_request(payload: &str) -> Result<StructuredValue, String> {
    if payload.trim().is_empty() {
        return Ok(StructuredValue::mapping::<String, _>(Vec::new()));
    }
    serde_json::from_str::<serde_json::Value>(payload)
        .map(StructuredValue::from)
        .map_err(|e| e.to_string())
}

pub struct ServiceCallPanel {
    context: PanelContext,
    config: Mutex<ServiceCallConfig>,
    last_response: Mutex<Option<ServiceResponse>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ServiceCallPanel {
    pub fn mount(context: PanelContext, config: ServiceCallConfig) -> Self {
        Self {
            context,
            config: Mutex::new(config),
            last_response: Mutex::new(None),
        }
    }

    pub fn config(&self) -> ServiceCallConfig {
        lock(&self.config).clone()
    }

    pub fn set_config(&self, config: ServiceCallConfig) {
        *lock(&self.config) = config;
    }

    pub fn status(&self) -> ServiceCallStatus {
        if !self.context.capabilities().contains(Capability::CallServices) {
            return ServiceCallStatus::Disabled(
                "Connect to a data source that supports calling services",
            );
        }
        let config = self.config();
        if config.service_name.trim().is_empty() {
            return ServiceCallStatus::Disabled("Configure a service in the panel settings");
        }
        match parse_request(&config.request_payload) {
            Ok(_) => ServiceCallStatus::Ready,
            Err(e) => ServiceCallStatus::InvalidRequest(e),
        }
    }

    /// Calls the configured service and records the response.
    pub async fn call(&self) -> ServiceResponse {
        let response = match self.status() {
            ServiceCallStatus::Ready => self.call_configured().await,
            ServiceCallStatus::Disabled(reason) => ServiceResponse::Failure(reason.to_string()),
            ServiceCallStatus::InvalidRequest(e) => {
                ServiceResponse::Failure(format!("Invalid request payload: {}", e))
            }
        };
        *lock(&self.last_response) = Some(response.clone());
        response
    }

    async fn call_configured(&self) -> ServiceResponse {
        let config = self.config();
        let request = match parse_request(&config.request_payload) {
            Ok(request) => request,
            Err(e) => return ServiceResponse::Failure(format!("Invalid request payload: {}", e)),
        };
        log::debug!("Calling service '{}'", config.service_name);
        match self.context.call_service(&config.service_name, request).await {
            Ok(response) => match serde_json::to_string_pretty(&response.to_json()) {
                Ok(text) => ServiceResponse::Success(text),
                Err(e) => ServiceResponse::Failure(e.to_string()),
            },
            Err(e) => ServiceResponse::Failure(e.to_string()),
        }
    }

    pub fn last_response(&self) -> Option<ServiceResponse> {
        lock(&self.last_response).clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{MessagePipeline, PipelineConfig};
    use crate::ingestors::{ChannelSource, SourceError};
    use crate::model::Capabilities;
    use serde_json::json;
    use std::sync::Arc;

    fn config(service: &str, payload: &str) -> ServiceCallConfig {
        ServiceCallConfig {
            service_name: service.to_string(),
            request_payload: payload.to_string(),
        }
    }

    #[test]
    fn request_payload_parsing() {
        assert_eq!(
            parse_request("{\n  \"data\": true\n}").unwrap(),
            StructuredValue::from(json!({"data": true}))
        );
        assert!(parse_request("{ 'b: 2 }").is_err());
        assert_eq!(parse_request("  ").unwrap(), StructuredValue::from(json!({})));
    }

    #[tokio::test]
    async fn disabled_without_capability() {
        let pipeline = MessagePipeline::new(PipelineConfig::default());
        let (source, _feed) = ChannelSource::new("plain", Capabilities::none());
        pipeline.connect(Arc::new(source)).await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let panel = ServiceCallPanel::mount(pipeline.panel_context(), config("/set_bool", "{}"));
        assert!(!panel.status().can_call());
        assert!(matches!(panel.call().await, ServiceResponse::Failure(_)));
        pipeline.disconnect().await;
    }

    #[tokio::test]
    async fn success_and_unknown_service() {
        let pipeline = MessagePipeline::new(PipelineConfig::default());
        let (source, _feed) = ChannelSource::new("robot", Capabilities::none());
        let source = source.with_service_handler(|name, _request| {
            if name == "/set_bool" {
                Ok(StructuredValue::from(json!({"success": true})))
            } else {
                Err(SourceError::ServiceFailed(format!("Service \"{}\" does not exist", name)))
            }
        });
        pipeline.connect(Arc::new(source)).await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let panel = ServiceCallPanel::mount(
            pipeline.panel_context(),
            config("/set_bool", "{\n  \"data\": true\n}"),
        );
        assert_eq!(panel.status(), ServiceCallStatus::Ready);
        assert_eq!(
            panel.call().await,
            ServiceResponse::Success("{\n  \"success\": true\n}".to_string())
        );

        panel.set_config(config("/non_existing_service", "{}"));
        match panel.call().await {
            ServiceResponse::Failure(message) => {
                assert!(message.contains("Service \"/non_existing_service\" does not exist"))
            }
            other => panic!("unexpected response {:?}", other),
        }

        panel.set_config(config("/set_bool", "{ 'b: 2 }"));
        assert!(matches!(panel.status(), ServiceCallStatus::InvalidRequest(_)));
        pipeline.disconnect().await;
    }
}
