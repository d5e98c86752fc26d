//! Rule resolution service client.

use crate::http::RestClient;
use async_trait::async_trait;
use convoy_core::{
    ConvoyConfig, ConvoyResult, ResolveRequest, ResolveResponse, RuleService, Service,
};
use std::time::Duration;
use tracing::debug;

/// HTTP implementation of [`RuleService`].
#[derive(Debug, Clone)]
pub struct RuleClient {
    rest: RestClient,
}

impl RuleClient {
    pub fn new(base_url: &str, timeout: Duration) -> ConvoyResult<Self> {
        Ok(Self {
            rest: RestClient::new(Service::Rule, base_url, timeout)?,
        })
    }

    pub fn from_config(config: &ConvoyConfig) -> ConvoyResult<Self> {
        Ok(Self {
            rest: RestClient::from_config(Service::Rule, config)?,
        })
    }
}

#[async_trait]
impl RuleService for RuleClient {
    async fn resolve(&self, request: &ResolveRequest) -> ConvoyResult<ResolveResponse> {
        let response: ResolveResponse = self.rest.post_json(&["resolve"], request).await?;
        debug!(
            rules = response.rules.len(),
            entity_ids = response.entity_ids.len(),
            attribute_names = response.attribute_names.len(),
            all_entities = response.all_entities,
            "rules resolved"
        );
        Ok(response)
    }
}
