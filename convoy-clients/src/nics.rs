//! NIC inventory client.

use crate::http::RestClient;
use async_trait::async_trait;
use convoy_core::{ConvoyConfig, ConvoyResult, NicRecord, NicService, Service};
use std::time::Duration;

/// HTTP implementation of [`NicService`].
#[derive(Debug, Clone)]
pub struct NicClient {
    rest: RestClient,
}

impl NicClient {
    pub fn new(base_url: &str, timeout: Duration) -> ConvoyResult<Self> {
        Ok(Self {
            rest: RestClient::new(Service::Nic, base_url, timeout)?,
        })
    }

    pub fn from_config(config: &ConvoyConfig) -> ConvoyResult<Self> {
        Ok(Self {
            rest: RestClient::from_config(Service::Nic, config)?,
        })
    }
}

#[async_trait]
impl NicService for NicClient {
    async fn list_nics(&self, node_id: &str) -> ConvoyResult<Vec<NicRecord>> {
        self.rest
            .get_json(&["nics"], Some(&[("belongs_to", node_id)]))
            .await
    }

    async fn update_nic(&self, nic: &NicRecord) -> ConvoyResult<()> {
        self.rest.put_unit(&["nics", &nic.mac], nic).await
    }

    async fn delete_nic(&self, mac: &str) -> ConvoyResult<()> {
        self.rest.delete(&["nics", mac]).await
    }
}
