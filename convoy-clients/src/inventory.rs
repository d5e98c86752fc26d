//! Inventory service client.

use crate::http::RestClient;
use async_trait::async_trait;
use convoy_core::{
    ConvoyConfig, ConvoyResult, Entity, EntityId, InventoryQuery, InventoryService, NodeId,
    OwnerId, Service,
};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

/// Inventory record as returned by `GET /entities`.
#[derive(Debug, Clone, Deserialize)]
pub struct InventoryRecord {
    pub uuid: EntityId,
    pub owner_uuid: OwnerId,
    pub server_uuid: NodeId,
    #[serde(default)]
    pub tags: BTreeMap<String, Value>,
    #[serde(default)]
    pub firewall_enabled: bool,
    #[serde(default)]
    pub nics: Vec<InventoryNic>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InventoryNic {
    #[serde(default)]
    pub ip: Option<String>,
}

impl From<InventoryRecord> for Entity {
    fn from(record: InventoryRecord) -> Self {
        Entity {
            identifier: record.uuid,
            owner_id: record.owner_uuid,
            node_id: record.server_uuid,
            attributes: record.tags,
            enabled: record.firewall_enabled,
            addresses: record.nics.into_iter().filter_map(|nic| nic.ip).collect(),
        }
    }
}

/// HTTP implementation of [`InventoryService`].
#[derive(Debug, Clone)]
pub struct InventoryClient {
    rest: RestClient,
}

impl InventoryClient {
    pub fn new(base_url: &str, timeout: Duration) -> ConvoyResult<Self> {
        Ok(Self {
            rest: RestClient::new(Service::Inventory, base_url, timeout)?,
        })
    }

    pub fn from_config(config: &ConvoyConfig) -> ConvoyResult<Self> {
        Ok(Self {
            rest: RestClient::from_config(Service::Inventory, config)?,
        })
    }
}

/// Query-string pairs for a list request.
pub(crate) fn query_params(query: &InventoryQuery) -> Vec<(&'static str, String)> {
    let mut params = Vec::with_capacity(2);
    if let Some(filter) = query.filter_text() {
        params.push(("query", filter));
    }
    if query.extras {
        params.push(("extras", "true".to_string()));
    }
    params
}

#[async_trait]
impl InventoryService for InventoryClient {
    async fn list_entities(&self, query: &InventoryQuery) -> ConvoyResult<Vec<Entity>> {
        let params = query_params(query);
        debug!(filter = ?query.filter_text(), "listing entities");
        let records: Vec<InventoryRecord> = self.rest.get_json(&["entities"], Some(&params)).await?;
        Ok(records.into_iter().map(Entity::from).collect())
    }
}
