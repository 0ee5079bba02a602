//! Service discovery registration against the Consul agent HTTP API.
//!
//! The process registers once at startup and deregisters once during
//! shutdown; the core only depends on the register/deregister contract.

use reqwest::Client;
use serde::Serialize;
use tracing::debug;

use crate::config::{ConsulConfig, ListenConfig};
use crate::error::{ExporterError, Result};

#[derive(Debug, Serialize)]
struct ServiceRegistration {
    #[serde(rename = "ID")]
    id: String,
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Tags")]
    tags: Vec<String>,
    #[serde(rename = "Port")]
    port: u16,
}

pub struct ConsulRegistrator {
    client: Client,
    base_url: String,
    registration: ServiceRegistration,
}

impl ConsulRegistrator {
    pub fn from_config(consul: &ConsulConfig, listen: &ListenConfig) -> Result<Self> {
        let id = consul
            .service_id
            .clone()
            .unwrap_or_else(|| format!("{}-{}", consul.service_name, listen.port));
        Ok(Self {
            client: Client::new(),
            base_url: format!("http://{}", consul.address),
            registration: ServiceRegistration {
                id,
                name: consul.service_name.clone(),
                tags: consul.tags.clone(),
                port: listen.port,
            },
        })
    }

    pub fn service_id(&self) -> &str {
        &self.registration.id
    }

    pub async fn register(&self) -> Result<()> {
        let url = format!("{}/v1/agent/service/register", self.base_url);
        debug!(
            payload = %serde_json::to_string(&self.registration).unwrap_or_default(),
            "registering service"
        );
        let response = self
            .client
            .put(&url)
            .json(&self.registration)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(ExporterError::Discovery(format!(
                "service registration returned {}",
                response.status()
            )));
        }
        Ok(())
    }

    pub async fn deregister(&self) -> Result<()> {
        let url = format!(
            "{}/v1/agent/service/deregister/{}",
            self.base_url, self.registration.id
        );
        let response = self.client.put(&url).send().await?;
        if !response.status().is_success() {
            return Err(ExporterError::Discovery(format!(
                "service deregistration returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}
