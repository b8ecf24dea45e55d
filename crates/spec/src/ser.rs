//! Hand-written `Serialize` impls for the model types that have no 1:1
//! derive-able shape (the builtin/custom channel variant collapses back
//! down into a single YAML mapping). Keeping this separate from
//! `parse.rs` keeps the write direction easy to audit against the read
//! direction field-by-field.

use crate::model::{ChannelConfig, ServiceConfig, StackSpec};
use serde::ser::{Serialize, SerializeMap, Serializer};

impl Serialize for ChannelConfig {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut len = 2;
        if self.image.is_some() {
            len += 1;
        }
        if self.container_port.is_some() {
            len += 1;
        }
        if self.host_port.is_some() {
            len += 1;
        }
        if !self.domains.is_empty() {
            len += 1;
        }
        if !self.path_prefixes.is_empty() {
            len += 1;
        }
        if self.rewrite_path.is_some() {
            len += 1;
        }
        if self.healthcheck_path.is_some() {
            len += 1;
        }
        if self.shared_secret_env.is_some() {
            len += 1;
        }
        if !self.volumes.is_empty() {
            len += 1;
        }
        len += 1; // config, always present

        let mut map = serializer.serialize_map(Some(len))?;
        map.serialize_entry("enabled", &self.enabled)?;
        map.serialize_entry("exposure", self.exposure.as_str())?;
        if let Some(image) = &self.image {
            map.serialize_entry("image", image)?;
        }
        if let Some(port) = self.container_port {
            map.serialize_entry("containerPort", &port)?;
        }
        if let Some(port) = self.host_port {
            map.serialize_entry("hostPort", &port)?;
        }
        if !self.domains.is_empty() {
            map.serialize_entry("domains", &self.domains)?;
        }
        if !self.path_prefixes.is_empty() {
            map.serialize_entry("pathPrefixes", &self.path_prefixes)?;
        }
        if let Some(rewrite_path) = &self.rewrite_path {
            map.serialize_entry("rewritePath", rewrite_path)?;
        }
        if let Some(healthcheck_path) = &self.healthcheck_path {
            map.serialize_entry("healthcheckPath", healthcheck_path)?;
        }
        if let Some(shared_secret_env) = &self.shared_secret_env {
            map.serialize_entry("sharedSecretEnv", shared_secret_env)?;
        }
        if !self.volumes.is_empty() {
            map.serialize_entry("volumes", &self.volumes)?;
        }
        map.serialize_entry("config", &self.config)?;
        map.end()
    }
}

impl Serialize for ServiceConfig {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut len = 4;
        if self.host_port.is_some() {
            len += 1;
        }
        if self.healthcheck_path.is_some() {
            len += 1;
        }
        if !self.volumes.is_empty() {
            len += 1;
        }
        len += 1; // config

        let mut map = serializer.serialize_map(Some(len))?;
        map.serialize_entry("enabled", &self.enabled)?;
        map.serialize_entry("exposure", self.exposure.as_str())?;
        map.serialize_entry("image", &self.image)?;
        map.serialize_entry("containerPort", &self.container_port)?;
        if let Some(port) = self.host_port {
            map.serialize_entry("hostPort", &port)?;
        }
        if let Some(healthcheck_path) = &self.healthcheck_path {
            map.serialize_entry("healthcheckPath", healthcheck_path)?;
        }
        if !self.volumes.is_empty() {
            map.serialize_entry("volumes", &self.volumes)?;
        }
        map.serialize_entry("config", &self.config)?;
        map.end()
    }
}

impl Serialize for StackSpec {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut len = 5;
        if self.caddy.is_some() {
            len += 1;
        }
        let mut map = serializer.serialize_map(Some(len))?;
        map.serialize_entry("version", &self.version)?;
        map.serialize_entry("accessScope", self.access_scope.as_str())?;
        map.serialize_entry("ingressPort", &self.ingress_port)?;
        if let Some(caddy) = &self.caddy {
            map.serialize_entry("caddy", caddy)?;
        }
        map.serialize_entry("channels", &self.channels)?;
        map.serialize_entry("services", &self.services)?;
        map.serialize_entry("automations", &self.automations)?;
        map.end()
    }
}
