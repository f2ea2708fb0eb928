//! In-memory identity catalog.
//!
//! The [`IdentityRegistry`] is the authoritative in-process view of all
//! identities, built from the [`KeyStore`] on [`load`](IdentityRegistry::load)
//! and mutated through metadata edits, key generation, deletes, and probe
//! results. It is an explicit object with a caller-scoped lifetime; there
//! is no ambient singleton.
//!
//! Mutating methods take `&mut self`, so a registry shared across tasks
//! must sit behind the caller's own lock; the registry does not serialize
//! concurrent operations against the same identity itself.

use std::collections::BTreeMap;

use tracing::{info, warn};

use crate::keystore::{DeleteReport, GeneratedKey, KeyStore};
use crate::{ConnectionStatus, Error, Identity, KeyType, Metadata, Result};

pub struct IdentityRegistry {
    store: KeyStore,
    identities: BTreeMap<String, Identity>,
}

impl IdentityRegistry {
    pub fn new(store: KeyStore) -> Self {
        Self {
            store,
            identities: BTreeMap::new(),
        }
    }

    pub fn key_store(&self) -> &KeyStore {
        &self.store
    }

    /// Rebuild the catalog from the key directory.
    ///
    /// Fully replaces prior in-memory state, never an incremental diff.
    /// Metadata comes from each identity's sidecar when present and
    /// parseable, placeholder defaults otherwise. All transient status
    /// fields reset to untested.
    pub fn load(&mut self) -> Result<()> {
        self.identities.clear();
        for name in self.store.list_private_key_names()? {
            let metadata = match self.store.read_metadata(&name) {
                Ok(m) => m,
                Err(Error::NotFound(_)) => Metadata::defaults_for(&name),
                Err(e) => {
                    warn!(name, error = %e, "unusable metadata sidecar, using defaults");
                    Metadata::defaults_for(&name)
                }
            };
            self.identities.insert(
                name.clone(),
                Identity {
                    name,
                    key_type: None,
                    username: metadata.username,
                    email: metadata.email,
                    last_status: ConnectionStatus::Untested,
                    status_message: String::new(),
                },
            );
        }
        info!(count = self.identities.len(), "identity registry loaded");
        Ok(())
    }

    /// Identities in name order.
    pub fn iter(&self) -> impl Iterator<Item = &Identity> {
        self.identities.values()
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    pub fn get(&self, name: &str) -> Result<&Identity> {
        self.identities
            .get(name)
            .ok_or_else(|| Error::NotFound(format!("identity '{name}'")))
    }

    /// Create a new identity: generate the keypair, persist the metadata
    /// sidecar, and register it in memory.
    ///
    /// Rejects empty and already-taken names: the name doubles as the
    /// private-key filename, so collisions would clobber key material.
    pub async fn generate(
        &mut self,
        name: &str,
        key_type: KeyType,
        username: String,
        email: String,
    ) -> Result<GeneratedKey> {
        if name.is_empty() {
            return Err(Error::InvalidRequest(
                "identity name must not be empty".to_string(),
            ));
        }
        if self.identities.contains_key(name) || self.store.private_key_path(name).exists() {
            return Err(Error::InvalidRequest(format!(
                "identity '{name}' already exists"
            )));
        }

        let generated = self.store.generate_key_pair(name, key_type, &email).await?;
        let metadata = Metadata {
            username,
            email,
        };
        self.store.write_metadata(name, &metadata)?;

        self.identities.insert(
            name.to_string(),
            Identity {
                name: name.to_string(),
                key_type: Some(key_type),
                username: metadata.username,
                email: metadata.email,
                last_status: ConnectionStatus::Untested,
                status_message: String::new(),
            },
        );
        Ok(generated)
    }

    /// Update an identity's author metadata and persist it.
    ///
    /// The sidecar write happens first so a persistence failure leaves the
    /// in-memory view unchanged.
    pub fn update_metadata(&mut self, name: &str, username: String, email: String) -> Result<()> {
        if !self.identities.contains_key(name) {
            return Err(Error::NotFound(format!("identity '{name}'")));
        }
        let metadata = Metadata { username, email };
        self.store.write_metadata(name, &metadata)?;
        if let Some(identity) = self.identities.get_mut(name) {
            identity.username = metadata.username;
            identity.email = metadata.email;
        }
        Ok(())
    }

    /// Delete an identity and its on-disk artifacts.
    ///
    /// Best-effort: the in-memory entry is removed even when some artifact
    /// removals fail; the per-artifact outcomes are returned to the caller
    /// instead of rolling back.
    pub fn delete(&mut self, name: &str) -> Result<DeleteReport> {
        if !self.identities.contains_key(name) {
            return Err(Error::NotFound(format!("identity '{name}'")));
        }
        let report = self.store.delete_artifacts(name);
        self.identities.remove(name);
        Ok(report)
    }

    /// Record the outcome of a connection probe. Transient fields only.
    pub fn record_connection_result(
        &mut self,
        name: &str,
        success: bool,
        message: &str,
    ) -> Result<()> {
        let identity = self
            .identities
            .get_mut(name)
            .ok_or_else(|| Error::NotFound(format!("identity '{name}'")))?;
        identity.last_status = if success {
            ConnectionStatus::Success
        } else {
            ConnectionStatus::Failure
        };
        identity.status_message = message.to_string();
        Ok(())
    }
}
