//! OS secret store binding for keychain-bound config keys.
//!
//! Values whose dotted key is listed in a profile's `secret_keys` never touch
//! the on-disk config file; they live under the `kcli` keyring service with
//! account `{profile}.{dotted.key}`.

use crate::error::{Error, Result};
use std::collections::HashMap;
use std::sync::Mutex;

const SERVICE: &str = "kcli";

pub trait SecretStore: Send + Sync {
    fn get(&self, account: &str) -> Result<Option<String>>;
    fn set(&self, account: &str, value: &str) -> Result<()>;
    fn delete(&self, account: &str) -> Result<()>;
}

/// Platform keychain via the `keyring` crate.
pub struct OsSecretStore;

impl OsSecretStore {
    fn entry(account: &str) -> Result<keyring::Entry> {
        keyring::Entry::new(SERVICE, account)
            .map_err(|e| Error::Internal(format!("keyring entry: {e}")))
    }
}

impl SecretStore for OsSecretStore {
    fn get(&self, account: &str) -> Result<Option<String>> {
        // Reads degrade to "no secret" when no platform store is reachable
        // (headless hosts, CI); writes still fail loudly below.
        let entry = match Self::entry(account) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::debug!(target: "kcli::secrets", error = %e, "keyring unavailable");
                return Ok(None);
            }
        };
        match entry.get_password() {
            Ok(v) => Ok(Some(v)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => {
                tracing::debug!(target: "kcli::secrets", error = %e, "keyring read failed");
                Ok(None)
            }
        }
    }

    fn set(&self, account: &str, value: &str) -> Result<()> {
        Self::entry(account)?
            .set_password(value)
            .map_err(|e| Error::Internal(format!("keyring write: {e}")))
    }

    fn delete(&self, account: &str) -> Result<()> {
        match Self::entry(account)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(Error::Internal(format!("keyring delete: {e}"))),
        }
    }
}

/// In-memory store for tests and headless environments.
#[derive(Default)]
pub struct MemorySecretStore {
    values: Mutex<HashMap<String, String>>,
}

impl SecretStore for MemorySecretStore {
    fn get(&self, account: &str) -> Result<Option<String>> {
        Ok(self.values.lock().unwrap().get(account).cloned())
    }

    fn set(&self, account: &str, value: &str) -> Result<()> {
        self.values
            .lock()
            .unwrap()
            .insert(account.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, account: &str) -> Result<()> {
        self.values.lock().unwrap().remove(account);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_store_round_trip() {
        let store = MemorySecretStore::default();
        assert_eq!(store.get("default.ai.api_key").unwrap(), None);
        store.set("default.ai.api_key", "sk-secret").unwrap();
        assert_eq!(
            store.get("default.ai.api_key").unwrap().as_deref(),
            Some("sk-secret")
        );
        store.delete("default.ai.api_key").unwrap();
        assert_eq!(store.get("default.ai.api_key").unwrap(), None);
    }
}
