//! `kcli config view|get|set`.

use crate::runtime::Runtime;
use kcli_core::Result;

/// Full active profile as YAML with secret-bound values redacted.
pub fn view(rt: &Runtime) -> Result<()> {
    let mut value = serde_json::to_value(&rt.profile)?;
    for key in &rt.profile.secret_keys {
        redact(&mut value, key);
    }
    rt.output
        .out(serde_yaml::to_string(&value)?.trim_end());
    Ok(())
}

fn redact(value: &mut serde_json::Value, dotted: &str) {
    let mut cur = value;
    let parts: Vec<&str> = dotted.split('.').collect();
    for (i, part) in parts.iter().enumerate() {
        if i == parts.len() - 1 {
            if let Some(obj) = cur.as_object_mut() {
                if let Some(existing) = obj.get_mut(*part) {
                    if existing.as_str().map(|s| !s.is_empty()).unwrap_or(false) {
                        *existing = serde_json::Value::String("<keychain>".into());
                    }
                }
            }
            return;
        }
        match cur.get_mut(*part) {
            Some(next) => cur = next,
            None => return,
        }
    }
}

pub fn get(rt: &Runtime, key: &str) -> Result<()> {
    let value = rt.config_store.get_by_key(key)?;
    let rendered = if rt.profile.secret_keys.iter().any(|k| k == key) {
        "<keychain>".to_string()
    } else {
        match value {
            serde_json::Value::String(s) => s,
            other => other.to_string(),
        }
    };
    rt.output.out(rendered);
    Ok(())
}

pub fn set(rt: &Runtime, key: &str, value: &str) -> Result<()> {
    rt.config_store.set_by_key(key, value)?;
    rt.output.out(format!("{key} updated"));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{GlobalFlags, Output, Runtime};
    use kcli_core::{ConfigStore, MemorySecretStore, StateStore};
    use std::sync::Arc;

    fn capture_runtime(dir: &std::path::Path) -> (Runtime, Arc<std::sync::Mutex<Vec<u8>>>) {
        struct SharedBuf(Arc<std::sync::Mutex<Vec<u8>>>);
        impl std::io::Write for SharedBuf {
            fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
                self.0.lock().unwrap().extend_from_slice(buf);
                Ok(buf.len())
            }
            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }
        let buffer = Arc::new(std::sync::Mutex::new(Vec::new()));
        let output = Output::custom(
            Box::new(SharedBuf(Arc::clone(&buffer))),
            Box::new(std::io::sink()),
        );
        let config_store = ConfigStore::new(
            dir.join("config.yaml"),
            Arc::new(MemorySecretStore::default()),
        );
        config_store.load().unwrap();
        let state_store = StateStore::new(dir.join("state.json"));
        let rt = Runtime::with_stores(GlobalFlags::default(), output, config_store, state_store)
            .unwrap();
        (rt, buffer)
    }

    #[test]
    fn view_redacts_secret_bound_keys() {
        let dir = tempfile::tempdir().unwrap();
        let (mut rt, buffer) = capture_runtime(dir.path());
        let mut profile = rt.profile.clone();
        profile.ai.api_key = "sk-super-secret".into();
        rt.config_store.save(profile.clone()).unwrap();
        rt.profile = profile;

        view(&rt).unwrap();
        let output = String::from_utf8(buffer.lock().unwrap().clone()).unwrap();
        assert!(!output.contains("sk-super-secret"));
        assert!(output.contains("<keychain>"));
    }

    #[test]
    fn set_then_get_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let (rt, buffer) = capture_runtime(dir.path());
        set(&rt, "tui.refresh_seconds", "11").unwrap();
        get(&rt, "tui.refresh_seconds").unwrap();
        let output = String::from_utf8(buffer.lock().unwrap().clone()).unwrap();
        assert!(output.contains("11"));
    }
}
