use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use choreo_core::staging_keys::{prefetch_data_object_key, staged_input_object_key};
use choreo_core::workflow::StepKey;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StagingError {
    #[error("staging backend unavailable for {key}: {message}")]
    Unavailable { key: String, message: String },

    #[error("timed out after {waited_ms}ms waiting for staged input {key}")]
    Timeout { key: String, waited_ms: u128 },
}

impl StagingError {
    pub fn unavailable(key: &StepKey, message: impl Into<String>) -> Self {
        Self::Unavailable {
            key: key.to_string(),
            message: message.into(),
        }
    }
}

/// Out-of-band handoff of values between steps of one run.
pub trait Staging: Send + Sync {
    /// Makes `value` discoverable by the step identified by `key`.
    fn stage(&self, key: &StepKey, value: &Value) -> Result<(), StagingError>;

    /// Waits until a value has been staged for `key`.
    fn fetch(&self, key: &StepKey) -> Result<Value, StagingError>;

    /// Reads auxiliary data placed for `key` without waiting.
    fn prefetch(&self, key: &StepKey) -> Result<Option<Value>, StagingError>;
}

pub trait ObjectStore: Send + Sync {
    fn write_object(&self, key: &str, body: &[u8]) -> Result<(), String>;
    fn read_object(&self, key: &str) -> Result<Option<Vec<u8>>, String>;
    fn delete_object(&self, key: &str) -> Result<(), String>;
}

impl<T: ObjectStore + ?Sized> ObjectStore for Arc<T> {
    fn write_object(&self, key: &str, body: &[u8]) -> Result<(), String> {
        self.as_ref().write_object(key, body)
    }

    fn read_object(&self, key: &str) -> Result<Option<Vec<u8>>, String> {
        self.as_ref().read_object(key)
    }

    fn delete_object(&self, key: &str) -> Result<(), String> {
        self.as_ref().delete_object(key)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchPolicy {
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            poll_interval: Duration::from_millis(250),
        }
    }
}

/// [`Staging`] backed by JSON objects under the staging key layout.
pub struct ObjectStoreStaging<S> {
    store: S,
    prefix: String,
    policy: FetchPolicy,
}

impl<S: ObjectStore> ObjectStoreStaging<S> {
    pub fn new(store: S, prefix: impl Into<String>, policy: FetchPolicy) -> Self {
        Self {
            store,
            prefix: prefix.into(),
            policy,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    fn read_json(&self, key: &StepKey, object_key: &str) -> Result<Option<Value>, StagingError> {
        let Some(bytes) = self
            .store
            .read_object(object_key)
            .map_err(|error| StagingError::unavailable(key, error))?
        else {
            return Ok(None);
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|error| StagingError::unavailable(key, format!("corrupt staged value: {error}")))
    }
}

impl<S: ObjectStore> Staging for ObjectStoreStaging<S> {
    fn stage(&self, key: &StepKey, value: &Value) -> Result<(), StagingError> {
        let object_key = staged_input_object_key(&self.prefix, key);
        let body = serde_json::to_vec(value)
            .map_err(|error| StagingError::unavailable(key, error.to_string()))?;
        self.store
            .write_object(&object_key, &body)
            .map_err(|error| StagingError::unavailable(key, error))
    }

    fn fetch(&self, key: &StepKey) -> Result<Value, StagingError> {
        let object_key = staged_input_object_key(&self.prefix, key);
        let started_at = Instant::now();
        loop {
            if let Some(value) = self.read_json(key, &object_key)? {
                if let Err(error) = self.store.delete_object(&object_key) {
                    tracing::warn!(
                        component = "staging",
                        event = "staged_input_cleanup_failed",
                        object_key = %object_key,
                        error = %error,
                    );
                }
                return Ok(value);
            }

            let waited = started_at.elapsed();
            if waited >= self.policy.timeout {
                return Err(StagingError::Timeout {
                    key: key.to_string(),
                    waited_ms: waited.as_millis(),
                });
            }
            std::thread::sleep(self.policy.poll_interval.min(self.policy.timeout - waited));
        }
    }

    fn prefetch(&self, key: &StepKey) -> Result<Option<Value>, StagingError> {
        let object_key = prefetch_data_object_key(&self.prefix, key);
        self.read_json(key, &object_key)
    }
}

/// Process-local object store for tests and local runs.
#[derive(Debug, Default)]
pub struct InMemoryObjectStore {
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects
            .lock()
            .map(|objects| objects.keys().cloned().collect())
            .unwrap_or_default()
    }
}

impl ObjectStore for InMemoryObjectStore {
    fn write_object(&self, key: &str, body: &[u8]) -> Result<(), String> {
        self.objects
            .lock()
            .map_err(|_| "object store lock poisoned".to_string())?
            .insert(key.to_string(), body.to_vec());
        Ok(())
    }

    fn read_object(&self, key: &str) -> Result<Option<Vec<u8>>, String> {
        Ok(self
            .objects
            .lock()
            .map_err(|_| "object store lock poisoned".to_string())?
            .get(key)
            .cloned())
    }

    fn delete_object(&self, key: &str) -> Result<(), String> {
        self.objects
            .lock()
            .map_err(|_| "object store lock poisoned".to_string())?
            .remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use choreo_core::workflow::Step;
    use serde_json::json;

    use super::*;

    struct UnavailableStore;

    impl ObjectStore for UnavailableStore {
        fn write_object(&self, _key: &str, _body: &[u8]) -> Result<(), String> {
            Err("bucket does not exist".to_string())
        }

        fn read_object(&self, _key: &str) -> Result<Option<Vec<u8>>, String> {
            Err("bucket does not exist".to_string())
        }

        fn delete_object(&self, _key: &str) -> Result<(), String> {
            Err("bucket does not exist".to_string())
        }
    }

    fn quick_policy() -> FetchPolicy {
        FetchPolicy {
            timeout: Duration::from_millis(30),
            poll_interval: Duration::from_millis(5),
        }
    }

    fn sample_key() -> StepKey {
        StepKey::new("run-7", &Step::new(1, "classify"))
    }

    #[test]
    fn staged_value_is_fetched_and_consumed() {
        let staging = ObjectStoreStaging::new(InMemoryObjectStore::new(), "staging", quick_policy());
        let key = sample_key();

        staging.stage(&key, &json!({"labels": ["cat"]})).expect("stage");
        assert_eq!(
            staging.store().keys(),
            vec!["staging/dataset=staged_input/run_id=run-7/step_id=1/function=classify/part-0.json"]
        );

        let value = staging.fetch(&key).expect("fetch");
        assert_eq!(value, json!({"labels": ["cat"]}));
        assert!(staging.store().keys().is_empty());
    }

    #[test]
    fn fetch_times_out_when_nothing_is_staged() {
        let staging = ObjectStoreStaging::new(InMemoryObjectStore::new(), "staging", quick_policy());
        let error = staging.fetch(&sample_key()).expect_err("should time out");
        match error {
            StagingError::Timeout { key, waited_ms } => {
                assert_eq!(key, "run-7/1:classify");
                assert!(waited_ms >= 30);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn fetch_waits_for_value_staged_by_another_invocation() {
        let store = Arc::new(InMemoryObjectStore::new());
        let consumer = ObjectStoreStaging::new(
            Arc::clone(&store),
            "staging",
            FetchPolicy {
                timeout: Duration::from_secs(2),
                poll_interval: Duration::from_millis(5),
            },
        );
        let producer = ObjectStoreStaging::new(Arc::clone(&store), "staging", quick_policy());
        let key = sample_key();

        let producer_key = key.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            producer.stage(&producer_key, &json!(42)).expect("stage");
        });

        assert_eq!(consumer.fetch(&key).expect("fetch"), json!(42));
        handle.join().expect("producer thread");
    }

    #[test]
    fn prefetch_returns_none_when_absent_and_value_when_present() {
        let staging = ObjectStoreStaging::new(InMemoryObjectStore::new(), "staging", quick_policy());
        let key = sample_key();
        assert_eq!(staging.prefetch(&key).expect("prefetch"), None);

        staging
            .store()
            .write_object(
                &prefetch_data_object_key("staging", &key),
                br#"{"model":"v3"}"#,
            )
            .expect("seed");
        assert_eq!(
            staging.prefetch(&key).expect("prefetch"),
            Some(json!({"model": "v3"}))
        );
    }

    #[test]
    fn backend_failures_surface_as_unavailable() {
        let staging = ObjectStoreStaging::new(UnavailableStore, "staging", quick_policy());
        let key = sample_key();

        let stage_error = staging.stage(&key, &json!(1)).expect_err("stage should fail");
        assert!(matches!(stage_error, StagingError::Unavailable { .. }));

        let fetch_error = staging.fetch(&key).expect_err("fetch should fail");
        assert!(fetch_error.to_string().contains("bucket does not exist"));
    }

    #[test]
    fn corrupt_staged_value_is_reported() {
        let staging = ObjectStoreStaging::new(InMemoryObjectStore::new(), "staging", quick_policy());
        let key = sample_key();
        staging
            .store()
            .write_object(&staged_input_object_key("staging", &key), b"not json")
            .expect("seed");

        let error = staging.fetch(&key).expect_err("should fail");
        assert!(error.to_string().contains("corrupt staged value"));
    }
}
