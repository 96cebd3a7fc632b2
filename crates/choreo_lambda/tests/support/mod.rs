#![allow(dead_code)]

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use choreo_core::contract::{decode_invocation, ForwardingDecision, StepAcknowledgement};
use choreo_core::workflow::{Step, StepKey};
use choreo_lambda::adapters::dispatch::StepDispatcher;
use choreo_lambda::adapters::staging::{
    FetchPolicy, InMemoryObjectStore, ObjectStoreStaging, Staging, StagingError,
};
use choreo_lambda::handlers::choreography::{ChoreographyContext, StepHandler};
use choreo_lambda::handlers::direct::handle_direct_event;
use serde_json::{json, Value};

/// Shared, ordered record of every collaborator call made during a step.
#[derive(Clone, Default)]
pub struct CallLog {
    entries: Arc<Mutex<Vec<String>>>,
}

impl CallLog {
    pub fn push(&self, entry: impl Into<String>) {
        self.entries.lock().expect("poisoned mutex").push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().expect("poisoned mutex").clone()
    }

    pub fn count_prefix(&self, prefix: &str) -> usize {
        self.entries()
            .iter()
            .filter(|entry| entry.starts_with(prefix))
            .count()
    }
}

pub struct RecordingDispatcher {
    pub log: CallLog,
    pub payloads: Mutex<Vec<Value>>,
}

impl RecordingDispatcher {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            payloads: Mutex::new(Vec::new()),
        }
    }

    pub fn payloads(&self) -> Vec<Value> {
        self.payloads.lock().expect("poisoned mutex").clone()
    }
}

impl StepDispatcher for RecordingDispatcher {
    fn dispatch_next(&self, next: &Step, payload: &[u8]) -> Result<(), String> {
        let value: Value = serde_json::from_slice(payload).map_err(|error| error.to_string())?;
        let body = value.get("body").cloned().unwrap_or(Value::Null);
        self.log
            .push(format!("dispatch({}, body={body})", next.function_name));
        self.payloads.lock().expect("poisoned mutex").push(value);
        Ok(())
    }
}

pub struct RecordingStaging {
    pub log: CallLog,
    pub input: Option<Value>,
}

impl Staging for RecordingStaging {
    fn stage(&self, key: &StepKey, value: &Value) -> Result<(), StagingError> {
        self.log
            .push(format!("stage({}, {value})", key.function_name));
        Ok(())
    }

    fn fetch(&self, key: &StepKey) -> Result<Value, StagingError> {
        self.log.push(format!("fetch({})", key.function_name));
        self.input.clone().ok_or(StagingError::Timeout {
            key: key.to_string(),
            waited_ms: 0,
        })
    }

    fn prefetch(&self, key: &StepKey) -> Result<Option<Value>, StagingError> {
        self.log.push(format!("prefetch({})", key.function_name));
        Ok(None)
    }
}

pub struct RecordingHandler {
    pub log: CallLog,
    pub name: String,
    pub result: Value,
}

impl StepHandler for RecordingHandler {
    fn handle(&self, staged: Option<Value>, input: Option<Value>) -> Result<Value, String> {
        let staged = staged.unwrap_or(Value::Null);
        let input = input.unwrap_or(Value::Null);
        self.log
            .push(format!("handler({}, staged={staged}, input={input})", self.name));
        Ok(self.result.clone())
    }
}

/// A set of "deployed functions" sharing one staging bucket. Every dispatch
/// starts the target function on its own thread, like an async invocation.
pub struct Cluster {
    store: Arc<InMemoryObjectStore>,
    policy: FetchPolicy,
    completed: Mutex<Sender<Result<StepAcknowledgement, String>>>,
}

impl Cluster {
    pub fn start() -> (Arc<Self>, Receiver<Result<StepAcknowledgement, String>>) {
        let (sender, receiver) = mpsc::channel();
        let cluster = Arc::new(Self {
            store: Arc::new(InMemoryObjectStore::new()),
            policy: FetchPolicy {
                timeout: Duration::from_secs(5),
                poll_interval: Duration::from_millis(2),
            },
            completed: Mutex::new(sender),
        });
        (cluster, receiver)
    }

    pub fn staged_keys(&self) -> Vec<String> {
        self.store.keys()
    }

    /// Runs one invocation of `function_name`; its handler appends the
    /// function name to the list it receives.
    pub fn invoke(self: &Arc<Self>, function_name: &str, event: Value) {
        let staging = ObjectStoreStaging::new(Arc::clone(&self.store), "it", self.policy);
        let dispatcher = ClusterDispatcher(Arc::clone(self));
        let name = function_name.to_string();
        let handler = move |_staged: Option<Value>, input: Option<Value>| -> Result<Value, String> {
            let mut items = match input {
                Some(Value::Array(items)) => items,
                other => return Err(format!("expected list input, got {other:?}")),
            };
            items.push(json!(name));
            Ok(Value::Array(items))
        };
        let context = ChoreographyContext {
            staging: &staging,
            dispatcher: &dispatcher,
            handler: &handler,
        };

        let report = match handle_direct_event(event, &context, "test") {
            Ok(ack) if ack.forwarding == ForwardingDecision::WorkflowComplete => Some(Ok(ack)),
            Ok(_) => None,
            Err(error) => Some(Err(error.to_string())),
        };
        if let Some(report) = report {
            let _ = self.completed.lock().expect("poisoned mutex").send(report);
        }
    }
}

struct ClusterDispatcher(Arc<Cluster>);

impl StepDispatcher for ClusterDispatcher {
    fn dispatch_next(&self, next: &Step, payload: &[u8]) -> Result<(), String> {
        let event: Value = serde_json::from_slice(payload).map_err(|error| error.to_string())?;
        decode_invocation(event.clone()).map_err(|error| error.to_string())?;
        let cluster = Arc::clone(&self.0);
        let name = next.function_name.clone();
        std::thread::spawn(move || cluster.invoke(&name, event));
        Ok(())
    }
}
