use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::workflow::WorkflowDescriptor;

pub fn workflow_fingerprint(workflow: &WorkflowDescriptor) -> String {
    let mut hasher = Sha256::new();
    hasher.update(stable_contract_json(workflow));
    format!("{:x}", hasher.finalize())
}

pub fn stable_contract_json(value: impl Serialize) -> String {
    serde_json::to_string(&value).expect("serialization of contract value should not fail")
}
