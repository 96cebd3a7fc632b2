//! AWS SDK backends for staging and dispatch.
//!
//! The staging and dispatch contracts are synchronous, so every SDK call is
//! bridged with `block_in_place` on the multi-threaded Tokio runtime.

use aws_sdk_lambda::types::InvocationType;
use aws_sdk_s3::primitives::ByteStream;
use choreo_core::workflow::Step;

use crate::adapters::dispatch::StepDispatcher;
use crate::adapters::staging::ObjectStore;

fn block_on<F: std::future::Future>(future: F) -> F::Output {
    tokio::task::block_in_place(|| tokio::runtime::Handle::current().block_on(future))
}

pub struct S3ObjectStore {
    bucket: String,
    s3_client: aws_sdk_s3::Client,
}

impl S3ObjectStore {
    pub fn new(bucket: impl Into<String>, s3_client: aws_sdk_s3::Client) -> Self {
        Self {
            bucket: bucket.into(),
            s3_client,
        }
    }
}

impl ObjectStore for S3ObjectStore {
    fn write_object(&self, key: &str, body: &[u8]) -> Result<(), String> {
        let bucket = self.bucket.clone();
        let object_key = key.to_string();
        let body_bytes = body.to_vec();
        let client = self.s3_client.clone();

        block_on(async move {
            client
                .put_object()
                .bucket(bucket)
                .key(object_key)
                .content_type("application/json")
                .body(ByteStream::from(body_bytes))
                .send()
                .await
                .map(|_| ())
                .map_err(|error| format!("failed to write object to s3: {error}"))
        })
    }

    fn read_object(&self, key: &str) -> Result<Option<Vec<u8>>, String> {
        let bucket = self.bucket.clone();
        let object_key = key.to_string();
        let client = self.s3_client.clone();

        block_on(async move {
            let output = match client.get_object().bucket(bucket).key(object_key).send().await {
                Ok(output) => output,
                Err(error) => {
                    let service_error = error.into_service_error();
                    if service_error.is_no_such_key() {
                        return Ok(None);
                    }
                    return Err(format!("failed to read object from s3: {service_error}"));
                }
            };
            let bytes = output
                .body
                .collect()
                .await
                .map_err(|error| format!("failed to read s3 object body: {error}"))?
                .into_bytes();
            Ok(Some(bytes.to_vec()))
        })
    }

    fn delete_object(&self, key: &str) -> Result<(), String> {
        let bucket = self.bucket.clone();
        let object_key = key.to_string();
        let client = self.s3_client.clone();

        block_on(async move {
            client
                .delete_object()
                .bucket(bucket)
                .key(object_key)
                .send()
                .await
                .map(|_| ())
                .map_err(|error| format!("failed to delete object from s3: {error}"))
        })
    }
}

/// Invokes the next step's Lambda function asynchronously.
pub struct LambdaDispatcher {
    lambda_client: aws_sdk_lambda::Client,
}

impl LambdaDispatcher {
    pub fn new(lambda_client: aws_sdk_lambda::Client) -> Self {
        Self { lambda_client }
    }
}

impl StepDispatcher for LambdaDispatcher {
    fn dispatch_next(&self, next: &Step, payload: &[u8]) -> Result<(), String> {
        let request_payload = payload.to_vec();
        let client = self.lambda_client.clone();
        let function_name = next.routing_target().to_string();

        block_on(async move {
            client
                .invoke()
                .function_name(function_name)
                .invocation_type(InvocationType::Event)
                .set_payload(Some(request_payload.into()))
                .send()
                .await
                .map(|_| ())
                .map_err(|error| format!("failed to invoke next lambda: {error}"))
        })
    }
}

/// Publishes the payload to the queue named by the next step's target.
pub struct SqsDispatcher {
    sqs_client: aws_sdk_sqs::Client,
}

impl SqsDispatcher {
    pub fn new(sqs_client: aws_sdk_sqs::Client) -> Self {
        Self { sqs_client }
    }
}

impl StepDispatcher for SqsDispatcher {
    fn dispatch_next(&self, next: &Step, payload: &[u8]) -> Result<(), String> {
        let body = String::from_utf8(payload.to_vec())
            .map_err(|error| format!("invalid UTF-8 invocation payload: {error}"))?;
        let client = self.sqs_client.clone();
        let queue_url = next.routing_target().to_string();

        block_on(async move {
            client
                .send_message()
                .queue_url(queue_url)
                .message_body(body)
                .send()
                .await
                .map(|_| ())
                .map_err(|error| format!("failed to enqueue invocation message: {error}"))
        })
    }
}
