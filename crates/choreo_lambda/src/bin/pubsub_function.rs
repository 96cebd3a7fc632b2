//! Queue-triggered function (SQS records or pub/sub push messages) running the passthrough step handler.
//!
//! Deployments that bring their own handler call
//! `choreo_lambda::runtime::serve_pubsub` with it from their own binary.

use choreo_lambda::handlers::choreography::passthrough_handler;
use lambda_runtime::Error;

#[tokio::main]
async fn main() -> Result<(), Error> {
    choreo_lambda::runtime::serve_pubsub(passthrough_handler).await
}
