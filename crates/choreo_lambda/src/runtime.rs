//! Lambda runtime wiring: dependency construction from configuration and one
//! `serve_*` loop per trigger type.

use std::sync::Arc;

use chrono::Utc;
use choreo_core::workflow::StepKey;
use lambda_runtime::{service_fn, Error, LambdaEvent};
use serde_json::Value;

use crate::adapters::aws::{LambdaDispatcher, S3ObjectStore, SqsDispatcher};
use crate::adapters::dispatch::{NoopDispatcher, StepDispatcher};
use crate::adapters::http::HttpDispatcher;
use crate::adapters::staging::{ObjectStoreStaging, Staging, StagingError};
use crate::config::{DispatchMode, RuntimeConfig, STAGING_BUCKET_VAR};
use crate::handlers::choreography::{ChoreographyContext, StepHandler};
use crate::handlers::direct::handle_direct_event;
use crate::handlers::http::{handle_http_event, ApiGatewayResponse};
use crate::handlers::pubsub::handle_pubsub_event;
use crate::logging;

/// Staging used when no bucket is configured; only pre-fetching steps notice.
pub struct UnconfiguredStaging;

impl Staging for UnconfiguredStaging {
    fn stage(&self, key: &StepKey, _value: &Value) -> Result<(), StagingError> {
        Err(StagingError::unavailable(
            key,
            format!("{STAGING_BUCKET_VAR} must be configured"),
        ))
    }

    fn fetch(&self, key: &StepKey) -> Result<Value, StagingError> {
        Err(StagingError::unavailable(
            key,
            format!("{STAGING_BUCKET_VAR} must be configured"),
        ))
    }

    fn prefetch(&self, _key: &StepKey) -> Result<Option<Value>, StagingError> {
        Ok(None)
    }
}

pub struct RuntimeDependencies {
    staging: Box<dyn Staging>,
    dispatcher: Box<dyn StepDispatcher>,
}

impl RuntimeDependencies {
    pub fn new(staging: Box<dyn Staging>, dispatcher: Box<dyn StepDispatcher>) -> Self {
        Self {
            staging,
            dispatcher,
        }
    }

    pub async fn from_config(config: &RuntimeConfig) -> Result<Self, Error> {
        let aws_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;

        let staging: Box<dyn Staging> = match &config.staging_bucket {
            Some(bucket) => Box::new(ObjectStoreStaging::new(
                S3ObjectStore::new(bucket.clone(), aws_sdk_s3::Client::new(&aws_config)),
                config.staging_prefix.clone(),
                config.fetch_policy,
            )),
            None => Box::new(UnconfiguredStaging),
        };

        let dispatcher: Box<dyn StepDispatcher> = match config.dispatch_mode {
            DispatchMode::Lambda => {
                Box::new(LambdaDispatcher::new(aws_sdk_lambda::Client::new(&aws_config)))
            }
            DispatchMode::Sqs => Box::new(SqsDispatcher::new(aws_sdk_sqs::Client::new(&aws_config))),
            DispatchMode::Http => {
                Box::new(HttpDispatcher::new(config.dispatch_timeout).map_err(Error::from)?)
            }
            DispatchMode::None => Box::new(NoopDispatcher),
        };

        tracing::info!(
            component = "runtime",
            event = "dependencies_ready",
            staging_configured = config.staging_bucket.is_some(),
            dispatch_mode = ?config.dispatch_mode,
        );
        Ok(Self::new(staging, dispatcher))
    }

    pub async fn from_env() -> Result<Self, Error> {
        let config = RuntimeConfig::from_env().map_err(Error::from)?;
        Self::from_config(&config).await
    }

    pub fn context<'a>(&'a self, handler: &'a dyn StepHandler) -> ChoreographyContext<'a> {
        ChoreographyContext {
            staging: self.staging.as_ref(),
            dispatcher: self.dispatcher.as_ref(),
            handler,
        }
    }
}

fn event_time() -> String {
    Utc::now().to_rfc3339()
}

/// Runs `handler` behind an HTTP trigger until the runtime shuts down.
pub async fn serve_http(handler: impl StepHandler + 'static) -> Result<(), Error> {
    logging::init();
    let deps = Arc::new(RuntimeDependencies::from_env().await?);
    let handler = Arc::new(handler);

    lambda_runtime::run(service_fn(move |event: LambdaEvent<Value>| {
        let deps = Arc::clone(&deps);
        let handler = Arc::clone(&handler);
        async move {
            let context = deps.context(&*handler);
            let response: ApiGatewayResponse = tokio::task::block_in_place(|| {
                handle_http_event(event.payload, &context, &event_time())
            });
            Ok::<_, Error>(response)
        }
    }))
    .await
}

/// Runs `handler` behind a queue or topic trigger, answering SQS batches with
/// a partial-batch response.
pub async fn serve_pubsub(handler: impl StepHandler + 'static) -> Result<(), Error> {
    logging::init();
    let deps = Arc::new(RuntimeDependencies::from_env().await?);
    let handler = Arc::new(handler);

    lambda_runtime::run(service_fn(move |event: LambdaEvent<Value>| {
        let deps = Arc::clone(&deps);
        let handler = Arc::clone(&handler);
        async move {
            let context = deps.context(&*handler);
            let response = tokio::task::block_in_place(|| {
                handle_pubsub_event(&event.payload, &context, &event_time())
            })
            .map_err(Error::from)?;
            Ok::<_, Error>(response)
        }
    }))
    .await
}

/// Runs `handler` behind direct (SDK or runtime-to-runtime) invocation.
pub async fn serve_direct(handler: impl StepHandler + 'static) -> Result<(), Error> {
    logging::init();
    let deps = Arc::new(RuntimeDependencies::from_env().await?);
    let handler = Arc::new(handler);

    lambda_runtime::run(service_fn(move |event: LambdaEvent<Value>| {
        let deps = Arc::clone(&deps);
        let handler = Arc::clone(&handler);
        async move {
            let context = deps.context(&*handler);
            tokio::task::block_in_place(|| {
                handle_direct_event(event.payload, &context, &event_time())
            })
            .map_err(Error::from)
        }
    }))
    .await
}
