use std::time::Duration;

use choreo_core::workflow::Step;

use crate::adapters::dispatch::StepDispatcher;

/// POSTs the payload to the URL in the next step's `node`.
pub struct HttpDispatcher {
    client: reqwest::Client,
}

impl HttpDispatcher {
    pub fn new(timeout: Duration) -> Result<Self, String> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| format!("failed to build http client: {error}"))?;
        Ok(Self { client })
    }
}

impl StepDispatcher for HttpDispatcher {
    fn dispatch_next(&self, next: &Step, payload: &[u8]) -> Result<(), String> {
        let url = next.routing_target().to_string();
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(format!(
                "step {} ({}) has no http target: '{url}'",
                next.id, next.function_name
            ));
        }

        let client = self.client.clone();
        let body = payload.to_vec();
        tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(async move {
                let response = client
                    .post(&url)
                    .header(reqwest::header::CONTENT_TYPE, "application/json")
                    .body(body)
                    .send()
                    .await
                    .map_err(|error| format!("failed to POST invocation to {url}: {error}"))?;
                let status = response.status();
                if status.is_success() {
                    Ok(())
                } else {
                    Err(format!("next step at {url} rejected invocation with {status}"))
                }
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_targets_that_are_not_urls() {
        let dispatcher = HttpDispatcher::new(Duration::from_secs(1)).expect("client");
        let error = dispatcher
            .dispatch_next(&Step::new(2, "resize"), b"{}")
            .expect_err("plain function name is not a url");
        assert!(error.contains("has no http target: 'resize'"));
    }
}
