//! Fire-and-forget snapshot push to the relay.

use kubestat_common::PodSample;

pub struct Transport {
    client: reqwest::Client,
    endpoint: String,
}

impl Transport {
    pub fn new(endpoint: impl Into<String>) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(5))
            .build()?;
        Ok(Transport {
            client,
            endpoint: endpoint.into(),
        })
    }

    /// Posts the full snapshot as a JSON array. Best effort: the caller
    /// logs failures and moves on; the next cycle's push supersedes any
    /// lost one. No retry, no backoff.
    pub async fn send(&self, snapshot: &[PodSample]) -> Result<(), reqwest::Error> {
        self.client
            .post(&self.endpoint)
            .json(snapshot)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}
