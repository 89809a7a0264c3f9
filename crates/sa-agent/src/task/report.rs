//! Where session outcomes go

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;

use sa_core::traits::{ResultReporter, SessionOutcome};

const REPORT_TIMEOUT: Duration = Duration::from_secs(30);

/// Posts outcomes to the session service's status endpoint
pub struct HttpResultReporter {
    http: reqwest::Client,
    url: String,
}

impl HttpResultReporter {
    pub fn new(url: impl Into<String>, user_agent: &str) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(REPORT_TIMEOUT)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            http,
            url: url.into(),
        })
    }
}

/// Query string for one outcome
fn outcome_query(outcome: &SessionOutcome) -> [(&'static str, String); 3] {
    [
        ("channelId", outcome.channel_id.clone()),
        ("status", outcome.status.to_string()),
        ("errorcode", outcome.error_code.clone()),
    ]
}

#[async_trait]
impl ResultReporter for HttpResultReporter {
    async fn report(&self, outcome: &SessionOutcome) -> anyhow::Result<()> {
        tracing::info!(
            "Reporting session {} as {} ({})",
            outcome.channel_id,
            outcome.status,
            outcome.error_code
        );
        self.http
            .post(&self.url)
            .query(&outcome_query(outcome))
            .send()
            .await
            .with_context(|| format!("Failed to post session result to {}", self.url))?
            .error_for_status()
            .context("Session result rejected")?;
        Ok(())
    }
}

/// Writes outcomes to the log only
#[derive(Debug, Default, Clone, Copy)]
pub struct LogResultReporter;

#[async_trait]
impl ResultReporter for LogResultReporter {
    async fn report(&self, outcome: &SessionOutcome) -> anyhow::Result<()> {
        tracing::info!(
            "Session {} finished: status={} errorcode={}",
            outcome.channel_id,
            outcome.status,
            outcome.error_code
        );
        Ok(())
    }
}
