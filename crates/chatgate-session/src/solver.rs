//! External challenge-solver integration (2Captcha-style HTTP API).
//!
//! The acquirer submits the page's site-key, polls until a worker returns a
//! token, and splices that token into the page. Used for
//! reCAPTCHA/hCaptcha/Turnstile; sliders are driven locally instead.

use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::acquirer::AcquireError;

const POLL_INTERVAL: Duration = Duration::from_secs(5);
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeKind {
    Recaptcha,
    Hcaptcha,
    Turnstile,
}

impl ChallengeKind {
    fn method(&self) -> &'static str {
        match self {
            ChallengeKind::Recaptcha => "userrecaptcha",
            ChallengeKind::Hcaptcha => "hcaptcha",
            ChallengeKind::Turnstile => "turnstile",
        }
    }
}

#[derive(Debug, Deserialize)]
struct SolverReply {
    status: i64,
    request: String,
}

pub struct ChallengeSolver {
    base_url: String,
    api_key: String,
    timeout: Duration,
    client: wreq::Client,
}

impl ChallengeSolver {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self, AcquireError> {
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            timeout: DEFAULT_TIMEOUT,
            client: wreq::Client::builder()
                .build()
                .map_err(|err| AcquireError::ChallengeUnsolved(err.to_string()))?,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Submit a challenge and poll until a token comes back or the budget
    /// runs out.
    pub async fn solve(
        &self,
        kind: ChallengeKind,
        site_key: &str,
        page_url: &str,
    ) -> Result<String, AcquireError> {
        let task_id = self.submit(kind, site_key, page_url).await?;
        debug!(task_id = %task_id, kind = ?kind, "challenge submitted to solver");

        let deadline = tokio::time::Instant::now() + self.timeout;
        loop {
            tokio::time::sleep(POLL_INTERVAL).await;
            if tokio::time::Instant::now() >= deadline {
                return Err(AcquireError::ChallengeUnsolved(format!(
                    "solver did not answer within {}s",
                    self.timeout.as_secs()
                )));
            }
            match self.poll(&task_id).await? {
                Some(token) => return Ok(token),
                None => continue,
            }
        }
    }

    async fn submit(
        &self,
        kind: ChallengeKind,
        site_key: &str,
        page_url: &str,
    ) -> Result<String, AcquireError> {
        let url = format!(
            "{}/in.php?key={}&method={}&sitekey={}&pageurl={}&json=1",
            self.base_url,
            self.api_key,
            kind.method(),
            site_key,
            page_url
        );
        let reply: SolverReply = self
            .client
            .post(&url)
            .send()
            .await
            .map_err(|err| AcquireError::ChallengeUnsolved(err.to_string()))?
            .json()
            .await
            .map_err(|err| AcquireError::ChallengeUnsolved(err.to_string()))?;
        if reply.status != 1 {
            return Err(AcquireError::ChallengeUnsolved(format!(
                "solver rejected the task: {}",
                reply.request
            )));
        }
        Ok(reply.request)
    }

    /// `Ok(None)` while the worker is still busy.
    async fn poll(&self, task_id: &str) -> Result<Option<String>, AcquireError> {
        let url = format!(
            "{}/res.php?key={}&action=get&id={}&json=1",
            self.base_url, self.api_key, task_id
        );
        let reply: SolverReply = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|err| AcquireError::ChallengeUnsolved(err.to_string()))?
            .json()
            .await
            .map_err(|err| AcquireError::ChallengeUnsolved(err.to_string()))?;
        if reply.status == 1 {
            return Ok(Some(reply.request));
        }
        if reply.request == "CAPCHA_NOT_READY" {
            return Ok(None);
        }
        Err(AcquireError::ChallengeUnsolved(format!(
            "solver error: {}",
            reply.request
        )))
    }
}
