//! Task generator backed by an external HTTP service

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::{CollabError, CollabResult, GenerationRequest, TaskGenerator, TaskProposal};

/// Response body expected from the generation service
#[derive(Debug, Deserialize)]
struct GenerationResponse {
    proposals: Vec<TaskProposal>,
}

/// POSTs the generation request as JSON and expects `{"proposals": [...]}` back.
///
/// Request deadlines are applied by the caller.
pub struct HttpGenerator {
    client: Client,
    url: String,
}

impl HttpGenerator {
    pub fn new(url: impl Into<String>) -> CollabResult<Self> {
        let client = Client::builder()
            .user_agent(concat!("cadenced/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| CollabError::Internal(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl TaskGenerator for HttpGenerator {
    async fn generate(&self, request: &GenerationRequest) -> CollabResult<Vec<TaskProposal>> {
        debug!(url = %self.url, goal = %request.goal, "Requesting task proposals");

        let response = self
            .client
            .post(&self.url)
            .json(request)
            .send()
            .await
            .map_err(|e| CollabError::Generation(format!("request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(CollabError::Generation(format!(
                "generator returned {}: {}",
                status, body
            )));
        }

        let parsed: GenerationResponse = response
            .json()
            .await
            .map_err(|e| CollabError::Generation(format!("malformed response: {}", e)))?;

        Ok(parsed.proposals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_with_unknown_category_is_rejected() {
        let body = r#"{"proposals":[{"title":"t","description":"d","category":"chore",
            "impact":"low","effort":"low","risk":"low","evidence":[]}]}"#;
        assert!(serde_json::from_str::<GenerationResponse>(body).is_err());
    }

    #[test]
    fn response_parses() {
        let body = r#"{"proposals":[{"title":"t","description":"d","category":"security",
            "impact":"high","effort":"medium","risk":"low",
            "evidence":[{"path":"a.rs","line":3},{"path":"b.rs","note":"auth"}]}]}"#;
        let parsed: GenerationResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.proposals.len(), 1);
        assert_eq!(parsed.proposals[0].evidence[0].line, Some(3));
    }

    #[test]
    fn keeps_url() {
        let generator = HttpGenerator::new("http://127.0.0.1:8787/generate").unwrap();
        assert_eq!(generator.url(), "http://127.0.0.1:8787/generate");
    }
}
