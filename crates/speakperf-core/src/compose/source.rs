use crate::errors::{PerfError, PerfResult};
use tokio_util::sync::CancellationToken;

/// Fetches compose content from an HTTP(S) URL or a local path.
///
/// Single attempt, no retries: a caller that wants another try re-runs the
/// whole workflow.
#[derive(Clone, Default)]
pub struct SourceResolver {
    client: reqwest::Client,
}

pub fn is_url(source: &str) -> bool {
    let lower = source.trim_start().to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

impl SourceResolver {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    pub async fn resolve(&self, source: &str, cancel: &CancellationToken) -> PerfResult<String> {
        let fetch = async {
            if is_url(source) {
                self.fetch_url(source).await
            } else {
                tokio::fs::read_to_string(source)
                    .await
                    .map_err(|e| fetch_err(source, format!("failed to read compose file: {e}")))
            }
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(PerfError::Cancelled),
            res = fetch => res,
        }
    }

    async fn fetch_url(&self, url: &str) -> PerfResult<String> {
        let resp = self
            .client
            .get(url.trim())
            .send()
            .await
            .map_err(|e| fetch_err(url, format!("failed to download compose file: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(fetch_err(
                url,
                format!("failed to download compose file: status {}", status.as_u16()),
            ));
        }

        resp.text()
            .await
            .map_err(|e| fetch_err(url, format!("failed to read response: {e}")))
    }
}

fn fetch_err(source: &str, message: String) -> PerfError {
    PerfError::Fetch {
        source_ref: source.to_string(),
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_detection_is_scheme_based() {
        assert!(is_url("https://example.com/docker-compose.yml"));
        assert!(is_url("HTTP://example.com/c.yml"));
        assert!(!is_url("./docker-compose.yml"));
        assert!(!is_url("ftp://example.com/c.yml"));
        assert!(!is_url("/tmp/http://weird"));
    }

    #[tokio::test]
    async fn reads_local_path_and_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("docker-compose.yml");
        std::fs::write(&path, "services: {}\n").unwrap();

        let resolver = SourceResolver::default();
        let cancel = CancellationToken::new();
        let content = resolver
            .resolve(path.to_str().unwrap(), &cancel)
            .await
            .unwrap();
        assert_eq!(content, "services: {}\n");

        let missing = dir.path().join("nope.yml");
        let err = resolver
            .resolve(missing.to_str().unwrap(), &cancel)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "E_FETCH");
    }

    #[tokio::test]
    async fn cancelled_token_aborts_fetch() {
        let resolver = SourceResolver::default();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = resolver
            .resolve("http://127.0.0.1:9/compose.yml", &cancel)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }
}
