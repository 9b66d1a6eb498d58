//! Network side of a feed update: download every YP's index.txt
//! concurrently, each under its own timeout.

use std::future::Future;
use std::time::Duration;

use epcyp_proto::error::FeedError;
use epcyp_proto::reconcile::SourceOutcome;
use epcyp_proto::yp::YpSource;
use futures_util::future::join_all;
use tracing::debug;

/// Retrieves the raw index.txt body of one source.
pub trait FeedFetcher: Clone + Send + Sync + 'static {
    fn fetch(&self, source: &YpSource) -> impl Future<Output = Result<String, FeedError>> + Send;
}

#[derive(Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("epcyp/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()?;
        Ok(Self { client, timeout })
    }
}

impl FeedFetcher for HttpFetcher {
    fn fetch(&self, source: &YpSource) -> impl Future<Output = Result<String, FeedError>> + Send {
        let client = self.client.clone();
        let secs = self.timeout.as_secs();
        let url = source.index_url();
        async move {
            debug!("[fetch] GET {}", url);
            let resp = client
                .get(&url)
                .send()
                .await
                .map_err(|e| map_reqwest_error(&url, secs, e))?;
            let status = resp.status();
            if !status.is_success() {
                return Err(FeedError::Http {
                    url,
                    status: status.as_u16(),
                });
            }
            resp.text()
                .await
                .map_err(|e| map_reqwest_error(&url, secs, e))
        }
    }
}

fn map_reqwest_error(url: &str, secs: u64, e: reqwest::Error) -> FeedError {
    if e.is_timeout() {
        FeedError::Timeout {
            url: url.to_string(),
            secs,
        }
    } else {
        FeedError::Network {
            url: url.to_string(),
            message: e.to_string(),
        }
    }
}

/// Fetch and parse all sources.  Outcomes come back in source order; a
/// failure stays attached to its own source.
pub async fn fetch_all<F: FeedFetcher>(
    fetcher: &F,
    sources: &[YpSource],
    timeout: Duration,
) -> Vec<SourceOutcome> {
    let requests = sources.iter().map(|source| async move {
        let fetched = match tokio::time::timeout(timeout, fetcher.fetch(source)).await {
            Ok(result) => result,
            Err(_) => Err(FeedError::Timeout {
                url: source.index_url(),
                secs: timeout.as_secs(),
            }),
        };
        SourceOutcome::from_fetch(source.clone(), fetched)
    });
    join_all(requests).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone)]
    struct SlowForTp;

    impl FeedFetcher for SlowForTp {
        fn fetch(
            &self,
            source: &YpSource,
        ) -> impl Future<Output = Result<String, FeedError>> + Send {
            let name = source.name.clone();
            async move {
                if name == "TP" {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                }
                Ok(format!(
                    "{name}ch<>ID<>1.2.3.4:7144<><><><>1<>0<>0<>FLV<><><><><><>0:01<><><>0"
                ))
            }
        }
    }

    #[tokio::test]
    async fn test_timeout_is_isolated_per_source() {
        let sources = vec![
            YpSource::new("SP", "http://sp.example/"),
            YpSource::new("TP", "http://tp.example/"),
        ];
        let outcomes = fetch_all(&SlowForTp, &sources, Duration::from_millis(50)).await;
        assert_eq!(outcomes.len(), 2);

        let sp = outcomes[0].result.as_ref().expect("SP answers in time");
        assert_eq!(sp[0].name, "SPch");
        assert!(matches!(
            outcomes[1].result,
            Err(FeedError::Timeout { .. })
        ));
    }
}
