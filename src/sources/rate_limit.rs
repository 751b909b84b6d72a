use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use http::Extensions;
use reqwest::Url;
use reqwest_middleware::{Middleware, Next};
use tokio::sync::Mutex;
use tokio::time::{Instant, sleep_until};

/// The budget a request is charged against.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) enum Budget {
    Token,
    Search,
    Data,
    /// Anything else, paced per origin.
    Origin(String),
}

/// Minimum spacing for requests whose URL starts with `prefix`.
#[derive(Clone, Debug)]
pub(crate) struct Lane {
    pub budget: Budget,
    pub prefix: String,
    pub spacing: Duration,
}

impl Lane {
    fn new(budget: Budget, prefix: impl Into<String>, spacing: Duration) -> Self {
        Self {
            budget,
            prefix: prefix.into(),
            spacing,
        }
    }
}

#[derive(Debug)]
pub(crate) struct RequestPacer {
    lanes: Vec<Lane>,
    origin_spacing: Duration,
    next_slot: Mutex<HashMap<Budget, Instant>>,
}

impl RequestPacer {
    /// Lanes for the configured Direct+ host. Token issuance is throttled
    /// far harder than search and data calls.
    pub(crate) fn for_directplus() -> Self {
        let base = crate::sources::env_base(
            crate::sources::DIRECTPLUS_BASE,
            crate::sources::DIRECTPLUS_BASE_ENV,
        );
        let base = base.trim_end_matches('/');
        Self::new(
            vec![
                Lane::new(Budget::Token, format!("{base}/v2/token"), Duration::from_secs(1)),
                Lane::new(
                    Budget::Search,
                    format!("{base}/v1/search"),
                    Duration::from_millis(200),
                ),
                Lane::new(
                    Budget::Data,
                    format!("{base}/v1/data"),
                    Duration::from_millis(200),
                ),
            ],
            Duration::from_millis(100),
        )
    }

    pub(crate) fn new(lanes: Vec<Lane>, origin_spacing: Duration) -> Self {
        Self {
            lanes,
            origin_spacing,
            next_slot: Mutex::new(HashMap::new()),
        }
    }

    /// The most specific lane wins; unmatched URLs share a per-origin budget.
    fn classify(&self, url: &Url) -> (Budget, Duration) {
        let full = url.as_str();
        let lane = self
            .lanes
            .iter()
            .filter(|lane| full.starts_with(&lane.prefix))
            .max_by_key(|lane| lane.prefix.len());
        match lane {
            Some(lane) => (lane.budget.clone(), lane.spacing),
            None => (
                Budget::Origin(url.origin().ascii_serialization()),
                self.origin_spacing,
            ),
        }
    }

    /// Reserves the next free slot for the URL's budget and sleeps until it
    /// arrives. Slots are handed out under the lock so concurrent callers
    /// queue instead of racing.
    pub(crate) async fn pace(&self, url: &Url) {
        let (budget, spacing) = self.classify(url);
        let slot = {
            let mut slots = self.next_slot.lock().await;
            let now = Instant::now();
            let slot = slots.get(&budget).copied().map_or(now, |next| next.max(now));
            slots.insert(budget, slot + spacing);
            slot
        };
        if slot > Instant::now() {
            sleep_until(slot).await;
        }
    }
}

static PACER: OnceLock<Arc<RequestPacer>> = OnceLock::new();

fn shared_pacer() -> Arc<RequestPacer> {
    PACER
        .get_or_init(|| Arc::new(RequestPacer::for_directplus()))
        .clone()
}

#[derive(Clone, Debug)]
pub(crate) struct RateLimitMiddleware {
    pacer: Arc<RequestPacer>,
}

impl RateLimitMiddleware {
    pub(crate) fn new() -> Self {
        Self {
            pacer: shared_pacer(),
        }
    }
}

#[async_trait::async_trait]
impl Middleware for RateLimitMiddleware {
    async fn handle(
        &self,
        req: reqwest::Request,
        extensions: &mut Extensions,
        next: Next<'_>,
    ) -> reqwest_middleware::Result<reqwest::Response> {
        self.pacer.pace(req.url()).await;
        next.run(req, extensions).await
    }
}
