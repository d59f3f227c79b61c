use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::error::PriceFetchError;
use crate::schedule::Periodic;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Asset {
    /// Identifier understood by the price feed.
    pub id: &'static str,
    pub symbol: &'static str,
}

/// Ticker assets, in display order.
pub const ASSETS: [Asset; 6] = [
    Asset { id: "bitcoin", symbol: "BTC" },
    Asset { id: "ethereum", symbol: "ETH" },
    Asset { id: "solana", symbol: "SOL" },
    Asset { id: "binancecoin", symbol: "BNB" },
    Asset { id: "cardano", symbol: "ADA" },
    Asset { id: "polkadot", symbol: "DOT" },
];

#[derive(Clone, Debug, PartialEq)]
pub struct Quote {
    pub symbol: &'static str,
    pub usd: f64,
}

impl Quote {
    pub fn display(&self) -> String {
        format!("{} ${}", self.symbol, format_usd(self.usd))
    }
}

/// Result of one complete fetch; replaced as a whole, never patched.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PriceSnapshot {
    pub quotes: Vec<Quote>,
}

impl PriceSnapshot {
    pub fn lines(&self) -> Vec<String> {
        self.quotes.iter().map(Quote::display).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.quotes.is_empty()
    }
}

/// Two decimals, `,` between thousands: `50000.0 -> "50,000.00"`.
pub fn format_usd(value: f64) -> String {
    let fixed = format!("{:.2}", value.abs());
    let (int, frac) = fixed.split_once('.').unwrap_or((fixed.as_str(), "00"));

    let mut grouped = String::with_capacity(int.len() + int.len() / 3);
    for (i, c) in int.chars().enumerate() {
        if i > 0 && (int.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }

    let negative = value < 0.0 && fixed.bytes().any(|b| b.is_ascii_digit() && b != b'0');
    format!("{}{}.{}", if negative { "-" } else { "" }, grouped, frac)
}

#[async_trait]
pub trait PriceFeed: Send + Sync {
    /// USD price per asset id.
    async fn fetch(&self, ids: &[&str]) -> Result<HashMap<String, f64>, PriceFetchError>;
}

#[derive(Debug, Deserialize)]
struct UsdPrice {
    usd: f64,
}

/// CoinGecko `simple/price` endpoint.
pub struct CoinGeckoFeed {
    client: Client,
    endpoint: String,
}

impl CoinGeckoFeed {
    pub fn new(client: Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, ids: &[&str]) -> String {
        format!(
            "{}/simple/price?ids={}&vs_currencies=usd",
            self.endpoint,
            ids.join(",")
        )
    }
}

#[async_trait]
impl PriceFeed for CoinGeckoFeed {
    async fn fetch(&self, ids: &[&str]) -> Result<HashMap<String, f64>, PriceFetchError> {
        let resp = self
            .client
            .get(self.url(ids))
            .timeout(Duration::from_secs(10))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(PriceFetchError::Status(resp.status()));
        }
        let body = resp.json::<HashMap<String, UsdPrice>>().await?;
        Ok(body.into_iter().map(|(id, p)| (id, p.usd)).collect())
    }
}

pub struct PriceTicker {
    feed: Box<dyn PriceFeed>,
    assets: Vec<Asset>,
    tx: watch::Sender<PriceSnapshot>,
}

impl PriceTicker {
    pub fn new(feed: Box<dyn PriceFeed>, assets: &[Asset]) -> Self {
        let (tx, _rx) = watch::channel(PriceSnapshot::default());
        Self {
            feed,
            assets: assets.to_vec(),
            tx,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<PriceSnapshot> {
        self.tx.subscribe()
    }

    /// One fetch cycle. On error the previous snapshot stays in place.
    pub async fn refresh(&self) -> Result<(), PriceFetchError> {
        let ids: Vec<&str> = self.assets.iter().map(|a| a.id).collect();
        let prices = self.feed.fetch(&ids).await?;

        let quotes = self
            .assets
            .iter()
            .map(|a| {
                prices
                    .get(a.id)
                    .map(|&usd| Quote {
                        symbol: a.symbol,
                        usd,
                    })
                    .ok_or_else(|| PriceFetchError::MissingAsset(a.id.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        self.tx.send_replace(PriceSnapshot { quotes });
        Ok(())
    }

    /// Fetches now and then every `period`, for as long as the returned task lives.
    pub fn spawn(self: Arc<Self>, period: Duration) -> Periodic {
        Periodic::spawn("prices", period, move || {
            let ticker = Arc::clone(&self);
            async move {
                match ticker.refresh().await {
                    Ok(()) => tracing::debug!("prices updated"),
                    Err(e) => tracing::warn!(error = %e, "price fetch failed; keeping previous prices"),
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    impl PriceTicker {
        fn snapshot(&self) -> PriceSnapshot {
            self.tx.borrow().clone()
        }
    }

    struct ScriptedFeed {
        replies: Mutex<Vec<Result<HashMap<String, f64>, PriceFetchError>>>,
        requested: Arc<Mutex<Vec<String>>>,
    }

    impl ScriptedFeed {
        fn new(replies: Vec<Result<HashMap<String, f64>, PriceFetchError>>) -> Self {
            Self {
                replies: Mutex::new(replies.into_iter().rev().collect()),
                requested: Arc::new(Mutex::new(Vec::new())),
            }
        }
    }

    #[async_trait]
    impl PriceFeed for ScriptedFeed {
        async fn fetch(&self, ids: &[&str]) -> Result<HashMap<String, f64>, PriceFetchError> {
            self.requested.lock().unwrap().push(ids.join(","));
            self.replies
                .lock()
                .unwrap()
                .pop()
                .unwrap_or(Err(PriceFetchError::MissingAsset("script".into())))
        }
    }

    fn prices(pairs: &[(&str, f64)]) -> HashMap<String, f64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    fn full_reply() -> HashMap<String, f64> {
        prices(&[
            ("polkadot", 4.5),
            ("cardano", 0.456),
            ("binancecoin", 600.0),
            ("solana", 150.126),
            ("ethereum", 3000.0),
            ("bitcoin", 50000.0),
        ])
    }

    #[test]
    fn formats_usd_with_grouping() {
        assert_eq!(format_usd(50000.0), "50,000.00");
        assert_eq!(format_usd(3000.0), "3,000.00");
        assert_eq!(format_usd(999.999), "1,000.00");
        assert_eq!(format_usd(1234567.891), "1,234,567.89");
        assert_eq!(format_usd(0.456), "0.46");
        assert_eq!(format_usd(12.0), "12.00");
        assert_eq!(format_usd(-1500.5), "-1,500.50");
        assert_eq!(format_usd(-0.001), "0.00");
    }

    #[tokio::test]
    async fn snapshot_follows_declared_order() {
        let feed = ScriptedFeed::new(vec![Ok(full_reply())]);
        let requested = feed.requested.clone();
        let ticker = PriceTicker::new(Box::new(feed), &ASSETS);

        ticker.refresh().await.unwrap();
        assert_eq!(
            ticker.snapshot().lines(),
            vec![
                "BTC $50,000.00",
                "ETH $3,000.00",
                "SOL $150.13",
                "BNB $600.00",
                "ADA $0.46",
                "DOT $4.50",
            ]
        );
        assert_eq!(
            requested.lock().unwrap().as_slice(),
            ["bitcoin,ethereum,solana,binancecoin,cardano,polkadot"]
        );
    }

    #[tokio::test]
    async fn failed_fetch_keeps_previous_snapshot() {
        let feed = ScriptedFeed::new(vec![
            Ok(full_reply()),
            Err(PriceFetchError::Status(reqwest::StatusCode::TOO_MANY_REQUESTS)),
        ]);
        let ticker = PriceTicker::new(Box::new(feed), &ASSETS);

        ticker.refresh().await.unwrap();
        let before = ticker.snapshot();

        assert!(matches!(
            ticker.refresh().await,
            Err(PriceFetchError::Status(_))
        ));
        assert_eq!(ticker.snapshot(), before);
    }

    #[tokio::test]
    async fn partial_response_is_rejected_whole() {
        let mut partial = full_reply();
        partial.remove("cardano");
        let feed = ScriptedFeed::new(vec![Ok(full_reply()), Ok(partial)]);
        let ticker = PriceTicker::new(Box::new(feed), &ASSETS);

        ticker.refresh().await.unwrap();
        let before = ticker.snapshot();

        let err = ticker.refresh().await.unwrap_err();
        assert!(matches!(err, PriceFetchError::MissingAsset(ref id) if id == "cardano"));
        assert_eq!(ticker.snapshot(), before);
        assert_eq!(ticker.snapshot().quotes.len(), 6);
    }

    #[tokio::test]
    async fn first_failure_leaves_ticker_empty() {
        let feed = ScriptedFeed::new(vec![]);
        let ticker = PriceTicker::new(Box::new(feed), &ASSETS);
        assert!(ticker.refresh().await.is_err());
        assert!(ticker.snapshot().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn polls_immediately_and_on_interval() {
        let mut second = full_reply();
        second.insert("bitcoin".into(), 51000.0);
        let feed = ScriptedFeed::new(vec![Ok(full_reply()), Ok(second)]);
        let requested = feed.requested.clone();
        let ticker = Arc::new(PriceTicker::new(Box::new(feed), &ASSETS));
        let mut rx = ticker.subscribe();

        let task = Arc::clone(&ticker).spawn(Duration::from_secs(10));
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().lines()[0], "BTC $50,000.00");

        tokio::time::sleep(Duration::from_secs(10)).await;
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().lines()[0], "BTC $51,000.00");

        // the script is exhausted; failures keep the last snapshot
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(ticker.snapshot().lines()[0], "BTC $51,000.00");
        assert!(requested.lock().unwrap().len() >= 3);

        task.cancel();
    }

    #[test]
    fn coingecko_url_carries_all_ids() {
        let feed = CoinGeckoFeed::new(Client::new(), "https://api.coingecko.com/api/v3/");
        assert_eq!(
            feed.url(&["bitcoin", "ethereum"]),
            "https://api.coingecko.com/api/v3/simple/price?ids=bitcoin,ethereum&vs_currencies=usd"
        );
    }
}
