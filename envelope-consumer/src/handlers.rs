use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use envelope_router::StreamProcessor;
use serde::{Deserialize, Serialize};
use tracing::info;

pub const MARKET_SETTLE: &str = "NotifyMarketSettle";
pub const SINGLE_BET_SETTLE: &str = "NotifySingleBetSettle";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketSettle {
    #[serde(alias = "MarketId")]
    pub market_id: String,
    #[serde(alias = "SettlementTimestamp")]
    pub settlement_timestamp: DateTime<Utc>,
}

/// Decodes market settlements and logs them.
pub struct MarketSettleProcessor;

#[async_trait]
impl StreamProcessor for MarketSettleProcessor {
    async fn process_message(&self, payload: &str) -> anyhow::Result<()> {
        let settle: MarketSettle =
            serde_json::from_str(payload).context("Failed to parse market settlement")?;

        info!(
            "Market {} settled at {}",
            settle.market_id, settle.settlement_timestamp
        );
        Ok(())
    }
}

pub fn log_single_bet_settle(payload: &str) -> anyhow::Result<()> {
    info!("Received single bet settlement: {}", payload);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use test_case::test_case;

    #[test_case(r#"{"marketId":"M-1","settlementTimestamp":"2024-01-01T12:00:00Z"}"# ; "camel case")]
    #[test_case(r#"{"MarketId":"M-1","SettlementTimestamp":"2024-01-01T12:00:00Z"}"# ; "declared names")]
    fn test_market_settle_parsing(payload: &str) {
        let settle: MarketSettle = serde_json::from_str(payload).unwrap();

        assert_eq!(
            settle,
            MarketSettle {
                market_id: "M-1".to_owned(),
                settlement_timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap(),
            }
        );
    }

    #[tokio::test]
    async fn test_processor_rejects_unparseable_payload() {
        let result = MarketSettleProcessor
            .process_message(r#"{"marketId":"M-1"}"#)
            .await;

        let error = result.unwrap_err();
        assert!(format!("{error:#}").starts_with("Failed to parse market settlement"));
    }

    #[tokio::test]
    async fn test_processor_accepts_settlement() {
        let result = MarketSettleProcessor
            .process_message(r#"{"marketId":"M-2","settlementTimestamp":"2024-03-05T08:30:00Z"}"#)
            .await;

        assert!(result.is_ok());
    }

    #[test]
    fn test_single_bet_settle_accepts_any_text() {
        assert!(log_single_bet_settle("bet-42").is_ok());
    }
}
