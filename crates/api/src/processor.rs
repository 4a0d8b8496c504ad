//! Default item processor.
//!
//! Scoring, alerting and trade persistence are external collaborators;
//! this processor is the seam where they plug in. Until one is wired, it
//! logs each large trade and deduplicates by the trade's external key so
//! overlap re-fetches stay no-ops.

use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::info;
use tradewatch_core::ItemProcessor;
use tradewatch_domain::{ProcessError, TradeEvent};

/// Logs observed trades, idempotent on the external trade key.
#[derive(Default)]
pub struct AuditProcessor {
    seen: Mutex<HashSet<String>>,
}

impl AuditProcessor {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ItemProcessor for AuditProcessor {
    async fn process(&self, item: &TradeEvent) -> Result<(), ProcessError> {
        let first_time = self
            .seen
            .lock()
            .map_err(|_| ProcessError::Transient("seen-set lock poisoned".into()))?
            .insert(item.trade_key.clone());

        if first_time {
            info!(
                trade_key = %item.trade_key,
                wallet = item.wallet.as_deref().unwrap_or("unknown"),
                market = item.market_title.as_deref().unwrap_or("unknown"),
                notional_usd = item.notional_usd,
                "large trade observed"
            );
        }
        Ok(())
    }
}
