//! Simulated venue: fills at the current mark price, tracks margin and
//! realized PnL in memory.

use super::{Exchange, ExchangeError, ExecutionResult};
use crate::domain::{
    AccountState, Decimal, Direction, ExchangePosition, OpenPosition, OpenPositionKey,
    RequestedAction, TimeMs,
};
use crate::engine::realized_pnl;
use crate::market::MarketData;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug)]
struct PaperAccount {
    /// Initial capital plus realized PnL.
    wallet: Decimal,
    positions: BTreeMap<OpenPositionKey, ExchangePosition>,
}

#[derive(Debug)]
pub struct PaperExchange {
    market: Arc<dyn MarketData>,
    restricted: bool,
    /// Adverse price move applied to every fill, in basis points.
    slippage_bps: Decimal,
    account: Mutex<PaperAccount>,
    delay: Option<Duration>,
    /// Executions left before every further `execute` fails.
    fail_after: Option<usize>,
    executed: AtomicUsize,
}

impl PaperExchange {
    pub fn new(market: Arc<dyn MarketData>, initial_equity: Decimal, restricted: bool) -> Self {
        Self {
            market,
            restricted,
            slippage_bps: Decimal::zero(),
            account: Mutex::new(PaperAccount {
                wallet: initial_equity,
                positions: BTreeMap::new(),
            }),
            delay: None,
            fail_after: None,
            executed: AtomicUsize::new(0),
        }
    }

    pub fn with_slippage_bps(mut self, bps: Decimal) -> Self {
        self.slippage_bps = bps;
        self
    }

    /// Seed the account from an existing ledger: open positions plus the
    /// PnL already realized.
    pub fn with_history(mut self, open: Vec<OpenPosition>, realized: Decimal) -> Self {
        {
            let account = self.account.get_mut();
            account.wallet = account.wallet + realized;
            for position in open {
                let key = OpenPositionKey::new(position.instrument.clone(), position.direction);
                account.positions.insert(
                    key,
                    ExchangePosition {
                        instrument: position.instrument,
                        direction: position.direction,
                        quantity: position.snapshot.quantity,
                        entry_price: position.snapshot.entry_price,
                        leverage: position.snapshot.leverage,
                    },
                );
            }
        }
        self
    }

    /// Sleep before every call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Succeed `n` times, then reject every further execution.
    pub fn failing_after(mut self, n: usize) -> Self {
        self.fail_after = Some(n);
        self
    }

    async fn pause(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn fill_price(&self, mark: Decimal, direction: Direction, opening: bool) -> Decimal {
        let slip = mark * self.slippage_bps / Decimal::from(10_000i64);
        // Buying pays up, selling gives up.
        let buying = matches!(
            (direction, opening),
            (Direction::Long, true) | (Direction::Short, false)
        );
        if buying {
            mark + slip
        } else {
            mark - slip
        }
    }
}

#[async_trait]
impl Exchange for PaperExchange {
    async fn execute(&self, action: &RequestedAction) -> Result<ExecutionResult, ExchangeError> {
        self.pause().await;

        if let Some(limit) = self.fail_after {
            if self.executed.load(Ordering::SeqCst) >= limit {
                return Err(ExchangeError::Rejected(
                    "paper exchange configured to fail".to_string(),
                ));
            }
        }

        let mark = self.market.price(&action.instrument).await?;
        let key = action.key();
        let direction = key.direction;
        let mut account = self.account.lock().await;

        let (fill_price, fill_quantity) = if action.kind.is_open() {
            if account.positions.contains_key(&key) {
                return Err(ExchangeError::Rejected(format!("{} already open", key)));
            }
            let quantity = action
                .resolved_quantity()
                .filter(Decimal::is_positive)
                .ok_or_else(|| ExchangeError::InvalidOrder("no positive quantity".to_string()))?;
            let price = self.fill_price(mark, direction, true);
            let leverage = action.leverage.max(1);
            let used: Decimal = account
                .positions
                .values()
                .map(|p| p.quantity * p.entry_price / Decimal::from(p.leverage.max(1)))
                .sum();
            let needed = quantity * price / Decimal::from(leverage);
            if used + needed > account.wallet {
                return Err(ExchangeError::Rejected(format!(
                    "insufficient margin: need {}, available {}",
                    needed,
                    account.wallet - used
                )));
            }
            account.positions.insert(
                key.clone(),
                ExchangePosition {
                    instrument: action.instrument.clone(),
                    direction,
                    quantity,
                    entry_price: price,
                    leverage,
                },
            );
            (price, quantity)
        } else {
            let position = account
                .positions
                .remove(&key)
                .ok_or_else(|| ExchangeError::NoPosition(key.clone()))?;
            let price = self.fill_price(mark, direction, false);
            let pnl = realized_pnl(direction, position.quantity, position.entry_price, price);
            account.wallet = account.wallet + pnl;
            (price, position.quantity)
        };
        drop(account);

        self.executed.fetch_add(1, Ordering::SeqCst);
        let result = ExecutionResult {
            order_id: Uuid::new_v4().to_string(),
            fill_price,
            fill_quantity,
            time_ms: TimeMs::now(),
        };
        debug!(
            order_id = %result.order_id,
            key = %key,
            kind = %action.kind,
            price = %fill_price,
            quantity = %fill_quantity,
            "Paper fill"
        );
        Ok(result)
    }

    async fn account_state(&self) -> Result<AccountState, ExchangeError> {
        self.pause().await;

        let positions: Vec<ExchangePosition> =
            self.account.lock().await.positions.values().cloned().collect();
        let mut unrealized = Decimal::zero();
        let mut margin = Decimal::zero();
        for position in &positions {
            let mark = self.market.price(&position.instrument).await?;
            unrealized = unrealized
                + realized_pnl(position.direction, position.quantity, position.entry_price, mark);
            margin = margin
                + position.quantity * position.entry_price / Decimal::from(position.leverage.max(1));
        }

        let wallet = self.account.lock().await.wallet;
        let equity = wallet + unrealized;
        Ok(AccountState {
            equity,
            available_balance: equity - margin,
            restricted: self.restricted,
        })
    }

    async fn positions(&self) -> Result<Vec<ExchangePosition>, ExchangeError> {
        self.pause().await;
        Ok(self.account.lock().await.positions.values().cloned().collect())
    }
}
