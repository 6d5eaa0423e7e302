//! Hard risk rules applied to every oracle candidate before execution.
//!
//! Rules run in a fixed priority order and the first violation wins:
//! anti-stacking, leverage, position size, risk-reward, margin usage,
//! liquidity. Leverage, position size and margin usage can be configured to
//! clamp the candidate instead of rejecting it.
//!
//! Sizing and margin are always computed at the mark price; the oracle's
//! own price is only a hint. Oracle numbers are untrusted, so every rule
//! uses checked arithmetic and turns an overflow into a rejection.

use crate::config::{RiskConfig, RulePolicy};
use crate::domain::{
    AccountState, CandidateDecision, Decimal, Direction, Instrument, MarketSnapshot,
    OpenPosition, OpenPositionKey, OpenPositionSnapshot, RequestedAction, TimeMs,
};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RiskRule {
    AntiStacking,
    Leverage,
    PositionSize,
    RiskReward,
    MarginUsage,
    Liquidity,
}

impl RiskRule {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskRule::AntiStacking => "anti-stacking",
            RiskRule::Leverage => "leverage",
            RiskRule::PositionSize => "position-size",
            RiskRule::RiskReward => "risk-reward",
            RiskRule::MarginUsage => "margin-usage",
            RiskRule::Liquidity => "liquidity",
        }
    }
}

impl fmt::Display for RiskRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which rule fired and the numbers that made it fire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rejection {
    pub rule: RiskRule,
    pub observed: Decimal,
    pub limit: Decimal,
    pub detail: String,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} (observed {}, limit {})",
            self.rule, self.detail, self.observed, self.limit
        )
    }
}

/// A rewrite applied under a clamp policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Adjustment {
    pub rule: RiskRule,
    pub field: &'static str,
    pub from: Decimal,
    pub to: Decimal,
}

impl fmt::Display for Adjustment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} clamped {} -> {}", self.rule, self.field, self.from, self.to)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Approved {
        action: RequestedAction,
        adjustments: Vec<Adjustment>,
    },
    Rejected {
        action: RequestedAction,
        rejection: Rejection,
    },
}

impl Verdict {
    pub fn is_approved(&self) -> bool {
        matches!(self, Verdict::Approved { .. })
    }

    pub fn action(&self) -> &RequestedAction {
        match self {
            Verdict::Approved { action, .. } | Verdict::Rejected { action, .. } => action,
        }
    }

    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            Verdict::Rejected { rejection, .. } => Some(rejection),
            Verdict::Approved { .. } => None,
        }
    }
}

/// Stateless rule engine over an immutable rule set.
#[derive(Debug, Clone)]
pub struct RiskValidator {
    config: Arc<RiskConfig>,
}

impl RiskValidator {
    pub fn new(config: Arc<RiskConfig>) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    /// Validate every requested action of a decision, in order.
    ///
    /// Approved actions are applied to a working copy of the open positions,
    /// so a single decision cannot stack on itself or overrun margin.
    pub fn validate_decision(
        &self,
        decision: &CandidateDecision,
        account: &AccountState,
        open_positions: &[OpenPosition],
        markets: &HashMap<Instrument, MarketSnapshot>,
    ) -> Vec<Verdict> {
        let mut working: BTreeMap<OpenPositionKey, OpenPositionSnapshot> = open_positions
            .iter()
            .map(|p| {
                (
                    OpenPositionKey::new(p.instrument.clone(), p.direction),
                    p.snapshot.clone(),
                )
            })
            .collect();

        decision
            .actions
            .iter()
            .map(|action| {
                let verdict = self.validate_against(action, account, &working, markets.get(&action.instrument));
                if let Verdict::Approved { action, .. } = &verdict {
                    apply_to_working(&mut working, action);
                }
                verdict
            })
            .collect()
    }

    /// Validate a single requested action against the current state.
    pub fn validate(
        &self,
        action: &RequestedAction,
        account: &AccountState,
        open_positions: &[OpenPosition],
        market: Option<&MarketSnapshot>,
    ) -> Verdict {
        let working: BTreeMap<OpenPositionKey, OpenPositionSnapshot> = open_positions
            .iter()
            .map(|p| {
                (
                    OpenPositionKey::new(p.instrument.clone(), p.direction),
                    p.snapshot.clone(),
                )
            })
            .collect();
        self.validate_against(action, account, &working, market)
    }

    fn validate_against(
        &self,
        action: &RequestedAction,
        account: &AccountState,
        open: &BTreeMap<OpenPositionKey, OpenPositionSnapshot>,
        market: Option<&MarketSnapshot>,
    ) -> Verdict {
        // Closes only reduce exposure.
        if action.kind.is_close() {
            return Verdict::Approved {
                action: action.clone(),
                adjustments: Vec::new(),
            };
        }

        let mut candidate = action.clone();
        candidate.price_hint = market.map(|m| m.price).filter(Decimal::is_positive);
        let mut adjustments = Vec::new();

        let checks: [fn(&Self, &mut RuleInput<'_>) -> Result<(), Rejection>; 6] = [
            Self::check_anti_stacking,
            Self::check_leverage,
            Self::check_position_size,
            Self::check_risk_reward,
            Self::check_margin_usage,
            Self::check_liquidity,
        ];

        let mut input = RuleInput {
            candidate: &mut candidate,
            adjustments: &mut adjustments,
            account,
            open,
            market,
        };
        for check in checks {
            if let Err(rejection) = check(self, &mut input) {
                return Verdict::Rejected {
                    action: action.clone(),
                    rejection,
                };
            }
        }

        Verdict::Approved {
            action: candidate,
            adjustments,
        }
    }

    fn check_anti_stacking(&self, input: &mut RuleInput<'_>) -> Result<(), Rejection> {
        match input.open.get(&input.candidate.key()) {
            Some(existing) => Err(Rejection {
                rule: RiskRule::AntiStacking,
                observed: existing.quantity,
                limit: Decimal::zero(),
                detail: format!("{} already open", input.candidate.key()),
            }),
            None => Ok(()),
        }
    }

    fn check_leverage(&self, input: &mut RuleInput<'_>) -> Result<(), Rejection> {
        let requested = input.candidate.leverage.max(1);
        let class_ceiling = self.config.asset_class_leverage(&input.candidate.instrument);
        let ceiling = if input.account.restricted {
            class_ceiling.min(self.config.max_leverage_restricted)
        } else {
            class_ceiling
        };

        if requested <= ceiling {
            input.candidate.leverage = requested;
            return Ok(());
        }

        match self.config.leverage_policy {
            RulePolicy::Reject => Err(Rejection {
                rule: RiskRule::Leverage,
                observed: Decimal::from(requested),
                limit: Decimal::from(ceiling),
                detail: if input.account.restricted && ceiling < class_ceiling {
                    "requested leverage above restricted account ceiling".to_string()
                } else {
                    "requested leverage above asset-class ceiling".to_string()
                },
            }),
            RulePolicy::Clamp => {
                input.adjustments.push(Adjustment {
                    rule: RiskRule::Leverage,
                    field: "leverage",
                    from: Decimal::from(requested),
                    to: Decimal::from(ceiling),
                });
                input.candidate.leverage = ceiling;
                Ok(())
            }
        }
    }

    fn check_position_size(&self, input: &mut RuleInput<'_>) -> Result<(), Rejection> {
        let band = self.config.size_band(&input.candidate.instrument);
        let reject = |observed: Decimal, limit: Decimal, detail: &str| Rejection {
            rule: RiskRule::PositionSize,
            observed,
            limit,
            detail: detail.to_string(),
        };

        let Some(price) = input.candidate.price_hint else {
            return Err(reject(Decimal::zero(), Decimal::zero(), "no mark price"));
        };
        let quantity = match input.candidate.resolved_quantity() {
            Some(q) if q.is_positive() => q,
            _ => return Err(reject(Decimal::zero(), band.min, "no usable quantity")),
        };
        if !input.account.equity.is_positive() {
            return Err(reject(input.account.equity, Decimal::zero(), "non-positive equity"));
        }

        let equity = input.account.equity;
        let Some(multiple) = price
            .checked_mul(quantity)
            .and_then(|notional| notional.checked_div(equity))
        else {
            return Err(overflow(RiskRule::PositionSize, band.max));
        };
        input.candidate.quantity = Some(quantity);

        if multiple < band.min {
            return Err(reject(multiple, band.min, "notional below minimum equity multiple"));
        }
        if multiple <= band.max {
            return Ok(());
        }

        match self.config.position_size_policy {
            RulePolicy::Reject => Err(reject(
                multiple,
                band.max,
                "notional above maximum equity multiple",
            )),
            RulePolicy::Clamp => {
                let clamped = band
                    .max
                    .checked_mul(equity)
                    .and_then(|notional| notional.checked_div(price))
                    .ok_or_else(|| overflow(RiskRule::PositionSize, band.max))?;
                input.adjustments.push(Adjustment {
                    rule: RiskRule::PositionSize,
                    field: "quantity",
                    from: quantity,
                    to: clamped,
                });
                input.candidate.quantity = Some(clamped);
                input.candidate.notional_usd = None;
                Ok(())
            }
        }
    }

    fn check_risk_reward(&self, input: &mut RuleInput<'_>) -> Result<(), Rejection> {
        let (Some(stop_loss), Some(take_profit), Some(price)) = (
            input.candidate.stop_loss,
            input.candidate.take_profit,
            input.candidate.price_hint,
        ) else {
            return Ok(());
        };

        let limit = self.config.min_risk_reward;
        let distances = match input.candidate.kind.direction() {
            Direction::Long => price.checked_sub(stop_loss).zip(take_profit.checked_sub(price)),
            Direction::Short => stop_loss.checked_sub(price).zip(price.checked_sub(take_profit)),
        };
        let Some((potential_loss, potential_gain)) = distances else {
            return Err(overflow(RiskRule::RiskReward, limit));
        };

        if !potential_loss.is_positive() || !potential_gain.is_positive() {
            return Err(Rejection {
                rule: RiskRule::RiskReward,
                observed: Decimal::zero(),
                limit,
                detail: format!(
                    "stop-loss {} / take-profit {} on wrong side of price {}",
                    stop_loss, take_profit, price
                ),
            });
        }

        let Some(ratio) = potential_gain.checked_div(potential_loss) else {
            return Err(overflow(RiskRule::RiskReward, limit));
        };
        if ratio < limit {
            return Err(Rejection {
                rule: RiskRule::RiskReward,
                observed: ratio,
                limit,
                detail: format!("gain {} / loss {} below minimum ratio", potential_gain, potential_loss),
            });
        }
        Ok(())
    }

    fn check_margin_usage(&self, input: &mut RuleInput<'_>) -> Result<(), Rejection> {
        // Position-size already guaranteed a positive price, quantity and equity.
        let (Some(price), Some(quantity)) = (input.candidate.price_hint, input.candidate.quantity)
        else {
            return Ok(());
        };
        let leverage = Decimal::from(input.candidate.leverage.max(1));
        let equity = input.account.equity;

        let existing = input
            .open
            .values()
            .try_fold(Decimal::zero(), |acc, p| acc.checked_add(p.margin_used()));
        let Some(existing) = existing else {
            return Err(overflow(RiskRule::MarginUsage, Decimal::zero()));
        };
        let Some(limit) = self.config.max_margin_usage.checked_mul(equity) else {
            return Err(overflow(RiskRule::MarginUsage, Decimal::zero()));
        };
        let Some(total) = price
            .checked_mul(quantity)
            .and_then(|notional| notional.checked_div(leverage))
            .and_then(|margin| margin.checked_add(existing))
        else {
            return Err(overflow(RiskRule::MarginUsage, limit));
        };

        if total <= limit {
            return Ok(());
        }

        let rejection = |detail: &str| Rejection {
            rule: RiskRule::MarginUsage,
            observed: total,
            limit,
            detail: detail.to_string(),
        };

        match self.config.margin_policy {
            RulePolicy::Reject => Err(rejection("total margin above allowed fraction of equity")),
            RulePolicy::Clamp => {
                let available = limit.checked_sub(existing).unwrap_or_else(Decimal::zero);
                if !available.is_positive() {
                    return Err(rejection("no margin available"));
                }
                let band = self.config.size_band(&input.candidate.instrument);
                let clamped = available
                    .checked_mul(leverage)
                    .and_then(|notional| notional.checked_div(price))
                    .ok_or_else(|| overflow(RiskRule::MarginUsage, limit))?;
                let multiple = price
                    .checked_mul(clamped)
                    .and_then(|notional| notional.checked_div(equity))
                    .ok_or_else(|| overflow(RiskRule::MarginUsage, limit))?;
                if multiple < band.min {
                    return Err(rejection("remaining margin below minimum position size"));
                }
                input.adjustments.push(Adjustment {
                    rule: RiskRule::MarginUsage,
                    field: "quantity",
                    from: quantity,
                    to: clamped,
                });
                input.candidate.quantity = Some(clamped);
                Ok(())
            }
        }
    }

    fn check_liquidity(&self, input: &mut RuleInput<'_>) -> Result<(), Rejection> {
        let floor = self.config.min_open_interest_usd;
        if !floor.is_positive() {
            return Ok(());
        }
        match input.market.and_then(|m| m.open_interest_notional) {
            Some(oi) if oi >= floor => Ok(()),
            Some(oi) => Err(Rejection {
                rule: RiskRule::Liquidity,
                observed: oi,
                limit: floor,
                detail: "open interest below floor".to_string(),
            }),
            None => Err(Rejection {
                rule: RiskRule::Liquidity,
                observed: Decimal::zero(),
                limit: floor,
                detail: "open interest unavailable".to_string(),
            }),
        }
    }
}

fn overflow(rule: RiskRule, limit: Decimal) -> Rejection {
    Rejection {
        rule,
        observed: Decimal::zero(),
        limit,
        detail: "amounts out of range".to_string(),
    }
}

struct RuleInput<'a> {
    candidate: &'a mut RequestedAction,
    adjustments: &'a mut Vec<Adjustment>,
    account: &'a AccountState,
    open: &'a BTreeMap<OpenPositionKey, OpenPositionSnapshot>,
    market: Option<&'a MarketSnapshot>,
}

fn apply_to_working(
    working: &mut BTreeMap<OpenPositionKey, OpenPositionSnapshot>,
    action: &RequestedAction,
) {
    let key = action.key();
    if action.kind.is_close() {
        working.remove(&key);
        return;
    }
    if let (Some(price), Some(quantity)) = (action.price_hint, action.resolved_quantity()) {
        working.insert(
            key,
            OpenPositionSnapshot {
                entry_price: price,
                quantity,
                leverage: action.leverage.max(1),
                opened_at: TimeMs::now(),
            },
        );
    }
}
