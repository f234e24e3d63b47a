use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use tapeflow_core::{AccountSnapshot, Intent, IntentAction, RiskConfig};
use tracing::{info, warn};

/// Outcome of the risk gate for a single intent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RiskDecision {
    Approved,
    Rejected(String),
}

/// Gatekeeper every intent passes through before reaching a gateway.
///
/// Entries are sized and bounded here; exits and flattens always pass
/// (they only reduce exposure), even while trading is halted.
pub struct RiskGate {
    config: RiskConfig,
    halted: bool,
    daily_pnl: Decimal,
    /// Trading day the halt latch belongs to; a new day lifts it.
    day: NaiveDate,
}

impl RiskGate {
    pub fn new(config: RiskConfig) -> Self {
        Self {
            config,
            halted: false,
            daily_pnl: Decimal::ZERO,
            day: Utc::now().date_naive(),
        }
    }

    pub fn should_halt(&self) -> bool {
        self.halted
    }

    /// Refresh the loss counters from the latest snapshot and halt when
    /// the daily loss limit is breached. The halt holds for the rest of
    /// the snapshot's trading day only.
    pub fn update_account(&mut self, snapshot: &AccountSnapshot) {
        let day = snapshot.timestamp.date_naive();
        if day != self.day {
            if self.halted {
                info!(%day, "new trading day, risk halt lifted");
            }
            self.day = day;
            self.halted = false;
        }
        self.daily_pnl = snapshot.daily_pnl;
        let daily_loss = -self.daily_pnl;
        if !self.halted && daily_loss >= self.config.max_daily_loss {
            warn!(
                %daily_loss,
                limit = %self.config.max_daily_loss,
                "daily loss limit breached, trading halted"
            );
            self.halted = true;
        }
    }

    /// Entry size for the current account state: `risk_per_trade` of
    /// equity converted to units at the given price, clamped so projected
    /// exposure stays within `max_position_size`.
    pub fn entry_size(
        &self,
        equity: Decimal,
        price: Decimal,
        current_exposure: Decimal,
    ) -> Decimal {
        if price <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        let desired = (self.config.risk_per_trade * equity / price).round_dp(2);
        let headroom = self.config.max_position_size - current_exposure;
        desired.min(headroom).max(Decimal::ZERO)
    }

    pub fn evaluate(&self, intent: &Intent, snapshot: &AccountSnapshot) -> RiskDecision {
        // Exposure only ever shrinks on an exit, no checks apply.
        if matches!(intent.action, IntentAction::Exit | IntentAction::Flatten) {
            return RiskDecision::Approved;
        }

        if self.halted {
            return RiskDecision::Rejected(
                "trading halted: daily loss limit breached".to_string(),
            );
        }

        if intent.size <= Decimal::ZERO {
            return RiskDecision::Rejected("intent size must be positive".to_string());
        }

        let projected = snapshot.exposure(&intent.instrument) + intent.size;
        if projected > self.config.max_position_size {
            return RiskDecision::Rejected(format!(
                "projected exposure {} exceeds max position size {}",
                projected, self.config.max_position_size
            ));
        }

        RiskDecision::Approved
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use tapeflow_core::{Position, Side};
    use uuid::Uuid;

    fn entry(instrument: &str, size: Decimal) -> Intent {
        Intent {
            id: Uuid::new_v4(),
            instrument: instrument.to_string(),
            action: IntentAction::Enter(Side::Buy),
            size,
            limit_price: None,
            signal_seq: Some(1),
            timestamp: Utc::now(),
        }
    }

    fn gate() -> RiskGate {
        RiskGate::new(RiskConfig {
            max_position_size: dec!(5),
            max_daily_loss: dec!(1000),
            risk_per_trade: dec!(0.01),
        })
    }

    #[test]
    fn test_exposure_cap_enforced() {
        let gate = gate();
        let mut snapshot = AccountSnapshot::initial(dec!(10000));
        snapshot.positions.push(Position {
            instrument: "EURUSD".to_string(),
            side: Side::Buy,
            size: dec!(4),
            avg_entry_price: dec!(1.1),
            unrealized_pnl: Decimal::ZERO,
            opened_at: Utc::now(),
        });

        assert_eq!(
            gate.evaluate(&entry("EURUSD", dec!(1)), &snapshot),
            RiskDecision::Approved
        );
        assert!(matches!(
            gate.evaluate(&entry("EURUSD", dec!(2)), &snapshot),
            RiskDecision::Rejected(_)
        ));
        // Other instruments count their own exposure.
        assert_eq!(
            gate.evaluate(&entry("GBPUSD", dec!(5)), &snapshot),
            RiskDecision::Approved
        );
    }

    #[test]
    fn test_daily_loss_halts_entries_but_not_exits() {
        let mut gate = gate();
        let mut snapshot = AccountSnapshot::initial(dec!(10000));
        snapshot.daily_pnl = dec!(-1200);
        gate.update_account(&snapshot);
        assert!(gate.should_halt());

        assert!(matches!(
            gate.evaluate(&entry("EURUSD", dec!(1)), &snapshot),
            RiskDecision::Rejected(_)
        ));

        let exit = Intent {
            action: IntentAction::Exit,
            ..entry("EURUSD", dec!(1))
        };
        assert_eq!(gate.evaluate(&exit, &snapshot), RiskDecision::Approved);
    }

    #[test]
    fn test_new_day_lifts_halt() {
        let mut gate = gate();
        let mut snapshot = AccountSnapshot::initial(dec!(10000));
        snapshot.daily_pnl = dec!(-1200);
        gate.update_account(&snapshot);
        assert!(gate.should_halt());

        // The aggregator zeroes the daily counter at rollover; the gate
        // follows the snapshot's day and drops the latch.
        let mut next_day = AccountSnapshot::initial(dec!(8800));
        next_day.timestamp = snapshot.timestamp + chrono::Duration::days(1);
        gate.update_account(&next_day);
        assert!(!gate.should_halt());
        assert_eq!(
            gate.evaluate(&entry("EURUSD", dec!(1)), &next_day),
            RiskDecision::Approved
        );
    }

    #[test]
    fn test_entry_size_clamped_to_headroom() {
        let gate = gate();
        // 1% of 10000 at price 1.0 would be 100 units; headroom caps it.
        assert_eq!(gate.entry_size(dec!(10000), dec!(1.0), dec!(3)), dec!(2));
        assert_eq!(gate.entry_size(dec!(10000), dec!(1.0), dec!(5)), dec!(0));
        // Small accounts size below the cap.
        assert_eq!(gate.entry_size(dec!(200), dec!(1.0), dec!(0)), dec!(2));
        assert_eq!(gate.entry_size(dec!(100), dec!(0), dec!(0)), dec!(0));
    }
}
