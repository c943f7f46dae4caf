use crate::error::LedgerError;
use crate::ledger::{ClosedTrade, TradeLedger, TradeRecord};
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use log::debug;
use rust_decimal::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Performance statistics derived from the trade ledger and per-cycle equity samples.
///
/// Ratios are fractions (0.05 is 5%). Money fields are quote-currency decimals. Drawdowns,
/// Sharpe and APY follow equity, which includes open positions marked to market.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSnapshot {
    /// Balance the session started from
    pub initial_balance: Decimal,
    /// Initial balance plus cumulative net P&L
    pub current_balance: Decimal,
    /// Current balance plus the mark-to-market P&L of open positions
    pub equity: Decimal,
    /// Mark-to-market P&L of open positions at the latest mark
    pub unrealized_pnl: Decimal,
    /// Highest balance or equity seen so far, initial balance included
    pub peak_balance: Decimal,
    /// Gross realized P&L over all trades
    pub total_realized_pnl: Decimal,
    /// Realized P&L after fees
    pub total_net_pnl: Decimal,
    pub total_fees: Decimal,
    /// (current - initial) / initial
    pub total_return: f64,
    pub trade_count: usize,
    pub win_count: usize,
    pub loss_count: usize,
    /// Wins / trades, 0 without trades
    pub win_rate: f64,
    /// Mean net P&L of winning trades
    pub average_win: Decimal,
    /// Mean net P&L of losing trades, as a non-negative magnitude
    pub average_loss: Decimal,
    /// Gross wins / gross losses; `None` while nothing has lost
    pub profit_factor: Option<f64>,
    /// Largest peak-to-trough decline, in [0, 1]
    pub max_drawdown: f64,
    /// Decline from the running peak to current equity, in [0, 1]
    pub current_drawdown: f64,
    /// Annualized Sharpe of per-cycle returns, 0 with fewer than two returns
    pub sharpe_ratio: f64,
    /// System quality number over per-trade net P&L
    pub sqn: f64,
    /// Annualized yield; `None` before the first period or when it overflows
    pub apy: Option<f64>,
    /// Closed cycles contributing return samples
    pub elapsed_periods: u64,
    /// Net P&L of trades exiting on the UTC day of `as_of`
    pub daily_realized_pnl: Decimal,
    /// Time of the latest event folded into the snapshot
    pub as_of: Option<DateTime<Utc>>,
}

impl PerformanceSnapshot {
    /// Multi-line report with ratios rendered as percentages
    pub fn report(&self) -> String {
        let pct = |v: f64| format!("{:.2}%", v * 100.0);
        let profit_factor = self
            .profit_factor
            .map(|v| format!("{:.2}", v))
            .unwrap_or_else(|| "n/a".to_string());
        let apy = self.apy.map(pct).unwrap_or_else(|| "n/a".to_string());
        let mut out = String::new();
        out.push_str(&format!(
            "Balance:        {} -> {} ({})\n",
            self.initial_balance.round_dp(2),
            self.current_balance.round_dp(2),
            pct(self.total_return)
        ));
        out.push_str(&format!(
            "Equity:         {} ({} unrealized, peak {})\n",
            self.equity.round_dp(2),
            self.unrealized_pnl.round_dp(2),
            self.peak_balance.round_dp(2)
        ));
        out.push_str(&format!(
            "Realized P&L:   {} gross, {} net, {} fees\n",
            self.total_realized_pnl.round_dp(2),
            self.total_net_pnl.round_dp(2),
            self.total_fees.round_dp(2)
        ));
        out.push_str(&format!(
            "Trades:         {} ({} wins / {} losses, win rate {})\n",
            self.trade_count,
            self.win_count,
            self.loss_count,
            pct(self.win_rate)
        ));
        out.push_str(&format!(
            "Avg win/loss:   {} / {}\n",
            self.average_win.round_dp(2),
            self.average_loss.round_dp(2)
        ));
        out.push_str(&format!(
            "Profit factor:  {}\n",
            profit_factor
        ));
        out.push_str(&format!(
            "Drawdown:       {} max, {} current\n",
            pct(self.max_drawdown),
            pct(self.current_drawdown)
        ));
        out.push_str(&format!(
            "Sharpe / SQN:   {:.2} / {:.2}\n",
            self.sharpe_ratio, self.sqn
        ));
        out.push_str(&format!(
            "APY:            {} over {} periods\n",
            apy,
            self.elapsed_periods
        ));
        out.push_str(&format!(
            "Today:          {}",
            self.daily_realized_pnl.round_dp(2)
        ));
        out
    }
}

impl fmt::Display for PerformanceSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.report())
    }
}

/// Compact view embedded in status reports
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSummary {
    pub current_balance: Decimal,
    pub equity: Decimal,
    pub total_return: f64,
    pub trade_count: usize,
    pub win_rate: f64,
    pub sharpe_ratio: f64,
    pub max_drawdown: f64,
    pub current_drawdown: f64,
    pub elapsed_periods: u64,
}

impl From<&PerformanceSnapshot> for PerformanceSummary {
    fn from(s: &PerformanceSnapshot) -> Self {
        Self {
            current_balance: s.current_balance,
            equity: s.equity,
            total_return: s.total_return,
            trade_count: s.trade_count,
            win_rate: s.win_rate,
            sharpe_ratio: s.sharpe_ratio,
            max_drawdown: s.max_drawdown,
            current_drawdown: s.current_drawdown,
            elapsed_periods: s.elapsed_periods,
        }
    }
}

/// Performance tracker owning the trade ledger.
///
/// `record` appends to the ledger and drops the cached snapshot; `snapshot` recomputes on
/// demand and serves the cache until the next mutation. `mark_to_market` carries the value of
/// open positions so drawdown sees losses before they are realized.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceTracker {
    initial_balance: Decimal,
    periods_per_year: f64,
    ledger: TradeLedger,
    /// Equity at the end of each closed period
    period_balances: Vec<Decimal>,
    /// Latest mark-to-market P&L of open positions
    #[serde(default)]
    unrealized_pnl: Decimal,
    as_of: Option<DateTime<Utc>>,
    #[serde(skip)]
    cached: Option<PerformanceSnapshot>,
}

impl PerformanceTracker {
    pub fn new(initial_balance: Decimal, periods_per_year: f64) -> Self {
        Self {
            initial_balance,
            periods_per_year,
            ledger: TradeLedger::new(),
            period_balances: Vec::new(),
            unrealized_pnl: Decimal::ZERO,
            as_of: None,
            cached: None,
        }
    }

    /// Tracker over an existing ledger, e.g. one restored from disk
    pub fn with_ledger(initial_balance: Decimal, periods_per_year: f64, ledger: TradeLedger) -> Self {
        let as_of = ledger.trades().last().map(|t| t.exit_time);
        Self {
            ledger,
            as_of,
            ..Self::new(initial_balance, periods_per_year)
        }
    }

    pub fn initial_balance(&self) -> Decimal {
        self.initial_balance
    }

    pub fn periods_per_year(&self) -> f64 {
        self.periods_per_year
    }

    pub fn set_periods_per_year(&mut self, periods_per_year: f64) {
        self.periods_per_year = periods_per_year;
        self.cached = None;
    }

    pub fn ledger(&self) -> &TradeLedger {
        &self.ledger
    }

    /// Re-check every ledger invariant, e.g. after deserializing
    pub fn revalidate(&self) -> Result<(), LedgerError> {
        TradeLedger::from_trades(self.ledger.trades().to_vec()).map(|_| ())
    }

    pub fn elapsed_periods(&self) -> u64 {
        self.period_balances.len() as u64
    }

    /// Whether nothing has been recorded yet
    pub fn is_pristine(&self) -> bool {
        self.ledger.is_empty() && self.period_balances.is_empty()
    }

    /// Initial balance plus realized net P&L
    pub fn current_balance(&self) -> Decimal {
        self.initial_balance + self.ledger.trades().iter().map(|t| t.net_pnl).sum::<Decimal>()
    }

    pub fn unrealized_pnl(&self) -> Decimal {
        self.unrealized_pnl
    }

    /// Realized balance plus open positions at their latest mark
    pub fn equity(&self) -> Decimal {
        self.current_balance() + self.unrealized_pnl
    }

    /// Replace the mark-to-market P&L of open positions
    pub fn mark_to_market(&mut self, unrealized_pnl: Decimal) {
        if self.unrealized_pnl != unrealized_pnl {
            self.unrealized_pnl = unrealized_pnl;
            self.cached = None;
        }
    }

    /// Append a completed trade
    pub fn record(&mut self, trade: TradeRecord) -> Result<(), LedgerError> {
        let exit_time = trade.exit_time;
        self.ledger.append(trade)?;
        self.advance(exit_time);
        self.cached = None;
        Ok(())
    }

    /// Assign the next ledger id to a closed round trip and record it
    pub fn record_closed(&mut self, closed: ClosedTrade) -> Result<TradeRecord, LedgerError> {
        let record = self.ledger.record_closed(closed)?;
        self.advance(record.exit_time);
        self.cached = None;
        debug!(
            "Recorded trade #{} {} net pnl {}",
            record.id, record.symbol, record.net_pnl
        );
        Ok(record)
    }

    /// Close the current cycle, sampling equity for the return series
    pub fn close_period(&mut self, at: DateTime<Utc>) {
        self.period_balances.push(self.equity());
        self.advance(at);
        self.cached = None;
    }

    /// Move the snapshot clock forward without recording anything
    pub fn mark_time(&mut self, at: DateTime<Utc>) {
        if self.as_of.map_or(true, |t| at > t) {
            self.as_of = Some(at);
            self.cached = None;
        }
    }

    fn advance(&mut self, at: DateTime<Utc>) {
        if self.as_of.map_or(true, |t| at > t) {
            self.as_of = Some(at);
        }
    }

    /// Net P&L of trades exiting on the given UTC day
    pub fn daily_realized_pnl(&self, day: NaiveDate) -> Decimal {
        let Some(midnight) = day.and_hms_opt(0, 0, 0) else {
            return Decimal::ZERO;
        };
        let start = Utc.from_utc_datetime(&midnight);
        self.ledger.net_pnl_between(start, start + Duration::days(1))
    }

    /// Cached snapshot, recomputed after any mutation
    pub fn snapshot(&mut self) -> PerformanceSnapshot {
        if let Some(cached) = &self.cached {
            return cached.clone();
        }
        let snapshot = self.compute_snapshot();
        self.cached = Some(snapshot.clone());
        snapshot
    }

    /// Recompute every statistic from the ledger and period samples
    pub fn compute_snapshot(&self) -> PerformanceSnapshot {
        let trades = self.ledger.trades();
        let initial = self.initial_balance;

        let mut total_realized = Decimal::ZERO;
        let mut total_fees = Decimal::ZERO;
        let mut gross_wins = Decimal::ZERO;
        let mut gross_losses = Decimal::ZERO;
        let mut win_count = 0usize;
        let mut loss_count = 0usize;

        let mut balance = initial;
        let mut peak = initial;
        let mut max_drawdown = 0.0f64;

        for trade in trades {
            total_realized += trade.realized_pnl;
            total_fees += trade.fees;
            if trade.is_win() {
                win_count += 1;
                gross_wins += trade.net_pnl;
            } else if trade.is_loss() {
                loss_count += 1;
                gross_losses += trade.net_pnl.abs();
            }

            balance += trade.net_pnl;
            if balance > peak {
                peak = balance;
            }
            max_drawdown = max_drawdown.max(drawdown(peak, balance));
        }

        // equity samples catch losses that are still open
        let mut sample_peak = initial;
        for &sample in &self.period_balances {
            if sample > sample_peak {
                sample_peak = sample;
            }
            max_drawdown = max_drawdown.max(drawdown(sample_peak, sample));
        }
        let equity = balance + self.unrealized_pnl;
        let peak = peak.max(sample_peak).max(equity);
        let current_drawdown = drawdown(peak, equity);
        let max_drawdown = max_drawdown.max(current_drawdown);

        let trade_count = trades.len();
        let total_net = balance - initial;

        let win_rate = if trade_count > 0 {
            win_count as f64 / trade_count as f64
        } else {
            0.0
        };
        let average_win = if win_count > 0 {
            gross_wins / Decimal::from(win_count)
        } else {
            Decimal::ZERO
        };
        let average_loss = if loss_count > 0 {
            gross_losses / Decimal::from(loss_count)
        } else {
            Decimal::ZERO
        };
        let profit_factor = if gross_losses.is_zero() {
            None
        } else {
            (gross_wins / gross_losses).to_f64()
        };

        let total_return = if initial > Decimal::ZERO {
            (total_net / initial).to_f64().unwrap_or(0.0)
        } else {
            0.0
        };

        let net_pnls: Vec<f64> = trades
            .iter()
            .map(|t| t.net_pnl.to_f64().unwrap_or(0.0))
            .collect();

        let daily_realized_pnl = self
            .as_of
            .map(|t| self.daily_realized_pnl(t.date_naive()))
            .unwrap_or(Decimal::ZERO);

        PerformanceSnapshot {
            initial_balance: initial,
            current_balance: balance,
            equity,
            unrealized_pnl: self.unrealized_pnl,
            peak_balance: peak,
            total_realized_pnl: total_realized,
            total_net_pnl: total_net,
            total_fees,
            total_return,
            trade_count,
            win_count,
            loss_count,
            win_rate,
            average_win,
            average_loss,
            profit_factor,
            max_drawdown,
            current_drawdown,
            sharpe_ratio: sharpe_ratio(&self.period_returns(), self.periods_per_year),
            sqn: system_quality_number(&net_pnls),
            apy: annualized_yield(initial, equity, self.periods_per_year, self.elapsed_periods()),
            elapsed_periods: self.elapsed_periods(),
            daily_realized_pnl,
            as_of: self.as_of,
        }
    }

    /// Simple returns between consecutive equity samples, starting from the initial balance
    pub fn period_returns(&self) -> Vec<f64> {
        let mut prev = self.initial_balance;
        let mut returns = Vec::with_capacity(self.period_balances.len());
        for &balance in &self.period_balances {
            let r = if prev > Decimal::ZERO {
                ((balance - prev) / prev).to_f64().unwrap_or(0.0)
            } else {
                0.0
            };
            returns.push(r);
            prev = balance;
        }
        returns
    }
}

fn drawdown(peak: Decimal, balance: Decimal) -> f64 {
    if peak <= Decimal::ZERO {
        return if balance < peak { 1.0 } else { 0.0 };
    }
    ((peak - balance) / peak)
        .to_f64()
        .unwrap_or(0.0)
        .clamp(0.0, 1.0)
}

/// Population mean and standard deviation
fn mean_std(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, variance.sqrt())
}

/// mean / population stddev × √periods_per_year; 0 with fewer than two returns or no variance
pub fn sharpe_ratio(returns: &[f64], periods_per_year: f64) -> f64 {
    if returns.len() < 2 {
        return 0.0;
    }
    let (mean, std) = mean_std(returns);
    if std <= 0.0 || !std.is_finite() {
        return 0.0;
    }
    let sharpe = mean / std * periods_per_year.max(0.0).sqrt();
    if sharpe.is_finite() {
        sharpe
    } else {
        0.0
    }
}

/// √n × mean / population stddev over per-trade net P&L
pub fn system_quality_number(net_pnls: &[f64]) -> f64 {
    if net_pnls.len() < 2 {
        return 0.0;
    }
    let (mean, std) = mean_std(net_pnls);
    if std <= 0.0 || !std.is_finite() {
        return 0.0;
    }
    (net_pnls.len() as f64).sqrt() * mean / std
}

/// (current / initial)^(periods_per_year / elapsed) − 1
pub fn annualized_yield(
    initial: Decimal,
    current: Decimal,
    periods_per_year: f64,
    elapsed_periods: u64,
) -> Option<f64> {
    if elapsed_periods == 0 || initial <= Decimal::ZERO {
        return None;
    }
    let ratio = (current / initial).to_f64()?;
    if ratio <= 0.0 {
        return Some(-1.0);
    }
    let apy = ratio.powf(periods_per_year / elapsed_periods as f64) - 1.0;
    if apy.is_finite() {
        Some(apy)
    } else {
        None
    }
}
