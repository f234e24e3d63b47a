use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};
use tapeflow_core::{PriceLevelHeat, Tick, WindowSnapshot};

/// One entry of the rolling tape buffer.
#[derive(Debug, Clone)]
struct FlowEntry {
    price: Decimal,
    volume: Decimal,
    buy: bool,
}

/// Rolling order-flow state over a bounded tick horizon.
///
/// All aggregates are maintained incrementally: each `apply` adjusts the
/// running buy/sell sums, the per-price heat map, and the recent-quarter
/// sums, and evicts entries that left the horizon, so the per-tick cost is
/// O(1) amortized. High/low use monotonic deques for the same reason.
#[derive(Debug)]
pub struct OrderFlowWindow {
    instrument: String,
    horizon: usize,
    quarter: usize,

    ticks: VecDeque<FlowEntry>,
    buy_volume: Decimal,
    sell_volume: Decimal,

    /// Most recent quarter of the horizon, tracked separately so the
    /// exhaustion detector can compare recent flow to the whole window.
    recent: VecDeque<FlowEntry>,
    recent_buy: Decimal,
    recent_sell: Decimal,
    recent_first_price: Option<Decimal>,

    /// Traded volume per price level, evicted along with the ticks.
    heat: HashMap<Decimal, Decimal>,

    /// Monotonic deques over (insertion index, price) for O(1) high/low.
    max_prices: VecDeque<(u64, Decimal)>,
    min_prices: VecDeque<(u64, Decimal)>,
    next_index: u64,
    evicted: u64,

    prev_price: Option<Decimal>,
    last_price: Decimal,
    first_price: Decimal,
    ticks_since_flip: usize,
    buy_dominant: bool,
}

impl OrderFlowWindow {
    pub fn new(instrument: &str, horizon: usize) -> Self {
        assert!(horizon > 0, "window horizon must be > 0");
        Self {
            instrument: instrument.to_string(),
            horizon,
            quarter: (horizon / 4).max(1),
            ticks: VecDeque::with_capacity(horizon),
            buy_volume: Decimal::ZERO,
            sell_volume: Decimal::ZERO,
            recent: VecDeque::new(),
            recent_buy: Decimal::ZERO,
            recent_sell: Decimal::ZERO,
            recent_first_price: None,
            heat: HashMap::new(),
            max_prices: VecDeque::new(),
            min_prices: VecDeque::new(),
            next_index: 0,
            evicted: 0,
            prev_price: None,
            last_price: Decimal::ZERO,
            first_price: Decimal::ZERO,
            ticks_since_flip: 0,
            buy_dominant: true,
        }
    }

    /// Apply the next tick in sequence order.
    pub fn apply(&mut self, tick: &Tick) {
        debug_assert_eq!(tick.instrument, self.instrument);

        let buy = tick.is_buy_flow(self.prev_price);
        let entry = FlowEntry {
            price: tick.price,
            volume: tick.volume,
            buy,
        };

        if buy {
            self.buy_volume += tick.volume;
        } else {
            self.sell_volume += tick.volume;
        }
        *self.heat.entry(tick.price).or_insert(Decimal::ZERO) += tick.volume;

        // Monotonic high/low deques.
        while matches!(self.max_prices.back(), Some((_, p)) if *p <= tick.price) {
            self.max_prices.pop_back();
        }
        self.max_prices.push_back((self.next_index, tick.price));
        while matches!(self.min_prices.back(), Some((_, p)) if *p >= tick.price) {
            self.min_prices.pop_back();
        }
        self.min_prices.push_back((self.next_index, tick.price));
        self.next_index += 1;

        // Recent-quarter sub-window.
        if buy {
            self.recent_buy += tick.volume;
        } else {
            self.recent_sell += tick.volume;
        }
        self.recent.push_back(entry.clone());
        if self.recent.len() > self.quarter {
            if let Some(old) = self.recent.pop_front() {
                if old.buy {
                    self.recent_buy -= old.volume;
                } else {
                    self.recent_sell -= old.volume;
                }
            }
        }
        self.recent_first_price = self.recent.front().map(|e| e.price);

        self.ticks.push_back(entry);
        if self.ticks.len() > self.horizon {
            self.evict_oldest();
        }

        if self.ticks.len() == 1 {
            self.first_price = tick.price;
        } else if self.ticks.len() <= self.horizon {
            // first_price tracks the oldest retained entry after eviction.
            if let Some(front) = self.ticks.front() {
                self.first_price = front.price;
            }
        }

        self.prev_price = Some(tick.price);
        self.last_price = tick.price;

        // Imbalance flip tracking.
        let now_buy_dominant = self.buy_volume >= self.sell_volume;
        if self.ticks.len() > 1 && now_buy_dominant != self.buy_dominant {
            self.ticks_since_flip = 0;
        } else {
            self.ticks_since_flip += 1;
        }
        self.buy_dominant = now_buy_dominant;
    }

    fn evict_oldest(&mut self) {
        if let Some(old) = self.ticks.pop_front() {
            if old.buy {
                self.buy_volume -= old.volume;
            } else {
                self.sell_volume -= old.volume;
            }
            if let Some(vol) = self.heat.get_mut(&old.price) {
                *vol -= old.volume;
                if vol.is_zero() {
                    self.heat.remove(&old.price);
                }
            }
            if matches!(self.max_prices.front(), Some((i, _)) if *i == self.evicted) {
                self.max_prices.pop_front();
            }
            if matches!(self.min_prices.front(), Some((i, _)) if *i == self.evicted) {
                self.min_prices.pop_front();
            }
            self.evicted += 1;
        }
    }

    pub fn instrument(&self) -> &str {
        &self.instrument
    }

    pub fn len(&self) -> usize {
        self.ticks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ticks.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.ticks.len() == self.horizon
    }

    pub fn buy_volume(&self) -> Decimal {
        self.buy_volume
    }

    pub fn sell_volume(&self) -> Decimal {
        self.sell_volume
    }

    pub fn total_volume(&self) -> Decimal {
        self.buy_volume + self.sell_volume
    }

    /// Buy volume as a fraction of total volume, 0.5 when the window holds
    /// no volume.
    pub fn imbalance_ratio(&self) -> Decimal {
        let total = self.total_volume();
        if total.is_zero() {
            Decimal::new(5, 1)
        } else {
            self.buy_volume / total
        }
    }

    pub fn ticks_since_flip(&self) -> usize {
        self.ticks_since_flip
    }

    pub fn buy_dominant(&self) -> bool {
        self.buy_dominant
    }

    pub fn last_price(&self) -> Decimal {
        self.last_price
    }

    pub fn first_price(&self) -> Decimal {
        self.first_price
    }

    pub fn high(&self) -> Decimal {
        self.max_prices
            .front()
            .map(|(_, p)| *p)
            .unwrap_or(self.last_price)
    }

    pub fn low(&self) -> Decimal {
        self.min_prices
            .front()
            .map(|(_, p)| *p)
            .unwrap_or(self.last_price)
    }

    pub fn price_range(&self) -> Decimal {
        self.high() - self.low()
    }

    /// Net price change across the retained window.
    pub fn net_change(&self) -> Decimal {
        self.last_price - self.first_price
    }

    pub fn recent_len(&self) -> usize {
        self.recent.len()
    }

    /// Volume of the dominant side within the most recent quarter.
    pub fn recent_dominant_volume(&self) -> Decimal {
        if self.buy_dominant {
            self.recent_buy
        } else {
            self.recent_sell
        }
    }

    /// Volume of the dominant side across the whole window.
    pub fn dominant_volume(&self) -> Decimal {
        if self.buy_dominant {
            self.buy_volume
        } else {
            self.sell_volume
        }
    }

    /// Net price change across the recent quarter.
    pub fn recent_net_change(&self) -> Decimal {
        match self.recent_first_price {
            Some(first) => self.last_price - first,
            None => Decimal::ZERO,
        }
    }

    /// Build an immutable snapshot with the `levels` hottest price levels.
    pub fn snapshot(&self, levels: usize) -> WindowSnapshot {
        let mut heat: Vec<PriceLevelHeat> = self
            .heat
            .iter()
            .map(|(price, volume)| PriceLevelHeat {
                price: *price,
                volume: *volume,
            })
            .collect();
        // Deterministic ordering: volume descending, then price ascending.
        heat.sort_by(|a, b| b.volume.cmp(&a.volume).then(a.price.cmp(&b.price)));
        heat.truncate(levels);

        WindowSnapshot {
            instrument: self.instrument.clone(),
            buy_volume: self.buy_volume,
            sell_volume: self.sell_volume,
            imbalance_ratio: self.imbalance_ratio(),
            tick_count: self.ticks.len(),
            ticks_since_flip: self.ticks_since_flip,
            last_price: self.last_price,
            high: self.high(),
            low: self.low(),
            heat,
        }
    }
}
