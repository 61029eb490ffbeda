use crate::config::PRICE_CHANGE_THRESHOLD_PCT;
use crate::types::{Direction, EventKind, MarketSnapshot, NewsEvent};

/// Map a (previous, current) snapshot pair to the events it implies.
///
/// The three rules fire independently; a single pass can yield `New`,
/// `StatusChange` and `PriceChange` for the same market. Events are stamped
/// with `curr.updated_at` and carry copies of the current market fields.
pub fn classify(
    prev: Option<&MarketSnapshot>,
    curr: &MarketSnapshot,
    is_new_market: bool,
) -> Vec<NewsEvent> {
    let mut events = Vec::new();

    if is_new_market {
        events.push(event_for(
            curr,
            EventKind::New {
                initial_yes_price: curr.yes_price,
                initial_no_price: curr.no_price,
                tvl: curr.tvl,
            },
        ));
    }

    let prev_status = prev.map(|p| p.status_code);
    if curr.status_code.is_newsworthy() && prev_status != Some(curr.status_code) {
        events.push(event_for(
            curr,
            EventKind::StatusChange {
                previous_status: prev_status.unwrap_or_default(),
                new_status: curr.status_code,
                status_text: curr.status_code.text(),
            },
        ));
    }

    if let Some(prev) = prev {
        if let Some(percent_change) = price_move_pct(prev.yes_price, curr.yes_price) {
            if percent_change >= PRICE_CHANGE_THRESHOLD_PCT {
                let direction = if curr.yes_price > prev.yes_price {
                    Direction::Up
                } else {
                    Direction::Down
                };
                events.push(event_for(
                    curr,
                    EventKind::PriceChange {
                        previous_price: prev.yes_price,
                        new_price: curr.yes_price,
                        percent_change,
                        direction,
                    },
                ));
            }
        }
    }

    events
}

/// Absolute relative move in percent, rounded to 2 decimals. `None` unless
/// both prices are positive.
pub fn price_move_pct(old: f64, new: f64) -> Option<f64> {
    if old > 0.0 && new > 0.0 {
        Some(round2((new - old).abs() / old * 100.0))
    } else {
        None
    }
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

fn event_for(curr: &MarketSnapshot, kind: EventKind) -> NewsEvent {
    NewsEvent {
        market_id: curr.market_id,
        market_address: curr.market_address.clone(),
        market_question: curr.question.clone(),
        category: curr.category,
        additional_info: curr.additional_info.clone(),
        timestamp: curr.updated_at,
        kind,
    }
}
