use std::collections::HashSet;

use crate::types::{EventType, NewsEvent};

/// Collapse conflicting events per market and order the batch for enrichment.
///
/// Per `market_address`: a `StatusChange` suppresses any `PriceChange` in the
/// same batch, and repeated events of the same kind keep only the first.
/// The result is stable-sorted so every non-`New` event precedes every `New`.
pub fn dedupe(events: Vec<NewsEvent>) -> Vec<NewsEvent> {
    let with_status: HashSet<String> = events
        .iter()
        .filter(|e| e.event_type() == EventType::StatusChange)
        .map(|e| e.market_address.clone())
        .collect();

    let mut seen: HashSet<(String, EventType)> = HashSet::new();
    let mut kept: Vec<NewsEvent> = events
        .into_iter()
        .filter(|e| {
            let kind = e.event_type();
            if kind == EventType::PriceChange && with_status.contains(&e.market_address) {
                return false;
            }
            seen.insert((e.market_address.clone(), kind))
        })
        .collect();

    kept.sort_by_key(|e| e.event_type() == EventType::New);
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Category, Direction, EventKind, MarketStatus};

    fn ev(addr: &str, kind: EventKind) -> NewsEvent {
        NewsEvent {
            market_id: addr.len() as u64,
            market_address: addr.to_string(),
            market_question: format!("{addr}?"),
            category: Category::Other,
            additional_info: None,
            timestamp: 5,
            kind,
        }
    }

    fn new_kind() -> EventKind {
        EventKind::New { initial_yes_price: 0.5, initial_no_price: 0.5, tvl: 1.0 }
    }

    fn status_kind() -> EventKind {
        EventKind::StatusChange {
            previous_status: MarketStatus::Open,
            new_status: MarketStatus::ResolutionProposed,
            status_text: "Resolution Proposed".to_string(),
        }
    }

    fn price_kind(pct: f64) -> EventKind {
        EventKind::PriceChange {
            previous_price: 0.4,
            new_price: 0.6,
            percent_change: pct,
            direction: Direction::Up,
        }
    }

    #[test]
    fn status_suppresses_price_for_same_market() {
        let out = dedupe(vec![
            ev("0xa", price_kind(50.0)),
            ev("0xa", status_kind()),
            ev("0xb", price_kind(30.0)),
        ]);
        assert!(!out
            .iter()
            .any(|e| e.market_address == "0xa" && e.event_type() == EventType::PriceChange));
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].event_type(), EventType::StatusChange);
        assert_eq!(out[1].market_address, "0xb");
    }

    #[test]
    fn new_events_sink_to_the_end_stably() {
        let out = dedupe(vec![
            ev("0x1", new_kind()),
            ev("0x2", price_kind(25.0)),
            ev("0x3", new_kind()),
            ev("0x4", status_kind()),
        ]);
        let addrs: Vec<_> = out.iter().map(|e| e.market_address.as_str()).collect();
        assert_eq!(addrs, vec!["0x2", "0x4", "0x1", "0x3"]);
    }

    #[test]
    fn new_and_status_for_one_market_both_survive() {
        let out = dedupe(vec![ev("0xa", new_kind()), ev("0xa", status_kind()), ev("0xa", price_kind(40.0))]);
        let kinds: Vec<_> = out.iter().map(|e| e.event_type()).collect();
        assert_eq!(kinds, vec![EventType::StatusChange, EventType::New]);
    }

    #[test]
    fn repeated_kind_keeps_first() {
        let out = dedupe(vec![ev("0xa", price_kind(30.0)), ev("0xa", price_kind(90.0))]);
        assert_eq!(out.len(), 1);
        match &out[0].kind {
            EventKind::PriceChange { percent_change, .. } => assert_eq!(*percent_change, 30.0),
            _ => unreachable!(),
        }
    }
}
