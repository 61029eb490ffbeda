use serde::{Deserialize, Serialize};

/// Registry market identifier. Also the sort key inside both snapshot partitions.
pub type MarketId = u64;

// ---------------------------------------------------------------------------
// Market status
// ---------------------------------------------------------------------------

/// Registry status code. Only the codes the pipeline reacts to get their own
/// variant; everything else is carried as `Other` and treated as open-like.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum MarketStatus {
    #[default]
    Open,
    ResolutionProposed,
    Finalized,
    Other(u8),
}

impl MarketStatus {
    pub fn code(self) -> u8 {
        match self {
            MarketStatus::Open => 0,
            MarketStatus::ResolutionProposed => 2,
            MarketStatus::Finalized => 7,
            MarketStatus::Other(c) => c,
        }
    }

    /// Statuses that produce a `StatusChange` event when entered.
    pub fn is_newsworthy(self) -> bool {
        matches!(self, MarketStatus::ResolutionProposed | MarketStatus::Finalized)
    }

    pub fn text(self) -> String {
        match self {
            MarketStatus::Open => "Open".to_string(),
            MarketStatus::ResolutionProposed => "Resolution Proposed".to_string(),
            MarketStatus::Finalized => "Finalized".to_string(),
            MarketStatus::Other(c) => format!("Status {c}"),
        }
    }

    /// Parse the textual form some registry responses carry instead of a code.
    pub fn from_text(s: &str) -> Self {
        let normalized: String = s
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_lowercase();
        match normalized.as_str() {
            "open" => MarketStatus::Open,
            "resolutionproposed" | "proposed" => MarketStatus::ResolutionProposed,
            "finalized" | "finalised" | "resolved" => MarketStatus::Finalized,
            other => other
                .parse::<u8>()
                .map(MarketStatus::from)
                .unwrap_or(MarketStatus::Open),
        }
    }
}

impl From<u8> for MarketStatus {
    fn from(code: u8) -> Self {
        match code {
            0 => MarketStatus::Open,
            2 => MarketStatus::ResolutionProposed,
            7 => MarketStatus::Finalized,
            c => MarketStatus::Other(c),
        }
    }
}

impl From<MarketStatus> for u8 {
    fn from(status: MarketStatus) -> u8 {
        status.code()
    }
}

impl std::fmt::Display for MarketStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.text())
    }
}

// ---------------------------------------------------------------------------
// Category
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Category {
    Sports,
    Crypto,
    Politics,
    Economics,
    Weather,
    Entertainment,
    Technology,
    #[default]
    Other,
}

impl Category {
    pub fn parse(s: &str) -> Category {
        match s.trim().to_lowercase().as_str() {
            "sports" => Category::Sports,
            "crypto" | "cryptocurrency" => Category::Crypto,
            "politics" => Category::Politics,
            "economics" | "economy" | "finance" => Category::Economics,
            "weather" => Category::Weather,
            "entertainment" | "culture" => Category::Entertainment,
            "technology" | "tech" | "science" => Category::Technology,
            _ => Category::Other,
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Category::Sports => "Sports",
            Category::Crypto => "Crypto",
            Category::Politics => "Politics",
            Category::Economics => "Economics",
            Category::Weather => "Weather",
            Category::Entertainment => "Entertainment",
            Category::Technology => "Technology",
            Category::Other => "Other",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// Snapshots
// ---------------------------------------------------------------------------

/// Last observed state of one market, stored as JSON in exactly one partition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketSnapshot {
    pub market_id: MarketId,
    pub market_address: String,
    pub question: String,
    pub status_code: MarketStatus,
    pub yes_price: f64,
    pub no_price: f64,
    pub tvl: f64,
    pub category: Category,
    #[serde(default)]
    pub additional_info: Option<String>,
    /// Unix milliseconds of the differ pass that wrote this snapshot.
    pub updated_at: i64,
}

/// Result of a successful Market Detail Fetch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketDetail {
    pub market_address: String,
    pub question: String,
    #[serde(default)]
    pub status_code: Option<u8>,
    #[serde(default)]
    pub status_text: Option<String>,
    pub prices: OutcomePrices,
    #[serde(default)]
    pub tvl: f64,
    #[serde(default)]
    pub tokens: Vec<String>,
    #[serde(default)]
    pub additional_info: Option<String>,
}

impl MarketDetail {
    /// A numeric code wins over the textual form when both are present.
    pub fn status(&self) -> MarketStatus {
        match (self.status_code, self.status_text.as_deref()) {
            (Some(code), _) => MarketStatus::from(code),
            (None, Some(text)) => MarketStatus::from_text(text),
            (None, None) => MarketStatus::Open,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct OutcomePrices {
    pub yes: f64,
    pub no: f64,
}

// ---------------------------------------------------------------------------
// News events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    New,
    StatusChange,
    PriceChange,
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EventType::New => "New",
            EventType::StatusChange => "StatusChange",
            EventType::PriceChange => "PriceChange",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Up => write!(f, "up"),
            Direction::Down => write!(f, "down"),
        }
    }
}

/// Kind-specific payload. Serialized with an `eventType` tag next to the
/// shared market fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "eventType", rename_all_fields = "camelCase")]
pub enum EventKind {
    New {
        initial_yes_price: f64,
        initial_no_price: f64,
        tvl: f64,
    },
    StatusChange {
        previous_status: MarketStatus,
        new_status: MarketStatus,
        status_text: String,
    },
    PriceChange {
        previous_price: f64,
        new_price: f64,
        percent_change: f64,
        direction: Direction,
    },
}

/// Immutable record of one detected transition. Market fields are copied at
/// emission time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewsEvent {
    pub market_id: MarketId,
    pub market_address: String,
    pub market_question: String,
    pub category: Category,
    #[serde(default)]
    pub additional_info: Option<String>,
    /// Unix milliseconds.
    pub timestamp: i64,
    #[serde(flatten)]
    pub kind: EventKind,
}

impl NewsEvent {
    pub fn event_type(&self) -> EventType {
        match self.kind {
            EventKind::New { .. } => EventType::New,
            EventKind::StatusChange { .. } => EventType::StatusChange,
            EventKind::PriceChange { .. } => EventType::PriceChange,
        }
    }

    /// One-line plain description used for queries and unranked fallbacks.
    pub fn summary(&self) -> String {
        match &self.kind {
            EventKind::New { initial_yes_price, tvl, .. } => format!(
                "New market: \"{}\" opens with YES at {:.0}% and ${:.0} TVL",
                self.market_question,
                initial_yes_price * 100.0,
                tvl,
            ),
            EventKind::StatusChange { status_text, .. } => format!(
                "\"{}\" is now {}",
                self.market_question, status_text,
            ),
            EventKind::PriceChange { previous_price, new_price, percent_change, direction } => {
                format!(
                    "\"{}\" YES moved {} {:.2}% ({:.2} -> {:.2})",
                    self.market_question, direction, percent_change, previous_price, new_price,
                )
            }
        }
    }
}

/// An event plus the optional context text attached by the enricher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichedEvent {
    #[serde(flatten)]
    pub event: NewsEvent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

/// A story candidate as written to the event queue.
/// `interest_score` is 1..=10 when scored, 0 when the ranker fell back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedEvent {
    #[serde(flatten)]
    pub event: NewsEvent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    pub interest_score: u8,
    pub headline: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_prompt: Option<String>,
}

impl RankedEvent {
    /// Unscored pass-through used when ranking is unavailable.
    pub fn unscored(enriched: EnrichedEvent) -> Self {
        let headline = enriched.event.market_question.clone();
        let description = enriched.event.summary();
        Self {
            event: enriched.event,
            context: enriched.context,
            interest_score: 0,
            headline,
            description,
            image_prompt: None,
        }
    }

    pub fn posted_key(&self) -> PostedRecord {
        PostedRecord {
            market_id: self.event.market_id,
            timestamp: self.event.timestamp,
            event_type: self.event.event_type(),
        }
    }
}

/// Identity of a published story. Written only by the downstream publisher.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostedRecord {
    pub market_id: MarketId,
    pub timestamp: i64,
    pub event_type: EventType,
}

pub fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_round_trip_through_u8() {
        assert_eq!(MarketStatus::from(0), MarketStatus::Open);
        assert_eq!(MarketStatus::from(2), MarketStatus::ResolutionProposed);
        assert_eq!(MarketStatus::from(7), MarketStatus::Finalized);
        assert_eq!(MarketStatus::from(4), MarketStatus::Other(4));
        assert_eq!(u8::from(MarketStatus::Other(4)), 4);
        assert!(!MarketStatus::Other(4).is_newsworthy());
    }

    #[test]
    fn detail_prefers_numeric_status() {
        let mut detail = MarketDetail {
            status_code: Some(7),
            status_text: Some("Open".to_string()),
            ..Default::default()
        };
        assert_eq!(detail.status(), MarketStatus::Finalized);

        detail.status_code = None;
        detail.status_text = Some("Resolution Proposed".to_string());
        assert_eq!(detail.status(), MarketStatus::ResolutionProposed);
    }

    #[test]
    fn event_serializes_with_flat_tag() {
        let event = NewsEvent {
            market_id: 42,
            market_address: "0xabc".to_string(),
            market_question: "Will it rain?".to_string(),
            category: Category::Weather,
            additional_info: None,
            timestamp: 1_700_000_000_000,
            kind: EventKind::StatusChange {
                previous_status: MarketStatus::Open,
                new_status: MarketStatus::Finalized,
                status_text: "Finalized".to_string(),
            },
        };
        let v = serde_json::to_value(&event).unwrap();
        assert_eq!(v["eventType"], "StatusChange");
        assert_eq!(v["marketId"], 42);
        assert_eq!(v["newStatus"], 7);
        assert_eq!(v["statusText"], "Finalized");

        let back: NewsEvent = serde_json::from_value(v).unwrap();
        assert_eq!(back, event);
    }
}
