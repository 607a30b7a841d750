//! Self-checkout event records: `timestamp|frame_index|scan_frame_index|action`
//! texts mapped onto the backend's `/events/{sco_id}/...` endpoints.

use serde_json::{Value, json};
use uuid::Uuid;

use crate::error::DispatchError;

const TRANSACTION_TYPE: &str = "pending";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoAction {
    WeightingScaleNotMatched = 0,
    State = 1,
    ItemRemoved = 2,
    ItemAdded = 3,
    TransactionCompleted = 4,
    TransactionStarted = 5,
    ScanStarted = 6,
    ScanCompleted = 7,
}

impl ScoAction {
    pub fn from_id(id: u8) -> Option<Self> {
        Some(match id {
            0 => Self::WeightingScaleNotMatched,
            1 => Self::State,
            2 => Self::ItemRemoved,
            3 => Self::ItemAdded,
            4 => Self::TransactionCompleted,
            5 => Self::TransactionStarted,
            6 => Self::ScanStarted,
            7 => Self::ScanCompleted,
            _ => return None,
        })
    }

    pub fn endpoint(&self) -> &'static str {
        match self {
            Self::WeightingScaleNotMatched => "weighting-scale-not-matched",
            Self::State => "states",
            Self::ItemRemoved => "item-removed",
            Self::ItemAdded => "item-added",
            Self::TransactionCompleted => "transaction-completed",
            Self::TransactionStarted => "transaction-started",
            Self::ScanStarted => "scan-started",
            Self::ScanCompleted => "scan-completed",
        }
    }
}

/// `None` when the text is not a four-field record at all (such codes are
/// ignored); an error when it is one but the action is not known.
pub fn parse_record(text: &str) -> Option<Result<ScoAction, DispatchError>> {
    let fields: Vec<&str> = text.split('|').collect();
    if fields.len() != 4 {
        return None;
    }
    let raw = fields[3].trim();
    Some(
        raw.parse::<u8>()
            .ok()
            .and_then(ScoAction::from_id)
            .ok_or_else(|| DispatchError::UnknownEvent(raw.to_string())),
    )
}

/// Tracks the open transaction across events.
#[derive(Debug)]
pub struct EventBuilder {
    sco_id: String,
    transaction_id: String,
}

impl EventBuilder {
    pub fn new(sco_id: &str) -> Self {
        Self {
            sco_id: sco_id.to_string(),
            transaction_id: Uuid::new_v4().to_string(),
        }
    }

    pub fn transaction_id(&self) -> &str {
        &self.transaction_id
    }

    pub fn path(&self, action: ScoAction) -> String {
        format!("/events/{}/{}", self.sco_id, action.endpoint())
    }

    /// Request body for `action` at `timestamp_ms`. A transaction-started
    /// event opens a new transaction id first.
    pub fn body(&mut self, action: ScoAction, timestamp_ms: i64) -> Value {
        if action == ScoAction::TransactionStarted {
            self.transaction_id = Uuid::new_v4().to_string();
        }
        let mut body = json!({
            "transaction_id": self.transaction_id,
            "transaction_type": TRANSACTION_TYPE,
            "timestamp": timestamp_ms,
            "server_timestamp": timestamp_ms,
        });
        let extra = match action {
            ScoAction::TransactionStarted => json!({"status": "started"}),
            ScoAction::TransactionCompleted => json!({"total_items": 0, "status": "ended"}),
            ScoAction::ItemAdded | ScoAction::ItemRemoved => json!({
                "item_id": Uuid::new_v4().to_string(),
                "item_name": "item_name",
                "item_price": 100,
                "item_quantity": 1,
            }),
            ScoAction::State => json!({"reason": "simulation"}),
            ScoAction::ScanStarted => json!({}),
            ScoAction::ScanCompleted => json!({"total_items": 0}),
            ScoAction::WeightingScaleNotMatched => json!({
                "state": "weighting_scale_not_matched",
                "name": "default",
                "barcode": "aabbabc",
            }),
        };
        if let (Some(body), Value::Object(extra)) = (body.as_object_mut(), extra) {
            body.extend(extra);
        }
        body
    }
}
