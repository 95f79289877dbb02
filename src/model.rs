// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Domain rows exchanged with both stores.
//!
//! Rows serialize in the remote column shape (snake_case). Request bodies
//! ([`NewOrder`], [`StatusChange`]) accept the client's camelCase keys.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::SyncError;
use crate::storage::traits::Record;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Preparing,
    Ready,
    Completed,
    Cancelled,
}

impl OrderStatus {
    /// Statuses that keep an order on the prep queue.
    pub const ACTIVE: [OrderStatus; 3] = [Self::Pending, Self::Preparing, Self::Ready];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Preparing => "preparing",
            Self::Ready => "ready",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        Self::ACTIVE.contains(self)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "preparing" => Ok(Self::Preparing),
            "ready" => Ok(Self::Ready),
            "completed" => Ok(Self::Completed),
            "cancelled" | "canceled" => Ok(Self::Cancelled),
            other => Err(SyncError::InvalidInput(format!("unknown order status '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    #[serde(default)]
    pub customer_name: Option<String>,
    pub status: OrderStatus,
    pub total: f64,
    #[serde(default)]
    pub payment_method: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderItem {
    pub order_id: String,
    /// Line number within the order, from 0.
    #[serde(default)]
    pub position: u32,
    #[serde(default)]
    pub product_id: Option<String>,
    pub name: String,
    pub quantity: u32,
    pub unit_price: f64,
    #[serde(default)]
    pub notes: Option<String>,
}

impl OrderItem {
    #[must_use]
    pub fn line_total(&self) -> f64 {
        f64::from(self.quantity) * self.unit_price
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticket {
    pub id: String,
    pub order_id: String,
    pub ticket_number: String,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
}

/// Short pickup code printed on the receipt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderCode {
    pub code: String,
    pub order_id: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrepEntry {
    pub order_id: String,
    pub status: OrderStatus,
    pub queued_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub name: String,
    pub price: f64,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default = "default_available")]
    pub available: bool,
}

fn default_available() -> bool {
    true
}

/// Read-only copy of a customer account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserShadow {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub points: i64,
}

/// An order with everything hanging off it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderSnapshot {
    #[serde(flatten)]
    pub order: Order,
    pub items: Vec<OrderItem>,
    #[serde(default)]
    pub ticket: Option<Ticket>,
    #[serde(default)]
    pub code: Option<OrderCode>,
}

impl OrderSnapshot {
    #[must_use]
    pub fn id(&self) -> &str {
        &self.order.id
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewOrderItem {
    #[serde(default, alias = "product_id")]
    pub product_id: Option<String>,
    pub name: String,
    pub quantity: u32,
    #[serde(alias = "unit_price")]
    pub unit_price: f64,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Order intake payload.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewOrder {
    /// Client-chosen id; a saved order with the same id is replaced.
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default, alias = "customer_name")]
    pub customer_name: Option<String>,
    #[serde(default, alias = "payment_method")]
    pub payment_method: Option<String>,
    #[serde(default, alias = "user_id")]
    pub user_id: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    pub items: Vec<NewOrderItem>,
    #[serde(default, alias = "ticket_number")]
    pub ticket_number: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub status: Option<OrderStatus>,
    /// Defaults to the sum of the line totals.
    #[serde(default)]
    pub total: Option<f64>,
}

impl NewOrder {
    /// Validate and expand into the full set of rows, stamping `now`.
    pub fn into_snapshot(self, now: DateTime<Utc>) -> Result<OrderSnapshot, SyncError> {
        if self.items.is_empty() {
            return Err(SyncError::InvalidInput("order has no items".into()));
        }
        for (i, item) in self.items.iter().enumerate() {
            if item.name.trim().is_empty() {
                return Err(SyncError::InvalidInput(format!("item {i} has no name")));
            }
            if item.quantity == 0 {
                return Err(SyncError::InvalidInput(format!("item {i} has zero quantity")));
            }
            if !item.unit_price.is_finite() || item.unit_price < 0.0 {
                return Err(SyncError::InvalidInput(format!("item {i} has an invalid price")));
            }
        }
        if let Some(total) = self.total {
            if !total.is_finite() || total < 0.0 {
                return Err(SyncError::InvalidInput("invalid order total".into()));
            }
        }

        let id = match self.id.map(|s| s.trim().to_string()) {
            Some(id) if !id.is_empty() => id,
            _ => Uuid::new_v4().to_string(),
        };
        let status = self.status.unwrap_or(OrderStatus::Pending);

        let items: Vec<OrderItem> = self
            .items
            .into_iter()
            .enumerate()
            .map(|(position, item)| OrderItem {
                order_id: id.clone(),
                position: position as u32,
                product_id: item.product_id,
                name: item.name.trim().to_string(),
                quantity: item.quantity,
                unit_price: item.unit_price,
                notes: item.notes,
            })
            .collect();
        let total = self
            .total
            .unwrap_or_else(|| items.iter().map(OrderItem::line_total).sum());

        let ticket = Ticket {
            id: Uuid::new_v4().to_string(),
            order_id: id.clone(),
            ticket_number: self
                .ticket_number
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .unwrap_or_else(new_ticket_number),
            status,
            created_at: now,
        };
        let code = OrderCode {
            code: self
                .code
                .map(|c| c.trim().to_ascii_uppercase())
                .filter(|c| !c.is_empty())
                .unwrap_or_else(new_order_code),
            order_id: id.clone(),
            created_at: now,
        };

        Ok(OrderSnapshot {
            order: Order {
                id,
                customer_name: self.customer_name,
                status,
                total,
                payment_method: self.payment_method,
                user_id: self.user_id,
                notes: self.notes,
                created_at: now,
                updated_at: now,
            },
            items,
            ticket: Some(ticket),
            code: Some(code),
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatusChange {
    pub status: OrderStatus,
}

/// Filters for order listings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OrderQuery {
    #[serde(default)]
    pub status: Option<OrderStatus>,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl OrderQuery {
    pub const DEFAULT_LIMIT: usize = 50;
    pub const MAX_LIMIT: usize = 500;

    #[must_use]
    pub fn effective_limit(&self) -> usize {
        self.limit.unwrap_or(Self::DEFAULT_LIMIT).clamp(1, Self::MAX_LIMIT)
    }
}

fn new_ticket_number() -> String {
    let raw = Uuid::new_v4().simple().to_string().to_ascii_uppercase();
    format!("T-{}", &raw[..6])
}

fn new_order_code() -> String {
    Uuid::new_v4().simple().to_string()[..6].to_ascii_uppercase()
}

/// Serialize a row into a [`Record`].
pub(crate) fn to_record<T: Serialize>(value: &T) -> Record {
    match serde_json::to_value(value) {
        Ok(Value::Object(map)) => map,
        _ => Record::new(),
    }
}

/// Decode a row read from either store.
pub(crate) fn from_record<T: DeserializeOwned>(record: Record) -> Result<T, serde_json::Error> {
    serde_json::from_value(Value::Object(record))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn new_order(v: Value) -> NewOrder {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn test_snapshot_derives_total_and_children() {
        let order = new_order(json!({
            "id": "O1",
            "customerName": "Ana",
            "items": [
                {"name": "Latte", "quantity": 2, "unitPrice": 3.5},
                {"name": "Croissant", "quantity": 1, "unit_price": 2.25, "productId": "p9"}
            ]
        }));
        let snap = order.into_snapshot(Utc::now()).unwrap();

        assert_eq!(snap.id(), "O1");
        assert_eq!(snap.order.total, 9.25);
        assert_eq!(snap.order.status, OrderStatus::Pending);
        assert_eq!(snap.items[1].position, 1);
        assert_eq!(snap.items[1].product_id.as_deref(), Some("p9"));
        assert!(snap.items.iter().all(|i| i.order_id == "O1"));

        let ticket = snap.ticket.unwrap();
        assert!(ticket.ticket_number.starts_with("T-"));
        assert_eq!(ticket.ticket_number.len(), 8);
        assert_eq!(snap.code.unwrap().code.len(), 6);
    }

    #[test]
    fn test_explicit_fields_win() {
        let snap = new_order(json!({
            "items": [{"name": "Tea", "quantity": 1, "unitPrice": 2.0}],
            "total": 1.5,
            "ticketNumber": "T-42",
            "code": "ab12cd",
            "status": "preparing"
        }))
        .into_snapshot(Utc::now())
        .unwrap();

        assert!(!snap.id().is_empty());
        assert_eq!(snap.order.total, 1.5);
        assert_eq!(snap.order.status, OrderStatus::Preparing);
        assert_eq!(snap.ticket.unwrap().ticket_number, "T-42");
        assert_eq!(snap.code.unwrap().code, "AB12CD");
    }

    #[test]
    fn test_blank_ticket_and_code_are_generated() {
        let snap = new_order(json!({
            "items": [{"name": "Tea", "quantity": 1, "unitPrice": 2.0}],
            "ticketNumber": "  ",
            "code": ""
        }))
        .into_snapshot(Utc::now())
        .unwrap();

        assert!(snap.ticket.unwrap().ticket_number.starts_with("T-"));
        assert_eq!(snap.code.unwrap().code.len(), 6);
    }

    #[test]
    fn test_invalid_orders_rejected() {
        let cases = [
            json!({"items": []}),
            json!({"items": [{"name": "Tea", "quantity": 0, "unitPrice": 2.0}]}),
            json!({"items": [{"name": "Tea", "quantity": 1, "unitPrice": -1.0}]}),
            json!({"items": [{"name": "  ", "quantity": 1, "unitPrice": 1.0}]}),
        ];
        for case in cases {
            let err = new_order(case).into_snapshot(Utc::now()).unwrap_err();
            assert!(matches!(err, SyncError::InvalidInput(_)), "{err}");
        }
    }

    #[test]
    fn test_status_parsing() {
        assert_eq!("Ready".parse::<OrderStatus>().unwrap(), OrderStatus::Ready);
        assert_eq!("canceled".parse::<OrderStatus>().unwrap(), OrderStatus::Cancelled);
        assert!("served".parse::<OrderStatus>().is_err());
        assert!(OrderStatus::Ready.is_active());
        assert!(!OrderStatus::Completed.is_active());
    }

    #[test]
    fn test_snapshot_serializes_flat() {
        let snap = new_order(json!({"id": "O1", "items": [{"name": "Tea", "quantity": 1, "unitPrice": 2.0}]}))
            .into_snapshot(Utc::now())
            .unwrap();
        let v = serde_json::to_value(&snap).unwrap();
        assert_eq!(v["id"], "O1");
        assert_eq!(v["status"], "pending");
        assert_eq!(v["items"][0]["unit_price"], 2.0);

        let back: OrderSnapshot = serde_json::from_value(v).unwrap();
        assert_eq!(back, snap);
    }

    #[test]
    fn test_record_helpers() {
        let product = Product {
            id: "p1".into(),
            name: "Mocha".into(),
            price: 4.0,
            category: None,
            available: true,
        };
        let record = to_record(&product);
        assert_eq!(record["name"], "Mocha");

        let mut remote_row = Record::new();
        remote_row.insert("id".into(), json!("p2"));
        remote_row.insert("name".into(), json!("Chai"));
        remote_row.insert("price".into(), json!(3));
        let decoded: Product = from_record(remote_row).unwrap();
        assert!(decoded.available);
        assert_eq!(decoded.price, 3.0);

        assert!(from_record::<Product>(Record::new()).is_err());
    }

    #[test]
    fn test_order_query_limit() {
        assert_eq!(OrderQuery::default().effective_limit(), 50);
        let q = OrderQuery { status: None, limit: Some(10_000) };
        assert_eq!(q.effective_limit(), 500);
    }
}
