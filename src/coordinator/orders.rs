// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Order, ticket and prep-queue operations.
//!
//! Every write builds its complete operation group from the request alone,
//! so a replay converges on the same end state however much of a failed
//! attempt already landed remotely.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::{info, warn};

use super::{CafeSync, Sourced, WriteStatus, Written};
use crate::error::SyncError;
use crate::model::{
    from_record, to_record, NewOrder, Order, OrderCode, OrderItem, OrderQuery, OrderSnapshot, OrderStatus,
    PrepEntry, Ticket,
};
use crate::operation::{OperationGroup, PendingOperation, Table};
use crate::storage::query::{Filter, Query};
use crate::storage::traits::{Record, RemoteError, StorageError};

/// Decode remote rows; a row that does not fit the model is not a
/// connectivity problem.
pub(super) fn decode_rows<T: DeserializeOwned>(table: &str, rows: Vec<Record>) -> Result<Vec<T>, RemoteError> {
    rows.into_iter()
        .map(|row| {
            from_record(row).map_err(|e| RemoteError::Unknown(format!("undecodable row in {table}: {e}")))
        })
        .collect()
}

fn not_found(what: &str, key: &str) -> SyncError {
    SyncError::NotFound(format!("{what} {key}"))
}

/// Operation group replacing everything stored for an order.
pub fn save_order_group(snapshot: &OrderSnapshot) -> OperationGroup {
    let order = &snapshot.order;
    let id = order.id.as_str();
    let mut group = OperationGroup::new("save_order")
        .with_metadata(json!({ "order_id": id }))
        .push(PendingOperation::upsert(Table::Orders, vec![to_record(order)], "id"))
        .push(PendingOperation::delete(Table::OrderItems, vec![Filter::eq("order_id", id)]))
        .push(PendingOperation::insert(
            Table::OrderItems,
            snapshot.items.iter().map(to_record).collect(),
        ));
    if let Some(ticket) = &snapshot.ticket {
        group = group
            .push(PendingOperation::delete(Table::Tickets, vec![Filter::eq("order_id", id)]))
            .push(PendingOperation::upsert(Table::Tickets, vec![to_record(ticket)], "id"));
    }
    if let Some(code) = &snapshot.code {
        group = group
            .push(PendingOperation::delete(Table::OrderCodes, vec![Filter::eq("order_id", id)]))
            .push(PendingOperation::upsert(Table::OrderCodes, vec![to_record(code)], "code"));
    }
    group.push(prep_queue_operation(id, order.status, order.created_at))
}

/// Keep the prep queue in step with an order's status.
fn prep_queue_operation(order_id: &str, status: OrderStatus, queued_at: DateTime<Utc>) -> PendingOperation {
    if !status.is_active() {
        return PendingOperation::delete(Table::PrepQueue, vec![Filter::eq("order_id", order_id)]);
    }
    let mut row = Record::new();
    row.insert("order_id".into(), json!(order_id));
    row.insert("status".into(), json!(status));
    row.insert("queued_at".into(), json!(queued_at));
    PendingOperation::upsert(Table::PrepQueue, vec![row], "order_id")
}

/// `queued_at` is the order's creation time, so an order that re-enters the
/// prep queue keeps its place.
pub fn status_change_group(
    order_id: &str,
    status: OrderStatus,
    at: DateTime<Utc>,
    queued_at: DateTime<Utc>,
) -> OperationGroup {
    let mut order_values = Record::new();
    order_values.insert("status".into(), json!(status));
    order_values.insert("updated_at".into(), json!(at));
    let mut ticket_values = Record::new();
    ticket_values.insert("status".into(), json!(status));

    OperationGroup::new("update_order_status")
        .with_metadata(json!({ "order_id": order_id, "status": status }))
        .push(PendingOperation::update(Table::Orders, order_values, vec![Filter::eq("id", order_id)]))
        .push(PendingOperation::update(Table::Tickets, ticket_values, vec![Filter::eq("order_id", order_id)]))
        .push(prep_queue_operation(order_id, status, queued_at))
}

/// Children first, so no row is ever left pointing at a missing order.
pub fn delete_order_group(order_id: &str) -> OperationGroup {
    let by_order = || vec![Filter::eq("order_id", order_id)];
    OperationGroup::new("delete_order")
        .with_metadata(json!({ "order_id": order_id }))
        .push(PendingOperation::delete(Table::PrepQueue, by_order()))
        .push(PendingOperation::delete(Table::OrderCodes, by_order()))
        .push(PendingOperation::delete(Table::Tickets, by_order()))
        .push(PendingOperation::delete(Table::OrderItems, by_order()))
        .push(PendingOperation::delete(Table::Orders, vec![Filter::eq("id", order_id)]))
}

impl CafeSync {
    #[tracing::instrument(skip(self, input))]
    pub async fn save_order(&self, input: NewOrder) -> Result<Written<OrderSnapshot>, SyncError> {
        let snapshot = input.into_snapshot(Utc::now())?;
        let group = save_order_group(&snapshot);
        let status = self
            .write_group(group, self.local.mirror_order(&snapshot))
            .await?;
        log_write("save_order", snapshot.id(), &status);
        Ok(Written { value: snapshot, status })
    }

    #[tracing::instrument(skip(self))]
    pub async fn update_order_status(
        &self,
        id: &str,
        status: OrderStatus,
    ) -> Result<Written<OrderSnapshot>, SyncError> {
        let mut updated = self.get_order(id).await?.value;
        let now = Utc::now();
        updated.order.status = status;
        updated.order.updated_at = now;
        if let Some(ticket) = updated.ticket.as_mut() {
            ticket.status = status;
        }

        let mirror = async {
            if !self.local.set_order_status(id, status, now).await? {
                self.local.mirror_order(&updated).await?;
            }
            Ok::<(), StorageError>(())
        };
        let group = status_change_group(id, status, now, updated.order.created_at);
        let write = self.write_group(group, mirror).await?;
        log_write("update_order_status", id, &write);
        Ok(Written { value: updated, status: write })
    }

    #[tracing::instrument(skip(self))]
    pub async fn delete_order(&self, id: &str) -> Result<Written<()>, SyncError> {
        self.get_order(id).await?;
        let status = self
            .write_group(delete_order_group(id), self.local.delete_mirrored_order(id))
            .await?;
        log_write("delete_order", id, &status);
        Ok(Written { value: (), status })
    }

    #[tracing::instrument(skip(self))]
    pub async fn get_order(&self, id: &str) -> Result<Sourced<OrderSnapshot>, SyncError> {
        let read = self
            .read_through(
                "get_order",
                async {
                    let query = Query::from(self.tables.orders.as_str()).eq("id", id);
                    let found = self.fetch_orders(query).await?.pop();
                    if let Some(snapshot) = &found {
                        self.mirror_quietly(std::slice::from_ref(snapshot)).await;
                    }
                    Ok::<_, RemoteError>(found)
                },
                self.local.mirrored_order(id),
            )
            .await?;
        read.transpose().ok_or_else(|| not_found("order", id))
    }

    /// Newest first.
    #[tracing::instrument(skip(self))]
    pub async fn list_orders(&self, filter: OrderQuery) -> Result<Sourced<Vec<OrderSnapshot>>, SyncError> {
        let limit = filter.effective_limit();
        self.read_through(
            "list_orders",
            async {
                let mut query = Query::from(self.tables.orders.as_str())
                    .order("created_at", false)
                    .limit(limit);
                if let Some(status) = filter.status {
                    query = query.eq("status", status.as_str());
                }
                let orders = self.fetch_orders(query).await?;
                self.mirror_quietly(&orders).await;
                Ok::<_, RemoteError>(orders)
            },
            self.local.mirrored_orders(filter.status, limit),
        )
        .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn find_order_by_code(&self, code: &str) -> Result<Sourced<OrderSnapshot>, SyncError> {
        let code = code.trim().to_ascii_uppercase();
        let read = self
            .read_through(
                "find_order_by_code",
                async {
                    let row = self
                        .remote
                        .select_maybe_single(&Query::from(self.tables.order_codes.as_str()).eq("code", code.as_str()))
                        .await?;
                    let Some(code_row) = decode_rows::<OrderCode>(&self.tables.order_codes, row.into_iter().collect())?
                        .pop()
                    else {
                        return Ok(None);
                    };
                    let query = Query::from(self.tables.orders.as_str()).eq("id", code_row.order_id.as_str());
                    let found = self.fetch_orders(query).await?.pop();
                    if let Some(snapshot) = &found {
                        self.mirror_quietly(std::slice::from_ref(snapshot)).await;
                    }
                    Ok::<_, RemoteError>(found)
                },
                self.local.mirrored_order_by_code(&code),
            )
            .await?;
        read.transpose().ok_or_else(|| not_found("order code", &code))
    }

    #[tracing::instrument(skip(self))]
    pub async fn get_ticket(&self, ticket_number: &str) -> Result<Sourced<Ticket>, SyncError> {
        let read = self
            .read_through(
                "get_ticket",
                async {
                    let row = self
                        .remote
                        .select_maybe_single(
                            &Query::from(self.tables.tickets.as_str()).eq("ticket_number", ticket_number),
                        )
                        .await?;
                    Ok::<_, RemoteError>(decode_rows::<Ticket>(&self.tables.tickets, row.into_iter().collect())?.pop())
                },
                self.local.mirrored_ticket(ticket_number),
            )
            .await?;
        read.transpose().ok_or_else(|| not_found("ticket", ticket_number))
    }

    /// Active orders in the order the kitchen should make them.
    #[tracing::instrument(skip(self))]
    pub async fn prep_queue(&self) -> Result<Sourced<Vec<OrderSnapshot>>, SyncError> {
        self.read_through(
            "prep_queue",
            async {
                let rows = self
                    .remote
                    .select(&Query::from(self.tables.prep_queue.as_str()).order("queued_at", true))
                    .await?;
                let entries: Vec<PrepEntry> = decode_rows(&self.tables.prep_queue, rows)?;
                if entries.is_empty() {
                    return Ok(Vec::new());
                }
                let ids: Vec<&str> = entries.iter().map(|e| e.order_id.as_str()).collect();
                let mut by_id: HashMap<String, OrderSnapshot> = self
                    .fetch_orders(Query::from(self.tables.orders.as_str()).in_("id", ids))
                    .await?
                    .into_iter()
                    .map(|s| (s.order.id.clone(), s))
                    .collect();
                let ordered: Vec<OrderSnapshot> = entries
                    .iter()
                    .filter_map(|e| by_id.remove(&e.order_id))
                    .collect();
                self.mirror_quietly(&ordered).await;
                Ok::<_, RemoteError>(ordered)
            },
            self.local.mirrored_prep_queue(),
        )
        .await
    }

    /// Orders matching `query` with their items, ticket and code.
    async fn fetch_orders(&self, query: Query) -> Result<Vec<OrderSnapshot>, RemoteError> {
        let orders: Vec<Order> = decode_rows(&self.tables.orders, self.remote.select(&query).await?)?;
        if orders.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<&str> = orders.iter().map(|o| o.id.as_str()).collect();

        let items: Vec<OrderItem> = decode_rows(
            &self.tables.order_items,
            self.remote
                .select(
                    &Query::from(self.tables.order_items.as_str())
                        .in_("order_id", ids.clone())
                        .order("position", true),
                )
                .await?,
        )?;
        let tickets: Vec<Ticket> = decode_rows(
            &self.tables.tickets,
            self.remote
                .select(&Query::from(self.tables.tickets.as_str()).in_("order_id", ids.clone()))
                .await?,
        )?;
        let codes: Vec<OrderCode> = decode_rows(
            &self.tables.order_codes,
            self.remote
                .select(&Query::from(self.tables.order_codes.as_str()).in_("order_id", ids))
                .await?,
        )?;

        let mut items_by_order: HashMap<String, Vec<OrderItem>> = HashMap::new();
        for item in items {
            items_by_order.entry(item.order_id.clone()).or_default().push(item);
        }
        let mut tickets_by_order: HashMap<String, Ticket> =
            tickets.into_iter().map(|t| (t.order_id.clone(), t)).collect();
        let mut codes_by_order: HashMap<String, OrderCode> =
            codes.into_iter().map(|c| (c.order_id.clone(), c)).collect();

        Ok(orders
            .into_iter()
            .map(|order| OrderSnapshot {
                items: items_by_order.remove(&order.id).unwrap_or_default(),
                ticket: tickets_by_order.remove(&order.id),
                code: codes_by_order.remove(&order.id),
                order,
            })
            .collect())
    }

    /// Refresh the mirror from a successful remote read.
    async fn mirror_quietly(&self, snapshots: &[OrderSnapshot]) {
        for snapshot in snapshots {
            if let Err(e) = self.local.mirror_order(snapshot).await {
                warn!(order_id = %snapshot.id(), error = %e, "Failed to refresh local mirror");
                crate::metrics::record_mirror_error("refresh_order");
            }
        }
    }
}

fn log_write(operation: &str, order_id: &str, status: &WriteStatus) {
    match status {
        WriteStatus::Committed => info!(operation, order_id, "Order write committed"),
        WriteStatus::Pending { queue_id, remote_attempted } => info!(
            operation,
            order_id,
            queue_id,
            remote_attempted,
            "Order write accepted, pending sync"
        ),
    }
}
