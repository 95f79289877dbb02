// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Typed access to the mirrored tables of a [`LocalMirrorStore`].
//!
//! Each entity is stored whole as JSON in `data`; the other columns only
//! exist to be filtered and ordered on.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use super::local::{LocalMirrorStore, Params};
use super::traits::{Record, StorageError};
use crate::model::{Order, OrderCode, OrderItem, OrderSnapshot, OrderStatus, Product, Ticket, UserShadow};
use crate::params;

fn timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn encode<T: Serialize>(table: &str, value: &T) -> Result<String, StorageError> {
    serde_json::to_string(value).map_err(|e| StorageError::Serialization {
        table: table.to_string(),
        reason: e.to_string(),
    })
}

fn decode<T: DeserializeOwned>(table: &str, row: &Record) -> Result<T, StorageError> {
    let data = row.get("data").and_then(Value::as_str).ok_or_else(|| StorageError::Serialization {
        table: table.to_string(),
        reason: "missing data column".to_string(),
    })?;
    serde_json::from_str(data).map_err(|e| StorageError::Serialization {
        table: table.to_string(),
        reason: e.to_string(),
    })
}

fn decode_all<T: DeserializeOwned>(table: &str, rows: &[Record]) -> Result<Vec<T>, StorageError> {
    rows.iter().map(|row| decode(table, row)).collect()
}

impl LocalMirrorStore {
    /// Replace everything mirrored for one order.
    pub async fn mirror_order(&self, snapshot: &OrderSnapshot) -> Result<(), StorageError> {
        let order = &snapshot.order;
        let mut statements: Vec<(&str, Params)> = vec![
            (
                "INSERT INTO orders (id, status, created_at, data) VALUES (:id, :status, :created_at, :data)
                 ON CONFLICT(id) DO UPDATE SET status = excluded.status,
                     created_at = excluded.created_at, data = excluded.data",
                params! {
                    "id" => order.id,
                    "status" => order.status.as_str(),
                    "created_at" => timestamp(&order.created_at),
                    "data" => encode("orders", order)?,
                },
            ),
            ("DELETE FROM order_items WHERE order_id = :id", params! { "id" => order.id }),
        ];
        for item in &snapshot.items {
            statements.push((
                "INSERT OR REPLACE INTO order_items (order_id, position, data) VALUES (:order_id, :position, :data)",
                params! {
                    "order_id" => order.id,
                    "position" => item.position,
                    "data" => encode("order_items", item)?,
                },
            ));
        }
        if let Some(ticket) = &snapshot.ticket {
            statements.push(("DELETE FROM tickets WHERE order_id = :id", params! { "id" => order.id }));
            statements.push((
                "INSERT OR REPLACE INTO tickets (id, order_id, ticket_number, status, data)
                 VALUES (:id, :order_id, :ticket_number, :status, :data)",
                params! {
                    "id" => ticket.id,
                    "order_id" => order.id,
                    "ticket_number" => ticket.ticket_number,
                    "status" => ticket.status.as_str(),
                    "data" => encode("tickets", ticket)?,
                },
            ));
        }
        if let Some(code) = &snapshot.code {
            statements.push(("DELETE FROM order_codes WHERE order_id = :id", params! { "id" => order.id }));
            statements.push((
                "INSERT OR REPLACE INTO order_codes (code, order_id, data) VALUES (:code, :order_id, :data)",
                params! {
                    "code" => code.code,
                    "order_id" => order.id,
                    "data" => encode("order_codes", code)?,
                },
            ));
        }
        self.batch(&statements).await?;
        Ok(())
    }

    /// Apply a status change to the mirrored order and its ticket.
    /// Returns whether the order was present.
    pub async fn set_order_status(
        &self,
        id: &str,
        status: OrderStatus,
        updated_at: DateTime<Utc>,
    ) -> Result<bool, StorageError> {
        let p = params! {
            "id" => id,
            "status" => status.as_str(),
            "updated_at" => timestamp(&updated_at),
        };
        let executed = self
            .batch(&[
                (
                    "UPDATE orders SET status = :status,
                         data = json_set(data, '$.status', :status, '$.updated_at', :updated_at)
                     WHERE id = :id",
                    p.clone(),
                ),
                (
                    "UPDATE tickets SET status = :status, data = json_set(data, '$.status', :status)
                     WHERE order_id = :id",
                    p,
                ),
            ])
            .await?;
        Ok(executed.first().is_some_and(|e| e.rows_affected > 0))
    }

    pub async fn delete_mirrored_order(&self, id: &str) -> Result<(), StorageError> {
        let p = params! { "id" => id };
        self.batch(&[
            ("DELETE FROM order_codes WHERE order_id = :id", p.clone()),
            ("DELETE FROM tickets WHERE order_id = :id", p.clone()),
            ("DELETE FROM order_items WHERE order_id = :id", p.clone()),
            ("DELETE FROM orders WHERE id = :id", p),
        ])
        .await?;
        Ok(())
    }

    pub async fn mirrored_order(&self, id: &str) -> Result<Option<OrderSnapshot>, StorageError> {
        let row = self
            .get("SELECT data FROM orders WHERE id = :id", &params! { "id" => id })
            .await?;
        match row {
            Some(row) => Ok(Some(self.assemble(decode("orders", &row)?).await?)),
            None => Ok(None),
        }
    }

    /// Newest first.
    pub async fn mirrored_orders(
        &self,
        status: Option<OrderStatus>,
        limit: usize,
    ) -> Result<Vec<OrderSnapshot>, StorageError> {
        let rows = match status {
            Some(status) => {
                self.all(
                    "SELECT data FROM orders WHERE status = :status ORDER BY created_at DESC LIMIT :limit",
                    &params! { "status" => status.as_str(), "limit" => limit },
                )
                .await?
            }
            None => {
                self.all(
                    "SELECT data FROM orders ORDER BY created_at DESC LIMIT :limit",
                    &params! { "limit" => limit },
                )
                .await?
            }
        };
        self.assemble_all(decode_all("orders", &rows)?).await
    }

    /// Active orders, oldest first.
    pub async fn mirrored_prep_queue(&self) -> Result<Vec<OrderSnapshot>, StorageError> {
        let rows = self
            .all(
                "SELECT data FROM orders WHERE status IN ('pending', 'preparing', 'ready')
                 ORDER BY created_at ASC",
                &Params::new(),
            )
            .await?;
        self.assemble_all(decode_all("orders", &rows)?).await
    }

    pub async fn mirrored_order_by_code(&self, code: &str) -> Result<Option<OrderSnapshot>, StorageError> {
        let row = self
            .get(
                "SELECT order_id FROM order_codes WHERE code = :code",
                &params! { "code" => code.to_ascii_uppercase() },
            )
            .await?;
        match row.as_ref().and_then(|r| r.get("order_id")).and_then(Value::as_str) {
            Some(order_id) => self.mirrored_order(order_id).await,
            None => Ok(None),
        }
    }

    pub async fn mirrored_ticket(&self, ticket_number: &str) -> Result<Option<Ticket>, StorageError> {
        let row = self
            .get(
                "SELECT data FROM tickets WHERE ticket_number = :number",
                &params! { "number" => ticket_number },
            )
            .await?;
        row.map(|r| decode("tickets", &r)).transpose()
    }

    async fn assemble(&self, order: Order) -> Result<OrderSnapshot, StorageError> {
        let p = params! { "id" => order.id };
        let items: Vec<OrderItem> = decode_all(
            "order_items",
            &self
                .all("SELECT data FROM order_items WHERE order_id = :id ORDER BY position", &p)
                .await?,
        )?;
        let ticket: Option<Ticket> = self
            .get("SELECT data FROM tickets WHERE order_id = :id", &p)
            .await?
            .map(|r| decode("tickets", &r))
            .transpose()?;
        let code: Option<OrderCode> = self
            .get("SELECT data FROM order_codes WHERE order_id = :id", &p)
            .await?
            .map(|r| decode("order_codes", &r))
            .transpose()?;
        Ok(OrderSnapshot { order, items, ticket, code })
    }

    async fn assemble_all(&self, orders: Vec<Order>) -> Result<Vec<OrderSnapshot>, StorageError> {
        let mut snapshots = Vec::with_capacity(orders.len());
        for order in orders {
            snapshots.push(self.assemble(order).await?);
        }
        Ok(snapshots)
    }

    /// Replace the mirrored catalogue with a full remote listing.
    pub async fn replace_products(&self, products: &[Product]) -> Result<(), StorageError> {
        let mut statements: Vec<(&str, Params)> = vec![("DELETE FROM products", Params::new())];
        for product in products {
            statements.push((
                "INSERT OR REPLACE INTO products (id, name, data) VALUES (:id, :name, :data)",
                params! {
                    "id" => product.id,
                    "name" => product.name,
                    "data" => encode("products", product)?,
                },
            ));
        }
        self.batch(&statements).await?;
        Ok(())
    }

    pub async fn mirror_product(&self, product: &Product) -> Result<(), StorageError> {
        self.run(
            "INSERT OR REPLACE INTO products (id, name, data) VALUES (:id, :name, :data)",
            &params! {
                "id" => product.id,
                "name" => product.name,
                "data" => encode("products", product)?,
            },
        )
        .await?;
        Ok(())
    }

    /// By name.
    pub async fn mirrored_products(&self) -> Result<Vec<Product>, StorageError> {
        let rows = self.all("SELECT data FROM products ORDER BY name", &Params::new()).await?;
        decode_all("products", &rows)
    }

    pub async fn mirrored_product(&self, id: &str) -> Result<Option<Product>, StorageError> {
        self.get("SELECT data FROM products WHERE id = :id", &params! { "id" => id })
            .await?
            .map(|r| decode("products", &r))
            .transpose()
    }

    pub async fn mirror_user(&self, user: &UserShadow) -> Result<(), StorageError> {
        self.run(
            "INSERT OR REPLACE INTO users_shadow (id, data) VALUES (:id, :data)",
            &params! { "id" => user.id, "data" => encode("users_shadow", user)? },
        )
        .await?;
        Ok(())
    }

    pub async fn mirrored_user(&self, id: &str) -> Result<Option<UserShadow>, StorageError> {
        self.get("SELECT data FROM users_shadow WHERE id = :id", &params! { "id" => id })
            .await?
            .map(|r| decode("users_shadow", &r))
            .transpose()
    }
}
