// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Read-mostly reference data: products and user shadows.

use tracing::warn;

use super::orders::decode_rows;
use super::{CafeSync, Sourced};
use crate::error::SyncError;
use crate::model::{Product, UserShadow};
use crate::storage::query::Query;
use crate::storage::traits::RemoteError;

impl CafeSync {
    /// The full menu, sorted by name.
    #[tracing::instrument(skip(self))]
    pub async fn list_products(&self) -> Result<Sourced<Vec<Product>>, SyncError> {
        self.read_through(
            "list_products",
            async {
                let rows = self
                    .remote
                    .select(&Query::from(self.tables.products.as_str()).order("name", true))
                    .await?;
                let products: Vec<Product> = decode_rows(&self.tables.products, rows)?;
                if let Err(e) = self.local.replace_products(&products).await {
                    warn!(error = %e, "Failed to refresh mirrored products");
                    crate::metrics::record_mirror_error("refresh_products");
                }
                Ok::<_, RemoteError>(products)
            },
            self.local.mirrored_products(),
        )
        .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn get_product(&self, id: &str) -> Result<Sourced<Product>, SyncError> {
        let read = self
            .read_through(
                "get_product",
                async {
                    let row = self
                        .remote
                        .select_maybe_single(&Query::from(self.tables.products.as_str()).eq("id", id))
                        .await?;
                    let product = decode_rows::<Product>(&self.tables.products, row.into_iter().collect())?.pop();
                    if let Some(product) = &product {
                        if let Err(e) = self.local.mirror_product(product).await {
                            warn!(product_id = %id, error = %e, "Failed to refresh mirrored product");
                            crate::metrics::record_mirror_error("refresh_product");
                        }
                    }
                    Ok::<_, RemoteError>(product)
                },
                self.local.mirrored_product(id),
            )
            .await?;
        read.transpose().ok_or_else(|| SyncError::NotFound(format!("product {id}")))
    }

    /// Look up a customer account. The mirror is never written through,
    /// only refreshed from remote reads.
    #[tracing::instrument(skip(self))]
    pub async fn get_user(&self, id: &str) -> Result<Sourced<UserShadow>, SyncError> {
        let read = self
            .read_through(
                "get_user",
                async {
                    let row = self
                        .remote
                        .select_maybe_single(&Query::from(self.tables.users.as_str()).eq("id", id))
                        .await?;
                    let user = decode_rows::<UserShadow>(&self.tables.users, row.into_iter().collect())?.pop();
                    if let Some(user) = &user {
                        if let Err(e) = self.local.mirror_user(user).await {
                            warn!(user_id = %id, error = %e, "Failed to refresh user shadow");
                            crate::metrics::record_mirror_error("refresh_user");
                        }
                    }
                    Ok::<_, RemoteError>(user)
                },
                self.local.mirrored_user(id),
            )
            .await?;
        read.transpose().ok_or_else(|| SyncError::NotFound(format!("user {id}")))
    }
}
