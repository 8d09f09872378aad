//! Local Mirror of provisioned networks on SQLite.
//!
//! One row per network name holds the last provider-confirmed topology and a
//! lifecycle status. Writes only accept a [`VirtualNetwork`] read back from the
//! provider, never the caller's request. Rows are never removed, a network
//! delete only flips the status to `DELETED`.

use crate::azure::VirtualNetwork;
use crate::error::ProvisionError;
use crate::models::{decode_subnets, encode_subnets, MirrorRecord, MirrorStatus};
use colored::Colorize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::str::FromStr;

const TABLE: &str = "network_config";

#[derive(Clone)]
pub struct Mirror {
    pool: SqlitePool,
}

impl Mirror {
    /// Open (or create) the mirror database at `url` and make sure the table exists.
    ///
    /// # Arguments
    /// * `url` - sqlx SQLite url, e.g. `sqlite://network_config.db?mode=rwc` or `sqlite::memory:`
    pub async fn connect(url: &str) -> Result<Mirror, ProvisionError> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let in_memory = url.contains(":memory:");
        // Every connection to an in-memory database is a separate database, keep exactly one.
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(4)
        };
        let pool = pool_options.connect_with(options).await?;
        let mirror = Mirror { pool };
        mirror.ensure_schema().await?;
        log::info!("Mirror ready at {url}");
        Ok(mirror)
    }

    /// Private in-memory mirror, used by tests and dry runs.
    pub async fn in_memory() -> Result<Mirror, ProvisionError> {
        Mirror::connect("sqlite::memory:").await
    }

    /// Close the pool; later writes fail with a storage error.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn ensure_schema(&self) -> Result<(), ProvisionError> {
        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {TABLE} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                resource_group TEXT NOT NULL,
                vnet_name TEXT NOT NULL,
                location TEXT NOT NULL,
                address_prefix TEXT NOT NULL,
                subnets TEXT NOT NULL,
                status TEXT NOT NULL
            )"
        ))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Record a freshly created network with status `AVAILABLE`.
    ///
    /// A name that already has a row (e.g. a network recreated after a delete)
    /// reuses that row.
    pub async fn insert(&self, resource_group: &str, vnet: &VirtualNetwork) -> Result<(), ProvisionError> {
        self.upsert(resource_group, vnet, MirrorStatus::Available).await?;
        log::info!("VNet data inserted for {}", vnet.name.on_blue());
        Ok(())
    }

    /// Record an updated network with status `UPDATED`, inserting the row if it is missing.
    pub async fn update(&self, resource_group: &str, vnet: &VirtualNetwork) -> Result<(), ProvisionError> {
        self.upsert(resource_group, vnet, MirrorStatus::Updated).await?;
        log::info!("VNet data updated for {}", vnet.name.on_blue());
        Ok(())
    }

    async fn upsert(
        &self,
        resource_group: &str,
        vnet: &VirtualNetwork,
        status: MirrorStatus,
    ) -> Result<(), ProvisionError> {
        let subnets = encode_subnets(&vnet.subnet_entries());
        let address_space = vnet.address_space();

        let mut tx = self.pool.begin().await?;
        let updated = sqlx::query(&format!(
            "UPDATE {TABLE}
             SET resource_group = ?, location = ?, address_prefix = ?, subnets = ?, status = ?
             WHERE vnet_name = ?"
        ))
        .bind(resource_group)
        .bind(&vnet.location)
        .bind(&address_space)
        .bind(&subnets)
        .bind(status.as_str())
        .bind(&vnet.name)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if updated == 0 {
            sqlx::query(&format!(
                "INSERT INTO {TABLE} (resource_group, vnet_name, location, address_prefix, subnets, status)
                 VALUES (?, ?, ?, ?, ?, ?)"
            ))
            .bind(resource_group)
            .bind(&vnet.name)
            .bind(&vnet.location)
            .bind(&address_space)
            .bind(&subnets)
            .bind(status.as_str())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Overwrite only the subnets of a network's row, leaving its status alone.
    ///
    /// # Returns
    /// * `Ok(n)` - number of rows changed (0 when the network has no row)
    pub async fn refresh_subnets(&self, vnet: &VirtualNetwork) -> Result<u64, ProvisionError> {
        let changed = sqlx::query(&format!("UPDATE {TABLE} SET subnets = ? WHERE vnet_name = ?"))
            .bind(encode_subnets(&vnet.subnet_entries()))
            .bind(&vnet.name)
            .execute(&self.pool)
            .await?
            .rows_affected();
        log::info!("VNet subnets refreshed for {} rows={changed}", vnet.name.on_blue());
        Ok(changed)
    }

    /// Soft delete: mark the row `DELETED`, keep everything else as it was.
    pub async fn mark_deleted(&self, vnet_name: &str) -> Result<u64, ProvisionError> {
        let changed = sqlx::query(&format!("UPDATE {TABLE} SET status = ? WHERE vnet_name = ?"))
            .bind(MirrorStatus::Deleted.as_str())
            .bind(vnet_name)
            .execute(&self.pool)
            .await?
            .rows_affected();
        log::info!("VNet data marked as DELETED for {} rows={changed}", vnet_name.on_blue());
        Ok(changed)
    }

    /// Read mirror rows.
    ///
    /// # Arguments
    /// * `vnet_name` - None lists every row (deleted ones included) in storage order.
    ///   Some(name) returns at most the one live (`AVAILABLE`/`UPDATED`) row with that name.
    pub async fn query(&self, vnet_name: Option<&str>) -> Result<Vec<MirrorRecord>, ProvisionError> {
        let rows = match vnet_name {
            None => {
                sqlx::query(&format!("SELECT * FROM {TABLE} ORDER BY id"))
                    .fetch_all(&self.pool)
                    .await?
            }
            Some(name) => {
                let [first, second] = MirrorStatus::live();
                sqlx::query(&format!(
                    "SELECT * FROM {TABLE} WHERE vnet_name = ? AND status IN (?, ?) ORDER BY id LIMIT 1"
                ))
                .bind(name)
                .bind(first.as_str())
                .bind(second.as_str())
                .fetch_all(&self.pool)
                .await?
            }
        };
        rows.iter().map(record_from_row).collect()
    }
}

fn record_from_row(row: &SqliteRow) -> Result<MirrorRecord, ProvisionError> {
    let status: String = row.try_get("status")?;
    let subnets: String = row.try_get("subnets")?;
    Ok(MirrorRecord {
        id: row.try_get("id")?,
        resource_group: row.try_get("resource_group")?,
        vnet_name: row.try_get("vnet_name")?,
        location: row.try_get("location")?,
        address_space: row.try_get("address_prefix")?,
        subnets: decode_subnets(&subnets),
        status: status.parse().map_err(ProvisionError::StorageError)?,
    })
}
