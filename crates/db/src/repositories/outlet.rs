use sqlx::{sqlite::SqliteRow, Row};

use parley_core::domain::outlet::{Outlet, OutletKey};

use super::{OutletDirectory, RepositoryError};
use crate::DbPool;

/// Outlet lookups. Location text is always bound as a parameter.
pub struct SqlOutletDirectory {
    pool: DbPool,
}

impl SqlOutletDirectory {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl OutletDirectory for SqlOutletDirectory {
    async fn find_by_location(&self, location_key: &str) -> Result<Vec<Outlet>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT
                outlet_key,
                name,
                area_key,
                location,
                address,
                opening_hours,
                phone,
                services_json
             FROM outlets
             WHERE outlet_key = ?1 OR area_key = ?1
             ORDER BY name ASC",
        )
        .bind(location_key)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(outlet_from_row).collect()
    }

    async fn list_all(&self) -> Result<Vec<Outlet>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT
                outlet_key,
                name,
                area_key,
                location,
                address,
                opening_hours,
                phone,
                services_json
             FROM outlets
             ORDER BY name ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(outlet_from_row).collect()
    }
}

fn outlet_from_row(row: SqliteRow) -> Result<Outlet, RepositoryError> {
    let services_raw = row.try_get::<String, _>("services_json")?;
    let services = serde_json::from_str::<Vec<String>>(&services_raw).map_err(|error| {
        RepositoryError::Decode(format!("invalid services_json `{services_raw}`: {error}"))
    })?;

    Ok(Outlet {
        key: OutletKey(row.try_get("outlet_key")?),
        name: row.try_get("name")?,
        area_key: row.try_get("area_key")?,
        location: row.try_get("location")?,
        address: row.try_get("address")?,
        opening_hours: row.try_get("opening_hours")?,
        phone: row.try_get("phone")?,
        services,
    })
}
