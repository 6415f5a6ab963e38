use parley_core::domain::outlet::{Outlet, OutletKey};

use crate::connection::DbPool;
use crate::repositories::RepositoryError;

/// Seed contract for the outlet directory: key, area, display fields.
struct OutletSeed {
    key: &'static str,
    name: &'static str,
    area_key: &'static str,
    location: &'static str,
    address: &'static str,
    opening_hours: &'static str,
    phone: &'static str,
    services: &'static [&'static str],
}

const OUTLET_SEEDS: &[OutletSeed] = &[
    OutletSeed {
        key: "ss2",
        name: "SS2 Outlet",
        area_key: "petaling_jaya",
        location: "SS2, Petaling Jaya",
        address: "No. 123, Jalan SS2/24, SS2, 47300 Petaling Jaya, Selangor",
        opening_hours: "9:00 AM - 9:00 PM",
        phone: "+603-1234-5678",
        services: &["Dine-in", "Takeaway", "Delivery"],
    },
    OutletSeed {
        key: "mid_valley",
        name: "Mid Valley Outlet",
        area_key: "kuala_lumpur",
        location: "Mid Valley, Kuala Lumpur",
        address: "L2-034, Mid Valley Megamall, Kuala Lumpur",
        opening_hours: "10:00 AM - 10:00 PM",
        phone: "+603-8765-4321",
        services: &["Dine-in", "Takeaway"],
    },
    OutletSeed {
        key: "one_utama",
        name: "1 Utama Outlet",
        area_key: "petaling_jaya",
        location: "1 Utama, Petaling Jaya",
        address: "LG-234, 1 Utama Shopping Centre, Petaling Jaya",
        opening_hours: "10:00 AM - 10:00 PM",
        phone: "+603-5555-1234",
        services: &["Dine-in", "Takeaway", "Delivery"],
    },
];

pub fn default_outlets() -> Vec<Outlet> {
    OUTLET_SEEDS
        .iter()
        .map(|seed| Outlet {
            key: OutletKey(seed.key.to_string()),
            name: seed.name.to_string(),
            area_key: seed.area_key.to_string(),
            location: seed.location.to_string(),
            address: seed.address.to_string(),
            opening_hours: seed.opening_hours.to_string(),
            phone: seed.phone.to_string(),
            services: seed.services.iter().map(|service| service.to_string()).collect(),
        })
        .collect()
}

/// Inserts the default outlets, leaving existing rows untouched. Safe to run
/// on every start.
pub async fn seed_outlets(pool: &DbPool) -> Result<SeedResult, RepositoryError> {
    let mut tx = pool.begin().await?;
    let mut inserted = 0;

    for outlet in default_outlets() {
        let services_json = serde_json::to_string(&outlet.services)
            .map_err(|error| RepositoryError::Decode(format!("services_json: {error}")))?;

        let result = sqlx::query(
            "INSERT INTO outlets (
                outlet_key,
                name,
                area_key,
                location,
                address,
                opening_hours,
                phone,
                services_json
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(outlet_key) DO NOTHING",
        )
        .bind(&outlet.key.0)
        .bind(&outlet.name)
        .bind(&outlet.area_key)
        .bind(&outlet.location)
        .bind(&outlet.address)
        .bind(&outlet.opening_hours)
        .bind(&outlet.phone)
        .bind(services_json)
        .execute(&mut *tx)
        .await?;
        inserted += result.rows_affected() as usize;
    }

    tx.commit().await?;
    Ok(SeedResult { outlets_inserted: inserted, outlets_expected: OUTLET_SEEDS.len() })
}

/// Checks that every seeded outlet key is present.
pub async fn verify_outlets(pool: &DbPool) -> Result<VerificationResult, RepositoryError> {
    let mut checks = Vec::with_capacity(OUTLET_SEEDS.len());
    for seed in OUTLET_SEEDS {
        let present: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM outlets WHERE outlet_key = ?")
            .bind(seed.key)
            .fetch_one(pool)
            .await?;
        checks.push((seed.key, present == 1));
    }

    let all_present = checks.iter().all(|(_, present)| *present);
    Ok(VerificationResult { all_present, checks })
}

#[derive(Debug)]
pub struct SeedResult {
    pub outlets_inserted: usize,
    pub outlets_expected: usize,
}

#[derive(Debug)]
pub struct VerificationResult {
    pub all_present: bool,
    pub checks: Vec<(&'static str, bool)>,
}
