use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use githarvest_core::{EntityKind, GeocodeStats, RecordStore, Shutdown};

const GEOCODE_BATCH: i64 = 500;

/// Strings people put in the location field that name no place.
const NON_LOCATIONS: [&str; 19] = [
    "remote",
    "worldwide",
    "global",
    "earth",
    "moon",
    "mars",
    "internet",
    "web",
    "online",
    "virtual",
    "home",
    "everywhere",
    "anywhere",
    "nowhere",
    "n/a",
    "not specified",
    "not applicable",
    "unknown",
    "undisclosed",
];

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GeoResult {
    pub country_code: String,
    pub region: Option<String>,
}

/// Resolves a location string to a country. `Ok(None)` is "tried, nothing
/// found" and is never an error.
#[async_trait]
pub trait Geocoder: Send + Sync {
    async fn resolve(&self, location: &str) -> Result<Option<GeoResult>>;
}

/// HTTP geocoding service client. The service owns the actual resolution
/// logic; this side only asks and fills in the region when the service
/// left it out.
pub struct HttpGeocoder {
    http: reqwest::Client,
    base_url: String,
}

impl HttpGeocoder {
    pub fn new(base_url: String) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| Error::Geocoder(e.to_string()))?;
        Ok(Self { http, base_url })
    }
}

#[async_trait]
impl Geocoder for HttpGeocoder {
    async fn resolve(&self, location: &str) -> Result<Option<GeoResult>> {
        let response = self
            .http
            .get(format!("{}/resolve", self.base_url))
            .query(&[("q", location)])
            .send()
            .await
            .map_err(|e| Error::Geocoder(e.to_string()))?;

        if response.status().as_u16() == 404 {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(Error::Geocoder(format!(
                "geocoder returned HTTP {}",
                response.status()
            )));
        }

        let mut result: GeoResult = response
            .json()
            .await
            .map_err(|e| Error::Geocoder(e.to_string()))?;
        if result.region.is_none() {
            result.region = region_for_country(&result.country_code).map(str::to_string);
        }
        Ok(Some(result))
    }
}

/// Strip remote-work noise from a location string before geocoding.
/// Returns `None` when nothing resembling a place is left.
pub fn preprocess_location(raw: &str) -> Option<String> {
    let cleaned = raw.trim();
    if cleaned.is_empty() {
        return None;
    }
    let lower = cleaned.to_lowercase();
    if NON_LOCATIONS.contains(&lower.as_str()) {
        return None;
    }

    if lower.contains("remote") || lower.contains("anywhere") || lower.contains("everywhere") {
        let parts: Vec<&str> = cleaned
            .split([',', '/', '|'])
            .map(str::trim)
            .filter(|p| {
                let p = p.to_lowercase();
                !p.is_empty()
                    && !p.contains("remote")
                    && !p.contains("anywhere")
                    && !p.contains("everywhere")
            })
            .collect();
        if parts.is_empty() {
            return None;
        }
        return Some(parts.join(", "));
    }

    Some(cleaned.to_string())
}

/// Continent-scale region for a country code, for the segmented views the
/// analysts query by.
pub fn region_for_country(country_code: &str) -> Option<&'static str> {
    let code = country_code.to_ascii_uppercase();
    let region = match code.as_str() {
        "US" | "CA" | "MX" => "North America",
        "GB" | "DE" | "FR" | "IT" | "ES" | "NL" | "BE" | "CH" | "AT" | "SE" | "NO" | "DK"
        | "FI" | "PT" | "IE" | "PL" | "CZ" | "HU" | "RO" | "BG" | "GR" | "HR" | "RS" | "SK"
        | "SI" | "EE" | "LV" | "LT" | "LU" | "MT" | "CY" | "IS" | "AL" | "BA" | "ME" | "MK"
        | "MD" | "UA" | "BY" | "RU" => "Europe",
        "CN" | "JP" | "KR" | "IN" | "SG" | "ID" | "MY" | "TH" | "VN" | "PH" | "PK" | "BD"
        | "LK" | "NP" | "MM" | "KH" | "LA" | "BN" | "MN" | "BT" | "MV" | "TL" | "TW" | "HK" => {
            "Asia"
        }
        "IL" | "TR" | "SA" | "AE" | "QA" | "BH" | "KW" | "OM" | "JO" | "LB" | "IQ" | "IR"
        | "SY" | "PS" | "YE" => "Middle East",
        "AU" | "NZ" | "FJ" | "PG" | "SB" | "VU" | "WS" | "TO" | "KI" | "MH" | "FM" | "PW"
        | "NR" | "TV" => "Oceania",
        "ZA" | "NG" | "EG" | "MA" | "KE" | "GH" | "TZ" | "DZ" | "TN" | "ET" | "UG" | "SN"
        | "CM" | "CI" | "ZM" | "MZ" | "AO" | "ZW" | "NA" | "BW" | "RW" | "MU" | "BJ" | "GA"
        | "SL" => "Africa",
        "BR" | "AR" | "CO" | "CL" | "PE" | "VE" | "EC" | "BO" | "PY" | "UY" | "GY" | "SR"
        | "GF" => "South America",
        "PA" | "CR" | "NI" | "HN" | "SV" | "GT" | "BZ" | "DO" | "CU" | "JM" | "HT" | "BS"
        | "BB" | "TT" => "Central America",
        _ => return None,
    };
    Some(region)
}

/// Geocode every contributor and organization that has a location string but
/// no resolved country yet. Resolution is cached by the raw string, so ten
/// thousand profiles saying "Berlin" cost one geocoder call.
pub async fn enrich_locations(
    store: Arc<dyn RecordStore>,
    geocoder: Arc<dyn Geocoder>,
    shutdown: &Shutdown,
) -> Result<GeocodeStats> {
    let mut stats = GeocodeStats::default();
    let resolved_cache: Arc<Mutex<HashMap<String, Option<GeoResult>>>> =
        Arc::new(Mutex::new(HashMap::new()));

    for kind in [EntityKind::Contributor, EntityKind::Organization] {
        loop {
            if shutdown.is_requested() {
                info!("enrichment interrupted by shutdown");
                return Ok(stats);
            }

            let targets = store.pending_geocode(kind, GEOCODE_BATCH).await?;
            if targets.is_empty() {
                break;
            }

            for target in targets {
                if shutdown.is_requested() {
                    return Ok(stats);
                }
                stats.attempted += 1;

                let Some(cleaned) = preprocess_location(&target.location) else {
                    stats.filtered += 1;
                    store.apply_geocode(&target, None, None).await?;
                    continue;
                };

                let cached = resolved_cache
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .get(&cleaned)
                    .cloned();
                let result = match cached {
                    Some(hit) => {
                        stats.cache_hits += 1;
                        hit
                    }
                    None => {
                        let fresh = match geocoder.resolve(&cleaned).await {
                            Ok(res) => res,
                            Err(err) => {
                                // Geocoding is best-effort; a flaky service
                                // leaves the profile unresolved, not failed.
                                warn!(location = %cleaned, error = %err, "geocoder error");
                                None
                            }
                        };
                        resolved_cache
                            .lock()
                            .unwrap_or_else(|e| e.into_inner())
                            .insert(cleaned.clone(), fresh.clone());
                        fresh
                    }
                };

                match result {
                    Some(geo) => {
                        stats.resolved += 1;
                        debug!(location = %cleaned, country = %geo.country_code, "resolved");
                        store
                            .apply_geocode(&target, Some(&geo.country_code), geo.region.as_deref())
                            .await?;
                    }
                    None => {
                        stats.unresolved += 1;
                        store.apply_geocode(&target, None, None).await?;
                    }
                }
            }
        }
    }

    info!(
        attempted = stats.attempted,
        resolved = stats.resolved,
        unresolved = stats.unresolved,
        filtered = stats.filtered,
        cache_hits = stats.cache_hits,
        "enrichment pass finished"
    );
    Ok(stats)
}
