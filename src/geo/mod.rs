//! Client address → country code resolution.

use ipnet::IpNet;
use maxminddb::PathElement;
use std::collections::HashMap;
use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

/// Country recorded when an address cannot be resolved.
pub const UNKNOWN_COUNTRY: &str = "Unknown";

/// Ranges that never appear in a country database: loopback, private,
/// shared, link-local, documentation, multicast and reserved space.
const NON_PUBLIC_RANGES: &[&str] = &[
    "0.0.0.0/8",
    "10.0.0.0/8",
    "100.64.0.0/10",
    "127.0.0.0/8",
    "169.254.0.0/16",
    "172.16.0.0/12",
    "192.0.0.0/24",
    "192.0.2.0/24",
    "192.168.0.0/16",
    "198.18.0.0/15",
    "198.51.100.0/24",
    "203.0.113.0/24",
    "224.0.0.0/4",
    "240.0.0.0/4",
    "::/128",
    "::1/128",
    "2001:db8::/32",
    "fc00::/7",
    "fe80::/10",
    "ff00::/8",
];

#[derive(Debug, Error)]
pub enum GeoError {
    #[error("failed to open country database '{path}': {source}")]
    Open {
        path: String,
        #[source]
        source: maxminddb::MaxMindDbError,
    },
}

/// A country-level lookup dataset.
pub trait CountryLookup: Send + Sync {
    /// ISO country code for a public address, or None on a miss.
    fn country_code(&self, ip: IpAddr) -> Option<String>;
}

/// MaxMind (`.mmdb`) country database loaded into memory.
pub struct MaxMindCountryLookup {
    reader: maxminddb::Reader<Vec<u8>>,
}

impl MaxMindCountryLookup {
    pub fn open(path: &Path) -> Result<Self, GeoError> {
        let reader = maxminddb::Reader::open_readfile(path).map_err(|source| GeoError::Open {
            path: path.display().to_string(),
            source,
        })?;
        Ok(Self { reader })
    }
}

impl CountryLookup for MaxMindCountryLookup {
    fn country_code(&self, ip: IpAddr) -> Option<String> {
        let lookup = self.reader.lookup(ip).ok()?;
        lookup
            .decode_path::<String>(&[PathElement::Key("country"), PathElement::Key("iso_code")])
            .ok()
            .flatten()
    }
}

/// Open the configured database. A missing path or a database that fails to
/// open disables lookups; every address then resolves to "Unknown".
pub fn open_country_lookup(path: Option<&Path>) -> Option<Arc<dyn CountryLookup>> {
    let Some(path) = path else {
        tracing::warn!("No country database configured, geo lookup disabled");
        return None;
    };

    match MaxMindCountryLookup::open(path) {
        Ok(lookup) => {
            tracing::info!(path = %path.display(), "Country database loaded");
            Some(Arc::new(lookup))
        }
        Err(e) => {
            tracing::error!(error = %e, "Geo lookup disabled");
            None
        }
    }
}

/// Resolves addresses for one collection run, caching every answer.
pub struct GeoResolver {
    lookup: Option<Arc<dyn CountryLookup>>,
    non_public: Vec<IpNet>,
    cache: HashMap<String, String>,
    cache_hits: u64,
}

impl GeoResolver {
    pub fn new(lookup: Option<Arc<dyn CountryLookup>>) -> Self {
        let non_public = NON_PUBLIC_RANGES
            .iter()
            .filter_map(|net| net.parse::<IpNet>().ok())
            .collect();

        Self {
            lookup,
            non_public,
            cache: HashMap::new(),
            cache_hits: 0,
        }
    }

    /// Country code for `address`, or "Unknown". Never fails.
    pub fn resolve(&mut self, address: &str) -> String {
        if let Some(country) = self.cache.get(address) {
            self.cache_hits += 1;
            return country.clone();
        }

        let country = self.lookup_uncached(address);
        self.cache.insert(address.to_string(), country.clone());
        country
    }

    fn lookup_uncached(&self, address: &str) -> String {
        let Some(lookup) = &self.lookup else {
            return UNKNOWN_COUNTRY.to_string();
        };

        let ip = match address
            .trim_matches(|c| c == '[' || c == ']')
            .parse::<IpAddr>()
        {
            Ok(ip) => ip.to_canonical(),
            Err(_) => return UNKNOWN_COUNTRY.to_string(),
        };

        if self.is_non_public(ip) {
            return UNKNOWN_COUNTRY.to_string();
        }

        lookup
            .country_code(ip)
            .unwrap_or_else(|| UNKNOWN_COUNTRY.to_string())
    }

    fn is_non_public(&self, ip: IpAddr) -> bool {
        self.non_public.iter().any(|net| net.contains(&ip))
    }

    /// Number of distinct addresses resolved so far.
    pub fn cached_addresses(&self) -> usize {
        self.cache.len()
    }

    pub fn cache_hits(&self) -> u64 {
        self.cache_hits
    }
}
