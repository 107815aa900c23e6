//! # Server Catalog Client
//!
//! Fetches and parses the client's geo-IP record plus the two XML
//! server catalogs (throughput servers and quality/ping servers) that
//! the rest of the measurement core ranks and probes. Parsing is
//! attribute-centric and streaming (`quick-xml`) and tolerates unknown
//! attributes — only the mandatory fields are required for a `<server>`
//! element to survive into the catalog.

use quick_xml::events::Event;
use quick_xml::Reader;

use crate::defaults::MIN_SERVER_VERSION;
use crate::error::{NetworkErrorKind, Result, SpeedTestError};
use crate::transport::Transport;

/// The client's own network location, fetched once per run.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientInfo {
    pub ip_address: String,
    pub isp: String,
    pub lat: f64,
    pub lon: f64,
}

/// One entry in a throughput or quality catalog.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerRecord {
    pub url: String,
    pub host: String,
    pub name: String,
    pub country: String,
    pub sponsor: String,
    pub lat: f64,
    pub lon: f64,
    pub id: String,
    /// `host:port` of a companion ping/quality endpoint, present only
    /// in the quality catalog (`linequality` attribute).
    pub quality_endpoint: Option<String>,
}

fn attr_value(tag: &quick_xml::events::BytesStart<'_>, key: &str) -> Option<String> {
    tag.attributes().flatten().find_map(|a| {
        if a.key.as_ref() == key.as_bytes() {
            String::from_utf8(a.value.into_owned()).ok()
        } else {
            None
        }
    })
}

fn parse_client_info(xml: &[u8]) -> Result<ClientInfo> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Empty(tag)) | Ok(Event::Start(tag)) if tag.name().as_ref() == b"client" => {
                let ip_address = attr_value(&tag, "ip")
                    .ok_or_else(|| SpeedTestError::ProtocolError("missing ip attribute".into()))?;
                let isp = attr_value(&tag, "isp").unwrap_or_default();
                let lat: f64 = attr_value(&tag, "lat")
                    .ok_or_else(|| SpeedTestError::ProtocolError("missing lat attribute".into()))?
                    .parse()
                    .map_err(|_| SpeedTestError::ProtocolError("malformed lat attribute".into()))?;
                let lon: f64 = attr_value(&tag, "lon")
                    .ok_or_else(|| SpeedTestError::ProtocolError("missing lon attribute".into()))?
                    .parse()
                    .map_err(|_| SpeedTestError::ProtocolError("malformed lon attribute".into()))?;
                return Ok(ClientInfo {
                    ip_address,
                    isp,
                    lat,
                    lon,
                });
            }
            Ok(Event::Eof) => {
                return Err(SpeedTestError::ProtocolError(
                    "no <client> element found".into(),
                ))
            }
            Err(e) => return Err(SpeedTestError::ProtocolError(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
}

fn parse_server_catalog(xml: &[u8]) -> Result<Vec<ServerRecord>> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut servers = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Empty(tag)) | Ok(Event::Start(tag)) if tag.name().as_ref() == b"server" => {
                let url = attr_value(&tag, "url");
                let lat = attr_value(&tag, "lat").and_then(|s| s.parse().ok());
                let lon = attr_value(&tag, "lon").and_then(|s| s.parse().ok());
                let id = attr_value(&tag, "id");

                // Entries missing mandatory fields are dropped, not errors.
                let (Some(url), Some(lat), Some(lon), Some(id)) = (url, lat, lon, id) else {
                    continue;
                };

                if let Some(version) = attr_value(&tag, "version").and_then(|s| s.parse::<u32>().ok())
                {
                    if version < MIN_SERVER_VERSION {
                        continue;
                    }
                }

                let host = attr_value(&tag, "host").unwrap_or_else(|| host_from_url(&url));
                let name = attr_value(&tag, "name").unwrap_or_default();
                let country = attr_value(&tag, "country").unwrap_or_default();
                let sponsor = attr_value(&tag, "sponsor").unwrap_or_default();
                let quality_endpoint = attr_value(&tag, "linequality");

                servers.push(ServerRecord {
                    url,
                    host,
                    name,
                    country,
                    sponsor,
                    lat,
                    lon,
                    id,
                    quality_endpoint,
                });
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(SpeedTestError::ProtocolError(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    Ok(servers)
}

fn host_from_url(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| {
            let host = u.host_str()?.to_string();
            let port = u.port_or_known_default()?;
            Some(format!("{host}:{port}"))
        })
        .unwrap_or_default()
}

/// Fetches the client's geo-IP record and the throughput/quality
/// catalogs from `speedtest.net`-compatible infrastructure.
pub struct CatalogClient {
    transport: Transport,
    base_url: String,
}

impl CatalogClient {
    pub fn new(transport: Transport, base_url: impl Into<String>) -> Self {
        Self {
            transport,
            base_url: base_url.into(),
        }
    }

    pub async fn fetch_client_info(&self) -> Result<ClientInfo> {
        let url = format!("{}/speedtest-config.php", self.base_url);
        let response = self.transport.get(&url).await?;
        if !response.status.is_success() {
            return Err(SpeedTestError::network(
                url,
                NetworkErrorKind::Protocol(format!("status {}", response.status)),
            ));
        }
        parse_client_info(&response.body)
    }

    /// Tries the primary endpoint and its fallback mirror in order,
    /// returning the first non-empty parsed catalog.
    pub async fn fetch_throughput_catalog(&self) -> Result<Vec<ServerRecord>> {
        let mirrors = [
            format!("{}/speedtest-servers-static.php", self.base_url),
            format!("{}/speedtest-servers.php", self.base_url),
        ];
        self.fetch_first_non_empty(&mirrors).await
    }

    pub async fn fetch_quality_catalog(&self) -> Result<Vec<ServerRecord>> {
        let mirrors = [format!("{}/speedtest-quality-servers.php", self.base_url)];
        self.fetch_first_non_empty(&mirrors).await
    }

    async fn fetch_first_non_empty(&self, mirrors: &[String]) -> Result<Vec<ServerRecord>> {
        let mut last_err = None;
        for url in mirrors {
            match self.transport.get(url).await {
                Ok(response) if response.status.is_success() => {
                    match parse_server_catalog(&response.body) {
                        Ok(servers) if !servers.is_empty() => return Ok(servers),
                        Ok(_) => continue,
                        Err(e) => last_err = Some(e),
                    }
                }
                Ok(response) => {
                    last_err = Some(SpeedTestError::network(
                        url.clone(),
                        NetworkErrorKind::Protocol(format!("status {}", response.status)),
                    ))
                }
                Err(e) => last_err = Some(e),
            }
        }
        // An empty catalog (every mirror returned zero usable entries)
        // is not itself a network error; surface it distinctly so the
        // caller can treat it as a recoverable absence.
        match last_err {
            Some(SpeedTestError::NetworkError { url, source }) => {
                Err(SpeedTestError::NetworkError { url, source })
            }
            _ => Err(SpeedTestError::CatalogEmpty),
        }
    }
}
