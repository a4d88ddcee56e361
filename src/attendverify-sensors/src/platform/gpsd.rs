//! Positioning through a local gpsd daemon.
//!
//! gpsd speaks newline-delimited JSON over TCP. After sending
//! `?WATCH={"enable":true,"json":true};` the daemon streams reports; the
//! ones we care about have `"class":"TPV"` and carry `lat`, `lon` and the
//! estimated horizontal errors `epx`/`epy` in meters.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::SensorError;
use crate::provider::{PositionProvider, PositionWatch};
use crate::types::{GeoPosition, PermissionState};

/// Default gpsd listen address.
pub const DEFAULT_GPSD_ADDR: &str = "127.0.0.1:2947";

/// Accuracy reported when gpsd omits error estimates.
const UNKNOWN_ACCURACY_M: f64 = 9_999.0;

const WATCH_COMMAND: &[u8] = b"?WATCH={\"enable\":true,\"json\":true};\n";

/// A gpsd `TPV` (time-position-velocity) report.
#[derive(Debug, Deserialize)]
struct TpvReport {
    class: String,
    #[serde(default)]
    mode: u8,
    lat: Option<f64>,
    lon: Option<f64>,
    epx: Option<f64>,
    epy: Option<f64>,
}

impl TpvReport {
    /// Convert to a fix if the report carries a 2D or 3D position.
    fn to_fix(&self) -> Option<GeoPosition> {
        if self.class != "TPV" || self.mode < 2 {
            return None;
        }
        let (lat, lng) = (self.lat?, self.lon?);
        let accuracy = match (self.epx, self.epy) {
            (Some(x), Some(y)) => x.max(y),
            (Some(e), None) | (None, Some(e)) => e,
            (None, None) => UNKNOWN_ACCURACY_M,
        };
        Some(GeoPosition::new(lat, lng, accuracy))
    }
}

/// Parse one line of gpsd output into a fix, ignoring other report classes.
fn parse_report(line: &str) -> Option<GeoPosition> {
    match serde_json::from_str::<TpvReport>(line) {
        Ok(report) => report.to_fix(),
        Err(e) => {
            debug!(error = %e, "gpsd: skipping unparsable report");
            None
        },
    }
}

/// Position provider reading fixes from gpsd.
#[derive(Debug, Clone)]
pub struct GpsdPositionProvider {
    addr: String,
    connect_timeout: Duration,
}

impl GpsdPositionProvider {
    /// Create a provider for the daemon at `addr` (host:port).
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            connect_timeout: Duration::from_secs(2),
        }
    }

    /// Whether a daemon is listening at the configured address.
    pub async fn probe(&self) -> bool {
        matches!(
            tokio::time::timeout(self.connect_timeout, TcpStream::connect(&self.addr)).await,
            Ok(Ok(_))
        )
    }

    async fn open(&self) -> Result<BufReader<TcpStream>, SensorError> {
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&self.addr))
            .await
            .map_err(|_| SensorError::HardwareNotAvailable {
                reason: format!("gpsd at {} did not answer", self.addr),
            })?
            .map_err(|e| SensorError::HardwareNotAvailable {
                reason: format!("gpsd at {} unreachable: {}", self.addr, e),
            })?;
        let mut reader = BufReader::new(stream);
        reader.get_mut().write_all(WATCH_COMMAND).await?;
        Ok(reader)
    }
}

impl Default for GpsdPositionProvider {
    fn default() -> Self {
        Self::new(DEFAULT_GPSD_ADDR)
    }
}

#[async_trait]
impl PositionProvider for GpsdPositionProvider {
    fn is_supported(&self) -> bool {
        true
    }

    async fn request_permission(&self) -> Result<PermissionState, SensorError> {
        // Access to gpsd is governed by who can reach the socket.
        self.open().await.map(|_| PermissionState::Granted)
    }

    async fn current_position(&self) -> Result<GeoPosition, SensorError> {
        let mut reader = self.open().await?;
        let mut line = String::new();
        loop {
            line.clear();
            if reader.read_line(&mut line).await? == 0 {
                return Err(SensorError::PositionUnavailable {
                    reason: "gpsd closed the connection before a fix".into(),
                });
            }
            if let Some(fix) = parse_report(line.trim()) {
                debug!(lat = fix.lat, lng = fix.lng, accuracy = fix.accuracy, "gpsd: fix");
                return Ok(fix);
            }
        }
    }

    async fn watch(&self) -> Result<PositionWatch, SensorError> {
        let mut reader = self.open().await?;
        let (tx, rx) = mpsc::channel(16);
        let addr = self.addr.clone();
        info!(addr = %addr, "gpsd: watch started");

        tokio::spawn(async move {
            let mut line = String::new();
            loop {
                line.clear();
                match reader.read_line(&mut line).await {
                    Ok(0) => {
                        warn!(addr = %addr, "gpsd: connection closed, watch ended");
                        break;
                    },
                    Ok(_) => {
                        if let Some(fix) = parse_report(line.trim()) {
                            if tx.send(fix).await.is_err() {
                                debug!("gpsd: watch receiver dropped");
                                break;
                            }
                        }
                    },
                    Err(e) => {
                        warn!(addr = %addr, error = %e, "gpsd: read failed, watch ended");
                        break;
                    },
                }
            }
        });

        Ok(PositionWatch::new(rx))
    }
}
