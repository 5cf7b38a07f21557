//! Single-shot location acquisition over a platform position source.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, OnceCell};
use tokio::time::Instant;

use crate::types::{Coordinate, LocationError};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(10_000);
pub const DEFAULT_MAX_CACHE_AGE: Duration = Duration::from_millis(60_000);

/// Platform device-location capability.
#[async_trait]
pub trait PositionSource: Send + Sync {
    /// Show the platform permission prompt. Called at most once per provider.
    async fn request_permission(&self) -> Result<(), LocationError> {
        Ok(())
    }

    /// Obtain a fresh position fix.
    async fn current_position(&self) -> Result<Coordinate, LocationError>;
}

/// A known position standing in for a device sensor (config or CLI flags).
#[derive(Debug, Clone, Copy)]
pub struct FixedPositionSource {
    coord: Coordinate,
}

impl FixedPositionSource {
    pub fn new(coord: Coordinate) -> Self {
        Self { coord }
    }
}

#[async_trait]
impl PositionSource for FixedPositionSource {
    async fn current_position(&self) -> Result<Coordinate, LocationError> {
        Ok(self.coord)
    }
}

#[derive(Debug, Clone, Copy)]
struct CachedFix {
    coord: Coordinate,
    obtained_at: Instant,
}

/// Wraps a [`PositionSource`] with a timeout, a fix cache and a one-time
/// permission prompt.
pub struct LocationProvider {
    source: Option<Arc<dyn PositionSource>>,
    permission: OnceCell<Result<(), LocationError>>,
    last_fix: Mutex<Option<CachedFix>>,
}

impl LocationProvider {
    pub fn new(source: Arc<dyn PositionSource>) -> Self {
        Self::from_source(Some(source))
    }

    /// A provider for a platform with no location capability.
    pub fn unsupported() -> Self {
        Self::from_source(None)
    }

    pub fn from_source(source: Option<Arc<dyn PositionSource>>) -> Self {
        Self {
            source,
            permission: OnceCell::new(),
            last_fix: Mutex::new(None),
        }
    }

    pub fn is_supported(&self) -> bool {
        self.source.is_some()
    }

    /// Acquire the current position.
    ///
    /// A fix younger than `max_cache_age` is returned without touching the
    /// source. A zero `max_cache_age` always asks for a fresh fix.
    ///
    /// # Errors
    ///
    /// `Unsupported` without a source, `Denied` if the permission prompt was
    /// refused, `Timeout` if no fix arrives within `timeout`.
    pub async fn acquire_location(
        &self,
        timeout: Duration,
        max_cache_age: Duration,
    ) -> Result<Coordinate, LocationError> {
        let source = self.source.as_ref().ok_or(LocationError::Unsupported)?;

        if let Some(fix) = *self.last_fix.lock().await {
            if !max_cache_age.is_zero() && fix.obtained_at.elapsed() <= max_cache_age {
                tracing::debug!(age = ?fix.obtained_at.elapsed(), "Using cached location fix");
                return Ok(fix.coord);
            }
        }

        self.permission
            .get_or_init(|| async {
                tracing::debug!("Requesting location permission");
                source.request_permission().await
            })
            .await
            .clone()?;

        let coord = match tokio::time::timeout(timeout, source.current_position()).await {
            Ok(result) => result?,
            Err(_) => {
                tracing::warn!(timeout_ms = timeout.as_millis() as u64, "Location request timed out");
                return Err(LocationError::Timeout);
            }
        };

        *self.last_fix.lock().await = Some(CachedFix {
            coord,
            obtained_at: Instant::now(),
        });
        tracing::info!(
            latitude = coord.latitude,
            longitude = coord.longitude,
            "Got location fix"
        );
        Ok(coord)
    }
}
