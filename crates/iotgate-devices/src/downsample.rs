//! Fixed-window downsampling of stored readings.
//!
//! The series is recomputed from the reading store on every query. A window
//! of `W` seconds sliced every `S` seconds yields `ceil(W / S)` slots, oldest
//! first, the last one at `now`. Each reading counts toward the nearest slot
//! if it lies within half a slot of it (ties go to the earlier slot). A slot
//! value is the mean of its readings rounded to two decimals, or `0` when no
//! reading fell into it.

use std::sync::Arc;

use iotgate_core::config::DownsampleConfig;
use iotgate_core::Channel;
use iotgate_storage::{ReadingStore, SensorReading};
use serde::{Deserialize, Serialize};

use crate::error::{DeviceError, Result};

/// One slot of a downsampled series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeSlot {
    /// Slot instant in milliseconds.
    pub timestamp: i64,
    pub value: f64,
}

/// Downsampled series for every channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecentWindow {
    pub temperature: Vec<TimeSlot>,
    pub humidity: Vec<TimeSlot>,
    pub light: Vec<TimeSlot>,
}

impl RecentWindow {
    pub fn series(&self, channel: Channel) -> &[TimeSlot] {
        match channel {
            Channel::Temperature => &self.temperature,
            Channel::Humidity => &self.humidity,
            Channel::Light => &self.light,
        }
    }
}

pub struct Downsampler {
    readings: Arc<dyn ReadingStore>,
    defaults: DownsampleConfig,
}

impl Downsampler {
    pub fn new(readings: Arc<dyn ReadingStore>, defaults: DownsampleConfig) -> Self {
        Self { readings, defaults }
    }

    /// Window ending now, with the configured window and slot sizes.
    pub async fn recent(&self) -> Result<RecentWindow> {
        self.recent_window(self.defaults.window_secs, self.defaults.slot_secs)
            .await
    }

    /// Window ending now.
    pub async fn recent_window(&self, window_secs: u64, slot_secs: u64) -> Result<RecentWindow> {
        self.recent_window_at(iotgate_core::now_millis(), window_secs, slot_secs)
            .await
    }

    /// Window ending at `now` (milliseconds).
    pub async fn recent_window_at(
        &self,
        now: i64,
        window_secs: u64,
        slot_secs: u64,
    ) -> Result<RecentWindow> {
        let (window_ms, slot_ms) = window_bounds(window_secs, slot_secs)?;
        let start = now - window_ms;

        let mut series = Vec::with_capacity(Channel::ALL.len());
        for channel in Channel::ALL {
            let readings = self.readings.query_range(channel, start, now).await?;
            series.push(slot_series(&readings, now, window_ms, slot_ms));
        }

        let mut series = series.into_iter();
        Ok(RecentWindow {
            temperature: series.next().unwrap_or_default(),
            humidity: series.next().unwrap_or_default(),
            light: series.next().unwrap_or_default(),
        })
    }
}

fn window_bounds(window_secs: u64, slot_secs: u64) -> Result<(i64, i64)> {
    if window_secs == 0 || slot_secs == 0 {
        return Err(DeviceError::InvalidParameter(format!(
            "window ({}s) and slot ({}s) must be positive",
            window_secs, slot_secs
        )));
    }
    let to_ms = |secs: u64| {
        i64::try_from(secs)
            .ok()
            .and_then(|s| s.checked_mul(1_000))
            .ok_or_else(|| DeviceError::InvalidParameter(format!("{}s is out of range", secs)))
    };
    Ok((to_ms(window_secs)?, to_ms(slot_secs)?))
}

/// Number of slots for a window.
pub fn slot_count(window_ms: i64, slot_ms: i64) -> usize {
    if window_ms <= 0 || slot_ms <= 0 {
        return 0;
    }
    ((window_ms + slot_ms - 1) / slot_ms) as usize
}

/// Build one channel's series from its readings.
pub fn slot_series(readings: &[SensorReading], now: i64, window_ms: i64, slot_ms: i64) -> Vec<TimeSlot> {
    let n = slot_count(window_ms, slot_ms);
    if n == 0 {
        return Vec::new();
    }
    let first = now - (n as i64 - 1) * slot_ms;

    let mut sums = vec![(0.0f64, 0u32); n];
    for reading in readings {
        if let Some(idx) = nearest_slot(reading.timestamp, first, slot_ms, n) {
            sums[idx].0 += reading.value;
            sums[idx].1 += 1;
        }
    }

    sums.iter()
        .enumerate()
        .map(|(i, &(sum, count))| TimeSlot {
            timestamp: first + i as i64 * slot_ms,
            value: if count == 0 {
                0.0
            } else {
                round2(sum / count as f64)
            },
        })
        .collect()
}

fn nearest_slot(timestamp: i64, first: i64, slot_ms: i64, n: usize) -> Option<usize> {
    let lower = (timestamp - first).div_euclid(slot_ms);
    let mut best: Option<(i64, i64)> = None;

    // Earlier candidate first so an exact tie keeps it.
    for idx in [lower, lower + 1] {
        if idx < 0 || idx >= n as i64 {
            continue;
        }
        let distance = (timestamp - (first + idx * slot_ms)).abs();
        if distance * 2 > slot_ms {
            continue;
        }
        match best {
            Some((_, best_distance)) if best_distance <= distance => {}
            _ => best = Some((idx, distance)),
        }
    }
    best.map(|(idx, _)| idx as usize)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reading(timestamp: i64, value: f64) -> SensorReading {
        SensorReading {
            id: 0,
            sensor_id: 1,
            channel: Channel::Temperature,
            unit: "°C".to_string(),
            value,
            timestamp,
        }
    }

    #[test]
    fn test_slot_count() {
        assert_eq!(slot_count(300_000, 2_000), 150);
        assert_eq!(slot_count(10_000, 3_000), 4);
        assert_eq!(slot_count(1_000, 5_000), 1);
    }

    #[test]
    fn test_series_ends_at_now() {
        let series = slot_series(&[], 1_000_000, 10_000, 2_000);
        assert_eq!(series.len(), 5);
        assert_eq!(series[0].timestamp, 992_000);
        assert_eq!(series[4].timestamp, 1_000_000);
        assert!(series.iter().all(|s| s.value == 0.0));
    }

    #[test]
    fn test_mean_is_rounded() {
        let now = 100_000;
        let readings = [reading(now, 1.0), reading(now - 500, 2.0), reading(now - 900, 2.0)];
        let series = slot_series(&readings, now, 10_000, 2_000);
        assert_eq!(series[4].value, 1.67);
    }

    #[test]
    fn test_tie_goes_to_earlier_slot() {
        let now = 100_000;
        // Exactly between the last two slots.
        let series = slot_series(&[reading(now - 1_000, 8.0)], now, 10_000, 2_000);
        assert_eq!(series[3].value, 8.0);
        assert_eq!(series[4].value, 0.0);
    }

    #[test]
    fn test_reading_outside_half_slot_is_excluded() {
        let now = 100_000;
        // 4 slots of 3s, the first one 9s before now.
        let series = slot_series(&[reading(now - 10_600, 4.0)], now, 10_000, 3_000);
        assert!(series.iter().all(|s| s.value == 0.0));

        let series = slot_series(&[reading(now - 10_500, 4.0)], now, 10_000, 3_000);
        assert_eq!(series[0].value, 4.0);
    }

    #[test]
    fn test_zero_parameters_rejected() {
        assert!(matches!(window_bounds(0, 2), Err(DeviceError::InvalidParameter(_))));
        assert!(matches!(window_bounds(300, 0), Err(DeviceError::InvalidParameter(_))));
        assert_eq!(window_bounds(300, 2).unwrap(), (300_000, 2_000));
    }
}
