use crate::config::SETTING_KEYS;
use crate::models::Candle;
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Duration, TimeZone, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

const MARKET_DATA_SNAPSHOT_VERSION: u32 = 1;
/// Unix timestamps above this are taken as milliseconds.
const MILLISECOND_THRESHOLD: i64 = 100_000_000_000;

#[derive(Serialize, Deserialize)]
struct MarketDataSnapshot {
    version: u32,
    generated_at: DateTime<Utc>,
    symbol: String,
    timeframe: String,
    candles: Vec<Candle>,
    #[serde(default)]
    settings: HashMap<String, String>,
}

#[derive(Deserialize)]
struct CsvCandleRow {
    timestamp: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    #[serde(default)]
    volume: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum DataFormat {
    Json,
    Csv,
    Snapshot,
}

impl DataFormat {
    fn from_path(path: &Path) -> Self {
        match path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
            .as_deref()
        {
            Some("json") => DataFormat::Json,
            Some("csv") => DataFormat::Csv,
            _ => DataFormat::Snapshot,
        }
    }
}

/// Snapshots record their own timeframe; plain candle files do not.
pub fn carries_timeframe(path: &Path) -> bool {
    DataFormat::from_path(path) == DataFormat::Snapshot
}

fn scrub_snapshot_settings(settings: &HashMap<String, String>) -> HashMap<String, String> {
    settings
        .iter()
        .filter(|(key, _)| SETTING_KEYS.contains(&key.as_str()))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Ok(parsed.with_timezone(&Utc));
    }
    let value: i64 = raw
        .parse()
        .map_err(|_| anyhow!("Unrecognized candle timestamp: {}", raw))?;
    let parsed = if value.abs() > MILLISECOND_THRESHOLD {
        Utc.timestamp_millis_opt(value).single()
    } else {
        Utc.timestamp_opt(value, 0).single()
    };
    parsed.ok_or_else(|| anyhow!("Candle timestamp out of range: {}", raw))
}

/// Bars must be finite and strictly increasing in time.
pub fn validate_candles(candles: &[Candle]) -> Result<()> {
    for (index, candle) in candles.iter().enumerate() {
        if !candle.is_finite() {
            return Err(anyhow!(
                "Candle {} at {} has a non-finite price",
                index,
                candle.timestamp
            ));
        }
        if candle.high < candle.low {
            return Err(anyhow!(
                "Candle {} at {} has high {} below low {}",
                index,
                candle.timestamp,
                candle.high,
                candle.low
            ));
        }
        if index > 0 && candle.timestamp <= candles[index - 1].timestamp {
            return Err(anyhow!(
                "Candles are not time-ordered: {} follows {} at index {}",
                candle.timestamp,
                candles[index - 1].timestamp,
                index
            ));
        }
    }
    Ok(())
}

/// One instrument's candle series plus any settings shipped with it.
#[derive(Clone)]
pub struct MarketData {
    symbol: String,
    timeframe: String,
    candles: Arc<Vec<Candle>>,
    settings: Arc<HashMap<String, String>>,
}

impl MarketData {
    pub fn new(
        symbol: impl Into<String>,
        timeframe: impl Into<String>,
        candles: Vec<Candle>,
    ) -> Result<Self> {
        validate_candles(&candles)?;
        Ok(Self {
            symbol: symbol.into(),
            timeframe: timeframe.into(),
            candles: Arc::new(candles),
            settings: Arc::new(HashMap::new()),
        })
    }

    /// JSON candle arrays, CSV files and bincode snapshots, picked by file
    /// extension. Plain candle files take symbol and timeframe from the caller.
    pub fn load_from_file<P: AsRef<Path>>(
        path: P,
        symbol: &str,
        timeframe: &str,
    ) -> Result<Self> {
        let path = path.as_ref();
        let data = match DataFormat::from_path(path) {
            DataFormat::Json => Self::new(symbol, timeframe, read_json_candles(path)?)?,
            DataFormat::Csv => Self::new(symbol, timeframe, read_csv_candles(path)?)?,
            DataFormat::Snapshot => Self::load_snapshot(path)?,
        };
        info!(
            "Loaded {} {} candles for {} from {}",
            data.candles.len(),
            data.timeframe,
            data.symbol,
            path.display()
        );
        Ok(data)
    }

    fn load_snapshot(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| {
            format!("Failed to open market data snapshot at {}", path.display())
        })?;
        let reader = BufReader::new(file);
        let snapshot: MarketDataSnapshot =
            bincode::deserialize_from(reader).context("Snapshot decode failed")?;

        if snapshot.version != MARKET_DATA_SNAPSHOT_VERSION {
            return Err(anyhow!(
                "Market data snapshot version mismatch (found {}, expected {})",
                snapshot.version,
                MARKET_DATA_SNAPSHOT_VERSION
            ));
        }
        validate_candles(&snapshot.candles)?;

        Ok(Self {
            symbol: snapshot.symbol,
            timeframe: snapshot.timeframe,
            candles: Arc::new(snapshot.candles),
            settings: Arc::new(scrub_snapshot_settings(&snapshot.settings)),
        })
    }

    pub fn save_snapshot<P: AsRef<Path>>(
        &self,
        path: P,
        settings: &HashMap<String, String>,
    ) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create snapshot directory {}", parent.display())
                })?;
            }
        }

        let file = File::create(path).with_context(|| {
            format!(
                "Unable to create market data snapshot at {}",
                path.display()
            )
        })?;
        let mut writer = BufWriter::new(file);
        let snapshot = MarketDataSnapshot {
            version: MARKET_DATA_SNAPSHOT_VERSION,
            generated_at: Utc::now(),
            symbol: self.symbol.clone(),
            timeframe: self.timeframe.clone(),
            candles: self.candles.as_ref().clone(),
            settings: scrub_snapshot_settings(settings),
        };
        bincode::serialize_into(&mut writer, &snapshot)
            .context("Failed to serialize market data snapshot")?;
        writer
            .flush()
            .context("Failed to flush market data snapshot to disk")?;
        Ok(())
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn timeframe(&self) -> &str {
        &self.timeframe
    }

    pub fn candles(&self) -> &[Candle] {
        &self.candles
    }

    pub fn candles_arc(&self) -> Arc<Vec<Candle>> {
        Arc::clone(&self.candles)
    }

    pub fn settings(&self) -> &HashMap<String, String> {
        &self.settings
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    /// Keeps bars within `days` of the newest bar.
    pub fn restrict_to_lookback_days(self, days: usize) -> Self {
        let Some(last) = self.candles.last() else {
            return self;
        };
        let cutoff = last.timestamp - Duration::days(days as i64);
        let kept: Vec<Candle> = self
            .candles
            .iter()
            .filter(|c| c.timestamp >= cutoff)
            .cloned()
            .collect();
        if kept.len() < self.candles.len() {
            info!(
                "Lookback of {} days keeps {} of {} candles",
                days,
                kept.len(),
                self.candles.len()
            );
        }
        Self {
            candles: Arc::new(kept),
            ..self
        }
    }
}

fn read_json_candles(path: &Path) -> Result<Vec<Candle>> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open candle file {}", path.display()))?;
    serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("Failed to parse candle JSON in {}", path.display()))
}

fn read_csv_candles(path: &Path) -> Result<Vec<Candle>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("Failed to open candle CSV {}", path.display()))?;

    let mut candles = Vec::new();
    for (line, row) in reader.deserialize::<CsvCandleRow>().enumerate() {
        let row = row.with_context(|| format!("Invalid candle row {} in {}", line + 2, path.display()))?;
        candles.push(Candle {
            timestamp: parse_timestamp(&row.timestamp)
                .with_context(|| format!("Invalid candle row {} in {}", line + 2, path.display()))?,
            open: row.open,
            high: row.high,
            low: row.low,
            close: row.close,
            volume: row.volume,
        });
    }
    Ok(candles)
}

/// `KEY=VALUE` lines; blank lines and `#` comments are ignored.
pub fn parse_settings_text(text: &str) -> Result<HashMap<String, String>> {
    let mut settings = HashMap::new();
    for (number, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let (key, value) = line
            .split_once('=')
            .ok_or_else(|| anyhow!("Settings line {} must look like KEY=VALUE: {}", number + 1, line))?;
        let key = key.trim().to_ascii_uppercase();
        if !SETTING_KEYS.contains(&key.as_str()) {
            warn!("Ignoring unknown setting {} on line {}", key, number + 1);
            continue;
        }
        let value = value.trim().trim_matches('"').to_string();
        settings.insert(key, value);
    }
    Ok(settings)
}

pub fn load_settings_file<P: AsRef<Path>>(path: P) -> Result<HashMap<String, String>> {
    let path = path.as_ref();
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read settings file {}", path.display()))?;
    parse_settings_text(&text)
}

/// Layers settings with later sources winning: snapshot, then the settings
/// file, then whatever `lookup` returns for each known key.
pub fn merge_settings<F>(
    snapshot: &HashMap<String, String>,
    file: Option<&HashMap<String, String>>,
    lookup: F,
) -> HashMap<String, String>
where
    F: Fn(&str) -> Option<String>,
{
    let mut merged = scrub_snapshot_settings(snapshot);
    if let Some(file) = file {
        merged.extend(file.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
    for key in SETTING_KEYS {
        if let Some(value) = lookup(key) {
            merged.insert(key.to_string(), value);
        }
    }
    merged
}

pub fn env_setting(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("tradesim-{}-{}", uuid::Uuid::new_v4(), name))
    }

    fn candle(hour: i64, close: f64) -> Candle {
        Candle {
            timestamp: Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap() + Duration::hours(hour),
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: 100.0,
        }
    }

    #[test]
    fn csv_accepts_rfc3339_and_unix_timestamps() {
        let path = temp_path("candles.csv");
        fs::write(
            &path,
            "timestamp,open,high,low,close,volume\n\
             2024-02-01T00:00:00Z,100,101,99,100.5,10\n\
             1706749200,100.5,102,100,101,12\n\
             1706752800000,101,103,100.5,102,15\n",
        )
        .unwrap();
        let data =
            MarketData::load_from_file(&path, "ETHUSDT", "1h").unwrap();
        fs::remove_file(&path).ok();

        assert_eq!(data.len(), 3);
        assert_eq!(data.symbol(), "ETHUSDT");
        assert_eq!(data.candles()[1].timestamp, candle(1, 0.0).timestamp);
        assert_eq!(data.candles()[2].timestamp, candle(2, 0.0).timestamp);
        assert!((data.candles()[2].volume - 15.0).abs() < 1e-12);
    }

    #[test]
    fn unordered_candles_are_rejected() {
        let err = MarketData::new("X", "1h", vec![candle(2, 100.0), candle(1, 100.0)])
            .err()
            .unwrap();
        assert!(err.to_string().contains("not time-ordered"));

        let mut bad = candle(3, 100.0);
        bad.close = f64::NAN;
        assert!(MarketData::new("X", "1h", vec![bad]).is_err());
    }

    #[test]
    fn snapshot_round_trip_keeps_known_settings() {
        let path = temp_path("snapshot.bin");
        let data = MarketData::new("BTCUSDT", "4h", vec![candle(0, 100.0), candle(4, 101.0)]).unwrap();
        let mut settings = HashMap::new();
        settings.insert("RISK_PERCENT".to_string(), "1.5".to_string());
        settings.insert("API_SECRET".to_string(), "hidden".to_string());
        data.save_snapshot(&path, &settings).unwrap();

        let loaded =
            MarketData::load_from_file(&path, "ignored", "1m").unwrap();
        fs::remove_file(&path).ok();
        assert_eq!(loaded.symbol(), "BTCUSDT");
        assert_eq!(loaded.timeframe(), "4h");
        assert_eq!(loaded.candles(), data.candles());
        assert_eq!(loaded.settings().get("RISK_PERCENT").map(String::as_str), Some("1.5"));
        assert!(!loaded.settings().contains_key("API_SECRET"));
    }

    #[test]
    fn lookback_trims_old_bars() {
        let candles: Vec<Candle> = (0..72).map(|h| candle(h, 100.0)).collect();
        let data = MarketData::new("X", "1h", candles).unwrap();
        let trimmed = data.restrict_to_lookback_days(1);
        assert_eq!(trimmed.len(), 25);
        assert_eq!(trimmed.candles()[0].timestamp, candle(47, 0.0).timestamp);
    }

    #[test]
    fn settings_layers_prefer_environment() {
        let parsed = parse_settings_text(
            "# comment\nRISK_PERCENT = 1.0\nMIN_WINDOW=40\nUNKNOWN=1\n\nSYMBOL=\"SOLUSDT\"\n",
        )
        .unwrap();
        assert_eq!(parsed.len(), 3);
        assert_eq!(parsed.get("SYMBOL").map(String::as_str), Some("SOLUSDT"));

        let mut snapshot = HashMap::new();
        snapshot.insert("MIN_WINDOW".to_string(), "30".to_string());
        snapshot.insert("FEE_PERCENT".to_string(), "0.05".to_string());
        let merged = merge_settings(&snapshot, Some(&parsed), |key| {
            (key == "RISK_PERCENT").then(|| "2.5".to_string())
        });
        assert_eq!(merged.get("RISK_PERCENT").map(String::as_str), Some("2.5"));
        assert_eq!(merged.get("MIN_WINDOW").map(String::as_str), Some("40"));
        assert_eq!(merged.get("FEE_PERCENT").map(String::as_str), Some("0.05"));

        assert!(parse_settings_text("NOT A SETTING").is_err());
    }
}
