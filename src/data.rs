//! Price series provider.
//!
//! Produces deterministic daily bars for `(symbol, date)` pairs, either from
//! per-symbol CSV files (real-data mode) or from a seeded synthetic
//! generator. Synthetic closes are chained day over day so history windows
//! form continuous series rather than independent draws. Every bar is cached
//! under its `(date, code)` key; the cache always wins over regeneration.

use anyhow::{Context, Result};
use chrono::{Duration, NaiveDate};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::stress::Perturbation;
use crate::types::{PriceBar, Symbol};

/// Daily change band for synthetic prices, in percent
const DAILY_CHANGE_BAND: f64 = 4.5;

/// Synthetic prices never fall below this floor
const PRICE_FLOOR: Decimal = dec!(5.0);

/// A scripted news event: an additive percentage impact on the daily change
/// of one symbol for `days` consecutive dates starting at `start`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceEvent {
    pub code: Symbol,
    pub start: NaiveDate,
    pub days: u32,
    pub impact_pct: f64,
}

impl PriceEvent {
    fn covers(&self, code: &Symbol, date: NaiveDate) -> bool {
        if self.code != *code || self.days == 0 {
            return false;
        }
        let end = self.start + Duration::days(self.days as i64 - 1);
        self.start <= date && date <= end
    }
}

/// Where bars come from before the synthetic generator kicks in
#[derive(Debug, Clone)]
pub enum DataSource {
    /// Seeded synthetic generation only
    Synthetic,
    /// Per-symbol daily CSV files (`{code}.csv`) in a directory, with
    /// synthetic fallback on read/parse failure
    CsvDir(PathBuf),
}

type CacheMap = HashMap<(NaiveDate, Symbol), PriceBar>;

pub struct PriceSeriesProvider {
    source: DataSource,
    events: Vec<PriceEvent>,
    stress: Option<Box<dyn Perturbation>>,
    cache: Mutex<CacheMap>,
    /// Full CSV series per symbol, parsed once and kept sorted by date
    series: Mutex<HashMap<Symbol, Vec<PriceBar>>>,
    cache_file: Option<PathBuf>,
    events_file: Option<PathBuf>,
    stock_list: BTreeMap<Symbol, String>,
    /// Upper bound for real-data requests; injected for testability
    today: NaiveDate,
}

impl PriceSeriesProvider {
    pub fn synthetic() -> Self {
        Self::with_source(DataSource::Synthetic)
    }

    pub fn from_csv_dir(dir: impl AsRef<Path>) -> Self {
        Self::with_source(DataSource::CsvDir(dir.as_ref().to_path_buf()))
    }

    fn with_source(source: DataSource) -> Self {
        PriceSeriesProvider {
            source,
            events: Vec::new(),
            stress: None,
            cache: Mutex::new(HashMap::new()),
            series: Mutex::new(HashMap::new()),
            cache_file: None,
            events_file: None,
            stock_list: default_stock_list(),
            today: chrono::Local::now().date_naive(),
        }
    }

    pub fn with_stress(mut self, model: Box<dyn Perturbation>) -> Self {
        self.stress = Some(model);
        self
    }

    pub fn with_stock_list(mut self, list: BTreeMap<Symbol, String>) -> Self {
        self.stock_list = list;
        self
    }

    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = today;
        self
    }

    /// Attach a JSON cache file; existing contents are loaded eagerly and
    /// every new bar is written back.
    pub fn with_cache_file(mut self, path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        if path.exists() {
            match load_cache_file(&path) {
                Ok(cache) => {
                    *self.lock_cache() = cache;
                }
                Err(err) => warn!("failed to load price cache {}: {err:#}", path.display()),
            }
        }
        self.cache_file = Some(path);
        self
    }

    /// Attach a JSON events file; existing events are loaded eagerly and
    /// `add_event` writes the list back.
    pub fn with_events_file(mut self, path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        if path.exists() {
            match load_events_file(&path) {
                Ok(events) => self.events = events,
                Err(err) => warn!("failed to load events {}: {err:#}", path.display()),
            }
        }
        self.events_file = Some(path);
        self
    }

    pub fn stock_list(&self) -> &BTreeMap<Symbol, String> {
        &self.stock_list
    }

    pub fn stock_name(&self, code: &Symbol) -> String {
        self.stock_list
            .get(code)
            .cloned()
            .unwrap_or_else(|| code.as_str().to_string())
    }

    pub fn events(&self) -> &[PriceEvent] {
        &self.events
    }

    /// Register a news event and invalidate any cached bars it affects so
    /// the impact takes effect immediately.
    pub fn add_event(&mut self, event: PriceEvent) {
        if event.days == 0 {
            warn!(code = %event.code, "ignoring event with zero duration");
            return;
        }
        {
            let mut cache = self.lock_cache();
            for i in 0..event.days {
                let d = event.start + Duration::days(i as i64);
                cache.remove(&(d, event.code.clone()));
            }
            self.persist_cache(&cache);
        }
        self.events.push(event);
        if let Some(path) = &self.events_file {
            if let Err(err) = write_json(path, &self.events) {
                warn!("failed to save events {}: {err:#}", path.display());
            }
        }
    }

    // ------------------------------------------------------------------
    // Bar access
    // ------------------------------------------------------------------

    /// Daily bar for `(code, date)`, from cache, real data, or the
    /// synthetic generator. None means the data is genuinely unavailable
    /// (real mode only: future dates or dates before the series begins).
    pub fn get_bar(&self, code: &Symbol, date: NaiveDate) -> Option<PriceBar> {
        let key = (date, code.clone());
        let mut cache = self.lock_cache();
        if let Some(bar) = cache.get(&key) {
            return Some(bar.clone());
        }

        let bar = match &self.source {
            DataSource::CsvDir(dir) => {
                if date > self.today {
                    debug!(code = %code, %date, "rejecting request after today");
                    return None;
                }
                match self.real_bar(dir, code, date) {
                    Ok(found) => found?,
                    Err(err) => {
                        warn!(code = %code, %date, "real data unavailable, using synthetic: {err:#}");
                        self.synth_bar(&cache, code, date)
                    }
                }
            }
            DataSource::Synthetic => self.synth_bar(&cache, code, date),
        };

        cache.insert(key, bar.clone());
        self.persist_cache(&cache);
        Some(bar)
    }

    /// Ordered history window of `window_days` calendar days ending at
    /// `end_date` inclusive, generated oldest-first so each synthetic
    /// close chains off the previous day's.
    pub fn get_history(
        &self,
        code: &Symbol,
        end_date: NaiveDate,
        window_days: u32,
    ) -> Option<Vec<PriceBar>> {
        let mut bars = Vec::with_capacity(window_days as usize);
        for i in (0..window_days as i64).rev() {
            let d = end_date - Duration::days(i);
            if let Some(bar) = self.get_bar(code, d) {
                bars.push(bar);
            }
        }
        if bars.is_empty() {
            None
        } else {
            Some(bars)
        }
    }

    // ------------------------------------------------------------------
    // Synthetic generation
    // ------------------------------------------------------------------

    fn synth_bar(&self, cache: &CacheMap, code: &Symbol, date: NaiveDate) -> PriceBar {
        // Chain off the previous day's close when we have one; otherwise
        // anchor at the symbol's base price.
        let reference = date
            .pred_opt()
            .and_then(|prev| cache.get(&(prev, code.clone())))
            .map(|bar| bar.close)
            .unwrap_or_else(|| base_price(code));

        let mut rng = rng_for(code, date, "quote");
        let mut change_pct = round2_f64(rng.gen_range(-DAILY_CHANGE_BAND..=DAILY_CHANGE_BAND));
        for event in &self.events {
            if event.covers(code, date) {
                change_pct += event.impact_pct;
            }
        }
        if let Some(stress) = &self.stress {
            let mut srng = rng_for(code, date, "stress");
            let (adjusted, occurred) = stress.perturb(change_pct, &mut srng);
            if occurred {
                debug!(code = %code, %date, base = change_pct, adjusted, "stress shock applied");
            }
            change_pct = adjusted;
        }

        let factor = Decimal::ONE + dec_from_f64(change_pct) / dec!(100);
        let close = (reference * factor).round_dp(2).max(PRICE_FLOOR);

        let close_f = close.to_f64().unwrap_or(0.0);
        let mut orng = rng_for(code, date, "ohlc");
        let spread = close_f * 0.02;
        let open = close_f + orng.gen_range(-0.5..=0.5) * spread;
        let high = open.max(close_f) + orng.gen_range(0.1..=0.6) * spread;
        let low = open.min(close_f) - orng.gen_range(0.1..=0.6) * spread;

        let mut vrng = rng_for(code, date, "vol");
        let base_vol = 1_000_000 + code_hash(code) % 500_000;
        let intraday_range = high - low;
        let vol_scale = 1.0 + (intraday_range / close_f.max(1.0)).min(0.5);
        let volume = (base_vol as f64 * vol_scale * vrng.gen_range(0.7..=1.3)) as u64;

        PriceBar {
            date,
            open: dec_from_f64(round2_f64(open)),
            high: dec_from_f64(round2_f64(high)),
            low: dec_from_f64(round2_f64(low)),
            close,
            volume,
        }
    }

    /// Bar at or immediately before `date` from the symbol's CSV series,
    /// forward-filled onto the requested date. The series is parsed once
    /// per symbol and binary-searched per date.
    fn real_bar(&self, dir: &Path, code: &Symbol, date: NaiveDate) -> Result<Option<PriceBar>> {
        let mut series = self
            .series
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if !series.contains_key(code) {
            series.insert(code.clone(), load_csv_series(dir, code)?);
        }
        let rows = &series[code];
        let idx = rows.partition_point(|bar| bar.date <= date);
        Ok(idx.checked_sub(1).map(|i| {
            let mut bar = rows[i].clone();
            bar.date = date;
            bar
        }))
    }

    fn lock_cache(&self) -> MutexGuard<'_, CacheMap> {
        self.cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn persist_cache(&self, cache: &CacheMap) {
        let Some(path) = &self.cache_file else {
            return;
        };
        if let Err(err) = write_cache_file(path, cache) {
            warn!("failed to save price cache {}: {err:#}", path.display());
        }
    }
}

// ----------------------------------------------------------------------
// Seed derivation
// ----------------------------------------------------------------------

/// Deterministic sub-seed for `(code, date, tag)`, independent of call
/// order, so any consumer reproduces the same bars.
fn sub_seed(code: &Symbol, date: NaiveDate, tag: &str) -> u64 {
    let mut hasher = blake3::Hasher::new();
    hasher.update(code.as_str().as_bytes());
    hasher.update(b"-");
    hasher.update(date.format("%Y-%m-%d").to_string().as_bytes());
    hasher.update(b"-");
    hasher.update(tag.as_bytes());
    let hash = hasher.finalize();
    u64::from_le_bytes(hash.as_bytes()[..8].try_into().expect("hash is 32 bytes"))
}

fn rng_for(code: &Symbol, date: NaiveDate, tag: &str) -> StdRng {
    StdRng::seed_from_u64(sub_seed(code, date, tag))
}

fn code_hash(code: &Symbol) -> u64 {
    let hash = blake3::hash(code.as_str().as_bytes());
    u64::from_le_bytes(hash.as_bytes()[..8].try_into().expect("hash is 32 bytes"))
}

/// Per-symbol anchor price in [50, 300)
fn base_price(code: &Symbol) -> Decimal {
    Decimal::from(50 + code_hash(code) % 250)
}

fn round2_f64(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

fn dec_from_f64(v: f64) -> Decimal {
    Decimal::from_f64_retain(v).unwrap_or_default().round_dp(4)
}

// ----------------------------------------------------------------------
// Real-data mode (CSV)
// ----------------------------------------------------------------------

/// Parse and validate a symbol's full `{code}.csv`, sorted by date.
///
/// Rows are `date,open,high,low,close,volume`. Gaps (weekends, holidays)
/// are handled at lookup time by forward-filling the most recent row.
fn load_csv_series(dir: &Path, code: &Symbol) -> Result<Vec<PriceBar>> {
    let path = dir.join(format!("{}.csv", code.as_str()));
    let mut reader = csv::Reader::from_path(&path)
        .with_context(|| format!("failed to open {}", path.display()))?;

    let mut rows = Vec::new();
    for (row_idx, result) in reader.records().enumerate() {
        let record = result.with_context(|| format!("failed to read row {}", row_idx + 1))?;
        let bar = parse_csv_bar(&record).with_context(|| format!("row {}", row_idx + 1))?;
        bar.validate()
            .map_err(anyhow::Error::from)
            .with_context(|| format!("invalid bar in row {}", row_idx + 1))?;
        rows.push(bar);
    }
    rows.sort_by_key(|bar| bar.date);
    Ok(rows)
}

fn parse_csv_bar(record: &csv::StringRecord) -> Result<PriceBar> {
    let field = |idx: usize, name: &str| -> Result<&str> {
        record
            .get(idx)
            .with_context(|| format!("missing {name} column"))
    };
    Ok(PriceBar {
        date: NaiveDate::parse_from_str(field(0, "date")?, "%Y-%m-%d")
            .context("failed to parse date")?,
        open: field(1, "open")?.parse().context("failed to parse open")?,
        high: field(2, "high")?.parse().context("failed to parse high")?,
        low: field(3, "low")?.parse().context("failed to parse low")?,
        close: field(4, "close")?.parse().context("failed to parse close")?,
        volume: field(5, "volume")?
            .parse()
            .context("failed to parse volume")?,
    })
}

// ----------------------------------------------------------------------
// Cache / events persistence
// ----------------------------------------------------------------------

fn load_cache_file(path: &Path) -> Result<CacheMap> {
    let contents = fs::read_to_string(path)?;
    let nested: BTreeMap<NaiveDate, BTreeMap<Symbol, PriceBar>> =
        serde_json::from_str(&contents)?;
    let mut cache = HashMap::new();
    for (date, by_code) in nested {
        for (code, bar) in by_code {
            cache.insert((date, code), bar);
        }
    }
    Ok(cache)
}

fn write_cache_file(path: &Path, cache: &CacheMap) -> Result<()> {
    let mut nested: BTreeMap<NaiveDate, BTreeMap<Symbol, PriceBar>> = BTreeMap::new();
    for ((date, code), bar) in cache {
        nested
            .entry(*date)
            .or_default()
            .insert(code.clone(), bar.clone());
    }
    write_json(path, &nested)
}

fn load_events_file(path: &Path) -> Result<Vec<PriceEvent>> {
    let contents = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&contents)?)
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    fs::write(path, json)?;
    Ok(())
}

/// Built-in default universe; overridable via configuration.
pub fn default_stock_list() -> BTreeMap<Symbol, String> {
    [
        ("AAPL", "Apple"),
        ("MSFT", "Microsoft"),
        ("GOOGL", "Google"),
        ("AMZN", "Amazon"),
        ("META", "Meta"),
        ("TSLA", "Tesla"),
        ("NVDA", "NVIDIA"),
        ("JPM", "JPMorgan Chase"),
        ("JNJ", "Johnson & Johnson"),
        ("V", "Visa"),
        ("WMT", "Walmart"),
        ("PG", "Procter & Gamble"),
        ("MA", "Mastercard"),
        ("HD", "Home Depot"),
        ("BAC", "Bank of America"),
    ]
    .into_iter()
    .map(|(code, name)| (Symbol::new(code), name.to_string()))
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn bars_are_deterministic_across_fresh_providers() {
        let a = PriceSeriesProvider::synthetic();
        let b = PriceSeriesProvider::synthetic();
        let code = Symbol::new("AAPL");
        let bar_a = a.get_bar(&code, d(2024, 5, 6)).unwrap();
        let bar_b = b.get_bar(&code, d(2024, 5, 6)).unwrap();
        assert_eq!(bar_a, bar_b);
    }

    #[test]
    fn repeated_lookup_hits_cache() {
        let provider = PriceSeriesProvider::synthetic();
        let code = Symbol::new("MSFT");
        let first = provider.get_bar(&code, d(2024, 5, 6)).unwrap();
        let second = provider.get_bar(&code, d(2024, 5, 6)).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn generated_bars_are_valid_ohlc() {
        let provider = PriceSeriesProvider::synthetic();
        let code = Symbol::new("TSLA");
        let bars = provider.get_history(&code, d(2024, 5, 6), 30).unwrap();
        assert_eq!(bars.len(), 30);
        for bar in &bars {
            assert!(bar.is_valid(), "invalid bar: {bar:?}");
            assert!(bar.close >= PRICE_FLOOR);
        }
    }

    #[test]
    fn history_chains_closes_within_the_daily_band() {
        let provider = PriceSeriesProvider::synthetic();
        let code = Symbol::new("JPM");
        let bars = provider.get_history(&code, d(2024, 5, 6), 40).unwrap();
        for pair in bars.windows(2) {
            let prev = pair[0].close.to_f64().unwrap();
            let next = pair[1].close.to_f64().unwrap();
            let change = (next - prev).abs() / prev;
            // band is 4.5%, allow rounding and the 5.00 floor a little slack
            assert!(change <= 0.047, "daily move {change} exceeds the band");
        }
    }

    #[test]
    fn history_is_reproducible_and_ordered() {
        let a = PriceSeriesProvider::synthetic();
        let b = PriceSeriesProvider::synthetic();
        let code = Symbol::new("WMT");
        let hist_a = a.get_history(&code, d(2024, 5, 6), 20).unwrap();
        let hist_b = b.get_history(&code, d(2024, 5, 6), 20).unwrap();
        assert_eq!(hist_a, hist_b);
        for pair in hist_a.windows(2) {
            assert!(pair[0].date < pair[1].date);
        }
    }

    #[test]
    fn event_impact_shifts_the_close() {
        let code = Symbol::new("NVDA");
        let date = d(2024, 5, 6);
        let baseline = PriceSeriesProvider::synthetic()
            .get_bar(&code, date)
            .unwrap();

        let mut boosted = PriceSeriesProvider::synthetic();
        boosted.add_event(PriceEvent {
            code: code.clone(),
            start: date,
            days: 3,
            impact_pct: 8.0,
        });
        let bar = boosted.get_bar(&code, date).unwrap();
        assert!(bar.close > baseline.close);
    }

    #[test]
    fn add_event_invalidates_cached_range() {
        let code = Symbol::new("V");
        let date = d(2024, 5, 6);
        let mut provider = PriceSeriesProvider::synthetic();
        let before = provider.get_bar(&code, date).unwrap();
        provider.add_event(PriceEvent {
            code: code.clone(),
            start: date,
            days: 1,
            impact_pct: 8.0,
        });
        let after = provider.get_bar(&code, date).unwrap();
        assert!(after.close > before.close, "event must beat the stale cache");
    }

    #[test]
    fn cache_file_roundtrips_and_wins_over_regeneration() {
        let dir = tempfile::tempdir().unwrap();
        let cache_path = dir.path().join("stock_data.json");
        let code = Symbol::new("HD");
        let date = d(2024, 5, 6);

        let provider = PriceSeriesProvider::synthetic().with_cache_file(&cache_path);
        let original = provider.get_bar(&code, date).unwrap();

        // A provider with an event that would change the bar still returns
        // the cached value.
        let mut reloaded = PriceSeriesProvider::synthetic().with_cache_file(&cache_path);
        reloaded.events.push(PriceEvent {
            code: code.clone(),
            start: date,
            days: 1,
            impact_pct: 50.0,
        });
        assert_eq!(reloaded.get_bar(&code, date).unwrap(), original);
    }

    #[test]
    fn csv_mode_serves_rows_and_forward_fills() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = std::fs::File::create(dir.path().join("AAPL.csv")).unwrap();
        writeln!(file, "date,open,high,low,close,volume").unwrap();
        writeln!(file, "2024-05-02,100.0,102.0,99.0,101.0,1000000").unwrap();
        writeln!(file, "2024-05-03,101.0,103.0,100.0,102.5,1100000").unwrap();
        drop(file);

        let provider =
            PriceSeriesProvider::from_csv_dir(dir.path()).with_today(d(2024, 5, 10));
        let code = Symbol::new("AAPL");

        let exact = provider.get_bar(&code, d(2024, 5, 3)).unwrap();
        assert_eq!(exact.close, dec!(102.5));

        // Weekend request forward-fills Friday's bar.
        let filled = provider.get_bar(&code, d(2024, 5, 4)).unwrap();
        assert_eq!(filled.close, dec!(102.5));
        assert_eq!(filled.date, d(2024, 5, 4));

        // Before the series begins: no data.
        assert!(provider.get_bar(&code, d(2024, 4, 1)).is_none());
    }

    #[test]
    fn csv_series_is_parsed_once_per_symbol() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("AAPL.csv");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "date,open,high,low,close,volume").unwrap();
        writeln!(file, "2024-05-02,100.0,102.0,99.0,101.0,1000000").unwrap();
        writeln!(file, "2024-05-03,101.0,103.0,100.0,102.5,1100000").unwrap();
        drop(file);

        let provider =
            PriceSeriesProvider::from_csv_dir(dir.path()).with_today(d(2024, 5, 10));
        let code = Symbol::new("AAPL");
        assert_eq!(
            provider.get_bar(&code, d(2024, 5, 2)).unwrap().close,
            dec!(101.0)
        );

        // Uncached dates are served from the in-memory series, not the file.
        std::fs::remove_file(&path).unwrap();
        let filled = provider.get_bar(&code, d(2024, 5, 6)).unwrap();
        assert_eq!(filled.close, dec!(102.5));
        assert_eq!(filled.date, d(2024, 5, 6));
    }

    #[test]
    fn csv_mode_rejects_dates_after_today() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = std::fs::File::create(dir.path().join("AAPL.csv")).unwrap();
        writeln!(file, "date,open,high,low,close,volume").unwrap();
        writeln!(file, "2024-05-02,100.0,102.0,99.0,101.0,1000000").unwrap();
        drop(file);

        let provider =
            PriceSeriesProvider::from_csv_dir(dir.path()).with_today(d(2024, 5, 3));
        assert!(provider
            .get_bar(&Symbol::new("AAPL"), d(2024, 5, 4))
            .is_none());
    }

    #[test]
    fn csv_mode_falls_back_to_synthetic_on_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let provider =
            PriceSeriesProvider::from_csv_dir(dir.path()).with_today(d(2024, 5, 10));
        let code = Symbol::new("GOOGL");
        let bar = provider.get_bar(&code, d(2024, 5, 6)).unwrap();
        let synthetic = PriceSeriesProvider::synthetic()
            .get_bar(&code, d(2024, 5, 6))
            .unwrap();
        assert_eq!(bar, synthetic);
    }

    #[test]
    fn base_prices_stay_in_band() {
        for code in default_stock_list().keys() {
            let base = base_price(code);
            assert!(base >= dec!(50) && base < dec!(300));
        }
    }
}
