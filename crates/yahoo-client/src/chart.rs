//! Yahoo Finance v8 chart payloads and their conversion into domain types.

use chrono::{DateTime, Utc};
use research_core::{Bar, DataSource, MarketStatus, Quote, ResearchError};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct ChartEnvelope {
    pub chart: ChartBody,
}

#[derive(Debug, Deserialize)]
pub struct ChartBody {
    #[serde(default)]
    pub result: Option<Vec<ChartResult>>,
    #[serde(default)]
    pub error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
pub struct ChartError {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChartResult {
    pub meta: ChartMeta,
    #[serde(default)]
    pub timestamp: Vec<i64>,
    #[serde(default)]
    pub indicators: Indicators,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartMeta {
    pub symbol: Option<String>,
    pub currency: Option<String>,
    pub exchange_name: Option<String>,
    pub regular_market_price: Option<f64>,
    pub previous_close: Option<f64>,
    pub chart_previous_close: Option<f64>,
    pub regular_market_day_high: Option<f64>,
    pub regular_market_day_low: Option<f64>,
    pub regular_market_volume: Option<f64>,
    pub fifty_two_week_high: Option<f64>,
    pub fifty_two_week_low: Option<f64>,
    pub market_cap: Option<f64>,
    pub trailing_pe: Option<f64>,
    pub dividend_yield: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Indicators {
    #[serde(default)]
    pub quote: Vec<QuoteSeries>,
}

#[derive(Debug, Default, Deserialize)]
pub struct QuoteSeries {
    #[serde(default)]
    pub open: Vec<Option<f64>>,
    #[serde(default)]
    pub high: Vec<Option<f64>>,
    #[serde(default)]
    pub low: Vec<Option<f64>>,
    #[serde(default)]
    pub close: Vec<Option<f64>>,
    #[serde(default)]
    pub volume: Vec<Option<f64>>,
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Human-readable market cap: 2.95T, 812.40B, 3.40M.
pub fn format_market_cap(value: f64) -> String {
    if value >= 1e12 {
        format!("{:.2}T", value / 1e12)
    } else if value >= 1e9 {
        format!("{:.2}B", value / 1e9)
    } else if value >= 1e6 {
        format!("{:.2}M", value / 1e6)
    } else {
        format!("{:.0}", value)
    }
}

/// Unwrap the first chart result, treating an empty or errored chart as a missing symbol.
pub fn first_result(envelope: ChartEnvelope, symbol: &str) -> Result<ChartResult, ResearchError> {
    if let Some(err) = envelope.chart.error {
        let description = err
            .description
            .or(err.code)
            .unwrap_or_else(|| "unknown chart error".to_string());
        return Err(ResearchError::NotFound(format!("{}: {}", symbol, description)));
    }

    envelope
        .chart
        .result
        .and_then(|results| results.into_iter().next())
        .ok_or_else(|| ResearchError::NotFound(format!("No chart data for {}", symbol)))
}

fn first_present(values: &[Option<f64>]) -> Option<f64> {
    values.iter().flatten().next().copied()
}

/// Build a quote from chart metadata. `market_status` is decided by the caller.
pub fn quote_from_chart(
    symbol: &str,
    chart: &ChartResult,
    fetched_at: DateTime<Utc>,
    market_status: MarketStatus,
) -> Result<Quote, ResearchError> {
    let meta = &chart.meta;
    let price = meta
        .regular_market_price
        .or(meta.previous_close)
        .or(meta.chart_previous_close)
        .ok_or_else(|| ResearchError::Parse(format!("No price in chart meta for {}", symbol)))?;

    let previous_close = meta
        .previous_close
        .or(meta.chart_previous_close)
        .unwrap_or(price);

    let raw_change = price - previous_close;
    let change_percent = if previous_close != 0.0 {
        round2(raw_change / previous_close * 100.0)
    } else {
        0.0
    };

    let series = chart.indicators.quote.first();
    let open = series.and_then(|s| first_present(&s.open)).unwrap_or(price);
    let high = meta
        .regular_market_day_high
        .or_else(|| series.and_then(|s| s.high.iter().flatten().copied().reduce(f64::max)))
        .unwrap_or(price);
    let low = meta
        .regular_market_day_low
        .or_else(|| series.and_then(|s| s.low.iter().flatten().copied().reduce(f64::min)))
        .unwrap_or(price);

    Ok(Quote {
        symbol: symbol.to_string(),
        price: round2(price),
        change: round2(raw_change),
        change_percent,
        volume: meta.regular_market_volume.unwrap_or(0.0).max(0.0) as u64,
        open,
        high,
        low,
        previous_close,
        market_cap: meta.market_cap,
        market_cap_display: meta.market_cap.map(format_market_cap),
        pe_ratio: meta.trailing_pe,
        dividend_yield: meta.dividend_yield,
        fifty_two_week_high: meta.fifty_two_week_high,
        fifty_two_week_low: meta.fifty_two_week_low,
        currency: meta.currency.clone(),
        exchange: meta.exchange_name.clone(),
        timestamp: fetched_at,
        source: DataSource::YahooFinance,
        market_status,
        is_cached: false,
        cache_age_seconds: None,
    })
}

/// OHLCV bars, skipping rows Yahoo left incomplete.
pub fn bars_from_chart(chart: &ChartResult) -> Vec<Bar> {
    let Some(series) = chart.indicators.quote.first() else {
        return Vec::new();
    };

    chart
        .timestamp
        .iter()
        .enumerate()
        .filter_map(|(i, &ts)| {
            let get = |v: &Vec<Option<f64>>| v.get(i).copied().flatten();
            Some(Bar {
                timestamp: DateTime::from_timestamp(ts, 0)?,
                open: get(&series.open)?,
                high: get(&series.high)?,
                low: get(&series.low)?,
                close: get(&series.close)?,
                volume: get(&series.volume).unwrap_or(0.0).max(0.0) as u64,
            })
        })
        .collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const AAPL_CHART: &str = r#"{
        "chart": {
            "result": [{
                "meta": {
                    "currency": "USD",
                    "symbol": "AAPL",
                    "exchangeName": "NMS",
                    "regularMarketPrice": 189.98,
                    "previousClose": 187.5,
                    "chartPreviousClose": 187.5,
                    "regularMarketDayHigh": 190.3,
                    "regularMarketDayLow": 187.1,
                    "regularMarketVolume": 51234567,
                    "fiftyTwoWeekHigh": 199.62,
                    "fiftyTwoWeekLow": 164.08
                },
                "timestamp": [1707229800, 1707229860, 1707229920],
                "indicators": {
                    "quote": [{
                        "open": [null, 188.0, 188.4],
                        "high": [188.2, 188.5, 188.9],
                        "low": [187.8, 187.9, 188.1],
                        "close": [188.1, 188.4, null],
                        "volume": [1200, 900, 700]
                    }]
                }
            }],
            "error": null
        }
    }"#;

    fn parse(raw: &str) -> ChartEnvelope {
        serde_json::from_str(raw).unwrap()
    }

    #[test]
    fn test_quote_from_chart() {
        let chart = first_result(parse(AAPL_CHART), "AAPL").unwrap();
        let quote = quote_from_chart("AAPL", &chart, Utc::now(), MarketStatus::Open).unwrap();

        assert_eq!(quote.price, 189.98);
        assert_eq!(quote.previous_close, 187.5);
        assert_eq!(quote.change, 2.48);
        assert_eq!(quote.change_percent, 1.32);
        assert_eq!(quote.open, 188.0);
        assert_eq!(quote.high, 190.3);
        assert_eq!(quote.volume, 51_234_567);
        assert_eq!(quote.exchange.as_deref(), Some("NMS"));
        assert_eq!(quote.source, DataSource::YahooFinance);
        assert!(!quote.is_cached);
    }

    #[test]
    fn test_zero_previous_close_does_not_divide() {
        let raw = r#"{"chart":{"result":[{"meta":{"regularMarketPrice":5.0,"previousClose":0.0}}]}}"#;
        let chart = first_result(parse(raw), "NEW").unwrap();
        let quote = quote_from_chart("NEW", &chart, Utc::now(), MarketStatus::Closed).unwrap();
        assert_eq!(quote.change, 5.0);
        assert_eq!(quote.change_percent, 0.0);
    }

    #[test]
    fn test_price_falls_back_to_previous_close() {
        let raw = r#"{"chart":{"result":[{"meta":{"previousClose":42.0}}]}}"#;
        let chart = first_result(parse(raw), "X").unwrap();
        let quote = quote_from_chart("X", &chart, Utc::now(), MarketStatus::Closed).unwrap();
        assert_eq!(quote.price, 42.0);
        assert_eq!(quote.change, 0.0);
    }

    #[test]
    fn test_missing_price_is_parse_error() {
        let raw = r#"{"chart":{"result":[{"meta":{"symbol":"X"}}]}}"#;
        let chart = first_result(parse(raw), "X").unwrap();
        let err = quote_from_chart("X", &chart, Utc::now(), MarketStatus::Closed).unwrap_err();
        assert!(matches!(err, ResearchError::Parse(_)));
    }

    #[test]
    fn test_empty_or_errored_chart_is_not_found() {
        let empty = r#"{"chart":{"result":[],"error":null}}"#;
        assert!(matches!(first_result(parse(empty), "X"), Err(ResearchError::NotFound(_))));

        let errored = r#"{"chart":{"result":null,"error":{"code":"Not Found","description":"No data found, symbol may be delisted"}}}"#;
        let err = first_result(parse(errored), "ZZZZ").unwrap_err();
        assert_eq!(
            err,
            ResearchError::NotFound("ZZZZ: No data found, symbol may be delisted".to_string())
        );
    }

    #[test]
    fn test_bars_skip_incomplete_rows() {
        let chart = first_result(parse(AAPL_CHART), "AAPL").unwrap();
        let bars = bars_from_chart(&chart);
        // First row lacks open, last lacks close
        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].close, 188.4);
        assert_eq!(bars[0].volume, 900);
    }

    #[test]
    fn test_format_market_cap() {
        assert_eq!(format_market_cap(2.95e12), "2.95T");
        assert_eq!(format_market_cap(812.4e9), "812.40B");
        assert_eq!(format_market_cap(3.4e6), "3.40M");
        assert_eq!(format_market_cap(950_000.0), "950000");
    }
}
