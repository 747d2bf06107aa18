use chrono::NaiveTime;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Exchanges with a known trading calendar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "UPPERCASE")]
pub enum Market {
    Nyse,
    Nasdaq,
    Lse,
    Tse,
    Hkex,
    Sse,
    Szse,
}

/// Local session times for a market.
#[derive(Debug, Clone, Copy)]
pub struct TradingHours {
    pub open: NaiveTime,
    pub close: NaiveTime,
    /// Extended-hours window around the regular session, if any
    pub pre_market_open: Option<NaiveTime>,
    pub after_hours_close: Option<NaiveTime>,
}

fn hm(hour: u32, minute: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or(NaiveTime::MIN)
}

impl Market {
    pub const ALL: [Market; 7] = [
        Market::Nyse,
        Market::Nasdaq,
        Market::Lse,
        Market::Tse,
        Market::Hkex,
        Market::Sse,
        Market::Szse,
    ];

    pub fn code(&self) -> &'static str {
        match self {
            Market::Nyse => "NYSE",
            Market::Nasdaq => "NASDAQ",
            Market::Lse => "LSE",
            Market::Tse => "TSE",
            Market::Hkex => "HKEX",
            Market::Sse => "SSE",
            Market::Szse => "SZSE",
        }
    }

    pub fn timezone(&self) -> Tz {
        match self {
            Market::Nyse | Market::Nasdaq => chrono_tz::America::New_York,
            Market::Lse => chrono_tz::Europe::London,
            Market::Tse => chrono_tz::Asia::Tokyo,
            Market::Hkex => chrono_tz::Asia::Hong_Kong,
            Market::Sse | Market::Szse => chrono_tz::Asia::Shanghai,
        }
    }

    pub fn hours(&self) -> TradingHours {
        match self {
            Market::Nyse | Market::Nasdaq => TradingHours {
                open: hm(9, 30),
                close: hm(16, 0),
                pre_market_open: Some(hm(4, 0)),
                after_hours_close: Some(hm(20, 0)),
            },
            Market::Lse => TradingHours {
                open: hm(8, 0),
                close: hm(16, 30),
                pre_market_open: None,
                after_hours_close: None,
            },
            Market::Tse => TradingHours {
                open: hm(9, 0),
                close: hm(15, 0),
                pre_market_open: None,
                after_hours_close: None,
            },
            Market::Hkex => TradingHours {
                open: hm(9, 30),
                close: hm(16, 0),
                pre_market_open: None,
                after_hours_close: None,
            },
            Market::Sse | Market::Szse => TradingHours {
                open: hm(9, 30),
                close: hm(15, 0),
                pre_market_open: None,
                after_hours_close: None,
            },
        }
    }

    /// Only the US exchanges carry a holiday calendar.
    pub fn observes_us_holidays(&self) -> bool {
        matches!(self, Market::Nyse | Market::Nasdaq)
    }

    /// Market a Yahoo-style ticker trades on, judged by its suffix.
    pub fn for_symbol(symbol: &str) -> Market {
        let upper = symbol.trim().to_uppercase();
        if upper.ends_with(".L") {
            Market::Lse
        } else if upper.ends_with(".T") {
            Market::Tse
        } else if upper.ends_with(".HK") {
            Market::Hkex
        } else if upper.ends_with(".SS") {
            Market::Sse
        } else if upper.ends_with(".SZ") {
            Market::Szse
        } else {
            Market::Nyse
        }
    }
}

impl fmt::Display for Market {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Market {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_uppercase();
        Market::ALL
            .into_iter()
            .find(|m| m.code() == upper)
            .ok_or_else(|| format!("unknown market '{}'", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_market_for_symbol() {
        assert_eq!(Market::for_symbol("AAPL"), Market::Nyse);
        assert_eq!(Market::for_symbol("vod.l"), Market::Lse);
        assert_eq!(Market::for_symbol("7203.T"), Market::Tse);
        assert_eq!(Market::for_symbol("0700.HK"), Market::Hkex);
        assert_eq!(Market::for_symbol("600519.SS"), Market::Sse);
        assert_eq!(Market::for_symbol("000001.SZ"), Market::Szse);
    }

    #[test]
    fn test_parse_market_code() {
        assert_eq!("nasdaq".parse::<Market>(), Ok(Market::Nasdaq));
        assert!("NOPE".parse::<Market>().is_err());
    }

    #[test]
    fn test_extended_hours_only_for_us() {
        assert!(Market::Nyse.hours().pre_market_open.is_some());
        assert!(Market::Lse.hours().pre_market_open.is_none());
        assert_eq!(Market::Lse.hours().close, hm(16, 30));
    }
}
