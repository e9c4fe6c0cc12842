//! Visit analytics: site sessions with durations and per-page hit logs.

use std::net::SocketAddr;

use axum::{http::HeaderMap, Router};
use serde::Deserialize;
use time::{Date, Month, OffsetDateTime};

use crate::{
    error::{ApiError, ApiResult},
    state::AppState,
};

pub mod pages;
pub mod visits;

pub fn router(state: &AppState) -> Router<AppState> {
    visits::routes(state).merge(pages::routes(state))
}

/// `?month=&year=` on the top-list endpoints.
#[derive(Debug, Deserialize)]
pub struct PeriodQuery {
    pub month: Option<String>,
    pub year: Option<String>,
}

/// Half-open UTC range covering one calendar month.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Period {
    pub start: OffsetDateTime,
    pub end: OffsetDateTime,
}

pub fn parse_period(q: &PeriodQuery) -> ApiResult<Period> {
    let invalid = || ApiError::validation("Invalid month or year");
    let month: u8 = q
        .month
        .as_deref()
        .and_then(|m| m.trim().parse().ok())
        .ok_or_else(invalid)?;
    let year: i32 = q
        .year
        .as_deref()
        .and_then(|y| y.trim().parse().ok())
        .ok_or_else(invalid)?;
    let month = Month::try_from(month).map_err(|_| invalid())?;
    let first = Date::from_calendar_date(year, month, 1).map_err(|_| invalid())?;
    let next = match month {
        Month::December => Date::from_calendar_date(year + 1, Month::January, 1),
        m => Date::from_calendar_date(year, m.next(), 1),
    }
    .map_err(|_| invalid())?;
    Ok(Period {
        start: first.midnight().assume_utc(),
        end: next.midnight().assume_utc(),
    })
}

/// First `X-Forwarded-For` hop, else the socket peer.
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .or_else(|| peer.map(|p| p.ip().to_string()))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;

    fn q(month: &str, year: &str) -> PeriodQuery {
        PeriodQuery {
            month: Some(month.into()),
            year: Some(year.into()),
        }
    }

    #[test]
    fn period_covers_one_month() {
        let p = parse_period(&q("2", "2024")).unwrap();
        assert_eq!(p.start, datetime!(2024-02-01 0:00 UTC));
        assert_eq!(p.end, datetime!(2024-03-01 0:00 UTC));

        let p = parse_period(&q("12", "2024")).unwrap();
        assert_eq!(p.end, datetime!(2025-01-01 0:00 UTC));
    }

    #[test]
    fn bad_period_is_rejected() {
        for (m, y) in [("13", "2024"), ("0", "2024"), ("x", "2024"), ("5", "")] {
            assert!(matches!(parse_period(&q(m, y)), Err(ApiError::Validation(_))));
        }
        let missing = PeriodQuery { month: None, year: None };
        assert!(parse_period(&missing).is_err());
    }

    #[test]
    fn forwarded_for_wins_over_peer() {
        let mut headers = HeaderMap::new();
        let peer: SocketAddr = "10.0.0.9:5555".parse().unwrap();
        assert_eq!(client_ip(&headers, Some(peer)), "10.0.0.9");

        headers.insert("x-forwarded-for", "203.0.113.7, 10.0.0.1".parse().unwrap());
        assert_eq!(client_ip(&headers, Some(peer)), "203.0.113.7");
        assert_eq!(client_ip(&HeaderMap::new(), None), "");
    }
}
