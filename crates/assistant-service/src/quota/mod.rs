//! Monthly credit accounting and user identity.
pub mod identity;
pub mod ledger;

pub use identity::{HttpIdentityResolver, IdentityResolver, UserInfo};
pub use ledger::QuotaLedger;

use std::time::Duration;

pub const INPUT_TOKEN_CREDITS: i64 = 4;
pub const OUTPUT_TOKEN_CREDITS: i64 = 16;
pub const LITE_INPUT_TOKEN_CREDITS: i64 = 3;
pub const LITE_OUTPUT_TOKEN_CREDITS: i64 = 12;

pub const WEATHER_QUERY_CREDITS: i64 = 21_000;
pub const POI_SEARCH_CREDITS: i64 = 1_400_000;
pub const ROUTE_CALCULATION_CREDITS: i64 = 80_000;

pub const MONTHLY_QUOTA_CREDITS: i64 = 80_000_000;

/// Lifetime of a monthly counter, installed on the first write of the month.
pub const QUOTA_KEY_TTL: Duration = Duration::from_secs(45 * 24 * 60 * 60);
