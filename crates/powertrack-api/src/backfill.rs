//! `backfillMinutes` query parameter handling.
//!
//! PowerTrack replays up to five minutes of missed activities when a
//! stream is opened with `?backfillMinutes=N`. [`BackfillMinutes`] holds a
//! validated value and [`append_backfill`] decorates a stream URL with it.

use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

use thiserror::Error;
use url::Url;

use crate::error::Error;

/// Name of the query parameter understood by the stream endpoint.
pub const BACKFILL_PARAM: &str = "backfillMinutes";

/// Largest backfill window the endpoint accepts, in minutes.
pub const MAX_BACKFILL_MINUTES: u8 = 5;

/// Validation failure for a backfill value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackfillError {
    /// Integer outside `0..=5`.
    #[error("backfill minutes must be between 0 and {MAX_BACKFILL_MINUTES}, got {value}")]
    OutOfRange { value: i128 },

    /// Text that is not a plain base-10 integer.
    #[error("backfill minutes must be an integer, got '{input}'")]
    NotAnInteger { input: String },
}

impl From<Infallible> for BackfillError {
    fn from(never: Infallible) -> Self {
        match never {}
    }
}

/// A backfill window in minutes, guaranteed to lie in `0..=5`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BackfillMinutes(u8);

impl BackfillMinutes {
    /// Validate `minutes` against the accepted range.
    pub fn new(minutes: u8) -> Result<Self, BackfillError> {
        if minutes > MAX_BACKFILL_MINUTES {
            return Err(BackfillError::OutOfRange {
                value: i128::from(minutes),
            });
        }
        Ok(Self(minutes))
    }

    pub const fn get(self) -> u8 {
        self.0
    }
}

impl fmt::Display for BackfillMinutes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

macro_rules! impl_try_from_int {
    ($($t:ty),*) => {
        $(
            impl TryFrom<$t> for BackfillMinutes {
                type Error = BackfillError;

                fn try_from(value: $t) -> Result<Self, Self::Error> {
                    u8::try_from(value)
                        .map_err(|_| BackfillError::OutOfRange { value: i128::from(value) })
                        .and_then(Self::new)
                }
            }
        )*
    };
}

impl_try_from_int!(u8, u16, u32, u64, i8, i16, i32, i64);

/// Parses the decimal form only: `"3"` is accepted, while `"3.0"`,
/// `"true"`, `"FOUR"`, `"+3"` and `" 3"` are not.
impl FromStr for BackfillMinutes {
    type Err = BackfillError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let is_integer = {
            let digits = s.strip_prefix('-').unwrap_or(s);
            !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
        };
        if !is_integer {
            return Err(BackfillError::NotAnInteger {
                input: s.to_owned(),
            });
        }

        // Too many digits for an i128 is still "an integer", just a large one.
        let value: i128 = s.parse().unwrap_or(if s.starts_with('-') {
            i128::MIN
        } else {
            i128::MAX
        });
        u8::try_from(value)
            .map_err(|_| BackfillError::OutOfRange { value })
            .and_then(Self::new)
    }
}

/// Add or replace the `backfillMinutes` parameter on `url`.
///
/// The result is built from the original string, so a URL without a path
/// stays without one (`http://x.com` becomes `http://x.com?backfillMinutes=3`).
/// Other parameters keep their order and encoding, an existing
/// `backfillMinutes` is replaced in place (later duplicates are dropped),
/// and a fragment stays at the end.
///
/// ```
/// use powertrack_api::append_backfill;
///
/// assert_eq!(
///     append_backfill("http://x.com?backfillMinutes=5", 1).unwrap(),
///     "http://x.com?backfillMinutes=1",
/// );
/// ```
pub fn append_backfill<M>(url: &str, minutes: M) -> Result<String, Error>
where
    M: TryInto<BackfillMinutes>,
    BackfillError: From<M::Error>,
{
    let minutes = minutes.try_into().map_err(BackfillError::from)?;
    Url::parse(url)?;

    let (without_fragment, fragment) = match url.split_once('#') {
        Some((head, frag)) => (head, Some(frag)),
        None => (url, None),
    };
    let (base, query) = match without_fragment.split_once('?') {
        Some((base, query)) => (base, Some(query)),
        None => (without_fragment, None),
    };

    let ours = format!("{BACKFILL_PARAM}={minutes}");
    let mut pairs: Vec<&str> = Vec::new();
    let mut replaced = false;
    for pair in query.into_iter().flat_map(|q| q.split('&')) {
        if pair.is_empty() {
            continue;
        }
        let key = pair.split_once('=').map_or(pair, |(k, _)| k);
        if key == BACKFILL_PARAM {
            if !replaced {
                pairs.push(&ours);
                replaced = true;
            }
        } else {
            pairs.push(pair);
        }
    }
    if !replaced {
        pairs.push(&ours);
    }

    let mut out = String::with_capacity(url.len() + ours.len() + 1);
    out.push_str(base);
    out.push('?');
    out.push_str(&pairs.join("&"));
    if let Some(frag) = fragment {
        out.push('#');
        out.push_str(frag);
    }
    Ok(out)
}
