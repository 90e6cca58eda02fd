//! Header extraction for raw RFC 5322 messages
//!
//! The store only needs two facts about a message: its self-declared
//! `Message-ID` and the calendar date from its `Date` header. Everything else
//! in the message is treated as opaque bytes.

use chrono::{DateTime, NaiveDate};
use mailparse::{MailHeader, MailHeaderMap};

use crate::error::{MailinError, Result};
use crate::models::MessageId;

/// Headers extracted from a raw message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedHeaders {
    pub message_id: MessageId,
    pub date: NaiveDate,
}

/// Extracts identity and date from raw message bytes
pub trait MessageParser: Send + Sync {
    /// The message's own `Message-ID`, verbatim
    fn message_id(&self, raw: &[u8]) -> Result<MessageId>;

    /// The calendar date the message declares for itself
    fn date(&self, raw: &[u8]) -> Result<NaiveDate>;

    /// Both fields at once; fails if either is absent or malformed
    fn extract(&self, raw: &[u8]) -> Result<ParsedHeaders> {
        Ok(ParsedHeaders {
            message_id: self.message_id(raw)?,
            date: self.date(raw)?,
        })
    }
}

/// Default parser built on `mailparse`
#[derive(Debug, Default, Clone, Copy)]
pub struct HeaderParser;

impl HeaderParser {
    pub fn new() -> Self {
        Self
    }

    fn headers(raw: &[u8]) -> Result<Vec<MailHeader<'_>>> {
        mailparse::parse_headers(raw)
            .map(|(headers, _)| headers)
            .map_err(|e| MailinError::parse(format!("Malformed headers: {}", e)))
    }

    fn required(headers: &[MailHeader<'_>], name: &str) -> Result<String> {
        headers
            .get_first_value(name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| MailinError::parse(format!("Missing {} header", name)))
    }
}

impl MessageParser for HeaderParser {
    fn message_id(&self, raw: &[u8]) -> Result<MessageId> {
        let headers = Self::headers(raw)?;
        Self::required(&headers, "Message-ID").map(MessageId::new)
    }

    fn date(&self, raw: &[u8]) -> Result<NaiveDate> {
        let headers = Self::headers(raw)?;
        let value = Self::required(&headers, "Date")?;
        parse_date(&value)
    }
}

/// Parse a `Date` header value into the calendar date it names
///
/// The date is taken in the sender's own offset, so `Fri, 03 Oct 2008
/// 23:30:00 -0700` lands on Oct 3 even though it is Oct 4 in UTC. Values
/// chrono rejects (obsolete zone names, missing weekday quirks) fall back to
/// mailparse's lenient parser, which normalizes to UTC.
pub fn parse_date(value: &str) -> Result<NaiveDate> {
    let value = value.trim();

    if let Ok(dt) = DateTime::parse_from_rfc2822(value) {
        return Ok(dt.date_naive());
    }

    mailparse::dateparse(value)
        .ok()
        .and_then(|ts| DateTime::from_timestamp(ts, 0))
        .map(|dt| dt.date_naive())
        .ok_or_else(|| MailinError::parse(format!("Unparseable Date header '{}'", value)))
}
