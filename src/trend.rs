//! Trend log records
//!
//! A trend log object accumulates timestamped samples in its `logBuffer`
//! property. Records are read oldest-first; every field is optional on the
//! wire, and absent fields stay absent instead of being filled with guesses.

use crate::codec::{
    encode_app_date, encode_app_time, encode_app_value, encode_closing_tag,
    encode_context_unsigned, encode_opening_tag, Decoder,
};
use crate::error::{BacnetError, BacnetResult};
use crate::value::BacnetValue;
use chrono::{DateTime, Datelike, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Status flags attached to a log record (inAlarm, fault, overridden,
/// outOfService)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StatusFlags(pub u8);

impl StatusFlags {
    pub const IN_ALARM: u8 = 0x01;
    pub const FAULT: u8 = 0x02;
    pub const OVERRIDDEN: u8 = 0x04;
    pub const OUT_OF_SERVICE: u8 = 0x08;

    pub fn in_alarm(&self) -> bool {
        self.0 & Self::IN_ALARM != 0
    }

    pub fn fault(&self) -> bool {
        self.0 & Self::FAULT != 0
    }

    pub fn is_normal(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for StatusFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_normal() {
            return f.write_str("normal");
        }
        let mut parts = Vec::new();
        if self.in_alarm() {
            parts.push("in-alarm");
        }
        if self.fault() {
            parts.push("fault");
        }
        if self.0 & Self::OVERRIDDEN != 0 {
            parts.push("overridden");
        }
        if self.0 & Self::OUT_OF_SERVICE != 0 {
            parts.push("out-of-service");
        }
        f.write_str(&parts.join(","))
    }
}

/// One entry of a trend log buffer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendRecord {
    /// Sample time; absent when the device logged no timestamp
    pub timestamp: Option<DateTime<Utc>>,
    /// Logged value; absent for pure event records
    pub value: Option<BacnetValue>,
    /// Status flags at sampling time, if recorded
    pub status_flags: Option<StatusFlags>,
}

impl TrendRecord {
    pub fn new(timestamp: DateTime<Utc>, value: BacnetValue) -> Self {
        Self {
            timestamp: Some(timestamp),
            value: Some(value),
            status_flags: Some(StatusFlags::default()),
        }
    }
}

fn timestamp_octets(ts: &DateTime<Utc>) -> ([u8; 4], [u8; 4]) {
    let year = ts.year().clamp(1900, 2155) - 1900;
    let date = [
        year as u8,
        ts.month() as u8,
        ts.day() as u8,
        // Weekday left unspecified
        0xFF,
    ];
    let hundredths = (ts.timestamp_subsec_millis() / 10) as u8;
    let time = [
        ts.hour() as u8,
        ts.minute() as u8,
        ts.second() as u8,
        hundredths,
    ];
    (date, time)
}

fn timestamp_from_octets(date: [u8; 4], time: [u8; 4]) -> Option<DateTime<Utc>> {
    Utc.with_ymd_and_hms(
        1900 + i32::from(date[0]),
        u32::from(date[1]),
        u32::from(date[2]),
        u32::from(time[0]),
        u32::from(time[1]),
        u32::from(time[2]),
    )
    .single()
}

/// Append one record to a log buffer payload
///
/// Record layout: a context-0 constructed timestamp (Date + Time), a
/// context-1 constructed logged value, and an optional context-2 status
/// flags field. Either constructed field may be empty.
pub fn encode_record(buf: &mut Vec<u8>, record: &TrendRecord) {
    encode_opening_tag(buf, 0);
    if let Some(ts) = &record.timestamp {
        let (date, time) = timestamp_octets(ts);
        encode_app_date(buf, date);
        encode_app_time(buf, time);
    }
    encode_closing_tag(buf, 0);

    encode_opening_tag(buf, 1);
    if let Some(value) = &record.value {
        encode_app_value(buf, value);
    }
    encode_closing_tag(buf, 1);

    if let Some(flags) = &record.status_flags {
        encode_context_unsigned(buf, 2, u32::from(flags.0));
    }
}

/// Encode a full log buffer, oldest record first
pub fn encode_log_buffer(records: &[TrendRecord]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(records.len() * 16);
    for record in records {
        encode_record(&mut buf, record);
    }
    buf
}

/// Decode a log buffer payload into records, oldest first
pub fn decode_log_buffer(octets: &[u8]) -> BacnetResult<Vec<TrendRecord>> {
    let mut dec = Decoder::new(octets);
    let mut records = Vec::new();
    while !dec.at_end() {
        records.push(decode_record(&mut dec)?);
    }
    Ok(records)
}

fn decode_record(dec: &mut Decoder<'_>) -> BacnetResult<TrendRecord> {
    dec.expect_opening(0)?;
    let timestamp = if dec.next_is_closing(0) {
        None
    } else {
        let date = dec.read_app_date()?;
        let time = dec.read_app_time()?;
        timestamp_from_octets(date, time)
    };
    dec.expect_closing(0)?;

    dec.expect_opening(1)?;
    let value = if dec.next_is_closing(1) {
        None
    } else {
        Some(dec.read_app_value()?)
    };
    dec.expect_closing(1)?;

    let status_flags = if dec.next_is_context(2) {
        let raw = dec.read_context_unsigned(2)?;
        let raw = u8::try_from(raw)
            .map_err(|_| BacnetError::protocol("status flags exceed one octet"))?;
        Some(StatusFlags(raw))
    } else {
        None
    };

    Ok(TrendRecord {
        timestamp,
        value,
        status_flags,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 24, hour, minute, 0).unwrap()
    }

    #[test]
    fn test_record_round_trip() {
        let records = vec![
            TrendRecord::new(ts(10, 0), BacnetValue::Real(72.5)),
            TrendRecord::new(ts(10, 5), BacnetValue::Real(72.9)),
        ];
        let buf = encode_log_buffer(&records);
        assert_eq!(decode_log_buffer(&buf).unwrap(), records);
    }

    #[test]
    fn test_absent_fields_stay_absent() {
        let partial = TrendRecord {
            timestamp: None,
            value: Some(BacnetValue::Real(1.0)),
            status_flags: None,
        };
        let mut buf = Vec::new();
        encode_record(&mut buf, &partial);
        let decoded = decode_log_buffer(&buf).unwrap();
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].timestamp, None);
        assert_eq!(decoded[0].status_flags, None);
        assert_eq!(decoded[0].value, Some(BacnetValue::Real(1.0)));
    }

    #[test]
    fn test_empty_value_record() {
        let event_only = TrendRecord {
            timestamp: Some(ts(12, 0)),
            value: None,
            status_flags: Some(StatusFlags(StatusFlags::FAULT)),
        };
        let mut buf = Vec::new();
        encode_record(&mut buf, &event_only);
        let decoded = decode_log_buffer(&buf).unwrap();
        assert_eq!(decoded[0].value, None);
        assert!(decoded[0].status_flags.unwrap().fault());
    }

    #[test]
    fn test_status_flags_display() {
        assert_eq!(StatusFlags::default().to_string(), "normal");
        assert_eq!(
            StatusFlags(StatusFlags::IN_ALARM | StatusFlags::FAULT).to_string(),
            "in-alarm,fault"
        );
    }

    #[test]
    fn test_truncated_buffer_rejected() {
        let buf = encode_log_buffer(&[TrendRecord::new(ts(9, 0), BacnetValue::Real(3.0))]);
        // Cutting only the whole status-flags field leaves a valid record;
        // every shorter prefix lands inside a mandatory field
        let flags_len = 2;
        let valid = decode_log_buffer(&buf[..buf.len() - flags_len]).unwrap();
        assert_eq!(valid[0].status_flags, None);
        for cut in buf.len() - flags_len + 1..buf.len() {
            assert!(decode_log_buffer(&buf[..cut]).is_err(), "cut at {cut}");
        }
        assert!(decode_log_buffer(&buf[..buf.len() - flags_len - 1]).is_err());
    }
}
