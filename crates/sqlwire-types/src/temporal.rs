//! Date and time wire values.
//!
//! Each type stores exactly the fields carried on the wire so that a decoded
//! value re-encodes to the same bytes. Conversions to and from `chrono`
//! types are available with the `chrono` feature.
//!
//! | Type | Layout |
//! |------|--------|
//! | `date` | 3-byte LE day count since 0001-01-01 |
//! | `time(n)` | 3 to 5 byte LE count of 10^-n second increments since midnight |
//! | `datetime2(n)` | `time(n)` then `date` |
//! | `datetimeoffset(n)` | `datetime2(n)` in UTC then i16 LE offset minutes |
//! | `datetime` | i32 LE days since 1900-01-01, u32 LE 1/300 second ticks |
//! | `smalldatetime` | u16 LE days since 1900-01-01, u16 LE minutes |

use bytes::BufMut;

use crate::error::TypeError;

/// Largest fractional-second scale.
pub const MAX_TIME_SCALE: u8 = 7;

/// Largest `date` day count (9999-12-31).
pub const MAX_DATE_DAYS: u32 = 3_652_058;

/// Largest offset in minutes either side of UTC.
pub const MAX_OFFSET_MINUTES: i16 = 840;

const SECONDS_PER_DAY: u64 = 86_400;
const DATETIME_TICKS_PER_DAY: u32 = 300 * 86_400;
const MINUTES_PER_DAY: u16 = 1_440;

/// Bytes used by a `time` value at `scale`.
#[must_use]
pub const fn time_len(scale: u8) -> usize {
    match scale {
        0..=2 => 3,
        3..=4 => 4,
        _ => 5,
    }
}

fn check_len(type_name: &'static str, bytes: &[u8], expected: usize) -> Result<(), TypeError> {
    if bytes.len() == expected {
        Ok(())
    } else {
        Err(TypeError::InvalidLength {
            type_name,
            actual: bytes.len(),
        })
    }
}

fn read_uint_le(bytes: &[u8]) -> u64 {
    bytes
        .iter()
        .rev()
        .fold(0u64, |acc, b| (acc << 8) | u64::from(*b))
}

/// A `date`: days since 0001-01-01.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Date {
    days: u32,
}

impl Date {
    /// Wire width.
    pub const WIRE_LEN: usize = 3;

    /// A date `days` after 0001-01-01.
    pub fn new(days: u32) -> Result<Self, TypeError> {
        if days > MAX_DATE_DAYS {
            return Err(TypeError::InvalidValue(format!("date day count {days}")));
        }
        Ok(Self { days })
    }

    /// Days since 0001-01-01.
    #[must_use]
    pub const fn days(&self) -> u32 {
        self.days
    }

    /// Decode the 3-byte form.
    pub fn decode(bytes: &[u8]) -> Result<Self, TypeError> {
        check_len("date", bytes, Self::WIRE_LEN)?;
        Self::new(read_uint_le(bytes) as u32)
    }

    /// Encode the 3-byte form.
    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_uint_le(u64::from(self.days), Self::WIRE_LEN);
    }
}

/// A `time(scale)`: increments of 10^-scale seconds since midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Time {
    increments: u64,
    scale: u8,
}

impl Time {
    /// A time of day at the given scale.
    pub fn new(increments: u64, scale: u8) -> Result<Self, TypeError> {
        if scale > MAX_TIME_SCALE {
            return Err(TypeError::InvalidValue(format!("time scale {scale}")));
        }
        if increments >= SECONDS_PER_DAY * 10u64.pow(u32::from(scale)) {
            return Err(TypeError::InvalidValue(format!(
                "{increments} increments at scale {scale} exceeds one day"
            )));
        }
        Ok(Self { increments, scale })
    }

    /// Increments since midnight.
    #[must_use]
    pub const fn increments(&self) -> u64 {
        self.increments
    }

    /// Fractional-second digits.
    #[must_use]
    pub const fn scale(&self) -> u8 {
        self.scale
    }

    /// Bytes used on the wire.
    #[must_use]
    pub const fn wire_len(&self) -> usize {
        time_len(self.scale)
    }

    /// Decode at the column's scale.
    pub fn decode(bytes: &[u8], scale: u8) -> Result<Self, TypeError> {
        check_len("time", bytes, time_len(scale))?;
        Self::new(read_uint_le(bytes), scale)
    }

    /// Encode using the width for this scale.
    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_uint_le(self.increments, self.wire_len());
    }
}

/// A `datetime2(scale)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DateTime2 {
    date: Date,
    time: Time,
}

impl DateTime2 {
    /// Combine a date and a time of day.
    #[must_use]
    pub const fn new(date: Date, time: Time) -> Self {
        Self { date, time }
    }

    /// Date part.
    #[must_use]
    pub const fn date(&self) -> Date {
        self.date
    }

    /// Time part.
    #[must_use]
    pub const fn time(&self) -> Time {
        self.time
    }

    /// Bytes used on the wire.
    #[must_use]
    pub const fn wire_len(&self) -> usize {
        self.time.wire_len() + Date::WIRE_LEN
    }

    /// Decode at the column's scale.
    pub fn decode(bytes: &[u8], scale: u8) -> Result<Self, TypeError> {
        let split = time_len(scale);
        check_len("datetime2", bytes, split + Date::WIRE_LEN)?;
        Ok(Self {
            time: Time::decode(&bytes[..split], scale)?,
            date: Date::decode(&bytes[split..])?,
        })
    }

    /// Encode time then date.
    pub fn encode(&self, dst: &mut impl BufMut) {
        self.time.encode(dst);
        self.date.encode(dst);
    }
}

/// A `datetimeoffset(scale)`: a UTC `datetime2` plus the original offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DateTimeOffset {
    datetime2: DateTime2,
    offset: i16,
}

impl DateTimeOffset {
    /// A UTC instant and an offset in minutes, within ±840.
    pub fn new(datetime2: DateTime2, offset: i16) -> Result<Self, TypeError> {
        if offset.unsigned_abs() > MAX_OFFSET_MINUTES.unsigned_abs() {
            return Err(TypeError::InvalidValue(format!(
                "offset of {offset} minutes"
            )));
        }
        Ok(Self { datetime2, offset })
    }

    /// The instant in UTC.
    #[must_use]
    pub const fn datetime2(&self) -> DateTime2 {
        self.datetime2
    }

    /// Minutes east of UTC.
    #[must_use]
    pub const fn offset(&self) -> i16 {
        self.offset
    }

    /// Bytes used on the wire.
    #[must_use]
    pub const fn wire_len(&self) -> usize {
        self.datetime2.wire_len() + 2
    }

    /// Decode at the column's scale.
    pub fn decode(bytes: &[u8], scale: u8) -> Result<Self, TypeError> {
        let split = time_len(scale) + Date::WIRE_LEN;
        check_len("datetimeoffset", bytes, split + 2)?;
        let offset = i16::from_le_bytes([bytes[split], bytes[split + 1]]);
        Self::new(DateTime2::decode(&bytes[..split], scale)?, offset)
    }

    /// Encode the UTC instant then the offset.
    pub fn encode(&self, dst: &mut impl BufMut) {
        self.datetime2.encode(dst);
        dst.put_i16_le(self.offset);
    }
}

/// A legacy `datetime`: days since 1900-01-01 and 1/300 second ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DateTime {
    days: i32,
    seconds_fragments: u32,
}

impl DateTime {
    /// Wire width.
    pub const WIRE_LEN: usize = 8;

    /// A `datetime` from its raw fields.
    pub fn new(days: i32, seconds_fragments: u32) -> Result<Self, TypeError> {
        if seconds_fragments >= DATETIME_TICKS_PER_DAY {
            return Err(TypeError::InvalidValue(format!(
                "{seconds_fragments} datetime ticks exceeds one day"
            )));
        }
        Ok(Self {
            days,
            seconds_fragments,
        })
    }

    /// Days since 1900-01-01, negative before.
    #[must_use]
    pub const fn days(&self) -> i32 {
        self.days
    }

    /// 1/300 second ticks since midnight.
    #[must_use]
    pub const fn seconds_fragments(&self) -> u32 {
        self.seconds_fragments
    }

    /// Decode the 8-byte form.
    pub fn decode(bytes: &[u8]) -> Result<Self, TypeError> {
        check_len("datetime", bytes, Self::WIRE_LEN)?;
        Self::new(
            i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
        )
    }

    /// Encode the 8-byte form.
    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_i32_le(self.days);
        dst.put_u32_le(self.seconds_fragments);
    }
}

/// A `smalldatetime`: days since 1900-01-01 and minutes since midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SmallDateTime {
    days: u16,
    seconds_fragments: u16,
}

impl SmallDateTime {
    /// Wire width.
    pub const WIRE_LEN: usize = 4;

    /// A `smalldatetime` from days and minutes.
    pub fn new(days: u16, minutes: u16) -> Result<Self, TypeError> {
        if minutes >= MINUTES_PER_DAY {
            return Err(TypeError::InvalidValue(format!(
                "{minutes} minutes exceeds one day"
            )));
        }
        Ok(Self {
            days,
            seconds_fragments: minutes,
        })
    }

    /// Days since 1900-01-01.
    #[must_use]
    pub const fn days(&self) -> u16 {
        self.days
    }

    /// Minutes since midnight.
    #[must_use]
    pub const fn seconds_fragments(&self) -> u16 {
        self.seconds_fragments
    }

    /// Decode the 4-byte form.
    pub fn decode(bytes: &[u8]) -> Result<Self, TypeError> {
        check_len("smalldatetime", bytes, Self::WIRE_LEN)?;
        Self::new(
            u16::from_le_bytes([bytes[0], bytes[1]]),
            u16::from_le_bytes([bytes[2], bytes[3]]),
        )
    }

    /// Encode the 4-byte form.
    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_u16_le(self.days);
        dst.put_u16_le(self.seconds_fragments);
    }
}

#[cfg(feature = "chrono")]
mod chrono_impls {
    use chrono::{Datelike, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Timelike, Utc};

    use super::{
        DATETIME_TICKS_PER_DAY, Date, DateTime, DateTime2, DateTimeOffset, MINUTES_PER_DAY,
        MAX_TIME_SCALE, SmallDateTime, Time,
    };
    use crate::error::TypeError;

    /// `num_days_from_ce` of 1900-01-01.
    const CE_DAYS_1900: i32 = 693_596;

    const NANOS_PER_SECOND: u64 = 1_000_000_000;

    fn date_from_ce(days: i64) -> Result<NaiveDate, TypeError> {
        i32::try_from(days)
            .ok()
            .and_then(NaiveDate::from_num_days_from_ce_opt)
            .ok_or_else(|| TypeError::InvalidValue(format!("day {days} is out of range")))
    }

    fn nanos_from_midnight(time: NaiveTime) -> u64 {
        // Leap seconds fold into the last second of the day.
        u64::from(time.num_seconds_from_midnight()) * NANOS_PER_SECOND
            + u64::from(time.nanosecond().min(999_999_999))
    }

    impl TryFrom<Date> for NaiveDate {
        type Error = TypeError;

        fn try_from(date: Date) -> Result<Self, Self::Error> {
            date_from_ce(i64::from(date.days) + 1)
        }
    }

    impl TryFrom<NaiveDate> for Date {
        type Error = TypeError;

        fn try_from(date: NaiveDate) -> Result<Self, Self::Error> {
            let days = u32::try_from(date.num_days_from_ce() - 1)
                .map_err(|_| TypeError::Overflow { target: "date" })?;
            Date::new(days)
        }
    }

    impl TryFrom<Time> for NaiveTime {
        type Error = TypeError;

        fn try_from(time: Time) -> Result<Self, Self::Error> {
            let per_second = 10u64.pow(u32::from(time.scale));
            let seconds = time.increments / per_second;
            let nanos =
                (time.increments % per_second) * 10u64.pow(9 - u32::from(time.scale));
            NaiveTime::from_num_seconds_from_midnight_opt(seconds as u32, nanos as u32)
                .ok_or_else(|| TypeError::InvalidValue(format!("{seconds} seconds past midnight")))
        }
    }

    impl From<NaiveTime> for Time {
        /// Converts at scale 7 (100 ns), the finest the server stores.
        fn from(time: NaiveTime) -> Self {
            Time {
                increments: nanos_from_midnight(time) / 100,
                scale: MAX_TIME_SCALE,
            }
        }
    }

    impl TryFrom<DateTime2> for NaiveDateTime {
        type Error = TypeError;

        fn try_from(value: DateTime2) -> Result<Self, Self::Error> {
            Ok(NaiveDateTime::new(
                NaiveDate::try_from(value.date)?,
                NaiveTime::try_from(value.time)?,
            ))
        }
    }

    impl TryFrom<NaiveDateTime> for DateTime2 {
        type Error = TypeError;

        fn try_from(value: NaiveDateTime) -> Result<Self, Self::Error> {
            Ok(DateTime2::new(
                Date::try_from(value.date())?,
                Time::from(value.time()),
            ))
        }
    }

    impl TryFrom<DateTimeOffset> for chrono::DateTime<FixedOffset> {
        type Error = TypeError;

        fn try_from(value: DateTimeOffset) -> Result<Self, Self::Error> {
            let utc = NaiveDateTime::try_from(value.datetime2)?;
            let offset = FixedOffset::east_opt(i32::from(value.offset) * 60).ok_or_else(|| {
                TypeError::InvalidValue(format!("offset of {} minutes", value.offset))
            })?;
            Ok(chrono::DateTime::from_naive_utc_and_offset(utc, offset))
        }
    }

    impl TryFrom<chrono::DateTime<FixedOffset>> for DateTimeOffset {
        type Error = TypeError;

        fn try_from(value: chrono::DateTime<FixedOffset>) -> Result<Self, Self::Error> {
            let seconds = value.offset().local_minus_utc();
            if seconds % 60 != 0 {
                return Err(TypeError::InvalidValue(format!(
                    "offset of {seconds} seconds is not whole minutes"
                )));
            }
            let offset = i16::try_from(seconds / 60)
                .map_err(|_| TypeError::Overflow { target: "datetimeoffset" })?;
            DateTimeOffset::new(DateTime2::try_from(value.naive_utc())?, offset)
        }
    }

    impl TryFrom<DateTimeOffset> for chrono::DateTime<Utc> {
        type Error = TypeError;

        fn try_from(value: DateTimeOffset) -> Result<Self, Self::Error> {
            let utc = NaiveDateTime::try_from(value.datetime2)?;
            Ok(chrono::DateTime::from_naive_utc_and_offset(utc, Utc))
        }
    }

    impl TryFrom<chrono::DateTime<Utc>> for DateTimeOffset {
        type Error = TypeError;

        fn try_from(value: chrono::DateTime<Utc>) -> Result<Self, Self::Error> {
            DateTimeOffset::new(DateTime2::try_from(value.naive_utc())?, 0)
        }
    }

    impl TryFrom<DateTime> for NaiveDateTime {
        type Error = TypeError;

        fn try_from(value: DateTime) -> Result<Self, Self::Error> {
            let date = date_from_ce(i64::from(CE_DAYS_1900) + i64::from(value.days))?;
            let nanos = u64::from(value.seconds_fragments) * NANOS_PER_SECOND / 300;
            let time = NaiveTime::from_num_seconds_from_midnight_opt(
                (nanos / NANOS_PER_SECOND) as u32,
                (nanos % NANOS_PER_SECOND) as u32,
            )
            .ok_or_else(|| TypeError::InvalidValue("datetime ticks".into()))?;
            Ok(NaiveDateTime::new(date, time))
        }
    }

    impl TryFrom<NaiveDateTime> for DateTime {
        type Error = TypeError;

        /// Rounds to the nearest 1/300 second.
        fn try_from(value: NaiveDateTime) -> Result<Self, Self::Error> {
            let nanos = nanos_from_midnight(value.time());
            let mut ticks = ((nanos * 300 + NANOS_PER_SECOND / 2) / NANOS_PER_SECOND) as u32;
            let mut days = value.date().num_days_from_ce() - CE_DAYS_1900;
            if ticks == DATETIME_TICKS_PER_DAY {
                ticks = 0;
                days = days
                    .checked_add(1)
                    .ok_or(TypeError::Overflow { target: "datetime" })?;
            }
            DateTime::new(days, ticks)
        }
    }

    impl TryFrom<SmallDateTime> for NaiveDateTime {
        type Error = TypeError;

        fn try_from(value: SmallDateTime) -> Result<Self, Self::Error> {
            let date = date_from_ce(i64::from(CE_DAYS_1900) + i64::from(value.days))?;
            let time = NaiveTime::from_num_seconds_from_midnight_opt(
                u32::from(value.seconds_fragments) * 60,
                0,
            )
            .ok_or_else(|| TypeError::InvalidValue("smalldatetime minutes".into()))?;
            Ok(NaiveDateTime::new(date, time))
        }
    }

    impl TryFrom<NaiveDateTime> for SmallDateTime {
        type Error = TypeError;

        /// Rounds to the nearest minute.
        fn try_from(value: NaiveDateTime) -> Result<Self, Self::Error> {
            let seconds = value.time().num_seconds_from_midnight();
            let mut minutes = ((seconds + 30) / 60) as u16;
            let mut days = value.date().num_days_from_ce() - CE_DAYS_1900;
            if minutes == MINUTES_PER_DAY {
                minutes = 0;
                days += 1;
            }
            let days =
                u16::try_from(days).map_err(|_| TypeError::Overflow { target: "smalldatetime" })?;
            SmallDateTime::new(days, minutes)
        }
    }

}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_time_widths() {
        assert_eq!(time_len(0), 3);
        assert_eq!(time_len(2), 3);
        assert_eq!(time_len(3), 4);
        assert_eq!(time_len(4), 4);
        assert_eq!(time_len(5), 5);
        assert_eq!(time_len(7), 5);
    }

    #[test]
    fn test_fixed_width_mismatch_is_rejected() {
        assert!(matches!(
            Date::decode(&[1, 2]),
            Err(TypeError::InvalidLength { type_name: "date", actual: 2 })
        ));
        assert!(matches!(
            Time::decode(&[0; 5], 3),
            Err(TypeError::InvalidLength { type_name: "time", actual: 5 })
        ));
        assert!(DateTime2::decode(&[0; 7], 7).is_err());
        assert!(DateTimeOffset::decode(&[0; 9], 7).is_err());
        assert!(DateTime::decode(&[0; 4]).is_err());
        assert!(SmallDateTime::decode(&[0; 8]).is_err());
    }

    #[test]
    fn test_out_of_range_fields() {
        assert!(Date::new(MAX_DATE_DAYS + 1).is_err());
        assert!(Time::new(86_400, 0).is_err());
        assert!(Time::new(0, 8).is_err());
        let dt2 = DateTime2::new(Date::new(0).unwrap(), Time::new(0, 0).unwrap());
        assert!(DateTimeOffset::new(dt2, 841).is_err());
        assert!(DateTimeOffset::new(dt2, -841).is_err());
        assert!(DateTimeOffset::new(dt2, -840).is_ok());
        assert!(DateTime::new(0, 300 * 86_400).is_err());
        assert!(SmallDateTime::new(0, 1440).is_err());
    }

    #[test]
    fn test_datetimeoffset_layout() {
        let dto = DateTimeOffset::new(
            DateTime2::new(Date::new(0x01_0203).unwrap(), Time::new(0x0A0B, 0).unwrap()),
            -60,
        )
        .unwrap();
        let mut buf = Vec::new();
        dto.encode(&mut buf);
        assert_eq!(buf, [0x0B, 0x0A, 0x00, 0x03, 0x02, 0x01, 0xC4, 0xFF]);
        assert_eq!(dto.wire_len(), buf.len());
    }

    proptest! {
        #[test]
        fn prop_date_round_trip(days in 0u32..=MAX_DATE_DAYS) {
            let date = Date::new(days).unwrap();
            let mut buf = Vec::new();
            date.encode(&mut buf);
            prop_assert_eq!(Date::decode(&buf).unwrap(), date);
        }

        #[test]
        fn prop_datetimeoffset_round_trip(
            scale in 0u8..=7,
            fraction in 0.0f64..1.0,
            days in 0u32..=MAX_DATE_DAYS,
            offset in -840i16..=840,
        ) {
            let per_day = 86_400 * 10u64.pow(u32::from(scale));
            let increments = ((per_day as f64) * fraction) as u64 % per_day;
            let value = DateTimeOffset::new(
                DateTime2::new(Date::new(days).unwrap(), Time::new(increments, scale).unwrap()),
                offset,
            )
            .unwrap();
            let mut buf = Vec::new();
            value.encode(&mut buf);
            prop_assert_eq!(buf.len(), value.wire_len());
            prop_assert_eq!(DateTimeOffset::decode(&buf, scale).unwrap(), value);
        }

        #[test]
        fn prop_legacy_round_trip(days in any::<i32>(), ticks in 0u32..300 * 86_400, small_days in any::<u16>(), minutes in 0u16..1440) {
            let dt = DateTime::new(days, ticks).unwrap();
            let mut buf = Vec::new();
            dt.encode(&mut buf);
            prop_assert_eq!(DateTime::decode(&buf).unwrap(), dt);

            let sdt = SmallDateTime::new(small_days, minutes).unwrap();
            let mut buf = Vec::new();
            sdt.encode(&mut buf);
            prop_assert_eq!(SmallDateTime::decode(&buf).unwrap(), sdt);
        }
    }
}
