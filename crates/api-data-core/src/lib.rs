use std::fmt::{Display, Formatter};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use time::macros::format_description;
use time::{Date, Month, PrimitiveDateTime, Time, UtcOffset, Weekday};

pub const CHRISTMAS: Holiday = Holiday { name: "christmas", month: Month::December, day: 25 };
pub const HALLOWEEN: Holiday = Holiday { name: "halloween", month: Month::October, day: 31 };

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Id,
    Name,
    Timestamp,
    Value,
}

impl Field {
    /// Every field a raw record must carry, in reporting order.
    pub const REQUIRED: [Self; 4] = [Self::Id, Self::Name, Self::Timestamp, Self::Value];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Id => "id",
            Self::Name => "name",
            Self::Timestamp => "timestamp",
            Self::Value => "value",
        }
    }
}

impl Display for Field {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn join_fields(fields: &[Field]) -> String {
    fields.iter().map(|field| field.as_str()).collect::<Vec<_>>().join(", ")
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ValidationKind {
    MissingFields,
    InvalidFields,
    DuplicateId,
    MalformedId,
}

impl ValidationKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MissingFields => "missing_fields",
            Self::InvalidFields => "invalid_fields",
            Self::DuplicateId => "duplicate_id",
            Self::MalformedId => "malformed_id",
        }
    }
}

/// Business-rule rejection of a raw record. Never fatal to the caller.
#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum ValidationError {
    #[error("missing values for fields: {}", join_fields(.0))]
    MissingFields(Vec<Field>),
    #[error("invalid values for fields: {}", join_fields(.0))]
    InvalidFields(Vec<Field>),
    #[error("id {0} already present in table")]
    DuplicateId(i64),
    #[error("id must be an integer")]
    MalformedId,
}

impl ValidationError {
    #[must_use]
    pub fn kind(&self) -> ValidationKind {
        match self {
            Self::MissingFields(_) => ValidationKind::MissingFields,
            Self::InvalidFields(_) => ValidationKind::InvalidFields,
            Self::DuplicateId(_) => ValidationKind::DuplicateId,
            Self::MalformedId => ValidationKind::MalformedId,
        }
    }

    #[must_use]
    pub fn fields(&self) -> &[Field] {
        match self {
            Self::MissingFields(fields) | Self::InvalidFields(fields) => fields,
            Self::DuplicateId(_) | Self::MalformedId => &[Field::Id],
        }
    }
}

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
#[error("invalid ISO-8601 timestamp: {raw:?}")]
pub struct ParseError {
    pub raw: String,
}

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum TransformError {
    #[error(transparent)]
    Timestamp(#[from] ParseError),
    #[error("value {0} cannot be doubled without overflow")]
    ValueOverflow(i64),
    #[error("{holiday} of year {year} is not a representable date")]
    CalendarRange { holiday: &'static str, year: i32 },
}

/// Failure of [`validate_record`]: either a rejection or a broken store read.
#[derive(Debug, thiserror::Error)]
pub enum ValidateError<E> {
    #[error(transparent)]
    Rejected(#[from] ValidationError),
    #[error("record lookup failed: {0}")]
    Lookup(#[source] E),
}

/// Read-only view of the record store used for the duplicate-id probe.
pub trait RecordLookup {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Report whether a record with `id` is already stored.
    ///
    /// # Errors
    /// Returns the store's error when the lookup query cannot run.
    fn contains_id(&self, id: i64) -> Result<bool, Self::Error>;
}

/// A raw record whose shape and types have been confirmed.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct ValidatedRecord {
    pub id: i64,
    pub name: String,
    pub timestamp: String,
    pub value: i64,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Transformed {
    pub name: String,
    pub timestamp: PrimitiveDateTime,
    pub value: i64,
    pub weekday: &'static str,
    pub days_till_christmas: i64,
    pub days_till_halloween: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct StoredRecord {
    pub id: i64,
    pub name: String,
    #[serde(
        serialize_with = "serialize_stored_timestamp",
        deserialize_with = "deserialize_stored_timestamp"
    )]
    pub timestamp: PrimitiveDateTime,
    pub value: i64,
    pub weekday: String,
    pub days_till_christmas: i64,
    pub days_till_halloween: i64,
}

impl StoredRecord {
    #[must_use]
    pub fn from_parts(id: i64, transformed: Transformed) -> Self {
        Self {
            id,
            name: transformed.name,
            timestamp: transformed.timestamp,
            value: transformed.value,
            weekday: transformed.weekday.to_string(),
            days_till_christmas: transformed.days_till_christmas,
            days_till_halloween: transformed.days_till_halloween,
        }
    }
}

/// Fixed month/day that recurs every year.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct Holiday {
    pub name: &'static str,
    pub month: Month,
    pub day: u8,
}

impl Holiday {
    /// Whole days from `today` to the next occurrence on or after it.
    ///
    /// # Errors
    /// Returns [`TransformError::CalendarRange`] when the next occurrence falls
    /// outside the supported calendar.
    pub fn days_until(self, today: Date) -> Result<i64, TransformError> {
        let mut target = self.in_year(today.year())?;
        if today > target {
            target = self.in_year(today.year() + 1)?;
        }
        Ok((target - today).whole_days())
    }

    fn in_year(self, year: i32) -> Result<Date, TransformError> {
        Date::from_calendar_date(year, self.month, self.day)
            .map_err(|_| TransformError::CalendarRange { holiday: self.name, year })
    }
}

/// Check a raw payload's shape, types and id uniqueness.
///
/// The id probe runs before missing/invalid reporting, so a duplicate or
/// malformed id wins over other problems. Missing fields are reported ahead of
/// invalid ones.
///
/// # Errors
/// Returns [`ValidateError::Rejected`] for business-rule rejections and
/// [`ValidateError::Lookup`] when the store cannot be queried.
pub fn validate_record<L: RecordLookup>(
    raw: &Value,
    lookup: &L,
) -> Result<ValidatedRecord, ValidateError<L::Error>> {
    let Some(object) = raw.as_object() else {
        return Err(ValidationError::MissingFields(Field::REQUIRED.to_vec()).into());
    };

    let mut missing = Vec::new();
    let mut invalid = Vec::new();

    let id = extract(object, Field::Id, &mut missing, &mut invalid, Value::as_i64);
    let name = extract(object, Field::Name, &mut missing, &mut invalid, |value| {
        value.as_str().map(str::to_owned)
    });
    let timestamp = extract(object, Field::Timestamp, &mut missing, &mut invalid, |value| {
        value.as_str().filter(|raw| parse_timestamp(raw).is_ok()).map(str::to_owned)
    });
    let value = extract(object, Field::Value, &mut missing, &mut invalid, |value| {
        value.as_i64().filter(|number| number.checked_mul(2).is_some())
    });

    if let Some(raw_id) = object.get(Field::Id.as_str()) {
        let probe = coerce_id(raw_id).ok_or(ValidationError::MalformedId)?;
        if lookup.contains_id(probe).map_err(ValidateError::Lookup)? {
            return Err(ValidationError::DuplicateId(probe).into());
        }
    }

    if !missing.is_empty() {
        return Err(ValidationError::MissingFields(missing).into());
    }

    let (Some(id), Some(name), Some(timestamp), Some(value)) = (id, name, timestamp, value) else {
        return Err(ValidationError::InvalidFields(invalid).into());
    };

    Ok(ValidatedRecord { id, name, timestamp, value })
}

fn extract<T>(
    object: &Map<String, Value>,
    field: Field,
    missing: &mut Vec<Field>,
    invalid: &mut Vec<Field>,
    convert: impl Fn(&Value) -> Option<T>,
) -> Option<T> {
    let Some(value) = object.get(field.as_str()) else {
        missing.push(field);
        return None;
    };
    let converted = convert(value);
    if converted.is_none() {
        invalid.push(field);
    }
    converted
}

#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn coerce_id(value: &Value) -> Option<i64> {
    match value {
        Value::Number(number) => number.as_i64().or_else(|| {
            let truncated = number.as_f64()?.trunc();
            let in_range = truncated >= i64::MIN as f64 && truncated < i64::MAX as f64;
            in_range.then_some(truncated as i64)
        }),
        Value::String(text) => text.trim().parse::<i64>().ok(),
        _ => None,
    }
}

/// Derive the stored fields from a validated record.
///
/// # Errors
/// Returns [`TransformError::Timestamp`] when the timestamp is not ISO-8601,
/// and the other variants when the value or a holiday date cannot be
/// represented.
pub fn transform(record: &ValidatedRecord) -> Result<Transformed, TransformError> {
    let timestamp = parse_timestamp(&record.timestamp)?;
    let today = timestamp.date();
    let value =
        record.value.checked_mul(2).ok_or(TransformError::ValueOverflow(record.value))?;

    Ok(Transformed {
        name: normalize_name(&record.name),
        timestamp,
        value,
        weekday: weekday_name(today.weekday()),
        days_till_christmas: CHRISTMAS.days_until(today)?,
        days_till_halloween: HALLOWEEN.days_until(today)?,
    })
}

/// Remove every whitespace character and lowercase the rest.
#[must_use]
pub fn normalize_name(raw: &str) -> String {
    raw.chars().filter(|c| !c.is_whitespace()).flat_map(char::to_lowercase).collect()
}

#[must_use]
pub fn weekday_name(weekday: Weekday) -> &'static str {
    match weekday {
        Weekday::Monday => "Monday",
        Weekday::Tuesday => "Tuesday",
        Weekday::Wednesday => "Wednesday",
        Weekday::Thursday => "Thursday",
        Weekday::Friday => "Friday",
        Weekday::Saturday => "Saturday",
        Weekday::Sunday => "Sunday",
    }
}

/// Parse an ISO-8601 date-time into its wall-clock value.
///
/// Accepts extended and basic calendar dates, ISO week dates, any single
/// character between date and time, times truncated to hours or minutes, and
/// fractions after `.` or `,`. A trailing `Z` or numeric offset is checked and
/// dropped, keeping the local date of that offset. A bare date is read as
/// midnight.
///
/// # Errors
/// Returns [`ParseError`] when no supported layout matches.
pub fn parse_timestamp(raw: &str) -> Result<PrimitiveDateTime, ParseError> {
    parse_iso_datetime(raw).ok_or_else(|| ParseError { raw: raw.to_string() })
}

fn parse_iso_datetime(raw: &str) -> Option<PrimitiveDateTime> {
    let date_len = if raw.as_bytes().get(4) == Some(&b'-') { 10 } else { 8 };
    let date = parse_iso_date(raw.get(..date_len)?)?;

    let mut rest = raw.get(date_len..)?.chars();
    if rest.next().is_none() {
        return Some(date.midnight());
    }
    let time = parse_iso_time(rest.as_str())?;
    Some(PrimitiveDateTime::new(date, time))
}

fn parse_iso_date(text: &str) -> Option<Date> {
    let layouts = [
        format_description!("[year]-[month]-[day]"),
        format_description!("[year][month][day]"),
        format_description!("[year base:iso_week]-W[week_number repr:iso]-[weekday repr:monday]"),
    ];
    layouts.into_iter().find_map(|layout| Date::parse(text, layout).ok())
}

fn parse_iso_time(text: &str) -> Option<Time> {
    let (clock, offset) = match text.find(['+', '-', 'Z', 'z']) {
        Some(at) => text.split_at(at),
        None => (text, ""),
    };
    if !offset.is_empty() && !is_utc_offset(offset) {
        return None;
    }

    let clock = clock.replacen(',', ".", 1);
    let layouts = [
        format_description!("[hour]:[minute]:[second].[subsecond]"),
        format_description!("[hour]:[minute]:[second]"),
        format_description!("[hour]:[minute]"),
        format_description!("[hour]"),
        format_description!("[hour][minute][second].[subsecond]"),
        format_description!("[hour][minute][second]"),
        format_description!("[hour][minute]"),
    ];
    layouts.into_iter().find_map(|layout| Time::parse(&clock, layout).ok())
}

fn is_utc_offset(text: &str) -> bool {
    if text.eq_ignore_ascii_case("z") {
        return true;
    }
    let layouts = [
        format_description!("[offset_hour sign:mandatory]:[offset_minute]:[offset_second]"),
        format_description!("[offset_hour sign:mandatory]:[offset_minute]"),
        format_description!("[offset_hour sign:mandatory][offset_minute][offset_second]"),
        format_description!("[offset_hour sign:mandatory][offset_minute]"),
        format_description!("[offset_hour sign:mandatory]"),
    ];
    layouts.into_iter().any(|layout| UtcOffset::parse(text, layout).is_ok())
}

/// Render a timestamp in the store's column layout.
///
/// # Errors
/// Returns an error when the value cannot be formatted.
pub fn format_stored_timestamp(value: PrimitiveDateTime) -> Result<String, time::error::Format> {
    value.format(format_description!(
        "[year]-[month]-[day] [hour]:[minute]:[second].[subsecond digits:6]"
    ))
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn serialize_stored_timestamp<S: Serializer>(
    value: &PrimitiveDateTime,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    let text = format_stored_timestamp(*value).map_err(serde::ser::Error::custom)?;
    serializer.serialize_str(&text)
}

fn deserialize_stored_timestamp<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<PrimitiveDateTime, D::Error> {
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw).map_err(serde::de::Error::custom)
}
