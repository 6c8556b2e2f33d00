//! Identifiers and timestamps shared by documents, folders and the event log
use chrono::{DateTime, Months, TimeZone, Utc};
use std::fmt;

use crate::utils::new_uuid_to_bech32;

macro_rules! identifier {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_owned())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl<C> minicbor::Encode<C> for $name {
            fn encode<W: minicbor::encode::Write>(
                &self,
                e: &mut minicbor::Encoder<W>,
                _: &mut C,
            ) -> Result<(), minicbor::encode::Error<W::Error>> {
                e.str(&self.0)?.ok()
            }
        }

        impl<'b, C> minicbor::Decode<'b, C> for $name {
            fn decode(
                d: &mut minicbor::Decoder<'b>,
                _: &mut C,
            ) -> Result<Self, minicbor::decode::Error> {
                Ok(Self(d.str()?.to_owned()))
            }
        }
    };
}

identifier!(
    /// A document record; one per version of a logical document.
    DocumentId
);
identifier!(FolderId);
identifier!(EventId);
identifier!(
    /// A user as known to the external identity service.
    UserId
);
identifier!(GroupId);

impl DocumentId {
    pub fn generate() -> anyhow::Result<Self> {
        Ok(Self(new_uuid_to_bech32("doc")?))
    }
}

impl FolderId {
    pub fn generate() -> anyhow::Result<Self> {
        Ok(Self(new_uuid_to_bech32("fld")?))
    }
}

impl EventId {
    // uuid7 keeps log keys in creation order
    pub fn generate() -> Self {
        Self(uuid7::uuid7().to_string())
    }
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct TimeStamp<T: TimeZone>(DateTime<T>);

impl TimeStamp<Utc> {
    pub fn new() -> Self {
        Self(Utc::now())
    }
    pub fn new_with(year: i32, month: u32, day: u32, hour: u32, min: u32, sec: u32) -> Self {
        Utc.with_ymd_and_hms(year, month, day, hour, min, sec)
            .unwrap()
            .into()
    }
    pub fn to_datetime_utc(&self) -> DateTime<Utc> {
        self.0
    }
    /// Same instant `months` calendar months later, clamped to the month's end.
    pub fn plus_months(&self, months: u32) -> Self {
        self.0
            .checked_add_months(Months::new(months))
            .map(TimeStamp)
            .unwrap_or_else(|| self.clone())
    }
}

// Utc itself is not Ord, so ordering goes through the inner instant.
impl PartialOrd for TimeStamp<Utc> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimeStamp<Utc> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}

impl Default for TimeStamp<Utc> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: TimeZone> From<DateTime<T>> for TimeStamp<T> {
    fn from(value: DateTime<T>) -> Self {
        TimeStamp(value)
    }
}

impl<C> minicbor::Encode<C> for TimeStamp<Utc> {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        if let Some(nsec) = self.0.timestamp_nanos_opt() {
            return e.i64(nsec)?.ok();
        }

        Err(minicbor::encode::Error::message(
            "failed to encode timestamp. timestamp_nanos_opt returned None",
        ))
    }
}

impl<'b, C> minicbor::Decode<'b, C> for TimeStamp<Utc> {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let nsecs = d.i64()?;

        Ok(TimeStamp(DateTime::from_timestamp_nanos(nsecs)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;

    #[test]
    fn timestamp_encoding() {
        let original = TimeStamp::new();

        let encoding = minicbor::to_vec(original.clone()).unwrap();
        let decode: TimeStamp<Utc> = minicbor::decode(&encoding).unwrap();

        assert_eq!(original, decode);
    }

    #[test]
    fn identifiers_encode_as_plain_text() {
        let id = UserId::from("alice");

        let encoding = minicbor::to_vec(&id).unwrap();
        let text: String = minicbor::decode(&encoding).unwrap();

        assert_eq!(text, "alice");
    }

    #[test]
    fn timestamps_order_by_instant() {
        let earlier = TimeStamp::new_with(2024, 3, 1, 8, 0, 0);
        let later = TimeStamp::new_with(2024, 3, 1, 8, 0, 1);

        assert!(earlier < later);
        assert_eq!(later.cmp(&earlier), std::cmp::Ordering::Greater);
        assert_eq!(earlier.clone().max(later.clone()), later);
    }

    #[test]
    fn plus_months_clamps_to_month_end() {
        let jan = TimeStamp::new_with(2024, 1, 31, 9, 0, 0);
        let feb = jan.plus_months(1).to_datetime_utc();

        assert_eq!((feb.month(), feb.day()), (2, 29));
    }
}
