//! serde codecs for the column formats found in the historical bus position
//! dumps and the derived CSV artifacts.

pub mod compact_date {
    //! dates in yyyymmdd format, as written in the `service_date` column of
    //! the historical dumps and the `date` column of the weather table.
    use chrono::NaiveDate;
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub const COMPACT_DATE_FORMAT: &str = "%Y%m%d";

    pub fn serialize<S>(date: &NaiveDate, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&date.format(COMPACT_DATE_FORMAT).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<NaiveDate, D::Error>
    where
        D: Deserializer<'de>,
    {
        let date_str: String = String::deserialize(deserializer)?;
        NaiveDate::parse_from_str(date_str.trim(), COMPACT_DATE_FORMAT)
            .map_err(|e| D::Error::custom(format!("Invalid date format: {e}")))
    }
}

pub mod utc_timestamp {
    //! timestamps in the `2017-01-16T15:09:28Z` shape used by the position
    //! report feed. the trailing Z is decorative; values are wall-clock local.
    use chrono::NaiveDateTime;
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

    pub fn serialize<S>(ts: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&ts.format(TIMESTAMP_FORMAT).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<NaiveDateTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ts_str: String = String::deserialize(deserializer)?;
        NaiveDateTime::parse_from_str(ts_str.trim(), TIMESTAMP_FORMAT)
            .map_err(|e| D::Error::custom(format!("Invalid timestamp format: {e}")))
    }
}

pub mod time_of_day {
    //! HH:MM:SS wall-clock times in the expanded segment and snapshot tables.
    use chrono::NaiveTime;
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub const TIME_OF_DAY_FORMAT: &str = "%H:%M:%S";

    pub fn serialize<S>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&time.format(TIME_OF_DAY_FORMAT).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<NaiveTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        let time_str: String = String::deserialize(deserializer)?;
        NaiveTime::parse_from_str(time_str.trim(), TIME_OF_DAY_FORMAT)
            .map_err(|e| D::Error::custom(format!("Invalid time format: {e}")))
    }
}

pub mod nullable_f64 {
    //! float columns in the historical dumps carry an escaped-null marker
    //! (`\N`) or an empty string when the AVL unit reported no value.
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Option<f64>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(v) => serializer.serialize_f64(*v),
            None => serializer.serialize_str(""),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw: String = String::deserialize(deserializer)?;
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed == "\\N" || trimmed == "NULL" {
            return Ok(None);
        }
        trimmed
            .parse::<f64>()
            .map(Some)
            .map_err(|e| D::Error::custom(format!("Invalid float value '{trimmed}': {e}")))
    }
}

pub mod nullable_i64 {
    //! integer columns with the same escaped-null convention as the floats.
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Option<i64>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(v) => serializer.serialize_i64(*v),
            None => serializer.serialize_str(""),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw: String = String::deserialize(deserializer)?;
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed == "\\N" || trimmed == "NULL" {
            return Ok(None);
        }
        trimmed
            .parse::<i64>()
            .map(Some)
            .map_err(|e| D::Error::custom(format!("Invalid integer value '{trimmed}': {e}")))
    }
}

#[cfg(test)]
mod test {
    use chrono::NaiveDate;
    use serde::Deserialize;

    #[derive(Deserialize)]
    struct Row {
        #[serde(with = "super::compact_date")]
        date: NaiveDate,
        #[serde(with = "super::nullable_f64")]
        dist: Option<f64>,
    }

    #[test]
    fn test_escaped_null_reads_as_none() {
        let data = "date,dist\n20160104,\\N\n20160105,151.6\n";
        let mut reader = csv::Reader::from_reader(data.as_bytes());
        let rows: Vec<Row> = reader.deserialize().collect::<Result<_, _>>().unwrap();
        assert_eq!(rows[0].dist, None);
        assert_eq!(rows[1].dist, Some(151.6));
        assert_eq!(
            rows[0].date,
            NaiveDate::from_ymd_opt(2016, 1, 4).unwrap()
        );
    }
}
