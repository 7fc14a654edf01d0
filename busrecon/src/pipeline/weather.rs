use std::collections::HashMap;
use std::path::Path;

use chrono::NaiveDate;
use serde::Deserialize;

use crate::pipeline::codec;
use crate::pipeline::pipeline_error::PipelineError;

/// daily weather condition, encoded as 0/1/2 in the segment tables.
/// snow takes priority over rain when both flags are set for a date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeatherCode {
    Sunny,
    Rainy,
    Snowy,
}

impl WeatherCode {
    pub fn code(&self) -> u8 {
        match self {
            WeatherCode::Sunny => 0,
            WeatherCode::Rainy => 1,
            WeatherCode::Snowy => 2,
        }
    }
}

#[derive(Debug, Deserialize)]
struct WeatherRow {
    #[serde(with = "codec::compact_date")]
    date: NaiveDate,
    rain: u8,
    snow: u8,
}

/// date -> condition lookup backed by the pre-materialized weather CSV.
#[derive(Debug)]
pub struct WeatherTable {
    by_date: HashMap<NaiveDate, WeatherCode>,
}

impl WeatherTable {
    pub fn from_csv(path: &Path) -> Result<WeatherTable, PipelineError> {
        let mut reader = csv::Reader::from_path(path)?;
        let mut by_date = HashMap::new();
        for row in reader.deserialize::<WeatherRow>() {
            let row = row?;
            let code = if row.snow == 1 {
                WeatherCode::Snowy
            } else if row.rain == 1 {
                WeatherCode::Rainy
            } else {
                WeatherCode::Sunny
            };
            by_date.insert(row.date, code);
        }
        if by_date.is_empty() {
            return Err(PipelineError::EmptyTableError(format!(
                "weather table {path:?}"
            )));
        }
        Ok(WeatherTable { by_date })
    }

    #[cfg(test)]
    pub fn from_entries(entries: Vec<(NaiveDate, WeatherCode)>) -> WeatherTable {
        WeatherTable {
            by_date: entries.into_iter().collect(),
        }
    }

    /// dates missing from the table read as sunny rather than aborting the
    /// batch; the gap is logged once per lookup.
    pub fn code_for(&self, date: &NaiveDate) -> u8 {
        match self.by_date.get(date) {
            Some(code) => code.code(),
            None => {
                log::warn!("no weather entry for {date}, defaulting to sunny");
                WeatherCode::Sunny.code()
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_snow_overrides_rain() {
        let data = "date,year,month,day,fog,rain,snow\n\
                    20160110,2016,1,10,0,1,1\n\
                    20160111,2016,1,11,0,1,0\n\
                    20160112,2016,1,12,0,0,0\n";
        let mut reader = csv::Reader::from_reader(data.as_bytes());
        let mut by_date = HashMap::new();
        for row in reader.deserialize::<WeatherRow>() {
            let row = row.unwrap();
            let code = if row.snow == 1 {
                WeatherCode::Snowy
            } else if row.rain == 1 {
                WeatherCode::Rainy
            } else {
                WeatherCode::Sunny
            };
            by_date.insert(row.date, code);
        }
        let table = WeatherTable { by_date };
        let d = |day| NaiveDate::from_ymd_opt(2016, 1, day).unwrap();
        assert_eq!(table.code_for(&d(10)), 2);
        assert_eq!(table.code_for(&d(11)), 1);
        assert_eq!(table.code_for(&d(12)), 0);
    }

    #[test]
    fn test_missing_date_defaults_to_sunny() {
        let table = WeatherTable::from_entries(vec![]);
        let date = NaiveDate::from_ymd_opt(2016, 1, 20).unwrap();
        assert_eq!(table.code_for(&date), 0);
    }
}
