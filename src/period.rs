// 📅 Calendar Periods - month / quarter / year buckets
// Every alignment in the pipeline happens on these keys, never on raw dates

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// FREQUENCY
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Monthly,
    Quarterly,
    Yearly,
}

impl Frequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Frequency::Monthly => "monthly",
            Frequency::Quarterly => "quarterly",
            Frequency::Yearly => "yearly",
        }
    }

    /// Coarseness rank: monthly < quarterly < yearly
    pub fn rank(&self) -> u8 {
        match self {
            Frequency::Monthly => 0,
            Frequency::Quarterly => 1,
            Frequency::Yearly => 2,
        }
    }

    /// Can a series at `self` be down-sampled (or kept) at `target`?
    pub fn can_resample_to(&self, target: Frequency) -> bool {
        target.rank() >= self.rank()
    }

    /// Name of the label column attached to unified tables at this frequency.
    ///
    /// Monthly rows are labelled with the quarter they fall in.
    pub fn label_column(&self) -> &'static str {
        match self {
            Frequency::Monthly | Frequency::Quarterly => "quarter",
            Frequency::Yearly => "year",
        }
    }

    /// Label for a row of a unified table at this frequency
    pub fn row_label(&self, key: PeriodKey) -> String {
        match self {
            Frequency::Monthly | Frequency::Quarterly => {
                PeriodKey::of(Frequency::Quarterly, key.start()).label()
            }
            Frequency::Yearly => key.year().to_string(),
        }
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for Frequency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "monthly" | "month" | "m" => Ok(Frequency::Monthly),
            "quarterly" | "quarter" | "q" => Ok(Frequency::Quarterly),
            "yearly" | "annual" | "year" | "y" => Ok(Frequency::Yearly),
            other => Err(format!("unknown frequency '{}'", other)),
        }
    }
}

// ============================================================================
// PERIOD KEY
// ============================================================================

/// A calendar bucket. Ordering follows the calendar for keys of one frequency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PeriodKey {
    Month { year: i32, month: u32 },
    Quarter { year: i32, quarter: u32 },
    Year(i32),
}

impl PeriodKey {
    /// Bucket containing `date` at the given frequency
    pub fn of(frequency: Frequency, date: NaiveDate) -> Self {
        match frequency {
            Frequency::Monthly => PeriodKey::Month {
                year: date.year(),
                month: date.month(),
            },
            Frequency::Quarterly => PeriodKey::Quarter {
                year: date.year(),
                quarter: (date.month() - 1) / 3 + 1,
            },
            Frequency::Yearly => PeriodKey::Year(date.year()),
        }
    }

    pub fn frequency(&self) -> Frequency {
        match self {
            PeriodKey::Month { .. } => Frequency::Monthly,
            PeriodKey::Quarter { .. } => Frequency::Quarterly,
            PeriodKey::Year(_) => Frequency::Yearly,
        }
    }

    pub fn year(&self) -> i32 {
        match *self {
            PeriodKey::Month { year, .. } | PeriodKey::Quarter { year, .. } => year,
            PeriodKey::Year(year) => year,
        }
    }

    /// First calendar day of the bucket
    pub fn start(&self) -> NaiveDate {
        let (year, month) = match *self {
            PeriodKey::Month { year, month } => (year, month),
            PeriodKey::Quarter { year, quarter } => (year, (quarter - 1) * 3 + 1),
            PeriodKey::Year(year) => (year, 1),
        };
        NaiveDate::from_ymd_opt(year, month, 1).unwrap_or(NaiveDate::MIN)
    }

    pub fn next(&self) -> Self {
        match *self {
            PeriodKey::Month { year, month: 12 } => PeriodKey::Month { year: year + 1, month: 1 },
            PeriodKey::Month { year, month } => PeriodKey::Month { year, month: month + 1 },
            PeriodKey::Quarter { year, quarter: 4 } => PeriodKey::Quarter { year: year + 1, quarter: 1 },
            PeriodKey::Quarter { year, quarter } => PeriodKey::Quarter { year, quarter: quarter + 1 },
            PeriodKey::Year(year) => PeriodKey::Year(year + 1),
        }
    }

    pub fn previous(&self) -> Self {
        match *self {
            PeriodKey::Month { year, month: 1 } => PeriodKey::Month { year: year - 1, month: 12 },
            PeriodKey::Month { year, month } => PeriodKey::Month { year, month: month - 1 },
            PeriodKey::Quarter { year, quarter: 1 } => PeriodKey::Quarter { year: year - 1, quarter: 4 },
            PeriodKey::Quarter { year, quarter } => PeriodKey::Quarter { year, quarter: quarter - 1 },
            PeriodKey::Year(year) => PeriodKey::Year(year - 1),
        }
    }

    /// `2024-01`, `2024Q1` or `2024`
    pub fn label(&self) -> String {
        match *self {
            PeriodKey::Month { year, month } => format!("{}-{:02}", year, month),
            PeriodKey::Quarter { year, quarter } => format!("{}Q{}", year, quarter),
            PeriodKey::Year(year) => year.to_string(),
        }
    }

    /// Every key from `first` to `last` inclusive. Empty if `last < first`.
    pub fn range_inclusive(first: PeriodKey, last: PeriodKey) -> Vec<PeriodKey> {
        let mut keys = Vec::new();
        if first.frequency() != last.frequency() {
            return keys;
        }
        let mut current = first;
        while current <= last {
            keys.push(current);
            current = current.next();
        }
        keys
    }
}

impl fmt::Display for PeriodKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.label())
    }
}
