use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::store::IndexFilter;
use crate::types::{AccessKey, User};

#[derive(Debug, Serialize)]
pub struct WhoamiResponse {
    #[serde(flatten)]
    pub user: User,
    /// Leaf scopes granted to the user, before any key narrowing.
    pub scopes: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_key: Option<AccessKey>,
}

#[derive(Debug, Default, Deserialize)]
pub struct NextIndexParams {
    #[serde(default, alias = "commitRef")]
    pub commit_ref: Option<String>,
}

/// Raw index list filters. Kept as strings so a malformed value is reported
/// through the regular error envelope.
#[derive(Debug, Default, Deserialize)]
pub struct IndexQueryParams {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default, alias = "commitRef")]
    pub commit_ref: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default, alias = "dateBefore")]
    pub before: Option<String>,
    #[serde(default, alias = "dateAfter")]
    pub after: Option<String>,
}

fn parse_instant(name: &str, raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::validation(format!("invalid '{name}' timestamp '{raw}': {e}")))
}

impl IndexQueryParams {
    pub fn into_filter(self) -> Result<IndexFilter> {
        let value = self
            .value
            .map(|raw| {
                raw.parse::<u32>()
                    .map_err(|_| Error::validation(format!("invalid index value '{raw}'")))
            })
            .transpose()?;

        let date = self
            .date
            .map(|raw| {
                NaiveDate::parse_from_str(&raw, "%Y-%m-%d").map_err(|_| {
                    Error::validation(format!("invalid date '{raw}', expected YYYY-MM-DD"))
                })
            })
            .transpose()?;

        let before = self
            .before
            .map(|raw| parse_instant("before", &raw))
            .transpose()?;
        let after = self
            .after
            .map(|raw| parse_instant("after", &raw))
            .transpose()?;

        Ok(IndexFilter {
            id: self.id,
            commit_ref: self.commit_ref.map(|c| c.to_ascii_lowercase()),
            value,
            date,
            before,
            after,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_query_is_empty_filter() {
        let filter = IndexQueryParams::default().into_filter().unwrap();
        assert_eq!(filter, IndexFilter::default());
    }

    #[test]
    fn test_query_parses_every_filter() {
        let params = IndexQueryParams {
            id: Some("abc".into()),
            commit_ref: Some("A".repeat(40)),
            value: Some("7".into()),
            date: Some("2024-03-01".into()),
            before: Some("2024-03-02T00:00:00Z".into()),
            after: Some("2024-02-28T12:00:00+02:00".into()),
        };
        let filter = params.into_filter().unwrap();

        assert_eq!(filter.id.as_deref(), Some("abc"));
        assert_eq!(filter.commit_ref, Some("a".repeat(40)));
        assert_eq!(filter.value, Some(7));
        assert_eq!(filter.date, NaiveDate::from_ymd_opt(2024, 3, 1));
        assert_eq!(
            filter.after.unwrap().to_rfc3339(),
            "2024-02-28T10:00:00+00:00"
        );
    }

    #[test]
    fn test_malformed_filters_are_validation_errors() {
        for params in [
            IndexQueryParams {
                value: Some("-1".into()),
                ..Default::default()
            },
            IndexQueryParams {
                date: Some("01/03/2024".into()),
                ..Default::default()
            },
            IndexQueryParams {
                before: Some("yesterday".into()),
                ..Default::default()
            },
        ] {
            assert!(matches!(params.into_filter(), Err(Error::Validation(_))));
        }
    }
}
