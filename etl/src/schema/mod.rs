//! Table schemas describing what is extracted and where it lands.
//!
//! A [`TableSchema`] fixes the source view, the target table, the ordered columns with their
//! logical types, and the dedup key columns. [`customer_profile`] is the schema the extractor
//! ships with.

mod table;

pub use table::*;

use crate::error::EtlResult;

/// Source view of the customer profile extraction.
pub const CUSTOMER_PROFILE_VIEW: (&str, &str) = ("dbo", "vw_customer_profile_standardized");

/// Target table of the customer profile extraction.
pub const CUSTOMER_PROFILE_TABLE: (&str, &str) = ("bronze", "customer_profile_standardized");

const CUSTOMER_PROFILE_COLUMNS: &[(&str, ColumnType)] = &[
    ("customer_id", ColumnType::Text),
    ("evidence_unique_key", ColumnType::Text),
    ("firstname", ColumnType::Text),
    ("lastname", ColumnType::Text),
    ("firstname_local", ColumnType::Text),
    ("lastname_local", ColumnType::Text),
    ("person_title", ColumnType::Text),
    ("person_title_other", ColumnType::Text),
    ("marital_status", ColumnType::Text),
    ("nationality", ColumnType::Text),
    ("nationality_other", ColumnType::Text),
    ("occupation", ColumnType::Text),
    ("occupation_other", ColumnType::Text),
    ("education_level", ColumnType::Text),
    ("education_level_other", ColumnType::Text),
    ("business_type", ColumnType::Text),
    ("business_type_other", ColumnType::Text),
    ("birthdate", ColumnType::Date),
    ("total_asset", ColumnType::Text),
    ("monthly_income", ColumnType::Text),
    ("income_country", ColumnType::Text),
    ("income_country_other", ColumnType::Text),
    ("source_of_income_list", ColumnType::Text),
    ("purpose_of_investment_list", ColumnType::Text),
    ("last_modified_ts", ColumnType::Timestamp),
];

const CUSTOMER_PROFILE_IDENTIFIER: &str = "customer_id";
const CUSTOMER_PROFILE_MODIFIED_TS: &str = "last_modified_ts";

/// Returns the schema of the standardized customer profile view.
pub fn customer_profile() -> EtlResult<TableSchema> {
    let columns = CUSTOMER_PROFILE_COLUMNS
        .iter()
        .map(|(name, typ)| {
            let nullable =
                *name != CUSTOMER_PROFILE_IDENTIFIER && *name != CUSTOMER_PROFILE_MODIFIED_TS;
            ColumnSchema::new(*name, *typ, nullable)
        })
        .collect();

    TableSchema::new(
        TableName::new(CUSTOMER_PROFILE_VIEW.0, CUSTOMER_PROFILE_VIEW.1),
        TableName::new(CUSTOMER_PROFILE_TABLE.0, CUSTOMER_PROFILE_TABLE.1),
        columns,
        CUSTOMER_PROFILE_IDENTIFIER,
        CUSTOMER_PROFILE_MODIFIED_TS,
    )
}
