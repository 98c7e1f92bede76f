//! Canonical column types
//!
//! Vendor type names are normalized into driver-independent tokens so that
//! snapshots taken through different drivers compare cleanly.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Driver-independent column type, serialized as its token (e.g. `STRING(255)`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum CanonicalType {
    SmallInt,
    Integer,
    BigInt,
    /// DECIMAL with optional (precision, scale)
    Decimal(Option<(u32, u32)>),
    Float,
    Double,
    Boolean,
    /// Variable-length string with optional length limit
    String(Option<u32>),
    Text,
    Date,
    Time,
    Timestamp,
    TimestampTz,
    Uuid,
    Json,
    Bytes,
}

static CANONICAL_TOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([A-Z]+)(?:\((\d+)(?:,(\d+))?\))?$").expect("static regex")
});

static VENDOR_TYPE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([a-z][a-z0-9 ]*?)\s*(?:\(\s*(\d+)\s*(?:,\s*(\d+)\s*)?\))?(\s+with(?:out)? time zone)?$")
        .expect("static regex")
});

impl CanonicalType {
    /// Normalize a vendor type name (`character varying(255)`, `int4`,
    /// `numeric(10,2)`, ...) into a canonical token.
    ///
    /// Returns `None` for types with no canonical counterpart; callers
    /// default those to `STRING` and surface a warning.
    pub fn from_vendor(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if let Ok(canonical) = trimmed.parse::<CanonicalType>() {
            return Some(canonical);
        }

        let lowered = trimmed.to_lowercase();
        let caps = VENDOR_TYPE.captures(&lowered)?;
        let base = caps.get(1).map(|m| m.as_str().trim())?;
        let first = caps.get(2).and_then(|m| m.as_str().parse::<u32>().ok());
        let second = caps.get(3).and_then(|m| m.as_str().parse::<u32>().ok());
        let zone = caps.get(4).map(|m| m.as_str().trim());

        let normalized = match base {
            "character varying" | "varchar" | "nvarchar" | "character" | "char" | "nchar"
            | "bpchar" => CanonicalType::String(first),
            "text" | "citext" | "tinytext" | "mediumtext" | "longtext" | "clob" => CanonicalType::Text,
            "smallint" | "int2" | "tinyint" | "smallserial" | "serial2" => CanonicalType::SmallInt,
            "integer" | "int" | "int4" | "mediumint" | "serial" | "serial4" => CanonicalType::Integer,
            "bigint" | "int8" | "bigserial" | "serial8" => CanonicalType::BigInt,
            "numeric" | "decimal" => {
                CanonicalType::Decimal(first.map(|precision| (precision, second.unwrap_or(0))))
            }
            "real" | "float4" => CanonicalType::Float,
            "float" => match first {
                Some(bits) if bits > 24 => CanonicalType::Double,
                _ => CanonicalType::Float,
            },
            "double precision" | "float8" | "double" => CanonicalType::Double,
            "boolean" | "bool" | "bit" => CanonicalType::Boolean,
            "date" => CanonicalType::Date,
            "time" | "timetz" => CanonicalType::Time,
            "timestamp" | "datetime" => match zone {
                Some("with time zone") => CanonicalType::TimestampTz,
                _ => CanonicalType::Timestamp,
            },
            "timestamptz" => CanonicalType::TimestampTz,
            "uuid" | "uniqueidentifier" => CanonicalType::Uuid,
            "json" | "jsonb" => CanonicalType::Json,
            "bytea" | "blob" | "binary" | "varbinary" | "longblob" => CanonicalType::Bytes,
            _ => return None,
        };

        Some(normalized)
    }

    /// Whether a column of type `from` can change to `self` without losing
    /// or rejecting existing values.
    pub fn widens(&self, from: &CanonicalType) -> bool {
        use CanonicalType::*;

        if self == from {
            return true;
        }

        match (from, self) {
            (SmallInt, Integer) | (SmallInt, BigInt) | (Integer, BigInt) => true,
            (Float, Double) => true,
            (String(Some(old)), String(Some(new))) => new >= old,
            (String(_), String(None)) | (String(_), Text) => true,
            (Decimal(Some((p, s))), Decimal(Some((p2, s2)))) => {
                s2 >= s && p2.saturating_sub(*s2) >= p.saturating_sub(*s)
            }
            (Decimal(_), Decimal(None)) => true,
            (Timestamp, TimestampTz) => true,
            _ => false,
        }
    }

    /// PostgreSQL spelling of this type
    pub fn to_pg_type(&self) -> String {
        match self {
            CanonicalType::SmallInt => "SMALLINT".to_string(),
            CanonicalType::Integer => "INTEGER".to_string(),
            CanonicalType::BigInt => "BIGINT".to_string(),
            CanonicalType::Decimal(None) => "NUMERIC".to_string(),
            CanonicalType::Decimal(Some((p, s))) => format!("NUMERIC({},{})", p, s),
            CanonicalType::Float => "REAL".to_string(),
            CanonicalType::Double => "DOUBLE PRECISION".to_string(),
            CanonicalType::Boolean => "BOOLEAN".to_string(),
            CanonicalType::String(None) => "VARCHAR".to_string(),
            CanonicalType::String(Some(n)) => format!("VARCHAR({})", n),
            CanonicalType::Text => "TEXT".to_string(),
            CanonicalType::Date => "DATE".to_string(),
            CanonicalType::Time => "TIME".to_string(),
            CanonicalType::Timestamp => "TIMESTAMP".to_string(),
            CanonicalType::TimestampTz => "TIMESTAMPTZ".to_string(),
            CanonicalType::Uuid => "UUID".to_string(),
            CanonicalType::Json => "JSONB".to_string(),
            CanonicalType::Bytes => "BYTEA".to_string(),
        }
    }
}

impl fmt::Display for CanonicalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CanonicalType::SmallInt => write!(f, "SMALLINT"),
            CanonicalType::Integer => write!(f, "INTEGER"),
            CanonicalType::BigInt => write!(f, "BIGINT"),
            CanonicalType::Decimal(None) => write!(f, "DECIMAL"),
            CanonicalType::Decimal(Some((p, s))) => write!(f, "DECIMAL({},{})", p, s),
            CanonicalType::Float => write!(f, "FLOAT"),
            CanonicalType::Double => write!(f, "DOUBLE"),
            CanonicalType::Boolean => write!(f, "BOOLEAN"),
            CanonicalType::String(None) => write!(f, "STRING"),
            CanonicalType::String(Some(n)) => write!(f, "STRING({})", n),
            CanonicalType::Text => write!(f, "TEXT"),
            CanonicalType::Date => write!(f, "DATE"),
            CanonicalType::Time => write!(f, "TIME"),
            CanonicalType::Timestamp => write!(f, "TIMESTAMP"),
            CanonicalType::TimestampTz => write!(f, "TIMESTAMPTZ"),
            CanonicalType::Uuid => write!(f, "UUID"),
            CanonicalType::Json => write!(f, "JSON"),
            CanonicalType::Bytes => write!(f, "BYTES"),
        }
    }
}

impl FromStr for CanonicalType {
    type Err = String;

    /// Parses canonical tokens only; vendor names go through `from_vendor`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let caps = CANONICAL_TOKEN
            .captures(s.trim())
            .ok_or_else(|| format!("not a canonical type token: {}", s))?;
        let first = caps.get(2).and_then(|m| m.as_str().parse::<u32>().ok());
        let second = caps.get(3).and_then(|m| m.as_str().parse::<u32>().ok());
        let has_args = first.is_some();

        let parsed = match (&caps[1], has_args) {
            ("SMALLINT", false) => CanonicalType::SmallInt,
            ("INTEGER", false) => CanonicalType::Integer,
            ("BIGINT", false) => CanonicalType::BigInt,
            ("DECIMAL", _) => CanonicalType::Decimal(first.map(|p| (p, second.unwrap_or(0)))),
            ("FLOAT", false) => CanonicalType::Float,
            ("DOUBLE", false) => CanonicalType::Double,
            ("BOOLEAN", false) => CanonicalType::Boolean,
            ("STRING", _) if second.is_none() => CanonicalType::String(first),
            ("TEXT", false) => CanonicalType::Text,
            ("DATE", false) => CanonicalType::Date,
            ("TIME", false) => CanonicalType::Time,
            ("TIMESTAMP", false) => CanonicalType::Timestamp,
            ("TIMESTAMPTZ", false) => CanonicalType::TimestampTz,
            ("UUID", false) => CanonicalType::Uuid,
            ("JSON", false) => CanonicalType::Json,
            ("BYTES", false) => CanonicalType::Bytes,
            _ => return Err(format!("not a canonical type token: {}", s)),
        };
        Ok(parsed)
    }
}

impl From<CanonicalType> for String {
    fn from(value: CanonicalType) -> Self {
        value.to_string()
    }
}

impl TryFrom<String> for CanonicalType {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vendor_names_normalize() {
        assert_eq!(CanonicalType::from_vendor("varchar(255)"), Some(CanonicalType::String(Some(255))));
        assert_eq!(
            CanonicalType::from_vendor("character varying(64)"),
            Some(CanonicalType::String(Some(64)))
        );
        assert_eq!(CanonicalType::from_vendor("int4"), Some(CanonicalType::Integer));
        assert_eq!(CanonicalType::from_vendor("BIGSERIAL"), Some(CanonicalType::BigInt));
        assert_eq!(
            CanonicalType::from_vendor("numeric(10,2)"),
            Some(CanonicalType::Decimal(Some((10, 2))))
        );
        assert_eq!(
            CanonicalType::from_vendor("timestamp(3) with time zone"),
            Some(CanonicalType::TimestampTz)
        );
        assert_eq!(
            CanonicalType::from_vendor("timestamp without time zone"),
            Some(CanonicalType::Timestamp)
        );
        assert_eq!(CanonicalType::from_vendor("jsonb"), Some(CanonicalType::Json));
    }

    #[test]
    fn test_canonical_tokens_parse_back() {
        for token in ["STRING(255)", "STRING", "DECIMAL(12,4)", "TIMESTAMPTZ", "BYTES"] {
            let parsed: CanonicalType = token.parse().unwrap();
            assert_eq!(parsed.to_string(), token);
        }
        assert!("STRING(1,2)".parse::<CanonicalType>().is_err());
        assert!("VARCHAR".parse::<CanonicalType>().is_err());
    }

    #[test]
    fn test_unsupported_vendor_type() {
        assert_eq!(CanonicalType::from_vendor("tsvector"), None);
        assert_eq!(CanonicalType::from_vendor("geometry(Point,4326)"), None);
    }

    #[test]
    fn test_widening_rules() {
        use CanonicalType::*;
        assert!(BigInt.widens(&Integer));
        assert!(!Integer.widens(&BigInt));
        assert!(String(Some(255)).widens(&String(Some(64))));
        assert!(!String(Some(64)).widens(&String(Some(255))));
        assert!(Text.widens(&String(Some(64))));
        assert!(!String(Some(64)).widens(&Text));
        assert!(Decimal(Some((12, 2))).widens(&Decimal(Some((10, 2)))));
        assert!(!Decimal(Some((10, 4))).widens(&Decimal(Some((10, 2)))));
        assert!(!Boolean.widens(&Integer));
    }

    #[test]
    fn test_serde_uses_tokens() {
        let json = serde_json::to_string(&CanonicalType::String(Some(20))).unwrap();
        assert_eq!(json, "\"STRING(20)\"");
        let back: CanonicalType = serde_json::from_str("\"DECIMAL(8,3)\"").unwrap();
        assert_eq!(back, CanonicalType::Decimal(Some((8, 3))));
    }
}
