//! Versioned positional schemas for memo tuples and append events
//!
//! The ledger returns memos and emits events as positional tuples. Each
//! contract revision lays the fields out differently, so decoding goes
//! through a [`SchemaDescriptor`] mapping field names to indices rather than
//! hardcoded positions.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{DecodeError, LedgerError};
use crate::types::{Address, Amount, MemoRecord, RawTuple, Timestamp, Token};

/// Named fields of a memo tuple
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoField {
    Payer,
    Timestamp,
    DisplayName,
    Message,
    Total,
    ProductLabel,
}

impl MemoField {
    pub fn name(&self) -> &'static str {
        match self {
            MemoField::Payer => "from",
            MemoField::Timestamp => "timestamp",
            MemoField::DisplayName => "name",
            MemoField::Message => "message",
            MemoField::Total => "totalPrice",
            MemoField::ProductLabel => "productName",
        }
    }
}

/// Known contract revisions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaVersion {
    /// `(from, timestamp, name, message)`
    V0,
    /// `(from, timestamp, name, message, totalPrice)`
    V1,
    /// `(from, timestamp, name, message, totalPrice, productName)`
    V2,
}

impl Default for SchemaVersion {
    fn default() -> Self {
        SchemaVersion::V2
    }
}

impl fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SchemaVersion::V0 => "v0",
            SchemaVersion::V1 => "v1",
            SchemaVersion::V2 => "v2",
        };
        f.write_str(s)
    }
}

impl FromStr for SchemaVersion {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "v0" | "0" => Ok(SchemaVersion::V0),
            "v1" | "1" => Ok(SchemaVersion::V1),
            "v2" | "2" => Ok(SchemaVersion::V2),
            other => Err(LedgerError::Config(format!("unknown schema version `{}`", other))),
        }
    }
}

/// Field-to-index layout of one schema version
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaDescriptor {
    version: SchemaVersion,
    fields: Vec<(MemoField, usize)>,
}

impl SchemaDescriptor {
    /// Descriptor for a built-in version
    pub fn for_version(version: SchemaVersion) -> Self {
        let base = [
            MemoField::Payer,
            MemoField::Timestamp,
            MemoField::DisplayName,
            MemoField::Message,
        ];
        let mut layout: Vec<MemoField> = base.to_vec();
        match version {
            SchemaVersion::V0 => {}
            SchemaVersion::V1 => layout.push(MemoField::Total),
            SchemaVersion::V2 => {
                layout.push(MemoField::Total);
                layout.push(MemoField::ProductLabel);
            }
        }
        Self::custom(version, layout)
    }

    /// Descriptor with an explicit field order
    pub fn custom(version: SchemaVersion, layout: Vec<MemoField>) -> Self {
        let fields = layout.into_iter().enumerate().map(|(i, f)| (f, i)).collect();
        Self { version, fields }
    }

    pub fn version(&self) -> SchemaVersion {
        self.version
    }

    /// Number of positional fields a tuple must carry
    pub fn arity(&self) -> usize {
        self.fields.len()
    }

    /// Index of a field, if this version carries it
    pub fn index_of(&self, field: MemoField) -> Option<usize> {
        self.fields
            .iter()
            .find(|(f, _)| *f == field)
            .map(|(_, i)| *i)
    }

    pub fn has_field(&self, field: MemoField) -> bool {
        self.index_of(field).is_some()
    }

    /// Decode one raw tuple into a memo record
    pub fn decode_memo(&self, tuple: &[Token]) -> Result<MemoRecord, DecodeError> {
        if tuple.len() != self.arity() {
            return Err(DecodeError::Arity {
                version: self.version,
                expected: self.arity(),
                found: tuple.len(),
            });
        }

        let payer = self.address(tuple, MemoField::Payer)?;
        let secs = self.uint(tuple, MemoField::Timestamp)?;
        let timestamp = u64::try_from(secs)
            .ok()
            .and_then(Timestamp::from_unix_secs)
            .ok_or(DecodeError::OutOfRange {
                field: MemoField::Timestamp.name(),
                value: secs,
            })?;
        let display_name = self.string(tuple, MemoField::DisplayName)?;
        let message = self.string(tuple, MemoField::Message)?;

        let total_paid = if self.has_field(MemoField::Total) {
            Amount(self.uint(tuple, MemoField::Total)?)
        } else {
            Amount::ZERO
        };
        let product_label = if self.has_field(MemoField::ProductLabel) {
            Some(self.string(tuple, MemoField::ProductLabel)?)
        } else {
            None
        };

        Ok(MemoRecord {
            payer,
            timestamp,
            display_name,
            message,
            total_paid,
            product_label,
        })
    }

    /// Decode a full fetch, rejecting bad tuples individually.
    ///
    /// Returns the decoded records in input order plus `(index, error)` for
    /// every tuple that did not match.
    pub fn decode_all(&self, tuples: &[RawTuple]) -> (Vec<MemoRecord>, Vec<(usize, DecodeError)>) {
        let mut records = Vec::with_capacity(tuples.len());
        let mut rejected = Vec::new();
        for (i, tuple) in tuples.iter().enumerate() {
            match self.decode_memo(tuple) {
                Ok(record) => records.push(record),
                Err(e) => rejected.push((i, e)),
            }
        }
        (records, rejected)
    }

    /// Lay a record out as this version's positional tuple
    pub fn encode_memo(&self, record: &MemoRecord) -> RawTuple {
        let mut slots: Vec<Option<Token>> = vec![None; self.arity()];
        for (field, index) in &self.fields {
            let token = match field {
                MemoField::Payer => Token::Address(record.payer),
                MemoField::Timestamp => Token::Uint(u128::from(record.timestamp.unix_secs())),
                MemoField::DisplayName => Token::Str(record.display_name.clone()),
                MemoField::Message => Token::Str(record.message.clone()),
                MemoField::Total => Token::Uint(record.total_paid.minor_units()),
                MemoField::ProductLabel => {
                    Token::Str(record.product_label.clone().unwrap_or_default())
                }
            };
            slots[*index] = Some(token);
        }
        slots.into_iter().flatten().collect()
    }

    fn slot<'a>(&self, tuple: &'a [Token], field: MemoField) -> Result<(usize, &'a Token), DecodeError> {
        let index = self.index_of(field).ok_or(DecodeError::MissingField {
            version: self.version,
            field: field.name(),
        })?;
        let token = tuple.get(index).ok_or(DecodeError::Arity {
            version: self.version,
            expected: self.arity(),
            found: tuple.len(),
        })?;
        Ok((index, token))
    }

    fn address(&self, tuple: &[Token], field: MemoField) -> Result<Address, DecodeError> {
        match self.slot(tuple, field)? {
            (_, Token::Address(a)) => Ok(*a),
            (index, _) => Err(DecodeError::FieldType {
                field: field.name(),
                index,
                expected: "address",
            }),
        }
    }

    fn uint(&self, tuple: &[Token], field: MemoField) -> Result<u128, DecodeError> {
        match self.slot(tuple, field)? {
            (_, Token::Uint(v)) => Ok(*v),
            (index, _) => Err(DecodeError::FieldType {
                field: field.name(),
                index,
                expected: "uint",
            }),
        }
    }

    fn string(&self, tuple: &[Token], field: MemoField) -> Result<String, DecodeError> {
        match self.slot(tuple, field)? {
            (_, Token::Str(s)) => Ok(s.clone()),
            (index, _) => Err(DecodeError::FieldType {
                field: field.name(),
                index,
                expected: "string",
            }),
        }
    }
}

impl Default for SchemaDescriptor {
    fn default() -> Self {
        Self::for_version(SchemaVersion::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(label: Option<&str>) -> MemoRecord {
        MemoRecord {
            payer: Address::from_low_u64(1),
            timestamp: Timestamp::from_unix_secs(1_700_000_000).unwrap(),
            display_name: "Carolina".to_string(),
            message: "You're the best!".to_string(),
            total_paid: Amount(1_000_000_000_000_000_000),
            product_label: label.map(str::to_string),
        }
    }

    #[test]
    fn test_layouts() {
        assert_eq!(SchemaDescriptor::for_version(SchemaVersion::V0).arity(), 4);
        assert_eq!(SchemaDescriptor::for_version(SchemaVersion::V1).arity(), 5);

        let v2 = SchemaDescriptor::for_version(SchemaVersion::V2);
        assert_eq!(v2.arity(), 6);
        assert_eq!(v2.index_of(MemoField::Total), Some(4));
        assert_eq!(v2.index_of(MemoField::ProductLabel), Some(5));
    }

    #[test]
    fn test_decode_v2() {
        let schema = SchemaDescriptor::for_version(SchemaVersion::V2);
        let original = record(Some("Coffee"));
        let tuple = schema.encode_memo(&original);
        assert_eq!(tuple.len(), 6);
        assert_eq!(schema.decode_memo(&tuple).unwrap(), original);
    }

    #[test]
    fn test_decode_v0_has_zero_total() {
        let schema = SchemaDescriptor::for_version(SchemaVersion::V0);
        let tuple = vec![
            Token::Address(Address::from_low_u64(3)),
            Token::Uint(1_700_000_000),
            Token::Str("Kay".to_string()),
            Token::Str("gm".to_string()),
        ];
        let decoded = schema.decode_memo(&tuple).unwrap();
        assert_eq!(decoded.total_paid, Amount::ZERO);
        assert_eq!(decoded.product_label, None);
    }

    #[test]
    fn test_arity_mismatch() {
        let v2 = SchemaDescriptor::for_version(SchemaVersion::V2);
        let v1_tuple = SchemaDescriptor::for_version(SchemaVersion::V1).encode_memo(&record(None));

        let err = v2.decode_memo(&v1_tuple).unwrap_err();
        assert_eq!(
            err,
            DecodeError::Arity {
                version: SchemaVersion::V2,
                expected: 6,
                found: 5
            }
        );
    }

    #[test]
    fn test_field_type_mismatch() {
        let v1 = SchemaDescriptor::for_version(SchemaVersion::V1);
        let mut tuple = v1.encode_memo(&record(None));
        tuple[4] = Token::Str("1.0".to_string());

        match v1.decode_memo(&tuple) {
            Err(DecodeError::FieldType { index, expected, .. }) => {
                assert_eq!(index, 4);
                assert_eq!(expected, "uint");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_custom_layout() {
        let schema = SchemaDescriptor::custom(
            SchemaVersion::V1,
            vec![
                MemoField::Timestamp,
                MemoField::Payer,
                MemoField::Total,
                MemoField::DisplayName,
                MemoField::Message,
            ],
        );
        let original = record(None);
        let tuple = schema.encode_memo(&original);
        assert!(matches!(tuple[0], Token::Uint(1_700_000_000)));
        assert_eq!(schema.decode_memo(&tuple).unwrap(), original);
    }

    #[test]
    fn test_decode_all_rejects_individually() {
        let schema = SchemaDescriptor::for_version(SchemaVersion::V2);
        let good = schema.encode_memo(&record(Some("Coffee")));
        let short = good[..5].to_vec();

        let (records, rejected) = schema.decode_all(&[good.clone(), short, good]);
        assert_eq!(records.len(), 2);
        assert_eq!(rejected.len(), 1);
        assert_eq!(rejected[0].0, 1);
    }

    #[test]
    fn test_version_parse() {
        assert_eq!("v1".parse::<SchemaVersion>().unwrap(), SchemaVersion::V1);
        assert_eq!("2".parse::<SchemaVersion>().unwrap(), SchemaVersion::V2);
        assert!("v9".parse::<SchemaVersion>().is_err());
    }
}
