//! Metadata model: per-row revision entries and the changes built from them.

use crate::{Revision, TableName};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

/// Column name to value mapping of one live row.
pub type RowData = BTreeMap<String, Value>;

/// `mdv` stored for tombstones. Independent of the digest algorithm.
pub const DELETED_MDV: &str = "0";

/// Marker rendered for SQL `NULL` values.
pub(crate) const NULL_MARKER: &str = "\u{0}NULL\u{0}";

/// Primary key of a synchronized row.
///
/// Strings in canonical integer form and integral floats become
/// [`PrimaryKey::Int`], so `"5"`, `5` and `5.0` are the same key. Any other
/// string keeps its identity: `"007"` and `"7"` are distinct keys. Ordering
/// still compares numerically wherever both sides parse as integers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub enum PrimaryKey {
    Int(i64),
    Text(String),
}

impl PrimaryKey {
    /// Best-effort conversion from a column value. Returns `None` for values
    /// that cannot identify a row (null, bool, arrays, objects).
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Some(PrimaryKey::Int(i))
                } else {
                    n.as_f64()
                        .and_then(integral_f64)
                        .map(PrimaryKey::Int)
                        .or_else(|| Some(PrimaryKey::Text(n.to_string())))
                }
            }
            Value::String(s) => Some(Self::from(s.as_str())),
            _ => None,
        }
    }

    /// Integer view used for ordering: the key itself, or a text key that
    /// parses as an integer once trimmed.
    fn numeric(&self) -> Option<i64> {
        match self {
            PrimaryKey::Int(i) => Some(*i),
            PrimaryKey::Text(s) => s.trim().parse().ok(),
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            PrimaryKey::Int(i) => Value::from(*i),
            PrimaryKey::Text(s) => Value::from(s.clone()),
        }
    }
}

impl From<i64> for PrimaryKey {
    fn from(value: i64) -> Self {
        PrimaryKey::Int(value)
    }
}

impl From<&str> for PrimaryKey {
    fn from(value: &str) -> Self {
        match value.parse::<i64>() {
            Ok(i) if i.to_string() == value => PrimaryKey::Int(i),
            _ => PrimaryKey::Text(value.to_string()),
        }
    }
}

impl Ord for PrimaryKey {
    fn cmp(&self, other: &Self) -> Ordering {
        let by_number = match (self.numeric(), other.numeric()) {
            (Some(a), Some(b)) => a.cmp(&b),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        };
        by_number.then_with(|| match (self, other) {
            (PrimaryKey::Int(a), PrimaryKey::Int(b)) => a.cmp(b),
            (PrimaryKey::Int(_), PrimaryKey::Text(_)) => Ordering::Less,
            (PrimaryKey::Text(_), PrimaryKey::Int(_)) => Ordering::Greater,
            (PrimaryKey::Text(a), PrimaryKey::Text(b)) => a.cmp(b),
        })
    }
}

impl PartialOrd for PrimaryKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl TryFrom<Value> for PrimaryKey {
    type Error = String;

    fn try_from(value: Value) -> std::result::Result<Self, Self::Error> {
        PrimaryKey::from_value(&value).ok_or_else(|| format!("not a primary key value: {value}"))
    }
}

impl From<PrimaryKey> for Value {
    fn from(key: PrimaryKey) -> Self {
        key.to_value()
    }
}

impl fmt::Display for PrimaryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrimaryKey::Int(i) => write!(f, "{i}"),
            PrimaryKey::Text(s) => write!(f, "{s}"),
        }
    }
}

fn integral_f64(f: f64) -> Option<i64> {
    // 2^63 is exactly representable; anything at or past it overflows i64
    const LIMIT: f64 = 9_223_372_036_854_775_808.0;
    if f.is_finite() && f.fract() == 0.0 && (-LIMIT..LIMIT).contains(&f) {
        Some(f as i64)
    } else {
        None
    }
}

/// Stringified form of a column value used for hashing and for change
/// equality. Numerically equal values render identically regardless of their
/// JSON representation (`5`, `5.0`).
pub fn canonical_text(value: &Value) -> String {
    match value {
        Value::Null => NULL_MARKER.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                i.to_string()
            } else if let Some(u) = n.as_u64() {
                u.to_string()
            } else {
                match n.as_f64() {
                    Some(f) => integral_f64(f).map_or_else(|| f.to_string(), |i| i.to_string()),
                    None => n.to_string(),
                }
            }
        }
        Value::String(s) => s.clone(),
        Value::Array(items) => {
            let inner: Vec<String> = items.iter().map(canonical_nested).collect();
            format!("[{}]", inner.join(","))
        }
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            let inner: Vec<String> = entries
                .into_iter()
                .map(|(k, v)| format!("{}:{}", quote(k), canonical_nested(v)))
                .collect();
            format!("{{{}}}", inner.join(","))
        }
    }
}

fn canonical_nested(value: &Value) -> String {
    match value {
        Value::String(s) => quote(s),
        other => canonical_text(other),
    }
}

fn quote(s: &str) -> String {
    Value::from(s).to_string()
}

/// Metadata for one logical row in one synchronized table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MdEntry {
    /// Primary key of the row
    pub primary_key: PrimaryKey,
    /// False for tombstones
    pub exists: bool,
    /// Server revision the row is as-of; 0 for rows the server never saw
    pub revision: Revision,
    /// Synchronized table this entry belongs to
    pub table_name: TableName,
    /// Content digest, or [`DELETED_MDV`] for tombstones
    pub mdv: String,
}

impl MdEntry {
    /// Entry for a live row.
    pub fn live(
        table_name: impl Into<TableName>,
        primary_key: PrimaryKey,
        revision: Revision,
        mdv: impl Into<String>,
    ) -> Self {
        Self {
            primary_key,
            exists: true,
            revision,
            table_name: table_name.into(),
            mdv: mdv.into(),
        }
    }

    /// Entry for a deleted row.
    pub fn tombstone(
        table_name: impl Into<TableName>,
        primary_key: PrimaryKey,
        revision: Revision,
    ) -> Self {
        Self {
            primary_key,
            exists: false,
            revision,
            table_name: table_name.into(),
            mdv: DELETED_MDV.to_string(),
        }
    }

    pub fn is_tombstone(&self) -> bool {
        !self.exists
    }
}

/// One transmissible unit: a metadata entry plus the live row's data.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Change {
    pub entry: MdEntry,
    /// Row data; `None` for tombstones
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row: Option<RowData>,
}

impl Change {
    pub fn live(entry: MdEntry, row: RowData) -> Self {
        Self {
            entry,
            row: Some(row),
        }
    }

    pub fn deleted(entry: MdEntry) -> Self {
        Self { entry, row: None }
    }

    pub fn table(&self) -> &str {
        &self.entry.table_name
    }

    pub fn primary_key(&self) -> &PrimaryKey {
        &self.entry.primary_key
    }

    /// Check the tombstone invariant: deleted entries carry the deleted
    /// sentinel and no data, live entries carry data.
    pub fn check_invariant(&self) -> std::result::Result<(), String> {
        match (&self.entry.exists, &self.row) {
            (false, Some(_)) => Err(format!(
                "tombstone for {}/{} carries row data",
                self.entry.table_name, self.entry.primary_key
            )),
            (false, None) if self.entry.mdv != DELETED_MDV => Err(format!(
                "tombstone for {}/{} has a content digest",
                self.entry.table_name, self.entry.primary_key
            )),
            (true, None) => Err(format!(
                "live change for {}/{} has no row data",
                self.entry.table_name, self.entry.primary_key
            )),
            _ => Ok(()),
        }
    }

    /// Column names of the row, empty for tombstones.
    pub fn columns(&self) -> impl Iterator<Item = &String> {
        self.row.iter().flat_map(|r| r.keys())
    }
}

impl PartialEq for Change {
    fn eq(&self, other: &Self) -> bool {
        self.entry == other.entry && rows_equal(self.row.as_ref(), other.row.as_ref())
    }
}

/// Null-safe, cross-type tolerant row comparison.
pub fn rows_equal(a: Option<&RowData>, b: Option<&RowData>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => {
            a.len() == b.len()
                && a.iter().all(|(k, v)| {
                    b.get(k).is_some_and(|other| {
                        v.is_null() == other.is_null() && canonical_text(v) == canonical_text(other)
                    })
                })
        }
        _ => false,
    }
}

/// Check that `row` names `pk` in its key column. Rows without the column
/// pass; the key then comes from the entry alone.
pub fn check_row_key(
    row: &RowData,
    key_column: &str,
    pk: &PrimaryKey,
) -> std::result::Result<(), String> {
    match row.get(key_column) {
        Some(value) if PrimaryKey::from_value(value).as_ref() != Some(pk) => Err(format!(
            "row keyed {pk} carries {key_column} = {value}"
        )),
        _ => Ok(()),
    }
}

/// Orders changes by table, then primary key.
pub fn compare_changes(a: &Change, b: &Change) -> Ordering {
    a.entry
        .table_name
        .cmp(&b.entry.table_name)
        .then_with(|| a.entry.primary_key.cmp(&b.entry.primary_key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: Value) -> RowData {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn primary_key_coercion() {
        assert_eq!(PrimaryKey::from("5"), PrimaryKey::Int(5));
        assert_eq!(PrimaryKey::from_value(&json!(5.0)), Some(PrimaryKey::Int(5)));
        assert_eq!(PrimaryKey::from_value(&json!("abc")), Some(PrimaryKey::Text("abc".into())));
        assert_eq!(PrimaryKey::from_value(&json!(null)), None);
        assert_eq!(PrimaryKey::from_value(&json!(true)), None);
    }

    #[test]
    fn primary_keys_order_numerically() {
        let mut keys = vec![PrimaryKey::from("10"), PrimaryKey::from("9"), PrimaryKey::from(-1)];
        keys.sort();
        assert_eq!(keys, vec![PrimaryKey::Int(-1), PrimaryKey::Int(9), PrimaryKey::Int(10)]);
    }

    #[test]
    fn non_canonical_integer_text_keeps_identity() {
        assert_eq!(PrimaryKey::from("007"), PrimaryKey::Text("007".into()));
        assert_eq!(PrimaryKey::from(" 7"), PrimaryKey::Text(" 7".into()));
        assert_eq!(PrimaryKey::from("+7"), PrimaryKey::Text("+7".into()));
        assert_eq!(PrimaryKey::from("-7"), PrimaryKey::Int(-7));
        assert_ne!(PrimaryKey::from("007"), PrimaryKey::from("7"));

        let json = serde_json::to_string(&PrimaryKey::Text("007".into())).unwrap();
        let parsed: PrimaryKey = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, PrimaryKey::Text("007".into()));
    }

    #[test]
    fn padded_text_keys_still_order_numerically() {
        let mut keys = vec![
            PrimaryKey::from("010"),
            PrimaryKey::Int(9),
            PrimaryKey::from("zeta"),
            PrimaryKey::from("007"),
            PrimaryKey::Int(7),
        ];
        keys.sort();
        assert_eq!(
            keys,
            vec![
                PrimaryKey::Int(7),
                PrimaryKey::Text("007".into()),
                PrimaryKey::Int(9),
                PrimaryKey::Text("010".into()),
                PrimaryKey::Text("zeta".into()),
            ]
        );
    }

    #[test]
    fn primary_key_serde() {
        let key: PrimaryKey = serde_json::from_str("\"42\"").unwrap();
        assert_eq!(key, PrimaryKey::Int(42));
        assert_eq!(serde_json::to_string(&PrimaryKey::Int(42)).unwrap(), "42");
        assert!(serde_json::from_str::<PrimaryKey>("null").is_err());
    }

    #[test]
    fn canonical_numbers() {
        assert_eq!(canonical_text(&json!(5)), canonical_text(&json!(5.0)));
        assert_ne!(canonical_text(&json!(5)), canonical_text(&json!(5.5)));
        assert_eq!(canonical_text(&json!(null)), NULL_MARKER);
        assert_eq!(
            canonical_text(&json!({"b": 1, "a": [1.0, "x"]})),
            "{\"a\":[1,\"x\"],\"b\":1}"
        );
    }

    #[test]
    fn change_equality_tolerates_number_representation() {
        let entry = MdEntry::live("items", PrimaryKey::Int(1), 3, "abc");
        let a = Change::live(entry.clone(), row(json!({"id": 1, "qty": 2})));
        let b = Change::live(entry.clone(), row(json!({"id": 1.0, "qty": 2.0})));
        let c = Change::live(entry, row(json!({"id": 1, "qty": null})));
        assert_eq!(a, b);
        assert_ne!(a, c);

        let marker = row(json!({"id": 1, "qty": NULL_MARKER}));
        let null = row(json!({"id": 1, "qty": null}));
        assert!(!rows_equal(Some(&marker), Some(&null)));
    }

    #[test]
    fn row_key_must_match_entry() {
        let pk = PrimaryKey::Int(5);
        assert!(check_row_key(&row(json!({"id": 5, "name": "a"})), "id", &pk).is_ok());
        assert!(check_row_key(&row(json!({"id": "5"})), "id", &pk).is_ok());
        assert!(check_row_key(&row(json!({"name": "a"})), "id", &pk).is_ok());
        assert!(check_row_key(&row(json!({"id": 9})), "id", &pk).is_err());
        assert!(check_row_key(&row(json!({"id": null})), "id", &pk).is_err());
        assert!(check_row_key(&row(json!({"id": "05"})), "id", &pk).is_err());
    }

    #[test]
    fn tombstone_invariant() {
        let tomb = MdEntry::tombstone("items", PrimaryKey::Int(1), 2);
        assert!(Change::deleted(tomb.clone()).check_invariant().is_ok());
        assert!(Change::live(tomb, RowData::new()).check_invariant().is_err());

        let live = MdEntry::live("items", PrimaryKey::Int(1), 2, "abc");
        assert!(Change::deleted(live).check_invariant().is_err());
    }

    #[test]
    fn compare_by_table_then_key() {
        let a = Change::deleted(MdEntry::tombstone("a", PrimaryKey::Int(10), 1));
        let b = Change::deleted(MdEntry::tombstone("a", PrimaryKey::Int(9), 1));
        let c = Change::deleted(MdEntry::tombstone("b", PrimaryKey::Int(1), 1));
        let mut changes = vec![c.clone(), a.clone(), b.clone()];
        changes.sort_by(compare_changes);
        assert_eq!(changes, vec![b, a, c]);
    }

    #[test]
    fn change_serialization_roundtrip() {
        let change = Change::live(
            MdEntry::live("items", PrimaryKey::Int(7), 4, "d41d"),
            row(json!({"id": 7, "name": "lamp"})),
        );
        let json = serde_json::to_string(&change).unwrap();
        let parsed: Change = serde_json::from_str(&json).unwrap();
        assert_eq!(change, parsed);
    }
}
