use crate::error::{Result, SatchelError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataItem {
    pub name: String,
    pub data: Vec<u8>,
}

/// Named side-channel items carried in a container header. Names are
/// folded to upper case; uniqueness is enforced on insert.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataCollection {
    items: BTreeMap<String, MetadataItem>,
}

impl MetadataCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str, data: Vec<u8>) -> Result<()> {
        let key = name.to_uppercase();
        if self.items.contains_key(&key) {
            return Err(SatchelError::ConflictExists(format!(
                "metadata item {key:?}"
            )));
        }
        self.items.insert(
            key.clone(),
            MetadataItem {
                name: key,
                data,
            },
        );
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&MetadataItem> {
        self.items.get(&name.to_uppercase())
    }

    pub fn iter(&self) -> impl Iterator<Item = &MetadataItem> {
        self.items.values()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn to_cbor(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        ciborium::ser::into_writer(self, &mut out)
            .map_err(|e| SatchelError::Format(format!("encode metadata: {e}")))?;
        Ok(out)
    }

    pub fn from_cbor(bytes: &[u8]) -> Result<Self> {
        ciborium::de::from_reader(bytes)
            .map_err(|e| SatchelError::Format(format!("decode metadata: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_fold_to_upper() {
        let mut md = MetadataCollection::new();
        md.insert("note", b"hello".to_vec()).unwrap();
        assert_eq!(md.get("NOTE").unwrap().data, b"hello");
        assert_eq!(md.get("Note").unwrap().name, "NOTE");
    }

    #[test]
    fn duplicate_names_rejected() {
        let mut md = MetadataCollection::new();
        md.insert("a", vec![]).unwrap();
        let err = md.insert("A", vec![]).unwrap_err();
        assert!(matches!(err, SatchelError::ConflictExists(_)));
    }

    #[test]
    fn cbor_roundtrip() {
        let mut md = MetadataCollection::new();
        md.insert("one", vec![1]).unwrap();
        md.insert("two", vec![2, 2]).unwrap();
        let bytes = md.to_cbor().unwrap();
        assert_eq!(MetadataCollection::from_cbor(&bytes).unwrap(), md);
    }
}
