//! Assets created at runtime and carried inside frames.
//!
//! Assets are opaque byte blobs keyed by a GUID. They are serialized with the
//! frame but stay out of the checksum: two peers may build the same asset
//! through different code paths without diverging.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::visitor::{ByteReader, StateSink};
use crate::error::LockstepError;

/// Identifier of a runtime asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AssetGuid(pub u64);

/// GUID-ordered asset table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DynamicAssets {
    assets: BTreeMap<AssetGuid, Vec<u8>>,
}

impl DynamicAssets {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces an asset, returning the previous bytes.
    pub fn insert(&mut self, guid: AssetGuid, bytes: Vec<u8>) -> Option<Vec<u8>> {
        self.assets.insert(guid, bytes)
    }

    /// Bytes of an asset.
    #[must_use]
    pub fn get(&self, guid: AssetGuid) -> Option<&[u8]> {
        self.assets.get(&guid).map(Vec::as_slice)
    }

    /// Removes an asset.
    pub fn remove(&mut self, guid: AssetGuid) -> Option<Vec<u8>> {
        self.assets.remove(&guid)
    }

    /// Number of assets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.assets.len()
    }

    /// Whether the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }

    /// Assets in GUID order.
    pub fn iter(&self) -> impl Iterator<Item = (AssetGuid, &[u8])> + '_ {
        self.assets.iter().map(|(guid, bytes)| (*guid, bytes.as_slice()))
    }

    /// Removes every asset.
    pub fn clear(&mut self) {
        self.assets.clear();
    }

    pub(crate) fn write_to<S: StateSink>(&self, sink: &mut S) -> Result<(), LockstepError> {
        sink.write_len(self.assets.len())?;
        for (guid, bytes) in &self.assets {
            sink.write_u64(guid.0);
            sink.write_len(bytes.len())?;
            sink.write_bytes(bytes);
        }
        Ok(())
    }

    pub(crate) fn read_from(reader: &mut ByteReader<'_>) -> Result<Self, LockstepError> {
        let count = reader.read_len()?;
        let mut assets = BTreeMap::new();
        let mut last: Option<AssetGuid> = None;
        for _ in 0..count {
            let guid = AssetGuid(reader.read_u64()?);
            if last.is_some_and(|l| guid <= l) {
                return Err(LockstepError::serialization(format!(
                    "asset {:?} is out of order or duplicated",
                    guid
                )));
            }
            last = Some(guid);
            assets.insert(guid, reader.read_prefixed()?.to_vec());
        }
        Ok(Self { assets })
    }
}

#[cfg(test)]
#[allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]
mod tests {
    use super::super::visitor::ByteWriter;
    use super::*;

    #[test]
    fn round_trips_in_guid_order() {
        let mut assets = DynamicAssets::new();
        assets.insert(AssetGuid(9), vec![1, 2, 3]);
        assets.insert(AssetGuid(2), vec![]);
        assert_eq!(
            assets.iter().map(|(g, _)| g).collect::<Vec<_>>(),
            vec![AssetGuid(2), AssetGuid(9)]
        );

        let mut writer = ByteWriter::new();
        assets.write_to(&mut writer).unwrap();
        let bytes = writer.into_inner();
        let mut reader = ByteReader::new(&bytes);
        assert_eq!(DynamicAssets::read_from(&mut reader).unwrap(), assets);
        reader.finish("assets").unwrap();
    }

    #[test]
    fn rejects_unsorted_guids() {
        let mut writer = ByteWriter::new();
        writer.write_u32(2);
        for guid in [5u64, 5] {
            writer.write_u64(guid);
            writer.write_u32(0);
        }
        let bytes = writer.into_inner();
        assert!(DynamicAssets::read_from(&mut ByteReader::new(&bytes)).is_err());
    }
}
