//! Store manifest.
//!
//! ```text
//! | magic "OBJM" | major: u16 | minor: u16 | schema_len: u32 | schema JSON | crc32: u32 |
//! ```

use crate::error::{CoreError, CoreResult};
use objdb_codec::InstanceSchema;

/// Magic bytes of the manifest file.
pub const MANIFEST_MAGIC: [u8; 4] = *b"OBJM";

/// On-disk format version written by this build (major, minor).
pub const FORMAT_VERSION: (u16, u16) = (1, 0);

const HEADER_LEN: usize = 12;

/// Format version and schema of a store.
#[derive(Debug, Clone, PartialEq)]
pub struct Manifest {
    /// Format version (major, minor).
    pub format_version: (u16, u16),
    /// Schema the store was last opened with.
    pub schema: InstanceSchema,
}

impl Manifest {
    /// Manifest of the current format for `schema`.
    #[must_use]
    pub fn new(schema: InstanceSchema) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            schema,
        }
    }

    /// Encodes to bytes.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let schema = self.schema.to_json();
        let mut buf = Vec::with_capacity(HEADER_LEN + schema.len() + 4);
        buf.extend_from_slice(&MANIFEST_MAGIC);
        buf.extend_from_slice(&self.format_version.0.to_le_bytes());
        buf.extend_from_slice(&self.format_version.1.to_le_bytes());
        buf.extend_from_slice(&(schema.len() as u32).to_le_bytes());
        buf.extend_from_slice(schema.as_bytes());
        let crc = crc32fast::hash(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());
        buf
    }

    /// Decodes from bytes.
    ///
    /// # Errors
    ///
    /// [`CoreError::Corrupted`] for damaged content, [`CoreError::Version`]
    /// for a different major format version.
    pub fn decode(data: &[u8]) -> CoreResult<Self> {
        if data.len() < HEADER_LEN + 4 || data[..4] != MANIFEST_MAGIC {
            return Err(CoreError::corrupted("manifest header is missing"));
        }
        let (body, crc) = data.split_at(data.len() - 4);
        let stored = u32::from_le_bytes([crc[0], crc[1], crc[2], crc[3]]);
        if crc32fast::hash(body) != stored {
            return Err(CoreError::corrupted("manifest checksum mismatch"));
        }

        let major = u16::from_le_bytes([body[4], body[5]]);
        let minor = u16::from_le_bytes([body[6], body[7]]);
        if major != FORMAT_VERSION.0 {
            return Err(CoreError::version(format!(
                "store format {major}.{minor} is not readable by format {}.{}",
                FORMAT_VERSION.0, FORMAT_VERSION.1
            )));
        }

        let schema_len = u32::from_le_bytes([body[8], body[9], body[10], body[11]]) as usize;
        let schema = body
            .get(HEADER_LEN..)
            .filter(|s| s.len() == schema_len)
            .and_then(|s| std::str::from_utf8(s).ok())
            .ok_or_else(|| CoreError::corrupted("manifest schema length mismatch"))?;
        let schema = InstanceSchema::from_json(schema)
            .map_err(|e| CoreError::corrupted(format!("manifest schema: {e}")))?;

        Ok(Self {
            format_version: (major, minor),
            schema,
        })
    }

    /// Checks that `schema` can read what was written under this manifest.
    ///
    /// # Errors
    ///
    /// [`CoreError::Version`] describing the first incompatibility.
    pub fn check_schema(&self, schema: &InstanceSchema) -> CoreResult<()> {
        match schema.incompatibility_with(&self.schema) {
            Some(reason) => Err(CoreError::version(format!("schema mismatch: {reason}"))),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema(extra: &str) -> InstanceSchema {
        InstanceSchema::from_json(&format!(
            r#"[{{"name":"User","properties":[{{"name":"age","type":"Int"}}{extra}]}}]"#
        ))
        .unwrap()
    }

    #[test]
    fn encode_decode() {
        let manifest = Manifest::new(schema(""));
        let decoded = Manifest::decode(&manifest.encode()).unwrap();
        assert_eq!(decoded, manifest);
    }

    #[test]
    fn damaged_bytes_are_rejected() {
        let mut bytes = Manifest::new(schema("")).encode();
        assert!(matches!(
            Manifest::decode(&bytes[..10]),
            Err(CoreError::Corrupted { .. })
        ));
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0x20;
        assert!(matches!(
            Manifest::decode(&bytes),
            Err(CoreError::Corrupted { .. })
        ));
    }

    #[test]
    fn other_major_version_is_rejected() {
        let mut manifest = Manifest::new(schema(""));
        manifest.format_version = (FORMAT_VERSION.0 + 1, 0);
        let err = Manifest::decode(&manifest.encode()).unwrap_err();
        assert!(matches!(err, CoreError::Version { .. }));
    }

    #[test]
    fn appended_properties_are_compatible() {
        let manifest = Manifest::new(schema(""));
        manifest
            .check_schema(&schema(r#",{"name":"name","type":"String"}"#))
            .unwrap();

        let changed = InstanceSchema::from_json(
            r#"[{"name":"User","properties":[{"name":"age","type":"Long"}]}]"#,
        )
        .unwrap();
        assert!(matches!(
            manifest.check_schema(&changed),
            Err(CoreError::Version { .. })
        ));
    }
}
