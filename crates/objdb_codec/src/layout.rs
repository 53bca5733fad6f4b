//! Record layout constants and raw slot access.

/// Bytes before the static section of an object record.
pub(crate) const OBJECT_HEADER: usize = 2;
/// Bytes before the static section of a list record.
pub(crate) const LIST_HEADER: usize = 4;
/// Length prefix of a heap chunk.
pub(crate) const CHUNK_HEADER: usize = 4;
/// Width of a heap offset slot.
pub(crate) const SLOT_OFFSET: usize = 4;
/// Largest record the format can address.
pub const MAX_RECORD_SIZE: usize = u32::MAX as usize;

pub(crate) const BOOL_NULL: u8 = 0;
pub(crate) const BOOL_FALSE: u8 = 1;
pub(crate) const BOOL_TRUE: u8 = 2;

/// Stored form of a null `Int`. Writing this value reads back as null.
pub const NULL_INT: i32 = i32::MIN;
/// Stored form of a null `Long`. Writing this value reads back as null.
pub const NULL_LONG: i64 = i64::MIN;
/// Stored form of a null `Float`; every NaN reads back as null.
pub const NULL_FLOAT: f32 = f32::NAN;
/// Stored form of a null `Double`; every NaN reads back as null.
pub const NULL_DOUBLE: f64 = f64::NAN;

/// Borrowed view of one record (object or list).
#[derive(Clone, Copy)]
pub(crate) struct Record<'a> {
    pub(crate) bytes: &'a [u8],
    /// End of the static section.
    pub(crate) static_end: usize,
}

impl<'a> Record<'a> {
    pub(crate) fn fixed<const N: usize>(&self, pos: usize) -> Option<[u8; N]> {
        if pos + N > self.static_end {
            return None;
        }
        self.bytes.get(pos..pos + N)?.try_into().ok()
    }

    /// Payload of the heap chunk referenced by the slot at `pos`.
    pub(crate) fn chunk(&self, pos: usize) -> Option<&'a [u8]> {
        let offset = u32::from_le_bytes(self.fixed::<4>(pos)?) as usize;
        if offset == 0 {
            return None;
        }
        let len_bytes: [u8; 4] = self
            .bytes
            .get(offset..offset + CHUNK_HEADER)?
            .try_into()
            .ok()?;
        let len = u32::from_le_bytes(len_bytes) as usize;
        let start = offset + CHUNK_HEADER;
        self.bytes.get(start..start.checked_add(len)?)
    }
}

/// Appends `payload` as a chunk at the end of `out`, returning its offset.
pub(crate) fn push_chunk(out: &mut Vec<u8>, payload: &[u8]) -> Option<u32> {
    let offset = u32::try_from(out.len()).ok()?;
    let len = u32::try_from(payload.len()).ok()?;
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(payload);
    Some(offset)
}
