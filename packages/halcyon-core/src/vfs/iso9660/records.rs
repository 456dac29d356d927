//! On-disc structures: volume descriptors and directory records.
//!
//! Numeric fields are stored in both byte orders; readers take the
//! little-endian half. Directory records never straddle sector boundaries,
//! which [`super::image::IsoImage`] relies on when walking extents.

use crate::utils::days_from_civil;
use crate::vfs::{VfsError, VfsResult};

/// Logical sector size. Images with any other block size are refused.
pub const SECTOR_SIZE: usize = 2048;

/// First sector of the volume descriptor set.
pub const VOLUME_DESCRIPTOR_START: u64 = 16;

/// Upper bound on descriptors scanned before giving up on a corrupt image.
pub const MAX_VOLUME_DESCRIPTORS: u64 = 32;

pub const VD_TYPE_PRIMARY: u8 = 1;
pub const VD_TYPE_SUPPLEMENTARY: u8 = 2;
pub const VD_TYPE_TERMINATOR: u8 = 255;

const FLAG_DIRECTORY: u8 = 0x02;
const FLAG_MULTI_EXTENT: u8 = 0x80;

/// Reads the little-endian half of a both-endian 16-bit field.
pub fn both_u16(bytes: &[u8]) -> u16 {
    u16::from_le_bytes([bytes[0], bytes[1]])
}

/// Reads the little-endian half of a both-endian 32-bit field.
pub fn both_u32(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// A parsed directory record.
#[derive(Debug, Clone)]
pub struct DirectoryRecord {
    /// First logical block of the extent.
    pub extent: u32,
    /// Extent length in bytes.
    pub data_length: u32,
    /// File flags byte.
    pub flags: u8,
    /// Decoded identifier with the version suffix stripped. Empty for the
    /// self and parent markers.
    pub name: String,
    /// Recording time, when the on-disc timestamp is plausible.
    pub modified_ms: Option<u64>,
}

impl DirectoryRecord {
    pub fn is_dir(&self) -> bool {
        self.flags & FLAG_DIRECTORY != 0
    }

    /// Files split across several extents are rare and not supported.
    pub fn is_multi_extent(&self) -> bool {
        self.flags & FLAG_MULTI_EXTENT != 0
    }
}

/// Identifies which volume descriptor a sector holds.
///
/// Returns None when the sector does not carry the `CD001` signature.
pub fn descriptor_type(sector: &[u8]) -> Option<u8> {
    if sector.len() >= 7 && &sector[1..6] == b"CD001" {
        Some(sector[0])
    } else {
        None
    }
}

/// Whether a supplementary descriptor's escape sequences announce Joliet.
///
/// The three defined levels differ only in the final byte.
pub fn is_joliet_escape(sector: &[u8]) -> bool {
    if sector.len() < 91 {
        return false;
    }
    let esc = &sector[88..91];
    matches!(esc, b"%/@" | b"%/C" | b"%/E")
}

/// Extracts the logical block size from a primary or supplementary descriptor.
pub fn descriptor_block_size(sector: &[u8]) -> u16 {
    both_u16(&sector[128..130])
}

/// Extracts the root directory record from a primary or supplementary
/// descriptor.
pub fn descriptor_root_record(sector: &[u8], joliet: bool) -> VfsResult<DirectoryRecord> {
    parse_record(&sector[156..190], joliet)?
        .map(|(record, _)| record)
        .ok_or_else(|| VfsError::Protocol("ISO9660 root directory record missing".to_string()))
}

/// Parses one directory record starting at `bytes[0]`.
///
/// Returns the record and its on-disc length, or None for the self/parent
/// markers and for records whose identifier cannot be decoded.
pub fn parse_record(bytes: &[u8], joliet: bool) -> VfsResult<Option<(DirectoryRecord, usize)>> {
    if bytes.is_empty() {
        return Err(VfsError::Protocol("empty directory record".to_string()));
    }
    let record_len = bytes[0] as usize;
    if record_len < 34 || record_len > bytes.len() {
        return Err(VfsError::Protocol(format!(
            "directory record length {} out of range",
            record_len
        )));
    }

    let extent = both_u32(&bytes[2..6]);
    let data_length = both_u32(&bytes[10..14]);
    let flags = bytes[25];
    let name_len = bytes[32] as usize;
    if 33 + name_len > record_len {
        return Err(VfsError::Protocol(format!(
            "identifier length {} exceeds record",
            name_len
        )));
    }
    let raw_name = &bytes[33..33 + name_len];

    // Self and parent markers
    if raw_name == [0x00] || raw_name == [0x01] {
        return Ok(Some((
            DirectoryRecord {
                extent,
                data_length,
                flags,
                name: String::new(),
                modified_ms: recording_time_millis(&bytes[18..25]),
            },
            record_len,
        )));
    }

    let name = match decode_identifier(raw_name, joliet) {
        Some(name) => name,
        None => {
            log::warn!("[Iso9660] Skipping record with undecodable identifier");
            return Ok(None);
        }
    };

    Ok(Some((
        DirectoryRecord {
            extent,
            data_length,
            flags,
            name,
            modified_ms: recording_time_millis(&bytes[18..25]),
        },
        record_len,
    )))
}

fn decode_identifier(raw: &[u8], joliet: bool) -> Option<String> {
    let decoded = if joliet {
        if raw.len() % 2 != 0 {
            return None;
        }
        let units: Vec<u16> = raw
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        String::from_utf16(&units).ok()?
    } else {
        raw.iter().map(|&b| b as char).collect::<String>()
    };

    // Strip the ";1" version suffix and a trailing separator dot left by
    // extensionless names recorded as "NAME."
    let stripped = decoded.split(';').next().unwrap_or(&decoded);
    let stripped = stripped.trim_end_matches('.');
    if stripped.is_empty() {
        return None;
    }
    Some(stripped.to_string())
}

/// Decodes the 7-byte recording timestamp to epoch milliseconds.
///
/// The fields are years-since-1900, month, day, hour, minute, second and a
/// signed GMT offset in 15-minute units. Blank or implausible fields yield
/// None.
pub fn recording_time_millis(bytes: &[u8]) -> Option<u64> {
    if bytes.len() < 7 {
        return None;
    }
    let year = 1900 + i64::from(bytes[0]);
    let month = u32::from(bytes[1]);
    let day = u32::from(bytes[2]);
    let (hour, minute, second) = (
        i64::from(bytes[3]),
        i64::from(bytes[4]),
        i64::from(bytes[5]),
    );
    let gmt_offset_quarter_hours = i64::from(bytes[6] as i8);

    if !(1..=12).contains(&month) || !(1..=31).contains(&day) {
        return None;
    }
    if hour > 23 || minute > 59 || second > 60 {
        return None;
    }

    let days = days_from_civil(year, month, day);
    let local_secs = days * 86_400 + hour * 3600 + minute * 60 + second;
    let utc_secs = local_secs - gmt_offset_quarter_hours * 15 * 60;
    u64::try_from(utc_secs).ok().map(|s| s * 1000)
}

/// Builds an on-disc directory record for tests.
#[cfg(test)]
pub(crate) fn record_bytes(raw_name: &[u8], extent: u32, data_length: u32, flags: u8) -> Vec<u8> {
    let mut len = 33 + raw_name.len();
    if len % 2 != 0 {
        len += 1; // padding byte
    }
    let mut bytes = vec![0u8; len];
    bytes[0] = len as u8;
    bytes[2..6].copy_from_slice(&extent.to_le_bytes());
    bytes[6..10].copy_from_slice(&extent.to_be_bytes());
    bytes[10..14].copy_from_slice(&data_length.to_le_bytes());
    bytes[14..18].copy_from_slice(&data_length.to_be_bytes());
    // 2004-07-01 12:00:00 GMT
    bytes[18..25].copy_from_slice(&[104, 7, 1, 12, 0, 0, 0]);
    bytes[25] = flags;
    bytes[32] = raw_name.len() as u8;
    bytes[33..33 + raw_name.len()].copy_from_slice(raw_name);
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_file_record_and_strips_version() {
        let bytes = record_bytes(b"README.TXT;1", 22, 13, 0);
        let (record, len) = parse_record(&bytes, false).unwrap().unwrap();
        assert_eq!(record.name, "README.TXT");
        assert_eq!(record.extent, 22);
        assert_eq!(record.data_length, 13);
        assert!(!record.is_dir());
        assert_eq!(len, bytes.len());
    }

    #[test]
    fn extensionless_name_drops_trailing_dot() {
        let bytes = record_bytes(b"VIDEO_TS.;1", 30, 2048, 0x02);
        let (record, _) = parse_record(&bytes, false).unwrap().unwrap();
        assert_eq!(record.name, "VIDEO_TS");
        assert!(record.is_dir());
    }

    #[test]
    fn self_and_parent_markers_have_empty_names() {
        let (record, _) = parse_record(&record_bytes(&[0x00], 20, 2048, 0x02), false)
            .unwrap()
            .unwrap();
        assert_eq!(record.name, "");
        let (record, _) = parse_record(&record_bytes(&[0x01], 19, 2048, 0x02), false)
            .unwrap()
            .unwrap();
        assert_eq!(record.name, "");
    }

    #[test]
    fn joliet_names_decode_from_ucs2() {
        let raw: Vec<u8> = "Höhe.txt"
            .encode_utf16()
            .flat_map(|u| u.to_be_bytes())
            .collect();
        let bytes = record_bytes(&raw, 40, 9, 0);
        let (record, _) = parse_record(&bytes, true).unwrap().unwrap();
        assert_eq!(record.name, "Höhe.txt");
    }

    #[test]
    fn odd_length_joliet_identifier_is_skipped() {
        let bytes = record_bytes(&[0x00, b'A', b'B'], 40, 9, 0);
        assert!(parse_record(&bytes, true).unwrap().is_none());
    }

    #[test]
    fn truncated_record_is_a_protocol_error() {
        let err = parse_record(&[40, 0, 0], false).unwrap_err();
        assert!(matches!(err, VfsError::Protocol(_)));
    }

    #[test]
    fn recording_time_decodes_to_epoch_millis() {
        // 2004-07-01T12:00:00Z
        let ms = recording_time_millis(&[104, 7, 1, 12, 0, 0, 0]).unwrap();
        assert_eq!(ms, 1_088_683_200_000);
    }

    #[test]
    fn recording_time_honors_gmt_offset() {
        // +02:00 (8 quarter hours): local noon is 10:00 UTC
        let ms = recording_time_millis(&[104, 7, 1, 12, 0, 0, 8]).unwrap();
        assert_eq!(ms, 1_088_683_200_000 - 2 * 3600 * 1000);
    }

    #[test]
    fn blank_recording_time_is_none() {
        assert_eq!(recording_time_millis(&[0, 0, 0, 0, 0, 0, 0]), None);
    }

    #[test]
    fn multi_extent_flag_is_reported() {
        let bytes = record_bytes(b"BIG.BIN;1", 50, 100, 0x80);
        let (record, _) = parse_record(&bytes, false).unwrap().unwrap();
        assert!(record.is_multi_extent());
    }
}
