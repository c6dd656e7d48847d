//! IqsProg firmware file
//!
//! Firmware exported from the vendor's configuration tool deviates from
//! standard ihex as follows: (1) the checksum for records corresponding to
//! user-exported settings is not recalculated, and (2) an address of 0xFFFF
//! is used for the EOF record. The records are therefore parsed here rather
//! than by a generic ihex reader.

use super::definitions::{APP_LEN, CHKSM, CHKSM_LEN, CSTM, PMAP_END, PMAP_LEN};
use super::error::{Error, RecordError, Result};

const REC_HDR_LEN: usize = 4;
/// ':' + length + address + type + checksum, as text
const REC_FRAME_LEN: usize = 1 + 2 * REC_HDR_LEN + 2;
const REC_TYPE_DATA: u8 = 0x00;
const REC_TYPE_EOF: u8 = 0x01;

/// Flat image of program memory, from the checksum region to the end of the
/// customization region
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FirmwareImage {
    data: Vec<u8>,
}

impl FirmwareImage {
    /// Zero-filled image spanning program memory
    pub fn new() -> Result<Self> {
        let mut data = Vec::new();
        data.try_reserve_exact(PMAP_LEN)
            .map_err(|_| Error::OutOfMemory(PMAP_LEN))?;
        data.resize(PMAP_LEN, 0);

        Ok(FirmwareImage { data })
    }

    /// Wraps raw bytes as-is; the flash programmer rejects a wrong layout
    pub fn from_bytes(data: Vec<u8>) -> Self {
        FirmwareImage { data }
    }

    /// Parses hex records into a new image
    pub fn parse(fw: &[u8]) -> Result<Self> {
        let mut image = Self::new()?;
        let mut pos = 0;
        let mut rec_num: u32 = 1;

        loop {
            let fail = |reason| Error::Record {
                record: rec_num,
                reason,
            };

            if pos + REC_FRAME_LEN > fw.len() {
                return Err(fail(RecordError::Truncated));
            }

            if fw[pos] != b':' {
                return Err(fail(RecordError::InvalidStart));
            }

            let mut rec_hdr = [0u8; REC_HDR_LEN];
            hex2bin(&mut rec_hdr, &fw[pos + 1..pos + 1 + 2 * REC_HDR_LEN])
                .ok_or_else(|| fail(RecordError::InvalidHeader))?;

            let rec_len = rec_hdr[0] as usize;
            let rec_addr = u16::from_be_bytes([rec_hdr[1], rec_hdr[2]]);
            let rec_type = rec_hdr[3];

            let data_pos = pos + 1 + 2 * REC_HDR_LEN;
            let chksm_pos = data_pos + 2 * rec_len;
            if chksm_pos + 2 > fw.len() {
                return Err(fail(RecordError::Truncated));
            }

            let mut rec_data = vec![0u8; rec_len];
            hex2bin(&mut rec_data, &fw[data_pos..chksm_pos])
                .ok_or_else(|| fail(RecordError::InvalidData))?;

            let mut rec_chksm = [0u8; 1];
            hex2bin(&mut rec_chksm, &fw[chksm_pos..chksm_pos + 2])
                .ok_or_else(|| fail(RecordError::InvalidChecksum))?;

            let chksm = checksum(&rec_hdr, &rec_data);
            if chksm != rec_chksm[0] && rec_addr < CSTM {
                log::error!("Incorrect checksum at record {}", rec_num);
                return Err(fail(RecordError::IncorrectChecksum {
                    expected: chksm,
                    found: rec_chksm[0],
                }));
            }

            match rec_type {
                REC_TYPE_DATA => {
                    if rec_addr < CHKSM || rec_addr as usize + rec_len > PMAP_END as usize + 1 {
                        return Err(fail(RecordError::InvalidAddress(rec_addr)));
                    }

                    let offset = (rec_addr - CHKSM) as usize;
                    image.data[offset..offset + rec_len].copy_from_slice(&rec_data);
                }
                REC_TYPE_EOF => return Ok(image),
                _ => return Err(fail(RecordError::InvalidType(rec_type))),
            }

            rec_num += 1;
            pos = chksm_pos + 2;
            while pos < fw.len() && fw[pos] != b':' {
                pos += 1;
            }
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Checksum and settings region
    pub fn checksum_region(&self) -> &[u8] {
        &self.data[..CHKSM_LEN]
    }

    /// Application region
    pub fn app_region(&self) -> &[u8] {
        &self.data[CHKSM_LEN..CHKSM_LEN + APP_LEN]
    }

    /// User customization region
    pub fn custom_region(&self) -> &[u8] {
        &self.data[CHKSM_LEN + APP_LEN..]
    }
}

/// Two's complement of the byte sum of header and payload
pub fn checksum(header: &[u8], data: &[u8]) -> u8 {
    let sum = header
        .iter()
        .chain(data)
        .fold(0u8, |acc, byte| acc.wrapping_add(*byte));

    (!sum).wrapping_add(1)
}

/// Decodes hex digit pairs from [src] into [dst]
fn hex2bin(dst: &mut [u8], src: &[u8]) -> Option<()> {
    for (byte, pair) in dst.iter_mut().zip(src.chunks_exact(2)) {
        let hi = (pair[0] as char).to_digit(16)?;
        let lo = (pair[1] as char).to_digit(16)?;
        *byte = (hi << 4 | lo) as u8;
    }

    Some(())
}
