//! Fixed-width row padding.
//!
//! Selection-vector protocols combine rows column by column, so every row
//! must have the same width.
//!
//! Format: `[4 bytes: u32 LE length][data][zero padding]`

use crate::error::{PirError, Result};

/// Length prefix size (4 bytes, u32 LE).
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Width of a padded row able to hold `max_len` data bytes.
pub fn row_width(max_len: usize) -> usize {
    LENGTH_PREFIX_SIZE + max_len
}

/// Pad `data` to exactly `width` bytes.
pub fn pad_row(data: &[u8], width: usize) -> Result<Vec<u8>> {
    let needed = LENGTH_PREFIX_SIZE + data.len();
    if needed > width {
        return Err(PirError::InvalidParameter(format!(
            "row of {} bytes does not fit width {}",
            data.len(),
            width
        )));
    }
    let len = u32::try_from(data.len())
        .map_err(|_| PirError::InvalidParameter("row longer than u32::MAX".into()))?;

    let mut padded = vec![0u8; width];
    padded[..LENGTH_PREFIX_SIZE].copy_from_slice(&len.to_le_bytes());
    padded[LENGTH_PREFIX_SIZE..needed].copy_from_slice(data);
    Ok(padded)
}

/// Strip padding by reading the length prefix.
pub fn unpad_row(data: &[u8]) -> Result<Vec<u8>> {
    if data.len() < LENGTH_PREFIX_SIZE {
        return Err(PirError::Crypto(pir_crypto::CryptoError::Format(format!(
            "padded row too short: {} bytes",
            data.len()
        ))));
    }
    let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
    prefix.copy_from_slice(&data[..LENGTH_PREFIX_SIZE]);
    let original_length = u32::from_le_bytes(prefix) as usize;

    let available = data.len() - LENGTH_PREFIX_SIZE;
    if original_length > available {
        return Err(PirError::Crypto(pir_crypto::CryptoError::Format(format!(
            "invalid padding: claimed length {original_length} exceeds available data {available}"
        ))));
    }
    Ok(data[LENGTH_PREFIX_SIZE..LENGTH_PREFIX_SIZE + original_length].to_vec())
}
