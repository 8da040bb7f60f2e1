// Copyright (c) 2026 Tox Secure Transport Contributors
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Two-byte header every extension-range packet (types 249-254) must carry
//! (spec §4.1, §6, invariant 5).

use super::CodecError;

/// Vendor magic byte required on every extension-range payload.
pub const VENDOR_MAGIC: u8 = 0xAB;
/// Highest extension-header version this crate understands.
pub const CURRENT_EXTENSION_VERSION: u8 = 1;

/// Validate `[vendor_magic][extension_version]` and return the tail after
/// it. Any extension-range packet failing this check must be discarded
/// without side effects.
pub fn validate_and_strip(payload: &[u8]) -> Result<&[u8], CodecError> {
    match payload {
        [VENDOR_MAGIC, version, rest @ ..] if *version <= CURRENT_EXTENSION_VERSION => Ok(rest),
        _ => Err(CodecError::InvalidExtension),
    }
}

/// Prefix `payload` with the current extension header.
pub fn with_header(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(2 + payload.len());
    out.push(VENDOR_MAGIC);
    out.push(CURRENT_EXTENSION_VERSION);
    out.extend_from_slice(payload);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_current_version() {
        let framed = with_header(b"abc");
        assert_eq!(validate_and_strip(&framed).unwrap(), b"abc");
    }

    #[test]
    fn rejects_bad_magic() {
        assert_eq!(
            validate_and_strip(&[0x00, 0x01, 1, 2]).unwrap_err(),
            CodecError::InvalidExtension
        );
    }

    #[test]
    fn rejects_future_version() {
        assert_eq!(
            validate_and_strip(&[VENDOR_MAGIC, CURRENT_EXTENSION_VERSION + 1]).unwrap_err(),
            CodecError::InvalidExtension
        );
    }

    #[test]
    fn rejects_short_payload() {
        assert_eq!(
            validate_and_strip(&[VENDOR_MAGIC]).unwrap_err(),
            CodecError::InvalidExtension
        );
    }
}
