//! Body encoding per transfer scheme.

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig, STANDARD};
use base64::engine::DecodePaddingMode;
use base64::Engine as _;

use crate::envelope::TransferScheme;
use crate::errors::TransferError;

// Padded on encode; tolerate peers that strip the padding.
const URL_SAFE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Encode a plain body for the wire.
pub fn encode_body(scheme: &TransferScheme, body: &str) -> Result<String, TransferError> {
    match scheme {
        TransferScheme::None => Ok(body.to_owned()),
        TransferScheme::Base64 => Ok(STANDARD.encode(body)),
        TransferScheme::Url => Ok(URL_SAFE.encode(body)),
        TransferScheme::Unknown(s) => Err(TransferError::UnknownScheme(s.clone())),
    }
}

/// Decode a wire body back to plain text.
pub fn decode_body(scheme: &TransferScheme, body: &str) -> Result<String, TransferError> {
    let bytes = match scheme {
        TransferScheme::None => return Ok(body.to_owned()),
        TransferScheme::Base64 => STANDARD.decode(body),
        TransferScheme::Url => URL_SAFE.decode(body),
        TransferScheme::Unknown(s) => return Err(TransferError::UnknownScheme(s.clone())),
    }
    .map_err(|e| TransferError::InvalidBody {
        scheme: scheme.clone(),
        reason: e.to_string(),
    })?;

    String::from_utf8(bytes).map_err(|e| TransferError::InvalidBody {
        scheme: scheme.clone(),
        reason: e.to_string(),
    })
}

/// [`encode_body`], degrading to an empty body with a warning on failure.
pub fn encode_body_lossy(scheme: &TransferScheme, body: &str) -> String {
    encode_body(scheme, body).unwrap_or_else(|e| {
        tracing::warn!(kind = "transfer_scheme_error", error = %e, "body encode failed, sending empty body");
        String::new()
    })
}

/// [`decode_body`], degrading to an empty body with a warning on failure.
pub fn decode_body_lossy(scheme: &TransferScheme, body: &str) -> String {
    decode_body(scheme, body).unwrap_or_else(|e| {
        tracing::warn!(kind = "transfer_scheme_error", error = %e, "body decode failed, using empty body");
        String::new()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_is_identity() {
        assert_eq!(encode_body(&TransferScheme::None, "hi").unwrap(), "hi");
        assert_eq!(decode_body(&TransferScheme::None, "hi").unwrap(), "hi");
    }

    #[test]
    fn base64_known_vector() {
        assert_eq!(encode_body(&TransferScheme::Base64, "hello").unwrap(), "aGVsbG8=");
        assert_eq!(decode_body(&TransferScheme::Base64, "aGVsbG8=").unwrap(), "hello");
    }

    #[test]
    fn url_uses_safe_alphabet() {
        let body = "<<??>>";
        assert_eq!(encode_body(&TransferScheme::Base64, body).unwrap(), "PDw/Pz4+");
        let url = encode_body(&TransferScheme::Url, body).unwrap();
        assert_eq!(url, "PDw_Pz4-");
        assert_eq!(decode_body(&TransferScheme::Url, &url).unwrap(), body);
    }

    #[test]
    fn url_decode_accepts_unpadded() {
        assert_eq!(decode_body(&TransferScheme::Url, "aGVsbG8").unwrap(), "hello");
        assert_eq!(decode_body(&TransferScheme::Url, "aGVsbG8=").unwrap(), "hello");
    }

    #[test]
    fn utf8_bodies_survive() {
        for scheme in [TransferScheme::None, TransferScheme::Base64, TransferScheme::Url] {
            let body = "héllo wörld ✓ 你好";
            let wire = encode_body(&scheme, body).unwrap();
            assert_eq!(decode_body(&scheme, &wire).unwrap(), body, "scheme {scheme}");
        }
    }

    #[test]
    fn unknown_scheme_is_error() {
        let scheme = TransferScheme::Unknown("gzip".into());
        assert_eq!(
            decode_body(&scheme, "x"),
            Err(TransferError::UnknownScheme("gzip".into()))
        );
        assert!(encode_body(&scheme, "x").is_err());
    }

    #[test]
    fn invalid_base64_is_error() {
        let err = decode_body(&TransferScheme::Base64, "not base64!!").unwrap_err();
        assert!(matches!(err, TransferError::InvalidBody { .. }));
    }

    #[test]
    fn lossy_variants_degrade_to_empty() {
        let scheme = TransferScheme::Unknown("gzip".into());
        assert_eq!(decode_body_lossy(&scheme, "payload"), "");
        assert_eq!(encode_body_lossy(&scheme, "payload"), "");
        assert_eq!(decode_body_lossy(&TransferScheme::Base64, "%%%"), "");
    }
}
