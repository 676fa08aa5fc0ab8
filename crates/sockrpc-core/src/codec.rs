//! Envelope codec: JSON envelopes in typed frames, bodies per transfer scheme.
//!
//! Encoding applies the body transfer scheme and then serializes; decoding
//! parses first and then reverses the scheme. A body in an unknown scheme is
//! not an error here: it degrades to an empty string and a warning.

use crate::envelope::{Envelope, Request, Response};
use crate::errors::CodecError;
use crate::frame::Frame;
use crate::transfer::{decode_body_lossy, encode_body_lossy};

pub fn encode_request(request: &Request) -> Result<String, CodecError> {
    let mut wire = request.clone();
    wire.body = encode_body_lossy(&request.transfer_scheme, &request.body);
    serde_json::to_string(&wire).map_err(|e| CodecError::Encode(e.to_string()))
}

pub fn encode_response(response: &Response) -> Result<Vec<u8>, CodecError> {
    let mut wire = response.clone();
    wire.body = encode_body_lossy(&response.transfer_scheme, &response.body);
    serde_json::to_vec(&wire).map_err(|e| CodecError::Encode(e.to_string()))
}

pub fn decode_request(text: &str) -> Result<Request, CodecError> {
    let mut request: Request =
        serde_json::from_str(text).map_err(|e| CodecError::Decode(e.to_string()))?;
    request.body = decode_body_lossy(&request.transfer_scheme, &request.body);
    Ok(request)
}

pub fn decode_response(bytes: &[u8]) -> Result<Response, CodecError> {
    let mut response: Response =
        serde_json::from_slice(bytes).map_err(|e| CodecError::Decode(e.to_string()))?;
    response.body = decode_body_lossy(&response.transfer_scheme, &response.body);
    Ok(response)
}

/// Encode an envelope into the frame type that identifies it.
pub fn encode(envelope: &Envelope) -> Result<Frame, CodecError> {
    match envelope {
        Envelope::Request(r) => encode_request(r).map(Frame::Text),
        Envelope::Response(r) => encode_response(r).map(Frame::Binary),
    }
}

/// Decode a frame, classifying it by frame type.
pub fn decode(frame: &Frame) -> Result<Envelope, CodecError> {
    match frame {
        Frame::Text(text) => decode_request(text).map(Envelope::Request),
        Frame::Binary(bytes) => decode_response(bytes).map(Envelope::Response),
        Frame::Close { .. } => Err(CodecError::UnexpectedFrame("close")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{TransferScheme, STATUS_TIMEOUT};
    use crate::ids::MessageId;

    fn sample_request(scheme: TransferScheme, body: &str) -> Request {
        Request {
            id: MessageId::from_raw("a1"),
            handler: "Chat".into(),
            method: "Room".into(),
            body: body.into(),
            transfer_scheme: scheme,
            ..Default::default()
        }
        .with_header("trace", "t-1")
    }

    #[test]
    fn request_roundtrip_all_schemes() {
        for scheme in [TransferScheme::None, TransferScheme::Base64, TransferScheme::Url] {
            for body in ["hi", "", "multi\nline \"quoted\"", "ünïcödé ✓"] {
                let req = sample_request(scheme.clone(), body);
                let frame = encode(&Envelope::Request(req.clone())).unwrap();
                assert_eq!(frame.kind(), "text");
                assert_eq!(decode(&frame).unwrap(), Envelope::Request(req));
            }
        }
    }

    #[test]
    fn response_roundtrip_all_schemes() {
        for scheme in [TransferScheme::None, TransferScheme::Base64, TransferScheme::Url] {
            let resp = Response {
                id: MessageId::from_raw("a1"),
                status_code: 7,
                message: "ok".into(),
                body: "payload ✓".into(),
                transfer_scheme: scheme,
                ..Default::default()
            };
            let frame = encode(&Envelope::Response(resp.clone())).unwrap();
            assert_eq!(frame.kind(), "binary");
            assert_eq!(decode(&frame).unwrap(), Envelope::Response(resp));
        }
    }

    #[test]
    fn body_is_encoded_on_the_wire() {
        let text = encode_request(&sample_request(TransferScheme::Base64, "hello")).unwrap();
        let raw: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(raw["body"], "aGVsbG8=");
        assert_eq!(raw["transfer_scheme"], "base64");
    }

    #[test]
    fn malformed_text_is_decode_error() {
        let err = decode(&Frame::Text("{not json".into())).unwrap_err();
        assert!(matches!(err, CodecError::Decode(_)));

        let err = decode(&Frame::Text("[1,2,3]".into())).unwrap_err();
        assert!(matches!(err, CodecError::Decode(_)));
    }

    #[test]
    fn malformed_binary_is_decode_error() {
        let err = decode_response(b"\xff\xfe").unwrap_err();
        assert!(matches!(err, CodecError::Decode(_)));
    }

    #[test]
    fn wrong_field_type_is_decode_error() {
        let err = decode_response(br#"{"id":"x","status_code":"zero"}"#).unwrap_err();
        assert!(matches!(err, CodecError::Decode(_)));
    }

    #[test]
    fn close_frame_is_not_an_envelope() {
        let frame = Frame::Close {
            code: 1000,
            reason: "bye".into(),
        };
        assert_eq!(decode(&frame), Err(CodecError::UnexpectedFrame("close")));
    }

    #[test]
    fn unknown_scheme_decodes_to_empty_body() {
        let text = r#"{"id":"q","handler":"H","method":"m","headers":{},"body":"abc","transfer_scheme":"zip"}"#;
        let req = decode_request(text).unwrap();
        assert_eq!(req.body, "");
        assert_eq!(req.transfer_scheme, TransferScheme::Unknown("zip".into()));
    }

    #[test]
    fn invalid_base64_body_decodes_to_empty() {
        let bytes = br#"{"id":"q","status_code":-1,"message":"timeout","body":"@@@","transfer_scheme":"base64"}"#;
        let resp = decode_response(bytes).unwrap();
        assert_eq!(resp.status_code, STATUS_TIMEOUT);
        assert_eq!(resp.body, "");
    }
}
