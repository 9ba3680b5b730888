//! Framing for byte-stream bridges: length prefix (4 bytes LE) + raw packet.
//!
//! A streaming link preserves packet boundaries; when it is relayed over a plain byte
//! stream each packet travels as one frame.

const LEN_SIZE: usize = 4;
const MAX_FRAME_LEN: u32 = 64 * 1024;

/// Encode one packet into a frame: 4 bytes LE length + payload.
pub fn encode_frame(payload: &[u8]) -> Result<Vec<u8>, FrameEncodeError> {
    let len = u32::try_from(payload.len()).map_err(|_| FrameEncodeError::TooLarge)?;
    if len > MAX_FRAME_LEN {
        return Err(FrameEncodeError::TooLarge);
    }
    let mut out = Vec::with_capacity(LEN_SIZE + payload.len());
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(payload);
    Ok(out)
}

#[derive(Debug, thiserror::Error)]
pub enum FrameEncodeError {
    #[error("frame too large")]
    TooLarge,
}

/// Decode one frame from the front of `bytes`. Returns the payload and the number of bytes consumed.
/// Call with a partial buffer; `NeedMore` means try again after more data arrives.
pub fn decode_frame(bytes: &[u8]) -> Result<(&[u8], usize), FrameDecodeError> {
    if bytes.len() < LEN_SIZE {
        return Err(FrameDecodeError::NeedMore);
    }
    let len = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    if len > MAX_FRAME_LEN {
        return Err(FrameDecodeError::TooLarge);
    }
    let len = len as usize;
    if bytes.len() < LEN_SIZE + len {
        return Err(FrameDecodeError::NeedMore);
    }
    Ok((&bytes[LEN_SIZE..LEN_SIZE + len], LEN_SIZE + len))
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FrameDecodeError {
    #[error("need more bytes")]
    NeedMore,
    #[error("frame too large")]
    TooLarge,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_packet() {
        let frame = encode_frame(&[12, 1, 2, 3]).unwrap();
        assert_eq!(&frame[..4], &[4, 0, 0, 0]);
        let (payload, n) = decode_frame(&frame).unwrap();
        assert_eq!(n, frame.len());
        assert_eq!(payload, &[12, 1, 2, 3]);
    }

    #[test]
    fn partial_read_need_more() {
        let frame = encode_frame(&[1, 2, 3]).unwrap();
        assert_eq!(decode_frame(&frame[..2]), Err(FrameDecodeError::NeedMore));
        assert_eq!(
            decode_frame(&frame[..LEN_SIZE]),
            Err(FrameDecodeError::NeedMore)
        );
    }

    #[test]
    fn oversized_length_rejected() {
        assert_eq!(
            decode_frame(&[0xff, 0xff, 0xff, 0xff]),
            Err(FrameDecodeError::TooLarge)
        );
        assert!(encode_frame(&vec![0; MAX_FRAME_LEN as usize + 1]).is_err());
    }

    #[test]
    fn multiple_frames() {
        let fa = encode_frame(&[5, 5]).unwrap();
        let fb = encode_frame(&[]).unwrap();
        let mut buf = Vec::new();
        buf.extend_from_slice(&fa);
        buf.extend_from_slice(&fb);
        let (a, n1) = decode_frame(&buf).unwrap();
        assert_eq!(a, &[5, 5]);
        let (b, n2) = decode_frame(&buf[n1..]).unwrap();
        assert!(b.is_empty());
        assert_eq!(n1 + n2, buf.len());
    }
}
