//! RSP packet framing: `$<payload>#<cc>`, checksum verification, the `+`/`-`
//! ack/nak handshake, and the optional 2-char sequence-id prefix.

use crate::comm::ByteTransport;
use crate::error::Error;
use crate::hex;

/// Ceiling on a single packet's payload size. Two fixed buffers of this
/// size: comfortably more than `NUMREGBYTES * 2 = 128` hex chars plus
/// framing overhead.
pub const BUFMAX: usize = 400;

/// A decoded, acknowledged inbound packet.
pub struct Packet {
    /// The 2-character sequence prefix, if the host sent one (`xx:...`). It
    /// must be echoed verbatim on the corresponding reply.
    pub seq: Option<[u8; 2]>,
    /// The payload bytes, with the sequence prefix (if any) already
    /// stripped.
    pub payload: Vec<u8>,
}

/// Reads one packet, handling checksum retry transparently.
///
/// Blocks until a packet with a valid checksum has been received and
/// acknowledged with `+`. Bytes preceding the first `$` are discarded, as
/// are bytes of an abandoned payload when a fresh `$` interrupts it.
pub fn read_packet<T: ByteTransport>(transport: &mut T) -> Result<Packet, Error> {
    loop {
        // Step 1: discard bytes until `$`.
        loop {
            let b = transport.get_byte().map_err(Error::comm)?;
            if b == b'$' {
                break;
            }
        }

        // Steps 2-3: accumulate the payload, restarting on an intervening `$`.
        let mut payload = Vec::new();
        let mut sum: u8 = 0;
        loop {
            let b = transport.get_byte().map_err(Error::comm)?;
            match b {
                b'#' => break,
                b'$' => {
                    payload.clear();
                    sum = 0;
                }
                _ => {
                    if payload.len() >= BUFMAX - 1 {
                        return Err(Error::Malformed);
                    }
                    payload.push(b);
                    sum = sum.wrapping_add(b);
                }
            }
        }

        // Step 4: read the two-hex-char checksum.
        let c1 = transport.get_byte().map_err(Error::comm)?;
        let c2 = transport.get_byte().map_err(Error::comm)?;
        let received = hex::decode_byte(c1, c2)
            .ok_or_else(|| Error::unexpected(c1, "checksum (hex digit)"))?;

        // Step 5: ack or nak.
        if received != sum {
            debug!(
                "checksum mismatch: received {:02x}, computed {:02x}",
                received, sum
            );
            transport.put_byte(b'-').map_err(Error::comm)?;
            continue;
        }
        transport.put_byte(b'+').map_err(Error::comm)?;

        // Step 6: strip an optional 2-char sequence prefix.
        let (seq, payload) = split_sequence_prefix(payload);
        return Ok(Packet { seq, payload });
    }
}

fn split_sequence_prefix(payload: Vec<u8>) -> (Option<[u8; 2]>, Vec<u8>) {
    if payload.len() >= 3 && payload[2] == b':' {
        (Some([payload[0], payload[1]]), payload[3..].to_vec())
    } else {
        (None, payload)
    }
}

/// Writes a reply packet and waits for the host's acknowledgement,
/// retransmitting for as long as the host keeps sending `-` (or anything
/// other than `+`). There is no retry limit: the protocol assumes the
/// serial line eventually converges.
pub fn write_reply<T: ByteTransport>(
    transport: &mut T,
    seq: Option<[u8; 2]>,
    body: &[u8],
) -> Result<(), Error> {
    loop {
        transport.put_byte(b'$').map_err(Error::comm)?;
        let mut sum: u8 = 0;

        if let Some(prefix) = seq {
            for &b in prefix.iter().chain(std::iter::once(&b':')) {
                transport.put_byte(b).map_err(Error::comm)?;
                sum = sum.wrapping_add(b);
            }
        }

        for &b in body {
            transport.put_byte(b).map_err(Error::comm)?;
            sum = sum.wrapping_add(b);
        }

        transport.put_byte(b'#').map_err(Error::comm)?;
        let mut checksum_hex = Vec::with_capacity(2);
        hex::encode_byte(sum, &mut checksum_hex);
        transport.put_bytes(&checksum_hex).map_err(Error::comm)?;

        match transport.get_byte().map_err(Error::comm)? {
            b'+' => return Ok(()),
            _ => continue, // '-' or anything else: retransmit
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::LoopbackTransport;

    #[test]
    fn reads_simple_packet_and_acks() {
        let mut t = LoopbackTransport::with_input(b"$g#67+"); // checksum irrelevant; real test below
        // 'g' sums to 0x67.
        let pkt = read_packet(&mut t).unwrap();
        assert_eq!(pkt.payload, b"g");
        assert_eq!(pkt.seq, None);
        assert_eq!(t.to_host, vec![b'+']);
    }

    #[test]
    fn checksum_mismatch_triggers_nak_then_retry() {
        // Bad checksum "00", host then resends with correct "6b" for "m1000,1".
        let mut payload = b"m1000,1".to_vec();
        let sum: u8 = payload.iter().fold(0u8, |a, &b| a.wrapping_add(b));
        let mut input = Vec::new();
        input.push(b'$');
        input.extend_from_slice(&payload);
        input.extend_from_slice(b"#00");
        input.push(b'$');
        input.append(&mut payload.clone());
        let mut hexbuf = Vec::new();
        hex::encode_byte(sum, &mut hexbuf);
        input.extend_from_slice(b"#");
        input.extend_from_slice(&hexbuf);

        let mut t = LoopbackTransport::with_input(&input);
        let pkt = read_packet(&mut t).unwrap();
        assert_eq!(pkt.payload, b"m1000,1");
        assert_eq!(t.to_host, vec![b'-', b'+']);
    }

    #[test]
    fn strips_and_records_sequence_prefix() {
        let body = b"AB:xxx";
        let sum: u8 = body.iter().fold(0u8, |a, &b| a.wrapping_add(b));
        let mut input = vec![b'$'];
        input.extend_from_slice(body);
        input.push(b'#');
        let mut hexbuf = Vec::new();
        hex::encode_byte(sum, &mut hexbuf);
        input.extend_from_slice(&hexbuf);

        let mut t = LoopbackTransport::with_input(&input);
        let pkt = read_packet(&mut t).unwrap();
        assert_eq!(pkt.seq, Some([b'A', b'B']));
        assert_eq!(pkt.payload, b"xxx");
    }

    #[test]
    fn zero_length_reply_has_zero_checksum() {
        let mut t = LoopbackTransport::default();
        t.feed(b"+");
        write_reply(&mut t, None, b"").unwrap();
        assert_eq!(t.to_host, b"$#00");
    }

    #[test]
    fn reply_echoes_sequence_prefix() {
        let mut t = LoopbackTransport::default();
        t.feed(b"+");
        write_reply(&mut t, Some([b'A', b'B']), b"OK").unwrap();
        assert_eq!(&t.to_host[..3], b"$AB");
    }

    #[test]
    fn reply_retransmits_until_acked() {
        let mut t = LoopbackTransport::default();
        t.feed(b"-");
        t.feed(b"-");
        t.feed(b"+");
        write_reply(&mut t, None, b"OK").unwrap();
        // three full "$OK#9a" frames were written
        assert_eq!(t.to_host.len(), "$OK#9a".len() * 3);
    }

    #[test]
    fn payload_at_bufmax_minus_one_is_accepted() {
        let body = vec![b'a'; BUFMAX - 1];
        let sum: u8 = body.iter().fold(0u8, |a, &b| a.wrapping_add(b));
        let mut input = vec![b'$'];
        input.extend_from_slice(&body);
        input.push(b'#');
        let mut hexbuf = Vec::new();
        hex::encode_byte(sum, &mut hexbuf);
        input.extend_from_slice(&hexbuf);

        let mut t = LoopbackTransport::with_input(&input);
        let pkt = read_packet(&mut t).unwrap();
        assert_eq!(pkt.payload.len(), BUFMAX - 1);
        assert_eq!(pkt.payload, body);
    }

    #[test]
    fn oversized_payload_is_rejected() {
        let mut body = vec![b'a'; BUFMAX + 5];
        let mut input = vec![b'$'];
        input.append(&mut body);
        input.extend_from_slice(b"#00");
        let mut t = LoopbackTransport::with_input(&input);
        assert!(matches!(read_packet(&mut t), Err(Error::Malformed)));
    }
}
