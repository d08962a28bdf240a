use std::io::{Read, Write};

use crate::net::packet::{
    Packet, PacketHeader, HEADER_LENGTH, MAX_PAYLOAD_LENGTH, TYPE_RESPONSE,
};
use crate::net::{packet, ProtocolError};
use crate::telemetry::logging;

/// Which side of the wire this connection speaks for. The sequence rules
/// below are mirrored between the two.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Server,
    Client,
}

/// A framed packet stream with the sequence-number discipline layered on
/// top. The counters are informational for the peer; there is no resend or
/// gap detection.
#[derive(Debug)]
pub struct Connection<S> {
    stream: S,
    pub id: i64,
    pub user: String,
    endpoint: Endpoint,
    local_sequence: u16,
    remote_sequence: u16,
}

impl<S> Connection<S> {
    pub fn new(stream: S, id: i64, endpoint: Endpoint) -> Self {
        Self {
            stream,
            id,
            user: String::new(),
            endpoint,
            local_sequence: rand::random(),
            remote_sequence: 0,
        }
    }

    pub fn into_stream(self) -> S {
        self.stream
    }

    pub fn stream(&self) -> &S {
        &self.stream
    }

    fn describe(&self) -> String {
        if self.user.is_empty() {
            format!("[{}]", self.id)
        } else {
            format!("[{}/{}]", self.id, self.user)
        }
    }

    /// Picks the sequence id the next outgoing packet carries. Responses
    /// echo the peer on the server side and count locally on the client
    /// side; all other packets do the opposite.
    fn next_sequence_id(&mut self, is_response: bool) -> u16 {
        let counts_locally = match self.endpoint {
            Endpoint::Server => !is_response,
            Endpoint::Client => is_response,
        };

        if counts_locally {
            self.local_sequence = self.local_sequence.wrapping_add(1);
            self.local_sequence
        } else {
            self.remote_sequence
        }
    }
}

impl<S> std::fmt::Display for Connection<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.describe())
    }
}

impl<S: Read + Write> Connection<S> {
    pub fn send(&mut self, packet: &Packet) -> Result<(), ProtocolError> {
        let payload = packet.encode_payload()?;
        if payload.len() > MAX_PAYLOAD_LENGTH {
            return Err(packet::payload_error(payload.len(), MAX_PAYLOAD_LENGTH));
        }

        let packet_type = packet.packet_type();
        let header = PacketHeader {
            length: payload.len() as u16,
            sequence_id: self.next_sequence_id(packet_type.type_id == TYPE_RESPONSE),
            packet_type,
        };

        logging::log_netload(&format!("{} sending {}", self.describe(), header.packet_type));

        let mut frame = Vec::with_capacity(HEADER_LENGTH + payload.len());
        frame.extend_from_slice(&header.encode());
        frame.extend_from_slice(&payload);
        self.stream.write_all(&frame)?;
        self.stream.flush()?;

        Ok(())
    }

    pub fn recv(&mut self) -> Result<Packet, ProtocolError> {
        let mut header_bytes = [0u8; HEADER_LENGTH];
        self.stream.read_exact(&mut header_bytes)?;
        let header = PacketHeader::decode(&header_bytes);

        logging::log_netload(&format!(
            "{} receiving {}",
            self.describe(),
            header.packet_type
        ));

        let mut payload = vec![0u8; header.length as usize];
        self.stream.read_exact(&mut payload)?;

        let packet = Packet::decode(&header, &payload)?;
        self.remote_sequence = header.sequence_id;

        Ok(packet)
    }
}

/// Error for a packet that arrived out of turn in one of the linear
/// exchanges. Both endpoints use this to keep the state machine honest.
pub fn unexpected(expected: &'static str, actual: &Packet) -> ProtocolError {
    ProtocolError::UnexpectedPacket {
        expected,
        actual: actual.name(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::packet::{DataChunkRef, PacketType, ERROR_NONE, TYPE_NOTIFICATION};
    use std::io::Cursor;

    // one-directional stream: reads come from `input`, writes land in `output`
    struct MemStream {
        input: Cursor<Vec<u8>>,
        output: Vec<u8>,
    }

    impl MemStream {
        fn new(input: Vec<u8>) -> Self {
            Self {
                input: Cursor::new(input),
                output: Vec::new(),
            }
        }
    }

    impl Read for MemStream {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.input.read(buf)
        }
    }

    impl Write for MemStream {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.output.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn frame(packet: &Packet, sequence_id: u16) -> Vec<u8> {
        let payload = packet.encode_payload().expect("encode");
        let header = PacketHeader {
            length: payload.len() as u16,
            sequence_id,
            packet_type: packet.packet_type(),
        };
        let mut frame = header.encode().to_vec();
        frame.extend_from_slice(&payload);
        frame
    }

    fn sent_headers(output: &[u8]) -> Vec<PacketHeader> {
        let mut headers = Vec::new();
        let mut pos = 0;
        while pos < output.len() {
            let mut bytes = [0u8; HEADER_LENGTH];
            bytes.copy_from_slice(&output[pos..pos + HEADER_LENGTH]);
            let header = PacketHeader::decode(&bytes);
            pos += HEADER_LENGTH + header.length as usize;
            headers.push(header);
        }
        headers
    }

    #[test]
    fn server_notifications_count_up_from_initial() {
        let mut conn = Connection::new(MemStream::new(Vec::new()), 1, Endpoint::Server);
        let notification = Packet::ConnectionSummaryNotification {
            success: true,
            unknown: 10,
        };
        conn.send(&notification).expect("send");
        conn.send(&notification).expect("send");
        conn.send(&Packet::FastDataRequest).expect("send");

        let headers = sent_headers(&conn.stream().output);
        assert_eq!(headers.len(), 3);
        let first = headers[0].sequence_id;
        assert_eq!(headers[1].sequence_id, first.wrapping_add(1));
        assert_eq!(headers[2].sequence_id, first.wrapping_add(2));
    }

    #[test]
    fn server_response_echoes_request_sequence() {
        let request = frame(&Packet::DisconnectionRequest { value: true }, 0xBEEF);
        let mut conn = Connection::new(MemStream::new(request), 1, Endpoint::Server);

        conn.recv().expect("recv");
        conn.send(&Packet::DisconnectionResponse { value: true })
            .expect("send");

        let headers = sent_headers(&conn.stream().output);
        assert_eq!(headers[0].sequence_id, 0xBEEF);
        assert_eq!(headers[0].packet_type.type_id, TYPE_RESPONSE);
    }

    #[test]
    fn client_requests_echo_remote_sequence() {
        let incoming = frame(&Packet::FastDataRequest, 0x0102);
        let mut conn = Connection::new(MemStream::new(incoming), 2, Endpoint::Client);

        conn.recv().expect("recv");
        conn.send(&Packet::AuthInfoRequestFooter).expect("send");

        let headers = sent_headers(&conn.stream().output);
        assert_eq!(headers[0].sequence_id, 0x0102);
    }

    #[test]
    fn client_responses_count_locally() {
        let incoming = frame(&Packet::FastDataRequest, 0x0102);
        let mut conn = Connection::new(MemStream::new(incoming), 2, Endpoint::Client);

        conn.recv().expect("recv");
        let response = Packet::FastDataResponse {
            unknown1: 0x03,
            unknown2: 0x01,
            user: "abc".to_string(),
        };
        conn.send(&response).expect("send");
        conn.send(&response).expect("send");

        let headers = sent_headers(&conn.stream().output);
        assert_ne!(headers[0].sequence_id, 0x0102);
        assert_eq!(
            headers[1].sequence_id,
            headers[0].sequence_id.wrapping_add(1)
        );
    }

    #[test]
    fn unknown_packet_leaves_following_packet_intact() {
        let unknown_header = PacketHeader {
            length: 0,
            sequence_id: 7,
            packet_type: PacketType {
                name_id: 0x7777,
                type_id: TYPE_NOTIFICATION,
                error_id: ERROR_NONE,
            },
        };
        let mut input = unknown_header.encode().to_vec();
        input.extend_from_slice(&frame(&Packet::OnlineCheckRequest, 8));

        let mut conn = Connection::new(MemStream::new(input), 3, Endpoint::Server);
        assert!(matches!(
            conn.recv(),
            Err(ProtocolError::UnknownPacket { name_id: 0x7777, .. })
        ));
        assert_eq!(conn.recv().expect("recv"), Packet::OnlineCheckRequest);
    }

    #[test]
    fn unexpected_reports_both_variants() {
        let err = unexpected(
            "fastDataResponse",
            &Packet::TusUserAreaReadRequestData(DataChunkRef::default()),
        );
        match err {
            ProtocolError::UnexpectedPacket { expected, actual } => {
                assert_eq!(expected, "fastDataResponse");
                assert_eq!(actual, "tusUserAreaReadRequestData");
            }
            other => panic!("expected unexpected packet error, got {:?}", other),
        }
    }
}
