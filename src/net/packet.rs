use crate::game::dragon::Property;
use crate::net::ProtocolError;

pub const NAME_ONLINE_CHECK: u16 = 0x1001;
pub const NAME_DISCONNECTION: u16 = 0x1010;
pub const NAME_RECONNECTION: u16 = 0x1011;
pub const NAME_FAST_DATA: u16 = 0x1020;
pub const NAME_CONNECTION_SUMMARY: u16 = 0x1021;
pub const NAME_AUTH_INFO_HEADER: u16 = 0x1101;
pub const NAME_AUTH_INFO_DATA: u16 = 0x1102;
pub const NAME_AUTH_INFO_FOOTER: u16 = 0x1103;
pub const NAME_TUS_COMMON_AREA_ACQUISITION: u16 = 0x1201;
pub const NAME_TUS_COMMON_AREA_SETTINGS: u16 = 0x1202;
pub const NAME_TUS_COMMON_AREA_ADD: u16 = 0x1203;
pub const NAME_TUS_USER_AREA_WRITE_HEADER: u16 = 0x1204;
pub const NAME_TUS_USER_AREA_WRITE_DATA: u16 = 0x1205;
pub const NAME_TUS_USER_AREA_WRITE_FOOTER: u16 = 0x1206;
pub const NAME_TUS_USER_AREA_READ_HEADER: u16 = 0x1207;
pub const NAME_TUS_USER_AREA_READ_DATA: u16 = 0x1208;
pub const NAME_TUS_USER_AREA_READ_FOOTER: u16 = 0x1209;

pub const TYPE_REQUEST: u8 = 0x01;
pub const TYPE_RESPONSE: u8 = 0x02;
pub const TYPE_NOTIFICATION: u8 = 0x10;

pub const ERROR_NONE: u8 = 0x00;

pub const MAX_PAYLOAD_LENGTH: usize = u16::MAX as usize;
pub const HEADER_LENGTH: usize = 8;

const PROPERTY_SIZE: usize = 9;

/// Big-endian cursor over a received payload. Reads return `None` once the
/// payload runs short; callers translate that into a payload size error.
#[derive(Debug, Clone)]
pub struct PacketReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> PacketReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    pub fn consumed(&self) -> usize {
        self.pos
    }

    pub fn read_u8(&mut self) -> Option<u8> {
        if self.remaining() < 1 {
            return None;
        }
        let value = self.data[self.pos];
        self.pos += 1;
        Some(value)
    }

    pub fn read_u16_be(&mut self) -> Option<u16> {
        if self.remaining() < 2 {
            return None;
        }
        let hi = self.data[self.pos] as u16;
        let lo = self.data[self.pos + 1] as u16;
        self.pos += 2;
        Some((hi << 8) | lo)
    }

    pub fn read_u32_be(&mut self) -> Option<u32> {
        if self.remaining() < 4 {
            return None;
        }
        let b0 = self.data[self.pos] as u32;
        let b1 = self.data[self.pos + 1] as u32;
        let b2 = self.data[self.pos + 2] as u32;
        let b3 = self.data[self.pos + 3] as u32;
        self.pos += 4;
        Some((b0 << 24) | (b1 << 16) | (b2 << 8) | b3)
    }

    pub fn read_u64_be(&mut self) -> Option<u64> {
        let high = self.read_u32_be()? as u64;
        let low = self.read_u32_be()? as u64;
        Some((high << 32) | low)
    }

    pub fn read_bytes(&mut self, len: usize) -> Option<&'a [u8]> {
        if self.remaining() < len {
            return None;
        }
        let start = self.pos;
        self.pos += len;
        Some(&self.data[start..start + len])
    }

    pub fn read_dynamic(&mut self) -> Option<&'a [u8]> {
        let len = self.read_u16_be()? as usize;
        self.read_bytes(len)
    }

    pub fn read_dynamic_string(&mut self) -> Option<String> {
        let bytes = self.read_dynamic()?;
        Some(String::from_utf8_lossy(bytes).to_string())
    }

    pub fn skip(&mut self, len: usize) -> Option<()> {
        if self.remaining() < len {
            return None;
        }
        self.pos += len;
        Some(())
    }
}

/// Big-endian payload builder, the counterpart to [`PacketReader`].
#[derive(Debug, Default, Clone)]
pub struct PacketWriter {
    data: Vec<u8>,
}

impl PacketWriter {
    pub fn new() -> Self {
        Self { data: Vec::new() }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }

    pub fn write_u8(&mut self, value: u8) {
        self.data.push(value);
    }

    pub fn write_u16_be(&mut self, value: u16) {
        self.data.extend_from_slice(&value.to_be_bytes());
    }

    pub fn write_u32_be(&mut self, value: u32) {
        self.data.extend_from_slice(&value.to_be_bytes());
    }

    pub fn write_u64_be(&mut self, value: u64) {
        self.data.extend_from_slice(&value.to_be_bytes());
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    pub fn write_dynamic(&mut self, bytes: &[u8]) -> Result<(), ProtocolError> {
        if bytes.len() > MAX_PAYLOAD_LENGTH {
            return Err(payload_error(bytes.len(), MAX_PAYLOAD_LENGTH));
        }
        self.write_u16_be(bytes.len() as u16);
        self.write_bytes(bytes);
        Ok(())
    }

    pub fn write_dynamic_string(&mut self, value: &str) -> Result<(), ProtocolError> {
        self.write_dynamic(value.as_bytes())
    }
}

/// The identifying triple carried by every packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketType {
    pub name_id: u16,
    pub type_id: u8,
    pub error_id: u8,
}

impl std::fmt::Display for PacketType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self.name_id {
            NAME_ONLINE_CHECK => "onlineCheck",
            NAME_DISCONNECTION => "disconnection",
            NAME_RECONNECTION => "reconnection",
            NAME_FAST_DATA => "fastData",
            NAME_CONNECTION_SUMMARY => "connectionSummary",
            NAME_AUTH_INFO_HEADER => "authenticationInformationHeader",
            NAME_AUTH_INFO_DATA => "authenticationInformationData",
            NAME_AUTH_INFO_FOOTER => "authenticationInformationFooter",
            NAME_TUS_COMMON_AREA_ACQUISITION => "tusCommonAreaAcquisition",
            NAME_TUS_COMMON_AREA_SETTINGS => "tusCommonAreaSettings",
            NAME_TUS_COMMON_AREA_ADD => "tusCommonAreaAdd",
            NAME_TUS_USER_AREA_WRITE_HEADER => "tusUserAreaWriteHeader",
            NAME_TUS_USER_AREA_WRITE_DATA => "tusUserAreaWriteData",
            NAME_TUS_USER_AREA_WRITE_FOOTER => "tusUserAreaWriteFooter",
            NAME_TUS_USER_AREA_READ_HEADER => "tusUserAreaReadHeader",
            NAME_TUS_USER_AREA_READ_DATA => "tusUserAreaReadData",
            NAME_TUS_USER_AREA_READ_FOOTER => "tusUserAreaReadFooter",
            _ => return write!(f, "unknown({:#06x})", self.name_id),
        };
        let kind = match self.type_id {
            TYPE_REQUEST => "request",
            TYPE_RESPONSE => "response",
            TYPE_NOTIFICATION => "notification",
            _ => "unknown",
        };
        if self.error_id == ERROR_NONE {
            write!(f, "{} {}", name, kind)
        } else {
            write!(f, "{} {} error({:#04x})", name, kind, self.error_id)
        }
    }
}

/// Wire header preceding every payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub length: u16,
    pub sequence_id: u16,
    pub packet_type: PacketType,
}

impl PacketHeader {
    pub fn encode(&self) -> [u8; HEADER_LENGTH] {
        let mut header = [0u8; HEADER_LENGTH];
        header[0..2].copy_from_slice(&self.length.to_be_bytes());
        header[2..4].copy_from_slice(&self.sequence_id.to_be_bytes());
        header[4..6].copy_from_slice(&self.packet_type.name_id.to_be_bytes());
        header[6] = self.packet_type.type_id;
        header[7] = self.packet_type.error_id;
        header
    }

    pub fn decode(data: &[u8; HEADER_LENGTH]) -> PacketHeader {
        PacketHeader {
            length: u16::from_be_bytes([data[0], data[1]]),
            sequence_id: u16::from_be_bytes([data[2], data[3]]),
            packet_type: PacketType {
                name_id: u16::from_be_bytes([data[4], data[5]]),
                type_id: data[6],
                error_id: data[7],
            },
        }
    }
}

/// Chunk carrying payload bytes at an offset within a larger transfer.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DataChunk {
    pub offset: u32,
    pub data: Vec<u8>,
}

/// Chunk acknowledgment naming an offset and length but carrying no body.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DataChunkRef {
    pub offset: u32,
    pub length: u16,
}

/// Every packet the service speaks, tagged by direction and name. The
/// shared payload shapes (boolean, data chunk, property list) appear as
/// fields of the variants that carry them.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    OnlineCheckRequest,
    OnlineCheckResponse,
    DisconnectionRequest { value: bool },
    DisconnectionResponse { value: bool },
    FastDataRequest,
    FastDataResponse { unknown1: u8, unknown2: u32, user: String },
    AuthInfoRequestHeader { unknown: u8, data_length: u32 },
    AuthInfoRequestData(DataChunk),
    AuthInfoRequestFooter,
    AuthInfoResponseHeader { chunk_length: u16 },
    AuthInfoResponseData(DataChunkRef),
    AuthInfoResponseFooter { value: bool },
    TusCommonAreaAcquisitionRequest { property_indices: Vec<u8> },
    TusCommonAreaAcquisitionResponse { properties: Vec<Property> },
    TusCommonAreaSettingsRequest { properties: Vec<Property> },
    TusCommonAreaSettingsResponse { properties: Vec<Property> },
    TusCommonAreaAddRequest { properties: Vec<Property> },
    TusCommonAreaAddResponse { properties: Vec<Property> },
    TusUserAreaWriteRequestHeader { data_length: u32, user: String },
    TusUserAreaWriteRequestData(DataChunk),
    TusUserAreaWriteRequestFooter,
    TusUserAreaWriteResponseHeader { chunk_length: u16 },
    TusUserAreaWriteResponseData(DataChunkRef),
    TusUserAreaWriteResponseFooter,
    TusUserAreaReadRequestHeader { user: String },
    TusUserAreaReadRequestData(DataChunkRef),
    TusUserAreaReadRequestFooter,
    TusUserAreaReadResponseHeader { data_length: u32 },
    TusUserAreaReadResponseData(DataChunk),
    TusUserAreaReadResponseFooter,
    DisconnectionNotification { unknown: u8, notification: String },
    ReconnectionNotification { host: String, port: u16 },
    ConnectionSummaryNotification { success: bool, unknown: u16 },
}

impl Packet {
    pub fn packet_type(&self) -> PacketType {
        let (name_id, type_id) = match self {
            Packet::OnlineCheckRequest => (NAME_ONLINE_CHECK, TYPE_REQUEST),
            Packet::OnlineCheckResponse => (NAME_ONLINE_CHECK, TYPE_RESPONSE),
            Packet::DisconnectionRequest { .. } => (NAME_DISCONNECTION, TYPE_REQUEST),
            Packet::DisconnectionResponse { .. } => (NAME_DISCONNECTION, TYPE_RESPONSE),
            Packet::FastDataRequest => (NAME_FAST_DATA, TYPE_REQUEST),
            Packet::FastDataResponse { .. } => (NAME_FAST_DATA, TYPE_RESPONSE),
            Packet::AuthInfoRequestHeader { .. } => (NAME_AUTH_INFO_HEADER, TYPE_REQUEST),
            Packet::AuthInfoRequestData(_) => (NAME_AUTH_INFO_DATA, TYPE_REQUEST),
            Packet::AuthInfoRequestFooter => (NAME_AUTH_INFO_FOOTER, TYPE_REQUEST),
            Packet::AuthInfoResponseHeader { .. } => (NAME_AUTH_INFO_HEADER, TYPE_RESPONSE),
            Packet::AuthInfoResponseData(_) => (NAME_AUTH_INFO_DATA, TYPE_RESPONSE),
            Packet::AuthInfoResponseFooter { .. } => (NAME_AUTH_INFO_FOOTER, TYPE_RESPONSE),
            Packet::TusCommonAreaAcquisitionRequest { .. } => {
                (NAME_TUS_COMMON_AREA_ACQUISITION, TYPE_REQUEST)
            }
            Packet::TusCommonAreaAcquisitionResponse { .. } => {
                (NAME_TUS_COMMON_AREA_ACQUISITION, TYPE_RESPONSE)
            }
            Packet::TusCommonAreaSettingsRequest { .. } => {
                (NAME_TUS_COMMON_AREA_SETTINGS, TYPE_REQUEST)
            }
            Packet::TusCommonAreaSettingsResponse { .. } => {
                (NAME_TUS_COMMON_AREA_SETTINGS, TYPE_RESPONSE)
            }
            Packet::TusCommonAreaAddRequest { .. } => (NAME_TUS_COMMON_AREA_ADD, TYPE_REQUEST),
            Packet::TusCommonAreaAddResponse { .. } => (NAME_TUS_COMMON_AREA_ADD, TYPE_RESPONSE),
            Packet::TusUserAreaWriteRequestHeader { .. } => {
                (NAME_TUS_USER_AREA_WRITE_HEADER, TYPE_REQUEST)
            }
            Packet::TusUserAreaWriteRequestData(_) => {
                (NAME_TUS_USER_AREA_WRITE_DATA, TYPE_REQUEST)
            }
            Packet::TusUserAreaWriteRequestFooter => {
                (NAME_TUS_USER_AREA_WRITE_FOOTER, TYPE_REQUEST)
            }
            Packet::TusUserAreaWriteResponseHeader { .. } => {
                (NAME_TUS_USER_AREA_WRITE_HEADER, TYPE_RESPONSE)
            }
            Packet::TusUserAreaWriteResponseData(_) => {
                (NAME_TUS_USER_AREA_WRITE_DATA, TYPE_RESPONSE)
            }
            Packet::TusUserAreaWriteResponseFooter => {
                (NAME_TUS_USER_AREA_WRITE_FOOTER, TYPE_RESPONSE)
            }
            Packet::TusUserAreaReadRequestHeader { .. } => {
                (NAME_TUS_USER_AREA_READ_HEADER, TYPE_REQUEST)
            }
            Packet::TusUserAreaReadRequestData(_) => (NAME_TUS_USER_AREA_READ_DATA, TYPE_REQUEST),
            Packet::TusUserAreaReadRequestFooter => {
                (NAME_TUS_USER_AREA_READ_FOOTER, TYPE_REQUEST)
            }
            Packet::TusUserAreaReadResponseHeader { .. } => {
                (NAME_TUS_USER_AREA_READ_HEADER, TYPE_RESPONSE)
            }
            Packet::TusUserAreaReadResponseData(_) => {
                (NAME_TUS_USER_AREA_READ_DATA, TYPE_RESPONSE)
            }
            Packet::TusUserAreaReadResponseFooter => {
                (NAME_TUS_USER_AREA_READ_FOOTER, TYPE_RESPONSE)
            }
            Packet::DisconnectionNotification { .. } => (NAME_DISCONNECTION, TYPE_NOTIFICATION),
            Packet::ReconnectionNotification { .. } => (NAME_RECONNECTION, TYPE_NOTIFICATION),
            Packet::ConnectionSummaryNotification { .. } => {
                (NAME_CONNECTION_SUMMARY, TYPE_NOTIFICATION)
            }
        };

        PacketType {
            name_id,
            type_id,
            error_id: ERROR_NONE,
        }
    }

    pub fn is_response(&self) -> bool {
        self.packet_type().type_id == TYPE_RESPONSE
    }

    pub fn name(&self) -> &'static str {
        match self {
            Packet::OnlineCheckRequest => "onlineCheckRequest",
            Packet::OnlineCheckResponse => "onlineCheckResponse",
            Packet::DisconnectionRequest { .. } => "disconnectionRequest",
            Packet::DisconnectionResponse { .. } => "disconnectionResponse",
            Packet::FastDataRequest => "fastDataRequest",
            Packet::FastDataResponse { .. } => "fastDataResponse",
            Packet::AuthInfoRequestHeader { .. } => "authenticationInformationRequestHeader",
            Packet::AuthInfoRequestData(_) => "authenticationInformationRequestData",
            Packet::AuthInfoRequestFooter => "authenticationInformationRequestFooter",
            Packet::AuthInfoResponseHeader { .. } => "authenticationInformationResponseHeader",
            Packet::AuthInfoResponseData(_) => "authenticationInformationResponseData",
            Packet::AuthInfoResponseFooter { .. } => "authenticationInformationResponseFooter",
            Packet::TusCommonAreaAcquisitionRequest { .. } => "tusCommonAreaAcquisitionRequest",
            Packet::TusCommonAreaAcquisitionResponse { .. } => "tusCommonAreaAcquisitionResponse",
            Packet::TusCommonAreaSettingsRequest { .. } => "tusCommonAreaSettingsRequest",
            Packet::TusCommonAreaSettingsResponse { .. } => "tusCommonAreaSettingsResponse",
            Packet::TusCommonAreaAddRequest { .. } => "tusCommonAreaAddRequest",
            Packet::TusCommonAreaAddResponse { .. } => "tusCommonAreaAddResponse",
            Packet::TusUserAreaWriteRequestHeader { .. } => "tusUserAreaWriteRequestHeader",
            Packet::TusUserAreaWriteRequestData(_) => "tusUserAreaWriteRequestData",
            Packet::TusUserAreaWriteRequestFooter => "tusUserAreaWriteRequestFooter",
            Packet::TusUserAreaWriteResponseHeader { .. } => "tusUserAreaWriteResponseHeader",
            Packet::TusUserAreaWriteResponseData(_) => "tusUserAreaWriteResponseData",
            Packet::TusUserAreaWriteResponseFooter => "tusUserAreaWriteResponseFooter",
            Packet::TusUserAreaReadRequestHeader { .. } => "tusUserAreaReadRequestHeader",
            Packet::TusUserAreaReadRequestData(_) => "tusUserAreaReadRequestData",
            Packet::TusUserAreaReadRequestFooter => "tusUserAreaReadRequestFooter",
            Packet::TusUserAreaReadResponseHeader { .. } => "tusUserAreaReadResponseHeader",
            Packet::TusUserAreaReadResponseData(_) => "tusUserAreaReadResponseData",
            Packet::TusUserAreaReadResponseFooter => "tusUserAreaReadResponseFooter",
            Packet::DisconnectionNotification { .. } => "disconnectionNotification",
            Packet::ReconnectionNotification { .. } => "reconnectionNotification",
            Packet::ConnectionSummaryNotification { .. } => "connectionSummaryNotification",
        }
    }

    pub fn encode_payload(&self) -> Result<Vec<u8>, ProtocolError> {
        let mut writer = PacketWriter::new();
        match self {
            Packet::OnlineCheckRequest
            | Packet::OnlineCheckResponse
            | Packet::FastDataRequest
            | Packet::AuthInfoRequestFooter
            | Packet::TusUserAreaWriteRequestFooter
            | Packet::TusUserAreaWriteResponseFooter
            | Packet::TusUserAreaReadRequestFooter
            | Packet::TusUserAreaReadResponseFooter => {}
            Packet::DisconnectionRequest { value }
            | Packet::DisconnectionResponse { value }
            | Packet::AuthInfoResponseFooter { value } => {
                writer.write_u8(u8::from(*value));
            }
            Packet::FastDataResponse {
                unknown1,
                unknown2,
                user,
            } => {
                writer.write_u8(*unknown1);
                writer.write_u32_be(*unknown2);
                writer.write_dynamic_string(user)?;
            }
            Packet::AuthInfoRequestHeader {
                unknown,
                data_length,
            } => {
                writer.write_u8(*unknown);
                writer.write_u32_be(*data_length);
            }
            Packet::AuthInfoResponseHeader { chunk_length }
            | Packet::TusUserAreaWriteResponseHeader { chunk_length } => {
                writer.write_u16_be(*chunk_length);
            }
            Packet::AuthInfoRequestData(chunk)
            | Packet::TusUserAreaWriteRequestData(chunk)
            | Packet::TusUserAreaReadResponseData(chunk) => {
                encode_data_chunk(&mut writer, chunk)?;
            }
            Packet::AuthInfoResponseData(chunk_ref)
            | Packet::TusUserAreaWriteResponseData(chunk_ref)
            | Packet::TusUserAreaReadRequestData(chunk_ref) => {
                writer.write_u32_be(chunk_ref.offset);
                writer.write_u16_be(chunk_ref.length);
            }
            Packet::TusCommonAreaAcquisitionRequest { property_indices } => {
                if property_indices.len() > u8::MAX as usize {
                    return Err(payload_error(property_indices.len(), u8::MAX as usize));
                }
                writer.write_u8(property_indices.len() as u8);
                writer.write_bytes(property_indices);
            }
            Packet::TusCommonAreaAcquisitionResponse { properties }
            | Packet::TusCommonAreaSettingsRequest { properties }
            | Packet::TusCommonAreaSettingsResponse { properties }
            | Packet::TusCommonAreaAddRequest { properties }
            | Packet::TusCommonAreaAddResponse { properties } => {
                encode_properties(&mut writer, properties)?;
            }
            Packet::TusUserAreaWriteRequestHeader { data_length, user } => {
                writer.write_u32_be(*data_length);
                writer.write_dynamic_string(user)?;
            }
            Packet::TusUserAreaReadRequestHeader { user } => {
                writer.write_dynamic_string(user)?;
            }
            Packet::TusUserAreaReadResponseHeader { data_length } => {
                writer.write_u32_be(*data_length);
            }
            Packet::DisconnectionNotification {
                unknown,
                notification,
            } => {
                writer.write_u8(*unknown);
                writer.write_dynamic_string(notification)?;
            }
            Packet::ReconnectionNotification { host, port } => {
                writer.write_dynamic_string(host)?;
                writer.write_u16_be(*port);
            }
            Packet::ConnectionSummaryNotification { success, unknown } => {
                writer.write_u8(u8::from(*success));
                writer.write_u16_be(*unknown);
            }
        }

        Ok(writer.into_vec())
    }

    /// Turns a received header and payload back into a packet. The registry
    /// is total over the name/type table; anything else is an unknown packet.
    pub fn decode(header: &PacketHeader, payload: &[u8]) -> Result<Packet, ProtocolError> {
        let name_id = header.packet_type.name_id;
        match header.packet_type.type_id {
            TYPE_REQUEST => match name_id {
                NAME_ONLINE_CHECK => decode_empty(payload, Packet::OnlineCheckRequest),
                NAME_DISCONNECTION => {
                    Ok(Packet::DisconnectionRequest { value: decode_boolean(payload)? })
                }
                NAME_FAST_DATA => decode_empty(payload, Packet::FastDataRequest),
                NAME_AUTH_INFO_HEADER => {
                    const REQUIRED: usize = 5;
                    if payload.len() != REQUIRED {
                        return Err(payload_error(payload.len(), REQUIRED));
                    }
                    Ok(Packet::AuthInfoRequestHeader {
                        unknown: payload[0],
                        data_length: u32::from_be_bytes([
                            payload[1], payload[2], payload[3], payload[4],
                        ]),
                    })
                }
                NAME_AUTH_INFO_DATA => Ok(Packet::AuthInfoRequestData(decode_data_chunk(payload)?)),
                NAME_AUTH_INFO_FOOTER => decode_empty(payload, Packet::AuthInfoRequestFooter),
                NAME_TUS_COMMON_AREA_ACQUISITION => {
                    const MIN: usize = 1;
                    if payload.is_empty() {
                        return Err(payload_error(payload.len(), MIN));
                    }
                    let count = payload[0] as usize;
                    if payload.len() < MIN + count {
                        return Err(payload_error(payload.len(), MIN + count));
                    }
                    Ok(Packet::TusCommonAreaAcquisitionRequest {
                        property_indices: payload[1..1 + count].to_vec(),
                    })
                }
                NAME_TUS_COMMON_AREA_SETTINGS => Ok(Packet::TusCommonAreaSettingsRequest {
                    properties: decode_properties(payload)?,
                }),
                NAME_TUS_COMMON_AREA_ADD => Ok(Packet::TusCommonAreaAddRequest {
                    properties: decode_properties(payload)?,
                }),
                NAME_TUS_USER_AREA_WRITE_HEADER => {
                    const MIN: usize = 6;
                    if payload.len() < MIN {
                        return Err(payload_error(payload.len(), MIN));
                    }
                    let mut reader = PacketReader::new(payload);
                    let data_length = reader
                        .read_u32_be()
                        .ok_or_else(|| payload_error(payload.len(), MIN))?;
                    let user = reader
                        .read_dynamic_string()
                        .ok_or_else(|| payload_error(payload.len(), MIN))?;
                    Ok(Packet::TusUserAreaWriteRequestHeader { data_length, user })
                }
                NAME_TUS_USER_AREA_WRITE_DATA => {
                    Ok(Packet::TusUserAreaWriteRequestData(decode_data_chunk(payload)?))
                }
                NAME_TUS_USER_AREA_WRITE_FOOTER => {
                    decode_empty(payload, Packet::TusUserAreaWriteRequestFooter)
                }
                NAME_TUS_USER_AREA_READ_HEADER => {
                    const MIN: usize = 2;
                    let mut reader = PacketReader::new(payload);
                    let user = reader
                        .read_dynamic_string()
                        .ok_or_else(|| payload_error(payload.len(), MIN))?;
                    Ok(Packet::TusUserAreaReadRequestHeader { user })
                }
                NAME_TUS_USER_AREA_READ_DATA => {
                    Ok(Packet::TusUserAreaReadRequestData(decode_data_chunk_ref(payload)?))
                }
                NAME_TUS_USER_AREA_READ_FOOTER => {
                    decode_empty(payload, Packet::TusUserAreaReadRequestFooter)
                }
                _ => Err(unknown_packet(header)),
            },
            TYPE_RESPONSE => match name_id {
                NAME_ONLINE_CHECK => decode_empty(payload, Packet::OnlineCheckResponse),
                NAME_DISCONNECTION => {
                    Ok(Packet::DisconnectionResponse { value: decode_boolean(payload)? })
                }
                NAME_FAST_DATA => {
                    const MIN: usize = 7;
                    if payload.len() < MIN {
                        return Err(payload_error(payload.len(), MIN));
                    }
                    let mut reader = PacketReader::new(payload);
                    let unknown1 = reader
                        .read_u8()
                        .ok_or_else(|| payload_error(payload.len(), MIN))?;
                    let unknown2 = reader
                        .read_u32_be()
                        .ok_or_else(|| payload_error(payload.len(), MIN))?;
                    let user = reader
                        .read_dynamic_string()
                        .ok_or_else(|| payload_error(payload.len(), MIN))?;
                    Ok(Packet::FastDataResponse {
                        unknown1,
                        unknown2,
                        user,
                    })
                }
                NAME_AUTH_INFO_HEADER => Ok(Packet::AuthInfoResponseHeader {
                    chunk_length: decode_u16_payload(payload)?,
                }),
                NAME_AUTH_INFO_DATA => {
                    Ok(Packet::AuthInfoResponseData(decode_data_chunk_ref(payload)?))
                }
                NAME_AUTH_INFO_FOOTER => {
                    Ok(Packet::AuthInfoResponseFooter { value: decode_boolean(payload)? })
                }
                NAME_TUS_COMMON_AREA_ACQUISITION => Ok(Packet::TusCommonAreaAcquisitionResponse {
                    properties: decode_properties(payload)?,
                }),
                NAME_TUS_COMMON_AREA_SETTINGS => Ok(Packet::TusCommonAreaSettingsResponse {
                    properties: decode_properties(payload)?,
                }),
                NAME_TUS_COMMON_AREA_ADD => Ok(Packet::TusCommonAreaAddResponse {
                    properties: decode_properties(payload)?,
                }),
                NAME_TUS_USER_AREA_WRITE_HEADER => Ok(Packet::TusUserAreaWriteResponseHeader {
                    chunk_length: decode_u16_payload(payload)?,
                }),
                NAME_TUS_USER_AREA_WRITE_DATA => {
                    Ok(Packet::TusUserAreaWriteResponseData(decode_data_chunk_ref(payload)?))
                }
                NAME_TUS_USER_AREA_WRITE_FOOTER => {
                    decode_empty(payload, Packet::TusUserAreaWriteResponseFooter)
                }
                NAME_TUS_USER_AREA_READ_HEADER => {
                    const REQUIRED: usize = 4;
                    if payload.len() != REQUIRED {
                        return Err(payload_error(payload.len(), REQUIRED));
                    }
                    Ok(Packet::TusUserAreaReadResponseHeader {
                        data_length: u32::from_be_bytes([
                            payload[0], payload[1], payload[2], payload[3],
                        ]),
                    })
                }
                NAME_TUS_USER_AREA_READ_DATA => {
                    Ok(Packet::TusUserAreaReadResponseData(decode_data_chunk(payload)?))
                }
                NAME_TUS_USER_AREA_READ_FOOTER => {
                    decode_empty(payload, Packet::TusUserAreaReadResponseFooter)
                }
                _ => Err(unknown_packet(header)),
            },
            TYPE_NOTIFICATION => match name_id {
                NAME_DISCONNECTION => {
                    const MIN: usize = 3;
                    if payload.len() < MIN {
                        return Err(payload_error(payload.len(), MIN));
                    }
                    let mut reader = PacketReader::new(payload);
                    let unknown = reader
                        .read_u8()
                        .ok_or_else(|| payload_error(payload.len(), MIN))?;
                    let notification = reader
                        .read_dynamic_string()
                        .ok_or_else(|| payload_error(payload.len(), MIN))?;
                    Ok(Packet::DisconnectionNotification {
                        unknown,
                        notification,
                    })
                }
                NAME_RECONNECTION => {
                    const MIN: usize = 4;
                    if payload.len() < MIN {
                        return Err(payload_error(payload.len(), MIN));
                    }
                    let mut reader = PacketReader::new(payload);
                    let host = reader
                        .read_dynamic_string()
                        .ok_or_else(|| payload_error(payload.len(), MIN))?;
                    let port = reader
                        .read_u16_be()
                        .ok_or_else(|| payload_error(payload.len(), reader.consumed() + 2))?;
                    Ok(Packet::ReconnectionNotification { host, port })
                }
                NAME_CONNECTION_SUMMARY => {
                    const REQUIRED: usize = 3;
                    if payload.len() != REQUIRED {
                        return Err(payload_error(payload.len(), REQUIRED));
                    }
                    Ok(Packet::ConnectionSummaryNotification {
                        success: payload[0] > 0,
                        unknown: u16::from_be_bytes([payload[1], payload[2]]),
                    })
                }
                _ => Err(unknown_packet(header)),
            },
            _ => Err(unknown_packet(header)),
        }
    }
}

pub(crate) fn payload_error(actual: usize, expected: usize) -> ProtocolError {
    ProtocolError::InvalidPayloadSize { actual, expected }
}

fn unknown_packet(header: &PacketHeader) -> ProtocolError {
    ProtocolError::UnknownPacket {
        type_id: header.packet_type.type_id,
        name_id: header.packet_type.name_id,
    }
}

fn decode_empty(payload: &[u8], packet: Packet) -> Result<Packet, ProtocolError> {
    if !payload.is_empty() {
        return Err(payload_error(payload.len(), 0));
    }
    Ok(packet)
}

fn decode_boolean(payload: &[u8]) -> Result<bool, ProtocolError> {
    if payload.len() != 1 {
        return Err(payload_error(payload.len(), 1));
    }
    Ok(payload[0] > 0)
}

fn decode_u16_payload(payload: &[u8]) -> Result<u16, ProtocolError> {
    if payload.len() != 2 {
        return Err(payload_error(payload.len(), 2));
    }
    Ok(u16::from_be_bytes([payload[0], payload[1]]))
}

fn encode_data_chunk(writer: &mut PacketWriter, chunk: &DataChunk) -> Result<(), ProtocolError> {
    writer.write_u32_be(chunk.offset);
    writer.write_u16_be(chunk.data.len() as u16);
    writer.write_dynamic(&chunk.data)
}

fn decode_data_chunk(payload: &[u8]) -> Result<DataChunk, ProtocolError> {
    const MIN: usize = 8;
    if payload.len() < MIN {
        return Err(payload_error(payload.len(), MIN));
    }
    let mut reader = PacketReader::new(payload);
    let offset = reader
        .read_u32_be()
        .ok_or_else(|| payload_error(payload.len(), MIN))?;
    // the fixed-width length duplicates the dynamic prefix; the prefix wins
    reader
        .skip(2)
        .ok_or_else(|| payload_error(payload.len(), MIN))?;
    let data = reader
        .read_dynamic()
        .ok_or_else(|| payload_error(payload.len(), MIN))?
        .to_vec();
    Ok(DataChunk { offset, data })
}

fn decode_data_chunk_ref(payload: &[u8]) -> Result<DataChunkRef, ProtocolError> {
    const REQUIRED: usize = 6;
    if payload.len() != REQUIRED {
        return Err(payload_error(payload.len(), REQUIRED));
    }
    Ok(DataChunkRef {
        offset: u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]),
        length: u16::from_be_bytes([payload[4], payload[5]]),
    })
}

fn encode_properties(
    writer: &mut PacketWriter,
    properties: &[Property],
) -> Result<(), ProtocolError> {
    if properties.len() > u8::MAX as usize {
        return Err(payload_error(properties.len(), u8::MAX as usize));
    }
    writer.write_u8(properties.len() as u8);
    for prop in properties {
        writer.write_u8(prop.index);
        writer.write_u32_be(prop.value1);
        writer.write_u32_be(prop.value2);
    }
    Ok(())
}

fn decode_properties(payload: &[u8]) -> Result<Vec<Property>, ProtocolError> {
    const MIN: usize = 1;
    if payload.is_empty() {
        return Err(payload_error(payload.len(), MIN));
    }

    let count = payload[0] as usize;
    let required = MIN + count * PROPERTY_SIZE;
    if payload.len() < required {
        return Err(payload_error(payload.len(), required));
    }

    let mut reader = PacketReader::new(&payload[1..]);
    let mut properties = Vec::with_capacity(count);
    for _ in 0..count {
        let index = reader
            .read_u8()
            .ok_or_else(|| payload_error(payload.len(), required))?;
        let value1 = reader
            .read_u32_be()
            .ok_or_else(|| payload_error(payload.len(), required))?;
        let value2 = reader
            .read_u32_be()
            .ok_or_else(|| payload_error(payload.len(), required))?;
        properties.push(Property {
            index,
            value1,
            value2,
        });
    }

    Ok(properties)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lcg_next(state: &mut u64) -> u32 {
        *state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
        (*state >> 32) as u32
    }

    fn roundtrip(packet: &Packet) -> Packet {
        let payload = packet.encode_payload().expect("encode");
        let header = PacketHeader {
            length: payload.len() as u16,
            sequence_id: 0,
            packet_type: packet.packet_type(),
        };
        Packet::decode(&header, &payload).expect("decode")
    }

    #[test]
    fn header_roundtrip() {
        let header = PacketHeader {
            length: 0x1234,
            sequence_id: 0xABCD,
            packet_type: PacketType {
                name_id: NAME_FAST_DATA,
                type_id: TYPE_RESPONSE,
                error_id: ERROR_NONE,
            },
        };
        assert_eq!(PacketHeader::decode(&header.encode()), header);
    }

    #[test]
    fn empty_packets_roundtrip() {
        for packet in [
            Packet::OnlineCheckRequest,
            Packet::OnlineCheckResponse,
            Packet::FastDataRequest,
            Packet::AuthInfoRequestFooter,
            Packet::TusUserAreaWriteRequestFooter,
            Packet::TusUserAreaWriteResponseFooter,
            Packet::TusUserAreaReadRequestFooter,
            Packet::TusUserAreaReadResponseFooter,
        ] {
            assert_eq!(roundtrip(&packet), packet);
        }
    }

    #[test]
    fn boolean_packets_roundtrip() {
        for value in [false, true] {
            for packet in [
                Packet::DisconnectionRequest { value },
                Packet::DisconnectionResponse { value },
                Packet::AuthInfoResponseFooter { value },
            ] {
                assert_eq!(roundtrip(&packet), packet);
            }
        }
    }

    #[test]
    fn fast_data_response_roundtrip() {
        let packet = Packet::FastDataResponse {
            unknown1: 0x03,
            unknown2: 0x01,
            user: "132456".to_string(),
        };
        assert_eq!(roundtrip(&packet), packet);
    }

    #[test]
    fn auth_info_headers_roundtrip() {
        let request = Packet::AuthInfoRequestHeader {
            unknown: 0x02,
            data_length: 1024,
        };
        assert_eq!(roundtrip(&request), request);

        let response = Packet::AuthInfoResponseHeader { chunk_length: 512 };
        assert_eq!(roundtrip(&response), response);
    }

    #[test]
    fn data_chunk_roundtrip() {
        let mut state = 0x0dd0_57a7_e000_0001u64;
        for _ in 0..32 {
            let len = (lcg_next(&mut state) % 1024) as usize;
            let mut data = Vec::with_capacity(len);
            for _ in 0..len {
                data.push((lcg_next(&mut state) & 0xff) as u8);
            }
            let packet = Packet::TusUserAreaReadResponseData(DataChunk {
                offset: lcg_next(&mut state),
                data,
            });
            assert_eq!(roundtrip(&packet), packet);
        }
    }

    #[test]
    fn data_chunk_decode_prefers_dynamic_length() {
        // fixed length field disagrees with the dynamic prefix on purpose
        let payload = [
            0, 0, 0, 10, // offset
            0, 99, // stale fixed length
            0, 3, // dynamic prefix
            1, 2, 3,
        ];
        let header = PacketHeader {
            length: payload.len() as u16,
            sequence_id: 0,
            packet_type: PacketType {
                name_id: NAME_TUS_USER_AREA_WRITE_DATA,
                type_id: TYPE_REQUEST,
                error_id: ERROR_NONE,
            },
        };
        let packet = Packet::decode(&header, &payload).expect("decode");
        assert_eq!(
            packet,
            Packet::TusUserAreaWriteRequestData(DataChunk {
                offset: 10,
                data: vec![1, 2, 3],
            })
        );
    }

    #[test]
    fn data_chunk_ref_roundtrip() {
        let packet = Packet::TusUserAreaReadRequestData(DataChunkRef {
            offset: 10,
            length: 20,
        });
        assert_eq!(roundtrip(&packet), packet);
    }

    #[test]
    fn property_packets_roundtrip() {
        let properties = vec![
            Property { index: 0, value1: 1, value2: 2 },
            Property { index: 1, value1: 3, value2: 4 },
            Property { index: 42, value1: 0xFFFF_FFFF, value2: 0 },
        ];
        for packet in [
            Packet::TusCommonAreaAcquisitionResponse { properties: properties.clone() },
            Packet::TusCommonAreaSettingsRequest { properties: properties.clone() },
            Packet::TusCommonAreaSettingsResponse { properties: properties.clone() },
            Packet::TusCommonAreaAddRequest { properties: properties.clone() },
            Packet::TusCommonAreaAddResponse { properties: properties.clone() },
        ] {
            assert_eq!(roundtrip(&packet), packet);
        }
    }

    #[test]
    fn property_decode_rejects_short_payload() {
        let payload = [2u8, 0, 0, 0, 0, 0, 0, 0, 0, 0]; // claims 2, carries 1
        let header = PacketHeader {
            length: payload.len() as u16,
            sequence_id: 0,
            packet_type: PacketType {
                name_id: NAME_TUS_COMMON_AREA_SETTINGS,
                type_id: TYPE_REQUEST,
                error_id: ERROR_NONE,
            },
        };
        match Packet::decode(&header, &payload) {
            Err(ProtocolError::InvalidPayloadSize { actual, expected }) => {
                assert_eq!(actual, 10);
                assert_eq!(expected, 19);
            }
            other => panic!("expected payload size error, got {:?}", other),
        }
    }

    #[test]
    fn acquisition_request_roundtrip() {
        let packet = Packet::TusCommonAreaAcquisitionRequest {
            property_indices: vec![1, 2, 3],
        };
        assert_eq!(roundtrip(&packet), packet);
    }

    #[test]
    fn user_area_headers_roundtrip() {
        let write = Packet::TusUserAreaWriteRequestHeader {
            data_length: 1024,
            user: "ABCDEFGH".to_string(),
        };
        assert_eq!(roundtrip(&write), write);

        let read = Packet::TusUserAreaReadRequestHeader {
            user: "ABCDEFGH".to_string(),
        };
        assert_eq!(roundtrip(&read), read);

        let write_resp = Packet::TusUserAreaWriteResponseHeader { chunk_length: 64 };
        assert_eq!(roundtrip(&write_resp), write_resp);

        let read_resp = Packet::TusUserAreaReadResponseHeader { data_length: 256 };
        assert_eq!(roundtrip(&read_resp), read_resp);
    }

    #[test]
    fn notifications_roundtrip() {
        for packet in [
            Packet::DisconnectionNotification {
                unknown: 0xAA,
                notification: "TestNotification".to_string(),
            },
            Packet::ReconnectionNotification {
                host: "localhost".to_string(),
                port: 11111,
            },
            Packet::ConnectionSummaryNotification {
                success: true,
                unknown: 10,
            },
        ] {
            assert_eq!(roundtrip(&packet), packet);
        }
    }

    #[test]
    fn unknown_name_fails_decode() {
        let header = PacketHeader {
            length: 0,
            sequence_id: 0,
            packet_type: PacketType {
                name_id: 0x9999,
                type_id: TYPE_REQUEST,
                error_id: ERROR_NONE,
            },
        };
        match Packet::decode(&header, &[]) {
            Err(ProtocolError::UnknownPacket { type_id, name_id }) => {
                assert_eq!(type_id, TYPE_REQUEST);
                assert_eq!(name_id, 0x9999);
            }
            other => panic!("expected unknown packet error, got {:?}", other),
        }
    }

    #[test]
    fn notification_names_are_not_requests() {
        let header = PacketHeader {
            length: 3,
            sequence_id: 0,
            packet_type: PacketType {
                name_id: NAME_CONNECTION_SUMMARY,
                type_id: TYPE_REQUEST,
                error_id: ERROR_NONE,
            },
        };
        assert!(matches!(
            Packet::decode(&header, &[0, 0, 0]),
            Err(ProtocolError::UnknownPacket { .. })
        ));
    }
}
