use std::io::{Read, Write};
use std::net::TcpStream;

use native_tls::{TlsConnector, TlsStream};

use crate::game::dragon::{all_property_indices, OnlineUrDragon, Property};
use crate::game::pawn::PawnRewards;
use crate::net::connection::{unexpected, Connection, Endpoint};
use crate::net::packet::{DataChunk, DataChunkRef, Packet};
use crate::net::userarea::{
    pawn_rewards_to_user_area, read_user_area, user_area_to_pawn_rewards, write_user_area,
};
use crate::net::ProtocolError;

const READ_CHUNK_LENGTH: usize = 1024;

/// The initiator side of the protocol over any byte stream. The JSON API
/// and the test harnesses both drive the server through this.
pub struct ClientSession<S> {
    conn: Connection<S>,
}

impl<S: Read + Write> ClientSession<S> {
    pub fn new(stream: S) -> Self {
        Self {
            conn: Connection::new(stream, 0, Endpoint::Client),
        }
    }

    /// Runs the five-exchange handshake as the connecting client: answer
    /// the server's FastData probe with the user identifier, then walk the
    /// auth-info header/data/footer exchange with the opaque token.
    pub fn authenticate(&mut self, user: &str, token: &[u8]) -> Result<(), ProtocolError> {
        let packet = self.conn.recv()?;
        if !matches!(packet, Packet::FastDataRequest) {
            return Err(unexpected("fastDataRequest", &packet));
        }
        self.conn.user = user.to_string();
        self.conn.send(&Packet::FastDataResponse {
            unknown1: 0x03,
            unknown2: 0x01,
            user: user.to_string(),
        })?;

        let packet = self.conn.recv()?;
        if !matches!(packet, Packet::ConnectionSummaryNotification { .. }) {
            return Err(unexpected("connectionSummaryNotification", &packet));
        }

        self.conn.send(&Packet::AuthInfoRequestHeader {
            unknown: 0x02,
            data_length: token.len() as u32,
        })?;
        let packet = self.conn.recv()?;
        if !matches!(packet, Packet::AuthInfoResponseHeader { .. }) {
            return Err(unexpected("authenticationInformationResponseHeader", &packet));
        }

        self.conn.send(&Packet::AuthInfoRequestData(DataChunk {
            offset: 0,
            data: token.to_vec(),
        }))?;
        let packet = self.conn.recv()?;
        if !matches!(packet, Packet::AuthInfoResponseData(_)) {
            return Err(unexpected("authenticationInformationResponseData", &packet));
        }

        self.conn.send(&Packet::AuthInfoRequestFooter)?;
        let packet = self.conn.recv()?;
        if !matches!(packet, Packet::AuthInfoResponseFooter { .. }) {
            return Err(unexpected("authenticationInformationResponseFooter", &packet));
        }

        Ok(())
    }

    pub fn acquire_properties(&mut self, indices: &[u8]) -> Result<Vec<Property>, ProtocolError> {
        self.conn.send(&Packet::TusCommonAreaAcquisitionRequest {
            property_indices: indices.to_vec(),
        })?;
        match self.conn.recv()? {
            Packet::TusCommonAreaAcquisitionResponse { properties } => Ok(properties),
            other => Err(unexpected("tusCommonAreaAcquisitionResponse", &other)),
        }
    }

    pub fn add_properties(&mut self, properties: &[Property]) -> Result<Vec<Property>, ProtocolError> {
        self.conn.send(&Packet::TusCommonAreaAddRequest {
            properties: properties.to_vec(),
        })?;
        match self.conn.recv()? {
            Packet::TusCommonAreaAddResponse { properties } => Ok(properties),
            other => Err(unexpected("tusCommonAreaAddResponse", &other)),
        }
    }

    pub fn set_properties(&mut self, properties: &[Property]) -> Result<Vec<Property>, ProtocolError> {
        self.conn.send(&Packet::TusCommonAreaSettingsRequest {
            properties: properties.to_vec(),
        })?;
        match self.conn.recv()? {
            Packet::TusCommonAreaSettingsResponse { properties } => Ok(properties),
            other => Err(unexpected("tusCommonAreaSettingsResponse", &other)),
        }
    }

    /// Acquires all indices and folds them back into a dragon value.
    pub fn fetch_dragon(&mut self) -> Result<OnlineUrDragon, ProtocolError> {
        let properties = self.acquire_properties(&all_property_indices())?;
        let mut dragon = OnlineUrDragon::default();
        dragon.set_properties(&properties)?;
        Ok(dragon)
    }

    /// Downloads and decodes a player's reward inbox through the chunked
    /// read flow.
    pub fn read_pawn_rewards(&mut self, user_id: u64) -> Result<PawnRewards, ProtocolError> {
        self.conn.send(&Packet::TusUserAreaReadRequestHeader {
            user: format!("{:x}", user_id),
        })?;
        let data_length = match self.conn.recv()? {
            Packet::TusUserAreaReadResponseHeader { data_length } => data_length as usize,
            other => return Err(unexpected("tusUserAreaReadResponseHeader", &other)),
        };

        let mut blob = vec![0u8; data_length];
        let mut offset = 0;
        while offset < blob.len() {
            let length = (blob.len() - offset).min(READ_CHUNK_LENGTH);
            self.conn.send(&Packet::TusUserAreaReadRequestData(DataChunkRef {
                offset: offset as u32,
                length: length as u16,
            }))?;
            let chunk = match self.conn.recv()? {
                Packet::TusUserAreaReadResponseData(chunk) => chunk,
                other => return Err(unexpected("tusUserAreaReadResponseData", &other)),
            };
            let start = chunk.offset as usize;
            let end = start + chunk.data.len();
            if chunk.data.len() != length || end > blob.len() {
                return Err(ProtocolError::InvalidBlob("read chunk out of bounds".to_string()));
            }
            blob[start..end].copy_from_slice(&chunk.data);
            offset += length;
        }

        self.conn.send(&Packet::TusUserAreaReadRequestFooter)?;
        match self.conn.recv()? {
            Packet::TusUserAreaReadResponseFooter => {}
            other => return Err(unexpected("tusUserAreaReadResponseFooter", &other)),
        }

        match read_user_area(&blob)? {
            Some(area) => Ok(user_area_to_pawn_rewards(user_id, &area)),
            None => Ok(PawnRewards::new(user_id)),
        }
    }

    /// Encodes and uploads a player's reward inbox through the chunked
    /// write flow, honoring the chunk length the server announces.
    pub fn write_pawn_rewards(&mut self, rewards: &PawnRewards) -> Result<(), ProtocolError> {
        let blob = write_user_area(&pawn_rewards_to_user_area(rewards))?;

        self.conn.send(&Packet::TusUserAreaWriteRequestHeader {
            data_length: blob.len() as u32,
            user: format!("{:x}", rewards.pawn_user_id),
        })?;
        let chunk_length = match self.conn.recv()? {
            Packet::TusUserAreaWriteResponseHeader { chunk_length } => chunk_length as usize,
            other => return Err(unexpected("tusUserAreaWriteResponseHeader", &other)),
        };
        if chunk_length == 0 {
            return Err(ProtocolError::InvalidBlob("zero chunk length".to_string()));
        }

        let mut offset = 0;
        for chunk in blob.chunks(chunk_length) {
            self.conn.send(&Packet::TusUserAreaWriteRequestData(DataChunk {
                offset: offset as u32,
                data: chunk.to_vec(),
            }))?;
            match self.conn.recv()? {
                Packet::TusUserAreaWriteResponseData(_) => {}
                other => return Err(unexpected("tusUserAreaWriteResponseData", &other)),
            }
            offset += chunk.len();
        }

        self.conn.send(&Packet::TusUserAreaWriteRequestFooter)?;
        match self.conn.recv()? {
            Packet::TusUserAreaWriteResponseFooter => Ok(()),
            other => Err(unexpected("tusUserAreaWriteResponseFooter", &other)),
        }
    }

    pub fn disconnect(&mut self) -> Result<(), ProtocolError> {
        self.conn.send(&Packet::DisconnectionRequest { value: true })?;
        match self.conn.recv()? {
            Packet::DisconnectionResponse { .. } => Ok(()),
            other => Err(unexpected("disconnectionResponse", &other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub user_token: Vec<u8>,
}

/// TLS client for a running server instance. The legacy certificate chain
/// is long dead, so peer verification stays off.
pub struct Client {
    config: ClientConfig,
    session: Option<ClientSession<TlsStream<TcpStream>>>,
}

impl Client {
    pub fn new(config: ClientConfig) -> Client {
        Client {
            config,
            session: None,
        }
    }

    pub fn connect(&mut self) -> Result<(), ProtocolError> {
        if self.session.is_some() {
            return Ok(());
        }

        let stream = TcpStream::connect((self.config.host.as_str(), self.config.port))?;
        let connector = TlsConnector::builder()
            .danger_accept_invalid_certs(true)
            .danger_accept_invalid_hostnames(true)
            .build()
            .map_err(|err| ProtocolError::TlsHandshake(err.to_string()))?;
        let stream = connector
            .connect(&self.config.host, stream)
            .map_err(|err| ProtocolError::TlsHandshake(err.to_string()))?;

        let mut session = ClientSession::new(stream);
        session.authenticate(&self.config.user, &self.config.user_token)?;
        self.session = Some(session);

        Ok(())
    }

    pub fn fetch_dragon(&mut self) -> Result<OnlineUrDragon, ProtocolError> {
        match self.session.as_mut() {
            Some(session) => session.fetch_dragon(),
            None => Err(ProtocolError::Io(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "not connected",
            ))),
        }
    }

    pub fn disconnect(&mut self) -> Result<(), ProtocolError> {
        if let Some(mut session) = self.session.take() {
            session.disconnect()?;
        }
        Ok(())
    }
}
