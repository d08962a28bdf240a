use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{Shutdown, TcpListener, TcpStream};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use native_tls::{Identity, Protocol, TlsAcceptor};

use crate::game::pawn::PawnRewards;
use crate::net::connection::{unexpected, Connection, Endpoint};
use crate::net::packet::{DataChunk, DataChunkRef, Packet};
use crate::net::userarea::{
    pawn_rewards_to_user_area, read_user_area, user_area_to_pawn_rewards, write_user_area,
    UserArea, USER_AREA_BLOB_LENGTH,
};
use crate::net::ProtocolError;
use crate::persistence::store::Store;
use crate::telemetry::logging;

const ACCEPT_POLL_DELAY: Duration = Duration::from_millis(50);
const AUTH_CHUNK_LENGTH: u16 = 256;
const WRITE_CHUNK_LENGTH: u16 = 1024;
const MAX_CHUNK_LENGTH: usize = 1024;
const MAX_DATA_LENGTH: u32 = USER_AREA_BLOB_LENGTH as u32;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub cert_file: PathBuf,
    pub key_file: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:12501".to_string(),
            cert_file: PathBuf::from("server.crt"),
            key_file: PathBuf::from("server.key"),
        }
    }
}

/// Shared flag flipped by whoever decides the process should stop. The
/// accept loop polls it and tears the service down once it goes off.
#[derive(Debug, Default)]
pub struct ServerControl {
    shutdown: AtomicBool,
}

impl ServerControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        !self.shutdown.load(Ordering::SeqCst)
    }
}

/// Tracks the raw socket of every live connection so shutdown can yank
/// them out from under their workers.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: Mutex<HashMap<i64, TcpStream>>,
    next_id: AtomicI64,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn add(&self, stream: TcpStream) -> i64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        if let Ok(mut connections) = self.connections.lock() {
            connections.insert(id, stream);
        }
        id
    }

    fn remove(&self, id: i64) {
        if let Ok(mut connections) = self.connections.lock() {
            connections.remove(&id);
        }
    }

    fn close_all(&self) {
        if let Ok(mut connections) = self.connections.lock() {
            for (id, stream) in connections.drain() {
                if let Err(err) = stream.shutdown(Shutdown::Both) {
                    logging::log_error(&format!("[{}] force close failed: {}", id, err));
                }
            }
        }
    }
}

/// Binds the TLS endpoint and serves until the control flag flips. Fatal
/// setup problems (certificate, bind) surface here; per-connection errors
/// only ever end their own connection.
pub fn run_server(
    config: ServerConfig,
    database: Arc<Store>,
    control: Arc<ServerControl>,
) -> Result<(), String> {
    let acceptor = build_tls_acceptor(&config)?;
    let listener = TcpListener::bind(&config.bind_addr)
        .map_err(|err| format!("bind {} failed: {}", config.bind_addr, err))?;

    run_accept_loop(
        listener,
        Some(acceptor),
        database,
        control,
        Arc::new(ConnectionRegistry::new()),
    )
}

fn build_tls_acceptor(config: &ServerConfig) -> Result<TlsAcceptor, String> {
    let cert = std::fs::read(&config.cert_file)
        .map_err(|err| format!("read certificate {} failed: {}", config.cert_file.display(), err))?;
    let key = std::fs::read(&config.key_file)
        .map_err(|err| format!("read key {} failed: {}", config.key_file.display(), err))?;
    let identity = Identity::from_pkcs8(&cert, &key)
        .map_err(|err| format!("certificate load failed: {}", err))?;

    // the legacy client negotiates nothing newer than TLS 1.0
    TlsAcceptor::builder(identity)
        .min_protocol_version(Some(Protocol::Tlsv10))
        .max_protocol_version(Some(Protocol::Tlsv10))
        .build()
        .map_err(|err| format!("tls acceptor build failed: {}", err))
}

pub(crate) fn run_accept_loop(
    listener: TcpListener,
    acceptor: Option<TlsAcceptor>,
    database: Arc<Store>,
    control: Arc<ServerControl>,
    registry: Arc<ConnectionRegistry>,
) -> Result<(), String> {
    listener
        .set_nonblocking(true)
        .map_err(|err| format!("listener nonblocking failed: {}", err))?;

    let local_addr = listener
        .local_addr()
        .map(|addr| addr.to_string())
        .unwrap_or_default();
    logging::log_server(&format!("listening on {}", local_addr));
    println!("urdragon: listening on {}", local_addr);

    while control.is_running() {
        match listener.accept() {
            Ok((stream, addr)) => {
                println!("urdragon: connection from {}", addr);
                let acceptor = acceptor.clone();
                let database = Arc::clone(&database);
                let registry = Arc::clone(&registry);
                thread::spawn(move || {
                    if let Err(err) = handle_connection(stream, acceptor, &database, &registry) {
                        logging::log_error(&format!("connection error: {}", err));
                        eprintln!("connection error: {}", err);
                    }
                });
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_POLL_DELAY);
            }
            Err(err) => {
                logging::log_error(&format!("accept error: {}", err));
                eprintln!("accept error: {}", err);
            }
        }
    }

    registry.close_all();
    logging::log_server("listener stopped");

    Ok(())
}

fn handle_connection(
    stream: TcpStream,
    acceptor: Option<TlsAcceptor>,
    database: &Store,
    registry: &ConnectionRegistry,
) -> Result<(), ProtocolError> {
    stream.set_nonblocking(false)?;
    let id = registry.add(stream.try_clone()?);

    let result = match acceptor {
        Some(acceptor) => match acceptor.accept(stream) {
            Ok(tls_stream) => {
                let mut conn = Connection::new(tls_stream, id, Endpoint::Server);
                serve_client(&mut conn, database)
            }
            Err(err) => Err(ProtocolError::TlsHandshake(err.to_string())),
        },
        None => {
            let mut conn = Connection::new(stream, id, Endpoint::Server);
            serve_client(&mut conn, database)
        }
    };

    registry.remove(id);
    result
}

/// Drives one connection from handshake to disconnect. Every protocol
/// deviation, database failure or dead socket lands here and ends the
/// connection.
pub(crate) fn serve_client<S: Read + Write>(
    conn: &mut Connection<S>,
    database: &Store,
) -> Result<(), ProtocolError> {
    authenticate(conn)?;
    logging::log_server(&format!("{} connected", conn));

    let result = dispatch(conn, database);
    logging::log_server(&format!("{} disconnected", conn));
    result
}

/// The five-exchange handshake, server side. The auth token is accepted
/// as presented; showing up with one is all the proof the service asks
/// for.
fn authenticate<S: Read + Write>(conn: &mut Connection<S>) -> Result<(), ProtocolError> {
    conn.send(&Packet::FastDataRequest)?;
    let response = conn.recv()?;
    let Packet::FastDataResponse { user, .. } = response else {
        return Err(unexpected("fastDataResponse", &response));
    };
    conn.user = user;

    conn.send(&Packet::ConnectionSummaryNotification {
        success: true,
        unknown: 10,
    })?;

    let request = conn.recv()?;
    let Packet::AuthInfoRequestHeader { .. } = request else {
        return Err(unexpected("authenticationInformationRequestHeader", &request));
    };
    conn.send(&Packet::AuthInfoResponseHeader {
        chunk_length: AUTH_CHUNK_LENGTH,
    })?;

    let request = conn.recv()?;
    let Packet::AuthInfoRequestData(chunk) = request else {
        return Err(unexpected("authenticationInformationRequestData", &request));
    };
    conn.send(&Packet::AuthInfoResponseData(DataChunkRef {
        offset: 0,
        length: chunk.data.len() as u16,
    }))?;

    let request = conn.recv()?;
    let Packet::AuthInfoRequestFooter = request else {
        return Err(unexpected("authenticationInformationRequestFooter", &request));
    };
    conn.send(&Packet::AuthInfoResponseFooter { value: true })?;

    Ok(())
}

/// Answers requests one at a time until the client says goodbye or breaks
/// the rules.
fn dispatch<S: Read + Write>(
    conn: &mut Connection<S>,
    database: &Store,
) -> Result<(), ProtocolError> {
    loop {
        let request = conn.recv()?;
        match request {
            Packet::TusCommonAreaAcquisitionRequest { property_indices } => {
                let dragon = database.get_dragon()?;
                let properties = dragon.properties_filtered(&property_indices)?;
                conn.send(&Packet::TusCommonAreaAcquisitionResponse { properties })?;
            }
            Packet::TusCommonAreaAddRequest { properties } => {
                let mut dragon = database.get_dragon()?;
                let updated = dragon.add_properties(&properties)?;
                database.put_dragon(&dragon)?;
                conn.send(&Packet::TusCommonAreaAddResponse {
                    properties: updated,
                })?;
            }
            Packet::TusCommonAreaSettingsRequest { properties } => {
                let mut dragon = database.get_dragon()?;
                dragon.set_properties(&properties)?;
                database.put_dragon(&dragon)?;
                conn.send(&Packet::TusCommonAreaSettingsResponse { properties })?;
            }
            Packet::TusUserAreaReadRequestHeader { user } => {
                serve_user_area_read(conn, database, &user)?;
            }
            Packet::TusUserAreaWriteRequestHeader { data_length, user } => {
                serve_user_area_write(conn, database, data_length, &user)?;
            }
            Packet::DisconnectionRequest { .. } => {
                conn.send(&Packet::DisconnectionResponse { value: true })?;
                return Ok(());
            }
            other => {
                logging::log_server(&format!("{} unhandled request: {}", conn, other.name()));
                conn.send(&Packet::DisconnectionNotification {
                    unknown: 0,
                    notification: String::new(),
                })?;
                return Ok(());
            }
        }
    }
}

/// Streams the player's encoded reward blob out in client-sized chunks
/// until the footer arrives. No other request may interleave.
fn serve_user_area_read<S: Read + Write>(
    conn: &mut Connection<S>,
    database: &Store,
    user: &str,
) -> Result<(), ProtocolError> {
    let user_id = parse_user_id(user)?;

    let area = match database.get_pawn_rewards(user_id)? {
        Some(rewards) => pawn_rewards_to_user_area(&rewards),
        None => UserArea::default(),
    };
    let area_data = write_user_area(&area)?;

    conn.send(&Packet::TusUserAreaReadResponseHeader {
        data_length: area_data.len() as u32,
    })?;

    loop {
        let request = conn.recv()?;
        match request {
            Packet::TusUserAreaReadRequestFooter => {
                conn.send(&Packet::TusUserAreaReadResponseFooter)?;
                return Ok(());
            }
            Packet::TusUserAreaReadRequestData(chunk_ref) => {
                let offset = chunk_ref.offset as usize;
                let length = chunk_ref.length as usize;
                if length > MAX_CHUNK_LENGTH || offset + length > area_data.len() {
                    return Err(ProtocolError::InvalidBlob(
                        "read chunk out of bounds".to_string(),
                    ));
                }

                conn.send(&Packet::TusUserAreaReadResponseData(DataChunk {
                    offset: chunk_ref.offset,
                    data: area_data[offset..offset + length].to_vec(),
                }))?;
            }
            other => return Err(unexpected("tusUserAreaReadRequestData", &other)),
        }
    }
}

/// Collects the uploaded blob chunk by chunk, then decodes and persists
/// it when the footer closes the flow. A chunk outside the announced
/// bounds kills the connection before anything is stored.
fn serve_user_area_write<S: Read + Write>(
    conn: &mut Connection<S>,
    database: &Store,
    data_length: u32,
    user: &str,
) -> Result<(), ProtocolError> {
    let user_id = parse_user_id(user)?;

    if data_length > MAX_DATA_LENGTH {
        return Err(ProtocolError::InvalidBlob(
            "write data length exceeds max size".to_string(),
        ));
    }
    let mut area_data = vec![0u8; data_length as usize];

    conn.send(&Packet::TusUserAreaWriteResponseHeader {
        chunk_length: WRITE_CHUNK_LENGTH,
    })?;

    loop {
        let request = conn.recv()?;
        match request {
            Packet::TusUserAreaWriteRequestFooter => {
                let rewards = match read_user_area(&area_data)? {
                    Some(area) => user_area_to_pawn_rewards(user_id, &area),
                    None => PawnRewards::new(user_id),
                };
                database.put_pawn_rewards(&rewards)?;

                conn.send(&Packet::TusUserAreaWriteResponseFooter)?;
                return Ok(());
            }
            Packet::TusUserAreaWriteRequestData(chunk) => {
                let offset = chunk.offset as usize;
                let length = chunk.data.len();
                if length > MAX_CHUNK_LENGTH || offset + length > area_data.len() {
                    return Err(ProtocolError::InvalidBlob(
                        "write chunk out of bounds".to_string(),
                    ));
                }

                area_data[offset..offset + length].copy_from_slice(&chunk.data);
                conn.send(&Packet::TusUserAreaWriteResponseData(DataChunkRef {
                    offset: chunk.offset,
                    length: length as u16,
                }))?;
            }
            other => return Err(unexpected("tusUserAreaWriteRequestData", &other)),
        }
    }
}

fn parse_user_id(user: &str) -> Result<u64, ProtocolError> {
    u64::from_str_radix(user, 16)
        .map_err(|_| ProtocolError::InvalidBlob(format!("invalid user id '{}'", user)))
}
