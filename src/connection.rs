//! Connection establishment, packet framing, and command dispatch.
//!
//! A connection is a serial resource: one command at a time, and a returned
//! row stream must be drained (or the statement reset) before the next
//! command. The `consumed` flag enforces this; commands fail fast with
//! [`Error::UnconsumedResultSet`] while a stream is open.

use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Arc;

use crate::auth;
use crate::config::MySqlConfig;
use crate::error::{Error, NetworkErrorKind, Result, ServerError};
use crate::protocol::prepared::{
    stmt_close_payload, stmt_execute_payload, stmt_prepare_payload, stmt_reset_payload,
    PreparedStatement, StmtPrepareOk,
};
use crate::protocol::writer::frame_payload;
use crate::protocol::{
    capabilities, Command, EofPacket, ErrPacket, Greeting, OkPacket, PacketHeader, PacketReader,
    PacketType, PacketWriter, MAX_PACKET_SIZE,
};
use crate::row::{ColumnInfo, Row};
use crate::tls;
use crate::types::{parse_binary_row, parse_text_row, ColumnDef};
use crate::value::MySqlValue;

/// The transport under a default connection: plain TCP, upgraded to TLS
/// mid-handshake when negotiated.
pub enum Stream {
    Tcp(TcpStream),
    #[cfg(feature = "tls")]
    Tls(Box<tls::TlsStream<TcpStream>>),
}

impl Read for Stream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            Stream::Tcp(s) => s.read(buf),
            #[cfg(feature = "tls")]
            Stream::Tls(s) => s.read(buf),
        }
    }
}

impl Write for Stream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            Stream::Tcp(s) => s.write(buf),
            #[cfg(feature = "tls")]
            Stream::Tls(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            Stream::Tcp(s) => s.flush(),
            #[cfg(feature = "tls")]
            Stream::Tls(s) => s.flush(),
        }
    }
}

/// A MySQL connection over any duplex byte stream.
///
/// [`MySqlConnection::connect`] dials TCP and performs the handshake;
/// [`MySqlConnection::establish`] runs the same handshake over a caller-
/// provided stream.
pub struct MySqlConnection<S = Stream> {
    stream: S,
    config: MySqlConfig,
    greeting: Option<Greeting>,
    /// Sequence id for the next outbound frame; reads leave it one past the
    /// last inbound frame
    sequence_id: u8,
    /// False while a row stream is open
    consumed: bool,
    closed: bool,
    affected_rows: u64,
    last_insert_id: u64,
    warnings: u16,
    status_flags: u16,
}

impl<S> std::fmt::Debug for MySqlConnection<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MySqlConnection")
            .field("host", &self.config.host)
            .field("port", &self.config.port)
            .field("database", &self.config.database)
            .field("consumed", &self.consumed)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl MySqlConnection<Stream> {
    /// Dial the configured server and run the full handshake, including the
    /// TLS upgrade when negotiated.
    pub fn connect(config: MySqlConfig) -> Result<Self> {
        let tcp = dial(&config)?;
        let mut conn = Self::new(Stream::Tcp(tcp), config);
        let greeting = conn.read_greeting()?;
        let mut conn = conn.maybe_upgrade_tls(&greeting)?;
        conn.authenticate(&greeting)?;
        conn.greeting = Some(greeting);
        Ok(conn)
    }

    /// Send the SSLRequest and wrap the TCP stream when the policy and the
    /// server agree on TLS.
    #[cfg_attr(not(feature = "tls"), allow(unused_mut))]
    fn maybe_upgrade_tls(mut self, greeting: &Greeting) -> Result<Self> {
        let use_tls = tls::validate_ssl_mode(self.config.ssl_mode, greeting.capabilities)?;
        if !use_tls {
            return Ok(self);
        }

        #[cfg(not(feature = "tls"))]
        {
            if self.config.ssl_mode.is_required() {
                return Err(Error::network(
                    NetworkErrorKind::Tls,
                    "TLS connections require the `tls` cargo feature",
                ));
            }
            tracing::debug!("server offers TLS but the `tls` feature is off; staying plain");
            Ok(self)
        }

        #[cfg(feature = "tls")]
        {
            tls::validate_tls_config(self.config.ssl_mode, &self.config.tls)?;

            let caps = self.config.capability_flags() & greeting.capabilities;
            let request =
                tls::ssl_request_payload(caps, self.config.max_packet_size, self.config.charset);
            self.write_packet(&request)?;

            let tls_conf = self.config.tls.clone();
            let host = self.config.host.clone();
            let ssl_mode = self.config.ssl_mode;
            self.map_stream(|stream| match stream {
                Stream::Tcp(tcp) => Ok(Stream::Tls(Box::new(tls::TlsStream::new(
                    tcp, &tls_conf, &host, ssl_mode,
                )?))),
                Stream::Tls(_) => Err(Error::network(
                    NetworkErrorKind::Tls,
                    "connection is already encrypted",
                )),
            })
        }
    }
}

fn dial(config: &MySqlConfig) -> Result<TcpStream> {
    let mut addrs = (config.host.as_str(), config.port)
        .to_socket_addrs()
        .map_err(|e| {
            Error::io(
                NetworkErrorKind::Connect,
                format!("cannot resolve {}", config.host),
                e,
            )
        })?;
    let target = addrs.next().ok_or_else(|| {
        Error::network(
            NetworkErrorKind::Connect,
            format!("{} resolved to no addresses", config.host),
        )
    })?;

    let tcp = TcpStream::connect_timeout(&target, config.connect_timeout).map_err(|e| {
        Error::io(
            NetworkErrorKind::Connect,
            format!("cannot connect to {}", config.socket_addr()),
            e,
        )
    })?;

    tcp.set_nodelay(true).ok();
    tcp.set_read_timeout(Some(config.connect_timeout)).ok();
    tcp.set_write_timeout(Some(config.connect_timeout)).ok();
    Ok(tcp)
}

impl<S: Read + Write> MySqlConnection<S> {
    fn new(stream: S, config: MySqlConfig) -> Self {
        Self {
            stream,
            config,
            greeting: None,
            sequence_id: 0,
            consumed: true,
            closed: false,
            affected_rows: 0,
            last_insert_id: 0,
            warnings: 0,
            status_flags: 0,
        }
    }

    /// Run the handshake over an already-connected stream.
    pub fn establish(stream: S, config: MySqlConfig) -> Result<Self> {
        let mut conn = Self::new(stream, config);
        let greeting = conn.read_greeting()?;
        conn.authenticate(&greeting)?;
        conn.greeting = Some(greeting);
        Ok(conn)
    }

    /// Rebuild the connection around a transformed stream.
    #[cfg(feature = "tls")]
    fn map_stream<T>(self, f: impl FnOnce(S) -> Result<T>) -> Result<MySqlConnection<T>> {
        Ok(MySqlConnection {
            stream: f(self.stream)?,
            config: self.config,
            greeting: self.greeting,
            sequence_id: self.sequence_id,
            consumed: self.consumed,
            closed: self.closed,
            affected_rows: self.affected_rows,
            last_insert_id: self.last_insert_id,
            warnings: self.warnings,
            status_flags: self.status_flags,
        })
    }

    // -- accessors ---------------------------------------------------------

    /// Server version string from the greeting.
    pub fn server_version(&self) -> Option<&str> {
        self.greeting.as_ref().map(|g| g.server_version.as_str())
    }

    /// The server-side thread id for this session.
    pub fn connection_id(&self) -> Option<u32> {
        self.greeting.as_ref().map(|g| g.connection_id)
    }

    /// Rows affected by the last OK-returning command.
    pub fn affected_rows(&self) -> u64 {
        self.affected_rows
    }

    pub fn last_insert_id(&self) -> u64 {
        self.last_insert_id
    }

    pub fn warnings(&self) -> u16 {
        self.warnings
    }

    pub fn status_flags(&self) -> u16 {
        self.status_flags
    }

    /// True when no row stream is pending and the connection accepts
    /// commands.
    pub fn is_ready(&self) -> bool {
        self.consumed && !self.closed
    }

    // -- framing -----------------------------------------------------------

    /// Read one frame: 4-byte header, then exactly the declared payload.
    fn read_frame(&mut self) -> Result<(Vec<u8>, usize)> {
        let mut header = [0u8; 4];
        self.stream.read_exact(&mut header).map_err(|e| {
            Error::io(
                NetworkErrorKind::Disconnected,
                "stream ended while reading a packet header",
                e,
            )
        })?;
        let header = PacketHeader::from_bytes(&header);
        let len = header.payload_length as usize;
        self.sequence_id = header.sequence_id.wrapping_add(1);

        let mut payload = vec![0u8; len];
        if len > 0 {
            self.stream.read_exact(&mut payload).map_err(|e| {
                Error::io(
                    NetworkErrorKind::Disconnected,
                    "stream ended mid-packet",
                    e,
                )
            })?;
        }
        Ok((payload, len))
    }

    /// Read one logical packet, reassembling 0xFFFFFF continuation frames.
    fn read_packet(&mut self) -> Result<Vec<u8>> {
        let (mut payload, mut frame_len) = self.read_frame()?;
        while frame_len == MAX_PACKET_SIZE {
            let (cont, cont_len) = self.read_frame()?;
            payload.extend_from_slice(&cont);
            frame_len = cont_len;
        }
        tracing::trace!(bytes = payload.len(), seq = self.sequence_id, "packet in");
        Ok(payload)
    }

    /// Frame and send one logical packet at the current sequence id.
    fn write_packet(&mut self, payload: &[u8]) -> Result<()> {
        tracing::trace!(bytes = payload.len(), seq = self.sequence_id, "packet out");
        let framed = frame_payload(payload, &mut self.sequence_id);
        self.stream.write_all(&framed).map_err(|e| {
            Error::io(NetworkErrorKind::Disconnected, "cannot write packet", e)
        })?;
        self.stream
            .flush()
            .map_err(|e| Error::io(NetworkErrorKind::Disconnected, "cannot flush stream", e))
    }

    /// Every command opens a fresh conversation at sequence 0.
    fn send_command(&mut self, payload: &[u8]) -> Result<()> {
        self.sequence_id = 0;
        self.write_packet(payload)
    }

    // -- handshake ---------------------------------------------------------

    fn read_greeting(&mut self) -> Result<Greeting> {
        let payload = self.read_packet()?;
        if PacketType::classify(&payload) == PacketType::Err {
            let server = ErrPacket::parse(&payload).map(to_server_error);
            return Err(Error::auth("server refused the connection", server));
        }

        let greeting = Greeting::parse(&payload)
            .ok_or_else(|| Error::unexpected("reading the server greeting", &payload))?;
        if greeting.protocol_version != 10 {
            return Err(Error::decode(format!(
                "unsupported handshake protocol version {}",
                greeting.protocol_version
            )));
        }

        tracing::debug!(
            server = %greeting.server_version,
            thread = greeting.connection_id,
            "greeting received"
        );
        Ok(greeting)
    }

    fn authenticate(&mut self, greeting: &Greeting) -> Result<()> {
        let response = self.handshake_response(greeting);
        self.write_packet(&response)?;
        self.handle_auth_result()
    }

    /// Build the handshake response: capabilities, max packet size, charset,
    /// 23 reserved bytes, user, length-prefixed scramble, and the database
    /// when one is configured.
    fn handshake_response(&self, greeting: &Greeting) -> Vec<u8> {
        let client_caps = self.config.capability_flags() & greeting.capabilities;
        let scramble = self.scramble(&greeting.auth_plugin, &greeting.auth_data);

        let mut w = PacketWriter::new();
        w.write_u32_le(client_caps);
        w.write_u32_le(self.config.max_packet_size);
        w.write_u8(self.config.charset);
        w.write_zeros(23);
        w.write_null_string(&self.config.user);

        if client_caps & capabilities::CLIENT_SECURE_CONNECTION != 0 {
            // scrambles are 20 or 32 bytes, the length always fits one byte
            w.write_u8(scramble.len() as u8);
            w.write_bytes(&scramble);
        } else {
            w.write_bytes(&scramble);
            w.write_u8(0);
        }

        if client_caps & capabilities::CLIENT_CONNECT_WITH_DB != 0 {
            match &self.config.database {
                Some(db) => w.write_null_string(db),
                None => w.write_u8(0),
            }
        }

        w.into_bytes()
    }

    fn scramble(&self, plugin: &str, salt: &[u8]) -> Vec<u8> {
        let password = self.config.password.as_deref().unwrap_or("");
        match plugin {
            auth::plugins::CACHING_SHA2_PASSWORD => auth::scramble_caching_sha2(password, salt),
            auth::plugins::MYSQL_CLEAR_PASSWORD => {
                let mut cleartext = password.as_bytes().to_vec();
                cleartext.push(0);
                cleartext
            }
            _ => auth::scramble_native_password(password, salt),
        }
    }

    fn handle_auth_result(&mut self) -> Result<()> {
        let payload = self.read_packet()?;

        // During the handshake a leading 0xFE is an auth switch request at
        // any payload length (plugin name + fresh salt run well past the
        // 9-byte EOF cutoff). The short-payload EOF rule only applies once
        // result sets are flowing.
        if payload.first() == Some(&0xFE) {
            return self.handle_auth_switch(&payload[1..]);
        }

        match PacketType::classify(&payload) {
            PacketType::Ok => {
                if let Some(ok) = OkPacket::parse(&payload) {
                    self.status_flags = ok.status_flags;
                }
                tracing::debug!("authenticated");
                Ok(())
            }
            PacketType::Err => {
                let server = ErrPacket::parse(&payload).map(to_server_error);
                Err(Error::auth("handshake rejected", server))
            }
            _ => self.handle_auth_continuation(&payload),
        }
    }

    fn handle_auth_switch(&mut self, data: &[u8]) -> Result<()> {
        let mut r = PacketReader::new(data);
        let plugin = r
            .read_null_string()
            .ok_or_else(|| Error::unexpected("reading an auth switch request", data))?;
        let salt = r.read_rest();

        tracing::debug!(plugin = %plugin, "auth switch requested");
        let response = self.scramble(&plugin, salt);
        self.write_packet(&response)?;
        self.handle_auth_result()
    }

    /// Extra data mid-auth: the caching_sha2 fast path acknowledgment, or a
    /// demand for full authentication.
    fn handle_auth_continuation(&mut self, payload: &[u8]) -> Result<()> {
        // MySQL 8 wraps the continuation byte in an 0x01 envelope
        let code = match payload {
            [0x01, code, ..] => *code,
            [code, ..] => *code,
            [] => return Err(Error::unexpected("reading auth continuation", payload)),
        };

        match code {
            auth::caching_sha2::FAST_AUTH_SUCCESS => {
                let payload = self.read_packet()?;
                if let Some(ok) = OkPacket::parse(&payload) {
                    self.status_flags = ok.status_flags;
                }
                tracing::debug!("authenticated via caching_sha2 fast path");
                Ok(())
            }
            auth::caching_sha2::PERFORM_FULL_AUTH => Err(Error::auth(
                "caching_sha2_password full authentication needs a TLS connection",
                None,
            )),
            _ => Err(Error::unexpected("reading auth continuation", payload)),
        }
    }

    // -- commands ----------------------------------------------------------

    /// Commands are rejected while a row stream is pending.
    fn guard_ready(&self) -> Result<()> {
        if self.closed {
            return Err(Error::network(
                NetworkErrorKind::Disconnected,
                "connection is closed",
            ));
        }
        if !self.consumed {
            return Err(Error::UnconsumedResultSet);
        }
        Ok(())
    }

    /// COM_PING.
    pub fn ping(&mut self) -> Result<()> {
        self.guard_ready()?;
        self.send_command(&[Command::Ping as u8])?;
        let reply = self.read_packet()?;
        match PacketType::classify(&reply) {
            PacketType::Ok => {
                self.absorb_ok(&reply, "awaiting ping reply")?;
                Ok(())
            }
            PacketType::Err => Err(self.server_err(&reply)),
            _ => Err(Error::unexpected("awaiting ping reply", &reply)),
        }
    }

    /// COM_QUERY for statements that return no rows. A result-set header in
    /// the reply is a protocol error here; use [`MySqlConnection::query`]
    /// for SELECTs.
    pub fn execute(&mut self, sql: &str) -> Result<OkPacket> {
        self.guard_ready()?;
        tracing::debug!(sql = %sql, "execute");
        self.send_command(&query_payload(sql))?;
        let reply = self.read_packet()?;
        match PacketType::classify(&reply) {
            PacketType::Ok => self.absorb_ok(&reply, "awaiting execute reply"),
            PacketType::Err => Err(self.server_err(&reply)),
            _ => Err(Error::unexpected("awaiting execute reply", &reply)),
        }
    }

    /// COM_QUERY returning a lazy text-protocol row stream.
    ///
    /// The connection refuses further commands until the stream has been
    /// read to its end.
    pub fn query(&mut self, sql: &str) -> Result<TextRows<'_, S>> {
        self.guard_ready()?;
        tracing::debug!(sql = %sql, "query");
        self.send_command(&query_payload(sql))?;
        let (columns, streaming) = self.read_result_header()?;
        if streaming {
            self.consumed = false;
        }
        let info = column_info(&columns);
        Ok(TextRows {
            done: !streaming,
            columns,
            info,
            conn: self,
        })
    }

    /// COM_STMT_PREPARE.
    pub fn prepare(&mut self, sql: &str) -> Result<PreparedStatement> {
        self.guard_ready()?;
        tracing::debug!(sql = %sql, "prepare");
        self.send_command(&stmt_prepare_payload(sql))?;
        let reply = self.read_packet()?;
        if PacketType::classify(&reply) == PacketType::Err {
            return Err(self.server_err(&reply));
        }
        let ok = StmtPrepareOk::parse(&reply)
            .ok_or_else(|| Error::unexpected("awaiting prepare reply", &reply))?;

        let params = self.read_column_defs(ok.num_params as usize)?;
        if ok.num_params > 0 {
            self.read_eof()?;
        }
        let columns = self.read_column_defs(ok.num_columns as usize)?;
        if ok.num_columns > 0 {
            self.read_eof()?;
        }

        self.warnings = ok.warnings;
        Ok(PreparedStatement::new(
            ok.statement_id,
            sql.to_string(),
            params,
            columns,
        ))
    }

    /// COM_STMT_EXECUTE for statements that return no rows.
    ///
    /// Parameter types are derived from the values; the defs the server sent
    /// at prepare time describe placeholders, not the wire format.
    pub fn execute_stmt(
        &mut self,
        stmt: &PreparedStatement,
        params: &[MySqlValue],
    ) -> Result<OkPacket> {
        self.guard_ready()?;
        tracing::debug!(statement_id = stmt.statement_id, "execute statement");
        self.send_command(&stmt_execute_payload(stmt.statement_id, params))?;
        let reply = self.read_packet()?;
        match PacketType::classify(&reply) {
            PacketType::Ok => self.absorb_ok(&reply, "awaiting statement reply"),
            PacketType::Err => Err(self.server_err(&reply)),
            _ => Err(Error::unexpected("awaiting statement reply", &reply)),
        }
    }

    /// COM_STMT_EXECUTE returning a lazy binary-protocol row stream.
    pub fn query_stmt(
        &mut self,
        stmt: &PreparedStatement,
        params: &[MySqlValue],
    ) -> Result<BinaryRows<'_, S>> {
        self.guard_ready()?;
        tracing::debug!(statement_id = stmt.statement_id, "query statement");
        self.send_command(&stmt_execute_payload(stmt.statement_id, params))?;
        let (columns, streaming) = self.read_result_header()?;
        if streaming {
            self.consumed = false;
        }
        let info = column_info(&columns);
        Ok(BinaryRows {
            done: !streaming,
            columns,
            info,
            conn: self,
        })
    }

    /// COM_STMT_RESET. On OK the pending-stream guard is cleared: this is
    /// the one escape hatch for an abandoned row stream.
    pub fn reset_stmt(&mut self, stmt: &PreparedStatement) -> Result<()> {
        if self.closed {
            return Err(Error::network(
                NetworkErrorKind::Disconnected,
                "connection is closed",
            ));
        }
        self.send_command(&stmt_reset_payload(stmt.statement_id))?;
        let reply = self.read_packet()?;
        match PacketType::classify(&reply) {
            PacketType::Ok => {
                self.absorb_ok(&reply, "awaiting reset reply")?;
                self.consumed = true;
                Ok(())
            }
            PacketType::Err => Err(self.server_err(&reply)),
            _ => Err(Error::unexpected("awaiting reset reply", &reply)),
        }
    }

    /// COM_STMT_CLOSE. The server sends no reply.
    pub fn close_stmt(&mut self, stmt: &PreparedStatement) -> Result<()> {
        self.guard_ready()?;
        tracing::debug!(statement_id = stmt.statement_id, "close statement");
        self.send_command(&stmt_close_payload(stmt.statement_id))
    }

    /// Finish the outbound side with a best-effort COM_QUIT, then drop the
    /// transport.
    pub fn close(mut self) -> Result<()> {
        if !self.closed {
            self.sequence_id = 0;
            let _ = self.write_packet(&[Command::Quit as u8]);
            self.closed = true;
        }
        Ok(())
    }

    // -- response plumbing -------------------------------------------------

    /// Read a COM_QUERY / COM_STMT_EXECUTE response header. Returns the
    /// column definitions and whether rows will follow. An OK reply (no
    /// result set) yields no columns and no rows.
    fn read_result_header(&mut self) -> Result<(Vec<ColumnDef>, bool)> {
        let reply = self.read_packet()?;
        match PacketType::classify(&reply) {
            PacketType::Err => Err(self.server_err(&reply)),
            PacketType::Ok => {
                self.absorb_ok(&reply, "awaiting result set header")?;
                Ok((Vec::new(), false))
            }
            _ => {
                let mut r = PacketReader::new(&reply);
                let count = r
                    .read_lenenc_int()
                    .ok_or_else(|| Error::unexpected("awaiting result set header", &reply))?
                    as usize;
                let columns = self.read_column_defs(count)?;
                self.read_eof()?;
                Ok((columns, true))
            }
        }
    }

    fn read_column_defs(&mut self, count: usize) -> Result<Vec<ColumnDef>> {
        let mut defs = Vec::with_capacity(count);
        for _ in 0..count {
            let payload = self.read_packet()?;
            if PacketType::classify(&payload) == PacketType::Err {
                return Err(self.server_err(&payload));
            }
            defs.push(ColumnDef::parse(&payload)?);
        }
        Ok(defs)
    }

    fn read_eof(&mut self) -> Result<EofPacket> {
        let payload = self.read_packet()?;
        match PacketType::classify(&payload) {
            PacketType::Eof => {
                let eof = EofPacket::parse(&payload)
                    .ok_or_else(|| Error::unexpected("awaiting EOF", &payload))?;
                self.status_flags = eof.status_flags;
                self.warnings = eof.warnings;
                Ok(eof)
            }
            _ => Err(Error::unexpected("awaiting EOF", &payload)),
        }
    }

    fn absorb_ok(&mut self, payload: &[u8], context: &'static str) -> Result<OkPacket> {
        let ok = OkPacket::parse(payload).ok_or_else(|| Error::unexpected(context, payload))?;
        self.affected_rows = ok.affected_rows;
        self.last_insert_id = ok.last_insert_id;
        self.status_flags = ok.status_flags;
        self.warnings = ok.warnings;
        Ok(ok)
    }

    fn server_err(&self, payload: &[u8]) -> Error {
        match ErrPacket::parse(payload) {
            Some(err) => Error::Server(to_server_error(err)),
            None => Error::unexpected("parsing an ERR packet", payload),
        }
    }
}

fn query_payload(sql: &str) -> Vec<u8> {
    let mut payload = Vec::with_capacity(1 + sql.len());
    payload.push(Command::Query as u8);
    payload.extend_from_slice(sql.as_bytes());
    payload
}

fn column_info(columns: &[ColumnDef]) -> Arc<ColumnInfo> {
    Arc::new(ColumnInfo::new(
        columns.iter().map(|c| c.name.clone()).collect(),
    ))
}

fn to_server_error(err: ErrPacket) -> ServerError {
    ServerError {
        code: err.error_code,
        sql_state: err.sql_state,
        message: err.error_message,
    }
}

/// Lazy, single-pass stream of text-protocol rows.
///
/// Each `next` performs blocking I/O. Reaching the terminating EOF packet
/// re-enables commands on the connection; dropping the stream early does NOT
/// drain it, so an abandoned stream leaves the connection guarded until
/// [`MySqlConnection::reset_stmt`] or a full drain.
pub struct TextRows<'c, S: Read + Write> {
    conn: &'c mut MySqlConnection<S>,
    columns: Vec<ColumnDef>,
    info: Arc<ColumnInfo>,
    done: bool,
}

impl<S: Read + Write> TextRows<'_, S> {
    /// Column metadata for this result set.
    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }
}

impl<S: Read + Write> Iterator for TextRows<'_, S> {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let payload = match self.conn.read_packet() {
            Ok(payload) => payload,
            Err(e) => {
                self.done = true;
                return Some(Err(e));
            }
        };
        match PacketType::classify(&payload) {
            PacketType::Eof => {
                self.done = true;
                self.conn.consumed = true;
                if let Some(eof) = EofPacket::parse(&payload) {
                    self.conn.status_flags = eof.status_flags;
                    self.conn.warnings = eof.warnings;
                }
                None
            }
            PacketType::Err => {
                self.done = true;
                self.conn.consumed = true;
                Some(Err(self.conn.server_err(&payload)))
            }
            // 0x00 can legitimately start a row (an empty first field), so
            // everything that is not EOF/ERR is row data here
            _ => match parse_text_row(&payload, &self.columns) {
                Ok(values) => Some(Ok(Row::with_columns(Arc::clone(&self.info), values))),
                Err(e) => Some(Err(e)),
            },
        }
    }
}

/// Lazy, single-pass stream of binary-protocol rows; see [`TextRows`] for
/// the drain semantics.
pub struct BinaryRows<'c, S: Read + Write> {
    conn: &'c mut MySqlConnection<S>,
    columns: Vec<ColumnDef>,
    info: Arc<ColumnInfo>,
    done: bool,
}

impl<S: Read + Write> BinaryRows<'_, S> {
    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }
}

impl<S: Read + Write> Iterator for BinaryRows<'_, S> {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let payload = match self.conn.read_packet() {
            Ok(payload) => payload,
            Err(e) => {
                self.done = true;
                return Some(Err(e));
            }
        };
        match PacketType::classify(&payload) {
            PacketType::Eof => {
                self.done = true;
                self.conn.consumed = true;
                if let Some(eof) = EofPacket::parse(&payload) {
                    self.conn.status_flags = eof.status_flags;
                    self.conn.warnings = eof.warnings;
                }
                None
            }
            PacketType::Err => {
                self.done = true;
                self.conn.consumed = true;
                Some(Err(self.conn.server_err(&payload)))
            }
            // binary rows START with 0x00; that header byte is not an OK
            // packet, so it falls through to the row parser
            _ => match parse_binary_row(&payload, &self.columns) {
                Ok(values) => Some(Ok(Row::with_columns(Arc::clone(&self.info), values))),
                Err(e) => Some(Err(e)),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    struct MockStream {
        input: Cursor<Vec<u8>>,
        output: Vec<u8>,
    }

    impl MockStream {
        fn with_input(input: Vec<u8>) -> Self {
            Self {
                input: Cursor::new(input),
                output: Vec::new(),
            }
        }
    }

    impl Read for MockStream {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.input.read(buf)
        }
    }

    impl Write for MockStream {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.output.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn raw_conn(input: Vec<u8>) -> MySqlConnection<MockStream> {
        MySqlConnection::new(MockStream::with_input(input), MySqlConfig::new())
    }

    #[test]
    fn small_packet_round_trip() {
        let mut seq = 3;
        let framed = frame_payload(b"abc", &mut seq);
        let mut conn = raw_conn(framed);
        assert_eq!(conn.read_packet().unwrap(), b"abc");
        assert_eq!(conn.sequence_id, 4);
    }

    #[test]
    fn large_packet_write_then_read_back() {
        // 20 MiB splits into a full frame and a remainder frame
        let payload = vec![0x5A; 20 * 1024 * 1024];
        let mut conn = raw_conn(Vec::new());
        conn.send_command(&payload).unwrap();

        let written = &conn.stream.output;
        assert_eq!(&written[..4], &[0xFF, 0xFF, 0xFF, 0x00]);
        let second = 4 + MAX_PACKET_SIZE;
        let remainder = payload.len() - MAX_PACKET_SIZE;
        assert_eq!(
            &written[second..second + 4],
            &[
                (remainder & 0xFF) as u8,
                (remainder >> 8 & 0xFF) as u8,
                (remainder >> 16 & 0xFF) as u8,
                0x01,
            ]
        );
        assert_eq!(conn.sequence_id, 2);

        // feeding the frames back reassembles the original payload
        let framed = conn.stream.output.clone();
        let mut conn = raw_conn(framed);
        let read = conn.read_packet().unwrap();
        assert_eq!(read.len(), payload.len());
        assert!(read == payload);
        assert_eq!(conn.sequence_id, 2);
    }

    #[test]
    fn exact_boundary_round_trip() {
        let payload = vec![0x11; MAX_PACKET_SIZE];
        let mut seq = 0;
        let framed = frame_payload(&payload, &mut seq);
        // full frame + empty trailer
        assert_eq!(framed.len(), 4 + MAX_PACKET_SIZE + 4);

        let mut conn = raw_conn(framed);
        let read = conn.read_packet().unwrap();
        assert!(read == payload);
        assert_eq!(conn.sequence_id, 2);
    }

    #[test]
    fn truncated_packet_is_a_network_error() {
        // header declares five bytes, stream carries two
        let mut conn = raw_conn(vec![0x05, 0x00, 0x00, 0x00, b'h', b'i']);
        match conn.read_packet() {
            Err(Error::Network(e)) => assert_eq!(e.kind, NetworkErrorKind::Disconnected),
            other => panic!("expected a network error, got {other:?}"),
        }
    }

    #[test]
    fn commands_restart_sequence_at_zero() {
        let mut conn = raw_conn(Vec::new());
        conn.sequence_id = 9;
        conn.send_command(&[Command::Ping as u8]).unwrap();
        assert_eq!(conn.stream.output[3], 0); // first frame seq
        assert_eq!(conn.sequence_id, 1);
    }

    #[test]
    fn guard_rejects_while_unconsumed() {
        let mut conn = raw_conn(Vec::new());
        conn.consumed = false;
        assert!(matches!(conn.ping(), Err(Error::UnconsumedResultSet)));
        assert!(matches!(
            conn.execute("DO 1"),
            Err(Error::UnconsumedResultSet)
        ));
        assert!(matches!(
            conn.prepare("SELECT 1"),
            Err(Error::UnconsumedResultSet)
        ));
        assert!(!conn.is_ready());
    }

    #[test]
    fn closed_connection_rejects_commands() {
        let mut conn = raw_conn(Vec::new());
        conn.closed = true;
        assert!(matches!(conn.ping(), Err(Error::Network(_))));
    }
}
