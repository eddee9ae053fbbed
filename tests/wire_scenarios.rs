//! End-to-end scenarios driven over an in-memory stream: the scripted bytes
//! play the server side of the conversation.

use std::cell::RefCell;
use std::io::{Cursor, Read, Write};
use std::rc::Rc;

use mysql_wire::auth::{scramble_caching_sha2, scramble_native_password};
use mysql_wire::protocol::{capabilities, Greeting};
use mysql_wire::types::{column_flags, parse_binary_row};
use mysql_wire::{
    ColumnDef, Error, FieldType, MySqlConfig, MySqlConnection, MySqlValue, PreparedStatement,
};

// ---------------------------------------------------------------------------
// scripted stream
// ---------------------------------------------------------------------------

struct ScriptedStream {
    input: Cursor<Vec<u8>>,
    output: Rc<RefCell<Vec<u8>>>,
}

impl ScriptedStream {
    fn new(input: Vec<u8>) -> Self {
        Self {
            input: Cursor::new(input),
            output: Rc::default(),
        }
    }

    /// A stream plus a handle observing everything the client writes.
    fn with_probe(input: Vec<u8>) -> (Self, Rc<RefCell<Vec<u8>>>) {
        let stream = Self::new(input);
        let probe = Rc::clone(&stream.output);
        (stream, probe)
    }
}

impl Read for ScriptedStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.input.read(buf)
    }
}

impl Write for ScriptedStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.output.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// packet builders playing the server role
// ---------------------------------------------------------------------------

fn frame(seq: u8, payload: &[u8]) -> Vec<u8> {
    let mut packet = Vec::with_capacity(4 + payload.len());
    packet.extend_from_slice(&(payload.len() as u32).to_le_bytes()[..3]);
    packet.push(seq);
    packet.extend_from_slice(payload);
    packet
}

fn lenenc(value: u64) -> Vec<u8> {
    match value {
        0..=0xFA => vec![value as u8],
        0xFB..=0xFFFF => {
            let mut v = vec![0xFC];
            v.extend_from_slice(&(value as u16).to_le_bytes());
            v
        }
        _ => {
            let mut v = vec![0xFE];
            v.extend_from_slice(&value.to_le_bytes());
            v
        }
    }
}

fn lenenc_str(s: &str) -> Vec<u8> {
    let mut v = lenenc(s.len() as u64);
    v.extend_from_slice(s.as_bytes());
    v
}

/// The canonical v10 greeting for a `"5.7.19"` server: 8-byte salt part one,
/// 13-byte (NUL-terminated) salt part two.
fn greeting_payload() -> Vec<u8> {
    let caps: u32 = capabilities::CLIENT_PROTOCOL_41 | capabilities::CLIENT_SECURE_CONNECTION;
    let mut p = vec![0x0A];
    p.extend_from_slice(b"5.7.19\0");
    p.extend_from_slice(&11u32.to_le_bytes()); // thread id
    p.extend_from_slice(b"abcdefgh"); // salt part 1
    p.push(0x00); // filler
    p.extend_from_slice(&((caps & 0xFFFF) as u16).to_le_bytes());
    p.push(0x21); // charset
    p.extend_from_slice(&2u16.to_le_bytes()); // status
    p.extend_from_slice(&((caps >> 16) as u16).to_le_bytes());
    p.push(0x00); // auth data length (no PLUGIN_AUTH)
    p.extend_from_slice(&[0u8; 10]); // reserved
    p.extend_from_slice(b"ijklmnopqrst\0"); // salt part 2
    p
}

/// A v10 greeting that announces an auth plugin, as 8.0 servers do.
fn greeting_payload_for_plugin(plugin: &str) -> Vec<u8> {
    let caps: u32 = capabilities::CLIENT_PROTOCOL_41
        | capabilities::CLIENT_SECURE_CONNECTION
        | capabilities::CLIENT_PLUGIN_AUTH;
    let mut p = vec![0x0A];
    p.extend_from_slice(b"8.0.36\0");
    p.extend_from_slice(&11u32.to_le_bytes());
    p.extend_from_slice(b"abcdefgh");
    p.push(0x00); // filler
    p.extend_from_slice(&((caps & 0xFFFF) as u16).to_le_bytes());
    p.push(0x21);
    p.extend_from_slice(&2u16.to_le_bytes());
    p.extend_from_slice(&((caps >> 16) as u16).to_le_bytes());
    p.push(21); // auth data length
    p.extend_from_slice(&[0u8; 10]);
    p.extend_from_slice(b"ijklmnopqrst\0");
    p.extend_from_slice(plugin.as_bytes());
    p.push(0);
    p
}

fn ok_payload(affected_rows: u64, last_insert_id: u64) -> Vec<u8> {
    let mut p = vec![0x00];
    p.extend(lenenc(affected_rows));
    p.extend(lenenc(last_insert_id));
    p.extend_from_slice(&2u16.to_le_bytes()); // autocommit
    p.extend_from_slice(&0u16.to_le_bytes()); // warnings
    p
}

fn eof_payload() -> Vec<u8> {
    vec![0xFE, 0x00, 0x00, 0x02, 0x00]
}

fn err_payload(code: u16, sql_state: &str, message: &str) -> Vec<u8> {
    let mut p = vec![0xFF];
    p.extend_from_slice(&code.to_le_bytes());
    p.push(b'#');
    p.extend_from_slice(sql_state.as_bytes());
    p.extend_from_slice(message.as_bytes());
    p
}

fn column_def_payload(name: &str, ty: FieldType, flags: u16, charset: u16) -> Vec<u8> {
    let mut p = Vec::new();
    for s in ["def", "test", "t", "t", name, name] {
        p.extend(lenenc_str(s));
    }
    p.extend(lenenc(0x0C));
    p.extend_from_slice(&charset.to_le_bytes());
    p.extend_from_slice(&11u32.to_le_bytes()); // display length
    p.push(ty as u8);
    p.extend_from_slice(&flags.to_le_bytes());
    p.push(0); // decimals
    p.extend_from_slice(&0u16.to_le_bytes()); // filler
    p
}

fn text_row_payload(fields: &[Option<&str>]) -> Vec<u8> {
    let mut p = Vec::new();
    for field in fields {
        match field {
            Some(s) => p.extend(lenenc_str(s)),
            None => p.push(0xFB),
        }
    }
    p
}

fn prepare_ok_payload(statement_id: u32, num_columns: u16, num_params: u16) -> Vec<u8> {
    let mut p = vec![0x00];
    p.extend_from_slice(&statement_id.to_le_bytes());
    p.extend_from_slice(&num_columns.to_le_bytes());
    p.extend_from_slice(&num_params.to_le_bytes());
    p.push(0x00);
    p.extend_from_slice(&0u16.to_le_bytes());
    p
}

/// Handshake prelude: greeting at sequence 0, auth OK at sequence 2 (the
/// client's response takes sequence 1).
fn handshake_script() -> Vec<u8> {
    let mut script = frame(0, &greeting_payload());
    script.extend(frame(2, &ok_payload(0, 0)));
    script
}

fn test_config() -> MySqlConfig {
    MySqlConfig::new().host("scripted").user("root")
}

fn connect(script: Vec<u8>) -> MySqlConnection<ScriptedStream> {
    MySqlConnection::establish(ScriptedStream::new(script), test_config())
        .expect("scripted handshake should succeed")
}

// ---------------------------------------------------------------------------
// scenarios
// ---------------------------------------------------------------------------

#[test]
fn greeting_parses_version_and_salts() {
    let greeting = Greeting::parse(&greeting_payload()).unwrap();
    assert_eq!(greeting.protocol_version, 10);
    assert_eq!(greeting.server_version, "5.7.19");
    assert_eq!(greeting.connection_id, 11);
    // 8-byte part one plus 12-byte part two, trailing NUL stripped
    assert_eq!(greeting.auth_data.len(), 20);
    assert_eq!(&greeting.auth_data[..8], b"abcdefgh");
    assert_eq!(&greeting.auth_data[8..], b"ijklmnopqrst");
}

#[test]
fn handshake_sends_auth_response_at_sequence_one() {
    let conn = connect(handshake_script());
    assert_eq!(conn.server_version(), Some("5.7.19"));
    assert_eq!(conn.connection_id(), Some(11));
    assert!(conn.is_ready());
}

#[test]
fn handshake_response_layout() {
    let (stream, written) = ScriptedStream::with_probe(handshake_script());
    let conn =
        MySqlConnection::establish(stream, test_config().password("secret")).unwrap();
    drop(conn);

    let written = written.borrow();
    // the auth response is the first (and only) packet the client wrote
    let len = u32::from_le_bytes([written[0], written[1], written[2], 0]) as usize;
    assert_eq!(written[3], 1, "auth response takes sequence 1");
    let payload = &written[4..4 + len];

    let caps = u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]);
    assert!(caps & capabilities::CLIENT_PROTOCOL_41 != 0);
    assert!(caps & capabilities::CLIENT_SECURE_CONNECTION != 0);
    // never advertise what the server did not offer
    assert!(caps & capabilities::CLIENT_TRANSACTIONS == 0);

    let max_packet = u32::from_le_bytes([payload[4], payload[5], payload[6], payload[7]]);
    assert_eq!(max_packet, 64 * 1024 * 1024);
    assert_eq!(payload[8], 45); // utf8mb4
    assert!(payload[9..32].iter().all(|&b| b == 0), "reserved bytes");
    assert_eq!(&payload[32..37], b"root\0");
    assert_eq!(payload[37], 20, "native scramble length");
    assert_eq!(payload.len(), 38 + 20);
}

#[test]
fn empty_password_sends_empty_scramble() {
    let (stream, written) = ScriptedStream::with_probe(handshake_script());
    let conn = MySqlConnection::establish(stream, test_config()).unwrap();
    drop(conn);

    let written = written.borrow();
    let len = u32::from_le_bytes([written[0], written[1], written[2], 0]) as usize;
    let payload = &written[4..4 + len];
    assert_eq!(&payload[32..37], b"root\0");
    assert_eq!(payload[37], 0, "empty password, empty scramble");
    assert_eq!(payload.len(), 38);
}

#[test]
fn execute_returns_ok() {
    let mut script = handshake_script();
    script.extend(frame(1, &ok_payload(0, 0)));
    let mut conn = connect(script);

    let ok = conn.execute("DO 1").unwrap();
    assert_eq!(ok.affected_rows, 0);
    assert_eq!(ok.last_insert_id, 0);
    assert!(conn.is_ready());
}

#[test]
fn execute_surfaces_server_error() {
    let mut script = handshake_script();
    script.extend(frame(1, &err_payload(1064, "42000", "syntax error")));
    let mut conn = connect(script);

    match conn.execute("DO ???") {
        Err(Error::Server(e)) => {
            assert_eq!(e.code, 1064);
            assert_eq!(e.sql_state, "42000");
            assert_eq!(e.message, "syntax error");
        }
        other => panic!("expected a server error, got {other:?}"),
    }
    // a pre-stream error leaves the connection usable
    assert!(conn.is_ready());
}

#[test]
fn query_streams_a_result_set() {
    let mut script = handshake_script();
    script.extend(frame(1, &[0x01])); // one column
    script.extend(frame(
        2,
        &column_def_payload("x", FieldType::LongLong, column_flags::NOT_NULL, 63),
    ));
    script.extend(frame(3, &eof_payload()));
    script.extend(frame(4, &text_row_payload(&[Some("1")])));
    script.extend(frame(5, &eof_payload()));
    let mut conn = connect(script);

    let mut rows = conn.query("SELECT 1 AS x").unwrap();
    assert_eq!(rows.columns().len(), 1);
    assert_eq!(rows.columns()[0].name, "x");
    assert_eq!(rows.columns()[0].column_type, FieldType::LongLong);

    let row = rows.next().unwrap().unwrap();
    assert_eq!(row.get(0), Some(&MySqlValue::BigInt(1)));
    assert_eq!(row.get_by_name("x"), Some(&MySqlValue::BigInt(1)));
    assert!(rows.next().is_none());

    assert!(conn.is_ready());
}

#[test]
fn query_rows_carry_nulls_and_values() {
    let mut script = handshake_script();
    script.extend(frame(1, &[0x02]));
    script.extend(frame(2, &column_def_payload("id", FieldType::Long, 0, 63)));
    script.extend(frame(
        3,
        &column_def_payload("name", FieldType::VarString, 0, 33),
    ));
    script.extend(frame(4, &eof_payload()));
    script.extend(frame(5, &text_row_payload(&[Some("7"), Some("ada")])));
    script.extend(frame(6, &text_row_payload(&[Some("8"), None])));
    script.extend(frame(7, &eof_payload()));
    let mut conn = connect(script);

    let rows: Vec<_> = conn
        .query("SELECT id, name FROM t")
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].get(1), Some(&MySqlValue::Text("ada".to_string())));
    assert_eq!(rows[1].get(0), Some(&MySqlValue::Int(8)));
    assert_eq!(rows[1].get(1), Some(&MySqlValue::Null));
}

#[test]
fn unconsumed_stream_blocks_commands_until_drained() {
    // first connection: abandon the stream, the guard must trip
    let mut script = handshake_script();
    script.extend(frame(1, &[0x01]));
    script.extend(frame(
        2,
        &column_def_payload("x", FieldType::LongLong, 0, 63),
    ));
    script.extend(frame(3, &eof_payload()));
    script.extend(frame(4, &text_row_payload(&[Some("1")])));
    script.extend(frame(5, &eof_payload()));
    let mut conn = connect(script);

    let rows = conn.query("SELECT 1 AS x").unwrap();
    drop(rows); // undrained
    assert!(!conn.is_ready());
    assert!(matches!(
        conn.execute("DO 1"),
        Err(Error::UnconsumedResultSet)
    ));
    assert!(matches!(conn.ping(), Err(Error::UnconsumedResultSet)));

    // second connection: drain to the end, then the same command succeeds
    let mut script = handshake_script();
    script.extend(frame(1, &[0x01]));
    script.extend(frame(
        2,
        &column_def_payload("x", FieldType::LongLong, 0, 63),
    ));
    script.extend(frame(3, &eof_payload()));
    script.extend(frame(4, &text_row_payload(&[Some("1")])));
    script.extend(frame(5, &eof_payload()));
    script.extend(frame(1, &ok_payload(0, 0)));
    let mut conn = connect(script);

    let mut rows = conn.query("SELECT 1 AS x").unwrap();
    while let Some(row) = rows.next() {
        row.unwrap();
    }
    assert!(conn.is_ready());
    conn.execute("DO 1").unwrap();
}

#[test]
fn mid_stream_error_ends_the_stream() {
    let mut script = handshake_script();
    script.extend(frame(1, &[0x01]));
    script.extend(frame(
        2,
        &column_def_payload("x", FieldType::LongLong, 0, 63),
    ));
    script.extend(frame(3, &eof_payload()));
    script.extend(frame(4, &text_row_payload(&[Some("1")])));
    script.extend(frame(5, &err_payload(1317, "70100", "Query execution was interrupted")));
    let mut conn = connect(script);

    let mut rows = conn.query("SELECT x FROM t").unwrap();
    assert!(rows.next().unwrap().is_ok());
    match rows.next() {
        Some(Err(Error::Server(e))) => assert_eq!(e.code, 1317),
        other => panic!("expected a server error, got {other:?}"),
    }
    assert!(rows.next().is_none());
    drop(rows);
    // the terminating error closed the result set
    assert!(conn.is_ready());
}

#[test]
fn prepare_execute_and_stream_binary_rows() {
    let mut script = handshake_script();
    // prepare: ok + one param def + eof + one column def + eof
    script.extend(frame(1, &prepare_ok_payload(7, 1, 1)));
    script.extend(frame(2, &column_def_payload("?", FieldType::LongLong, 0, 63)));
    script.extend(frame(3, &eof_payload()));
    script.extend(frame(4, &column_def_payload("id", FieldType::LongLong, 0, 63)));
    script.extend(frame(5, &eof_payload()));
    // query_stmt: header + column def + eof + one binary row + eof
    script.extend(frame(1, &[0x01]));
    script.extend(frame(2, &column_def_payload("id", FieldType::LongLong, 0, 63)));
    script.extend(frame(3, &eof_payload()));
    let mut row = vec![0x00, 0x00]; // header + bitmap (one column, nothing NULL)
    row.extend_from_slice(&5u64.to_le_bytes());
    script.extend(frame(4, &row));
    script.extend(frame(5, &eof_payload()));
    let mut conn = connect(script);

    let stmt = conn.prepare("SELECT id FROM t WHERE id = ?").unwrap();
    assert_eq!(stmt.statement_id, 7);
    assert_eq!(stmt.param_count(), 1);
    assert_eq!(stmt.column_count(), 1);

    let mut rows = conn.query_stmt(&stmt, &[MySqlValue::BigInt(5)]).unwrap();
    let row = rows.next().unwrap().unwrap();
    assert_eq!(row.get_by_name("id"), Some(&MySqlValue::BigInt(5)));
    assert!(rows.next().is_none());
    assert!(conn.is_ready());
}

#[test]
fn execute_stmt_returns_ok() {
    let mut script = handshake_script();
    script.extend(frame(1, &prepare_ok_payload(3, 0, 1)));
    script.extend(frame(2, &column_def_payload("?", FieldType::LongLong, 0, 63)));
    script.extend(frame(3, &eof_payload()));
    script.extend(frame(1, &ok_payload(1, 42)));
    let mut conn = connect(script);

    let stmt = conn.prepare("INSERT INTO t (id) VALUES (?)").unwrap();
    let ok = conn.execute_stmt(&stmt, &[MySqlValue::Int(9)]).unwrap();
    assert_eq!(ok.affected_rows, 1);
    assert_eq!(ok.last_insert_id, 42);
    assert_eq!(conn.last_insert_id(), 42);
}

#[test]
fn reset_stmt_clears_a_pending_stream() {
    let mut script = handshake_script();
    // prepare with no params and one column
    script.extend(frame(1, &prepare_ok_payload(2, 1, 0)));
    script.extend(frame(2, &column_def_payload("x", FieldType::Long, 0, 63)));
    script.extend(frame(3, &eof_payload()));
    // query that will be abandoned
    script.extend(frame(1, &[0x01]));
    script.extend(frame(2, &column_def_payload("x", FieldType::Long, 0, 63)));
    script.extend(frame(3, &eof_payload()));
    // reset reply
    script.extend(frame(1, &ok_payload(0, 0)));
    // post-reset command reply
    script.extend(frame(1, &ok_payload(0, 0)));
    let mut conn = connect(script);

    let stmt = conn.prepare("SELECT x FROM t").unwrap();
    let rows = conn.query("SELECT x FROM t").unwrap();
    drop(rows);
    assert!(matches!(
        conn.execute("DO 1"),
        Err(Error::UnconsumedResultSet)
    ));

    conn.reset_stmt(&stmt).unwrap();
    assert!(conn.is_ready());
    conn.execute("DO 1").unwrap();
}

#[test]
fn close_stmt_sends_without_reply() {
    let script = handshake_script();
    let mut conn = connect(script);
    let stmt = PreparedStatement::new(5, "SELECT 1".to_string(), vec![], vec![]);
    // no reply is scripted; close_stmt must not read one
    conn.close_stmt(&stmt).unwrap();
    conn.close().unwrap();
}

#[test]
fn auth_switch_request_rescrambles_with_the_new_salt() {
    // a realistic switch request: 0xFE, plugin name, 20-byte salt, NUL
    let switch_salt = b"ABCDEFGHIJKLMNOPQRST";
    let mut switch_request = vec![0xFE];
    switch_request.extend_from_slice(b"mysql_native_password\0");
    switch_request.extend_from_slice(switch_salt);
    switch_request.push(0);

    let mut script = frame(0, &greeting_payload());
    script.extend(frame(2, &switch_request));
    script.extend(frame(4, &ok_payload(0, 0)));

    let (stream, written) = ScriptedStream::with_probe(script);
    let conn =
        MySqlConnection::establish(stream, test_config().password("secret")).unwrap();
    assert!(conn.is_ready());
    drop(conn);

    // the second packet the client wrote answers the switch request with a
    // scramble over the fresh salt
    let written = written.borrow();
    let first_len = u32::from_le_bytes([written[0], written[1], written[2], 0]) as usize;
    let second = 4 + first_len;
    let second_len = u32::from_le_bytes([
        written[second],
        written[second + 1],
        written[second + 2],
        0,
    ]) as usize;
    assert_eq!(written[second + 3], 3, "switch response sequence");
    let response = &written[second + 4..second + 4 + second_len];
    assert_eq!(response, scramble_native_password("secret", switch_salt));
}

#[test]
fn caching_sha2_fast_auth_completes() {
    let mut script = frame(0, &greeting_payload_for_plugin("caching_sha2_password"));
    script.extend(frame(2, &[0x01, 0x03])); // fast-auth success
    script.extend(frame(3, &ok_payload(0, 0)));

    let (stream, written) = ScriptedStream::with_probe(script);
    let conn =
        MySqlConnection::establish(stream, test_config().password("secret")).unwrap();
    assert!(conn.is_ready());
    assert_eq!(conn.server_version(), Some("8.0.36"));
    drop(conn);

    // the auth response carried the 32-byte sha256 scramble
    let written = written.borrow();
    let len = u32::from_le_bytes([written[0], written[1], written[2], 0]) as usize;
    let payload = &written[4..4 + len];
    assert_eq!(payload[37], 32);
    assert_eq!(
        &payload[38..38 + 32],
        scramble_caching_sha2("secret", b"abcdefghijklmnopqrst").as_slice()
    );
}

#[test]
fn caching_sha2_full_auth_is_refused_without_tls() {
    let mut script = frame(0, &greeting_payload_for_plugin("caching_sha2_password"));
    script.extend(frame(2, &[0x01, 0x04])); // full auth demanded

    match MySqlConnection::establish(ScriptedStream::new(script), test_config().password("secret"))
    {
        Err(Error::Auth(_)) => {}
        other => panic!("expected an auth error, got {other:?}"),
    }
}

#[test]
fn auth_rejection_is_an_auth_error() {
    let mut script = frame(0, &greeting_payload());
    script.extend(frame(2, &err_payload(1045, "28000", "Access denied for user")));

    match MySqlConnection::establish(ScriptedStream::new(script), test_config()) {
        Err(Error::Auth(e)) => {
            let server = e.server.expect("the ERR payload should be carried");
            assert_eq!(server.code, 1045);
            assert_eq!(server.sql_state, "28000");
        }
        other => panic!("expected an auth error, got {other:?}"),
    }
}

#[test]
fn binary_row_null_bitmap_offset_two() {
    // nine columns with columns 0 and 8 NULL: bitmap bytes 0x04 0x04
    let columns: Vec<ColumnDef> = (0..9)
        .map(|i| {
            ColumnDef::parse(&column_def_payload(
                &format!("c{i}"),
                FieldType::Tiny,
                0,
                63,
            ))
            .unwrap()
        })
        .collect();

    let mut payload = vec![0x00, 0x04, 0x04];
    payload.extend_from_slice(&[1, 2, 3, 4, 5, 6, 7]);

    let values = parse_binary_row(&payload, &columns).unwrap();
    assert_eq!(values[0], MySqlValue::Null);
    assert_eq!(values[8], MySqlValue::Null);
    assert_eq!(values[4], MySqlValue::TinyInt(4));
}
