//! Blocking native protocol v4 transport over `std::net::TcpStream`.

use std::collections::BTreeMap;
use std::net::{TcpStream, ToSocketAddrs};

use super::frame::{
    BodyReader, BodyWriter, FLAG_COMPRESSION, FLAG_CUSTOM_PAYLOAD, FLAG_TRACING, FLAG_WARNING,
    Frame, Opcode, read_frame, write_frame,
};
use super::{
    Connector, Credentials, PreparedHandle, QueryResult, Row, Timeouts, Transport, WireError,
    WireErrorKind,
};
use crate::consistency::Consistency;

const CQL_VERSION: &str = "3.0.0";

const RESULT_VOID: i32 = 0x0001;
const RESULT_ROWS: i32 = 0x0002;
const RESULT_SET_KEYSPACE: i32 = 0x0003;
const RESULT_PREPARED: i32 = 0x0004;
const RESULT_SCHEMA_CHANGE: i32 = 0x0005;

const ROWS_GLOBAL_SPEC: i32 = 0x0001;
const ROWS_HAS_MORE_PAGES: i32 = 0x0002;
const ROWS_NO_METADATA: i32 = 0x0004;

const QUERY_FLAG_VALUES: u8 = 0x01;

/// Opens native protocol connections.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeConnector;

impl Connector for NativeConnector {
    fn open(
        &self,
        host: &str,
        port: u16,
        timeouts: &Timeouts,
        credentials: Option<&Credentials>,
    ) -> Result<Box<dyn Transport>, WireError> {
        let mut last_err = None;
        let addrs = (host, port).to_socket_addrs()?;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, timeouts.connect) {
                Ok(stream) => {
                    stream.set_read_timeout(Some(timeouts.receive))?;
                    stream.set_write_timeout(Some(timeouts.send))?;
                    stream.set_nodelay(true)?;
                    let mut transport = NativeTransport::new(stream);
                    transport.handshake(credentials)?;
                    tracing::debug!(host, port, "Native transport ready");
                    return Ok(Box::new(transport));
                }
                Err(e) => last_err = Some(WireError::from(e)),
            }
        }
        Err(last_err.unwrap_or_else(|| {
            WireError::new(WireErrorKind::Io, format!("{host}:{port} resolved to no address"))
        }))
    }
}

/// One socket, one request in flight.
pub struct NativeTransport {
    stream: TcpStream,
    next_stream: i16,
}

impl NativeTransport {
    #[must_use]
    pub fn new(stream: TcpStream) -> Self {
        Self {
            stream,
            next_stream: 0,
        }
    }

    fn round_trip(&mut self, opcode: Opcode, body: &[u8]) -> Result<Frame, WireError> {
        let stream_id = self.next_stream;
        self.next_stream = self.next_stream.wrapping_add(1) & 0x7FFF;
        write_frame(&mut self.stream, stream_id, opcode, body)?;
        let frame = read_frame(&mut self.stream)?;
        if frame.stream != stream_id {
            return Err(WireError::protocol(format!(
                "response for stream {} while waiting on {stream_id}",
                frame.stream
            )));
        }
        if frame.flags & FLAG_COMPRESSION != 0 {
            return Err(WireError::protocol("compressed frame without negotiated compression"));
        }
        if frame.opcode == Opcode::Error {
            return Err(parse_error(&frame)?);
        }
        Ok(frame)
    }

    fn handshake(&mut self, credentials: Option<&Credentials>) -> Result<(), WireError> {
        let mut opts = BTreeMap::new();
        opts.insert("CQL_VERSION", CQL_VERSION);
        let mut body = BodyWriter::new();
        body.string_map(&opts)?;
        let reply = self.round_trip(Opcode::Startup, &body.into_inner())?;
        match reply.opcode {
            Opcode::Ready => Ok(()),
            Opcode::Authenticate => self.authenticate(credentials),
            other => Err(WireError::protocol(format!("unexpected {other:?} after STARTUP"))),
        }
    }

    fn authenticate(&mut self, credentials: Option<&Credentials>) -> Result<(), WireError> {
        let Some(creds) = credentials else {
            return Err(WireError::new(
                WireErrorKind::Authentication,
                "server requires authentication but no credentials are configured",
            ));
        };
        let mut token = Vec::with_capacity(creds.username.len() + creds.password.len() + 2);
        token.push(0);
        token.extend_from_slice(creds.username.as_bytes());
        token.push(0);
        token.extend_from_slice(creds.password.as_bytes());
        let mut body = BodyWriter::new();
        body.bytes(Some(&token))?;
        let reply = self.round_trip(Opcode::AuthResponse, &body.into_inner())?;
        match reply.opcode {
            Opcode::AuthSuccess => Ok(()),
            other => Err(WireError::new(
                WireErrorKind::Authentication,
                format!("unexpected {other:?} during authentication"),
            )),
        }
    }

    fn result(&mut self, opcode: Opcode, body: &[u8]) -> Result<(Frame, usize), WireError> {
        let frame = self.round_trip(opcode, body)?;
        if frame.opcode != Opcode::Result {
            return Err(WireError::protocol(format!("expected RESULT, got {:?}", frame.opcode)));
        }
        let offset = body_offset(&frame)?;
        Ok((frame, offset))
    }
}

/// Length of the optional tracing id, custom payload and warnings prefix.
fn body_offset(frame: &Frame) -> Result<usize, WireError> {
    let mut r = BodyReader::new(&frame.body);
    if frame.flags & FLAG_TRACING != 0 {
        r.skip(16)?;
    }
    if frame.flags & FLAG_WARNING != 0 {
        for warning in r.string_list()? {
            tracing::warn!(warning = %warning, "Server warning");
        }
    }
    if frame.flags & FLAG_CUSTOM_PAYLOAD != 0 {
        r.skip_bytes_map()?;
    }
    Ok(frame.body.len() - r.remaining().len())
}

fn parse_error(frame: &Frame) -> Result<WireError, WireError> {
    let offset = body_offset(frame)?;
    let mut r = BodyReader::new(&frame.body[offset..]);
    let code = r.int()?;
    let message = r.string()?;
    Ok(WireError::new(error_kind(code), message))
}

/// Map a server error code to its failure class.
#[must_use]
pub fn error_kind(code: i32) -> WireErrorKind {
    match code {
        0x0000 | 0x000A => WireErrorKind::Application,
        0x0100 => WireErrorKind::Authentication,
        0x1000 | 0x1001 | 0x1002 => WireErrorKind::Unavailable,
        0x1100 | 0x1200 => WireErrorKind::TimedOut,
        0x2000 | 0x2200 | 0x2300 => WireErrorKind::InvalidRequest,
        0x2100 => WireErrorKind::Authorization,
        0x2400 => WireErrorKind::AlreadyExists,
        0x2500 => WireErrorKind::Unprepared,
        other => WireErrorKind::Other(u16::try_from(other).unwrap_or(u16::MAX)),
    }
}

fn parse_rows(r: &mut BodyReader<'_>) -> Result<Vec<Row>, WireError> {
    let flags = r.int()?;
    let column_count = usize::try_from(r.int()?)
        .map_err(|_| WireError::protocol("negative column count"))?;
    if flags & ROWS_HAS_MORE_PAGES != 0 {
        r.bytes()?;
    }
    if flags & ROWS_NO_METADATA != 0 {
        return Err(WireError::protocol("rows without metadata were not requested"));
    }
    let global = flags & ROWS_GLOBAL_SPEC != 0;
    if global {
        r.string()?;
        r.string()?;
    }
    let mut names = Vec::with_capacity(column_count);
    for _ in 0..column_count {
        if !global {
            r.string()?;
            r.string()?;
        }
        names.push(r.string()?);
        r.skip_type()?;
    }
    let row_count = usize::try_from(r.int()?).map_err(|_| WireError::protocol("negative row count"))?;
    let mut rows = Vec::with_capacity(row_count);
    for _ in 0..row_count {
        let mut row = Vec::with_capacity(column_count);
        for name in &names {
            row.push((name.clone(), r.bytes()?));
        }
        rows.push(row);
    }
    Ok(rows)
}

fn parse_result(body: &[u8]) -> Result<QueryResult, WireError> {
    let mut r = BodyReader::new(body);
    match r.int()? {
        RESULT_VOID => Ok(QueryResult::Void),
        RESULT_ROWS => Ok(QueryResult::Rows(parse_rows(&mut r)?)),
        RESULT_SET_KEYSPACE => Ok(QueryResult::SetKeyspace(r.string()?)),
        RESULT_SCHEMA_CHANGE => Ok(QueryResult::SchemaChange {
            change: r.string()?,
            target: r.string()?,
            keyspace: r.string()?,
        }),
        other => Err(WireError::protocol(format!("unexpected result kind {other}"))),
    }
}

impl Transport for NativeTransport {
    fn prepare(&mut self, query: &str) -> Result<PreparedHandle, WireError> {
        let mut body = BodyWriter::new();
        body.long_string(query)?;
        let (frame, offset) = self.result(Opcode::Prepare, &body.into_inner())?;
        let mut r = BodyReader::new(&frame.body[offset..]);
        let kind = r.int()?;
        if kind != RESULT_PREPARED {
            return Err(WireError::protocol(format!("expected prepared result, got kind {kind}")));
        }
        Ok(PreparedHandle {
            id: r.short_bytes()?,
        })
    }

    fn execute(
        &mut self,
        handle: &PreparedHandle,
        params: &[Option<Vec<u8>>],
        consistency: Consistency,
    ) -> Result<QueryResult, WireError> {
        let count = u16::try_from(params.len())
            .map_err(|_| WireError::new(WireErrorKind::InvalidRequest, "too many bind values"))?;
        let mut body = BodyWriter::new();
        body.short_bytes(&handle.id)?;
        body.short(consistency.code());
        body.byte(QUERY_FLAG_VALUES);
        body.short(count);
        for p in params {
            body.bytes(p.as_deref())?;
        }
        let (frame, offset) = self.result(Opcode::Execute, &body.into_inner())?;
        parse_result(&frame.body[offset..])
    }

    fn use_keyspace(&mut self, keyspace: &str) -> Result<(), WireError> {
        let query = format!("USE \"{}\"", keyspace.replace('"', "\"\""));
        let mut body = BodyWriter::new();
        body.long_string(&query)?;
        body.short(Consistency::One.code());
        body.byte(0);
        let (frame, offset) = self.result(Opcode::Query, &body.into_inner())?;
        parse_result(&frame.body[offset..]).map(|_| ())
    }

    fn close(&mut self) {
        let _ = self.stream.shutdown(std::net::Shutdown::Both);
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::transport::frame::VERSION_RESPONSE;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::time::Duration;

    fn response(stream: i16, opcode: Opcode, flags: u8, body: &[u8]) -> Vec<u8> {
        let mut out = vec![VERSION_RESPONSE, flags];
        out.extend_from_slice(&stream.to_be_bytes());
        out.push(opcode as u8);
        out.extend_from_slice(&i32::try_from(body.len()).unwrap().to_be_bytes());
        out.extend_from_slice(body);
        out
    }

    /// Read a request, return (stream, opcode byte, body).
    fn read_request(s: &mut TcpStream) -> (i16, u8, Vec<u8>) {
        let mut header = [0u8; 9];
        s.read_exact(&mut header).unwrap();
        assert_eq!(header[0], 0x04);
        let len = usize::try_from(i32::from_be_bytes([header[5], header[6], header[7], header[8]])).unwrap();
        let mut body = vec![0u8; len];
        s.read_exact(&mut body).unwrap();
        (i16::from_be_bytes([header[2], header[3]]), header[4], body)
    }

    fn rows_body() -> Vec<u8> {
        let mut w = BodyWriter::new();
        w.int(RESULT_ROWS).int(ROWS_GLOBAL_SPEC).int(2);
        w.string("ks").unwrap();
        w.string("users").unwrap();
        w.string("id").unwrap();
        w.short(0x0009);
        w.string("name").unwrap();
        w.short(0x000D);
        w.int(1);
        w.bytes(Some(&7i32.to_be_bytes())).unwrap();
        w.bytes(None).unwrap();
        w.into_inner()
    }

    fn spawn_peer<F>(script: F) -> u16
    where
        F: FnOnce(TcpStream) + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        std::thread::spawn(move || {
            let (s, _) = listener.accept().unwrap();
            script(s);
        });
        port
    }

    fn timeouts() -> Timeouts {
        Timeouts {
            connect: Duration::from_secs(2),
            send: Duration::from_secs(2),
            receive: Duration::from_secs(2),
        }
    }

    #[test]
    fn startup_prepare_execute_against_peer() {
        let port = spawn_peer(|mut s| {
            let (id, op, _) = read_request(&mut s);
            assert_eq!(op, Opcode::Startup as u8);
            s.write_all(&response(id, Opcode::Ready, 0, &[])).unwrap();

            let (id, op, body) = read_request(&mut s);
            assert_eq!(op, Opcode::Prepare as u8);
            let mut r = BodyReader::new(&body);
            assert_eq!(r.long_string().unwrap(), "SELECT * FROM \"users\" WHERE \"id\" = ?");
            let mut w = BodyWriter::new();
            w.int(RESULT_PREPARED);
            w.short_bytes(&[0xAB, 0xCD]).unwrap();
            s.write_all(&response(id, Opcode::Result, 0, &w.into_inner())).unwrap();

            let (id, op, body) = read_request(&mut s);
            assert_eq!(op, Opcode::Execute as u8);
            let mut r = BodyReader::new(&body);
            assert_eq!(r.short_bytes().unwrap(), vec![0xAB, 0xCD]);
            assert_eq!(r.short().unwrap(), Consistency::Quorum.code());
            assert_eq!(r.byte().unwrap(), QUERY_FLAG_VALUES);
            assert_eq!(r.short().unwrap(), 1);
            assert_eq!(r.bytes().unwrap(), Some(7i32.to_be_bytes().to_vec()));

            // Warning flag set: a string list precedes the result.
            let mut w = BodyWriter::new();
            w.short(1);
            w.string("read 1 tombstone").unwrap();
            let mut body = w.into_inner();
            body.extend_from_slice(&rows_body());
            s.write_all(&response(id, Opcode::Result, FLAG_WARNING, &body)).unwrap();
        });

        let mut t = NativeConnector.open("127.0.0.1", port, &timeouts(), None).unwrap();
        let h = t.prepare("SELECT * FROM \"users\" WHERE \"id\" = ?").unwrap();
        assert_eq!(h.id, vec![0xAB, 0xCD]);
        let res = t
            .execute(&h, &[Some(7i32.to_be_bytes().to_vec())], Consistency::Quorum)
            .unwrap();
        let rows = res.into_rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0][0], ("id".to_owned(), Some(7i32.to_be_bytes().to_vec())));
        assert_eq!(rows[0][1], ("name".to_owned(), None));
        t.close();
    }

    #[test]
    fn password_authenticator_exchange() {
        let port = spawn_peer(|mut s| {
            let (id, _, _) = read_request(&mut s);
            let mut w = BodyWriter::new();
            w.string("org.apache.cassandra.auth.PasswordAuthenticator").unwrap();
            s.write_all(&response(id, Opcode::Authenticate, 0, &w.into_inner())).unwrap();

            let (id, op, body) = read_request(&mut s);
            assert_eq!(op, Opcode::AuthResponse as u8);
            let mut r = BodyReader::new(&body);
            assert_eq!(r.bytes().unwrap(), Some(b"\0app\0secret".to_vec()));
            let mut w = BodyWriter::new();
            w.bytes(None).unwrap();
            s.write_all(&response(id, Opcode::AuthSuccess, 0, &w.into_inner())).unwrap();
        });
        let creds = Credentials {
            username: "app".to_owned(),
            password: "secret".to_owned(),
        };
        assert!(NativeConnector.open("127.0.0.1", port, &timeouts(), Some(&creds)).is_ok());
    }

    #[test]
    fn server_error_frame_maps_to_kind() {
        let port = spawn_peer(|mut s| {
            let (id, _, _) = read_request(&mut s);
            s.write_all(&response(id, Opcode::Ready, 0, &[])).unwrap();
            let (id, _, _) = read_request(&mut s);
            let mut w = BodyWriter::new();
            w.int(0x2200);
            w.string("unconfigured table users").unwrap();
            s.write_all(&response(id, Opcode::Error, 0, &w.into_inner())).unwrap();
        });
        let mut t = NativeConnector.open("127.0.0.1", port, &timeouts(), None).unwrap();
        let err = t.prepare("SELECT * FROM \"users\"").unwrap_err();
        assert_eq!(err.kind, WireErrorKind::InvalidRequest);
        assert_eq!(err.message, "unconfigured table users");
    }

    #[test]
    fn authentication_required_without_credentials() {
        let port = spawn_peer(|mut s| {
            let (id, _, _) = read_request(&mut s);
            let mut w = BodyWriter::new();
            w.string("PasswordAuthenticator").unwrap();
            s.write_all(&response(id, Opcode::Authenticate, 0, &w.into_inner())).unwrap();
        });
        let err = NativeConnector.open("127.0.0.1", port, &timeouts(), None).err().unwrap();
        assert_eq!(err.kind, WireErrorKind::Authentication);
    }

    #[test]
    fn refused_connection_is_io() {
        let port = {
            let l = TcpListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap().port()
        };
        let err = NativeConnector.open("127.0.0.1", port, &timeouts(), None).err().unwrap();
        assert!(matches!(err.kind, WireErrorKind::Io | WireErrorKind::TimedOut));
    }

    #[test]
    fn error_codes() {
        assert_eq!(error_kind(0x1001), WireErrorKind::Unavailable);
        assert_eq!(error_kind(0x1200), WireErrorKind::TimedOut);
        assert_eq!(error_kind(0x2000), WireErrorKind::InvalidRequest);
        assert_eq!(error_kind(0x2400), WireErrorKind::AlreadyExists);
        assert_eq!(error_kind(0x2500), WireErrorKind::Unprepared);
        assert_eq!(error_kind(0x1300), WireErrorKind::Other(0x1300));
    }
}
