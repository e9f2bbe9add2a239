#![allow(clippy::unwrap_used, clippy::expect_used)]
#![allow(dead_code, clippy::must_use_candidate, clippy::too_many_lines)]
//! In-memory cluster behind the `Connector`/`Transport` seam.
//!
//! Interprets the CQL shapes the mapper emits, keeps rows as raw cells, and
//! records every open/prepare/execute so tests can assert on traffic.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;

use cassmap_db::codec::{pack_i64, unpack_i64};
use cassmap_db::transport::{
    Connector, Credentials, PreparedHandle, QueryResult, Row, Timeouts, Transport, WireError,
    WireErrorKind,
};
use cassmap_db::metadata::{EntityDefinition, FieldDefinition};
use cassmap_db::{ColumnType, Connection, ConnectionSettings, Consistency, EntityMetadata};
use parking_lot::Mutex;

/// `users`: text id, indexed email, int age, auto timestamps.
pub fn users() -> Arc<EntityMetadata> {
    Arc::new(
        EntityMetadata::new(
            "User",
            EntityDefinition::new("users")
                .field("id", ColumnType::Varchar)
                .field_def(FieldDefinition::new("email", ColumnType::Varchar).indexed())
                .field("age", ColumnType::Int)
                .field("displayName", ColumnType::Varchar)
                .field("created_at", ColumnType::Timestamp)
                .field("updated_at", ColumnType::Timestamp)
                .timestamps(),
        )
        .unwrap(),
    )
}

/// `events`: partitioned by tenant, clustered by bigint sequence.
pub fn events() -> Arc<EntityMetadata> {
    Arc::new(
        EntityMetadata::new(
            "Event",
            EntityDefinition::new("events")
                .field("tenant", ColumnType::Varchar)
                .field("seq", ColumnType::BigInt)
                .field("kind", ColumnType::Varchar)
                .field("payload", ColumnType::Blob)
                .partition_key(["tenant"])
                .clustering_key(["seq"]),
        )
        .unwrap(),
    )
}

/// `page_views`: counter table keyed by page id.
pub fn page_views() -> Arc<EntityMetadata> {
    Arc::new(
        EntityMetadata::new(
            "PageViews",
            EntityDefinition::new("page_views")
                .field("id", ColumnType::Varchar)
                .field("views", ColumnType::Counter)
                .field("likes", ColumnType::Counter),
        )
        .unwrap(),
    )
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Open(String),
    UseKeyspace { host: String, keyspace: String },
    Prepare { host: String, query: String },
    Execute { host: String, query: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Prepare,
    Execute,
}

type Cells = BTreeMap<String, Option<Vec<u8>>>;

#[derive(Debug, Default)]
struct Table {
    columns: Vec<(String, String)>,
    partition: Vec<String>,
    clustering: Vec<String>,
    rows: Vec<Cells>,
}

impl Table {
    fn key_columns(&self) -> impl Iterator<Item = &String> {
        self.partition.iter().chain(&self.clustering)
    }

    fn column_type(&self, column: &str) -> Option<&str> {
        self.columns
            .iter()
            .find(|(c, _)| c == column)
            .map(|(_, t)| t.as_str())
    }

    fn find_row(&mut self, key: &Cells) -> Option<&mut Cells> {
        let key_columns: Vec<String> = self.key_columns().cloned().collect();
        self.rows
            .iter_mut()
            .find(|row| key_columns.iter().all(|c| row.get(c) == key.get(c)))
    }

    fn to_row(&self, cells: &Cells) -> Row {
        self.columns
            .iter()
            .map(|(c, _)| (c.clone(), cells.get(c).cloned().flatten()))
            .collect()
    }
}

#[derive(Debug, Default)]
struct State {
    keyspaces: BTreeSet<String>,
    tables: BTreeMap<String, Table>,
    indexes: BTreeMap<String, (String, String)>,
    down: BTreeSet<String>,
    failures: VecDeque<(Stage, WireError)>,
    prepared: BTreeMap<Vec<u8>, (String, String)>,
    next_id: u32,
    events: Vec<Event>,
    require_password: Option<(String, String)>,
}

/// Shared handle; clones see the same cluster.
#[derive(Clone, Default)]
pub struct FakeCluster {
    state: Arc<Mutex<State>>,
}

impl FakeCluster {
    pub fn new() -> Self {
        let cluster = Self::default();
        cluster.state.lock().keyspaces.insert("app".to_owned());
        cluster
    }

    pub fn connector(&self) -> Arc<dyn Connector> {
        Arc::new(self.clone())
    }

    pub fn settings(hosts: &[&str]) -> ConnectionSettings {
        ConnectionSettings {
            hosts: hosts.iter().map(|h| (*h).to_owned()).collect(),
            keyspace: Some("app".to_owned()),
            ..ConnectionSettings::default()
        }
    }

    pub fn connection(&self, hosts: &[&str]) -> Connection {
        Connection::new(Self::settings(hosts), self.connector())
    }

    pub fn set_down(&self, host: &str, down: bool) {
        let mut st = self.state.lock();
        if down {
            st.down.insert(host.to_owned());
        } else {
            st.down.remove(host);
        }
    }

    pub fn add_keyspace(&self, keyspace: &str) {
        self.state.lock().keyspaces.insert(keyspace.to_owned());
    }

    pub fn require_password(&self, username: &str, password: &str) {
        self.state.lock().require_password = Some((username.to_owned(), password.to_owned()));
    }

    /// Queue a failure for the next prepare or execute on any host.
    pub fn fail_next(&self, stage: Stage, kind: WireErrorKind, message: &str) {
        self.state
            .lock()
            .failures
            .push_back((stage, WireError::new(kind, message)));
    }

    /// Server-side prepared statements are lost, as after a node restart.
    pub fn forget_prepared(&self) {
        self.state.lock().prepared.clear();
    }

    pub fn drop_table(&self, table: &str) {
        self.state.lock().tables.remove(table);
    }

    pub fn has_table(&self, table: &str) -> bool {
        self.state.lock().tables.contains_key(table)
    }

    pub fn indexes(&self) -> Vec<String> {
        self.state.lock().indexes.keys().cloned().collect()
    }

    pub fn row_count(&self, table: &str) -> usize {
        self.state.lock().tables.get(table).map_or(0, |t| t.rows.len())
    }

    pub fn events(&self) -> Vec<Event> {
        self.state.lock().events.clone()
    }

    pub fn clear_events(&self) {
        self.state.lock().events.clear();
    }

    pub fn opens(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Open(h) => Some(h),
                _ => None,
            })
            .collect()
    }

    pub fn prepares(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Prepare { query, .. } => Some(query),
                _ => None,
            })
            .collect()
    }

    pub fn executed(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Execute { query, .. } => Some(query),
                _ => None,
            })
            .collect()
    }
}

impl Connector for FakeCluster {
    fn open(
        &self,
        host: &str,
        _port: u16,
        _timeouts: &Timeouts,
        credentials: Option<&Credentials>,
    ) -> Result<Box<dyn Transport>, WireError> {
        let mut st = self.state.lock();
        st.events.push(Event::Open(host.to_owned()));
        if st.down.contains(host) {
            return Err(WireError::new(WireErrorKind::Io, format!("{host}: connection refused")));
        }
        if let Some((user, pass)) = &st.require_password {
            let ok = credentials.is_some_and(|c| &c.username == user && &c.password == pass);
            if !ok {
                return Err(WireError::new(
                    WireErrorKind::Authentication,
                    "Provided username and/or password are incorrect",
                ));
            }
        }
        Ok(Box::new(FakeTransport {
            host: host.to_owned(),
            state: self.state.clone(),
            open: true,
        }))
    }
}

struct FakeTransport {
    host: String,
    state: Arc<Mutex<State>>,
    open: bool,
}

fn take_failure(st: &mut State, stage: Stage) -> Option<WireError> {
    let pos = st.failures.iter().position(|(s, _)| *s == stage)?;
    st.failures.remove(pos).map(|(_, e)| e)
}

impl Transport for FakeTransport {
    fn prepare(&mut self, query: &str) -> Result<PreparedHandle, WireError> {
        let mut st = self.state.lock();
        st.events.push(Event::Prepare {
            host: self.host.clone(),
            query: query.to_owned(),
        });
        if !self.open || st.down.contains(&self.host) {
            return Err(WireError::new(WireErrorKind::Io, "broken pipe"));
        }
        if let Some(e) = take_failure(&mut st, Stage::Prepare) {
            return Err(e);
        }
        let parsed = parse(query)?;
        if let Some(table) = parsed.table_in_use() {
            if !st.tables.contains_key(table) {
                return Err(WireError::new(
                    WireErrorKind::InvalidRequest,
                    format!("unconfigured table {table}"),
                ));
            }
        }
        st.next_id += 1;
        let id = st.next_id.to_be_bytes().to_vec();
        st.prepared.insert(id.clone(), (self.host.clone(), query.to_owned()));
        Ok(PreparedHandle { id })
    }

    fn execute(
        &mut self,
        handle: &PreparedHandle,
        params: &[Option<Vec<u8>>],
        _consistency: Consistency,
    ) -> Result<QueryResult, WireError> {
        let mut st = self.state.lock();
        let query = match st.prepared.get(&handle.id) {
            Some((host, q)) if *host == self.host => q.clone(),
            _ => {
                st.events.push(Event::Execute {
                    host: self.host.clone(),
                    query: String::new(),
                });
                return Err(WireError::new(WireErrorKind::Unprepared, "Prepared query not found"));
            }
        };
        st.events.push(Event::Execute {
            host: self.host.clone(),
            query: query.clone(),
        });
        if !self.open || st.down.contains(&self.host) {
            return Err(WireError::new(WireErrorKind::Io, "broken pipe"));
        }
        if let Some(e) = take_failure(&mut st, Stage::Execute) {
            return Err(e);
        }
        let parsed = parse(&query)?;
        run(&mut st, parsed, params)
    }

    fn use_keyspace(&mut self, keyspace: &str) -> Result<(), WireError> {
        let mut st = self.state.lock();
        st.events.push(Event::UseKeyspace {
            host: self.host.clone(),
            keyspace: keyspace.to_owned(),
        });
        if st.keyspaces.contains(keyspace) {
            Ok(())
        } else {
            Err(WireError::new(
                WireErrorKind::InvalidRequest,
                format!("Keyspace '{keyspace}' does not exist"),
            ))
        }
    }

    fn close(&mut self) {
        self.open = false;
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Ident(String),
    Word(String),
    Sym(char),
}

fn tokenize(cql: &str) -> Vec<Tok> {
    let mut out = Vec::new();
    let mut chars = cql.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            c if c.is_whitespace() => {}
            '"' => {
                let mut ident = String::new();
                while let Some(c) = chars.next() {
                    if c == '"' {
                        if chars.peek() == Some(&'"') {
                            chars.next();
                            ident.push('"');
                        } else {
                            break;
                        }
                    } else {
                        ident.push(c);
                    }
                }
                out.push(Tok::Ident(ident));
            }
            c if c.is_alphanumeric() || c == '_' || c == '.' => {
                let mut word = c.to_string();
                while let Some(&n) = chars.peek() {
                    if n.is_alphanumeric() || n == '_' || n == '.' {
                        word.push(n);
                        chars.next();
                    } else {
                        break;
                    }
                }
                out.push(Tok::Word(word));
            }
            c => out.push(Tok::Sym(c)),
        }
    }
    out
}

struct Parser {
    toks: Vec<Tok>,
    pos: usize,
}

impl Parser {
    fn peek_word(&self, w: &str) -> bool {
        matches!(self.toks.get(self.pos), Some(Tok::Word(x)) if x.eq_ignore_ascii_case(w))
    }

    fn word(&mut self, w: &str) -> bool {
        let hit = self.peek_word(w);
        if hit {
            self.pos += 1;
        }
        hit
    }

    fn sym(&mut self, c: char) -> bool {
        let hit = self.toks.get(self.pos) == Some(&Tok::Sym(c));
        if hit {
            self.pos += 1;
        }
        hit
    }

    fn ident(&mut self) -> String {
        let name = match self.toks.get(self.pos) {
            Some(Tok::Ident(s) | Tok::Word(s)) => s.clone(),
            other => panic!("expected identifier, got {other:?}"),
        };
        self.pos += 1;
        name
    }

    fn ident_list(&mut self) -> Vec<String> {
        assert!(self.sym('('));
        let mut out = vec![self.ident()];
        while self.sym(',') {
            out.push(self.ident());
        }
        assert!(self.sym(')'));
        out
    }

    fn conditions(&mut self) -> Vec<Cond> {
        let mut conds = Vec::new();
        if !self.word("WHERE") {
            return conds;
        }
        loop {
            let column = self.ident();
            if self.sym('=') {
                assert!(self.sym('?'));
                conds.push(Cond::Eq(column));
            } else {
                assert!(self.word("IN"));
                assert!(self.sym('('));
                let mut n = 0;
                while self.sym('?') {
                    n += 1;
                    self.sym(',');
                }
                assert!(self.sym(')'));
                conds.push(Cond::In(column, n));
            }
            if !self.word("AND") {
                break;
            }
        }
        conds
    }
}

#[derive(Debug)]
enum Cond {
    Eq(String),
    In(String, usize),
}

#[derive(Debug)]
enum Cql {
    SystemLocal,
    SystemKeyspaces,
    Select {
        table: String,
        conds: Vec<Cond>,
        order: Option<(String, bool)>,
        limit: Option<usize>,
    },
    Insert {
        table: String,
        columns: Vec<String>,
    },
    CounterUpdate {
        table: String,
        column: String,
        subtract: bool,
        conds: Vec<Cond>,
    },
    Delete {
        table: String,
        conds: Vec<Cond>,
    },
    CreateTable {
        table: String,
        columns: Vec<(String, String)>,
        partition: Vec<String>,
        clustering: Vec<String>,
    },
    CreateIndex {
        name: String,
        table: String,
        column: String,
    },
}

impl Cql {
    fn table_in_use(&self) -> Option<&str> {
        match self {
            Self::Select { table, .. }
            | Self::Insert { table, .. }
            | Self::CounterUpdate { table, .. }
            | Self::Delete { table, .. } => Some(table),
            _ => None,
        }
    }
}

fn parse(cql: &str) -> Result<Cql, WireError> {
    if cql.contains("system.local") {
        return Ok(Cql::SystemLocal);
    }
    if cql.contains("system_schema.keyspaces") {
        return Ok(Cql::SystemKeyspaces);
    }
    let mut p = Parser {
        toks: tokenize(cql),
        pos: 0,
    };
    if p.word("SELECT") {
        assert!(p.sym('*'));
        assert!(p.word("FROM"));
        let table = p.ident();
        let conds = p.conditions();
        let mut order = None;
        if p.word("ORDER") {
            assert!(p.word("BY"));
            let column = p.ident();
            let desc = p.word("DESC");
            p.word("ASC");
            order = Some((column, desc));
        }
        let mut limit = None;
        if p.word("LIMIT") {
            limit = Some(p.ident().parse().unwrap());
        }
        p.word("ALLOW");
        p.word("FILTERING");
        return Ok(Cql::Select {
            table,
            conds,
            order,
            limit,
        });
    }
    if p.word("INSERT") {
        assert!(p.word("INTO"));
        let table = p.ident();
        let columns = p.ident_list();
        return Ok(Cql::Insert { table, columns });
    }
    if p.word("UPDATE") {
        let table = p.ident();
        assert!(p.word("SET"));
        let column = p.ident();
        assert!(p.sym('='));
        assert_eq!(p.ident(), column);
        let subtract = if p.sym('-') {
            true
        } else {
            assert!(p.sym('+'));
            false
        };
        assert!(p.sym('?'));
        let conds = p.conditions();
        return Ok(Cql::CounterUpdate {
            table,
            column,
            subtract,
            conds,
        });
    }
    if p.word("DELETE") {
        assert!(p.word("FROM"));
        let table = p.ident();
        let conds = p.conditions();
        return Ok(Cql::Delete { table, conds });
    }
    if p.word("CREATE") {
        if p.word("TABLE") {
            assert!(p.word("IF") && p.word("NOT") && p.word("EXISTS"));
            let table = p.ident();
            assert!(p.sym('('));
            let mut columns = Vec::new();
            let mut partition = Vec::new();
            let mut clustering = Vec::new();
            loop {
                if p.word("PRIMARY") {
                    assert!(p.word("KEY"));
                    assert!(p.sym('('));
                    partition = p.ident_list();
                    while p.sym(',') {
                        clustering.push(p.ident());
                    }
                    assert!(p.sym(')'));
                } else {
                    let column = p.ident();
                    let ty = p.ident();
                    p.word("static");
                    columns.push((column, ty));
                }
                if !p.sym(',') {
                    break;
                }
            }
            return Ok(Cql::CreateTable {
                table,
                columns,
                partition,
                clustering,
            });
        }
        if p.word("INDEX") {
            let name = p.ident();
            assert!(p.word("ON"));
            let table = p.ident();
            let column = p.ident_list().remove(0);
            return Ok(Cql::CreateIndex {
                name,
                table,
                column,
            });
        }
    }
    Err(WireError::new(
        WireErrorKind::InvalidRequest,
        format!("line 1:0 no viable alternative at input '{cql}'"),
    ))
}

fn text(s: &str) -> Option<Vec<u8>> {
    Some(s.as_bytes().to_vec())
}

fn bind(conds: &[Cond], params: &mut impl Iterator<Item = Option<Vec<u8>>>) -> Vec<(String, Vec<Option<Vec<u8>>>)> {
    conds
        .iter()
        .map(|c| match c {
            Cond::Eq(col) => (col.clone(), vec![params.next().unwrap()]),
            Cond::In(col, n) => (col.clone(), (0..*n).map(|_| params.next().unwrap()).collect()),
        })
        .collect()
}

fn matches(row: &Cells, bound: &[(String, Vec<Option<Vec<u8>>>)]) -> bool {
    bound
        .iter()
        .all(|(col, accepted)| accepted.contains(&row.get(col).cloned().flatten()))
}

fn is_integral(ty: &str) -> bool {
    matches!(ty, "bigint" | "counter" | "timestamp")
}

fn run(st: &mut State, cql: Cql, params: &[Option<Vec<u8>>]) -> Result<QueryResult, WireError> {
    let mut params = params.iter().cloned();
    match cql {
        Cql::SystemLocal => Ok(QueryResult::Rows(vec![vec![
            ("cluster_name".to_owned(), text("Fake Cluster")),
            ("release_version".to_owned(), text("4.1.3")),
            (
                "partitioner".to_owned(),
                text("org.apache.cassandra.dht.Murmur3Partitioner"),
            ),
        ]])),
        Cql::SystemKeyspaces => Ok(QueryResult::Rows(
            st.keyspaces
                .iter()
                .rev()
                .map(|k| vec![("keyspace_name".to_owned(), text(k))])
                .collect(),
        )),
        Cql::Select {
            table,
            conds,
            order,
            limit,
        } => {
            let t = &st.tables[&table];
            let bound = bind(&conds, &mut params);
            let mut rows: Vec<&Cells> = t.rows.iter().filter(|r| matches(r, &bound)).collect();
            if let Some((column, desc)) = order {
                let integral = t.column_type(&column).is_some_and(is_integral);
                rows.sort_by(|a, b| {
                    let (a, b) = (a.get(&column).cloned().flatten(), b.get(&column).cloned().flatten());
                    if integral {
                        let decode = |v: Option<Vec<u8>>| v.map(|b| unpack_i64(b.try_into().unwrap()));
                        decode(a).cmp(&decode(b))
                    } else {
                        a.cmp(&b)
                    }
                });
                if desc {
                    rows.reverse();
                }
            }
            if let Some(limit) = limit {
                rows.truncate(limit);
            }
            Ok(QueryResult::Rows(rows.into_iter().map(|r| t.to_row(r)).collect()))
        }
        Cql::Insert { table, columns } => {
            let t = st.tables.get_mut(&table).unwrap();
            let cells: Cells = columns.into_iter().map(|c| (c, params.next().unwrap())).collect();
            if let Some(row) = t.find_row(&cells) {
                row.extend(cells);
            } else {
                t.rows.push(cells);
            }
            Ok(QueryResult::Void)
        }
        Cql::CounterUpdate {
            table,
            column,
            subtract,
            conds,
        } => {
            let amount = unpack_i64(params.next().unwrap().unwrap().try_into().unwrap());
            let key: Cells = bind(&conds, &mut params)
                .into_iter()
                .map(|(c, mut v)| (c, v.remove(0)))
                .collect();
            let t = st.tables.get_mut(&table).unwrap();
            if t.find_row(&key).is_none() {
                t.rows.push(key.clone());
            }
            let row = t.find_row(&key).unwrap();
            let current = row
                .get(&column)
                .cloned()
                .flatten()
                .map_or(0, |b| unpack_i64(b.try_into().unwrap()));
            let next = if subtract {
                current.wrapping_sub(amount)
            } else {
                current.wrapping_add(amount)
            };
            row.insert(column, Some(pack_i64(next).to_vec()));
            Ok(QueryResult::Void)
        }
        Cql::Delete { table, conds } => {
            let bound = bind(&conds, &mut params);
            let t = st.tables.get_mut(&table).unwrap();
            t.rows.retain(|r| !matches(r, &bound));
            Ok(QueryResult::Void)
        }
        Cql::CreateTable {
            table,
            columns,
            partition,
            clustering,
        } => {
            if st.tables.contains_key(&table) {
                return Ok(QueryResult::Void);
            }
            st.tables.insert(
                table.clone(),
                Table {
                    columns,
                    partition,
                    clustering,
                    rows: Vec::new(),
                },
            );
            Ok(QueryResult::SchemaChange {
                change: "CREATED".to_owned(),
                target: "TABLE".to_owned(),
                keyspace: "app".to_owned(),
            })
        }
        Cql::CreateIndex {
            name,
            table,
            column,
        } => {
            if st.indexes.contains_key(&name) {
                return Err(WireError::new(
                    WireErrorKind::AlreadyExists,
                    format!("Index {name} already exists"),
                ));
            }
            let Some(t) = st.tables.get(&table) else {
                return Err(WireError::new(
                    WireErrorKind::InvalidRequest,
                    format!("unconfigured table {table}"),
                ));
            };
            if t.column_type(&column).is_none() {
                return Err(WireError::new(
                    WireErrorKind::InvalidRequest,
                    format!("No column definition found for column {column}"),
                ));
            }
            st.indexes.insert(name, (table, column));
            Ok(QueryResult::SchemaChange {
                change: "CREATED".to_owned(),
                target: "TABLE".to_owned(),
                keyspace: "app".to_owned(),
            })
        }
    }
}

/// Captures formatted messages of events at or above `level`.
pub mod logs {
    use std::fmt::Write as _;
    use std::sync::Arc;

    use parking_lot::Mutex;
    use tracing_subscriber::layer::SubscriberExt;

    #[derive(Clone, Default)]
    struct Capture {
        level_max: Option<tracing::Level>,
        lines: Arc<Mutex<Vec<(tracing::Level, String)>>>,
    }

    impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for Capture {
        fn on_event(&self, event: &tracing::Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
            let level = *event.metadata().level();
            if self.level_max.is_some_and(|max| level > max) {
                return;
            }
            let mut visitor = MessageVisitor(String::new());
            event.record(&mut visitor);
            self.lines.lock().push((level, visitor.0));
        }
    }

    /// Message first, then `name=value` pairs.
    struct MessageVisitor(String);

    impl tracing::field::Visit for MessageVisitor {
        fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
            if field.name() == "message" {
                self.0.insert_str(0, &format!("{value:?}"));
            } else {
                let _ = write!(self.0, " {}={value:?}", field.name());
            }
        }
    }

    /// Run `f` under a capturing subscriber; returns its output and the
    /// captured (level, message) pairs.
    pub fn capture<T>(level: tracing::Level, f: impl FnOnce() -> T) -> (T, Vec<(tracing::Level, String)>) {
        let capture = Capture {
            level_max: Some(level),
            ..Capture::default()
        };
        let lines = capture.lines.clone();
        let subscriber = tracing_subscriber::registry().with(capture);
        let out = tracing::subscriber::with_default(subscriber, f);
        let captured = lines.lock().clone();
        (out, captured)
    }
}
