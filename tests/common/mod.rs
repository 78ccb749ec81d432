//! In-memory store speaking the statement dialect the compiler emits.
#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use cfdao::catalog::schema::{TableIdentity, TableSchema, UdtDef};
use cfdao::catalog::types::{ColumnType, CqlValue};
use cfdao::config::EngineConfig;
use cfdao::transport::{
    APPLIED_COLUMN, PreparedStatement, QueryBody, Request, ResultPage, StatementOptions,
    Transport, TransportError, WireStatement,
};
use cfdao::Engine;
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

pub fn rooms() -> TableSchema {
    TableSchema::new(TableIdentity::new("hotel", "rooms"))
        .partition_key("hotel_id", ColumnType::Text)
        .clustering("room", ColumnType::Int)
        .column("beds", ColumnType::Int)
        .column("name", ColumnType::Text)
        .column("tags", ColumnType::Set(Box::new(ColumnType::Text)))
        .column("log", ColumnType::List(Box::new(ColumnType::Text)))
        .column(
            "features",
            ColumnType::Map(Box::new(ColumnType::Text), Box::new(ColumnType::Text)),
        )
}

pub fn rooms_by_name() -> TableSchema {
    TableSchema::new(TableIdentity::new("hotel", "rooms_by_name"))
        .partition_key("name", ColumnType::Text)
        .clustering("hotel_id", ColumnType::Text)
        .clustering("room", ColumnType::Int)
}

pub fn room_stats() -> TableSchema {
    TableSchema::new(TableIdentity::new("hotel", "room_stats"))
        .partition_key("hotel_id", ColumnType::Text)
        .column("bookings", ColumnType::Counter)
}

pub fn phone_numbers() -> TableSchema {
    TableSchema::new(TableIdentity::new("telco", "phone_numbers"))
        .partition_key("number", ColumnType::Text)
        .column("device_id", ColumnType::Text)
        .column("active", ColumnType::Boolean)
}

pub fn hotel_store() -> Arc<MemoryTransport> {
    Arc::new(
        MemoryTransport::new()
            .with_table(rooms())
            .with_table(rooms_by_name())
            .with_table(room_stats())
            .with_table(phone_numbers()),
    )
}

pub fn engine(store: &Arc<MemoryTransport>) -> Engine {
    let transport: Arc<dyn Transport> = store.clone();
    Engine::new(transport, EngineConfig::for_keyspace("hotel")).expect("engine")
}

#[derive(Debug, Clone)]
struct Cell {
    value: CqlValue,
    writetime: i64,
    ttl: Option<i32>,
}

type Row = BTreeMap<String, Cell>;

#[derive(Debug, Clone)]
struct Table {
    schema: TableSchema,
    rows: Vec<Row>,
}

impl Table {
    fn key_columns(&self) -> Vec<String> {
        self.schema
            .primary_key_columns()
            .map(|c| c.name.clone())
            .collect()
    }

    fn find(&self, key: &[(String, CqlValue)]) -> Option<usize> {
        self.rows.iter().position(|row| {
            key.iter()
                .all(|(name, value)| row.get(name).is_some_and(|cell| &cell.value == value))
        })
    }

    fn upsert(&mut self, key: &[(String, CqlValue)], clock: i64) -> usize {
        if let Some(index) = self.find(key) {
            return index;
        }
        let row = key
            .iter()
            .map(|(name, value)| {
                (
                    name.clone(),
                    Cell {
                        value: value.clone(),
                        writetime: clock,
                        ttl: None,
                    },
                )
            })
            .collect();
        self.rows.push(row);
        self.rows.len() - 1
    }
}

#[derive(Debug, Clone, Default)]
struct Store {
    tables: HashMap<TableIdentity, Table>,
    clock: i64,
}

/// Transport backed by an in-memory table store. Batches apply atomically;
/// guarded statements answer with an `[applied]` row.
#[derive(Default)]
pub struct MemoryTransport {
    store: Mutex<Store>,
    udts: Mutex<HashMap<(String, String), UdtDef>>,
    prepared: Mutex<HashSet<Bytes>>,
    failures: Mutex<VecDeque<TransportError>>,
    executed: Mutex<Vec<Request>>,
    prepare_calls: AtomicUsize,
    describe_calls: AtomicUsize,
}

impl MemoryTransport {
    pub fn new() -> Self {
        let transport = Self::default();
        transport.store.lock().clock = 1_700_000_000_000_000;
        transport
    }

    pub fn with_table(self, schema: TableSchema) -> Self {
        self.store.lock().tables.insert(
            schema.identity.clone(),
            Table {
                schema,
                rows: Vec::new(),
            },
        );
        self
    }

    pub fn with_udt(self, udt: UdtDef) -> Self {
        self.udts
            .lock()
            .insert((udt.keyspace.clone(), udt.name.clone()), udt);
        self
    }

    pub fn row_count(&self, keyspace: &str, table: &str) -> usize {
        self.store
            .lock()
            .tables
            .get(&TableIdentity::new(keyspace, table))
            .map_or(0, |t| t.rows.len())
    }

    /// Next execution fails with `error` before touching the store.
    pub fn fail_next(&self, error: TransportError) {
        self.failures.lock().push_back(error);
    }

    /// Drops every prepared statement id, as a restarted node would.
    pub fn forget_prepared(&self) {
        self.prepared.lock().clear();
    }

    pub fn executed(&self) -> Vec<Request> {
        self.executed.lock().clone()
    }

    pub fn executed_texts(&self) -> Vec<String> {
        self.executed
            .lock()
            .iter()
            .flat_map(|request| match request {
                Request::Statement(statement) => vec![statement.body.query_text().to_string()],
                Request::Batch { statements, .. } => statements
                    .iter()
                    .map(|s| s.body.query_text().to_string())
                    .collect(),
            })
            .collect()
    }

    pub fn prepare_calls(&self) -> usize {
        self.prepare_calls.load(AtomicOrdering::SeqCst)
    }

    pub fn describe_calls(&self) -> usize {
        self.describe_calls.load(AtomicOrdering::SeqCst)
    }

    fn check_prepared(&self, statement: &WireStatement) -> Result<(), TransportError> {
        if let QueryBody::Prepared(prepared) = &statement.body
            && !self.prepared.lock().contains(&prepared.id)
        {
            return Err(TransportError::InvalidQuery(format!(
                "unknown prepared statement {}",
                prepared.query
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn execute(
        &self,
        request: &Request,
        options: &StatementOptions,
    ) -> Result<ResultPage, TransportError> {
        self.executed.lock().push(request.clone());
        if let Some(error) = self.failures.lock().pop_front() {
            return Err(error);
        }
        match request {
            Request::Statement(statement) => {
                self.check_prepared(statement)?;
                let mut store = self.store.lock();
                let parsed = parse(statement)?;
                store.clock += 1;
                run(&mut store, parsed, options)
            }
            Request::Batch { statements, .. } => {
                for statement in statements {
                    self.check_prepared(statement)?;
                }
                let mut store = self.store.lock();
                let mut staged = store.clone();
                staged.clock += 1;
                let mut guarded = false;
                for statement in statements {
                    let parsed = parse(statement)?;
                    if matches!(parsed, Statement::Select { .. }) {
                        return Err(TransportError::InvalidQuery(
                            "SELECT is not allowed in a batch".into(),
                        ));
                    }
                    guarded |= parsed.is_guarded();
                    let page = run(&mut staged, parsed, &StatementOptions::default())?;
                    if !page.applied() {
                        return Ok(applied_page(false));
                    }
                }
                *store = staged;
                Ok(if guarded {
                    applied_page(true)
                } else {
                    ResultPage::default()
                })
            }
        }
    }

    async fn prepare(&self, query: &str) -> Result<PreparedStatement, TransportError> {
        let n = self.prepare_calls.fetch_add(1, AtomicOrdering::SeqCst);
        let id = Bytes::from((n as u64).to_be_bytes().to_vec());
        self.prepared.lock().insert(id.clone());
        Ok(PreparedStatement {
            id,
            query: Arc::from(query),
        })
    }

    async fn describe_table(
        &self,
        table: &TableIdentity,
    ) -> Result<Option<TableSchema>, TransportError> {
        self.describe_calls.fetch_add(1, AtomicOrdering::SeqCst);
        Ok(self
            .store
            .lock()
            .tables
            .get(table)
            .map(|t| t.schema.clone()))
    }

    async fn describe_type(
        &self,
        keyspace: &str,
        name: &str,
    ) -> Result<Option<UdtDef>, TransportError> {
        Ok(self
            .udts
            .lock()
            .get(&(keyspace.to_string(), name.to_string()))
            .cloned())
    }
}

fn applied_page(applied: bool) -> ResultPage {
    ResultPage {
        columns: vec![APPLIED_COLUMN.to_string()],
        rows: vec![vec![CqlValue::Boolean(applied)]],
        ..ResultPage::default()
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Ident(String),
    Marker,
    Str(String),
    Num(i64),
    Sym(String),
}

fn tokenize(text: &str) -> Result<Vec<Tok>, TransportError> {
    let chars: Vec<char> = text.chars().collect();
    let mut toks = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
        } else if c == '?' {
            toks.push(Tok::Marker);
            i += 1;
        } else if c == '\'' || c == '"' {
            let mut s = String::new();
            i += 1;
            loop {
                match chars.get(i) {
                    Some(&q) if q == c && chars.get(i + 1) == Some(&c) => {
                        s.push(c);
                        i += 2;
                    }
                    Some(&q) if q == c => {
                        i += 1;
                        break;
                    }
                    Some(&other) => {
                        s.push(other);
                        i += 1;
                    }
                    None => return Err(syntax(text)),
                }
            }
            toks.push(if c == '\'' { Tok::Str(s) } else { Tok::Ident(s) });
        } else if c.is_ascii_digit() {
            let start = i;
            while i < chars.len() && chars[i].is_ascii_digit() {
                i += 1;
            }
            let digits: String = chars[start..i].iter().collect();
            toks.push(Tok::Num(digits.parse().map_err(|_| syntax(text))?));
        } else if c.is_alphanumeric() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            toks.push(Tok::Ident(chars[start..i].iter().collect()));
        } else if matches!(c, '<' | '>' | '!') && chars.get(i + 1) == Some(&'=') {
            toks.push(Tok::Sym(format!("{c}=")));
            i += 2;
        } else {
            toks.push(Tok::Sym(c.to_string()));
            i += 1;
        }
    }
    Ok(toks)
}

fn syntax(text: &str) -> TransportError {
    TransportError::InvalidQuery(format!("unsupported statement: {text}"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
    In,
}

#[derive(Debug, Clone)]
struct Rel {
    column: String,
    op: Op,
    values: Vec<CqlValue>,
}

#[derive(Debug, Clone)]
enum Cond {
    None,
    IfExists,
    IfNotExists,
    If(Vec<Rel>),
}

#[derive(Debug, Clone)]
enum Assign {
    Set(String, CqlValue),
    Add(String, CqlValue),
    Remove(String, CqlValue),
    Prepend(String, CqlValue),
}

#[derive(Debug, Clone)]
enum Proj {
    Column(String),
    WriteTime(String),
    Ttl(String),
}

#[derive(Debug, Clone)]
enum Statement {
    Insert {
        table: TableIdentity,
        columns: Vec<(String, CqlValue)>,
        cond: Cond,
        ttl: Option<i32>,
    },
    Update {
        table: TableIdentity,
        ttl: Option<i32>,
        assignments: Vec<Assign>,
        rels: Vec<Rel>,
        cond: Cond,
    },
    Delete {
        table: TableIdentity,
        rels: Vec<Rel>,
        cond: Cond,
    },
    Select {
        table: TableIdentity,
        distinct: bool,
        projection: Option<Vec<Proj>>,
        rels: Vec<Rel>,
        limit: Option<usize>,
    },
}

impl Statement {
    fn is_guarded(&self) -> bool {
        match self {
            Statement::Insert { cond, .. }
            | Statement::Update { cond, .. }
            | Statement::Delete { cond, .. } => !matches!(cond, Cond::None),
            Statement::Select { .. } => false,
        }
    }
}

struct Parser<'a> {
    text: &'a str,
    toks: Vec<Tok>,
    pos: usize,
    values: VecDeque<CqlValue>,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Tok> {
        self.toks.get(self.pos)
    }

    fn next(&mut self) -> Result<Tok, TransportError> {
        let tok = self.toks.get(self.pos).cloned().ok_or_else(|| syntax(self.text))?;
        self.pos += 1;
        Ok(tok)
    }

    fn at_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(Tok::Ident(word)) if word.eq_ignore_ascii_case(keyword))
    }

    fn keyword(&mut self, keyword: &str) -> bool {
        let found = self.at_keyword(keyword);
        if found {
            self.pos += 1;
        }
        found
    }

    fn expect_keyword(&mut self, keyword: &str) -> Result<(), TransportError> {
        if self.keyword(keyword) {
            Ok(())
        } else {
            Err(syntax(self.text))
        }
    }

    fn sym(&mut self, sym: &str) -> bool {
        let found = matches!(self.peek(), Some(Tok::Sym(s)) if s == sym);
        if found {
            self.pos += 1;
        }
        found
    }

    fn expect_sym(&mut self, sym: &str) -> Result<(), TransportError> {
        if self.sym(sym) {
            Ok(())
        } else {
            Err(syntax(self.text))
        }
    }

    fn ident(&mut self) -> Result<String, TransportError> {
        match self.next()? {
            Tok::Ident(name) => Ok(name),
            _ => Err(syntax(self.text)),
        }
    }

    fn table(&mut self) -> Result<TableIdentity, TransportError> {
        let keyspace = self.ident()?;
        self.expect_sym(".")?;
        let table = self.ident()?;
        Ok(TableIdentity::new(&keyspace, &table))
    }

    fn slot(&mut self) -> Result<CqlValue, TransportError> {
        match self.next()? {
            Tok::Marker => self.values.pop_front().ok_or_else(|| syntax(self.text)),
            Tok::Str(s) => Ok(CqlValue::Text(s.as_str().into())),
            Tok::Num(n) => Ok(number(n)),
            Tok::Sym(s) if s == "-" => match self.next()? {
                Tok::Num(n) => Ok(number(-n)),
                _ => Err(syntax(self.text)),
            },
            Tok::Ident(word) if word.eq_ignore_ascii_case("true") => Ok(CqlValue::Boolean(true)),
            Tok::Ident(word) if word.eq_ignore_ascii_case("false") => {
                Ok(CqlValue::Boolean(false))
            }
            Tok::Ident(word) if word.eq_ignore_ascii_case("null") => Ok(CqlValue::Null),
            _ => Err(syntax(self.text)),
        }
    }

    fn ttl(&mut self) -> Result<Option<i32>, TransportError> {
        if !self.keyword("USING") {
            return Ok(None);
        }
        self.expect_keyword("TTL")?;
        match self.slot()? {
            CqlValue::Int(secs) => Ok(Some(secs)),
            _ => Err(syntax(self.text)),
        }
    }

    fn relation(&mut self) -> Result<Rel, TransportError> {
        let column = self.ident()?;
        if self.keyword("IN") {
            self.expect_sym("(")?;
            let mut values = vec![self.slot()?];
            while self.sym(",") {
                values.push(self.slot()?);
            }
            self.expect_sym(")")?;
            return Ok(Rel {
                column,
                op: Op::In,
                values,
            });
        }
        let op = match self.next()? {
            Tok::Sym(s) => match s.as_str() {
                "=" => Op::Eq,
                "!=" => Op::Neq,
                "<" => Op::Lt,
                "<=" => Op::Lte,
                ">" => Op::Gt,
                ">=" => Op::Gte,
                _ => return Err(syntax(self.text)),
            },
            _ => return Err(syntax(self.text)),
        };
        let value = self.slot()?;
        Ok(Rel {
            column,
            op,
            values: vec![value],
        })
    }

    fn relations(&mut self) -> Result<Vec<Rel>, TransportError> {
        let mut rels = vec![self.relation()?];
        while self.keyword("AND") {
            rels.push(self.relation()?);
        }
        Ok(rels)
    }

    fn condition(&mut self) -> Result<Cond, TransportError> {
        if !self.keyword("IF") {
            return Ok(Cond::None);
        }
        if self.keyword("EXISTS") {
            return Ok(Cond::IfExists);
        }
        if self.keyword("NOT") {
            self.expect_keyword("EXISTS")?;
            return Ok(Cond::IfNotExists);
        }
        Ok(Cond::If(self.relations()?))
    }

    fn assignment(&mut self) -> Result<Assign, TransportError> {
        let column = self.ident()?;
        self.expect_sym("=")?;
        let self_reference = matches!(self.peek(), Some(Tok::Ident(name)) if *name == column)
            && matches!(self.toks.get(self.pos + 1), Some(Tok::Sym(s)) if s == "+" || s == "-");
        if self_reference {
            self.pos += 1;
            let add = self.sym("+");
            if !add {
                self.expect_sym("-")?;
            }
            let value = self.slot()?;
            return Ok(if add {
                Assign::Add(column, value)
            } else {
                Assign::Remove(column, value)
            });
        }
        let value = self.slot()?;
        if self.sym("+") {
            let again = self.ident()?;
            if again != column {
                return Err(syntax(self.text));
            }
            return Ok(Assign::Prepend(column, value));
        }
        Ok(Assign::Set(column, value))
    }

    fn projection(&mut self) -> Result<Option<Vec<Proj>>, TransportError> {
        if self.sym("*") {
            return Ok(None);
        }
        let mut columns = Vec::new();
        loop {
            let name = self.ident()?;
            if self.sym("(") {
                let inner = self.ident()?;
                self.expect_sym(")")?;
                if name.eq_ignore_ascii_case("WRITETIME") {
                    columns.push(Proj::WriteTime(inner));
                } else if name.eq_ignore_ascii_case("TTL") {
                    columns.push(Proj::Ttl(inner));
                } else {
                    return Err(syntax(self.text));
                }
            } else {
                columns.push(Proj::Column(name));
            }
            if !self.sym(",") {
                return Ok(Some(columns));
            }
        }
    }

    fn statement(&mut self) -> Result<Statement, TransportError> {
        let statement = if self.keyword("INSERT") {
            self.expect_keyword("INTO")?;
            let table = self.table()?;
            self.expect_sym("(")?;
            let mut names = vec![self.ident()?];
            while self.sym(",") {
                names.push(self.ident()?);
            }
            self.expect_sym(")")?;
            self.expect_keyword("VALUES")?;
            self.expect_sym("(")?;
            let mut values = vec![self.slot()?];
            while self.sym(",") {
                values.push(self.slot()?);
            }
            self.expect_sym(")")?;
            if names.len() != values.len() {
                return Err(syntax(self.text));
            }
            let cond = self.condition()?;
            let ttl = self.ttl()?;
            Statement::Insert {
                table,
                columns: names.into_iter().zip(values).collect(),
                cond,
                ttl,
            }
        } else if self.keyword("UPDATE") {
            let table = self.table()?;
            let ttl = self.ttl()?;
            self.expect_keyword("SET")?;
            let mut assignments = vec![self.assignment()?];
            while self.sym(",") {
                assignments.push(self.assignment()?);
            }
            self.expect_keyword("WHERE")?;
            let rels = self.relations()?;
            let cond = self.condition()?;
            Statement::Update {
                table,
                ttl,
                assignments,
                rels,
                cond,
            }
        } else if self.keyword("DELETE") {
            self.expect_keyword("FROM")?;
            let table = self.table()?;
            self.expect_keyword("WHERE")?;
            let rels = self.relations()?;
            let cond = self.condition()?;
            Statement::Delete { table, rels, cond }
        } else if self.keyword("SELECT") {
            let distinct = self.keyword("DISTINCT");
            let projection = self.projection()?;
            self.expect_keyword("FROM")?;
            let table = self.table()?;
            let rels = if self.keyword("WHERE") {
                self.relations()?
            } else {
                Vec::new()
            };
            let limit = if self.keyword("LIMIT") {
                match self.slot()? {
                    CqlValue::Int(n) => Some(usize::try_from(n).map_err(|_| syntax(self.text))?),
                    _ => return Err(syntax(self.text)),
                }
            } else {
                None
            };
            self.keyword("ALLOW");
            self.keyword("FILTERING");
            Statement::Select {
                table,
                distinct,
                projection,
                rels,
                limit,
            }
        } else {
            return Err(syntax(self.text));
        };
        if self.pos != self.toks.len() || !self.values.is_empty() {
            return Err(syntax(self.text));
        }
        Ok(statement)
    }
}

fn number(n: i64) -> CqlValue {
    i32::try_from(n).map_or(CqlValue::BigInt(n), CqlValue::Int)
}

fn parse(statement: &WireStatement) -> Result<Statement, TransportError> {
    let text = statement.body.query_text();
    Parser {
        text,
        toks: tokenize(text)?,
        pos: 0,
        values: statement.values.iter().cloned().collect(),
    }
    .statement()
}

fn as_i64(value: &CqlValue) -> Option<i64> {
    match value {
        CqlValue::Int(n) => Some(i64::from(*n)),
        CqlValue::BigInt(n) => Some(*n),
        _ => None,
    }
}

fn compare(a: &CqlValue, b: &CqlValue) -> Ordering {
    match (a, b) {
        (CqlValue::Text(a), CqlValue::Text(b)) => a.cmp(b),
        (CqlValue::Boolean(a), CqlValue::Boolean(b)) => a.cmp(b),
        _ => match (as_i64(a), as_i64(b)) {
            (Some(a), Some(b)) => a.cmp(&b),
            _ => Ordering::Equal,
        },
    }
}

fn same(a: &CqlValue, b: &CqlValue) -> bool {
    a == b || (as_i64(a).is_some() && as_i64(a) == as_i64(b))
}

fn holds(rel: &Rel, value: Option<&CqlValue>) -> bool {
    let Some(value) = value else {
        return false;
    };
    match rel.op {
        Op::In => rel.values.iter().any(|v| same(value, v)),
        Op::Eq => same(value, &rel.values[0]),
        Op::Neq => !same(value, &rel.values[0]),
        Op::Lt => compare(value, &rel.values[0]) == Ordering::Less,
        Op::Lte => compare(value, &rel.values[0]) != Ordering::Greater,
        Op::Gt => compare(value, &rel.values[0]) == Ordering::Greater,
        Op::Gte => compare(value, &rel.values[0]) != Ordering::Less,
    }
}

fn row_matches(row: &Row, rels: &[Rel]) -> bool {
    rels.iter()
        .all(|rel| holds(rel, row.get(&rel.column).map(|cell| &cell.value)))
}

/// Every full primary key addressed by equality and IN relations.
fn target_keys(
    table: &Table,
    rels: &[Rel],
) -> Result<Vec<Vec<(String, CqlValue)>>, TransportError> {
    let mut keys: Vec<Vec<(String, CqlValue)>> = vec![Vec::new()];
    for column in table.key_columns() {
        let rel = rels
            .iter()
            .find(|rel| rel.column == column && matches!(rel.op, Op::Eq | Op::In))
            .ok_or_else(|| {
                TransportError::InvalidQuery(format!("missing primary key column {column}"))
            })?;
        keys = keys
            .into_iter()
            .flat_map(|key| {
                let column = &column;
                rel.values.iter().map(move |value| {
                    let mut key = key.clone();
                    key.push((column.clone(), value.clone()));
                    key
                })
            })
            .collect();
    }
    Ok(keys)
}

fn table_mut<'a>(
    store: &'a mut Store,
    id: &TableIdentity,
) -> Result<&'a mut Table, TransportError> {
    store
        .tables
        .get_mut(id)
        .ok_or_else(|| TransportError::InvalidQuery(format!("unconfigured table {id}")))
}

fn write_cell(row: &mut Row, column: &str, value: CqlValue, clock: i64, ttl: Option<i32>) {
    if value.is_null() {
        row.remove(column);
    } else {
        row.insert(
            column.to_string(),
            Cell {
                value,
                writetime: clock,
                ttl,
            },
        );
    }
}

fn combine(current: Option<&CqlValue>, delta: CqlValue, add: bool) -> CqlValue {
    match (current, delta) {
        (current, delta) if as_i64(&delta).is_some() => {
            let base = current.and_then(as_i64).unwrap_or(0);
            let delta = as_i64(&delta).unwrap_or(0);
            CqlValue::BigInt(if add { base + delta } else { base - delta })
        }
        (Some(CqlValue::Set(items)), CqlValue::Set(delta)) => {
            let mut items = items.clone();
            if add {
                for value in delta {
                    if !items.contains(&value) {
                        items.push(value);
                    }
                }
            } else {
                items.retain(|value| !delta.contains(value));
            }
            CqlValue::Set(items)
        }
        (Some(CqlValue::List(items)), CqlValue::List(delta)) => {
            let mut items = items.clone();
            if add {
                items.extend(delta);
            } else {
                items.retain(|value| !delta.contains(value));
            }
            CqlValue::List(items)
        }
        (Some(CqlValue::Map(entries)), CqlValue::Map(delta)) => {
            let mut entries = entries.clone();
            for (key, value) in delta {
                entries.retain(|(k, _)| *k != key);
                entries.push((key, value));
            }
            CqlValue::Map(entries)
        }
        (_, delta) if add => delta,
        (_, CqlValue::Set(_)) => CqlValue::Set(Vec::new()),
        (_, _) => CqlValue::List(Vec::new()),
    }
}

fn run(
    store: &mut Store,
    statement: Statement,
    options: &StatementOptions,
) -> Result<ResultPage, TransportError> {
    let clock = store.clock;
    let guarded = statement.is_guarded();
    match statement {
        Statement::Insert {
            table,
            columns,
            cond,
            ttl,
        } => {
            let table = table_mut(store, &table)?;
            let key: Vec<(String, CqlValue)> = table
                .key_columns()
                .into_iter()
                .map(|name| {
                    columns
                        .iter()
                        .find(|(c, _)| *c == name)
                        .map(|(_, v)| (name.clone(), v.clone()))
                        .ok_or_else(|| {
                            TransportError::InvalidQuery(format!(
                                "missing primary key column {name}"
                            ))
                        })
                })
                .collect::<Result<_, _>>()?;
            if matches!(cond, Cond::IfNotExists) && table.find(&key).is_some() {
                return Ok(applied_page(false));
            }
            let index = table.upsert(&key, clock);
            for (name, value) in columns {
                write_cell(&mut table.rows[index], &name, value, clock, ttl);
            }
            Ok(if guarded { applied_page(true) } else { ResultPage::default() })
        }
        Statement::Update {
            table,
            ttl,
            assignments,
            rels,
            cond,
        } => {
            let table = table_mut(store, &table)?;
            let keys = target_keys(table, &rels)?;
            if guarded {
                let row = keys.first().and_then(|key| table.find(key));
                let applied = match (&cond, row) {
                    (Cond::IfExists, row) => row.is_some(),
                    (Cond::If(checks), Some(index)) => row_matches(&table.rows[index], checks),
                    _ => false,
                };
                if !applied {
                    return Ok(applied_page(false));
                }
            }
            for key in keys {
                let index = table.upsert(&key, clock);
                let row = &mut table.rows[index];
                for assignment in &assignments {
                    let (column, value) = match assignment.clone() {
                        Assign::Set(column, value) => (column, value),
                        Assign::Add(column, delta) => {
                            let value = combine(row.get(&column).map(|c| &c.value), delta, true);
                            (column, value)
                        }
                        Assign::Remove(column, delta) => {
                            let value = combine(row.get(&column).map(|c| &c.value), delta, false);
                            (column, value)
                        }
                        Assign::Prepend(column, CqlValue::List(mut items)) => {
                            if let Some(CqlValue::List(existing)) =
                                row.get(&column).map(|c| &c.value)
                            {
                                items.extend(existing.iter().cloned());
                            }
                            (column, CqlValue::List(items))
                        }
                        Assign::Prepend(column, _) => {
                            return Err(TransportError::InvalidQuery(format!(
                                "prepend to non-list column {column}"
                            )));
                        }
                    };
                    write_cell(row, &column, value, clock, ttl);
                }
            }
            Ok(if guarded { applied_page(true) } else { ResultPage::default() })
        }
        Statement::Delete { table, rels, cond } => {
            let table = table_mut(store, &table)?;
            let matching: Vec<usize> = (0..table.rows.len())
                .filter(|&i| row_matches(&table.rows[i], &rels))
                .collect();
            if guarded {
                let applied = match &cond {
                    Cond::IfExists => !matching.is_empty(),
                    Cond::If(checks) => matching
                        .first()
                        .is_some_and(|&i| row_matches(&table.rows[i], checks)),
                    _ => false,
                };
                if !applied {
                    return Ok(applied_page(false));
                }
            }
            let mut index = 0;
            table.rows.retain(|_| {
                let keep = !matching.contains(&index);
                index += 1;
                keep
            });
            Ok(if guarded { applied_page(true) } else { ResultPage::default() })
        }
        Statement::Select {
            table,
            distinct,
            projection,
            rels,
            limit,
        } => {
            let table = table_mut(store, &table)?;
            let key_columns = table.key_columns();
            let mut rows: Vec<&Row> = table
                .rows
                .iter()
                .filter(|row| row_matches(row, &rels))
                .collect();
            rows.sort_by(|a, b| {
                key_columns
                    .iter()
                    .map(|c| match (a.get(c), b.get(c)) {
                        (Some(a), Some(b)) => compare(&a.value, &b.value),
                        _ => Ordering::Equal,
                    })
                    .find(|o| *o != Ordering::Equal)
                    .unwrap_or(Ordering::Equal)
            });
            let projection = projection.unwrap_or_else(|| {
                table
                    .schema
                    .columns
                    .iter()
                    .map(|c| Proj::Column(c.name.clone()))
                    .collect()
            });
            let columns = projection
                .iter()
                .map(|p| match p {
                    Proj::Column(c) => c.clone(),
                    Proj::WriteTime(c) => format!("writetime({c})"),
                    Proj::Ttl(c) => format!("ttl({c})"),
                })
                .collect();
            let mut out: Vec<Vec<CqlValue>> = rows
                .into_iter()
                .map(|row| {
                    projection
                        .iter()
                        .map(|p| match p {
                            Proj::Column(c) => {
                                row.get(c).map_or(CqlValue::Null, |cell| cell.value.clone())
                            }
                            Proj::WriteTime(c) => row
                                .get(c)
                                .map_or(CqlValue::Null, |cell| CqlValue::BigInt(cell.writetime)),
                            Proj::Ttl(c) => row
                                .get(c)
                                .and_then(|cell| cell.ttl)
                                .map_or(CqlValue::Null, CqlValue::Int),
                        })
                        .collect()
                })
                .collect();
            if distinct {
                let mut seen = Vec::new();
                out.retain(|row| {
                    if seen.contains(row) {
                        false
                    } else {
                        seen.push(row.clone());
                        true
                    }
                });
            }
            if let Some(limit) = limit {
                out.truncate(limit);
            }

            let offset = options
                .paging_state
                .as_ref()
                .and_then(|state| <[u8; 8]>::try_from(state.as_ref()).ok())
                .map_or(0, |bytes| u64::from_be_bytes(bytes) as usize);
            let size = options.fetch_size.map_or(usize::MAX, |n| n as usize);
            let end = offset.saturating_add(size).min(out.len());
            let paging_state = (end < out.len())
                .then(|| Bytes::from((end as u64).to_be_bytes().to_vec()));
            let rows = out.get(offset..end).map(<[_]>::to_vec).unwrap_or_default();
            Ok(ResultPage {
                columns,
                rows,
                paging_state,
                ..ResultPage::default()
            })
        }
    }
}
