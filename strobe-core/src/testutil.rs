//! Test doubles shared by the registry, negotiator and read-loop tests.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;

use crate::codec::CodecId;
use crate::parser::{PacketParser, ParseError, ParsedFields, ParserFactory};

/// Shared open/close counters so tests can observe parser-context lifetime.
#[derive(Clone, Default)]
pub struct ParserCounters {
    inner: Arc<Counts>,
}

#[derive(Default)]
struct Counts {
    opened: AtomicUsize,
    closed: AtomicUsize,
}

impl ParserCounters {
    pub fn note_open(&self) {
        self.inner.opened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn note_close(&self) {
        self.inner.closed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn open_count(&self) -> usize {
        self.inner.opened.load(Ordering::Relaxed)
    }

    pub fn close_count(&self) -> usize {
        self.inner.closed.load(Ordering::Relaxed)
    }
}

/// Parser with scripted per-packet outcomes. `None` entries simulate a parse
/// error; once the script runs out, parses succeed with the current fields.
pub struct ScriptedParser {
    pub script: VecDeque<Option<ParsedFields>>,
    pub fields: ParsedFields,
    pub split: Option<Bytes>,
    pub wants_split: bool,
    pub counters: Option<ParserCounters>,
}

impl Default for ScriptedParser {
    fn default() -> Self {
        Self {
            script: VecDeque::new(),
            fields: ParsedFields::default(),
            split: None,
            wants_split: false,
            counters: None,
        }
    }
}

impl ScriptedParser {
    pub fn with_script(script: Vec<Option<ParsedFields>>) -> Self {
        let mut parser = Self::default();
        parser.script = script.into();
        parser
    }
}

impl Drop for ScriptedParser {
    fn drop(&mut self) {
        if let Some(counters) = &self.counters {
            counters.note_close();
        }
    }
}

impl PacketParser for ScriptedParser {
    fn parse(
        &mut self,
        data: &[u8],
        _pts_us: Option<i64>,
        _dts_us: Option<i64>,
    ) -> Result<usize, ParseError> {
        match self.script.pop_front() {
            Some(Some(fields)) => {
                self.fields = fields;
                Ok(data.len())
            }
            Some(None) => Err(ParseError::BadSync),
            None => Ok(data.len()),
        }
    }

    fn fields(&self) -> ParsedFields {
        self.fields
    }

    fn wants_split_extradata(&self) -> bool {
        self.wants_split
    }

    fn split_extradata(&mut self, _data: &[u8]) -> Option<Bytes> {
        self.split.take()
    }
}

/// Factory that counts every parser it opens; parsers count themselves on
/// drop. Used for the clear()/re-init lifetime assertions.
pub struct CountingFactory {
    counters: ParserCounters,
}

impl CountingFactory {
    pub fn new(counters: ParserCounters) -> Self {
        Self { counters }
    }
}

impl ParserFactory for CountingFactory {
    fn create(&self, _codec: CodecId) -> Option<Box<dyn PacketParser>> {
        self.counters.note_open();
        let mut parser = ScriptedParser::default();
        parser.counters = Some(self.counters.clone());
        Some(Box::new(parser))
    }

    fn probe(&self, _codec: CodecId, _extradata: &[u8], _packet: &[u8]) -> Option<ParsedFields> {
        None
    }
}

/// Factory handing out pre-scripted parsers in order, with a fixed probe
/// answer. Once the queue is empty, created parsers are inert defaults.
#[derive(Default)]
pub struct ScriptedFactory {
    queue: RefCell<VecDeque<ScriptedParser>>,
    probe_fields: Option<ParsedFields>,
    probe_calls: Cell<usize>,
}

impl ScriptedFactory {
    pub fn with_parsers(parsers: Vec<ScriptedParser>) -> Self {
        Self {
            queue: RefCell::new(parsers.into()),
            ..Default::default()
        }
    }

    pub fn with_probe(fields: ParsedFields) -> Self {
        Self {
            probe_fields: Some(fields),
            ..Default::default()
        }
    }

    pub fn probe_calls(&self) -> usize {
        self.probe_calls.get()
    }
}

impl ParserFactory for ScriptedFactory {
    fn create(&self, _codec: CodecId) -> Option<Box<dyn PacketParser>> {
        let parser = self
            .queue
            .borrow_mut()
            .pop_front()
            .unwrap_or_default();
        Some(Box::new(parser))
    }

    fn probe(&self, _codec: CodecId, _extradata: &[u8], _packet: &[u8]) -> Option<ParsedFields> {
        self.probe_calls.set(self.probe_calls.get() + 1);
        self.probe_fields
    }
}
