//! Incremental RESP (Redis serialization protocol) parser and writer.

use bytes::{Buf, Bytes, BytesMut};

use crate::error::{messages, Error};

use super::Value;

const PARSER_NAME: &str = "resp";

/// Incremental RESP reply parser.
///
/// Feed it network input as it arrives with [`handle_data`]; it consumes
/// bytes from the front of the buffer and reports when a complete value is
/// available. Input beyond the first complete value is left untouched for
/// the next message. After [`extract`] the parser is ready for the next
/// reply.
///
/// [`handle_data`]: Parser::handle_data
/// [`extract`]: Parser::extract
pub struct Parser {
    state: State,
    line: Vec<u8>,
    bulk: BytesMut,
    stack: Vec<PartialArray>,
    result: Option<Value>,
}

#[derive(Debug)]
enum State {
    /// Collecting a CRLF-terminated type line.
    Line,
    /// Collecting `len` payload bytes plus the trailing CRLF.
    Bulk { len: usize },
    /// A complete value is waiting in `result`.
    Done,
}

struct PartialArray {
    expected: usize,
    items: Vec<Value>,
}

// ===== impl Parser =====

impl Parser {
    pub fn new() -> Self {
        Parser {
            state: State::Line,
            line: Vec::new(),
            bulk: BytesMut::new(),
            stack: Vec::new(),
            result: None,
        }
    }

    /// Consume input from the front of `data`.
    ///
    /// Returns `true` once a complete value is available; remaining input
    /// is left in `data`. Malformed input is a protocol error.
    pub fn handle_data(&mut self, data: &mut Bytes) -> Result<bool, Error> {
        while !data.is_empty() && !matches!(self.state, State::Done) {
            match self.state {
                State::Line => {
                    match data.iter().position(|&b| b == b'\n') {
                        Some(pos) => {
                            self.line.extend_from_slice(&data[..pos]);
                            data.advance(pos + 1);
                            if self.line.last() == Some(&b'\r') {
                                self.line.pop();
                            }
                            let line = std::mem::take(&mut self.line);
                            self.dispatch_line(&line)?;
                        }
                        None => {
                            self.line.extend_from_slice(data);
                            data.advance(data.len());
                        }
                    }
                }
                State::Bulk { len } => {
                    let missing = len + 2 - self.bulk.len();
                    let take = missing.min(data.len());
                    self.bulk.extend_from_slice(&data[..take]);
                    data.advance(take);
                    if self.bulk.len() == len + 2 {
                        if &self.bulk[len..] != b"\r\n" {
                            return Err(syntax_error());
                        }
                        let payload = self.bulk.split_to(len).freeze();
                        self.bulk.clear();
                        self.state = State::Line;
                        self.complete(Value::Bulk(payload));
                    }
                }
                State::Done => unreachable!(),
            }
        }
        Ok(matches!(self.state, State::Done))
    }

    /// Take the parsed value and reset for the next reply.
    pub fn extract(&mut self) -> Option<Value> {
        let value = self.result.take()?;
        self.state = State::Line;
        Some(value)
    }

    fn dispatch_line(&mut self, line: &[u8]) -> Result<(), Error> {
        let (&tag, rest) = line.split_first().ok_or_else(syntax_error)?;
        let text = || {
            std::str::from_utf8(rest)
                .map(str::to_owned)
                .map_err(|_| syntax_error())
        };
        match tag {
            b':' => {
                let n = parse_int(rest)?;
                self.complete(Value::Integer(n));
            }
            b'+' => {
                let s = text()?;
                self.complete(Value::Simple(s));
            }
            b'-' => {
                let s = text()?;
                self.complete(Value::Error(s));
            }
            b'$' => {
                let n = parse_int(rest)?;
                if n < 0 {
                    self.complete(Value::Nil);
                } else {
                    self.state = State::Bulk { len: n as usize };
                }
            }
            b'*' => {
                let n = parse_int(rest)?;
                if n < 0 {
                    self.complete(Value::Nil);
                } else if n == 0 {
                    self.complete(Value::Array(Vec::new()));
                } else {
                    self.stack.push(PartialArray {
                        expected: n as usize,
                        items: Vec::with_capacity(n as usize),
                    });
                }
            }
            _ => return Err(syntax_error()),
        }
        Ok(())
    }

    fn complete(&mut self, value: Value) {
        let mut value = value;
        loop {
            match self.stack.last_mut() {
                Some(top) => {
                    top.items.push(value);
                    if top.items.len() == top.expected {
                        let done = self.stack.pop().unwrap();
                        value = Value::Array(done.items);
                    } else {
                        return;
                    }
                }
                None => {
                    self.result = Some(value);
                    self.state = State::Done;
                    return;
                }
            }
        }
    }
}

impl Default for Parser {
    fn default() -> Self {
        Parser::new()
    }
}

fn syntax_error() -> Error {
    Error::protocol(PARSER_NAME, messages::SYNTAX_ERROR)
}

fn parse_int(digits: &[u8]) -> Result<i64, Error> {
    std::str::from_utf8(digits)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(syntax_error)
}

/// A command to send to a RESP peer: a name plus arguments, transmitted as
/// an array of bulk strings. Integer arguments are emitted as decimal
/// strings.
#[derive(Clone, Debug)]
pub struct Command {
    parts: Vec<Bytes>,
}

/// Conversion into a single command argument.
pub trait ToArg {
    fn to_arg(self) -> Bytes;
}

// ===== impl Command =====

impl Command {
    pub fn new(name: impl ToArg) -> Self {
        Command {
            parts: vec![name.to_arg()],
        }
    }

    pub fn arg(mut self, arg: impl ToArg) -> Self {
        self.parts.push(arg.to_arg());
        self
    }

    pub fn parts(&self) -> &[Bytes] {
        &self.parts
    }
}

impl ToArg for &str {
    fn to_arg(self) -> Bytes {
        Bytes::copy_from_slice(self.as_bytes())
    }
}

impl ToArg for String {
    fn to_arg(self) -> Bytes {
        Bytes::from(self.into_bytes())
    }
}

impl ToArg for &[u8] {
    fn to_arg(self) -> Bytes {
        Bytes::copy_from_slice(self)
    }
}

impl ToArg for Bytes {
    fn to_arg(self) -> Bytes {
        self
    }
}

impl ToArg for Vec<u8> {
    fn to_arg(self) -> Bytes {
        Bytes::from(self)
    }
}

macro_rules! integer_to_arg {
    ($($t:ty),*) => {
        $(impl ToArg for $t {
            fn to_arg(self) -> Bytes {
                Bytes::from(self.to_string().into_bytes())
            }
        })*
    };
}

integer_to_arg!(i32, i64, u16, u32, u64, usize);

/// Serialise a command into `buf` as an array of bulk strings.
pub fn encode_command(buf: &mut BytesMut, command: &Command) {
    let parts = command.parts();
    buf.extend_from_slice(format!("*{}\r\n", parts.len()).as_bytes());
    for part in parts {
        buf.extend_from_slice(format!("${}\r\n", part.len()).as_bytes());
        buf.extend_from_slice(part);
        buf.extend_from_slice(b"\r\n");
    }
}

/// Serialise a reply value into `buf`.
pub fn encode_value(buf: &mut BytesMut, value: &Value) {
    match value {
        Value::Nil => buf.extend_from_slice(b"$-1\r\n"),
        Value::Integer(n) => buf.extend_from_slice(format!(":{}\r\n", n).as_bytes()),
        Value::Simple(s) => buf.extend_from_slice(format!("+{}\r\n", s).as_bytes()),
        Value::Error(s) => buf.extend_from_slice(format!("-{}\r\n", s).as_bytes()),
        Value::Bulk(b) => {
            buf.extend_from_slice(format!("${}\r\n", b.len()).as_bytes());
            buf.extend_from_slice(b);
            buf.extend_from_slice(b"\r\n");
        }
        Value::Array(items) => {
            buf.extend_from_slice(format!("*{}\r\n", items.len()).as_bytes());
            for item in items {
                encode_value(buf, item);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_all(input: &[u8]) -> Value {
        let mut parser = Parser::new();
        let mut data = Bytes::copy_from_slice(input);
        assert!(parser.handle_data(&mut data).unwrap());
        assert!(data.is_empty());
        parser.extract().unwrap()
    }

    #[test]
    fn parses_scalar_replies() {
        assert_eq!(parse_all(b":17\r\n"), Value::Integer(17));
        assert_eq!(parse_all(b":-4\r\n"), Value::Integer(-4));
        assert_eq!(parse_all(b"+OK\r\n"), Value::Simple("OK".into()));
        assert_eq!(parse_all(b"$-1\r\n"), Value::Nil);
        assert_eq!(
            parse_all(b"$5\r\nhello\r\n"),
            Value::Bulk(Bytes::from_static(b"hello"))
        );
        assert_eq!(
            parse_all(b"-ERR unknown command\r\n"),
            Value::Error("ERR unknown command".into())
        );
    }

    #[test]
    fn parses_nested_arrays() {
        let value = parse_all(b"*3\r\n:1\r\n*2\r\n$1\r\na\r\n$-1\r\n+x\r\n");
        assert_eq!(
            value,
            Value::Array(vec![
                Value::Integer(1),
                Value::Array(vec![Value::Bulk(Bytes::from_static(b"a")), Value::Nil]),
                Value::Simple("x".into()),
            ])
        );
    }

    #[test]
    fn accepts_input_byte_by_byte() {
        let input = b"*2\r\n$5\r\nHello\r\n:42\r\n";
        let mut parser = Parser::new();
        let mut complete = false;
        for (i, &byte) in input.iter().enumerate() {
            let mut data = Bytes::copy_from_slice(&[byte]);
            complete = parser.handle_data(&mut data).unwrap();
            assert_eq!(complete, i == input.len() - 1);
        }
        assert!(complete);
        assert_eq!(
            parser.extract().unwrap(),
            Value::Array(vec![
                Value::Bulk(Bytes::from_static(b"Hello")),
                Value::Integer(42)
            ])
        );
    }

    #[test]
    fn leaves_trailing_input_for_the_next_message() {
        let mut parser = Parser::new();
        let mut data = Bytes::from_static(b":1\r\n:2\r\n");
        assert!(parser.handle_data(&mut data).unwrap());
        assert_eq!(parser.extract().unwrap(), Value::Integer(1));
        assert_eq!(&data[..], b":2\r\n");

        assert!(parser.handle_data(&mut data).unwrap());
        assert_eq!(parser.extract().unwrap(), Value::Integer(2));
    }

    #[test]
    fn rejects_garbage() {
        let mut parser = Parser::new();
        let mut data = Bytes::from_static(b"?what\r\n");
        assert!(parser.handle_data(&mut data).is_err());

        let mut parser = Parser::new();
        let mut data = Bytes::from_static(b"$3\r\nabcXY");
        assert!(parser.handle_data(&mut data).is_err());
    }

    #[test]
    fn encodes_command_as_bulk_string_array() {
        let mut buf = BytesMut::new();
        encode_command(&mut buf, &Command::new("Hello").arg("World"));
        assert_eq!(&buf[..], b"*2\r\n$5\r\nHello\r\n$5\r\nWorld\r\n");

        let mut buf = BytesMut::new();
        encode_command(&mut buf, &Command::new("SET").arg("k").arg(17i64));
        assert_eq!(&buf[..], b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$2\r\n17\r\n");
    }

    #[test]
    fn encoded_values_parse_back() {
        let value = Value::Array(vec![
            Value::Integer(-3),
            Value::Bulk(Bytes::from_static(b"payload")),
            Value::Nil,
            Value::Simple("PONG".into()),
        ]);
        let mut buf = BytesMut::new();
        encode_value(&mut buf, &value);
        assert_eq!(parse_all(&buf), value);
    }
}
