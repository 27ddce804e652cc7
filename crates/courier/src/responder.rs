//! The per-connection request/reply state machine.
//!
//! A responder incrementally parses request frames, drives the registered
//! procedure's composers one argument at a time, and renders replies. When a
//! method is unknown or an argument is rejected it keeps parsing in skip
//! mode until the closing frame marker, so the connection resynchronizes and
//! a single error reply is emitted.

use crate::registry::ServiceRegistry;
use crate::{Procedure, RemoteError, RpcError};
use bytes::{Buf, BufMut, BytesMut};
use std::sync::Arc;
use wire::{frame, tags, Encoder, Parser};

#[derive(Clone, Copy, Debug, PartialEq)]
enum State {
    Header,
    Domain,
    Method,
    Params,
    Param,
    ParamsSkip,
    ParamSkip,
}

pub struct Responder {
    registry: Arc<ServiceRegistry>,
    state: State,
    domain: Vec<u8>,
    method: Vec<u8>,
    method_name: String,
    procedure: Option<Box<dyn Procedure>>,
    arg_index: usize,
    parser: Parser,
    encoder: Encoder,
    failed: Option<String>,
}

impl Responder {
    pub fn new(registry: Arc<ServiceRegistry>) -> Self {
        Responder {
            registry,
            state: State::Header,
            domain: Vec::new(),
            method: Vec::new(),
            method_name: String::new(),
            procedure: None,
            arg_index: 0,
            parser: Parser::new(),
            encoder: Encoder::new(),
            failed: None,
        }
    }

    /// True when no request is in flight and no buffered bytes are pending,
    /// so the connection may be parked on the reactor.
    pub fn is_idle(&self) -> bool {
        self.state == State::Header
    }

    /// Feeds buffered input. Returns true when one request was served and a
    /// reply was appended to `out`; remaining buffered bytes belong to the
    /// next pipelined request and are left for the following call.
    pub fn on_input(&mut self, input: &mut BytesMut, out: &mut BytesMut) -> Result<bool, RpcError> {
        while input.has_remaining() {
            if self.advance(input)? {
                self.finish(out);
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Consumes request bytes until the closing frame marker.
    fn advance(&mut self, input: &mut BytesMut) -> Result<bool, RpcError> {
        while input.has_remaining() {
            match self.state {
                State::Header => {
                    let b = input.get_u8();
                    self.state = match b {
                        frame::REQUEST => State::Method,
                        frame::DOMAIN => State::Domain,
                        _ => {
                            return Err(RpcError::MalformedFrame(format!(
                                "domain or method name expected, got {b:#04x}"
                            )))
                        }
                    };
                }
                State::Domain => {
                    let b = input.get_u8();
                    if b == 0 {
                        self.state = State::Method;
                    } else {
                        self.domain.push(b);
                    }
                }
                State::Method => {
                    let b = input.get_u8();
                    if b != 0 {
                        self.method.push(b);
                        continue;
                    }
                    self.resolve_method()?;
                }
                State::Params => {
                    // Peek: the frame marker belongs to us, a value tag to
                    // the parser.
                    if input.chunk()[0] == wire::tags::END {
                        input.advance(1);
                        if let Some(procedure) = &self.procedure {
                            if self.arg_index < procedure.arity() {
                                self.failed = Some("argument expected".to_owned());
                            }
                        }
                        return Ok(true);
                    }
                    match &self.procedure {
                        Some(procedure) if self.arg_index >= procedure.arity() => {
                            self.failed = Some("too many arguments".to_owned());
                            self.state = State::ParamsSkip;
                        }
                        _ => self.state = State::Param,
                    }
                }
                State::ParamsSkip => {
                    if input.chunk()[0] == wire::tags::END {
                        input.advance(1);
                        return Ok(true);
                    }
                    self.state = State::ParamSkip;
                }
                State::Param => {
                    if self.parser.advance(input)? {
                        let arg = self.parser.take();
                        let procedure = self
                            .procedure
                            .as_mut()
                            .ok_or_else(|| RpcError::MalformedFrame("no procedure".into()))?;
                        match procedure.fixup_arg(self.arg_index, &arg) {
                            Ok(()) => {
                                self.arg_index += 1;
                                self.state = State::Params;
                            }
                            Err(err) => {
                                self.failed = Some(err.to_string());
                                self.state = State::ParamsSkip;
                            }
                        }
                    }
                }
                State::ParamSkip => {
                    if self.parser.advance(input)? {
                        // Parsed for resynchronization only.
                        let _ = self.parser.take();
                        self.state = State::ParamsSkip;
                    }
                }
            }
        }
        Ok(false)
    }

    fn resolve_method(&mut self) -> Result<(), RpcError> {
        let domain = String::from_utf8(std::mem::take(&mut self.domain))
            .map_err(|_| RpcError::MalformedFrame("domain is not utf-8".into()))?;
        let method = String::from_utf8(std::mem::take(&mut self.method))
            .map_err(|_| RpcError::MalformedFrame("method name is not utf-8".into()))?;
        if !domain.is_empty() {
            tracing::debug!(domain, "rpc method domain");
        }
        tracing::debug!(method, "rpc method");

        match self.registry.get_procedure(&domain, &method) {
            Some(mut procedure) => {
                procedure.begin_call();
                self.procedure = Some(procedure);
                self.arg_index = 0;
                self.state = State::Params;
            }
            None => {
                self.failed = Some(format!("unknown method \"{method}\""));
                self.state = State::ParamsSkip;
            }
        }
        self.method_name = method;
        Ok(())
    }

    /// Renders the reply for the completed request and resets for the next.
    fn finish(&mut self, out: &mut BytesMut) {
        let procedure = self.procedure.take();
        match self.failed.take() {
            Some(message) => {
                metrics::counter!("courier_request_errors").increment(1);
                self.reply_error(out, 0, &message);
            }
            None => match procedure {
                Some(mut procedure) => match procedure.end_call() {
                    Ok(result) => {
                        // Encode into a scratch buffer so a failing encode
                        // never leaves half a reply on the wire.
                        let mut body = BytesMut::new();
                        match self.encoder.format(&result, &mut body) {
                            Ok(()) => {
                                tracing::debug!(method = %self.method_name, "send reply");
                                out.put_u8(frame::RESPONSE);
                                out.extend_from_slice(&body);
                                out.put_u8(tags::END);
                            }
                            Err(err) => {
                                self.reply_error(out, 0, &err.to_string());
                            }
                        }
                    }
                    Err(err) => match err.downcast_ref::<RemoteError>() {
                        Some(remote) => {
                            let (rc, message) = (remote.rc, remote.message.clone());
                            self.reply_error(out, rc, &message);
                        }
                        None => self.reply_error(out, 0, &err.to_string()),
                    },
                },
                None => self.reply_error(out, 0, "no procedure"),
            },
        }

        self.state = State::Header;
        self.arg_index = 0;
        self.method_name.clear();
    }

    fn reply_error(&mut self, out: &mut BytesMut, rc: i32, message: &str) {
        tracing::debug!(rc, message, "send error reply");
        out.put_u8(frame::EXCEPTION);
        out.put_i32(rc);
        // The message is NUL-terminated on the wire.
        out.extend_from_slice(message.replace('\0', " ").as_bytes());
        out.put_u8(0);
        out.put_u8(tags::END);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::registry::{procedure0, procedure2};
    use pretty_assertions::assert_eq;
    use sinfo::SerializationInfo;

    fn registry() -> Arc<ServiceRegistry> {
        let registry = ServiceRegistry::new();
        registry.register_procedure("multiply", procedure2(|a: i32, b: i32| Ok(a * b)));
        registry.register_procedure(
            "fault",
            procedure0(|| -> anyhow::Result<i32> { Err(RemoteError::new(7, "Fault").into()) }),
        );
        Arc::new(registry)
    }

    fn request_multiply(a: i32, b: i32) -> BytesMut {
        let mut buf = BytesMut::new();
        buf.put_u8(frame::REQUEST);
        buf.extend_from_slice(b"multiply\0");
        let mut enc = Encoder::new();
        for v in [a, b] {
            let mut si = SerializationInfo::new();
            si.set_value(v);
            enc.format(&si, &mut buf).unwrap();
        }
        buf.put_u8(tags::END);
        buf
    }

    #[test]
    fn multiply_round_trip() {
        let mut responder = Responder::new(registry());
        let mut input = request_multiply(2, 3);
        let mut out = BytesMut::new();

        assert!(responder.on_input(&mut input, &mut out).unwrap());
        // C1, PlainUInt8 6, FF.
        assert_eq!(out.as_ref(), &[0xc1, 0x98, 6, 0xff][..]);
    }

    #[test]
    fn literal_request_bytes() {
        // The documented frame: C0 "multiply" \0 int32 args FF with plain
        // Int32 tags, answered by C1 Int32 6 FF (width-minimized).
        let mut input = BytesMut::new();
        input.put_u8(0xc0);
        input.extend_from_slice(b"multiply\0");
        input.extend_from_slice(&[0x52, 0x00, 0x00, 0x00, 0x02]); // PlainInt32 2
        input.extend_from_slice(&[0x52, 0x00, 0x00, 0x00, 0x03]); // PlainInt32 3
        input.put_u8(0xff);

        let mut responder = Responder::new(registry());
        let mut out = BytesMut::new();
        assert!(responder.on_input(&mut input, &mut out).unwrap());
        assert_eq!(out[0], 0xc1);
        assert_eq!(*out.last().unwrap(), 0xff);
    }

    #[test]
    fn unknown_method_replies_and_recovers() {
        let mut responder = Responder::new(registry());
        let mut input = BytesMut::new();
        input.put_u8(frame::REQUEST);
        input.extend_from_slice(b"foo\0");
        input.put_u8(tags::END);

        let mut out = BytesMut::new();
        assert!(responder.on_input(&mut input, &mut out).unwrap());

        let mut expected = BytesMut::new();
        expected.put_u8(0xc2);
        expected.put_i32(0);
        expected.extend_from_slice(b"unknown method \"foo\"\0");
        expected.put_u8(0xff);
        assert_eq!(out.as_ref(), expected.as_ref());

        // The same connection serves the next request normally.
        let mut input = request_multiply(4, 5);
        let mut out = BytesMut::new();
        assert!(responder.on_input(&mut input, &mut out).unwrap());
        assert_eq!(out[0], 0xc1);
    }

    #[test]
    fn remote_exception_carries_rc() {
        let mut responder = Responder::new(registry());
        let mut input = BytesMut::new();
        input.put_u8(frame::REQUEST);
        input.extend_from_slice(b"fault\0");
        input.put_u8(tags::END);

        let mut out = BytesMut::new();
        assert!(responder.on_input(&mut input, &mut out).unwrap());

        let mut expected = BytesMut::new();
        expected.put_u8(0xc2);
        expected.put_i32(7);
        expected.extend_from_slice(b"Fault\0");
        expected.put_u8(0xff);
        assert_eq!(out.as_ref(), expected.as_ref());
    }

    #[test]
    fn too_many_arguments_resynchronizes() {
        let mut responder = Responder::new(registry());
        let mut input = request_multiply(2, 3);
        // Splice one extra argument before the frame end.
        let end = input.split_off(input.len() - 1);
        let mut si = SerializationInfo::new();
        si.set_value(9u8);
        let mut extra = Encoder::new();
        extra.format(&si, &mut input).unwrap();
        input.extend_from_slice(&end);

        let mut out = BytesMut::new();
        assert!(responder.on_input(&mut input, &mut out).unwrap());
        assert_eq!(out[0], 0xc2);
        let needle: &[u8] = b"too many arguments";
        assert!(out.as_ref().windows(needle.len()).any(|w| w == needle));
    }

    #[test]
    fn missing_argument_is_an_error_reply() {
        let mut responder = Responder::new(registry());
        let mut input = BytesMut::new();
        input.put_u8(frame::REQUEST);
        input.extend_from_slice(b"multiply\0");
        let mut enc = Encoder::new();
        let mut si = SerializationInfo::new();
        si.set_value(2i32);
        enc.format(&si, &mut input).unwrap();
        input.put_u8(tags::END);

        let mut out = BytesMut::new();
        assert!(responder.on_input(&mut input, &mut out).unwrap());
        assert_eq!(out[0], 0xc2);
    }

    #[test]
    fn pipelined_requests_are_served_in_order() {
        let mut responder = Responder::new(registry());
        let mut input = request_multiply(2, 3);
        input.extend_from_slice(&request_multiply(4, 5));

        let mut out = BytesMut::new();
        assert!(responder.on_input(&mut input, &mut out).unwrap());
        assert_eq!(out.as_ref(), &[0xc1, 0x98, 6, 0xff][..]);

        let mut out = BytesMut::new();
        assert!(responder.on_input(&mut input, &mut out).unwrap());
        assert_eq!(out.as_ref(), &[0xc1, 0x98, 20, 0xff][..]);
        assert!(input.is_empty());
    }

    #[test]
    fn garbage_header_is_fatal() {
        let mut responder = Responder::new(registry());
        let mut input = BytesMut::from(&[0x42u8][..]);
        let mut out = BytesMut::new();
        assert!(matches!(
            responder.on_input(&mut input, &mut out),
            Err(RpcError::MalformedFrame(_))
        ));
    }

    #[test]
    fn domain_scoped_requests_resolve() {
        let registry = ServiceRegistry::new();
        registry.register_domain_procedure(
            "math",
            "neg",
            crate::registry::procedure1(|a: i32| Ok(-a)),
        );
        let mut responder = Responder::new(Arc::new(registry));

        let mut input = BytesMut::new();
        input.put_u8(frame::DOMAIN);
        input.extend_from_slice(b"math\0neg\0");
        let mut enc = Encoder::new();
        let mut si = SerializationInfo::new();
        si.set_value(4i32);
        enc.format(&si, &mut input).unwrap();
        input.put_u8(tags::END);

        let mut out = BytesMut::new();
        assert!(responder.on_input(&mut input, &mut out).unwrap());
        // C1 PlainInt8 -4 FF.
        assert_eq!(out.as_ref(), &[0xc1, 0x90, 0xfc, 0xff][..]);
    }
}
