//! A client for the binary RPC protocol.
//!
//! One client owns one connection. Requests and replies are strictly
//! ordered, and both halves of the connection's name dictionary live as long
//! as the client, matching the server side.

use crate::{RemoteError, RpcError};
use bytes::{Buf, BufMut, BytesMut};
use sinfo::SerializationInfo;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::time::timeout;
use wire::{frame, tags, Encoder, Parser};

pub struct RpcClient {
    stream: TcpStream,
    encoder: Encoder,
    parser: Parser,
    inbuf: BytesMut,
    timeout: Duration,
}

enum ReplyState {
    Header,
    Result,
    ResultEnd,
    ErrorRc,
    ErrorMessage,
    ErrorEnd,
}

impl RpcClient {
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self, RpcError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(RpcClient {
            stream,
            encoder: Encoder::new(),
            parser: Parser::new(),
            inbuf: BytesMut::with_capacity(8 * 1024),
            timeout: Duration::from_secs(30),
        })
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Calls an unscoped method.
    pub async fn call(
        &mut self,
        method: &str,
        args: &[SerializationInfo],
    ) -> Result<SerializationInfo, RpcError> {
        self.call_domain("", method, args).await
    }

    /// Calls a domain-scoped method and returns the result tree. A peer
    /// error frame surfaces as [`RpcError::Remote`].
    pub async fn call_domain(
        &mut self,
        domain: &str,
        method: &str,
        args: &[SerializationInfo],
    ) -> Result<SerializationInfo, RpcError> {
        let mut out = BytesMut::new();
        if domain.is_empty() {
            out.put_u8(frame::REQUEST);
        } else {
            out.put_u8(frame::DOMAIN);
            out.extend_from_slice(domain.as_bytes());
            out.put_u8(0);
        }
        out.extend_from_slice(method.as_bytes());
        out.put_u8(0);
        for arg in args {
            self.encoder.format(arg, &mut out)?;
        }
        out.put_u8(tags::END);

        timeout(self.timeout, self.stream.write_all(&out))
            .await
            .map_err(|_| RpcError::WriteTimeout)??;

        self.read_reply().await
    }

    async fn read_reply(&mut self) -> Result<SerializationInfo, RpcError> {
        let mut state = ReplyState::Header;
        let mut rc_bytes = [0u8; 4];
        let mut rc_len = 0;
        let mut message = Vec::new();

        loop {
            while self.inbuf.has_remaining() {
                match state {
                    ReplyState::Header => {
                        let b = self.inbuf.get_u8();
                        state = match b {
                            frame::RESPONSE => ReplyState::Result,
                            frame::EXCEPTION => ReplyState::ErrorRc,
                            _ => {
                                return Err(RpcError::MalformedFrame(format!(
                                    "unexpected reply header {b:#04x}"
                                )))
                            }
                        };
                    }
                    ReplyState::Result => {
                        if self.parser.advance(&mut self.inbuf)? {
                            state = ReplyState::ResultEnd;
                        }
                    }
                    ReplyState::ResultEnd => {
                        if self.inbuf.get_u8() != tags::END {
                            return Err(RpcError::MalformedFrame(
                                "missing reply terminator".to_owned(),
                            ));
                        }
                        return Ok(self.parser.take());
                    }
                    ReplyState::ErrorRc => {
                        rc_bytes[rc_len] = self.inbuf.get_u8();
                        rc_len += 1;
                        if rc_len == 4 {
                            state = ReplyState::ErrorMessage;
                        }
                    }
                    ReplyState::ErrorMessage => {
                        let b = self.inbuf.get_u8();
                        if b == 0 {
                            state = ReplyState::ErrorEnd;
                        } else {
                            message.push(b);
                        }
                    }
                    ReplyState::ErrorEnd => {
                        if self.inbuf.get_u8() != tags::END {
                            return Err(RpcError::MalformedFrame(
                                "missing error terminator".to_owned(),
                            ));
                        }
                        let rc = i32::from_be_bytes(rc_bytes);
                        let text = String::from_utf8_lossy(&message).into_owned();
                        return Err(RemoteError::new(rc, text).into());
                    }
                }
            }

            let n = timeout(self.timeout, self.stream.read_buf(&mut self.inbuf))
                .await
                .map_err(|_| RpcError::ReadTimeout)??;
            if n == 0 {
                return Err(RpcError::ConnectionClosed);
            }
        }
    }
}
