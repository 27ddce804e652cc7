//! XML-RPC over HTTP: the methodCall/methodResponse codec, an axum route
//! serving POSTed calls from the shared registry, and a reqwest client.
//!
//! Faults travel as HTTP 200 responses carrying a faultCode/faultString
//! struct, per the XML-RPC convention.

use crate::HttpRpcError;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use courier::{RemoteError, ServiceRegistry};
use sinfo::{float_to_string, parse_float, parse_int, Category, Scalar, SerializationInfo};
use std::io::Read;
use std::sync::Arc;
use url::Url;
use xml::reader::{EventReader, XmlEvent as ReadEvent};
use xml::writer::{EmitterConfig, EventWriter, XmlEvent as WriteEvent};

pub const CONTENT_TYPE: &str = "text/xml";

// ---- rendering ----

fn write_text<W: std::io::Write>(
    writer: &mut EventWriter<W>,
    element: &str,
    text: &str,
) -> Result<(), HttpRpcError> {
    writer.write(WriteEvent::start_element(element))?;
    if !text.is_empty() {
        writer.write(WriteEvent::characters(text))?;
    }
    writer.write(WriteEvent::end_element())?;
    Ok(())
}

fn write_value<W: std::io::Write>(
    writer: &mut EventWriter<W>,
    si: &SerializationInfo,
) -> Result<(), HttpRpcError> {
    writer.write(WriteEvent::start_element("value"))?;
    match si.category() {
        Category::Object => {
            writer.write(WriteEvent::start_element("struct"))?;
            for member in si.members() {
                writer.write(WriteEvent::start_element("member"))?;
                write_text(writer, "name", member.name())?;
                write_value(writer, member)?;
                writer.write(WriteEvent::end_element())?;
            }
            writer.write(WriteEvent::end_element())?;
        }
        Category::Array => {
            writer.write(WriteEvent::start_element("array"))?;
            writer.write(WriteEvent::start_element("data"))?;
            for member in si.members() {
                write_value(writer, member)?;
            }
            writer.write(WriteEvent::end_element())?;
            writer.write(WriteEvent::end_element())?;
        }
        Category::Void | Category::Value => match si.scalar() {
            None => {
                writer.write(WriteEvent::start_element("nil"))?;
                writer.write(WriteEvent::end_element())?;
            }
            Some(Scalar::Bool(b)) => write_text(writer, "boolean", if *b { "1" } else { "0" })?,
            Some(Scalar::Int(v)) => write_text(writer, "int", &v.to_string())?,
            Some(Scalar::UInt(v)) => write_text(writer, "int", &v.to_string())?,
            Some(Scalar::Float(v)) => {
                write_text(writer, "double", &float_to_string(*v as f64))?
            }
            Some(Scalar::Double(v)) => write_text(writer, "double", &float_to_string(*v))?,
            Some(Scalar::Str(s)) => write_text(writer, "string", s)?,
            Some(Scalar::Char(c)) => write_text(writer, "string", &c.to_string())?,
            Some(Scalar::Bytes(b)) => {
                write_text(writer, "string", &String::from_utf8_lossy(b))?
            }
        },
    }
    writer.write(WriteEvent::end_element())?;
    Ok(())
}

fn emitter<W: std::io::Write>(sink: W) -> EventWriter<W> {
    EmitterConfig::new()
        .write_document_declaration(true)
        .create_writer(sink)
}

/// Renders a methodCall document.
pub fn render_call(method: &str, args: &[SerializationInfo]) -> Result<String, HttpRpcError> {
    let mut buf = Vec::new();
    let mut writer = emitter(&mut buf);
    writer.write(WriteEvent::start_element("methodCall"))?;
    write_text(&mut writer, "methodName", method)?;
    writer.write(WriteEvent::start_element("params"))?;
    for arg in args {
        writer.write(WriteEvent::start_element("param"))?;
        write_value(&mut writer, arg)?;
        writer.write(WriteEvent::end_element())?;
    }
    writer.write(WriteEvent::end_element())?;
    writer.write(WriteEvent::end_element())?;
    String::from_utf8(buf).map_err(|_| HttpRpcError::Xml("emitter produced non-utf8".into()))
}

/// Renders a successful methodResponse document.
pub fn render_response(result: &SerializationInfo) -> Result<String, HttpRpcError> {
    let mut buf = Vec::new();
    let mut writer = emitter(&mut buf);
    writer.write(WriteEvent::start_element("methodResponse"))?;
    writer.write(WriteEvent::start_element("params"))?;
    writer.write(WriteEvent::start_element("param"))?;
    write_value(&mut writer, result)?;
    writer.write(WriteEvent::end_element())?;
    writer.write(WriteEvent::end_element())?;
    writer.write(WriteEvent::end_element())?;
    String::from_utf8(buf).map_err(|_| HttpRpcError::Xml("emitter produced non-utf8".into()))
}

/// Renders a fault methodResponse carrying faultCode/faultString.
pub fn render_fault(rc: i32, message: &str) -> Result<String, HttpRpcError> {
    let mut fault = SerializationInfo::new();
    fault.add_member("faultCode").set_value(rc as i64);
    fault.add_member("faultString").set_value(message);

    let mut buf = Vec::new();
    let mut writer = emitter(&mut buf);
    writer.write(WriteEvent::start_element("methodResponse"))?;
    writer.write(WriteEvent::start_element("fault"))?;
    write_value(&mut writer, &fault)?;
    writer.write(WriteEvent::end_element())?;
    writer.write(WriteEvent::end_element())?;
    String::from_utf8(buf).map_err(|_| HttpRpcError::Xml("emitter produced non-utf8".into()))
}

// ---- parsing ----

struct XmlParser<R: Read> {
    reader: EventReader<R>,
}

impl<R: Read> XmlParser<R> {
    fn new(source: R) -> Self {
        XmlParser {
            reader: EventReader::new(source),
        }
    }

    /// The next event that is not whitespace or a processing instruction.
    fn next(&mut self) -> Result<ReadEvent, HttpRpcError> {
        loop {
            match self.reader.next()? {
                ReadEvent::Whitespace(_)
                | ReadEvent::Comment(_)
                | ReadEvent::ProcessingInstruction { .. }
                | ReadEvent::StartDocument { .. } => continue,
                ReadEvent::Characters(text) if text.trim().is_empty() => continue,
                event => return Ok(event),
            }
        }
    }

    fn expect_start(&mut self, element: &str) -> Result<(), HttpRpcError> {
        match self.next()? {
            ReadEvent::StartElement { name, .. } if name.local_name == element => Ok(()),
            other => Err(HttpRpcError::Xml(format!(
                "expected <{element}>, got {other:?}"
            ))),
        }
    }

    fn expect_end(&mut self, element: &str) -> Result<(), HttpRpcError> {
        match self.next()? {
            ReadEvent::EndElement { name } if name.local_name == element => Ok(()),
            other => Err(HttpRpcError::Xml(format!(
                "expected </{element}>, got {other:?}"
            ))),
        }
    }

    /// Character content up to the matching end tag.
    fn text_until_end(&mut self) -> Result<String, HttpRpcError> {
        let mut text = String::new();
        loop {
            match self.reader.next()? {
                ReadEvent::Characters(chunk) | ReadEvent::Whitespace(chunk) => text.push_str(&chunk),
                ReadEvent::CData(chunk) => text.push_str(&chunk),
                ReadEvent::EndElement { .. } => return Ok(text),
                other => {
                    return Err(HttpRpcError::Xml(format!(
                        "unexpected {other:?} in text content"
                    )))
                }
            }
        }
    }

    /// Parses one `<value>…</value>`, the opening tag already consumed.
    fn parse_value_body(&mut self) -> Result<SerializationInfo, HttpRpcError> {
        let mut si = SerializationInfo::new();
        match self.next()? {
            // A bare <value>text</value> is a string.
            ReadEvent::Characters(text) => {
                si.set_value(text.as_str());
                si.set_type_name("string");
                self.expect_end("value")?;
                return Ok(si);
            }
            ReadEvent::EndElement { .. } => {
                si.set_value("");
                si.set_type_name("string");
                return Ok(si);
            }
            ReadEvent::StartElement { name, .. } => match name.local_name.as_str() {
                "int" | "i4" | "i8" => {
                    let text = self.text_until_end()?;
                    let v = parse_int(&text)
                        .ok_or_else(|| HttpRpcError::Xml(format!("bad integer {text:?}")))?;
                    si.set_value(v);
                    si.set_type_name("int");
                }
                "boolean" => {
                    let text = self.text_until_end()?;
                    let v = matches!(text.trim(), "1" | "true");
                    si.set_value(v);
                    si.set_type_name("bool");
                }
                "double" => {
                    let text = self.text_until_end()?;
                    let v = parse_float(&text)
                        .ok_or_else(|| HttpRpcError::Xml(format!("bad double {text:?}")))?;
                    si.set_value(v);
                    si.set_type_name("double");
                }
                "string" | "dateTime.iso8601" | "base64" => {
                    let text = self.text_until_end()?;
                    si.set_value(text.as_str());
                    si.set_type_name("string");
                }
                "nil" => {
                    self.text_until_end()?;
                    si.set_null();
                }
                "struct" => {
                    si.set_category(Category::Object);
                    loop {
                        match self.next()? {
                            ReadEvent::StartElement { name, .. }
                                if name.local_name == "member" =>
                            {
                                self.expect_start("name")?;
                                let member_name = self.text_until_end()?;
                                self.expect_start("value")?;
                                let mut member = self.parse_value_body()?;
                                member.set_name(member_name);
                                si.push_member(member);
                                self.expect_end("member")?;
                            }
                            ReadEvent::EndElement { name }
                                if name.local_name == "struct" =>
                            {
                                break;
                            }
                            other => {
                                return Err(HttpRpcError::Xml(format!(
                                    "unexpected {other:?} in struct"
                                )))
                            }
                        }
                    }
                }
                "array" => {
                    si.set_category(Category::Array);
                    si.set_type_name("array");
                    self.expect_start("data")?;
                    loop {
                        match self.next()? {
                            ReadEvent::StartElement { name, .. }
                                if name.local_name == "value" =>
                            {
                                si.push_member(self.parse_value_body()?);
                            }
                            ReadEvent::EndElement { name } if name.local_name == "data" => break,
                            other => {
                                return Err(HttpRpcError::Xml(format!(
                                    "unexpected {other:?} in array"
                                )))
                            }
                        }
                    }
                    self.expect_end("array")?;
                }
                other => {
                    return Err(HttpRpcError::Xml(format!("unknown value type <{other}>")))
                }
            },
            other => return Err(HttpRpcError::Xml(format!("unexpected {other:?} in value"))),
        }
        self.expect_end("value")?;
        Ok(si)
    }
}

/// Parses a methodCall document into (method, args).
pub fn parse_call(body: &[u8]) -> Result<(String, Vec<SerializationInfo>), HttpRpcError> {
    let mut parser = XmlParser::new(body);
    parser.expect_start("methodCall")?;
    parser.expect_start("methodName")?;
    let method = parser.text_until_end()?;
    let mut args = Vec::new();
    match parser.next()? {
        ReadEvent::StartElement { name, .. } if name.local_name == "params" => loop {
            match parser.next()? {
                ReadEvent::StartElement { name, .. } if name.local_name == "param" => {
                    parser.expect_start("value")?;
                    args.push(parser.parse_value_body()?);
                    parser.expect_end("param")?;
                }
                ReadEvent::EndElement { name } if name.local_name == "params" => break,
                other => {
                    return Err(HttpRpcError::Xml(format!("unexpected {other:?} in params")))
                }
            }
        },
        ReadEvent::EndElement { name } if name.local_name == "methodCall" => {
            return Ok((method.trim().to_owned(), args))
        }
        other => return Err(HttpRpcError::Xml(format!("unexpected {other:?}"))),
    }
    Ok((method.trim().to_owned(), args))
}

/// Parses a methodResponse document; a fault surfaces as
/// [`HttpRpcError::Remote`].
pub fn parse_response(body: &[u8]) -> Result<SerializationInfo, HttpRpcError> {
    let mut parser = XmlParser::new(body);
    parser.expect_start("methodResponse")?;
    match parser.next()? {
        ReadEvent::StartElement { name, .. } if name.local_name == "params" => {
            parser.expect_start("param")?;
            parser.expect_start("value")?;
            let result = parser.parse_value_body()?;
            parser.expect_end("param")?;
            parser.expect_end("params")?;
            Ok(result)
        }
        ReadEvent::StartElement { name, .. } if name.local_name == "fault" => {
            parser.expect_start("value")?;
            let fault = parser.parse_value_body()?;
            let rc = fault
                .get_member_value::<i32>("faultCode")
                .unwrap_or_default();
            let message = fault
                .get_member_value::<String>("faultString")
                .unwrap_or_default();
            Err(RemoteError::new(rc, message).into())
        }
        other => Err(HttpRpcError::Xml(format!("unexpected {other:?}"))),
    }
}

// ---- server ----

/// A router serving XML-RPC POSTs at `/` from the shared registry.
pub fn router(registry: Arc<ServiceRegistry>) -> axum::Router {
    axum::Router::new()
        .route("/", post(handle))
        .with_state(registry)
}

#[tracing::instrument(level = "debug", skip_all)]
async fn handle(
    State(registry): State<Arc<ServiceRegistry>>,
    headers: HeaderMap,
    body: bytes::Bytes,
) -> Response {
    if !content_type_matches(&headers, CONTENT_TYPE) {
        return StatusCode::UNSUPPORTED_MEDIA_TYPE.into_response();
    }
    let (method, args) = match parse_call(&body) {
        Ok(parsed) => parsed,
        Err(err) => {
            tracing::debug!(%err, "rejecting unparseable methodCall");
            return StatusCode::BAD_REQUEST.into_response();
        }
    };

    let document = match registry.dispatch("", &method, &args) {
        Ok(result) => render_response(&result),
        Err(err) => {
            let (rc, message) = err.rc_and_message();
            render_fault(rc, &message)
        }
    };
    match document {
        Ok(text) => ([(header::CONTENT_TYPE, CONTENT_TYPE)], text).into_response(),
        Err(err) => {
            tracing::error!(%err, "failed to render methodResponse");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

pub(crate) fn content_type_matches(headers: &HeaderMap, expected: &str) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_ascii_lowercase().starts_with(expected))
        .unwrap_or(false)
}

// ---- client ----

/// An XML-RPC client over reqwest. The response must come back with status
/// 200 and a text/xml content type before it is decoded.
pub struct XmlRpcClient {
    http: reqwest::Client,
    url: Url,
}

impl XmlRpcClient {
    pub fn new(url: Url) -> Self {
        XmlRpcClient {
            http: reqwest::Client::new(),
            url,
        }
    }

    pub async fn call(
        &self,
        method: &str,
        args: &[SerializationInfo],
    ) -> Result<SerializationInfo, HttpRpcError> {
        let body = render_call(method, args)?;
        let response = self
            .http
            .post(self.url.clone())
            .header(reqwest::header::CONTENT_TYPE, CONTENT_TYPE)
            .body(body)
            .send()
            .await?;

        let status = response.status().as_u16();
        if status != 200 {
            return Err(HttpRpcError::Status(status));
        }
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_owned();
        if !content_type.to_ascii_lowercase().starts_with(CONTENT_TYPE) {
            return Err(HttpRpcError::ContentType(content_type));
        }

        let bytes = response.bytes().await?;
        parse_response(&bytes)
    }
}
