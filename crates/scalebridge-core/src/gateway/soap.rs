//! SOAP 1.1 backend
//!
//! Calls SAP function modules exposed through the SOAP runtime. Arguments are
//! written as nested elements under `rfc:<OPERATION>`; the reply body is turned
//! back into a JSON tree where every leaf is a string.

use async_trait::async_trait;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use reqwest::header::CONTENT_TYPE;
use serde_json::{Map, Value};

use super::rpc::{ClientOptions, Credentials, RpcBackend, RpcClient};
use super::TransportError;

/// SOAP 1.1 envelope namespace
pub const SOAP_ENV_NS: &str = "http://schemas.xmlsoap.org/soap/envelope/";

/// Namespace of RFC function modules
pub const RFC_NS: &str = "urn:sap-com:document:sap:rfc:functions";

fn xml_error(e: impl std::fmt::Display) -> TransportError {
    TransportError::Malformed(e.to_string())
}

/// Production backend
#[derive(Debug, Clone)]
pub struct SoapBackend {
    namespace: String,
}

impl Default for SoapBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl SoapBackend {
    pub fn new() -> Self {
        Self {
            namespace: RFC_NS.to_string(),
        }
    }
}

#[async_trait]
impl RpcBackend for SoapBackend {
    async fn create_client(
        &self,
        descriptor: &str,
        options: &ClientOptions,
    ) -> Result<Box<dyn RpcClient>, TransportError> {
        let endpoint = reqwest::Url::parse(descriptor)
            .map_err(|e| TransportError::InvalidEndpoint(format!("{}: {}", descriptor, e)))?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(TransportError::InvalidEndpoint(descriptor.to_string()));
        }

        let http = reqwest::Client::builder()
            .user_agent(options.user_agent.as_str())
            .timeout(options.request_timeout)
            .build()
            .map_err(|e| TransportError::Http(e.to_string()))?;

        Ok(Box::new(SoapClient {
            http,
            endpoint,
            namespace: self.namespace.clone(),
            credentials: None,
        }))
    }

    fn name(&self) -> &'static str {
        "soap"
    }
}

struct SoapClient {
    http: reqwest::Client,
    endpoint: reqwest::Url,
    namespace: String,
    credentials: Option<Credentials>,
}

#[async_trait]
impl RpcClient for SoapClient {
    fn set_basic_auth(&mut self, credentials: &Credentials) -> Result<(), TransportError> {
        if credentials.user.trim().is_empty() {
            return Err(TransportError::Credentials("empty user name".to_string()));
        }
        self.credentials = Some(credentials.clone());
        Ok(())
    }

    async fn invoke(&self, operation: &str, args: Value) -> Result<Value, TransportError> {
        let envelope = build_envelope(&self.namespace, operation, &args)?;

        let mut request = self
            .http
            .post(self.endpoint.clone())
            .header(CONTENT_TYPE, "text/xml; charset=utf-8")
            .header("SOAPAction", format!("\"{}:{}\"", self.namespace, operation))
            .body(envelope);
        if let Some(credentials) = &self.credentials {
            request = request.basic_auth(&credentials.user, Some(credentials.password()));
        }

        let response = request
            .send()
            .await
            .map_err(|e| TransportError::Http(e.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| TransportError::Http(e.to_string()))?;

        let parsed = parse_envelope(&body);
        if !status.is_success() {
            // Faults usually come back as HTTP 500; prefer their message
            return match parsed {
                Err(fault @ TransportError::Fault { .. }) => Err(fault),
                _ => Err(TransportError::Http(format!(
                    "{} returned HTTP {}",
                    operation, status
                ))),
            };
        }
        parsed
    }
}

fn write_value<W: std::io::Write>(
    writer: &mut Writer<W>,
    name: &str,
    value: &Value,
) -> Result<(), TransportError> {
    match value {
        Value::Null => writer
            .write_event(Event::Empty(BytesStart::new(name)))
            .map_err(xml_error)?,
        Value::Object(fields) => {
            writer
                .write_event(Event::Start(BytesStart::new(name)))
                .map_err(xml_error)?;
            for (key, field) in fields {
                write_value(writer, key, field)?;
            }
            writer
                .write_event(Event::End(BytesEnd::new(name)))
                .map_err(xml_error)?;
        }
        Value::Array(rows) => {
            writer
                .write_event(Event::Start(BytesStart::new(name)))
                .map_err(xml_error)?;
            for row in rows {
                write_value(writer, "item", row)?;
            }
            writer
                .write_event(Event::End(BytesEnd::new(name)))
                .map_err(xml_error)?;
        }
        scalar => {
            let text = match scalar {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            writer
                .write_event(Event::Start(BytesStart::new(name)))
                .map_err(xml_error)?;
            writer
                .write_event(Event::Text(BytesText::new(&text)))
                .map_err(xml_error)?;
            writer
                .write_event(Event::End(BytesEnd::new(name)))
                .map_err(xml_error)?;
        }
    }
    Ok(())
}

/// Build the request envelope for `operation`
pub fn build_envelope(
    namespace: &str,
    operation: &str,
    args: &Value,
) -> Result<String, TransportError> {
    let mut writer = Writer::new(Vec::new());

    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .map_err(xml_error)?;

    let mut envelope = BytesStart::new("soapenv:Envelope");
    envelope.push_attribute(("xmlns:soapenv", SOAP_ENV_NS));
    envelope.push_attribute(("xmlns:rfc", namespace));
    writer
        .write_event(Event::Start(envelope))
        .map_err(xml_error)?;
    writer
        .write_event(Event::Empty(BytesStart::new("soapenv:Header")))
        .map_err(xml_error)?;
    writer
        .write_event(Event::Start(BytesStart::new("soapenv:Body")))
        .map_err(xml_error)?;

    let op_tag = format!("rfc:{}", operation);
    writer
        .write_event(Event::Start(BytesStart::new(op_tag.as_str())))
        .map_err(xml_error)?;
    if let Value::Object(fields) = args {
        for (key, field) in fields {
            write_value(&mut writer, key, field)?;
        }
    }
    writer
        .write_event(Event::End(BytesEnd::new(op_tag.as_str())))
        .map_err(xml_error)?;

    writer
        .write_event(Event::End(BytesEnd::new("soapenv:Body")))
        .map_err(xml_error)?;
    writer
        .write_event(Event::End(BytesEnd::new("soapenv:Envelope")))
        .map_err(xml_error)?;

    String::from_utf8(writer.into_inner()).map_err(xml_error)
}

/// Element being assembled while parsing
struct Node {
    name: String,
    children: Vec<(String, Value)>,
    text: String,
}

impl Node {
    fn new(name: String) -> Self {
        Self {
            name,
            children: Vec::new(),
            text: String::new(),
        }
    }

    fn into_value(self) -> Value {
        if self.children.is_empty() {
            return Value::String(self.text);
        }
        // Table rows
        if self.children.iter().all(|(name, _)| name == "item") {
            return Value::Array(self.children.into_iter().map(|(_, v)| v).collect());
        }

        let mut fields = Map::new();
        for (name, value) in self.children {
            match fields.get_mut(&name) {
                Some(Value::Array(existing)) => existing.push(value),
                Some(existing) => {
                    let first = existing.take();
                    *existing = Value::Array(vec![first, value]);
                }
                None => {
                    fields.insert(name, value);
                }
            }
        }
        Value::Object(fields)
    }
}

fn local_name(qualified: &[u8]) -> String {
    String::from_utf8_lossy(qualified).into_owned()
}

/// Parse a reply envelope into the JSON tree of its body's payload
///
/// A `Fault` body becomes [`TransportError::Fault`]; an empty response element
/// becomes an empty object.
pub fn parse_envelope(xml: &str) -> Result<Value, TransportError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<Node> = Vec::new();
    let mut root: Option<(String, Value)> = None;

    loop {
        match reader.read_event().map_err(xml_error)? {
            Event::Start(e) => stack.push(Node::new(local_name(e.local_name().as_ref()))),
            Event::Empty(e) => {
                let name = local_name(e.local_name().as_ref());
                match stack.last_mut() {
                    Some(parent) => parent.children.push((name, Value::String(String::new()))),
                    None => root = Some((name, Value::String(String::new()))),
                }
            }
            Event::Text(t) => {
                if let Some(node) = stack.last_mut() {
                    node.text.push_str(&t.unescape().map_err(xml_error)?);
                }
            }
            Event::CData(c) => {
                if let Some(node) = stack.last_mut() {
                    node.text.push_str(&String::from_utf8_lossy(&c.into_inner()));
                }
            }
            Event::End(_) => {
                let node = stack
                    .pop()
                    .ok_or_else(|| TransportError::Malformed("unbalanced end tag".to_string()))?;
                let name = node.name.clone();
                let value = node.into_value();
                match stack.last_mut() {
                    Some(parent) => parent.children.push((name, value)),
                    None => root = Some((name, value)),
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    let (root_name, envelope) =
        root.ok_or_else(|| TransportError::Malformed("empty document".to_string()))?;
    if root_name != "Envelope" {
        return Err(TransportError::Malformed(format!(
            "expected Envelope, found {}",
            root_name
        )));
    }

    let body = match envelope.get("Body") {
        Some(Value::Object(body)) => body,
        Some(_) => return Ok(Value::Object(Map::new())),
        None => return Err(TransportError::Malformed("reply has no Body".to_string())),
    };

    if let Some(fault) = body.get("Fault") {
        let field = |key: &str| {
            fault
                .get(key)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        return Err(TransportError::Fault {
            code: field("faultcode"),
            message: field("faultstring"),
        });
    }

    let payload = body
        .iter()
        .find(|(name, _)| name.ends_with("Response"))
        .or_else(|| body.iter().next())
        .map(|(_, value)| value.clone())
        .unwrap_or(Value::Null);

    Ok(match payload {
        Value::String(s) if s.is_empty() => Value::Object(Map::new()),
        other => other,
    })
}
