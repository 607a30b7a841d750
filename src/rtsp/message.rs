//! RTSP/1.0 request parsing and response formatting.

use bytes::{Buf, Bytes, BytesMut};

const MAX_HEADER: usize = 16 * 1024;

#[derive(Debug, Clone)]
pub struct Request {
    pub method: String,
    pub uri: String,
    pub version: String,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl Request {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn cseq(&self) -> Option<&str> {
        self.header("CSeq")
    }

    /// Absolute path of the request URI, without query or trailing slash.
    pub fn path(&self) -> String {
        let rest = match self.uri.split_once("://") {
            Some((_, rest)) => match rest.find('/') {
                Some(i) => &rest[i..],
                None => "/",
            },
            None => self.uri.as_str(),
        };
        let rest = rest.split(['?', '#']).next().unwrap_or(rest);
        let trimmed = rest.trim_end_matches('/');
        if trimmed.is_empty() {
            "/".to_string()
        } else {
            trimmed.to_string()
        }
    }
}

/// What the client sent next on the control connection.
#[derive(Debug)]
pub enum Incoming {
    Request(Request),
    /// Interleaved binary data (typically RTCP receiver reports).
    Interleaved { channel: u8, len: usize },
}

/// Parses one message off the front of `buf`, consuming it. `Ok(None)` means
/// more bytes are needed.
pub fn parse(buf: &mut BytesMut) -> anyhow::Result<Option<Incoming>> {
    if buf.is_empty() {
        return Ok(None);
    }
    if buf[0] == b'$' {
        if buf.len() < 4 {
            return Ok(None);
        }
        let channel = buf[1];
        let len = u16::from_be_bytes([buf[2], buf[3]]) as usize;
        if buf.len() < 4 + len {
            return Ok(None);
        }
        buf.advance(4 + len);
        return Ok(Some(Incoming::Interleaved { channel, len }));
    }

    let Some(head_end) = find_header_end(buf) else {
        if buf.len() > MAX_HEADER {
            anyhow::bail!("request header exceeds {} bytes", MAX_HEADER);
        }
        return Ok(None);
    };
    let head = std::str::from_utf8(&buf[..head_end])?;
    let mut lines = head.split("\r\n");
    let request_line = lines.next().unwrap_or_default();
    let mut parts = request_line.split_whitespace();
    let (Some(method), Some(uri), Some(version)) = (parts.next(), parts.next(), parts.next()) else {
        anyhow::bail!("malformed request line: {:?}", request_line);
    };
    if !version.starts_with("RTSP/") {
        anyhow::bail!("unsupported protocol version: {}", version);
    }

    let mut headers = Vec::new();
    for line in lines.filter(|l| !l.is_empty()) {
        let Some((name, value)) = line.split_once(':') else {
            anyhow::bail!("malformed header line: {:?}", line);
        };
        headers.push((name.trim().to_string(), value.trim().to_string()));
    }
    let mut request = Request {
        method: method.to_string(),
        uri: uri.to_string(),
        version: version.to_string(),
        headers,
        body: Bytes::new(),
    };

    let content_length = match request.header("Content-Length") {
        Some(v) => v.parse::<usize>()?,
        None => 0,
    };
    let total = head_end + 4 + content_length;
    if buf.len() < total {
        return Ok(None);
    }
    let mut message = buf.split_to(total);
    message.advance(head_end + 4);
    request.body = message.freeze();
    Ok(Some(Incoming::Request(request)))
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

pub fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        454 => "Session Not Found",
        455 => "Method Not Valid in This State",
        461 => "Unsupported Transport",
        500 => "Internal Server Error",
        _ => "Unknown",
    }
}

#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    headers: Vec<(String, String)>,
    body: Bytes,
}

impl Response {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Bytes::new(),
        }
    }

    pub fn ok() -> Self {
        Self::new(200)
    }

    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }

    pub fn body(mut self, content_type: &str, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self.header("Content-Type", content_type)
    }

    /// Serializes the response, echoing the request's CSeq.
    pub fn encode(&self, cseq: Option<&str>) -> Bytes {
        let mut out = format!("RTSP/1.0 {} {}\r\n", self.status, reason(self.status));
        if let Some(cseq) = cseq {
            out.push_str(&format!("CSeq: {}\r\n", cseq));
        }
        out.push_str("Server: rtsp-sim\r\n");
        for (name, value) in &self.headers {
            out.push_str(&format!("{}: {}\r\n", name, value));
        }
        if !self.body.is_empty() {
            out.push_str(&format!("Content-Length: {}\r\n", self.body.len()));
        }
        out.push_str("\r\n");

        let mut bytes = BytesMut::from(out.as_bytes());
        bytes.extend_from_slice(&self.body);
        bytes.freeze()
    }
}

/// Client transport parameters from a SETUP `Transport` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportSpec {
    Interleaved { rtp: u8, rtcp: u8 },
    Udp { rtp_port: u16, rtcp_port: u16 },
}

impl TransportSpec {
    /// Picks the first supported option of a comma-separated list.
    pub fn parse(header: &str) -> Option<Self> {
        header.split(',').find_map(Self::parse_one)
    }

    fn parse_one(option: &str) -> Option<Self> {
        let mut params = option.split(';').map(str::trim);
        let profile = params.next()?;
        let params: Vec<&str> = params.collect();
        let value = |key: &str| {
            params
                .iter()
                .find_map(|p| p.strip_prefix(key).and_then(|v| v.strip_prefix('=')))
        };
        let pair = |v: &str| -> Option<(u16, u16)> {
            match v.split_once('-') {
                Some((a, b)) => Some((a.parse().ok()?, b.parse().ok()?)),
                None => {
                    let a: u16 = v.parse().ok()?;
                    Some((a, a.checked_add(1)?))
                }
            }
        };

        if profile.eq_ignore_ascii_case("RTP/AVP/TCP") {
            let (rtp, rtcp) = match value("interleaved") {
                Some(v) => pair(v)?,
                None => (0, 1),
            };
            return Some(TransportSpec::Interleaved {
                rtp: u8::try_from(rtp).ok()?,
                rtcp: u8::try_from(rtcp).ok()?,
            });
        }
        if profile.eq_ignore_ascii_case("RTP/AVP") || profile.eq_ignore_ascii_case("RTP/AVP/UDP") {
            if params.iter().any(|p| p.eq_ignore_ascii_case("multicast")) {
                return None;
            }
            let (rtp_port, rtcp_port) = pair(value("client_port")?)?;
            return Some(TransportSpec::Udp {
                rtp_port,
                rtcp_port,
            });
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_request_with_partial_input() {
        let raw = b"DESCRIBE rtsp://127.0.0.1:8554/simulation RTSP/1.0\r\nCSeq: 2\r\nAccept: application/sdp\r\n\r\n";
        let mut buf = BytesMut::from(&raw[..20]);
        assert!(parse(&mut buf).unwrap().is_none());

        let mut buf = BytesMut::from(&raw[..]);
        match parse(&mut buf).unwrap() {
            Some(Incoming::Request(req)) => {
                assert_eq!(req.method, "DESCRIBE");
                assert_eq!(req.cseq(), Some("2"));
                assert_eq!(req.header("accept"), Some("application/sdp"));
                assert_eq!(req.path(), "/simulation");
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(buf.is_empty());
    }

    #[test]
    fn test_parse_body_and_pipelined() {
        let raw = b"SET_PARAMETER * RTSP/1.0\r\nCSeq: 5\r\nContent-Length: 4\r\n\r\nab: OPTIONS * RTSP/1.0\r\nCSeq: 6\r\n\r\n";
        let mut buf = BytesMut::from(&raw[..]);
        // body "ab: " then the second request
        let Some(Incoming::Request(first)) = parse(&mut buf).unwrap() else {
            panic!("expected request");
        };
        assert_eq!(&first.body[..], b"ab: ");
        assert_eq!(first.path(), "*");
        let Some(Incoming::Request(second)) = parse(&mut buf).unwrap() else {
            panic!("expected request");
        };
        assert_eq!(second.method, "OPTIONS");
    }

    #[test]
    fn test_parse_interleaved() {
        let mut buf = BytesMut::from(&[b'$', 1, 0, 2, 0xAA, 0xBB, b'O'][..]);
        match parse(&mut buf).unwrap() {
            Some(Incoming::Interleaved { channel, len }) => {
                assert_eq!((channel, len), (1, 2));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(&buf[..], b"O");
    }

    #[test]
    fn test_path_variants() {
        let req = |uri: &str| Request {
            method: "SETUP".into(),
            uri: uri.into(),
            version: "RTSP/1.0".into(),
            headers: vec![],
            body: Bytes::new(),
        };
        assert_eq!(req("rtsp://host:8554/simulation/trackID=0").path(), "/simulation/trackID=0");
        assert_eq!(req("rtsp://host:8554/simulation/?x=1").path(), "/simulation");
        assert_eq!(req("rtsp://host:8554").path(), "/");
        assert_eq!(req("*").path(), "*");
    }

    #[test]
    fn test_response_encoding() {
        let bytes = Response::ok()
            .header("Public", "OPTIONS, DESCRIBE")
            .body("application/sdp", "v=0\r\n")
            .encode(Some("3"));
        let text = std::str::from_utf8(&bytes).unwrap();
        assert!(text.starts_with("RTSP/1.0 200 OK\r\nCSeq: 3\r\n"));
        assert!(text.contains("Content-Length: 5\r\n"));
        assert!(text.ends_with("\r\n\r\nv=0\r\n"));
    }

    #[test]
    fn test_transport_parsing() {
        assert_eq!(
            TransportSpec::parse("RTP/AVP/TCP;unicast;interleaved=2-3"),
            Some(TransportSpec::Interleaved { rtp: 2, rtcp: 3 })
        );
        assert_eq!(
            TransportSpec::parse("RTP/AVP;unicast;client_port=5000-5001"),
            Some(TransportSpec::Udp {
                rtp_port: 5000,
                rtcp_port: 5001
            })
        );
        assert_eq!(
            TransportSpec::parse("RTP/AVP;multicast,RTP/AVP/TCP;interleaved=0-1"),
            Some(TransportSpec::Interleaved { rtp: 0, rtcp: 1 })
        );
        assert_eq!(TransportSpec::parse("RAW/RAW/UDP;unicast"), None);
    }
}
