use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An HTTP request carried to a worker.
///
/// Headers are ordered name/value pairs rather than a map: insertion order is
/// part of the contract (responses are capped positionally) and duplicate
/// names are legal HTTP.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpcRequest {
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl IpcRequest {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    /// First value of a header, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// An HTTP response carried back from a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpcResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl IpcResponse {
    pub fn with_status(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// The closed frame set exchanged between parent and worker.
///
/// `Request`/`Response`/`Error` are correlated by `req_id`; a persistent
/// worker may have several requests in flight at once. `Ready`, `Idle` and
/// `Terminate` are control frames without correlation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Frame {
    /// Worker finished startup and accepts requests.
    Ready,
    /// Parent -> worker: serve one request.
    Request { req_id: Uuid, req: IpcRequest },
    /// Worker -> parent: the reply for `req_id`.
    Response { req_id: Uuid, res: IpcResponse },
    /// Worker -> parent: the handler for `req_id` failed.
    Error {
        req_id: Uuid,
        error: String,
        stack: Option<String>,
    },
    /// Parent -> worker: the instance went idle; run the idle hook.
    Idle,
    /// Parent -> worker: shut down after running the terminate hook.
    Terminate,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_frame_roundtrips_through_bincode() {
        let frame = Frame::Request {
            req_id: Uuid::new_v4(),
            req: IpcRequest {
                method: "POST".into(),
                url: "/submit?x=1".into(),
                headers: vec![("content-type".into(), "application/json".into())],
                body: b"{\"a\":1}".to_vec(),
            },
        };
        let bytes = bincode::serialize(&frame).unwrap();
        let back: Frame = bincode::deserialize(&bytes).unwrap();
        assert_eq!(back, frame);
    }

    #[test]
    fn control_frames_roundtrip() {
        for frame in [Frame::Ready, Frame::Idle, Frame::Terminate] {
            let bytes = bincode::serialize(&frame).unwrap();
            assert_eq!(bincode::deserialize::<Frame>(&bytes).unwrap(), frame);
        }
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let mut req = IpcRequest::new("GET", "/");
        req.headers.push(("X-Base".into(), "/app/".into()));
        assert_eq!(req.header("x-base"), Some("/app/"));
        assert_eq!(req.header("missing"), None);
    }
}
