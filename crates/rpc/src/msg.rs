//! Wire envelope and the request/response catalogue.

use std::fmt;

use attestor_zk::BlockReveal;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::RpcError;

/// A message exchanged over a connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcMessage {
    /// Correlation ID, linking a response to its request.
    pub id: Option<u64>,
    /// Payload.
    pub payload: Payload,
}

impl RpcMessage {
    /// Creates a message without an ID. An ID is assigned when it is sent.
    pub fn new(payload: impl Into<Payload>) -> Self {
        Self {
            id: None,
            payload: payload.into(),
        }
    }
}

/// Payload of an [`RpcMessage`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Payload {
    /// The connection has been initialized by the peer.
    InitResponse,
    /// A request.
    Request(Request),
    /// A successful response.
    Response(Response),
    /// A failed response.
    RequestError(RpcError),
    /// The sender is terminating the connection.
    TerminationAlert(RpcError),
    /// Raw TLS data, passed through without interpretation.
    TlsMessage(TlsMessage),
}

impl From<Request> for Payload {
    fn from(request: Request) -> Self {
        Payload::Request(request)
    }
}

impl From<Response> for Payload {
    fn from(response: Response) -> Self {
        Payload::Response(response)
    }
}

impl From<TlsMessage> for Payload {
    fn from(message: TlsMessage) -> Self {
        Payload::TlsMessage(message)
    }
}

/// Type of an RPC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RpcType {
    /// Opens a tunnel to a server.
    CreateTunnel,
    /// Closes a tunnel.
    DisconnectTunnel,
    /// Claims the transcript of a tunnel.
    ClaimTunnel,
}

impl fmt::Display for RpcType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RpcType::CreateTunnel => write!(f, "createTunnel"),
            RpcType::DisconnectTunnel => write!(f, "disconnectTunnel"),
            RpcType::ClaimTunnel => write!(f, "claimTunnel"),
        }
    }
}

/// A request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Request {
    /// Opens a tunnel.
    CreateTunnel(CreateTunnelRequest),
    /// Closes a tunnel.
    DisconnectTunnel(DisconnectTunnelRequest),
    /// Claims a transcript.
    ClaimTunnel(ClaimTunnelRequest),
}

impl Request {
    /// Returns the type of the request.
    pub fn rpc_type(&self) -> RpcType {
        match self {
            Request::CreateTunnel(_) => RpcType::CreateTunnel,
            Request::DisconnectTunnel(_) => RpcType::DisconnectTunnel,
            Request::ClaimTunnel(_) => RpcType::ClaimTunnel,
        }
    }
}

/// A response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Response {
    /// Response to [`Request::CreateTunnel`].
    CreateTunnel(CreateTunnelResponse),
    /// Response to [`Request::DisconnectTunnel`].
    DisconnectTunnel(DisconnectTunnelResponse),
    /// Response to [`Request::ClaimTunnel`].
    ClaimTunnel(ClaimTunnelResponse),
}

impl Response {
    /// Returns the type of the request this response answers.
    pub fn rpc_type(&self) -> RpcType {
        match self {
            Response::CreateTunnel(_) => RpcType::CreateTunnel,
            Response::DisconnectTunnel(_) => RpcType::DisconnectTunnel,
            Response::ClaimTunnel(_) => RpcType::ClaimTunnel,
        }
    }
}

/// An RPC, mapping a request type to its response type.
pub trait Rpc {
    /// Type of the RPC.
    const TYPE: RpcType;
    /// Request.
    type Request: Into<Request> + Send;
    /// Response.
    type Response: TryFrom<Response, Error = Response> + Send;
}

macro_rules! rpc {
    ($(#[$doc:meta])* $name:ident, $req:ident, $res:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy)]
        pub struct $name;

        impl Rpc for $name {
            const TYPE: RpcType = RpcType::$name;
            type Request = $req;
            type Response = $res;
        }

        impl From<$req> for Request {
            fn from(request: $req) -> Self {
                Request::$name(request)
            }
        }

        impl From<$res> for Response {
            fn from(response: $res) -> Self {
                Response::$name(response)
            }
        }

        impl TryFrom<Response> for $res {
            type Error = Response;

            fn try_from(response: Response) -> Result<Self, Self::Error> {
                match response {
                    Response::$name(response) => Ok(response),
                    other => Err(other),
                }
            }
        }
    };
}

rpc!(
    /// Opens a tunnel to a server.
    CreateTunnel,
    CreateTunnelRequest,
    CreateTunnelResponse
);
rpc!(
    /// Closes a tunnel.
    DisconnectTunnel,
    DisconnectTunnelRequest,
    DisconnectTunnelResponse
);
rpc!(
    /// Claims the transcript of a tunnel.
    ClaimTunnel,
    ClaimTunnelRequest,
    ClaimTunnelResponse
);

/// Request to open a tunnel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateTunnelRequest {
    /// ID of the tunnel, chosen by the client.
    pub id: u32,
    /// Server host.
    pub host: String,
    /// Server port.
    pub port: u16,
}

/// Response to [`CreateTunnelRequest`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateTunnelResponse {}

/// Request to close a tunnel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisconnectTunnelRequest {
    /// ID of the tunnel.
    pub id: u32,
}

/// Response to [`DisconnectTunnelRequest`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisconnectTunnelResponse {}

/// Direction of a transcript message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TranscriptSender {
    /// Sent by the client.
    Client,
    /// Sent by the server.
    Server,
}

/// A message of a tunnel transcript together with its reveal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptMessage {
    /// Sender of the message.
    pub sender: TranscriptSender,
    /// Ciphertext of the message, as observed on the wire.
    pub message: Vec<u8>,
    /// Reveal of the message.
    pub reveal: BlockReveal,
}

/// Request to claim the transcript of a tunnel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimTunnelRequest {
    /// ID of the tunnel.
    pub tunnel_id: u32,
    /// Name of the provider the claim is made for.
    pub provider: String,
    /// Provider parameters.
    pub parameters: String,
    /// Transcript of the tunnel.
    pub transcript: Vec<TranscriptMessage>,
    /// Time of the claim, in seconds since the UNIX epoch.
    pub timestamp_s: u64,
}

/// A verified claim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimData {
    /// Name of the provider.
    pub provider: String,
    /// Provider parameters.
    pub parameters: String,
    /// Time of the claim, in seconds since the UNIX epoch.
    pub timestamp_s: u64,
}

/// Response to [`ClaimTunnelRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimTunnelResponse {
    /// The verified claim.
    pub claim: ClaimData,
    /// Revealed plaintext of each transcript message. Hidden bytes are
    /// [`REDACTION_CHAR`](attestor_zk::redact::REDACTION_CHAR).
    pub revealed: Vec<Vec<u8>>,
}

/// Raw TLS data of a tunnel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsMessage {
    /// ID of the tunnel.
    pub tunnel_id: u32,
    /// TLS data.
    pub message: Vec<u8>,
}

/// Encodes a message.
pub fn encode(msg: &RpcMessage) -> Result<Bytes, RpcError> {
    Ok(Bytes::from(bincode::serialize(msg)?))
}

/// Decodes a message.
pub fn decode(bytes: &[u8]) -> Result<RpcMessage, RpcError> {
    bincode::deserialize(bytes)
        .map_err(|e| RpcError::internal(format!("unknown message type: {e}")))
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::create(CreateTunnelResponse::default().into(), RpcType::CreateTunnel)]
    #[case::disconnect(DisconnectTunnelResponse::default().into(), RpcType::DisconnectTunnel)]
    fn test_response_type(#[case] response: Response, #[case] expected: RpcType) {
        assert_eq!(response.rpc_type(), expected);
    }

    #[test]
    fn test_typed_response() {
        let response: Response = CreateTunnelResponse::default().into();

        assert!(CreateTunnelResponse::try_from(response.clone()).is_ok());
        assert_eq!(DisconnectTunnelResponse::try_from(response.clone()), Err(response));
    }

    #[test]
    fn test_decode_claim() {
        let msg = RpcMessage {
            id: Some(7),
            payload: Payload::Request(
                ClaimTunnelRequest {
                    tunnel_id: 1,
                    provider: "http".to_string(),
                    parameters: "{}".to_string(),
                    transcript: vec![TranscriptMessage {
                        sender: TranscriptSender::Server,
                        message: vec![1, 2, 3],
                        reveal: BlockReveal::default(),
                    }],
                    timestamp_s: 1_700_000_000,
                }
                .into(),
            ),
        };

        assert_eq!(decode(&encode(&msg).unwrap()).unwrap(), msg);
    }

    #[test]
    fn test_decode_garbage() {
        let err = decode(&[0xff; 3]).unwrap_err();

        assert_eq!(err.code(), crate::ErrorCode::Internal);
    }
}
